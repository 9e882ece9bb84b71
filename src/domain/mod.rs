//! Domain layer - Shared value types and port definitions
//!
//! This module defines the device capability traits (ports) that adapters
//! implement, following hexagonal architecture principles.

pub mod ports;
pub mod types;

pub use ports::*;
pub use types::*;
