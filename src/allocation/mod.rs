//! Resource allocation
//!
//! Matching of template requirements against free pool assets and the
//! all-or-nothing allocation of composed nodes.

pub mod allocator;
pub mod matcher;
mod remote;

pub use allocator::NodeAllocator;
pub use matcher::{candidates, located_at, volume_fits, Requirement};
