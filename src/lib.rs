//! Pod Composer - Composable Infrastructure Allocation & Assembly Engine
//!
//! Carves logical servers ("composed nodes") out of a pod of disaggregated
//! rack hardware: processors, memory modules, local drives, network
//! interfaces and remote iSCSI volumes are claimed from a shared pool,
//! programmed into a working machine, and handed back on teardown.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────────┐
//! │                               Composer                                      │
//! ├─────────────────────────────────────────────────────────────────────────────┤
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────────┐  │
//! │  │    Template     │  │   Allocator     │  │   Assembler / Disassembler  │  │
//! │  │    Validator    │  │  (first fit)    │  │   (retry + compensation)    │  │
//! │  └────────┬────────┘  └────────┬────────┘  └─────────────┬───────────────┘  │
//! │           │                    │                         │                  │
//! │           └────────────────────┼─────────────────────────┘                  │
//! │                                │                                            │
//! │                    ┌───────────┴───────────┐                                │
//! │                    │    Resource Graph     │                                │
//! │                    │   (units of work)     │                                │
//! │                    └───────────────────────┘                                │
//! ├─────────────────────────────────────────────────────────────────────────────┤
//! │                     Device Capability Port                                  │
//! │  ┌─────────────────────────────┐  ┌─────────────────────────────────────┐   │
//! │  │     Manager Directory       │  │   Device Actions (per manager)      │   │
//! │  └─────────────────────────────┘  └─────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`graph`]: Resource graph, units of work, inventory loading
//! - [`context`]: Hierarchical addresses of graph entities
//! - [`template`]: Composed node templates and validation
//! - [`allocation`]: Matching and claiming pool assets
//! - [`assembly`]: Device programming, retries and teardown
//! - [`node`]: Composed node lifecycle and power actions
//! - [`devices`]: In-memory device capability adapter
//! - [`composer`]: Facade over the whole pipeline
//! - [`domain`]: Shared value types and port traits
//! - [`error`]: Error types and handling

pub mod allocation;
pub mod assembly;
pub mod composer;
pub mod config;
pub mod context;
pub mod devices;
pub mod domain;
pub mod error;
pub mod graph;
pub mod metrics;
pub mod node;
pub mod template;

#[cfg(test)]
pub(crate) mod fixtures;

// Re-export commonly used types
pub use allocation::NodeAllocator;

pub use assembly::{DisassemblyReport, NodeAssembler, NodeDisassembler, RetryPolicy};

pub use composer::{ComposedNodeView, Composer, PoolSummary, PoolUsage};

pub use config::{EngineConfig, RetryConfig};

pub use context::{Context, ContextResolver};

pub use devices::{InMemoryDevices, StaticDirectory};

pub use domain::ports::{
    DeviceActions, DeviceActionsRef, DeviceError, ManagerDirectory, ManagerDirectoryRef,
};

pub use error::{Error, ErrorAction, Result};

pub use graph::{Entity, EntityId, EntityKind, GraphEvent, GraphStore, PodInventory};

pub use metrics::{EngineMetrics, EngineMetricsSnapshot};

pub use node::{NodeReset, NodeState};

pub use template::{ComposedNodeTemplate, TemplateValidator, ValidationErrors};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
