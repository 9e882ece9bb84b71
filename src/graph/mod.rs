//! Resource Graph
//!
//! The pod's physical and logical assets as entities connected by labeled
//! links, with all-or-nothing mutation through units of work.

pub mod entity;
pub mod events;
pub mod link;
pub mod seed;
pub mod store;

pub use entity::{
    Asset, BootEntry, ComposedNodeInfo, Entity, EntityId, EntityKind, LocalDriveInfo, ManagerInfo,
    MemoryInfo, NetworkInterfaceInfo, ProcessorInfo, RemoteAttachment, RemoteDriveInfo,
    RemoteTargetInfo, VolumeMode,
};
pub use events::GraphEvent;
pub use link::LinkLabel;
pub use seed::{InventoryEntity, PodInventory};
pub use store::{Graph, GraphStore, GraphView, UnitOfWork};
