//! Entities of the resource graph
//!
//! Every physical or logical asset of the pod is an [`Entity`]: common
//! bookkeeping (id, name, location, health) around a kind-specific [`Asset`]
//! payload. The payload's [`EntityKind`] doubles as the type filter for graph
//! queries and the segment type of a context.

use crate::domain::types::{
    DriveType, Health, InstructionSet, InstructionSetExtension, Location, MemoryType,
    ProcessorModel, State, Vlan,
};
use crate::node::NodeState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// =============================================================================
// Entity ID
// =============================================================================

/// Unique, ordered identifier of an entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub u64);

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for EntityId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

// =============================================================================
// Entity Kind
// =============================================================================

/// Kind of an entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    Pod,
    Rack,
    Drawer,
    ComputeModule,
    Blade,
    Processor,
    Memory,
    LocalDrive,
    StorageService,
    RemoteDrive,
    RemoteTarget,
    NetworkInterface,
    Manager,
    ComposedNode,
}

impl EntityKind {
    /// Kinds a composed node can claim
    pub const CLAIMABLE: [EntityKind; 6] = [
        EntityKind::Processor,
        EntityKind::Memory,
        EntityKind::LocalDrive,
        EntityKind::RemoteDrive,
        EntityKind::RemoteTarget,
        EntityKind::NetworkInterface,
    ];

    pub fn is_claimable(&self) -> bool {
        Self::CLAIMABLE.contains(self)
    }

    /// Collection name used when rendering contexts
    pub fn collection(&self) -> &'static str {
        match self {
            EntityKind::Pod => "Pods",
            EntityKind::Rack => "Racks",
            EntityKind::Drawer => "Drawers",
            EntityKind::ComputeModule => "Modules",
            EntityKind::Blade => "Blades",
            EntityKind::Processor => "Processors",
            EntityKind::Memory => "Memory",
            EntityKind::LocalDrive => "Drives",
            EntityKind::StorageService => "Services",
            EntityKind::RemoteDrive => "LogicalDrives",
            EntityKind::RemoteTarget => "Targets",
            EntityKind::NetworkInterface => "EthernetInterfaces",
            EntityKind::Manager => "Managers",
            EntityKind::ComposedNode => "Nodes",
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}

// =============================================================================
// Asset Payloads
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessorInfo {
    pub model: ProcessorModel,
    pub instruction_set: InstructionSet,
    #[serde(default)]
    pub instruction_set_extensions: Vec<InstructionSetExtension>,
    pub total_cores: u32,
    pub max_speed_mhz: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryInfo {
    pub memory_type: MemoryType,
    pub size_gb: u64,
    pub speed_mhz: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalDriveInfo {
    pub drive_type: DriveType,
    pub capacity_gb: u64,
}

/// Whether a remote drive is a consumable volume or a group volumes are carved from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VolumeMode {
    Volume,
    VolumeGroup,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteDriveInfo {
    pub mode: VolumeMode,
    pub capacity_gb: u64,
    #[serde(default)]
    pub snapshot: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteTargetInfo {
    pub target_iqn: String,
    #[serde(default)]
    pub lun: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkInterfaceInfo {
    #[serde(default)]
    pub mac_address: Option<String>,
    pub speed_mbps: u32,
    #[serde(default)]
    pub vlan_enabled: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagerInfo {
    #[serde(default)]
    pub service_uri: Option<String>,
}

/// A remote drive programmed for a composed node, with the target exposing it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteAttachment {
    pub drive: EntityId,
    pub target: EntityId,
}

/// Boot priority of a claimed drive (local drive or remote target)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootEntry {
    pub asset: EntityId,
    pub order: u32,
}

/// State and assembly data of a composed node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComposedNodeInfo {
    #[serde(default)]
    pub description: Option<String>,
    pub state: NodeState,
    #[serde(default)]
    pub remote_attachments: Vec<RemoteAttachment>,
    /// VLANs to program, keyed by claimed network interface
    #[serde(default)]
    pub vlans: BTreeMap<EntityId, Vec<Vlan>>,
    #[serde(default)]
    pub boot_order: Vec<BootEntry>,
    /// Remote drives and targets created for this node, deleted with it
    #[serde(default)]
    pub provisioned: Vec<EntityId>,
}

impl ComposedNodeInfo {
    pub fn new(description: Option<String>) -> Self {
        Self {
            description,
            state: NodeState::Allocated,
            remote_attachments: Vec::new(),
            vlans: BTreeMap::new(),
            boot_order: Vec::new(),
            provisioned: Vec::new(),
        }
    }
}

/// Kind-specific payload of an entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Asset {
    Pod,
    Rack,
    Drawer,
    ComputeModule,
    Blade,
    Processor(ProcessorInfo),
    Memory(MemoryInfo),
    LocalDrive(LocalDriveInfo),
    StorageService,
    RemoteDrive(RemoteDriveInfo),
    RemoteTarget(RemoteTargetInfo),
    NetworkInterface(NetworkInterfaceInfo),
    Manager(ManagerInfo),
    ComposedNode(ComposedNodeInfo),
}

impl Asset {
    pub fn kind(&self) -> EntityKind {
        match self {
            Asset::Pod => EntityKind::Pod,
            Asset::Rack => EntityKind::Rack,
            Asset::Drawer => EntityKind::Drawer,
            Asset::ComputeModule => EntityKind::ComputeModule,
            Asset::Blade => EntityKind::Blade,
            Asset::Processor(_) => EntityKind::Processor,
            Asset::Memory(_) => EntityKind::Memory,
            Asset::LocalDrive(_) => EntityKind::LocalDrive,
            Asset::StorageService => EntityKind::StorageService,
            Asset::RemoteDrive(_) => EntityKind::RemoteDrive,
            Asset::RemoteTarget(_) => EntityKind::RemoteTarget,
            Asset::NetworkInterface(_) => EntityKind::NetworkInterface,
            Asset::Manager(_) => EntityKind::Manager,
            Asset::ComposedNode(_) => EntityKind::ComposedNode,
        }
    }
}

// =============================================================================
// Entity
// =============================================================================

/// A vertex of the resource graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: EntityId,
    pub name: String,
    pub location: Option<Location>,
    pub health: Health,
    pub state: State,
    pub modified: DateTime<Utc>,
    pub asset: Asset,
}

impl Entity {
    pub fn new(id: EntityId, name: impl Into<String>, asset: Asset) -> Self {
        Self {
            id,
            name: name.into(),
            location: None,
            health: Health::Ok,
            state: State::Enabled,
            modified: Utc::now(),
            asset,
        }
    }

    #[inline]
    pub fn kind(&self) -> EntityKind {
        self.asset.kind()
    }

    /// Healthy and enabled; claim status is a graph property and checked separately
    pub fn is_operational(&self) -> bool {
        self.health == Health::Ok && self.state == State::Enabled
    }

    pub fn as_processor(&self) -> Option<&ProcessorInfo> {
        match &self.asset {
            Asset::Processor(info) => Some(info),
            _ => None,
        }
    }

    pub fn as_memory(&self) -> Option<&MemoryInfo> {
        match &self.asset {
            Asset::Memory(info) => Some(info),
            _ => None,
        }
    }

    pub fn as_local_drive(&self) -> Option<&LocalDriveInfo> {
        match &self.asset {
            Asset::LocalDrive(info) => Some(info),
            _ => None,
        }
    }

    pub fn as_remote_drive(&self) -> Option<&RemoteDriveInfo> {
        match &self.asset {
            Asset::RemoteDrive(info) => Some(info),
            _ => None,
        }
    }

    pub fn as_remote_target(&self) -> Option<&RemoteTargetInfo> {
        match &self.asset {
            Asset::RemoteTarget(info) => Some(info),
            _ => None,
        }
    }

    pub fn as_network_interface(&self) -> Option<&NetworkInterfaceInfo> {
        match &self.asset {
            Asset::NetworkInterface(info) => Some(info),
            _ => None,
        }
    }

    pub fn as_composed_node(&self) -> Option<&ComposedNodeInfo> {
        match &self.asset {
            Asset::ComposedNode(info) => Some(info),
            _ => None,
        }
    }

    pub fn as_composed_node_mut(&mut self) -> Option<&mut ComposedNodeInfo> {
        match &mut self.asset {
            Asset::ComposedNode(info) => Some(info),
            _ => None,
        }
    }
}
