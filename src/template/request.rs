//! Composed node templates
//!
//! The declarative request for a composed node. Numeric fields are signed and
//! enumerations keep unknown strings so that a malformed template still
//! deserializes and the validator can report every problem in it.

use crate::context::Context;
use crate::domain::types::{
    DriveType, InstructionSet, InstructionSetExtension, Location, MemoryType, ProcessorModel,
    RemoteStorageType, ReplicationMethod, StorageBackend,
};
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Requirement category, used to report where allocation ran short
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequirementCategory {
    Processor,
    Memory,
    LocalDrive,
    RemoteDrive,
    NetworkInterface,
}

impl std::fmt::Display for RequirementCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequirementCategory::Processor => write!(f, "processors"),
            RequirementCategory::Memory => write!(f, "memory"),
            RequirementCategory::LocalDrive => write!(f, "local drives"),
            RequirementCategory::RemoteDrive => write!(f, "remote drives"),
            RequirementCategory::NetworkInterface => write!(f, "network interfaces"),
        }
    }
}

/// Quantity as requested; absent means one
fn requested(quantity: Option<i32>) -> usize {
    quantity.unwrap_or(1).max(0) as usize
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProcessorRequirement {
    pub quantity: Option<i32>,
    pub model: Option<ProcessorModel>,
    pub total_cores: Option<i32>,
    pub max_speed_mhz: Option<i32>,
    pub instruction_set: Option<InstructionSet>,
    pub instruction_set_extensions: Vec<InstructionSetExtension>,
    pub location: Option<Location>,
}

impl ProcessorRequirement {
    pub fn count(&self) -> usize {
        requested(self.quantity)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MemoryRequirement {
    /// Number of modules; when absent with a size, as many as the size needs
    pub quantity: Option<i32>,
    /// Cumulative size of the selected modules
    pub size_gb: Option<i64>,
    pub speed_mhz: Option<i32>,
    #[serde(rename = "type")]
    pub memory_type: Option<MemoryType>,
    pub location: Option<Location>,
}

impl MemoryRequirement {
    /// Explicitly requested module count, if any
    pub fn count(&self) -> Option<usize> {
        match (self.quantity, self.size_gb) {
            (None, Some(_)) => None,
            (quantity, _) => Some(requested(quantity)),
        }
    }

    /// Whether this requirement asks for anything at all
    pub fn is_empty(&self) -> bool {
        self.count() == Some(0)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LocalDriveRequirement {
    pub quantity: Option<i32>,
    pub capacity_gb: Option<i64>,
    #[serde(rename = "type")]
    pub drive_type: Option<DriveType>,
    pub boot_order: Option<i32>,
    pub location: Option<Location>,
}

impl LocalDriveRequirement {
    pub fn count(&self) -> usize {
        requested(self.quantity)
    }
}

/// Master drive a new remote drive is replicated from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MasterDrive {
    #[serde(rename = "type")]
    pub replication: ReplicationMethod,
    pub address: Context,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RemoteDriveRequirement {
    pub capacity_gb: Option<i64>,
    pub storage_backend: Option<StorageBackend>,
    pub address_type: Option<RemoteStorageType>,
    /// IQN of an existing target, or of the target to create for a clone
    pub address: Option<String>,
    pub master: Option<MasterDrive>,
    pub boot_order: Option<i32>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VlanRequirement {
    pub vlan_id: i32,
    pub tagged: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NetworkInterfaceRequirement {
    pub quantity: Option<i32>,
    pub speed_mbps: Option<i32>,
    pub vlans: Vec<VlanRequirement>,
    pub location: Option<Location>,
}

impl NetworkInterfaceRequirement {
    pub fn count(&self) -> usize {
        requested(self.quantity)
    }
}

/// Declarative request for a composed node
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ComposedNodeTemplate {
    pub name: String,
    pub description: Option<String>,
    pub processors: Vec<ProcessorRequirement>,
    pub memory: Vec<MemoryRequirement>,
    pub local_drives: Vec<LocalDriveRequirement>,
    pub remote_drives: Vec<RemoteDriveRequirement>,
    pub network_interfaces: Vec<NetworkInterfaceRequirement>,
}

impl ComposedNodeTemplate {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn from_yaml_str(text: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(text)?)
    }

    pub fn from_json_str(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Load from a file, picking the format by extension (YAML by default)
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json_str(&text),
            _ => Self::from_yaml_str(&text),
        }
    }
}
