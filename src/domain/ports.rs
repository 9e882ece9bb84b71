//! Domain Ports - Device capability traits
//!
//! The engine never speaks a device wire protocol. Everything it needs from
//! the hardware goes through [`DeviceActions`], resolved per managing
//! controller through a [`ManagerDirectory`].

use crate::domain::types::{BootOverrideMode, BootSource, ResetType, Vlan};
use crate::graph::EntityId;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

// =============================================================================
// Device Errors
// =============================================================================

/// Failure reported by a device endpoint
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    #[error("device unreachable: {0}")]
    Unreachable(String),

    #[error("device call timed out after {0:?}")]
    Timeout(Duration),

    #[error("device rejected request: {0}")]
    Rejected(String),

    #[error("no device endpoint registered for manager {0}")]
    NoEndpoint(EntityId),
}

impl DeviceError {
    /// Transient failures are worth another attempt
    pub fn is_transient(&self) -> bool {
        matches!(self, DeviceError::Unreachable(_) | DeviceError::Timeout(_))
    }
}

pub type DeviceResult<T> = std::result::Result<T, DeviceError>;

// =============================================================================
// Call Arguments
// =============================================================================

/// Identity of an asset as handed to a device endpoint
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AssetRef {
    pub id: EntityId,
    pub name: String,
}

impl std::fmt::Display for AssetRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.name, self.id)
    }
}

/// iSCSI endpoint a remote drive is exposed through
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IscsiTarget {
    pub target_iqn: String,
    pub lun: u32,
    pub initiator_iqn: String,
}

// =============================================================================
// Device Actions Port
// =============================================================================

/// Actions a managing controller can perform on the assets it owns.
///
/// Every method must be idempotent: the engine retries on transient errors
/// and compensates by issuing the inverse call.
#[async_trait]
pub trait DeviceActions: Send + Sync {
    /// Power action on a compute system
    async fn reset_asset(&self, system: &AssetRef, reset: ResetType) -> DeviceResult<()>;

    /// Set (or with [`BootOverrideMode::Disabled`], clear) the boot override
    async fn override_boot_source(
        &self,
        system: &AssetRef,
        source: BootSource,
        mode: BootOverrideMode,
    ) -> DeviceResult<()>;

    /// Expose a remote drive to its initiator
    async fn attach_lun(&self, drive: &AssetRef, target: &IscsiTarget) -> DeviceResult<()>;

    /// Withdraw a remote drive from its initiator
    async fn detach_lun(&self, drive: &AssetRef, target: &IscsiTarget) -> DeviceResult<()>;

    /// Program a VLAN on a switch-facing interface
    async fn set_vlan(&self, interface: &AssetRef, vlan: Vlan) -> DeviceResult<()>;

    /// Remove a VLAN from an interface
    async fn remove_vlan(&self, interface: &AssetRef, vlan_id: u16) -> DeviceResult<()>;

    /// Endpoint description for logs
    fn endpoint(&self) -> &str;
}

// =============================================================================
// Manager Directory Port
// =============================================================================

/// Maps a Manager entity to the endpoint that carries out its actions
pub trait ManagerDirectory: Send + Sync {
    fn actions_for(&self, manager: EntityId) -> Option<DeviceActionsRef>;
}

// =============================================================================
// Type Aliases for Arc'd Traits
// =============================================================================

pub type DeviceActionsRef = Arc<dyn DeviceActions>;
pub type ManagerDirectoryRef = Arc<dyn ManagerDirectory>;
