//! In-memory device endpoints
//!
//! [`InMemoryDevices`] keeps the configuration a managing controller would
//! hold (attached LUNs, VLANs, boot overrides, power) in concurrent maps and
//! records every call. Faults and latency can be injected per operation to
//! exercise retries, timeouts and compensation.
//!
//! [`StaticDirectory`] maps Manager entities to endpoints.

use crate::domain::ports::{
    AssetRef, DeviceActions, DeviceActionsRef, DeviceError, DeviceResult, IscsiTarget,
    ManagerDirectory,
};
use crate::domain::types::{BootOverrideMode, BootSource, ResetType, Vlan};
use crate::graph::EntityId;
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

// =============================================================================
// Call Log
// =============================================================================

/// Device operation, used to address the call log and fault injection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum DeviceOp {
    Reset,
    OverrideBoot,
    AttachLun,
    DetachLun,
    SetVlan,
    RemoveVlan,
}

/// One call received by an endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceCallRecord {
    pub op: DeviceOp,
    pub asset: EntityId,
    pub detail: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PowerState {
    On,
    Off,
}

#[derive(Debug)]
struct Fault {
    remaining: u32,
    error: DeviceError,
}

// =============================================================================
// In-memory Endpoint
// =============================================================================

/// Device endpoint backed by in-memory state
pub struct InMemoryDevices {
    endpoint: String,
    /// Remote drive -> target it is attached through
    luns: DashMap<EntityId, IscsiTarget>,
    /// Interface -> VLANs by id
    vlans: DashMap<EntityId, BTreeMap<u16, Vlan>>,
    boot: DashMap<EntityId, (BootSource, BootOverrideMode)>,
    power: DashMap<EntityId, PowerState>,
    faults: DashMap<DeviceOp, Fault>,
    latency: Mutex<Option<Duration>>,
    calls: Mutex<Vec<DeviceCallRecord>>,
}

impl InMemoryDevices {
    pub fn new(endpoint: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            endpoint: endpoint.into(),
            luns: DashMap::new(),
            vlans: DashMap::new(),
            boot: DashMap::new(),
            power: DashMap::new(),
            faults: DashMap::new(),
            latency: Mutex::new(None),
            calls: Mutex::new(Vec::new()),
        })
    }

    /// Fail the next `times` calls of `op` with `error`
    pub fn fail_next(&self, op: DeviceOp, times: u32, error: DeviceError) {
        self.faults.insert(op, Fault { remaining: times, error });
    }

    pub fn clear_faults(&self) {
        self.faults.clear();
    }

    /// Delay every call by `latency`
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.lock() = latency;
    }

    /// Calls received so far, in order
    pub fn calls(&self) -> Vec<DeviceCallRecord> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self, op: DeviceOp) -> usize {
        self.calls.lock().iter().filter(|call| call.op == op).count()
    }

    pub fn lun(&self, drive: EntityId) -> Option<IscsiTarget> {
        self.luns.get(&drive).map(|target| target.clone())
    }

    pub fn vlans_of(&self, interface: EntityId) -> Vec<Vlan> {
        self.vlans
            .get(&interface)
            .map(|vlans| vlans.values().copied().collect())
            .unwrap_or_default()
    }

    pub fn boot_override(&self, system: EntityId) -> Option<(BootSource, BootOverrideMode)> {
        self.boot.get(&system).map(|entry| *entry)
    }

    pub fn power_state(&self, system: EntityId) -> Option<PowerState> {
        self.power.get(&system).map(|state| *state)
    }

    /// No LUN, VLAN or boot override is programmed
    pub fn is_clean(&self) -> bool {
        self.luns.is_empty() && self.vlans.is_empty() && self.boot.is_empty()
    }

    async fn enter(&self, op: DeviceOp, asset: &AssetRef, detail: String) -> DeviceResult<()> {
        debug!("{} {:?} on {} ({})", self.endpoint, op, asset, detail);
        self.calls.lock().push(DeviceCallRecord {
            op,
            asset: asset.id,
            detail,
        });

        let latency = *self.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        if let Some(mut fault) = self.faults.get_mut(&op) {
            if fault.remaining > 0 {
                fault.remaining -= 1;
                return Err(fault.error.clone());
            }
        }
        Ok(())
    }
}

#[async_trait]
impl DeviceActions for InMemoryDevices {
    async fn reset_asset(&self, system: &AssetRef, reset: ResetType) -> DeviceResult<()> {
        self.enter(DeviceOp::Reset, system, reset.to_string()).await?;
        let state = match reset {
            ResetType::On | ResetType::ForceOn | ResetType::ForceRestart | ResetType::GracefulRestart => {
                PowerState::On
            }
            ResetType::ForceOff | ResetType::GracefulShutdown => PowerState::Off,
            other => {
                return Err(DeviceError::Rejected(format!("reset type {} not supported", other)))
            }
        };
        self.power.insert(system.id, state);
        Ok(())
    }

    async fn override_boot_source(
        &self,
        system: &AssetRef,
        source: BootSource,
        mode: BootOverrideMode,
    ) -> DeviceResult<()> {
        self.enter(DeviceOp::OverrideBoot, system, format!("{:?}/{:?}", source, mode))
            .await?;
        if mode == BootOverrideMode::Disabled || source == BootSource::None {
            self.boot.remove(&system.id);
        } else {
            self.boot.insert(system.id, (source, mode));
        }
        Ok(())
    }

    async fn attach_lun(&self, drive: &AssetRef, target: &IscsiTarget) -> DeviceResult<()> {
        self.enter(DeviceOp::AttachLun, drive, target.target_iqn.clone()).await?;
        match self.luns.get(&drive.id) {
            Some(existing) if existing.target_iqn != target.target_iqn => {
                return Err(DeviceError::Rejected(format!(
                    "{} is already attached through {}",
                    drive, existing.target_iqn
                )));
            }
            _ => {}
        }
        self.luns.insert(drive.id, target.clone());
        Ok(())
    }

    async fn detach_lun(&self, drive: &AssetRef, target: &IscsiTarget) -> DeviceResult<()> {
        self.enter(DeviceOp::DetachLun, drive, target.target_iqn.clone()).await?;
        self.luns.remove_if(&drive.id, |_, attached| attached.target_iqn == target.target_iqn);
        Ok(())
    }

    async fn set_vlan(&self, interface: &AssetRef, vlan: Vlan) -> DeviceResult<()> {
        self.enter(DeviceOp::SetVlan, interface, vlan.id.to_string()).await?;
        self.vlans.entry(interface.id).or_default().insert(vlan.id, vlan);
        Ok(())
    }

    async fn remove_vlan(&self, interface: &AssetRef, vlan_id: u16) -> DeviceResult<()> {
        self.enter(DeviceOp::RemoveVlan, interface, vlan_id.to_string()).await?;
        if let Some(mut vlans) = self.vlans.get_mut(&interface.id) {
            vlans.remove(&vlan_id);
        }
        self.vlans.remove_if(&interface.id, |_, vlans| vlans.is_empty());
        Ok(())
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

// =============================================================================
// Manager Directory
// =============================================================================

/// Fixed manager-to-endpoint table with an optional catch-all endpoint
#[derive(Default)]
pub struct StaticDirectory {
    endpoints: DashMap<EntityId, DeviceActionsRef>,
    fallback: Option<DeviceActionsRef>,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Directory answering every manager with `actions`
    pub fn with_fallback(actions: DeviceActionsRef) -> Self {
        Self {
            endpoints: DashMap::new(),
            fallback: Some(actions),
        }
    }

    pub fn register(&self, manager: EntityId, actions: DeviceActionsRef) {
        self.endpoints.insert(manager, actions);
    }
}

impl ManagerDirectory for StaticDirectory {
    fn actions_for(&self, manager: EntityId) -> Option<DeviceActionsRef> {
        self.endpoints
            .get(&manager)
            .map(|actions| actions.clone())
            .or_else(|| self.fallback.clone())
    }
}
