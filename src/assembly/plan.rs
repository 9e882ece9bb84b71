//! Assembly plans
//!
//! The device calls that program a composed node, derived from its claims in
//! the graph: storage attachments first, then VLANs, then the boot override
//! on the host system. Teardown is the same list inverted and reversed.

use crate::domain::ports::{AssetRef, DeviceActions, DeviceResult, IscsiTarget};
use crate::domain::types::{BootOverrideMode, BootSource, ResetType, Vlan};
use crate::error::{Error, Result};
use crate::graph::{ComposedNodeInfo, Entity, EntityId, EntityKind, Graph, LinkLabel};
use serde::{Deserialize, Serialize};

/// Phase of assembly a device call belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AssemblyStep {
    Storage,
    Network,
    Boot,
    Power,
}

impl std::fmt::Display for AssemblyStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AssemblyStep::Storage => write!(f, "storage"),
            AssemblyStep::Network => write!(f, "network"),
            AssemblyStep::Boot => write!(f, "boot"),
            AssemblyStep::Power => write!(f, "power"),
        }
    }
}

// =============================================================================
// Device Calls
// =============================================================================

/// One idempotent call against a device endpoint
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceCall {
    AttachLun { drive: AssetRef, target: IscsiTarget },
    DetachLun { drive: AssetRef, target: IscsiTarget },
    SetVlan { interface: AssetRef, vlan: Vlan },
    RemoveVlan { interface: AssetRef, vlan_id: u16 },
    OverrideBoot {
        system: AssetRef,
        source: BootSource,
        mode: BootOverrideMode,
    },
    Reset { system: AssetRef, reset: ResetType },
}

impl DeviceCall {
    pub fn step(&self) -> AssemblyStep {
        match self {
            DeviceCall::AttachLun { .. } | DeviceCall::DetachLun { .. } => AssemblyStep::Storage,
            DeviceCall::SetVlan { .. } | DeviceCall::RemoveVlan { .. } => AssemblyStep::Network,
            DeviceCall::OverrideBoot { .. } => AssemblyStep::Boot,
            DeviceCall::Reset { .. } => AssemblyStep::Power,
        }
    }

    /// The call undoing this one; power actions have none
    pub fn inverse(&self) -> Option<DeviceCall> {
        match self {
            DeviceCall::AttachLun { drive, target } => Some(DeviceCall::DetachLun {
                drive: drive.clone(),
                target: target.clone(),
            }),
            DeviceCall::DetachLun { drive, target } => Some(DeviceCall::AttachLun {
                drive: drive.clone(),
                target: target.clone(),
            }),
            DeviceCall::SetVlan { interface, vlan } => Some(DeviceCall::RemoveVlan {
                interface: interface.clone(),
                vlan_id: vlan.id,
            }),
            DeviceCall::OverrideBoot { system, .. } => Some(DeviceCall::OverrideBoot {
                system: system.clone(),
                source: BootSource::None,
                mode: BootOverrideMode::Disabled,
            }),
            DeviceCall::RemoveVlan { .. } | DeviceCall::Reset { .. } => None,
        }
    }

    pub async fn dispatch(&self, actions: &dyn DeviceActions) -> DeviceResult<()> {
        match self {
            DeviceCall::AttachLun { drive, target } => actions.attach_lun(drive, target).await,
            DeviceCall::DetachLun { drive, target } => actions.detach_lun(drive, target).await,
            DeviceCall::SetVlan { interface, vlan } => actions.set_vlan(interface, *vlan).await,
            DeviceCall::RemoveVlan { interface, vlan_id } => {
                actions.remove_vlan(interface, *vlan_id).await
            }
            DeviceCall::OverrideBoot {
                system,
                source,
                mode,
            } => actions.override_boot_source(system, *source, *mode).await,
            DeviceCall::Reset { system, reset } => actions.reset_asset(system, reset.clone()).await,
        }
    }
}

impl std::fmt::Display for DeviceCall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceCall::AttachLun { drive, target } => {
                write!(f, "attach {} via {}", drive, target.target_iqn)
            }
            DeviceCall::DetachLun { drive, target } => {
                write!(f, "detach {} from {}", drive, target.target_iqn)
            }
            DeviceCall::SetVlan { interface, vlan } => {
                write!(f, "set VLAN {} on {}", vlan.id, interface)
            }
            DeviceCall::RemoveVlan { interface, vlan_id } => {
                write!(f, "remove VLAN {} from {}", vlan_id, interface)
            }
            DeviceCall::OverrideBoot { system, source, mode } => {
                write!(f, "boot {} from {:?} ({:?})", system, source, mode)
            }
            DeviceCall::Reset { system, reset } => write!(f, "reset {} ({})", system, reset),
        }
    }
}

/// A device call routed to the manager owning its asset
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedCall {
    pub manager: EntityId,
    pub call: DeviceCall,
}

// =============================================================================
// Plan
// =============================================================================

/// Ordered device calls assembling one composed node
#[derive(Debug, Clone, PartialEq)]
pub struct AssemblyPlan {
    pub node: EntityId,
    pub host: EntityId,
    pub calls: Vec<PlannedCall>,
}

impl AssemblyPlan {
    /// Derive the plan for `node` from its claims
    pub fn build(graph: &Graph, node: EntityId, iqn_prefix: &str) -> Result<Self> {
        let info = composed_node(graph, node)?;
        let host = host_system(graph, node)?;
        let mut calls = Vec::new();

        let initiator_iqn = format!("{}:node-{}", iqn_prefix, node);
        for attachment in &info.remote_attachments {
            let drive = graph.find_kind(attachment.drive, EntityKind::RemoteDrive)?;
            let target = graph.find_kind(attachment.target, EntityKind::RemoteTarget)?;
            let exposed = target
                .as_remote_target()
                .ok_or_else(|| Error::not_found(EntityKind::RemoteTarget, target.id))?;
            calls.push(PlannedCall {
                manager: manager_of(graph, target.id)?,
                call: DeviceCall::AttachLun {
                    drive: asset_ref(drive),
                    target: IscsiTarget {
                        target_iqn: exposed.target_iqn.clone(),
                        lun: exposed.lun,
                        initiator_iqn: initiator_iqn.clone(),
                    },
                },
            });
        }

        for (interface, vlans) in &info.vlans {
            let entity = graph.find_kind(*interface, EntityKind::NetworkInterface)?;
            let manager = manager_of(graph, entity.id)?;
            for vlan in vlans {
                calls.push(PlannedCall {
                    manager,
                    call: DeviceCall::SetVlan {
                        interface: asset_ref(entity),
                        vlan: *vlan,
                    },
                });
            }
        }

        calls.push(PlannedCall {
            manager: manager_of(graph, host.id)?,
            call: DeviceCall::OverrideBoot {
                system: asset_ref(host),
                source: boot_source(graph, node, info),
                mode: BootOverrideMode::Continuous,
            },
        });

        Ok(Self {
            node,
            host: host.id,
            calls,
        })
    }

    /// Inverse calls in reverse order
    pub fn teardown(&self) -> Vec<PlannedCall> {
        undo(&self.calls)
    }
}

/// Inverse of `applied`, last call first
pub fn undo(applied: &[PlannedCall]) -> Vec<PlannedCall> {
    applied
        .iter()
        .rev()
        .filter_map(|planned| {
            planned.call.inverse().map(|call| PlannedCall {
                manager: planned.manager,
                call,
            })
        })
        .collect()
}

// =============================================================================
// Graph lookups
// =============================================================================

fn composed_node(graph: &Graph, node: EntityId) -> Result<&ComposedNodeInfo> {
    graph
        .find_kind(node, EntityKind::ComposedNode)?
        .as_composed_node()
        .ok_or_else(|| Error::not_found(EntityKind::ComposedNode, node))
}

pub(crate) fn asset_ref(entity: &Entity) -> AssetRef {
    AssetRef {
        id: entity.id,
        name: entity.name.clone(),
    }
}

/// The manager a call about `asset` goes to
pub(crate) fn manager_of(graph: &Graph, asset: EntityId) -> Result<EntityId> {
    graph
        .owning_manager(asset)?
        .ok_or_else(|| Error::Consistency(format!("no manager owns entity {}", asset)))
}

/// The blade hosting the node: container of its lowest-id processor, or of
/// its lowest-id memory module when it has no processor
pub fn host_system(graph: &Graph, node: EntityId) -> Result<&Entity> {
    let compute = [EntityKind::Processor, EntityKind::Memory]
        .into_iter()
        .find_map(|kind| graph.linked(node, LinkLabel::Includes, kind).into_iter().next())
        .ok_or_else(|| Error::Consistency(format!("composed node {} has no compute asset", node)))?;
    graph.single(compute.id, LinkLabel::ContainedBy, EntityKind::Blade)
}

/// Lowest boot order wins; without one, local disks before remote ones
fn boot_source(graph: &Graph, node: EntityId, info: &ComposedNodeInfo) -> BootSource {
    let first = info.boot_order.iter().min_by_key(|entry| entry.order);
    match first.and_then(|entry| graph.get(entry.asset)).map(|e| e.kind()) {
        Some(EntityKind::LocalDrive) => return BootSource::Hdd,
        Some(EntityKind::RemoteDrive | EntityKind::RemoteTarget) => return BootSource::RemoteDrive,
        _ => {}
    }

    if !graph.linked(node, LinkLabel::Includes, EntityKind::LocalDrive).is_empty() {
        BootSource::Hdd
    } else if !info.remote_attachments.is_empty() {
        BootSource::RemoteDrive
    } else {
        BootSource::Pxe
    }
}
