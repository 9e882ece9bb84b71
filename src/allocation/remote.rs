//! Remote drive allocation
//!
//! Three ways to satisfy a remote drive requirement:
//!
//! * **Master**: provision a new volume replicated from a master drive, in the
//!   first volume group of the master's storage service with room for it, and
//!   a target exposing it.
//! * **Address**: claim the existing target with the given IQN together with
//!   the drives it exposes.
//! * **Capacity**: claim the first free volume large enough, with its target
//!   (created when the volume is not exposed yet).
//!
//! Entities created here are recorded on the node as provisioned and deleted
//! again on disassembly.

use super::allocator::{boot_order, insufficient};
use super::matcher::volume_fits;
use crate::context;
use crate::domain::types::ReplicationMethod;
use crate::error::{Error, Result};
use crate::graph::{
    Asset, BootEntry, ComposedNodeInfo, Entity, EntityId, EntityKind, Graph, LinkLabel,
    RemoteAttachment, RemoteDriveInfo, RemoteTargetInfo, UnitOfWork, VolumeMode,
};
use crate::template::{MasterDrive, RemoteDriveRequirement, RequirementCategory};
use tracing::debug;

const CATEGORY: RequirementCategory = RequirementCategory::RemoteDrive;

/// Satisfy one remote drive requirement for `node`
pub(crate) fn claim_remote_drive(
    uow: &mut UnitOfWork<'_>,
    node: EntityId,
    requirement: &RemoteDriveRequirement,
    iqn_prefix: &str,
    info: &mut ComposedNodeInfo,
) -> Result<()> {
    let attachment = match (&requirement.master, &requirement.address) {
        (Some(master), _) => provision_from_master(uow, node, requirement, master, iqn_prefix, info)?,
        (None, Some(iqn)) => claim_by_address(uow, node, iqn)?,
        (None, None) => claim_by_capacity(uow, node, requirement, iqn_prefix, info)?,
    };

    if let Some(order) = requirement.boot_order {
        info.boot_order.push(BootEntry {
            asset: attachment.drive,
            order: boot_order(CATEGORY, order)?,
        });
    }
    debug!(
        "Node {} attaches remote drive {} through target {}",
        node, attachment.drive, attachment.target
    );
    info.remote_attachments.push(attachment);
    Ok(())
}

// =============================================================================
// Master replication
// =============================================================================

fn provision_from_master(
    uow: &mut UnitOfWork<'_>,
    node: EntityId,
    requirement: &RemoteDriveRequirement,
    master: &MasterDrive,
    iqn_prefix: &str,
    info: &mut ComposedNodeInfo,
) -> Result<RemoteAttachment> {
    let (master_id, master_capacity) = {
        let entity = context::resolve(uow, &master.address)?;
        let drive = entity
            .as_remote_drive()
            .filter(|drive| drive.mode == VolumeMode::Volume)
            .ok_or_else(|| Error::not_found("Master volume", &master.address))?;
        (entity.id, drive.capacity_gb)
    };
    let capacity_gb = requirement
        .capacity_gb
        .and_then(|c| u64::try_from(c).ok())
        .unwrap_or(master_capacity)
        .max(master_capacity);

    if let Some(iqn) = &requirement.address {
        if find_target(uow, iqn).is_some() {
            return Err(insufficient(CATEGORY, format!("target {} already exists", iqn)));
        }
    }

    let service = uow
        .single(master_id, LinkLabel::ContainedBy, EntityKind::StorageService)?
        .id;
    let group = volume_group_with_room(uow, service, capacity_gb).ok_or_else(|| {
        insufficient(
            CATEGORY,
            format!(
                "no volume group in storage service {} has {} GB free",
                service, capacity_gb
            ),
        )
    })?;

    let drive = uow.add_entity(
        format!("node-{}-volume", node),
        Asset::RemoteDrive(RemoteDriveInfo {
            mode: VolumeMode::Volume,
            capacity_gb,
            snapshot: master.replication == ReplicationMethod::Snapshot,
        }),
    );
    uow.link(service, LinkLabel::Contains, drive)?;
    uow.link(drive, LinkLabel::Uses, group)?;
    uow.link(drive, LinkLabel::MasteredBy, master_id)?;
    info.provisioned.push(drive);

    let iqn = requirement
        .address
        .clone()
        .unwrap_or_else(|| generated_iqn(iqn_prefix, node, drive));
    let target = create_target(uow, Some(service), drive, iqn)?;
    info.provisioned.push(target);

    claim(uow, node, drive)?;
    claim(uow, node, target)?;
    Ok(RemoteAttachment { drive, target })
}

/// First volume group (by id) in `service` with `capacity_gb` unused
fn volume_group_with_room(graph: &Graph, service: EntityId, capacity_gb: u64) -> Option<EntityId> {
    graph
        .linked(service, LinkLabel::Contains, EntityKind::RemoteDrive)
        .into_iter()
        .filter(|entity| entity.is_operational())
        .filter_map(|entity| {
            let group = entity.as_remote_drive()?;
            (group.mode == VolumeMode::VolumeGroup).then_some((entity.id, group.capacity_gb))
        })
        .find(|(id, capacity)| free_in_group(graph, *id, *capacity) >= capacity_gb)
        .map(|(id, _)| id)
}

fn free_in_group(graph: &Graph, group: EntityId, capacity_gb: u64) -> u64 {
    let used: u64 = graph
        .linked(group, LinkLabel::UsedBy, EntityKind::RemoteDrive)
        .into_iter()
        .filter_map(|drive| drive.as_remote_drive())
        .map(|drive| drive.capacity_gb)
        .sum();
    capacity_gb.saturating_sub(used)
}

// =============================================================================
// Existing targets
// =============================================================================

fn claim_by_address(uow: &mut UnitOfWork<'_>, node: EntityId, iqn: &str) -> Result<RemoteAttachment> {
    let target = find_target(uow, iqn)
        .ok_or_else(|| insufficient(CATEGORY, format!("no target with IQN {}", iqn)))?;
    if !uow.is_available(uow.find(target)?) {
        return Err(insufficient(
            CATEGORY,
            format!("target {} is claimed or not operational", iqn),
        ));
    }

    let drives: Vec<EntityId> = uow
        .linked(target, LinkLabel::Uses, EntityKind::RemoteDrive)
        .into_iter()
        .map(|drive| drive.id)
        .collect();
    let Some(&first) = drives.first() else {
        return Err(Error::Consistency(format!("target {} exposes no drive", target)));
    };

    claim(uow, node, target)?;
    for drive in drives {
        claim(uow, node, drive)?;
    }
    Ok(RemoteAttachment { drive: first, target })
}

fn find_target(graph: &Graph, iqn: &str) -> Option<EntityId> {
    graph
        .entities_of(EntityKind::RemoteTarget)
        .find(|entity| entity.as_remote_target().map_or(false, |t| t.target_iqn == iqn))
        .map(|entity| entity.id)
}

// =============================================================================
// Capacity
// =============================================================================

fn claim_by_capacity(
    uow: &mut UnitOfWork<'_>,
    node: EntityId,
    requirement: &RemoteDriveRequirement,
    iqn_prefix: &str,
    info: &mut ComposedNodeInfo,
) -> Result<RemoteAttachment> {
    let capacity_gb = requirement
        .capacity_gb
        .and_then(|c| u64::try_from(c).ok())
        .unwrap_or(0);

    let graph: &Graph = uow;
    let choice = graph
        .entities_of(EntityKind::RemoteDrive)
        .filter(|entity| graph.is_available(entity))
        .filter(|entity| entity.as_remote_drive().map_or(false, |d| volume_fits(d, capacity_gb)))
        .find_map(|entity| exposure(graph, entity).map(|target| (entity.id, target)));

    let Some((drive, target)) = choice else {
        return Err(insufficient(
            CATEGORY,
            format!("no free volume of at least {} GB", capacity_gb),
        ));
    };

    let target = match target {
        Some(target) => target,
        None => {
            let service = uow.container(drive)?.map(|service| service.id);
            let target = create_target(uow, service, drive, generated_iqn(iqn_prefix, node, drive))?;
            info.provisioned.push(target);
            target
        }
    };

    claim(uow, node, drive)?;
    claim(uow, node, target)?;
    Ok(RemoteAttachment { drive, target })
}

/// How `drive` can be exposed to a node.
///
/// `Some(Some(target))` for a free exposing target, `Some(None)` when no
/// target exposes it yet, `None` when its targets are taken.
fn exposure(graph: &Graph, drive: &Entity) -> Option<Option<EntityId>> {
    let targets = graph.linked(drive.id, LinkLabel::UsedBy, EntityKind::RemoteTarget);
    if targets.is_empty() {
        return Some(None);
    }
    targets
        .into_iter()
        .find(|target| graph.is_available(target))
        .map(|target| Some(target.id))
}

// =============================================================================
// Helpers
// =============================================================================

fn generated_iqn(prefix: &str, node: EntityId, drive: EntityId) -> String {
    format!("{}:node-{}-drive-{}", prefix, node, drive)
}

fn create_target(
    uow: &mut UnitOfWork<'_>,
    service: Option<EntityId>,
    drive: EntityId,
    iqn: String,
) -> Result<EntityId> {
    let target = uow.add_entity(
        iqn.clone(),
        Asset::RemoteTarget(RemoteTargetInfo {
            target_iqn: iqn,
            lun: 0,
        }),
    );
    if let Some(service) = service {
        uow.link(service, LinkLabel::Contains, target)?;
    }
    uow.link(target, LinkLabel::Uses, drive)?;
    Ok(target)
}

fn claim(uow: &mut UnitOfWork<'_>, node: EntityId, asset: EntityId) -> Result<()> {
    if uow.claim(node, asset)? {
        Ok(())
    } else {
        Err(insufficient(
            CATEGORY,
            format!("remote asset {} is claimed or not operational", asset),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocation::NodeAllocator;
    use crate::fixtures;
    use crate::metrics::EngineMetrics;
    use crate::template::ComposedNodeTemplate;
    use assert_matches::assert_matches;

    fn with_remote(requirement: RemoteDriveRequirement) -> ComposedNodeTemplate {
        let mut template = fixtures::compute_template("remote");
        template.remote_drives.push(requirement);
        template
    }

    fn allocate(store: &std::sync::Arc<crate::graph::GraphStore>, template: &ComposedNodeTemplate) -> Result<EntityId> {
        NodeAllocator::new(store.clone(), "iqn.test", EngineMetrics::new()).allocate(template)
    }

    fn node_info(store: &crate::graph::GraphStore, node: EntityId) -> ComposedNodeInfo {
        store.find(node).unwrap().as_composed_node().unwrap().clone()
    }

    #[test]
    fn test_clone_from_master_provisions_drive_and_target() {
        let store = fixtures::pod();
        let node = allocate(
            &store,
            &with_remote(RemoteDriveRequirement {
                master: Some(MasterDrive {
                    replication: ReplicationMethod::Clone,
                    address: "/Services/61/LogicalDrives/63".parse().unwrap(),
                }),
                boot_order: Some(0),
                ..Default::default()
            }),
        )
        .unwrap();

        let info = node_info(&store, node);
        assert_eq!(info.provisioned.len(), 2);
        let attachment = info.remote_attachments[0];

        let view = store.read();
        let drive = view.get(attachment.drive).unwrap().as_remote_drive().unwrap();
        assert_eq!(drive.capacity_gb, 100);
        assert!(!drive.snapshot);
        assert!(view.has_link(attachment.drive, LinkLabel::MasteredBy, fixtures::MASTER_DRIVE));
        assert!(view.has_link(attachment.drive, LinkLabel::Uses, fixtures::VOLUME_GROUP));
        assert!(view.has_link(attachment.target, LinkLabel::Uses, attachment.drive));
        assert_eq!(view.claimant(attachment.target), Some(node));
        assert_eq!(
            view.get(attachment.target).unwrap().as_remote_target().unwrap().target_iqn,
            format!("iqn.test:node-{}-drive-{}", node, attachment.drive)
        );
        assert_eq!(info.boot_order[0].asset, attachment.drive);
        assert!(view.has_link(node, LinkLabel::ManagedBy, fixtures::STORAGE_MANAGER));
    }

    #[test]
    fn test_clone_needs_room_in_a_volume_group() {
        let store = fixtures::pod();
        // Group 62 holds 2048 GB, 800 GB of it are used
        let template = with_remote(RemoteDriveRequirement {
            capacity_gb: Some(1500),
            master: Some(MasterDrive {
                replication: ReplicationMethod::Snapshot,
                address: "/Services/61/LogicalDrives/63".parse().unwrap(),
            }),
            ..Default::default()
        });
        let before = store.read().clone();
        assert_matches!(
            allocate(&store, &template),
            Err(Error::Allocation {
                category: RequirementCategory::RemoteDrive,
                ..
            })
        );
        assert_eq!(*store.read(), before);
    }

    #[test]
    fn test_clone_master_must_be_a_volume() {
        let store = fixtures::pod();
        let template = with_remote(RemoteDriveRequirement {
            master: Some(MasterDrive {
                replication: ReplicationMethod::Clone,
                address: "/Services/61/LogicalDrives/62".parse().unwrap(),
            }),
            ..Default::default()
        });
        let before = store.read().clone();
        assert_matches!(allocate(&store, &template), Err(Error::EntityNotFound { .. }));
        assert_eq!(*store.read(), before);
    }

    #[test]
    fn test_existing_target_by_address() {
        let store = fixtures::pod();
        let node = allocate(
            &store,
            &with_remote(RemoteDriveRequirement {
                address: Some(fixtures::TARGET_IQN.to_string()),
                ..Default::default()
            }),
        )
        .unwrap();

        let info = node_info(&store, node);
        assert_eq!(
            info.remote_attachments,
            vec![RemoteAttachment {
                drive: fixtures::EXPOSED_VOLUME,
                target: fixtures::EXPOSED_TARGET
            }]
        );
        assert!(info.provisioned.is_empty());

        // The target is now taken
        assert_matches!(
            allocate(
                &store,
                &with_remote(RemoteDriveRequirement {
                    address: Some(fixtures::TARGET_IQN.to_string()),
                    ..Default::default()
                })
            ),
            Err(Error::Allocation { .. })
        );
    }

    #[test]
    fn test_capacity_reuses_or_creates_target() {
        let store = fixtures::pod();
        let request = RemoteDriveRequirement {
            capacity_gb: Some(150),
            ..Default::default()
        };

        // Volume 64 is the first fit and already exposed by target 65
        let first = allocate(&store, &with_remote(request.clone())).unwrap();
        let info = node_info(&store, first);
        assert_eq!(info.remote_attachments[0].drive, fixtures::EXPOSED_VOLUME);
        assert_eq!(info.remote_attachments[0].target, fixtures::EXPOSED_TARGET);

        // Volume 66 has no target yet
        let second = allocate(&store, &with_remote(request.clone())).unwrap();
        let info = node_info(&store, second);
        assert_eq!(info.remote_attachments[0].drive, fixtures::BARE_VOLUME);
        assert_eq!(info.provisioned, vec![info.remote_attachments[0].target]);

        assert_matches!(
            allocate(&store, &with_remote(request)),
            Err(Error::Allocation {
                category: RequirementCategory::RemoteDrive,
                ..
            })
        );
    }
}
