//! Composed Node Allocator
//!
//! Turns a validated template into a composed node by claiming free assets
//! from the pool. Every claim and every entity created for the node happens in
//! one unit of work, so a shortfall in any category leaves the pool untouched.

use super::matcher::{candidates, Requirement};
use super::remote;
use crate::domain::types::Vlan;
use crate::error::{Error, Result};
use crate::graph::{
    Asset, BootEntry, ComposedNodeInfo, EntityId, GraphStore, LinkLabel, UnitOfWork,
};
use crate::metrics::EngineMetrics;
use crate::template::{ComposedNodeTemplate, MemoryRequirement, RequirementCategory};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Shortfall error for one requirement category
pub(crate) fn insufficient(category: RequirementCategory, reason: impl Into<String>) -> Error {
    Error::Allocation {
        category,
        reason: reason.into(),
    }
}

/// Boot order as stored on the node
pub(crate) fn boot_order(category: RequirementCategory, order: i32) -> Result<u32> {
    u32::try_from(order).map_err(|_| insufficient(category, format!("invalid boot order {}", order)))
}

// =============================================================================
// Node Allocator
// =============================================================================

/// Allocates composed nodes from the shared pool
pub struct NodeAllocator {
    graph: Arc<GraphStore>,
    iqn_prefix: String,
    metrics: Arc<EngineMetrics>,
}

impl NodeAllocator {
    /// Create a new allocator
    pub fn new(graph: Arc<GraphStore>, iqn_prefix: impl Into<String>, metrics: Arc<EngineMetrics>) -> Arc<Self> {
        Arc::new(Self {
            graph,
            iqn_prefix: iqn_prefix.into(),
            metrics,
        })
    }

    /// Claim every asset `template` asks for and create the composed node.
    ///
    /// The node starts in `ALLOCATED`. On error nothing has changed.
    pub fn allocate(&self, template: &ComposedNodeTemplate) -> Result<EntityId> {
        info!("Allocating composed node '{}'", template.name);

        let result = self.allocate_in_pool(template);
        match &result {
            Ok(node) => {
                info!("Allocated composed node '{}' as {}", template.name, node);
                self.metrics.record_allocation(true);
            }
            Err(e) => {
                warn!("Allocation of '{}' failed: {}", template.name, e);
                self.metrics.record_allocation(false);
            }
        }
        result
    }

    fn allocate_in_pool(&self, template: &ComposedNodeTemplate) -> Result<EntityId> {
        let mut uow = self.graph.begin();
        let mut info = ComposedNodeInfo::new(template.description.clone());
        let node = uow.add_entity(
            template.name.clone(),
            Asset::ComposedNode(info.clone()),
        );

        for requirement in &template.processors {
            claim_matching(&mut uow, node, requirement, requirement.count())?;
        }

        for requirement in &template.memory {
            claim_memory(&mut uow, node, requirement)?;
        }

        for requirement in &template.local_drives {
            let drives = claim_matching(&mut uow, node, requirement, requirement.count())?;
            if let Some(order) = requirement.boot_order {
                let order = boot_order(RequirementCategory::LocalDrive, order)?;
                info.boot_order
                    .extend(drives.into_iter().map(|asset| BootEntry { asset, order }));
            }
        }

        for requirement in &template.network_interfaces {
            let vlans = requirement
                .vlans
                .iter()
                .map(|vlan| {
                    u16::try_from(vlan.vlan_id)
                        .map(|id| Vlan { id, tagged: vlan.tagged })
                        .map_err(|_| {
                            insufficient(
                                RequirementCategory::NetworkInterface,
                                format!("invalid VLAN id {}", vlan.vlan_id),
                            )
                        })
                })
                .collect::<Result<Vec<_>>>()?;
            let interfaces = claim_matching(&mut uow, node, requirement, requirement.count())?;
            if !vlans.is_empty() {
                for interface in interfaces {
                    info.vlans.insert(interface, vlans.clone());
                }
            }
        }

        for requirement in &template.remote_drives {
            remote::claim_remote_drive(&mut uow, node, requirement, &self.iqn_prefix, &mut info)?;
        }

        // Each owning manager once, in id order
        let included: Vec<EntityId> = uow.neighbours(node, LinkLabel::Includes).collect();
        let mut managers = BTreeSet::new();
        for asset in included {
            if let Some(manager) = uow.owning_manager(asset)? {
                managers.insert(manager);
            }
        }
        for manager in &managers {
            uow.link(node, LinkLabel::ManagedBy, *manager)?;
        }

        debug!(
            "Node {} claims {} assets under {} managers",
            node,
            uow.neighbours(node, LinkLabel::Includes).count(),
            managers.len()
        );

        uow.update(node, move |entity| entity.asset = Asset::ComposedNode(info))?;
        uow.commit();
        Ok(node)
    }
}

// =============================================================================
// Claiming
// =============================================================================

/// Claim the first `count` candidates for `requirement`
fn claim_matching<R: Requirement>(
    uow: &mut UnitOfWork<'_>,
    node: EntityId,
    requirement: &R,
    count: usize,
) -> Result<Vec<EntityId>> {
    if count == 0 {
        return Ok(Vec::new());
    }

    let found = candidates(uow, requirement);
    let mut claimed = Vec::with_capacity(count);
    for candidate in &found {
        if claimed.len() == count {
            break;
        }
        if uow.claim(node, *candidate)? {
            claimed.push(*candidate);
        }
    }

    if claimed.len() < count {
        return Err(insufficient(
            R::CATEGORY,
            format!("requested {}, {} matching available", count, found.len()),
        ));
    }
    Ok(claimed)
}

/// Memory is requested by module count, by cumulative size, or both
fn claim_memory(
    uow: &mut UnitOfWork<'_>,
    node: EntityId,
    requirement: &MemoryRequirement,
) -> Result<Vec<EntityId>> {
    let Some(size_gb) = requirement.size_gb else {
        return claim_matching(uow, node, requirement, requirement.count().unwrap_or(1));
    };
    let wanted = u64::try_from(size_gb).unwrap_or(0);
    if requirement.is_empty() {
        return Ok(Vec::new());
    }

    let modules: Vec<(EntityId, u64)> = candidates(uow, requirement)
        .into_iter()
        .filter_map(|id| uow.get(id).and_then(|e| e.as_memory()).map(|m| (id, m.size_gb)))
        .collect();

    let mut selected = Vec::new();
    let mut total = 0;
    match requirement.count() {
        Some(quantity) => {
            for (id, size) in modules.iter().take(quantity) {
                selected.push(*id);
                total += size;
            }
            if selected.len() < quantity || total < wanted {
                return Err(insufficient(
                    RequirementCategory::Memory,
                    format!(
                        "requested {} modules totalling {} GB, first {} matching give {} GB",
                        quantity,
                        wanted,
                        selected.len(),
                        total
                    ),
                ));
            }
        }
        None => {
            for (id, size) in &modules {
                if total >= wanted {
                    break;
                }
                selected.push(*id);
                total += size;
            }
            if total < wanted {
                return Err(insufficient(
                    RequirementCategory::Memory,
                    format!("requested {} GB, {} GB matching available", wanted, total),
                ));
            }
        }
    }

    for id in &selected {
        if !uow.claim(node, *id)? {
            return Err(insufficient(
                RequirementCategory::Memory,
                format!("memory {} was claimed concurrently", id),
            ));
        }
    }
    Ok(selected)
}
