//! Composer - the engine facade
//!
//! Wires the graph store, validator, allocator, assembler, disassembler and
//! power actions together and exposes the composed node operations:
//! - Node creation (validate + allocate)
//! - Assembly and disassembly
//! - Power actions
//! - Node and pool inspection

use crate::allocation::NodeAllocator;
use crate::assembly::{DisassemblyReport, NodeAssembler, NodeDisassembler, RetryPolicy};
use crate::config::EngineConfig;
use crate::context::{Context, ContextResolver};
use crate::domain::ports::ManagerDirectoryRef;
use crate::domain::types::{ResetType, Vlan};
use crate::error::Result;
use crate::graph::{
    BootEntry, EntityId, EntityKind, GraphEvent, GraphStore, LinkLabel, RemoteAttachment,
};
use crate::metrics::{EngineMetrics, EngineMetricsSnapshot};
use crate::node::{NodeReset, NodeState};
use crate::template::{ComposedNodeTemplate, TemplateValidator};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info};

// =============================================================================
// Views
// =============================================================================

/// Serializable picture of one composed node
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComposedNodeView {
    pub id: EntityId,
    pub name: String,
    pub context: Context,
    pub description: Option<String>,
    pub state: NodeState,
    pub processors: Vec<EntityId>,
    pub memory: Vec<EntityId>,
    pub local_drives: Vec<EntityId>,
    pub remote_drives: Vec<EntityId>,
    pub remote_targets: Vec<EntityId>,
    pub network_interfaces: Vec<EntityId>,
    pub managers: Vec<EntityId>,
    pub remote_attachments: Vec<RemoteAttachment>,
    pub vlans: BTreeMap<EntityId, Vec<Vlan>>,
    pub boot_order: Vec<BootEntry>,
}

/// Free and total assets of one claimable kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolUsage {
    pub kind: EntityKind,
    pub total: usize,
    pub free: usize,
}

/// Pool state across every claimable kind
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolSummary {
    pub composed_nodes: usize,
    pub assets: Vec<PoolUsage>,
}

impl PoolSummary {
    pub fn free(&self, kind: EntityKind) -> usize {
        self.assets
            .iter()
            .find(|usage| usage.kind == kind)
            .map_or(0, |usage| usage.free)
    }
}

// =============================================================================
// Composer
// =============================================================================

/// Entry point for composed node operations
pub struct Composer {
    config: EngineConfig,
    graph: Arc<GraphStore>,
    validator: TemplateValidator,
    allocator: Arc<NodeAllocator>,
    assembler: Arc<NodeAssembler>,
    disassembler: Arc<NodeDisassembler>,
    power: Arc<NodeReset>,
    metrics: Arc<EngineMetrics>,
}

impl Composer {
    /// Create a composer over `graph`, reaching devices through `directory`
    pub fn new(
        config: EngineConfig,
        graph: Arc<GraphStore>,
        directory: ManagerDirectoryRef,
    ) -> Result<Arc<Self>> {
        config.validate()?;

        let metrics = EngineMetrics::new();
        let retry = RetryPolicy::new(config.retry.clone(), metrics.clone());
        let allocator = NodeAllocator::new(graph.clone(), config.iqn_prefix.clone(), metrics.clone());
        let assembler = NodeAssembler::new(
            graph.clone(),
            directory.clone(),
            retry.clone(),
            config.iqn_prefix.clone(),
            metrics.clone(),
        );
        let disassembler = NodeDisassembler::new(
            graph.clone(),
            directory.clone(),
            retry.clone(),
            config.iqn_prefix.clone(),
            metrics.clone(),
        );
        let power = NodeReset::new(graph.clone(), directory, retry, metrics.clone());

        debug!("Composer ready over {} pool entities", graph.len());
        Ok(Arc::new(Self {
            validator: TemplateValidator::new(graph.clone()),
            config,
            graph,
            allocator,
            assembler,
            disassembler,
            power,
            metrics,
        }))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn graph(&self) -> &Arc<GraphStore> {
        &self.graph
    }

    /// Validate `template` and allocate a node for it
    pub fn create_node(&self, template: &ComposedNodeTemplate) -> Result<EntityId> {
        self.validator.validate(template)?;
        self.allocator.allocate(template)
    }

    /// Create and assemble in one go.
    ///
    /// When assembly fails the node stays allocated in `FAILED`.
    pub async fn compose(&self, template: &ComposedNodeTemplate) -> Result<EntityId> {
        let node = self.create_node(template)?;
        self.assembler.assemble(node).await?;
        info!("Composed node '{}' ({}) is ready", template.name, node);
        Ok(node)
    }

    pub async fn assemble(&self, node: EntityId) -> Result<()> {
        self.assembler.assemble(node).await
    }

    pub async fn disassemble(&self, node: EntityId) -> Result<DisassemblyReport> {
        self.disassembler.disassemble(node).await
    }

    pub async fn reset(&self, node: EntityId, reset: ResetType) -> Result<NodeState> {
        self.power.reset(node, reset).await
    }

    /// Ids of every composed node, ascending
    pub fn nodes(&self) -> Vec<EntityId> {
        self.graph
            .read()
            .entities_of(EntityKind::ComposedNode)
            .map(|entity| entity.id)
            .collect()
    }

    pub fn node(&self, id: EntityId) -> Result<ComposedNodeView> {
        let view = self.graph.read();
        let entity = view.find_kind(id, EntityKind::ComposedNode)?;
        let info = entity
            .as_composed_node()
            .ok_or_else(|| crate::error::Error::not_found(EntityKind::ComposedNode, id))?;
        let included = |kind| -> Vec<EntityId> {
            view.linked(id, LinkLabel::Includes, kind)
                .into_iter()
                .map(|entity| entity.id)
                .collect()
        };

        Ok(ComposedNodeView {
            id,
            name: entity.name.clone(),
            context: crate::context::to_context(&view, id)?,
            description: info.description.clone(),
            state: info.state,
            processors: included(EntityKind::Processor),
            memory: included(EntityKind::Memory),
            local_drives: included(EntityKind::LocalDrive),
            remote_drives: included(EntityKind::RemoteDrive),
            remote_targets: included(EntityKind::RemoteTarget),
            network_interfaces: included(EntityKind::NetworkInterface),
            managers: view.neighbours(id, LinkLabel::ManagedBy).collect(),
            remote_attachments: info.remote_attachments.clone(),
            vlans: info.vlans.clone(),
            boot_order: info.boot_order.clone(),
        })
    }

    pub fn pool_summary(&self) -> PoolSummary {
        let view = self.graph.read();
        PoolSummary {
            composed_nodes: view.entities_of(EntityKind::ComposedNode).count(),
            assets: EntityKind::CLAIMABLE
                .iter()
                .map(|kind| PoolUsage {
                    kind: *kind,
                    total: view.entities_of(*kind).count(),
                    free: view.free_assets(*kind),
                })
                .collect(),
        }
    }

    pub fn resolver(&self) -> ContextResolver {
        ContextResolver::new(self.graph.clone())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GraphEvent> {
        self.graph.subscribe()
    }

    pub fn metrics(&self) -> EngineMetricsSnapshot {
        self.metrics.snapshot()
    }
}
