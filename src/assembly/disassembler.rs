//! Composed Node Disassembler
//!
//! Removes a composed node from any state. The node is first moved to
//! `DISASSEMBLING`, after any in-flight assembly has settled, so nothing else
//! programs its devices while they are torn down. Device configuration is
//! torn down next (boot override, VLANs, LUNs), then the claims are released,
//! the remote entities provisioned for the node are deleted and the node
//! itself is removed, all in one unit of work. Device failures do not stop the
//! local release; they are reported for reconciliation.

use super::plan::{AssemblyPlan, AssemblyStep, PlannedCall};
use super::retry::RetryPolicy;
use crate::domain::ports::ManagerDirectoryRef;
use crate::error::{Error, Result};
use crate::graph::{EntityId, GraphStore, LinkLabel};
use crate::metrics::EngineMetrics;
use crate::node::lifecycle::{self, node_state, NodeCommand, NodeState};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::Instant;
use tracing::{info, warn};

/// A device call that could not be undone
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TeardownFailure {
    pub step: AssemblyStep,
    pub call: String,
    pub error: String,
}

/// Outcome of a disassembly
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DisassemblyReport {
    pub node: EntityId,
    /// Assets returned to the pool
    pub released: Vec<EntityId>,
    /// Provisioned drives and targets deleted
    pub deleted: Vec<EntityId>,
    pub failures: Vec<TeardownFailure>,
}

impl DisassemblyReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Outcome of one attempt to take a node for teardown
#[derive(Debug)]
enum Takeover {
    /// Node is `DISASSEMBLING`; carries the state it left
    Taken(NodeState),
    /// Assembly in flight with this many planned calls
    Busy(usize),
}

/// Tears down and removes composed nodes
pub struct NodeDisassembler {
    graph: Arc<GraphStore>,
    directory: ManagerDirectoryRef,
    retry: Arc<RetryPolicy>,
    iqn_prefix: String,
    metrics: Arc<EngineMetrics>,
}

impl NodeDisassembler {
    pub fn new(
        graph: Arc<GraphStore>,
        directory: ManagerDirectoryRef,
        retry: Arc<RetryPolicy>,
        iqn_prefix: impl Into<String>,
        metrics: Arc<EngineMetrics>,
    ) -> Arc<Self> {
        Arc::new(Self {
            graph,
            directory,
            retry,
            iqn_prefix: iqn_prefix.into(),
            metrics,
        })
    }

    /// Disassemble `node`.
    ///
    /// The node is gone once this returns, even with [`Error::Disassembly`];
    /// that error only means device state was left behind. A node still
    /// `ASSEMBLING` is waited for until its assembly settles; if it does not
    /// settle within the retry budget of its calls this fails with
    /// [`Error::InvalidState`] and the node is left alone.
    pub async fn disassemble(&self, node: EntityId) -> Result<DisassemblyReport> {
        let prior = self.take(node).await?;
        let mut failures = Vec::new();
        let teardown = self.teardown_plan(node, prior, &mut failures)?;
        info!(
            "Disassembling composed node {} ({} device calls)",
            node,
            teardown.len()
        );

        for planned in &teardown {
            if let Err(e) = self.retry.run(self.directory.as_ref(), planned).await {
                warn!("Node {}: '{}' failed: {}", node, planned.call, e);
                failures.push(TeardownFailure {
                    step: planned.call.step(),
                    call: planned.call.to_string(),
                    error: e.to_string(),
                });
            }
        }

        let (released, deleted) = self.release(node)?;
        let report = DisassemblyReport {
            node,
            released,
            deleted,
            failures,
        };
        self.metrics.record_disassembly(report.is_clean());
        info!(
            "Composed node {} removed, {} assets released",
            node,
            report.released.len()
        );

        match report.failures.first() {
            None => Ok(report),
            Some(first) => Err(Error::Disassembly {
                step: first.step,
                cause: report
                    .failures
                    .iter()
                    .map(|f| format!("{}: {}", f.call, f.error))
                    .collect::<Vec<_>>()
                    .join("; "),
            }),
        }
    }

    /// Move `node` to `DISASSEMBLING`, waiting out an in-flight assembly
    async fn take(&self, node: EntityId) -> Result<NodeState> {
        // Subscribe before looking so a settling assembly cannot be missed
        let mut events = self.graph.subscribe();
        let mut settle_by: Option<Instant> = None;

        loop {
            let calls = match self.try_take(node)? {
                Takeover::Taken(prior) => return Ok(prior),
                Takeover::Busy(calls) => calls,
            };
            let deadline = match settle_by {
                Some(deadline) => deadline,
                None => {
                    info!("Node {} is assembling, waiting for it to settle", node);
                    // Every applied call may need compensating as well
                    let budget = self.retry.worst_case() * (2 * calls.max(1)) as u32;
                    *settle_by.insert(Instant::now() + budget)
                }
            };

            match tokio::time::timeout_at(deadline, events.recv()).await {
                Ok(Ok(_)) | Ok(Err(RecvError::Lagged(_))) => {}
                Ok(Err(RecvError::Closed)) | Err(_) => {
                    warn!("Node {} did not settle, disassembly refused", node);
                    return Err(Error::InvalidState {
                        node,
                        state: NodeState::Assembling,
                        action: NodeCommand::Disassemble.name().to_string(),
                    });
                }
            }
        }
    }

    fn try_take(&self, node: EntityId) -> Result<Takeover> {
        let mut uow = self.graph.begin();
        let prior = node_state(&uow, node)?;
        if prior == NodeState::Assembling {
            let calls = AssemblyPlan::build(&uow, node, &self.iqn_prefix)
                .map_or(1, |plan| plan.calls.len());
            return Ok(Takeover::Busy(calls));
        }
        lifecycle::apply(&mut uow, node, NodeCommand::Disassemble)?;
        uow.commit();
        Ok(Takeover::Taken(prior))
    }

    /// Device calls undoing assembly; none for a node that was never assembled
    fn teardown_plan(
        &self,
        node: EntityId,
        prior: NodeState,
        failures: &mut Vec<TeardownFailure>,
    ) -> Result<Vec<PlannedCall>> {
        if !prior.has_device_state() {
            return Ok(Vec::new());
        }
        let view = self.graph.read();
        match AssemblyPlan::build(&view, node, &self.iqn_prefix) {
            Ok(plan) => Ok(plan.teardown()),
            Err(e) => {
                warn!("Node {}: cannot derive teardown: {}", node, e);
                failures.push(TeardownFailure {
                    step: AssemblyStep::Storage,
                    call: "derive teardown".to_string(),
                    error: e.to_string(),
                });
                Ok(Vec::new())
            }
        }
    }

    /// Release claims and delete the node with everything provisioned for it
    fn release(&self, node: EntityId) -> Result<(Vec<EntityId>, Vec<EntityId>)> {
        let mut uow = self.graph.begin();
        let provisioned = node_state(&uow, node).and_then(|_| {
            uow.find(node).map(|entity| {
                entity
                    .as_composed_node()
                    .map(|info| info.provisioned.clone())
                    .unwrap_or_default()
            })
        })?;

        let released: Vec<EntityId> = uow.neighbours(node, LinkLabel::Includes).collect();
        for asset in &released {
            uow.release(node, *asset);
        }

        let mut deleted = Vec::new();
        for id in provisioned {
            if uow.contains(id) {
                uow.delete(id)?;
                deleted.push(id);
            }
        }

        uow.delete(node)?;
        uow.commit();
        Ok((released, deleted))
    }
}
