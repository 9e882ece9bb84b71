//! Composed Node Assembler
//!
//! Programs the devices for an allocated node. The node is moved to
//! `ASSEMBLING` and its plan derived in one unit of work; the device calls then
//! run outside the graph lock. The first call that fails for good triggers
//! best-effort compensation of the calls already applied and leaves the node
//! `FAILED` with its claims intact, ready for another attempt.

use super::plan::{undo, AssemblyPlan, PlannedCall};
use super::retry::RetryPolicy;
use crate::domain::ports::ManagerDirectoryRef;
use crate::error::{Error, Result};
use crate::graph::{EntityId, GraphStore};
use crate::metrics::EngineMetrics;
use crate::node::lifecycle::{self, NodeCommand, NodeState};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Drives composed nodes from `ALLOCATED`/`FAILED` to `ASSEMBLED`
pub struct NodeAssembler {
    graph: Arc<GraphStore>,
    directory: ManagerDirectoryRef,
    retry: Arc<RetryPolicy>,
    iqn_prefix: String,
    metrics: Arc<EngineMetrics>,
}

impl NodeAssembler {
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

    /// Assemble `node`.
    ///
    /// Fails with [`Error::InvalidState`] unless the node is `ALLOCATED` or
    /// `FAILED`, and with [`Error::Assembly`] when a device step fails.
    pub async fn assemble(&self, node: EntityId) -> Result<()> {
        let plan = self.begin(node)?;
        info!(
            "Assembling composed node {} on host {} ({} device calls)",
            node,
            plan.host,
            plan.calls.len()
        );

        let mut applied: Vec<PlannedCall> = Vec::with_capacity(plan.calls.len());
        for planned in &plan.calls {
            debug!("Node {}: {}", node, planned.call);
            if let Err(e) = self.retry.run(self.directory.as_ref(), planned).await {
                let step = planned.call.step();
                warn!("Assembly of node {} failed at {} ({}): {}", node, step, planned.call, e);

                self.compensate(node, &applied).await;
                self.finish(node, NodeCommand::AssemblyFailed)?;
                self.metrics.record_assembly(false);
                return Err(Error::Assembly {
                    step,
                    cause: e.to_string(),
                });
            }
            applied.push(planned.clone());
        }

        self.finish(node, NodeCommand::AssemblyCompleted)?;
        self.metrics.record_assembly(true);
        info!("Composed node {} assembled", node);
        Ok(())
    }

    /// Enter `ASSEMBLING` and derive the plan atomically
    fn begin(&self, node: EntityId) -> Result<AssemblyPlan> {
        let mut uow = self.graph.begin();
        lifecycle::apply(&mut uow, node, NodeCommand::Assemble)?;
        let plan = AssemblyPlan::build(&uow, node, &self.iqn_prefix)?;
        uow.commit();
        Ok(plan)
    }

    fn finish(&self, node: EntityId, command: NodeCommand) -> Result<NodeState> {
        let mut uow = self.graph.begin();
        let state = lifecycle::apply(&mut uow, node, command)?;
        uow.commit();
        Ok(state)
    }

    /// Undo applied calls, last first; failures are only logged
    async fn compensate(&self, node: EntityId, applied: &[PlannedCall]) {
        for planned in undo(applied) {
            if let Err(e) = self.retry.run(self.directory.as_ref(), &planned).await {
                warn!("Node {}: compensation '{}' failed: {}", node, planned.call, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocation::NodeAllocator;
    use crate::assembly::AssemblyStep;
    use crate::devices::{DeviceOp, InMemoryDevices};
    use crate::domain::ports::DeviceError;
    use crate::domain::types::{BootOverrideMode, BootSource, Vlan};
    use crate::fixtures;
    use crate::graph::{EntityKind, LinkLabel};
    use crate::template::{NetworkInterfaceRequirement, RemoteDriveRequirement, VlanRequirement};
    use assert_matches::assert_matches;

    struct Harness {
        store: Arc<GraphStore>,
        devices: Arc<InMemoryDevices>,
        assembler: Arc<NodeAssembler>,
        node: EntityId,
    }

    fn harness() -> Harness {
        let store = fixtures::pod();
        let metrics = EngineMetrics::new();
        let (devices, directory) = fixtures::devices();

        let mut template = fixtures::compute_template("assembled");
        template.remote_drives.push(RemoteDriveRequirement {
            address: Some(fixtures::TARGET_IQN.to_string()),
            boot_order: Some(0),
            ..Default::default()
        });
        template.network_interfaces.push(NetworkInterfaceRequirement {
            vlans: vec![VlanRequirement { vlan_id: 100, tagged: true }],
            ..Default::default()
        });
        let node = NodeAllocator::new(store.clone(), "iqn.test", metrics.clone())
            .allocate(&template)
            .unwrap();

        let retry = RetryPolicy::new(fixtures::fast_retry(), metrics.clone());
        let assembler = NodeAssembler::new(store.clone(), directory, retry, "iqn.test", metrics);
        Harness {
            store,
            devices,
            assembler,
            node,
        }
    }

    fn state(h: &Harness) -> NodeState {
        lifecycle::node_state(&h.store.read(), h.node).unwrap()
    }

    #[tokio::test]
    async fn test_assemble_programs_devices() {
        let h = harness();
        h.assembler.assemble(h.node).await.unwrap();

        assert_eq!(state(&h), NodeState::Assembled);
        assert_eq!(
            h.devices.lun(fixtures::EXPOSED_VOLUME).map(|t| t.target_iqn),
            Some(fixtures::TARGET_IQN.to_string())
        );
        assert_eq!(h.devices.vlans_of(crate::graph::EntityId(50)), vec![Vlan::tagged(100)]);
        assert_eq!(
            h.devices.boot_override(fixtures::BLADE_7),
            Some((BootSource::RemoteDrive, BootOverrideMode::Continuous))
        );
        assert_eq!(h.assembler.metrics.snapshot().nodes_assembled, 1);
    }

    #[tokio::test]
    async fn test_assemble_twice_is_rejected() {
        let h = harness();
        h.assembler.assemble(h.node).await.unwrap();
        assert_matches!(
            h.assembler.assemble(h.node).await,
            Err(Error::InvalidState {
                state: NodeState::Assembled,
                ..
            })
        );
    }

    #[tokio::test]
    async fn test_failure_compensates_and_keeps_claims() {
        let h = harness();
        h.devices
            .fail_next(DeviceOp::OverrideBoot, 1, DeviceError::Rejected("busy".into()));
        let claimed_before = h.store.read().neighbours(h.node, LinkLabel::Includes).count();

        assert_matches!(
            h.assembler.assemble(h.node).await,
            Err(Error::Assembly {
                step: AssemblyStep::Boot,
                ..
            })
        );
        assert_eq!(state(&h), NodeState::Failed);
        assert!(h.devices.is_clean());
        assert_eq!(
            h.store.read().neighbours(h.node, LinkLabel::Includes).count(),
            claimed_before
        );
        assert_eq!(h.devices.call_count(DeviceOp::DetachLun), 1);
        assert_eq!(h.devices.call_count(DeviceOp::RemoveVlan), 1);
    }

    #[tokio::test]
    async fn test_retry_after_failure_reaches_assembled() {
        let h = harness();
        let free_before = h.store.free_assets(EntityKind::Processor);
        h.devices.fail_next(
            DeviceOp::AttachLun,
            fixtures::fast_retry().max_attempts,
            DeviceError::Unreachable("storage".into()),
        );

        assert_matches!(
            h.assembler.assemble(h.node).await,
            Err(Error::Assembly {
                step: AssemblyStep::Storage,
                ..
            })
        );
        assert_eq!(state(&h), NodeState::Failed);

        h.assembler.assemble(h.node).await.unwrap();
        assert_eq!(state(&h), NodeState::Assembled);
        assert_eq!(h.store.free_assets(EntityKind::Processor), free_before);
    }

    #[tokio::test]
    async fn test_transient_errors_within_budget_succeed() {
        let h = harness();
        h.devices
            .fail_next(DeviceOp::SetVlan, 1, DeviceError::Timeout(std::time::Duration::from_millis(5)));
        h.assembler.assemble(h.node).await.unwrap();
        assert_eq!(h.devices.call_count(DeviceOp::SetVlan), 2);
        assert_eq!(h.assembler.metrics.snapshot().device_call_retries, 1);
    }

    #[tokio::test]
    async fn test_missing_node() {
        let h = harness();
        assert_matches!(
            h.assembler.assemble(EntityId(9_999)).await,
            Err(Error::EntityNotFound { .. })
        );
    }
}
