//! Power actions on assembled nodes

use super::lifecycle::{self, NodeCommand, NodeState};
use crate::assembly::plan::{asset_ref, manager_of, DeviceCall, PlannedCall};
use crate::assembly::{host_system, RetryPolicy};
use crate::domain::ports::ManagerDirectoryRef;
use crate::domain::types::ResetType;
use crate::error::{Error, Result};
use crate::graph::{EntityId, GraphStore};
use crate::metrics::EngineMetrics;
use std::sync::Arc;
use tracing::info;

/// Lifecycle command a reset type leads to, if it is supported
pub fn command_for(reset: &ResetType) -> Option<NodeCommand> {
    match reset {
        ResetType::On => Some(NodeCommand::PowerOn),
        ResetType::ForceOff | ResetType::GracefulShutdown => Some(NodeCommand::PowerOff),
        _ => None,
    }
}

/// Issues power actions on the host system of a composed node
pub struct NodeReset {
    graph: Arc<GraphStore>,
    directory: ManagerDirectoryRef,
    retry: Arc<RetryPolicy>,
    metrics: Arc<EngineMetrics>,
}

impl NodeReset {
    pub fn new(
        graph: Arc<GraphStore>,
        directory: ManagerDirectoryRef,
        retry: Arc<RetryPolicy>,
        metrics: Arc<EngineMetrics>,
    ) -> Arc<Self> {
        Arc::new(Self {
            graph,
            directory,
            retry,
            metrics,
        })
    }

    /// Apply `reset` to `node` and return its new state
    pub async fn reset(&self, node: EntityId, reset: ResetType) -> Result<NodeState> {
        let command = command_for(&reset)
            .ok_or_else(|| Error::UnsupportedAction(format!("reset type {}", reset)))?;

        let planned = {
            let view = self.graph.read();
            lifecycle::node_state(&view, node)?.transition(node, command)?;
            let host = host_system(&view, node)?;
            PlannedCall {
                manager: manager_of(&view, host.id)?,
                call: DeviceCall::Reset {
                    system: asset_ref(host),
                    reset: reset.clone(),
                },
            }
        };

        info!("Node {}: {}", node, planned.call);
        self.retry.run(self.directory.as_ref(), &planned).await?;

        let mut uow = self.graph.begin();
        let state = lifecycle::apply(&mut uow, node, command)?;
        uow.commit();
        self.metrics.record_reset();
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocation::NodeAllocator;
    use crate::assembly::NodeAssembler;
    use crate::devices::{DeviceOp, InMemoryDevices, PowerState};
    use crate::domain::ports::DeviceError;
    use crate::fixtures;
    use assert_matches::assert_matches;

    async fn setup(assemble: bool) -> (Arc<InMemoryDevices>, Arc<NodeReset>, EntityId) {
        let store = fixtures::pod();
        let metrics = EngineMetrics::new();
        let (devices, directory) = fixtures::devices();
        let retry = RetryPolicy::new(fixtures::fast_retry(), metrics.clone());

        let node = NodeAllocator::new(store.clone(), "iqn.test", metrics.clone())
            .allocate(&fixtures::compute_template("power"))
            .unwrap();
        if assemble {
            NodeAssembler::new(
                store.clone(),
                directory.clone(),
                retry.clone(),
                "iqn.test",
                metrics.clone(),
            )
            .assemble(node)
            .await
            .unwrap();
        }
        (devices, NodeReset::new(store, directory, retry, metrics), node)
    }

    #[test]
    fn test_supported_reset_types() {
        assert_eq!(command_for(&ResetType::On), Some(NodeCommand::PowerOn));
        assert_eq!(command_for(&ResetType::ForceOff), Some(NodeCommand::PowerOff));
        assert_eq!(
            command_for(&ResetType::GracefulShutdown),
            Some(NodeCommand::PowerOff)
        );
        assert_eq!(command_for(&ResetType::Nmi), None);
        assert_eq!(command_for(&ResetType::ForceRestart), None);
    }

    #[tokio::test]
    async fn test_power_cycle() {
        let (devices, reset, node) = setup(true).await;

        assert_eq!(reset.reset(node, ResetType::On).await.unwrap(), NodeState::PoweredOn);
        assert_eq!(devices.power_state(fixtures::BLADE_7), Some(PowerState::On));

        assert_eq!(
            reset.reset(node, ResetType::GracefulShutdown).await.unwrap(),
            NodeState::PoweredOff
        );
        assert_eq!(devices.power_state(fixtures::BLADE_7), Some(PowerState::Off));
        assert_eq!(reset.metrics.snapshot().resets, 2);
    }

    #[tokio::test]
    async fn test_unsupported_reset_type() {
        let (devices, reset, node) = setup(true).await;
        assert_matches!(
            reset.reset(node, ResetType::PushPowerButton).await,
            Err(Error::UnsupportedAction(_))
        );
        assert_eq!(devices.call_count(DeviceOp::Reset), 0);
    }

    #[tokio::test]
    async fn test_reset_requires_assembled_node() {
        let (devices, reset, node) = setup(false).await;
        assert_matches!(
            reset.reset(node, ResetType::On).await,
            Err(Error::InvalidState {
                state: NodeState::Allocated,
                ..
            })
        );
        assert_eq!(devices.call_count(DeviceOp::Reset), 0);
    }

    #[tokio::test]
    async fn test_device_failure_keeps_state() {
        let (devices, reset, node) = setup(true).await;
        devices.fail_next(DeviceOp::Reset, 1, DeviceError::Rejected("interlock".into()));
        assert_matches!(
            reset.reset(node, ResetType::On).await,
            Err(Error::Device(DeviceError::Rejected(_)))
        );
        assert_eq!(reset.reset(node, ResetType::On).await.unwrap(), NodeState::PoweredOn);
    }
}
