//! Graph Events
//!
//! Events published by the resource graph when a unit of work commits, for
//! external consumers to react to pool and composed node changes.

use super::entity::{EntityId, EntityKind};
use crate::node::NodeState;
use serde::{Deserialize, Serialize};

/// Events emitted by the resource graph
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum GraphEvent {
    /// An entity was added to the pool
    EntityAdded { id: EntityId, kind: EntityKind },

    /// An entity was removed from the pool
    EntityRemoved { id: EntityId, kind: EntityKind },

    /// A composed node claimed an asset
    AssetClaimed { node: EntityId, asset: EntityId },

    /// A composed node released an asset
    AssetReleased { node: EntityId, asset: EntityId },

    /// A composed node moved through its lifecycle
    NodeStateChanged {
        node: EntityId,
        from: NodeState,
        to: NodeState,
    },
}

impl GraphEvent {
    /// Get the composed node associated with this event, if any
    pub fn node_id(&self) -> Option<EntityId> {
        match self {
            GraphEvent::AssetClaimed { node, .. }
            | GraphEvent::AssetReleased { node, .. }
            | GraphEvent::NodeStateChanged { node, .. } => Some(*node),
            GraphEvent::EntityAdded {
                id,
                kind: EntityKind::ComposedNode,
            }
            | GraphEvent::EntityRemoved {
                id,
                kind: EntityKind::ComposedNode,
            } => Some(*id),
            _ => None,
        }
    }

    /// Check if this event changes the free pool
    pub fn is_claim_event(&self) -> bool {
        matches!(
            self,
            GraphEvent::AssetClaimed { .. } | GraphEvent::AssetReleased { .. }
        )
    }
}
