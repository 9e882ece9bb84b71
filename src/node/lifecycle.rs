//! Composed node lifecycle
//!
//! ```text
//!              Assemble                AssemblyCompleted
//!  Allocated ───────────► Assembling ───────────────────► Assembled ◄─┐
//!      ▲                     │   ▲                          │        │
//!      │    AssemblyFailed   │   │ Assemble        PowerOn/ │        │
//!      │            ┌────────┘   │                 PowerOff ▼        │
//!  (allocator)      ▼            │                  PoweredOn ⇄ PoweredOff
//!                 Failed ────────┘
//!
//!  any settled state ── Disassemble ──► Disassembling ──► (node deleted)
//! ```
//!
//! `Assembling` is not settled: a disassembly waits for the in-flight assembly
//! to finish before it takes the node. Once `Disassembling`, no other command
//! applies.

use crate::graph::{EntityId, EntityKind, Graph, GraphEvent, UnitOfWork};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a composed node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeState {
    Allocated,
    Assembling,
    Assembled,
    Failed,
    PoweredOn,
    PoweredOff,
    Disassembling,
}

/// Event driving a lifecycle transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeCommand {
    Assemble,
    AssemblyCompleted,
    AssemblyFailed,
    PowerOn,
    PowerOff,
    Disassemble,
}

impl NodeCommand {
    pub fn name(&self) -> &'static str {
        match self {
            NodeCommand::Assemble => "assemble",
            NodeCommand::AssemblyCompleted => "complete assembly",
            NodeCommand::AssemblyFailed => "fail assembly",
            NodeCommand::PowerOn => "power on",
            NodeCommand::PowerOff => "power off",
            NodeCommand::Disassemble => "disassemble",
        }
    }
}

impl NodeState {
    /// Next state after `command`, or `None` if the command is not valid here
    pub fn next(self, command: NodeCommand) -> Option<NodeState> {
        use NodeCommand::*;
        use NodeState::*;

        match (self, command) {
            (Allocated | Failed, Assemble) => Some(Assembling),
            (Assembling, AssemblyCompleted) => Some(Assembled),
            (Assembling, AssemblyFailed) => Some(Failed),
            (Assembled | PoweredOn | PoweredOff, PowerOn) => Some(PoweredOn),
            (Assembled | PoweredOn | PoweredOff, PowerOff) => Some(PoweredOff),
            (Allocated | Assembled | Failed | PoweredOn | PoweredOff, Disassemble) => {
                Some(Disassembling)
            }
            _ => None,
        }
    }

    /// Apply `command` to the state of `node`
    pub fn transition(self, node: EntityId, command: NodeCommand) -> Result<NodeState> {
        self.next(command).ok_or_else(|| Error::InvalidState {
            node,
            state: self,
            action: command.name().to_string(),
        })
    }

    /// Whether assembly may have left configuration on devices
    pub fn has_device_state(self) -> bool {
        !matches!(self, NodeState::Allocated)
    }
}

impl std::fmt::Display for NodeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            NodeState::Allocated => "ALLOCATED",
            NodeState::Assembling => "ASSEMBLING",
            NodeState::Assembled => "ASSEMBLED",
            NodeState::Failed => "FAILED",
            NodeState::PoweredOn => "POWERED_ON",
            NodeState::PoweredOff => "POWERED_OFF",
            NodeState::Disassembling => "DISASSEMBLING",
        };
        f.write_str(text)
    }
}

// =============================================================================
// Graph helpers
// =============================================================================

/// Current state of a composed node
pub fn node_state(graph: &Graph, node: EntityId) -> Result<NodeState> {
    graph
        .find_kind(node, EntityKind::ComposedNode)?
        .as_composed_node()
        .map(|info| info.state)
        .ok_or_else(|| Error::not_found(EntityKind::ComposedNode, node))
}

/// Apply `command` to a composed node inside a unit of work
pub fn apply(uow: &mut UnitOfWork<'_>, node: EntityId, command: NodeCommand) -> Result<NodeState> {
    let from = node_state(uow, node)?;
    let to = from.transition(node, command)?;
    uow.update(node, |entity| {
        if let Some(info) = entity.as_composed_node_mut() {
            info.state = to;
        }
    })?;
    uow.emit(GraphEvent::NodeStateChanged { node, from, to });
    Ok(to)
}
