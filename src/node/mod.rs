//! Composed node lifecycle and power actions

pub mod lifecycle;
pub mod reset;

pub use lifecycle::{node_state, NodeCommand, NodeState};
pub use reset::NodeReset;
