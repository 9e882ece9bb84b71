//! Node assembly
//!
//! Programming and unprogramming the devices behind a composed node through
//! the device capability port, with bounded retries and compensation.

pub mod assembler;
pub mod disassembler;
pub mod plan;
pub mod retry;

pub use assembler::NodeAssembler;
pub use disassembler::{DisassemblyReport, NodeDisassembler, TeardownFailure};
pub use plan::{host_system, AssemblyPlan, AssemblyStep, DeviceCall, PlannedCall};
pub use retry::RetryPolicy;
