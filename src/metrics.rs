//! Engine counters
//!
//! Lock-free counters for the allocation and assembly pipeline, read through
//! a point-in-time snapshot.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Pipeline counters, aligned to a cache line to keep them off hot graph data
#[repr(C, align(64))]
#[derive(Debug, Default)]
pub struct EngineMetrics {
    /// Composed nodes created by allocation
    pub nodes_allocated: AtomicU64,
    /// Allocations rejected for lack of resources or invalid input
    pub allocation_failures: AtomicU64,
    /// Assemblies that reached ASSEMBLED
    pub nodes_assembled: AtomicU64,
    /// Assemblies that ended in FAILED
    pub assembly_failures: AtomicU64,
    /// Composed nodes removed
    pub nodes_disassembled: AtomicU64,
    /// Disassemblies that left remote state behind
    pub disassembly_failures: AtomicU64,
    /// Device calls issued, retries included
    pub device_calls: AtomicU64,
    /// Device calls retried after a transient error
    pub device_call_retries: AtomicU64,
    /// Device calls that failed for good
    pub device_call_failures: AtomicU64,
    /// Power actions completed
    pub resets: AtomicU64,
}

impl EngineMetrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    #[inline]
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_allocation(&self, succeeded: bool) {
        if succeeded {
            Self::bump(&self.nodes_allocated);
        } else {
            Self::bump(&self.allocation_failures);
        }
    }

    pub fn record_assembly(&self, succeeded: bool) {
        if succeeded {
            Self::bump(&self.nodes_assembled);
        } else {
            Self::bump(&self.assembly_failures);
        }
    }

    pub fn record_disassembly(&self, clean: bool) {
        Self::bump(&self.nodes_disassembled);
        if !clean {
            Self::bump(&self.disassembly_failures);
        }
    }

    pub fn record_device_call(&self) {
        Self::bump(&self.device_calls);
    }

    pub fn record_device_retry(&self) {
        Self::bump(&self.device_call_retries);
    }

    pub fn record_device_failure(&self) {
        Self::bump(&self.device_call_failures);
    }

    pub fn record_reset(&self) {
        Self::bump(&self.resets);
    }

    /// Create a snapshot of current counters
    pub fn snapshot(&self) -> EngineMetricsSnapshot {
        EngineMetricsSnapshot {
            nodes_allocated: self.nodes_allocated.load(Ordering::Relaxed),
            allocation_failures: self.allocation_failures.load(Ordering::Relaxed),
            nodes_assembled: self.nodes_assembled.load(Ordering::Relaxed),
            assembly_failures: self.assembly_failures.load(Ordering::Relaxed),
            nodes_disassembled: self.nodes_disassembled.load(Ordering::Relaxed),
            disassembly_failures: self.disassembly_failures.load(Ordering::Relaxed),
            device_calls: self.device_calls.load(Ordering::Relaxed),
            device_call_retries: self.device_call_retries.load(Ordering::Relaxed),
            device_call_failures: self.device_call_failures.load(Ordering::Relaxed),
            resets: self.resets.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of engine counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineMetricsSnapshot {
    pub nodes_allocated: u64,
    pub allocation_failures: u64,
    pub nodes_assembled: u64,
    pub assembly_failures: u64,
    pub nodes_disassembled: u64,
    pub disassembly_failures: u64,
    pub device_calls: u64,
    pub device_call_retries: u64,
    pub device_call_failures: u64,
    pub resets: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_cache_line_alignment() {
        assert_eq!(std::mem::align_of::<EngineMetrics>(), 64);
    }

    #[test]
    fn test_snapshot_reflects_records() {
        let metrics = EngineMetrics::new();
        metrics.record_allocation(true);
        metrics.record_allocation(false);
        metrics.record_disassembly(false);
        metrics.record_device_call();
        metrics.record_device_retry();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.nodes_allocated, 1);
        assert_eq!(snapshot.allocation_failures, 1);
        assert_eq!(snapshot.nodes_disassembled, 1);
        assert_eq!(snapshot.disassembly_failures, 1);
        assert_eq!(snapshot.device_calls, 1);
        assert_eq!(snapshot.device_call_retries, 1);
        assert_eq!(snapshot.nodes_assembled, 0);
    }
}
