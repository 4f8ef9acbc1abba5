//! Shared throughput counter.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Monotonic operation counter fed by many workers and drained by one reporter.
///
/// Draining swaps the accumulated value for zero in a single atomic step, so
/// every increment lands in exactly one drained interval.
#[derive(Clone, Debug, Default)]
pub struct ThroughputCounter {
    ops: Arc<AtomicU64>,
}

impl ThroughputCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `count` successful operations.
    pub fn add(&self, count: u64) {
        self.ops.fetch_add(count, Ordering::Relaxed);
    }

    /// Take the accumulated count and reset it to zero.
    pub fn drain(&self) -> u64 {
        self.ops.swap(0, Ordering::AcqRel)
    }

    /// Current value without resetting.
    pub fn peek(&self) -> u64 {
        self.ops.load(Ordering::Relaxed)
    }
}
