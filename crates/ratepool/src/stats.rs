//! Point-in-time pool statistics.

use serde::Serialize;

use crate::occupancy::PoolState;

/// Snapshot of pool accounting, taken under a single lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub capacity: usize,
    pub qps: u64,
    pub interval_us: u64,
    /// Tokens waiting in the store, plus any just received but not yet
    /// admitted.
    pub resident: usize,
    /// Jobs currently running.
    pub in_flight: usize,
    /// Tokens minted since construction.
    pub minted: u64,
    /// Jobs admitted since construction.
    pub admitted: u64,
    pub state: PoolState,
}

impl PoolStats {
    /// Capacity the producer may still mint into.
    pub fn unused(&self) -> usize {
        self.capacity
            .saturating_sub(self.resident)
            .saturating_sub(self.in_flight)
    }

    /// Every unit of capacity is either resident or running a job.
    pub fn is_saturated(&self) -> bool {
        self.unused() == 0
    }
}
