//! Per-circuit request statistics.

use tokio::time::Instant;

/// Counters for one circuit. Snapshot type: `CircuitBreaker::stats` returns
/// a copy, so readers never hold the circuit lock.
#[derive(Debug, Clone, Copy, Default)]
pub struct CircuitStats {
    /// Calls that were admitted and ran to an outcome.
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    /// Calls refused while the circuit was OPEN (operation never invoked).
    pub rejected_requests: u64,
    /// Transitions into OPEN (automatic trips, half-open re-trips, manual
    /// force_open).
    pub circuit_break_count: u32,
    pub last_state_change: Option<Instant>,
}

impl CircuitStats {
    /// `successful_requests / total_requests`, 0.0 when nothing recorded.
    pub fn success_rate(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.successful_requests as f64 / self.total_requests as f64
        }
    }
}
