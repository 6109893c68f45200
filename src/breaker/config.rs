//! Per-circuit thresholds and timeouts.

use std::time::Duration;

/// Configuration for one circuit. New circuits inherit the breaker's
/// defaults; `set_config` patches the stored values, `execute_with` can
/// patch a single call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitConfig {
    /// Failures recorded since the last CLOSED entry before the circuit can
    /// trip.
    pub failure_threshold: u32,
    /// How long the circuit stays OPEN before a trial call is allowed.
    pub recovery_timeout: Duration,
    /// Deadline raced against every admitted call; elapse counts as failure.
    pub request_timeout: Duration,
    /// Width of the sliding outcome window backing the failure-rate check.
    pub monitoring_window: Duration,
    /// Outcomes the window must hold before the trip conditions apply.
    pub minimum_requests: u64,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(30),
            request_timeout: Duration::from_secs(10),
            monitoring_window: Duration::from_secs(60),
            minimum_requests: 10,
        }
    }
}

/// Partial config override, merged field-wise over a circuit's stored
/// config (via `set_config`) or over a single call (via `execute_with`).
#[derive(Debug, Clone, Copy, Default)]
pub struct CircuitConfigPatch {
    pub failure_threshold: Option<u32>,
    pub recovery_timeout: Option<Duration>,
    pub request_timeout: Option<Duration>,
    pub monitoring_window: Option<Duration>,
    pub minimum_requests: Option<u64>,
}

impl CircuitConfigPatch {
    /// Apply this patch over `base`, keeping base values where the patch is
    /// unset.
    pub fn apply(&self, base: CircuitConfig) -> CircuitConfig {
        CircuitConfig {
            failure_threshold: self.failure_threshold.unwrap_or(base.failure_threshold),
            recovery_timeout: self.recovery_timeout.unwrap_or(base.recovery_timeout),
            request_timeout: self.request_timeout.unwrap_or(base.request_timeout),
            monitoring_window: self.monitoring_window.unwrap_or(base.monitoring_window),
            minimum_requests: self.minimum_requests.unwrap_or(base.minimum_requests),
        }
    }
}
