//! Circuit state machine and per-circuit mutable core.

use std::collections::VecDeque;
use std::fmt;

use tokio::time::Instant;

use super::config::CircuitConfig;
use super::stats::CircuitStats;

/// Upper bound on retained window entries so a hot circuit's memory stays
/// flat even inside a long monitoring window.
const OUTCOME_WINDOW_CAP: usize = 4096;

/// Breaker state for one circuit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Calls pass through; failures are counted.
    Closed,
    /// Calls fail fast; the operation is never invoked.
    Open,
    /// A single trial call is allowed to test recovery.
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// Admission decision for one call, made under the circuit lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Admission {
    /// Invoke the operation; `trial` marks the single half-open probe.
    Allow { trial: bool },
    /// Fail fast with `CircuitOpen`; the operation must not be invoked.
    Reject,
}

/// State transition observed while recording an outcome, for logging
/// outside the lock.
pub(super) type Transition = (CircuitState, CircuitState);

/// Mutable core of one circuit. Always accessed under the per-circuit mutex
/// owned by `CircuitBreaker`; none of these methods suspend.
#[derive(Debug)]
pub(super) struct CircuitCore {
    pub(super) state: CircuitState,
    /// Failures recorded since the last transition into CLOSED. Unaffected
    /// by successes; reset on every CLOSED entry.
    pub(super) failure_count: u32,
    pub(super) last_failure_at: Option<Instant>,
    /// Stored config; `set_config` patches this, per-call patches do not.
    pub(super) config: CircuitConfig,
    pub(super) stats: CircuitStats,
    /// Sliding window of (timestamp, success) outcomes, pruned to the
    /// monitoring window.
    window: VecDeque<(Instant, bool)>,
    /// Set while the single half-open trial call is in flight.
    pub(super) trial_in_flight: bool,
}

impl CircuitCore {
    pub(super) fn new(config: CircuitConfig) -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            last_failure_at: None,
            config,
            stats: CircuitStats::default(),
            window: VecDeque::new(),
            trial_in_flight: false,
        }
    }

    /// Decide whether a call may proceed, applying the OPEN -> HALF_OPEN
    /// recovery transition when the timeout has elapsed.
    pub(super) fn admit(&mut self, cfg: &CircuitConfig, now: Instant) -> Admission {
        match self.state {
            CircuitState::Closed => Admission::Allow { trial: false },
            CircuitState::Open => {
                let ready = match self.last_failure_at {
                    Some(at) => now.saturating_duration_since(at) >= cfg.recovery_timeout,
                    // No recorded failure to measure from; allow the probe.
                    None => true,
                };
                if ready {
                    self.state = CircuitState::HalfOpen;
                    self.last_failure_at = None;
                    self.trial_in_flight = true;
                    self.stats.last_state_change = Some(now);
                    Admission::Allow { trial: true }
                } else {
                    Admission::Reject
                }
            }
            CircuitState::HalfOpen => {
                if self.trial_in_flight {
                    Admission::Reject
                } else {
                    // A previous trial was abandoned without an outcome;
                    // hand its slot to this call.
                    self.trial_in_flight = true;
                    Admission::Allow { trial: true }
                }
            }
        }
    }

    /// Record a successful outcome. Returns the transition, if any.
    pub(super) fn record_success(&mut self, now: Instant) -> Option<Transition> {
        self.stats.total_requests += 1;
        self.stats.successful_requests += 1;
        self.push_outcome(now, true);
        if self.state == CircuitState::HalfOpen {
            self.enter_closed(now);
            Some((CircuitState::HalfOpen, CircuitState::Closed))
        } else {
            None
        }
    }

    /// Record a failed outcome (downstream error or request timeout).
    /// Returns the transition, if any.
    pub(super) fn record_failure(&mut self, cfg: &CircuitConfig, now: Instant) -> Option<Transition> {
        self.stats.total_requests += 1;
        self.stats.failed_requests += 1;
        self.failure_count = self.failure_count.saturating_add(1);
        self.last_failure_at = Some(now);
        self.push_outcome(now, false);

        match self.state {
            CircuitState::HalfOpen => {
                self.enter_open(now);
                Some((CircuitState::HalfOpen, CircuitState::Open))
            }
            CircuitState::Closed => {
                self.prune_window(cfg, now);
                let total = self.window.len() as u64;
                let failures = self.window.iter().filter(|(_, ok)| !ok).count() as u64;
                let threshold_hit =
                    self.failure_count >= cfg.failure_threshold && total >= cfg.minimum_requests;
                let ratio_hit = total >= cfg.minimum_requests && failures * 2 > total;
                if threshold_hit || ratio_hit {
                    self.enter_open(now);
                    Some((CircuitState::Closed, CircuitState::Open))
                } else {
                    None
                }
            }
            // No calls are admitted while OPEN, so nothing to trip.
            CircuitState::Open => None,
        }
    }

    /// Force CLOSED and zero every counter, as if freshly created.
    pub(super) fn reset(&mut self) {
        self.state = CircuitState::Closed;
        self.failure_count = 0;
        self.last_failure_at = None;
        self.trial_in_flight = false;
        self.window.clear();
        self.stats = CircuitStats::default();
    }

    /// Manual override: OPEN, measured from `now` for recovery purposes.
    pub(super) fn force_open(&mut self, now: Instant) -> Option<Transition> {
        if self.state == CircuitState::Open {
            return None;
        }
        let from = self.state;
        self.last_failure_at = Some(now);
        self.enter_open(now);
        Some((from, CircuitState::Open))
    }

    /// Manual override: CLOSED with counters cleared, stats preserved.
    pub(super) fn force_close(&mut self, now: Instant) -> Option<Transition> {
        if self.state == CircuitState::Closed {
            return None;
        }
        let from = self.state;
        self.enter_closed(now);
        Some((from, CircuitState::Closed))
    }

    fn enter_open(&mut self, now: Instant) {
        self.state = CircuitState::Open;
        self.trial_in_flight = false;
        self.stats.circuit_break_count += 1;
        self.stats.last_state_change = Some(now);
    }

    fn enter_closed(&mut self, now: Instant) {
        self.state = CircuitState::Closed;
        self.failure_count = 0;
        self.trial_in_flight = false;
        self.stats.last_state_change = Some(now);
    }

    fn push_outcome(&mut self, now: Instant, success: bool) {
        self.window.push_back((now, success));
        if self.window.len() > OUTCOME_WINDOW_CAP {
            self.window.pop_front();
        }
    }

    fn prune_window(&mut self, cfg: &CircuitConfig, now: Instant) {
        while let Some(&(at, _)) = self.window.front() {
            if now.saturating_duration_since(at) > cfg.monitoring_window {
                self.window.pop_front();
            } else {
                break;
            }
        }
    }
}
