//! Guarded execution: the circuit registry and the timeout-raced call path.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, RwLock};

use tokio::time::{timeout, Instant};

use crate::control::CancelToken;

use super::circuit::{Admission, CircuitCore, CircuitState, Transition};
use super::config::{CircuitConfig, CircuitConfigPatch};
use super::error::BreakerError;
use super::stats::CircuitStats;

/// Circuit breaker with a per-name circuit registry.
///
/// The registry is owned by the instance (no global state); circuits are
/// created lazily on first use and removed only by `remove_circuit`. Every
/// circuit's mutable core sits behind its own mutex, and no lock is held
/// across an await point.
pub struct CircuitBreaker {
    circuits: RwLock<HashMap<String, Arc<Mutex<CircuitCore>>>>,
    defaults: CircuitConfig,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new()
    }
}

/// Releases the half-open trial slot if the call never records an outcome
/// (future dropped or call cancelled mid-trial).
struct TrialGuard {
    cell: Arc<Mutex<CircuitCore>>,
    armed: bool,
}

impl TrialGuard {
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for TrialGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Ok(mut core) = self.cell.lock() {
            if core.state == CircuitState::HalfOpen {
                core.trial_in_flight = false;
            }
        }
    }
}

impl CircuitBreaker {
    pub fn new() -> Self {
        Self::with_defaults(CircuitConfig::default())
    }

    /// Create a breaker whose lazily-created circuits start from `defaults`.
    pub fn with_defaults(defaults: CircuitConfig) -> Self {
        Self {
            circuits: RwLock::new(HashMap::new()),
            defaults,
        }
    }

    /// Invoke `op` guarded by the named circuit.
    ///
    /// Fails fast with [`BreakerError::CircuitOpen`] while the circuit is
    /// open; otherwise races `op` against the request timeout and records
    /// the outcome.
    pub async fn execute<T, E, F, Fut>(&self, name: &str, op: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.execute_with(name, op, None, None).await
    }

    /// [`CircuitBreaker::execute`] with a per-call config patch (not
    /// persisted) and an optional cancellation token.
    pub async fn execute_with<T, E, F, Fut>(
        &self,
        name: &str,
        op: F,
        patch: Option<&CircuitConfigPatch>,
        cancel: Option<&CancelToken>,
    ) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let cell = self.circuit(name);
        let now = Instant::now();
        let (cfg, admitted_trial) = {
            let mut core = cell.lock().unwrap();
            let cfg = match patch {
                Some(p) => p.apply(core.config),
                None => core.config,
            };
            match core.admit(&cfg, now) {
                Admission::Reject => {
                    core.stats.rejected_requests += 1;
                    drop(core);
                    tracing::warn!(circuit = name, "circuit open, rejecting call");
                    return Err(BreakerError::CircuitOpen(name.to_string()));
                }
                Admission::Allow { trial } => (cfg, trial),
            }
        };

        let mut trial_guard = admitted_trial.then(|| {
            tracing::info!(circuit = name, "half-open trial call");
            TrialGuard {
                cell: Arc::clone(&cell),
                armed: true,
            }
        });

        let raced = timeout(cfg.request_timeout, op());
        let outcome = match cancel {
            Some(token) => {
                tokio::select! {
                    res = raced => res,
                    _ = token.cancelled() => {
                        tracing::debug!(circuit = name, "call aborted by caller");
                        // TrialGuard (if any) frees the trial slot on drop.
                        return Err(BreakerError::Aborted);
                    }
                }
            }
            None => raced.await,
        };

        let now = Instant::now();
        match outcome {
            Ok(Ok(value)) => {
                let transition = {
                    let mut core = cell.lock().unwrap();
                    core.record_success(now)
                };
                if let Some(g) = trial_guard.as_mut() {
                    g.disarm();
                }
                self.log_transition(name, transition);
                Ok(value)
            }
            Ok(Err(err)) => {
                let transition = {
                    let mut core = cell.lock().unwrap();
                    core.record_failure(&cfg, now)
                };
                if let Some(g) = trial_guard.as_mut() {
                    g.disarm();
                }
                self.log_transition(name, transition);
                Err(BreakerError::Operation(err))
            }
            Err(_elapsed) => {
                let transition = {
                    let mut core = cell.lock().unwrap();
                    core.record_failure(&cfg, now)
                };
                if let Some(g) = trial_guard.as_mut() {
                    g.disarm();
                }
                self.log_transition(name, transition);
                Err(BreakerError::Timeout(cfg.request_timeout))
            }
        }
    }

    /// Current state of the named circuit, if it exists.
    pub fn state(&self, name: &str) -> Option<CircuitState> {
        self.circuits
            .read()
            .unwrap()
            .get(name)
            .map(|c| c.lock().unwrap().state)
    }

    /// Stats snapshot for the named circuit, if it exists.
    pub fn stats(&self, name: &str) -> Option<CircuitStats> {
        self.circuits
            .read()
            .unwrap()
            .get(name)
            .map(|c| c.lock().unwrap().stats)
    }

    /// Stored config for the named circuit, if it exists.
    pub fn config(&self, name: &str) -> Option<CircuitConfig> {
        self.circuits
            .read()
            .unwrap()
            .get(name)
            .map(|c| c.lock().unwrap().config)
    }

    /// Patch the stored config for `name`, creating the circuit when absent.
    pub fn set_config(&self, name: &str, patch: &CircuitConfigPatch) {
        let cell = self.circuit(name);
        let mut core = cell.lock().unwrap();
        core.config = patch.apply(core.config);
    }

    /// Force CLOSED and reinitialize counters and stats, creating the
    /// circuit when absent. Idempotent.
    pub fn reset(&self, name: &str) {
        let cell = self.circuit(name);
        cell.lock().unwrap().reset();
        tracing::info!(circuit = name, "circuit reset");
    }

    /// Manual override: trip the circuit OPEN.
    pub fn force_open(&self, name: &str) {
        let cell = self.circuit(name);
        let transition = cell.lock().unwrap().force_open(Instant::now());
        self.log_transition(name, transition);
    }

    /// Manual override: close the circuit, clearing the failure count.
    pub fn force_close(&self, name: &str) {
        let cell = self.circuit(name);
        let transition = cell.lock().unwrap().force_close(Instant::now());
        self.log_transition(name, transition);
    }

    /// Drop the named circuit entirely. Returns whether it existed.
    pub fn remove_circuit(&self, name: &str) -> bool {
        self.circuits.write().unwrap().remove(name).is_some()
    }

    fn circuit(&self, name: &str) -> Arc<Mutex<CircuitCore>> {
        if let Some(c) = self.circuits.read().unwrap().get(name) {
            return Arc::clone(c);
        }
        let mut map = self.circuits.write().unwrap();
        Arc::clone(
            map.entry(name.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(CircuitCore::new(self.defaults)))),
        )
    }

    fn log_transition(&self, name: &str, transition: Option<Transition>) {
        if let Some((from, to)) = transition {
            match to {
                CircuitState::Open => {
                    tracing::warn!(circuit = name, %from, %to, "circuit opened");
                }
                _ => {
                    tracing::info!(circuit = name, %from, %to, "circuit state changed");
                }
            }
        }
    }
}
