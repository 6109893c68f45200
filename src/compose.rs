//! Composition of retry and breaker around one downstream call.
//!
//! Each retry attempt goes through the breaker, so retries count toward
//! breaker statistics. An open-circuit rejection is not retried: the
//! default predicate fails fast instead of sleeping through backoff into a
//! circuit that is known to be open.

use std::future::Future;
use std::sync::Arc;

use crate::breaker::{BreakerError, CircuitBreaker};
use crate::health::HealthProbe;
use crate::retry::{classify, RetryOrchestrator, RetryOutcome, RetryPolicyPatch, RetryPredicate};

/// Breaker-inside-retry guard for calls to one class of downstream
/// dependency. Both components are owned elsewhere and shared; the guard
/// itself is cheap to construct per dependency.
pub struct Guarded {
    breaker: Arc<CircuitBreaker>,
    retrier: Arc<RetryOrchestrator>,
    probe: Option<Arc<dyn HealthProbe>>,
}

impl Guarded {
    pub fn new(breaker: Arc<CircuitBreaker>, retrier: Arc<RetryOrchestrator>) -> Self {
        Self {
            breaker,
            retrier,
            probe: None,
        }
    }

    /// Attach the dependency's own health probe, surfaced by
    /// [`Guarded::health_check`].
    pub fn with_health_probe(mut self, probe: Arc<dyn HealthProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn retrier(&self) -> &RetryOrchestrator {
        &self.retrier
    }

    /// Delegates to the injected probe; true when no probe is attached.
    pub fn health_check(&self) -> bool {
        self.probe.as_ref().map(|p| p.is_healthy()).unwrap_or(true)
    }

    /// Run `op` under the named retry policy, with every attempt guarded by
    /// the named circuit. [`Guarded::breaker_aware_predicate`] is supplied
    /// as the default classification; a predicate already registered on the
    /// named policy wins.
    pub async fn run<T, E, F, Fut>(&self, name: &str, op: F) -> RetryOutcome<T, BreakerError<E>>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + 'static,
    {
        let has_own_predicate = self
            .retrier
            .policy(name)
            .map(|p| p.retry_on.is_some())
            .unwrap_or(false);
        let mut patch = RetryPolicyPatch::default();
        if !has_own_predicate {
            patch.retry_on = Some(Self::breaker_aware_predicate::<E>());
        }
        let breaker = &self.breaker;
        let op = &op;
        self.retrier
            .execute_with_retry_with(name, move || breaker.execute(name, op), Some(&patch), None)
            .await
    }

    /// Retry classification for attempts that go through a breaker:
    /// open-circuit rejections and caller aborts are never retried,
    /// timeouts are, and downstream operation errors fall back to the
    /// message heuristic.
    pub fn breaker_aware_predicate<E>() -> RetryPredicate
    where
        E: std::error::Error + 'static,
    {
        Arc::new(|error| match error.downcast_ref::<BreakerError<E>>() {
            Some(BreakerError::CircuitOpen(_)) | Some(BreakerError::Aborted) => false,
            Some(BreakerError::Timeout(_)) => true,
            Some(BreakerError::Operation(inner)) => classify(inner).is_retryable(),
            None => classify(error).is_retryable(),
        })
    }
}
