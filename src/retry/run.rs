//! Retry loop: run a closure until success, exhaustion, or a non-retryable
//! error, sleeping the backoff delay between attempts.

use std::collections::HashMap;
use std::future::Future;
use std::sync::RwLock;
use std::time::SystemTime;

use tokio::time::Instant;

use crate::control::CancelToken;

use super::classify::classify;
use super::outcome::{RetryAttempt, RetryOutcome};
use super::policy::{RetryPolicy, RetryPolicyPatch};

/// Bounded-retry executor with a per-name policy registry.
///
/// Policies are registered per operation name; unknown names fall back to
/// the instance default. The registry is owned by the instance (no global
/// state) so tests and tenants stay isolated.
pub struct RetryOrchestrator {
    policies: RwLock<HashMap<String, RetryPolicy>>,
    default_policy: RetryPolicy,
}

impl Default for RetryOrchestrator {
    fn default() -> Self {
        Self::new()
    }
}

impl RetryOrchestrator {
    pub fn new() -> Self {
        Self::with_default_policy(RetryPolicy::default())
    }

    /// Create an orchestrator whose unregistered names use `policy`.
    pub fn with_default_policy(policy: RetryPolicy) -> Self {
        Self {
            policies: RwLock::new(HashMap::new()),
            default_policy: policy,
        }
    }

    /// Register (or replace) the policy for an operation name.
    pub fn set_policy(&self, name: &str, policy: RetryPolicy) {
        self.policies
            .write()
            .unwrap()
            .insert(name.to_string(), policy);
    }

    /// Registered policy for `name`, if any.
    pub fn policy(&self, name: &str) -> Option<RetryPolicy> {
        self.policies.read().unwrap().get(name).cloned()
    }

    /// Remove the registered policy for `name`. Returns whether one existed.
    pub fn remove_policy(&self, name: &str) -> bool {
        self.policies.write().unwrap().remove(name).is_some()
    }

    /// Effective policy: patch merged over registered policy merged over the
    /// instance default.
    fn effective_policy(&self, name: &str, patch: Option<&RetryPolicyPatch>) -> RetryPolicy {
        let base = self
            .policies
            .read()
            .unwrap()
            .get(name)
            .cloned()
            .unwrap_or_else(|| self.default_policy.clone());
        match patch {
            Some(p) => p.apply(base),
            None => base,
        }
    }

    /// Run `f` under the effective policy for `name`.
    ///
    /// Never fails at the function level; inspect the returned outcome.
    pub async fn execute_with_retry<T, E, F, Fut>(&self, name: &str, f: F) -> RetryOutcome<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + 'static,
    {
        self.execute_with_retry_with(name, f, None, None).await
    }

    /// Run `f` with an optional per-call policy patch and cancellation token.
    ///
    /// Cancellation interrupts the backoff sleep: the outcome carries the
    /// most recent error and no history entry for the interrupted sleep.
    pub async fn execute_with_retry_with<T, E, F, Fut>(
        &self,
        name: &str,
        mut f: F,
        patch: Option<&RetryPolicyPatch>,
        cancel: Option<&CancelToken>,
    ) -> RetryOutcome<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + 'static,
    {
        let policy = self.effective_policy(name, patch);
        let started = Instant::now();
        let mut history: Vec<RetryAttempt> = Vec::new();

        if !policy.enabled {
            let result = f().await;
            return RetryOutcome {
                result,
                attempts: 1,
                total_duration: started.elapsed(),
                history,
            };
        }

        let max_attempts = policy.max_attempts.max(1);
        let mut attempt = 1u32;
        loop {
            match f().await {
                Ok(value) => {
                    return RetryOutcome {
                        result: Ok(value),
                        attempts: attempt,
                        total_duration: started.elapsed(),
                        history,
                    };
                }
                Err(err) => {
                    let retryable = match &policy.retry_on {
                        Some(pred) => pred(&err),
                        None => classify(&err).is_retryable(),
                    };
                    if !retryable || attempt >= max_attempts {
                        tracing::warn!(
                            operation = name,
                            attempts = attempt,
                            retryable,
                            error = %err,
                            "giving up on retried operation"
                        );
                        return RetryOutcome {
                            result: Err(err),
                            attempts: attempt,
                            total_duration: started.elapsed(),
                            history,
                        };
                    }

                    let delay = policy.delay_for(attempt);
                    let failed_at = SystemTime::now();
                    tracing::debug!(
                        operation = name,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "attempt failed, backing off"
                    );

                    let slept = match cancel {
                        Some(token) => {
                            tokio::select! {
                                _ = tokio::time::sleep(delay) => true,
                                _ = token.cancelled() => false,
                            }
                        }
                        None => {
                            tokio::time::sleep(delay).await;
                            true
                        }
                    };
                    if !slept {
                        tracing::debug!(operation = name, attempt, "retry cancelled during backoff");
                        return RetryOutcome {
                            result: Err(err),
                            attempts: attempt,
                            total_duration: started.elapsed(),
                            history,
                        };
                    }

                    // The sleep completed, so this attempt was followed by a
                    // retry and belongs in the history.
                    history.push(RetryAttempt {
                        attempt,
                        at: failed_at,
                        error: err.to_string(),
                        delay,
                    });
                    attempt += 1;
                }
            }
        }
    }
}
