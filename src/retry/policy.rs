//! Retry policy: attempt bounds, backoff strategy, jitter.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Caller-supplied retry classification. Receives the error from a failed
/// attempt; returns true when the attempt should be retried. Callers can
/// downcast to their own error type to read a tagged kind.
pub type RetryPredicate = Arc<dyn Fn(&(dyn std::error::Error + 'static)) -> bool + Send + Sync>;

/// Caller-supplied backoff for [`BackoffStrategy::Custom`]: maps the 1-based
/// attempt number and the initial delay to the pre-jitter delay.
pub type BackoffFn = Arc<dyn Fn(u32, Duration) -> Duration + Send + Sync>;

/// Delay growth between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffStrategy {
    /// Same delay before every retry.
    Fixed,
    /// Delay grows linearly with the attempt number.
    Linear,
    /// Delay grows by `delay_multiplier` per attempt.
    #[default]
    Exponential,
    /// Delay computed by `custom_backoff`; behaves as Linear when no
    /// function is supplied.
    Custom,
}

/// Retry policy for one operation name (or the orchestrator default).
#[derive(Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the first). Values below 1 are
    /// treated as 1.
    pub max_attempts: u32,
    pub strategy: BackoffStrategy,
    /// Base delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound on the pre-jitter delay.
    pub max_delay: Duration,
    /// Growth factor for [`BackoffStrategy::Exponential`]. Values below 1.0
    /// are treated as 1.0.
    pub delay_multiplier: f64,
    /// Jitter fraction in 0..=1, added on top of the clamped delay.
    pub jitter_factor: f64,
    /// When false, the operation is invoked exactly once and never slept on.
    pub enabled: bool,
    /// Classification predicate; when absent, the message heuristic in
    /// [`crate::retry::classify`] decides.
    pub retry_on: Option<RetryPredicate>,
    /// Backoff function for [`BackoffStrategy::Custom`].
    pub custom_backoff: Option<BackoffFn>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            strategy: BackoffStrategy::Exponential,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            delay_multiplier: 2.0,
            jitter_factor: 0.1,
            enabled: true,
            retry_on: None,
            custom_backoff: None,
        }
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("strategy", &self.strategy)
            .field("initial_delay", &self.initial_delay)
            .field("max_delay", &self.max_delay)
            .field("delay_multiplier", &self.delay_multiplier)
            .field("jitter_factor", &self.jitter_factor)
            .field("enabled", &self.enabled)
            .field("retry_on", &self.retry_on.as_ref().map(|_| "<predicate>"))
            .field("custom_backoff", &self.custom_backoff.as_ref().map(|_| "<fn>"))
            .finish()
    }
}

impl RetryPolicy {
    /// Pre-jitter delay for the given 1-based attempt, clamped to `max_delay`.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        let raw = match self.strategy {
            BackoffStrategy::Fixed => self.initial_delay,
            BackoffStrategy::Linear => self.initial_delay.saturating_mul(attempt),
            BackoffStrategy::Exponential => {
                let factor = self
                    .delay_multiplier
                    .max(1.0)
                    .powi(attempt.saturating_sub(1).min(63) as i32);
                let secs = (self.initial_delay.as_secs_f64() * factor)
                    .min(self.max_delay.as_secs_f64());
                return Duration::from_secs_f64(secs.max(0.0));
            }
            BackoffStrategy::Custom => match &self.custom_backoff {
                Some(f) => f(attempt, self.initial_delay),
                None => self.initial_delay.saturating_mul(attempt),
            },
        };
        raw.min(self.max_delay)
    }

    /// Delay actually slept before the next attempt: `base_delay` plus
    /// `base * jitter_factor * random(0..1)`. Jitter is added after the
    /// clamp, so the result can exceed `max_delay` by up to
    /// `jitter_factor * max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        let jitter = self.jitter_factor.clamp(0.0, 1.0);
        if jitter <= 0.0 {
            return base;
        }
        base + base.mul_f64(jitter * fastrand::f64())
    }
}

/// Partial policy override, merged field-wise over a base policy.
/// Used both for per-call overrides and for layering a named policy over
/// the orchestrator default.
#[derive(Clone, Default)]
pub struct RetryPolicyPatch {
    pub max_attempts: Option<u32>,
    pub strategy: Option<BackoffStrategy>,
    pub initial_delay: Option<Duration>,
    pub max_delay: Option<Duration>,
    pub delay_multiplier: Option<f64>,
    pub jitter_factor: Option<f64>,
    pub enabled: Option<bool>,
    pub retry_on: Option<RetryPredicate>,
    pub custom_backoff: Option<BackoffFn>,
}

impl RetryPolicyPatch {
    /// Apply this patch over `base`, keeping base values where the patch is
    /// unset.
    pub fn apply(&self, base: RetryPolicy) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.unwrap_or(base.max_attempts),
            strategy: self.strategy.unwrap_or(base.strategy),
            initial_delay: self.initial_delay.unwrap_or(base.initial_delay),
            max_delay: self.max_delay.unwrap_or(base.max_delay),
            delay_multiplier: self.delay_multiplier.unwrap_or(base.delay_multiplier),
            jitter_factor: self.jitter_factor.unwrap_or(base.jitter_factor),
            enabled: self.enabled.unwrap_or(base.enabled),
            retry_on: self.retry_on.clone().or(base.retry_on),
            custom_backoff: self.custom_backoff.clone().or(base.custom_backoff),
        }
    }
}

impl fmt::Debug for RetryPolicyPatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicyPatch")
            .field("max_attempts", &self.max_attempts)
            .field("strategy", &self.strategy)
            .field("initial_delay", &self.initial_delay)
            .field("max_delay", &self.max_delay)
            .field("delay_multiplier", &self.delay_multiplier)
            .field("jitter_factor", &self.jitter_factor)
            .field("enabled", &self.enabled)
            .field("retry_on", &self.retry_on.as_ref().map(|_| "<predicate>"))
            .field("custom_backoff", &self.custom_backoff.as_ref().map(|_| "<fn>"))
            .finish()
    }
}
