//! Global configuration loaded from `~/.config/breakwater/config.toml`.
//!
//! Settings structs are the serde-facing mirror of the core types: plain
//! millisecond fields here, `Duration`s on `CircuitConfig` / `RetryPolicy`.

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::breaker::CircuitConfig;
use crate::retry::{BackoffStrategy, RetryPolicy};

/// Circuit breaker parameters (optional section in config.toml).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerSettings {
    /// Failures since the last CLOSED entry before the circuit can trip.
    pub failure_threshold: u32,
    /// How long the circuit stays open before a trial call, in milliseconds.
    pub recovery_timeout_ms: u64,
    /// Deadline for each guarded call, in milliseconds.
    pub request_timeout_ms: u64,
    /// Width of the failure-rate window, in milliseconds.
    pub monitoring_window_ms: u64,
    /// Outcomes the window must hold before the trip conditions apply.
    pub minimum_requests: u64,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        let cfg = CircuitConfig::default();
        Self {
            failure_threshold: cfg.failure_threshold,
            recovery_timeout_ms: cfg.recovery_timeout.as_millis() as u64,
            request_timeout_ms: cfg.request_timeout.as_millis() as u64,
            monitoring_window_ms: cfg.monitoring_window.as_millis() as u64,
            minimum_requests: cfg.minimum_requests,
        }
    }
}

impl BreakerSettings {
    pub fn to_config(&self) -> CircuitConfig {
        CircuitConfig {
            failure_threshold: self.failure_threshold,
            recovery_timeout: Duration::from_millis(self.recovery_timeout_ms),
            request_timeout: Duration::from_millis(self.request_timeout_ms),
            monitoring_window: Duration::from_millis(self.monitoring_window_ms),
            minimum_requests: self.minimum_requests,
        }
    }
}

/// Retry parameters (optional section in config.toml).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    /// Maximum number of attempts (including the first).
    pub max_attempts: u32,
    /// Backoff strategy: "fixed", "linear", "exponential", or "custom".
    pub strategy: BackoffStrategy,
    /// Base delay before the first retry, in milliseconds.
    pub initial_delay_ms: u64,
    /// Upper bound on the pre-jitter delay, in milliseconds.
    pub max_delay_ms: u64,
    /// Growth factor for the exponential strategy.
    pub delay_multiplier: f64,
    /// Jitter fraction in 0..=1.
    pub jitter_factor: f64,
    /// When false, operations run exactly once.
    pub enabled: bool,
}

impl Default for RetrySettings {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            max_attempts: policy.max_attempts,
            strategy: policy.strategy,
            initial_delay_ms: policy.initial_delay.as_millis() as u64,
            max_delay_ms: policy.max_delay.as_millis() as u64,
            delay_multiplier: policy.delay_multiplier,
            jitter_factor: policy.jitter_factor,
            enabled: policy.enabled,
        }
    }
}

impl RetrySettings {
    /// Build the runtime policy. Predicates and custom backoff functions
    /// cannot come from a config file; callers attach them afterwards.
    pub fn to_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            strategy: self.strategy,
            initial_delay: Duration::from_millis(self.initial_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            delay_multiplier: self.delay_multiplier,
            jitter_factor: self.jitter_factor,
            enabled: self.enabled,
            retry_on: None,
            custom_backoff: None,
        }
    }
}

/// Global configuration for the resilience layer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BreakwaterConfig {
    /// Optional breaker defaults; if missing, built-in defaults are used.
    #[serde(default)]
    pub breaker: Option<BreakerSettings>,
    /// Optional retry defaults; if missing, built-in defaults are used.
    #[serde(default)]
    pub retry: Option<RetrySettings>,
}

impl BreakwaterConfig {
    /// Breaker defaults from this config, falling back to built-ins.
    pub fn circuit_config(&self) -> CircuitConfig {
        self.breaker
            .as_ref()
            .map(|s| s.to_config())
            .unwrap_or_default()
    }

    /// Retry defaults from this config, falling back to built-ins.
    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
            .as_ref()
            .map(|s| s.to_policy())
            .unwrap_or_default()
    }
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("breakwater")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<BreakwaterConfig> {
    let path = config_path()?;
    if !path.exists() {
        let default_cfg = BreakwaterConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml)?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }

    let data = fs::read_to_string(&path)?;
    let cfg: BreakwaterConfig = toml::from_str(&data)?;
    Ok(cfg)
}
