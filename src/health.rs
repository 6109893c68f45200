//! Downstream health probe hook.
//!
//! Not part of the breaker or retry algorithms: a convenience capability
//! that delegates to the guarded dependency's own probe (e.g. a database
//! ping or a cache client's connection check).

/// Health probe supplied by the owner of the downstream dependency.
pub trait HealthProbe: Send + Sync {
    /// True when the underlying dependency currently reports healthy.
    fn is_healthy(&self) -> bool;
}

impl<F> HealthProbe for F
where
    F: Fn() -> bool + Send + Sync,
{
    fn is_healthy(&self) -> bool {
        self()
    }
}
