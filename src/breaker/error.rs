//! Errors surfaced by guarded execution.

use std::time::Duration;

use thiserror::Error;

/// Error from [`crate::breaker::CircuitBreaker::execute`]. Generic over the
/// downstream operation's error type so callers keep typed access to it.
#[derive(Debug, Error)]
pub enum BreakerError<E> {
    /// The circuit is open; the call was rejected without invoking the
    /// operation.
    #[error("circuit '{0}' is open")]
    CircuitOpen(String),
    /// The operation ran past the configured request timeout. Counted as a
    /// failure.
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),
    /// The caller cancelled the in-flight call. Recorded as neither success
    /// nor failure.
    #[error("operation aborted by caller")]
    Aborted,
    /// The guarded operation itself failed.
    #[error("operation failed: {0}")]
    Operation(E),
}

impl<E> BreakerError<E> {
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, BreakerError::CircuitOpen(_))
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, BreakerError::Timeout(_))
    }

    /// The downstream error, when this is an operation failure.
    pub fn into_operation(self) -> Option<E> {
        match self {
            BreakerError::Operation(e) => Some(e),
            _ => None,
        }
    }
}
