//! Classify errors into retry policy error kinds.
//!
//! The message-based heuristic here is a fallback only: it matches substrings
//! of the rendered error and is fragile against wording changes. Callers
//! should supply a `retry_on` predicate on the policy whenever they can tag
//! errors at the throw site.

use std::fmt;

/// High-level classification of an error for retry purposes.
///
/// This intentionally stays generic; callers can map driver errors, IO
/// failures, or cache client errors into these kinds via a predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Operation timed out (connect/read/deadline).
    Timeout,
    /// Network-level failure (connection refused/reset, DNS, etc.).
    Connection,
    /// Database connection or pool failure.
    Database,
    /// Cache or transport-layer failure (e.g. redis, broken pipe).
    Cache,
    /// Any other error (not retried).
    Other,
}

impl ErrorKind {
    /// Whether errors of this kind are worth retrying.
    pub fn is_retryable(self) -> bool {
        !matches!(self, ErrorKind::Other)
    }
}

/// Classify a rendered error message for retry decisions.
pub fn classify_message(message: &str) -> ErrorKind {
    let msg = message.to_ascii_lowercase();
    if msg.contains("timeout") || msg.contains("timed out") || msg.contains("deadline") {
        return ErrorKind::Timeout;
    }
    if msg.contains("database") && (msg.contains("connection") || msg.contains("pool")) {
        return ErrorKind::Database;
    }
    if msg.contains("cache") || msg.contains("redis") {
        return ErrorKind::Cache;
    }
    if msg.contains("connect")
        || msg.contains("connection reset")
        || msg.contains("connection closed")
        || msg.contains("broken pipe")
        || msg.contains("unreachable")
        || msg.contains("dns")
    {
        return ErrorKind::Connection;
    }
    ErrorKind::Other
}

/// Classify an error value by its `Display` output.
pub fn classify<E: fmt::Display + ?Sized>(error: &E) -> ErrorKind {
    classify_message(&error.to_string())
}
