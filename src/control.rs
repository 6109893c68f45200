//! Caller-side cancellation for guarded calls.
//!
//! A `CancelToken` is handed to `execute_with` / `execute_with_retry_with`
//! so the owner of a call can abort early: the breaker stops racing the
//! in-flight operation and the retry loop wakes out of its backoff sleep
//! instead of sleeping it through.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

/// Clonable cancellation token. All clones observe the same state; `cancel`
/// is sticky (there is no un-cancel).
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation and wake any waits racing against this token.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Completes once `cancel` has been called. Interest is registered
    /// before the flag is re-checked so a concurrent `cancel` cannot be
    /// missed.
    pub async fn cancelled(&self) {
        if self.is_cancelled() {
            return;
        }
        let notified = self.inner.notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        if self.is_cancelled() {
            return;
        }
        notified.await;
    }
}
