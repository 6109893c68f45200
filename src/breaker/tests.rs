//! Tests for the circuit state machine and guarded execution.

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;

use crate::control::CancelToken;

use super::{BreakerError, CircuitBreaker, CircuitConfig, CircuitConfigPatch, CircuitState};

#[derive(Debug)]
struct FakeError(&'static str);

impl fmt::Display for FakeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for FakeError {}

fn small_circuit() -> CircuitConfig {
    CircuitConfig {
        failure_threshold: 3,
        recovery_timeout: Duration::from_millis(1000),
        request_timeout: Duration::from_secs(5),
        monitoring_window: Duration::from_secs(60),
        minimum_requests: 3,
    }
}

async fn fail_once(breaker: &CircuitBreaker, name: &str) {
    let err = breaker
        .execute(name, || async { Err::<(), _>(FakeError("connection reset by peer")) })
        .await
        .unwrap_err();
    assert!(matches!(err, BreakerError::Operation(_)));
}

#[tokio::test]
async fn success_passes_through_and_updates_stats() {
    let breaker = CircuitBreaker::new();
    let value = breaker
        .execute("db", || async { Ok::<_, FakeError>(7) })
        .await
        .unwrap();
    assert_eq!(value, 7);
    assert_eq!(breaker.state("db"), Some(CircuitState::Closed));

    let stats = breaker.stats("db").unwrap();
    assert_eq!(stats.total_requests, 1);
    assert_eq!(stats.successful_requests, 1);
    assert!((stats.success_rate() - 1.0).abs() < 1e-9);
}

#[tokio::test]
async fn opens_after_threshold_and_rejects_without_invoking() {
    let breaker = CircuitBreaker::with_defaults(small_circuit());
    let invocations = Arc::new(AtomicU32::new(0));

    for _ in 0..3 {
        let invocations = Arc::clone(&invocations);
        let err = breaker
            .execute("db", move || async move {
                invocations.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(FakeError("connection reset by peer"))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, BreakerError::Operation(_)));
    }
    assert_eq!(breaker.state("db"), Some(CircuitState::Open));
    assert_eq!(invocations.load(Ordering::SeqCst), 3);

    let rejected = Arc::clone(&invocations);
    let err = breaker
        .execute("db", move || async move {
            rejected.fetch_add(1, Ordering::SeqCst);
            Ok::<_, FakeError>(())
        })
        .await
        .unwrap_err();
    assert!(err.is_circuit_open());
    assert_eq!(invocations.load(Ordering::SeqCst), 3, "open circuit must not invoke");

    let stats = breaker.stats("db").unwrap();
    assert_eq!(stats.total_requests, 3);
    assert_eq!(stats.failed_requests, 3);
    assert_eq!(stats.rejected_requests, 1);
    assert_eq!(stats.circuit_break_count, 1);
}

#[tokio::test(start_paused = true)]
async fn stays_open_until_recovery_elapses() {
    let breaker = CircuitBreaker::with_defaults(small_circuit());
    for _ in 0..3 {
        fail_once(&breaker, "db").await;
    }
    assert_eq!(breaker.state("db"), Some(CircuitState::Open));

    tokio::time::sleep(Duration::from_millis(500)).await;
    let invoked = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&invoked);
    let err = breaker
        .execute("db", move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok::<_, FakeError>(())
        })
        .await
        .unwrap_err();
    assert!(err.is_circuit_open());
    assert_eq!(invoked.load(Ordering::SeqCst), 0);

    tokio::time::sleep(Duration::from_millis(600)).await;
    let counter = Arc::clone(&invoked);
    breaker
        .execute("db", move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok::<_, FakeError>(())
        })
        .await
        .unwrap();
    assert_eq!(invoked.load(Ordering::SeqCst), 1, "trial call runs after recovery");
    assert_eq!(breaker.state("db"), Some(CircuitState::Closed));
}

#[tokio::test(start_paused = true)]
async fn half_open_trial_failure_reopens() {
    let breaker = CircuitBreaker::with_defaults(small_circuit());
    for _ in 0..3 {
        fail_once(&breaker, "db").await;
    }
    tokio::time::sleep(Duration::from_millis(1100)).await;

    fail_once(&breaker, "db").await;
    assert_eq!(breaker.state("db"), Some(CircuitState::Open));
    assert_eq!(breaker.stats("db").unwrap().circuit_break_count, 2);

    // The recovery clock restarts from the failed trial.
    let err = breaker
        .execute("db", || async { Ok::<_, FakeError>(()) })
        .await
        .unwrap_err();
    assert!(err.is_circuit_open());

    tokio::time::sleep(Duration::from_millis(1100)).await;
    breaker
        .execute("db", || async { Ok::<_, FakeError>(()) })
        .await
        .unwrap();
    assert_eq!(breaker.state("db"), Some(CircuitState::Closed));
}

#[tokio::test(start_paused = true)]
async fn only_one_trial_call_in_half_open() {
    let breaker = Arc::new(CircuitBreaker::with_defaults(small_circuit()));
    for _ in 0..3 {
        fail_once(&breaker, "db").await;
    }
    tokio::time::sleep(Duration::from_millis(1100)).await;

    let (tx, rx) = oneshot::channel::<()>();
    let b = Arc::clone(&breaker);
    let trial = tokio::spawn(async move {
        b.execute("db", move || async move {
            rx.await.ok();
            Ok::<_, FakeError>(1)
        })
        .await
    });
    tokio::task::yield_now().await;
    tokio::task::yield_now().await;

    assert_eq!(breaker.state("db"), Some(CircuitState::HalfOpen));
    let err = breaker
        .execute("db", || async { Ok::<_, FakeError>(2) })
        .await
        .unwrap_err();
    assert!(err.is_circuit_open(), "second call during trial is rejected");

    tx.send(()).unwrap();
    let value = trial.await.unwrap().unwrap();
    assert_eq!(value, 1);
    assert_eq!(breaker.state("db"), Some(CircuitState::Closed));
}

#[tokio::test]
async fn reset_is_idempotent() {
    let breaker = CircuitBreaker::with_defaults(small_circuit());
    for _ in 0..3 {
        fail_once(&breaker, "db").await;
    }
    assert_eq!(breaker.state("db"), Some(CircuitState::Open));

    breaker.reset("db");
    assert_eq!(breaker.state("db"), Some(CircuitState::Closed));
    let stats = breaker.stats("db").unwrap();
    assert_eq!(stats.total_requests, 0);
    assert_eq!(stats.circuit_break_count, 0);

    breaker.reset("db");
    assert_eq!(breaker.state("db"), Some(CircuitState::Closed));
    assert_eq!(breaker.stats("db").unwrap().total_requests, 0);

    // Resetting a never-used circuit just creates it closed.
    breaker.reset("other");
    assert_eq!(breaker.state("other"), Some(CircuitState::Closed));
}

#[tokio::test(start_paused = true)]
async fn timeout_counts_as_failure() {
    let breaker = CircuitBreaker::with_defaults(CircuitConfig {
        request_timeout: Duration::from_millis(10),
        ..small_circuit()
    });
    let err = breaker
        .execute("db", || async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok::<_, FakeError>(())
        })
        .await
        .unwrap_err();
    assert!(err.is_timeout());

    let stats = breaker.stats("db").unwrap();
    assert_eq!(stats.total_requests, 1);
    assert_eq!(stats.failed_requests, 1);
}

#[tokio::test]
async fn failure_ratio_trips_once_minimum_reached() {
    let breaker = CircuitBreaker::with_defaults(CircuitConfig {
        failure_threshold: 100,
        minimum_requests: 4,
        ..small_circuit()
    });
    for _ in 0..2 {
        breaker
            .execute("db", || async { Ok::<_, FakeError>(()) })
            .await
            .unwrap();
    }
    for _ in 0..3 {
        fail_once(&breaker, "db").await;
    }
    assert_eq!(breaker.state("db"), Some(CircuitState::Open));
}

#[tokio::test]
async fn manual_open_and_close() {
    let breaker = CircuitBreaker::new();
    breaker.force_open("db");
    assert_eq!(breaker.state("db"), Some(CircuitState::Open));
    let err = breaker
        .execute("db", || async { Ok::<_, FakeError>(()) })
        .await
        .unwrap_err();
    assert!(err.is_circuit_open());

    breaker.force_close("db");
    assert_eq!(breaker.state("db"), Some(CircuitState::Closed));
    breaker
        .execute("db", || async { Ok::<_, FakeError>(()) })
        .await
        .unwrap();
}

#[tokio::test]
async fn per_call_patch_does_not_persist_but_set_config_does() {
    let breaker = CircuitBreaker::new();
    let patch = CircuitConfigPatch {
        failure_threshold: Some(1),
        minimum_requests: Some(1),
        ..CircuitConfigPatch::default()
    };
    let _ = breaker
        .execute_with(
            "db",
            || async { Err::<(), _>(FakeError("connection reset by peer")) },
            Some(&patch),
            None,
        )
        .await;
    assert_eq!(breaker.state("db"), Some(CircuitState::Open));
    assert_eq!(breaker.config("db").unwrap(), CircuitConfig::default());

    breaker.set_config("db", &patch);
    let stored = breaker.config("db").unwrap();
    assert_eq!(stored.failure_threshold, 1);
    assert_eq!(stored.minimum_requests, 1);
}

#[tokio::test]
async fn remove_circuit_clears_state() {
    let breaker = CircuitBreaker::new();
    breaker
        .execute("db", || async { Ok::<_, FakeError>(()) })
        .await
        .unwrap();
    assert!(breaker.remove_circuit("db"));
    assert!(breaker.state("db").is_none());
    assert!(breaker.stats("db").is_none());
    assert!(!breaker.remove_circuit("db"));
}

#[tokio::test]
async fn cancelled_call_aborts_without_recording() {
    let breaker = Arc::new(CircuitBreaker::new());
    let token = CancelToken::new();
    let cancel = token.clone();
    let (_tx, rx) = oneshot::channel::<()>();

    let b = Arc::clone(&breaker);
    let task = tokio::spawn(async move {
        b.execute_with(
            "db",
            move || async move {
                rx.await.ok();
                Ok::<_, FakeError>(())
            },
            None,
            Some(&cancel),
        )
        .await
    });
    tokio::task::yield_now().await;

    token.cancel();
    let err = task.await.unwrap().unwrap_err();
    assert!(matches!(err, BreakerError::Aborted));
    assert_eq!(breaker.stats("db").unwrap().total_requests, 0);
}
