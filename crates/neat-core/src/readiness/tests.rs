//! Unit tests for readiness polling.

use std::cell::Cell;
use std::time::{Duration, Instant};

use rstest::{fixture, rstest};

use super::*;

#[fixture]
fn fast() -> RetryPolicy {
    RetryPolicy::default()
        .with_max_attempts(5)
        .with_initial_backoff(Duration::from_millis(1))
        .with_max_backoff(Duration::from_millis(4))
        .with_timeout(Duration::from_secs(5))
}

// ---------------------------------------------------------------------------
// Backoff
// ---------------------------------------------------------------------------

#[rstest]
#[case(0, 1)]
#[case(1, 2)]
#[case(2, 4)]
#[case(3, 4)]
#[case(40, 4)]
fn backoff_doubles_until_capped(fast: RetryPolicy, #[case] retry: u32, #[case] millis: u64) {
    assert_eq!(fast.backoff_for(retry), Duration::from_millis(millis));
}

// ---------------------------------------------------------------------------
// Polling outcomes
// ---------------------------------------------------------------------------

#[rstest]
fn poll_reports_attempts_until_ready(fast: RetryPolicy) {
    let calls = Cell::new(0_u32);
    let attempts = fast
        .poll(&CancellationToken::new(), || {
            calls.set(calls.get() + 1);
            Ok(calls.get() == 3)
        })
        .expect("ready");
    assert_eq!(attempts, 3);
}

#[rstest]
fn poll_exhausts_budget_and_keeps_last_error(fast: RetryPolicy) {
    let error = fast
        .poll(&CancellationToken::new(), || {
            Err(DriverError::new("connection refused"))
        })
        .expect_err("exhausted");
    assert_eq!(
        error,
        ReadinessError::Exhausted {
            attempts: 5,
            last_error: Some(String::from("connection refused")),
        }
    );
}

#[test]
fn poll_stops_at_deadline() {
    let policy = RetryPolicy::default()
        .with_max_attempts(1_000)
        .with_initial_backoff(Duration::from_millis(20))
        .with_max_backoff(Duration::from_millis(20))
        .with_timeout(Duration::from_millis(100));
    let started = Instant::now();
    let error = policy
        .poll(&CancellationToken::new(), || Ok(false))
        .expect_err("timed out");
    assert!(matches!(error, ReadinessError::TimedOut { .. }), "{error}");
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[rstest]
fn poll_observes_cancellation_before_probing(fast: RetryPolicy) {
    let token = CancellationToken::new();
    token.cancel();
    let probed = Cell::new(false);
    let error = fast
        .poll(&token, || {
            probed.set(true);
            Ok(true)
        })
        .expect_err("cancelled");
    assert_eq!(error, ReadinessError::Cancelled);
    assert!(!probed.get());
}

#[test]
fn poll_observes_cancellation_during_backoff() {
    let policy = RetryPolicy::default()
        .with_max_attempts(10)
        .with_initial_backoff(Duration::from_secs(30))
        .with_max_backoff(Duration::from_secs(30))
        .with_timeout(Duration::from_secs(60));
    let token = CancellationToken::new();
    let trigger = token.clone();
    let started = Instant::now();
    let error = policy
        .poll(&token, || {
            trigger.cancel();
            Ok(false)
        })
        .expect_err("cancelled");
    assert_eq!(error, ReadinessError::Cancelled);
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[test]
fn cancellation_during_the_last_attempt_is_not_exhaustion() {
    let policy = RetryPolicy::default().with_max_attempts(1);
    let token = CancellationToken::new();
    let trigger = token.clone();
    let error = policy
        .poll(&token, || {
            trigger.cancel();
            Err(DriverError::new("probe killed"))
        })
        .expect_err("cancelled");
    assert_eq!(error, ReadinessError::Cancelled);
}

#[test]
fn zero_attempt_budget_still_probes_once() {
    let policy = RetryPolicy::default().with_max_attempts(0);
    let attempts = policy
        .poll(&CancellationToken::new(), || Ok(true))
        .expect("ready");
    assert_eq!(attempts, 1);
}

#[test]
fn token_sleep_reports_interruption() {
    let token = CancellationToken::new();
    assert!(token.sleep(Duration::from_millis(5)));
    token.cancel();
    assert!(!token.sleep(Duration::from_secs(10)));
}

#[test]
fn readiness_errors_convert_into_driver_errors() {
    let error: DriverError = ReadinessError::Cancelled.into();
    assert_eq!(error.message(), "readiness check failed");
}
