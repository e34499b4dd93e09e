//! Bounded readiness polling and cooperative cancellation.
//!
//! Drivers that must wait for an environment to come up poll a probe through
//! [`RetryPolicy::poll`]. Polling stops when the probe reports ready, when the
//! attempt budget or deadline is spent, or when the run's
//! [`CancellationToken`] is asserted. Sleeps are sliced so cancellation is
//! observed promptly.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::debug;

use crate::driver::DriverError;
use crate::metrics::millis;

const READINESS_TARGET: &str = "neat_core::readiness";
const SLEEP_SLICE: Duration = Duration::from_millis(25);

/// Shared flag asserted to stop long-running work.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    /// Creates an unasserted token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps an existing flag, such as one set by a signal handler.
    #[must_use]
    pub const fn from_flag(flag: Arc<AtomicBool>) -> Self {
        Self(flag)
    }

    /// Returns the underlying flag.
    #[must_use]
    pub fn flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.0)
    }

    /// Asserts the token.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Returns `true` once the token has been asserted.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Sleeps for `duration` unless cancelled first.
    ///
    /// Returns `false` when the sleep was cut short by cancellation.
    #[must_use]
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if self.is_cancelled() {
                return false;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return true;
            }
            thread::sleep(remaining.min(SLEEP_SLICE));
        }
    }
}

/// Reasons polling ended without the probe reporting ready.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReadinessError {
    /// The cancellation token was asserted.
    #[error("readiness polling cancelled")]
    Cancelled,

    /// The deadline passed.
    #[error("not ready after {elapsed_ms}ms")]
    TimedOut {
        /// Time spent polling.
        elapsed_ms: u64,
    },

    /// Every attempt reported not ready.
    #[error("not ready after {attempts} attempts{}", last_error_suffix(.last_error.as_deref()))]
    Exhausted {
        /// Attempts made.
        attempts: u32,
        /// Message of the last failed probe, if it failed rather than
        /// reporting not ready.
        last_error: Option<String>,
    },
}

impl From<ReadinessError> for DriverError {
    fn from(error: ReadinessError) -> Self {
        Self::with_source("readiness check failed", error)
    }
}

/// Retry budget and backoff for readiness probes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    initial_backoff: Duration,
    max_backoff: Duration,
    timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 30,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(5),
            timeout: Duration::from_secs(120),
        }
    }
}

impl RetryPolicy {
    /// Sets the attempt budget; zero is treated as one.
    #[must_use]
    pub const fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Sets the delay after the first failed attempt.
    #[must_use]
    pub const fn with_initial_backoff(mut self, backoff: Duration) -> Self {
        self.initial_backoff = backoff;
        self
    }

    /// Caps the delay between attempts.
    #[must_use]
    pub const fn with_max_backoff(mut self, backoff: Duration) -> Self {
        self.max_backoff = backoff;
        self
    }

    /// Sets the overall deadline.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Attempt budget.
    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Overall deadline.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Delay after the `retry`-th failed attempt, counting from zero.
    #[must_use]
    pub fn backoff_for(&self, retry: u32) -> Duration {
        2_u32
            .checked_pow(retry)
            .and_then(|factor| self.initial_backoff.checked_mul(factor))
            .map_or(self.max_backoff, |delay| delay.min(self.max_backoff))
    }

    /// Polls `probe` until it reports ready.
    ///
    /// A probe error counts as "not ready"; its message is kept for the
    /// [`ReadinessError::Exhausted`] report.
    ///
    /// # Errors
    ///
    /// Returns [`ReadinessError`] when polling is cancelled, times out or
    /// exhausts its attempts.
    pub fn poll<F>(&self, cancel: &CancellationToken, mut probe: F) -> Result<u32, ReadinessError>
    where
        F: FnMut() -> Result<bool, DriverError>,
    {
        let started = Instant::now();
        let deadline = started + self.timeout;
        let attempts = self.max_attempts.max(1);
        let mut last_error = None;

        for attempt in 1..=attempts {
            if cancel.is_cancelled() {
                return Err(ReadinessError::Cancelled);
            }
            match probe() {
                Ok(true) => {
                    debug!(target: READINESS_TARGET, attempt, "ready");
                    return Ok(attempt);
                }
                Ok(false) => last_error = None,
                Err(err) => {
                    debug!(
                        target: READINESS_TARGET,
                        attempt,
                        error = %err,
                        "readiness probe failed"
                    );
                    last_error = Some(err.to_string());
                }
            }
            if cancel.is_cancelled() {
                return Err(ReadinessError::Cancelled);
            }
            if attempt == attempts {
                break;
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(timed_out(started));
            }
            if !cancel.sleep(self.backoff_for(attempt - 1).min(remaining)) {
                return Err(ReadinessError::Cancelled);
            }
            if Instant::now() >= deadline {
                return Err(timed_out(started));
            }
        }

        Err(ReadinessError::Exhausted {
            attempts,
            last_error,
        })
    }
}

fn last_error_suffix(last_error: Option<&str>) -> String {
    last_error.map(|err| format!(": {err}")).unwrap_or_default()
}

fn timed_out(started: Instant) -> ReadinessError {
    ReadinessError::TimedOut {
        elapsed_ms: millis(started.elapsed()),
    }
}

#[cfg(test)]
mod tests;
