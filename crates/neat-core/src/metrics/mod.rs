//! Timing and resource-usage records captured around lifecycle transitions.
//!
//! [`Metrics`] belongs to a testbed and is written only by the lifecycle
//! manager while it holds that testbed's slot. Runs form an append-only
//! sequence; `stop` finalizes the most recent unfinished run and derives CPU
//! and memory usage from the driver's resource snapshots.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Cumulative resource counters sampled from a running environment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceSnapshot {
    /// Total CPU time consumed by the environment, in driver units.
    pub container_cpu_total: u64,
    /// Total CPU time consumed by the host, in the same units.
    pub system_cpu_total: u64,
    /// Number of CPUs available to the environment.
    pub online_cpus: u32,
    /// Peak memory usage in bytes.
    pub peak_memory_bytes: u64,
    /// Memory limit in bytes.
    pub memory_limit_bytes: u64,
}

/// Derives CPU usage between two snapshots as a percentage.
///
/// Returns `None` when either counter went backwards or the host counter did
/// not advance.
#[must_use]
#[expect(
    clippy::float_arithmetic,
    clippy::cast_precision_loss,
    reason = "usage percentages are reported as floating point"
)]
pub fn cpu_percent(before: &ResourceSnapshot, after: &ResourceSnapshot) -> Option<f64> {
    let container_delta = after
        .container_cpu_total
        .checked_sub(before.container_cpu_total)?;
    let system_delta = after.system_cpu_total.checked_sub(before.system_cpu_total)?;
    if system_delta == 0 {
        return None;
    }
    let ratio = container_delta as f64 / system_delta as f64;
    Some(ratio * f64::from(after.online_cpus) * 100.0)
}

/// Derives peak memory usage as a percentage of the limit.
///
/// Returns `None` when no limit is reported.
#[must_use]
#[expect(
    clippy::float_arithmetic,
    clippy::cast_precision_loss,
    reason = "usage percentages are reported as floating point"
)]
pub fn memory_percent(snapshot: &ResourceSnapshot) -> Option<f64> {
    if snapshot.memory_limit_bytes == 0 {
        return None;
    }
    Some(snapshot.peak_memory_bytes as f64 / snapshot.memory_limit_bytes as f64 * 100.0)
}

/// One start/stop cycle of a testbed.
#[derive(Debug, Clone, PartialEq)]
pub struct RunMetrics {
    /// When the driver was asked to start.
    pub started_at: OffsetDateTime,
    /// How long the driver's `start` took.
    pub start_time: Duration,
    /// When the driver was asked to stop; `None` while the run is active.
    pub stopped_at: Option<OffsetDateTime>,
    /// How long the driver's `stop` took.
    pub stop_time: Option<Duration>,
    /// CPU usage over the run, when both snapshots were available.
    pub cpu_usage: Option<f64>,
    /// Peak memory usage as a percentage of the limit.
    pub peak_memory_usage: Option<f64>,
    start_snapshot: Option<ResourceSnapshot>,
}

impl RunMetrics {
    /// Returns `true` until the run has been stopped.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.stopped_at.is_none()
    }
}

/// Error returned by [`Metrics::finish_run`] when no run is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("no active run to finish")]
pub struct NoActiveRun;

/// Lifecycle metrics for one testbed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Metrics {
    /// When the driver was asked to create the environment.
    pub created_at: Option<OffsetDateTime>,
    /// How long the driver's `create` took.
    pub creation_time: Option<Duration>,
    /// When the driver was asked to remove the environment.
    pub removed_at: Option<OffsetDateTime>,
    /// How long the driver's `remove` took.
    pub remove_time: Option<Duration>,
    runs: Vec<RunMetrics>,
}

impl Metrics {
    /// Records a completed `create`.
    pub const fn record_creation(&mut self, at: OffsetDateTime, elapsed: Duration) {
        self.created_at = Some(at);
        self.creation_time = Some(elapsed);
    }

    /// Records a completed `remove`.
    pub const fn record_removal(&mut self, at: OffsetDateTime, elapsed: Duration) {
        self.removed_at = Some(at);
        self.remove_time = Some(elapsed);
    }

    /// Appends a new active run.
    pub fn begin_run(
        &mut self,
        at: OffsetDateTime,
        elapsed: Duration,
        snapshot: Option<ResourceSnapshot>,
    ) {
        self.runs.push(RunMetrics {
            started_at: at,
            start_time: elapsed,
            stopped_at: None,
            stop_time: None,
            cpu_usage: None,
            peak_memory_usage: None,
            start_snapshot: snapshot,
        });
    }

    /// Finalizes the most recent run.
    ///
    /// # Errors
    ///
    /// Returns [`NoActiveRun`] when no run was begun or the latest one is
    /// already finished.
    pub fn finish_run(
        &mut self,
        at: OffsetDateTime,
        elapsed: Duration,
        snapshot: Option<ResourceSnapshot>,
    ) -> Result<(), NoActiveRun> {
        let run = self
            .runs
            .last_mut()
            .filter(|run| run.is_active())
            .ok_or(NoActiveRun)?;
        run.stopped_at = Some(at);
        run.stop_time = Some(elapsed);
        if let Some(after) = snapshot {
            run.cpu_usage = run
                .start_snapshot
                .as_ref()
                .and_then(|before| cpu_percent(before, &after));
            run.peak_memory_usage = memory_percent(&after);
        }
        Ok(())
    }

    /// Returns the most recent run if it has not been stopped.
    #[must_use]
    pub fn active_run(&self) -> Option<&RunMetrics> {
        self.runs.last().filter(|run| run.is_active())
    }

    /// Returns every recorded run in start order.
    #[must_use]
    pub fn runs(&self) -> &[RunMetrics] {
        &self.runs
    }

    /// Returns the first recorded run.
    #[must_use]
    pub fn first_run(&self) -> Option<&RunMetrics> {
        self.runs.first()
    }

    /// Time between creation and removal.
    ///
    /// Returns `None` unless both are recorded and removal came later.
    #[must_use]
    pub fn lifetime(&self) -> Option<Duration> {
        let created = self.created_at?;
        let removed = self.removed_at?;
        Duration::try_from(removed - created).ok()
    }
}

/// Whole milliseconds in `duration`, saturating.
#[must_use]
pub fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Timing of one test on one testbed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TestMetrics {
    /// When the driver's `run` was invoked.
    pub started_at: OffsetDateTime,
    /// Time spent in `run` and evaluation.
    pub execution_time: Duration,
}
