//! Aggregate outcome of an orchestration run.

use serde::{Serialize, Serializer};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;

use crate::error::Phase;
use crate::metrics::millis;
use crate::testbed::{Testbed, TestbedState};
use crate::testcase::Test;

/// A lifecycle task that did not complete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskFailure {
    /// Testbed display name.
    pub testbed: String,
    /// Phase that failed; `None` when the task panicked.
    pub phase: Option<Phase>,
    /// Failure description including its causes.
    pub reason: String,
}

/// Outcome of a concurrent lifecycle phase.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PhaseReport {
    /// Testbeds whose task completed.
    pub succeeded: Vec<String>,
    /// Testbeds whose task failed or was never launched.
    pub failed: Vec<TaskFailure>,
}

impl PhaseReport {
    /// Returns `true` when no task failed.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Result of one declared test.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TestOutcome {
    /// Every testbed evaluated true.
    Passed,
    /// A testbed evaluated false, or running or evaluating failed.
    Failed {
        /// Why the test failed.
        reason: String,
    },
    /// The test was not run.
    Skipped {
        /// Why the test was not run.
        reason: String,
    },
}

/// Time one test spent on one testbed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TestTiming {
    /// Testbed display name.
    pub testbed: String,
    /// When the driver's `run` was invoked.
    #[serde(serialize_with = "rfc3339")]
    pub started_at: OffsetDateTime,
    /// Run plus evaluation time in milliseconds.
    pub execution_ms: u64,
}

/// Report entry for one test.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TestResult {
    /// Declared id.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Outcome.
    #[serde(flatten)]
    pub outcome: TestOutcome,
    /// Per-testbed timings, empty when the test did not run.
    pub timings: Vec<TestTiming>,
}

impl TestResult {
    /// Builds a result from a test that was run.
    #[must_use]
    pub fn from_test(test: &Test, outcome: TestOutcome) -> Self {
        let timings = test
            .metrics()
            .iter()
            .map(|(testbed, metrics)| TestTiming {
                testbed: testbed.clone(),
                started_at: metrics.started_at,
                execution_ms: millis(metrics.execution_time),
            })
            .collect();
        Self {
            id: test.id().to_owned(),
            name: test.display_name().to_owned(),
            outcome,
            timings,
        }
    }

    /// Returns `true` for [`TestOutcome::Passed`].
    #[must_use]
    pub const fn passed(&self) -> bool {
        matches!(self.outcome, TestOutcome::Passed)
    }
}

/// Lifecycle metrics summary for one testbed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TestbedReport {
    /// Display name.
    pub name: String,
    /// Generated id.
    pub id: String,
    /// Driver variant.
    pub variant: String,
    /// Final lifecycle state.
    pub state: TestbedState,
    /// Creation timestamp.
    #[serde(serialize_with = "optional_rfc3339")]
    pub created_at: Option<OffsetDateTime>,
    /// Removal timestamp.
    #[serde(serialize_with = "optional_rfc3339")]
    pub removed_at: Option<OffsetDateTime>,
    /// Duration of the first start in milliseconds.
    pub start_time_ms: Option<u64>,
    /// Time from creation to removal in milliseconds.
    pub lifetime_ms: Option<u64>,
    /// CPU usage of the first run.
    pub cpu_usage: Option<f64>,
    /// Peak memory usage of the first run.
    pub memory_usage: Option<f64>,
}

impl TestbedReport {
    /// Summarises a testbed's metrics.
    #[must_use]
    pub fn from_testbed(testbed: &Testbed) -> Self {
        let metrics = testbed.metrics();
        let first = metrics.first_run();
        Self {
            name: testbed.name().to_owned(),
            id: testbed.id().map(ToString::to_string).unwrap_or_default(),
            variant: testbed.variant().to_owned(),
            state: testbed.state(),
            created_at: metrics.created_at,
            removed_at: metrics.removed_at,
            start_time_ms: first.map(|run| millis(run.start_time)),
            lifetime_ms: metrics.lifetime().map(millis),
            cpu_usage: first.and_then(|run| run.cpu_usage),
            memory_usage: first.and_then(|run| run.peak_memory_usage),
        }
    }
}

/// Everything a run produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    /// Test results in declaration order.
    pub tests: Vec<TestResult>,
    /// Create and start phase.
    pub provision: PhaseReport,
    /// Stop and remove phase.
    pub teardown: PhaseReport,
    /// Per-testbed metrics in declaration order.
    pub testbeds: Vec<TestbedReport>,
    /// Wall time from the end of the add phase to the end of teardown.
    pub total_time_ms: u64,
}

impl RunReport {
    /// Returns `true` when every test passed and no lifecycle task failed.
    #[must_use]
    pub fn passed(&self) -> bool {
        self.provision.is_clean()
            && self.teardown.is_clean()
            && self.tests.iter().all(TestResult::passed)
    }

    /// Process exit status for the run.
    #[must_use]
    pub fn exit_code(&self) -> u8 {
        u8::from(!self.passed())
    }

    /// Renders the end-of-run summary.
    #[must_use]
    pub fn render_summary(&self) -> String {
        let mut lines = vec![format!("Total Time: {}", self.total_time_ms)];
        for testbed in &self.testbeds {
            lines.extend([
                String::from("----------"),
                format!("Testbed {}", testbed.name),
                format!("\tCreated {}", clock(testbed.created_at)),
                format!("\tRemoved {}", clock(testbed.removed_at)),
                format!("\tStart Time {}", with_unit(testbed.start_time_ms, "ms")),
                format!("\tTotal Time {}", with_unit(testbed.lifetime_ms, "ms")),
                format!("\tCPU Usage {}", percentage(testbed.cpu_usage)),
                format!("\tMemory Usage {}", percentage(testbed.memory_usage)),
                String::from("----------"),
            ]);
        }
        for failure in self.provision.failed.iter().chain(&self.teardown.failed) {
            let phase = failure
                .phase
                .map_or_else(|| String::from("run task for"), |failed| failed.to_string());
            lines.push(format!(
                "Failed to {phase} testbed {}: {}",
                failure.testbed, failure.reason
            ));
        }
        let count = |wanted: fn(&TestOutcome) -> bool| {
            self.tests.iter().filter(|result| wanted(&result.outcome)).count()
        };
        lines.push(format!(
            "Tests: {} passed, {} failed, {} skipped",
            count(|outcome| matches!(outcome, TestOutcome::Passed)),
            count(|outcome| matches!(outcome, TestOutcome::Failed { .. })),
            count(|outcome| matches!(outcome, TestOutcome::Skipped { .. })),
        ));
        let mut summary = lines.join("\n");
        summary.push('\n');
        summary
    }

    /// Serialises the report as pretty-printed JSON.
    ///
    /// # Errors
    ///
    /// Returns the serialisation error.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

fn clock(at: Option<OffsetDateTime>) -> String {
    let format = format_description!("[hour]:[minute]:[second].[subsecond digits:4]");
    at.and_then(|value| value.format(&format).ok())
        .unwrap_or_else(|| String::from("n/a"))
}

fn with_unit(value: Option<u64>, unit: &str) -> String {
    value.map_or_else(|| String::from("n/a"), |amount| format!("{amount}{unit}"))
}

fn percentage(value: Option<f64>) -> String {
    value.map_or_else(|| String::from("n/a"), |amount| format!("{amount:.6} pct"))
}

fn rfc3339<S: Serializer>(value: &OffsetDateTime, serializer: S) -> Result<S::Ok, S::Error> {
    let text = value.format(&Rfc3339).map_err(serde::ser::Error::custom)?;
    serializer.serialize_str(&text)
}

#[expect(
    clippy::ref_option,
    reason = "serde's serialize_with passes a reference to the field"
)]
fn optional_rfc3339<S: Serializer>(
    value: &Option<OffsetDateTime>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match value {
        Some(at) => rfc3339(at, serializer),
        None => serializer.serialize_none(),
    }
}
