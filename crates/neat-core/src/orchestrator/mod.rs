//! Batch orchestration of a compose document.
//!
//! A run has five phases:
//!
//! 1. **Add**: every testbed is validated and registered in order. The first
//!    failure aborts the run; nothing has been created yet.
//! 2. **Provision**: one thread per testbed runs `create` then `start`.
//!    Launches are staggered and stop once the run is cancelled.
//! 3. **Test**: tests run one at a time in declaration order. A test is
//!    skipped when one of its testbeds is not started or when it fails
//!    validation; the others still run.
//! 4. **Teardown**: one thread per testbed stops it if it is started and
//!    removes it if it exists, even when the stop failed. Teardown ignores
//!    cancellation.
//! 5. **Report**: the summary is printed and a [`RunReport`] returned.

mod phase;
mod report;

use std::io::Write;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use self::phase::{Member, Pacing, TaskError, fan_out};
use crate::compose::{Compose, TestSpec};
use crate::console::{Console, ProgressEvent};
use crate::error::{NeatError, Phase, error_chain};
use crate::hook::HookLauncher;
use crate::metrics::millis;
use crate::readiness::CancellationToken;
use crate::registry::{TestVariants, TestbedVariants};
use crate::testbed::{TestbedRegistry, TestbedState};
use crate::testcase::TestEngine;

pub use self::report::{
    PhaseReport, RunReport, TaskFailure, TestOutcome, TestResult, TestTiming, TestbedReport,
};

const ORCHESTRATOR_TARGET: &str = "neat_core::orchestrator";

/// Tunables for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrchestratorSettings {
    /// Delay between task launches in fan-out phases.
    pub stagger: Duration,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            stagger: Duration::from_millis(100),
        }
    }
}

/// Sequences the phases of a batch run.
pub struct Orchestrator<'env, W> {
    testbed_variants: &'env TestbedVariants,
    test_variants: &'env TestVariants,
    hooks: &'env dyn HookLauncher,
    console: &'env Console<W>,
    settings: OrchestratorSettings,
    cancel: CancellationToken,
}

impl<'env, W: Write + Send> Orchestrator<'env, W> {
    /// Creates an orchestrator over long-lived driver registries.
    #[must_use]
    pub fn new(
        testbed_variants: &'env TestbedVariants,
        test_variants: &'env TestVariants,
        hooks: &'env dyn HookLauncher,
        console: &'env Console<W>,
    ) -> Self {
        Self {
            testbed_variants,
            test_variants,
            hooks,
            console,
            settings: OrchestratorSettings::default(),
            cancel: CancellationToken::new(),
        }
    }

    /// Replaces the default settings.
    #[must_use]
    pub const fn with_settings(mut self, settings: OrchestratorSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Uses `cancel` to stop provisioning and readiness polling.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Runs every phase over `compose`.
    ///
    /// Lifecycle and test failures are captured in the report; only add-phase
    /// failures abort the run.
    ///
    /// # Errors
    ///
    /// Returns the first error raised while adding testbeds.
    pub fn run(&self, compose: &Compose) -> Result<RunReport, NeatError> {
        let mut testbeds =
            TestbedRegistry::new(self.testbed_variants, self.hooks, self.cancel.clone());
        let members = self.add_testbeds(&mut testbeds, compose)?;
        let started = Instant::now();

        let provision = self.provision(&testbeds, &members);
        let tests = self.run_tests(&testbeds, &compose.tests);
        let teardown = self.teardown(&testbeds, &members);

        let report = RunReport {
            tests,
            provision,
            teardown,
            testbeds: members
                .iter()
                .filter_map(|member| {
                    testbeds
                        .inspect(member.id.as_str(), TestbedReport::from_testbed)
                        .inspect_err(|err| {
                            warn!(
                                target: ORCHESTRATOR_TARGET,
                                testbed = %member.name,
                                error = %err,
                                "testbed omitted from report"
                            );
                        })
                        .ok()
                })
                .collect(),
            total_time_ms: millis(started.elapsed()),
        };
        info!(
            target: ORCHESTRATOR_TARGET,
            passed = report.passed(),
            total_time_ms = report.total_time_ms,
            "run finished"
        );
        self.console.write_block(&report.render_summary());
        Ok(report)
    }

    fn add_testbeds(
        &self,
        testbeds: &mut TestbedRegistry<'_>,
        compose: &Compose,
    ) -> Result<Vec<Member>, NeatError> {
        compose
            .testbeds
            .iter()
            .map(|spec| {
                self.console.event(ProgressEvent::Adding(&spec.name));
                let id = testbeds.add(spec.to_testbed()?)?;
                Ok(Member {
                    id,
                    name: spec.name.clone(),
                })
            })
            .collect()
    }

    fn provision(&self, testbeds: &TestbedRegistry<'_>, members: &[Member]) -> PhaseReport {
        let pacing = Pacing {
            stagger: self.settings.stagger,
            cancel: Some(&self.cancel),
            cancelled_phase: Phase::Create,
        };
        let report = fan_out(members, pacing, |member| {
            let term = member.id.as_str();
            self.console.event(ProgressEvent::Creating(&member.name));
            self.step(member, Phase::Create, testbeds.create(term))
                .map_err(|err| TaskError::new(Phase::Create, &err))?;
            self.console.event(ProgressEvent::Created(&member.name));
            self.step(member, Phase::Start, testbeds.start(term))
                .map_err(|err| TaskError::new(Phase::Start, &err))?;
            self.console.event(ProgressEvent::Started(&member.name));
            Ok(())
        });
        if !report.is_clean() {
            warn!(
                target: ORCHESTRATOR_TARGET,
                failed = report.failed.len(),
                "provisioning incomplete"
            );
        }
        report
    }

    /// Stops and removes every testbed that exists.
    ///
    /// A failed stop does not end the task: the environment is still
    /// force-removed and both failures are reported together.
    fn teardown(&self, testbeds: &TestbedRegistry<'_>, members: &[Member]) -> PhaseReport {
        let pacing = Pacing {
            stagger: self.settings.stagger,
            cancel: None,
            cancelled_phase: Phase::Stop,
        };
        fan_out(members, pacing, |member| {
            let term = member.id.as_str();
            let state = testbeds
                .state(term)
                .map_err(|err| TaskError::new(Phase::Stop, &err))?;
            if matches!(state, TestbedState::Unbound | TestbedState::Validated) {
                return Ok(());
            }
            self.console.event(ProgressEvent::Stopping(&member.name));
            let stopped = if state == TestbedState::Started {
                self.step(member, Phase::Stop, testbeds.stop(term))
                    .map_err(|err| TaskError::new(Phase::Stop, &err))
            } else {
                Ok(())
            };
            let removed = match testbeds.state(term) {
                Ok(TestbedState::Created | TestbedState::Stopped) => {
                    self.step(member, Phase::Remove, testbeds.remove(term))
                }
                Ok(TestbedState::Started) => {
                    self.step(member, Phase::Remove, testbeds.force_remove(term))
                }
                Ok(
                    TestbedState::Unbound | TestbedState::Validated | TestbedState::Removed,
                ) => Ok(()),
                Err(err) => Err(err),
            };
            match (stopped, removed) {
                (Ok(()), Ok(())) => {
                    self.console.event(ProgressEvent::Stopped(&member.name));
                    Ok(())
                }
                (Err(first), Ok(())) => Err(first),
                (Ok(()), Err(err)) => Err(TaskError::new(Phase::Remove, &err)),
                (Err(first), Err(err)) => Err(first.also(Phase::Remove, &err)),
            }
        })
    }

    /// Reports a failed lifecycle step on the console and in the log.
    fn step(
        &self,
        member: &Member,
        phase: Phase,
        outcome: Result<(), NeatError>,
    ) -> Result<(), NeatError> {
        outcome.inspect_err(|err| {
            self.console.event(ProgressEvent::Failed {
                testbed: &member.name,
                phase,
            });
            warn!(
                target: ORCHESTRATOR_TARGET,
                testbed = %member.name,
                phase = %phase,
                error = %error_chain(err),
                "lifecycle step failed"
            );
        })
    }

    fn run_tests(&self, testbeds: &TestbedRegistry<'_>, specs: &[TestSpec]) -> Vec<TestResult> {
        let engine = TestEngine::new(self.test_variants, self.hooks);
        specs
            .iter()
            .map(|spec| {
                let skip_reason = if self.cancel.is_cancelled() {
                    Some(String::from("run cancelled"))
                } else {
                    unprovisioned(testbeds, spec)
                };
                let result = match (skip_reason, spec.to_test()) {
                    (Some(reason), _) => skipped(spec, reason),
                    (None, Err(err)) => skipped(spec, error_chain(&err)),
                    (None, Ok(mut test)) => {
                        let outcome = match engine.run_valid(&mut test, testbeds) {
                            Ok(true) => TestOutcome::Passed,
                            Ok(false) => TestOutcome::Failed {
                                reason: String::from("evaluation returned false"),
                            },
                            Err(err) if err.is_validation() => TestOutcome::Skipped {
                                reason: error_chain(&err),
                            },
                            Err(err) => TestOutcome::Failed {
                                reason: error_chain(&err),
                            },
                        };
                        TestResult::from_test(&test, outcome)
                    }
                };
                self.console.event(match result.outcome {
                    TestOutcome::Passed => ProgressEvent::TestPassed(&result.name),
                    TestOutcome::Failed { .. } => ProgressEvent::TestFailed(&result.name),
                    TestOutcome::Skipped { .. } => ProgressEvent::TestSkipped(&result.name),
                });
                result
            })
            .collect()
    }
}

/// Names the first testbed of `spec` that exists but is not started.
///
/// Unknown references are left to test validation.
fn unprovisioned(testbeds: &TestbedRegistry<'_>, spec: &TestSpec) -> Option<String> {
    spec.testbeds
        .iter()
        .find_map(|term| match testbeds.state(term) {
            Ok(TestbedState::Started) | Err(NeatError::NotFound { .. }) => None,
            Ok(state) => Some(format!("testbed {term} is {state}, not started")),
            Err(err) => Some(error_chain(&err)),
        })
}

fn skipped(spec: &TestSpec, reason: String) -> TestResult {
    warn!(target: ORCHESTRATOR_TARGET, test = %spec.id, %reason, "test skipped");
    TestResult {
        id: spec.id.clone(),
        name: if spec.name.is_empty() {
            spec.id.clone()
        } else {
            spec.name.clone()
        },
        outcome: TestOutcome::Skipped { reason },
        timings: Vec::new(),
    }
}
