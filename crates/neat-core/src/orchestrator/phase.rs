//! Concurrent fan-out of per-testbed lifecycle tasks.

use std::any::Any;
use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

use super::report::{PhaseReport, TaskFailure};
use crate::error::{NeatError, Phase, error_chain};
use crate::readiness::CancellationToken;
use crate::testbed::TestbedId;

const PHASE_TARGET: &str = "neat_core::orchestrator";

/// A testbed taking part in a fan-out phase.
#[derive(Debug, Clone)]
pub(crate) struct Member {
    pub(crate) id: TestbedId,
    pub(crate) name: String,
}

/// Failure returned by a lifecycle task.
///
/// A task that keeps going after a failed step folds each later failure
/// into the same error so the report carries all of them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct TaskError {
    pub(crate) phase: Phase,
    pub(crate) reason: String,
}

impl TaskError {
    pub(crate) fn new(phase: Phase, err: &NeatError) -> Self {
        Self {
            phase,
            reason: error_chain(err),
        }
    }

    /// Appends a failure from a later step, keeping the first phase.
    pub(crate) fn also(mut self, phase: Phase, err: &NeatError) -> Self {
        self.reason = format!("{}; then failed to {phase}: {}", self.reason, error_chain(err));
        self
    }
}

/// How task launches are paced.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Pacing<'a> {
    pub(crate) stagger: Duration,
    /// When set, launches stop once the token is asserted and the remaining
    /// members are reported as cancelled in `cancelled_phase`.
    pub(crate) cancel: Option<&'a CancellationToken>,
    pub(crate) cancelled_phase: Phase,
}

/// Runs `task` for every member on its own thread and joins them all.
///
/// Launches are staggered. Every task outcome, including a panic, is
/// captured in the returned report; nothing a task does can abort the phase.
pub(crate) fn fan_out<F>(members: &[Member], pacing: Pacing<'_>, run: F) -> PhaseReport
where
    F: Fn(&Member) -> Result<(), TaskError> + Sync,
{
    let task = &run;
    let mut report = PhaseReport::default();
    thread::scope(|scope| {
        let mut running = Vec::with_capacity(members.len());
        for (index, member) in members.iter().enumerate() {
            if index > 0 && !pause(pacing) {
                report.failed.push(TaskFailure {
                    testbed: member.name.clone(),
                    phase: Some(pacing.cancelled_phase),
                    reason: NeatError::Cancelled.to_string(),
                });
                continue;
            }
            if pacing.cancel.is_some_and(CancellationToken::is_cancelled) {
                report.failed.push(TaskFailure {
                    testbed: member.name.clone(),
                    phase: Some(pacing.cancelled_phase),
                    reason: NeatError::Cancelled.to_string(),
                });
                continue;
            }
            debug!(target: PHASE_TARGET, testbed = %member.name, "launching task");
            running.push((member, scope.spawn(move || task(member))));
        }

        for (member, handle) in running {
            match handle.join() {
                Ok(Ok(())) => report.succeeded.push(member.name.clone()),
                Ok(Err(err)) => report.failed.push(TaskFailure {
                    testbed: member.name.clone(),
                    phase: Some(err.phase),
                    reason: err.reason,
                }),
                Err(payload) => {
                    let reason = panic_message(payload.as_ref());
                    warn!(target: PHASE_TARGET, testbed = %member.name, %reason, "task panicked");
                    report.failed.push(TaskFailure {
                        testbed: member.name.clone(),
                        phase: None,
                        reason,
                    });
                }
            }
        }
    });
    report
}

/// Sleeps between launches; returns `false` when cancelled.
fn pause(pacing: Pacing<'_>) -> bool {
    match pacing.cancel {
        Some(token) => token.sleep(pacing.stagger),
        None => {
            thread::sleep(pacing.stagger);
            true
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|text| (*text).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .map_or_else(
            || String::from("task panicked"),
            |text| format!("task panicked: {text}"),
        )
}
