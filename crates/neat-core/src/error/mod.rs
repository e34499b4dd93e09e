//! Domain errors raised by the orchestration core.
//!
//! [`NeatError`] carries the taxonomy the orchestrator acts on: configuration
//! and validation failures are recoverable per entity or fatal before any
//! resource exists, driver and hook failures are captured per task, and
//! evaluation failures fail a single test. Every variant names the entity and,
//! where relevant, the lifecycle phase so callers can report it without
//! parsing messages.

use std::fmt;

use thiserror::Error;

use crate::driver::DriverError;
use crate::hook::{HookError, HookPoint};
use crate::testbed::TestbedState;

/// Kind of entity an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    /// A provisioned test environment.
    Testbed,
    /// A declarative check run against testbeds.
    Test,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(match self {
            Self::Testbed => "testbed",
            Self::Test => "test",
        })
    }
}

/// Lifecycle or execution phase in which a failure occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Binding a driver and checking configuration.
    Validate,
    /// Creating the environment.
    Create,
    /// Starting the environment.
    Start,
    /// Stopping the environment.
    Stop,
    /// Removing the environment.
    Remove,
    /// Issuing a network probe.
    Probe,
    /// Running a test driver against a testbed.
    Run,
    /// Reducing a result record to pass or fail.
    Evaluate,
}

impl fmt::Display for Phase {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(match self {
            Self::Validate => "validate",
            Self::Create => "create",
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Remove => "remove",
            Self::Probe => "probe",
            Self::Run => "run",
            Self::Evaluate => "evaluate",
        })
    }
}

/// Errors arising from testbed and test orchestration.
#[derive(Debug, Error)]
pub enum NeatError {
    /// The compose document or an entity declaration is malformed.
    #[error("configuration error: {message}")]
    Config {
        /// Description of the problem.
        message: String,
    },

    /// No variant is registered under the requested name.
    #[error("{kind} variant '{name}' does not exist")]
    DriverNotFound {
        /// Registry that was searched.
        kind: EntityKind,
        /// Name that was looked up.
        name: String,
    },

    /// The variant exists but was omitted because a required tool is missing.
    #[error("{kind} variant '{name}' is unavailable: tool '{tool}' failed its availability check")]
    DriverUnavailable {
        /// Registry that was searched.
        kind: EntityKind,
        /// Name that was looked up.
        name: String,
        /// Tool whose check failed.
        tool: String,
    },

    /// A testbed or test reference did not resolve.
    #[error("{kind} with name/id '{term}' not found")]
    NotFound {
        /// Kind of entity searched for.
        kind: EntityKind,
        /// Search term as supplied.
        term: String,
    },

    /// An entity failed its own validation checks.
    #[error("{kind} '{name}' is not valid: {message}")]
    Validation {
        /// Kind of entity.
        kind: EntityKind,
        /// Display name of the entity.
        name: String,
        /// Description of the failure.
        message: String,
    },

    /// A test declares no evaluation mechanism.
    #[error("test '{test}' provides no method to evaluate its result")]
    NoEvaluationMethod {
        /// Test display name.
        test: String,
    },

    /// A test declares more than one evaluation mechanism.
    #[error("test '{test}' provides more than one evaluation method ({methods})")]
    AmbiguousEvaluation {
        /// Test display name.
        test: String,
        /// Comma separated list of the methods that were set.
        methods: String,
    },

    /// A testbed driver reported a failure.
    #[error("testbed '{testbed}' failed to {phase}: {source}")]
    Driver {
        /// Testbed display name.
        testbed: String,
        /// Lifecycle phase that failed.
        phase: Phase,
        /// Driver-reported failure.
        #[source]
        source: DriverError,
    },

    /// A hook script failed.
    #[error("{point} hook for '{owner}' failed: {source}")]
    Hook {
        /// Testbed or test owning the hook.
        owner: String,
        /// Boundary at which the hook ran.
        point: HookPoint,
        /// Launcher-reported failure.
        #[source]
        source: HookError,
    },

    /// A test driver failed to run or its result could not be evaluated.
    #[error("test '{test}' failed to {phase} on '{testbed}': {source}")]
    Evaluation {
        /// Test display name.
        test: String,
        /// Testbed the test was running against.
        testbed: String,
        /// Either [`Phase::Run`] or [`Phase::Evaluate`].
        phase: Phase,
        /// Driver-reported failure.
        #[source]
        source: DriverError,
    },

    /// `stop` was requested for a testbed without an unfinished run.
    #[error("testbed '{testbed}' has no active run to stop")]
    NoActiveRun {
        /// Testbed display name.
        testbed: String,
    },

    /// The requested transition is not permitted from the current state.
    #[error("testbed '{testbed}' cannot {phase} while {state}")]
    InvalidState {
        /// Testbed display name.
        testbed: String,
        /// Requested transition.
        phase: Phase,
        /// Current state.
        state: TestbedState,
    },

    /// A concurrent task panicked while holding the testbed.
    #[error("testbed '{testbed}' is unusable after a task panicked")]
    Poisoned {
        /// Testbed display name.
        testbed: String,
    },

    /// The run was cancelled before the operation could complete.
    #[error("operation cancelled")]
    Cancelled,
}

impl NeatError {
    /// Builds a configuration error.
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Builds a validation error for the named entity.
    #[must_use]
    pub fn validation(kind: EntityKind, name: &str, message: impl Into<String>) -> Self {
        Self::Validation {
            kind,
            name: name.to_owned(),
            message: message.into(),
        }
    }

    /// Wraps a driver failure with the testbed and phase it occurred in.
    #[must_use]
    pub fn driver(testbed: &str, phase: Phase, source: DriverError) -> Self {
        Self::Driver {
            testbed: testbed.to_owned(),
            phase,
            source,
        }
    }

    /// Returns `true` for errors detected before any resource is touched.
    ///
    /// The orchestrator reports tests failing with these as skipped rather
    /// than failed.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::Config { .. }
                | Self::DriverNotFound { .. }
                | Self::DriverUnavailable { .. }
                | Self::NotFound { .. }
                | Self::Validation { .. }
                | Self::NoEvaluationMethod { .. }
                | Self::AmbiguousEvaluation { .. }
        )
    }

    /// Returns `true` when a lookup failed because no such variant exists.
    #[must_use]
    pub const fn is_driver_not_found(&self) -> bool {
        matches!(
            self,
            Self::DriverNotFound { .. } | Self::DriverUnavailable { .. }
        )
    }
}

/// Renders an error and its source chain on one line.
///
/// Sources whose text the parent already ends with are skipped, so wrappers
/// that interpolate their source are not repeated.
#[must_use]
pub fn error_chain(error: &(dyn std::error::Error + 'static)) -> String {
    let mut rendered = error.to_string();
    let mut next = error.source();
    while let Some(cause) = next {
        let text = cause.to_string();
        if !rendered.ends_with(&text) {
            rendered.push_str(": ");
            rendered.push_str(&text);
        }
        next = cause.source();
    }
    rendered
}

#[cfg(test)]
mod tests;
