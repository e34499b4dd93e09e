//! Capability interfaces implemented by testbed and test drivers.
//!
//! A driver ("variant") is a named implementation that the registries bind
//! late, by name, when a testbed or test is validated. Testbed drivers own
//! the lifecycle of an environment and its network probes; test drivers run a
//! check against a started testbed and reduce the result record to a boolean.
//!
//! Drivers report failures as [`DriverError`] so they never depend on the
//! orchestration error taxonomy; the lifecycle manager and test engine wrap
//! them with the testbed, test and phase they occurred in.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::metrics::ResourceSnapshot;
use crate::probe::{PingRequest, PingResponse};
use crate::readiness::CancellationToken;
use crate::testbed::TestbedView;

/// Free-form record returned by a test driver's `run`.
pub type ResultRecord = Map<String, Value>;

/// Opaque, driver-specific configuration attached to a testbed or test.
///
/// The orchestrator never inspects it; each driver decodes it into its own
/// schema with [`VariantConfig::decode`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VariantConfig(Map<String, Value>);

impl VariantConfig {
    /// Wraps a JSON object.
    #[must_use]
    pub const fn new(values: Map<String, Value>) -> Self {
        Self(values)
    }

    /// Returns `true` when no keys are set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the raw value stored under `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Borrows the underlying map.
    #[must_use]
    pub const fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Decodes the configuration into a driver's typed schema.
    ///
    /// # Errors
    ///
    /// Returns a [`DriverError`] describing the first field that does not
    /// match the schema.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, DriverError> {
        serde_json::from_value(Value::Object(self.0.clone()))
            .map_err(|err| DriverError::with_source("invalid configuration", err))
    }
}

impl From<Map<String, Value>> for VariantConfig {
    fn from(values: Map<String, Value>) -> Self {
        Self(values)
    }
}

/// Handle returned by a testbed driver's `create`.
///
/// It is stored in the testbed's own slot and handed back on every later
/// lifecycle call, so drivers do not need a shared table keyed by testbed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverHandle {
    /// Driver-assigned identifier (container id, process id, ...).
    pub id: String,
    /// Extra driver-defined facts about the environment.
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

impl DriverHandle {
    /// Creates a handle with no labels.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            labels: BTreeMap::new(),
        }
    }

    /// Adds a label.
    #[must_use]
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }
}

/// Failure reported by a driver.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct DriverError {
    message: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl DriverError {
    /// Creates an error from a message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Creates an error wrapping an underlying cause.
    #[must_use]
    pub fn with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates the error returned by capabilities a driver does not offer.
    #[must_use]
    pub fn unsupported(driver: &str, capability: &str) -> Self {
        Self::new(format!("driver '{driver}' does not support {capability}"))
    }

    /// Human-readable failure description without the source chain.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// External program a variant depends on.
pub trait Tool: Send + Sync {
    /// Name reported when the check fails.
    fn name(&self) -> &str;

    /// Returns `true` when the tool is usable on this host.
    fn check(&self) -> bool;
}

/// Identity shared by every driver kind.
pub trait Variant: Send + Sync {
    /// Registry key.
    fn name(&self) -> &str;

    /// One-line description shown by `neat variants`.
    fn description(&self) -> &str;

    /// Tools that must pass their availability check before registration.
    fn tools(&self) -> Vec<Box<dyn Tool>> {
        Vec::new()
    }
}

/// Read-only view of a testbed handed to testbed drivers.
#[derive(Debug, Clone, Copy)]
pub struct TestbedContext<'a> {
    /// Generated testbed id.
    pub id: &'a str,
    /// Display name.
    pub name: &'a str,
    /// Whether the environment should be resource capped.
    pub resource_cap: bool,
    /// Driver-specific configuration.
    pub config: &'a VariantConfig,
}

/// Lifecycle and probe capabilities of a testbed variant.
pub trait TestbedDriver: Variant {
    /// Checks that `config` matches the driver's schema.
    ///
    /// # Errors
    ///
    /// Returns a [`DriverError`] describing the schema violation.
    fn validate_configuration(&self, config: &VariantConfig) -> Result<(), DriverError>;

    /// Creates the environment.
    ///
    /// # Errors
    ///
    /// Returns a [`DriverError`] when the environment cannot be created.
    fn create(&self, testbed: &TestbedContext<'_>) -> Result<DriverHandle, DriverError>;

    /// Starts the environment and waits until it is ready.
    ///
    /// Implementations that poll for readiness must observe `cancel`.
    ///
    /// # Errors
    ///
    /// Returns a [`DriverError`] when the environment fails to start or never
    /// becomes ready.
    fn start(
        &self,
        testbed: &TestbedContext<'_>,
        handle: &DriverHandle,
        cancel: &CancellationToken,
    ) -> Result<(), DriverError>;

    /// Stops the environment.
    ///
    /// # Errors
    ///
    /// Returns a [`DriverError`] when the environment cannot be stopped.
    fn stop(&self, testbed: &TestbedContext<'_>, handle: &DriverHandle)
    -> Result<(), DriverError>;

    /// Removes the environment and releases its resources.
    ///
    /// # Errors
    ///
    /// Returns a [`DriverError`] when the environment cannot be removed.
    fn remove(
        &self,
        testbed: &TestbedContext<'_>,
        handle: &DriverHandle,
    ) -> Result<(), DriverError>;

    /// Samples cumulative resource counters, if the driver can.
    ///
    /// # Errors
    ///
    /// Returns a [`DriverError`] when sampling was attempted and failed.
    fn resource_snapshot(
        &self,
        _testbed: &TestbedContext<'_>,
        _handle: &DriverHandle,
    ) -> Result<Option<ResourceSnapshot>, DriverError> {
        Ok(None)
    }

    /// Builds the argument vector passed to a hook script.
    fn hook_arguments(
        &self,
        script: &Path,
        _testbed: &TestbedContext<'_>,
        handle: Option<&DriverHandle>,
    ) -> Vec<String> {
        let mut args = vec![script.display().to_string()];
        if let Some(found) = handle {
            args.push(found.id.clone());
        }
        args
    }

    /// Probes reachability between two hosts inside the testbed.
    ///
    /// # Errors
    ///
    /// Returns a [`DriverError`] when the probe fails or is unsupported.
    fn do_ping(
        &self,
        _testbed: &TestbedContext<'_>,
        _handle: &DriverHandle,
        _request: &PingRequest,
    ) -> Result<PingResponse, DriverError> {
        Err(DriverError::unsupported(self.name(), "ping"))
    }

    /// Probes reachability using `request.sender` as an explicit source host.
    ///
    /// # Errors
    ///
    /// Returns a [`DriverError`] when the probe fails or is unsupported.
    fn do_ping_from(
        &self,
        _testbed: &TestbedContext<'_>,
        _handle: &DriverHandle,
        _request: &PingRequest,
    ) -> Result<PingResponse, DriverError> {
        Err(DriverError::unsupported(self.name(), "ping_from"))
    }
}

/// Evaluation script handed to [`TestDriver::evaluate_script`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptSource<'a> {
    /// Inline directive from the test's `evaluate` field.
    Inline(&'a str),
    /// Script file from the test's `eval_script` field.
    Path(&'a Path),
}

impl fmt::Display for ScriptSource<'_> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inline(text) => write!(formatter, "inline '{text}'"),
            Self::Path(path) => write!(formatter, "script {}", path.display()),
        }
    }
}

/// Execution and evaluation capabilities of a test variant.
pub trait TestDriver: Variant {
    /// Checks that `config` matches the driver's schema.
    ///
    /// # Errors
    ///
    /// Returns a [`DriverError`] describing the schema violation.
    fn validate_configuration(&self, config: &VariantConfig) -> Result<(), DriverError>;

    /// Checks that an expression is well formed before any testbed exists.
    ///
    /// # Errors
    ///
    /// Returns a [`DriverError`] describing the syntax problem.
    fn validate_expression(&self, _expression: &str) -> Result<(), DriverError> {
        Ok(())
    }

    /// Runs the check against one started testbed.
    ///
    /// # Errors
    ///
    /// Returns a [`DriverError`] when the check cannot be carried out.
    fn run(
        &self,
        testbed: &TestbedView<'_>,
        config: &VariantConfig,
    ) -> Result<ResultRecord, DriverError>;

    /// Reduces a result record to pass or fail using an expression.
    ///
    /// # Errors
    ///
    /// Returns a [`DriverError`] when the expression cannot be evaluated or
    /// does not produce a boolean.
    fn evaluate_expression(
        &self,
        result: &ResultRecord,
        expression: &str,
    ) -> Result<bool, DriverError>;

    /// Returns `true` when [`TestDriver::evaluate_script`] is implemented.
    fn supports_scripts(&self) -> bool {
        false
    }

    /// Reduces a result record to pass or fail using a script.
    ///
    /// # Errors
    ///
    /// Returns a [`DriverError`] when scripts are unsupported or the script
    /// fails.
    fn evaluate_script(
        &self,
        _result: &ResultRecord,
        _script: ScriptSource<'_>,
    ) -> Result<bool, DriverError> {
        Err(DriverError::unsupported(self.name(), "evaluation scripts"))
    }
}

#[cfg(test)]
mod tests;
