//! The `shell` testbed driver.
//!
//! Each lifecycle step runs a configured command through the driver's shell:
//!
//! ```yaml
//! variant: shell
//! config:
//!   create: docker create --name "$NEAT_TESTBED_NAME" alpine sleep infinity
//!   start: docker start "$NEAT_HANDLE_ID"
//!   ready: docker exec "$NEAT_HANDLE_ID" true
//!   stop: docker stop "$NEAT_HANDLE_ID"
//!   remove: docker rm "$NEAT_HANDLE_ID"
//!   readiness:
//!     max_attempts: 10
//!   command_timeout_secs: 60
//! ```
//!
//! Every command is killed once it outlives `command_timeout_secs` (300 by
//! default). A `ready` attempt is also bounded by what is left of the
//! readiness deadline and is killed when the run is cancelled.
//!
//! The first non-empty line `create` prints becomes the handle id; when it
//! prints nothing the generated testbed id is used. `ready` is polled with
//! bounded exponential backoff until it exits 0. `stats` must print a JSON
//! [`ResourceSnapshot`] and `ping` a JSON [`PingResponse`].
//!
//! Every command receives `NEAT_TESTBED_NAME`, `NEAT_TESTBED_ID` and
//! `NEAT_RESOURCE_CAP`, plus `NEAT_HANDLE_ID` once created. `ping` also
//! receives `NEAT_PING_SENDER`, `NEAT_PING_TARGET`, `NEAT_PING_COUNT` and
//! `NEAT_PING_INTERVAL`; `NEAT_PING_SOURCE` is set only for `ping_from`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use neat_core::{
    CancellationToken, DriverError, DriverHandle, PingRequest, PingResponse, ResourceSnapshot,
    RetryPolicy, TestbedContext, TestbedDriver, Tool, Variant, VariantConfig,
};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use crate::command::{CommandError, DEFAULT_COMMAND_TIMEOUT, ShellCommand, ShellTool};

const SHELL_TARGET: &str = "neat_drivers::shell";

/// Configuration accepted by the `shell` driver.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ShellConfig {
    /// Creates the environment; its first stdout line is the handle id.
    pub create: String,
    /// Starts the environment.
    #[serde(default)]
    pub start: Option<String>,
    /// Exits 0 once the environment is ready.
    #[serde(default)]
    pub ready: Option<String>,
    /// Stops the environment.
    #[serde(default)]
    pub stop: Option<String>,
    /// Removes the environment.
    #[serde(default)]
    pub remove: Option<String>,
    /// Prints a JSON resource snapshot.
    #[serde(default)]
    pub stats: Option<String>,
    /// Runs a probe and prints a JSON ping response.
    #[serde(default)]
    pub ping: Option<String>,
    /// Extra environment variables for every command.
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
    /// Polling budget for `ready`.
    #[serde(default)]
    pub readiness: ReadinessSettings,
    /// Time limit for each command, in seconds.
    #[serde(default)]
    pub command_timeout_secs: Option<u64>,
}

impl ShellConfig {
    /// Time limit applied to every command.
    #[must_use]
    pub fn command_timeout(&self) -> Duration {
        self.command_timeout_secs
            .map_or(DEFAULT_COMMAND_TIMEOUT, Duration::from_secs)
    }
}

/// Polling budget for the `ready` command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReadinessSettings {
    /// Attempts before giving up.
    pub max_attempts: u32,
    /// Delay after the first failed attempt, in milliseconds.
    pub initial_backoff_ms: u64,
    /// Upper bound on the delay between attempts, in milliseconds.
    pub max_backoff_ms: u64,
    /// Overall deadline, in seconds.
    pub timeout_secs: u64,
}

impl Default for ReadinessSettings {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            max_attempts: policy.max_attempts(),
            initial_backoff_ms: 100,
            max_backoff_ms: 5_000,
            timeout_secs: policy.timeout().as_secs(),
        }
    }
}

impl ReadinessSettings {
    /// Builds the retry policy.
    #[must_use]
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::default()
            .with_max_attempts(self.max_attempts)
            .with_initial_backoff(Duration::from_millis(self.initial_backoff_ms))
            .with_max_backoff(Duration::from_millis(self.max_backoff_ms))
            .with_timeout(Duration::from_secs(self.timeout_secs))
    }
}

/// Testbed driver running configured shell commands.
#[derive(Debug, Clone)]
pub struct ShellTestbed {
    shell: PathBuf,
}

impl ShellTestbed {
    /// Creates the driver; `shell` runs every command with `-c`.
    #[must_use]
    pub fn new(shell: &Path) -> Self {
        Self {
            shell: shell.to_path_buf(),
        }
    }

    fn config(testbed: &TestbedContext<'_>) -> Result<ShellConfig, DriverError> {
        testbed.config.decode()
    }

    fn command<'a>(
        &'a self,
        script: &'a str,
        testbed: &TestbedContext<'_>,
        handle: Option<&DriverHandle>,
        config: &ShellConfig,
    ) -> ShellCommand<'a> {
        let command = ShellCommand::new(&self.shell, script)
            .timeout(config.command_timeout())
            .envs(config.environment.clone())
            .env("NEAT_TESTBED_NAME", testbed.name)
            .env("NEAT_TESTBED_ID", testbed.id)
            .env("NEAT_RESOURCE_CAP", if testbed.resource_cap { "1" } else { "0" });
        match handle {
            Some(found) => command.env("NEAT_HANDLE_ID", found.id.as_str()),
            None => command,
        }
    }

    /// Runs an optional lifecycle command.
    fn step(
        &self,
        step: &str,
        script: Option<&str>,
        testbed: &TestbedContext<'_>,
        handle: &DriverHandle,
        config: &ShellConfig,
    ) -> Result<(), DriverError> {
        let Some(command) = script else {
            debug!(target: SHELL_TARGET, testbed = testbed.name, step, "no command configured");
            return Ok(());
        };
        self.command(command, testbed, Some(handle), config)
            .run()
            .map(drop)
            .map_err(|err| DriverError::with_source(format!("{step} command failed"), err))
    }

    fn probe(
        &self,
        testbed: &TestbedContext<'_>,
        handle: &DriverHandle,
        request: &PingRequest,
        from_source: bool,
    ) -> Result<PingResponse, DriverError> {
        let config = Self::config(testbed)?;
        let capability = if from_source { "ping_from" } else { "ping" };
        let script = config
            .ping
            .as_deref()
            .ok_or_else(|| DriverError::unsupported(self.name(), capability))?;
        let mut command = self
            .command(script, testbed, Some(handle), &config)
            .env("NEAT_PING_SENDER", request.sender.as_str())
            .env("NEAT_PING_TARGET", request.target.as_str())
            .env("NEAT_PING_COUNT", request.count.to_string())
            .env("NEAT_PING_INTERVAL", request.interval.to_string());
        if from_source {
            command = command.env("NEAT_PING_SOURCE", request.sender.as_str());
        }
        let stdout = command
            .run()
            .map_err(|err| DriverError::with_source("ping command failed", err))?;
        parse_json(&stdout, "ping")
    }
}

fn parse_json<T: DeserializeOwned>(stdout: &str, step: &str) -> Result<T, DriverError> {
    serde_json::from_str(stdout.trim()).map_err(|err| {
        DriverError::with_source(format!("{step} command printed invalid JSON"), err)
    })
}

impl Variant for ShellTestbed {
    fn name(&self) -> &'static str {
        "shell"
    }

    fn description(&self) -> &'static str {
        "runs configured shell commands for each lifecycle step"
    }

    fn tools(&self) -> Vec<Box<dyn Tool>> {
        vec![Box::new(ShellTool::new(&self.shell))]
    }
}

impl TestbedDriver for ShellTestbed {
    fn validate_configuration(&self, config: &VariantConfig) -> Result<(), DriverError> {
        let decoded: ShellConfig = config.decode()?;
        if decoded.create.trim().is_empty() {
            return Err(DriverError::new("'create' command is required"));
        }
        Ok(())
    }

    fn create(&self, testbed: &TestbedContext<'_>) -> Result<DriverHandle, DriverError> {
        let config = Self::config(testbed)?;
        let stdout = self
            .command(&config.create, testbed, None, &config)
            .run()
            .map_err(|err| DriverError::with_source("create command failed", err))?;
        let id = stdout
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .unwrap_or(testbed.id);
        info!(target: SHELL_TARGET, testbed = testbed.name, handle = id, "environment created");
        Ok(DriverHandle::new(id))
    }

    fn start(
        &self,
        testbed: &TestbedContext<'_>,
        handle: &DriverHandle,
        cancel: &CancellationToken,
    ) -> Result<(), DriverError> {
        let config = Self::config(testbed)?;
        if let Some(script) = config.start.as_deref() {
            self.command(script, testbed, Some(handle), &config)
                .cancel(cancel)
                .run()
                .map_err(|err| DriverError::with_source("start command failed", err))?;
        }
        let Some(ready) = config.ready.as_deref() else {
            return Ok(());
        };
        let policy = config.readiness.policy();
        let deadline = Instant::now() + policy.timeout();
        let attempts = policy.poll(cancel, || {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let attempt = self
                .command(ready, testbed, Some(handle), &config)
                .timeout(config.command_timeout().min(remaining))
                .cancel(cancel);
            match attempt.run() {
                Ok(_) => Ok(true),
                Err(CommandError::Failed { .. }) => Ok(false),
                Err(err) => Err(err.into()),
            }
        })?;
        info!(target: SHELL_TARGET, testbed = testbed.name, attempts, "environment ready");
        Ok(())
    }

    fn stop(&self, testbed: &TestbedContext<'_>, handle: &DriverHandle) -> Result<(), DriverError> {
        let config = Self::config(testbed)?;
        self.step("stop", config.stop.as_deref(), testbed, handle, &config)
    }

    fn remove(
        &self,
        testbed: &TestbedContext<'_>,
        handle: &DriverHandle,
    ) -> Result<(), DriverError> {
        let config = Self::config(testbed)?;
        self.step("remove", config.remove.as_deref(), testbed, handle, &config)
    }

    fn resource_snapshot(
        &self,
        testbed: &TestbedContext<'_>,
        handle: &DriverHandle,
    ) -> Result<Option<ResourceSnapshot>, DriverError> {
        let config = Self::config(testbed)?;
        let Some(script) = config.stats.as_deref() else {
            return Ok(None);
        };
        let stdout = self
            .command(script, testbed, Some(handle), &config)
            .run()
            .map_err(|err| DriverError::with_source("stats command failed", err))?;
        parse_json(&stdout, "stats").map(Some)
    }

    fn do_ping(
        &self,
        testbed: &TestbedContext<'_>,
        handle: &DriverHandle,
        request: &PingRequest,
    ) -> Result<PingResponse, DriverError> {
        self.probe(testbed, handle, request, false)
    }

    fn do_ping_from(
        &self,
        testbed: &TestbedContext<'_>,
        handle: &DriverHandle,
        request: &PingRequest,
    ) -> Result<PingResponse, DriverError> {
        self.probe(testbed, handle, request, true)
    }
}
