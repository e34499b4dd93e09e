//! Shared configuration for the neat test orchestrator.
//!
//! Configuration is layered by [`ortho_config`]: built-in defaults, then a
//! TOML file (`--config-path` or `NEAT_CONFIG_PATH`), then `NEAT_*`
//! environment variables, then command-line flags. Later layers win.

use std::sync::Arc;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use ortho_config::{OrthoConfig, OrthoError};
use serde::{Deserialize, Serialize};

mod compose;
mod defaults;
mod logging;

pub use compose::{ComposeLookupError, resolve_compose_file};
pub use defaults::{
    COMPOSE_DIRECTORY, COMPOSE_FILE_NAME, DEFAULT_HOOK_SHELL, DEFAULT_HOOK_TIMEOUT_SECS,
    DEFAULT_LOG_FILTER, DEFAULT_STAGGER_MS, compose_search_paths, default_hook_shell,
    default_hook_timeout_secs, default_log_filter, default_log_filter_string,
    default_log_format, default_stagger_ms,
};
pub use logging::{LogFormat, LogFormatParseError};

/// Resolved configuration shared by the CLI and the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, OrthoConfig)]
#[ortho_config(prefix = "NEAT")]
pub struct Config {
    /// `tracing` filter directive, e.g. `info` or `neat_core=debug`.
    #[ortho_config(default = default_log_filter_string())]
    pub log_filter: String,
    /// Log output format.
    #[ortho_config(default = default_log_format())]
    pub log_format: LogFormat,
    /// Explicit compose file; searched for when absent.
    pub compose_file: Option<Utf8PathBuf>,
    /// Delay between task launches in the fan-out phases, in milliseconds.
    #[ortho_config(default = default_stagger_ms())]
    pub stagger_ms: u64,
    /// Interpreter used to run lifecycle hooks.
    #[ortho_config(default = default_hook_shell())]
    pub hook_shell: Utf8PathBuf,
    /// Hooks running longer than this are killed and reported as failed.
    #[ortho_config(default = default_hook_timeout_secs())]
    pub hook_timeout_secs: u64,
    /// When set, the run report is also written to this path as JSON.
    pub report_path: Option<Utf8PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_filter: default_log_filter_string(),
            log_format: default_log_format(),
            compose_file: None,
            stagger_ms: default_stagger_ms(),
            hook_shell: default_hook_shell(),
            hook_timeout_secs: default_hook_timeout_secs(),
            report_path: None,
        }
    }
}

impl Config {
    /// Loads configuration from every layer, without command-line flags.
    ///
    /// # Errors
    ///
    /// Returns the aggregated loader error when any layer is malformed.
    pub fn load_without_cli() -> Result<Self, Arc<OrthoError>> {
        Self::load_from_iter([std::ffi::OsString::from("neat")])
    }

    /// Filter directive for the tracing subscriber.
    #[must_use]
    pub fn log_filter(&self) -> &str {
        self.log_filter.as_str()
    }

    /// Requested log output format.
    #[must_use]
    pub const fn log_format(&self) -> LogFormat {
        self.log_format
    }

    /// Explicitly configured compose file, if any.
    #[must_use]
    pub fn compose_file(&self) -> Option<&Utf8Path> {
        self.compose_file.as_deref()
    }

    /// Delay between task launches in the fan-out phases.
    #[must_use]
    pub const fn stagger(&self) -> Duration {
        defaults::millis(self.stagger_ms)
    }

    /// Interpreter used to run lifecycle hooks.
    #[must_use]
    pub fn hook_shell(&self) -> &Utf8Path {
        self.hook_shell.as_path()
    }

    /// Upper bound on a single hook invocation.
    #[must_use]
    pub const fn hook_timeout(&self) -> Duration {
        Duration::from_secs(self.hook_timeout_secs)
    }

    /// Destination for the JSON run report, if requested.
    #[must_use]
    pub fn report_path(&self) -> Option<&Utf8Path> {
        self.report_path.as_deref()
    }
}
