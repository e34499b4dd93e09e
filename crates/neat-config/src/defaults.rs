use std::time::Duration;

use camino::Utf8PathBuf;

use crate::logging::LogFormat;

/// Default log filter expression used by the binary.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Default delay between task launches in the fan-out phases.
pub const DEFAULT_STAGGER_MS: u64 = 100;

/// Default interpreter used to run lifecycle hooks.
pub const DEFAULT_HOOK_SHELL: &str = "/bin/sh";

/// Default upper bound on a single hook invocation.
pub const DEFAULT_HOOK_TIMEOUT_SECS: u64 = 300;

/// File name searched for when no compose file is configured.
pub const COMPOSE_FILE_NAME: &str = "neat-compose.yaml";

/// Directory searched before the working directory for the compose file.
pub const COMPOSE_DIRECTORY: &str = ".neat";

/// Default log filter expression used by the binary.
#[must_use]
pub const fn default_log_filter() -> &'static str {
    DEFAULT_LOG_FILTER
}

/// Owned log filter value used where allocation is required (e.g. serde).
#[must_use]
pub fn default_log_filter_string() -> String {
    DEFAULT_LOG_FILTER.to_owned()
}

/// Default logging format for the binary.
#[must_use]
pub const fn default_log_format() -> LogFormat {
    LogFormat::Compact
}

/// Default stagger between concurrent task launches, in milliseconds.
#[must_use]
pub const fn default_stagger_ms() -> u64 {
    DEFAULT_STAGGER_MS
}

/// Default hook interpreter.
#[must_use]
pub fn default_hook_shell() -> Utf8PathBuf {
    Utf8PathBuf::from(DEFAULT_HOOK_SHELL)
}

/// Default hook timeout, in seconds.
#[must_use]
pub const fn default_hook_timeout_secs() -> u64 {
    DEFAULT_HOOK_TIMEOUT_SECS
}

/// Candidate compose file locations, in search order.
#[must_use]
pub fn compose_search_paths() -> Vec<Utf8PathBuf> {
    vec![
        Utf8PathBuf::from(COMPOSE_DIRECTORY).join(COMPOSE_FILE_NAME),
        Utf8PathBuf::from(COMPOSE_FILE_NAME),
    ]
}

pub(crate) const fn millis(value: u64) -> Duration {
    Duration::from_millis(value)
}
