//! Hook scripts run at lifecycle and test boundaries.
//!
//! A [`Hook`] is either a script path or an inline shell command. The
//! lifecycle manager turns it into a [`HookInvocation`] (asking the bound
//! driver for the script's argument vector) and hands it to a
//! [`HookLauncher`], which blocks until the process exits. A non-zero exit is
//! a hook failure.

use std::fmt;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

const HOOK_TARGET: &str = "neat_core::hook";

/// `$0` seen by inline hook commands.
pub const INLINE_HOOK_NAME: &str = "neat-hook";

/// An external command attached to a boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Hook {
    /// Script file run through the hook shell.
    Script(PathBuf),
    /// Command string run with the hook shell's `-c`.
    Inline(String),
}

/// Boundary at which a hook runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum HookPoint {
    /// Before the driver starts a testbed.
    PreStart,
    /// After the driver started a testbed.
    PostStart,
    /// Before the driver stops a testbed.
    PreStop,
    /// After the driver stopped a testbed.
    PostStop,
    /// Before a test runs on its first testbed.
    PreRun,
    /// After a test ran on its last attempted testbed.
    PostRun,
}

impl fmt::Display for HookPoint {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(match self {
            Self::PreStart => "pre-start",
            Self::PostStart => "post-start",
            Self::PreStop => "pre-stop",
            Self::PostStop => "post-stop",
            Self::PreRun => "pre-run",
            Self::PostRun => "post-run",
        })
    }
}

/// The four optional hooks of a testbed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LifecycleHooks {
    /// Runs before `start`.
    pub pre_start: Option<Hook>,
    /// Runs after `start`.
    pub post_start: Option<Hook>,
    /// Runs before `stop`.
    pub pre_stop: Option<Hook>,
    /// Runs after `stop`.
    pub post_stop: Option<Hook>,
}

impl LifecycleHooks {
    /// Returns the hook configured for `point`.
    #[must_use]
    pub const fn get(&self, point: HookPoint) -> Option<&Hook> {
        match point {
            HookPoint::PreStart => self.pre_start.as_ref(),
            HookPoint::PostStart => self.post_start.as_ref(),
            HookPoint::PreStop => self.pre_stop.as_ref(),
            HookPoint::PostStop => self.post_stop.as_ref(),
            HookPoint::PreRun | HookPoint::PostRun => None,
        }
    }

    /// Sets the hook for a testbed lifecycle point.
    ///
    /// Test points are ignored.
    pub fn set(&mut self, point: HookPoint, hook: Hook) {
        let slot = match point {
            HookPoint::PreStart => &mut self.pre_start,
            HookPoint::PostStart => &mut self.post_start,
            HookPoint::PreStop => &mut self.pre_stop,
            HookPoint::PostStop => &mut self.post_stop,
            HookPoint::PreRun | HookPoint::PostRun => return,
        };
        *slot = Some(hook);
    }
}

/// A hook ready to launch: the shell arguments and who asked for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookInvocation {
    /// Boundary being crossed.
    pub point: HookPoint,
    /// Testbed or test display name.
    pub owner: String,
    /// Arguments passed to the hook shell.
    pub args: Vec<String>,
}

impl HookInvocation {
    /// Builds an invocation.
    ///
    /// `script_args` produces the argument vector for a script path; for
    /// inline hooks it is called with [`INLINE_HOOK_NAME`] so the command sees
    /// the same positional parameters a script would.
    pub fn new(
        point: HookPoint,
        owner: &str,
        hook: &Hook,
        script_args: impl FnOnce(&Path) -> Vec<String>,
    ) -> Self {
        let args = match hook {
            Hook::Script(path) => script_args(path),
            Hook::Inline(command) => {
                let mut inline = vec![String::from("-c"), command.clone()];
                inline.extend(script_args(Path::new(INLINE_HOOK_NAME)));
                inline
            }
        };
        Self {
            point,
            owner: owner.to_owned(),
            args,
        }
    }
}

/// Failure reported by a [`HookLauncher`].
#[derive(Debug, Clone, Error)]
pub enum HookError {
    /// The hook process could not be spawned.
    #[error("failed to spawn '{program}': {source}")]
    Spawn {
        /// Program that was spawned.
        program: String,
        /// Underlying I/O error.
        #[source]
        source: Arc<std::io::Error>,
    },

    /// The hook exited unsuccessfully.
    #[error("exited with status {status}")]
    NonZeroExit {
        /// Exit code, or `-1` when terminated by a signal.
        status: i32,
    },

    /// The hook did not finish in time and was killed.
    #[error("timed out after {timeout_secs}s")]
    Timeout {
        /// Configured timeout in seconds.
        timeout_secs: u64,
    },

    /// Waiting on the hook process failed.
    #[error("I/O error waiting for hook: {source}")]
    Io {
        /// Underlying I/O error.
        #[source]
        source: Arc<std::io::Error>,
    },
}

/// Runs hook processes to completion.
pub trait HookLauncher: Send + Sync {
    /// Runs the hook and blocks until it exits.
    ///
    /// # Errors
    ///
    /// Returns a [`HookError`] when the hook cannot be run or exits
    /// unsuccessfully.
    fn launch(&self, invocation: &HookInvocation) -> Result<(), HookError>;
}

/// Launches hooks through a shell, enforcing a timeout.
#[derive(Debug, Clone)]
pub struct ShellLauncher {
    shell: PathBuf,
    timeout: Duration,
}

impl ShellLauncher {
    /// Creates a launcher for the given shell.
    #[must_use]
    pub fn new(shell: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            shell: shell.into(),
            timeout,
        }
    }
}

impl HookLauncher for ShellLauncher {
    fn launch(&self, invocation: &HookInvocation) -> Result<(), HookError> {
        debug!(
            target: HOOK_TARGET,
            owner = %invocation.owner,
            point = %invocation.point,
            shell = %self.shell.display(),
            args = ?invocation.args,
            "launching hook"
        );
        let mut child = Command::new(&self.shell)
            .args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| HookError::Spawn {
                program: self.shell.display().to_string(),
                source: Arc::new(err),
            })?;
        let stderr = child
            .stderr
            .take()
            .map(|reader| drain_stderr(invocation.owner.clone(), invocation.point, reader));
        let outcome = wait_for_exit(&mut child, self.timeout);
        // A killed hook may leave grandchildren holding the pipe open.
        let timed_out = matches!(outcome, Err(HookError::Timeout { .. }));
        if let Some(handle) = stderr.filter(|_| !timed_out) {
            drop(handle.join());
        }
        outcome
    }
}

/// Forwards the hook's stderr to the log so the pipe never fills.
fn drain_stderr(
    owner: String,
    point: HookPoint,
    reader: impl Read + Send + 'static,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        for line in BufReader::new(reader).lines().map_while(Result::ok) {
            debug!(
                target: HOOK_TARGET,
                owner = %owner,
                point = %point,
                stderr = %line,
                "hook stderr"
            );
        }
    })
}

fn wait_for_exit(child: &mut Child, timeout: Duration) -> Result<(), HookError> {
    let start = Instant::now();
    let poll_interval = Duration::from_millis(20);
    loop {
        match child.try_wait() {
            Ok(Some(status)) if status.success() => return Ok(()),
            Ok(Some(status)) => {
                return Err(HookError::NonZeroExit {
                    status: status.code().unwrap_or(-1),
                });
            }
            Ok(None) if start.elapsed() > timeout => {
                warn!(
                    target: HOOK_TARGET,
                    timeout_secs = timeout.as_secs(),
                    "hook timed out, killing process"
                );
                drop(child.kill());
                drop(child.wait());
                return Err(HookError::Timeout {
                    timeout_secs: timeout.as_secs(),
                });
            }
            Ok(None) => thread::sleep(poll_interval),
            Err(err) => {
                return Err(HookError::Io {
                    source: Arc::new(err),
                });
            }
        }
    }
}

#[cfg(test)]
mod tests;
