//! Shell command execution shared by the built-in drivers.

use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use neat_core::metrics::millis;
use neat_core::{CancellationToken, DriverError, Tool};
use thiserror::Error;
use tracing::{debug, warn};

const COMMAND_TARGET: &str = "neat_drivers::command";

/// Time limit for a command that sets none.
pub(crate) const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(300);

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Longest stderr excerpt carried in a [`CommandError::Failed`].
const STDERR_EXCERPT: usize = 512;

/// Errors raised while running a driver command.
#[derive(Debug, Clone, Error)]
pub enum CommandError {
    /// The interpreter could not be started.
    #[error("failed to run '{program}': {source}")]
    Spawn {
        /// Interpreter path.
        program: String,
        /// Underlying I/O error.
        #[source]
        source: Arc<io::Error>,
    },
    /// Writing stdin or collecting output failed.
    #[error("I/O error while running command: {source}")]
    Io {
        /// Underlying I/O error.
        #[source]
        source: Arc<io::Error>,
    },
    /// The command exited unsuccessfully.
    #[error("command '{command}' exited with status {status}{}", stderr_suffix(.stderr))]
    Failed {
        /// The command line that failed.
        command: String,
        /// Exit status, or -1 when terminated by a signal.
        status: i32,
        /// Trimmed tail of the command's stderr.
        stderr: String,
    },
    /// The command outlived its time limit and was killed.
    #[error("command '{command}' timed out after {timeout_ms}ms")]
    TimedOut {
        /// The command line that was killed.
        command: String,
        /// The limit it exceeded.
        timeout_ms: u64,
    },
    /// The run was cancelled while the command ran; it was killed.
    #[error("command '{command}' cancelled")]
    Cancelled {
        /// The command line that was killed.
        command: String,
    },
}

impl CommandError {
    /// Exit status of a command that ran and failed.
    #[must_use]
    pub const fn status(&self) -> Option<i32> {
        match self {
            Self::Failed { status, .. } => Some(*status),
            Self::Spawn { .. }
            | Self::Io { .. }
            | Self::TimedOut { .. }
            | Self::Cancelled { .. } => None,
        }
    }
}

impl From<CommandError> for DriverError {
    fn from(error: CommandError) -> Self {
        Self::with_source("command failed", error)
    }
}

fn stderr_suffix(stderr: &str) -> String {
    if stderr.is_empty() {
        String::new()
    } else {
        format!(": {stderr}")
    }
}

#[derive(Debug, Clone, Copy)]
enum Program<'a> {
    Inline(&'a str),
    File(&'a Path),
}

/// A command line or script file run through an interpreter.
///
/// The command is killed once it outlives its timeout or the cancellation
/// token is asserted.
#[derive(Debug)]
pub(crate) struct ShellCommand<'a> {
    shell: &'a Path,
    program: Program<'a>,
    envs: Vec<(String, String)>,
    stdin: Option<&'a str>,
    timeout: Duration,
    cancel: Option<&'a CancellationToken>,
}

/// Collected output of a command that exited on its own.
struct Finished {
    status: ExitStatus,
    stdout: Vec<u8>,
    stderr: Vec<u8>,
}

impl<'a> ShellCommand<'a> {
    /// Runs `script` with `shell -c`.
    pub(crate) const fn new(shell: &'a Path, script: &'a str) -> Self {
        Self::with_program(shell, Program::Inline(script))
    }

    /// Runs the script at `path` with `shell <path>`.
    pub(crate) const fn file(shell: &'a Path, path: &'a Path) -> Self {
        Self::with_program(shell, Program::File(path))
    }

    const fn with_program(shell: &'a Path, program: Program<'a>) -> Self {
        Self {
            shell,
            program,
            envs: Vec::new(),
            stdin: None,
            timeout: DEFAULT_COMMAND_TIMEOUT,
            cancel: None,
        }
    }

    fn describe(&self) -> String {
        match self.program {
            Program::Inline(script) => script.to_owned(),
            Program::File(path) => path.display().to_string(),
        }
    }

    pub(crate) fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    pub(crate) fn envs<I, K, V>(mut self, pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.envs
            .extend(pairs.into_iter().map(|(key, value)| (key.into(), value.into())));
        self
    }

    pub(crate) const fn stdin(mut self, input: &'a str) -> Self {
        self.stdin = Some(input);
        self
    }

    /// Kills the command once it has run for `limit`.
    pub(crate) const fn timeout(mut self, limit: Duration) -> Self {
        self.timeout = limit;
        self
    }

    /// Kills the command when `token` is asserted.
    pub(crate) const fn cancel(mut self, token: &'a CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Runs the command to completion and returns its stdout.
    pub(crate) fn run(self) -> Result<String, CommandError> {
        let started = Instant::now();
        let described = self.describe();
        debug!(
            target: COMMAND_TARGET,
            shell = %self.shell.display(),
            command = %described,
            timeout_ms = millis(self.timeout),
            "running command"
        );
        let output = self.output(&described)?;
        debug!(
            target: COMMAND_TARGET,
            command = %described,
            status = output.status.code(),
            elapsed_ms = millis(started.elapsed()),
            "command finished"
        );
        if !output.status.success() {
            return Err(CommandError::Failed {
                command: described,
                status: output.status.code().unwrap_or(-1),
                stderr: excerpt(&String::from_utf8_lossy(&output.stderr)),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn output(&self, described: &str) -> Result<Finished, CommandError> {
        let mut command = Command::new(self.shell);
        match self.program {
            Program::Inline(script) => command.arg("-c").arg(script),
            Program::File(path) => command.arg(path),
        };
        command
            .envs(self.envs.iter().map(|(key, value)| (key, value)))
            .stdin(if self.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        let mut child = command.spawn().map_err(|err| CommandError::Spawn {
            program: self.shell.display().to_string(),
            source: Arc::new(err),
        })?;
        let stdout = child.stdout.take().map(collect);
        let stderr = child.stderr.take().map(collect);
        if let (Some(input), Some(mut pipe)) = (self.stdin, child.stdin.take()) {
            // A command that ignores its input may close the pipe early.
            if let Err(err) = pipe.write_all(input.as_bytes())
                && err.kind() != io::ErrorKind::BrokenPipe
            {
                kill(&mut child);
                return Err(CommandError::Io {
                    source: Arc::new(err),
                });
            }
        }
        // Readers are only joined after a clean exit: a killed command may
        // leave grandchildren holding the pipes open.
        let status = self.wait(&mut child, described)?;
        Ok(Finished {
            status,
            stdout: joined(stdout),
            stderr: joined(stderr),
        })
    }

    fn wait(&self, child: &mut Child, described: &str) -> Result<ExitStatus, CommandError> {
        let deadline = Instant::now() + self.timeout;
        loop {
            let exited = child.try_wait().map_err(|err| CommandError::Io {
                source: Arc::new(err),
            })?;
            if let Some(status) = exited {
                return Ok(status);
            }
            if self.cancel.is_some_and(CancellationToken::is_cancelled) {
                warn!(
                    target: COMMAND_TARGET,
                    command = %described,
                    "run cancelled, killing command"
                );
                kill(child);
                return Err(CommandError::Cancelled {
                    command: described.to_owned(),
                });
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                warn!(
                    target: COMMAND_TARGET,
                    command = %described,
                    timeout_ms = millis(self.timeout),
                    "command timed out, killing process"
                );
                kill(child);
                return Err(CommandError::TimedOut {
                    command: described.to_owned(),
                    timeout_ms: millis(self.timeout),
                });
            }
            thread::sleep(remaining.min(POLL_INTERVAL));
        }
    }
}

fn kill(child: &mut Child) {
    drop(child.kill());
    drop(child.wait());
}

/// Reads a pipe to its end on a separate thread so the child never blocks
/// on a full pipe.
fn collect(mut reader: impl Read + Send + 'static) -> thread::JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buffer = Vec::new();
        drop(reader.read_to_end(&mut buffer));
        buffer
    })
}

fn joined(reader: Option<thread::JoinHandle<Vec<u8>>>) -> Vec<u8> {
    reader
        .and_then(|handle| handle.join().ok())
        .unwrap_or_default()
}

fn excerpt(stderr: &str) -> String {
    let trimmed = stderr.trim();
    let skip = trimmed.chars().count().saturating_sub(STDERR_EXCERPT);
    trimmed.chars().skip(skip).collect()
}

/// Availability check for an interpreter on disk.
pub(crate) struct ShellTool {
    path: PathBuf,
}

impl ShellTool {
    pub(crate) fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }
}

impl Tool for ShellTool {
    fn name(&self) -> &str {
        self.path.to_str().unwrap_or("shell")
    }

    fn check(&self) -> bool {
        self.path.is_file()
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    const SH: &str = "/bin/sh";

    #[test]
    fn returns_stdout_on_success() {
        let stdout = ShellCommand::new(Path::new(SH), "printf 'hello'")
            .run()
            .expect("run");
        assert_eq!(stdout, "hello");
    }

    #[test]
    fn passes_environment_and_stdin() {
        let stdout = ShellCommand::new(Path::new(SH), "printf '%s:' \"$NEAT_GREETING\"; cat")
            .env("NEAT_GREETING", "hi")
            .stdin("from stdin")
            .run()
            .expect("run");
        assert_eq!(stdout, "hi:from stdin");
    }

    #[test]
    fn failure_carries_status_and_stderr() {
        let error = ShellCommand::new(Path::new(SH), "echo broken >&2; exit 3")
            .run()
            .expect_err("non-zero exit");
        assert_eq!(error.status(), Some(3));
        assert!(error.to_string().ends_with(": broken"), "{error}");
    }

    #[test]
    fn runs_script_files() {
        let dir = tempfile::TempDir::new().expect("temp dir");
        let script = dir.path().join("check.sh");
        std::fs::write(&script, "read -r line; test \"$line\" = ok\n").expect("write script");

        ShellCommand::file(Path::new(SH), &script)
            .stdin("ok\n")
            .run()
            .expect("script accepts ok");
        let error = ShellCommand::file(Path::new(SH), &script)
            .stdin("nope\n")
            .run()
            .expect_err("script rejects other input");
        assert_eq!(error.status(), Some(1));
        assert!(error.to_string().contains("check.sh"), "{error}");
    }

    #[test]
    fn missing_interpreter_is_a_spawn_error() {
        let error = ShellCommand::new(Path::new("/nonexistent/sh"), "true")
            .run()
            .expect_err("spawn");
        assert!(matches!(error, CommandError::Spawn { .. }), "{error}");
        assert_eq!(error.status(), None);
    }

    #[test]
    fn slow_command_is_killed_at_its_timeout() {
        let started = Instant::now();
        let error = ShellCommand::new(Path::new(SH), "sleep 5")
            .timeout(Duration::from_millis(200))
            .run()
            .expect_err("timed out");
        assert!(
            matches!(error, CommandError::TimedOut { timeout_ms: 200, .. }),
            "{error}"
        );
        assert!(started.elapsed() < Duration::from_secs(3));
        assert_eq!(error.status(), None);
    }

    #[test]
    fn cancellation_kills_a_running_command() {
        let cancel = CancellationToken::new();
        let started = Instant::now();
        let error = thread::scope(|scope| {
            scope.spawn(|| {
                thread::sleep(Duration::from_millis(100));
                cancel.cancel();
            });
            ShellCommand::new(Path::new(SH), "sleep 5")
                .cancel(&cancel)
                .run()
                .expect_err("cancelled")
        });
        assert!(matches!(error, CommandError::Cancelled { .. }), "{error}");
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[test]
    fn large_output_does_not_block_the_wait() {
        let stdout = ShellCommand::new(Path::new(SH), "head -c 200000 /dev/zero | tr '\\0' x")
            .timeout(Duration::from_secs(10))
            .run()
            .expect("run");
        assert_eq!(stdout.len(), 200_000);
    }

    #[rstest]
    #[case::short("oops", "oops")]
    #[case::padded("  oops \n", "oops")]
    fn excerpt_trims(#[case] raw: &str, #[case] expected: &str) {
        assert_eq!(excerpt(raw), expected);
    }

    #[test]
    fn excerpt_keeps_the_tail() {
        let long = format!("{}end", "x".repeat(STDERR_EXCERPT));
        let kept = excerpt(&long);
        assert_eq!(kept.chars().count(), STDERR_EXCERPT);
        assert!(kept.ends_with("end"));
    }

    #[rstest]
    #[case::present(SH, true)]
    #[case::absent("/nonexistent/sh", false)]
    fn shell_tool_checks_the_path(#[case] path: &str, #[case] available: bool) {
        assert_eq!(ShellTool::new(Path::new(path)).check(), available);
    }
}
