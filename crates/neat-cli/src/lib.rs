//! Command-line runtime for the neat test orchestrator.
//!
//! The runtime owns argument parsing, configuration bootstrapping, telemetry
//! installation and subcommand dispatch. It is driven from the binary and
//! from tests, where the configuration loader and output streams can be
//! substituted.

use std::ffi::OsString;
use std::io::Write;
use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::Parser;
use neat_config::Config;
use neat_core::CancellationToken;
use tracing::debug;

mod cli;
mod commands;
mod config;
mod errors;
mod signals;
pub mod telemetry;

use cli::{Cli, CliCommand};
use commands::{Registries, render_variants, run_compose};
use config::{ConfigLoader, OrthoConfigLoader, split_config_arguments};
pub(crate) use errors::AppError;

pub(crate) const CLI_TARGET: &str = "neat_cli";

/// Source of the cancellation token for a batch run.
pub(crate) trait CancellationSource {
    fn token(&self) -> Result<CancellationToken, AppError>;
}

struct SignalCancellation;

impl CancellationSource for SignalCancellation {
    fn token(&self) -> Result<CancellationToken, AppError> {
        signals::cancellation_on_signals().map_err(AppError::Signals)
    }
}

struct CliRunner<'a, W, E, L, C> {
    stdout: &'a mut W,
    stderr: &'a mut E,
    loader: &'a L,
    cancellation: &'a C,
}

impl<W, E, L, C> CliRunner<'_, W, E, L, C>
where
    W: Write + Send,
    E: Write,
    L: ConfigLoader,
    C: CancellationSource,
{
    fn run(&mut self, args: Vec<OsString>) -> ExitCode {
        match self.dispatch(&args) {
            Ok(exit_code) => exit_code,
            Err(AppError::CliUsage(error)) if !error.use_stderr() => {
                drop(write!(self.stdout, "{error}"));
                ExitCode::SUCCESS
            }
            Err(AppError::CliUsage(error)) => {
                drop(write!(self.stderr, "{error}"));
                ExitCode::FAILURE
            }
            Err(error) => {
                drop(writeln!(self.stderr, "{error}"));
                ExitCode::FAILURE
            }
        }
    }

    fn dispatch(&mut self, args: &[OsString]) -> Result<ExitCode, AppError> {
        let split = split_config_arguments(args);
        let cli = Cli::try_parse_from(&split.command_arguments).map_err(AppError::CliUsage)?;
        let config = self.loader.load(&split.config_arguments)?;
        telemetry::initialise(&config)?;
        debug!(target: CLI_TARGET, command = ?cli.command, "dispatching command");

        match cli.command {
            CliCommand::Compose { file } => self.compose(&config, file),
            CliCommand::Variants => {
                let registries = Registries::builtin(&config)?;
                self.stdout
                    .write_all(render_variants(&registries).as_bytes())
                    .map_err(AppError::Output)?;
                Ok(ExitCode::SUCCESS)
            }
        }
    }

    fn compose(
        &mut self,
        config: &Config,
        file: Option<Utf8PathBuf>,
    ) -> Result<ExitCode, AppError> {
        let base = std::env::current_dir()
            .ok()
            .and_then(|dir| Utf8PathBuf::try_from(dir).ok())
            .ok_or(AppError::WorkingDirectory)?;
        let cancel = self.cancellation.token()?;
        let report = run_compose(config, file, &base, cancel, &mut *self.stdout)?;
        Ok(ExitCode::from(report.exit_code()))
    }
}

/// Runs the CLI with the given arguments and output streams.
///
/// Progress lines and the run summary go to `stdout`; errors go to
/// `stderr`. The exit status is non-zero when any test did not pass.
#[must_use]
pub fn run<I, W, E>(args: I, stdout: &mut W, stderr: &mut E) -> ExitCode
where
    I: IntoIterator<Item = OsString>,
    W: Write + Send,
    E: Write,
{
    run_with(args, stdout, stderr, &OrthoConfigLoader, &SignalCancellation)
}

pub(crate) fn run_with<I, W, E, L, C>(
    args: I,
    stdout: &mut W,
    stderr: &mut E,
    loader: &L,
    cancellation: &C,
) -> ExitCode
where
    I: IntoIterator<Item = OsString>,
    W: Write + Send,
    E: Write,
    L: ConfigLoader,
    C: CancellationSource,
{
    CliRunner {
        stdout,
        stderr,
        loader,
        cancellation,
    }
    .run(args.into_iter().collect())
}

#[cfg(test)]
mod tests;
