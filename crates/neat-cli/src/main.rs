//! CLI entrypoint for the neat test orchestrator.
//!
//! The binary delegates to [`neat_cli::run`], which loads configuration,
//! installs telemetry and dispatches the requested subcommand.

use std::io;
use std::process::ExitCode;

fn main() -> ExitCode {
    neat_cli::run(std::env::args_os(), &mut io::stdout(), &mut io::stderr())
}
