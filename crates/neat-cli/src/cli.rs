//! CLI argument definitions for the `neat` binary.
//!
//! Configuration flags (`--log-filter`, `--stagger-ms`, ...) are stripped
//! before this parser runs; see [`crate::config`].

use camino::Utf8PathBuf;
use clap::{Parser, Subcommand};

/// Command-line interface for the neat test orchestrator.
#[derive(Parser, Debug)]
#[command(
    name = "neat",
    about = "Provision testbeds, run tests against them and tear them down.",
    disable_help_subcommand = true
)]
pub(crate) struct Cli {
    /// Action to perform.
    #[command(subcommand)]
    pub(crate) command: CliCommand,
}

/// Subcommands of the `neat` binary.
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub(crate) enum CliCommand {
    /// Runs the batch described by a compose file.
    Compose {
        /// Compose file to run instead of the configured or discovered one.
        #[arg(long, short = 'f', value_name = "PATH")]
        file: Option<Utf8PathBuf>,
    },
    /// Lists the registered testbed and test variants.
    Variants,
}
