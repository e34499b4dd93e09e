//! Error types for the CLI runtime.

use std::io;
use std::sync::Arc;

use camino::Utf8PathBuf;
use neat_config::ComposeLookupError;
use neat_core::NeatError;
use thiserror::Error;

use crate::telemetry::TelemetryError;

#[derive(Debug, Error)]
pub(crate) enum AppError {
    #[error("failed to load configuration: {0}")]
    LoadConfiguration(Arc<ortho_config::OrthoError>),
    #[error("{0}")]
    CliUsage(clap::Error),
    #[error("failed to initialise telemetry: {0}")]
    Telemetry(#[from] TelemetryError),
    #[error("failed to install signal handlers: {0}")]
    Signals(io::Error),
    #[error("working directory is not valid UTF-8 or is unavailable")]
    WorkingDirectory,
    #[error(transparent)]
    ComposeLookup(#[from] ComposeLookupError),
    #[error("failed to read compose file '{path}': {source}")]
    ReadCompose {
        path: Utf8PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse compose file '{path}': {source}")]
    ParseCompose {
        path: Utf8PathBuf,
        #[source]
        source: serde_saphyr::Error,
    },
    #[error("failed to register built-in drivers: {0}")]
    Registration(#[source] NeatError),
    #[error("batch run aborted: {0}")]
    Run(#[source] NeatError),
    #[error("failed to serialise run report: {0}")]
    SerialiseReport(serde_json::Error),
    #[error("failed to write run report to '{path}': {source}")]
    WriteReport {
        path: Utf8PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to write output: {0}")]
    Output(io::Error),
}
