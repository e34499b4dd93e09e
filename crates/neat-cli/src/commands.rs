//! Subcommand implementations.

use std::fmt::Write as _;
use std::fs;
use std::io::Write;

use camino::{Utf8Path, Utf8PathBuf};
use neat_config::{Config, resolve_compose_file};
use neat_core::{
    CancellationToken, Compose, Console, Orchestrator, OrchestratorSettings, RunReport,
    ShellLauncher, TestVariants, TestbedVariants, Variant,
};
use tracing::info;

use crate::{AppError, CLI_TARGET};

/// Process-wide driver registries.
#[derive(Debug, Default)]
pub(crate) struct Registries {
    pub(crate) testbeds: TestbedVariants,
    pub(crate) tests: TestVariants,
}

impl Registries {
    /// Registers the built-in drivers against the configured shell.
    pub(crate) fn builtin(config: &Config) -> Result<Self, AppError> {
        let mut registries = Self::default();
        neat_drivers::register_builtin(
            config.hook_shell().as_std_path(),
            &mut registries.testbeds,
            &mut registries.tests,
        )
        .map_err(AppError::Registration)?;
        Ok(registries)
    }
}

/// Reads and parses a compose document.
pub(crate) fn load_compose(path: &Utf8Path) -> Result<Compose, AppError> {
    let text = fs::read_to_string(path).map_err(|source| AppError::ReadCompose {
        path: path.to_path_buf(),
        source,
    })?;
    serde_saphyr::from_str(&text).map_err(|source| AppError::ParseCompose {
        path: path.to_path_buf(),
        source,
    })
}

/// Runs one batch and returns its report.
pub(crate) fn run_compose<W>(
    config: &Config,
    file: Option<Utf8PathBuf>,
    base: &Utf8Path,
    cancel: CancellationToken,
    stdout: W,
) -> Result<RunReport, AppError>
where
    W: Write + Send,
{
    let mut effective = config.clone();
    if file.is_some() {
        effective.compose_file = file;
    }
    let path = resolve_compose_file(&effective, base)?;
    info!(target: CLI_TARGET, compose = %path, "loading compose file");
    let compose = load_compose(&path)?;

    let registries = Registries::builtin(config)?;
    let launcher = ShellLauncher::new(config.hook_shell().as_std_path(), config.hook_timeout());
    let console = Console::new(stdout);
    let report = Orchestrator::new(
        &registries.testbeds,
        &registries.tests,
        &launcher,
        &console,
    )
    .with_settings(OrchestratorSettings {
        stagger: config.stagger(),
    })
    .with_cancellation(cancel)
    .run(&compose)
    .map_err(AppError::Run)?;

    if let Some(report_path) = config.report_path() {
        write_report(&report, report_path)?;
    }
    Ok(report)
}

fn write_report(report: &RunReport, path: &Utf8Path) -> Result<(), AppError> {
    let json = report.to_json().map_err(AppError::SerialiseReport)?;
    fs::write(path, json).map_err(|source| AppError::WriteReport {
        path: path.to_path_buf(),
        source,
    })?;
    info!(target: CLI_TARGET, report = %path, "wrote run report");
    Ok(())
}

/// Renders the variant listing shown by `neat variants`.
pub(crate) fn render_variants(registries: &Registries) -> String {
    let mut listing = String::new();
    section(
        &mut listing,
        "Testbed variants",
        registries.testbeds.variants().map(|variant| describe(&**variant)),
    );
    section(
        &mut listing,
        "Test variants",
        registries.tests.variants().map(|variant| describe(&**variant)),
    );

    let unavailable: Vec<(String, String)> = registries
        .testbeds
        .unavailable()
        .map(|(name, tool)| (format!("testbed {name}"), format!("missing tool {tool}")))
        .chain(
            registries
                .tests
                .unavailable()
                .map(|(name, tool)| (format!("test {name}"), format!("missing tool {tool}"))),
        )
        .collect();
    if !unavailable.is_empty() {
        section(&mut listing, "Unavailable", unavailable.into_iter());
    }
    listing
}

fn describe<V: Variant + ?Sized>(variant: &V) -> (String, String) {
    (variant.name().to_owned(), variant.description().to_owned())
}

fn section(out: &mut String, title: &str, entries: impl Iterator<Item = (String, String)>) {
    let rows: Vec<_> = entries.collect();
    let width = rows.iter().map(|(name, _)| name.len()).max().unwrap_or(0);
    drop(writeln!(out, "{title}:"));
    if rows.is_empty() {
        drop(writeln!(out, "  (none)"));
    }
    for (name, detail) in rows {
        drop(writeln!(out, "  {name:<width$}  {detail}"));
    }
}
