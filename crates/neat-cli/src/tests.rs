//! Unit tests for the CLI runtime.

use std::fs;

use camino::Utf8Path;
use rstest::{fixture, rstest};
use tempfile::TempDir;

use super::*;

struct StaticConfigLoader {
    config: Config,
}

impl ConfigLoader for StaticConfigLoader {
    fn load(&self, _args: &[OsString]) -> Result<Config, AppError> {
        Ok(self.config.clone())
    }
}

struct Uncancelled;

impl CancellationSource for Uncancelled {
    fn token(&self) -> Result<CancellationToken, AppError> {
        Ok(CancellationToken::new())
    }
}

struct PreCancelled;

impl CancellationSource for PreCancelled {
    fn token(&self) -> Result<CancellationToken, AppError> {
        let token = CancellationToken::new();
        token.cancel();
        Ok(token)
    }
}

struct Outcome {
    exit: ExitCode,
    stdout: String,
    stderr: String,
}

fn run_cli(config: Config, args: &[&str], cancellation: &impl CancellationSource) -> Outcome {
    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let loader = StaticConfigLoader { config };
    let argv = std::iter::once("neat")
        .chain(args.iter().copied())
        .map(OsString::from);
    let exit = run_with(argv, &mut stdout, &mut stderr, &loader, cancellation);
    Outcome {
        exit,
        stdout: String::from_utf8(stdout).expect("stdout utf8"),
        stderr: String::from_utf8(stderr).expect("stderr utf8"),
    }
}

fn base_config() -> Config {
    Config {
        stagger_ms: 0,
        log_filter: String::from("off"),
        ..Config::default()
    }
}

#[fixture]
fn workdir() -> TempDir {
    TempDir::new().expect("temp dir")
}

fn utf8(dir: &TempDir) -> &Utf8Path {
    Utf8Path::from_path(dir.path()).expect("temp dir is utf8")
}

fn write_compose(dir: &TempDir, received: u32) -> String {
    let path = utf8(dir).join("batch.yaml");
    let document = format!(
        r#"testbeds:
  - name: edge-1
    variant: shell
    config:
      create: echo box-1
      ping: "echo '{{\"sent\": 4, \"received\": {received}, \"avg_rtt\": 0.5}}'"
tests:
  - id: reachability
    variant: ping
    testbeds: [edge-1]
    expression: sent == received
    config:
      sender: h1
      target: h2
"#
    );
    fs::write(&path, document).expect("write compose");
    path.into_string()
}

// ---------------------------------------------------------------------------
// Argument handling
// ---------------------------------------------------------------------------

#[test]
fn missing_subcommand_is_a_usage_error() {
    let outcome = run_cli(base_config(), &[], &Uncancelled);
    assert_eq!(outcome.exit, ExitCode::FAILURE);
    assert!(outcome.stderr.contains("Usage"), "{}", outcome.stderr);
}

#[test]
fn help_goes_to_stdout() {
    let outcome = run_cli(base_config(), &["--help"], &Uncancelled);
    assert_eq!(outcome.exit, ExitCode::SUCCESS);
    assert!(outcome.stdout.contains("compose"), "{}", outcome.stdout);
    assert!(outcome.stderr.is_empty());
}

// ---------------------------------------------------------------------------
// variants
// ---------------------------------------------------------------------------

#[test]
fn variants_lists_the_builtin_drivers() {
    let outcome = run_cli(base_config(), &["variants"], &Uncancelled);
    assert_eq!(outcome.exit, ExitCode::SUCCESS, "{}", outcome.stderr);
    assert!(outcome.stdout.starts_with("Testbed variants:\n  shell"));
    assert!(outcome.stdout.contains("Test variants:\n  ping "));
    assert!(outcome.stdout.contains("  ping_from"));
    assert!(!outcome.stdout.contains("Unavailable"));
}

#[test]
fn variants_reports_drivers_missing_their_shell() {
    let config = Config {
        hook_shell: "/nonexistent/neat-shell".into(),
        ..base_config()
    };
    let outcome = run_cli(config, &["variants"], &Uncancelled);
    assert_eq!(outcome.exit, ExitCode::SUCCESS);
    assert!(outcome.stdout.contains("Testbed variants:\n  (none)"));
    assert!(outcome.stdout.contains("testbed shell"));
    assert!(outcome.stdout.contains("missing tool"));
}

// ---------------------------------------------------------------------------
// compose
// ---------------------------------------------------------------------------

#[rstest]
fn passing_batch_exits_zero(workdir: TempDir) {
    let compose = write_compose(&workdir, 4);
    let outcome = run_cli(base_config(), &["compose", "--file", &compose], &Uncancelled);
    assert_eq!(outcome.exit, ExitCode::SUCCESS, "{}", outcome.stderr);
    assert!(outcome.stdout.contains("Testbed edge-1"), "{}", outcome.stdout);
    assert!(outcome.stdout.contains("Tests: 1 passed, 0 failed, 0 skipped"));
}

#[rstest]
fn failing_batch_exits_one(workdir: TempDir) {
    let compose = write_compose(&workdir, 2);
    let outcome = run_cli(base_config(), &["compose", "-f", &compose], &Uncancelled);
    assert_eq!(outcome.exit, ExitCode::from(1));
    assert!(outcome.stdout.contains("Tests: 0 passed, 1 failed, 0 skipped"));
}

#[rstest]
fn configured_compose_file_is_used(workdir: TempDir) {
    let compose = write_compose(&workdir, 4);
    let config = Config {
        compose_file: Some(compose.into()),
        ..base_config()
    };
    let outcome = run_cli(config, &["compose"], &Uncancelled);
    assert_eq!(outcome.exit, ExitCode::SUCCESS, "{}", outcome.stderr);
}

#[rstest]
fn report_is_written_when_configured(workdir: TempDir) {
    let compose = write_compose(&workdir, 4);
    let report_path = utf8(&workdir).join("report.json");
    let config = Config {
        report_path: Some(report_path.clone()),
        ..base_config()
    };
    let outcome = run_cli(config, &["compose", "--file", &compose], &Uncancelled);
    assert_eq!(outcome.exit, ExitCode::SUCCESS, "{}", outcome.stderr);

    let raw = fs::read_to_string(&report_path).expect("report written");
    let report: serde_json::Value = serde_json::from_str(&raw).expect("report is json");
    assert_eq!(report["tests"][0]["status"], "passed");
    assert_eq!(report["testbeds"][0]["name"], "edge-1");
}

#[rstest]
fn cancelled_batch_skips_its_tests(workdir: TempDir) {
    let compose = write_compose(&workdir, 4);
    let outcome = run_cli(base_config(), &["compose", "--file", &compose], &PreCancelled);
    assert_eq!(outcome.exit, ExitCode::from(1));
    assert!(outcome.stdout.contains("0 passed, 0 failed, 1 skipped"), "{}", outcome.stdout);
}

#[rstest]
fn missing_compose_file_is_reported(workdir: TempDir) {
    let absent = utf8(&workdir).join("absent.yaml");
    let outcome = run_cli(
        base_config(),
        &["compose", "--file", absent.as_str()],
        &Uncancelled,
    );
    assert_eq!(outcome.exit, ExitCode::FAILURE);
    assert!(outcome.stderr.contains("does not exist"), "{}", outcome.stderr);
}

#[rstest]
fn malformed_compose_file_is_reported(workdir: TempDir) {
    let path = utf8(&workdir).join("broken.yaml");
    fs::write(&path, "testbeds:\n  - name: a\n    colour: blue\n").expect("write");
    let outcome = run_cli(base_config(), &["compose", "--file", path.as_str()], &Uncancelled);
    assert_eq!(outcome.exit, ExitCode::FAILURE);
    assert!(outcome.stderr.contains("failed to parse compose file"), "{}", outcome.stderr);
}

#[rstest]
fn unknown_variant_aborts_the_run(workdir: TempDir) {
    let path = utf8(&workdir).join("qemu.yaml");
    fs::write(&path, "testbeds:\n  - name: vm\n    variant: qemu\n").expect("write");
    let outcome = run_cli(base_config(), &["compose", "--file", path.as_str()], &Uncancelled);
    assert_eq!(outcome.exit, ExitCode::FAILURE);
    assert!(outcome.stderr.contains("batch run aborted"), "{}", outcome.stderr);
}
