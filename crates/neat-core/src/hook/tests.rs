//! Unit tests for hook construction and the shell launcher.

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use mockall::mock;
use mockall::predicate::function;
use rstest::{fixture, rstest};
use tempfile::TempDir;

use super::*;

mock! {
    Launcher {}
    impl HookLauncher for Launcher {
        fn launch(&self, invocation: &HookInvocation) -> Result<(), HookError>;
    }
}

fn script_with_handle(path: &Path) -> Vec<String> {
    vec![path.display().to_string(), String::from("c0ffee")]
}

#[fixture]
fn launcher() -> ShellLauncher {
    ShellLauncher::new("/bin/sh", Duration::from_secs(5))
}

#[fixture]
fn scratch() -> TempDir {
    TempDir::new().expect("temp dir")
}

// ---------------------------------------------------------------------------
// Invocation construction
// ---------------------------------------------------------------------------

#[test]
fn script_hooks_use_driver_arguments() {
    let hook = Hook::Script(PathBuf::from("/hooks/up.sh"));
    let invocation = HookInvocation::new(HookPoint::PreStart, "edge", &hook, script_with_handle);
    assert_eq!(invocation.args, vec!["/hooks/up.sh", "c0ffee"]);
    assert_eq!(invocation.owner, "edge");
}

#[test]
fn inline_hooks_run_with_dash_c_and_positional_arguments() {
    let hook = Hook::Inline(String::from("echo $1"));
    let invocation = HookInvocation::new(HookPoint::PostStop, "edge", &hook, script_with_handle);
    assert_eq!(
        invocation.args,
        vec!["-c", "echo $1", INLINE_HOOK_NAME, "c0ffee"]
    );
}

#[rstest]
#[case(HookPoint::PreStart, "pre-start")]
#[case(HookPoint::PostRun, "post-run")]
fn hook_points_display_in_kebab_case(#[case] point: HookPoint, #[case] expected: &str) {
    assert_eq!(point.to_string(), expected);
}

#[test]
fn lifecycle_hooks_ignore_test_points() {
    let mut hooks = LifecycleHooks::default();
    hooks.set(HookPoint::PreRun, Hook::Inline(String::from("true")));
    hooks.set(HookPoint::PreStop, Hook::Inline(String::from("true")));
    assert_eq!(hooks.get(HookPoint::PreRun), None);
    assert!(hooks.get(HookPoint::PreStop).is_some());
}

#[test]
fn launcher_trait_can_be_mocked() {
    let mut mock = MockLauncher::new();
    mock.expect_launch()
        .with(function(|invocation: &HookInvocation| {
            invocation.point == HookPoint::PreRun
        }))
        .times(1)
        .returning(|_| Err(HookError::NonZeroExit { status: 3 }));
    let hook = Hook::Inline(String::from("exit 3"));
    let invocation = HookInvocation::new(HookPoint::PreRun, "t", &hook, |path| {
        vec![path.display().to_string()]
    });
    let error = mock.launch(&invocation).expect_err("mock failure");
    assert!(error.to_string().contains("status 3"));
}

// ---------------------------------------------------------------------------
// Shell launcher
// ---------------------------------------------------------------------------

#[rstest]
fn shell_launcher_runs_inline_commands(launcher: ShellLauncher, scratch: TempDir) {
    let marker = scratch.path().join("ran");
    let hook = Hook::Inline(format!("echo \"$1\" > '{}'", marker.display()));
    let invocation = HookInvocation::new(HookPoint::PostStart, "edge", &hook, script_with_handle);
    launcher.launch(&invocation).expect("hook succeeds");
    let contents = fs::read_to_string(marker).expect("marker written");
    assert_eq!(contents.trim(), "c0ffee");
}

#[rstest]
fn shell_launcher_runs_scripts(launcher: ShellLauncher, scratch: TempDir) {
    let script = scratch.path().join("hook.sh");
    let marker = scratch.path().join("args");
    fs::write(&script, format!("echo \"$@\" > '{}'\n", marker.display())).expect("script");
    let invocation = HookInvocation::new(
        HookPoint::PreStart,
        "edge",
        &Hook::Script(script),
        script_with_handle,
    );
    launcher.launch(&invocation).expect("hook succeeds");
    let contents = fs::read_to_string(marker).expect("marker written");
    assert_eq!(contents.trim(), "c0ffee");
}

#[rstest]
fn shell_launcher_reports_non_zero_exit(launcher: ShellLauncher) {
    let invocation = HookInvocation::new(
        HookPoint::PreStop,
        "edge",
        &Hook::Inline(String::from("echo failing >&2; exit 7")),
        |_| Vec::new(),
    );
    let error = launcher.launch(&invocation).expect_err("hook fails");
    assert!(matches!(error, HookError::NonZeroExit { status: 7 }), "{error}");
}

#[test]
fn shell_launcher_kills_slow_hooks() {
    let launcher = ShellLauncher::new("/bin/sh", Duration::from_millis(100));
    let invocation = HookInvocation::new(
        HookPoint::PreStart,
        "edge",
        &Hook::Inline(String::from("sleep 5")),
        |_| Vec::new(),
    );
    let error = launcher.launch(&invocation).expect_err("timeout");
    assert!(matches!(error, HookError::Timeout { .. }), "{error}");
}

#[test]
fn shell_launcher_reports_missing_shell() {
    let launcher = ShellLauncher::new("/definitely/not/a/shell", Duration::from_secs(1));
    let invocation = HookInvocation::new(
        HookPoint::PreStart,
        "edge",
        &Hook::Inline(String::from("true")),
        |_| Vec::new(),
    );
    let error = launcher.launch(&invocation).expect_err("spawn failure");
    assert!(matches!(error, HookError::Spawn { .. }), "{error}");
}
