//! Unit tests for orchestration error types.

use rstest::rstest;

use super::*;

#[test]
fn driver_error_names_testbed_and_phase() {
    let error = NeatError::driver("edge-1", Phase::Create, DriverError::new("image missing"));
    let message = error.to_string();
    assert!(message.contains("edge-1"), "{message}");
    assert!(message.contains("create"), "{message}");
    assert!(message.contains("image missing"), "{message}");
}

#[test]
fn unavailable_variant_is_distinguishable_from_missing() {
    let missing = NeatError::DriverNotFound {
        kind: EntityKind::Testbed,
        name: "mtv".into(),
    };
    let unavailable = NeatError::DriverUnavailable {
        kind: EntityKind::Testbed,
        name: "mtv".into(),
        tool: "docker".into(),
    };
    assert!(missing.to_string().contains("does not exist"));
    assert!(unavailable.to_string().contains("docker"));
    assert!(missing.is_driver_not_found());
    assert!(unavailable.is_driver_not_found());
}

#[rstest]
#[case::config(NeatError::config("bad"), true)]
#[case::no_method(NeatError::NoEvaluationMethod { test: "t".into() }, true)]
#[case::not_found(
    NeatError::NotFound { kind: EntityKind::Testbed, term: "x".into() },
    true
)]
#[case::no_active_run(NeatError::NoActiveRun { testbed: "t".into() }, false)]
#[case::cancelled(NeatError::Cancelled, false)]
fn classifies_validation_errors(#[case] error: NeatError, #[case] expected: bool) {
    assert_eq!(error.is_validation(), expected, "{error}");
}

#[test]
fn errors_are_send_and_sync() {
    fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<NeatError>();
}

#[test]
fn error_chain_includes_driver_causes_once() {
    let io = std::io::Error::other("permission denied");
    let error = NeatError::driver(
        "edge-1",
        Phase::Start,
        DriverError::with_source("command failed", io),
    );
    assert_eq!(
        error_chain(&error),
        "testbed 'edge-1' failed to start: command failed: permission denied"
    );
}
