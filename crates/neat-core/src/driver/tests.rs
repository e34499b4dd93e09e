//! Unit tests for driver configuration and defaults.

use std::path::PathBuf;

use rstest::rstest;
use serde::Deserialize;
use serde_json::json;

use super::*;

#[derive(Debug, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
struct Schema {
    image: String,
    #[serde(default)]
    replicas: u32,
}

fn config(value: Value) -> VariantConfig {
    match value {
        Value::Object(map) => VariantConfig::new(map),
        other => panic!("expected object, got {other}"),
    }
}

struct Bare;

impl Variant for Bare {
    fn name(&self) -> &'static str {
        "bare"
    }

    fn description(&self) -> &'static str {
        "does nothing"
    }
}

impl TestbedDriver for Bare {
    fn validate_configuration(&self, _config: &VariantConfig) -> Result<(), DriverError> {
        Ok(())
    }

    fn create(&self, _testbed: &TestbedContext<'_>) -> Result<DriverHandle, DriverError> {
        Ok(DriverHandle::new("h-1"))
    }

    fn start(
        &self,
        _testbed: &TestbedContext<'_>,
        _handle: &DriverHandle,
        _cancel: &CancellationToken,
    ) -> Result<(), DriverError> {
        Ok(())
    }

    fn stop(
        &self,
        _testbed: &TestbedContext<'_>,
        _handle: &DriverHandle,
    ) -> Result<(), DriverError> {
        Ok(())
    }

    fn remove(
        &self,
        _testbed: &TestbedContext<'_>,
        _handle: &DriverHandle,
    ) -> Result<(), DriverError> {
        Ok(())
    }
}

#[test]
fn decode_reads_typed_schema() {
    let decoded: Schema = config(json!({"image": "alpine"}))
        .decode()
        .expect("decode");
    assert_eq!(
        decoded,
        Schema {
            image: "alpine".into(),
            replicas: 0
        }
    );
}

#[rstest]
#[case::unknown_field(json!({"image": "alpine", "imgae": "typo"}))]
#[case::missing_field(json!({"replicas": 2}))]
#[case::wrong_type(json!({"image": 7}))]
fn decode_rejects_schema_violations(#[case] value: Value) {
    let error = config(value)
        .decode::<Schema>()
        .expect_err("schema violation");
    assert_eq!(error.message(), "invalid configuration");
    assert!(std::error::Error::source(&error).is_some());
}

#[rstest]
#[case::without_handle(None, vec!["/hooks/up.sh"])]
#[case::with_handle(Some(DriverHandle::new("c0ffee")), vec!["/hooks/up.sh", "c0ffee"])]
fn default_hook_arguments_append_handle(
    #[case] handle: Option<DriverHandle>,
    #[case] expected: Vec<&str>,
) {
    let empty = VariantConfig::default();
    let context = TestbedContext {
        id: "id",
        name: "edge",
        resource_cap: false,
        config: &empty,
    };
    let args = Bare.hook_arguments(&PathBuf::from("/hooks/up.sh"), &context, handle.as_ref());
    assert_eq!(args, expected);
}

#[test]
fn probes_are_unsupported_by_default() {
    let empty = VariantConfig::default();
    let context = TestbedContext {
        id: "id",
        name: "edge",
        resource_cap: false,
        config: &empty,
    };
    let request = PingRequest::new("h1", "h2");
    let error = Bare
        .do_ping(&context, &DriverHandle::new("h"), &request)
        .expect_err("unsupported");
    assert!(error.to_string().contains("does not support ping"));
}
