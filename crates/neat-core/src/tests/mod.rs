//! Crate-level test doubles and behaviour tests.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::Value;

use crate::driver::{
    DriverError, DriverHandle, ResultRecord, ScriptSource, TestDriver, TestbedContext,
    TestbedDriver, Tool, Variant, VariantConfig,
};
use crate::hook::{HookError, HookInvocation, HookLauncher, HookPoint};
use crate::metrics::ResourceSnapshot;
use crate::probe::{PingRequest, PingResponse};
use crate::readiness::CancellationToken;
use crate::registry::{TestVariants, TestbedVariants};
use crate::testbed::TestbedView;


/// Shared, ordered record of driver calls such as `create:edge-1`.
#[derive(Debug, Clone, Default)]
pub(crate) struct CallLog(Arc<Mutex<Vec<String>>>);

impl CallLog {
    pub(crate) fn push(&self, entry: String) {
        self.0.lock().expect("call log").push(entry);
    }

    pub(crate) fn entries(&self) -> Vec<String> {
        self.0.lock().expect("call log").clone()
    }

    pub(crate) fn contains(&self, entry: &str) -> bool {
        self.entries().iter().any(|recorded| recorded == entry)
    }
}

struct StubTool {
    available: bool,
}

impl Tool for StubTool {
    fn name(&self) -> &'static str {
        "stub-tool"
    }

    fn check(&self) -> bool {
        self.available
    }
}

/// Testbed driver that records calls and answers probes from a table.
pub(crate) struct MockTestbedDriver {
    name: String,
    tool_available: bool,
    calls: CallLog,
    fail_create: Mutex<BTreeSet<String>>,
    fail_stop: Mutex<BTreeSet<String>>,
    fail_remove: Mutex<BTreeSet<String>>,
    responses: Mutex<BTreeMap<String, PingResponse>>,
    samples: AtomicU64,
}

impl MockTestbedDriver {
    pub(crate) fn new(calls: CallLog) -> Self {
        Self {
            name: String::from("mock"),
            tool_available: true,
            calls,
            fail_create: Mutex::default(),
            fail_stop: Mutex::default(),
            fail_remove: Mutex::default(),
            responses: Mutex::default(),
            samples: AtomicU64::new(0),
        }
    }

    pub(crate) fn unavailable(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            tool_available: false,
            ..Self::new(CallLog::default())
        }
    }

    pub(crate) fn fail_create_for(&self, testbed: &str) {
        self.fail_create
            .lock()
            .expect("fail set")
            .insert(testbed.to_owned());
    }

    pub(crate) fn fail_stop_for(&self, testbed: &str) {
        self.fail_stop
            .lock()
            .expect("fail set")
            .insert(testbed.to_owned());
    }

    pub(crate) fn fail_remove_for(&self, testbed: &str) {
        self.fail_remove
            .lock()
            .expect("fail set")
            .insert(testbed.to_owned());
    }

    pub(crate) fn respond(&self, testbed: &str, sent: u32, received: u32) {
        self.responses.lock().expect("responses").insert(
            testbed.to_owned(),
            PingResponse {
                sent,
                received,
                ..PingResponse::default()
            },
        );
    }

    fn answer(&self, testbed: &str) -> PingResponse {
        self.responses
            .lock()
            .expect("responses")
            .get(testbed)
            .cloned()
            .unwrap_or(PingResponse {
                sent: 5,
                received: 5,
                ..PingResponse::default()
            })
    }
}

impl Variant for MockTestbedDriver {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &'static str {
        "records lifecycle calls"
    }

    fn tools(&self) -> Vec<Box<dyn Tool>> {
        vec![Box::new(StubTool {
            available: self.tool_available,
        })]
    }
}

impl TestbedDriver for MockTestbedDriver {
    fn validate_configuration(&self, config: &VariantConfig) -> Result<(), DriverError> {
        if config.get("invalid").is_some() {
            return Err(DriverError::new("unknown field `invalid`"));
        }
        Ok(())
    }

    fn create(&self, testbed: &TestbedContext<'_>) -> Result<DriverHandle, DriverError> {
        self.calls.push(format!("create:{}", testbed.name));
        if self.fail_create.lock().expect("fail set").contains(testbed.name) {
            return Err(DriverError::new("simulated create failure"));
        }
        Ok(DriverHandle::new(format!("handle-{}", testbed.name)))
    }

    fn start(
        &self,
        testbed: &TestbedContext<'_>,
        _handle: &DriverHandle,
        _cancel: &CancellationToken,
    ) -> Result<(), DriverError> {
        self.calls.push(format!("start:{}", testbed.name));
        Ok(())
    }

    fn stop(
        &self,
        testbed: &TestbedContext<'_>,
        _handle: &DriverHandle,
    ) -> Result<(), DriverError> {
        self.calls.push(format!("stop:{}", testbed.name));
        if self.fail_stop.lock().expect("fail set").contains(testbed.name) {
            return Err(DriverError::new("simulated stop failure"));
        }
        Ok(())
    }

    fn remove(
        &self,
        testbed: &TestbedContext<'_>,
        _handle: &DriverHandle,
    ) -> Result<(), DriverError> {
        self.calls.push(format!("remove:{}", testbed.name));
        if self.fail_remove.lock().expect("fail set").contains(testbed.name) {
            return Err(DriverError::new("simulated remove failure"));
        }
        Ok(())
    }

    fn resource_snapshot(
        &self,
        _testbed: &TestbedContext<'_>,
        _handle: &DriverHandle,
    ) -> Result<Option<ResourceSnapshot>, DriverError> {
        let sample = self.samples.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Some(ResourceSnapshot {
            container_cpu_total: sample * 50,
            system_cpu_total: sample * 100,
            online_cpus: 2,
            peak_memory_bytes: 256,
            memory_limit_bytes: 1_024,
        }))
    }

    fn do_ping(
        &self,
        testbed: &TestbedContext<'_>,
        _handle: &DriverHandle,
        _request: &PingRequest,
    ) -> Result<PingResponse, DriverError> {
        self.calls.push(format!("ping:{}", testbed.name));
        Ok(self.answer(testbed.name))
    }

    fn do_ping_from(
        &self,
        testbed: &TestbedContext<'_>,
        _handle: &DriverHandle,
        _request: &PingRequest,
    ) -> Result<PingResponse, DriverError> {
        self.calls.push(format!("ping_from:{}", testbed.name));
        Ok(self.answer(testbed.name))
    }
}

/// Test driver that pings through the testbed and compares two fields.
pub(crate) struct ProbeTestDriver {
    calls: CallLog,
}

impl ProbeTestDriver {
    pub(crate) const fn new(calls: CallLog) -> Self {
        Self { calls }
    }
}

impl Variant for ProbeTestDriver {
    fn name(&self) -> &'static str {
        "probe"
    }

    fn description(&self) -> &'static str {
        "pings and compares fields for equality"
    }
}

impl TestDriver for ProbeTestDriver {
    fn validate_configuration(&self, config: &VariantConfig) -> Result<(), DriverError> {
        if config.get("invalid").is_some() {
            return Err(DriverError::new("unknown field `invalid`"));
        }
        Ok(())
    }

    fn validate_expression(&self, expression: &str) -> Result<(), DriverError> {
        if expression.contains("==") {
            Ok(())
        } else {
            Err(DriverError::new(format!("unsupported expression '{expression}'")))
        }
    }

    fn run(
        &self,
        testbed: &TestbedView<'_>,
        _config: &VariantConfig,
    ) -> Result<ResultRecord, DriverError> {
        self.calls.push(format!("run:{}", testbed.name()));
        testbed
            .do_ping(&PingRequest::new("h1", "h2"))
            .map(PingResponse::into_record)
    }

    fn evaluate_expression(
        &self,
        result: &ResultRecord,
        expression: &str,
    ) -> Result<bool, DriverError> {
        let (left, right) = expression
            .split_once("==")
            .ok_or_else(|| DriverError::new("expected 'a == b'"))?;
        let field = |key: &str| -> Result<&Value, DriverError> {
            result
                .get(key.trim())
                .ok_or_else(|| DriverError::new(format!("unknown field '{}'", key.trim())))
        };
        let pass = field(left)? == field(right)?;
        self.calls.push(format!("evaluate:{pass}"));
        Ok(pass)
    }

    fn supports_scripts(&self) -> bool {
        true
    }

    fn evaluate_script(
        &self,
        _result: &ResultRecord,
        script: ScriptSource<'_>,
    ) -> Result<bool, DriverError> {
        self.calls.push(format!("script:{script}"));
        Ok(matches!(script, ScriptSource::Inline("pass")))
    }
}

/// Hook launcher that records invocations and fails chosen points.
#[derive(Default)]
pub(crate) struct RecordingLauncher {
    invocations: Mutex<Vec<HookInvocation>>,
    failing: Mutex<BTreeSet<String>>,
}

impl RecordingLauncher {
    pub(crate) fn fail_at(&self, point: HookPoint) {
        self.failing
            .lock()
            .expect("failing")
            .insert(point.to_string());
    }

    pub(crate) fn invocations(&self) -> Vec<HookInvocation> {
        self.invocations.lock().expect("invocations").clone()
    }

    pub(crate) fn points(&self) -> Vec<HookPoint> {
        self.invocations().iter().map(|call| call.point).collect()
    }
}

impl HookLauncher for RecordingLauncher {
    fn launch(&self, invocation: &HookInvocation) -> Result<(), HookError> {
        self.invocations
            .lock()
            .expect("invocations")
            .push(invocation.clone());
        if self
            .failing
            .lock()
            .expect("failing")
            .contains(&invocation.point.to_string())
        {
            return Err(HookError::NonZeroExit { status: 1 });
        }
        Ok(())
    }
}

/// Registries populated with the `mock` and `probe` drivers.
pub(crate) struct Drivers {
    pub(crate) calls: CallLog,
    pub(crate) mock: Arc<MockTestbedDriver>,
    pub(crate) testbeds: TestbedVariants,
    pub(crate) tests: TestVariants,
}

impl Drivers {
    pub(crate) fn new() -> Self {
        let calls = CallLog::default();
        let mock = Arc::new(MockTestbedDriver::new(calls.clone()));
        let mut testbeds = TestbedVariants::default();
        testbeds
            .register(Arc::clone(&mock) as Arc<dyn TestbedDriver>)
            .expect("register mock");
        let mut tests = TestVariants::default();
        tests
            .register(Arc::new(ProbeTestDriver::new(calls.clone())))
            .expect("register probe");
        Self {
            calls,
            mock,
            testbeds,
            tests,
        }
    }
}
