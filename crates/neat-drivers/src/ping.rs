//! Reachability test drivers.
//!
//! `ping` asks the testbed to probe `target` from `sender`; `ping_from` asks
//! it to use `sender` as an explicit source host. Both return
//! `{sent, received, avg_rtt, std_dev}` and evaluate it with the
//! comparison-expression language, e.g. `sent == received`.
//!
//! Evaluation scripts receive the result record as JSON on stdin. Exit status
//! 0 passes, 1 fails and anything else is an evaluation error.

use std::path::{Path, PathBuf};

use neat_core::{
    DriverError, PingRequest, ResultRecord, ScriptSource, TestDriver, TestbedView, Tool,
    Variant, VariantConfig,
};
use tracing::debug;

use crate::command::{ShellCommand, ShellTool};
use crate::expression::{self, Expression};

const PING_TARGET: &str = "neat_drivers::ping";

/// The `ping` and `ping_from` test drivers.
#[derive(Debug, Clone)]
pub struct PingTest {
    name: &'static str,
    from_source: bool,
    shell: PathBuf,
}

impl PingTest {
    /// Creates the `ping` driver; `shell` runs evaluation scripts.
    #[must_use]
    pub fn ping(shell: &Path) -> Self {
        Self {
            name: "ping",
            from_source: false,
            shell: shell.to_path_buf(),
        }
    }

    /// Creates the `ping_from` driver; `shell` runs evaluation scripts.
    #[must_use]
    pub fn ping_from(shell: &Path) -> Self {
        Self {
            name: "ping_from",
            from_source: true,
            shell: shell.to_path_buf(),
        }
    }

    fn request(config: &VariantConfig) -> Result<PingRequest, DriverError> {
        let request: PingRequest = config.decode()?;
        if request.sender.trim().is_empty() || request.target.trim().is_empty() {
            return Err(DriverError::new("both 'sender' and 'target' are required"));
        }
        Ok(request)
    }
}

impl Variant for PingTest {
    fn name(&self) -> &str {
        self.name
    }

    fn description(&self) -> &str {
        if self.from_source {
            "pings a target from an explicit source host"
        } else {
            "pings a target host from a sender host"
        }
    }

    fn tools(&self) -> Vec<Box<dyn Tool>> {
        vec![Box::new(ShellTool::new(&self.shell))]
    }
}

impl TestDriver for PingTest {
    fn validate_configuration(&self, config: &VariantConfig) -> Result<(), DriverError> {
        Self::request(config).map(drop)
    }

    fn validate_expression(&self, expression: &str) -> Result<(), DriverError> {
        Expression::parse(expression)
            .map(drop)
            .map_err(|err| DriverError::with_source("invalid expression", err))
    }

    fn run(
        &self,
        testbed: &TestbedView<'_>,
        config: &VariantConfig,
    ) -> Result<ResultRecord, DriverError> {
        let request = Self::request(config)?;
        debug!(
            target: PING_TARGET,
            testbed = testbed.name(),
            sender = %request.sender,
            target = %request.target,
            from_source = self.from_source,
            "probing"
        );
        let response = if self.from_source {
            testbed.do_ping_from(&request)?
        } else {
            testbed.do_ping(&request)?
        };
        Ok(response.into_record())
    }

    fn evaluate_expression(
        &self,
        result: &ResultRecord,
        expression: &str,
    ) -> Result<bool, DriverError> {
        expression::evaluate(expression, result)
            .map_err(|err| DriverError::with_source("expression evaluation failed", err))
    }

    fn supports_scripts(&self) -> bool {
        true
    }

    fn evaluate_script(
        &self,
        result: &ResultRecord,
        script: ScriptSource<'_>,
    ) -> Result<bool, DriverError> {
        let input = serde_json::to_string(result)
            .map_err(|err| DriverError::with_source("failed to encode result", err))?;
        let command = match script {
            ScriptSource::Inline(directive) => ShellCommand::new(&self.shell, directive),
            ScriptSource::Path(path) => ShellCommand::file(&self.shell, path),
        };
        match command.stdin(&input).run() {
            Ok(_) => Ok(true),
            Err(err) if err.status() == Some(1) => Ok(false),
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use neat_core::{
        CancellationToken, DriverHandle, HookInvocation, HookError, HookLauncher, PingResponse,
        Testbed, TestbedContext, TestbedDriver, TestbedRegistry, TestbedVariants,
    };
    use rstest::{fixture, rstest};
    use serde_json::json;
    use tempfile::TempDir;

    use super::*;

    const SH: &str = "/bin/sh";

    /// Answers probes with a fixed response and records the source flag.
    struct Echo;

    impl Variant for Echo {
        fn name(&self) -> &'static str {
            "echo"
        }

        fn description(&self) -> &'static str {
            "fixed probe answers"
        }
    }

    impl TestbedDriver for Echo {
        fn validate_configuration(&self, _config: &VariantConfig) -> Result<(), DriverError> {
            Ok(())
        }

        fn create(&self, testbed: &TestbedContext<'_>) -> Result<DriverHandle, DriverError> {
            Ok(DriverHandle::new(testbed.name))
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

        fn do_ping(
            &self,
            _testbed: &TestbedContext<'_>,
            _handle: &DriverHandle,
            request: &PingRequest,
        ) -> Result<PingResponse, DriverError> {
            Ok(PingResponse {
                sent: request.count,
                received: request.count,
                ..PingResponse::default()
            })
        }

        fn do_ping_from(
            &self,
            _testbed: &TestbedContext<'_>,
            _handle: &DriverHandle,
            request: &PingRequest,
        ) -> Result<PingResponse, DriverError> {
            Ok(PingResponse {
                sent: request.count,
                received: 0,
                ..PingResponse::default()
            })
        }
    }

    struct NoHooks;

    impl HookLauncher for NoHooks {
        fn launch(&self, _invocation: &HookInvocation) -> Result<(), HookError> {
            Ok(())
        }
    }

    #[fixture]
    fn variants() -> TestbedVariants {
        let mut variants = TestbedVariants::default();
        variants.register(Arc::new(Echo)).expect("register echo");
        variants
    }

    fn config(value: serde_json::Value) -> VariantConfig {
        serde_json::from_value(value).expect("config")
    }

    fn run(driver: &PingTest, variants: &TestbedVariants) -> ResultRecord {
        let mut testbeds = TestbedRegistry::new(variants, &NoHooks, CancellationToken::new());
        testbeds.add(Testbed::new("edge-1", "echo")).expect("add");
        testbeds.create("edge-1").expect("create");
        testbeds.start("edge-1").expect("start");
        let view = testbeds.view("edge-1").expect("view");
        driver
            .run(&view, &config(json!({"sender": "h1", "target": "h2", "count": 4})))
            .expect("run")
    }

    #[rstest]
    fn ping_reports_the_testbed_answer(variants: TestbedVariants) {
        let driver = PingTest::ping(Path::new(SH));
        let record = run(&driver, &variants);
        assert_eq!(record.get("received"), Some(&json!(4)));
        assert_eq!(driver.evaluate_expression(&record, "sent == received").ok(), Some(true));
    }

    #[rstest]
    fn ping_from_uses_the_source_probe(variants: TestbedVariants) {
        let driver = PingTest::ping_from(Path::new(SH));
        let record = run(&driver, &variants);
        assert_eq!(record.get("received"), Some(&json!(0)));
        assert_eq!(driver.evaluate_expression(&record, "sent == received").ok(), Some(false));
    }

    #[rstest]
    #[case::valid(json!({"sender": "h1", "target": "h2"}), true)]
    #[case::with_count(json!({"sender": "h1", "target": "h2", "count": 3, "interval": 0.2}), true)]
    #[case::missing_target(json!({"sender": "h1"}), false)]
    #[case::blank_sender(json!({"sender": " ", "target": "h2"}), false)]
    #[case::unknown_key(json!({"sender": "h1", "target": "h2", "ttl": 3}), false)]
    fn validates_configuration(#[case] value: serde_json::Value, #[case] valid: bool) {
        let driver = PingTest::ping(Path::new(SH));
        assert_eq!(driver.validate_configuration(&config(value)).is_ok(), valid);
    }

    #[rstest]
    #[case::comparison("sent == received", true)]
    #[case::broken("sent ==", false)]
    fn validates_expressions(#[case] expression: &str, #[case] valid: bool) {
        let driver = PingTest::ping(Path::new(SH));
        assert_eq!(driver.validate_expression(expression).is_ok(), valid);
    }

    #[test]
    fn non_boolean_expression_is_an_error() {
        let driver = PingTest::ping(Path::new(SH));
        let record = PingResponse::default().into_record();
        assert!(driver.evaluate_expression(&record, "sent").is_err());
    }

    #[rstest]
    #[case::passes("exit 0", Some(true))]
    #[case::fails("exit 1", Some(false))]
    #[case::errors("exit 2", None)]
    #[case::reads_stdin("grep -q '\"received\":5'", Some(true))]
    fn inline_scripts_map_exit_status(#[case] directive: &str, #[case] expected: Option<bool>) {
        let driver = PingTest::ping(Path::new(SH));
        let record = PingResponse {
            sent: 5,
            received: 5,
            ..PingResponse::default()
        }
        .into_record();
        let outcome = driver.evaluate_script(&record, ScriptSource::Inline(directive));
        assert_eq!(outcome.ok(), expected);
    }

    #[test]
    fn script_files_receive_the_result() {
        let dir = TempDir::new().expect("temp dir");
        let script = dir.path().join("eval.sh");
        std::fs::write(&script, "grep -q '\"sent\":2' || exit 1\n").expect("write");
        let driver = PingTest::ping_from(Path::new(SH));

        let matching = PingResponse {
            sent: 2,
            ..PingResponse::default()
        };
        let other = PingResponse::default();
        assert_eq!(
            driver
                .evaluate_script(&matching.into_record(), ScriptSource::Path(&script))
                .ok(),
            Some(true)
        );
        assert_eq!(
            driver
                .evaluate_script(&other.into_record(), ScriptSource::Path(&script))
                .ok(),
            Some(false)
        );
    }
}
