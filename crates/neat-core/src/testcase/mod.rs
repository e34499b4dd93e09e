//! Declarative tests and the engine that runs them.
//!
//! A [`Test`] names a test variant, the testbeds it runs on and exactly one
//! evaluation method. [`TestEngine::validate`] binds the driver and resolves
//! the testbeds against the run's [`TestbedRegistry`];
//! [`TestEngine::run_valid`] then runs the driver on each testbed in
//! declaration order, evaluating every result before moving on and stopping
//! at the first testbed that does not pass.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use time::OffsetDateTime;
use tracing::{debug, info, warn};

use crate::driver::{DriverError, ResultRecord, ScriptSource, TestDriver, VariantConfig};
use crate::error::{EntityKind, NeatError, Phase, error_chain};
use crate::hook::{Hook, HookInvocation, HookLauncher, HookPoint};
use crate::metrics::{TestMetrics, millis};
use crate::registry::TestVariants;
use crate::testbed::{TestbedId, TestbedRegistry};

const TEST_TARGET: &str = "neat_core::test";

/// How a test reduces a result record to pass or fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Evaluation {
    /// Expression handed to the driver's `evaluate_expression`.
    Expression(String),
    /// Inline directive handed to the driver's `evaluate_script`.
    Inline(String),
    /// Script file handed to the driver's `evaluate_script`.
    Script(PathBuf),
}

/// A declarative check run against one or more testbeds.
#[derive(Clone, Default)]
pub struct Test {
    id: String,
    name: String,
    variant: String,
    order: u32,
    repeats: u32,
    testbed_names: Vec<String>,
    expression: Option<String>,
    evaluate: Option<String>,
    eval_script: Option<PathBuf>,
    pre_run: Option<Hook>,
    post_run: Option<Hook>,
    config: VariantConfig,
    driver: Option<Arc<dyn TestDriver>>,
    testbeds: Vec<TestbedId>,
    metrics: BTreeMap<String, TestMetrics>,
}

impl std::fmt::Debug for Test {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("Test")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("variant", &self.variant)
            .field("testbeds", &self.testbed_names)
            .finish_non_exhaustive()
    }
}

impl Test {
    /// Declares a test of the given variant.
    #[must_use]
    pub fn new(name: impl Into<String>, variant: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            variant: variant.into(),
            ..Self::default()
        }
    }

    /// Sets the user-facing identifier.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Records the declared order. It is not consulted when running.
    #[must_use]
    pub const fn with_order(mut self, order: u32) -> Self {
        self.order = order;
        self
    }

    /// Records the declared repeat count. It is not consulted when running.
    #[must_use]
    pub const fn with_repeats(mut self, repeats: u32) -> Self {
        self.repeats = repeats;
        self
    }

    /// Names the testbeds to run on, in order.
    #[must_use]
    pub fn with_testbeds<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.testbed_names = names.into_iter().map(Into::into).collect();
        self
    }

    /// Evaluates results with an expression.
    #[must_use]
    pub fn with_expression(mut self, expression: impl Into<String>) -> Self {
        self.expression = Some(expression.into());
        self
    }

    /// Evaluates results with an inline directive.
    #[must_use]
    pub fn with_inline_evaluation(mut self, directive: impl Into<String>) -> Self {
        self.evaluate = Some(directive.into());
        self
    }

    /// Evaluates results with a script file.
    #[must_use]
    pub fn with_eval_script(mut self, script: impl Into<PathBuf>) -> Self {
        self.eval_script = Some(script.into());
        self
    }

    /// Attaches a hook to [`HookPoint::PreRun`] or [`HookPoint::PostRun`].
    ///
    /// Testbed lifecycle points are ignored.
    #[must_use]
    pub fn with_hook(mut self, point: HookPoint, hook: Hook) -> Self {
        match point {
            HookPoint::PreRun => self.pre_run = Some(hook),
            HookPoint::PostRun => self.post_run = Some(hook),
            HookPoint::PreStart
            | HookPoint::PostStart
            | HookPoint::PreStop
            | HookPoint::PostStop => {}
        }
        self
    }

    /// Sets the driver-specific configuration.
    #[must_use]
    pub fn with_config(mut self, config: VariantConfig) -> Self {
        self.config = config;
        self
    }

    /// Declared identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Name used in progress lines: the name, or the id when unnamed.
    #[must_use]
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.id
        } else {
            &self.name
        }
    }

    /// Driver variant name.
    #[must_use]
    pub fn variant(&self) -> &str {
        &self.variant
    }

    /// Declared order.
    #[must_use]
    pub const fn order(&self) -> u32 {
        self.order
    }

    /// Declared repeat count.
    #[must_use]
    pub const fn repeats(&self) -> u32 {
        self.repeats
    }

    /// Testbed names as declared.
    #[must_use]
    pub fn testbed_names(&self) -> &[String] {
        &self.testbed_names
    }

    /// Per-testbed timing keyed by testbed name.
    #[must_use]
    pub const fn metrics(&self) -> &BTreeMap<String, TestMetrics> {
        &self.metrics
    }

    /// Returns the single evaluation method.
    ///
    /// Empty strings count as unset.
    ///
    /// # Errors
    ///
    /// Returns [`NeatError::NoEvaluationMethod`] when none is set and
    /// [`NeatError::AmbiguousEvaluation`] when more than one is.
    pub fn evaluation(&self) -> Result<Evaluation, NeatError> {
        let mut methods = Vec::new();
        if let Some(expression) = self.expression.as_ref().filter(|text| !text.trim().is_empty()) {
            methods.push(("expression", Evaluation::Expression(expression.clone())));
        }
        if let Some(directive) = self.evaluate.as_ref().filter(|text| !text.trim().is_empty()) {
            methods.push(("evaluate", Evaluation::Inline(directive.clone())));
        }
        if let Some(script) = self
            .eval_script
            .as_ref()
            .filter(|path| !path.as_os_str().is_empty())
        {
            methods.push(("eval_script", Evaluation::Script(script.clone())));
        }

        match methods.len() {
            0 => Err(NeatError::NoEvaluationMethod {
                test: self.display_name().to_owned(),
            }),
            1 => methods
                .pop()
                .map(|(_, evaluation)| evaluation)
                .ok_or_else(|| NeatError::NoEvaluationMethod {
                    test: self.display_name().to_owned(),
                }),
            _ => Err(NeatError::AmbiguousEvaluation {
                test: self.display_name().to_owned(),
                methods: methods
                    .iter()
                    .map(|(field, _)| *field)
                    .collect::<Vec<_>>()
                    .join(", "),
            }),
        }
    }

    fn hook(&self, point: HookPoint) -> Option<&Hook> {
        match point {
            HookPoint::PreRun => self.pre_run.as_ref(),
            HookPoint::PostRun => self.post_run.as_ref(),
            HookPoint::PreStart
            | HookPoint::PostStart
            | HookPoint::PreStop
            | HookPoint::PostStop => None,
        }
    }

    fn invalid(&self, error: &DriverError) -> NeatError {
        NeatError::validation(EntityKind::Test, self.display_name(), error_chain(error))
    }
}

/// Validates and runs tests against a run's testbeds.
///
/// Tests run strictly one at a time; the engine never touches more than one
/// testbed concurrently.
pub struct TestEngine<'env> {
    variants: &'env TestVariants,
    hooks: &'env dyn HookLauncher,
}

impl<'env> TestEngine<'env> {
    /// Creates an engine over the given test drivers.
    #[must_use]
    pub fn new(variants: &'env TestVariants, hooks: &'env dyn HookLauncher) -> Self {
        Self { variants, hooks }
    }

    /// Binds the driver and resolves the testbeds of `test`.
    ///
    /// Re-validating replaces earlier bindings.
    ///
    /// # Errors
    ///
    /// Returns the first failure: unknown variant, unresolved testbed,
    /// rejected configuration, missing or ambiguous evaluation method, or an
    /// evaluation the driver cannot perform.
    pub fn validate(
        &self,
        test: &mut Test,
        testbeds: &TestbedRegistry<'_>,
    ) -> Result<(), NeatError> {
        let driver = self.variants.lookup(&test.variant)?;
        let resolved = test
            .testbed_names
            .iter()
            .map(|name| testbeds.resolve(name))
            .collect::<Result<Vec<_>, _>>()?;
        driver
            .validate_configuration(&test.config)
            .map_err(|err| test.invalid(&err))?;

        match test.evaluation()? {
            Evaluation::Expression(expression) => driver
                .validate_expression(&expression)
                .map_err(|err| test.invalid(&err))?,
            Evaluation::Inline(_) | Evaluation::Script(_) if !driver.supports_scripts() => {
                return Err(NeatError::validation(
                    EntityKind::Test,
                    test.display_name(),
                    format!("variant '{}' does not support evaluation scripts", test.variant),
                ));
            }
            Evaluation::Inline(_) | Evaluation::Script(_) => {}
        }

        if test.order != 0 || test.repeats > 1 {
            debug!(
                target: TEST_TARGET,
                test = test.display_name(),
                order = test.order,
                repeats = test.repeats,
                "order and repeats are recorded but not consulted"
            );
        }
        if resolved.is_empty() {
            warn!(target: TEST_TARGET, test = test.display_name(), "test references no testbeds");
        }

        test.testbeds = resolved;
        test.driver = Some(driver);
        Ok(())
    }

    /// Validates `test`, then runs it on each of its testbeds in order.
    ///
    /// Returns `Ok(false)` at the first testbed whose result evaluates false;
    /// later testbeds are not attempted. The post-run hook runs whenever the
    /// pre-run hook succeeded.
    ///
    /// # Errors
    ///
    /// Returns validation errors, [`NeatError::Hook`] for failing hooks and
    /// [`NeatError::Evaluation`] when the driver fails to run or evaluate.
    pub fn run_valid(
        &self,
        test: &mut Test,
        testbeds: &TestbedRegistry<'_>,
    ) -> Result<bool, NeatError> {
        self.validate(test, testbeds)?;
        let driver = test.driver.clone().ok_or_else(|| {
            NeatError::validation(EntityKind::Test, test.display_name(), "no driver bound")
        })?;
        let evaluation = test.evaluation()?;

        self.run_hook(test, HookPoint::PreRun)?;
        let outcome = run_on_testbeds(test, testbeds, driver.as_ref(), &evaluation);
        let post_run = self.run_hook(test, HookPoint::PostRun);
        let passed = outcome?;
        post_run?;

        info!(target: TEST_TARGET, test = test.display_name(), passed, "test finished");
        Ok(passed)
    }

    fn run_hook(&self, test: &Test, point: HookPoint) -> Result<(), NeatError> {
        let Some(hook) = test.hook(point) else {
            return Ok(());
        };
        let invocation = HookInvocation::new(point, test.display_name(), hook, |script| {
            vec![script.display().to_string()]
        });
        self.hooks
            .launch(&invocation)
            .map_err(|source| NeatError::Hook {
                owner: test.display_name().to_owned(),
                point,
                source,
            })
    }
}

fn run_on_testbeds(
    test: &mut Test,
    testbeds: &TestbedRegistry<'_>,
    driver: &dyn TestDriver,
    evaluation: &Evaluation,
) -> Result<bool, NeatError> {
    for id in test.testbeds.clone() {
        let view = testbeds.view(id.as_str())?;
        let started_at = OffsetDateTime::now_utc();
        let clock = Instant::now();

        let verdict = driver
            .run(&view, &test.config)
            .map_err(|source| (Phase::Run, source))
            .and_then(|record| {
                evaluate(driver, &record, evaluation).map_err(|source| (Phase::Evaluate, source))
            });
        let execution_time = clock.elapsed();
        test.metrics.insert(
            view.name().to_owned(),
            TestMetrics {
                started_at,
                execution_time,
            },
        );

        let passed = verdict.map_err(|(phase, source)| NeatError::Evaluation {
            test: test.display_name().to_owned(),
            testbed: view.name().to_owned(),
            phase,
            source,
        })?;
        debug!(
            target: TEST_TARGET,
            test = test.display_name(),
            testbed = view.name(),
            passed,
            elapsed_ms = millis(execution_time),
            "evaluated test on testbed"
        );
        if !passed {
            return Ok(false);
        }
    }
    Ok(true)
}

fn evaluate(
    driver: &dyn TestDriver,
    record: &ResultRecord,
    evaluation: &Evaluation,
) -> Result<bool, DriverError> {
    match evaluation {
        Evaluation::Expression(expression) => driver.evaluate_expression(record, expression),
        Evaluation::Inline(directive) => {
            driver.evaluate_script(record, ScriptSource::Inline(directive))
        }
        Evaluation::Script(path) => {
            driver.evaluate_script(record, ScriptSource::Path(Path::new(path)))
        }
    }
}
