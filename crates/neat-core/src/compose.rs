//! Declarative batch document: the testbeds to provision and tests to run.
//!
//! The document is format-agnostic; the CLI reads YAML but anything `serde`
//! can deserialise works. Each hook point accepts either a script path
//! (`pre_start_script`) or an inline command (`pre_start`), not both.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::driver::VariantConfig;
use crate::error::NeatError;
use crate::hook::{Hook, HookPoint};
use crate::testbed::Testbed;
use crate::testcase::Test;

/// A batch of testbeds and tests.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Compose {
    /// Testbeds in provisioning order.
    pub testbeds: Vec<TestbedSpec>,
    /// Tests in execution order.
    pub tests: Vec<TestSpec>,
}

/// Declaration of one testbed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TestbedSpec {
    /// Display name.
    pub name: String,
    /// Testbed driver name.
    pub variant: String,
    /// Request a resource-capped environment.
    pub resource_cap: bool,
    /// Inline pre-start command.
    pub pre_start: Option<String>,
    /// Pre-start script path.
    pub pre_start_script: Option<PathBuf>,
    /// Inline post-start command.
    pub post_start: Option<String>,
    /// Post-start script path.
    pub post_start_script: Option<PathBuf>,
    /// Inline pre-stop command.
    pub pre_stop: Option<String>,
    /// Pre-stop script path.
    pub pre_stop_script: Option<PathBuf>,
    /// Inline post-stop command.
    pub post_stop: Option<String>,
    /// Post-stop script path.
    pub post_stop_script: Option<PathBuf>,
    /// Driver-specific configuration.
    pub config: VariantConfig,
}

impl TestbedSpec {
    /// Builds an unbound [`Testbed`].
    ///
    /// # Errors
    ///
    /// Returns [`NeatError::Config`] when a hook point sets both forms.
    pub fn to_testbed(&self) -> Result<Testbed, NeatError> {
        let hooks = [
            (HookPoint::PreStart, &self.pre_start, &self.pre_start_script),
            (HookPoint::PostStart, &self.post_start, &self.post_start_script),
            (HookPoint::PreStop, &self.pre_stop, &self.pre_stop_script),
            (HookPoint::PostStop, &self.post_stop, &self.post_stop_script),
        ];
        let mut testbed = Testbed::new(&self.name, &self.variant)
            .with_resource_cap(self.resource_cap)
            .with_config(self.config.clone());
        for (point, inline, script) in hooks {
            let selected = select_hook(&self.name, point, inline.as_deref(), script.as_ref())?;
            if let Some(hook) = selected {
                testbed = testbed.with_hook(point, hook);
            }
        }
        Ok(testbed)
    }
}

/// Declaration of one test.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TestSpec {
    /// User-facing identifier.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Test driver name.
    pub variant: String,
    /// Declared order; recorded only.
    pub order: u32,
    /// Declared repeat count; recorded only.
    pub repeats: u32,
    /// Testbed names or ids, in execution order.
    pub testbeds: Vec<String>,
    /// Evaluation expression.
    pub expression: Option<String>,
    /// Inline evaluation directive.
    pub evaluate: Option<String>,
    /// Evaluation script path.
    pub eval_script: Option<PathBuf>,
    /// Inline pre-run command.
    pub pre_run: Option<String>,
    /// Pre-run script path.
    pub pre_run_script: Option<PathBuf>,
    /// Inline post-run command.
    pub post_run: Option<String>,
    /// Post-run script path.
    pub post_run_script: Option<PathBuf>,
    /// Driver-specific configuration.
    pub config: VariantConfig,
}

impl TestSpec {
    /// Builds an unbound [`Test`].
    ///
    /// Evaluation methods are carried over as declared; the engine rejects
    /// missing or ambiguous ones during validation.
    ///
    /// # Errors
    ///
    /// Returns [`NeatError::Config`] when a hook point sets both forms.
    pub fn to_test(&self) -> Result<Test, NeatError> {
        let owner = if self.name.is_empty() { &self.id } else { &self.name };
        let mut test = Test::new(&self.name, &self.variant)
            .with_id(&self.id)
            .with_order(self.order)
            .with_repeats(self.repeats)
            .with_testbeds(self.testbeds.iter().cloned())
            .with_config(self.config.clone());
        if let Some(expression) = &self.expression {
            test = test.with_expression(expression);
        }
        if let Some(directive) = &self.evaluate {
            test = test.with_inline_evaluation(directive);
        }
        if let Some(script) = &self.eval_script {
            test = test.with_eval_script(script);
        }
        let hooks = [
            (HookPoint::PreRun, &self.pre_run, &self.pre_run_script),
            (HookPoint::PostRun, &self.post_run, &self.post_run_script),
        ];
        for (point, inline, script) in hooks {
            if let Some(hook) = select_hook(owner, point, inline.as_deref(), script.as_ref())? {
                test = test.with_hook(point, hook);
            }
        }
        Ok(test)
    }
}

fn select_hook(
    owner: &str,
    point: HookPoint,
    inline: Option<&str>,
    script: Option<&PathBuf>,
) -> Result<Option<Hook>, NeatError> {
    let command = inline.filter(|text| !text.trim().is_empty());
    let path = script.filter(|path| !path.as_os_str().is_empty());
    match (command, path) {
        (Some(_), Some(_)) => Err(NeatError::config(format!(
            "'{owner}' sets both an inline command and a script for its {point} hook"
        ))),
        (Some(text), None) => Ok(Some(Hook::Inline(text.to_owned()))),
        (None, Some(found)) => Ok(Some(Hook::Script(found.clone()))),
        (None, None) => Ok(None),
    }
}
