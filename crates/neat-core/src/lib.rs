//! Core engine of the neat test orchestrator.
//!
//! A run provisions a set of *testbeds* through pluggable testbed drivers,
//! executes *tests* against them through pluggable test drivers, and tears
//! everything down again. Drivers are looked up by name in a
//! [`VariantRegistry`]; the [`Orchestrator`] sequences the phases of a
//! [`Compose`] document and returns a [`RunReport`].
//!
//! The crate performs no terminal or signal handling of its own. Progress is
//! written to a caller-supplied [`Console`] and cancellation arrives through
//! a [`CancellationToken`].

pub mod compose;
pub mod console;
pub mod driver;
pub mod error;
pub mod hook;
pub mod metrics;
pub mod orchestrator;
pub mod probe;
pub mod readiness;
pub mod registry;
pub mod testbed;
pub mod testcase;

pub use compose::{Compose, TestSpec, TestbedSpec};
pub use console::{Console, ProgressEvent};
pub use driver::{
    DriverError, DriverHandle, ResultRecord, ScriptSource, TestDriver, TestbedContext,
    TestbedDriver, Tool, Variant, VariantConfig,
};
pub use error::{EntityKind, NeatError, Phase, error_chain};
pub use hook::{Hook, HookError, HookInvocation, HookLauncher, HookPoint, ShellLauncher};
pub use metrics::{Metrics, ResourceSnapshot, RunMetrics, TestMetrics};
pub use orchestrator::{Orchestrator, OrchestratorSettings, RunReport, TestOutcome};
pub use probe::{PingRequest, PingResponse};
pub use readiness::{CancellationToken, ReadinessError, RetryPolicy};
pub use registry::{Registration, TestVariants, TestbedVariants, VariantRegistry};
pub use testbed::{Testbed, TestbedId, TestbedRegistry, TestbedState, TestbedView};
pub use testcase::{Evaluation, Test, TestEngine};

#[cfg(test)]
mod tests;
