//! Testbeds and their lifecycle.
//!
//! A [`Testbed`] starts unbound. [`Testbed::validate`] resolves its variant
//! name against the testbed-driver registry and binds the driver; only then
//! can it be added to a [`TestbedRegistry`], which assigns its id and drives
//! the linear lifecycle
//! `Unbound -> Validated -> Created -> Started -> Stopped -> Removed`.

mod registry;
mod view;

use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::driver::{DriverHandle, TestbedContext, TestbedDriver, VariantConfig};
use crate::error::{EntityKind, NeatError};
use crate::hook::{Hook, HookPoint, LifecycleHooks};
use crate::metrics::Metrics;
use crate::registry::TestbedVariants;

pub use self::registry::TestbedRegistry;
pub use self::view::TestbedView;

/// Globally unique testbed identifier, distinct from the display name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct TestbedId(String);

impl TestbedId {
    /// Generates a fresh identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    /// Borrows the identifier text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TestbedId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.0)
    }
}

/// Position of a testbed in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TestbedState {
    /// Declared but no driver bound.
    Unbound,
    /// Driver bound and configuration checked.
    Validated,
    /// Environment created.
    Created,
    /// Environment running.
    Started,
    /// Environment stopped.
    Stopped,
    /// Environment removed.
    Removed,
}

impl fmt::Display for TestbedState {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(match self {
            Self::Unbound => "unbound",
            Self::Validated => "validated",
            Self::Created => "created",
            Self::Started => "started",
            Self::Stopped => "stopped",
            Self::Removed => "removed",
        })
    }
}

/// A provisioned test environment bound to a driver.
pub struct Testbed {
    id: Option<TestbedId>,
    name: String,
    variant: String,
    resource_cap: bool,
    hooks: LifecycleHooks,
    config: VariantConfig,
    driver: Option<Arc<dyn TestbedDriver>>,
    handle: Option<DriverHandle>,
    state: TestbedState,
    metrics: Metrics,
}

impl fmt::Debug for Testbed {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Testbed")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("variant", &self.variant)
            .field("state", &self.state)
            .field("handle", &self.handle)
            .finish_non_exhaustive()
    }
}

impl Testbed {
    /// Declares an unbound testbed.
    #[must_use]
    pub fn new(name: impl Into<String>, variant: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
            variant: variant.into(),
            resource_cap: false,
            hooks: LifecycleHooks::default(),
            config: VariantConfig::default(),
            driver: None,
            handle: None,
            state: TestbedState::Unbound,
            metrics: Metrics::default(),
        }
    }

    /// Requests a resource-capped environment.
    #[must_use]
    pub const fn with_resource_cap(mut self, resource_cap: bool) -> Self {
        self.resource_cap = resource_cap;
        self
    }

    /// Attaches a hook to a lifecycle point.
    #[must_use]
    pub fn with_hook(mut self, point: HookPoint, hook: Hook) -> Self {
        self.hooks.set(point, hook);
        self
    }

    /// Sets the driver-specific configuration.
    #[must_use]
    pub fn with_config(mut self, config: VariantConfig) -> Self {
        self.config = config;
        self
    }

    /// Identifier assigned when the testbed was added to a registry.
    #[must_use]
    pub const fn id(&self) -> Option<&TestbedId> {
        self.id.as_ref()
    }

    /// Display name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Driver variant name.
    #[must_use]
    pub fn variant(&self) -> &str {
        &self.variant
    }

    /// Current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> TestbedState {
        self.state
    }

    /// Configured hooks.
    #[must_use]
    pub const fn hooks(&self) -> &LifecycleHooks {
        &self.hooks
    }

    /// Handle returned by the driver's `create`, while the environment exists.
    #[must_use]
    pub const fn handle(&self) -> Option<&DriverHandle> {
        self.handle.as_ref()
    }

    /// Lifecycle metrics.
    #[must_use]
    pub const fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Resolves and binds the driver.
    ///
    /// Does not call into the driver.
    ///
    /// # Errors
    ///
    /// Returns [`NeatError::Validation`] for an empty name and the registry's
    /// lookup error when the variant is not registered.
    pub fn validate(&mut self, variants: &TestbedVariants) -> Result<(), NeatError> {
        if self.name.trim().is_empty() {
            return Err(NeatError::validation(
                EntityKind::Testbed,
                &self.name,
                "name must not be empty",
            ));
        }
        let driver = variants.lookup(&self.variant)?;
        self.driver = Some(driver);
        self.state = TestbedState::Validated;
        Ok(())
    }

    pub(crate) fn driver(&self) -> Result<Arc<dyn TestbedDriver>, NeatError> {
        self.driver.clone().ok_or_else(|| {
            NeatError::validation(EntityKind::Testbed, &self.name, "no driver bound")
        })
    }

    pub(crate) fn context(&self) -> TestbedContext<'_> {
        TestbedContext {
            id: self.id.as_ref().map_or("", TestbedId::as_str),
            name: &self.name,
            resource_cap: self.resource_cap,
            config: &self.config,
        }
    }

    pub(crate) const fn config(&self) -> &VariantConfig {
        &self.config
    }

    pub(crate) fn assign_id(&mut self, id: TestbedId) {
        self.id = Some(id);
    }

    pub(crate) const fn set_state(&mut self, state: TestbedState) {
        self.state = state;
    }

    pub(crate) fn set_handle(&mut self, handle: Option<DriverHandle>) {
        self.handle = handle;
    }

    pub(crate) const fn metrics_mut(&mut self) -> &mut Metrics {
        &mut self.metrics
    }
}
