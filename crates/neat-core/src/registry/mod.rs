//! Name-keyed registries of testbed and test drivers.
//!
//! A [`VariantRegistry`] is populated once at startup and only read
//! afterwards. Registration is gated on every required tool passing its
//! availability check; a variant whose check fails is recorded as unavailable
//! and a warning is logged, so later lookups can tell "not installed" apart
//! from "never heard of it". Name matching is exact.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::driver::{TestDriver, TestbedDriver, Variant};
use crate::error::{EntityKind, NeatError};

const VARIANT_TARGET: &str = "neat_core::variant";

/// Registry of testbed drivers.
pub type TestbedVariants = VariantRegistry<dyn TestbedDriver>;

/// Registry of test drivers.
pub type TestVariants = VariantRegistry<dyn TestDriver>;

/// Outcome of [`VariantRegistry::register`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Registration {
    /// The variant is available for lookup.
    Registered,
    /// A required tool failed its check and the variant was omitted.
    Unavailable {
        /// Tool that failed.
        tool: String,
    },
}

/// Registry of drivers of one kind.
pub struct VariantRegistry<D: ?Sized> {
    kind: EntityKind,
    variants: BTreeMap<String, Arc<D>>,
    unavailable: BTreeMap<String, String>,
}

impl<D: ?Sized> std::fmt::Debug for VariantRegistry<D> {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("VariantRegistry")
            .field("kind", &self.kind)
            .field("variants", &self.variants.keys().collect::<Vec<_>>())
            .field("unavailable", &self.unavailable)
            .finish()
    }
}

impl<D> VariantRegistry<D>
where
    D: Variant + ?Sized,
{
    /// Creates an empty registry for the given entity kind.
    #[must_use]
    pub const fn new(kind: EntityKind) -> Self {
        Self {
            kind,
            variants: BTreeMap::new(),
            unavailable: BTreeMap::new(),
        }
    }

    /// Registers a variant after checking its required tools.
    ///
    /// # Errors
    ///
    /// Returns [`NeatError::Config`] if a variant with the same name is
    /// already registered or recorded as unavailable.
    pub fn register(&mut self, variant: Arc<D>) -> Result<Registration, NeatError> {
        let name = variant.name().to_owned();
        if self.variants.contains_key(&name) || self.unavailable.contains_key(&name) {
            return Err(NeatError::config(format!(
                "{} variant '{name}' is already registered",
                self.kind
            )));
        }

        if let Some(tool) = variant.tools().into_iter().find(|tool| !tool.check()) {
            let tool_name = tool.name().to_owned();
            warn!(
                target: VARIANT_TARGET,
                kind = %self.kind,
                variant = %name,
                tool = %tool_name,
                "variant unavailable due to failed tool dependency check"
            );
            self.unavailable.insert(name, tool_name.clone());
            return Ok(Registration::Unavailable { tool: tool_name });
        }

        debug!(target: VARIANT_TARGET, kind = %self.kind, variant = %name, "variant registered");
        self.variants.insert(name, variant);
        Ok(Registration::Registered)
    }

    /// Returns `true` when a usable variant is registered under `name`.
    #[must_use]
    pub fn exists(&self, name: &str) -> bool {
        self.variants.contains_key(name)
    }

    /// Returns the variant registered under `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<D>> {
        self.variants.get(name).cloned()
    }

    /// Resolves `name` to a driver.
    ///
    /// # Errors
    ///
    /// Returns [`NeatError::DriverUnavailable`] when the variant was omitted
    /// because of a failed tool check, and [`NeatError::DriverNotFound`]
    /// otherwise.
    pub fn lookup(&self, name: &str) -> Result<Arc<D>, NeatError> {
        if let Some(variant) = self.get(name) {
            return Ok(variant);
        }
        Err(match self.unavailable.get(name) {
            Some(tool) => NeatError::DriverUnavailable {
                kind: self.kind,
                name: name.to_owned(),
                tool: tool.clone(),
            },
            None => NeatError::DriverNotFound {
                kind: self.kind,
                name: name.to_owned(),
            },
        })
    }

    /// Iterates over the usable variants in name order.
    pub fn variants(&self) -> impl Iterator<Item = &Arc<D>> {
        self.variants.values()
    }

    /// Iterates over omitted variants and the tool that failed for each.
    pub fn unavailable(&self) -> impl Iterator<Item = (&str, &str)> {
        self.unavailable
            .iter()
            .map(|(name, tool)| (name.as_str(), tool.as_str()))
    }

    /// Kind of driver held by this registry.
    #[must_use]
    pub const fn kind(&self) -> EntityKind {
        self.kind
    }

    /// Returns the number of usable variants.
    #[must_use]
    pub fn len(&self) -> usize {
        self.variants.len()
    }

    /// Returns `true` when no usable variants are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.variants.is_empty()
    }
}

impl Default for TestbedVariants {
    fn default() -> Self {
        Self::new(EntityKind::Testbed)
    }
}

impl Default for TestVariants {
    fn default() -> Self {
        Self::new(EntityKind::Test)
    }
}
