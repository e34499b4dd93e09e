//! Per-run registry of testbeds and the lifecycle transitions over them.

use std::sync::{Mutex, MutexGuard};
use std::time::Instant;

use time::OffsetDateTime;
use tracing::{debug, info, warn};

use super::{Testbed, TestbedId, TestbedState, TestbedView};
use crate::driver::{DriverError, DriverHandle, TestbedDriver};
use crate::error::{EntityKind, NeatError, Phase, error_chain};
use crate::hook::{HookInvocation, HookLauncher, HookPoint};
use crate::metrics::{Metrics, ResourceSnapshot, millis};
use crate::probe::{PingRequest, PingResponse};
use crate::readiness::CancellationToken;
use crate::registry::TestbedVariants;

const TESTBED_TARGET: &str = "neat_core::testbed";

/// Storage owned by one testbed.
///
/// Concurrent lifecycle tasks each lock only the slot of the testbed they
/// drive.
pub(crate) struct TestbedSlot {
    id: TestbedId,
    name: String,
    testbed: Mutex<Testbed>,
}

impl TestbedSlot {
    pub(crate) const fn id(&self) -> &TestbedId {
        &self.id
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    fn lock(&self) -> Result<MutexGuard<'_, Testbed>, NeatError> {
        self.testbed.lock().map_err(|_| NeatError::Poisoned {
            testbed: self.name.clone(),
        })
    }

    pub(crate) fn probe(
        &self,
        request: &PingRequest,
        from_source: bool,
    ) -> Result<PingResponse, DriverError> {
        let testbed = self
            .testbed
            .lock()
            .map_err(|_| DriverError::new("testbed is unusable after a task panicked"))?;
        if testbed.state() != TestbedState::Started {
            return Err(DriverError::new(format!(
                "testbed is {}, not started",
                testbed.state()
            )));
        }
        let handle = testbed
            .handle()
            .ok_or_else(|| DriverError::new("testbed has not been created"))?;
        let driver = testbed
            .driver()
            .map_err(|err| DriverError::new(err.to_string()))?;
        debug!(
            target: TESTBED_TARGET,
            testbed = %self.name,
            sender = %request.sender,
            target_host = %request.target,
            from_source,
            "probing"
        );
        if from_source {
            driver.do_ping_from(&testbed.context(), handle, request)
        } else {
            driver.do_ping(&testbed.context(), handle, request)
        }
    }
}

/// The testbeds of one orchestration run.
///
/// Created fresh for each run and dropped with it. Lookups accept either the
/// generated id or the display name and ignore ASCII case; when several
/// testbeds share a name the first added wins.
pub struct TestbedRegistry<'env> {
    variants: &'env TestbedVariants,
    hooks: &'env dyn HookLauncher,
    cancel: CancellationToken,
    slots: Vec<TestbedSlot>,
}

impl<'env> TestbedRegistry<'env> {
    /// Creates an empty registry.
    #[must_use]
    pub fn new(
        variants: &'env TestbedVariants,
        hooks: &'env dyn HookLauncher,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            variants,
            hooks,
            cancel,
            slots: Vec::new(),
        }
    }

    /// Validates a testbed, checks its configuration and stores it.
    ///
    /// No id is allocated when validation fails.
    ///
    /// # Errors
    ///
    /// Returns the validation or lookup error that rejected the testbed.
    pub fn add(&mut self, mut testbed: Testbed) -> Result<TestbedId, NeatError> {
        testbed.validate(self.variants)?;
        testbed
            .driver()?
            .validate_configuration(testbed.config())
            .map_err(|err| {
                NeatError::validation(EntityKind::Testbed, testbed.name(), error_chain(&err))
            })?;

        let id = TestbedId::generate();
        testbed.assign_id(id.clone());
        info!(
            target: TESTBED_TARGET,
            testbed = testbed.name(),
            variant = testbed.variant(),
            id = %id,
            "testbed added"
        );
        self.slots.push(TestbedSlot {
            id: id.clone(),
            name: testbed.name().to_owned(),
            testbed: Mutex::new(testbed),
        });
        Ok(id)
    }

    /// Resolves an id or name to the testbed's id.
    ///
    /// # Errors
    ///
    /// Returns [`NeatError::NotFound`] when nothing matches.
    pub fn resolve(&self, term: &str) -> Result<TestbedId, NeatError> {
        self.slot(term).map(|slot| slot.id.clone())
    }

    /// Returns a probe-capable view of a testbed for test drivers.
    ///
    /// # Errors
    ///
    /// Returns [`NeatError::NotFound`] when nothing matches.
    pub fn view(&self, term: &str) -> Result<TestbedView<'_>, NeatError> {
        self.slot(term).map(TestbedView::new)
    }

    /// Ids of every testbed in the order they were added.
    #[must_use]
    pub fn ids(&self) -> Vec<TestbedId> {
        self.slots.iter().map(|slot| slot.id.clone()).collect()
    }

    /// Number of testbeds.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Returns `true` when no testbed has been added.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Current lifecycle state of a testbed.
    ///
    /// # Errors
    ///
    /// Returns [`NeatError::NotFound`] or [`NeatError::Poisoned`].
    pub fn state(&self, term: &str) -> Result<TestbedState, NeatError> {
        self.inspect(term, Testbed::state)
    }

    /// Copy of a testbed's metrics.
    ///
    /// # Errors
    ///
    /// Returns [`NeatError::NotFound`] or [`NeatError::Poisoned`].
    pub fn metrics(&self, term: &str) -> Result<Metrics, NeatError> {
        self.inspect(term, |testbed| testbed.metrics().clone())
    }

    /// Runs `read` against a testbed while holding its slot.
    ///
    /// # Errors
    ///
    /// Returns [`NeatError::NotFound`] or [`NeatError::Poisoned`].
    pub fn inspect<R>(&self, term: &str, read: impl FnOnce(&Testbed) -> R) -> Result<R, NeatError> {
        let slot = self.slot(term)?;
        let testbed = slot.lock()?;
        Ok(read(&testbed))
    }

    /// Creates the environment.
    ///
    /// # Errors
    ///
    /// Returns [`NeatError::InvalidState`] unless the testbed is freshly
    /// validated, or [`NeatError::Driver`] when the driver fails.
    pub fn create(&self, term: &str) -> Result<(), NeatError> {
        let slot = self.slot(term)?;
        let mut testbed = slot.lock()?;
        require_state(&testbed, Phase::Create, &[TestbedState::Validated])?;
        let driver = testbed.driver()?;

        let at = OffsetDateTime::now_utc();
        let clock = Instant::now();
        let handle = driver
            .create(&testbed.context())
            .map_err(|err| NeatError::driver(&slot.name, Phase::Create, err))?;
        let elapsed = clock.elapsed();

        info!(
            target: TESTBED_TARGET,
            testbed = %slot.name,
            handle = %handle.id,
            elapsed_ms = millis(elapsed),
            "testbed created"
        );
        testbed.set_handle(Some(handle));
        testbed.metrics_mut().record_creation(at, elapsed);
        testbed.set_state(TestbedState::Created);
        Ok(())
    }

    /// Starts the environment, running the start hooks around it.
    ///
    /// A post-start hook failure is reported but the environment is left
    /// started.
    ///
    /// # Errors
    ///
    /// Returns [`NeatError::Driver`] when the testbed was never created or
    /// the driver fails, [`NeatError::Hook`] when a hook fails and
    /// [`NeatError::Cancelled`] when the run is shutting down.
    pub fn start(&self, term: &str) -> Result<(), NeatError> {
        let slot = self.slot(term)?;
        let mut testbed = slot.lock()?;
        let handle = created_handle(&testbed, &slot.name, Phase::Start)?;
        require_state(
            &testbed,
            Phase::Start,
            &[TestbedState::Created, TestbedState::Stopped],
        )?;
        if self.cancel.is_cancelled() {
            return Err(NeatError::Cancelled);
        }
        let driver = testbed.driver()?;
        self.run_hook(&testbed, driver.as_ref(), HookPoint::PreStart)?;

        let at = OffsetDateTime::now_utc();
        let clock = Instant::now();
        driver
            .start(&testbed.context(), &handle, &self.cancel)
            .map_err(|err| NeatError::driver(&slot.name, Phase::Start, err))?;
        let elapsed = clock.elapsed();
        let snapshot = sample(&testbed, driver.as_ref(), &handle);

        info!(
            target: TESTBED_TARGET,
            testbed = %slot.name,
            elapsed_ms = millis(elapsed),
            "testbed started"
        );
        testbed.metrics_mut().begin_run(at, elapsed, snapshot);
        testbed.set_state(TestbedState::Started);
        self.run_hook(&testbed, driver.as_ref(), HookPoint::PostStart)
    }

    /// Stops the environment, finalizing the active run's metrics.
    ///
    /// # Errors
    ///
    /// Returns [`NeatError::NoActiveRun`] when the testbed was never started,
    /// [`NeatError::Driver`] when the driver fails and [`NeatError::Hook`]
    /// when a hook fails.
    pub fn stop(&self, term: &str) -> Result<(), NeatError> {
        let slot = self.slot(term)?;
        let mut testbed = slot.lock()?;
        if testbed.metrics().active_run().is_none() {
            return Err(NeatError::NoActiveRun {
                testbed: slot.name.clone(),
            });
        }
        require_state(&testbed, Phase::Stop, &[TestbedState::Started])?;
        let handle = created_handle(&testbed, &slot.name, Phase::Stop)?;
        let driver = testbed.driver()?;
        self.run_hook(&testbed, driver.as_ref(), HookPoint::PreStop)?;

        let snapshot = sample(&testbed, driver.as_ref(), &handle);
        let at = OffsetDateTime::now_utc();
        let clock = Instant::now();
        driver
            .stop(&testbed.context(), &handle)
            .map_err(|err| NeatError::driver(&slot.name, Phase::Stop, err))?;
        let elapsed = clock.elapsed();

        testbed
            .metrics_mut()
            .finish_run(at, elapsed, snapshot)
            .map_err(|_| NeatError::NoActiveRun {
                testbed: slot.name.clone(),
            })?;
        testbed.set_state(TestbedState::Stopped);
        info!(
            target: TESTBED_TARGET,
            testbed = %slot.name,
            elapsed_ms = millis(elapsed),
            "testbed stopped"
        );
        self.run_hook(&testbed, driver.as_ref(), HookPoint::PostStop)
    }

    /// Removes the environment.
    ///
    /// # Errors
    ///
    /// Returns [`NeatError::InvalidState`] unless the testbed is created or
    /// stopped, or [`NeatError::Driver`] when the driver fails.
    pub fn remove(&self, term: &str) -> Result<(), NeatError> {
        self.remove_from(term, &[TestbedState::Created, TestbedState::Stopped])
    }

    /// Removes the environment even when it is still started.
    ///
    /// Used by teardown after a failed stop so the environment is not left
    /// behind. The active run's metrics are left unfinished.
    ///
    /// # Errors
    ///
    /// Returns [`NeatError::InvalidState`] unless the testbed is created,
    /// started or stopped, or [`NeatError::Driver`] when the driver fails.
    pub fn force_remove(&self, term: &str) -> Result<(), NeatError> {
        self.remove_from(
            term,
            &[
                TestbedState::Created,
                TestbedState::Started,
                TestbedState::Stopped,
            ],
        )
    }

    fn remove_from(&self, term: &str, allowed: &[TestbedState]) -> Result<(), NeatError> {
        let slot = self.slot(term)?;
        let mut testbed = slot.lock()?;
        require_state(&testbed, Phase::Remove, allowed)?;
        let handle = created_handle(&testbed, &slot.name, Phase::Remove)?;
        let driver = testbed.driver()?;

        let at = OffsetDateTime::now_utc();
        let clock = Instant::now();
        driver
            .remove(&testbed.context(), &handle)
            .map_err(|err| NeatError::driver(&slot.name, Phase::Remove, err))?;
        let elapsed = clock.elapsed();

        info!(
            target: TESTBED_TARGET,
            testbed = %slot.name,
            elapsed_ms = millis(elapsed),
            "testbed removed"
        );
        testbed.metrics_mut().record_removal(at, elapsed);
        testbed.set_handle(None);
        testbed.set_state(TestbedState::Removed);
        Ok(())
    }

    /// Probes reachability between two hosts of a started testbed.
    ///
    /// # Errors
    ///
    /// Returns [`NeatError::Driver`] with [`Phase::Probe`] on failure.
    pub fn do_ping(&self, term: &str, request: &PingRequest) -> Result<PingResponse, NeatError> {
        let slot = self.slot(term)?;
        slot.probe(request, false)
            .map_err(|err| NeatError::driver(&slot.name, Phase::Probe, err))
    }

    /// Probes reachability from an explicit source host.
    ///
    /// # Errors
    ///
    /// Returns [`NeatError::Driver`] with [`Phase::Probe`] on failure.
    pub fn do_ping_from(
        &self,
        term: &str,
        request: &PingRequest,
    ) -> Result<PingResponse, NeatError> {
        let slot = self.slot(term)?;
        slot.probe(request, true)
            .map_err(|err| NeatError::driver(&slot.name, Phase::Probe, err))
    }

    fn slot(&self, term: &str) -> Result<&TestbedSlot, NeatError> {
        self.slots
            .iter()
            .find(|slot| slot.id.as_str().eq_ignore_ascii_case(term))
            .or_else(|| {
                self.slots
                    .iter()
                    .find(|slot| slot.name.eq_ignore_ascii_case(term))
            })
            .ok_or_else(|| NeatError::NotFound {
                kind: EntityKind::Testbed,
                term: term.to_owned(),
            })
    }

    fn run_hook(
        &self,
        testbed: &Testbed,
        driver: &dyn TestbedDriver,
        point: HookPoint,
    ) -> Result<(), NeatError> {
        let Some(hook) = testbed.hooks().get(point) else {
            return Ok(());
        };
        let context = testbed.context();
        let invocation = HookInvocation::new(point, testbed.name(), hook, |script| {
            driver.hook_arguments(script, &context, testbed.handle())
        });
        debug!(
            target: TESTBED_TARGET,
            testbed = testbed.name(),
            point = %point,
            "running hook"
        );
        self.hooks
            .launch(&invocation)
            .map_err(|source| NeatError::Hook {
                owner: testbed.name().to_owned(),
                point,
                source,
            })
    }
}

fn require_state(
    testbed: &Testbed,
    phase: Phase,
    allowed: &[TestbedState],
) -> Result<(), NeatError> {
    if allowed.contains(&testbed.state()) {
        return Ok(());
    }
    Err(NeatError::InvalidState {
        testbed: testbed.name().to_owned(),
        phase,
        state: testbed.state(),
    })
}

fn created_handle(testbed: &Testbed, name: &str, phase: Phase) -> Result<DriverHandle, NeatError> {
    testbed.handle().cloned().ok_or_else(|| {
        NeatError::driver(name, phase, DriverError::new("testbed has not been created"))
    })
}

fn sample(
    testbed: &Testbed,
    driver: &dyn TestbedDriver,
    handle: &DriverHandle,
) -> Option<ResourceSnapshot> {
    driver
        .resource_snapshot(&testbed.context(), handle)
        .unwrap_or_else(|err| {
            warn!(
                target: TESTBED_TARGET,
                testbed = testbed.name(),
                error = %err,
                "resource snapshot failed"
            );
            None
        })
}
