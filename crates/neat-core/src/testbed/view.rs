//! Probe-capable view of a started testbed handed to test drivers.

use super::TestbedId;
use super::registry::TestbedSlot;
use crate::driver::DriverError;
use crate::probe::{PingRequest, PingResponse};

/// A testbed as seen by a test driver's `run`.
///
/// The view does not hold the testbed's lock; each probe acquires it for the
/// duration of the driver call.
#[derive(Clone, Copy)]
pub struct TestbedView<'a> {
    slot: &'a TestbedSlot,
}

impl<'a> TestbedView<'a> {
    pub(crate) const fn new(slot: &'a TestbedSlot) -> Self {
        Self { slot }
    }

    /// Display name.
    #[must_use]
    pub fn name(&self) -> &'a str {
        self.slot.name()
    }

    /// Generated id.
    #[must_use]
    pub const fn id(&self) -> &'a TestbedId {
        self.slot.id()
    }

    /// Probes reachability between two hosts of the testbed.
    ///
    /// # Errors
    ///
    /// Returns a [`DriverError`] when the testbed is not started or the
    /// driver's probe fails.
    pub fn do_ping(&self, request: &PingRequest) -> Result<PingResponse, DriverError> {
        self.slot.probe(request, false)
    }

    /// Probes reachability from an explicit source host.
    ///
    /// # Errors
    ///
    /// Returns a [`DriverError`] when the testbed is not started or the
    /// driver's probe fails.
    pub fn do_ping_from(&self, request: &PingRequest) -> Result<PingResponse, DriverError> {
        self.slot.probe(request, true)
    }
}

impl std::fmt::Debug for TestbedView<'_> {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("TestbedView")
            .field("name", &self.name())
            .field("id", self.id())
            .finish()
    }
}
