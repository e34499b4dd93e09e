//! Built-in drivers for the neat test orchestrator.
//!
//! * [`shell::ShellTestbed`] (`shell`) drives a testbed's lifecycle through
//!   configured shell commands.
//! * [`ping::PingTest`] (`ping` and `ping_from`) runs reachability probes
//!   through a testbed and evaluates the result with [`expression`].
//!
//! [`register_builtin`] adds all of them to the process-wide registries.

pub mod expression;
pub mod ping;
pub mod shell;

mod command;

use std::path::Path;
use std::sync::Arc;

use neat_core::{NeatError, Registration, TestVariants, TestbedVariants};
use tracing::debug;

pub use command::CommandError;

const DRIVERS_TARGET: &str = "neat_drivers";

/// Registers every built-in driver.
///
/// `shell` is the interpreter used by the `shell` testbed driver and by
/// script-based evaluation. Drivers whose tool check fails are left out of
/// the registries and recorded as unavailable.
///
/// # Errors
///
/// Returns [`NeatError::Config`] when a driver name is already registered.
pub fn register_builtin(
    shell: &Path,
    testbeds: &mut TestbedVariants,
    tests: &mut TestVariants,
) -> Result<(), NeatError> {
    let outcomes = [
        testbeds.register(Arc::new(shell::ShellTestbed::new(shell)))?,
        tests.register(Arc::new(ping::PingTest::ping(shell)))?,
        tests.register(Arc::new(ping::PingTest::ping_from(shell)))?,
    ];
    let available = outcomes
        .iter()
        .filter(|outcome| matches!(outcome, Registration::Registered))
        .count();
    debug!(
        target: DRIVERS_TARGET,
        available,
        total = outcomes.len(),
        "registered built-in drivers"
    );
    Ok(())
}
