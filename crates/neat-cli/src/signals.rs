//! Termination signals assert the run's cancellation token.

use std::io;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use neat_core::CancellationToken;
use signal_hook::consts::signal::{SIGINT, SIGTERM};
use tracing::debug;

use crate::CLI_TARGET;

/// Returns a token that flips when the process receives SIGINT or SIGTERM.
///
/// A second signal of the same kind still only sets the flag; teardown runs
/// to completion either way.
pub(crate) fn cancellation_on_signals() -> io::Result<CancellationToken> {
    let flag = Arc::new(AtomicBool::new(false));
    for signal in [SIGINT, SIGTERM] {
        signal_hook::flag::register(signal, Arc::clone(&flag))?;
    }
    debug!(target: CLI_TARGET, "installed cancellation signal handlers");
    Ok(CancellationToken::from_flag(flag))
}
