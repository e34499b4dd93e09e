//! User-facing progress output.
//!
//! Concurrent lifecycle tasks report through one [`Console`]; each event is
//! written as a whole line while the sink's lock is held.

use std::fmt;
use std::io::Write;
use std::sync::Mutex;

use tracing::warn;

use crate::error::Phase;

const CONSOLE_TARGET: &str = "neat_core::console";

/// A progress event printed as one line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressEvent<'a> {
    /// A testbed is being validated and added.
    Adding(&'a str),
    /// A provisioning task was launched.
    Creating(&'a str),
    /// The driver created the testbed.
    Created(&'a str),
    /// The driver started the testbed.
    Started(&'a str),
    /// A teardown task was launched.
    Stopping(&'a str),
    /// The testbed was stopped and removed.
    Stopped(&'a str),
    /// A lifecycle transition failed.
    Failed {
        /// Testbed display name.
        testbed: &'a str,
        /// Failing phase.
        phase: Phase,
    },
    /// A test passed on every testbed.
    TestPassed(&'a str),
    /// A test failed.
    TestFailed(&'a str),
    /// A test was not run.
    TestSkipped(&'a str),
}

impl fmt::Display for ProgressEvent<'_> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Adding(name) => write!(formatter, "Adding Testbed: {name}"),
            Self::Creating(name) => write!(formatter, "Creating Testbed: {name}"),
            Self::Created(name) => {
                write!(formatter, "\n✔️\tTestbed Created: {}", name.to_lowercase())
            }
            Self::Started(name) => {
                write!(formatter, "\n✅\tTestbed Started: {}", name.to_lowercase())
            }
            Self::Stopping(name) => write!(formatter, "Stopping Testbed: {name}"),
            Self::Stopped(name) => write!(formatter, "Stopped Testbed: {name}"),
            Self::Failed { testbed, phase } => {
                write!(formatter, "Failed to {} Testbed: {testbed}", capitalise(*phase))
            }
            Self::TestPassed(name) => {
                write!(formatter, "\n💯\tTest Passed: {}", name.to_lowercase())
            }
            Self::TestFailed(name) => {
                write!(formatter, "\n❌\tTest Failed: {}", name.to_lowercase())
            }
            Self::TestSkipped(name) => {
                write!(formatter, "\n⏭️\tTest Skipped: {}", name.to_lowercase())
            }
        }
    }
}

fn capitalise(phase: Phase) -> String {
    let word = phase.to_string();
    let mut chars = word.chars();
    chars.next().map_or_else(String::new, |first| {
        first.to_uppercase().chain(chars).collect()
    })
}

/// Line-serialising output sink shared by concurrent tasks.
#[derive(Debug)]
pub struct Console<W> {
    sink: Mutex<W>,
}

impl<W: Write> Console<W> {
    /// Wraps a writer.
    pub const fn new(sink: W) -> Self {
        Self {
            sink: Mutex::new(sink),
        }
    }

    /// Writes one progress line.
    pub fn event(&self, event: ProgressEvent<'_>) {
        self.write_block(&format!("{event}\n"));
    }

    /// Writes a block of text without interleaving.
    ///
    /// Output failures are logged, never raised: progress reporting must not
    /// fail a run.
    pub fn write_block(&self, text: &str) {
        let Ok(mut sink) = self.sink.lock() else {
            warn!(target: CONSOLE_TARGET, "console sink poisoned");
            return;
        };
        if let Err(err) = sink.write_all(text.as_bytes()).and_then(|()| sink.flush()) {
            warn!(target: CONSOLE_TARGET, error = %err, "failed to write progress output");
        }
    }

    /// Returns the writer.
    ///
    /// A poisoned lock still yields the writer.
    pub fn into_inner(self) -> W {
        self.sink
            .into_inner()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(ProgressEvent::Adding("Edge-1"), "Adding Testbed: Edge-1")]
    #[case(ProgressEvent::Started("Edge-1"), "\n✅\tTestbed Started: edge-1")]
    #[case(ProgressEvent::TestFailed("Reach"), "\n❌\tTest Failed: reach")]
    #[case(
        ProgressEvent::Failed { testbed: "edge-1", phase: Phase::Create },
        "Failed to Create Testbed: edge-1"
    )]
    fn events_render_as_progress_lines(#[case] event: ProgressEvent<'_>, #[case] expected: &str) {
        assert_eq!(event.to_string(), expected);
    }

    #[test]
    fn concurrent_events_never_share_a_line() {
        let console = Console::new(Vec::new());
        thread::scope(|scope| {
            for index in 0..8 {
                let shared = &console;
                scope.spawn(move || {
                    let name = format!("testbed-{index}");
                    for _ in 0..50 {
                        shared.event(ProgressEvent::Creating(&name));
                    }
                });
            }
        });
        let output = String::from_utf8(console.into_inner()).expect("utf8");
        let lines: Vec<_> = output.lines().collect();
        assert_eq!(lines.len(), 400);
        assert!(lines.iter().all(|line| line.starts_with("Creating Testbed: testbed-")));
    }
}
