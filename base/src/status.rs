use std::fmt::{self, Display, Formatter};

use serde::Serialize;

/// The outcome of asking the engine to execute instructions, as seen
/// at the scheduler boundary.
///
/// The engine's internal status vocabulary may be richer (the
/// scheduler does not care whether an idle engine is waiting on a
/// step budget or merely between cycles); anything that is neither a
/// breakpoint nor the end of the program folds into `Running` or
/// `Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ExecutionStatus {
    /// The engine executed instructions and can execute more.
    Running,
    /// The engine is idle (paused, or out of step budget).
    Stopped,
    /// Execution reached an address with a breakpoint set; the
    /// instruction at that address has not been executed.
    BreakpointHit,
    /// The simulated program has run to completion.  Terminal.
    Finished,
}

impl ExecutionStatus {
    /// True for statuses after which no further stepping is possible
    /// without a reset.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, ExecutionStatus::Finished)
    }
}

impl Display for ExecutionStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        f.write_str(match self {
            ExecutionStatus::Running => "running",
            ExecutionStatus::Stopped => "stopped",
            ExecutionStatus::BreakpointHit => "breakpoint hit",
            ExecutionStatus::Finished => "finished",
        })
    }
}

#[test]
fn test_only_finished_is_terminal() {
    assert!(ExecutionStatus::Finished.is_terminal());
    assert!(!ExecutionStatus::Running.is_terminal());
    assert!(!ExecutionStatus::Stopped.is_terminal());
    assert!(!ExecutionStatus::BreakpointHit.is_terminal());
}
