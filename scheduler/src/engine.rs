//! The boundary to the instruction-set simulator engine.
//!
//! The scheduler does not know how instructions are fetched, decoded
//! or executed; it drives an engine through this trait and interprets
//! the statuses that come back.  An engine may execute entirely
//! within the calling thread, or run its stepping loop on a worker
//! thread, in which case the advisory lock is what keeps display
//! reads from racing the worker.

use std::error::Error;
use std::fmt::{self, Display, Formatter};
use std::time::Duration;

use base::prelude::*;

/// Why a breakpoint could not be registered or removed.
#[derive(Debug, PartialEq, Eq)]
pub enum BreakpointError {
    /// The named context is not loaded in the engine.
    NoSuchContext(ContextId),
    /// The engine rejected the address (not a text address, no
    /// instruction there, or already in the requested state).
    Rejected { context: ContextId, address: Address },
}

impl Display for BreakpointError {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        match self {
            BreakpointError::NoSuchContext(id) => {
                write!(f, "{id} does not exist in the engine")
            }
            BreakpointError::Rejected { context, address } => {
                write!(f, "engine rejected breakpoint at {address} for {context}")
            }
        }
    }
}

impl Error for BreakpointError {}

/// The engine interface consumed by the scheduler.
///
/// `step` is a short, bounded operation: it executes at most `steps`
/// instructions for the given context and returns the resulting
/// status.  The scheduler never needs to cancel a step in flight.
pub trait SimulatorEngine {
    /// Stops any in-flight execution and reloads every context's
    /// program image.  After a reset the engine is quiescent.
    fn reset(&mut self);

    /// Executes up to `steps` instructions for `context`, stopping
    /// early on a breakpoint or program completion.
    ///
    /// `skip_breakpoint` suppresses a breakpoint at the *current*
    /// instruction for this call only, so that resuming from a
    /// breakpoint pause does not immediately re-trigger it.
    fn step(&mut self, context: ContextId, steps: u64, skip_breakpoint: bool) -> ExecutionStatus;

    /// Allows the engine to consume step budget (resume after
    /// `pause`).
    fn play(&mut self);

    /// Stops the engine from consuming further step budget.  Any
    /// instruction already executing completes.
    fn pause(&mut self);

    /// Sets the delay a self-paced engine inserts between cycles.
    fn set_delay(&mut self, micros: u64);

    /// Attempts to take exclusive possession of simulator state,
    /// polling for at most `timeout`.  Returns true on success; the
    /// caller must then call [`SimulatorEngine::unlock_simulator`].
    ///
    /// This is an advisory, non-reentrant lock; the poll is bounded
    /// so a rendering thread never stalls past the timeout.
    fn try_lock_simulator(&self, timeout: Duration) -> bool;

    /// Releases possession taken by a successful
    /// [`SimulatorEngine::try_lock_simulator`].
    fn unlock_simulator(&self);

    /// The engine's current status, without executing anything.
    fn status(&self) -> ExecutionStatus;

    fn add_breakpoint(
        &mut self,
        context: ContextId,
        address: Address,
    ) -> Result<(), BreakpointError>;

    fn delete_breakpoint(
        &mut self,
        context: ContextId,
        address: Address,
    ) -> Result<(), BreakpointError>;

    // Display accessors, all keyed by context and returning
    // fixed-shape sequences.  Callers must hold the simulator lock.
    fn general_reg_vals(&self, context: ContextId) -> [u32; GENERAL_REG_COUNT];
    fn special_reg_vals(&self, context: ContextId) -> [u32; SPECIAL_REG_COUNT];
    fn float_reg_vals(&self, context: ContextId) -> [f32; FLOAT_REG_COUNT];
    fn double_reg_vals(&self, context: ContextId) -> [f64; DOUBLE_REG_COUNT];
    fn user_data(&self, context: ContextId) -> MemorySegment;
    fn kernel_data(&self, context: ContextId) -> MemorySegment;
    fn stack(&self, context: ContextId) -> MemorySegment;
    fn user_text(&self, context: ContextId) -> Vec<TextLine>;
    fn kernel_text(&self, context: ContextId) -> Vec<TextLine>;

    /// Takes the context-tagged stdout/stderr chunks the engine has
    /// produced since the last drain.  Chunks for every context are
    /// delivered, in production order, whether or not that context is
    /// being displayed.
    fn drain_output(&mut self) -> Vec<OutputChunk>;
}
