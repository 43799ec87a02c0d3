//! The locking discipline around shared simulator state.
//!
//! Display reads and state mutations go through these helpers so the
//! engine's advisory lock is released on every exit path.  Two
//! flavours exist on purpose: the steady-state frame path makes a
//! single timeout-bounded attempt and simply skips its work on
//! contention (a stale frame is fine, a data race is not), while
//! initialisation retries until it succeeds, because a reset must not
//! proceed against a half-quiesced engine.

use std::time::Duration;

use tracing::{event, Level};

use crate::engine::SimulatorEngine;

/// Runs `work` with exclusive possession of simulator state, or
/// returns `None` without running it if possession cannot be taken
/// within `timeout`.
pub(crate) fn with_simulator<E, R>(
    engine: &mut E,
    timeout: Duration,
    work: impl FnOnce(&mut E) -> R,
) -> Option<R>
where
    E: SimulatorEngine + ?Sized,
{
    if !engine.try_lock_simulator(timeout) {
        event!(
            Level::TRACE,
            "simulator lock not acquired within {timeout:?}, skipping"
        );
        return None;
    }
    let result = work(engine);
    engine.unlock_simulator();
    Some(result)
}

/// Runs `work` with exclusive possession of simulator state,
/// retrying the acquisition until it succeeds.  Used only where
/// correctness requires a fully quiesced engine (initialisation).
pub(crate) fn with_simulator_blocking<E, R>(
    engine: &mut E,
    attempt: Duration,
    work: impl FnOnce(&mut E) -> R,
) -> R
where
    E: SimulatorEngine + ?Sized,
{
    let mut attempts: u32 = 0;
    while !engine.try_lock_simulator(attempt) {
        attempts += 1;
        event!(
            Level::DEBUG,
            "still waiting for the simulator lock after {attempts} attempts"
        );
    }
    let result = work(engine);
    engine.unlock_simulator();
    result
}
