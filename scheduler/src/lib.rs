//! This crate implements the pacing and multi-context scheduling
//! layer of an interactive instruction-level simulator: it decides,
//! frame by frame, how many simulated instructions to execute before
//! the next display refresh, keeps perceived execution speed stable
//! across displays with different refresh rates, and coordinates
//! access to simulator state shared between a background stepping
//! thread and a foreground rendering thread.
#![crate_name = "scheduler"]

mod accumulator;
mod context;
mod controller;
mod engine;
mod frame;
mod lock;
mod pacing;
mod refresh;
mod view;

pub use accumulator::CycleAccumulator;
pub use context::{ActiveChange, ContextCoordinator, ContextError, SimulationContext};
pub use controller::{ExecutionController, RunState};
pub use engine::{BreakpointError, SimulatorEngine};
pub use frame::{TickHandle, TickSource};
pub use pacing::{
    clamp_speed, cycle_delay_micros, cycles_per_frame, refresh_rate_scale, SPEED_KNEE, SPEED_MAX,
    SPEED_MIN,
};
pub use refresh::RefreshRateEstimator;
pub use view::{ControlState, PlayLabel, ViewSink};
