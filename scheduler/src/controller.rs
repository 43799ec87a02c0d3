//! The top-level execution state machine and per-frame driver.
//!
//! One `ExecutionController` owns everything needed to run one
//! simulated machine: the engine boundary, the pacing state, the
//! context coordinator, the tick source and the view sink.  There is
//! no process-wide scheduler state anywhere; two controllers are two
//! machines.
//!
//! Instructions are executed right before the display updates.  Each
//! frame callback computes how many cycles this frame is worth (speed
//! curve, normalised by the estimated refresh interval), resolves the
//! possibly-fractional count to whole instructions, steps the engine,
//! and then refreshes the observable state under a timeout-bounded
//! lock.  The event loop therefore cannot race ahead of the display,
//! and the same speed setting advances simulated time at the same
//! wall-clock rate on a 60 Hz laptop panel and a 144 Hz monitor.

use std::time::Duration;

use serde::Serialize;
use tracing::{event, Level};

use base::prelude::*;

use crate::accumulator::CycleAccumulator;
use crate::context::{ActiveChange, ContextCoordinator, ContextError};
use crate::engine::SimulatorEngine;
use crate::frame::{TickHandle, TickSource};
use crate::lock;
use crate::pacing;
use crate::refresh::RefreshRateEstimator;
use crate::view::{ControlState, PlayLabel, ViewSink};

/// How long a steady-state display refresh may poll for the
/// simulator lock before giving up for this frame.
const DISPLAY_LOCK_TIMEOUT: Duration = Duration::from_millis(100);

/// Where the controller is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunState {
    /// Constructed but not yet initialised; nothing is displayable.
    Idle,
    /// Initialised and quiescent; stepping and playing are possible.
    Ready,
    /// Frame-driven stepping is active.
    Running,
    /// The user paused execution.
    UserPaused,
    /// Execution stopped at a breakpoint.
    BreakpointPaused,
    /// The program ran to completion.  Only `init` leaves this state.
    Finished,
}

/// Transient per-frame pacing values.  Reset on init.
#[derive(Debug, Default)]
struct PacingState {
    /// The most recently computed (fractional) cycles-for-this-frame.
    draw_cycle: f64,
    accumulator: CycleAccumulator,
}

impl PacingState {
    fn reset(&mut self) {
        self.draw_cycle = 0.0;
        self.accumulator.reset();
    }
}

/// Drives one simulated machine: owns the play/pause/step/reset
/// transitions, invokes the engine each frame, and publishes
/// observable state to the view sink.
pub struct ExecutionController<E> {
    engine: E,
    ticks: Box<dyn TickSource>,
    view: Box<dyn ViewSink>,
    coordinator: ContextCoordinator,
    state: RunState,
    speed: u32,
    started: bool,
    skip_breakpoint: bool,
    pacing: PacingState,
    refresh: RefreshRateEstimator,
    pending_tick: Option<TickHandle>,
    pending_rehydrate: bool,
}

impl<E: SimulatorEngine> ExecutionController<E> {
    pub fn new(
        engine: E,
        ticks: Box<dyn TickSource>,
        view: Box<dyn ViewSink>,
        context_count: usize,
        initial_speed: u32,
    ) -> ExecutionController<E> {
        ExecutionController {
            engine,
            ticks,
            view,
            coordinator: ContextCoordinator::new(context_count),
            state: RunState::Idle,
            speed: pacing::clamp_speed(initial_speed),
            started: false,
            skip_breakpoint: false,
            pacing: PacingState::default(),
            refresh: RefreshRateEstimator::new(),
            pending_tick: None,
            pending_rehydrate: false,
        }
    }

    #[must_use]
    pub fn run_state(&self) -> RunState {
        self.state
    }

    #[must_use]
    pub fn speed(&self) -> u32 {
        self.speed
    }

    #[must_use]
    pub fn is_playing(&self) -> bool {
        self.state == RunState::Running
    }

    #[must_use]
    pub fn active_context(&self) -> Option<ContextId> {
        self.coordinator.active()
    }

    #[must_use]
    pub fn coordinator(&self) -> &ContextCoordinator {
        &self.coordinator
    }

    #[must_use]
    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// The most recent per-frame cycle count (diagnostics).
    #[must_use]
    pub fn draw_cycle(&self) -> f64 {
        self.pacing.draw_cycle
    }

    /// Resets the scheduler and the engine and makes `context` the
    /// displayed context.
    ///
    /// `reset = true` discards all breakpoints; `reset = false`
    /// preserves them and re-arms them against the freshly reset
    /// engine.  Initialisation is the one place that blocks on the
    /// simulator lock: a reset must not proceed against a
    /// half-quiesced engine.
    pub fn init(&mut self, reset: bool, context: ContextId) -> Result<(), ContextError> {
        event!(Level::INFO, "init: reset={reset}, target {context}");
        self.coordinator.switch_to(context)?;

        self.started = false;
        self.skip_breakpoint = false;
        self.pacing.reset();
        self.refresh.clear();

        self.engine.reset();
        if reset {
            self.coordinator.clear_all_breakpoints();
        } else {
            self.rearm_recorded_breakpoints();
        }
        self.coordinator.clear_all_output();
        self.view.output_replaced(context, "", "");

        let views = lock::with_simulator_blocking(
            &mut self.engine,
            DISPLAY_LOCK_TIMEOUT,
            |engine| collect_views(engine, context, true),
        );
        self.publish_views(context, views);
        self.pending_rehydrate = false;

        self.state = RunState::Ready;
        self.publish_controls();

        if let Some(handle) = self.pending_tick.take() {
            self.ticks.cancel_tick(handle);
        }
        self.pending_tick = Some(self.ticks.request_tick());
        Ok(())
    }

    /// Executes up to `steps` instructions for the active context and
    /// refreshes the display.
    ///
    /// This is the manual step entry point; the frame loop uses the
    /// same machinery with the frame's resolved cycle count.
    pub fn step(&mut self, steps: u64) {
        if !self.stepping_allowed() {
            event!(Level::DEBUG, "step ignored in state {:?}", self.state);
            return;
        }
        if steps > 0 {
            self.step_engine(steps);
        }
        self.refresh_display();
    }

    /// Starts, pauses or resumes frame-driven execution.
    pub fn toggle_play(&mut self) {
        match self.state {
            RunState::Running => {
                self.engine.pause();
                self.state = RunState::UserPaused;
                self.publish_controls();
            }
            RunState::Ready | RunState::UserPaused | RunState::BreakpointPaused => {
                self.started = true;
                self.engine.play();
                self.state = RunState::Running;
                self.publish_controls();
                if let Some(handle) = self.pending_tick.take() {
                    self.ticks.cancel_tick(handle);
                }
                self.pending_tick = Some(self.ticks.request_tick());
            }
            RunState::Idle | RunState::Finished => {
                event!(Level::DEBUG, "toggle_play ignored in state {:?}", self.state);
            }
        }
    }

    /// The per-frame driver.  The host calls this once for each tick
    /// previously requested through the tick source.
    ///
    /// Every frame feeds the refresh-rate estimator, displayed or
    /// not; only `Running` frames execute instructions.  The next
    /// tick is requested on every path except `Finished` (and
    /// `Idle`), so the estimator stays warm across pauses and the
    /// callback chain dies with the program.
    pub fn on_frame(&mut self, timestamp_ms: f64) {
        self.pending_tick = None;
        if self.state == RunState::Idle {
            return;
        }
        self.refresh.push(timestamp_ms);

        if self.state == RunState::Running {
            let scale = pacing::refresh_rate_scale(self.refresh.estimate());
            self.pacing.draw_cycle = pacing::cycles_per_frame(self.speed, scale);
            let steps = self.pacing.accumulator.resolve(self.pacing.draw_cycle);
            event!(
                Level::TRACE,
                "frame: draw_cycle={}, resolved {steps} steps",
                self.pacing.draw_cycle
            );
            if steps > 0 {
                self.step_engine(steps);
            }
            self.refresh_display();
        } else if self.pending_rehydrate {
            // A context switch could not get the lock when it
            // happened; retry now.
            self.refresh_display();
        }

        if self.state != RunState::Finished && self.state != RunState::Idle {
            self.pending_tick = Some(self.ticks.request_tick());
        }
    }

    /// Terminal: the program is done, the controls go dark until the
    /// next `init`.
    pub fn finish(&mut self) {
        event!(Level::INFO, "execution finished");
        self.state = RunState::Finished;
        self.publish_controls();
    }

    /// Changes the pacing speed.  Takes effect on the next frame;
    /// also pushes the equivalent inter-cycle delay to a self-paced
    /// engine.  Never touches the started/playing state.
    pub fn set_speed(&mut self, speed: u32) {
        let speed = pacing::clamp_speed(speed);
        self.speed = speed;
        let delay = pacing::cycle_delay_micros(speed);
        self.engine.set_delay(delay);
        event!(Level::DEBUG, "speed set to {speed}, cycle delay {delay}us");
        if !self.started {
            self.publish_controls();
        }
    }

    /// Makes another enabled context the displayed one.  Execution
    /// state (playing, breakpoints) of both contexts is unaffected;
    /// only what is rendered changes.
    pub fn switch_context(&mut self, context: ContextId) -> Result<(), ContextError> {
        self.coordinator.switch_to(context)?;
        self.rehydrate_active();
        Ok(())
    }

    /// Adds or removes `context` from the enabled rotation.
    pub fn set_context_enabled(
        &mut self,
        context: ContextId,
        enabled: bool,
    ) -> Result<(), ContextError> {
        match self.coordinator.set_enabled(context, enabled)? {
            ActiveChange::Unchanged => {}
            ActiveChange::NewlyActive(_) => self.rehydrate_active(),
            ActiveChange::Cleared => self.view.views_cleared(),
        }
        Ok(())
    }

    /// Registers a breakpoint with the engine and records it so it
    /// survives a non-reset init.
    pub fn add_breakpoint(
        &mut self,
        context: ContextId,
        address: Address,
    ) -> Result<(), crate::engine::BreakpointError> {
        self.engine.add_breakpoint(context, address)?;
        if let Err(e) = self.coordinator.record_breakpoint(context, address) {
            event!(Level::WARN, "breakpoint accepted by engine but not recorded: {e}");
        }
        Ok(())
    }

    pub fn delete_breakpoint(
        &mut self,
        context: ContextId,
        address: Address,
    ) -> Result<(), crate::engine::BreakpointError> {
        self.engine.delete_breakpoint(context, address)?;
        if let Err(e) = self.coordinator.forget_breakpoint(context, address) {
            event!(Level::WARN, "breakpoint removed by engine but not recorded: {e}");
        }
        Ok(())
    }

    fn stepping_allowed(&self) -> bool {
        matches!(
            self.state,
            RunState::Ready | RunState::Running | RunState::UserPaused | RunState::BreakpointPaused
        )
    }

    /// Runs the engine and applies the resulting status transition.
    /// Breakpoint and finish transitions happen here, before the
    /// caller publishes any register/memory refresh.
    fn step_engine(&mut self, steps: u64) {
        let Some(active) = self.coordinator.active() else {
            event!(Level::DEBUG, "no active context, nothing to step");
            return;
        };
        // A manual step while paused must make progress even when
        // sitting on a breakpoint; an automatic (frame-driven) step
        // skips a breakpoint only right after resuming from it.
        let skip = if self.is_playing() {
            self.skip_breakpoint
        } else {
            true
        };
        let status = self.engine.step(active, steps, skip);
        match status {
            ExecutionStatus::Finished => {
                self.drain_engine_output();
                self.finish();
                return;
            }
            ExecutionStatus::BreakpointHit => {
                event!(Level::INFO, "breakpoint hit in {active}");
                self.skip_breakpoint = true;
                if self.state == RunState::Running {
                    self.engine.pause();
                }
                self.state = RunState::BreakpointPaused;
                self.publish_controls();
            }
            ExecutionStatus::Running | ExecutionStatus::Stopped => {
                self.skip_breakpoint = false;
            }
        }
        self.drain_engine_output();
    }

    /// Moves engine output into the per-context buffers and renders
    /// the active context's share.
    fn drain_engine_output(&mut self) {
        let active = self.coordinator.active();
        for chunk in self.engine.drain_output() {
            self.coordinator.append_output(&chunk);
            if Some(chunk.context) == active {
                self.view
                    .output_appended(chunk.context, chunk.stream, &chunk.text);
            }
        }
    }

    /// Publishes register/memory/instruction state for the active
    /// context.  Reads happen under a single timeout-bounded lock
    /// acquisition; on contention the refresh is skipped and retried
    /// next frame.
    fn refresh_display(&mut self) {
        let Some(active) = self.coordinator.active() else {
            return;
        };
        let with_text = self.pending_rehydrate;
        let views = lock::with_simulator(&mut self.engine, DISPLAY_LOCK_TIMEOUT, |engine| {
            collect_views(engine, active, with_text)
        });
        match views {
            Some(views) => {
                self.pending_rehydrate = false;
                self.publish_views(active, views);
            }
            None => {
                event!(Level::TRACE, "display refresh skipped, lock contended");
            }
        }
    }

    /// Re-renders everything for a newly displayed context: buffered
    /// output immediately, register/memory/text as soon as the lock
    /// allows.
    fn rehydrate_active(&mut self) {
        let Some(active) = self.coordinator.active() else {
            return;
        };
        let (stdout, stderr) = match self.coordinator.context(active) {
            Some(ctx) => (ctx.stdout().to_owned(), ctx.stderr().to_owned()),
            None => (String::new(), String::new()),
        };
        self.view.output_replaced(active, &stdout, &stderr);
        self.pending_rehydrate = true;
        self.refresh_display();
    }

    fn rearm_recorded_breakpoints(&mut self) {
        let recorded: Vec<(ContextId, Address)> = self
            .coordinator
            .enabled_ids()
            .into_iter()
            .filter_map(|id| self.coordinator.context(id))
            .flat_map(|ctx| {
                let id = ctx.id();
                ctx.breakpoints().iter().map(move |addr| (id, *addr))
            })
            .collect();
        for (context, address) in recorded {
            if let Err(e) = self.engine.add_breakpoint(context, address) {
                event!(Level::WARN, "could not re-arm breakpoint: {e}");
            }
        }
    }

    fn publish_views(&mut self, context: ContextId, views: CollectedViews) {
        if let Some(text) = views.text {
            self.view.text_changed(context, &text);
        }
        self.view.registers_changed(context, &views.registers);
        self.view.memory_changed(context, &views.memory);
        self.view
            .current_instruction_changed(context, views.registers.pc());
    }

    fn publish_controls(&mut self) {
        let controls = self.controls();
        self.view.controls_changed(&controls);
    }

    /// The control-state derivation published to the UI.
    #[must_use]
    pub fn controls(&self) -> ControlState {
        let enabled = self.stepping_allowed();
        let label = match self.state {
            RunState::Running => PlayLabel::Pause,
            RunState::UserPaused | RunState::BreakpointPaused => PlayLabel::Continue,
            RunState::Idle | RunState::Ready | RunState::Finished => {
                if self.speed == pacing::SPEED_MAX {
                    PlayLabel::Run
                } else {
                    PlayLabel::Play
                }
            }
        };
        ControlState {
            play_enabled: enabled,
            step_enabled: enabled,
            label,
        }
    }
}

struct CollectedViews {
    registers: RegisterSnapshot,
    memory: MemorySnapshot,
    text: Option<TextSnapshot>,
}

/// Reads the display views for one context.  Callers hold the
/// simulator lock.
fn collect_views<E: SimulatorEngine + ?Sized>(
    engine: &E,
    context: ContextId,
    with_text: bool,
) -> CollectedViews {
    CollectedViews {
        registers: RegisterSnapshot {
            general: engine.general_reg_vals(context),
            special: engine.special_reg_vals(context),
            float: engine.float_reg_vals(context),
            double: engine.double_reg_vals(context),
        },
        memory: MemorySnapshot {
            user_data: engine.user_data(context),
            kernel_data: engine.kernel_data(context),
            stack: engine.stack(context),
        },
        text: if with_text {
            Some(TextSnapshot {
                user: engine.user_text(context),
                kernel: engine.kernel_text(context),
            })
        } else {
            None
        },
    }
}

#[cfg(test)]
mod tests;
