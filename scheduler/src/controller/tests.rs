use std::cell::RefCell;
use std::collections::BTreeSet;
use std::rc::Rc;
use std::time::Duration;

use base::prelude::*;

use super::{ExecutionController, RunState};
use crate::engine::{BreakpointError, SimulatorEngine};
use crate::frame::{TickHandle, TickSource};
use crate::pacing;
use crate::view::{ControlState, PlayLabel, ViewSink};

const TEXT_BASE: u32 = 0x0040_0000;

fn text_addr(index: u64) -> Address {
    Address::new(TEXT_BASE + 4 * index as u32)
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct StepCall {
    context: ContextId,
    steps: u64,
    skip: bool,
}

/// A deterministic engine running a straight-line program of
/// `program_len` instructions, shared between the controller under
/// test and the assertions.
#[derive(Debug)]
struct EngineState {
    pc: u64,
    program_len: u64,
    breakpoints: BTreeSet<u64>,
    playing: bool,
    delay_micros: Option<u64>,
    resets: u32,
    locked: bool,
    lock_refusals: u32,
    finish_reported: bool,
    step_calls: Vec<StepCall>,
    queued_output: Vec<OutputChunk>,
}

impl EngineState {
    fn new(program_len: u64) -> EngineState {
        EngineState {
            pc: 0,
            program_len,
            breakpoints: BTreeSet::new(),
            playing: false,
            delay_micros: None,
            resets: 0,
            locked: false,
            lock_refusals: 0,
            finish_reported: false,
            step_calls: Vec::new(),
            queued_output: Vec::new(),
        }
    }
}

struct ScriptedEngine {
    state: Rc<RefCell<EngineState>>,
}

impl SimulatorEngine for ScriptedEngine {
    fn reset(&mut self) {
        let mut st = self.state.borrow_mut();
        st.pc = 0;
        st.resets += 1;
        st.finish_reported = false;
        // A reset reloads the program images, which discards any
        // engine-side breakpoints; the controller re-arms recorded
        // ones afterwards.
        st.breakpoints.clear();
    }

    fn step(&mut self, context: ContextId, steps: u64, skip_breakpoint: bool) -> ExecutionStatus {
        let mut st = self.state.borrow_mut();
        st.step_calls.push(StepCall {
            context,
            steps,
            skip: skip_breakpoint,
        });
        let entry_pc = st.pc;
        let mut executed = 0;
        while executed < steps {
            if st.pc >= st.program_len {
                break;
            }
            if st.breakpoints.contains(&st.pc) && !(skip_breakpoint && st.pc == entry_pc) {
                return ExecutionStatus::BreakpointHit;
            }
            st.pc += 1;
            executed += 1;
        }
        if st.pc >= st.program_len {
            if !st.finish_reported {
                st.finish_reported = true;
                st.queued_output.push(OutputChunk {
                    context,
                    stream: OutputStream::Stderr,
                    text: "Execution finished\n".to_owned(),
                });
            }
            ExecutionStatus::Finished
        } else {
            ExecutionStatus::Running
        }
    }

    fn play(&mut self) {
        self.state.borrow_mut().playing = true;
    }

    fn pause(&mut self) {
        self.state.borrow_mut().playing = false;
    }

    fn set_delay(&mut self, micros: u64) {
        self.state.borrow_mut().delay_micros = Some(micros);
    }

    fn try_lock_simulator(&self, _timeout: Duration) -> bool {
        let mut st = self.state.borrow_mut();
        if st.lock_refusals > 0 {
            st.lock_refusals -= 1;
            return false;
        }
        assert!(!st.locked, "simulator lock is not reentrant");
        st.locked = true;
        true
    }

    fn unlock_simulator(&self) {
        let mut st = self.state.borrow_mut();
        assert!(st.locked, "unlock without a matching lock");
        st.locked = false;
    }

    fn status(&self) -> ExecutionStatus {
        let st = self.state.borrow();
        if st.pc >= st.program_len {
            ExecutionStatus::Finished
        } else if st.playing {
            ExecutionStatus::Running
        } else {
            ExecutionStatus::Stopped
        }
    }

    fn add_breakpoint(&mut self, context: ContextId, address: Address) -> Result<(), BreakpointError> {
        if context.index() >= 2 {
            return Err(BreakpointError::NoSuchContext(context));
        }
        let word: u32 = address.into();
        if word < TEXT_BASE || (word - TEXT_BASE) % 4 != 0 {
            return Err(BreakpointError::Rejected { context, address });
        }
        self.state
            .borrow_mut()
            .breakpoints
            .insert(u64::from((word - TEXT_BASE) / 4));
        Ok(())
    }

    fn delete_breakpoint(
        &mut self,
        context: ContextId,
        address: Address,
    ) -> Result<(), BreakpointError> {
        if context.index() >= 2 {
            return Err(BreakpointError::NoSuchContext(context));
        }
        let word: u32 = address.into();
        self.state
            .borrow_mut()
            .breakpoints
            .remove(&u64::from((word - TEXT_BASE) / 4));
        Ok(())
    }

    fn general_reg_vals(&self, _: ContextId) -> [u32; GENERAL_REG_COUNT] {
        [0; GENERAL_REG_COUNT]
    }

    fn special_reg_vals(&self, _: ContextId) -> [u32; SPECIAL_REG_COUNT] {
        let st = self.state.borrow();
        assert!(st.locked, "register read without the simulator lock");
        let mut special = [0; SPECIAL_REG_COUNT];
        special[special_reg::PC] = TEXT_BASE + 4 * st.pc as u32;
        special
    }

    fn float_reg_vals(&self, _: ContextId) -> [f32; FLOAT_REG_COUNT] {
        [0.0; FLOAT_REG_COUNT]
    }

    fn double_reg_vals(&self, _: ContextId) -> [f64; DOUBLE_REG_COUNT] {
        [0.0; DOUBLE_REG_COUNT]
    }

    fn user_data(&self, _: ContextId) -> MemorySegment {
        MemorySegment {
            base: Address::new(0x1000_0000),
            words: vec![0; 8],
        }
    }

    fn kernel_data(&self, _: ContextId) -> MemorySegment {
        MemorySegment {
            base: Address::new(0x9000_0000),
            words: vec![0; 8],
        }
    }

    fn stack(&self, _: ContextId) -> MemorySegment {
        MemorySegment {
            base: Address::new(0x7fff_efdc),
            words: vec![0; 8],
        }
    }

    fn user_text(&self, _: ContextId) -> Vec<TextLine> {
        let st = self.state.borrow();
        (0..st.program_len.min(8))
            .map(|i| TextLine {
                address: text_addr(i),
                word: 0,
                listing: format!("[{}] nop", text_addr(i)),
            })
            .collect()
    }

    fn kernel_text(&self, _: ContextId) -> Vec<TextLine> {
        Vec::new()
    }

    fn drain_output(&mut self) -> Vec<OutputChunk> {
        std::mem::take(&mut self.state.borrow_mut().queued_output)
    }
}

#[derive(Debug, Default)]
struct ViewLog {
    controls: Vec<ControlState>,
    register_updates: Vec<(ContextId, Address)>,
    memory_updates: u32,
    text_updates: Vec<ContextId>,
    output: Vec<(ContextId, OutputStream, String)>,
    replaced: Vec<(ContextId, String, String)>,
    cleared: u32,
}

struct RecordingView {
    log: Rc<RefCell<ViewLog>>,
}

impl ViewSink for RecordingView {
    fn registers_changed(&mut self, context: ContextId, registers: &RegisterSnapshot) {
        self.log
            .borrow_mut()
            .register_updates
            .push((context, registers.pc()));
    }

    fn memory_changed(&mut self, _context: ContextId, _memory: &MemorySnapshot) {
        self.log.borrow_mut().memory_updates += 1;
    }

    fn text_changed(&mut self, context: ContextId, _text: &TextSnapshot) {
        self.log.borrow_mut().text_updates.push(context);
    }

    fn current_instruction_changed(&mut self, _context: ContextId, _pc: Address) {}

    fn controls_changed(&mut self, controls: &ControlState) {
        self.log.borrow_mut().controls.push(*controls);
    }

    fn output_appended(&mut self, context: ContextId, stream: OutputStream, text: &str) {
        self.log
            .borrow_mut()
            .output
            .push((context, stream, text.to_owned()));
    }

    fn output_replaced(&mut self, context: ContextId, stdout: &str, stderr: &str) {
        self.log
            .borrow_mut()
            .replaced
            .push((context, stdout.to_owned(), stderr.to_owned()));
    }

    fn views_cleared(&mut self) {
        self.log.borrow_mut().cleared += 1;
    }
}

#[derive(Debug, Default)]
struct TickLog {
    next: u64,
    requested: Vec<u64>,
    cancelled: Vec<u64>,
}

struct RecordingTicks {
    log: Rc<RefCell<TickLog>>,
}

impl TickSource for RecordingTicks {
    fn request_tick(&mut self) -> TickHandle {
        let mut log = self.log.borrow_mut();
        log.next += 1;
        let handle = log.next;
        log.requested.push(handle);
        TickHandle(handle)
    }

    fn cancel_tick(&mut self, handle: TickHandle) {
        self.log.borrow_mut().cancelled.push(handle.0);
    }
}

struct Fixture {
    controller: ExecutionController<ScriptedEngine>,
    engine: Rc<RefCell<EngineState>>,
    view: Rc<RefCell<ViewLog>>,
    ticks: Rc<RefCell<TickLog>>,
}

fn setup(program_len: u64, initial_speed: u32) -> Fixture {
    let engine = Rc::new(RefCell::new(EngineState::new(program_len)));
    let view = Rc::new(RefCell::new(ViewLog::default()));
    let ticks = Rc::new(RefCell::new(TickLog::default()));
    let controller = ExecutionController::new(
        ScriptedEngine {
            state: Rc::clone(&engine),
        },
        Box::new(RecordingTicks {
            log: Rc::clone(&ticks),
        }),
        Box::new(RecordingView {
            log: Rc::clone(&view),
        }),
        2,
        initial_speed,
    );
    Fixture {
        controller,
        engine,
        view,
        ticks,
    }
}

fn ctx(id: u32) -> ContextId {
    ContextId::new(id)
}

#[test]
fn test_init_reaches_ready_and_arms_frame_loop() {
    let mut f = setup(10, pacing::SPEED_MAX);
    assert_eq!(f.controller.run_state(), RunState::Idle);
    f.controller.init(true, ctx(0)).expect("context 0 is enabled");
    assert_eq!(f.controller.run_state(), RunState::Ready);

    let view = f.view.borrow();
    let controls = view.controls.last().expect("init publishes controls");
    assert!(controls.play_enabled);
    assert!(controls.step_enabled);
    assert_eq!(controls.label, PlayLabel::Run);
    assert_eq!(view.text_updates, vec![ctx(0)]);
    assert_eq!(view.replaced.len(), 1, "output display is blanked");
    assert!(view.memory_updates >= 1);
    assert!(!view.register_updates.is_empty());

    assert_eq!(f.ticks.borrow().requested.len(), 1);
    assert_eq!(f.engine.borrow().resets, 1);
}

#[test]
fn test_frames_before_init_are_ignored() {
    let mut f = setup(10, pacing::SPEED_MAX);
    f.controller.on_frame(0.0);
    assert!(f.ticks.borrow().requested.is_empty());
    assert!(f.engine.borrow().step_calls.is_empty());
}

#[test]
fn test_end_to_end_run_to_finish() {
    let mut f = setup(10, 50);
    f.controller.init(true, ctx(0)).expect("init");
    f.controller.set_speed(pacing::SPEED_MAX);
    f.controller.toggle_play();
    assert_eq!(f.controller.run_state(), RunState::Running);
    assert!(f.engine.borrow().playing);
    assert_eq!(
        f.view.borrow().controls.last().map(|c| c.label),
        Some(PlayLabel::Pause)
    );

    // The first frame has no refresh estimate yet, so the reference
    // scale applies: speed 100 is 8192 cycles, far beyond the
    // 10-instruction program.
    f.controller.on_frame(0.0);
    assert_eq!(f.controller.run_state(), RunState::Finished);

    let engine = f.engine.borrow();
    assert_eq!(engine.pc, 10);
    assert_eq!(
        engine.step_calls,
        vec![StepCall {
            context: ctx(0),
            steps: 8192,
            skip: false,
        }]
    );
    drop(engine);

    let view = f.view.borrow();
    let controls = view.controls.last().expect("finish publishes controls");
    assert!(!controls.play_enabled);
    assert!(!controls.step_enabled);
    assert!(view
        .output
        .iter()
        .any(|(c, s, text)| *c == ctx(0)
            && *s == OutputStream::Stderr
            && text.contains("Execution finished")));
    drop(view);

    // The callback chain dies with the program...
    assert_eq!(f.ticks.borrow().requested.len(), 2);
    // ...the idle tick armed by init having been withdrawn when play
    // re-armed the loop.
    assert_eq!(f.ticks.borrow().cancelled, vec![1]);
    // ...and the dead controls stay dead.
    f.controller.toggle_play();
    assert_eq!(f.controller.run_state(), RunState::Finished);
    f.controller.step(1);
    assert_eq!(f.engine.borrow().step_calls.len(), 1);
}

#[test]
fn test_breakpoint_pauses_and_resume_skips_once() {
    let mut f = setup(10, pacing::SPEED_MAX);
    f.controller.init(true, ctx(0)).expect("init");
    f.controller
        .add_breakpoint(ctx(0), text_addr(3))
        .expect("engine accepts text breakpoints");
    f.controller.toggle_play();

    f.controller.on_frame(0.0);
    assert_eq!(f.controller.run_state(), RunState::BreakpointPaused);
    assert_eq!(
        f.view.borrow().controls.last().map(|c| c.label),
        Some(PlayLabel::Continue)
    );
    {
        let engine = f.engine.borrow();
        // Stopped before the breakpointed instruction, engine told
        // to stop consuming budget.
        assert_eq!(engine.pc, 3);
        assert!(!engine.playing);
        assert_eq!(engine.step_calls.len(), 1);
    }

    // Frames keep arriving while paused (the estimator stays warm),
    // but no instructions execute.
    f.controller.on_frame(16.0);
    f.controller.on_frame(32.0);
    assert_eq!(f.engine.borrow().step_calls.len(), 1);

    // Resuming must not immediately re-trigger the same breakpoint.
    f.controller.toggle_play();
    assert_eq!(f.controller.run_state(), RunState::Running);
    f.controller.on_frame(48.0);

    let engine = f.engine.borrow();
    assert_eq!(engine.step_calls.len(), 2);
    assert!(engine.step_calls[1].skip, "resume passes the skip-once flag");
    assert_eq!(engine.pc, 10, "execution proceeded past the breakpoint");
    drop(engine);
    assert_eq!(f.controller.run_state(), RunState::Finished);
}

#[test]
fn test_manual_step_always_skips_current_breakpoint() {
    let mut f = setup(10, 50);
    f.controller.init(true, ctx(0)).expect("init");
    f.controller.step(1);

    let engine = f.engine.borrow();
    assert_eq!(engine.pc, 1);
    assert_eq!(
        engine.step_calls,
        vec![StepCall {
            context: ctx(0),
            steps: 1,
            skip: true,
        }]
    );
    drop(engine);

    assert_eq!(f.controller.run_state(), RunState::Ready);
    // The step refreshed the register view with the new PC.
    assert_eq!(
        f.view.borrow().register_updates.last(),
        Some(&(ctx(0), text_addr(1)))
    );
}

#[test]
fn test_set_speed_pushes_delay_without_touching_state() {
    let mut f = setup(1000, 50);
    f.controller.init(true, ctx(0)).expect("init");
    assert_eq!(
        f.view.borrow().controls.last().map(|c| c.label),
        Some(PlayLabel::Play)
    );

    f.controller.set_speed(pacing::SPEED_MAX);
    assert_eq!(
        f.engine.borrow().delay_micros,
        Some(pacing::cycle_delay_micros(pacing::SPEED_MAX))
    );
    assert_eq!(
        f.view.borrow().controls.last().map(|c| c.label),
        Some(PlayLabel::Run)
    );
    assert_eq!(f.controller.run_state(), RunState::Ready);

    f.controller.toggle_play();
    let controls_published = f.view.borrow().controls.len();
    f.controller.set_speed(30);
    assert_eq!(f.engine.borrow().delay_micros, Some(pacing::cycle_delay_micros(30)));
    assert_eq!(f.controller.run_state(), RunState::Running);
    // Once started, speed changes no longer relabel the play control.
    assert_eq!(f.view.borrow().controls.len(), controls_published);

    // Out-of-range values are clamped before reaching the curves.
    f.controller.set_speed(0);
    assert_eq!(f.controller.speed(), pacing::SPEED_MIN);
}

#[test]
fn test_init_without_reset_rearms_recorded_breakpoints() {
    let mut f = setup(10, pacing::SPEED_MAX);
    f.controller.init(true, ctx(0)).expect("init");
    f.controller
        .add_breakpoint(ctx(0), text_addr(3))
        .expect("breakpoint accepted");

    f.controller.init(false, ctx(0)).expect("re-init");
    assert!(
        f.engine.borrow().breakpoints.contains(&3),
        "breakpoint survived the engine reset"
    );

    f.controller.init(true, ctx(0)).expect("full reset");
    assert!(f.engine.borrow().breakpoints.is_empty());
}

#[test]
fn test_low_speed_frames_skip_engine_calls_but_refresh() {
    let mut f = setup(1000, 50);
    f.controller.init(true, ctx(0)).expect("init");
    f.controller.set_speed(pacing::SPEED_MIN);
    f.controller.toggle_play();

    let refreshes_before = f.view.borrow().register_updates.len();
    f.controller.on_frame(0.0);
    // Speed 1 is 1/30 of a cycle per reference frame: nothing to
    // execute yet, but the display still refreshes.
    assert!(f.engine.borrow().step_calls.is_empty());
    assert_eq!(
        f.view.borrow().register_updates.len(),
        refreshes_before + 1
    );
    assert!(f.controller.draw_cycle() < 1.0);
    assert!(f.controller.draw_cycle() > 0.0);
}

#[test]
fn test_step_count_is_scaled_by_refresh_rate() {
    let mut f = setup(1_000_000, pacing::SPEED_MAX);
    f.controller.init(true, ctx(0)).expect("init");
    f.controller.toggle_play();

    // First frame: no estimate, reference scale.
    f.controller.on_frame(0.0);
    assert_eq!(f.engine.borrow().step_calls[0].steps, 8192);

    // Second frame arrives 8ms later, i.e. a 125 Hz display; the
    // per-frame count shrinks so cycles per second stay constant.
    f.controller.on_frame(8.0);
    let scaled = f.engine.borrow().step_calls[1].steps;
    assert_eq!(scaled, (8192.0 * 8.0 * 60.0 / 1000.0) as u64);
}

#[test]
fn test_switch_context_rehydrates_buffers_and_text() {
    let mut f = setup(1000, 50);
    f.controller.init(true, ctx(0)).expect("init");

    // Output for the inactive context arrives tagged and is buffered
    // but not rendered.
    f.engine.borrow_mut().queued_output.push(OutputChunk {
        context: ctx(1),
        stream: OutputStream::Stdout,
        text: "from context one\n".to_owned(),
    });
    f.controller.step(1);
    assert!(f
        .view
        .borrow()
        .output
        .iter()
        .all(|(c, _, _)| *c == ctx(0)));

    f.controller.switch_context(ctx(1)).expect("context 1 enabled");
    assert_eq!(f.controller.active_context(), Some(ctx(1)));
    let view = f.view.borrow();
    assert_eq!(
        view.replaced.last(),
        Some(&(ctx(1), "from context one\n".to_owned(), String::new()))
    );
    assert!(view.text_updates.contains(&ctx(1)));
}

#[test]
fn test_disabling_active_context_promotes_then_clears() {
    let mut f = setup(1000, 50);
    f.controller.init(true, ctx(0)).expect("init");

    f.controller
        .set_context_enabled(ctx(0), false)
        .expect("context 0 exists");
    assert_eq!(f.controller.active_context(), Some(ctx(1)));
    assert_eq!(f.view.borrow().replaced.last().map(|r| r.0), Some(ctx(1)));

    f.controller
        .set_context_enabled(ctx(1), false)
        .expect("context 1 exists");
    assert_eq!(f.controller.active_context(), None);
    assert_eq!(f.view.borrow().cleared, 1);

    // With nothing displayable there is nothing to step.
    f.controller.step(1);
    assert!(f.engine.borrow().step_calls.is_empty());
}

#[test]
fn test_contended_lock_skips_refresh_until_next_attempt() {
    let mut f = setup(1000, 50);
    f.controller.init(true, ctx(0)).expect("init");

    f.engine.borrow_mut().lock_refusals = 1;
    f.controller.step(1);
    let refreshes = f.view.borrow().register_updates.len();

    // The step itself went through; only the display read was
    // deferred.
    assert_eq!(f.engine.borrow().step_calls.len(), 1);

    f.controller.step(1);
    assert_eq!(f.view.borrow().register_updates.len(), refreshes + 1);
}
