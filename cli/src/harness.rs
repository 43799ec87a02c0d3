//! A worker-thread reference engine.
//!
//! The scheduler treats the instruction-set simulator as an external
//! collaborator; this module provides the stand-in the terminal host
//! drives.  It is not a real instruction set: each context runs a
//! synthetic straight-line program (a counter increment per cycle,
//! a print every so often, exit at the end) whose only purpose is to
//! exercise the scheduler end to end: budgeted stepping, breakpoints,
//! per-context output, and genuinely concurrent access to simulator
//! state from a background thread.
//!
//! The execution model follows the classic worker shape: the UI
//! thread posts a step budget (or an unlimited "play" budget) under a
//! settings mutex and a condition variable wakes the worker, which
//! runs one cycle across every context per iteration, honouring an
//! optional self-paced inter-cycle delay.  Display reads are guarded
//! by an advisory quiesce flag polled with a bounded backoff: while a
//! foreground thread holds the simulator lock the worker starts no
//! new cycles, and the per-cycle state mutex makes the handoff safe
//! regardless.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, sleep, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{event, Level};

use base::prelude::*;
use scheduler::{BreakpointError, SimulatorEngine};

/// Bottom of the user text segment.
const TEXT_BOT: u32 = 0x0040_0000;
/// Bottom of the user data segment.
const DATA_BOT: u32 = 0x1000_0000;
/// Bottom of the kernel data segment.
const K_DATA_BOT: u32 = 0x9000_0000;
/// Initial stack pointer.
const STACK_INIT: u32 = 0x7fff_effc;

/// Backoff while polling the quiesce flag or the advisory lock.
const LOCK_POLL_INTERVAL: Duration = Duration::from_micros(500);

/// Words shown in each data-memory view.
const DATA_VIEW_WORDS: usize = 16;
/// Listing lines shown for long programs.
const TEXT_VIEW_LINES: u64 = 512;

const ADDI_WORD: u32 = 0x2108_0001;
const SYSCALL_WORD: u32 = 0x0000_000c;

#[derive(Debug, Clone)]
pub struct HarnessConfig {
    pub context_count: usize,
    /// Instructions in each context's synthetic program.
    pub program_length: u64,
    /// Emit a stdout line every this many instructions (0 = never).
    pub print_every: u64,
}

fn text_address(index: u64) -> Address {
    Address::new(TEXT_BOT.wrapping_add((index as u32).wrapping_mul(4)))
}

/// One context's machine state.
#[derive(Debug)]
struct ProgramImage {
    context: ContextId,
    pc_index: u64,
    counter: u32,
    general: [u32; GENERAL_REG_COUNT],
    breakpoints: BTreeSet<u64>,
    /// Instruction index whose breakpoint is suppressed for the next
    /// attempt (the skip-once policy, plus the engine's own
    /// continue-after-breakpoint behaviour).
    suppress_at: Option<u64>,
    finished: bool,
    program_length: u64,
    print_every: u64,
}

impl ProgramImage {
    fn new(context: ContextId, config: &HarnessConfig) -> ProgramImage {
        let mut general = [0; GENERAL_REG_COUNT];
        general[29] = STACK_INIT;
        ProgramImage {
            context,
            pc_index: 0,
            counter: 0,
            general,
            breakpoints: BTreeSet::new(),
            suppress_at: None,
            finished: false,
            program_length: config.program_length,
            print_every: config.print_every,
        }
    }

    fn is_print_site(&self, index: u64) -> bool {
        self.print_every != 0 && (index + 1) % self.print_every == 0
    }

    fn execute_one(&mut self, output: &Sender<OutputChunk>) {
        let pc = self.pc_index;
        if self.suppress_at == Some(pc) {
            self.suppress_at = None;
        }
        self.counter = self.counter.wrapping_add(1);
        self.general[8] = self.counter;
        self.pc_index += 1;
        if self.is_print_site(pc) {
            let _ = output.send(OutputChunk {
                context: self.context,
                stream: OutputStream::Stdout,
                text: format!(
                    "{}: executed {} of {} instructions\n",
                    self.context, self.pc_index, self.program_length
                ),
            });
        }
        if self.pc_index >= self.program_length {
            self.finished = true;
            let _ = output.send(OutputChunk {
                context: self.context,
                stream: OutputStream::Stderr,
                text: "Execution finished\n".to_owned(),
            });
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CycleOutcome {
    Stepped,
    BreakpointHit,
    Finished,
}

#[derive(Debug)]
struct SimState {
    images: Vec<ProgramImage>,
    cycles_elapsed: u64,
}

impl SimState {
    fn new(config: &HarnessConfig) -> SimState {
        SimState {
            images: (0..config.context_count)
                .map(|i| ProgramImage::new(ContextId::new(i as u32), config))
                .collect(),
            cycles_elapsed: 0,
        }
    }

    /// Advances every unfinished context by one instruction.  Any
    /// context finishing ends the whole simulation; a breakpoint in
    /// any context pauses everything.
    fn run_cycle(&mut self, output: &Sender<OutputChunk>) -> CycleOutcome {
        self.cycles_elapsed += 1;
        let mut any_breakpoint = false;
        let mut any_finished = false;
        for image in &mut self.images {
            if image.finished {
                continue;
            }
            let pc = image.pc_index;
            if image.breakpoints.contains(&pc) && image.suppress_at != Some(pc) {
                any_breakpoint = true;
                image.suppress_at = Some(pc);
                let _ = output.send(OutputChunk {
                    context: image.context,
                    stream: OutputStream::Stderr,
                    text: format!("Breakpoint encountered at {}\n", text_address(pc)),
                });
                continue;
            }
            image.execute_one(output);
            if image.finished {
                any_finished = true;
            }
        }
        if any_finished {
            CycleOutcome::Finished
        } else if any_breakpoint {
            CycleOutcome::BreakpointHit
        } else {
            CycleOutcome::Stepped
        }
    }
}

#[derive(Debug)]
struct Settings {
    /// Remaining step budget; `None` is an unlimited ("play")
    /// budget.  A paused engine holds `Some(0)`.
    steps_left: Option<u64>,
    delay_micros: u64,
    finished: bool,
    shutdown: bool,
    last_status: ExecutionStatus,
}

impl Settings {
    fn new() -> Settings {
        Settings {
            steps_left: Some(0),
            delay_micros: 0,
            finished: false,
            shutdown: false,
            last_status: ExecutionStatus::Stopped,
        }
    }
}

struct Inner {
    sim: Mutex<SimState>,
    settings: Mutex<Settings>,
    wakeup: Condvar,
    /// Set while a foreground thread holds the simulator lock; the
    /// worker starts no new cycles while it is up.
    ui_hold: AtomicBool,
}

fn lock_ignoring_poison<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn wait_on<'a, T>(condvar: &Condvar, guard: MutexGuard<'a, T>) -> MutexGuard<'a, T> {
    match condvar.wait(guard) {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn worker_loop(inner: Arc<Inner>, output: Sender<OutputChunk>) {
    let mut settings = lock_ignoring_poison(&inner.settings);
    loop {
        while !settings.shutdown && settings.steps_left == Some(0) {
            if settings.last_status == ExecutionStatus::Running {
                settings.last_status = ExecutionStatus::Stopped;
            }
            inner.wakeup.notify_all();
            settings = wait_on(&inner.wakeup, settings);
        }
        if settings.shutdown {
            break;
        }
        if let Some(budget) = settings.steps_left.as_mut() {
            *budget = budget.saturating_sub(1);
        }
        let delay_micros = settings.delay_micros;
        drop(settings);

        while inner.ui_hold.load(Ordering::Acquire) {
            sleep(LOCK_POLL_INTERVAL);
        }
        let outcome = {
            let mut sim = lock_ignoring_poison(&inner.sim);
            sim.run_cycle(&output)
        };

        settings = lock_ignoring_poison(&inner.settings);
        match outcome {
            CycleOutcome::Finished => {
                settings.finished = true;
                settings.last_status = ExecutionStatus::Finished;
                settings.steps_left = Some(0);
                inner.wakeup.notify_all();
                break;
            }
            CycleOutcome::BreakpointHit => {
                settings.last_status = ExecutionStatus::BreakpointHit;
                settings.steps_left = Some(0);
                inner.wakeup.notify_all();
            }
            CycleOutcome::Stepped => {
                settings.last_status = ExecutionStatus::Running;
                if settings.steps_left == Some(0) {
                    inner.wakeup.notify_all();
                }
            }
        }
        if delay_micros > 0 && !settings.shutdown && settings.steps_left != Some(0) {
            // Self-paced mode: space out cycles, but stay
            // interruptible by pause/shutdown/speed changes.
            let (guard, _) = match inner
                .wakeup
                .wait_timeout(settings, Duration::from_micros(delay_micros))
            {
                Ok(result) => result,
                Err(poisoned) => poisoned.into_inner(),
            };
            settings = guard;
        }
    }
    drop(settings);
    inner.wakeup.notify_all();
}

fn spawn_worker(inner: Arc<Inner>, output: Sender<OutputChunk>) -> JoinHandle<()> {
    thread::spawn(move || worker_loop(inner, output))
}

/// The reference engine: a worker thread running synthetic programs
/// in every context.
pub struct WorkerEngine {
    inner: Arc<Inner>,
    output_tx: Sender<OutputChunk>,
    output_rx: Receiver<OutputChunk>,
    worker: Option<JoinHandle<()>>,
    config: HarnessConfig,
}

impl WorkerEngine {
    #[must_use]
    pub fn new(config: HarnessConfig) -> WorkerEngine {
        let (output_tx, output_rx) = mpsc::channel();
        let inner = Arc::new(Inner {
            sim: Mutex::new(SimState::new(&config)),
            settings: Mutex::new(Settings::new()),
            wakeup: Condvar::new(),
            ui_hold: AtomicBool::new(false),
        });
        let worker = spawn_worker(Arc::clone(&inner), output_tx.clone());
        WorkerEngine {
            inner,
            output_tx,
            output_rx,
            worker: Some(worker),
            config,
        }
    }

    fn shutdown_worker(&mut self) {
        {
            let mut settings = lock_ignoring_poison(&self.inner.settings);
            settings.shutdown = true;
        }
        self.inner.wakeup.notify_all();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                event!(Level::ERROR, "simulator worker thread panicked");
            }
        }
    }

    fn with_image<R>(
        &self,
        context: ContextId,
        read: impl FnOnce(&ProgramImage) -> R,
    ) -> Option<R> {
        let sim = lock_ignoring_poison(&self.inner.sim);
        sim.images.get(context.index()).map(read)
    }
}

impl Drop for WorkerEngine {
    fn drop(&mut self) {
        self.shutdown_worker();
    }
}

impl SimulatorEngine for WorkerEngine {
    fn reset(&mut self) {
        self.shutdown_worker();
        {
            let mut sim = lock_ignoring_poison(&self.inner.sim);
            if sim.cycles_elapsed > 0 {
                event!(
                    Level::INFO,
                    "the last program ran for {} cycles",
                    sim.cycles_elapsed
                );
            }
            *sim = SimState::new(&self.config);
        }
        {
            let mut settings = lock_ignoring_poison(&self.inner.settings);
            let delay_micros = settings.delay_micros;
            *settings = Settings::new();
            settings.delay_micros = delay_micros;
        }
        // Output from the previous run must not leak into the new
        // one.
        while self.output_rx.try_recv().is_ok() {}
        self.worker = Some(spawn_worker(
            Arc::clone(&self.inner),
            self.output_tx.clone(),
        ));
    }

    fn step(&mut self, _context: ContextId, steps: u64, skip_breakpoint: bool) -> ExecutionStatus {
        {
            let mut sim = lock_ignoring_poison(&self.inner.sim);
            for image in &mut sim.images {
                image.suppress_at = if skip_breakpoint {
                    Some(image.pc_index)
                } else {
                    None
                };
            }
        }
        let mut settings = lock_ignoring_poison(&self.inner.settings);
        if settings.finished {
            return ExecutionStatus::Finished;
        }
        settings.steps_left = Some(settings.steps_left.unwrap_or(0).saturating_add(steps));
        self.inner.wakeup.notify_all();
        if settings.delay_micros == 0 {
            // Undelayed budgets drain quickly; wait so the caller
            // sees the outcome of this batch.  Self-paced budgets
            // drain on the worker's own schedule and the caller
            // polls the status on later calls instead.
            while settings.steps_left != Some(0) && !settings.finished {
                settings = wait_on(&self.inner.wakeup, settings);
            }
        }
        if settings.finished {
            ExecutionStatus::Finished
        } else {
            settings.last_status
        }
    }

    fn play(&mut self) {
        let mut settings = lock_ignoring_poison(&self.inner.settings);
        if !settings.finished {
            settings.steps_left = None;
            self.inner.wakeup.notify_all();
        }
    }

    fn pause(&mut self) {
        let mut settings = lock_ignoring_poison(&self.inner.settings);
        settings.steps_left = Some(0);
        self.inner.wakeup.notify_all();
    }

    fn set_delay(&mut self, micros: u64) {
        let mut settings = lock_ignoring_poison(&self.inner.settings);
        settings.delay_micros = micros;
        self.inner.wakeup.notify_all();
    }

    fn try_lock_simulator(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        self.inner.ui_hold.store(true, Ordering::Release);
        loop {
            // The flag stops new cycles; waiting out the state mutex
            // waits out the cycle already in flight.
            match self.inner.sim.try_lock() {
                Ok(guard) => {
                    drop(guard);
                    return true;
                }
                Err(_) => {
                    if Instant::now() >= deadline {
                        self.inner.ui_hold.store(false, Ordering::Release);
                        return false;
                    }
                    sleep(LOCK_POLL_INTERVAL);
                }
            }
        }
    }

    fn unlock_simulator(&self) {
        self.inner.ui_hold.store(false, Ordering::Release);
    }

    fn status(&self) -> ExecutionStatus {
        let settings = lock_ignoring_poison(&self.inner.settings);
        if settings.finished {
            ExecutionStatus::Finished
        } else {
            settings.last_status
        }
    }

    fn add_breakpoint(&mut self, context: ContextId, address: Address) -> Result<(), BreakpointError> {
        let mut sim = lock_ignoring_poison(&self.inner.sim);
        let program_length = self.config.program_length;
        let Some(image) = sim.images.get_mut(context.index()) else {
            return Err(BreakpointError::NoSuchContext(context));
        };
        let word: u32 = address.into();
        if word < TEXT_BOT || (word - TEXT_BOT) % 4 != 0 {
            return Err(BreakpointError::Rejected { context, address });
        }
        let index = u64::from((word - TEXT_BOT) / 4);
        if index >= program_length {
            return Err(BreakpointError::Rejected { context, address });
        }
        image.breakpoints.insert(index);
        Ok(())
    }

    fn delete_breakpoint(
        &mut self,
        context: ContextId,
        address: Address,
    ) -> Result<(), BreakpointError> {
        let mut sim = lock_ignoring_poison(&self.inner.sim);
        let Some(image) = sim.images.get_mut(context.index()) else {
            return Err(BreakpointError::NoSuchContext(context));
        };
        let word: u32 = address.into();
        let index = u64::from(word.wrapping_sub(TEXT_BOT) / 4);
        if image.breakpoints.remove(&index) {
            Ok(())
        } else {
            Err(BreakpointError::Rejected { context, address })
        }
    }

    fn general_reg_vals(&self, context: ContextId) -> [u32; GENERAL_REG_COUNT] {
        self.with_image(context, |image| image.general)
            .unwrap_or([0; GENERAL_REG_COUNT])
    }

    fn special_reg_vals(&self, context: ContextId) -> [u32; SPECIAL_REG_COUNT] {
        let mut special = [0; SPECIAL_REG_COUNT];
        if let Some(pc) = self.with_image(context, |image| text_address(image.pc_index)) {
            special[special_reg::PC] = pc.into();
        }
        special
    }

    fn float_reg_vals(&self, _context: ContextId) -> [f32; FLOAT_REG_COUNT] {
        [0.0; FLOAT_REG_COUNT]
    }

    fn double_reg_vals(&self, _context: ContextId) -> [f64; DOUBLE_REG_COUNT] {
        [0.0; DOUBLE_REG_COUNT]
    }

    fn user_data(&self, context: ContextId) -> MemorySegment {
        let mut words = vec![0; DATA_VIEW_WORDS];
        if let Some(counter) = self.with_image(context, |image| image.counter) {
            words[0] = counter;
        }
        MemorySegment {
            base: Address::new(DATA_BOT),
            words,
        }
    }

    fn kernel_data(&self, _context: ContextId) -> MemorySegment {
        MemorySegment {
            base: Address::new(K_DATA_BOT),
            words: vec![0; DATA_VIEW_WORDS],
        }
    }

    fn stack(&self, context: ContextId) -> MemorySegment {
        let sp = self
            .with_image(context, |image| image.general[29])
            .unwrap_or(STACK_INIT);
        MemorySegment {
            base: Address::new(sp & !0xf),
            words: vec![0; DATA_VIEW_WORDS],
        }
    }

    fn user_text(&self, context: ContextId) -> Vec<TextLine> {
        self.with_image(context, |image| {
            (0..image.program_length.min(TEXT_VIEW_LINES))
                .map(|i| {
                    let address = text_address(i);
                    if image.is_print_site(i) {
                        TextLine {
                            address,
                            word: SYSCALL_WORD,
                            listing: format!("[{address}] 0x{SYSCALL_WORD:08x}  syscall"),
                        }
                    } else {
                        TextLine {
                            address,
                            word: ADDI_WORD,
                            listing: format!("[{address}] 0x{ADDI_WORD:08x}  addi $8, $8, 1"),
                        }
                    }
                })
                .collect()
        })
        .unwrap_or_default()
    }

    fn kernel_text(&self, _context: ContextId) -> Vec<TextLine> {
        Vec::new()
    }

    fn drain_output(&mut self) -> Vec<OutputChunk> {
        self.output_rx.try_iter().collect()
    }
}
