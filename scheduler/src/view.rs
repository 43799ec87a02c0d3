//! The interface through which display collaborators observe the
//! scheduler.
//!
//! The scheduler pushes; views render.  Register/memory/instruction
//! signals are scoped to the currently active context (inactive
//! contexts keep accumulating state silently and are rehydrated in
//! full on switch).

use std::fmt::{self, Display, Formatter};

use serde::Serialize;

use base::prelude::*;

/// What the play control should say, derived from
/// `{speed == max, playing, finished}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PlayLabel {
    /// Not started, speed at maximum: unthrottled execution.
    Run,
    /// Not started, throttled.
    Play,
    /// Currently executing; activating pauses.
    Pause,
    /// Paused (by the user or by a breakpoint); activating resumes.
    Continue,
}

impl Display for PlayLabel {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        f.write_str(match self {
            PlayLabel::Run => "Run",
            PlayLabel::Play => "Play",
            PlayLabel::Pause => "Pause",
            PlayLabel::Continue => "Continue",
        })
    }
}

/// Enablement and labeling of the execution controls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ControlState {
    pub play_enabled: bool,
    pub step_enabled: bool,
    pub label: PlayLabel,
}

/// Receives scheduler-driven display updates.
///
/// Implementations must be cheap: these calls happen on the frame
/// path.  They are only ever invoked while the scheduler holds no
/// lock, so a sink may itself call back into anything it likes.
pub trait ViewSink {
    /// The active context's register file changed.
    fn registers_changed(&mut self, context: ContextId, registers: &RegisterSnapshot);

    /// The active context's data memory changed.
    fn memory_changed(&mut self, context: ContextId, memory: &MemorySnapshot);

    /// The active context's instruction listings changed (reload or
    /// context switch).
    fn text_changed(&mut self, context: ContextId, text: &TextSnapshot);

    /// The instruction at `pc` is now current for the active context.
    fn current_instruction_changed(&mut self, context: ContextId, pc: Address);

    /// The play/step controls changed state or label.
    fn controls_changed(&mut self, controls: &ControlState);

    /// New program output arrived for a context (which may or may not
    /// be the active one; the sink decides whether to render it).
    fn output_appended(&mut self, context: ContextId, stream: OutputStream, text: &str);

    /// The displayed output was replaced wholesale (context switch or
    /// init): render these buffers instead of whatever was shown.
    fn output_replaced(&mut self, context: ContextId, stdout: &str, stderr: &str);

    /// No context is displayable; clear everything.
    fn views_cleared(&mut self);
}
