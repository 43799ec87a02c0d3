//! Terminal rendering of scheduler output.
//!
//! Program stdout is written through as-is; program stderr and
//! scheduler notices are coloured when the terminal supports it.
//! Register/memory refreshes arrive every frame and would swamp a
//! terminal, so they are reported through trace events instead of
//! being printed.

use std::io::Write;

use termcolor::{ColorChoice, ColorSpec, StandardStream, WriteColor};
use tracing::{event, Level};

use base::prelude::*;
use scheduler::{ControlState, ViewSink};

fn get_colour_choice(no_colour: bool) -> ColorChoice {
    if no_colour || !atty::is(atty::Stream::Stdout) {
        ColorChoice::Never
    } else {
        ColorChoice::Auto
    }
}

pub struct TerminalView {
    stream: StandardStream,
    last_controls: Option<ControlState>,
}

impl TerminalView {
    #[must_use]
    pub fn new(no_colour: bool) -> TerminalView {
        TerminalView {
            stream: StandardStream::stdout(get_colour_choice(no_colour)),
            last_controls: None,
        }
    }

    fn set_colour(&mut self, colour: Option<termcolor::Color>) {
        let mut spec = ColorSpec::new();
        spec.set_fg(colour);
        if let Err(e) = self.stream.set_color(&spec) {
            event!(Level::ERROR, "Failed to select colour {:?}: {}", spec, e);
        }
    }

    fn write_plain(&mut self, text: &str) {
        if let Err(e) = write!(self.stream, "{text}").and_then(|()| self.stream.flush()) {
            event!(Level::ERROR, "Failed to write program output: {}", e);
        }
    }

    fn write_coloured(&mut self, colour: termcolor::Color, text: &str) {
        self.set_colour(Some(colour));
        self.write_plain(text);
        self.set_colour(None);
    }
}

impl ViewSink for TerminalView {
    fn registers_changed(&mut self, context: ContextId, registers: &RegisterSnapshot) {
        event!(
            Level::TRACE,
            "{context}: registers updated, PC={}",
            registers.pc()
        );
    }

    fn memory_changed(&mut self, context: ContextId, _memory: &MemorySnapshot) {
        event!(Level::TRACE, "{context}: memory views updated");
    }

    fn text_changed(&mut self, context: ContextId, text: &TextSnapshot) {
        event!(
            Level::DEBUG,
            "{context}: instruction listing loaded, {} user lines",
            text.user.len()
        );
    }

    fn current_instruction_changed(&mut self, context: ContextId, pc: Address) {
        event!(Level::TRACE, "{context}: current instruction at {pc}");
    }

    fn controls_changed(&mut self, controls: &ControlState) {
        if self.last_controls.as_ref() == Some(controls) {
            return;
        }
        self.last_controls = Some(*controls);
        let text = format!(
            "== [{}] play {}, step {}\n",
            controls.label,
            if controls.play_enabled { "on" } else { "off" },
            if controls.step_enabled { "on" } else { "off" },
        );
        self.write_coloured(termcolor::Color::Cyan, &text);
    }

    fn output_appended(&mut self, _context: ContextId, stream: OutputStream, text: &str) {
        match stream {
            OutputStream::Stdout => self.write_plain(text),
            OutputStream::Stderr => self.write_coloured(termcolor::Color::Red, text),
        }
    }

    fn output_replaced(&mut self, context: ContextId, stdout: &str, stderr: &str) {
        let banner = format!("== now showing {context}\n");
        self.write_coloured(termcolor::Color::Cyan, &banner);
        self.write_plain(stdout);
        if !stderr.is_empty() {
            self.write_coloured(termcolor::Color::Red, stderr);
        }
    }

    fn views_cleared(&mut self) {
        self.write_coloured(termcolor::Color::Cyan, "== no context enabled\n");
    }
}
