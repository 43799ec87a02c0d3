//! Fixed-shape snapshots of simulator state, as published to display
//! collaborators.
//!
//! The engine owns the authoritative registers and memory; the
//! scheduler reads them (under the simulator lock) into these value
//! types and hands them to whatever is rendering.  The shapes match
//! the MIPS-flavoured register file the reference engine exposes: 32
//! general registers, 9 special registers, 32 single-precision and 16
//! double-precision float registers.

use std::fmt::{self, Display, Formatter};

use serde::Serialize;

use crate::types::{Address, ContextId};

pub const GENERAL_REG_COUNT: usize = 32;
pub const SPECIAL_REG_COUNT: usize = 9;
pub const FLOAT_REG_COUNT: usize = 32;
pub const DOUBLE_REG_COUNT: usize = 16;

/// Indices into [`RegisterSnapshot::special`].
pub mod special_reg {
    pub const PC: usize = 0;
    pub const EPC: usize = 1;
    pub const CAUSE: usize = 2;
    pub const BAD_V_ADDR: usize = 3;
    pub const STATUS: usize = 4;
    pub const HI: usize = 5;
    pub const LO: usize = 6;
    pub const FIR: usize = 7;
    pub const FCSR: usize = 8;
}

/// One context's complete register file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegisterSnapshot {
    pub general: [u32; GENERAL_REG_COUNT],
    pub special: [u32; SPECIAL_REG_COUNT],
    pub float: [f32; FLOAT_REG_COUNT],
    pub double: [f64; DOUBLE_REG_COUNT],
}

impl RegisterSnapshot {
    #[must_use]
    pub fn pc(&self) -> Address {
        Address::new(self.special[special_reg::PC])
    }

    #[must_use]
    pub fn sp(&self) -> u32 {
        // $sp is general register 29 in the MIPS convention.
        self.general[29]
    }
}

impl Default for RegisterSnapshot {
    fn default() -> RegisterSnapshot {
        RegisterSnapshot {
            general: [0; GENERAL_REG_COUNT],
            special: [0; SPECIAL_REG_COUNT],
            float: [0.0; FLOAT_REG_COUNT],
            double: [0.0; DOUBLE_REG_COUNT],
        }
    }
}

/// One contiguous displayed memory segment: `words[i]` is the word at
/// `base + 4 * i`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MemorySegment {
    pub base: Address,
    pub words: Vec<u32>,
}

/// The data-memory views for one context.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MemorySnapshot {
    pub user_data: MemorySegment,
    pub kernel_data: MemorySegment,
    pub stack: MemorySegment,
}

/// One line of an instruction listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TextLine {
    pub address: Address,
    pub word: u32,
    pub listing: String,
}

/// The instruction listings for one context.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TextSnapshot {
    pub user: Vec<TextLine>,
    pub kernel: Vec<TextLine>,
}

/// Which of a context's two output streams a chunk belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

impl Display for OutputStream {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        f.write_str(match self {
            OutputStream::Stdout => "stdout",
            OutputStream::Stderr => "stderr",
        })
    }
}

/// A context-tagged piece of program output, as delivered by the
/// engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutputChunk {
    pub context: ContextId,
    pub stream: OutputStream,
    pub text: String,
}
