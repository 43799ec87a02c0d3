//! Exports the names most users of the crate will want.

pub use crate::snapshot::{
    special_reg, MemorySegment, MemorySnapshot, OutputChunk, OutputStream, RegisterSnapshot,
    TextLine, TextSnapshot, DOUBLE_REG_COUNT, FLOAT_REG_COUNT, GENERAL_REG_COUNT,
    SPECIAL_REG_COUNT,
};
pub use crate::status::ExecutionStatus;
pub use crate::types::{Address, ContextId};
