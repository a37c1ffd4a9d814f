use thiserror::Error;

use crate::context::MAX_INSN_LEN;

/// Failure to pull a well-formed instruction out of the byte stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("instruction bytes end at offset {offset}")]
    Truncated { offset: usize },

    #[error("instruction is longer than {MAX_INSN_LEN} bytes")]
    TooLong,
}

pub type Result<T> = core::result::Result<T, DecodeError>;

/// Marker for an architecturally invalid instruction.
///
/// Returned through `?` from every operand decode step so that nothing is
/// emitted once the instruction is known to be invalid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Invalid;
