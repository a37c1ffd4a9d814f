//! x86 to micro-op translation.
//!
//! [`translate_block`] walks guest code one instruction at a time. Each
//! instruction is offered to the integer fast path and then to the x87
//! decoder; the first one that claims it emits its micro-ops into the
//! current [`BasicBlock`]. Instructions neither decoder handles end the block
//! so a slower path can take over, and instructions too complex to express
//! as micro-ops end it with a call into a microcode assist ([`assist`]).

pub mod assist;
mod block;
mod context;
mod decode_fast;
mod decode_x87;
mod decoder;
mod diag;
mod emit;
mod error;
mod fpmath;
mod operand;
mod status;
pub mod tables;
mod uop;

pub use assist::{AssistEnv, AssistFault, AssistId, AssistTable, Context, GuestMemory, PageFault, Transfer};
pub use block::{translate_block, translate_block_observed, BasicBlock, BlockEnd, BlockLimits, CodeBus, DecoderConfig};
pub use context::{CpuMode, DecodeContext, ModRm, Prefixes, Rex, MAX_INSN_LEN};
pub use decoder::TraceDecoder;
pub use diag::{LegacyFpuObserver, X87UsageMonitor, X87_USAGE, X87_WARNING_THRESHOLD};
pub use error::{DecodeError, Result};
pub use fpmath::{PartialRemainder, SoftX87, X87Math};
pub use operand::{DecodedOperand, MemOperand, OperandForm, OperandMode, PseudoReg, Segment};
pub use status::{RoundingControl, X87StatusWord, FCW_DEFAULT};
pub use uop::{BranchHint, DataType, Extend, MaskControl, Op, TransOp};

pub use uopsim_types::{ArchReg, Cond, Eflags, FlagSet, Width};
