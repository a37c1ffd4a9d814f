//! The trace decoder: per-instruction decode attempts that accumulate
//! micro-ops into a basic block.

use tracing::trace;
use uopsim_types::{ArchReg, FlagSet};

use crate::block::{BasicBlock, BlockEnd};
use crate::context::{CpuMode, DecodeContext};
use crate::diag::{LegacyFpuObserver, X87_USAGE};
use crate::error::{Invalid, Result};
use crate::uop::TransOp;

/// Builds one basic block, one instruction at a time.
///
/// Micro-ops emitted while decoding an instruction are staged and only reach
/// [`TraceDecoder::bb`] through [`TraceDecoder::commit_insn`]. A decoder that
/// declines or finds the instruction invalid leaves the block untouched.
pub struct TraceDecoder<'o> {
    pub ctx: DecodeContext,
    pub bb: BasicBlock,
    /// Sticky for the rest of the block once set.
    pub end_of_block: bool,
    pub(crate) mode: CpuMode,
    pub(crate) observer: &'o dyn LegacyFpuObserver,
    pending: Vec<TransOp>,
    last_flags_update_was_atomic: bool,
}

/// Block state a failed attempt must not disturb.
struct Snapshot {
    cursor: usize,
    atomic: bool,
    end_of_block: bool,
    rip_taken: u64,
    rip_not_taken: u64,
    end: BlockEnd,
}

impl TraceDecoder<'static> {
    #[must_use]
    pub fn new(rip: u64, mode: CpuMode) -> Self {
        Self::with_observer(rip, mode, &X87_USAGE)
    }
}

impl<'o> TraceDecoder<'o> {
    #[must_use]
    pub fn with_observer(rip: u64, mode: CpuMode, observer: &'o dyn LegacyFpuObserver) -> Self {
        Self {
            ctx: DecodeContext::new(mode, rip, &[]),
            bb: BasicBlock::new(rip),
            end_of_block: false,
            mode,
            observer,
            pending: Vec::new(),
            last_flags_update_was_atomic: true,
        }
    }

    /// Starts a new instruction at `rip`: parses prefixes, opcode and ModRM
    /// from `window`.
    pub fn begin_insn(&mut self, rip: u64, window: &[u8]) -> Result<()> {
        self.pending.clear();
        self.ctx = DecodeContext::new(self.mode, rip, window);
        self.ctx.fetch_opcode()
    }

    /// Runs the integer fast path on the current instruction.
    ///
    /// Returns false, with no observable change, when the opcode is not one
    /// it handles. Returns true otherwise; if `ctx.invalid` is then set the
    /// instruction faults and nothing was staged.
    pub fn decode_fast(&mut self) -> bool {
        self.attempt(Self::fast_dispatch)
    }

    /// Runs the x87 decoder on the current instruction; same protocol as
    /// [`TraceDecoder::decode_fast`].
    pub fn decode_x87(&mut self) -> bool {
        self.attempt(Self::x87_dispatch)
    }

    fn attempt(&mut self, decode: fn(&mut Self) -> core::result::Result<bool, Invalid>) -> bool {
        let snapshot = Snapshot {
            cursor: self.ctx.consumed(),
            atomic: self.last_flags_update_was_atomic,
            end_of_block: self.end_of_block,
            rip_taken: self.bb.rip_taken,
            rip_not_taken: self.bb.rip_not_taken,
            end: self.bb.end,
        };
        match decode(self) {
            Ok(true) => true,
            Ok(false) => {
                self.restore(snapshot);
                false
            }
            Err(Invalid) => {
                self.restore(snapshot);
                self.ctx.invalid = true;
                true
            }
        }
    }

    fn restore(&mut self, snapshot: Snapshot) {
        self.pending.clear();
        self.ctx.rewind(snapshot.cursor);
        self.last_flags_update_was_atomic = snapshot.atomic;
        self.end_of_block = snapshot.end_of_block;
        self.bb.rip_taken = snapshot.rip_taken;
        self.bb.rip_not_taken = snapshot.rip_not_taken;
        self.bb.end = snapshot.end;
    }

    /// Micro-ops staged for the current instruction.
    #[must_use]
    pub fn pending(&self) -> &[TransOp] {
        &self.pending
    }

    /// Whether the most recent flag-producing micro-op defined all of ZAPS,
    /// CF and OF at once.
    #[must_use]
    pub fn last_flags_update_was_atomic(&self) -> bool {
        self.last_flags_update_was_atomic
    }

    /// Moves the staged micro-ops into the block and accounts for the
    /// instruction's bytes.
    pub fn commit_insn(&mut self) {
        self.commit_uops();
        self.bb.insn_count += 1;
        self.bb.byte_len += self.ctx.consumed();
    }

    pub(crate) fn commit_uops(&mut self) {
        for uop in &self.pending {
            trace!(rip = self.ctx.ripstart, "{uop}");
        }
        self.bb.uops.append(&mut self.pending);
    }

    pub(crate) fn discard_insn(&mut self) {
        self.pending.clear();
    }

    pub(crate) fn emit(&mut self, uop: TransOp) {
        if uop.updates_user_flags() {
            self.last_flags_update_was_atomic = uop.setflags == FlagSet::ALU;
        }
        self.pending.push(uop);
    }

    /// Ends the block after this instruction.
    pub(crate) fn end_block(&mut self, end: BlockEnd) {
        self.end_of_block = true;
        self.bb.end = end;
    }

    pub(crate) fn use64(&self) -> bool {
        self.mode.use64()
    }

    pub(crate) fn invalid(&mut self) -> Invalid {
        self.ctx.make_invalid()
    }

    /// Emits a flag collection into `rd` unless the flags are already atomic.
    pub(crate) fn collcc_if_needed(&mut self, rd: ArchReg) {
        if !self.last_flags_update_was_atomic {
            self.collcc(rd);
        }
    }
}
