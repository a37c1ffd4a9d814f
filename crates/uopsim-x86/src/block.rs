//! Basic block translation: feeds instruction windows from a code bus
//! through the decoders until the block ends.

use tracing::debug;
use uopsim_types::{ArchReg, Width};

use crate::assist::AssistId;
use crate::context::{CpuMode, MAX_INSN_LEN};
use crate::decoder::TraceDecoder;
use crate::diag::{LegacyFpuObserver, X87_USAGE};
use crate::uop::{Op, TransOp};

/// Byte-addressable instruction memory.
pub trait CodeBus {
    fn read_u8(&self, addr: u64) -> u8;

    /// Up to `len` bytes starting at `addr`; a shorter window means the
    /// code ends there.
    #[must_use]
    fn fetch(&self, addr: u64, len: usize) -> Vec<u8> {
        let mut buf = vec![0u8; len];
        for (i, b) in buf.iter_mut().enumerate() {
            *b = self.read_u8(addr.wrapping_add(i as u64));
        }
        buf
    }
}

/// Why a block stopped growing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BlockEnd {
    /// Still being built.
    #[default]
    Open,
    /// A branch, call, return or indirect jump ended the block.
    Branch,
    /// The last instruction is executed by a microcode assist.
    Assist(AssistId),
    /// An instruction or micro-op limit was reached; execution falls through.
    Limit { next_rip: u64 },
    /// No decoder handles the instruction at `next_rip`; it must be run by
    /// a slower path.
    ExitToSlowPath { next_rip: u64 },
    /// The instruction at the end of the block raises #UD.
    InvalidOpcode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockLimits {
    pub max_insns: usize,
    /// Checked after each instruction commits, so a block may overrun this
    /// by the crossing instruction's micro-ops plus the closing `bru`.
    pub max_uops: usize,
}

impl Default for BlockLimits {
    fn default() -> Self {
        Self {
            max_insns: 64,
            max_uops: 256,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DecoderConfig {
    pub mode: CpuMode,
    pub limits: BlockLimits,
}

/// A translated basic block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasicBlock {
    pub rip: u64,
    pub uops: Vec<TransOp>,
    pub insn_count: usize,
    pub byte_len: usize,
    pub rip_taken: u64,
    pub rip_not_taken: u64,
    pub end: BlockEnd,
}

impl BasicBlock {
    #[must_use]
    pub fn new(rip: u64) -> Self {
        Self {
            rip,
            uops: Vec::new(),
            insn_count: 0,
            byte_len: 0,
            rip_taken: 0,
            rip_not_taken: 0,
            end: BlockEnd::Open,
        }
    }
}

/// Translates the block starting at `rip`.
#[must_use]
pub fn translate_block<B: CodeBus + ?Sized>(bus: &B, rip: u64, config: &DecoderConfig) -> BasicBlock {
    translate_block_observed(bus, rip, config, &X87_USAGE)
}

/// [`translate_block`] reporting slow x87 instructions to `observer`.
#[must_use]
pub fn translate_block_observed<B: CodeBus + ?Sized>(
    bus: &B,
    rip: u64,
    config: &DecoderConfig,
    observer: &dyn LegacyFpuObserver,
) -> BasicBlock {
    TraceDecoder::with_observer(rip, config.mode, observer).translate(bus, &config.limits)
}

impl TraceDecoder<'_> {
    /// Decodes instructions from `bus` until the block ends.
    pub fn translate<B: CodeBus + ?Sized>(mut self, bus: &B, limits: &BlockLimits) -> BasicBlock {
        let mut rip = self.bb.rip;
        loop {
            let window = bus.fetch(rip, MAX_INSN_LEN);
            if let Err(err) = self.begin_insn(rip, &window) {
                debug!(rip, %err, "cannot fetch instruction");
                self.end_invalid(rip);
                break;
            }
            let handled = self.decode_fast() || self.decode_x87();
            if !handled {
                debug!(rip, op = self.ctx.op, "no fast decoder for instruction");
                self.end_with_fallthrough(rip, BlockEnd::ExitToSlowPath { next_rip: rip });
                break;
            }
            if self.ctx.invalid {
                debug!(rip, op = self.ctx.op, "invalid instruction");
                self.end_invalid(rip);
                break;
            }
            self.commit_insn();
            rip = self.ctx.rip();
            if self.end_of_block {
                break;
            }
            if self.bb.insn_count >= limits.max_insns || self.bb.uops.len() >= limits.max_uops {
                self.end_with_fallthrough(rip, BlockEnd::Limit { next_rip: rip });
                break;
            }
        }
        debug!(
            rip = self.bb.rip,
            insns = self.bb.insn_count,
            uops = self.bb.uops.len(),
            end = ?self.bb.end,
            "translated block"
        );
        self.bb
    }

    /// Closes the block with an unconditional branch to `next_rip`.
    fn end_with_fallthrough(&mut self, next_rip: u64, end: BlockEnd) {
        self.discard_insn();
        self.collcc_if_needed(ArchReg::Temp0);
        self.emit(
            TransOp::new(Op::Bru, ArchReg::Rip, ArchReg::Zero, ArchReg::Zero, ArchReg::Zero, Width::W64)
                .targets(next_rip, next_rip),
        );
        self.commit_uops();
        self.bb.rip_taken = next_rip;
        self.bb.rip_not_taken = next_rip;
        self.end_of_block = true;
        self.bb.end = end;
    }

    /// Closes the block with an invalid-opcode assist at `rip`.
    fn end_invalid(&mut self, rip: u64) {
        self.discard_insn();
        self.microcode_assist(AssistId::InvalidOpcode, rip, rip);
        self.commit_uops();
        self.bb.end = BlockEnd::InvalidOpcode;
    }
}
