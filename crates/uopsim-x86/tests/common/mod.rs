#![allow(dead_code)]

use uopsim_x86::{BasicBlock, CodeBus, CpuMode, DecoderConfig, Op, TraceDecoder, TransOp};

/// Flat code memory starting at address 0; reads past the end return `0xcc`.
pub struct SimpleBus {
    mem: Vec<u8>,
}

impl SimpleBus {
    pub fn new(size: usize) -> Self {
        Self { mem: vec![0; size] }
    }

    pub fn load(&mut self, addr: u64, bytes: &[u8]) {
        let start = addr as usize;
        self.mem[start..start + bytes.len()].copy_from_slice(bytes);
    }
}

impl CodeBus for SimpleBus {
    fn read_u8(&self, addr: u64) -> u8 {
        self.mem.get(addr as usize).copied().unwrap_or(0xcc)
    }
}

pub const ENTRY: u64 = 0x1000;

/// Translates the block at [`ENTRY`] holding `code`.
pub fn translate(mode: CpuMode, code: &[u8]) -> BasicBlock {
    let mut bus = SimpleBus::new(0x4000);
    bus.load(ENTRY, code);
    let config = DecoderConfig {
        mode,
        ..DecoderConfig::default()
    };
    uopsim_x86::translate_block(&bus, ENTRY, &config)
}

pub fn translate64(code: &[u8]) -> BasicBlock {
    translate(CpuMode::Bits64, code)
}

/// Which decoder claimed a single instruction.
#[derive(Debug, PartialEq, Eq)]
pub enum Claim {
    Fast,
    X87,
    Neither,
}

/// Decodes one instruction at [`ENTRY`] without committing it.
pub fn decode_one(mode: CpuMode, bytes: &[u8]) -> (Claim, TraceDecoder<'static>) {
    let mut dec = TraceDecoder::new(ENTRY, mode);
    dec.begin_insn(ENTRY, bytes).expect("instruction bytes");
    let claim = if dec.decode_fast() {
        Claim::Fast
    } else if dec.decode_x87() {
        Claim::X87
    } else {
        Claim::Neither
    };
    (claim, dec)
}

/// Micro-ops of one instruction rendered with their `Display` form.
pub fn render(uops: &[TransOp]) -> Vec<String> {
    uops.iter().map(ToString::to_string).collect()
}

pub fn ops(uops: &[TransOp]) -> Vec<Op> {
    uops.iter().map(|u| u.op).collect()
}

/// Micro-ops of one valid, handled instruction.
pub fn uops(mode: CpuMode, bytes: &[u8]) -> Vec<TransOp> {
    let (claim, dec) = decode_one(mode, bytes);
    assert_ne!(claim, Claim::Neither, "unhandled {bytes:02x?}");
    assert!(!dec.ctx.invalid, "invalid {bytes:02x?}");
    dec.pending().to_vec()
}

pub fn uops64(bytes: &[u8]) -> Vec<TransOp> {
    uops(CpuMode::Bits64, bytes)
}

/// True when the instruction was claimed but is invalid.
pub fn is_invalid64(bytes: &[u8]) -> bool {
    let (claim, dec) = decode_one(CpuMode::Bits64, bytes);
    claim != Claim::Neither && dec.ctx.invalid
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}
