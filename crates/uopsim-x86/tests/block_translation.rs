mod common;

use common::{init_tracing, ops, translate, translate64, SimpleBus, ENTRY};
use uopsim_x86::{
    translate_block, ArchReg, AssistId, BlockEnd, BlockLimits, CodeBus, CpuMode, DecoderConfig, Op,
};

/// Code that really ends: windows are cut short at the last byte.
struct WindowBus {
    code: Vec<u8>,
}

impl CodeBus for WindowBus {
    fn read_u8(&self, addr: u64) -> u8 {
        addr.checked_sub(ENTRY)
            .and_then(|off| self.code.get(off as usize))
            .copied()
            .unwrap_or(0)
    }

    fn fetch(&self, addr: u64, len: usize) -> Vec<u8> {
        let start = (addr.saturating_sub(ENTRY) as usize).min(self.code.len());
        let end = (start + len).min(self.code.len());
        self.code[start..end].to_vec()
    }
}

fn translate_limited(code: &[u8], limits: BlockLimits) -> uopsim_x86::BasicBlock {
    let mut bus = SimpleBus::new(0x4000);
    bus.load(ENTRY, code);
    let config = DecoderConfig {
        limits,
        ..DecoderConfig::default()
    };
    translate_block(&bus, ENTRY, &config)
}

#[test]
fn instruction_limit_falls_through() {
    init_tracing();
    let bb = translate_limited(
        &[0x90; 8],
        BlockLimits {
            max_insns: 2,
            max_uops: 256,
        },
    );
    assert_eq!(ops(&bb.uops), [Op::Nop, Op::Nop, Op::Bru]);
    assert_eq!(bb.end, BlockEnd::Limit { next_rip: 0x1002 });
    assert_eq!((bb.insn_count, bb.byte_len), (2, 2));
    assert_eq!((bb.rip_taken, bb.rip_not_taken), (0x1002, 0x1002));
    assert_eq!(bb.uops[2].riptaken, 0x1002);
}

#[test]
fn uop_limit_stops_after_the_crossing_instruction() {
    let bb = translate_limited(
        &[0x90; 8],
        BlockLimits {
            max_insns: 64,
            max_uops: 3,
        },
    );
    assert_eq!(bb.insn_count, 3);
    assert_eq!(bb.uops.len(), 4);
    assert_eq!(bb.end, BlockEnd::Limit { next_rip: 0x1003 });
}

#[test]
fn fallthrough_collects_partial_flags() {
    // inc eax
    let bb = translate_limited(
        &[0xff, 0xc0],
        BlockLimits {
            max_insns: 1,
            max_uops: 256,
        },
    );
    assert_eq!(ops(&bb.uops), [Op::Add, Op::Collcc, Op::Bru]);
    assert_eq!(bb.uops[1].rd, ArchReg::Temp0);
}

#[test]
fn default_limits_cap_the_block() {
    let bb = translate64(&[0x90; 100]);
    assert_eq!(bb.insn_count, 64);
    assert_eq!(bb.end, BlockEnd::Limit { next_rip: ENTRY + 64 });
}

#[test]
fn unhandled_instruction_exits_to_slow_path() {
    // add eax, 1; int3
    let bb = translate64(&[0x83, 0xc0, 0x01, 0xcc]);
    assert_eq!(ops(&bb.uops), [Op::Add, Op::Bru]);
    assert_eq!(bb.end, BlockEnd::ExitToSlowPath { next_rip: 0x1003 });
    assert_eq!((bb.insn_count, bb.byte_len), (1, 3));
    assert_eq!(bb.rip_taken, 0x1003);

    // A block that starts on an unhandled instruction holds only the branch.
    let bb = translate64(&[0x0f, 0xa2]);
    assert_eq!(ops(&bb.uops), [Op::Bru]);
    assert_eq!(bb.insn_count, 0);
    assert_eq!(bb.end, BlockEnd::ExitToSlowPath { next_rip: ENTRY });
}

#[test]
fn invalid_instruction_ends_with_assist() {
    // add eax, 1; (82 /0 is invalid in long mode)
    let bb = translate64(&[0x83, 0xc0, 0x01, 0x82, 0xc0, 0x01]);
    assert_eq!(ops(&bb.uops), [Op::Add, Op::Mov, Op::Mov, Op::Brp]);
    assert_eq!((bb.uops[1].rd, bb.uops[1].rbimm), (ArchReg::Selfrip, 0x1003));
    assert_eq!((bb.uops[2].rd, bb.uops[2].rbimm), (ArchReg::Nextrip, 0x1003));
    assert_eq!(bb.uops[3].assist, Some(AssistId::InvalidOpcode));
    assert_eq!(bb.end, BlockEnd::InvalidOpcode);
    assert_eq!((bb.rip_taken, bb.rip_not_taken), (0x1003, 0x1003));
    assert_eq!((bb.insn_count, bb.byte_len), (1, 3));
}

#[test]
fn partial_flags_are_collected_before_the_invalid_assist() {
    // inc eax; (82 /0)
    let bb = translate64(&[0xff, 0xc0, 0x82, 0xc0, 0x01]);
    assert_eq!(ops(&bb.uops), [Op::Add, Op::Mov, Op::Mov, Op::Collcc, Op::Brp]);
}

#[test]
fn branch_ends_the_block() {
    // nop; jmp +0x10
    let bb = translate64(&[0x90, 0xeb, 0x10]);
    assert_eq!(ops(&bb.uops), [Op::Nop, Op::Bru]);
    assert_eq!(bb.end, BlockEnd::Branch);
    assert_eq!((bb.rip_taken, bb.rip_not_taken), (0x1013, 0x1013));
    assert_eq!((bb.insn_count, bb.byte_len), (2, 3));

    // jz +0: both successors are the next instruction.
    let bb = translate64(&[0x74, 0x00]);
    assert_eq!((bb.rip_taken, bb.rip_not_taken), (0x1002, 0x1002));
}

#[test]
fn legacy_mode_blocks() {
    // inc eax; int3
    let bb = translate(CpuMode::Bits32, &[0x40, 0xcc]);
    assert_eq!(ops(&bb.uops), [Op::Add, Op::Collcc, Op::Bru]);
    assert_eq!(bb.end, BlockEnd::ExitToSlowPath { next_rip: 0x1001 });
}

#[test]
fn sixteen_bit_addressing_goes_to_the_slow_path() {
    // mov eax, [bx]; ret
    let bb = translate(CpuMode::Bits32, &[0x67, 0x8b, 0x07, 0xc3]);
    assert_eq!(ops(&bb.uops), [Op::Bru]);
    assert_eq!(bb.insn_count, 0);
    assert_eq!(bb.end, BlockEnd::ExitToSlowPath { next_rip: ENTRY });

    // inc eax; mov eax, [bx]
    let bb = translate(CpuMode::Bits32, &[0x40, 0x67, 0x8b, 0x07]);
    assert_eq!(ops(&bb.uops), [Op::Add, Op::Collcc, Op::Bru]);
    assert_eq!(bb.end, BlockEnd::ExitToSlowPath { next_rip: 0x1001 });
}

#[test]
fn truncated_operand_is_invalid() {
    // nop; add eax, <missing imm8>
    let bus = WindowBus {
        code: vec![0x90, 0x83, 0xc0],
    };
    let bb = translate_block(&bus, ENTRY, &DecoderConfig::default());
    assert_eq!(bb.end, BlockEnd::InvalidOpcode);
    assert_eq!(bb.insn_count, 1);
    assert_eq!(bb.uops[1].rbimm, 0x1001);
}

#[test]
fn truncated_opcode_is_invalid() {
    for code in [vec![], vec![0x0f], vec![0x66, 0x48]] {
        let bus = WindowBus { code };
        let bb = translate_block(&bus, ENTRY, &DecoderConfig::default());
        assert_eq!(bb.end, BlockEnd::InvalidOpcode);
        assert_eq!(ops(&bb.uops), [Op::Mov, Op::Mov, Op::Brp]);
        assert_eq!(bb.insn_count, 0);
    }
}

#[test]
fn overlong_instruction_is_invalid() {
    // Fifteen prefixes leave no room for the opcode.
    let bb = translate64(&[0x66; 16]);
    assert_eq!(bb.end, BlockEnd::InvalidOpcode);
    assert_eq!(bb.insn_count, 0);
}
