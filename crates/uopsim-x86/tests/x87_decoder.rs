mod common;

use common::{decode_one, ops, translate64, uops64, Claim, SimpleBus, ENTRY};
use uopsim_x86::tables::{internal, X87_CONSTANTS};
use uopsim_x86::{
    translate_block_observed, ArchReg, AssistId, BlockEnd, Cond, CpuMode, DataType, DecoderConfig, FlagSet, Op,
    Width, X87StatusWord, X87UsageMonitor,
};

fn is_invalid(bytes: &[u8]) -> bool {
    let (claim, dec) = decode_one(CpuMode::Bits64, bytes);
    claim == Claim::X87 && dec.ctx.invalid
}

#[test]
fn fld1_pushes_a_constant() {
    let u = uops64(&[0xd9, 0xe8]);
    assert_eq!(ops(&u), [Op::Mov, Op::Subm, Op::St, Op::Bts]);
    assert_eq!(u[0].rbimm as u64, X87_CONSTANTS[0]);
    assert_eq!((u[1].rd, u[1].rbimm, u[1].rcimm), (ArchReg::Fptos, 8, 0x3f));
    let st = u[2];
    assert_eq!((st.ra, st.rbimm, st.rc), (ArchReg::Fptos, internal::FPSTACK, ArchReg::Temp0));
    assert!(st.internal);
    assert_eq!(st.datatype, DataType::Double);
    assert_eq!((u[3].rd, u[3].rb), (ArchReg::Fptags, ArchReg::Fptos));

    // fldz
    assert_eq!(uops64(&[0xd9, 0xee])[0].rbimm, 0);
    // D9 EF is reserved.
    assert!(is_invalid(&[0xd9, 0xef]));
}

#[test]
fn fcomp_updates_status_word_and_pops() {
    // fcomp st(1)
    let u = uops64(&[0xd8, 0xd9]);
    assert_eq!(
        ops(&u),
        [Op::Ld, Op::Addm, Op::Ld, Op::Cmpccf, Op::Ld, Op::Mask, Op::Mask, Op::Btr, Op::Addm]
    );
    assert_eq!((u[1].rd, u[1].rbimm), (ArchReg::Temp2, 8));
    assert_eq!((u[3].ra, u[3].rb), (ArchReg::Temp0, ArchReg::Temp1));
    assert_eq!((u[4].rbimm, u[4].size), (internal::FCOM_TO_FPSW, Width::W8));
    assert_eq!(u[5].mask_control(), Some(X87StatusWord::C0_C2_FROM_NIBBLE));
    assert_eq!(u[6].mask_control(), Some(X87StatusWord::C3_FROM_NIBBLE));
    assert_eq!((u[7].rd, u[7].rb), (ArchReg::Fptags, ArchReg::Fptos));
    assert_eq!(u[8].rd, ArchReg::Fptos);
}

#[test]
fn fcom_leaves_integer_flags_alone() {
    // fcom st(1); jz: the compare defines no user flags, so the branch
    // still reads the rename groups directly.
    let bb = translate64(&[0xd8, 0xd1, 0x74, 0x00]);
    assert!(bb.uops.iter().all(|u| u.op != Op::Collcc));
    assert_eq!(bb.uops.last().map(|u| u.op), Some(Op::Br));
}

#[test]
fn reverse_operations_swap_operands() {
    // fsubr st(0), st(1)
    let u = uops64(&[0xd8, 0xe9]);
    assert_eq!((u[3].op, u[3].ra, u[3].rb), (Op::Subf, ArchReg::Temp1, ArchReg::Temp0));
    assert_eq!(u[4].ra, ArchReg::Fptos);

    // fsub st(1), st(0) writes back to st(1).
    let u = uops64(&[0xdc, 0xe9]);
    assert_eq!((u[3].op, u[3].ra, u[3].rb), (Op::Subf, ArchReg::Temp1, ArchReg::Temp0));
    assert_eq!(u[4].ra, ArchReg::Temp2);

    // fdivr dword [rax]
    let u = uops64(&[0xd8, 0x38]);
    assert_eq!(ops(&u), [Op::Ld, Op::Ld, Op::CvtfS2dLo, Op::Divf, Op::St, Op::Bts]);
    assert_eq!((u[3].ra, u[3].rb), (ArchReg::Temp1, ArchReg::Temp0));
}

#[test]
fn faddp_stores_to_st_i_then_pops() {
    let u = uops64(&[0xde, 0xc1]);
    assert_eq!(ops(&u), [Op::Ld, Op::Addm, Op::Ld, Op::Addf, Op::St, Op::Bts, Op::Btr, Op::Addm]);
    assert_eq!(u[4].ra, ArchReg::Temp2);
    assert_eq!(u[5].rb, ArchReg::Temp2);
}

#[test]
fn integer_memory_arithmetic_converts_first() {
    // fiadd word [rax]
    let u = uops64(&[0xde, 0x00]);
    assert_eq!(ops(&u), [Op::Ld, Op::Ldx, Op::CvtfQ2d, Op::Addf, Op::St, Op::Bts]);
    assert_eq!(u[1].size, Width::W16);

    // fimul dword [rax]
    let u = uops64(&[0xda, 0x08]);
    assert_eq!((u[1].size, u[3].op), (Width::W32, Op::Mulf));
}

#[test]
fn fxch_captures_both_slots_before_storing() {
    let u = uops64(&[0xd9, 0xc9]);
    assert_eq!(ops(&u), [Op::Addm, Op::Ld, Op::Ld, Op::St, Op::St]);
    assert_eq!((u[3].ra, u[3].rc), (ArchReg::Fptos, ArchReg::Temp1));
    assert_eq!((u[4].ra, u[4].rc), (ArchReg::Temp2, ArchReg::Temp0));
}

#[test]
fn loads_convert_to_double() {
    // fld dword [rax]
    let u = uops64(&[0xd9, 0x00]);
    assert_eq!(ops(&u), [Op::Ld, Op::CvtfS2dLo, Op::Subm, Op::St, Op::Bts]);
    assert_eq!((u[0].size, u[0].datatype), (Width::W32, DataType::Float));

    // fld qword [rax]
    let u = uops64(&[0xdd, 0x00]);
    assert_eq!(ops(&u), [Op::Ld, Op::Subm, Op::St, Op::Bts]);

    // fild word [rax]
    let u = uops64(&[0xdf, 0x00]);
    assert_eq!(ops(&u), [Op::Ldx, Op::CvtfQ2d, Op::Subm, Op::St, Op::Bts]);
    assert_eq!(u[0].size, Width::W16);

    // fild qword [rax]
    assert_eq!(uops64(&[0xdf, 0x28])[0].size, Width::W64);

    // fld st(2)
    let u = uops64(&[0xd9, 0xc2]);
    assert_eq!(ops(&u), [Op::Addm, Op::Ld, Op::Subm, Op::St, Op::Bts]);
    assert_eq!(u[0].rbimm, 16);
}

#[test]
fn stores_convert_from_double() {
    // fstp dword [rax]
    let u = uops64(&[0xd9, 0x18]);
    assert_eq!(ops(&u), [Op::Ld, Op::CvtfD2sIns, Op::St, Op::Btr, Op::Addm]);
    assert_eq!((u[2].size, u[2].datatype), (Width::W32, DataType::Float));

    // fst qword [rax]
    let u = uops64(&[0xdd, 0x10]);
    assert_eq!(ops(&u), [Op::Ld, Op::St]);

    // fistp dword [rax] rounds; fisttp dword [rax] truncates.
    let u = uops64(&[0xdb, 0x18]);
    assert_eq!(ops(&u), [Op::Ld, Op::CvtfD2i, Op::St, Op::Btr, Op::Addm]);
    assert_eq!(uops64(&[0xdb, 0x08])[1].op, Op::CvtfD2iTrunc);

    // fistp qword [rax]
    let u = uops64(&[0xdf, 0x38]);
    assert_eq!((u[1].op, u[2].size), (Op::CvtfD2q, Width::W64));

    // fist word [rax] keeps the stack.
    let u = uops64(&[0xdf, 0x10]);
    assert_eq!(ops(&u), [Op::Ld, Op::CvtfD2i, Op::St]);
}

#[test]
fn register_stores_and_free_fix_tags() {
    // fstp st(1)
    let u = uops64(&[0xdd, 0xd9]);
    assert_eq!(ops(&u), [Op::Addm, Op::Ld, Op::St, Op::Bts, Op::Btr, Op::Addm]);
    assert_eq!(u[3].rb, ArchReg::Temp1);

    // ffree st(2)
    let u = uops64(&[0xdd, 0xc2]);
    assert_eq!(ops(&u), [Op::Addm, Op::Btr]);
    assert_eq!((u[0].rbimm, u[1].rb), (16, ArchReg::Temp0));

    // ffreep st(0)
    assert_eq!(ops(&uops64(&[0xdf, 0xc0])), [Op::Addm, Op::Btr, Op::Btr, Op::Addm]);
}

#[test]
fn sign_and_control_word_ops() {
    // fchs
    let u = uops64(&[0xd9, 0xe0]);
    assert_eq!(ops(&u), [Op::Ld, Op::Xor, Op::St]);
    assert_eq!(u[1].rbimm, i64::MIN);

    // fabs
    assert_eq!(uops64(&[0xd9, 0xe1])[1].rbimm, i64::MAX);

    // ftst compares against zero.
    let u = uops64(&[0xd9, 0xe4]);
    assert_eq!(ops(&u), [Op::Ld, Op::Cmpccf, Op::Ld, Op::Mask, Op::Mask]);
    assert_eq!(u[1].rb, ArchReg::Zero);

    // fldcw [rax]
    let u = uops64(&[0xd9, 0x28]);
    assert_eq!(ops(&u), [Op::Ld, Op::St]);
    assert_eq!((u[1].rbimm, u[1].size), (internal::FPCW, Width::W16));
    assert!(u[1].internal);

    // fnstcw [rax]
    let u = uops64(&[0xd9, 0x38]);
    assert_eq!(ops(&u), [Op::Ld, Op::St]);
    assert!(u[0].internal);

    // fincstp / fdecstp
    assert_eq!(uops64(&[0xd9, 0xf7])[0].op, Op::Addm);
    assert_eq!(uops64(&[0xd9, 0xf6])[0].op, Op::Subm);

    // fnop
    assert_eq!(ops(&uops64(&[0xd9, 0xd0])), [Op::Nop]);
    assert!(is_invalid(&[0xd9, 0xd1]));
}

#[test]
fn status_word_reads_fold_in_top() {
    // fnstsw ax
    let u = uops64(&[0xdf, 0xe0]);
    assert_eq!(ops(&u), [Op::Mask, Op::Mov]);
    assert_eq!(u[0].mask_control(), Some(X87StatusWord::TOP_FROM_FPTOS));
    assert_eq!((u[1].rd, u[1].rb, u[1].size), (ArchReg::Rax, ArchReg::Fpsw, Width::W16));

    // fnstsw [rax]
    let u = uops64(&[0xdd, 0x38]);
    assert_eq!(ops(&u), [Op::Mask, Op::St]);
    assert_eq!((u[1].rc, u[1].size), (ArchReg::Fpsw, Width::W16));
}

#[test]
fn fcmov_uses_integer_condition_sources() {
    // fcmovb st(0), st(1)
    let u = uops64(&[0xda, 0xc1]);
    assert_eq!(ops(&u), [Op::Addm, Op::Ld, Op::Ld, Op::Sel]);
    assert_eq!((u[3].rc, u[3].cond), (ArchReg::Cf, Some(Cond::B)));

    // fcmovbe collects first.
    let u = uops64(&[0xda, 0xd1]);
    assert_eq!(ops(&u), [Op::Addm, Op::Ld, Op::Ld, Op::Collcc, Op::Sel]);

    // fcmovnu inverts.
    let u = uops64(&[0xdb, 0xd9]);
    assert_eq!(u[3].cond, Some(Cond::Np));
}

#[test]
fn unordered_compares() {
    // fucompp
    let u = uops64(&[0xda, 0xe9]);
    assert_eq!(u[3].op, Op::Ucmpccf);
    assert_eq!(u.iter().filter(|u| u.op == Op::Btr).count(), 2);
    assert!(is_invalid(&[0xda, 0xe8]));

    // fucom st(3)
    let u = uops64(&[0xdd, 0xe3]);
    assert_eq!((u[0].rbimm, u[3].op), (24, Op::Ucmpccf));
    assert_eq!(u.len(), 7);
}

#[test]
fn fcomi_defines_all_integer_flags() {
    // fucomip st(0), st(1); jz
    let bb = translate64(&[0xdf, 0xe9, 0x74, 0x00]);
    assert_eq!(
        ops(&bb.uops),
        [Op::Addm, Op::Ld, Op::Ld, Op::Ucmpccf, Op::Btr, Op::Addm, Op::Br]
    );
    assert_eq!(bb.uops[3].setflags, FlagSet::ALU);

    // fcomi st(0), st(2)
    let u = uops64(&[0xdb, 0xf2]);
    assert_eq!((u[3].op, u.len()), (Op::Cmpccf, 4));
}

#[test]
fn fsqrt_is_inlined() {
    // fsqrt; nop; int3
    let bb = translate64(&[0xd9, 0xfa, 0x90, 0xcc]);
    assert_eq!(ops(&bb.uops), [Op::Ld, Op::Sqrtf, Op::St, Op::Nop, Op::Bru]);
    assert_eq!(bb.end, BlockEnd::ExitToSlowPath { next_rip: 0x1003 });
    assert_eq!(bb.insn_count, 2);
}

#[test]
fn transcendental_ends_block_with_assist() {
    // fsin; nop
    let bb = translate64(&[0xd9, 0xfe, 0x90]);
    assert_eq!(ops(&bb.uops), [Op::Mov, Op::Mov, Op::Brp]);
    assert_eq!((bb.uops[0].rd, bb.uops[0].rbimm), (ArchReg::Selfrip, 0x1000));
    assert_eq!((bb.uops[1].rd, bb.uops[1].rbimm), (ArchReg::Nextrip, 0x1002));
    assert_eq!(bb.uops[2].assist, Some(AssistId::X87Fsin));
    assert_eq!(bb.end, BlockEnd::Assist(AssistId::X87Fsin));
    assert_eq!((bb.rip_taken, bb.rip_not_taken), (0x1002, 0x1002));
    assert_eq!(bb.insn_count, 1);

    let cases = [
        ([0xd9, 0xf0], AssistId::X87F2xm1),
        ([0xd9, 0xf1], AssistId::X87Fyl2x),
        ([0xd9, 0xf5], AssistId::X87Fprem1),
        ([0xd9, 0xf8], AssistId::X87Fprem),
        ([0xd9, 0xfb], AssistId::X87Fsincos),
        ([0xd9, 0xfc], AssistId::X87Frndint),
        ([0xd9, 0xff], AssistId::X87Fcos),
        ([0xd9, 0xe5], AssistId::X87Fxam),
    ];
    for (bytes, id) in cases {
        assert_eq!(translate64(&bytes).end, BlockEnd::Assist(id), "{bytes:02x?}");
    }
}

#[test]
fn assist_after_partial_flags_collects_first() {
    // inc eax; fcos
    let bb = translate64(&[0xff, 0xc0, 0xd9, 0xff]);
    assert_eq!(ops(&bb.uops), [Op::Add, Op::Mov, Op::Mov, Op::Collcc, Op::Brp]);
}

#[test]
fn extended_precision_memory_goes_through_ar1() {
    // fld tbyte [rax+8]
    let bb = translate64(&[0xdb, 0x68, 0x08]);
    assert_eq!(ops(&bb.uops), [Op::Adda, Op::Mov, Op::Mov, Op::Brp]);
    assert_eq!((bb.uops[0].rd, bb.uops[0].ra, bb.uops[0].rbimm), (ArchReg::Ar1, ArchReg::Rax, 8));
    assert_eq!(bb.end, BlockEnd::Assist(AssistId::X87Fld80));

    // fstp tbyte [rax]
    assert_eq!(translate64(&[0xdb, 0x38]).end, BlockEnd::Assist(AssistId::X87Fstp80));
}

#[test]
fn state_save_forms_decline() {
    // fldenv, fnstenv, frstor, fnsave, fbld, fbstp, fnclex, fninit
    let cases: [&[u8]; 8] = [
        &[0xd9, 0x20],
        &[0xd9, 0x30],
        &[0xdd, 0x20],
        &[0xdd, 0x30],
        &[0xdf, 0x20],
        &[0xdf, 0x30],
        &[0xdb, 0xe2],
        &[0xdb, 0xe3],
    ];
    for bytes in cases {
        assert_eq!(decode_one(CpuMode::Bits64, bytes).0, Claim::Neither, "{bytes:02x?}");
    }
}

#[test]
fn reserved_encodings_are_invalid() {
    for bytes in [[0xd9, 0x08], [0xdb, 0x30], [0xda, 0xf0], [0xdb, 0x20], [0xdd, 0xf0]] {
        assert!(is_invalid(&bytes), "{bytes:02x?}");
    }
}

#[test]
fn observer_counts_assist_routed_instructions() {
    let monitor = X87UsageMonitor::new(2);
    let mut bus = SimpleBus::new(0x4000);
    // fsqrt; fsin
    bus.load(ENTRY, &[0xd9, 0xfa, 0xd9, 0xfe]);
    let bb = translate_block_observed(&bus, ENTRY, &DecoderConfig::default(), &monitor);
    assert_eq!(bb.end, BlockEnd::Assist(AssistId::X87Fsin));
    assert_eq!(monitor.count(), 1);

    // An instruction rejected before reaching the assist is not counted.
    bus.load(ENTRY, &[0xd9, 0xd1]);
    let bb = translate_block_observed(&bus, ENTRY, &DecoderConfig::default(), &monitor);
    assert_eq!(bb.end, BlockEnd::InvalidOpcode);
    assert_eq!(monitor.count(), 1);
}
