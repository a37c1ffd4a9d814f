//! Immutable opcode translation tables shared by both decoders.

use uopsim_types::ArchReg;

use crate::uop::{MaskControl, Op};

/// ALU group sub-operation (opcode bits 3..6 or ModRM.reg) to micro-op:
/// add, or, adc, sbb, and, sub, xor, cmp.
pub const ARITH_OPS: [Op; 8] = [Op::Add, Op::Or, Op::Add, Op::Sub, Op::And, Op::Sub, Op::Xor, Op::Sub];

/// Sub-operations that consume the incoming carry (adc, sbb).
#[must_use]
pub const fn arith_uses_carry(subop: u8) -> bool {
    matches!(subop, 2 | 3)
}

/// Sub-operations that only produce flags (cmp).
#[must_use]
pub const fn arith_is_flags_only(subop: u8) -> bool {
    subop == 7
}

/// Shift group (ModRM.reg) to micro-op: rol, ror, rcl, rcr, shl, shr, sal, sar.
pub const SHIFT_OPS: [Op; 8] = [Op::Rotl, Op::Rotr, Op::Rotcl, Op::Rotcr, Op::Shl, Op::Shr, Op::Shl, Op::Sar];

/// Flag-bundle-free variants used for plain shifts by a small constant.
pub const SIMPLE_SHIFT_OPS: [Option<Op>; 8] =
    [None, None, None, None, Some(Op::Shls), Some(Op::Shrs), Some(Op::Shls), Some(Op::Sars)];

/// Largest constant count that may use [`SIMPLE_SHIFT_OPS`].
pub const SIMPLE_SHIFT_LIMIT: u8 = 8;

/// Renamed flag registers a condition code reads.
///
/// When `req2` is set the condition mixes two rename groups and the decoder
/// must collect them into one bundle first; otherwise `ra` (or `rb` when `ra`
/// is `Zero`) holds every flag the condition needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CondFlagRegs {
    pub req2: bool,
    pub ra: ArchReg,
    pub rb: ArchReg,
}

const fn cfr(req2: bool, ra: ArchReg, rb: ArchReg) -> CondFlagRegs {
    CondFlagRegs { req2, ra, rb }
}

pub const COND_CODE_TO_FLAG_REGS: [CondFlagRegs; 16] = [
    cfr(false, ArchReg::Of, ArchReg::Of), // o
    cfr(false, ArchReg::Of, ArchReg::Of), // no
    cfr(false, ArchReg::Cf, ArchReg::Cf), // b
    cfr(false, ArchReg::Cf, ArchReg::Cf), // nb
    cfr(false, ArchReg::Zf, ArchReg::Zf), // e
    cfr(false, ArchReg::Zf, ArchReg::Zf), // ne
    cfr(true, ArchReg::Zf, ArchReg::Cf),  // be
    cfr(true, ArchReg::Zf, ArchReg::Cf),  // nbe
    cfr(false, ArchReg::Zf, ArchReg::Zf), // s
    cfr(false, ArchReg::Zf, ArchReg::Zf), // ns
    cfr(false, ArchReg::Zf, ArchReg::Zf), // p
    cfr(false, ArchReg::Zf, ArchReg::Zf), // np
    cfr(true, ArchReg::Zf, ArchReg::Of),  // l
    cfr(true, ArchReg::Zf, ArchReg::Of),  // nl
    cfr(true, ArchReg::Zf, ArchReg::Of),  // le
    cfr(true, ArchReg::Zf, ArchReg::Of),  // nle
];

/// Bit 63 of the internal flags word holds the direction flag.
pub const IFLAGS_DF: i64 = i64::MIN;

/// AH as a byte field of RAX.
pub const AH_INSERT: MaskControl = MaskControl::new(56, 8, 56);
pub const AH_EXTRACT: MaskControl = MaskControl::new(0, 8, 8);

/// Top-of-stack arithmetic mask: 8 slots of 8 bytes.
pub const FP_STACK_MASK: i64 = 0x3f;

/// Internal addresses reachable by `internal` loads and stores.
pub mod internal {
    /// Base of the 8-slot x87 register stack, indexed by `fptos`.
    pub const FPSTACK: i64 = 0x000;
    pub const FPCW: i64 = 0x040;
    /// [`super::FCOM_FLAGS_TO_FPSW`], indexed by a compare flag bundle.
    pub const FCOM_TO_FPSW: i64 = 0x080;
}

/// x87 arithmetic group (ModRM.reg): fadd, fmul, fcom, fcomp, fsub, fsubr, fdiv, fdivr.
pub const X87_OPS: [Op; 8] = [Op::Addf, Op::Mulf, Op::Cmpccf, Op::Cmpccf, Op::Subf, Op::Subf, Op::Divf, Op::Divf];

const T0: ArchReg = ArchReg::Temp0;
const T1: ArchReg = ArchReg::Temp1;

/// Operand order for D8/DA/DC/DE memory forms and D8 register forms:
/// `temp0` holds st(0), `temp1` the other operand.
pub const X87_D8_RA: [ArchReg; 8] = [T0, T0, T0, T0, T0, T1, T0, T1];
pub const X87_D8_RB: [ArchReg; 8] = [T1, T1, T1, T1, T1, T0, T1, T0];

/// Operand order for DC/DE register forms, which write st(i) instead of st(0).
///
/// The entries coincide with the D8 table: the reversed mnemonic assignment
/// of these encodings is absorbed by the swapped destination.
pub const X87_DCDE_RA: [ArchReg; 8] = [T0, T0, T0, T0, T0, T1, T0, T1];
pub const X87_DCDE_RB: [ArchReg; 8] = [T1, T1, T1, T1, T1, T0, T1, T0];

/// fld1, fldl2t, fldl2e, fldpi, fldlg2, fldln2, fldz as f64 bit patterns.
pub const X87_CONSTANTS: [u64; 7] = [
    0x3ff0_0000_0000_0000,
    0x400a_934f_0979_a371,
    0x3ff7_1547_652b_82fe,
    0x4009_21fb_5444_2d18,
    0x3fd3_4413_509f_79ff,
    0x3fe6_2e42_fefa_39ef,
    0x0000_0000_0000_0000,
];

/// Compare flag bundle (CF bit 0, PF bit 2, ZF bit 6) to the x87 condition
/// nibble `C3 << 3 | C2 << 2 | C0`.
#[rustfmt::skip]
pub const FCOM_FLAGS_TO_FPSW: [u8; 128] = [
    0, 1, 0, 1, 4, 5, 4, 5, 0, 1, 0, 1, 4, 5, 4, 5,
    0, 1, 0, 1, 4, 5, 4, 5, 0, 1, 0, 1, 4, 5, 4, 5,
    0, 1, 0, 1, 4, 5, 4, 5, 0, 1, 0, 1, 4, 5, 4, 5,
    0, 1, 0, 1, 4, 5, 4, 5, 0, 1, 0, 1, 4, 5, 4, 5,
    8, 9, 8, 9, 12, 13, 12, 13, 8, 9, 8, 9, 12, 13, 12, 13,
    8, 9, 8, 9, 12, 13, 12, 13, 8, 9, 8, 9, 12, 13, 12, 13,
    8, 9, 8, 9, 12, 13, 12, 13, 8, 9, 8, 9, 12, 13, 12, 13,
    8, 9, 8, 9, 12, 13, 12, 13, 8, 9, 8, 9, 12, 13, 12, 13,
];

/// Prefetch hint (0F 18 /reg) to cache level: prefetchnta, t0, t1, t2.
pub const PREFETCH_LEVELS: [u8; 4] = [2, 1, 2, 3];

#[rustfmt::skip]
const ONE_BYTE_HAS_MODRM: [u8; 256] = [
//  0  1  2  3  4  5  6  7  8  9  a  b  c  d  e  f
    1, 1, 1, 1, 0, 0, 0, 0, 1, 1, 1, 1, 0, 0, 0, 0, // 0
    1, 1, 1, 1, 0, 0, 0, 0, 1, 1, 1, 1, 0, 0, 0, 0, // 1
    1, 1, 1, 1, 0, 0, 0, 0, 1, 1, 1, 1, 0, 0, 0, 0, // 2
    1, 1, 1, 1, 0, 0, 0, 0, 1, 1, 1, 1, 0, 0, 0, 0, // 3
    0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, // 4
    0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, // 5
    0, 0, 1, 1, 0, 0, 0, 0, 0, 1, 0, 1, 0, 0, 0, 0, // 6
    0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, // 7
    1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, // 8
    0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, // 9
    0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, // a
    0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, // b
    1, 1, 0, 0, 1, 1, 1, 1, 0, 0, 0, 0, 0, 0, 0, 0, // c
    1, 1, 1, 1, 0, 0, 0, 0, 1, 1, 1, 1, 1, 1, 1, 1, // d
    0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, // e
    0, 0, 0, 0, 0, 0, 1, 1, 0, 0, 0, 0, 0, 0, 1, 1, // f
];

#[rustfmt::skip]
const TWO_BYTE_HAS_MODRM: [u8; 256] = [
//  0  1  2  3  4  5  6  7  8  9  a  b  c  d  e  f
    1, 1, 1, 1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1, 0, 1, // 0
    1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, // 1
    1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, // 2
    0, 0, 0, 0, 0, 0, 0, 0, 1, 0, 1, 0, 0, 0, 0, 0, // 3
    1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, // 4
    1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, // 5
    1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, // 6
    1, 1, 1, 1, 1, 1, 1, 0, 1, 1, 1, 1, 1, 1, 1, 1, // 7
    0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, // 8
    1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, // 9
    0, 0, 0, 1, 1, 1, 0, 0, 0, 0, 0, 1, 1, 1, 1, 1, // a
    1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, // b
    1, 1, 1, 1, 1, 1, 1, 1, 0, 0, 0, 0, 0, 0, 0, 0, // c
    1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, // d
    1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, // e
    1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, // f
];

/// Whether an opcode in the folded space is followed by a ModRM byte.
#[must_use]
pub fn has_modrm(op: u16) -> bool {
    let low = (op & 0xff) as usize;
    match op >> 8 {
        0 => ONE_BYTE_HAS_MODRM[low] != 0,
        1 => TWO_BYTE_HAS_MODRM[low] != 0,
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uopsim_types::{Cond, Eflags};

    #[test]
    fn fcom_table_maps_zf_pf_cf_to_c3_c2_c0() {
        for (bundle, &nibble) in FCOM_FLAGS_TO_FPSW.iter().enumerate() {
            let flags = Eflags::from_bits_truncate(bundle as u64);
            let expected = (u8::from(flags.contains(Eflags::ZF)) << 3)
                | (u8::from(flags.contains(Eflags::PF)) << 2)
                | u8::from(flags.contains(Eflags::CF));
            assert_eq!(nibble, expected, "bundle {bundle:#x}");
        }
        let zf = Eflags::ZF.bits() as usize;
        let pf = Eflags::PF.bits() as usize;
        let cf = Eflags::CF.bits() as usize;
        // Unordered: C3, C2 and C0 all set.
        assert_eq!(FCOM_FLAGS_TO_FPSW[zf | pf | cf], 0b1101);
        assert_eq!(FCOM_FLAGS_TO_FPSW[zf | pf], 0b1100);
        // Greater: everything clear.
        assert_eq!(FCOM_FLAGS_TO_FPSW[0], 0);
    }

    fn groups_read(cond: Cond) -> Vec<ArchReg> {
        let status = [Eflags::CF, Eflags::PF, Eflags::ZF, Eflags::SF, Eflags::OF];
        let groups = [
            (ArchReg::Zf, Eflags::ZF | Eflags::SF | Eflags::PF),
            (ArchReg::Cf, Eflags::CF),
            (ArchReg::Of, Eflags::OF),
        ];
        let mut out = Vec::new();
        for (reg, members) in groups {
            let sensitive = (0..32usize).any(|mask| {
                let flags = status
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| mask & (1 << i) != 0)
                    .fold(Eflags::empty(), |acc, (_, &f)| acc | f);
                members.iter().any(|bit| cond.eval(flags) != cond.eval(flags ^ bit))
            });
            if sensitive {
                out.push(reg);
            }
        }
        out
    }

    #[test]
    fn cond_flag_regs_cover_exactly_the_flags_each_condition_reads() {
        for cond in Cond::ALL {
            let entry = COND_CODE_TO_FLAG_REGS[cond.cc() as usize];
            let groups = groups_read(cond);
            assert_eq!(entry.req2, groups.len() > 1, "{cond}");
            if entry.req2 {
                assert!(groups.contains(&entry.ra) && groups.contains(&entry.rb), "{cond}");
            } else {
                assert_eq!(groups, vec![entry.ra], "{cond}");
            }
        }
    }

    #[test]
    fn carry_injection_only_for_adc_and_sbb() {
        for subop in 0..8u8 {
            assert_eq!(arith_uses_carry(subop), matches!(subop, 2 | 3));
        }
        assert_eq!(ARITH_OPS[7], Op::Sub);
        assert!(arith_is_flags_only(7));
    }

    #[test]
    fn modrm_maps_match_known_opcodes() {
        assert!(has_modrm(0x01));
        assert!(!has_modrm(0x50));
        assert!(has_modrm(0x8d));
        assert!(!has_modrm(0xe8));
        assert!(has_modrm(0x1af));
        assert!(!has_modrm(0x184));
        assert!(!has_modrm(0x1c8));
    }
}
