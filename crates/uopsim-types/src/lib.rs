//! Shared value types for the micro-op translator.
//!
//! Everything here is plain data: operand widths, x86 condition codes, flag
//! groups and the canonical architectural register numbering. The decoder and
//! the assist layer both speak in these types.

mod flags;
mod reg;

pub use flags::{Eflags, FlagSet};
pub use reg::ArchReg;

use core::fmt;

/// Operand size class. The discriminant is the size shift (log2 of the byte
/// count) carried by every micro-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Width {
    W8 = 0,
    W16 = 1,
    W32 = 2,
    W64 = 3,
}

impl Width {
    #[must_use]
    pub const fn from_shift(shift: u8) -> Width {
        match shift & 3 {
            0 => Width::W8,
            1 => Width::W16,
            2 => Width::W32,
            _ => Width::W64,
        }
    }

    #[must_use]
    pub const fn shift(self) -> u8 {
        self as u8
    }

    #[must_use]
    pub const fn bytes(self) -> u64 {
        1 << (self as u8)
    }

    #[must_use]
    pub const fn bits(self) -> u32 {
        8 << (self as u8)
    }

    #[must_use]
    pub const fn mask(self) -> u64 {
        match self {
            Width::W64 => u64::MAX,
            _ => (1u64 << self.bits()) - 1,
        }
    }

    #[must_use]
    pub const fn truncate(self, value: u64) -> u64 {
        value & self.mask()
    }

    #[must_use]
    pub const fn sign_extend(self, value: u64) -> u64 {
        let shift = 64 - self.bits();
        (((value << shift) as i64) >> shift) as u64
    }

    /// Mask applied to a shift or rotate count before it is used.
    #[must_use]
    pub const fn shift_count_mask(self) -> u8 {
        match self {
            Width::W64 => 0x3f,
            _ => 0x1f,
        }
    }
}

impl fmt::Display for Width {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Width::W8 => "b",
            Width::W16 => "w",
            Width::W32 => "d",
            Width::W64 => "q",
        };
        f.write_str(s)
    }
}

/// x86 condition code in encoding order (the low nibble of Jcc/SETcc/CMOVcc).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Cond {
    O = 0x0,
    No = 0x1,
    B = 0x2,
    Ae = 0x3,
    E = 0x4,
    Ne = 0x5,
    Be = 0x6,
    A = 0x7,
    S = 0x8,
    Ns = 0x9,
    P = 0xa,
    Np = 0xb,
    L = 0xc,
    Ge = 0xd,
    Le = 0xe,
    G = 0xf,
}

impl Cond {
    pub const ALL: [Cond; 16] = [
        Cond::O,
        Cond::No,
        Cond::B,
        Cond::Ae,
        Cond::E,
        Cond::Ne,
        Cond::Be,
        Cond::A,
        Cond::S,
        Cond::Ns,
        Cond::P,
        Cond::Np,
        Cond::L,
        Cond::Ge,
        Cond::Le,
        Cond::G,
    ];

    /// Condition for the low nibble of `cc`.
    #[must_use]
    pub const fn from_cc(cc: u8) -> Cond {
        Cond::ALL[(cc & 0xf) as usize]
    }

    #[must_use]
    pub const fn cc(self) -> u8 {
        self as u8
    }

    #[must_use]
    pub const fn invert(self) -> Cond {
        Cond::from_cc(self as u8 ^ 1)
    }

    /// Evaluates the condition against an x86 flags value.
    #[must_use]
    pub fn eval(self, flags: Eflags) -> bool {
        let cf = flags.contains(Eflags::CF);
        let zf = flags.contains(Eflags::ZF);
        let sf = flags.contains(Eflags::SF);
        let of = flags.contains(Eflags::OF);
        let pf = flags.contains(Eflags::PF);
        let base = match self as u8 >> 1 {
            0 => of,
            1 => cf,
            2 => zf,
            3 => cf || zf,
            4 => sf,
            5 => pf,
            6 => sf != of,
            _ => zf || (sf != of),
        };
        if self as u8 & 1 == 0 {
            base
        } else {
            !base
        }
    }
}

impl fmt::Display for Cond {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Cond::O => "o",
            Cond::No => "no",
            Cond::B => "c",
            Cond::Ae => "nc",
            Cond::E => "e",
            Cond::Ne => "ne",
            Cond::Be => "be",
            Cond::A => "nbe",
            Cond::S => "s",
            Cond::Ns => "ns",
            Cond::P => "p",
            Cond::Np => "np",
            Cond::L => "l",
            Cond::Ge => "nl",
            Cond::Le => "le",
            Cond::G => "nle",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn width_shift_roundtrips_and_sign_extends() {
        for shift in 0..4 {
            assert_eq!(Width::from_shift(shift).shift(), shift);
        }
        assert_eq!(Width::W8.sign_extend(0x80), 0xffff_ffff_ffff_ff80);
        assert_eq!(Width::W32.sign_extend(0x7fff_ffff), 0x7fff_ffff);
        assert_eq!(Width::W16.truncate(0x1_2345), 0x2345);
        assert_eq!(Width::W64.shift_count_mask(), 63);
        assert_eq!(Width::W16.shift_count_mask(), 31);
    }

    #[test]
    fn cond_pairs_invert() {
        for cond in Cond::ALL {
            assert_eq!(cond.invert().invert(), cond);
            let flags = Eflags::CF | Eflags::SF;
            assert_ne!(cond.eval(flags), cond.invert().eval(flags));
        }
        assert!(Cond::Be.eval(Eflags::ZF));
        assert!(Cond::L.eval(Eflags::SF));
        assert!(!Cond::L.eval(Eflags::SF | Eflags::OF));
    }
}
