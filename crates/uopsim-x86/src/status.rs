//! x87 status and control word fields.

use crate::uop::MaskControl;

/// Packed x87 status word.
///
/// TOP is tracked separately in `fptos` while translated code runs; it is
/// folded into bits 11..14 only when the status word is read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct X87StatusWord(pub u16);

impl X87StatusWord {
    pub const IE: u16 = 1 << 0;
    pub const DE: u16 = 1 << 1;
    pub const ZE: u16 = 1 << 2;
    pub const OE: u16 = 1 << 3;
    pub const UE: u16 = 1 << 4;
    pub const PE: u16 = 1 << 5;
    pub const SF: u16 = 1 << 6;
    pub const ES: u16 = 1 << 7;
    pub const C0: u16 = 1 << 8;
    pub const C1: u16 = 1 << 9;
    pub const C2: u16 = 1 << 10;
    pub const TOP_MASK: u16 = 0b111 << 11;
    pub const C3: u16 = 1 << 14;

    /// Compare nibble bits 0..3 into C0..C2 (C1 receives the always-clear bit 1).
    pub const C0_C2_FROM_NIBBLE: MaskControl = MaskControl::new(56, 3, 56);
    /// Compare nibble bit 3 into C3.
    pub const C3_FROM_NIBBLE: MaskControl = MaskControl::new(50, 1, 53);
    /// `fptos` (slot * 8) into TOP.
    pub const TOP_FROM_FPTOS: MaskControl = MaskControl::new(53, 3, 56);

    fn bit(self, mask: u16) -> bool {
        self.0 & mask != 0
    }

    fn set_bit(&mut self, mask: u16, value: bool) {
        if value {
            self.0 |= mask;
        } else {
            self.0 &= !mask;
        }
    }

    #[must_use]
    pub fn c0(self) -> bool {
        self.bit(Self::C0)
    }

    #[must_use]
    pub fn c1(self) -> bool {
        self.bit(Self::C1)
    }

    #[must_use]
    pub fn c2(self) -> bool {
        self.bit(Self::C2)
    }

    #[must_use]
    pub fn c3(self) -> bool {
        self.bit(Self::C3)
    }

    pub fn set_c0(&mut self, value: bool) {
        self.set_bit(Self::C0, value);
    }

    pub fn set_c1(&mut self, value: bool) {
        self.set_bit(Self::C1, value);
    }

    pub fn set_c2(&mut self, value: bool) {
        self.set_bit(Self::C2, value);
    }

    pub fn set_c3(&mut self, value: bool) {
        self.set_bit(Self::C3, value);
    }

    #[must_use]
    pub fn top(self) -> u8 {
        ((self.0 & Self::TOP_MASK) >> 11) as u8
    }

    pub fn set_top(&mut self, slot: u8) {
        self.0 = (self.0 & !Self::TOP_MASK) | (u16::from(slot & 7) << 11);
    }
}

/// x87 rounding control (FCW bits 10..12).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RoundingControl {
    NearestEven,
    Down,
    Up,
    TowardZero,
}

impl RoundingControl {
    #[must_use]
    pub fn from_fcw(fcw: u16) -> Self {
        match (fcw >> 10) & 0b11 {
            0b00 => RoundingControl::NearestEven,
            0b01 => RoundingControl::Down,
            0b10 => RoundingControl::Up,
            _ => RoundingControl::TowardZero,
        }
    }

    #[must_use]
    pub fn round(self, v: f64) -> f64 {
        match self {
            RoundingControl::NearestEven => v.round_ties_even(),
            RoundingControl::Down => v.floor(),
            RoundingControl::Up => v.ceil(),
            RoundingControl::TowardZero => v.trunc(),
        }
    }
}

pub const FCW_DEFAULT: u16 = 0x037f;
