//! Typed operand descriptors produced by the operand decoder.

use core::fmt;

use uopsim_types::{ArchReg, Width};

/// How an operand is encoded in the instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandForm {
    /// ModRM r/m: register or memory.
    E,
    /// ModRM reg.
    G,
    /// Immediate of at most 32 bits, sign-extended.
    I,
    /// Immediate of the full operand width (up to 64 bits), sign-extended.
    I64,
    /// The accumulator at the effective operand size.
    VarRegDef32,
}

/// Operand width class before prefixes are applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandMode {
    B,
    W,
    D,
    Q,
    /// Operand-size dependent: 16, 32 or 64 bits.
    V,
}

/// A register as named by the instruction: the canonical register plus the
/// slice of it that is accessed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PseudoReg {
    pub reg: ArchReg,
    pub width: Width,
    /// AH/CH/DH/BH: bits 8..16 of the first four GPRs.
    pub high8: bool,
}

impl PseudoReg {
    #[must_use]
    pub const fn new(reg: ArchReg, width: Width) -> Self {
        Self {
            reg,
            width,
            high8: false,
        }
    }
}

const NAMES8: [&str; 16] = [
    "al", "cl", "dl", "bl", "spl", "bpl", "sil", "dil", "r8b", "r9b", "r10b", "r11b", "r12b",
    "r13b", "r14b", "r15b",
];
const NAMES8_HIGH: [&str; 4] = ["ah", "ch", "dh", "bh"];
const NAMES16: [&str; 16] = [
    "ax", "cx", "dx", "bx", "sp", "bp", "si", "di", "r8w", "r9w", "r10w", "r11w", "r12w", "r13w",
    "r14w", "r15w",
];
const NAMES32: [&str; 16] = [
    "eax", "ecx", "edx", "ebx", "esp", "ebp", "esi", "edi", "r8d", "r9d", "r10d", "r11d",
    "r12d", "r13d", "r14d", "r15d",
];

impl fmt::Display for PseudoReg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.reg.is_gpr() {
            return write!(f, "{}", self.reg);
        }
        let i = self.reg.index();
        let name = match self.width {
            Width::W8 if self.high8 => NAMES8_HIGH[i & 3],
            Width::W8 => NAMES8[i],
            Width::W16 => NAMES16[i],
            Width::W32 => NAMES32[i],
            Width::W64 => self.reg.name(),
        };
        f.write_str(name)
    }
}

/// x86 segment override.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Segment {
    Es,
    Cs,
    Ss,
    Ds,
    Fs,
    Gs,
}

impl Segment {
    #[must_use]
    pub const fn base_reg(self) -> ArchReg {
        match self {
            Segment::Es => ArchReg::Esbase,
            Segment::Cs => ArchReg::Csbase,
            Segment::Ss => ArchReg::Ssbase,
            Segment::Ds => ArchReg::Dsbase,
            Segment::Fs => ArchReg::Fsbase,
            Segment::Gs => ArchReg::Gsbase,
        }
    }
}

/// Memory operand. `base` is `ArchReg::Rip` for RIP-relative addressing and
/// `ArchReg::Zero` when absent; `index` is `ArchReg::Zero` when absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemOperand {
    pub base: ArchReg,
    pub index: ArchReg,
    /// Index scale as a shift (0..=3).
    pub scale: u8,
    pub offset: i64,
    pub size: Width,
}

impl MemOperand {
    /// Absolute address with no registers involved.
    #[must_use]
    pub const fn absolute(offset: i64, size: Width) -> Self {
        Self {
            base: ArchReg::Zero,
            index: ArchReg::Zero,
            scale: 0,
            offset,
            size,
        }
    }

    #[must_use]
    pub const fn has_index(&self) -> bool {
        !matches!(self.index, ArchReg::Zero)
    }
}

impl fmt::Display for MemOperand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:[", self.size)?;
        let mut first = true;
        if self.base != ArchReg::Zero {
            write!(f, "{}", self.base)?;
            first = false;
        }
        if self.has_index() {
            if !first {
                f.write_str("+")?;
            }
            write!(f, "{}", self.index)?;
            if self.scale != 0 {
                write!(f, "*{}", 1u8 << self.scale)?;
            }
            first = false;
        }
        if self.offset != 0 || first {
            if !first && self.offset >= 0 {
                f.write_str("+")?;
            }
            write!(f, "{}", self.offset)?;
        }
        f.write_str("]")
    }
}

/// A fully resolved operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodedOperand {
    Reg(PseudoReg),
    Mem(MemOperand),
    Imm(i64),
}

impl DecodedOperand {
    #[must_use]
    pub fn is_mem(&self) -> bool {
        matches!(self, DecodedOperand::Mem(_))
    }

    /// Operand width; immediates report 64 bits.
    #[must_use]
    pub fn width(&self) -> Width {
        match self {
            DecodedOperand::Reg(r) => r.width,
            DecodedOperand::Mem(m) => m.size,
            DecodedOperand::Imm(_) => Width::W64,
        }
    }

    /// Same operand with its access width replaced.
    #[must_use]
    pub fn with_width(self, width: Width) -> Self {
        match self {
            DecodedOperand::Reg(mut r) => {
                r.width = width;
                DecodedOperand::Reg(r)
            }
            DecodedOperand::Mem(mut m) => {
                m.size = width;
                DecodedOperand::Mem(m)
            }
            imm => imm,
        }
    }
}

impl fmt::Display for DecodedOperand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodedOperand::Reg(r) => write!(f, "{r}"),
            DecodedOperand::Mem(m) => write!(f, "{m}"),
            DecodedOperand::Imm(v) => write!(f, "{v:#x}"),
        }
    }
}
