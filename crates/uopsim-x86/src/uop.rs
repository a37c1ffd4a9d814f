//! The micro-op ("transfer operation") model emitted by the decoders.

use core::fmt;

use uopsim_types::{ArchReg, Cond, FlagSet, Width};

use crate::assist::AssistId;

/// Micro-op opcodes.
///
/// ALU ops compute `rd = ra OP rb` at `size`; for 8/16-bit sizes the upper
/// bits of the result come from `ra`, 32-bit results zero-extend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Nop,
    /// `rd = merge(ra, rb)`.
    Mov,
    And,
    Or,
    Xor,
    Nor,
    /// `rd = ra + rb + rc`; `rc` carries the incoming carry for adc.
    Add,
    /// `rd = ra - rb - rc`; `rc` carries the incoming borrow for sbb.
    Sub,
    /// `rd = ra + rb + (rc << extshift)`.
    Adda,
    /// `rd = (ra + rb) & rc`.
    Addm,
    /// `rd = (ra - rb) & rc`.
    Subm,
    /// `rd = cond(rc) ? rb : ra`.
    Sel,
    /// `rd = merge(ra, cond(rc) ? rb : 0)`.
    Set,
    Br,
    Bru,
    Jmp,
    /// Branch into a microcode assist.
    Brp,
    /// Gathers `zf`, `cf` and `of` into one flag bundle.
    Collcc,
    /// Writes the flag bundle held in `ra` to the renamed flags selected by `setflags`.
    Movrcc,
    Andcc,
    Orcc,
    Xorcc,
    /// Bit-field merge controlled by a [`MaskControl`] immediate in `rc`.
    Mask,
    /// [`Op::Mask`] followed by zero- or sign-extension of the inserted field.
    Maskb,
    Bt,
    Bts,
    Btr,
    Btc,
    Rotl,
    Rotr,
    Rotcl,
    Rotcr,
    Shl,
    Shr,
    Sar,
    /// Shift variants that take no flag bundle operand.
    Shls,
    Shrs,
    Sars,
    Mull,
    Ctz,
    Clz,
    Bswap,
    /// `rd = [ra + rb]`, zero-extended.
    Ld,
    /// `rd = [ra + rb]`, sign-extended.
    Ldx,
    /// Prefetch hint load; `cache_level` selects the target level.
    LdPre,
    /// `[ra + rb] = rc`.
    St,
    Addf,
    Subf,
    Mulf,
    Divf,
    Sqrtf,
    /// Ordered floating point compare producing a flag bundle.
    Cmpccf,
    /// Unordered floating point compare producing a flag bundle.
    Ucmpccf,
    CvtfS2dLo,
    CvtfD2sIns,
    CvtfQ2d,
    CvtfD2q,
    CvtfD2qTrunc,
    CvtfD2i,
    CvtfD2iTrunc,
}

impl Op {
    #[must_use]
    pub const fn mnemonic(self) -> &'static str {
        match self {
            Op::Nop => "nop",
            Op::Mov => "mov",
            Op::And => "and",
            Op::Or => "or",
            Op::Xor => "xor",
            Op::Nor => "nor",
            Op::Add => "add",
            Op::Sub => "sub",
            Op::Adda => "adda",
            Op::Addm => "addm",
            Op::Subm => "subm",
            Op::Sel => "sel",
            Op::Set => "set",
            Op::Br => "br",
            Op::Bru => "bru",
            Op::Jmp => "jmp",
            Op::Brp => "brp",
            Op::Collcc => "collcc",
            Op::Movrcc => "movrcc",
            Op::Andcc => "andcc",
            Op::Orcc => "orcc",
            Op::Xorcc => "xorcc",
            Op::Mask => "mask",
            Op::Maskb => "maskb",
            Op::Bt => "bt",
            Op::Bts => "bts",
            Op::Btr => "btr",
            Op::Btc => "btc",
            Op::Rotl => "rotl",
            Op::Rotr => "rotr",
            Op::Rotcl => "rotcl",
            Op::Rotcr => "rotcr",
            Op::Shl => "shl",
            Op::Shr => "shr",
            Op::Sar => "sar",
            Op::Shls => "shls",
            Op::Shrs => "shrs",
            Op::Sars => "sars",
            Op::Mull => "mull",
            Op::Ctz => "ctz",
            Op::Clz => "clz",
            Op::Bswap => "bswap",
            Op::Ld => "ld",
            Op::Ldx => "ldx",
            Op::LdPre => "ld.pre",
            Op::St => "st",
            Op::Addf => "addf",
            Op::Subf => "subf",
            Op::Mulf => "mulf",
            Op::Divf => "divf",
            Op::Sqrtf => "sqrtf",
            Op::Cmpccf => "cmpccf",
            Op::Ucmpccf => "ucmpccf",
            Op::CvtfS2dLo => "cvtf.s2d.lo",
            Op::CvtfD2sIns => "cvtf.d2s.ins",
            Op::CvtfQ2d => "cvtf.q2d",
            Op::CvtfD2q => "cvtf.d2q",
            Op::CvtfD2qTrunc => "cvtf.d2q.t",
            Op::CvtfD2i => "cvtf.d2i",
            Op::CvtfD2iTrunc => "cvtf.d2i.t",
        }
    }

    #[must_use]
    pub const fn is_load(self) -> bool {
        matches!(self, Op::Ld | Op::Ldx | Op::LdPre)
    }

    #[must_use]
    pub const fn is_branch(self) -> bool {
        matches!(self, Op::Br | Op::Bru | Op::Jmp | Op::Brp)
    }
}

/// Return-address-stack hint carried by branches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub enum BranchHint {
    #[default]
    None,
    PushRas,
    PopRas,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub enum DataType {
    #[default]
    Int,
    Float,
    Double,
}

/// Extension applied by [`Op::Maskb`] to the inserted field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub enum Extend {
    #[default]
    None,
    Zero,
    Sign,
}

/// Bit-field control word for [`Op::Mask`] and [`Op::Maskb`].
///
/// The field mask is `mc` low bits rotated right by `ms`; the source is
/// rotated right by `ds` before the merge:
/// `rd = (ra & !M) | (rotr(rb, ds) & M)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MaskControl {
    pub ms: u8,
    pub mc: u8,
    pub ds: u8,
}

impl MaskControl {
    #[must_use]
    pub const fn new(ms: u8, mc: u8, ds: u8) -> Self {
        Self { ms, mc, ds }
    }

    /// Packed immediate form: `ms | mc << 6 | ds << 13`.
    #[must_use]
    pub const fn to_imm(self) -> i64 {
        (self.ms as i64 & 0x3f) | ((self.mc as i64 & 0x7f) << 6) | ((self.ds as i64 & 0x3f) << 13)
    }

    #[must_use]
    pub const fn from_imm(imm: i64) -> Self {
        Self {
            ms: (imm & 0x3f) as u8,
            mc: ((imm >> 6) & 0x7f) as u8,
            ds: ((imm >> 13) & 0x3f) as u8,
        }
    }

    #[must_use]
    pub const fn mask(self) -> u64 {
        let low = if self.mc >= 64 {
            u64::MAX
        } else {
            (1u64 << self.mc) - 1
        };
        low.rotate_right(self.ms as u32)
    }

    #[must_use]
    pub const fn apply(self, ra: u64, rb: u64) -> u64 {
        let m = self.mask();
        (ra & !m) | (rb.rotate_right(self.ds as u32) & m)
    }

    /// [`MaskControl::apply`] followed by extension from the top bit of the
    /// field, which must start at bit 0.
    #[must_use]
    pub const fn apply_extended(self, ra: u64, rb: u64, extend: Extend) -> u64 {
        let merged = self.apply(ra, rb);
        if self.mc == 0 || self.mc >= 64 {
            return merged;
        }
        let field = merged & self.mask();
        match extend {
            Extend::None => merged,
            Extend::Zero => field,
            Extend::Sign => {
                let shift = 64 - self.mc as u32;
                (((field << shift) as i64) >> shift) as u64
            }
        }
    }
}

/// One micro-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransOp {
    pub op: Op,
    pub rd: ArchReg,
    pub ra: ArchReg,
    pub rb: ArchReg,
    pub rc: ArchReg,
    pub size: Width,
    pub rbimm: i64,
    pub rcimm: i64,
    pub setflags: FlagSet,
    pub cond: Option<Cond>,
    pub extend: Extend,
    /// Index scale for [`Op::Adda`].
    pub extshift: u8,
    pub hint: BranchHint,
    pub datatype: DataType,
    pub cache_level: u8,
    /// Access to simulator-internal storage (x87 stack, control word, tables).
    pub internal: bool,
    /// Defines flags only for the consumer of `rd`, not the renamed user flags.
    pub nouserflags: bool,
    /// Computes `rb OP ra`; `ra` still supplies the merge bits.
    pub swapped: bool,
    pub riptaken: u64,
    pub ripseq: u64,
    pub assist: Option<AssistId>,
}

impl TransOp {
    #[must_use]
    pub fn new(op: Op, rd: ArchReg, ra: ArchReg, rb: ArchReg, rc: ArchReg, size: Width) -> Self {
        Self {
            op,
            rd,
            ra,
            rb,
            rc,
            size,
            rbimm: 0,
            rcimm: 0,
            setflags: FlagSet::empty(),
            cond: None,
            extend: Extend::None,
            extshift: 0,
            hint: BranchHint::None,
            datatype: DataType::Int,
            cache_level: 0,
            internal: false,
            nouserflags: false,
            swapped: false,
            riptaken: 0,
            ripseq: 0,
            assist: None,
        }
    }

    #[must_use]
    pub fn rbimm(mut self, imm: i64) -> Self {
        self.rbimm = imm;
        self
    }

    #[must_use]
    pub fn rcimm(mut self, imm: i64) -> Self {
        self.rcimm = imm;
        self
    }

    #[must_use]
    pub fn flags(mut self, setflags: FlagSet) -> Self {
        self.setflags = setflags;
        self
    }

    #[must_use]
    pub fn cond(mut self, cond: Cond) -> Self {
        self.cond = Some(cond);
        self
    }

    #[must_use]
    pub fn extend(mut self, extend: Extend) -> Self {
        self.extend = extend;
        self
    }

    #[must_use]
    pub fn extshift(mut self, shift: u8) -> Self {
        self.extshift = shift;
        self
    }

    #[must_use]
    pub fn hint(mut self, hint: BranchHint) -> Self {
        self.hint = hint;
        self
    }

    #[must_use]
    pub fn datatype(mut self, datatype: DataType) -> Self {
        self.datatype = datatype;
        self
    }

    #[must_use]
    pub fn cache_level(mut self, level: u8) -> Self {
        self.cache_level = level;
        self
    }

    #[must_use]
    pub fn internal(mut self) -> Self {
        self.internal = true;
        self
    }

    #[must_use]
    pub fn nouserflags(mut self) -> Self {
        self.nouserflags = true;
        self
    }

    #[must_use]
    pub fn swapped(mut self, swapped: bool) -> Self {
        self.swapped = swapped;
        self
    }

    #[must_use]
    pub fn targets(mut self, riptaken: u64, ripseq: u64) -> Self {
        self.riptaken = riptaken;
        self.ripseq = ripseq;
        self
    }

    #[must_use]
    pub fn assist(mut self, id: AssistId) -> Self {
        self.assist = Some(id);
        self
    }

    /// Whether this op redefines the renamed user flags.
    #[must_use]
    pub fn updates_user_flags(&self) -> bool {
        !self.setflags.is_empty() && !self.nouserflags
    }

    /// Mask control word carried in `rcimm` by mask ops.
    #[must_use]
    pub fn mask_control(&self) -> Option<MaskControl> {
        matches!(self.op, Op::Mask | Op::Maskb).then(|| MaskControl::from_imm(self.rcimm))
    }
}

struct Src(ArchReg, i64);

impl fmt::Display for Src {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 != ArchReg::Imm {
            write!(f, "{}", self.0)
        } else if self.1 < 0 {
            write!(f, "-{:#x}", self.1.unsigned_abs())
        } else {
            write!(f, "{:#x}", self.1)
        }
    }
}

impl fmt::Display for TransOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.op.mnemonic())?;
        if let Some(cond) = self.cond {
            write!(f, ".{cond}")?;
        }
        write!(f, ".{}", self.size)?;
        let rb = Src(self.rb, self.rbimm);
        let rc = Src(self.rc, self.rcimm);
        match self.op {
            Op::Ld | Op::Ldx | Op::LdPre => write!(f, " {} = [{}+{}]", self.rd, self.ra, rb)?,
            Op::St => write!(f, " [{}+{}] = {}", self.ra, rb, rc)?,
            Op::Br | Op::Bru | Op::Jmp | Op::Brp => write!(
                f,
                " {} = {},{} [taken {:#x}, seq {:#x}]",
                self.rd, self.ra, rb, self.riptaken, self.ripseq
            )?,
            _ => {
                write!(f, " {} = {},{}", self.rd, self.ra, rb)?;
                if self.rc != ArchReg::Zero {
                    write!(f, ",{rc}")?;
                }
            }
        }
        if !self.setflags.is_empty() {
            write!(f, " flags={:?}", self.setflags)?;
        }
        if self.internal {
            f.write_str(" internal")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mask_control_moves_fields() {
        // Insert a byte at bits 8..16 (the AH position).
        let ah_insert = MaskControl::new(56, 8, 56);
        assert_eq!(ah_insert.mask(), 0xff00);
        assert_eq!(ah_insert.apply(0x1122_3344, 0xab), 0x1122_ab44);

        // Extract AH into the low byte.
        let ah_extract = MaskControl::new(0, 8, 8);
        assert_eq!(ah_extract.apply(0, 0x1122_ab44), 0xab);

        // Move bit 3 of a nibble to bit 14 of a status word.
        let c3 = MaskControl::new(50, 1, 53);
        assert_eq!(c3.apply(0, 0b1000), 1 << 14);
        assert_eq!(c3.apply(0xffff, 0), 0xffff & !(1 << 14));
    }

    #[test]
    fn mask_control_packs_into_imm() {
        let mc = MaskControl::new(53, 3, 56);
        assert_eq!(MaskControl::from_imm(mc.to_imm()), mc);
        let wide = MaskControl::new(0, 64, 0);
        assert_eq!(MaskControl::from_imm(wide.to_imm()), wide);
    }

    #[test]
    fn maskb_sign_extends_inserted_field() {
        let cbw = MaskControl::new(0, 8, 0);
        assert_eq!(cbw.apply_extended(0, 0x80, Extend::Sign), u64::MAX - 0x7f);
        assert_eq!(cbw.apply_extended(0xffff, 0x7f, Extend::Zero), 0x7f);
    }

    #[test]
    fn display_renders_loads_and_stores() {
        let st = TransOp::new(Op::St, ArchReg::Mem, ArchReg::Rsp, ArchReg::Imm, ArchReg::Rax, Width::W64)
            .rbimm(-8);
        assert_eq!(st.to_string(), "st.q [rsp+-0x8] = rax");
        let ld = TransOp::new(Op::Ld, ArchReg::Temp7, ArchReg::Rsp, ArchReg::Imm, ArchReg::Zero, Width::W64);
        assert_eq!(ld.to_string(), "ld.q t7 = [rsp+0x0]");
    }
}
