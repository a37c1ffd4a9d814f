//! Per-instruction decode state: prefixes, opcode, ModRM and the operand
//! decoder that walks the remaining instruction bytes.

use tracing::debug;
use uopsim_types::{ArchReg, Width};

use crate::error::{DecodeError, Invalid, Result};
use crate::operand::{DecodedOperand, MemOperand, OperandForm, OperandMode, PseudoReg, Segment};
use crate::tables::has_modrm;

pub const MAX_INSN_LEN: usize = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CpuMode {
    Bits32,
    #[default]
    Bits64,
}

impl CpuMode {
    #[must_use]
    pub const fn use64(self) -> bool {
        matches!(self, CpuMode::Bits64)
    }

    /// Mask applied to instruction pointers in this mode.
    #[must_use]
    pub const fn ip_mask(self) -> u64 {
        match self {
            CpuMode::Bits32 => 0xffff_ffff,
            CpuMode::Bits64 => u64::MAX,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rex {
    pub present: bool,
    pub w: bool,
    pub r: bool,
    pub x: bool,
    pub b: bool,
}

impl Rex {
    fn from_byte(b: u8) -> Self {
        debug_assert!((0x40..=0x4f).contains(&b));
        Self {
            present: true,
            w: (b & 0x08) != 0,
            r: (b & 0x04) != 0,
            x: (b & 0x02) != 0,
            b: (b & 0x01) != 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Prefixes {
    pub opsize: bool,
    pub addrsize: bool,
    pub lock: bool,
    pub rep: bool,
    pub repne: bool,
    pub segment: Option<Segment>,
}

/// Raw ModRM fields, without REX extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ModRm {
    pub mod_: u8,
    pub reg: u8,
    pub rm: u8,
}

impl ModRm {
    #[must_use]
    pub const fn from_byte(byte: u8) -> Self {
        Self {
            mod_: byte >> 6,
            reg: (byte >> 3) & 7,
            rm: byte & 7,
        }
    }

    #[must_use]
    pub const fn is_reg(self) -> bool {
        self.mod_ == 3
    }
}

/// Decode state for one instruction.
///
/// `op` lives in the folded opcode space: `0x000..=0x0ff` one-byte map,
/// `0x100..=0x1ff` the `0F` map, `0x200`/`0x300` the `0F 38`/`0F 3A` maps and
/// `0x600..=0x67f` the x87 escapes (`0x600 | (esc & 7) << 4 | modrm.reg`).
#[derive(Debug, Clone)]
pub struct DecodeContext {
    pub mode: CpuMode,
    pub ripstart: u64,
    pub prefixes: Prefixes,
    pub rex: Rex,
    pub op: u16,
    pub modrm: ModRm,
    pub invalid: bool,
    bytes: [u8; MAX_INSN_LEN],
    len: usize,
    pos: usize,
}

impl DecodeContext {
    #[must_use]
    pub fn new(mode: CpuMode, ripstart: u64, window: &[u8]) -> Self {
        let len = window.len().min(MAX_INSN_LEN);
        let mut bytes = [0u8; MAX_INSN_LEN];
        bytes[..len].copy_from_slice(&window[..len]);
        Self {
            mode,
            ripstart,
            prefixes: Prefixes::default(),
            rex: Rex::default(),
            op: 0,
            modrm: ModRm::default(),
            invalid: false,
            bytes,
            len,
            pos: 0,
        }
    }

    #[must_use]
    pub fn use64(&self) -> bool {
        self.mode.use64()
    }

    /// Address of the byte after everything consumed so far; once all
    /// operands are decoded this is the next instruction's rip.
    #[must_use]
    pub fn rip(&self) -> u64 {
        self.ripstart.wrapping_add(self.pos as u64) & self.mode.ip_mask()
    }

    /// Bytes consumed so far.
    #[must_use]
    pub fn consumed(&self) -> usize {
        self.pos
    }

    pub(crate) fn rewind(&mut self, pos: usize) {
        self.pos = pos;
    }

    fn next_u8(&mut self) -> Result<u8> {
        if self.pos >= MAX_INSN_LEN {
            return Err(DecodeError::TooLong);
        }
        if self.pos >= self.len {
            return Err(DecodeError::Truncated { offset: self.pos });
        }
        let b = self.bytes[self.pos];
        self.pos += 1;
        Ok(b)
    }

    fn next_le(&mut self, len: usize) -> Result<u64> {
        let mut out = 0u64;
        for i in 0..len {
            out |= (self.next_u8()? as u64) << (i * 8);
        }
        Ok(out)
    }

    fn next_signed(&mut self, len: usize) -> Result<i64> {
        let raw = self.next_le(len)?;
        let width = match len {
            1 => Width::W8,
            2 => Width::W16,
            4 => Width::W32,
            _ => Width::W64,
        };
        Ok(width.sign_extend(raw) as i64)
    }

    /// Consumes prefixes and the opcode, folds it into the extended opcode
    /// space and fetches ModRM when the opcode has one.
    pub fn fetch_opcode(&mut self) -> Result<()> {
        let mut b = self.next_u8()?;
        loop {
            match b {
                0x66 => self.prefixes.opsize = true,
                0x67 => self.prefixes.addrsize = true,
                0xf0 => self.prefixes.lock = true,
                0xf2 => self.prefixes.repne = true,
                0xf3 => self.prefixes.rep = true,
                0x26 => self.prefixes.segment = Some(Segment::Es),
                0x2e => self.prefixes.segment = Some(Segment::Cs),
                0x36 => self.prefixes.segment = Some(Segment::Ss),
                0x3e => self.prefixes.segment = Some(Segment::Ds),
                0x64 => self.prefixes.segment = Some(Segment::Fs),
                0x65 => self.prefixes.segment = Some(Segment::Gs),
                0x40..=0x4f if self.use64() => {
                    self.rex = Rex::from_byte(b);
                    b = self.next_u8()?;
                    // REX only counts when it directly precedes the opcode.
                    if is_legacy_prefix(b) {
                        self.rex = Rex::default();
                        continue;
                    }
                    if (0x40..=0x4f).contains(&b) {
                        continue;
                    }
                    break;
                }
                _ => break,
            }
            b = self.next_u8()?;
        }

        if b == 0x0f {
            let b2 = self.next_u8()?;
            self.op = match b2 {
                0x38 => 0x200 | self.next_u8()? as u16,
                0x3a => 0x300 | self.next_u8()? as u16,
                _ => 0x100 | b2 as u16,
            };
        } else if (0xd8..=0xdf).contains(&b) {
            self.modrm = ModRm::from_byte(self.next_u8()?);
            self.op = 0x600 | (((b & 7) as u16) << 4) | self.modrm.reg as u16;
            return Ok(());
        } else {
            self.op = b as u16;
        }

        if has_modrm(self.op) {
            self.modrm = ModRm::from_byte(self.next_u8()?);
        }
        Ok(())
    }

    /// Whether the ModRM operand is a memory reference with 16-bit
    /// addressing. Neither decoder models those; they go to the slow path.
    #[must_use]
    pub fn uses_addr16(&self) -> bool {
        self.prefixes.addrsize && !self.use64() && has_modrm(self.op) && !self.modrm.is_reg()
    }

    /// Marks the instruction invalid and returns the marker to propagate.
    pub(crate) fn make_invalid(&mut self) -> Invalid {
        self.invalid = true;
        Invalid
    }

    /// Effective operand width for `mode`.
    #[must_use]
    pub fn width_of(&self, mode: OperandMode) -> Width {
        match mode {
            OperandMode::B => Width::W8,
            OperandMode::W => Width::W16,
            OperandMode::D => Width::W32,
            OperandMode::Q => Width::W64,
            OperandMode::V => {
                if self.use64() && self.rex.w {
                    Width::W64
                } else if self.prefixes.opsize {
                    Width::W16
                } else {
                    Width::W32
                }
            }
        }
    }

    fn reg_operand(&self, code: u8, width: Width) -> PseudoReg {
        if width == Width::W8 && !self.rex.present && (4..8).contains(&code) {
            return PseudoReg {
                reg: ArchReg::gpr(code - 4),
                width,
                high8: true,
            };
        }
        PseudoReg::new(ArchReg::gpr(code), width)
    }

    /// Register operand encoded in the opcode byte itself.
    ///
    /// `def64` selects 64-bit default operand size (push/pop) and `use_rex_b`
    /// extends `code` with REX.B.
    #[must_use]
    pub fn gform_ext(&self, mode: OperandMode, code: u8, def64: bool, use_rex_b: bool) -> DecodedOperand {
        let code = (code & 7) | if use_rex_b && self.rex.b { 8 } else { 0 };
        let width = if def64 && mode == OperandMode::V {
            if self.prefixes.opsize {
                Width::W16
            } else {
                Width::W64
            }
        } else {
            self.width_of(mode)
        };
        DecodedOperand::Reg(self.reg_operand(code, width))
    }

    /// Resolves one operand, consuming its bytes.
    ///
    /// Any byte-level failure marks the instruction invalid; the caller
    /// propagates the returned marker with `?` before emitting anything.
    pub(crate) fn decode(&mut self, form: OperandForm, mode: OperandMode) -> core::result::Result<DecodedOperand, Invalid> {
        match self.decode_operand(form, mode) {
            Ok(operand) => Ok(operand),
            Err(err) => {
                debug!(rip = self.ripstart, op = self.op, %err, "operand decode failed");
                Err(self.make_invalid())
            }
        }
    }

    fn decode_operand(&mut self, form: OperandForm, mode: OperandMode) -> Result<DecodedOperand> {
        let width = self.width_of(mode);
        match form {
            OperandForm::G => {
                let code = self.modrm.reg | if self.rex.r { 8 } else { 0 };
                Ok(DecodedOperand::Reg(self.reg_operand(code, width)))
            }
            OperandForm::E => self.decode_rm(width),
            OperandForm::VarRegDef32 => Ok(DecodedOperand::Reg(PseudoReg::new(ArchReg::Rax, width))),
            OperandForm::I => {
                let len = match width {
                    Width::W8 => 1,
                    Width::W16 => 2,
                    Width::W32 | Width::W64 => 4,
                };
                Ok(DecodedOperand::Imm(self.next_signed(len)?))
            }
            OperandForm::I64 => Ok(DecodedOperand::Imm(self.next_signed(width.bytes() as usize)?)),
        }
    }

    fn decode_rm(&mut self, width: Width) -> Result<DecodedOperand> {
        let modrm = self.modrm;
        if modrm.is_reg() {
            let code = modrm.rm | if self.rex.b { 8 } else { 0 };
            return Ok(DecodedOperand::Reg(self.reg_operand(code, width)));
        }
        let mut mem = MemOperand::absolute(0, width);
        let mut disp_len = match modrm.mod_ {
            1 => 1,
            2 => 4,
            _ => 0,
        };

        if modrm.rm == 4 {
            let sib = self.next_u8()?;
            let index = ((sib >> 3) & 7) | if self.rex.x { 8 } else { 0 };
            if index != 4 {
                mem.index = ArchReg::gpr(index);
                mem.scale = sib >> 6;
            }
            if (sib & 7) == 5 && modrm.mod_ == 0 {
                disp_len = 4;
            } else {
                mem.base = ArchReg::gpr((sib & 7) | if self.rex.b { 8 } else { 0 });
            }
        } else if modrm.rm == 5 && modrm.mod_ == 0 {
            if self.use64() {
                mem.base = ArchReg::Rip;
            }
            disp_len = 4;
        } else {
            mem.base = ArchReg::gpr(modrm.rm | if self.rex.b { 8 } else { 0 });
        }

        if disp_len != 0 {
            mem.offset = self.next_signed(disp_len)?;
        }
        Ok(DecodedOperand::Mem(mem))
    }
}

fn is_legacy_prefix(b: u8) -> bool {
    matches!(
        b,
        0x66 | 0x67 | 0xf0 | 0xf2 | 0xf3 | 0x26 | 0x2e | 0x36 | 0x3e | 0x64 | 0x65
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(mode: CpuMode, bytes: &[u8]) -> DecodeContext {
        let mut ctx = DecodeContext::new(mode, 0x1000, bytes);
        ctx.fetch_opcode().unwrap();
        ctx
    }

    #[test]
    fn folds_two_byte_and_x87_opcodes() {
        assert_eq!(ctx(CpuMode::Bits64, &[0x0f, 0xaf, 0xc1]).op, 0x1af);
        // fcomp st(1): DC /3 register form -> 0x600 | 4 << 4 | 3.
        let c = ctx(CpuMode::Bits64, &[0xdc, 0xd9]);
        assert_eq!(c.op, 0x643);
        assert_eq!(c.modrm, ModRm { mod_: 3, reg: 3, rm: 1 });
    }

    #[test]
    fn rex_is_dropped_when_followed_by_a_legacy_prefix() {
        let c = ctx(CpuMode::Bits64, &[0x48, 0x66, 0x01, 0xc0]);
        assert!(!c.rex.present);
        assert!(c.prefixes.opsize);
        assert_eq!(c.width_of(OperandMode::V), Width::W16);

        // 0x48 is `dec eax` outside long mode.
        assert_eq!(ctx(CpuMode::Bits32, &[0x48]).op, 0x48);
    }

    #[test]
    fn decodes_sib_and_rip_relative_memory() {
        // add [rax+rcx*4+0x10], edx
        let mut c = ctx(CpuMode::Bits64, &[0x01, 0x54, 0x88, 0x10]);
        let DecodedOperand::Mem(mem) = c.decode(OperandForm::E, OperandMode::V).unwrap() else {
            panic!("expected memory operand");
        };
        assert_eq!((mem.base, mem.index, mem.scale, mem.offset), (ArchReg::Rax, ArchReg::Rcx, 2, 0x10));

        // mov eax, [rip+0x20]
        let mut c = ctx(CpuMode::Bits64, &[0x8b, 0x05, 0x20, 0, 0, 0]);
        let DecodedOperand::Mem(mem) = c.decode(OperandForm::E, OperandMode::V).unwrap() else {
            panic!("expected memory operand");
        };
        assert_eq!(mem.base, ArchReg::Rip);
        assert_eq!(c.rip(), 0x1006);
    }

    #[test]
    fn high_byte_registers_need_no_rex() {
        // mov ah, bh
        let mut c = ctx(CpuMode::Bits64, &[0x88, 0xfc]);
        let DecodedOperand::Reg(reg) = c.decode(OperandForm::E, OperandMode::B).unwrap() else {
            panic!("expected register operand");
        };
        assert!(reg.high8);
        assert_eq!(reg.reg, ArchReg::Rax);
        assert_eq!(reg.to_string(), "ah");

        // mov spl, dil
        let mut c = ctx(CpuMode::Bits64, &[0x40, 0x88, 0xfc]);
        let DecodedOperand::Reg(reg) = c.decode(OperandForm::E, OperandMode::B).unwrap() else {
            panic!("expected register operand");
        };
        assert!(!reg.high8);
        assert_eq!(reg.reg, ArchReg::Rsp);
    }

    #[test]
    fn truncated_immediate_marks_invalid() {
        let mut c = ctx(CpuMode::Bits64, &[0x05, 0x01]);
        assert!(c.decode(OperandForm::I, OperandMode::V).is_err());
        assert!(c.invalid);
    }
}
