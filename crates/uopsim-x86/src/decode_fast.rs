//! Integer fast path: the common one-byte and `0F` opcodes, translated
//! inline without microcode assists.

use uopsim_types::{ArchReg, Cond, Eflags, FlagSet, Width};

use crate::block::BlockEnd;
use crate::decoder::TraceDecoder;
use crate::error::Invalid;
use crate::operand::{DecodedOperand, MemOperand, OperandForm as F, OperandMode as M, PseudoReg};
use crate::tables::{
    arith_is_flags_only, arith_uses_carry, AH_EXTRACT, AH_INSERT, ARITH_OPS, COND_CODE_TO_FLAG_REGS,
    IFLAGS_DF, PREFETCH_LEVELS, SHIFT_OPS, SIMPLE_SHIFT_LIMIT, SIMPLE_SHIFT_OPS,
};
use crate::uop::{BranchHint, DataType, Op, TransOp};

type Handled = Result<(), Invalid>;

/// Register behind a register operand; memory and immediates are invalid
/// where an instruction requires a register.
fn expect_reg(operand: DecodedOperand) -> Option<PseudoReg> {
    match operand {
        DecodedOperand::Reg(r) => Some(r),
        _ => None,
    }
}

/// bt, bts, btr, btc by their two-bit selector.
fn bit_test_op(selector: u8) -> Op {
    match selector & 3 {
        0 => Op::Bt,
        1 => Op::Bts,
        2 => Op::Btr,
        _ => Op::Btc,
    }
}

fn expect_imm(operand: DecodedOperand) -> i64 {
    match operand {
        DecodedOperand::Imm(v) => v,
        _ => 0,
    }
}

impl TraceDecoder<'_> {
    pub(crate) fn fast_dispatch(&mut self) -> Result<bool, Invalid> {
        if self.ctx.uses_addr16() {
            return Ok(false);
        }
        let op = self.ctx.op;
        let reg = self.ctx.modrm.reg;
        match op {
            0x00..=0x3f if op & 7 < 6 => self.arith_group(op as u8)?,
            0x40..=0x4f if !self.use64() => self.inc_dec_reg(op as u8)?,
            0x50..=0x57 => self.push_reg(op as u8)?,
            0x58..=0x5f => self.pop_reg(op as u8)?,
            0x63 if self.use64() => self.movsxd()?,
            0x68 | 0x6a => self.push_imm(op == 0x68)?,
            0x69 | 0x6b => self.imul_imm(op == 0x69)?,
            0x70..=0x7f => self.jcc(M::B)?,
            0x80..=0x83 => self.arith_imm_group(op as u8)?,
            0x84 | 0x85 => self.test_rm(op == 0x85)?,
            0x88..=0x8b => self.mov_rm(op as u8)?,
            0x8d => self.lea()?,
            0x8f if reg == 0 => self.pop_rm()?,
            0x90 if !self.ctx.rex.b => self.emit(TransOp::new(
                Op::Nop,
                ArchReg::Zero,
                ArchReg::Zero,
                ArchReg::Zero,
                ArchReg::Zero,
                Width::W64,
            )),
            0x98 => self.cbw()?,
            0x99 => self.cwd(),
            0x9e => self.sahf(),
            0x9f => self.lahf(),
            0xa0..=0xa3 => self.mov_moffs(op as u8)?,
            0xa8 | 0xa9 => self.test_acc(op == 0xa9)?,
            0xb0..=0xbf => self.mov_reg_imm(op as u8)?,
            0xc0 | 0xc1 | 0xd0..=0xd3 => self.shift_group(op as u8)?,
            0xc2 | 0xc3 => self.ret(op == 0xc2)?,
            0xc6 | 0xc7 if reg == 0 => self.mov_rm_imm(op == 0xc7)?,
            0xc8 => self.enter()?,
            0xc9 => self.leave(),
            0xe8 => self.call_rel()?,
            0xe9 | 0xeb => self.jmp_rel(op == 0xe9)?,
            0xf5 | 0xf8 | 0xf9 => self.carry_flag_op(op as u8),
            0xf6 | 0xf7 if reg < 4 => self.unary_group(op == 0xf7)?,
            0xfc | 0xfd => self.direction_flag_op(op == 0xfd),
            0xfe => self.inc_dec_rm()?,
            0xff if reg != 3 && reg != 5 => self.group5()?,
            0x10d | 0x118 => self.prefetch_op(op == 0x10d)?,
            0x140..=0x14f => self.cmov()?,
            0x180..=0x18f => self.jcc(M::V)?,
            0x190..=0x19f => self.setcc()?,
            0x1a3 | 0x1ab | 0x1b3 | 0x1bb => self.bit_test_reg()?,
            0x1af => self.imul_reg()?,
            0x1b6 | 0x1b7 | 0x1be | 0x1bf => self.movx()?,
            0x1ba => self.bit_test_imm()?,
            0x1bc | 0x1bd if !self.ctx.prefixes.rep => self.bit_scan(op == 0x1bd)?,
            0x1c8..=0x1cf => self.bswap(),
            _ => return Ok(false),
        }
        Ok(true)
    }

    fn decode_rm(&mut self, mode: M) -> Result<DecodedOperand, Invalid> {
        self.ctx.decode(F::E, mode)
    }

    fn decode_reg(&mut self, mode: M) -> Result<PseudoReg, Invalid> {
        let operand = self.ctx.decode(F::G, mode)?;
        expect_reg(operand).ok_or_else(|| self.invalid())
    }

    fn decode_imm(&mut self, mode: M) -> Result<i64, Invalid> {
        Ok(expect_imm(self.ctx.decode(F::I, mode)?))
    }

    fn v_or_b(wide: bool) -> M {
        if wide {
            M::V
        } else {
            M::B
        }
    }

    /// Promotes a 32-bit stack operand to 64 bits in long mode.
    fn stack_operand(&self, operand: DecodedOperand) -> DecodedOperand {
        if self.use64() && operand.width() == Width::W32 {
            operand.with_width(Width::W64)
        } else {
            operand
        }
    }

    fn branch_target(&self, disp: i64) -> u64 {
        self.ctx.rip().wrapping_add(disp as u64) & self.mode.ip_mask()
    }

    /// add/or/adc/sbb/and/sub/xor/cmp in their six encodings.
    fn arith_group(&mut self, op: u8) -> Handled {
        let (rd, ra) = match op & 7 {
            0 => (self.decode_rm(M::B)?, self.ctx.decode(F::G, M::B)?),
            1 => (self.decode_rm(M::V)?, self.ctx.decode(F::G, M::V)?),
            2 => (self.ctx.decode(F::G, M::B)?, self.decode_rm(M::B)?),
            3 => (self.ctx.decode(F::G, M::V)?, self.decode_rm(M::V)?),
            4 => (self.ctx.gform_ext(M::B, 0, false, false), self.ctx.decode(F::I, M::B)?),
            _ => (self.ctx.decode(F::VarRegDef32, M::V)?, self.ctx.decode(F::I, M::V)?),
        };
        self.arith(op >> 3, &rd, &ra)
    }

    fn arith(&mut self, subop: u8, rd: &DecodedOperand, ra: &DecodedOperand) -> Handled {
        let rc = if arith_uses_carry(subop) { ArchReg::Cf } else { ArchReg::Zero };
        self.alu_reg_or_mem(ARITH_OPS[subop as usize], rd, ra, FlagSet::ALU, rc, arith_is_flags_only(subop))
    }

    fn arith_imm_group(&mut self, op: u8) -> Handled {
        if op == 0x82 {
            return Err(self.invalid());
        }
        let rd = self.decode_rm(Self::v_or_b(op != 0x80))?;
        let ra = self.ctx.decode(F::I, Self::v_or_b(op == 0x81))?;
        self.arith(self.ctx.modrm.reg, &rd, &ra)
    }

    /// inc/dec r32 (0x40..0x4f outside long mode).
    fn inc_dec_reg(&mut self, op: u8) -> Handled {
        let rd = self.ctx.gform_ext(M::V, op, false, false);
        let uop = if op < 0x48 { Op::Add } else { Op::Sub };
        self.alu_reg_or_mem(uop, &rd, &DecodedOperand::Imm(1), FlagSet::ZAPS | FlagSet::OF, ArchReg::Zero, false)
    }

    fn inc_dec_rm(&mut self) -> Handled {
        let reg = self.ctx.modrm.reg;
        if reg > 1 {
            return Err(self.invalid());
        }
        let rd = self.decode_rm(M::B)?;
        let uop = if reg == 0 { Op::Add } else { Op::Sub };
        self.alu_reg_or_mem(uop, &rd, &DecodedOperand::Imm(1), FlagSet::ZAPS | FlagSet::OF, ArchReg::Zero, false)
    }

    fn push_reg(&mut self, op: u8) -> Handled {
        let operand = self.ctx.gform_ext(M::V, op, self.use64(), true);
        let r = expect_reg(operand).ok_or_else(|| self.invalid())?;
        self.push(r.reg, r.width);
        Ok(())
    }

    fn pop_reg(&mut self, op: u8) -> Handled {
        let operand = self.ctx.gform_ext(M::V, op, self.use64(), true);
        let r = expect_reg(operand).ok_or_else(|| self.invalid())?;
        if r.width >= Width::W32 && r.reg != ArchReg::Rsp {
            self.load_stack_top(r.reg, r.width);
            self.adjust_rsp(r.width.bytes() as i64);
        } else {
            // Narrow pops merge; pop rsp keeps the loaded value.
            self.load_stack_top(ArchReg::Temp7, r.width);
            self.adjust_rsp(r.width.bytes() as i64);
            let merge = if r.width >= Width::W32 { ArchReg::Zero } else { r.reg };
            self.emit(TransOp::new(Op::Mov, r.reg, merge, ArchReg::Temp7, ArchReg::Zero, r.width));
        }
        Ok(())
    }

    fn pop_rm(&mut self) -> Handled {
        let rd = self.decode_rm(M::V)?;
        let rd = self.stack_operand(rd);
        let size = rd.width();
        // The destination address is formed with rsp already incremented.
        let rd = match rd {
            DecodedOperand::Mem(mut mem) if mem.base == ArchReg::Rsp => {
                mem.offset = mem.offset.wrapping_add(size.bytes() as i64);
                DecodedOperand::Mem(mem)
            }
            other => other,
        };
        self.load_stack_top(ArchReg::Temp7, size);
        self.move_reg_or_mem(&rd, &DecodedOperand::Reg(PseudoReg::new(ArchReg::Temp7, size)))?;
        self.adjust_rsp(size.bytes() as i64);
        Ok(())
    }

    fn push_imm(&mut self, wide: bool) -> Handled {
        let imm = self.decode_imm(Self::v_or_b(wide))?;
        let size = if self.ctx.prefixes.opsize { Width::W16 } else { self.stack_width() };
        self.immediate(ArchReg::Temp0, Width::W64, imm);
        self.push(ArchReg::Temp0, size);
        Ok(())
    }

    fn movsxd(&mut self) -> Handled {
        let rd = self.decode_reg(M::V)?;
        let ra = self.decode_rm(M::D)?;
        self.signext_reg_or_mem(rd, &ra, Width::W32, false)
    }

    /// `rd = ra * rb`; narrow results merge into `rd` through `rc`.
    fn multiply(&mut self, rd: PseudoReg, ra: ArchReg, rb: ArchReg, imm: i64) {
        let merge = if rd.width < Width::W32 { rd.reg } else { ArchReg::Zero };
        self.emit(
            TransOp::new(Op::Mull, rd.reg, ra, rb, merge, rd.width)
                .rbimm(imm)
                .flags(FlagSet::CF | FlagSet::OF),
        );
    }

    fn source_reg(&mut self, ra: &DecodedOperand) -> Result<ArchReg, Invalid> {
        match *ra {
            DecodedOperand::Reg(r) => Ok(self.reg_value(r, ArchReg::Temp1)),
            DecodedOperand::Mem(m) => {
                self.operand_load(ArchReg::Temp1, &m, Op::Ld, DataType::Int);
                Ok(ArchReg::Temp1)
            }
            DecodedOperand::Imm(_) => Err(self.invalid()),
        }
    }

    fn imul_imm(&mut self, wide: bool) -> Handled {
        let rd = self.decode_reg(M::V)?;
        let ra = self.decode_rm(M::V)?;
        let imm = self.decode_imm(Self::v_or_b(wide))?;
        let src = self.source_reg(&ra)?;
        self.multiply(rd, src, ArchReg::Imm, imm);
        Ok(())
    }

    fn imul_reg(&mut self) -> Handled {
        let rd = self.decode_reg(M::V)?;
        let ra = self.decode_rm(M::V)?;
        let src = self.source_reg(&ra)?;
        self.multiply(rd, rd.reg, src, 0);
        Ok(())
    }

    fn jcc(&mut self, disp_mode: M) -> Handled {
        let disp = self.decode_imm(disp_mode)?;
        let cond = Cond::from_cc(self.ctx.op as u8);
        let target = self.branch_target(disp);
        let seq = self.ctx.rip();
        self.collcc_if_needed(ArchReg::Temp0);
        let regs = COND_CODE_TO_FLAG_REGS[cond.cc() as usize];
        self.emit(
            TransOp::new(Op::Br, ArchReg::Rip, regs.ra, regs.rb, ArchReg::Zero, Width::W64)
                .cond(cond)
                .targets(target, seq),
        );
        self.bb.rip_taken = target;
        self.bb.rip_not_taken = seq;
        self.end_block(BlockEnd::Branch);
        Ok(())
    }

    fn test_rm(&mut self, wide: bool) -> Handled {
        let mode = Self::v_or_b(wide);
        let rd = self.decode_rm(mode)?;
        let ra = self.ctx.decode(F::G, mode)?;
        self.alu_reg_or_mem(Op::And, &rd, &ra, FlagSet::ALU, ArchReg::Zero, true)
    }

    fn test_acc(&mut self, wide: bool) -> Handled {
        let mode = Self::v_or_b(wide);
        let rd = self.ctx.gform_ext(mode, 0, false, false);
        let ra = self.ctx.decode(F::I, mode)?;
        self.alu_reg_or_mem(Op::And, &rd, &ra, FlagSet::ALU, ArchReg::Zero, true)
    }

    fn mov_rm(&mut self, op: u8) -> Handled {
        let mode = Self::v_or_b(op & 1 != 0);
        if op & 2 == 0 {
            let rd = self.decode_rm(mode)?;
            let ra = self.ctx.decode(F::G, mode)?;
            self.move_reg_or_mem(&rd, &ra)
        } else {
            let rd = self.ctx.decode(F::G, mode)?;
            let ra = self.decode_rm(mode)?;
            self.move_reg_or_mem(&rd, &ra)
        }
    }

    fn mov_rm_imm(&mut self, wide: bool) -> Handled {
        let mode = Self::v_or_b(wide);
        let rd = self.decode_rm(mode)?;
        let ra = self.ctx.decode(F::I, mode)?;
        self.move_reg_or_mem(&rd, &ra)
    }

    fn mov_reg_imm(&mut self, op: u8) -> Handled {
        let (rd, ra) = if op < 0xb8 {
            (self.ctx.gform_ext(M::B, op, false, true), self.ctx.decode(F::I, M::B)?)
        } else {
            (self.ctx.gform_ext(M::V, op, false, true), self.ctx.decode(F::I64, M::V)?)
        };
        self.move_reg_or_mem(&rd, &ra)
    }

    /// mov al/eax <-> [moffs]; the offset is as wide as the address size.
    fn mov_moffs(&mut self, op: u8) -> Handled {
        let acc = self.ctx.gform_ext(Self::v_or_b(op & 1 != 0), 0, false, false);
        let (offset_mode, offset_width) = match (self.use64(), self.ctx.prefixes.addrsize) {
            (true, false) => (M::Q, Width::W64),
            (true, true) | (false, false) => (M::D, Width::W32),
            (false, true) => (M::W, Width::W16),
        };
        let offset = expect_imm(self.ctx.decode(F::I64, offset_mode)?);
        let offset = offset_width.truncate(offset as u64) as i64;
        let mem = DecodedOperand::Mem(MemOperand::absolute(offset, acc.width()));
        if op < 0xa2 {
            self.move_reg_or_mem(&acc, &mem)
        } else {
            self.move_reg_or_mem(&mem, &acc)
        }
    }

    fn lea(&mut self) -> Handled {
        let rd = self.decode_reg(M::V)?;
        match self.decode_rm(M::V)? {
            DecodedOperand::Mem(mem) => {
                self.address_generate(rd, &mem);
                Ok(())
            }
            _ => Err(self.invalid()),
        }
    }

    /// cbw/cwde/cdqe.
    fn cbw(&mut self) -> Handled {
        let from = if self.ctx.prefixes.opsize {
            Width::W8
        } else if self.use64() && self.ctx.rex.w {
            Width::W32
        } else {
            Width::W16
        };
        let to = Width::from_shift(from.shift() + 1);
        let src = DecodedOperand::Reg(PseudoReg::new(ArchReg::Rax, from));
        self.signext_reg_or_mem(PseudoReg::new(ArchReg::Rax, to), &src, from, false)
    }

    /// cwd/cdq/cqo: broadcast the accumulator's sign bit into rdx.
    fn cwd(&mut self) {
        let width = if self.ctx.prefixes.opsize {
            Width::W16
        } else if self.use64() && self.ctx.rex.w {
            Width::W64
        } else {
            Width::W32
        };
        self.emit(
            TransOp::new(Op::Bt, ArchReg::Temp0, ArchReg::Rax, ArchReg::Imm, ArchReg::Zero, Width::W64)
                .rbimm(i64::from(width.bits()) - 1)
                .flags(FlagSet::CF)
                .nouserflags(),
        );
        self.emit(
            TransOp::new(Op::Sel, ArchReg::Temp0, ArchReg::Zero, ArchReg::Imm, ArchReg::Temp0, Width::W64)
                .rbimm(-1)
                .cond(Cond::B),
        );
        let merge = if width < Width::W32 { ArchReg::Rdx } else { ArchReg::Zero };
        self.emit(TransOp::new(Op::Mov, ArchReg::Rdx, merge, ArchReg::Temp0, ArchReg::Zero, width));
        if width == Width::W32 {
            self.emit(TransOp::new(Op::Mov, ArchReg::Rax, ArchReg::Zero, ArchReg::Rax, ArchReg::Zero, Width::W32));
        }
    }

    fn sahf(&mut self) {
        let extract = self.mask(Op::Maskb, ArchReg::Temp0, ArchReg::Zero, ArchReg::Rax, AH_EXTRACT);
        self.emit(extract);
        self.emit(
            TransOp::new(Op::Movrcc, ArchReg::Temp0, ArchReg::Temp0, ArchReg::Zero, ArchReg::Zero, Width::W64)
                .flags(FlagSet::ZAPS | FlagSet::CF),
        );
    }

    fn lahf(&mut self) {
        self.collcc(ArchReg::Temp0);
        let insert = self.mask(Op::Maskb, ArchReg::Rax, ArchReg::Rax, ArchReg::Temp0, AH_INSERT);
        self.emit(insert);
    }

    fn shift_group(&mut self, op: u8) -> Handled {
        let mode = Self::v_or_b(op & 1 != 0);
        let rd = self.decode_rm(mode)?;
        let count = match op {
            0xc0 | 0xc1 => self.ctx.decode(F::I, M::B)?,
            0xd0 | 0xd1 => DecodedOperand::Imm(1),
            _ => DecodedOperand::Reg(PseudoReg::new(ArchReg::Rcx, Width::W8)),
        };
        let subop = self.ctx.modrm.reg as usize;
        let rotate = subop < 4;
        match count {
            DecodedOperand::Imm(raw) => {
                let count = (raw as u8) & rd.width().shift_count_mask();
                let flags = match (count, rotate) {
                    (0, _) => FlagSet::empty(),
                    (1, true) => FlagSet::OF | FlagSet::CF,
                    (1, false) => FlagSet::ALU,
                    (_, true) => FlagSet::CF,
                    (_, false) => FlagSet::ZAPS | FlagSet::CF,
                };
                let uop = match SIMPLE_SHIFT_OPS[subop] {
                    Some(simple) if count <= SIMPLE_SHIFT_LIMIT => simple,
                    _ => SHIFT_OPS[subop],
                };
                let rc = if matches!(subop, 2 | 3) { ArchReg::Cf } else { ArchReg::Zero };
                self.alu_reg_or_mem(uop, &rd, &DecodedOperand::Imm(i64::from(count)), flags, rc, false)
            }
            cl => {
                // A zero count leaves every flag untouched, so the old
                // flags ride along in the bundle.
                self.collcc(ArchReg::Temp5);
                self.alu_reg_or_mem(SHIFT_OPS[subop], &rd, &cl, FlagSet::ALU, ArchReg::Temp5, false)
            }
        }
    }

    fn ret(&mut self, has_imm: bool) -> Handled {
        let extra = if has_imm { self.decode_imm(M::W)? as u16 } else { 0 };
        let size = if self.ctx.prefixes.opsize { Width::W16 } else { self.stack_width() };
        self.load_stack_top(ArchReg::Temp7, size);
        self.adjust_rsp(size.bytes() as i64 + i64::from(extra));
        self.collcc_if_needed(ArchReg::Temp5);
        self.emit(
            TransOp::new(Op::Jmp, ArchReg::Rip, ArchReg::Temp7, ArchReg::Zero, ArchReg::Zero, Width::W64)
                .hint(BranchHint::PopRas),
        );
        self.bb.rip_taken = 0;
        self.bb.rip_not_taken = 0;
        self.end_block(BlockEnd::Branch);
        Ok(())
    }

    fn enter(&mut self) -> Handled {
        let frame = self.decode_imm(M::W)? as u16;
        let level = self.decode_imm(M::B)? as u8;
        if level != 0 {
            return Err(self.invalid());
        }
        let size = if self.ctx.prefixes.opsize { Width::W16 } else { self.stack_width() };
        self.push(ArchReg::Rbp, size);
        let merge = if size < Width::W32 { ArchReg::Rbp } else { ArchReg::Zero };
        self.emit(TransOp::new(Op::Mov, ArchReg::Rbp, merge, ArchReg::Rsp, ArchReg::Zero, size));
        let sw = self.stack_width();
        self.emit(
            TransOp::new(Op::Sub, ArchReg::Rsp, ArchReg::Rsp, ArchReg::Imm, ArchReg::Zero, sw).rbimm(i64::from(frame)),
        );
        Ok(())
    }

    fn leave(&mut self) {
        let size = if self.ctx.prefixes.opsize { Width::W16 } else { self.stack_width() };
        let sw = self.stack_width();
        // Touch the saved frame pointer before rsp moves so a fault leaves
        // the stack pointer intact.
        self.emit(TransOp::new(Op::Ld, ArchReg::Temp0, ArchReg::Rbp, ArchReg::Imm, ArchReg::Zero, size));
        self.emit(TransOp::new(Op::Mov, ArchReg::Rsp, ArchReg::Zero, ArchReg::Rbp, ArchReg::Zero, sw));
        self.load_stack_top(ArchReg::Rbp, size);
        self.adjust_rsp(size.bytes() as i64);
    }

    fn call_rel(&mut self) -> Handled {
        let disp = self.decode_imm(M::V)?;
        let next = self.ctx.rip();
        let target = self.branch_target(disp);
        self.immediate(ArchReg::Temp0, Width::W64, next as i64);
        let size = self.stack_width();
        self.push(ArchReg::Temp0, size);
        self.unconditional(target, BranchHint::PushRas);
        Ok(())
    }

    fn jmp_rel(&mut self, wide: bool) -> Handled {
        let disp = self.decode_imm(Self::v_or_b(wide))?;
        let target = self.branch_target(disp);
        self.unconditional(target, BranchHint::None);
        Ok(())
    }

    fn unconditional(&mut self, target: u64, hint: BranchHint) {
        self.collcc_if_needed(ArchReg::Temp5);
        self.emit(
            TransOp::new(Op::Bru, ArchReg::Rip, ArchReg::Zero, ArchReg::Zero, ArchReg::Zero, Width::W64)
                .targets(target, target)
                .hint(hint),
        );
        self.bb.rip_taken = target;
        self.bb.rip_not_taken = target;
        self.end_block(BlockEnd::Branch);
    }

    /// cmc, clc, stc.
    fn carry_flag_op(&mut self, op: u8) {
        let cf = Eflags::CF.bits() as i64;
        let uop = match op {
            0xf5 => TransOp::new(Op::Xorcc, ArchReg::Temp0, ArchReg::Cf, ArchReg::Imm, ArchReg::Zero, Width::W64).rbimm(cf),
            0xf8 => TransOp::new(Op::Andcc, ArchReg::Temp0, ArchReg::Zero, ArchReg::Zero, ArchReg::Zero, Width::W64),
            _ => TransOp::new(Op::Orcc, ArchReg::Temp0, ArchReg::Zero, ArchReg::Imm, ArchReg::Zero, Width::W64).rbimm(cf),
        };
        self.emit(uop.flags(FlagSet::CF));
    }

    /// cld, std.
    fn direction_flag_op(&mut self, set: bool) {
        let (uop, imm) = if set { (Op::Or, IFLAGS_DF) } else { (Op::And, !IFLAGS_DF) };
        self.emit(
            TransOp::new(uop, ArchReg::Iflags, ArchReg::Iflags, ArchReg::Imm, ArchReg::Zero, Width::W64).rbimm(imm),
        );
    }

    /// test/not/neg (F6/F7 /0../3).
    fn unary_group(&mut self, wide: bool) -> Handled {
        let mode = Self::v_or_b(wide);
        let rd = self.decode_rm(mode)?;
        match self.ctx.modrm.reg {
            0 => {
                let imm = self.ctx.decode(F::I, mode)?;
                self.alu_reg_or_mem(Op::And, &rd, &imm, FlagSet::ALU, ArchReg::Zero, true)
            }
            2 => self.unary_reg_or_mem(Op::Nor, &rd, FlagSet::empty(), false),
            3 => self.unary_reg_or_mem(Op::Sub, &rd, FlagSet::ALU, true),
            _ => Err(self.invalid()),
        }
    }

    /// inc/dec/call/jmp/push through FF.
    fn group5(&mut self) -> Handled {
        let reg = self.ctx.modrm.reg;
        let rd = self.decode_rm(M::V)?;
        match reg {
            0 | 1 => {
                let uop = if reg == 0 { Op::Add } else { Op::Sub };
                self.alu_reg_or_mem(uop, &rd, &DecodedOperand::Imm(1), FlagSet::ZAPS | FlagSet::OF, ArchReg::Zero, false)
            }
            2 | 4 => {
                let rd = self.stack_operand(rd);
                let target = match rd {
                    // The push below moves rsp before the jump reads it.
                    DecodedOperand::Reg(r) if r.reg == ArchReg::Rsp => {
                        self.emit(TransOp::new(Op::Mov, ArchReg::Temp0, ArchReg::Zero, ArchReg::Rsp, ArchReg::Zero, Width::W64));
                        ArchReg::Temp0
                    }
                    other => self.source_reg(&other)?,
                };
                let hint = if reg == 2 {
                    let next = self.ctx.rip();
                    self.immediate(ArchReg::Temp6, Width::W64, next as i64);
                    let size = self.stack_width();
                    self.push(ArchReg::Temp6, size);
                    BranchHint::PushRas
                } else {
                    BranchHint::None
                };
                self.collcc_if_needed(ArchReg::Temp5);
                self.emit(TransOp::new(Op::Jmp, ArchReg::Rip, target, ArchReg::Zero, ArchReg::Zero, Width::W64).hint(hint));
                self.bb.rip_taken = 0;
                self.bb.rip_not_taken = 0;
                self.end_block(BlockEnd::Branch);
                Ok(())
            }
            6 => {
                let rd = self.stack_operand(rd);
                let size = rd.width();
                self.move_reg_or_mem(&DecodedOperand::Reg(PseudoReg::new(ArchReg::Temp7, size)), &rd)?;
                self.push(ArchReg::Temp7, size);
                Ok(())
            }
            _ => Err(self.invalid()),
        }
    }

    /// prefetchw (0F 0D) and prefetchnta/t0/t1/t2 (0F 18).
    fn prefetch_op(&mut self, write: bool) -> Handled {
        let reg = self.ctx.modrm.reg as usize;
        match self.decode_rm(M::B)? {
            DecodedOperand::Mem(mem) if write => self.prefetch(&mem, 2),
            DecodedOperand::Mem(mem) => match PREFETCH_LEVELS.get(reg) {
                Some(&level) => self.prefetch(&mem, level),
                None => self.emit(TransOp::new(Op::Nop, ArchReg::Zero, ArchReg::Zero, ArchReg::Zero, ArchReg::Zero, Width::W64)),
            },
            _ if write => return Err(self.invalid()),
            _ => self.emit(TransOp::new(Op::Nop, ArchReg::Zero, ArchReg::Zero, ArchReg::Zero, ArchReg::Zero, Width::W64)),
        }
        Ok(())
    }

    fn cmov(&mut self) -> Handled {
        let rd = self.decode_reg(M::V)?;
        let ra = self.decode_rm(M::V)?;
        let cond = Cond::from_cc(self.ctx.op as u8);
        let flags = self.cond_source(cond, ArchReg::Temp2);
        let src = self.source_reg(&ra)?;
        self.emit(TransOp::new(Op::Sel, rd.reg, rd.reg, src, flags, rd.width).cond(cond));
        Ok(())
    }

    fn setcc(&mut self) -> Handled {
        let rd = self.decode_rm(M::B)?;
        let cond = Cond::from_cc(self.ctx.op as u8);
        let flags = self.cond_source(cond, ArchReg::Temp2);
        let set = |rd, ra| {
            TransOp::new(Op::Set, rd, ra, ArchReg::Imm, flags, Width::W8)
                .rbimm(1)
                .cond(cond)
        };
        match rd {
            DecodedOperand::Reg(r) if !r.high8 => self.emit(set(r.reg, r.reg)),
            DecodedOperand::Reg(r) => {
                self.emit(set(ArchReg::Temp3, ArchReg::Zero));
                let insert = self.mask(Op::Maskb, r.reg, r.reg, ArchReg::Temp3, AH_INSERT);
                self.emit(insert);
            }
            DecodedOperand::Mem(m) => {
                self.emit(set(ArchReg::Temp7, ArchReg::Zero));
                self.result_store(ArchReg::Temp7, &m, DataType::Int);
            }
            DecodedOperand::Imm(_) => return Err(self.invalid()),
        }
        Ok(())
    }

    /// bt/bts/btr/btc with a register bit index.
    fn bit_test_reg(&mut self) -> Handled {
        let uop = bit_test_op((self.ctx.op >> 3) as u8);
        let rd = self.decode_rm(M::V)?;
        let index = self.decode_reg(M::V)?;
        match rd {
            DecodedOperand::Reg(r) => {
                let out = if uop == Op::Bt { ArchReg::Temp0 } else { r.reg };
                self.emit(TransOp::new(uop, out, r.reg, index.reg, ArchReg::Zero, r.width).flags(FlagSet::CF));
            }
            DecodedOperand::Mem(m) => {
                // The bit index may reach outside the addressed operand: the
                // byte holding the bit is at ea + (index >> 3).
                self.effective_address(ArchReg::Temp1, &m);
                self.emit(
                    TransOp::new(Op::Sar, ArchReg::Temp2, index.reg, ArchReg::Imm, ArchReg::Zero, Width::W64).rbimm(3),
                );
                self.emit(TransOp::new(Op::Ld, ArchReg::Temp0, ArchReg::Temp1, ArchReg::Temp2, ArchReg::Zero, Width::W8));
                self.emit(
                    TransOp::new(uop, ArchReg::Temp0, ArchReg::Temp0, index.reg, ArchReg::Zero, Width::W8)
                        .flags(FlagSet::CF),
                );
                if uop != Op::Bt {
                    self.emit(TransOp::new(
                        Op::St,
                        ArchReg::Mem,
                        ArchReg::Temp1,
                        ArchReg::Temp2,
                        ArchReg::Temp0,
                        Width::W8,
                    ));
                }
            }
            DecodedOperand::Imm(_) => return Err(self.invalid()),
        }
        Ok(())
    }

    /// bt/bts/btr/btc with an immediate bit index (0F BA /4../7).
    fn bit_test_imm(&mut self) -> Handled {
        let reg = self.ctx.modrm.reg;
        let rd = self.decode_rm(M::V)?;
        let imm = self.decode_imm(M::B)?;
        let r = match rd {
            DecodedOperand::Reg(r) if reg >= 4 => r,
            _ => return Err(self.invalid()),
        };
        let uop = bit_test_op(reg);
        let out = if uop == Op::Bt { ArchReg::Temp0 } else { r.reg };
        let bit = imm & i64::from(r.width.bits() - 1);
        self.emit(
            TransOp::new(uop, out, r.reg, ArchReg::Imm, ArchReg::Zero, r.width)
                .rbimm(bit)
                .flags(FlagSet::CF),
        );
        Ok(())
    }

    fn movx(&mut self) -> Handled {
        let op = self.ctx.op;
        let rd = self.decode_reg(M::V)?;
        let from_mode = if op & 1 == 0 { M::B } else { M::W };
        let ra = self.decode_rm(from_mode)?;
        let from = self.ctx.width_of(from_mode);
        self.signext_reg_or_mem(rd, &ra, from, op < 0x1b8)
    }

    /// bsf/bsr; a zero source leaves the destination unchanged.
    fn bit_scan(&mut self, reverse: bool) -> Handled {
        let rd = self.ctx.decode(F::G, M::V)?;
        let ra = self.decode_rm(M::V)?;
        let uop = if reverse { Op::Clz } else { Op::Ctz };
        self.alu_reg_or_mem(uop, &rd, &ra, FlagSet::ALU, ArchReg::Zero, false)
    }

    fn bswap(&mut self) {
        let operand = self.ctx.gform_ext(M::V, self.ctx.op as u8, false, true);
        // Narrow forms clear the upper bits too.
        if let DecodedOperand::Reg(r) = operand {
            self.emit(TransOp::new(Op::Bswap, r.reg, ArchReg::Zero, r.reg, ArchReg::Zero, r.width));
        }
    }
}
