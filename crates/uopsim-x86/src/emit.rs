//! Emission helpers shared by the integer and x87 decoders.

use uopsim_types::{ArchReg, Cond, FlagSet, Width};

use crate::assist::AssistId;
use crate::block::BlockEnd;
use crate::decoder::TraceDecoder;
use crate::error::Invalid;
use crate::operand::{DecodedOperand, MemOperand, PseudoReg, Segment};
use crate::status::X87StatusWord;
use crate::tables::{internal, AH_EXTRACT, AH_INSERT, COND_CODE_TO_FLAG_REGS, FP_STACK_MASK};
use crate::uop::{DataType, Extend, MaskControl, Op, TransOp};

type Emitted = Result<(), Invalid>;

impl TraceDecoder<'_> {
    /// Width of stack pointer and effective address arithmetic.
    pub(crate) fn stack_width(&self) -> Width {
        if self.use64() {
            Width::W64
        } else {
            Width::W32
        }
    }

    pub(crate) fn addr_width(&self) -> Width {
        if self.use64() && !self.ctx.prefixes.addrsize {
            Width::W64
        } else {
            Width::W32
        }
    }

    pub(crate) fn immediate(&mut self, rd: ArchReg, size: Width, imm: i64) {
        self.emit(TransOp::new(Op::Mov, rd, ArchReg::Zero, ArchReg::Imm, ArchReg::Zero, size).rbimm(imm));
    }

    pub(crate) fn collcc(&mut self, rd: ArchReg) {
        self.emit(
            TransOp::new(Op::Collcc, rd, ArchReg::Zf, ArchReg::Cf, ArchReg::Of, Width::W64)
                .flags(FlagSet::ALU),
        );
    }

    /// Register holding the flags `cond` reads; collects them into `scratch`
    /// when they span two rename groups.
    pub(crate) fn cond_source(&mut self, cond: Cond, scratch: ArchReg) -> ArchReg {
        let regs = COND_CODE_TO_FLAG_REGS[cond.cc() as usize];
        if regs.req2 {
            self.collcc(scratch);
            scratch
        } else if regs.ra != ArchReg::Zero {
            regs.ra
        } else {
            regs.rb
        }
    }

    pub(crate) fn mask(&self, op: Op, rd: ArchReg, ra: ArchReg, rb: ArchReg, control: MaskControl) -> TransOp {
        TransOp::new(op, rd, ra, rb, ArchReg::Imm, Width::W64).rcimm(control.to_imm())
    }

    /// Adds the override segment's base to `base`, returning the register
    /// that holds the biased base. Long mode only honors FS and GS.
    pub(crate) fn bias_by_segreg(&mut self, base: ArchReg) -> ArchReg {
        let Some(seg) = self.ctx.prefixes.segment else {
            return base;
        };
        if self.use64() && !matches!(seg, Segment::Fs | Segment::Gs) {
            return base;
        }
        let width = self.addr_width();
        self.emit(TransOp::new(Op::Add, ArchReg::Temp6, base, seg.base_reg(), ArchReg::Zero, width));
        ArchReg::Temp6
    }

    /// Base register and displacement with RIP-relative offsets resolved
    /// against the next instruction and the segment bias applied.
    fn resolve_base(&mut self, mem: &MemOperand) -> (ArchReg, i64) {
        let (base, offset) = if mem.base == ArchReg::Rip {
            (ArchReg::Zero, mem.offset.wrapping_add(self.ctx.rip() as i64))
        } else {
            (mem.base, mem.offset)
        };
        (self.bias_by_segreg(base), offset)
    }

    /// `adda rd = base + disp + index << scale`.
    pub(crate) fn effective_address(&mut self, rd: ArchReg, mem: &MemOperand) {
        let (base, offset) = self.resolve_base(mem);
        let width = self.addr_width();
        self.emit(
            TransOp::new(Op::Adda, rd, base, ArchReg::Imm, mem.index, width)
                .rbimm(offset)
                .extshift(mem.scale),
        );
    }

    /// Whether effective addresses wrap at 32 bits in long mode.
    fn narrow_addresses(&self) -> bool {
        self.use64() && self.ctx.prefixes.addrsize
    }

    /// `(base, disp)` for a load or store. An index, or a 32-bit address in
    /// long mode, is folded into `temp8`.
    fn address_operands(&mut self, mem: &MemOperand) -> (ArchReg, i64) {
        if mem.has_index() || self.narrow_addresses() {
            self.effective_address(ArchReg::Temp8, mem);
            (ArchReg::Temp8, 0)
        } else {
            self.resolve_base(mem)
        }
    }

    pub(crate) fn operand_load(&mut self, rd: ArchReg, mem: &MemOperand, op: Op, datatype: DataType) {
        let (base, disp) = self.address_operands(mem);
        self.emit(
            TransOp::new(op, rd, base, ArchReg::Imm, ArchReg::Zero, mem.size)
                .rbimm(disp)
                .datatype(datatype),
        );
    }

    pub(crate) fn prefetch(&mut self, mem: &MemOperand, level: u8) {
        let (base, disp) = self.address_operands(mem);
        self.emit(
            TransOp::new(Op::LdPre, ArchReg::Temp0, base, ArchReg::Imm, ArchReg::Zero, Width::W8)
                .rbimm(disp)
                .cache_level(level),
        );
    }

    pub(crate) fn result_store(&mut self, rs: ArchReg, mem: &MemOperand, datatype: DataType) {
        let (base, disp) = self.address_operands(mem);
        self.emit(
            TransOp::new(Op::St, ArchReg::Mem, base, ArchReg::Imm, rs, mem.size)
                .rbimm(disp)
                .datatype(datatype),
        );
    }

    /// lea: the effective address itself, at the destination width.
    pub(crate) fn address_generate(&mut self, rd: PseudoReg, mem: &MemOperand) {
        if self.narrow_addresses() {
            // Truncated to 32 bits, then zero-extended or merged into rd.
            if rd.width >= Width::W32 {
                self.effective_address(rd.reg, mem);
            } else {
                self.effective_address(ArchReg::Temp0, mem);
                self.emit(TransOp::new(Op::Mov, rd.reg, rd.reg, ArchReg::Temp0, ArchReg::Zero, rd.width));
            }
            return;
        }
        let (base, offset) = self.resolve_base(mem);
        let compute = |rd, size| {
            if mem.has_index() {
                TransOp::new(Op::Adda, rd, base, ArchReg::Imm, mem.index, size)
                    .rbimm(offset)
                    .extshift(mem.scale)
            } else {
                TransOp::new(Op::Add, rd, base, ArchReg::Imm, ArchReg::Zero, size).rbimm(offset)
            }
        };
        if rd.width >= Width::W32 {
            self.emit(compute(rd.reg, rd.width));
        } else {
            let uop = compute(ArchReg::Temp0, Width::W64);
            self.emit(uop);
            self.emit(TransOp::new(Op::Mov, rd.reg, rd.reg, ArchReg::Temp0, ArchReg::Zero, rd.width));
        }
    }

    /// Register holding the value of `r`; AH..BH are extracted into `scratch`.
    pub(crate) fn reg_value(&mut self, r: PseudoReg, scratch: ArchReg) -> ArchReg {
        if !r.high8 {
            return r.reg;
        }
        let uop = self.mask(Op::Maskb, scratch, ArchReg::Zero, r.reg, AH_EXTRACT);
        self.emit(uop);
        scratch
    }

    fn insert_high8(&mut self, r: PseudoReg, value: ArchReg) {
        let uop = self.mask(Op::Maskb, r.reg, r.reg, value, AH_INSERT);
        self.emit(uop);
    }

    /// Value of a register or immediate source operand, as `(reg, imm)`.
    /// Memory sources are loaded into `scratch`.
    fn source(&mut self, src: &DecodedOperand, scratch: ArchReg) -> (ArchReg, i64) {
        match *src {
            DecodedOperand::Reg(r) => (self.reg_value(r, scratch), 0),
            DecodedOperand::Mem(m) => {
                self.operand_load(scratch, &m, Op::Ld, DataType::Int);
                (scratch, 0)
            }
            DecodedOperand::Imm(v) => (ArchReg::Imm, v),
        }
    }

    /// `rd = rd OP ra`, with `rd` a register or memory operand.
    pub(crate) fn alu_reg_or_mem(
        &mut self,
        op: Op,
        rd: &DecodedOperand,
        ra: &DecodedOperand,
        setflags: FlagSet,
        rc: ArchReg,
        flagsonly: bool,
    ) -> Emitted {
        match *rd {
            DecodedOperand::Reg(dest) => {
                let (src, imm) = self.source(ra, ArchReg::Temp1);
                let cur = self.reg_value(dest, ArchReg::Temp2);
                let out = if flagsonly {
                    ArchReg::Temp0
                } else if dest.high8 {
                    ArchReg::Temp2
                } else {
                    dest.reg
                };
                self.emit(TransOp::new(op, out, cur, src, rc, dest.width).rbimm(imm).flags(setflags));
                if dest.high8 && !flagsonly {
                    self.insert_high8(dest, ArchReg::Temp2);
                }
                Ok(())
            }
            DecodedOperand::Mem(m) => {
                if ra.is_mem() {
                    return Err(self.invalid());
                }
                let (src, imm) = self.source(ra, ArchReg::Temp1);
                self.operand_load(ArchReg::Temp0, &m, Op::Ld, DataType::Int);
                self.emit(
                    TransOp::new(op, ArchReg::Temp0, ArchReg::Temp0, src, rc, m.size)
                        .rbimm(imm)
                        .flags(setflags),
                );
                if !flagsonly {
                    self.result_store(ArchReg::Temp0, &m, DataType::Int);
                }
                Ok(())
            }
            DecodedOperand::Imm(_) => Err(self.invalid()),
        }
    }

    /// One-operand ALU op. `swapped` computes `0 OP rd` (neg); otherwise
    /// `rd OP rd` (not as nor).
    pub(crate) fn unary_reg_or_mem(&mut self, op: Op, rd: &DecodedOperand, setflags: FlagSet, swapped: bool) -> Emitted {
        let (cur, out, size) = match *rd {
            DecodedOperand::Reg(dest) => {
                let cur = self.reg_value(dest, ArchReg::Temp2);
                (cur, if dest.high8 { ArchReg::Temp2 } else { dest.reg }, dest.width)
            }
            DecodedOperand::Mem(m) => {
                self.operand_load(ArchReg::Temp0, &m, Op::Ld, DataType::Int);
                (ArchReg::Temp0, ArchReg::Temp0, m.size)
            }
            DecodedOperand::Imm(_) => return Err(self.invalid()),
        };
        let rb = if swapped { ArchReg::Zero } else { cur };
        self.emit(
            TransOp::new(op, out, cur, rb, ArchReg::Zero, size)
                .flags(setflags)
                .swapped(swapped),
        );
        match *rd {
            DecodedOperand::Reg(dest) if dest.high8 => self.insert_high8(dest, ArchReg::Temp2),
            DecodedOperand::Mem(m) => self.result_store(ArchReg::Temp0, &m, DataType::Int),
            _ => {}
        }
        Ok(())
    }

    /// Plain move; 32-bit register writes zero the upper half.
    pub(crate) fn move_reg_or_mem(&mut self, rd: &DecodedOperand, ra: &DecodedOperand) -> Emitted {
        match (*rd, *ra) {
            (DecodedOperand::Reg(dest), src) if dest.high8 => {
                let value = match src {
                    DecodedOperand::Imm(v) => {
                        self.immediate(ArchReg::Temp1, Width::W64, v);
                        ArchReg::Temp1
                    }
                    other => self.source(&other, ArchReg::Temp1).0,
                };
                self.insert_high8(dest, value);
            }
            (DecodedOperand::Reg(dest), DecodedOperand::Mem(m)) if dest.width >= Width::W32 => {
                self.operand_load(dest.reg, &m, Op::Ld, DataType::Int);
            }
            (DecodedOperand::Reg(dest), src) => {
                let merge = if dest.width >= Width::W32 { ArchReg::Zero } else { dest.reg };
                let (value, imm) = self.source(&src, ArchReg::Temp1);
                self.emit(TransOp::new(Op::Mov, dest.reg, merge, value, ArchReg::Zero, dest.width).rbimm(imm));
            }
            (DecodedOperand::Mem(m), DecodedOperand::Reg(r)) => {
                let value = self.reg_value(r, ArchReg::Temp1);
                self.result_store(value, &m, DataType::Int);
            }
            (DecodedOperand::Mem(m), DecodedOperand::Imm(v)) => {
                self.immediate(ArchReg::Temp1, Width::W64, v);
                self.result_store(ArchReg::Temp1, &m, DataType::Int);
            }
            _ => return Err(self.invalid()),
        }
        Ok(())
    }

    /// movzx/movsx: extend the `from`-wide source into `rd`.
    pub(crate) fn signext_reg_or_mem(&mut self, rd: PseudoReg, ra: &DecodedOperand, from: Width, zeroext: bool) -> Emitted {
        let src = match *ra {
            DecodedOperand::Reg(r) => self.reg_value(r, ArchReg::Temp1),
            DecodedOperand::Mem(m) => {
                self.operand_load(ArchReg::Temp1, &MemOperand { size: from, ..m }, Op::Ld, DataType::Int);
                ArchReg::Temp1
            }
            DecodedOperand::Imm(_) => return Err(self.invalid()),
        };
        let merge = if rd.width >= Width::W32 { ArchReg::Zero } else { rd.reg };
        let extend = if zeroext { Extend::Zero } else { Extend::Sign };
        let uop = self.mask(Op::Maskb, rd.reg, merge, src, MaskControl::new(0, from.bits() as u8, 0));
        self.emit(TransOp { size: rd.width, ..uop }.extend(extend));
        Ok(())
    }

    /// Store-then-decrement.
    pub(crate) fn push(&mut self, value: ArchReg, size: Width) {
        let bytes = size.bytes() as i64;
        self.emit(TransOp::new(Op::St, ArchReg::Mem, ArchReg::Rsp, ArchReg::Imm, value, size).rbimm(-bytes));
        let sw = self.stack_width();
        self.emit(TransOp::new(Op::Sub, ArchReg::Rsp, ArchReg::Rsp, ArchReg::Imm, ArchReg::Zero, sw).rbimm(bytes));
    }

    pub(crate) fn adjust_rsp(&mut self, bytes: i64) {
        let sw = self.stack_width();
        self.emit(TransOp::new(Op::Add, ArchReg::Rsp, ArchReg::Rsp, ArchReg::Imm, ArchReg::Zero, sw).rbimm(bytes));
    }

    pub(crate) fn load_stack_top(&mut self, rd: ArchReg, size: Width) {
        self.emit(TransOp::new(Op::Ld, rd, ArchReg::Rsp, ArchReg::Imm, ArchReg::Zero, size));
    }

    /// Hands the instruction to a microcode assist and ends the block.
    pub(crate) fn microcode_assist(&mut self, id: AssistId, selfrip: u64, nextrip: u64) {
        self.immediate(ArchReg::Selfrip, Width::W64, selfrip as i64);
        self.immediate(ArchReg::Nextrip, Width::W64, nextrip as i64);
        self.collcc_if_needed(ArchReg::Temp0);
        self.emit(
            TransOp::new(Op::Brp, ArchReg::Rip, ArchReg::Zero, ArchReg::Zero, ArchReg::Zero, Width::W64)
                .targets(nextrip, nextrip)
                .assist(id),
        );
        self.bb.rip_taken = nextrip;
        self.bb.rip_not_taken = nextrip;
        self.end_block(BlockEnd::Assist(id));
    }

    // x87 stack helpers. Slots are addressed by byte offset (slot * 8) and
    // tag bits live at the same bit positions in `fptags`.

    /// `rd = (fptos + 8 * i) & 0x3f`: address of st(i).
    pub(crate) fn fp_slot(&mut self, rd: ArchReg, i: u8) {
        self.emit(
            TransOp::new(Op::Addm, rd, ArchReg::Fptos, ArchReg::Imm, ArchReg::Imm, Width::W64)
                .rbimm(8 * i as i64)
                .rcimm(FP_STACK_MASK),
        );
    }

    pub(crate) fn fp_load(&mut self, rd: ArchReg, slot: ArchReg) {
        self.emit(
            TransOp::new(Op::Ld, rd, slot, ArchReg::Imm, ArchReg::Zero, Width::W64)
                .rbimm(internal::FPSTACK)
                .datatype(DataType::Double)
                .internal(),
        );
    }

    pub(crate) fn fp_store(&mut self, slot: ArchReg, value: ArchReg) {
        self.emit(
            TransOp::new(Op::St, ArchReg::Mem, slot, ArchReg::Imm, value, Width::W64)
                .rbimm(internal::FPSTACK)
                .datatype(DataType::Double)
                .internal(),
        );
    }

    pub(crate) fn fp_tag(&mut self, op: Op, slot: ArchReg) {
        self.emit(TransOp::new(op, ArchReg::Fptags, ArchReg::Fptags, slot, ArchReg::Zero, Width::W64));
    }

    pub(crate) fn fp_push(&mut self, value: ArchReg) {
        self.emit(
            TransOp::new(Op::Subm, ArchReg::Fptos, ArchReg::Fptos, ArchReg::Imm, ArchReg::Imm, Width::W64)
                .rbimm(8)
                .rcimm(FP_STACK_MASK),
        );
        self.fp_store(ArchReg::Fptos, value);
        self.fp_tag(Op::Bts, ArchReg::Fptos);
    }

    pub(crate) fn fp_pop(&mut self) {
        self.fp_tag(Op::Btr, ArchReg::Fptos);
        self.emit(
            TransOp::new(Op::Addm, ArchReg::Fptos, ArchReg::Fptos, ArchReg::Imm, ArchReg::Imm, Width::W64)
                .rbimm(8)
                .rcimm(FP_STACK_MASK),
        );
    }

    /// Translates the compare bundle in `temp0` into C3/C2/C0 of `fpsw`.
    pub(crate) fn fcom_to_fpsw(&mut self) {
        self.emit(
            TransOp::new(Op::Ld, ArchReg::Temp0, ArchReg::Temp0, ArchReg::Imm, ArchReg::Zero, Width::W8)
                .rbimm(internal::FCOM_TO_FPSW)
                .internal(),
        );
        let low = self.mask(Op::Mask, ArchReg::Fpsw, ArchReg::Fpsw, ArchReg::Temp0, X87StatusWord::C0_C2_FROM_NIBBLE);
        self.emit(low);
        let c3 = self.mask(Op::Mask, ArchReg::Fpsw, ArchReg::Fpsw, ArchReg::Temp0, X87StatusWord::C3_FROM_NIBBLE);
        self.emit(c3);
    }
}
