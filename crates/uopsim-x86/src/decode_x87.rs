//! x87 floating point (D8..DF escapes).
//!
//! The register stack lives in internal memory as eight 64-bit doubles
//! addressed through `fptos`; simple arithmetic is translated inline and the
//! transcendental and 80-bit memory forms go to microcode assists.

use uopsim_types::{ArchReg, Cond, FlagSet, Width};

use crate::assist::AssistId;
use crate::decoder::TraceDecoder;
use crate::error::Invalid;
use crate::operand::{DecodedOperand, MemOperand, OperandForm as F, OperandMode as M};
use crate::status::X87StatusWord;
use crate::tables::{
    internal, FP_STACK_MASK, X87_CONSTANTS, X87_D8_RA, X87_D8_RB, X87_DCDE_RA, X87_DCDE_RB, X87_OPS,
};
use crate::uop::{DataType, Op, TransOp};

type Handled = Result<(), Invalid>;

/// Memory operand formats of the arithmetic escapes.
#[derive(Clone, Copy)]
enum MemFormat {
    Single,
    Double,
    Int16,
    Int32,
    Int64,
}

impl MemFormat {
    fn mode(self) -> M {
        match self {
            MemFormat::Int16 => M::W,
            MemFormat::Single | MemFormat::Int32 => M::D,
            MemFormat::Double | MemFormat::Int64 => M::Q,
        }
    }
}

/// D9 /6 register forms that go to assists (rm 0..=5).
const D9_6_ASSISTS: [AssistId; 6] = [
    AssistId::X87F2xm1,
    AssistId::X87Fyl2x,
    AssistId::X87Fptan,
    AssistId::X87Fpatan,
    AssistId::X87Fxtract,
    AssistId::X87Fprem1,
];

/// fcmovb/e/be/u; DB forms use the inverted condition.
const FCMOV_CONDS: [Cond; 4] = [Cond::B, Cond::E, Cond::Be, Cond::P];

fn fp_op(op: Op, rd: ArchReg, ra: ArchReg, rb: ArchReg) -> TransOp {
    TransOp::new(op, rd, ra, rb, ArchReg::Zero, Width::W64).datatype(DataType::Double)
}

impl TraceDecoder<'_> {
    pub(crate) fn x87_dispatch(&mut self) -> Result<bool, Invalid> {
        let op = self.ctx.op;
        if !(0x600..=0x67f).contains(&op) || self.ctx.uses_addr16() {
            return Ok(false);
        }
        let esc = ((op >> 4) & 7) as u8;
        let sub = (op & 7) as u8;
        let modrm = self.ctx.modrm;
        let rm = modrm.rm;
        match (esc, sub, modrm.is_reg()) {
            (0 | 4 | 6, _, _) | (2, _, false) => self.x87_arith(esc, sub)?,

            (1, 0, true) => self.fld_st(rm),
            (1, 0, false) => self.fld_mem(MemFormat::Single)?,
            (1, 1, true) => self.fxch(rm),
            (1, 2, true) if rm == 0 => self.fnop(),
            (1, 2 | 3, false) => self.fst_mem(MemFormat::Single, sub == 3)?,
            (1, 4, true) => self.d9_sign_group(rm)?,
            (1, 5, true) if rm < 7 => self.fldconst(rm),
            (1, 5, false) => self.fldcw()?,
            (1, 6, true) if rm < 6 => self.x87_assist(D9_6_ASSISTS[rm as usize]),
            (1, 6, true) => self.fincdec(rm == 7),
            (1, 7, true) => self.d9_math_group(rm),
            (1, 7, false) => self.fnstcw()?,
            (1, 4 | 6, false) => return Ok(false),

            (2, 0..=3, true) => self.fcmov(FCMOV_CONDS[sub as usize]),
            (2, 5, true) if rm == 1 => self.fucompp(),

            (3, 0..=3, true) => self.fcmov(FCMOV_CONDS[sub as usize].invert()),
            (3, 4, true) => return Ok(false),
            (3, 5 | 6, true) => self.fcomi(rm, sub == 5, false),
            (3, 0, false) => self.fild(MemFormat::Int32)?,
            (3, 1..=3, false) => self.fist(MemFormat::Int32, sub == 1, sub != 2)?,
            (3, 5, false) => self.ext80(AssistId::X87Fld80)?,
            (3, 7, false) => self.ext80(AssistId::X87Fstp80)?,

            (5, 0, true) => self.ffree(rm, false),
            (5, 0, false) => self.fld_mem(MemFormat::Double)?,
            (5, 1, false) => self.fist(MemFormat::Int64, true, true)?,
            (5, 2 | 3, true) => self.fst_st(rm, sub == 3),
            (5, 2 | 3, false) => self.fst_mem(MemFormat::Double, sub == 3)?,
            (5, 4 | 5, true) => self.fucom(rm, sub == 5),
            (5, 4 | 6, false) => return Ok(false),
            (5, 7, false) => self.fnstsw_mem()?,

            (7, 0, true) => self.ffree(rm, true),
            (7, 0, false) => self.fild(MemFormat::Int16)?,
            (7, 1..=3, false) => self.fist(MemFormat::Int16, sub == 1, sub != 2)?,
            (7, 4, true) if rm == 0 => self.fnstsw_ax(),
            (7, 5 | 6, true) => self.fcomi(rm, sub == 5, true),
            (7, 4 | 6, false) => return Ok(false),
            (7, 5, false) => self.fild(MemFormat::Int64)?,
            (7, 7, false) => self.fist(MemFormat::Int64, false, true)?,

            _ => return Err(self.invalid()),
        }
        Ok(true)
    }

    fn decode_fp_mem(&mut self, mode: M) -> Result<MemOperand, Invalid> {
        match self.ctx.decode(F::E, mode)? {
            DecodedOperand::Mem(mem) => Ok(mem),
            _ => Err(self.invalid()),
        }
    }

    /// Loads `mem` into `rd` as a double.
    fn load_fp_mem(&mut self, rd: ArchReg, mem: &MemOperand, format: MemFormat) {
        match format {
            MemFormat::Single => {
                self.operand_load(rd, mem, Op::Ld, DataType::Float);
                let cvt = fp_op(Op::CvtfS2dLo, rd, ArchReg::Zero, rd);
                self.emit(cvt);
            }
            MemFormat::Double => self.operand_load(rd, mem, Op::Ld, DataType::Double),
            MemFormat::Int16 | MemFormat::Int32 | MemFormat::Int64 => {
                self.operand_load(rd, mem, Op::Ldx, DataType::Int);
                let cvt = fp_op(Op::CvtfQ2d, rd, ArchReg::Zero, rd);
                self.emit(cvt);
            }
        }
    }

    /// fadd/fmul/fcom/fcomp/fsub/fsubr/fdiv/fdivr for D8, DA, DC and DE.
    fn x87_arith(&mut self, esc: u8, sub: u8) -> Handled {
        let mem = if self.ctx.modrm.is_reg() {
            None
        } else {
            let format = match esc {
                0 => MemFormat::Single,
                2 => MemFormat::Int32,
                4 => MemFormat::Double,
                _ => MemFormat::Int16,
            };
            Some((self.decode_fp_mem(format.mode())?, format))
        };
        let to_sti = mem.is_none() && matches!(esc, 4 | 6);
        let s = sub as usize;

        self.fp_load(ArchReg::Temp0, ArchReg::Fptos);
        match mem {
            Some((mem, format)) => self.load_fp_mem(ArchReg::Temp1, &mem, format),
            None => {
                self.fp_slot(ArchReg::Temp2, self.ctx.modrm.rm);
                self.fp_load(ArchReg::Temp1, ArchReg::Temp2);
            }
        }
        let (ra, rb) = if to_sti {
            (X87_DCDE_RA[s], X87_DCDE_RB[s])
        } else {
            (X87_D8_RA[s], X87_D8_RB[s])
        };

        if matches!(sub, 2 | 3) {
            let cmp = fp_op(X87_OPS[s], ArchReg::Temp0, ra, rb);
            self.emit(cmp);
            self.fcom_to_fpsw();
            if sub == 3 {
                self.fp_pop();
            }
        } else {
            let arith = fp_op(X87_OPS[s], ArchReg::Temp0, ra, rb);
            self.emit(arith);
            let dest = if to_sti { ArchReg::Temp2 } else { ArchReg::Fptos };
            self.fp_store(dest, ArchReg::Temp0);
            self.fp_tag(Op::Bts, dest);
        }
        if esc == 6 && mem.is_none() {
            self.fp_pop();
        }
        Ok(())
    }

    fn fld_st(&mut self, rm: u8) {
        self.fp_slot(ArchReg::Temp0, rm);
        self.fp_load(ArchReg::Temp0, ArchReg::Temp0);
        self.fp_push(ArchReg::Temp0);
    }

    fn fld_mem(&mut self, format: MemFormat) -> Handled {
        let mem = self.decode_fp_mem(format.mode())?;
        self.load_fp_mem(ArchReg::Temp0, &mem, format);
        self.fp_push(ArchReg::Temp0);
        Ok(())
    }

    fn fild(&mut self, format: MemFormat) -> Handled {
        self.fld_mem(format)
    }

    fn fxch(&mut self, rm: u8) {
        self.fp_slot(ArchReg::Temp2, rm);
        self.fp_load(ArchReg::Temp0, ArchReg::Fptos);
        self.fp_load(ArchReg::Temp1, ArchReg::Temp2);
        self.fp_store(ArchReg::Fptos, ArchReg::Temp1);
        self.fp_store(ArchReg::Temp2, ArchReg::Temp0);
    }

    fn fnop(&mut self) {
        self.emit(TransOp::new(Op::Nop, ArchReg::Zero, ArchReg::Zero, ArchReg::Zero, ArchReg::Zero, Width::W64));
    }

    fn fst_mem(&mut self, format: MemFormat, pop: bool) -> Handled {
        let mem = self.decode_fp_mem(format.mode())?;
        self.fp_load(ArchReg::Temp0, ArchReg::Fptos);
        match format {
            MemFormat::Single => {
                let cvt = fp_op(Op::CvtfD2sIns, ArchReg::Temp0, ArchReg::Zero, ArchReg::Temp0);
                self.emit(cvt);
                self.result_store(ArchReg::Temp0, &mem, DataType::Float);
            }
            _ => self.result_store(ArchReg::Temp0, &mem, DataType::Double),
        }
        if pop {
            self.fp_pop();
        }
        Ok(())
    }

    /// fist/fistp/fisttp to a 16, 32 or 64-bit integer.
    fn fist(&mut self, format: MemFormat, truncate: bool, pop: bool) -> Handled {
        let mem = self.decode_fp_mem(format.mode())?;
        let cvt = match (format, truncate) {
            (MemFormat::Int64, true) => Op::CvtfD2qTrunc,
            (MemFormat::Int64, false) => Op::CvtfD2q,
            (_, true) => Op::CvtfD2iTrunc,
            (_, false) => Op::CvtfD2i,
        };
        self.fp_load(ArchReg::Temp0, ArchReg::Fptos);
        let uop = fp_op(cvt, ArchReg::Temp0, ArchReg::Zero, ArchReg::Temp0);
        self.emit(uop);
        self.result_store(ArchReg::Temp0, &mem, DataType::Int);
        if pop {
            self.fp_pop();
        }
        Ok(())
    }

    /// fchs, fabs, ftst, fxam.
    fn d9_sign_group(&mut self, rm: u8) -> Handled {
        match rm {
            0 | 1 => {
                let (op, imm) = if rm == 0 { (Op::Xor, i64::MIN) } else { (Op::And, i64::MAX) };
                self.fp_load(ArchReg::Temp0, ArchReg::Fptos);
                self.emit(TransOp::new(op, ArchReg::Temp0, ArchReg::Temp0, ArchReg::Imm, ArchReg::Zero, Width::W64).rbimm(imm));
                self.fp_store(ArchReg::Fptos, ArchReg::Temp0);
            }
            4 => {
                self.fp_load(ArchReg::Temp0, ArchReg::Fptos);
                let cmp = fp_op(Op::Cmpccf, ArchReg::Temp0, ArchReg::Temp0, ArchReg::Zero);
                self.emit(cmp);
                self.fcom_to_fpsw();
            }
            5 => self.x87_assist(AssistId::X87Fxam),
            _ => return Err(self.invalid()),
        }
        Ok(())
    }

    fn fldconst(&mut self, rm: u8) {
        self.immediate(ArchReg::Temp0, Width::W64, X87_CONSTANTS[rm as usize] as i64);
        self.fp_push(ArchReg::Temp0);
    }

    fn fldcw(&mut self) -> Handled {
        let mem = self.decode_fp_mem(M::W)?;
        self.operand_load(ArchReg::Temp1, &mem, Op::Ld, DataType::Int);
        self.emit(
            TransOp::new(Op::St, ArchReg::Mem, ArchReg::Zero, ArchReg::Imm, ArchReg::Temp1, Width::W16)
                .rbimm(internal::FPCW)
                .internal(),
        );
        Ok(())
    }

    fn fnstcw(&mut self) -> Handled {
        let mem = self.decode_fp_mem(M::W)?;
        self.emit(
            TransOp::new(Op::Ld, ArchReg::Temp1, ArchReg::Zero, ArchReg::Imm, ArchReg::Zero, Width::W16)
                .rbimm(internal::FPCW)
                .internal(),
        );
        self.result_store(ArchReg::Temp1, &mem, DataType::Int);
        Ok(())
    }

    /// fdecstp / fincstp.
    fn fincdec(&mut self, increment: bool) {
        let op = if increment { Op::Addm } else { Op::Subm };
        self.emit(
            TransOp::new(op, ArchReg::Fptos, ArchReg::Fptos, ArchReg::Imm, ArchReg::Imm, Width::W64)
                .rbimm(8)
                .rcimm(FP_STACK_MASK),
        );
    }

    /// fprem, fyl2xp1, fsqrt, fsincos, frndint, fscale, fsin, fcos.
    fn d9_math_group(&mut self, rm: u8) {
        let id = match rm {
            0 => AssistId::X87Fprem,
            1 => AssistId::X87Fyl2xp1,
            2 => {
                self.fp_load(ArchReg::Temp0, ArchReg::Fptos);
                let sqrt = fp_op(Op::Sqrtf, ArchReg::Temp0, ArchReg::Temp0, ArchReg::Temp0);
                self.emit(sqrt);
                self.fp_store(ArchReg::Fptos, ArchReg::Temp0);
                return;
            }
            3 => AssistId::X87Fsincos,
            4 => AssistId::X87Frndint,
            5 => AssistId::X87Fscale,
            6 => AssistId::X87Fsin,
            _ => AssistId::X87Fcos,
        };
        self.x87_assist(id);
    }

    fn fcmov(&mut self, cond: Cond) {
        self.fp_slot(ArchReg::Temp1, self.ctx.modrm.rm);
        self.fp_load(ArchReg::Temp0, ArchReg::Fptos);
        self.fp_load(ArchReg::Temp1, ArchReg::Temp1);
        let flags = self.cond_source(cond, ArchReg::Temp2);
        self.emit(
            TransOp::new(Op::Sel, ArchReg::Temp0, ArchReg::Temp0, ArchReg::Temp1, flags, Width::W64)
                .cond(cond)
                .datatype(DataType::Double),
        );
        self.fp_store(ArchReg::Fptos, ArchReg::Temp0);
    }

    /// Unordered compare of st(0) with st(rm) into the status word.
    fn fucom(&mut self, rm: u8, pop: bool) {
        self.fp_slot(ArchReg::Temp2, rm);
        self.fp_load(ArchReg::Temp0, ArchReg::Fptos);
        self.fp_load(ArchReg::Temp1, ArchReg::Temp2);
        let cmp = fp_op(Op::Ucmpccf, ArchReg::Temp0, ArchReg::Temp0, ArchReg::Temp1);
        self.emit(cmp);
        self.fcom_to_fpsw();
        if pop {
            self.fp_pop();
        }
    }

    fn fucompp(&mut self) {
        self.fucom(1, true);
        self.fp_pop();
    }

    /// fcomi/fucomi(p): compare straight into the integer flags.
    fn fcomi(&mut self, rm: u8, unordered: bool, pop: bool) {
        self.fp_slot(ArchReg::Temp1, rm);
        self.fp_load(ArchReg::Temp0, ArchReg::Fptos);
        self.fp_load(ArchReg::Temp1, ArchReg::Temp1);
        let op = if unordered { Op::Ucmpccf } else { Op::Cmpccf };
        let cmp = fp_op(op, ArchReg::Temp0, ArchReg::Temp0, ArchReg::Temp1).flags(FlagSet::ALU);
        self.emit(cmp);
        if pop {
            self.fp_pop();
        }
    }

    /// ffree st(i); ffreep also pops.
    fn ffree(&mut self, rm: u8, pop: bool) {
        self.fp_slot(ArchReg::Temp0, rm);
        self.fp_tag(Op::Btr, ArchReg::Temp0);
        if pop {
            self.fp_pop();
        }
    }

    /// fst/fstp st(i).
    fn fst_st(&mut self, rm: u8, pop: bool) {
        self.fp_slot(ArchReg::Temp1, rm);
        self.fp_load(ArchReg::Temp0, ArchReg::Fptos);
        self.fp_store(ArchReg::Temp1, ArchReg::Temp0);
        self.fp_tag(Op::Bts, ArchReg::Temp1);
        if pop {
            self.fp_pop();
        }
    }

    /// Folds TOP into the status word before it is read.
    fn fpsw_with_top(&mut self) {
        let fold = self.mask(Op::Mask, ArchReg::Fpsw, ArchReg::Fpsw, ArchReg::Fptos, X87StatusWord::TOP_FROM_FPTOS);
        self.emit(fold);
    }

    fn fnstsw_mem(&mut self) -> Handled {
        let mem = self.decode_fp_mem(M::W)?;
        self.fpsw_with_top();
        self.result_store(ArchReg::Fpsw, &mem, DataType::Int);
        Ok(())
    }

    fn fnstsw_ax(&mut self) {
        self.fpsw_with_top();
        self.emit(TransOp::new(Op::Mov, ArchReg::Rax, ArchReg::Rax, ArchReg::Fpsw, ArchReg::Zero, Width::W16));
    }

    /// fld/fstp m80: the assist finds the effective address in `ar1`.
    fn ext80(&mut self, id: AssistId) -> Handled {
        let mem = self.decode_fp_mem(M::Q)?;
        self.effective_address(ArchReg::Ar1, &mem);
        self.x87_assist(id);
        Ok(())
    }

    fn x87_assist(&mut self, id: AssistId) {
        let (selfrip, nextrip) = (self.ctx.ripstart, self.ctx.rip());
        self.observer.record_slow_x87(selfrip);
        self.microcode_assist(id, selfrip, nextrip);
    }
}
