//! Microcode assists: instructions the decoders hand off to host code.
//!
//! An assist runs against committed state once the pipeline reaches the
//! `brp` that ends its block. It reads `selfrip`/`nextrip` (and `ar1` for the
//! 80-bit memory forms), mutates [`Context`] directly and resumes at
//! `nextrip` unless it faults.

mod ext80;
mod x87;

use core::fmt;

use thiserror::Error;
use tracing::debug;
use uopsim_types::ArchReg;

use crate::fpmath::X87Math;
use crate::status::{X87StatusWord, FCW_DEFAULT};

pub use ext80::{ext80_from_f64, f64_from_ext80};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum AssistId {
    X87Fprem,
    X87Fyl2xp1,
    X87Fsqrt,
    X87Fsincos,
    X87Frndint,
    X87Fscale,
    X87Fsin,
    X87Fcos,
    X87F2xm1,
    X87Fyl2x,
    X87Fptan,
    X87Fpatan,
    X87Fxtract,
    X87Fprem1,
    X87Fxam,
    X87Fld80,
    X87Fstp80,
    InvalidOpcode,
}

impl AssistId {
    pub const COUNT: usize = AssistId::InvalidOpcode as usize + 1;

    pub const ALL: [AssistId; AssistId::COUNT] = [
        AssistId::X87Fprem,
        AssistId::X87Fyl2xp1,
        AssistId::X87Fsqrt,
        AssistId::X87Fsincos,
        AssistId::X87Frndint,
        AssistId::X87Fscale,
        AssistId::X87Fsin,
        AssistId::X87Fcos,
        AssistId::X87F2xm1,
        AssistId::X87Fyl2x,
        AssistId::X87Fptan,
        AssistId::X87Fpatan,
        AssistId::X87Fxtract,
        AssistId::X87Fprem1,
        AssistId::X87Fxam,
        AssistId::X87Fld80,
        AssistId::X87Fstp80,
        AssistId::InvalidOpcode,
    ];

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            AssistId::X87Fprem => "x87_fprem",
            AssistId::X87Fyl2xp1 => "x87_fyl2xp1",
            AssistId::X87Fsqrt => "x87_fsqrt",
            AssistId::X87Fsincos => "x87_fsincos",
            AssistId::X87Frndint => "x87_frndint",
            AssistId::X87Fscale => "x87_fscale",
            AssistId::X87Fsin => "x87_fsin",
            AssistId::X87Fcos => "x87_fcos",
            AssistId::X87F2xm1 => "x87_f2xm1",
            AssistId::X87Fyl2x => "x87_fyl2x",
            AssistId::X87Fptan => "x87_fptan",
            AssistId::X87Fpatan => "x87_fpatan",
            AssistId::X87Fxtract => "x87_fxtract",
            AssistId::X87Fprem1 => "x87_fprem1",
            AssistId::X87Fxam => "x87_fxam",
            AssistId::X87Fld80 => "x87_fld80",
            AssistId::X87Fstp80 => "x87_fstp80",
            AssistId::InvalidOpcode => "invalid_opcode",
        }
    }
}

impl fmt::Display for AssistId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Page fault raised while an assist touched guest memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageFault {
    pub pfec: u32,
    pub addr: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AssistFault {
    #[error("page fault at {addr:#x} (error code {pfec:#x})")]
    PageFault { pfec: u32, addr: u64 },

    #[error("invalid opcode at {rip:#x}")]
    InvalidOpcode { rip: u64 },

    #[error("no handler registered for assist {0}")]
    Unregistered(AssistId),
}

impl From<PageFault> for AssistFault {
    fn from(fault: PageFault) -> Self {
        AssistFault::PageFault {
            pfec: fault.pfec,
            addr: fault.addr,
        }
    }
}

/// Outcome of a guest memory copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transfer {
    pub bytes: usize,
    /// Set when the copy stopped short.
    pub fault: Option<PageFault>,
}

impl Transfer {
    #[must_use]
    pub const fn complete(bytes: usize) -> Self {
        Self { bytes, fault: None }
    }

    /// Error for a copy of `len` bytes at `addr` that came up short.
    fn check(self, addr: u64, len: usize) -> Result<(), AssistFault> {
        if self.bytes >= len {
            return Ok(());
        }
        Err(self
            .fault
            .unwrap_or(PageFault {
                pfec: 0,
                addr: addr.wrapping_add(self.bytes as u64),
            })
            .into())
    }
}

/// Virtual memory as seen by the guest.
pub trait GuestMemory {
    fn copy_from_user(&mut self, dst: &mut [u8], addr: u64) -> Transfer;
    fn copy_to_user(&mut self, addr: u64, src: &[u8]) -> Transfer;
}

/// Committed architectural state an assist operates on.
#[derive(Debug, Clone, PartialEq)]
pub struct Context {
    pub commitarf: [u64; ArchReg::COUNT],
    /// x87 register stack as f64 bit patterns, indexed by physical slot.
    pub fpstack: [u64; 8],
    pub fpcw: u16,
    pub exception: Option<AssistFault>,
}

impl Default for Context {
    fn default() -> Self {
        Self {
            commitarf: [0; ArchReg::COUNT],
            fpstack: [0; 8],
            fpcw: FCW_DEFAULT,
            exception: None,
        }
    }
}

impl Context {
    #[must_use]
    pub fn reg(&self, reg: ArchReg) -> u64 {
        self.commitarf[reg as usize]
    }

    pub fn set_reg(&mut self, reg: ArchReg, value: u64) {
        self.commitarf[reg as usize] = value;
    }

    #[must_use]
    pub fn fpsw(&self) -> X87StatusWord {
        X87StatusWord(self.reg(ArchReg::Fpsw) as u16)
    }

    pub fn set_fpsw(&mut self, sw: X87StatusWord) {
        self.set_reg(ArchReg::Fpsw, u64::from(sw.0));
    }

    /// Physical slot of st(i).
    fn slot(&self, i: usize) -> usize {
        ((self.reg(ArchReg::Fptos) >> 3) as usize + i) & 7
    }

    #[must_use]
    pub fn st(&self, i: usize) -> f64 {
        f64::from_bits(self.fpstack[self.slot(i)])
    }

    pub fn set_st(&mut self, i: usize, value: f64) {
        let slot = self.slot(i);
        self.fpstack[slot] = value.to_bits();
    }

    /// Whether st(i) holds a value; tag bits sit at `slot * 8` of `fptags`.
    #[must_use]
    pub fn st_valid(&self, i: usize) -> bool {
        self.reg(ArchReg::Fptags) & (1 << (self.slot(i) * 8)) != 0
    }

    fn set_tag(&mut self, i: usize, valid: bool) {
        let bit = 1u64 << (self.slot(i) * 8);
        let tags = self.reg(ArchReg::Fptags);
        self.set_reg(ArchReg::Fptags, if valid { tags | bit } else { tags & !bit });
    }

    pub fn fp_push(&mut self, value: f64) {
        let tos = self.reg(ArchReg::Fptos).wrapping_sub(8) & 0x3f;
        self.set_reg(ArchReg::Fptos, tos);
        self.set_st(0, value);
        self.set_tag(0, true);
    }

    pub fn fp_pop(&mut self) -> f64 {
        let value = self.st(0);
        self.set_tag(0, false);
        let tos = self.reg(ArchReg::Fptos).wrapping_add(8) & 0x3f;
        self.set_reg(ArchReg::Fptos, tos);
        value
    }

    /// Records `fault` for the exception delivery path; rip stays on the
    /// faulting instruction.
    pub fn propagate_exception(&mut self, fault: AssistFault) {
        let rip = self.reg(ArchReg::Selfrip);
        debug!(rip, %fault, "assist raised exception");
        self.set_reg(ArchReg::Rip, rip);
        self.exception = Some(fault);
    }
}

/// Arguments every assist callback receives.
pub struct AssistEnv<'a> {
    pub ctx: &'a mut Context,
    pub mem: &'a mut dyn GuestMemory,
    pub math: &'a dyn X87Math,
}

pub type AssistFn = fn(&mut AssistEnv<'_>) -> Result<(), AssistFault>;

/// One callback per [`AssistId`].
#[derive(Clone)]
pub struct AssistTable {
    handlers: [Option<AssistFn>; AssistId::COUNT],
}

impl Default for AssistTable {
    fn default() -> Self {
        let mut table = Self::empty();
        x87::register(&mut table);
        table.register(AssistId::InvalidOpcode, invalid_opcode);
        table
    }
}

impl AssistTable {
    #[must_use]
    pub fn empty() -> Self {
        Self {
            handlers: [None; AssistId::COUNT],
        }
    }

    pub fn register(&mut self, id: AssistId, handler: AssistFn) {
        self.handlers[id as usize] = Some(handler);
    }

    #[must_use]
    pub fn is_registered(&self, id: AssistId) -> bool {
        self.handlers[id as usize].is_some()
    }

    /// Runs assist `id`. On success rip moves to `nextrip`; on failure the
    /// fault is propagated into the context and also returned.
    pub fn dispatch(&self, id: AssistId, env: &mut AssistEnv<'_>) -> Result<(), AssistFault> {
        let result = match self.handlers[id as usize] {
            Some(handler) => handler(env),
            None => Err(AssistFault::Unregistered(id)),
        };
        match result {
            Ok(()) => {
                let next = env.ctx.reg(ArchReg::Nextrip);
                env.ctx.set_reg(ArchReg::Rip, next);
                Ok(())
            }
            Err(fault) => {
                env.ctx.propagate_exception(fault);
                Err(fault)
            }
        }
    }
}

fn invalid_opcode(env: &mut AssistEnv<'_>) -> Result<(), AssistFault> {
    Err(AssistFault::InvalidOpcode {
        rip: env.ctx.reg(ArchReg::Selfrip),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fpmath::SoftX87;

    struct NoMemory;

    impl GuestMemory for NoMemory {
        fn copy_from_user(&mut self, _dst: &mut [u8], addr: u64) -> Transfer {
            Transfer {
                bytes: 0,
                fault: Some(PageFault { pfec: 4, addr }),
            }
        }

        fn copy_to_user(&mut self, addr: u64, _src: &[u8]) -> Transfer {
            Transfer {
                bytes: 0,
                fault: Some(PageFault { pfec: 6, addr }),
            }
        }
    }

    #[test]
    fn default_table_covers_every_assist() {
        let table = AssistTable::default();
        for id in AssistId::ALL {
            assert!(table.is_registered(id), "{id}");
        }
    }

    #[test]
    fn invalid_opcode_keeps_rip_on_the_instruction() {
        let mut ctx = Context::default();
        ctx.set_reg(ArchReg::Selfrip, 0x1000);
        ctx.set_reg(ArchReg::Nextrip, 0x1002);
        let mut mem = NoMemory;
        let mut env = AssistEnv {
            ctx: &mut ctx,
            mem: &mut mem,
            math: &SoftX87,
        };
        let fault = AssistTable::default().dispatch(AssistId::InvalidOpcode, &mut env);
        assert_eq!(fault, Err(AssistFault::InvalidOpcode { rip: 0x1000 }));
        assert_eq!(ctx.reg(ArchReg::Rip), 0x1000);
        assert_eq!(ctx.exception, Some(AssistFault::InvalidOpcode { rip: 0x1000 }));
    }

    #[test]
    fn unregistered_assist_faults() {
        let mut ctx = Context::default();
        let mut mem = NoMemory;
        let mut env = AssistEnv {
            ctx: &mut ctx,
            mem: &mut mem,
            math: &SoftX87,
        };
        let result = AssistTable::empty().dispatch(AssistId::X87Fsin, &mut env);
        assert_eq!(result, Err(AssistFault::Unregistered(AssistId::X87Fsin)));
    }

    #[test]
    fn stack_push_and_pop_follow_fptos() {
        let mut ctx = Context::default();
        ctx.fp_push(1.0);
        ctx.fp_push(2.0);
        assert_eq!(ctx.reg(ArchReg::Fptos), 48);
        assert_eq!((ctx.st(0), ctx.st(1)), (2.0, 1.0));
        assert!(ctx.st_valid(1) && !ctx.st_valid(2));
        assert_eq!(ctx.fp_pop(), 2.0);
        assert!(!ctx.st_valid(7));
        assert_eq!(ctx.reg(ArchReg::Fptos), 56);
    }
}
