use core::fmt;

/// Canonical architectural register numbering used by micro-op operands.
///
/// Besides the sixteen GPRs this includes the registers only micro-code can
/// see: the separately renamed flag registers, x87 stack bookkeeping, assist
/// arguments, decoder temporaries and the three operand markers `Mem`, `Imm`
/// and `Zero`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum ArchReg {
    Rax,
    Rcx,
    Rdx,
    Rbx,
    Rsp,
    Rbp,
    Rsi,
    Rdi,
    R8,
    R9,
    R10,
    R11,
    R12,
    R13,
    R14,
    R15,
    Rip,
    /// Simulator-internal flags word; bit 63 holds the direction flag.
    Iflags,
    Selfrip,
    Nextrip,
    Ar1,
    Ar2,
    /// x87 top of stack as a byte offset into the 8-slot stack (0..=56).
    Fptos,
    Fpsw,
    Fptags,
    Esbase,
    Csbase,
    Ssbase,
    Dsbase,
    Fsbase,
    Gsbase,
    Zf,
    Cf,
    Of,
    Temp0,
    Temp1,
    Temp2,
    Temp3,
    Temp4,
    Temp5,
    Temp6,
    Temp7,
    Temp8,
    Mem,
    Imm,
    Zero,
}

const GPRS: [ArchReg; 16] = [
    ArchReg::Rax,
    ArchReg::Rcx,
    ArchReg::Rdx,
    ArchReg::Rbx,
    ArchReg::Rsp,
    ArchReg::Rbp,
    ArchReg::Rsi,
    ArchReg::Rdi,
    ArchReg::R8,
    ArchReg::R9,
    ArchReg::R10,
    ArchReg::R11,
    ArchReg::R12,
    ArchReg::R13,
    ArchReg::R14,
    ArchReg::R15,
];

impl ArchReg {
    pub const COUNT: usize = ArchReg::Zero as usize + 1;

    /// GPR for a 4-bit register encoding (REX extension already applied).
    #[must_use]
    pub const fn gpr(code: u8) -> ArchReg {
        GPRS[(code & 0xf) as usize]
    }

    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }

    #[must_use]
    pub const fn is_gpr(self) -> bool {
        (self as u8) < 16
    }

    #[must_use]
    pub const fn is_temp(self) -> bool {
        (self as u8) >= ArchReg::Temp0 as u8 && (self as u8) <= ArchReg::Temp8 as u8
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            ArchReg::Rax => "rax",
            ArchReg::Rcx => "rcx",
            ArchReg::Rdx => "rdx",
            ArchReg::Rbx => "rbx",
            ArchReg::Rsp => "rsp",
            ArchReg::Rbp => "rbp",
            ArchReg::Rsi => "rsi",
            ArchReg::Rdi => "rdi",
            ArchReg::R8 => "r8",
            ArchReg::R9 => "r9",
            ArchReg::R10 => "r10",
            ArchReg::R11 => "r11",
            ArchReg::R12 => "r12",
            ArchReg::R13 => "r13",
            ArchReg::R14 => "r14",
            ArchReg::R15 => "r15",
            ArchReg::Rip => "rip",
            ArchReg::Iflags => "iflags",
            ArchReg::Selfrip => "selfrip",
            ArchReg::Nextrip => "nextrip",
            ArchReg::Ar1 => "ar1",
            ArchReg::Ar2 => "ar2",
            ArchReg::Fptos => "fptos",
            ArchReg::Fpsw => "fpsw",
            ArchReg::Fptags => "fptags",
            ArchReg::Esbase => "es",
            ArchReg::Csbase => "cs",
            ArchReg::Ssbase => "ss",
            ArchReg::Dsbase => "ds",
            ArchReg::Fsbase => "fs",
            ArchReg::Gsbase => "gs",
            ArchReg::Zf => "zf",
            ArchReg::Cf => "cf",
            ArchReg::Of => "of",
            ArchReg::Temp0 => "t0",
            ArchReg::Temp1 => "t1",
            ArchReg::Temp2 => "t2",
            ArchReg::Temp3 => "t3",
            ArchReg::Temp4 => "t4",
            ArchReg::Temp5 => "t5",
            ArchReg::Temp6 => "t6",
            ArchReg::Temp7 => "t7",
            ArchReg::Temp8 => "t8",
            ArchReg::Mem => "mem",
            ArchReg::Imm => "imm",
            ArchReg::Zero => "zero",
        }
    }
}

impl fmt::Display for ArchReg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
