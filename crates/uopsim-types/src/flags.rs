use bitflags::bitflags;

bitflags! {
    /// Flag rename groups a micro-op may define.
    ///
    /// The simulated core tracks the x86 flags in three independently renamed
    /// registers: `zf` carries the ZF/AF/PF/SF group ("ZAPS"), `cf` carries CF
    /// and `of` carries OF.
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
    pub struct FlagSet: u8 {
        const ZAPS = 1 << 0;
        const CF = 1 << 1;
        const OF = 1 << 2;

        const ALU = Self::ZAPS.bits() | Self::CF.bits() | Self::OF.bits();
    }
}

bitflags! {
    /// x86 RFLAGS bit positions, as they appear in a collected flag bundle.
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
    pub struct Eflags: u64 {
        const CF = 1 << 0;
        const PF = 1 << 2;
        const AF = 1 << 4;
        const ZF = 1 << 6;
        const SF = 1 << 7;
        const DF = 1 << 10;
        const OF = 1 << 11;
    }
}

impl FlagSet {
    /// Architectural flag bits owned by these rename groups.
    #[must_use]
    pub fn eflags(self) -> Eflags {
        let mut out = Eflags::empty();
        if self.contains(FlagSet::ZAPS) {
            out |= Eflags::ZF | Eflags::AF | Eflags::PF | Eflags::SF;
        }
        if self.contains(FlagSet::CF) {
            out |= Eflags::CF;
        }
        if self.contains(FlagSet::OF) {
            out |= Eflags::OF;
        }
        out
    }
}
