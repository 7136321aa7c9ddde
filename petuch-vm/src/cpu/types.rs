use serde::{Deserialize, Serialize};

/// Interrupt vector the MMU uses for a missing translation.
pub const PAGE_FAULT_VECTOR: u8 = 0x01;

/// Architectural fault raised partway through an instruction.
///
/// Traps unwind out of the executing instruction through `?` and are
/// delivered by `Cpu::step`; they never reach the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trap {
    /// No present mapping for the virtual address.
    PageFault(u32),
}

impl Trap {
    pub fn vector(self) -> u8 {
        match self {
            Trap::PageFault(_) => PAGE_FAULT_VECTOR,
        }
    }
}

impl std::fmt::Display for Trap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Trap::PageFault(va) => write!(f, "page fault at {:#010x}", va),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Flags {
    pub zero: bool,
    /// Kept for frame compatibility; no instruction computes it.
    pub carry: bool,
    pub interrupt_enabled: bool,
    pub negative: bool,
}

impl Flags {
    const CARRY: u32 = 1 << 0;
    const INTERRUPT: u32 = 1 << 1;
    const NEGATIVE: u32 = 1 << 2;
    const ZERO: u32 = 1 << 3;

    /// Flag word as saved in an interrupt frame.
    pub fn pack(self) -> u32 {
        let mut bits = 0;
        if self.carry {
            bits |= Self::CARRY;
        }
        if self.interrupt_enabled {
            bits |= Self::INTERRUPT;
        }
        if self.negative {
            bits |= Self::NEGATIVE;
        }
        if self.zero {
            bits |= Self::ZERO;
        }
        bits
    }

    pub fn unpack(bits: u32) -> Self {
        Self {
            carry: bits & Self::CARRY != 0,
            interrupt_enabled: bits & Self::INTERRUPT != 0,
            negative: bits & Self::NEGATIVE != 0,
            zero: bits & Self::ZERO != 0,
        }
    }
}
