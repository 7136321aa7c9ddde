use super::types::{Flags, Trap};
use crate::bus::{Bus, ROM_BASE};
use crate::decoder::OperandSize;
use crate::mmu;
use serde::{Deserialize, Serialize};

pub const REG_COUNT: usize = 16;

/// Initial stack pointer: one past the top of RAM; the stack grows down.
pub const STACK_BASE: u32 = 0x0400_0000;
pub const INTERRUPT_TABLE_BASE: u32 = 0x0000_0000;

/// Every push and pop moves `sp` by one 4-byte slot.
pub const STACK_SLOT: u32 = 4;

/// Architectural state of the machine's single core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cpu {
    pub regs: [u32; REG_COUNT],
    pub ip: u32,
    pub sp: u32,
    /// Interrupt table base (physical).
    pub it: u32,
    /// Machine status register; bit 0 enables paging.
    pub msr: u32,
    /// Page directory base (physical).
    pub pd: u32,
    pub flags: Flags,
    pub halted: bool,
    /// Set while an instruction whose page fault could not be delivered is
    /// replayed: missing translations then resolve to physical 0.
    #[serde(skip)]
    fault_fallback: bool,
}

impl Cpu {
    /// A CPU in its post-reset state.
    pub fn new() -> Self {
        Self {
            regs: [0; REG_COUNT],
            ip: ROM_BASE,
            sp: STACK_BASE,
            it: INTERRUPT_TABLE_BASE,
            msr: 0,
            pd: 0,
            flags: Flags {
                interrupt_enabled: true,
                ..Flags::default()
            },
            halted: false,
            fault_fallback: false,
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }

    #[inline]
    pub fn paging_enabled(&self) -> bool {
        mmu::paging_enabled(self.msr)
    }

    /// Virtual to physical, honouring the MSR paging bit.
    pub fn translate(&self, bus: &mut dyn Bus, va: u32) -> Result<u32, Trap> {
        if self.paging_enabled() {
            mmu::translate(bus, self.pd, va)
        } else {
            Ok(va)
        }
    }

    /// Physical address of every byte of a `len`-byte access. With paging
    /// on, each byte is translated on its own so an access may straddle
    /// pages. All bytes are translated before any is touched.
    fn translate_span(&self, bus: &mut dyn Bus, va: u32, len: u32) -> Result<[u32; 4], Trap> {
        let mut pa = [0u32; 4];
        for (i, slot) in pa.iter_mut().enumerate().take(len as usize) {
            *slot = match self.translate(bus, va.wrapping_add(i as u32)) {
                Ok(addr) => addr,
                // The access continues from physical 0.
                Err(trap) if self.fault_fallback => {
                    log::debug!("[MMU] {} resolved to physical 0", trap);
                    i as u32
                }
                Err(trap) => return Err(trap),
            };
        }
        Ok(pa)
    }

    /// Run `f` with undeliverable page faults resolving to physical 0.
    pub(super) fn with_fault_fallback<T>(&mut self, f: impl FnOnce(&mut Self) -> T) -> T {
        self.fault_fallback = true;
        let out = f(self);
        self.fault_fallback = false;
        out
    }

    /// Sized CPU-level read through the MMU.
    pub fn read(&self, bus: &mut dyn Bus, va: u32, size: OperandSize) -> Result<u32, Trap> {
        let len = size.bytes();
        if !self.paging_enabled() {
            return Ok(bus.load(va, len as usize));
        }
        let pa = self.translate_span(bus, va, len)?;
        Ok(pa[..len as usize]
            .iter()
            .enumerate()
            .fold(0u32, |acc, (i, &addr)| {
                acc | (bus.read8(addr) as u32) << (8 * i)
            }))
    }

    /// Sized CPU-level write through the MMU. Only the low `size` bytes of
    /// `value` are stored.
    pub fn write(
        &self,
        bus: &mut dyn Bus,
        va: u32,
        size: OperandSize,
        value: u32,
    ) -> Result<(), Trap> {
        let len = size.bytes();
        if !self.paging_enabled() {
            bus.store(va, len as usize, value);
            return Ok(());
        }
        let pa = self.translate_span(bus, va, len)?;
        for (i, &addr) in pa[..len as usize].iter().enumerate() {
            bus.write8(addr, (value >> (8 * i)) as u8);
        }
        Ok(())
    }

    /// Sized immediate that follows the instruction word.
    #[inline]
    pub(super) fn immediate(&self, bus: &mut dyn Bus, size: OperandSize) -> Result<u32, Trap> {
        self.read(bus, self.ip.wrapping_add(2), size)
    }

    /// Push one 4-byte slot. `sp` only moves once the write went through.
    pub fn push(&mut self, bus: &mut dyn Bus, value: u32) -> Result<(), Trap> {
        let sp = self.sp.wrapping_sub(STACK_SLOT);
        self.write(bus, sp, OperandSize::Dword, value)?;
        self.sp = sp;
        Ok(())
    }

    pub fn pop(&mut self, bus: &mut dyn Bus) -> Result<u32, Trap> {
        let value = self.read(bus, self.sp, OperandSize::Dword)?;
        self.sp = self.sp.wrapping_add(STACK_SLOT);
        Ok(value)
    }

    /// Register dump in the layout used by the CLI and trace logs.
    pub fn dump_registers(&self) -> String {
        let mut out = String::new();
        for (i, chunk) in self.regs.chunks(4).enumerate() {
            let line: Vec<String> = chunk
                .iter()
                .enumerate()
                .map(|(j, r)| format!("r{:<2}={:#010x}", i * 4 + j, r))
                .collect();
            out.push_str(&line.join("  "));
            out.push('\n');
        }
        out.push_str(&format!(
            "ip={:#010x}  sp={:#010x}  it={:#010x}  msr={:#010x}  pd={:#010x}\n",
            self.ip, self.sp, self.it, self.msr, self.pd
        ));
        out.push_str(&format!(
            "Z={} N={} C={} IE={} halted={}",
            self.flags.zero as u8,
            self.flags.negative as u8,
            self.flags.carry as u8,
            self.flags.interrupt_enabled as u8,
            self.halted
        ));
        out
    }
}

impl Default for Cpu {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::SystemBus;
    use crate::mmu::{MSR_PAGING, PageTableEntry};

    #[test]
    fn test_reset_state() {
        let mut cpu = Cpu::new();
        cpu.regs[3] = 7;
        cpu.halted = true;
        cpu.flags.zero = true;
        cpu.reset();
        assert_eq!(cpu.regs, [0; REG_COUNT]);
        assert_eq!(cpu.ip, ROM_BASE);
        assert_eq!(cpu.sp, STACK_BASE);
        assert_eq!(cpu.it, 0);
        assert!(cpu.flags.interrupt_enabled);
        assert!(!cpu.flags.zero);
        assert!(!cpu.halted);
    }

    #[test]
    fn test_push_pop_slots() {
        let mut bus = SystemBus::new();
        let mut cpu = Cpu::new();
        cpu.push(&mut bus, 0xAABB_CCDD).unwrap();
        cpu.push(&mut bus, 0x11).unwrap();
        assert_eq!(cpu.sp, STACK_BASE - 8);
        assert_eq!(bus.read32(STACK_BASE - 4), 0xAABB_CCDD);
        assert_eq!(cpu.pop(&mut bus).unwrap(), 0x11);
        assert_eq!(cpu.pop(&mut bus).unwrap(), 0xAABB_CCDD);
        assert_eq!(cpu.sp, STACK_BASE);
    }

    #[test]
    fn test_sized_access_without_paging() {
        let mut bus = SystemBus::new();
        let cpu = Cpu::new();
        cpu.write(&mut bus, 0x200, OperandSize::Dword, 0x1234_5678)
            .unwrap();
        assert_eq!(cpu.read(&mut bus, 0x200, OperandSize::Byte).unwrap(), 0x78);
        assert_eq!(
            cpu.read(&mut bus, 0x200, OperandSize::Word).unwrap(),
            0x5678
        );
        cpu.write(&mut bus, 0x200, OperandSize::Byte, 0xFFFF_FF00)
            .unwrap();
        assert_eq!(bus.read32(0x200), 0x1234_5600);
    }

    #[test]
    fn test_access_straddling_pages() {
        let mut bus = SystemBus::new();
        // VA page 0x0000_0000 -> PA 0x0000_7000, VA page 0x0000_1000 -> PA 0x0000_3000.
        bus.write32(0x1000, 0x2000 | PageTableEntry::PRESENT);
        bus.write32(0x2000, 0x7000 | PageTableEntry::PRESENT);
        bus.write32(0x2004, 0x3000 | PageTableEntry::PRESENT);

        let mut cpu = Cpu::new();
        cpu.pd = 0x1000;
        cpu.msr = MSR_PAGING;
        cpu.write(&mut bus, 0x0FFE, OperandSize::Dword, 0xA1B2_C3D4)
            .unwrap();
        assert_eq!(bus.read16(0x7FFE), 0xC3D4);
        assert_eq!(bus.read16(0x3000), 0xA1B2);
        assert_eq!(
            cpu.read(&mut bus, 0x0FFE, OperandSize::Dword).unwrap(),
            0xA1B2_C3D4
        );
    }

    #[test]
    fn test_faulting_push_keeps_sp() {
        let mut bus = SystemBus::new();
        let mut cpu = Cpu::new();
        cpu.pd = 0x1000;
        cpu.msr = MSR_PAGING;
        let err = cpu.push(&mut bus, 1).unwrap_err();
        assert_eq!(err, Trap::PageFault(STACK_BASE - 4));
        assert_eq!(cpu.sp, STACK_BASE);
    }

    #[test]
    fn test_partial_fault_writes_nothing() {
        let mut bus = SystemBus::new();
        bus.write32(0x1000, 0x2000 | PageTableEntry::PRESENT);
        bus.write32(0x2000, 0x7000 | PageTableEntry::PRESENT);

        let mut cpu = Cpu::new();
        cpu.pd = 0x1000;
        cpu.msr = MSR_PAGING;
        // Second page unmapped: the whole store is rejected.
        let err = cpu
            .write(&mut bus, 0x0FFE, OperandSize::Dword, 0xFFFF_FFFF)
            .unwrap_err();
        assert_eq!(err, Trap::PageFault(0x1000));
        assert_eq!(bus.read16(0x7FFE), 0);
    }

    #[test]
    fn test_dump_registers_mentions_ip() {
        let cpu = Cpu::new();
        let dump = cpu.dump_registers();
        assert!(dump.contains("ip=0xf0000000"));
        assert!(dump.contains("r15=0x00000000"));
    }
}
