//! Vectored interrupt entry and return.
//!
//! Entry pushes, one 4-byte slot each: the return `ip`, r0..r15, `it`, the
//! packed flag word and finally the vector. The handler address is read from
//! `it + vector * 4` on the physical bus. `iret` pops the same frame in
//! reverse.

use super::core::{Cpu, REG_COUNT};
use super::types::{Flags, Trap};
use crate::bus::Bus;

/// Bytes of stack consumed by one interrupt frame.
pub const INTERRUPT_FRAME_SIZE: u32 = (1 + REG_COUNT as u32 + 3) * super::core::STACK_SLOT;

impl Cpu {
    /// Deliver `vector`. Returns `false` when the interrupt was masked or
    /// could not be delivered; in both cases the CPU is left unchanged.
    pub fn raise(&mut self, bus: &mut dyn Bus, vector: u8) -> bool {
        if !self.flags.interrupt_enabled {
            log::debug!("[IRQ] Vector {:#04x} masked", vector);
            return false;
        }

        let (saved_sp, saved_ip) = (self.sp, self.ip);
        if let Err(trap) = self.push_frame(bus, vector) {
            log::error!(
                "[IRQ] Double fault delivering vector {:#04x} at ip={:#010x}: {}",
                vector,
                saved_ip,
                trap
            );
            self.sp = saved_sp;
            self.ip = saved_ip;
            return false;
        }

        let slot = self.it.wrapping_add(vector as u32 * 4);
        let handler = bus.read32(slot);
        if handler == 0 {
            log::warn!(
                "[IRQ] Unhandled interrupt {:#04x} (table slot {:#010x} is empty)",
                vector,
                slot
            );
        }
        log::trace!("[IRQ] Vector {:#04x} -> {:#010x}", vector, handler);
        self.ip = handler;
        true
    }

    fn push_frame(&mut self, bus: &mut dyn Bus, vector: u8) -> Result<(), Trap> {
        self.push(bus, self.ip)?;
        for i in 0..REG_COUNT {
            self.push(bus, self.regs[i])?;
        }
        self.push(bus, self.it)?;
        self.push(bus, self.flags.pack())?;
        self.push(bus, vector as u32)
    }

    /// Unwind an interrupt frame. The restored `ip` is advanced by 2 past
    /// the saved return address.
    pub fn iret(&mut self, bus: &mut dyn Bus) -> Result<(), Trap> {
        let _vector = self.pop(bus)?;
        self.flags = Flags::unpack(self.pop(bus)?);
        self.it = self.pop(bus)?;
        for i in (0..REG_COUNT).rev() {
            self.regs[i] = self.pop(bus)?;
        }
        self.ip = self.pop(bus)?.wrapping_add(2);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::SystemBus;
    use crate::cpu::STACK_BASE;
    use crate::mmu::MSR_PAGING;

    fn make_machine() -> (Cpu, SystemBus) {
        (Cpu::new(), SystemBus::new())
    }

    #[test]
    fn test_frame_layout() {
        let (mut cpu, mut bus) = make_machine();
        for (i, r) in cpu.regs.iter_mut().enumerate() {
            *r = 0x100 + i as u32;
        }
        cpu.ip = 0xF000_0010;
        cpu.flags.zero = true;
        bus.write32(7 * 4, 0x0000_4000);

        assert!(cpu.raise(&mut bus, 7));
        assert_eq!(cpu.ip, 0x4000);
        assert_eq!(cpu.sp, STACK_BASE - INTERRUPT_FRAME_SIZE);

        // Top of stack is the vector, then flags, it, r15 .. r0, ip.
        assert_eq!(bus.read32(cpu.sp), 7);
        assert_eq!(bus.read32(cpu.sp + 4), 0b1010);
        assert_eq!(bus.read32(cpu.sp + 8), 0);
        assert_eq!(bus.read32(cpu.sp + 12), 0x10F);
        assert_eq!(bus.read32(cpu.sp + 12 + 15 * 4), 0x100);
        assert_eq!(bus.read32(STACK_BASE - 4), 0xF000_0010);
    }

    #[test]
    fn test_masked_interrupt_is_dropped() {
        let (mut cpu, mut bus) = make_machine();
        cpu.flags.interrupt_enabled = false;
        let before = cpu.clone();
        assert!(!cpu.raise(&mut bus, 3));
        assert_eq!(cpu, before);
    }

    #[test]
    fn test_unhandled_interrupt_jumps_to_zero() {
        let (mut cpu, mut bus) = make_machine();
        assert!(cpu.raise(&mut bus, 9));
        assert_eq!(cpu.ip, 0);
    }

    #[test]
    fn test_iret_inverts_raise() {
        let (mut cpu, mut bus) = make_machine();
        cpu.regs = [0xDEAD_0000; REG_COUNT];
        cpu.regs[5] = 5;
        cpu.it = 0x0000_0800;
        cpu.flags.negative = true;
        cpu.flags.carry = true;
        cpu.ip = 0xF000_0100;
        let before = cpu.clone();

        assert!(cpu.raise(&mut bus, 1));
        cpu.regs = [0; REG_COUNT];
        cpu.flags = Flags::default();
        cpu.it = 0;
        cpu.iret(&mut bus).unwrap();

        assert_eq!(cpu.regs, before.regs);
        assert_eq!(cpu.flags, before.flags);
        assert_eq!(cpu.it, before.it);
        assert_eq!(cpu.sp, before.sp);
        assert_eq!(cpu.ip, before.ip + 2);
    }

    #[test]
    fn test_double_fault_abandons_delivery() {
        let (mut cpu, mut bus) = make_machine();
        // Paging on with an empty directory: the first push faults.
        cpu.msr = MSR_PAGING;
        cpu.pd = 0x1000;
        cpu.ip = 0x1234;
        let before = cpu.clone();
        assert!(!cpu.raise(&mut bus, 1));
        assert_eq!(cpu, before);
    }
}
