use crate::devices::debug::{DEBUG_PORT, DebugPort};
use crate::devices::display::{FRAMEBUFFER_BASE, FRAMEBUFFER_LEN};
use crate::devices::{PORT_COUNT, PortContext, PortDevice, PortTable};
use crate::dram::{Dram, MemoryError};
use std::collections::VecDeque;

/// RAM is based at physical 0.
pub const RAM_BASE: u32 = 0x0000_0000;
pub const RAM_SIZE: usize = 0x0400_0000; // 64 MiB

/// ROM image base; execution starts here after reset.
pub const ROM_BASE: u32 = 0xF000_0000;
pub const ROM_SIZE: usize = 0x0100_0000; // 16 MiB

/// Memory-mapped device-port window, one byte per port.
pub const MMIO_BASE: u32 = 0x8000_0000;
pub const MMIO_SIZE: u32 = PORT_COUNT as u32;

/// Physical address bus.
///
/// Multi-byte accesses are little-endian and always composed from
/// individual byte accesses, so every byte is routed and bounds-checked on
/// its own. Accesses never fail from the caller's point of view: invalid
/// addresses read as 0 and swallow writes.
pub trait Bus {
    fn read8(&mut self, addr: u32) -> u8;
    fn write8(&mut self, addr: u32, val: u8);

    /// Next device interrupt waiting for delivery, if any.
    fn take_irq(&mut self) -> Option<u8> {
        None
    }

    fn read16(&mut self, addr: u32) -> u16 {
        self.load(addr, 2) as u16
    }

    fn read32(&mut self, addr: u32) -> u32 {
        self.load(addr, 4)
    }

    fn write16(&mut self, addr: u32, val: u16) {
        self.store(addr, 2, val as u32)
    }

    fn write32(&mut self, addr: u32, val: u32) {
        self.store(addr, 4, val)
    }

    /// Generic `len`-byte load (1, 2 or 4), least-significant byte first.
    fn load(&mut self, addr: u32, len: usize) -> u32 {
        debug_assert!(matches!(len, 1 | 2 | 4), "unsupported bus load size {len}");
        (0..len.min(4)).fold(0u32, |acc, i| {
            acc | (self.read8(addr.wrapping_add(i as u32)) as u32) << (8 * i)
        })
    }

    /// Generic `len`-byte store (1, 2 or 4), least-significant byte first.
    fn store(&mut self, addr: u32, len: usize, value: u32) {
        debug_assert!(matches!(len, 1 | 2 | 4), "unsupported bus store size {len}");
        for i in 0..len.min(4) {
            self.write8(addr.wrapping_add(i as u32), (value >> (8 * i)) as u8);
        }
    }
}

/// The board: RAM, ROM, the framebuffer and the 256 device ports.
pub struct SystemBus {
    pub ram: Dram,
    pub rom: Dram,
    pub framebuffer: Vec<u8>,
    pub ports: PortTable,
    pending_irqs: VecDeque<u8>,
}

impl SystemBus {
    /// Build a board with zeroed memories, every port unbound except the
    /// debug console on port 0.
    pub fn new() -> Self {
        let mut ports = PortTable::new();
        ports.bind(DEBUG_PORT, Box::new(DebugPort::new()));
        Self {
            ram: Dram::new(RAM_BASE, RAM_SIZE),
            rom: Dram::new_read_only(ROM_BASE, ROM_SIZE),
            framebuffer: vec![0; FRAMEBUFFER_LEN],
            ports,
            pending_irqs: VecDeque::new(),
        }
    }

    /// Zero RAM, ROM and the framebuffer and drop queued interrupts.
    /// Port bindings survive.
    pub fn reset(&mut self) {
        self.ram.clear();
        self.rom.clear();
        self.framebuffer.fill(0);
        self.pending_irqs.clear();
    }

    /// Register a device on a port.
    pub fn bind_port(&mut self, port: u8, device: Box<dyn PortDevice>) {
        self.ports.bind(port, device);
    }

    /// Queue an interrupt to be delivered before the next instruction.
    pub fn request_irq(&mut self, vector: u8) {
        self.pending_irqs.push_back(vector);
    }

    fn framebuffer_offset(addr: u32) -> Option<usize> {
        let off = addr.wrapping_sub(FRAMEBUFFER_BASE) as usize;
        (addr >= FRAMEBUFFER_BASE && off < FRAMEBUFFER_LEN).then_some(off)
    }

    fn mmio_port(addr: u32) -> Option<u8> {
        (addr >= MMIO_BASE && addr - MMIO_BASE < MMIO_SIZE).then_some(addr as u8)
    }

    fn try_read8(&mut self, addr: u32) -> Result<u8, MemoryError> {
        if let Some(off) = self.ram.offset(addr) {
            return self.ram.load_8(off);
        }
        if let Some(off) = self.rom.offset(addr) {
            return self.rom.load_8(off);
        }
        if let Some(off) = Self::framebuffer_offset(addr) {
            return Ok(self.framebuffer[off]);
        }
        if let Some(port) = Self::mmio_port(addr) {
            let mut ctx = PortContext::new(port, &mut self.framebuffer, &mut self.pending_irqs);
            return Ok(self.ports.read(&mut ctx));
        }
        Err(MemoryError::OutOfBounds(addr))
    }

    fn try_write8(&mut self, addr: u32, val: u8) -> Result<(), MemoryError> {
        if let Some(off) = self.ram.offset(addr) {
            return self.ram.store_8(off, val);
        }
        if let Some(off) = self.rom.offset(addr) {
            return self.rom.store_8(off, val);
        }
        if let Some(off) = Self::framebuffer_offset(addr) {
            self.framebuffer[off] = val;
            return Ok(());
        }
        if let Some(port) = Self::mmio_port(addr) {
            let mut ctx = PortContext::new(port, &mut self.framebuffer, &mut self.pending_irqs);
            self.ports.write(&mut ctx, val);
            return Ok(());
        }
        Err(MemoryError::OutOfBounds(addr))
    }
}

impl Default for SystemBus {
    fn default() -> Self {
        Self::new()
    }
}

impl Bus for SystemBus {
    fn read8(&mut self, addr: u32) -> u8 {
        self.try_read8(addr).unwrap_or_else(|e| {
            log::warn!("[Bus] Invalid read: {}", e);
            0
        })
    }

    fn write8(&mut self, addr: u32, val: u8) {
        if let Err(e) = self.try_write8(addr, val) {
            log::warn!("[Bus] Invalid write of {:#04x}: {}", val, e);
        }
    }

    fn take_irq(&mut self) -> Option<u8> {
        self.pending_irqs.pop_front()
    }
}
