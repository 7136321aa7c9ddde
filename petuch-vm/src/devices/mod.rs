//! Byte-wide device ports reachable through the MMIO window.
//!
//! Every one of the 256 ports holds a [`PortDevice`]. Ports start out bound
//! to [`UnboundPort`], which logs the access and behaves like open bus.

pub mod debug;
pub mod display;
pub mod drive;
pub mod keyboard;

use std::collections::VecDeque;

/// Number of addressable device ports.
pub const PORT_COUNT: usize = 256;

/// Bus-side state a port handler may touch while servicing an access.
pub struct PortContext<'a> {
    /// Port index selected by the low byte of the address.
    pub port: u8,
    /// The display framebuffer region.
    pub framebuffer: &'a mut [u8],
    irqs: &'a mut VecDeque<u8>,
}

impl<'a> PortContext<'a> {
    pub fn new(port: u8, framebuffer: &'a mut [u8], irqs: &'a mut VecDeque<u8>) -> Self {
        Self {
            port,
            framebuffer,
            irqs,
        }
    }

    /// Ask for an interrupt to be raised before the next instruction.
    pub fn request_irq(&mut self, vector: u8) {
        self.irqs.push_back(vector);
    }
}

/// A byte-wide peripheral endpoint.
pub trait PortDevice: Send {
    fn read(&mut self, ctx: &mut PortContext<'_>) -> u8;
    fn write(&mut self, ctx: &mut PortContext<'_>, value: u8);

    /// Short name used in diagnostics.
    fn name(&self) -> &'static str {
        "device"
    }
}

/// Initial binding for every port: reads return 0, writes are ignored.
pub struct UnboundPort;

impl PortDevice for UnboundPort {
    fn read(&mut self, ctx: &mut PortContext<'_>) -> u8 {
        log::debug!("[Bus] Read from unbound port {:#04x}", ctx.port);
        0
    }

    fn write(&mut self, ctx: &mut PortContext<'_>, value: u8) {
        log::debug!(
            "[Bus] Write {:#04x} to unbound port {:#04x}",
            value,
            ctx.port
        );
    }

    fn name(&self) -> &'static str {
        "unbound"
    }
}

/// The 256-entry device-port table.
pub struct PortTable {
    slots: [Box<dyn PortDevice>; PORT_COUNT],
}

impl PortTable {
    pub fn new() -> Self {
        Self {
            slots: std::array::from_fn(|_| Box::new(UnboundPort) as Box<dyn PortDevice>),
        }
    }

    /// Bind a device to a port, returning whatever was bound before.
    pub fn bind(&mut self, port: u8, device: Box<dyn PortDevice>) -> Box<dyn PortDevice> {
        log::debug!("[Bus] Port {:#04x} bound to {}", port, device.name());
        std::mem::replace(&mut self.slots[port as usize], device)
    }

    /// Restore the default binding for a port.
    pub fn unbind(&mut self, port: u8) -> Box<dyn PortDevice> {
        self.bind(port, Box::new(UnboundPort))
    }

    pub fn name(&self, port: u8) -> &'static str {
        self.slots[port as usize].name()
    }

    pub fn read(&mut self, ctx: &mut PortContext<'_>) -> u8 {
        self.slots[ctx.port as usize].read(ctx)
    }

    pub fn write(&mut self, ctx: &mut PortContext<'_>, value: u8) {
        self.slots[ctx.port as usize].write(ctx, value)
    }
}

impl Default for PortTable {
    fn default() -> Self {
        Self::new()
    }
}
