use super::{PortContext, PortDevice};
use std::io::{self, Write};

/// Port reserved by the bus for guest debug output.
pub const DEBUG_PORT: u8 = 0x00;

/// Echoes every written byte verbatim to a diagnostic sink (stderr by default).
pub struct DebugPort {
    sink: Box<dyn Write + Send>,
}

impl DebugPort {
    pub fn new() -> Self {
        Self::with_sink(Box::new(io::stderr()))
    }

    pub fn with_sink(sink: Box<dyn Write + Send>) -> Self {
        Self { sink }
    }
}

impl Default for DebugPort {
    fn default() -> Self {
        Self::new()
    }
}

impl PortDevice for DebugPort {
    fn read(&mut self, _ctx: &mut PortContext<'_>) -> u8 {
        0
    }

    fn write(&mut self, _ctx: &mut PortContext<'_>, value: u8) {
        if let Err(e) = self.sink.write_all(&[value]).and_then(|_| self.sink.flush()) {
            log::warn!("[Bus] Debug port output failed: {}", e);
        }
    }

    fn name(&self) -> &'static str {
        "debug"
    }
}
