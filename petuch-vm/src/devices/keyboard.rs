//! PS/2-style keyboard exposed on a single port.
//!
//! Reads pop the oldest buffered scancode (0 when empty). Writing a non-zero
//! byte switches the keyboard into IRQ mode, in which every accepted key
//! raises [`KEYBOARD_IRQ`].

use super::{PortContext, PortDevice};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

pub const KEYBOARD_PORT: u8 = 0x01;
pub const KEYBOARD_IRQ: u8 = 0x02;

/// Depth of the internal scancode buffer.
pub const KEYBOARD_BUFFER_LEN: usize = 16;

#[derive(Default)]
struct KeyboardState {
    buffer: VecDeque<u8>,
    use_irq: bool,
}

/// Host-side handle used by the frontend to feed scancodes in.
#[derive(Clone, Default)]
pub struct KeyboardHandle {
    state: Arc<Mutex<KeyboardState>>,
}

impl KeyboardHandle {
    fn lock(&self) -> MutexGuard<'_, KeyboardState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Queue a scancode. Returns `true` when the guest asked for an IRQ on
    /// every key event. A full buffer drops the scancode but the event still
    /// counts.
    pub fn push_scancode(&self, scancode: u8) -> bool {
        let mut state = self.lock();
        if state.buffer.len() >= KEYBOARD_BUFFER_LEN {
            log::warn!(
                "[Keyboard] Buffer overflow, ignoring scancode {:#04x}",
                scancode
            );
        } else {
            log::trace!("[Keyboard] Scancode {:#04x}", scancode);
            state.buffer.push_back(scancode);
        }
        state.use_irq
    }

    pub fn pending(&self) -> usize {
        self.lock().buffer.len()
    }

    pub fn irq_enabled(&self) -> bool {
        self.lock().use_irq
    }

    pub fn clear(&self) {
        let mut state = self.lock();
        state.buffer.clear();
        state.use_irq = false;
    }
}

/// The port-side half of the keyboard.
pub struct Keyboard {
    handle: KeyboardHandle,
}

impl Keyboard {
    pub fn new() -> Self {
        Self {
            handle: KeyboardHandle::default(),
        }
    }

    pub fn handle(&self) -> KeyboardHandle {
        self.handle.clone()
    }
}

impl Default for Keyboard {
    fn default() -> Self {
        Self::new()
    }
}

impl PortDevice for Keyboard {
    fn read(&mut self, _ctx: &mut PortContext<'_>) -> u8 {
        self.handle.lock().buffer.pop_front().unwrap_or(0)
    }

    fn write(&mut self, _ctx: &mut PortContext<'_>, value: u8) {
        let enabled = value != 0;
        log::debug!("[Keyboard] IRQ mode {}", if enabled { "on" } else { "off" });
        self.handle.lock().use_irq = enabled;
    }

    fn name(&self) -> &'static str {
        "keyboard"
    }
}
