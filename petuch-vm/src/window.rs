//! Desktop window frontend.

use crate::devices::display::{self, DISPLAY_HEIGHT, DISPLAY_WIDTH};
use crate::emulator::Frontend;
use minifb::{Key, KeyRepeat, Window, WindowOptions};

/// PS/2 set-1 make code for a host key.
pub fn scancode(key: Key) -> Option<u8> {
    Some(match key {
        Key::Key0 => 0x0B,
        Key::Key1 => 0x02,
        Key::Key2 => 0x03,
        Key::Key3 => 0x04,
        Key::Key4 => 0x05,
        Key::Key5 => 0x06,
        Key::Key6 => 0x07,
        Key::Key7 => 0x08,
        Key::Key8 => 0x09,
        Key::Key9 => 0x0A,

        Key::A => 0x1E,
        Key::B => 0x30,
        Key::C => 0x2E,
        Key::D => 0x20,
        Key::E => 0x12,
        Key::F => 0x21,
        Key::G => 0x22,
        Key::H => 0x23,
        Key::I => 0x17,
        Key::J => 0x24,
        Key::K => 0x25,
        Key::L => 0x26,
        Key::M => 0x32,
        Key::N => 0x31,
        Key::O => 0x18,
        Key::P => 0x19,
        Key::Q => 0x10,
        Key::R => 0x13,
        Key::S => 0x1F,
        Key::T => 0x14,
        Key::U => 0x16,
        Key::V => 0x2F,
        Key::W => 0x11,
        Key::X => 0x2D,
        Key::Y => 0x15,
        Key::Z => 0x2C,

        Key::Enter => 0x1C,
        Key::Escape => 0x01,
        Key::Backspace => 0x0E,
        Key::Tab => 0x0F,
        Key::Space => 0x39,
        Key::CapsLock => 0x3A,
        Key::ScrollLock => 0x46,

        _ => return None,
    })
}

pub struct WindowFrontend {
    window: Window,
    pixels: Vec<u32>,
}

impl WindowFrontend {
    pub fn new(title: &str, frame_rate: u32) -> Result<Self, minifb::Error> {
        let mut window = Window::new(title, DISPLAY_WIDTH, DISPLAY_HEIGHT, WindowOptions::default())?;
        window.set_target_fps(frame_rate as usize);
        Ok(Self {
            window,
            pixels: Vec::with_capacity(DISPLAY_WIDTH * DISPLAY_HEIGHT),
        })
    }
}

impl Frontend for WindowFrontend {
    fn present(&mut self, framebuffer: &[u8], keys: &mut Vec<u8>) -> bool {
        if !self.window.is_open() {
            return false;
        }
        display::to_pixels(framebuffer, &mut self.pixels);
        if let Err(e) = self
            .window
            .update_with_buffer(&self.pixels, DISPLAY_WIDTH, DISPLAY_HEIGHT)
        {
            log::error!("[Display] Window update failed: {}", e);
            return false;
        }
        for key in self.window.get_keys_pressed(KeyRepeat::Yes) {
            match scancode(key) {
                Some(code) => keys.push(code),
                None => log::debug!("[Keyboard] No scancode for {:?}", key),
            }
        }
        self.window.is_open()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scancode_map() {
        assert_eq!(scancode(Key::A), Some(0x1E));
        assert_eq!(scancode(Key::Key0), Some(0x0B));
        assert_eq!(scancode(Key::Enter), Some(0x1C));
        assert_eq!(scancode(Key::Escape), Some(0x01));
        assert_eq!(scancode(Key::F1), None);
    }
}
