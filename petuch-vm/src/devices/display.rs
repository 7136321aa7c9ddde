//! Linear framebuffer and the display command port.
//!
//! The framebuffer is 640x480 pixels, 4 bytes per pixel, laid out as
//! little-endian `0x00RRGGBB` words (blue byte first).

use super::{PortContext, PortDevice};

pub const DISPLAY_WIDTH: usize = 640;
pub const DISPLAY_HEIGHT: usize = 480;

pub const FRAMEBUFFER_BASE: u32 = 0xA000_0000;
pub const FRAMEBUFFER_LEN: usize = DISPLAY_WIDTH * DISPLAY_HEIGHT * 4;

pub const DISPLAY_PORT: u8 = 0x02;

/// Command: fill the framebuffer with zeroes.
pub const DISPLAY_CMD_CLEAR: u8 = 0x01;

const DISPLAY_STATUS_PRESENT: u8 = 0x01;

/// Display command port.
pub struct DisplayPort;

impl PortDevice for DisplayPort {
    fn read(&mut self, _ctx: &mut PortContext<'_>) -> u8 {
        DISPLAY_STATUS_PRESENT
    }

    fn write(&mut self, ctx: &mut PortContext<'_>, value: u8) {
        match value {
            DISPLAY_CMD_CLEAR => ctx.framebuffer.fill(0),
            other => log::warn!("[Display] Unknown command {:#04x}", other),
        }
    }

    fn name(&self) -> &'static str {
        "display"
    }
}

/// Convert raw framebuffer bytes into `0x00RRGGBB` pixels for a host window.
pub fn to_pixels(framebuffer: &[u8], out: &mut Vec<u32>) {
    out.clear();
    out.extend(
        framebuffer
            .chunks_exact(4)
            .map(|px| u32::from_le_bytes([px[0], px[1], px[2], 0])),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    #[test]
    fn test_clear_command() {
        let mut fb = vec![0xAAu8; 16];
        let mut irqs = VecDeque::new();
        let mut ctx = PortContext::new(DISPLAY_PORT, &mut fb, &mut irqs);
        let mut port = DisplayPort;

        assert_eq!(port.read(&mut ctx), DISPLAY_STATUS_PRESENT);
        port.write(&mut ctx, 0x7E);
        assert!(ctx.framebuffer.iter().all(|&b| b == 0xAA));
        port.write(&mut ctx, DISPLAY_CMD_CLEAR);
        assert!(fb.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_pixel_conversion() {
        let fb = [0x11, 0x22, 0x33, 0xFF, 0x00, 0x00, 0xFF, 0x00];
        let mut px = Vec::new();
        to_pixels(&fb, &mut px);
        assert_eq!(px, vec![0x0033_2211, 0x00FF_0000]);
    }
}
