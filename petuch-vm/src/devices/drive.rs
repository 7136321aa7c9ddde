//! Minimal block drive controller.
//!
//! Four consecutive ports: status, command, LBA and data. The guest shifts a
//! 16-bit LBA in one byte at a time, issues a command, and then streams the
//! 512-byte sector buffer through the data port.

use super::{PortContext, PortDevice};
use std::sync::{Arc, Mutex, MutexGuard};

pub const DRIVE_PORT_BASE: u8 = 0x03;
pub const DRIVE_PORT_STATUS: u8 = DRIVE_PORT_BASE;
pub const DRIVE_PORT_COMMAND: u8 = DRIVE_PORT_BASE + 1;
pub const DRIVE_PORT_LBA: u8 = DRIVE_PORT_BASE + 2;
pub const DRIVE_PORT_DATA: u8 = DRIVE_PORT_BASE + 3;

pub const DRIVE_STATUS_READY: u8 = 0b0000_0001;
pub const DRIVE_STATUS_ERR: u8 = 0b0000_0010;

pub const DRIVE_CMD_READ: u8 = 0x00;
pub const DRIVE_CMD_WRITE: u8 = 0x01;
pub const DRIVE_CMD_SEEK: u8 = 0x02;

pub const BLOCK_SIZE: usize = 512;

struct DriveState {
    image: Option<Vec<u8>>,
    lba: u16,
    buffer: [u8; BLOCK_SIZE],
    cursor: usize,
    error: bool,
}

impl DriveState {
    fn sector_range(&self) -> Option<std::ops::Range<usize>> {
        let start = self.lba as usize * BLOCK_SIZE;
        let len = self.image.as_ref()?.len();
        (start + BLOCK_SIZE <= len).then(|| start..start + BLOCK_SIZE)
    }

    fn command(&mut self, cmd: u8) {
        self.cursor = 0;
        self.error = false;
        match cmd {
            DRIVE_CMD_READ => {
                let Some(range) = self.sector_range() else {
                    return self.fail(cmd);
                };
                if let Some(image) = &self.image {
                    self.buffer.copy_from_slice(&image[range]);
                }
            }
            DRIVE_CMD_WRITE => {
                let Some(range) = self.sector_range() else {
                    return self.fail(cmd);
                };
                if let Some(image) = self.image.as_mut() {
                    image[range].copy_from_slice(&self.buffer);
                }
            }
            DRIVE_CMD_SEEK => {}
            other => {
                log::warn!("[Drive] Unknown command {:#04x}", other);
                self.error = true;
            }
        }
    }

    fn fail(&mut self, cmd: u8) {
        log::warn!(
            "[Drive] Command {:#04x} failed at LBA {} (image attached: {})",
            cmd,
            self.lba,
            self.image.is_some()
        );
        self.error = true;
    }
}

/// Shared drive controller; hands out one [`DrivePort`] per register.
#[derive(Clone)]
pub struct Drive {
    state: Arc<Mutex<DriveState>>,
}

impl Drive {
    pub fn new(image: Option<Vec<u8>>) -> Self {
        if let Some(img) = &image {
            if img.len() % BLOCK_SIZE != 0 {
                log::warn!(
                    "[Drive] Image size {} is not a multiple of {}; trailing bytes unreachable",
                    img.len(),
                    BLOCK_SIZE
                );
            }
        }
        Self {
            state: Arc::new(Mutex::new(DriveState {
                image,
                lba: 0,
                buffer: [0; BLOCK_SIZE],
                cursor: 0,
                error: false,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, DriveState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Port devices for status, command, LBA and data, in port order.
    pub fn ports(&self) -> [(u8, DrivePort); 4] {
        [
            (DRIVE_PORT_STATUS, DriveRegister::Status),
            (DRIVE_PORT_COMMAND, DriveRegister::Command),
            (DRIVE_PORT_LBA, DriveRegister::Lba),
            (DRIVE_PORT_DATA, DriveRegister::Data),
        ]
        .map(|(port, reg)| {
            (
                port,
                DrivePort {
                    reg,
                    drive: self.clone(),
                },
            )
        })
    }

    /// Clear the controller registers and sector buffer. The image stays.
    pub fn reset(&self) {
        let mut state = self.lock();
        state.lba = 0;
        state.buffer = [0; BLOCK_SIZE];
        state.cursor = 0;
        state.error = false;
    }

    pub fn lba(&self) -> u16 {
        self.lock().lba
    }

    /// Copy of the current image contents, if one is attached.
    pub fn image(&self) -> Option<Vec<u8>> {
        self.lock().image.clone()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DriveRegister {
    Status,
    Command,
    Lba,
    Data,
}

pub struct DrivePort {
    reg: DriveRegister,
    drive: Drive,
}

impl PortDevice for DrivePort {
    fn read(&mut self, _ctx: &mut PortContext<'_>) -> u8 {
        let mut state = self.drive.lock();
        match self.reg {
            DriveRegister::Status => {
                let mut status = 0;
                if state.image.is_some() {
                    status |= DRIVE_STATUS_READY;
                }
                if state.error {
                    status |= DRIVE_STATUS_ERR;
                }
                status
            }
            DriveRegister::Lba => state.lba as u8,
            DriveRegister::Data => {
                let value = state.buffer[state.cursor];
                state.cursor = (state.cursor + 1) % BLOCK_SIZE;
                value
            }
            DriveRegister::Command => 0,
        }
    }

    fn write(&mut self, _ctx: &mut PortContext<'_>, value: u8) {
        let mut state = self.drive.lock();
        match self.reg {
            DriveRegister::Command => state.command(value),
            DriveRegister::Lba => state.lba = (state.lba << 8) | value as u16,
            DriveRegister::Data => {
                let cursor = state.cursor;
                state.buffer[cursor] = value;
                state.cursor = (cursor + 1) % BLOCK_SIZE;
            }
            DriveRegister::Status => {}
        }
    }

    fn name(&self) -> &'static str {
        match self.reg {
            DriveRegister::Status => "drive-status",
            DriveRegister::Command => "drive-command",
            DriveRegister::Lba => "drive-lba",
            DriveRegister::Data => "drive-data",
        }
    }
}
