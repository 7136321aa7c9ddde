use crate::bus::{SystemBus, RAM_BASE, ROM_BASE};
use crate::cpu::Cpu;
use crate::devices::display::{DISPLAY_PORT, DisplayPort};
use crate::devices::drive::Drive;
use crate::devices::keyboard::{KEYBOARD_IRQ, KEYBOARD_PORT, Keyboard, KeyboardHandle};
use crate::dram::MemoryError;
use crate::mmu::{self, Mapping};
use crate::snapshot::SnapshotError;
use std::fs;
use std::path::Path;

pub const DEFAULT_CLOCK_HZ: u32 = 33_000_000;
pub const DEFAULT_FRAME_RATE: u32 = 60;

/// Timing knobs for the frame driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmulatorConfig {
    pub clock_hz: u32,
    pub frame_rate: u32,
}

impl EmulatorConfig {
    /// Instructions executed between two frontend presents.
    pub fn cycles_per_frame(&self) -> u64 {
        (self.clock_hz / self.frame_rate.max(1)) as u64
    }
}

impl Default for EmulatorConfig {
    fn default() -> Self {
        Self {
            clock_hz: DEFAULT_CLOCK_HZ,
            frame_rate: DEFAULT_FRAME_RATE,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EmulatorError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Memory(#[from] MemoryError),
    #[error("snapshot encoding failed: {0}")]
    Snapshot(#[from] bincode::Error),
    #[error(transparent)]
    Restore(#[from] SnapshotError),
}

/// Host side of the frame loop: shows the framebuffer and collects input.
pub trait Frontend {
    /// Present one finished frame and append any scancodes typed since the
    /// last call to `keys`. Returns `false` once the user asked to quit.
    fn present(&mut self, framebuffer: &[u8], keys: &mut Vec<u8>) -> bool;

    /// Whether the loop should end as soon as the CPU halts.
    fn exit_on_halt(&self) -> bool {
        false
    }
}

/// Frontend with no window: never quits on its own, stops on HLT.
#[derive(Debug, Default)]
pub struct HeadlessFrontend;

impl Frontend for HeadlessFrontend {
    fn present(&mut self, _framebuffer: &[u8], _keys: &mut Vec<u8>) -> bool {
        true
    }

    fn exit_on_halt(&self) -> bool {
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Quit,
    Halted,
    FrameLimit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub frames: u64,
    pub steps: u64,
    pub reason: StopReason,
}

/// The whole machine: CPU, board and the host handles of its devices.
pub struct Emulator {
    pub cpu: Cpu,
    pub bus: SystemBus,
    pub config: EmulatorConfig,
    keyboard: KeyboardHandle,
    drive: Drive,
    frames: u64,
}

impl Emulator {
    pub fn new(config: EmulatorConfig) -> Self {
        let mut bus = SystemBus::new();
        let keyboard = Keyboard::new();
        let handle = keyboard.handle();
        bus.bind_port(KEYBOARD_PORT, Box::new(keyboard));
        bus.bind_port(DISPLAY_PORT, Box::new(DisplayPort));

        let mut emu = Self {
            cpu: Cpu::new(),
            bus,
            config,
            keyboard: handle,
            drive: Drive::new(None),
            frames: 0,
        };
        emu.bind_drive();
        emu
    }

    fn bind_drive(&mut self) {
        for (port, dev) in self.drive.ports() {
            self.bus.bind_port(port, Box::new(dev));
        }
    }

    /// Power-on reset: registers, flags, memories and device registers are
    /// cleared. The disk image and port bindings are kept.
    pub fn reset(&mut self) {
        self.cpu.reset();
        self.bus.reset();
        self.keyboard.clear();
        self.drive.reset();
        self.frames = 0;
        log::debug!("[Emulator] Reset, ip={:#010x}", self.cpu.ip);
    }

    pub fn load_rom(&mut self, image: &[u8]) -> Result<(), EmulatorError> {
        self.bus.rom.load(image, 0)?;
        log::info!(
            "[Emulator] Loaded {} byte ROM image at {:#010x}",
            image.len(),
            ROM_BASE
        );
        Ok(())
    }

    pub fn load_ram(&mut self, image: &[u8]) -> Result<(), EmulatorError> {
        self.bus.ram.load(image, 0)?;
        log::info!(
            "[Emulator] Loaded {} byte RAM image at {:#010x}",
            image.len(),
            RAM_BASE
        );
        Ok(())
    }

    pub fn load_rom_file<P: AsRef<Path>>(&mut self, path: P) -> Result<usize, EmulatorError> {
        let image = fs::read(path)?;
        self.load_rom(&image)?;
        Ok(image.len())
    }

    pub fn load_ram_file<P: AsRef<Path>>(&mut self, path: P) -> Result<usize, EmulatorError> {
        let image = fs::read(path)?;
        self.load_ram(&image)?;
        Ok(image.len())
    }

    /// Replace the drive with one backed by `image`.
    pub fn attach_disk(&mut self, image: Vec<u8>) {
        log::info!("[Emulator] Attached {} byte disk image", image.len());
        self.drive = Drive::new(Some(image));
        self.bind_drive();
    }

    pub fn drive(&self) -> &Drive {
        &self.drive
    }

    pub fn keyboard(&self) -> &KeyboardHandle {
        &self.keyboard
    }

    /// Feed a scancode into the keyboard, queueing its IRQ when the guest
    /// enabled interrupt mode.
    pub fn key_down(&mut self, scancode: u8) {
        if self.keyboard.push_scancode(scancode) {
            self.bus.request_irq(KEYBOARD_IRQ);
        }
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Run one frame's worth of instructions, stopping early on HLT.
    /// Returns the number of instructions executed.
    pub fn run_frame(&mut self) -> u64 {
        let budget = self.config.cycles_per_frame();
        let mut steps = 0;
        while steps < budget && !self.cpu.halted {
            self.cpu.step(&mut self.bus);
            steps += 1;
        }
        self.frames += 1;
        steps
    }

    /// Frame loop. Input and presentation only happen between frames.
    pub fn run(&mut self, frontend: &mut dyn Frontend, max_frames: Option<u64>) -> RunSummary {
        let mut keys = Vec::new();
        let mut frames = 0;
        let mut steps = 0;
        let reason = loop {
            if max_frames.is_some_and(|limit| frames >= limit) {
                break StopReason::FrameLimit;
            }
            steps += self.run_frame();
            frames += 1;

            keys.clear();
            let keep_going = frontend.present(&self.bus.framebuffer, &mut keys);
            for &scancode in &keys {
                self.key_down(scancode);
            }
            if !keep_going {
                break StopReason::Quit;
            }
            if self.cpu.halted && frontend.exit_on_halt() {
                break StopReason::Halted;
            }
        };
        log::info!(
            "[Emulator] Stopped after {} frames, {} instructions ({:?})",
            frames,
            steps,
            reason
        );
        RunSummary {
            frames,
            steps,
            reason,
        }
    }

    /// Every present page mapping reachable from the current `pd`, or
    /// `None` while paging is off and `pd` means nothing.
    pub fn page_mappings(&mut self) -> Option<Vec<Mapping>> {
        if !self.cpu.paging_enabled() {
            return None;
        }
        Some(mmu::walk_page_directory(&mut self.bus, self.cpu.pd))
    }
}

impl Default for Emulator {
    fn default() -> Self {
        Self::new(EmulatorConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{Bus, MMIO_BASE};
    use crate::decoder::Opcode;
    use crate::decoder::tests::*;
    use crate::devices::display::FRAMEBUFFER_BASE;
    use crate::devices::drive::{BLOCK_SIZE, DRIVE_PORT_LBA, DRIVE_PORT_STATUS};
    use crate::mmu::PageTableEntry;

    fn make_emulator(program: &[u16], config: EmulatorConfig) -> Emulator {
        let mut emu = Emulator::new(config);
        let bytes: Vec<u8> = program.iter().flat_map(|w| w.to_le_bytes()).collect();
        emu.load_rom(&bytes).unwrap();
        emu
    }

    fn small_config() -> EmulatorConfig {
        EmulatorConfig {
            clock_hz: 600,
            frame_rate: 60,
        }
    }

    /// Frontend that records frames and quits after a fixed count.
    struct Scripted {
        presented: u64,
        quit_after: u64,
        keys: Vec<u8>,
    }

    impl Frontend for Scripted {
        fn present(&mut self, framebuffer: &[u8], keys: &mut Vec<u8>) -> bool {
            assert!(!framebuffer.is_empty());
            self.presented += 1;
            keys.append(&mut self.keys);
            self.presented < self.quit_after
        }

        fn exit_on_halt(&self) -> bool {
            true
        }
    }

    #[test]
    fn test_cycles_per_frame() {
        assert_eq!(EmulatorConfig::default().cycles_per_frame(), 550_000);
        assert_eq!(small_config().cycles_per_frame(), 10);
        let zero_fps = EmulatorConfig {
            clock_hz: 100,
            frame_rate: 0,
        };
        assert_eq!(zero_fps.cycles_per_frame(), 100);
    }

    #[test]
    fn test_ports_bound_at_boot() {
        let emu = Emulator::default();
        assert_eq!(emu.bus.ports.name(0), "debug");
        assert_eq!(emu.bus.ports.name(KEYBOARD_PORT), "keyboard");
        assert_eq!(emu.bus.ports.name(DISPLAY_PORT), "display");
        assert_eq!(emu.bus.ports.name(DRIVE_PORT_STATUS), "drive-status");
        assert_eq!(emu.bus.ports.name(0x40), "unbound");
    }

    #[test]
    fn test_headless_run_stops_on_halt() {
        let mut emu = make_emulator(
            &[
                encode_type4(Opcode::Inc, 0),
                encode_type4(Opcode::Inc, 0),
                encode_type5(Opcode::Hlt),
            ],
            small_config(),
        );
        let summary = emu.run(&mut HeadlessFrontend, None);
        assert_eq!(summary.reason, StopReason::Halted);
        assert_eq!(summary.frames, 1);
        assert_eq!(summary.steps, 3);
        assert_eq!(emu.cpu.regs[0], 2);
    }

    #[test]
    fn test_frame_limit_and_quit() {
        // JMP always to ROM_BASE: spins forever.
        let spin = [
            encode_type2(Opcode::Jmp, 2, 0),
            ROM_BASE as u16,
            (ROM_BASE >> 16) as u16,
        ];
        let mut emu = make_emulator(&spin, small_config());
        let summary = emu.run(&mut HeadlessFrontend, Some(3));
        assert_eq!(summary.reason, StopReason::FrameLimit);
        assert_eq!(summary.frames, 3);
        assert_eq!(summary.steps, 30);
        assert_eq!(emu.frames(), 3);

        let mut ui = Scripted {
            presented: 0,
            quit_after: 2,
            keys: Vec::new(),
        };
        let summary = emu.run(&mut ui, None);
        assert_eq!(summary.reason, StopReason::Quit);
        assert_eq!(ui.presented, 2);
    }

    #[test]
    fn test_keyboard_irq_reaches_handler() {
        let handler = ROM_BASE + 0x40;
        let kb_port = MMIO_BASE + KEYBOARD_PORT as u32;
        let mut rom = Vec::new();
        // r0 = 1; [kbd] = r0 turns IRQ mode on.
        rom.extend_from_slice(&encode_type3(Opcode::Ld3, 0, 0).to_le_bytes());
        rom.push(1);
        rom.extend_from_slice(&encode_type1(Opcode::St1, 0, 0).to_le_bytes());
        rom.extend_from_slice(&kb_port.to_le_bytes());
        // Spin in place.
        let spin = ROM_BASE + rom.len() as u32;
        rom.extend_from_slice(&encode_type2(Opcode::Jmp, 2, 0).to_le_bytes());
        rom.extend_from_slice(&spin.to_le_bytes());
        rom.resize(0x40, 0);
        // Handler: r1 = [kbd]; HLT
        rom.extend_from_slice(&encode_type1(Opcode::Ld1, 0, 1).to_le_bytes());
        rom.extend_from_slice(&kb_port.to_le_bytes());
        rom.extend_from_slice(&encode_type5(Opcode::Hlt).to_le_bytes());

        let mut emu = Emulator::new(small_config());
        emu.load_rom(&rom).unwrap();
        emu.bus.write32(KEYBOARD_IRQ as u32 * 4, handler);

        let mut ui = Scripted {
            presented: 0,
            quit_after: 10,
            keys: vec![0x1E],
        };
        let summary = emu.run(&mut ui, None);
        assert_eq!(summary.reason, StopReason::Halted);
        assert_eq!(summary.frames, 2);
        assert!(emu.cpu.halted);
        assert_eq!(emu.cpu.regs[1], 0x1E);
        assert!(emu.keyboard().irq_enabled());
        assert_eq!(emu.keyboard().pending(), 0);
    }

    #[test]
    fn test_key_without_irq_mode_only_buffers() {
        let mut emu = Emulator::default();
        emu.key_down(0x10);
        assert_eq!(emu.keyboard().pending(), 1);
        assert_eq!(emu.bus.read8(MMIO_BASE + KEYBOARD_PORT as u32), 0x10);
        emu.cpu.step(&mut emu.bus);
        assert_eq!(emu.cpu.sp, crate::cpu::STACK_BASE);
    }

    #[test]
    fn test_reset_clears_machine() {
        let mut emu = make_emulator(&[encode_type4(Opcode::Inc, 0)], small_config());
        emu.run_frame();
        emu.bus.write8(FRAMEBUFFER_BASE, 0xFF);
        emu.key_down(0x22);
        emu.attach_disk(vec![0; BLOCK_SIZE]);
        emu.bus.write8(MMIO_BASE + DRIVE_PORT_LBA as u32, 3);
        emu.reset();
        assert_eq!(emu.cpu, Cpu::new());
        assert_eq!(emu.bus.read16(ROM_BASE), 0);
        assert_eq!(emu.bus.read8(FRAMEBUFFER_BASE), 0);
        assert_eq!(emu.keyboard().pending(), 0);
        assert_eq!(emu.frames(), 0);
        assert_eq!(emu.drive().lba(), 0);
        assert!(emu.drive().image().is_some());
    }

    #[test]
    fn test_display_clear_via_port() {
        let mut emu = Emulator::default();
        emu.bus.write32(FRAMEBUFFER_BASE + 16, 0x00FF_FFFF);
        emu.bus.write8(MMIO_BASE + DISPLAY_PORT as u32, 0x01);
        assert_eq!(emu.bus.read32(FRAMEBUFFER_BASE + 16), 0);
    }

    #[test]
    fn test_attached_disk_reports_ready() {
        let mut emu = Emulator::default();
        let status = MMIO_BASE + DRIVE_PORT_STATUS as u32;
        assert_eq!(emu.bus.read8(status), 0);
        emu.attach_disk(vec![0; 1024]);
        assert_eq!(emu.bus.read8(status), 1);
        assert!(emu.drive().image().is_some());
    }

    #[test]
    fn test_rom_image_too_large() {
        let mut emu = Emulator::default();
        let image = vec![0u8; crate::bus::ROM_SIZE + 1];
        assert!(matches!(
            emu.load_rom(&image),
            Err(EmulatorError::Memory(MemoryError::ImageTooLarge { .. }))
        ));
    }

    #[test]
    fn test_page_mappings_follow_pd() {
        let mut emu = Emulator::default();
        emu.bus.write32(0x1000, 0x2000 | PageTableEntry::PRESENT);
        emu.bus.write32(0x2008, 0x8000 | PageTableEntry::PRESENT);
        emu.cpu.pd = 0x1000;
        assert_eq!(emu.page_mappings(), None);

        emu.cpu.msr = crate::mmu::MSR_PAGING;
        assert_eq!(
            emu.page_mappings(),
            Some(vec![Mapping {
                virt: 0x2000,
                phys: 0x8000
            }])
        );
    }
}
