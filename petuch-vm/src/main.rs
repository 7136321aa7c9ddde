use clap::Parser;
use petuch_vm::bus::{MMIO_BASE, RAM_BASE, RAM_SIZE, ROM_BASE, ROM_SIZE};
use petuch_vm::devices::display::{DISPLAY_HEIGHT, DISPLAY_WIDTH, FRAMEBUFFER_BASE};
use petuch_vm::devices::drive::BLOCK_SIZE;
use petuch_vm::emulator::{RunSummary, StopReason};
use petuch_vm::{Emulator, EmulatorConfig, Frontend, HeadlessFrontend};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Raw ROM image, loaded at 0xF000_0000
    #[arg(short, long)]
    rom: PathBuf,

    /// Optional raw RAM image, loaded at physical 0
    #[arg(long)]
    ram: Option<PathBuf>,

    /// Optional disk image for the block drive (512-byte sectors)
    #[arg(long)]
    disk: Option<PathBuf>,

    /// Run without a window; stops when the CPU halts
    #[arg(long)]
    headless: bool,

    /// Stop after this many frames
    #[arg(long)]
    frames: Option<u64>,

    /// Emulated clock in instructions per second
    #[arg(long, default_value_t = petuch_vm::emulator::DEFAULT_CLOCK_HZ)]
    clock_hz: u32,

    /// Frames per second
    #[arg(long, default_value_t = petuch_vm::emulator::DEFAULT_FRAME_RATE)]
    fps: u32,

    /// Write a bincode snapshot of the machine here on exit
    #[arg(long)]
    dump: Option<PathBuf>,

    /// Log every present page mapping on exit
    #[arg(long)]
    dump_page_tables: bool,
}

fn print_vm_banner() {
    const BANNER: &str = r#"
    ┌─────────────────────────────────────────────────────────────────────────┐
    │                                                                         │
    │   ██████╗ ███████╗████████╗██╗   ██╗ ██████╗██╗  ██╗    ██████╗  ██████╗│
    │   ██╔══██╗██╔════╝╚══██╔══╝██║   ██║██╔════╝██║  ██║    ██╔══██╗██╔════╝│
    │   ██████╔╝█████╗     ██║   ██║   ██║██║     ███████║    ██████╔╝██║     │
    │   ██╔═══╝ ██╔══╝     ██║   ██║   ██║██║     ██╔══██║    ██╔═══╝ ██║     │
    │   ██║     ███████╗   ██║   ╚██████╔╝╚██████╗██║  ██║    ██║     ╚██████╗│
    │   ╚═╝     ╚══════╝   ╚═╝    ╚═════╝  ╚═════╝╚═╝  ╚═╝    ╚═╝      ╚═════╝│
    │                                                                         │
    │   PetuchPC Virtual Machine                                              │
    │   32-bit core with paging, vectored interrupts and a linear framebuffer │
    │                                                                         │
    └─────────────────────────────────────────────────────────────────────────┘
"#;
    println!("{}", BANNER);
}

fn print_section(title: &str) {
    println!("\n\x1b[1;36m━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━\x1b[0m");
    println!("\x1b[1;33m  ▸ {}\x1b[0m", title);
    println!("\x1b[1;36m━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━\x1b[0m");
}

fn print_status(component: &str, status: &str, ok: bool) {
    let status_color = if ok { "\x1b[1;32m" } else { "\x1b[1;31m" };
    let check = if ok { "✓" } else { "✗" };
    println!("    \x1b[0;37m{:<40}\x1b[0m {}[{}] {}\x1b[0m", component, status_color, check, status);
}

fn print_info(key: &str, value: &str) {
    println!("    \x1b[0;90m├─\x1b[0m \x1b[0;37m{:<20}\x1b[0m \x1b[1;97m{}\x1b[0m", key, value);
}

#[cfg(feature = "gui")]
fn make_frontend(args: &Args) -> Result<Box<dyn Frontend>, Box<dyn std::error::Error>> {
    if args.headless {
        return Ok(Box::new(HeadlessFrontend));
    }
    let window = petuch_vm::window::WindowFrontend::new("PetuchPC", args.fps)?;
    Ok(Box::new(window))
}

#[cfg(not(feature = "gui"))]
fn make_frontend(args: &Args) -> Result<Box<dyn Frontend>, Box<dyn std::error::Error>> {
    if !args.headless {
        log::warn!("Built without the `gui` feature, running headless");
    }
    Ok(Box::new(HeadlessFrontend))
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    print_vm_banner();

    let args = Args::parse();
    let config = EmulatorConfig {
        clock_hz: args.clock_hz,
        frame_rate: args.fps,
    };
    let mut emu = Emulator::new(config);

    // ─── CPU INITIALIZATION ───────────────────────────────────────────────────
    print_section("CPU INITIALIZATION");
    print_info("Architecture", "PetuchPC 32-bit, 16 registers");
    print_info("Clock", &format!("{} Hz", config.clock_hz));
    print_info("Frame Budget", &format!(
        "{} instructions @ {} fps",
        config.cycles_per_frame(),
        config.frame_rate
    ));
    print_status("CPU Core", "INITIALIZED", true);

    // ─── MEMORY SUBSYSTEM ─────────────────────────────────────────────────────
    print_section("MEMORY SUBSYSTEM");
    print_info("RAM", &format!("0x{:08X} ({} MiB)", RAM_BASE, RAM_SIZE >> 20));
    print_info("ROM", &format!("0x{:08X} ({} MiB)", ROM_BASE, ROM_SIZE >> 20));
    print_info("MMIO Ports", &format!("0x{:08X} (256 ports)", MMIO_BASE));
    print_info("Framebuffer", &format!(
        "0x{:08X} ({}x{}x4)",
        FRAMEBUFFER_BASE, DISPLAY_WIDTH, DISPLAY_HEIGHT
    ));
    print_status("MMU (2-level, 4 KiB pages)", "READY", true);

    // ─── IMAGE LOADING ────────────────────────────────────────────────────────
    print_section("IMAGE LOADING");
    print_info("ROM Path", &args.rom.display().to_string());
    match emu.load_rom_file(&args.rom) {
        Ok(len) => {
            print_info("ROM Size", &format!("{} bytes", len));
            print_status("ROM Image", "LOADED", true);
        }
        Err(e) => {
            print_status("ROM Image", "FAILED", false);
            return Err(e.into());
        }
    }
    if let Some(ram) = &args.ram {
        print_info("RAM Path", &ram.display().to_string());
        let len = emu.load_ram_file(ram)?;
        print_info("RAM Size", &format!("{} bytes", len));
        print_status("RAM Image", "LOADED", true);
    }

    // ─── PERIPHERALS ──────────────────────────────────────────────────────────
    print_section("PERIPHERALS");
    print_info("Port 0x00", "Debug output");
    print_info("Port 0x01", "Keyboard (PS/2 set 1, IRQ 0x02)");
    print_info("Port 0x02", "Display");
    print_info("Ports 0x03-0x06", "Block drive");
    if let Some(disk) = &args.disk {
        let image = std::fs::read(disk)?;
        print_info("Disk", &format!(
            "{} ({} sectors)",
            disk.display(),
            image.len() / BLOCK_SIZE
        ));
        emu.attach_disk(image);
        print_status("Block Drive", "ATTACHED", true);
    } else {
        print_status("Block Drive", "NO MEDIA", false);
    }

    let mut frontend = make_frontend(&args)?;

    // ─── BOOT SEQUENCE COMPLETE ───────────────────────────────────────────────
    print_section("BOOT SEQUENCE COMPLETE");
    println!();
    println!("    \x1b[1;97mStarting execution at 0x{:08X}\x1b[0m", emu.cpu.ip);
    println!();

    let summary = emu.run(frontend.as_mut(), args.frames);
    report(&emu, &summary);

    if args.dump_page_tables {
        match emu.page_mappings() {
            Some(maps) => {
                log::info!("[MMU] {} present pages under pd={:#010x}", maps.len(), emu.cpu.pd);
                for m in &maps {
                    log::info!("[MMU]   {:#010x} -> {:#010x}", m.virt, m.phys);
                }
            }
            None => log::info!("[MMU] Paging disabled (msr={:#010x}), no page tables to dump", emu.cpu.msr),
        }
    }

    if let Some(path) = &args.dump {
        emu.save_snapshot(path)?;
        print_status("Snapshot", &format!("WRITTEN to {}", path.display()), true);
    }

    Ok(())
}

fn report(emu: &Emulator, summary: &RunSummary) {
    print_section("MACHINE STOPPED");
    let reason = match summary.reason {
        StopReason::Quit => "window closed",
        StopReason::Halted => "HLT",
        StopReason::FrameLimit => "frame limit reached",
    };
    print_info("Reason", reason);
    print_info("Frames", &summary.frames.to_string());
    print_info("Instructions", &summary.steps.to_string());
    println!();
    for line in emu.cpu.dump_registers().lines() {
        println!("    {}", line);
    }
}
