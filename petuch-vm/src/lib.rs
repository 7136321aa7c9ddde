//! PetuchPC: a 32-bit machine with a 16-bit instruction word, two-level
//! paging and vectored interrupts.

pub mod bus;
pub mod cpu;
pub mod decoder;
pub mod devices;
pub mod dram;
pub mod emulator;
pub mod mmu;
pub mod snapshot;

#[cfg(feature = "gui")]
pub mod window;

pub use cpu::{Cpu, Trap};
pub use emulator::{Emulator, EmulatorConfig, EmulatorError, Frontend, HeadlessFrontend};
