pub mod core;
pub mod execution;
pub mod interrupt;
pub mod types;

pub use self::core::{Cpu, INTERRUPT_TABLE_BASE, REG_COUNT, STACK_BASE, STACK_SLOT};
pub use interrupt::INTERRUPT_FRAME_SIZE;
pub use types::{Flags, PAGE_FAULT_VECTOR, Trap};
