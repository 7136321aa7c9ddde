//! Two-level page walk.
//!
//! The page directory holds 1024 entries, each covering 4 MiB; a page table
//! holds 1024 entries, each covering one 4 KiB page. Entries carry the frame
//! address in bits 31..12 and a present bit in bit 0. Table reads go straight
//! to the physical bus. There is no TLB, so every access walks.

use crate::bus::Bus;
use crate::cpu::Trap;

pub const PAGE_SIZE: u32 = 4096;
pub const ENTRIES_PER_TABLE: u32 = 1024;

/// MSR bit 0 turns translation on.
pub const MSR_PAGING: u32 = 1 << 0;

const ENTRY_SIZE: u32 = 4;
const FRAME_MASK: u32 = 0xFFFF_F000;
const OFFSET_MASK: u32 = 0x0000_0FFF;

/// A page-directory or page-table entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PageTableEntry(pub u32);

impl PageTableEntry {
    pub const PRESENT: u32 = 1 << 0;

    #[inline]
    pub fn present(self) -> bool {
        self.0 & Self::PRESENT != 0
    }

    /// Physical address of the frame this entry points at.
    #[inline]
    pub fn frame(self) -> u32 {
        self.0 & FRAME_MASK
    }
}

#[inline]
pub fn paging_enabled(msr: u32) -> bool {
    msr & MSR_PAGING != 0
}

#[inline]
fn read_entry(bus: &mut dyn Bus, table: u32, index: u32) -> PageTableEntry {
    PageTableEntry(bus.read32(table.wrapping_add(index * ENTRY_SIZE)))
}

/// Translate `va` through the directory at physical address `pd`.
pub fn translate(bus: &mut dyn Bus, pd: u32, va: u32) -> Result<u32, Trap> {
    let pde = read_entry(bus, pd, va >> 22);
    if !pde.present() {
        return Err(Trap::PageFault(va));
    }
    let pte = read_entry(bus, pde.frame(), (va >> 12) & 0x3FF);
    if !pte.present() {
        return Err(Trap::PageFault(va));
    }
    Ok(pte.frame() | (va & OFFSET_MASK))
}

/// One present 4 KiB mapping found by [`walk_page_directory`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Mapping {
    pub virt: u32,
    pub phys: u32,
}

/// Enumerate every present mapping reachable from `pd`, in VA order.
pub fn walk_page_directory(bus: &mut dyn Bus, pd: u32) -> Vec<Mapping> {
    let mut mappings = Vec::new();
    for dir in 0..ENTRIES_PER_TABLE {
        let pde = read_entry(bus, pd, dir);
        if !pde.present() {
            continue;
        }
        for idx in 0..ENTRIES_PER_TABLE {
            let pte = read_entry(bus, pde.frame(), idx);
            if pte.present() {
                mappings.push(Mapping {
                    virt: (dir << 22) | (idx << 12),
                    phys: pte.frame(),
                });
            }
        }
    }
    mappings
}
