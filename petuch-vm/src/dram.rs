use thiserror::Error;

/// Device-local memory access errors.
///
/// The system bus never surfaces these to the CPU: it logs them and
/// substitutes 0 for reads or drops the write.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MemoryError {
    #[error("Out-of-bounds memory access at {0:#010x}")]
    OutOfBounds(u32),

    #[error("Write to read-only memory at {0:#010x}")]
    ReadOnly(u32),

    #[error("Image of {len} bytes does not fit in {capacity} bytes")]
    ImageTooLarge { len: usize, capacity: usize },
}

/// Flat byte-addressed backing store for one physical region.
///
/// Offsets passed to the load/store helpers are **offsets from `base`**,
/// not full physical addresses; use [`Dram::offset`] to convert.
pub struct Dram {
    pub base: u32,
    read_only: bool,
    data: Vec<u8>,
}

impl Dram {
    /// Create a new zero-initialised writable region of `size` bytes.
    pub fn new(base: u32, size: usize) -> Self {
        Self {
            base,
            read_only: false,
            data: vec![0; size],
        }
    }

    /// Create a zero-initialised region that rejects bus writes.
    ///
    /// Image loading through [`Dram::load`] still works; that is how ROM
    /// contents get in at boot.
    pub fn new_read_only(base: u32, size: usize) -> Self {
        Self {
            read_only: true,
            ..Self::new(base, size)
        }
    }

    #[inline(always)]
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Translate a physical address into an offset, if it falls inside.
    #[inline(always)]
    pub fn offset(&self, addr: u32) -> Option<usize> {
        let off = addr.wrapping_sub(self.base) as usize;
        if addr >= self.base && off < self.data.len() {
            Some(off)
        } else {
            None
        }
    }

    /// Load a raw image at the given offset, bypassing the read-only flag.
    pub fn load(&mut self, image: &[u8], offset: usize) -> Result<(), MemoryError> {
        let end = offset
            .checked_add(image.len())
            .filter(|&end| end <= self.data.len())
            .ok_or(MemoryError::ImageTooLarge {
                len: image.len(),
                capacity: self.data.len().saturating_sub(offset),
            })?;
        self.data[offset..end].copy_from_slice(image);
        Ok(())
    }

    /// Zero the whole region.
    pub fn clear(&mut self) {
        self.data.fill(0);
    }

    #[inline(always)]
    pub fn load_8(&self, offset: usize) -> Result<u8, MemoryError> {
        self.data
            .get(offset)
            .copied()
            .ok_or(MemoryError::OutOfBounds(self.base.wrapping_add(offset as u32)))
    }

    #[inline(always)]
    pub fn store_8(&mut self, offset: usize, value: u8) -> Result<(), MemoryError> {
        let addr = self.base.wrapping_add(offset as u32);
        if self.read_only {
            return Err(MemoryError::ReadOnly(addr));
        }
        let slot = self
            .data
            .get_mut(offset)
            .ok_or(MemoryError::OutOfBounds(addr))?;
        *slot = value;
        Ok(())
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }
}
