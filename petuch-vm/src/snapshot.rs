use crate::bus::{RAM_BASE, ROM_BASE};
use crate::cpu::Cpu;
use crate::devices::display::FRAMEBUFFER_BASE;
use crate::emulator::{Emulator, EmulatorError};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

/// Version identifier for snapshot compatibility checks.
pub const SNAPSHOT_VERSION: &str = "1.0";

/// Full machine snapshot: CPU state plus every memory region.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub version: String,
    pub cpu: Cpu,
    pub memory: Vec<MemRegionSnapshot>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemRegionSnapshot {
    pub name: String,
    pub base: u32,
    pub size: u32,
    /// Hex SHA-256 of `data`.
    pub hash: String,
    pub data: Option<Vec<u8>>,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SnapshotError {
    #[error("snapshot version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: String, found: String },
    #[error("snapshot is missing the {0} region")]
    MissingRegion(&'static str),
    #[error("snapshot region {name} has no inline data")]
    NoData { name: String },
    #[error("snapshot region {name} size mismatch: machine={expected} bytes, snapshot={found} bytes")]
    SizeMismatch {
        name: String,
        expected: usize,
        found: usize,
    },
    #[error("snapshot region {name} hash mismatch")]
    HashMismatch { name: String },
}

fn digest(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

impl MemRegionSnapshot {
    fn capture(name: &str, base: u32, data: &[u8]) -> Self {
        Self {
            name: name.to_string(),
            base,
            size: data.len() as u32,
            hash: digest(data),
            data: Some(data.to_vec()),
        }
    }

    /// Inline data after checking it against `expected_len` and the digest.
    fn verified(&self, expected_len: usize) -> Result<&[u8], SnapshotError> {
        let data = self.data.as_deref().ok_or_else(|| SnapshotError::NoData {
            name: self.name.clone(),
        })?;
        if data.len() != expected_len {
            return Err(SnapshotError::SizeMismatch {
                name: self.name.clone(),
                expected: expected_len,
                found: data.len(),
            });
        }
        if digest(data) != self.hash {
            return Err(SnapshotError::HashMismatch {
                name: self.name.clone(),
            });
        }
        Ok(data)
    }
}

impl Snapshot {
    fn region(&self, name: &'static str) -> Result<&MemRegionSnapshot, SnapshotError> {
        self.memory
            .iter()
            .find(|r| r.name == name)
            .ok_or(SnapshotError::MissingRegion(name))
    }
}

impl Emulator {
    /// Capture the CPU and all memory regions.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            version: SNAPSHOT_VERSION.to_string(),
            cpu: self.cpu.clone(),
            memory: vec![
                MemRegionSnapshot::capture("ram", RAM_BASE, self.bus.ram.as_slice()),
                MemRegionSnapshot::capture("rom", ROM_BASE, self.bus.rom.as_slice()),
                MemRegionSnapshot::capture("framebuffer", FRAMEBUFFER_BASE, &self.bus.framebuffer),
            ],
        }
    }

    /// Restore state from a snapshot. Nothing is modified unless every
    /// region checks out.
    pub fn apply_snapshot(&mut self, snapshot: &Snapshot) -> Result<(), SnapshotError> {
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(SnapshotError::VersionMismatch {
                expected: SNAPSHOT_VERSION.to_string(),
                found: snapshot.version.clone(),
            });
        }
        let ram = snapshot.region("ram")?.verified(self.bus.ram.size())?;
        let rom = snapshot.region("rom")?.verified(self.bus.rom.size())?;
        let fb = snapshot
            .region("framebuffer")?
            .verified(self.bus.framebuffer.len())?;

        self.bus.ram.as_mut_slice().copy_from_slice(ram);
        self.bus.rom.as_mut_slice().copy_from_slice(rom);
        self.bus.framebuffer.copy_from_slice(fb);
        self.cpu = snapshot.cpu.clone();
        Ok(())
    }

    /// Save a snapshot to disk using bincode.
    pub fn save_snapshot<P: AsRef<Path>>(&self, path: P) -> Result<(), EmulatorError> {
        let snap = self.snapshot();
        let mut file = BufWriter::new(File::create(path)?);
        bincode::serialize_into(&mut file, &snap)?;
        file.flush()?;
        Ok(())
    }

    /// Load a snapshot from disk into this machine.
    pub fn load_snapshot<P: AsRef<Path>>(&mut self, path: P) -> Result<(), EmulatorError> {
        let file = BufReader::new(File::open(path)?);
        let snapshot: Snapshot = bincode::deserialize_from(file)?;
        self.apply_snapshot(&snapshot)?;
        Ok(())
    }
}
