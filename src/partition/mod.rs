pub mod gpt;
pub mod mbr;
pub mod types;

use crate::device::{BlockDevice, SECTOR_SIZE};
use crate::error::SyncError;

/// Geometry of the device being synchronized, read once per run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Disk {
    pub block_count: u64,
}

impl Disk {
    pub fn new(block_count: u64) -> Result<Self, SyncError> {
        if block_count == 0 {
            return Err(SyncError::DiskSizeUnavailable);
        }
        Ok(Self { block_count })
    }

    pub fn from_device(device: &mut impl BlockDevice) -> Result<Self, SyncError> {
        Self::new(device.block_count()?)
    }

    pub fn last_lba(&self) -> u64 {
        self.block_count - 1
    }

    pub fn size_bytes(&self) -> u64 {
        self.block_count.saturating_mul(SECTOR_SIZE as u64)
    }
}

/// Format a byte count as a human-readable size string using binary (base-1024) units.
pub fn format_size(bytes: u64) -> String {
    const KIB: u64 = 1024;
    const MIB: u64 = 1024 * KIB;
    const GIB: u64 = 1024 * MIB;
    const TIB: u64 = 1024 * GIB;

    if bytes >= TIB {
        format!("{:.1} TiB", bytes as f64 / TIB as f64)
    } else if bytes >= GIB {
        format!("{:.1} GiB", bytes as f64 / GIB as f64)
    } else if bytes >= MIB {
        format!("{:.1} MiB", bytes as f64 / MIB as f64)
    } else if bytes >= KIB {
        format!("{:.1} KiB", bytes as f64 / KIB as f64)
    } else {
        format!("{bytes} B")
    }
}
