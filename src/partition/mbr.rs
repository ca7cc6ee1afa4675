use std::fmt;

use byteorder::{ByteOrder, LittleEndian};
use log::debug;
use serde::Serialize;

use super::types::mbr_type_name;
use crate::device::{BlockDevice, Sector};
use crate::error::SyncError;

pub const MBR_SIGNATURE: u16 = 0xAA55;
pub const PARTITION_TABLE_OFFSET: usize = 446;
pub const PARTITION_ENTRY_SIZE: usize = 16;
pub const MBR_SLOTS: usize = 4;

pub const TYPE_EMPTY: u8 = 0x00;
pub const TYPE_PROTECTIVE: u8 = 0xEE;
pub const TYPE_EFI_SYSTEM: u8 = 0xEF;

const BOOTABLE_FLAG: u8 = 0x80;
/// CHS triple meaning "use the LBA fields".
const CHS_LBA_SENTINEL: [u8; 3] = [0xFE, 0xFF, 0xFF];
const LBA_FIELD_MAX: u64 = u32::MAX as u64;

/// One legacy MBR slot, held with 64-bit inclusive LBAs before it is
/// narrowed to the 32-bit on-disk fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MbrPartitionEntry {
    pub index: usize,
    pub start_lba: u64,
    pub end_lba: u64,
    pub mbr_type: u8,
    pub active: bool,
}

/// Which 32-bit field of an MBR entry had to be clamped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ClampedField {
    StartLba,
    Size,
}

/// A value that did not fit the 32-bit MBR field and was clamped to 0xFFFFFFFF.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LbaClamp {
    pub slot: usize,
    pub field: ClampedField,
}

impl fmt::Display for LbaClamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.field {
            ClampedField::StartLba => {
                write!(f, "Partition {} starts beyond 2 TiB limit", self.slot + 1)
            }
            ClampedField::Size => {
                write!(f, "Partition {} extends beyond 2 TiB limit", self.slot + 1)
            }
        }
    }
}

/// The 32-bit on-disk LBA fields of an entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LbaFields {
    pub start_lba: u32,
    pub total_sectors: u32,
    pub clamped: Vec<LbaClamp>,
}

impl MbrPartitionEntry {
    /// An unused slot.
    pub fn empty(index: usize) -> Self {
        Self {
            index,
            start_lba: 0,
            end_lba: 0,
            mbr_type: TYPE_EMPTY,
            active: false,
        }
    }

    /// A 0xEE entry marking `start_lba..=end_lba` as owned by the GPT.
    pub fn protective(index: usize, start_lba: u64, end_lba: u64) -> Self {
        Self {
            index,
            start_lba,
            end_lba,
            mbr_type: TYPE_PROTECTIVE,
            active: false,
        }
    }

    /// Rebuild the in-memory form from on-disk fields.
    fn from_fields(index: usize, active: bool, mbr_type: u8, start_lba: u32, sectors: u32) -> Self {
        if mbr_type == TYPE_EMPTY {
            return Self::empty(index);
        }
        let start_lba = start_lba as u64;
        Self {
            index,
            start_lba,
            end_lba: (start_lba + sectors as u64).saturating_sub(1),
            mbr_type,
            active,
        }
    }

    fn parse(index: usize, data: &[u8]) -> Self {
        Self::from_fields(
            index,
            data[0] == BOOTABLE_FLAG,
            data[4],
            LittleEndian::read_u32(&data[8..12]),
            LittleEndian::read_u32(&data[12..16]),
        )
    }

    pub fn is_empty(&self) -> bool {
        self.mbr_type == TYPE_EMPTY
    }

    /// Check if this entry is an extended partition container (CHS, LBA, or Linux).
    pub fn is_extended(&self) -> bool {
        matches!(self.mbr_type, 0x05 | 0x0F | 0x85)
    }

    pub fn type_name(&self) -> &'static str {
        mbr_type_name(self.mbr_type)
    }

    /// Start LBA and sector count as stored on disk, clamped to 32 bits.
    pub fn lba_fields(&self) -> LbaFields {
        if self.is_empty() {
            return LbaFields {
                start_lba: 0,
                total_sectors: 0,
                clamped: Vec::new(),
            };
        }

        let mut clamped = Vec::new();
        let mut start = self.start_lba;
        if start > LBA_FIELD_MAX {
            clamped.push(LbaClamp {
                slot: self.index,
                field: ClampedField::StartLba,
            });
            start = LBA_FIELD_MAX;
        }
        let mut size = self.end_lba.saturating_add(1).saturating_sub(self.start_lba);
        if size > LBA_FIELD_MAX {
            clamped.push(LbaClamp {
                slot: self.index,
                field: ClampedField::Size,
            });
            size = LBA_FIELD_MAX;
        }

        LbaFields {
            start_lba: start as u32,
            total_sectors: size as u32,
            clamped,
        }
    }

    /// The entry as it would read back after being written to disk.
    pub fn as_stored(&self) -> Self {
        let fields = self.lba_fields();
        Self::from_fields(
            self.index,
            self.active,
            self.mbr_type,
            fields.start_lba,
            fields.total_sectors,
        )
    }

    /// Encode into a 16-byte partition record. Returns the clamps applied.
    pub fn encode(&self, bootable: bool, record: &mut [u8]) -> Vec<LbaClamp> {
        record[..PARTITION_ENTRY_SIZE].fill(0);
        if self.is_empty() {
            return Vec::new();
        }

        let fields = self.lba_fields();
        record[0] = if bootable { BOOTABLE_FLAG } else { 0x00 };
        record[1..4].copy_from_slice(&CHS_LBA_SENTINEL);
        record[4] = self.mbr_type;
        record[5..8].copy_from_slice(&CHS_LBA_SENTINEL);
        LittleEndian::write_u32(&mut record[8..12], fields.start_lba);
        LittleEndian::write_u32(&mut record[12..16], fields.total_sectors);
        fields.clamped
    }
}

/// The four primary slots of an on-disk MBR.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MbrTable {
    pub entries: [MbrPartitionEntry; MBR_SLOTS],
}

impl MbrTable {
    /// A table with all four slots unused.
    pub fn blank() -> Self {
        Self {
            entries: std::array::from_fn(MbrPartitionEntry::empty),
        }
    }

    /// Parse the partition table of a boot sector. A sector without the
    /// 0xAA55 boot signature has no table and yields a blank one.
    pub fn parse(data: &Sector) -> Self {
        let signature = LittleEndian::read_u16(&data[510..512]);
        if signature != MBR_SIGNATURE {
            debug!("MBR: no boot signature (found {signature:#06X}), treating as blank");
            return Self::blank();
        }

        let entries = std::array::from_fn(|i| {
            let offset = PARTITION_TABLE_OFFSET + i * PARTITION_ENTRY_SIZE;
            MbrPartitionEntry::parse(i, &data[offset..offset + PARTITION_ENTRY_SIZE])
        });

        Self { entries }
    }

    /// Return only non-empty partition entries.
    pub fn used_entries(&self) -> impl Iterator<Item = &MbrPartitionEntry> + '_ {
        self.entries.iter().filter(|e| !e.is_empty())
    }
}

/// Read the current MBR partition table from sector 0.
pub fn read_mbr(device: &mut impl BlockDevice) -> Result<MbrTable, SyncError> {
    let sector = device.read_sector(0)?;
    Ok(MbrTable::parse(&sector))
}
