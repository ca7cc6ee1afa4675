use byteorder::{ByteOrder, LittleEndian};

use super::{Detected, FilesystemProbe};
use crate::device::{BlockDevice, Sector};
use crate::error::SyncError;

pub const FAT12: Detected = Detected { mbr_type: 0x01, name: "FAT12" };
pub const FAT16: Detected = Detected { mbr_type: 0x0E, name: "FAT16" };
pub const FAT32: Detected = Detected { mbr_type: 0x0C, name: "FAT32" };
pub const NTFS: Detected = Detected { mbr_type: 0x07, name: "NTFS" };
pub const EXFAT: Detected = Detected { mbr_type: 0x07, name: "exFAT" };
pub const EXT: Detected = Detected { mbr_type: 0x83, name: "ext2/3/4" };
pub const BTRFS: Detected = Detected { mbr_type: 0x83, name: "btrfs" };
pub const XFS: Detected = Detected { mbr_type: 0x83, name: "XFS" };
pub const HFS_PLUS: Detected = Detected { mbr_type: 0xAF, name: "HFS+" };
pub const HFSX: Detected = Detected { mbr_type: 0xAF, name: "HFSX" };
pub const LINUX_SWAP: Detected = Detected { mbr_type: 0x82, name: "Linux swap" };

const EXT_MAGIC: u16 = 0xEF53;
const BTRFS_MAGIC: &[u8; 8] = b"_BHRfS_M";

/// Sector offsets (from the partition start) of the structures we look at.
const SUPERBLOCK_SECTOR: u64 = 2; // byte 1024: ext, HFS+
const SWAP_SECTOR: u64 = 7; // last bytes of the first 4 KiB page
const BTRFS_SECTOR: u64 = 128; // byte 65536

/// [`FilesystemProbe`] that reads on-disk signatures through the device.
#[derive(Debug, Default)]
pub struct SignatureProbe {
    block_count: Option<u64>,
}

impl SignatureProbe {
    pub fn new() -> Self {
        Self::default()
    }
}

impl FilesystemProbe for SignatureProbe {
    fn detect<D: BlockDevice>(
        &mut self,
        device: &mut D,
        start_lba: u64,
    ) -> Result<Option<Detected>, SyncError> {
        let block_count = match self.block_count {
            Some(count) => count,
            None => {
                let count = device.block_count()?;
                self.block_count = Some(count);
                count
            }
        };
        detect_filesystem(device, start_lba, block_count)
    }
}

/// Detect the filesystem starting at `start_lba`. Sectors past the end of the
/// device are treated as carrying no signature.
pub fn detect_filesystem(
    device: &mut impl BlockDevice,
    start_lba: u64,
    block_count: u64,
) -> Result<Option<Detected>, SyncError> {
    let mut read = |offset: u64| -> Result<Option<Sector>, SyncError> {
        let lba = start_lba.saturating_add(offset);
        if lba >= block_count {
            return Ok(None);
        }
        device.read_sector(lba).map(Some)
    };

    if let Some(found) = read(0)?.and_then(|boot| detect_boot_sector(&boot)) {
        return Ok(Some(found));
    }
    if let Some(found) = read(SUPERBLOCK_SECTOR)?.and_then(|sb| detect_superblock(&sb)) {
        return Ok(Some(found));
    }
    if let Some(page) = read(SWAP_SECTOR)? {
        let magic = &page[502..512];
        if magic == b"SWAPSPACE2" || magic == b"SWAP-SPACE" {
            return Ok(Some(LINUX_SWAP));
        }
    }
    if let Some(sb) = read(BTRFS_SECTOR)? {
        if &sb[64..72] == BTRFS_MAGIC {
            return Ok(Some(BTRFS));
        }
    }
    Ok(None)
}

/// Signatures found in the first sector of a partition.
pub fn detect_boot_sector(boot: &Sector) -> Option<Detected> {
    match &boot[3..11] {
        b"NTFS    " => return Some(NTFS),
        b"EXFAT   " => return Some(EXFAT),
        _ => {}
    }
    if &boot[0..4] == b"XFSB" {
        return Some(XFS);
    }
    detect_fat(boot)
}

/// Signatures found at byte 1024 of a partition.
pub fn detect_superblock(sb: &Sector) -> Option<Detected> {
    if LittleEndian::read_u16(&sb[56..58]) == EXT_MAGIC {
        return Some(EXT);
    }
    match &sb[0..2] {
        b"H+" => Some(HFS_PLUS),
        b"HX" => Some(HFSX),
        _ => None,
    }
}

fn detect_fat(bpb: &Sector) -> Option<Detected> {
    // Boot signature plus a jump instruction (EB xx 90 or E9 xx xx)
    if LittleEndian::read_u16(&bpb[510..512]) != 0xAA55 {
        return None;
    }
    if !(bpb[0] == 0xEB && bpb[2] == 0x90) && bpb[0] != 0xE9 {
        return None;
    }

    if bpb[54..59] == *b"FAT12" {
        return Some(FAT12);
    }
    if bpb[54..59] == *b"FAT16" {
        return Some(FAT16);
    }
    if bpb[82..90] == *b"FAT32   " {
        return Some(FAT32);
    }

    // No type string: fall back to the BPB cluster count.
    let bytes_per_sector = LittleEndian::read_u16(&bpb[11..13]) as u64;
    let sectors_per_cluster = bpb[13] as u64;
    let reserved_sectors = LittleEndian::read_u16(&bpb[14..16]) as u64;
    let num_fats = bpb[16] as u64;
    if !matches!(bytes_per_sector, 512 | 1024 | 2048 | 4096)
        || !sectors_per_cluster.is_power_of_two()
        || reserved_sectors == 0
        || !(1..=2).contains(&num_fats)
    {
        return None;
    }

    let root_entry_count = LittleEndian::read_u16(&bpb[17..19]) as u64;
    let total_sectors = match LittleEndian::read_u16(&bpb[19..21]) {
        0 => LittleEndian::read_u32(&bpb[32..36]) as u64,
        n => n as u64,
    };
    let sectors_per_fat_16 = LittleEndian::read_u16(&bpb[22..24]) as u64;
    let sectors_per_fat = match sectors_per_fat_16 {
        0 => LittleEndian::read_u32(&bpb[36..40]) as u64,
        n => n,
    };

    if sectors_per_fat_16 == 0 && root_entry_count == 0 {
        return Some(FAT32);
    }
    let root_dir_sectors = (root_entry_count * 32).div_ceil(bytes_per_sector);
    let data_start = reserved_sectors + num_fats * sectors_per_fat + root_dir_sectors;
    let total_clusters = total_sectors.saturating_sub(data_start) / sectors_per_cluster;

    Some(if total_clusters < 4085 {
        FAT12
    } else if total_clusters < 65525 {
        FAT16
    } else {
        FAT32
    })
}
