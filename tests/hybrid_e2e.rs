//! End-to-end tests driving the whole sync pipeline against in-memory disks.
//!
//! Disks are sparse: only sectors that were written are stored, so multi-TiB
//! layouts cost a few kilobytes. Filesystem detection runs for real against
//! boot sectors written into the image.
//!
//! Run with: cargo test --test hybrid_e2e

use std::collections::HashMap;
use std::io;

use gptsync::console::{Console, Terminal};
use gptsync::device::{open_device, BlockDevice, DiskImage, Sector, SECTOR_SIZE};
use gptsync::partition::gpt::Guid;
use gptsync::partition::mbr::{read_mbr, ClampedField, LbaClamp, MbrPartitionEntry};
use gptsync::partition::types::{BASIC_DATA_GUID, EFI_SYSTEM_GUID};
use gptsync::sync::compose::ComposeOptions;
use gptsync::sync::{sync_device, NoopReason, SyncOutcome, SyncRequest};
use gptsync::SyncError;

const LINUX_FS: &str = "0FC63DAF-8483-4772-8E79-3D69D8477DE4";
const LDM_DATA: &str = "AF9B60A0-1431-4F62-BC68-3311714A69AD";

/// Sparse disk keeping written sectors in a map and recording writes.
struct MemDisk {
    sectors: HashMap<u64, Sector>,
    block_count: u64,
    writes: Vec<u64>,
    /// Every write fails, as on a read-only or failing device.
    fail_writes: bool,
    /// The device reports a size of zero while its sectors stay readable.
    hide_size: bool,
}

impl MemDisk {
    fn new(block_count: u64) -> Self {
        Self {
            sectors: HashMap::new(),
            block_count,
            writes: Vec::new(),
            fail_writes: false,
            hide_size: false,
        }
    }

    fn sector_mut(&mut self, lba: u64) -> &mut Sector {
        self.sectors.entry(lba).or_insert([0u8; SECTOR_SIZE])
    }
}

impl BlockDevice for MemDisk {
    fn read_sector(&mut self, lba: u64) -> Result<Sector, SyncError> {
        if lba >= self.block_count {
            return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into());
        }
        Ok(self.sectors.get(&lba).copied().unwrap_or([0u8; SECTOR_SIZE]))
    }

    fn write_sector(&mut self, lba: u64, data: &Sector) -> Result<(), SyncError> {
        if self.fail_writes {
            return Err(io::Error::from(io::ErrorKind::PermissionDenied).into());
        }
        if lba >= self.block_count {
            return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into());
        }
        self.sectors.insert(lba, *data);
        self.writes.push(lba);
        Ok(())
    }

    fn block_count(&mut self) -> Result<u64, SyncError> {
        Ok(if self.hide_size { 0 } else { self.block_count })
    }
}

/// Console that records output and answers every prompt the same way.
struct ScriptedConsole {
    answer: bool,
    lines: Vec<String>,
    prompts: usize,
}

impl ScriptedConsole {
    fn answering(answer: bool) -> Self {
        Self {
            answer,
            lines: Vec::new(),
            prompts: 0,
        }
    }

    fn output(&self) -> String {
        self.lines.join("\n")
    }
}

impl Console for ScriptedConsole {
    fn report(&mut self, message: &str) {
        self.lines.push(message.to_string());
    }

    fn confirm(&mut self, _prompt: &str) -> Result<bool, SyncError> {
        self.prompts += 1;
        Ok(self.answer)
    }
}

/// Write a protective MBR and a primary GPT (entry array at LBA 2).
fn write_gpt(disk: &mut impl BlockDevice, parts: &[(&str, u64, u64)]) {
    let block_count = disk.block_count().unwrap();

    let mut mbr = [0u8; SECTOR_SIZE];
    mbr[450] = 0xEE;
    mbr[454..458].copy_from_slice(&1u32.to_le_bytes());
    let size = (block_count - 1).min(0xFFFF_FFFF) as u32;
    mbr[458..462].copy_from_slice(&size.to_le_bytes());
    mbr[510] = 0x55;
    mbr[511] = 0xAA;
    disk.write_sector(0, &mbr).unwrap();

    let mut header = [0u8; SECTOR_SIZE];
    header[0..8].copy_from_slice(b"EFI PART");
    header[8..12].copy_from_slice(&0x0001_0000u32.to_le_bytes());
    header[12..16].copy_from_slice(&92u32.to_le_bytes());
    header[24..32].copy_from_slice(&1u64.to_le_bytes());
    header[32..40].copy_from_slice(&(block_count - 1).to_le_bytes());
    header[40..48].copy_from_slice(&34u64.to_le_bytes());
    header[48..56].copy_from_slice(&(block_count - 34).to_le_bytes());
    header[72..80].copy_from_slice(&2u64.to_le_bytes());
    header[80..84].copy_from_slice(&128u32.to_le_bytes());
    header[84..88].copy_from_slice(&128u32.to_le_bytes());
    disk.write_sector(1, &header).unwrap();

    // 4 entries of 128 bytes per sector
    for (i, (guid, start, end)) in parts.iter().enumerate() {
        let lba = 2 + (i / 4) as u64;
        let mut sector = disk.read_sector(lba).unwrap();
        let off = (i % 4) * 128;
        let guid: Guid = guid.parse().unwrap();
        sector[off..off + 16].copy_from_slice(guid.as_bytes());
        sector[off + 16..off + 32].copy_from_slice(&[i as u8 + 1; 16]);
        sector[off + 32..off + 40].copy_from_slice(&start.to_le_bytes());
        sector[off + 40..off + 48].copy_from_slice(&end.to_le_bytes());
        disk.write_sector(lba, &sector).unwrap();
    }
}

fn write_fat32_boot_sector(disk: &mut MemDisk, lba: u64) {
    let bpb = disk.sector_mut(lba);
    bpb[0..3].copy_from_slice(&[0xEB, 0x58, 0x90]);
    bpb[3..11].copy_from_slice(b"MSDOS5.0");
    bpb[82..90].copy_from_slice(b"FAT32   ");
    bpb[510] = 0x55;
    bpb[511] = 0xAA;
}

fn write_ntfs_boot_sector(disk: &mut MemDisk, lba: u64) {
    let vbr = disk.sector_mut(lba);
    vbr[0..3].copy_from_slice(&[0xEB, 0x52, 0x90]);
    vbr[3..11].copy_from_slice(b"NTFS    ");
    vbr[510] = 0x55;
    vbr[511] = 0xAA;
}

/// ESP followed by an NTFS partition filling almost all of a 2,000,000
/// sector disk.
fn esp_and_ntfs_disk() -> MemDisk {
    let mut disk = MemDisk::new(2_000_000);
    write_gpt(
        &mut disk,
        &[(EFI_SYSTEM_GUID, 34, 1000), (BASIC_DATA_GUID, 1001, 1_999_966)],
    );
    write_fat32_boot_sector(&mut disk, 34);
    write_ntfs_boot_sector(&mut disk, 1001);
    disk.writes.clear();
    disk
}

fn request(tokens: &[&str], fill_unused: bool) -> SyncRequest {
    SyncRequest {
        partitions: tokens.iter().map(|t| t.to_string()).collect(),
        options: ComposeOptions {
            create_empty: false,
            fill_unused,
        },
    }
}

fn entry(index: usize, start: u64, end: u64, mbr_type: u8, active: bool) -> MbrPartitionEntry {
    MbrPartitionEntry {
        index,
        start_lba: start,
        end_lba: end,
        mbr_type,
        active,
    }
}

// ============================================================================
// Automatic selection
// ============================================================================

#[test]
fn test_auto_sync_esp_and_ntfs() {
    let mut disk = esp_and_ntfs_disk();
    let mut console = ScriptedConsole::answering(true);

    let outcome = sync_device(&mut disk, &mut console, &request(&[], true)).unwrap();
    assert_eq!(outcome, SyncOutcome::Written { clamps: vec![] });
    assert_eq!(disk.writes, vec![0]);
    assert_eq!(console.prompts, 1);

    // The FAT-formatted ESP stays out of the MBR; NTFS is detected as 0x07
    // and the sectors after it are covered by a second protective entry.
    let mbr = read_mbr(&mut disk).unwrap();
    assert_eq!(
        mbr.entries,
        [
            entry(0, 1, 1000, 0xEE, false),
            entry(1, 1001, 1_999_966, 0x07, false),
            entry(2, 1_999_967, 1_999_999, 0xEE, false),
            MbrPartitionEntry::empty(3),
        ]
    );

    let output = console.output();
    assert!(output.contains("Status: MBR table must be updated."));
    assert!(output.contains("     1999966  07  NTFS/HPFS/exFAT"));
    assert!(output.contains("MBR updated successfully!"));
}

#[test]
fn test_auto_sync_without_fill() {
    let mut disk = esp_and_ntfs_disk();
    let mut console = ScriptedConsole::answering(true);

    sync_device(&mut disk, &mut console, &request(&[], false)).unwrap();

    let mbr = read_mbr(&mut disk).unwrap();
    assert_eq!(mbr.entries[1], entry(1, 1001, 1_999_966, 0x07, false));
    assert!(mbr.entries[2].is_empty());
    assert!(mbr.entries[3].is_empty());
}

#[test]
fn test_second_run_is_synchronized() {
    let mut disk = esp_and_ntfs_disk();

    let mut console = ScriptedConsole::answering(true);
    sync_device(&mut disk, &mut console, &request(&[], true)).unwrap();

    let mut console = ScriptedConsole::answering(true);
    let outcome = sync_device(&mut disk, &mut console, &request(&[], true)).unwrap();
    assert_eq!(
        outcome,
        SyncOutcome::NothingToDo(NoopReason::AlreadySynchronized)
    );
    assert_eq!(console.prompts, 0);
    assert_eq!(disk.writes, vec![0]);
    assert!(console
        .output()
        .contains("Status: Tables are synchronized, no need to sync."));
}

#[test]
fn test_boot_code_is_preserved() {
    let mut disk = esp_and_ntfs_disk();
    let boot = disk.sector_mut(0);
    boot[..440].fill(0xFA);
    boot[440..444].copy_from_slice(&0x1234_5678u32.to_le_bytes());

    let mut console = ScriptedConsole::answering(true);
    sync_device(&mut disk, &mut console, &request(&[], true)).unwrap();

    let sector = disk.read_sector(0).unwrap();
    assert!(sector[..440].iter().all(|&b| b == 0xFA));
    assert_eq!(&sector[440..444], &0x1234_5678u32.to_le_bytes());
}

// ============================================================================
// Explicit selection
// ============================================================================

fn two_linux_disk() -> MemDisk {
    let mut disk = MemDisk::new(409_600);
    write_gpt(
        &mut disk,
        &[(LINUX_FS, 2048, 204_799), (LINUX_FS, 204_800, 409_599)],
    );
    disk.writes.clear();
    disk
}

#[test]
fn test_selection_active_with_type() {
    let mut disk = two_linux_disk();
    let mut console = ScriptedConsole::answering(true);

    sync_device(&mut disk, &mut console, &request(&["1+af"], true)).unwrap();

    let mbr = read_mbr(&mut disk).unwrap();
    assert_eq!(mbr.entries[0], entry(0, 1, 2047, 0xEE, false));
    assert_eq!(mbr.entries[1], entry(1, 2048, 204_799, 0xAF, true));
    assert_eq!(mbr.entries[2], entry(2, 204_800, 409_599, 0xEE, false));

    let sector = disk.read_sector(0).unwrap();
    assert_eq!(sector[446 + 16], 0x80);
    assert_eq!(sector[446 + 16 + 4], 0xAF);
}

#[test]
fn test_two_active_partitions_rejected() {
    let mut disk = two_linux_disk();
    let mut console = ScriptedConsole::answering(true);

    let err = sync_device(&mut disk, &mut console, &request(&["1+", "2+"], true)).unwrap_err();
    assert!(matches!(err, SyncError::MultipleActive));
    assert_eq!(console.prompts, 0);
    assert!(disk.writes.is_empty());
}

#[test]
fn test_selection_errors_leave_disk_alone() {
    let mut disk = two_linux_disk();

    let mut console = ScriptedConsole::answering(true);
    let err = sync_device(&mut disk, &mut console, &request(&["3"], true)).unwrap_err();
    assert!(matches!(err, SyncError::PartitionOutOfRange { max: 2, .. }));
    assert_eq!(
        err.to_string(),
        "invalid argument '3', partition number must be between 1-2"
    );

    let err = sync_device(&mut disk, &mut console, &request(&["2", "2-83"], true)).unwrap_err();
    assert!(matches!(err, SyncError::DuplicatePartition { partition: 2 }));

    let err = sync_device(&mut disk, &mut console, &request(&["1-xyz"], true)).unwrap_err();
    assert!(matches!(err, SyncError::InvalidHexType { .. }));

    let err = sync_device(&mut disk, &mut console, &request(&["1", "2", "1", "2"], true))
        .unwrap_err();
    assert!(matches!(err, SyncError::TooManySelections { count: 4 }));

    assert!(disk.writes.is_empty());
}

#[test]
fn test_user_declines() {
    let mut disk = two_linux_disk();
    let mut console = ScriptedConsole::answering(false);

    let outcome = sync_device(&mut disk, &mut console, &request(&[], true)).unwrap();
    assert_eq!(outcome, SyncOutcome::Declined);
    assert_eq!(console.prompts, 1);
    assert!(disk.writes.is_empty());
    assert!(console.output().contains("Proposed new MBR partition table:"));
}

#[test]
fn test_create_empty() {
    let mut disk = two_linux_disk();
    let mut console = ScriptedConsole::answering(true);
    let request = SyncRequest {
        partitions: vec![],
        options: ComposeOptions {
            create_empty: true,
            fill_unused: true,
        },
    };

    sync_device(&mut disk, &mut console, &request).unwrap();

    let mbr = read_mbr(&mut disk).unwrap();
    assert_eq!(mbr.entries[0], entry(0, 1, 409_599, 0xEE, false));
    assert!(mbr.entries[1..].iter().all(|e| e.is_empty()));
}

// ============================================================================
// Disks that must not be touched
// ============================================================================

#[test]
fn test_no_gpt_is_nothing_to_do() {
    let mut disk = MemDisk::new(100_000);
    let mut console = ScriptedConsole::answering(true);

    let outcome = sync_device(&mut disk, &mut console, &request(&[], true)).unwrap();
    assert_eq!(outcome, SyncOutcome::NothingToDo(NoopReason::NoGptPartitions));
    assert!(console
        .output()
        .contains("Status: No GPT partition table, no need to sync."));
}

#[test]
fn test_fatal_gpt_type() {
    let mut disk = MemDisk::new(100_000);
    write_gpt(&mut disk, &[(LINUX_FS, 2048, 4095), (LDM_DATA, 4096, 8191)]);
    disk.writes.clear();
    let mut console = ScriptedConsole::answering(true);

    let err = sync_device(&mut disk, &mut console, &request(&[], true)).unwrap_err();
    assert!(matches!(err, SyncError::FatalPartitionType { partition: 2, .. }));
    assert!(disk.writes.is_empty());
}

#[test]
fn test_extended_mbr_partition() {
    let mut disk = two_linux_disk();
    let mbr = disk.sector_mut(0);
    mbr[446 + 16 + 4] = 0x0F;
    mbr[446 + 16 + 8..446 + 16 + 12].copy_from_slice(&2048u32.to_le_bytes());
    mbr[446 + 16 + 12..446 + 16 + 16].copy_from_slice(&4096u32.to_le_bytes());
    let mut console = ScriptedConsole::answering(true);

    let err = sync_device(&mut disk, &mut console, &request(&[], true)).unwrap_err();
    assert!(matches!(
        err,
        SyncError::ExtendedPartition {
            slot: 2,
            mbr_type: 0x0F
        }
    ));
    assert!(disk.writes.is_empty());
}

// ============================================================================
// Device failures
// ============================================================================

#[test]
fn test_failed_write_is_io_error() {
    let mut disk = esp_and_ntfs_disk();
    let before = disk.read_sector(0).unwrap();
    disk.fail_writes = true;
    let mut console = ScriptedConsole::answering(true);

    let err = sync_device(&mut disk, &mut console, &request(&[], true)).unwrap_err();
    assert!(matches!(err, SyncError::Io(ref e) if e.kind() == io::ErrorKind::PermissionDenied));
    assert_eq!(console.prompts, 1);
    assert!(!console.output().contains("MBR updated successfully!"));
    assert_eq!(disk.read_sector(0).unwrap(), before);
}

#[test]
fn test_unknown_disk_size() {
    let mut disk = esp_and_ntfs_disk();
    disk.hide_size = true;
    let mut console = ScriptedConsole::answering(true);

    let err = sync_device(&mut disk, &mut console, &request(&[], true)).unwrap_err();
    assert!(matches!(err, SyncError::DiskSizeUnavailable));
    assert_eq!(console.prompts, 0);
    assert!(disk.writes.is_empty());
}

#[test]
fn test_entry_array_past_end_of_disk() {
    let mut disk = two_linux_disk();
    disk.sector_mut(1)[72..80].copy_from_slice(&(1u64 << 60).to_le_bytes());
    let mut console = ScriptedConsole::answering(true);

    let err = sync_device(&mut disk, &mut console, &request(&[], true)).unwrap_err();
    assert!(matches!(err, SyncError::InvalidGpt(_)));
    assert!(disk.writes.is_empty());
}

// ============================================================================
// Beyond 2 TiB
// ============================================================================

#[test]
fn test_large_disk_is_clamped_and_stable() {
    // 8 TiB disk, 6 TiB partition
    let mut disk = MemDisk::new(0x4_0000_0000);
    write_gpt(&mut disk, &[(LINUX_FS, 2048, 0x3_0000_0000)]);
    let mut console = ScriptedConsole::answering(true);

    let outcome = sync_device(&mut disk, &mut console, &request(&[], true)).unwrap();
    let SyncOutcome::Written { clamps } = outcome else {
        panic!("expected a write, got {outcome:?}");
    };
    assert!(clamps.contains(&LbaClamp {
        slot: 1,
        field: ClampedField::Size
    }));
    assert!(clamps.contains(&LbaClamp {
        slot: 2,
        field: ClampedField::StartLba
    }));

    let sector = disk.read_sector(0).unwrap();
    assert_eq!(&sector[446 + 16 + 12..446 + 16 + 16], &[0xFF; 4]);

    // Re-running compares against what the clamped fields read back as.
    let outcome = sync_device(&mut disk, &mut console, &request(&[], true)).unwrap();
    assert_eq!(
        outcome,
        SyncOutcome::NothingToDo(NoopReason::AlreadySynchronized)
    );
}

// ============================================================================
// File-backed device
// ============================================================================

#[test]
fn test_sync_image_file() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("disk.img");
    let file = std::fs::File::create(&path).unwrap();
    file.set_len(8192 * SECTOR_SIZE as u64).unwrap();
    drop(file);

    {
        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .unwrap();
        let mut image = DiskImage::new(file);
        write_gpt(&mut image, &[(LINUX_FS, 2048, 8191)]);
    }

    let mut opened = open_device(&path).unwrap();
    let mut terminal = Terminal::new(&b""[..], Vec::new(), true, false);
    let outcome = sync_device(&mut opened.disk, &mut terminal, &request(&[], true)).unwrap();
    assert!(matches!(outcome, SyncOutcome::Written { .. }));

    let output = String::from_utf8(terminal.into_output()).unwrap();
    assert!(output.contains("May I update the MBR as printed above? [y/N] Yes"));

    let mut reopened = open_device(&path).unwrap();
    let mbr = read_mbr(&mut reopened.disk).unwrap();
    assert_eq!(mbr.entries[0], entry(0, 1, 2047, 0xEE, false));
    assert_eq!(mbr.entries[1], entry(1, 2048, 8191, 0x83, false));
    assert!(mbr.entries[2].is_empty());
}
