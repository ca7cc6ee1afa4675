use log::debug;
use serde::Serialize;

use crate::device::BlockDevice;
use crate::error::SyncError;
use crate::fs::{Detected, FilesystemProbe};
use crate::partition::gpt::GptPartitionEntry;
use crate::partition::mbr::TYPE_EFI_SYSTEM;
use crate::partition::types::GptKind;

/// Used for Basic Data partitions whose content could not be identified.
pub const BASIC_DATA_FALLBACK: u8 = 0x0B;
/// Used for a second "ESP" with unrecognised content.
pub const EXTRA_ESP_FALLBACK: u8 = 0x83;

/// A GPT entry together with the MBR type chosen for it.
#[derive(Debug, Clone, Serialize)]
pub struct ClassifiedPartition<'a> {
    pub entry: &'a GptPartitionEntry,
    /// Resolved MBR type byte. 0 means undetermined; the composer applies the
    /// final fallback.
    pub mbr_type: u8,
    pub detected: Option<Detected>,
}

fn is_fat(mbr_type: u8) -> bool {
    matches!(mbr_type, 0x01 | 0x0E | 0x0C)
}

/// Resolve the MBR type of every GPT entry, in GPT order.
///
/// Basic Data partitions are typed by the filesystem they contain. Partitions
/// labelled as ESP are probed too, since partitioning tools are known to put
/// the ESP type on arbitrary partitions; only the first FAT-formatted one
/// keeps 0xEF.
pub fn classify<'a, D, P>(
    entries: &'a [GptPartitionEntry],
    device: &mut D,
    probe: &mut P,
) -> Result<Vec<ClassifiedPartition<'a>>, SyncError>
where
    D: BlockDevice,
    P: FilesystemProbe,
{
    let mut have_esp = false;
    let mut classified = Vec::with_capacity(entries.len());

    for (i, entry) in entries.iter().enumerate() {
        let parttype = entry.parttype;
        let mut mbr_type = parttype.mbr_type;
        let mut detected = None;

        if parttype.kind == GptKind::BasicData {
            detected = probe.detect(device, entry.start_lba)?;
            mbr_type = detected.map_or(BASIC_DATA_FALLBACK, |d| d.mbr_type);
        } else if mbr_type == TYPE_EFI_SYSTEM {
            detected = probe.detect(device, entry.start_lba)?;
            match detected {
                Some(fs) if is_fat(fs.mbr_type) && !have_esp => {}
                Some(fs) => mbr_type = fs.mbr_type,
                None if have_esp => mbr_type = EXTRA_ESP_FALLBACK,
                None => {}
            }
        }

        if mbr_type == TYPE_EFI_SYSTEM {
            have_esp = true;
        }

        debug!(
            "GPT partition {}: {} ({}..{}), filesystem {}, MBR type {:02x}",
            i + 1,
            parttype.name,
            entry.start_lba,
            entry.end_lba,
            detected.map_or("-", |d| d.name),
            mbr_type
        );

        classified.push(ClassifiedPartition {
            entry,
            mbr_type,
            detected,
        });
    }

    Ok(classified)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DiskImage;
    use crate::fs::signature::{EXT, FAT16, FAT32, NTFS};
    use crate::partition::gpt::Guid;
    use crate::partition::types::{BASIC_DATA_GUID, EFI_SYSTEM_GUID};
    use std::collections::HashMap;
    use std::io::Cursor;

    const LINUX_FS: &str = "0FC63DAF-8483-4772-8E79-3D69D8477DE4";
    const APPLE_BOOT: &str = "426F6F74-0000-11AA-AA11-00306543ECAC";
    const LINUX_RESERVED: &str = "8DA63339-0007-60C0-C436-083AC8230908";

    /// Probe answering from a table keyed by start LBA.
    #[derive(Default)]
    struct FakeProbe {
        found: HashMap<u64, Detected>,
        calls: Vec<u64>,
    }

    impl FakeProbe {
        fn with(found: &[(u64, Detected)]) -> Self {
            Self {
                found: found.iter().copied().collect(),
                calls: Vec::new(),
            }
        }
    }

    impl FilesystemProbe for FakeProbe {
        fn detect<D: BlockDevice>(
            &mut self,
            _device: &mut D,
            start_lba: u64,
        ) -> Result<Option<Detected>, SyncError> {
            self.calls.push(start_lba);
            Ok(self.found.get(&start_lba).copied())
        }
    }

    fn entry(guid: &str, start: u64, end: u64) -> GptPartitionEntry {
        GptPartitionEntry::new(guid.parse::<Guid>().unwrap(), start, end)
    }

    fn types(entries: &[GptPartitionEntry], probe: &mut FakeProbe) -> Vec<u8> {
        let mut disk = DiskImage::new(Cursor::new(vec![0u8; 512]));
        classify(entries, &mut disk, probe)
            .unwrap()
            .iter()
            .map(|c| c.mbr_type)
            .collect()
    }

    #[test]
    fn test_basic_data_uses_detection() {
        let entries = vec![
            entry(BASIC_DATA_GUID, 100, 199),
            entry(BASIC_DATA_GUID, 200, 299),
        ];
        let mut probe = FakeProbe::with(&[(100, NTFS)]);
        assert_eq!(types(&entries, &mut probe), vec![0x07, BASIC_DATA_FALLBACK]);
        assert_eq!(probe.calls, vec![100, 200]);
    }

    #[test]
    fn test_data_types_are_not_probed() {
        let entries = vec![entry(LINUX_FS, 100, 199)];
        let mut probe = FakeProbe::with(&[(100, NTFS)]);
        assert_eq!(types(&entries, &mut probe), vec![0x83]);
        assert!(probe.calls.is_empty());
    }

    #[test]
    fn test_first_fat_esp_is_kept() {
        let entries = vec![
            entry(EFI_SYSTEM_GUID, 34, 1000),
            entry(EFI_SYSTEM_GUID, 1001, 2000),
        ];
        // The second ESP is FAT as well: it must not become another 0xEF.
        let mut probe = FakeProbe::with(&[(34, FAT32), (1001, FAT16)]);
        assert_eq!(types(&entries, &mut probe), vec![0xEF, 0x0E]);
    }

    #[test]
    fn test_mislabelled_esp_adopts_detected_type() {
        let entries = vec![entry(EFI_SYSTEM_GUID, 34, 1000)];
        let mut probe = FakeProbe::with(&[(34, EXT)]);
        assert_eq!(types(&entries, &mut probe), vec![0x83]);
    }

    #[test]
    fn test_unrecognised_esp() {
        let entries = vec![
            entry(EFI_SYSTEM_GUID, 34, 1000),
            entry(EFI_SYSTEM_GUID, 1001, 2000),
        ];
        // Nothing detected: the first stays an ESP, the second falls back to Linux.
        let mut probe = FakeProbe::default();
        assert_eq!(
            types(&entries, &mut probe),
            vec![TYPE_EFI_SYSTEM, EXTRA_ESP_FALLBACK]
        );
    }

    #[test]
    fn test_type_without_mbr_equivalent_stays_undetermined() {
        let entries = vec![
            entry(APPLE_BOOT, 34, 1000),
            entry(LINUX_RESERVED, 1001, 2000),
        ];
        let mut probe = FakeProbe::default();
        assert_eq!(types(&entries, &mut probe), vec![0xAB, 0x00]);
    }
}
