use crate::error::SyncError;
use crate::partition::gpt::GptPartitionEntry;
use crate::partition::mbr::MbrTable;
use crate::partition::types::GptKind;

/// Check the GPT for consistency before anything is derived from it.
///
/// `NoGptPartitions` and `NoDataPartitions` mean there is nothing to mirror;
/// every other error means the disk must be left alone.
pub fn check_gpt(entries: &[GptPartitionEntry]) -> Result<(), SyncError> {
    if entries.is_empty() {
        return Err(SyncError::NoGptPartitions);
    }

    for (i, entry) in entries.iter().enumerate() {
        if entry.end_lba < entry.start_lba {
            return Err(SyncError::InvalidGptRange {
                partition: i + 1,
                start: entry.start_lba,
                end: entry.end_lba,
            });
        }
    }

    for (i, a) in entries.iter().enumerate() {
        for (k, b) in entries.iter().enumerate().skip(i + 1) {
            if a.start_lba <= b.end_lba && b.start_lba <= a.end_lba {
                return Err(SyncError::GptOverlap {
                    first: i + 1,
                    second: k + 1,
                });
            }
        }
    }

    if let Some((i, entry)) = entries
        .iter()
        .enumerate()
        .find(|(_, e)| e.parttype.kind == GptKind::Fatal)
    {
        return Err(SyncError::FatalPartitionType {
            partition: i + 1,
            name: entry.type_name(),
        });
    }

    let has_data = entries
        .iter()
        .any(|e| matches!(e.parttype.kind, GptKind::Data | GptKind::BasicData));
    if !has_data {
        return Err(SyncError::NoDataPartitions);
    }

    Ok(())
}

/// Refuse MBRs carrying extended partitions; their logical partitions would be
/// lost by a rewrite.
pub fn check_mbr(table: &MbrTable) -> Result<(), SyncError> {
    match table.used_entries().find(|e| e.is_extended()) {
        Some(entry) => Err(SyncError::ExtendedPartition {
            slot: entry.index + 1,
            mbr_type: entry.mbr_type,
        }),
        None => Ok(()),
    }
}
