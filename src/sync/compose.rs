use log::warn;
use serde::Serialize;

use super::classify::ClassifiedPartition;
use super::selection::{PartitionSelection, MAX_SELECTIONS};
use crate::error::SyncError;
use crate::partition::mbr::{
    LbaClamp, MbrPartitionEntry, MbrTable, MBR_SLOTS, TYPE_EFI_SYSTEM, TYPE_EMPTY,
};
use crate::partition::Disk;

/// Type given to a mirrored partition when nothing better is known.
pub const FALLBACK_TYPE: u8 = 0xC0;

/// How the candidate table is built.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ComposeOptions {
    /// Produce a table holding only the protective entry.
    pub create_empty: bool,
    /// Cover the space after the last mirrored partition with a second
    /// protective entry.
    pub fill_unused: bool,
}

/// A candidate MBR: slot 0 is always protective, indices run from 0 without
/// gaps and no entry has type 0.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HybridMbr {
    pub entries: Vec<MbrPartitionEntry>,
}

impl HybridMbr {
    /// The entry for `index`, or an empty slot past the populated ones.
    pub fn slot(&self, index: usize) -> MbrPartitionEntry {
        self.entries
            .get(index)
            .copied()
            .unwrap_or_else(|| MbrPartitionEntry::empty(index))
    }

    /// Fields that will not fit the 32-bit on-disk format.
    pub fn lba_clamps(&self) -> Vec<LbaClamp> {
        self.entries
            .iter()
            .flat_map(|e| e.lba_fields().clamped)
            .collect()
    }
}

/// Build the candidate hybrid MBR.
///
/// With a selection the chosen partitions are mirrored in the given order;
/// without one the first GPT partitions are used, leaving out a leading ESP.
/// Slot 0 protects everything before the first mirrored partition.
pub fn compose(
    partitions: &[ClassifiedPartition<'_>],
    current: &MbrTable,
    disk: &Disk,
    selection: Option<&[PartitionSelection]>,
    options: ComposeOptions,
) -> Result<HybridMbr, SyncError> {
    let mut mirrored: Vec<MbrPartitionEntry> = Vec::with_capacity(MAX_SELECTIONS);

    match selection {
        _ if options.create_empty => {}
        Some(selection) if !selection.is_empty() => {
            // Tokens are range-checked by `parse_selections`.
            let chosen_parts = selection
                .iter()
                .filter_map(|chosen| Some((chosen, partitions.get(chosen.gpt_index()?)?)))
                .take(MAX_SELECTIONS);
            for (chosen, part) in chosen_parts {
                let already_added = mirrored.iter().any(|e| {
                    e.start_lba == part.entry.start_lba || e.end_lba == part.entry.end_lba
                });
                if already_added {
                    return Err(SyncError::DuplicatePartition {
                        partition: chosen.number,
                    });
                }
                let index = mirrored.len() + 1;
                mirrored.push(mirror(index, part, chosen.type_override, chosen.active, current));
            }
        }
        _ => {
            let skip_esp = partitions
                .first()
                .is_some_and(|p| p.mbr_type == TYPE_EFI_SYSTEM);
            for part in partitions.iter().skip(usize::from(skip_esp)).take(MAX_SELECTIONS) {
                let index = mirrored.len() + 1;
                mirrored.push(mirror(index, part, None, false, current));
            }
        }
    }

    let last_lba = disk.last_lba();
    let min_start = mirrored.iter().map(|e| e.start_lba).min();
    let max_end = mirrored.iter().map(|e| e.end_lba).max();
    let (min_start, max_end) = match (min_start, max_end) {
        (Some(min), Some(max)) => (min, max),
        // Nothing mirrored: the whole disk is protective.
        _ => (last_lba + 1, last_lba + 1),
    };

    let mut entries = Vec::with_capacity(MBR_SLOTS);
    entries.push(MbrPartitionEntry::protective(0, 1, min_start.saturating_sub(1)));
    entries.extend(mirrored);
    if options.fill_unused && entries.len() < MBR_SLOTS && max_end < last_lba {
        entries.push(MbrPartitionEntry::protective(entries.len(), max_end + 1, last_lba));
    }

    let hybrid = HybridMbr { entries };
    for clamp in hybrid.lba_clamps() {
        warn!("{clamp}");
    }
    Ok(hybrid)
}

/// MBR entry mirroring one GPT partition. Type priority: explicit override,
/// classified type, type of the current MBR slot starting at the same LBA,
/// then [`FALLBACK_TYPE`].
fn mirror(
    index: usize,
    part: &ClassifiedPartition<'_>,
    type_override: Option<u8>,
    active: bool,
    current: &MbrTable,
) -> MbrPartitionEntry {
    let known = |t: &u8| *t != TYPE_EMPTY;
    let mbr_type = type_override
        .filter(known)
        .or(Some(part.mbr_type).filter(known))
        .or_else(|| {
            current
                .used_entries()
                .find(|e| e.start_lba == part.entry.start_lba)
                .map(|e| e.mbr_type)
        })
        .unwrap_or(FALLBACK_TYPE);

    MbrPartitionEntry {
        index,
        start_lba: part.entry.start_lba,
        end_lba: part.entry.end_lba,
        mbr_type,
        active,
    }
}
