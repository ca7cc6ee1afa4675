use std::fmt::Write as _;

use super::compose::HybridMbr;
use crate::partition::mbr::{MbrTable, MBR_SLOTS};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncAction {
    /// The MBR already matches the candidate.
    Nop,
    Rewrite,
}

/// Compare the candidate with the current MBR, slot by slot.
///
/// The candidate is compared in the form it would have once written, so a
/// table clamped at 2 TiB is not rewritten on every run.
pub fn diff(candidate: &HybridMbr, current: &MbrTable) -> SyncAction {
    let differs = (0..MBR_SLOTS).any(|i| candidate.slot(i).as_stored() != current.entries[i]);
    if differs {
        SyncAction::Rewrite
    } else {
        SyncAction::Nop
    }
}

/// Human-readable preview of the candidate table.
pub fn render_table(table: &HybridMbr) -> String {
    let mut out = String::from(" # A    Start LBA      End LBA  Type\n");
    for entry in &table.entries {
        let _ = writeln!(
            out,
            " {} {} {:>12} {:>12}  {:02x}  {}",
            entry.index + 1,
            if entry.active { "*" } else { " " },
            entry.start_lba,
            entry.end_lba,
            entry.mbr_type,
            entry.type_name()
        );
    }
    out
}
