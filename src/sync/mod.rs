//! The synchronization pipeline: validate, classify, compose, diff, confirm
//! and commit.

pub mod classify;
pub mod commit;
pub mod compose;
pub mod diff;
pub mod selection;
pub mod validate;

use log::debug;
use serde::Serialize;

use crate::console::Console;
use crate::device::BlockDevice;
use crate::error::SyncError;
use crate::fs::{FilesystemProbe, SignatureProbe};
use crate::partition::gpt::read_gpt;
use crate::partition::mbr::{read_mbr, LbaClamp};
use crate::partition::{format_size, Disk};

pub use classify::{classify, ClassifiedPartition};
pub use commit::commit;
pub use compose::{compose, ComposeOptions, HybridMbr};
pub use diff::{diff, render_table, SyncAction};
pub use selection::{parse_hex_type, parse_selections, PartitionSelection};
pub use validate::{check_gpt, check_mbr};

const CONFIRM_PROMPT: &str = "\nMay I update the MBR as printed above? [y/N] ";

/// What the caller asked for.
#[derive(Debug, Clone, Default)]
pub struct SyncRequest {
    /// Partition tokens (`<n>`, `<n>+`, `<n>-<hex>`, `<n>+<hex>`). Empty means
    /// pick partitions automatically.
    pub partitions: Vec<String>,
    pub options: ComposeOptions,
}

/// Why a run finished without writing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum NoopReason {
    NoGptPartitions,
    NoDataPartitions,
    AlreadySynchronized,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum SyncOutcome {
    NothingToDo(NoopReason),
    /// The user did not confirm the rewrite.
    Declined,
    Written { clamps: Vec<LbaClamp> },
}

/// Synchronize the MBR of `device` with its GPT, probing partition content
/// with [`SignatureProbe`].
pub fn sync_device<D, C>(
    device: &mut D,
    console: &mut C,
    request: &SyncRequest,
) -> Result<SyncOutcome, SyncError>
where
    D: BlockDevice,
    C: Console,
{
    run(device, console, &mut SignatureProbe::new(), request)
}

/// Run the whole pipeline. Nothing is written unless every check passes and
/// the console confirms; the MBR is then replaced with one sector write.
pub fn run<D, C, P>(
    device: &mut D,
    console: &mut C,
    probe: &mut P,
    request: &SyncRequest,
) -> Result<SyncOutcome, SyncError>
where
    D: BlockDevice,
    C: Console,
    P: FilesystemProbe,
{
    let gpt = read_gpt(device)?;
    let current = read_mbr(device)?;

    match check_gpt(&gpt) {
        Ok(()) => {}
        Err(e) if e.is_nothing_to_do() => {
            console.report(&format!("Status: {e}."));
            let reason = match e {
                SyncError::NoGptPartitions => NoopReason::NoGptPartitions,
                _ => NoopReason::NoDataPartitions,
            };
            return Ok(SyncOutcome::NothingToDo(reason));
        }
        Err(e) => return Err(e),
    }
    check_mbr(&current)?;

    let disk = Disk::from_device(device)?;
    debug!(
        "Disk: {} sectors ({}), {} GPT partitions",
        disk.block_count,
        format_size(disk.size_bytes()),
        gpt.len()
    );

    let selection = if request.partitions.is_empty() {
        None
    } else {
        Some(parse_selections(request.partitions.as_slice(), gpt.len())?)
    };

    let partitions = classify(&gpt, device, probe)?;
    let candidate = compose(
        &partitions,
        &current,
        &disk,
        selection.as_deref(),
        request.options,
    )?;

    if diff(&candidate, &current) == SyncAction::Nop {
        console.report("Status: Tables are synchronized, no need to sync.");
        return Ok(SyncOutcome::NothingToDo(NoopReason::AlreadySynchronized));
    }
    console.report("Status: MBR table must be updated.");
    console.show_table(&partitions, &candidate);

    if !console.confirm(CONFIRM_PROMPT)? {
        return Ok(SyncOutcome::Declined);
    }

    console.report("\nWriting new MBR...");
    let clamps = commit(device, &candidate)?;
    console.report("MBR updated successfully!");

    Ok(SyncOutcome::Written { clamps })
}
