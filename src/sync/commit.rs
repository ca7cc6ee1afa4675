use log::info;

use super::compose::HybridMbr;
use crate::device::{BlockDevice, Sector};
use crate::error::SyncError;
use crate::partition::mbr::{
    LbaClamp, MbrPartitionEntry, MBR_SIGNATURE, MBR_SLOTS, PARTITION_ENTRY_SIZE,
    PARTITION_TABLE_OFFSET,
};

/// Replace the partition table of a boot sector with `table`.
///
/// Boot code and disk signature are left untouched. Only the first active
/// entry gets the boot flag. Returns the LBA fields that had to be clamped.
pub fn write_partition_table(sector: &mut Sector, table: &HybridMbr) -> Vec<LbaClamp> {
    let mut clamps = Vec::new();
    let mut boot_flag_free = true;

    for slot in 0..MBR_SLOTS {
        let offset = PARTITION_TABLE_OFFSET + slot * PARTITION_ENTRY_SIZE;
        let record = &mut sector[offset..offset + PARTITION_ENTRY_SIZE];
        let entry = table
            .entries
            .iter()
            .find(|e| e.index == slot)
            .copied()
            .unwrap_or_else(|| MbrPartitionEntry::empty(slot));

        let bootable = entry.active && boot_flag_free;
        if bootable {
            boot_flag_free = false;
        }
        clamps.extend(entry.encode(bootable, record));
    }

    sector[510..512].copy_from_slice(&MBR_SIGNATURE.to_le_bytes());
    clamps
}

/// Write `table` to sector 0 with a single sector write.
pub fn commit(device: &mut impl BlockDevice, table: &HybridMbr) -> Result<Vec<LbaClamp>, SyncError> {
    let mut sector = device.read_sector(0)?;
    let clamps = write_partition_table(&mut sector, table);
    device.write_sector(0, &sector)?;
    info!("MBR updated with {} entries", table.entries.len());
    Ok(clamps)
}
