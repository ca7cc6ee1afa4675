use std::str::FromStr;

use byteorder::{ByteOrder, LittleEndian};
use log::debug;
use serde::Serialize;

use super::types::{gpt_partition_type, GptPartitionType};
use super::Disk;
use crate::device::{BlockDevice, SECTOR_SIZE};
use crate::error::SyncError;

const GPT_SIGNATURE: u64 = 0x5452415020494645; // "EFI PART"
const GPT_HEADER_LBA: u64 = 1;
const GPT_HEADER_MIN_SIZE: u32 = 92;
const GPT_ENTRY_MIN_SIZE: u32 = 128;
/// Upper bound on the entry array we are willing to read (the usual array is
/// 128 entries of 128 bytes).
const GPT_ENTRY_ARRAY_MAX_BYTES: u64 = 1024 * 1024;

/// A 128-bit GUID stored as raw on-disk bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Guid([u8; 16]);

impl Guid {
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 16]
    }

    /// Format as standard GUID string (first three groups stored little-endian).
    pub fn to_string_formatted(&self) -> String {
        let d = &self.0;
        format!(
            "{:02X}{:02X}{:02X}{:02X}-{:02X}{:02X}-{:02X}{:02X}-{:02X}{:02X}-{:02X}{:02X}{:02X}{:02X}{:02X}{:02X}",
            d[3], d[2], d[1], d[0], // time_low (LE)
            d[5], d[4],             // time_mid (LE)
            d[7], d[6],             // time_hi (LE)
            d[8], d[9],             // clock_seq (BE)
            d[10], d[11], d[12], d[13], d[14], d[15] // node (BE)
        )
    }
}

impl FromStr for Guid {
    type Err = SyncError;

    /// Parse the textual `XXXXXXXX-XXXX-XXXX-XXXX-XXXXXXXXXXXX` form.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || SyncError::InvalidGpt(format!("malformed GUID '{s}'"));

        let groups: Vec<&str> = s.split('-').collect();
        if groups.len() != 5
            || groups
                .iter()
                .zip([8, 4, 4, 4, 12])
                .any(|(g, len)| g.len() != len)
        {
            return Err(invalid());
        }

        let hex: String = groups.concat();
        let mut text = [0u8; 16];
        for (i, byte) in text.iter_mut().enumerate() {
            *byte = u8::from_str_radix(hex.get(i * 2..i * 2 + 2).ok_or_else(invalid)?, 16)
                .map_err(|_| invalid())?;
        }

        // First three groups are little-endian on disk.
        let mut d = [0u8; 16];
        d[..4].copy_from_slice(&[text[3], text[2], text[1], text[0]]);
        d[4..6].copy_from_slice(&[text[5], text[4]]);
        d[6..8].copy_from_slice(&[text[7], text[6]]);
        d[8..].copy_from_slice(&text[8..]);
        Ok(Self(d))
    }
}

impl Serialize for Guid {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string_formatted())
    }
}

/// The GPT header fields needed to locate the entry array.
#[derive(Debug, Clone)]
struct GptHeader {
    partition_entry_lba: u64,
    num_partition_entries: u32,
    partition_entry_size: u32,
}

impl GptHeader {
    /// Parse the header sector. Returns `Ok(None)` when it carries no GPT
    /// signature.
    fn parse(data: &[u8]) -> Result<Option<Self>, SyncError> {
        if LittleEndian::read_u64(&data[0..8]) != GPT_SIGNATURE {
            return Ok(None);
        }

        let header_size = LittleEndian::read_u32(&data[12..16]);
        if header_size < GPT_HEADER_MIN_SIZE {
            return Err(SyncError::InvalidGpt(format!(
                "header size {header_size} is smaller than {GPT_HEADER_MIN_SIZE} bytes"
            )));
        }

        let header = GptHeader {
            partition_entry_lba: LittleEndian::read_u64(&data[72..80]),
            num_partition_entries: LittleEndian::read_u32(&data[80..84]),
            partition_entry_size: LittleEndian::read_u32(&data[84..88]),
        };
        if header.partition_entry_size < GPT_ENTRY_MIN_SIZE
            || header.partition_entry_size % 8 != 0
        {
            return Err(SyncError::InvalidGpt(format!(
                "unsupported partition entry size {}",
                header.partition_entry_size
            )));
        }
        let array_bytes = header.array_bytes();
        if array_bytes > GPT_ENTRY_ARRAY_MAX_BYTES {
            return Err(SyncError::InvalidGpt(format!(
                "partition entry array of {array_bytes} bytes is too large"
            )));
        }

        Ok(Some(header))
    }

    fn array_bytes(&self) -> u64 {
        self.num_partition_entries as u64 * self.partition_entry_size as u64
    }

    /// Sectors covered by the entry array, checked against the disk size.
    fn array_sectors(&self, block_count: u64) -> Result<std::ops::Range<u64>, SyncError> {
        let count = self.array_bytes().div_ceil(SECTOR_SIZE as u64);
        match self.partition_entry_lba.checked_add(count) {
            Some(end) if self.partition_entry_lba > GPT_HEADER_LBA && end <= block_count => {
                Ok(self.partition_entry_lba..end)
            }
            _ => Err(SyncError::InvalidGpt(format!(
                "partition entry array at LBA {} ({count} sectors) lies outside the disk of {block_count} sectors",
                self.partition_entry_lba
            ))),
        }
    }
}

/// A single used GPT partition entry. LBAs are inclusive.
#[derive(Debug, Clone, Serialize)]
pub struct GptPartitionEntry {
    pub type_guid: Guid,
    pub unique_guid: Guid,
    pub start_lba: u64,
    pub end_lba: u64,
    pub attributes: u64,
    pub name: String,
    #[serde(rename = "type")]
    pub parttype: &'static GptPartitionType,
}

impl GptPartitionEntry {
    /// Build an entry from its type GUID and range, resolving the type descriptor.
    pub fn new(type_guid: Guid, start_lba: u64, end_lba: u64) -> Self {
        Self {
            type_guid,
            unique_guid: Guid([0u8; 16]),
            start_lba,
            end_lba,
            attributes: 0,
            name: String::new(),
            parttype: gpt_partition_type(&type_guid),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.type_guid.is_zero()
    }

    pub fn type_name(&self) -> &'static str {
        self.parttype.name
    }
}

/// Read the used GPT entries in on-disk order. A disk without a GPT yields
/// an empty list.
pub fn read_gpt(device: &mut impl BlockDevice) -> Result<Vec<GptPartitionEntry>, SyncError> {
    let sector = device.read_sector(GPT_HEADER_LBA)?;
    let Some(header) = GptHeader::parse(&sector)? else {
        return Ok(Vec::new());
    };

    let disk = Disk::from_device(device)?;
    let sectors = header.array_sectors(disk.block_count)?;
    let mut array = Vec::with_capacity((sectors.end - sectors.start) as usize * SECTOR_SIZE);
    for lba in sectors {
        array.extend_from_slice(&device.read_sector(lba)?);
    }

    let entries: Vec<GptPartitionEntry> = array[..header.array_bytes() as usize]
        .chunks_exact(header.partition_entry_size as usize)
        .map(parse_one_entry)
        .filter(|entry| !entry.is_empty())
        .collect();

    debug!(
        "GPT: {} used entries out of {}",
        entries.len(),
        header.num_partition_entries
    );
    Ok(entries)
}

fn parse_one_entry(data: &[u8]) -> GptPartitionEntry {
    let type_guid = read_guid(&data[0..16]);
    GptPartitionEntry {
        type_guid,
        unique_guid: read_guid(&data[16..32]),
        start_lba: LittleEndian::read_u64(&data[32..40]),
        end_lba: LittleEndian::read_u64(&data[40..48]),
        attributes: LittleEndian::read_u64(&data[48..56]),
        // Name is UTF-16LE, up to 72 bytes (36 UTF-16 code units)
        name: parse_utf16le_name(&data[56..128]),
        parttype: gpt_partition_type(&type_guid),
    }
}

fn read_guid(data: &[u8]) -> Guid {
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&data[..16]);
    Guid(bytes)
}

fn parse_utf16le_name(bytes: &[u8]) -> String {
    let u16s: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .take_while(|&c| c != 0)
        .collect();
    String::from_utf16_lossy(&u16s)
}
