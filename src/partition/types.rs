use serde::Serialize;

use super::gpt::Guid;

/// How a GPT partition type affects synchronization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum GptKind {
    /// The disk uses a scheme we must not interfere with.
    Fatal,
    /// Regular data partition with a well-known MBR type.
    Data,
    /// Microsoft Basic Data: the MBR type depends on the filesystem inside.
    BasicData,
    /// ESP, reserved and boot areas. Ignored when looking for data.
    System,
}

/// Static description of a GPT partition type GUID.
#[derive(Debug, PartialEq, Eq, Serialize)]
pub struct GptPartitionType {
    pub guid: &'static str,
    pub name: &'static str,
    pub kind: GptKind,
    /// Default MBR type byte; 0 when there is none.
    pub mbr_type: u8,
}

const fn gpt_type(
    guid: &'static str,
    mbr_type: u8,
    name: &'static str,
    kind: GptKind,
) -> GptPartitionType {
    GptPartitionType {
        guid,
        name,
        kind,
        mbr_type,
    }
}

pub const EFI_SYSTEM_GUID: &str = "C12A7328-F81F-11D2-BA4B-00A0C93EC93B";
pub const BASIC_DATA_GUID: &str = "EBD0A0A2-B9E5-4433-87C0-68B6B72699C7";

static GPT_TYPES: &[GptPartitionType] = &[
    gpt_type(EFI_SYSTEM_GUID, 0xEF, "EFI System (FAT)", GptKind::System),
    gpt_type("024DEE41-33E7-11D3-9D69-0008C781F39F", 0x00, "MBR partition scheme", GptKind::Fatal),
    gpt_type("21686148-6449-6E6F-744E-656564454649", 0x00, "BIOS Boot", GptKind::System),
    gpt_type(BASIC_DATA_GUID, 0x00, "Basic Data", GptKind::BasicData),
    gpt_type("E3C9E316-0B5C-4DB8-817D-F92DF00215AE", 0x00, "MS Reserved", GptKind::System),
    gpt_type("5808C8AA-7E8F-42E0-85D2-E1E90434CFB3", 0x00, "MS LDM Metadata", GptKind::Fatal),
    gpt_type("AF9B60A0-1431-4F62-BC68-3311714A69AD", 0x00, "MS LDM Data", GptKind::Fatal),
    gpt_type("DE94BBA4-06D1-4D40-A16A-BFD50179D6AC", 0x27, "Windows Recovery", GptKind::Data),
    gpt_type("0FC63DAF-8483-4772-8E79-3D69D8477DE4", 0x83, "Linux Filesystem", GptKind::Data),
    gpt_type("4F68BCE3-E8CD-4DB1-96E7-FBCAF984B709", 0x83, "Linux Root (x86-64)", GptKind::Data),
    gpt_type("933AC7E1-2EB4-4F13-B844-0E14E2AEF915", 0x83, "Linux Home", GptKind::Data),
    gpt_type("0657FD6D-A4AB-43C4-84E5-0933C84B4F4F", 0x82, "Linux Swap", GptKind::Data),
    gpt_type("E6D6D379-F507-44C2-A23C-238F2A3DF928", 0x8E, "Linux LVM", GptKind::Data),
    gpt_type("A19D880F-05FC-4D3B-A006-743F0F84911E", 0xFD, "Linux RAID", GptKind::Data),
    gpt_type("8DA63339-0007-60C0-C436-083AC8230908", 0x00, "Linux Reserved", GptKind::System),
    gpt_type("48465300-0000-11AA-AA11-00306543ECAC", 0xAF, "Mac OS X HFS+", GptKind::Data),
    gpt_type("7C3457EF-0000-11AA-AA11-00306543ECAC", 0xAF, "Apple APFS", GptKind::Data),
    gpt_type("55465300-0000-11AA-AA11-00306543ECAC", 0xA8, "Mac OS X UFS", GptKind::Data),
    gpt_type("52414944-0000-11AA-AA11-00306543ECAC", 0xAC, "Mac OS X RAID", GptKind::Data),
    gpt_type("52414944-5F4F-11AA-AA11-00306543ECAC", 0xAC, "Mac OS X RAID, offline", GptKind::Data),
    gpt_type("426F6F74-0000-11AA-AA11-00306543ECAC", 0xAB, "Mac OS X Boot", GptKind::System),
    gpt_type("4C616265-6C00-11AA-AA11-00306543ECAC", 0x00, "Mac OS X Label", GptKind::System),
    gpt_type("5265636F-7665-11AA-AA11-00306543ECAC", 0x00, "Apple TV Recovery", GptKind::System),
    gpt_type("6A898CC3-1DD2-11B2-99A6-080020736631", 0xBF, "Solaris/ZFS", GptKind::Data),
    gpt_type("516E7CB4-6ECF-11D6-8FF8-00022D09712B", 0xA5, "FreeBSD Data", GptKind::Data),
    gpt_type("516E7CB5-6ECF-11D6-8FF8-00022D09712B", 0xA5, "FreeBSD Swap", GptKind::Data),
    gpt_type("516E7CB6-6ECF-11D6-8FF8-00022D09712B", 0xA5, "FreeBSD UFS", GptKind::Data),
    gpt_type("516E7CBA-6ECF-11D6-8FF8-00022D09712B", 0xA5, "FreeBSD ZFS", GptKind::Data),
    gpt_type("83BD6B9D-7F41-11DC-BE0B-001560B84F0F", 0x00, "FreeBSD Boot", GptKind::System),
];

/// Descriptor used for GUIDs missing from the table. Unknown content means we
/// cannot tell what a rewritten MBR would break, so the disk is left alone.
static UNKNOWN_TYPE: GptPartitionType =
    gpt_type("", 0x00, "Unknown", GptKind::Fatal);

/// Look up the partition type descriptor for a GPT type GUID.
pub fn gpt_partition_type(guid: &Guid) -> &'static GptPartitionType {
    let formatted = guid.to_string_formatted();
    GPT_TYPES
        .iter()
        .find(|t| t.guid == formatted)
        .unwrap_or(&UNKNOWN_TYPE)
}

/// Recognised MBR partition type codes, in ascending order.
pub static MBR_TYPES: &[(u8, &str)] = &[
    (0x01, "FAT12 (CHS)"),
    (0x04, "FAT16 <32M (CHS)"),
    (0x05, "Extended (CHS)"),
    (0x06, "FAT16 (CHS)"),
    (0x07, "NTFS/HPFS/exFAT"),
    (0x0B, "FAT32 (CHS)"),
    (0x0C, "FAT32 (LBA)"),
    (0x0E, "FAT16 (LBA)"),
    (0x0F, "Extended (LBA)"),
    (0x11, "Hidden FAT12 (CHS)"),
    (0x14, "Hidden FAT16 <32M (CHS)"),
    (0x16, "Hidden FAT16 (CHS)"),
    (0x17, "Hidden NTFS/HPFS"),
    (0x1B, "Hidden FAT32 (CHS)"),
    (0x1C, "Hidden FAT32 (LBA)"),
    (0x1E, "Hidden FAT16 (LBA)"),
    (0x27, "Windows RE"),
    (0x42, "Dynamic Disk"),
    (0x82, "Linux swap / Solaris"),
    (0x83, "Linux"),
    (0x85, "Linux Extended"),
    (0x86, "NTFS Volume Set"),
    (0x87, "NTFS Volume Set"),
    (0x8E, "Linux LVM"),
    (0xA5, "FreeBSD"),
    (0xA6, "OpenBSD"),
    (0xA8, "Mac OS X UFS"),
    (0xA9, "NetBSD"),
    (0xAB, "Mac OS X Boot"),
    (0xAC, "Mac OS X RAID"),
    (0xAF, "Mac OS X HFS+"),
    (0xBF, "Solaris"),
    (0xC0, "Unassigned (fallback)"),
    (0xEB, "BeOS"),
    (0xEE, "EFI Protective"),
    (0xEF, "EFI System (FAT)"),
    (0xFD, "Linux RAID"),
];

pub fn mbr_type_name(mbr_type: u8) -> &'static str {
    match mbr_type {
        0x00 => "Empty",
        _ => MBR_TYPES
            .iter()
            .find(|(code, _)| *code == mbr_type)
            .map(|(_, name)| *name)
            .unwrap_or("Unknown"),
    }
}
