use thiserror::Error;

/// Why a partition type override could not be read as a hex byte.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum HexTypeError {
    #[error("string is empty")]
    Empty,

    #[error("more than 2 hex digits")]
    TooLong,

    #[error("illegal hex digit '{0}'")]
    IllegalDigit(char),
}

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("can't retrieve disk size")]
    DiskSizeUnavailable,

    #[error("Invalid GPT: {0}")]
    InvalidGpt(String),

    #[error("No GPT partition table, no need to sync")]
    NoGptPartitions,

    #[error("GPT partition table is invalid: partition {partition} ends at LBA {end} before its start LBA {start}")]
    InvalidGptRange { partition: usize, start: u64, end: u64 },

    #[error("GPT partition table is invalid, partitions {first} and {second} overlap")]
    GptOverlap { first: usize, second: usize },

    #[error("GPT partition of type '{name}' found, will not touch this disk")]
    FatalPartitionType { partition: usize, name: &'static str },

    #[error("GPT partition table has no data partitions, no need to sync")]
    NoDataPartitions,

    #[error("Extended partition (type {mbr_type:#04x}) found in MBR slot {slot}, will not touch this disk")]
    ExtendedPartition { slot: usize, mbr_type: u8 },

    #[error("only 3 partitions can be in hybrid MBR, got {count}")]
    TooManySelections { count: usize },

    #[error("invalid argument '{token}', partition number must be between 1-{max}")]
    PartitionOutOfRange { token: String, max: usize },

    #[error("only one partition can be active")]
    MultipleActive,

    #[error("invalid hex type '{text}': {reason}")]
    InvalidHexType { text: String, reason: HexTypeError },

    #[error("partition {partition} was already added")]
    DuplicatePartition { partition: usize },
}

impl SyncError {
    /// Conditions where the disk is left alone because there is nothing to
    /// mirror, as opposed to a table we refuse to touch.
    pub fn is_nothing_to_do(&self) -> bool {
        matches!(self, SyncError::NoGptPartitions | SyncError::NoDataPartitions)
    }
}
