//! Filesystem signature detection used to pick MBR type bytes for GPT
//! partitions whose type GUID does not say what is inside.

pub mod signature;

use serde::Serialize;

use crate::device::BlockDevice;
use crate::error::SyncError;

pub use signature::{detect_filesystem, SignatureProbe};

/// A filesystem recognised at the start of a partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Detected {
    /// MBR type byte conventionally used for this filesystem.
    pub mbr_type: u8,
    pub name: &'static str,
}

/// Looks at the data of a partition to guess its MBR type.
pub trait FilesystemProbe {
    fn detect<D: BlockDevice>(
        &mut self,
        device: &mut D,
        start_lba: u64,
    ) -> Result<Option<Detected>, SyncError>;
}
