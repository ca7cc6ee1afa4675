//! Synchronize a legacy MBR with the GPT of the same disk, producing a hybrid
//! MBR that BIOS bootloaders can use.

pub mod console;
pub mod device;
pub mod error;
pub mod fs;
pub mod partition;
pub mod sync;

pub use error::SyncError;
pub use sync::{run, sync_device, SyncOutcome, SyncRequest};
