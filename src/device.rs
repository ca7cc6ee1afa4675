use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use anyhow::{bail, Context, Result};
use log::warn;

use crate::error::SyncError;

pub const SECTOR_SIZE: usize = 512;

/// One raw 512-byte sector.
pub type Sector = [u8; SECTOR_SIZE];

/// Sector-granular access to the device being synchronized.
///
/// The caller is expected to hold exclusive access for the duration of a run;
/// nothing here guards against concurrent writers.
pub trait BlockDevice {
    fn read_sector(&mut self, lba: u64) -> Result<Sector, SyncError>;

    fn write_sector(&mut self, lba: u64, data: &Sector) -> Result<(), SyncError>;

    /// Total number of addressable 512-byte sectors.
    fn block_count(&mut self) -> Result<u64, SyncError>;
}

/// A disk image or raw device reached through `Read + Write + Seek`.
pub struct DiskImage<F> {
    inner: F,
}

impl<F> DiskImage<F> {
    pub fn new(inner: F) -> Self {
        Self { inner }
    }

    pub fn into_inner(self) -> F {
        self.inner
    }
}

/// Byte offset of a sector, or an error when it does not fit in 64 bits.
fn sector_offset(lba: u64) -> std::io::Result<u64> {
    lba.checked_mul(SECTOR_SIZE as u64).ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("LBA {lba} is out of range"),
        )
    })
}

impl<F: Read + Write + Seek> BlockDevice for DiskImage<F> {
    fn read_sector(&mut self, lba: u64) -> Result<Sector, SyncError> {
        let mut sector = [0u8; SECTOR_SIZE];
        self.inner.seek(SeekFrom::Start(sector_offset(lba)?))?;
        self.inner.read_exact(&mut sector)?;
        Ok(sector)
    }

    fn write_sector(&mut self, lba: u64, data: &Sector) -> Result<(), SyncError> {
        self.inner.seek(SeekFrom::Start(sector_offset(lba)?))?;
        self.inner.write_all(data)?;
        self.inner.flush()?;
        Ok(())
    }

    fn block_count(&mut self) -> Result<u64, SyncError> {
        // Seeking to the end works for both image files and block devices.
        let bytes = self.inner.seek(SeekFrom::End(0))?;
        match bytes / SECTOR_SIZE as u64 {
            0 => Err(SyncError::DiskSizeUnavailable),
            count => Ok(count),
        }
    }
}

/// A device opened by [`open_device`].
pub struct OpenedDevice {
    pub disk: DiskImage<File>,
    /// The device was busy and could only be opened read-only; any write
    /// attempt will fail.
    pub read_only: bool,
}

/// Open a disk image or block device for synchronization.
///
/// Directories, FIFOs, sockets and terminals are refused. Block devices are
/// opened exclusively where the platform supports it; if the device is busy
/// (e.g. mounted) it is reopened read-only with a warning.
pub fn open_device(path: &Path) -> Result<OpenedDevice> {
    let metadata =
        std::fs::metadata(path).with_context(|| format!("can't stat {}", path.display()))?;
    let kind = DeviceKind::from_file_type(&metadata.file_type());
    if let DeviceKind::Unsupported(reason) = kind {
        bail!("{}: {reason}", path.display());
    }

    let opened = match open_read_write(path, kind) {
        Ok(file) => OpenedDevice {
            disk: DiskImage::new(file),
            read_only: false,
        },
        Err(e) if is_busy(&e) => {
            let file = File::open(path)
                .with_context(|| format!("can't open {}", path.display()))?;
            warn!("{} opened read-only", path.display());
            OpenedDevice {
                disk: DiskImage::new(file),
                read_only: true,
            }
        }
        Err(e) => {
            return Err(e).with_context(|| format!("can't open {}", path.display()));
        }
    };

    if kind == DeviceKind::CharDevice {
        use std::io::IsTerminal;
        if opened.disk.inner.is_terminal() {
            bail!("{}: Is a TTY device", path.display());
        }
    }

    Ok(opened)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DeviceKind {
    Regular,
    BlockDevice,
    CharDevice,
    Unsupported(&'static str),
}

impl DeviceKind {
    #[cfg(unix)]
    fn from_file_type(file_type: &std::fs::FileType) -> Self {
        use std::os::unix::fs::FileTypeExt;

        if file_type.is_file() {
            DeviceKind::Regular
        } else if file_type.is_block_device() {
            DeviceKind::BlockDevice
        } else if file_type.is_char_device() {
            DeviceKind::CharDevice
        } else if file_type.is_dir() {
            DeviceKind::Unsupported("Is a directory")
        } else if file_type.is_fifo() {
            DeviceKind::Unsupported("Is a FIFO")
        } else if file_type.is_socket() {
            DeviceKind::Unsupported("Is a socket")
        } else {
            DeviceKind::Unsupported("Is an unknown kind of special file")
        }
    }

    #[cfg(not(unix))]
    fn from_file_type(file_type: &std::fs::FileType) -> Self {
        if file_type.is_dir() {
            DeviceKind::Unsupported("Is a directory")
        } else {
            DeviceKind::Regular
        }
    }
}

fn open_read_write(path: &Path, kind: DeviceKind) -> std::io::Result<File> {
    let mut options = OpenOptions::new();
    options.read(true).write(true);

    // O_EXCL on a Linux block device fails with EBUSY while it is mounted.
    #[cfg(target_os = "linux")]
    if kind == DeviceKind::BlockDevice {
        use std::os::unix::fs::OpenOptionsExt;
        options.custom_flags(libc::O_EXCL);
    }
    #[cfg(not(target_os = "linux"))]
    let _ = kind;

    options.open(path)
}

#[cfg(unix)]
fn is_busy(e: &std::io::Error) -> bool {
    e.raw_os_error() == Some(libc::EBUSY)
}

#[cfg(not(unix))]
fn is_busy(_e: &std::io::Error) -> bool {
    false
}
