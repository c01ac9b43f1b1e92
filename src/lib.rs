//! A pure-Rust library to read, validate and repair GPT partition tables
//! the way a boot loader does.
//!
//! Both copies of the table are read and checked on their own; the result
//! records which parts were found valid. A table with one broken copy can be
//! repaired from the other and written back. Raw disk devices as well as
//! disk images are supported.
//!
//! ```
//! use std::io::Cursor;
//!
//! // a blank 64 KiB disk has no partition table
//! let mut disk = bootgpt::GptConfig::new()
//!     .open_from_device(Cursor::new(vec![0u8; 64 * 1024]));
//! let err = bootgpt::Gpt::read(&mut disk).unwrap_err();
//! assert!(err.is_bad_partition_table());
//! ```
//!
//! ```no_run
//! fn repair_disk() -> Result<(), bootgpt::GptError> {
//!     let config = bootgpt::GptConfig::new().writable(true);
//!     let mut disk = config.open("/dev/sdz")?;
//!     let mut gpt = config.read(&mut disk)?;
//!
//!     println!("status: {:?}", gpt.status());
//!     for (n, part) in gpt.partitions() {
//!         println!("{}: {}", n, part);
//!     }
//!
//!     gpt.repair(&disk)?;
//!     gpt.write(&mut disk)
//! }
//! ```

#![deny(missing_docs)]

use std::io::{Read, Seek, Write};
use std::{fmt, fs, io, path};

#[macro_use]
mod macros;
#[macro_use]
mod logging;
pub mod checksum;
pub mod disk;
pub mod embed;
pub mod gpt;
pub mod guid;
pub mod header;
pub mod mbr;
pub mod partition;
pub mod partition_types;

pub use disk::{Disk, LogicalBlockSize, PartitionContext};
pub use embed::EmbedType;
pub use gpt::{Gpt, GptStatus};

use header::HeaderError;
use mbr::MBRError;

/// A generic device that we can read/write partitions from/to.
pub trait DiskDevice: Read + Write + Seek + std::fmt::Debug {}
/// Implement the DiskDevice trait for anything that meets the
/// requirements, e.g., `std::fs::File`
impl<T> DiskDevice for T where T: Read + Write + Seek + std::fmt::Debug {}

#[non_exhaustive]
#[derive(Debug)]
/// Errors returned when interacting with a GPT disk.
pub enum GptError {
    /// Generic IO Error
    Io(io::Error),
    /// A header or partition array failed a check
    Header(HeaderError),
    /// The protective MBR could not be parsed
    Mbr(MBRError),
    /// An access or a location beyond the end of the disk
    OutOfRange(String),
    /// A buffer could not be allocated
    OutOfMemory(&'static str),
    /// Somthing Overflowed or Underflowed
    /// This will never occur when dealing with sane values
    Overflow(&'static str),
    /// An internal invariant was broken
    Bug(String),
    /// The disk uses a feature that is not supported
    NotImplemented(String),
    /// A required partition does not exist
    NotFound(&'static str),
    /// disk not opened in writable mode
    ReadOnly,
}

impl GptError {
    /// Whether the disk content itself is at fault, as opposed to the
    /// device or the caller.
    pub fn is_bad_partition_table(&self) -> bool {
        matches!(self, Self::Header(_) | Self::Mbr(_))
    }
}

impl From<io::Error> for GptError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<HeaderError> for GptError {
    fn from(e: HeaderError) -> Self {
        Self::Header(e)
    }
}

impl From<MBRError> for GptError {
    fn from(e: MBRError) -> Self {
        Self::Mbr(e)
    }
}

impl std::error::Error for GptError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Header(e) => Some(e),
            Self::Mbr(e) => Some(e),
            _ => None,
        }
    }
}

impl fmt::Display for GptError {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        use GptError::*;
        match self {
            Io(e) => write!(fmt, "GPT IO Error: {e}"),
            Header(e) => write!(fmt, "GPT Header Error: {e}"),
            Mbr(e) => write!(fmt, "GPT MBR Error: {e}"),
            OutOfRange(m) => write!(fmt, "out of range: {m}"),
            OutOfMemory(m) => write!(fmt, "out of memory: {m}"),
            Overflow(m) => write!(fmt, "GPT error Overflow: {m}"),
            Bug(m) => write!(fmt, "BUG: {m}"),
            NotImplemented(m) => write!(fmt, "not implemented: {m}"),
            NotFound(m) => write!(fmt, "not found: {m}"),
            ReadOnly => write!(fmt, "disk not opened in writable mode"),
        }
    }
}

/// Configuration options to open a GPT disk.
///
/// ## Default
/// By Default the disk is readonly, its size comes from the device and only
/// one header needs to be valid.
///
/// ```
/// # use bootgpt::GptConfig;
/// let _default_config = GptConfig::new()
///     .writable(false)
///     .logical_block_size(bootgpt::disk::DEFAULT_SECTOR_SIZE)
///     .only_valid_headers(false);
/// ```
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct GptConfig {
    /// Logical block size.
    lb_size: disk::LogicalBlockSize,
    /// Whether to open the disk in writable mode.
    writable: bool,
    /// Force both the primary and backup copies to be valid
    only_valid_headers: bool,
    /// Disk size to use instead of the device length
    total_sectors: Option<u64>,
}

impl GptConfig {
    /// Create a new default configuration.
    pub fn new() -> Self {
        GptConfig::default()
    }

    /// Whether to open the disk in writable mode.
    pub fn writable(mut self, writable: bool) -> Self {
        self.writable = writable;
        self
    }

    /// Size of logical blocks (sectors) for this disk.
    pub fn logical_block_size(mut self, lb_size: disk::LogicalBlockSize) -> Self {
        self.lb_size = lb_size;
        self
    }

    /// Sets wether both copies need to be valid for [`GptConfig::read`].
    pub fn only_valid_headers(mut self, only_valid_headers: bool) -> Self {
        self.only_valid_headers = only_valid_headers;
        self
    }

    /// Use this disk size (in sectors) instead of the device length.
    pub fn total_sectors(mut self, total_sectors: u64) -> Self {
        self.total_sectors = Some(total_sectors);
        self
    }

    /// Open the disk at the given path.
    pub fn open(&self, diskpath: impl AsRef<path::Path>) -> Result<Disk<fs::File>, GptError> {
        let file = fs::OpenOptions::new()
            .write(self.writable)
            .read(true)
            .open(diskpath)?;
        Ok(self.open_from_device(file))
    }

    /// Wrap an already opened device.
    pub fn open_from_device<D: DiskDevice>(&self, device: D) -> Disk<D> {
        let mut disk = Disk::new(device, self.lb_size).with_writable(self.writable);
        if self.total_sectors.is_some() {
            disk = disk.with_total_sectors(self.total_sectors);
        }
        disk
    }

    /// Read the GPT of `disk` according to configuration options.
    pub fn read<D: DiskDevice>(&self, disk: &mut Disk<D>) -> Result<Gpt, GptError> {
        let gpt = Gpt::read(disk)?;
        if self.only_valid_headers && !gpt.status().contains(GptStatus::BOTH_VALID) {
            debug!("refusing GPT with status {:?}", gpt.status());
            return Err(HeaderError::InvalidGptData.into());
        }
        Ok(gpt)
    }
}

impl Default for GptConfig {
    fn default() -> Self {
        Self {
            lb_size: disk::DEFAULT_SECTOR_SIZE,
            writable: false,
            only_valid_headers: false,
            total_sectors: None,
        }
    }
}

/// Read the partition entry describing the partition `disk` is scoped to.
fn scoped_partentry<D: DiskDevice>(
    disk: &mut Disk<D>,
) -> Result<partition::Partition, GptError> {
    let ctx = *disk
        .partition()
        .ok_or_else(|| GptError::Bug("not a partition".to_string()))?;

    let mut raw = [0u8; partition::PARTITION_ENTRY_SIZE];
    disk.whole_disk()
        .read(ctx.entry_lba, ctx.entry_offset, &mut raw)?;

    partition::Partition::from_bytes(&raw)
        .ok_or_else(|| GptError::Bug("short partition entry".to_string()))
}

/// Name of the partition `disk` is scoped to.
pub fn part_label<D: DiskDevice>(disk: &mut Disk<D>) -> Result<String, GptError> {
    Ok(scoped_partentry(disk)?.name)
}

/// Unique GUID of the partition `disk` is scoped to, uppercase.
pub fn part_uuid<D: DiskDevice>(disk: &mut Disk<D>) -> Result<String, GptError> {
    let part = scoped_partentry(disk)?;
    Ok(guid::format_guid(&guid::to_disk_bytes(&part.part_guid)))
}

/// GUID of the disk, read from its GPT.
pub fn disk_uuid<D: DiskDevice>(disk: &mut Disk<D>) -> Result<String, GptError> {
    Gpt::read(disk)?
        .disk_uuid()
        .ok_or_else(|| HeaderError::NoValidGpt.into())
}
