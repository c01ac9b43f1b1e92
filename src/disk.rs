//! Disk-related types and helper functions.
//!
//! A [`Disk`] wraps any seekable device and addresses it in logical
//! sectors. It optionally carries a [`PartitionContext`], in which case all
//! sector numbers are relative to that partition; GPT structures always live
//! at whole-disk addresses, so the engine goes through [`Disk::whole_disk`]
//! to reach them.

use crate::{DiskDevice, GptError};
use std::io::{self, SeekFrom};
use std::ops::{Deref, DerefMut};

/// Default size of a logical sector (bytes).
pub const DEFAULT_SECTOR_SIZE: LogicalBlockSize = LogicalBlockSize::Lb512;

/// Logical block/sector size of a GPT disk.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LogicalBlockSize {
    /// 512 bytes.
    Lb512,
    /// 4096 bytes.
    Lb4096,
}

impl LogicalBlockSize {
    /// Returns the logical block size as a `u64`.
    pub const fn as_u64(&self) -> u64 {
        match self {
            Self::Lb512 => 512,
            Self::Lb4096 => 4096,
        }
    }

    /// Returns the logical block size as a `usize`.
    pub const fn as_usize(&self) -> usize {
        self.as_u64() as usize
    }

    /// Returns the base 2 logarithm of the block size.
    pub const fn log2(&self) -> u32 {
        match self {
            Self::Lb512 => 9,
            Self::Lb4096 => 12,
        }
    }

    /// Builds a block size from its base 2 logarithm.
    pub const fn from_log2(log2: u32) -> Option<Self> {
        match log2 {
            9 => Some(Self::Lb512),
            12 => Some(Self::Lb4096),
            _ => None,
        }
    }

    /// Converts a sector number into a byte address.
    pub fn sector_to_addr(&self, lba: u64) -> Option<u64> {
        lba.checked_mul(self.as_u64())
    }

    /// Number of sectors needed to hold `bytes`.
    pub fn bytes_to_sectors(&self, bytes: u64) -> u64 {
        bytes / self.as_u64() + u64::from(bytes % self.as_u64() != 0)
    }
}

impl From<LogicalBlockSize> for u64 {
    fn from(lb: LogicalBlockSize) -> u64 {
        lb.as_u64()
    }
}

/// Marks a disk handle as pointing into one GPT partition.
///
/// `entry_lba` and `entry_offset` locate the 128 byte partition entry that
/// describes the partition, in whole-disk coordinates.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PartitionContext {
    /// First sector of the partition.
    pub start: u64,
    /// Partition length in sectors.
    pub len: u64,
    /// Sector holding the partition entry.
    pub entry_lba: u64,
    /// Byte offset of the entry inside `entry_lba`.
    pub entry_offset: u64,
}

/// A block device addressed in logical sectors.
#[derive(Debug)]
pub struct Disk<D> {
    device: D,
    lb_size: LogicalBlockSize,
    total_sectors: Option<u64>,
    writable: bool,
    partition: Option<PartitionContext>,
}

impl<D: DiskDevice> Disk<D> {
    /// Wraps `device`, querying its length to learn the number of sectors.
    ///
    /// A device whose length cannot be queried ends up with an unknown size.
    pub fn new(mut device: D, lb_size: LogicalBlockSize) -> Self {
        let total_sectors = device_len(&mut device)
            .map(|len| len / lb_size.as_u64())
            .ok();
        trace!("disk size: {:?} sectors of {}", total_sectors, lb_size.as_u64());
        Self {
            device,
            lb_size,
            total_sectors,
            writable: false,
            partition: None,
        }
    }
}

impl<D> Disk<D> {
    /// Sector size of the disk.
    pub fn logical_block_size(&self) -> LogicalBlockSize {
        self.lb_size
    }

    /// Total number of sectors, if known.
    pub fn total_sectors(&self) -> Option<u64> {
        self.total_sectors
    }

    /// Override the number of sectors, e.g. with what the firmware reports.
    pub fn with_total_sectors(mut self, total_sectors: Option<u64>) -> Self {
        self.total_sectors = total_sectors;
        self
    }

    /// Allow or forbid writes through this handle.
    pub fn with_writable(mut self, writable: bool) -> Self {
        self.writable = writable;
        self
    }

    /// Whether writes are allowed.
    pub fn is_writable(&self) -> bool {
        self.writable
    }

    /// The partition this handle is scoped to, if any.
    pub fn partition(&self) -> Option<&PartitionContext> {
        self.partition.as_ref()
    }

    /// Scope this handle to a partition (or back to the whole disk).
    /// Returns the previous context.
    pub fn set_partition(&mut self, partition: Option<PartitionContext>) -> Option<PartitionContext> {
        std::mem::replace(&mut self.partition, partition)
    }

    /// Temporarily address the whole disk. The previous partition context
    /// comes back when the guard is dropped.
    pub fn whole_disk(&mut self) -> WholeDisk<'_, D> {
        let saved = self.partition.take();
        WholeDisk { disk: self, saved }
    }

    /// Get a reference to to the underlying device.
    pub fn device_ref(&self) -> &D {
        &self.device
    }

    /// Take the underlying device back.
    pub fn take_device(self) -> D {
        self.device
    }

    /// Byte address of `offset` bytes into `sector`, bounds-checked against
    /// the partition or the known disk size.
    pub(crate) fn addr(&self, sector: u64, offset: u64, len: u64) -> Result<u64, GptError> {
        let sector_bytes = self.lb_size.as_u64();
        let (base, limit) = match &self.partition {
            Some(p) => (p.start, Some(p.len)),
            None => (0, self.total_sectors),
        };
        let rel = sector
            .checked_mul(sector_bytes)
            .and_then(|a| a.checked_add(offset))
            .ok_or(GptError::Overflow("disk address"))?;
        let end = rel
            .checked_add(len)
            .ok_or(GptError::Overflow("disk address"))?;
        if let Some(limit) = limit {
            if end > limit.saturating_mul(sector_bytes) {
                return Err(GptError::OutOfRange(format!(
                    "attempt to access {:#x} bytes at sector {:#x} outside of disk ({:#x} sectors)",
                    len, sector, limit
                )));
            }
        }
        base.checked_mul(sector_bytes)
            .and_then(|b| b.checked_add(rel))
            .ok_or(GptError::Overflow("disk address"))
    }
}

impl<D: DiskDevice> Disk<D> {
    /// Read `buf.len()` bytes starting `offset` bytes into `sector`.
    pub fn read(&mut self, sector: u64, offset: u64, buf: &mut [u8]) -> Result<(), GptError> {
        let addr = self.addr(sector, offset, buf.len() as u64)?;
        trace!("reading {} bytes at {:#x}", buf.len(), addr);
        self.device.seek(SeekFrom::Start(addr))?;
        self.device.read_exact(buf)?;
        Ok(())
    }

    /// Write `buf` starting `offset` bytes into `sector`.
    pub fn write(&mut self, sector: u64, offset: u64, buf: &[u8]) -> Result<(), GptError> {
        if !self.writable {
            return Err(GptError::ReadOnly);
        }
        let addr = self.addr(sector, offset, buf.len() as u64)?;
        trace!("writing {} bytes at {:#x}", buf.len(), addr);
        self.device.seek(SeekFrom::Start(addr))?;
        self.device.write_all(buf)?;
        Ok(())
    }

    /// Flush the underlying device.
    pub fn flush(&mut self) -> Result<(), GptError> {
        self.device.flush()?;
        Ok(())
    }
}

fn device_len<D: DiskDevice>(device: &mut D) -> io::Result<u64> {
    let cur = device.stream_position()?;
    let len = device.seek(SeekFrom::End(0))?;
    device.seek(SeekFrom::Start(cur))?;
    Ok(len)
}

/// A disk handle temporarily addressing the whole disk.
///
/// Created by [`Disk::whole_disk`]; restores the saved partition context on
/// drop, including on early returns.
#[derive(Debug)]
pub struct WholeDisk<'a, D> {
    disk: &'a mut Disk<D>,
    saved: Option<PartitionContext>,
}

impl<D> Deref for WholeDisk<'_, D> {
    type Target = Disk<D>;

    fn deref(&self) -> &Disk<D> {
        &*self.disk
    }
}

impl<D> DerefMut for WholeDisk<'_, D> {
    fn deref_mut(&mut self) -> &mut Disk<D> {
        &mut *self.disk
    }
}

impl<D> Drop for WholeDisk<'_, D> {
    fn drop(&mut self) {
        self.disk.partition = self.saved.take();
    }
}
