//! MBR-related types and helper functions.
//!
//! GPT disks carry a protective MBR in LBA0 so that legacy tools see one
//! partition of type 0xEE covering the disk. Only that much of the MBR
//! format is understood here.

use crate::disk::Disk;
use crate::{DiskDevice, GptError};
use std::fmt;

use simple_bytes::{Bytes, BytesArray, BytesRead, BytesSeek, BytesWrite};

#[non_exhaustive]
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
/// Errors returned when parsing or checking a protective MBR.
pub enum MBRError {
    /// The provided buffer is shorter than an MBR
    InvalidMBRLength,
    /// invalid MBR signature
    InvalidMBRSignature,
    /// Invalid Partition Length != 16
    InvalidPartitionLength,
    /// No partition record of type 0xEE
    NotProtective,
}

impl std::error::Error for MBRError {}

impl fmt::Display for MBRError {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        use MBRError::*;
        let desc = match self {
            InvalidMBRLength => "The provided buffer is shorter than an MBR",
            InvalidMBRSignature => "invalid MBR signature",
            InvalidPartitionLength => "Invalid Partition length expected 16",
            NotProtective => "invalid protective MBR",
        };
        write!(fmt, "{desc}")
    }
}

const MBR_SIGNATURE: [u8; 2] = [0x55, 0xAA];
/// MBR partition type of the GPT protective partition.
pub const GPT_PROTECTIVE_TYPE: u8 = 0xEE;
/// Size of the legacy MBR structure.
pub const MBR_SIZE: usize = 512;

/// Protective MBR, as defined by GPT.
#[derive(Clone)]
pub struct ProtectiveMBR {
    bootcode: [u8; 440],
    disk_signature: [u8; 4],
    unknown: u16,
    partitions: [PartRecord; 4],
    signature: [u8; 2],
}

impl fmt::Debug for ProtectiveMBR {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Protective MBR, signature: {:02x?}, partitions: {:#?}",
            self.signature, self.partitions
        )
    }
}

impl Default for ProtectiveMBR {
    fn default() -> Self {
        Self::with_lb_size(0xFF_FF_FF_FF)
    }
}

impl ProtectiveMBR {
    /// Create a default protective-MBR object.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a protective-MBR object with a specific protective partition size (in LB).
    /// The protective partition size should be the size of the disk - 1 (because the protective
    /// partition always begins at LBA 1 (the second sector)).
    pub fn with_lb_size(lb_size: u32) -> Self {
        Self {
            bootcode: [0x00; 440],
            disk_signature: [0x00; 4],
            unknown: 0,
            partitions: [
                PartRecord::new_protective(lb_size),
                PartRecord::zero(),
                PartRecord::zero(),
                PartRecord::zero(),
            ],
            signature: MBR_SIGNATURE,
        }
    }

    /// Parse the first 512 bytes of `buf`. The content is not checked,
    /// see [`ProtectiveMBR::check`].
    pub fn from_bytes(buf: &[u8]) -> Result<Self, MBRError> {
        if buf.len() < MBR_SIZE {
            return Err(MBRError::InvalidMBRLength);
        }

        let mut pmbr = Self::new();
        let mut bytes = Bytes::from(&buf[..MBR_SIZE]);

        pmbr.bootcode.copy_from_slice(bytes.read(440));
        pmbr.disk_signature.copy_from_slice(bytes.read(4));
        pmbr.unknown = bytes.read_le_u16();

        for p in pmbr.partitions.iter_mut() {
            *p = PartRecord::from_bytes(bytes.read(16))?;
        }

        debug_assert_eq!(BytesSeek::position(&bytes), 510);

        pmbr.signature.copy_from_slice(bytes.read(2));
        Ok(pmbr)
    }

    /// Read LBA0 of the whole disk.
    pub fn from_disk<D: DiskDevice>(disk: &mut Disk<D>) -> Result<Self, GptError> {
        let mut buf = [0u8; MBR_SIZE];
        disk.whole_disk().read(0, 0, &mut buf)?;
        Ok(Self::from_bytes(&buf)?)
    }

    /// Check the boot signature and look for a GPT protective record.
    ///
    /// Other records may be present: hybrid MBRs are accepted.
    pub fn check(&self) -> Result<(), MBRError> {
        if self.signature != MBR_SIGNATURE {
            return Err(MBRError::InvalidMBRSignature);
        }
        if self
            .partitions
            .iter()
            .any(|p| p.os_type == GPT_PROTECTIVE_TYPE)
        {
            Ok(())
        } else {
            Err(MBRError::NotProtective)
        }
    }

    /// Return the memory representation of this MBR as a byte vector.
    ///
    /// This will always be 512
    pub fn to_bytes(&self) -> [u8; 512] {
        let mut bytes = BytesArray::from([0u8; 512]);

        bytes.write(self.bootcode);
        bytes.write(self.disk_signature);
        bytes.write_le_u16(self.unknown);

        for p in &self.partitions {
            bytes.write(p.to_bytes());
        }

        bytes.write(self.signature);

        bytes.into_array()
    }

    /// Returns the given partition (0..=3) or None if the partition index is invalid.
    pub fn partition(&self, partition_index: usize) -> Option<PartRecord> {
        self.partitions.get(partition_index).copied()
    }

    /// Set the data for the given partition.
    /// Returns the previous partition record or None if the partition index is invalid.
    pub fn set_partition(
        &mut self,
        partition_index: usize,
        partition: PartRecord,
    ) -> Option<PartRecord> {
        self.partitions
            .get_mut(partition_index)
            .map(|slot| std::mem::replace(slot, partition))
    }
}

/// A partition record, MBR-style.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct PartRecord {
    /// Bit 7 set if partition is active (bootable)
    pub boot_indicator: u8,
    /// CHS address of partition start: 8-bit value of head in CHS address
    pub start_head: u8,
    /// CHS address of partition start: Upper 2 bits are 8th-9th bits of cylinder, lower 6 bits are sector
    pub start_sector: u8,
    /// CHS address of partition start: Lower 8 bits of cylinder
    pub start_track: u8,
    /// Partition type. See <https://www.win.tue.nl/~aeb/partitions/partition_types-1.html>
    pub os_type: u8,
    /// CHS address of partition end: 8-bit value of head in CHS address
    pub end_head: u8,
    /// CHS address of partition end: Upper 2 bits are 8th-9th bits of cylinder, lower 6 bits are sector
    pub end_sector: u8,
    /// CHS address of partition end: Lower 8 bits of cylinder
    pub end_track: u8,
    /// LBA of start of partition
    pub lb_start: u32,
    /// Number of sectors in partition
    pub lb_size: u32,
}

impl PartRecord {
    /// Create a protective Partition Record object with a specific disk size (in LB).
    pub fn new_protective(lb_size: u32) -> Self {
        Self {
            boot_indicator: 0x00,
            start_head: 0x00,
            start_sector: 0x02,
            start_track: 0x00,
            os_type: GPT_PROTECTIVE_TYPE,
            end_head: 0xFF,
            end_sector: 0xFF,
            end_track: 0xFF,
            lb_start: 1,
            lb_size,
        }
    }

    /// Create an all-zero Partition Record.
    pub fn zero() -> Self {
        Self::from_array([0u8; 16])
    }

    /// Parse input bytes into a Partition Record.
    pub fn from_bytes(buf: &[u8]) -> Result<Self, MBRError> {
        let raw: [u8; 16] = buf
            .try_into()
            .map_err(|_| MBRError::InvalidPartitionLength)?;
        Ok(Self::from_array(raw))
    }

    fn from_array(raw: [u8; 16]) -> Self {
        let mut bytes = BytesArray::from(raw);

        Self {
            boot_indicator: bytes.read_u8(),
            start_head: bytes.read_u8(),
            start_sector: bytes.read_u8(),
            start_track: bytes.read_u8(),
            os_type: bytes.read_u8(),
            end_head: bytes.read_u8(),
            end_sector: bytes.read_u8(),
            end_track: bytes.read_u8(),
            lb_start: bytes.read_le_u32(),
            lb_size: bytes.read_le_u32(),
        }
    }

    /// Return the memory representation of this Partition Record as a byte vector.
    pub fn to_bytes(&self) -> [u8; 16] {
        let mut bytes = BytesArray::from([0u8; 16]);

        bytes.write_u8(self.boot_indicator);

        bytes.write_u8(self.start_head);
        bytes.write_u8(self.start_sector);
        bytes.write_u8(self.start_track);

        bytes.write_u8(self.os_type);

        bytes.write_u8(self.end_head);
        bytes.write_u8(self.end_sector);
        bytes.write_u8(self.end_track);

        bytes.write_le_u32(self.lb_start);
        bytes.write_le_u32(self.lb_size);

        bytes.into_array()
    }
}
