//! Partition-related types and helper functions.
//!
//! Entries are kept raw inside [`crate::Gpt`]; this module gives a typed,
//! read-only view of one of them.

use std::fmt;

use bitflags::bitflags;
use simple_bytes::{Bytes, BytesRead};

use crate::disk::LogicalBlockSize;
use crate::{guid, partition_types};

/// Size of the fields a partition entry must have. Larger entries carry
/// vendor data after these.
pub const PARTITION_ENTRY_SIZE: usize = 128;
/// Length of the name field in UTF-16 code units.
pub const NAME_UNITS: usize = 36;

bitflags! {
    /// Partition attribute bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PartitionAttributes: u64 {
        /// Required for the platform to function.
        const REQUIRED_PARTITION = 1 << 0;
        /// Firmware must not produce a block IO protocol for it.
        const NO_BLOCK_IO_PROTOCOL = 1 << 1;
        /// Bootable by legacy BIOS firmware.
        const LEGACY_BIOS_BOOTABLE = 1 << 2;
    }
}

/// A decoded partition entry.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Partition {
    /// Contains the GUID of the type of partition.
    pub part_type_guid: partition_types::Type,
    /// UUID of the partition.
    pub part_guid: uuid::Uuid,
    /// First LBA of the partition
    pub first_lba: u64,
    /// Last LBA of the partition (inclusive)
    pub last_lba: u64,
    /// Partition flags; type-specific bits 48..64 are kept too
    pub flags: PartitionAttributes,
    /// Partition name, decoded up to the first NUL
    pub name: String,
}

impl Partition {
    /// Decode the first 128 bytes of an entry. `None` if `buf` is shorter.
    pub fn from_bytes(buf: &[u8]) -> Option<Self> {
        if buf.len() < PARTITION_ENTRY_SIZE {
            return None;
        }
        let mut bytes = Bytes::from(&buf[..PARTITION_ENTRY_SIZE]);

        let part_type_guid = guid::parse_guid(&mut bytes)?.into();
        let part_guid = guid::parse_guid(&mut bytes)?;
        let first_lba = bytes.read_le_u64();
        let last_lba = bytes.read_le_u64();
        let flags = PartitionAttributes::from_bits_retain(bytes.read_le_u64());
        let name = decode_name(bytes.read(NAME_UNITS * 2));

        Some(Self {
            part_type_guid,
            part_guid,
            first_lba,
            last_lba,
            flags,
            name,
        })
    }

    /// Whether the entry describes a partition.
    pub fn is_used(&self) -> bool {
        !self.part_type_guid.is_unused()
    }

    /// Number of sectors. `None` if the range is reversed or its length
    /// does not fit a `u64`.
    pub fn sectors_len(&self) -> Option<u64> {
        self.last_lba
            .checked_sub(self.first_lba)?
            .checked_add(1)
    }

    /// Start of the partition in bytes.
    pub fn bytes_start(&self, lb_size: LogicalBlockSize) -> Option<u64> {
        self.first_lba.checked_mul(lb_size.as_u64())
    }

}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Partition:\t\t{}\nPartition GUID:\t\t{}\nPartition Type:\t\t{}\nSpan:\t\t\t{} - {}\nFlags:\t\t\t{:#x}",
            self.name,
            self.part_guid.as_hyphenated(),
            self.part_type_guid,
            self.first_lba,
            self.last_lba,
            self.flags.bits()
        )
    }
}

/// UTF-16LE name, stopping at the first NUL. Unpaired surrogates are
/// replaced rather than rejected.
fn decode_name(raw: &[u8]) -> String {
    let units = raw
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .take_while(|u| *u != 0);
    char::decode_utf16(units)
        .map(|c| c.unwrap_or(char::REPLACEMENT_CHARACTER))
        .collect()
}
