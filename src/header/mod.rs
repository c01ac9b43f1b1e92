//! GPT-header object and helper functions.

use std::fmt;

use crate::checksum::crc32;
use crate::disk::{Disk, LogicalBlockSize};
use crate::{guid, DiskDevice, GptError};

use simple_bytes::{BytesArray, BytesRead, BytesSeek, BytesWrite};

/// GPT header magic signature.
pub const HEADER_SIGNATURE: [u8; 8] = *b"EFI PART";
/// The only header revision we know about, as (major, minor).
pub const HEADER_REVISION: (u16, u16) = (1, 0);
/// Size in bytes of the header structure we read and write.
pub const HEADER_SIZE: u32 = 92;
/// Smallest allowed partition entry.
pub const MIN_PART_SIZE: u32 = 128;
/// The partition array must reserve at least this many bytes, whatever the
/// entry size is.
pub const MIN_ENTRIES_SIZE: u64 = 16384;

#[non_exhaustive]
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
/// A malformed or inconsistent partition table.
pub enum HeaderError {
    /// Signature is not "EFI PART"
    InvalidGptSignature,
    /// Revision is not 1.0
    UnknownGptVersion,
    /// The header checksum does not match
    InvalidHeaderCrc32,
    /// Header size is below 92 bytes or above the sector size
    InvalidHeaderSize,
    /// Partition entry size is not 128 * 2^n
    InvalidEntrySize,
    /// Partition array is smaller than 16 KiB
    InvalidEntryTableSize,
    /// First usable LBA is after the last usable LBA
    InvalidUsableRange,
    /// The primary header does not sit at LBA 1
    InvalidPrimaryLba,
    /// The backup header is misplaced
    InvalidBackupLba,
    /// The partition array overlaps the usable region or a header
    InvalidEntriesLocation,
    /// The partition array checksum does not match
    InvalidEntriesCrc32,
    /// Backup header or array disagrees with the primary one
    BackupOutOfSync,
    /// Neither header is usable
    NoValidGpt,
    /// The table is not fully valid and cannot be written
    InvalidGptData,
}

impl std::error::Error for HeaderError {}

impl fmt::Display for HeaderError {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        use HeaderError::*;
        let desc = match self {
            InvalidGptSignature => "invalid GPT signature",
            UnknownGptVersion => "unknown GPT version",
            InvalidHeaderCrc32 => "invalid GPT header crc32",
            InvalidHeaderSize => "invalid GPT header size",
            InvalidEntrySize => "invalid GPT entry size",
            InvalidEntryTableSize => "invalid GPT entry table size",
            InvalidUsableRange => "invalid usable sectors",
            InvalidPrimaryLba => "invalid primary GPT LBA",
            InvalidBackupLba => "invalid backup GPT LBA",
            InvalidEntriesLocation => "invalid entries location",
            InvalidEntriesCrc32 => "invalid GPT entry crc32",
            BackupOutOfSync => "backup GPT out of sync",
            NoValidGpt => "no valid GPT",
            InvalidGptData => "invalid GPT data",
        };
        write!(fmt, "{desc}")
    }
}

/// Header describing a GPT disk.
///
/// Parsing is lossless: [`Header::as_bytes`] gives back the bytes the header
/// was read from, so a corrupt header can still be inspected.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Header {
    /// GPT header magic signature, "EFI PART" when valid.
    pub signature: [u8; 8], // Offset  0
    /// major, minor
    pub revision: (u16, u16), // Offset  8
    /// Declared size of the header
    pub header_size_le: u32, // Offset 12
    /// CRC32 of the header with crc32 section zeroed
    pub crc32: u32, // Offset 16
    /// must be 0
    pub reserved: u32, // Offset 20
    /// LBA of this header, 1 for the primary
    pub current_lba: u64, // Offset 24
    /// LBA of the other header
    pub backup_lba: u64, // Offset 32
    /// First usable LBA for partitions (primary table last LBA + 1)
    pub first_usable: u64, // Offset 40
    /// Last usable LBA (secondary partition table first LBA - 1)
    pub last_usable: u64, // Offset 48
    /// UUID of the disk
    pub disk_guid: uuid::Uuid, // Offset 56
    /// Starting LBA of partition entries
    pub part_start: u64, // Offset 72
    /// Number of partition entries
    pub num_parts: u32, // Offset 80
    /// Size of a partition entry, usually 128
    pub part_size: u32, // Offset 84
    /// CRC32 of the partition table
    pub crc32_parts: u32, // Offset 88
}

impl Header {
    /// Parse the 92 header bytes. No validation happens here.
    pub fn from_bytes(raw: &[u8; 92]) -> Self {
        let mut bytes = BytesArray::from(*raw);
        let mut signature = [0u8; 8];
        signature.copy_from_slice(BytesRead::read(&mut bytes, 8));

        Header {
            signature,
            revision: {
                let minor = bytes.read_le_u16();
                let major = bytes.read_le_u16();
                (major, minor)
            },
            header_size_le: bytes.read_le_u32(),
            crc32: bytes.read_le_u32(),
            reserved: bytes.read_le_u32(),
            current_lba: bytes.read_le_u64(),
            backup_lba: bytes.read_le_u64(),
            first_usable: bytes.read_le_u64(),
            last_usable: bytes.read_le_u64(),
            disk_guid: {
                let mut raw_guid = [0u8; 16];
                raw_guid.copy_from_slice(BytesRead::read(&mut bytes, 16));
                guid::from_disk_bytes(&raw_guid)
            },
            part_start: bytes.read_le_u64(),
            // Note: this is the size of the array, not how many entries are used
            num_parts: bytes.read_le_u32(),
            part_size: bytes.read_le_u32(),
            crc32_parts: bytes.read_le_u32(),
        }
    }

    /// On-disk representation, using the stored `crc32`.
    pub fn as_bytes(&self) -> [u8; 92] {
        self.to_bytes_with_crc(self.crc32)
    }

    fn to_bytes_with_crc(&self, header_checksum: u32) -> [u8; 92] {
        let mut bytes = BytesArray::from([0u8; 92]);

        BytesWrite::write(&mut bytes, self.signature);
        bytes.write_le_u16(self.revision.1);
        bytes.write_le_u16(self.revision.0);
        bytes.write_le_u32(self.header_size_le);
        bytes.write_le_u32(header_checksum);
        bytes.write_le_u32(self.reserved);
        bytes.write_le_u64(self.current_lba);
        bytes.write_le_u64(self.backup_lba);
        bytes.write_le_u64(self.first_usable);
        bytes.write_le_u64(self.last_usable);
        BytesWrite::write(&mut bytes, guid::to_disk_bytes(&self.disk_guid));
        bytes.write_le_u64(self.part_start);
        bytes.write_le_u32(self.num_parts);
        bytes.write_le_u32(self.part_size);
        bytes.write_le_u32(self.crc32_parts);

        debug_assert_eq!(BytesSeek::position(&bytes), 92);
        bytes.into_array()
    }

    /// CRC32 of the header with the crc32 field zeroed.
    pub fn compute_crc32(&self) -> u32 {
        crc32(&self.to_bytes_with_crc(0))
    }

    /// Size in bytes of the partition array.
    pub fn entries_size(&self) -> u64 {
        u64::from(self.num_parts) * u64::from(self.part_size)
    }

    /// Number of sectors spanned by the partition array.
    pub fn entries_sectors(&self, lb_size: LogicalBlockSize) -> u64 {
        lb_size.bytes_to_sectors(self.entries_size())
    }

    /// Read the header stored at `lba` of the whole disk.
    pub fn read_from<D: DiskDevice>(disk: &mut Disk<D>, lba: u64) -> Result<Self, GptError> {
        let mut raw = [0u8; 92];
        disk.whole_disk().read(lba, 0, &mut raw)?;
        let h = Self::from_bytes(&raw);
        trace!("header at LBA {}: {:?}", lba, h);
        Ok(h)
    }

    /// Write this header to its own `current_lba`, zero-padding the rest
    /// of the logical block.
    pub fn write_to<D: DiskDevice>(&self, disk: &mut Disk<D>) -> Result<usize, GptError> {
        if self.header_size_le != HEADER_SIZE {
            return Err(GptError::Bug(format!(
                "refusing to write GPT header of size {}, must be {}",
                self.header_size_le, HEADER_SIZE
            )));
        }
        if self.current_lba == 0 {
            return Err(GptError::Bug(
                "refusing to write GPT header to LBA 0".to_string(),
            ));
        }
        let lb_size = disk.logical_block_size();
        let mut bytes = Vec::with_capacity(lb_size.as_usize());
        bytes.extend_from_slice(&self.as_bytes());
        bytes.resize(lb_size.as_usize(), 0);
        disk.whole_disk().write(self.current_lba, 0, &bytes)?;
        trace!("wrote header to LBA {}", self.current_lba);
        Ok(bytes.len())
    }
}

impl fmt::Display for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Disk:\t\t{}\nLBA:\t\t{} (alternate {})\nUsable:\t\t{} - {}\nEntries:\t{} x {} at {}\nCRC32:\t\t{:#010x}\nTable CRC:\t{:#010x}",
            self.disk_guid.as_hyphenated(),
            self.current_lba,
            self.backup_lba,
            self.first_usable,
            self.last_usable,
            self.num_parts,
            self.part_size,
            self.part_start,
            self.crc32,
            self.crc32_parts
        )
    }
}

/// Validate a single header on its own: signature, revision, checksum and
/// the size and range fields. Location is not checked here.
pub fn check_header(h: &Header, lb_size: LogicalBlockSize) -> Result<(), HeaderError> {
    if h.signature != HEADER_SIGNATURE {
        return Err(HeaderError::InvalidGptSignature);
    }

    if h.revision != HEADER_REVISION {
        return Err(HeaderError::UnknownGptVersion);
    }

    let crc = h.compute_crc32();
    trace!("header CRC32: {:#x} - computed CRC32: {:#x}", h.crc32, crc);
    if crc != h.crc32 {
        return Err(HeaderError::InvalidHeaderCrc32);
    }

    if h.header_size_le < HEADER_SIZE || u64::from(h.header_size_le) > lb_size.as_u64() {
        return Err(HeaderError::InvalidHeaderSize);
    }

    // "a value of 128*(2^n) where n is an integer greater than or equal to zero"
    let size = h.part_size;
    if size < MIN_PART_SIZE || size % MIN_PART_SIZE != 0 || !(size / MIN_PART_SIZE).is_power_of_two()
    {
        return Err(HeaderError::InvalidEntrySize);
    }

    // specified in bytes, regardless of the entry size
    if h.entries_size() < MIN_ENTRIES_SIZE {
        return Err(HeaderError::InvalidEntryTableSize);
    }

    if h.first_usable > h.last_usable {
        return Err(HeaderError::InvalidUsableRange);
    }

    Ok(())
}

/// Validate a primary header: it must sit at LBA 1, its partition array must
/// end before the usable region and the backup must lie after it.
pub fn check_primary(h: &Header, lb_size: LogicalBlockSize) -> Result<(), HeaderError> {
    trace!(
        "primary GPT layout: header {:#x} backup {:#x} entries {:#x} (+{:#x}) usable {:#x}-{:#x}",
        h.current_lba,
        h.backup_lba,
        h.part_start,
        h.entries_sectors(lb_size),
        h.first_usable,
        h.last_usable
    );

    check_header(h, lb_size)?;

    if h.current_lba != 1 {
        return Err(HeaderError::InvalidPrimaryLba);
    }

    let entries_end = h.part_start.checked_add(h.entries_sectors(lb_size));
    if h.part_start <= 1 || entries_end.map_or(true, |end| end > h.first_usable) {
        return Err(HeaderError::InvalidEntriesLocation);
    }

    if h.backup_lba <= h.last_usable {
        return Err(HeaderError::InvalidBackupLba);
    }

    Ok(())
}

/// Validate a backup header: it must point back at LBA 1 and sit, with its
/// partition array, after the usable region. When `primary` is given (the
/// primary header is valid) both must describe the same table.
pub fn check_backup(
    h: &Header,
    primary: Option<&Header>,
    lb_size: LogicalBlockSize,
) -> Result<(), HeaderError> {
    trace!(
        "backup GPT layout: header {:#x} primary {:#x} entries {:#x} (+{:#x}) usable {:#x}-{:#x}",
        h.current_lba,
        h.backup_lba,
        h.part_start,
        h.entries_sectors(lb_size),
        h.first_usable,
        h.last_usable
    );

    check_header(h, lb_size)?;

    if h.backup_lba != 1 {
        return Err(HeaderError::InvalidPrimaryLba);
    }

    let entries_end = h.part_start.checked_add(h.entries_sectors(lb_size));
    if h.part_start <= h.last_usable || entries_end.map_or(true, |end| end > h.current_lba) {
        return Err(HeaderError::InvalidEntriesLocation);
    }

    if h.current_lba <= h.last_usable {
        return Err(HeaderError::InvalidBackupLba);
    }

    // if both are valid but differ the primary wins
    if let Some(primary) = primary {
        if !headers_equal(primary, h) {
            return Err(HeaderError::BackupOutOfSync);
        }
    }

    Ok(())
}

/// Whether a primary and a backup header describe the same table.
///
/// The checksum, own location and array location normally differ, so the
/// shared fields are compared one by one.
pub fn headers_equal(primary: &Header, backup: &Header) -> bool {
    primary.header_size_le == backup.header_size_le
        && primary.current_lba == backup.backup_lba
        && primary.backup_lba == backup.current_lba
        && primary.first_usable == backup.first_usable
        && primary.last_usable == backup.last_usable
        && primary.disk_guid == backup.disk_guid
        && primary.num_parts == backup.num_parts
        && primary.part_size == backup.part_size
        && primary.crc32_parts == backup.crc32_parts
}
