//! The in-memory GPT: both headers, the partition array and what is known
//! to be valid about them.

use bitflags::bitflags;

use crate::checksum::crc32;
use crate::disk::{Disk, LogicalBlockSize, PartitionContext};
use crate::header::{self, Header, HeaderError, HEADER_SIZE, MIN_ENTRIES_SIZE};
use crate::mbr::ProtectiveMBR;
use crate::partition::Partition;
use crate::{guid, DiskDevice, GptError};

bitflags! {
    /// Which parts of a GPT were found valid. No flag implies another.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct GptStatus: u32 {
        /// LBA0 holds a protective (or hybrid) MBR.
        const PROTECTIVE_MBR = 0x01;
        /// Primary header passed all checks.
        const PRIMARY_HEADER_VALID = 0x02;
        /// Primary partition array matches its checksum.
        const PRIMARY_ENTRIES_VALID = 0x04;
        /// Backup header passed all checks.
        const BACKUP_HEADER_VALID = 0x08;
        /// Backup partition array matches its checksum.
        const BACKUP_ENTRIES_VALID = 0x10;

        /// Primary header and array.
        const PRIMARY_VALID = Self::PRIMARY_HEADER_VALID.bits() | Self::PRIMARY_ENTRIES_VALID.bits();
        /// Backup header and array.
        const BACKUP_VALID = Self::BACKUP_HEADER_VALID.bits() | Self::BACKUP_ENTRIES_VALID.bits();
        /// Everything but the protective MBR.
        const BOTH_VALID = Self::PRIMARY_VALID.bits() | Self::BACKUP_VALID.bits();
    }
}

/// A GPT read from one disk.
///
/// Only [`Gpt::read`] creates one. [`Gpt::repair`] and [`Gpt::update`] are
/// the only mutations; the partition array is owned and freed on drop.
#[derive(Clone, Debug)]
pub struct Gpt {
    primary: Header,
    backup: Header,
    entries: Vec<u8>,
    status: GptStatus,
    lb_size: LogicalBlockSize,
}

impl Gpt {
    /// Read and validate the GPT of `disk`.
    ///
    /// The protective MBR, the primary and the backup copies are each
    /// checked on their own and recorded in [`Gpt::status`]. Reading fails
    /// only when neither header is valid, in which case the primary's error
    /// is returned. A partition-scoped handle is read as a whole disk and
    /// restored afterwards.
    pub fn read<D: DiskDevice>(disk: &mut Disk<D>) -> Result<Self, GptError> {
        let mut disk = disk.whole_disk();
        let mut gpt = Gpt {
            primary: Header::default(),
            backup: Header::default(),
            entries: Vec::new(),
            status: GptStatus::empty(),
            lb_size: disk.logical_block_size(),
        };

        // a non-conformant protective MBR is not fatal
        let pmbr = ProtectiveMBR::from_disk(&mut *disk)?;
        match pmbr.check() {
            Ok(()) => gpt.status |= GptStatus::PROTECTIVE_MBR,
            Err(e) => debug!("protective MBR error: {}", e),
        }

        let primary = gpt.read_primary(&mut *disk);
        if let Err(e) = &primary {
            debug!("primary GPT error: {}", e);
        }

        let backup = gpt.read_backup(&mut *disk);
        if let Err(e) = &backup {
            debug!("backup GPT error: {}", e);
        }

        if gpt
            .status
            .intersects(GptStatus::PRIMARY_HEADER_VALID | GptStatus::BACKUP_HEADER_VALID)
        {
            debug!("GPT status: {:?}", gpt.status);
            return Ok(gpt);
        }

        Err(match (primary, backup) {
            (Err(e), _) | (Ok(()), Err(e)) => e,
            (Ok(()), Ok(())) => HeaderError::NoValidGpt.into(),
        })
    }

    fn read_primary<D: DiskDevice>(&mut self, disk: &mut Disk<D>) -> Result<(), GptError> {
        trace!("reading primary GPT from LBA 1");
        self.primary = Header::read_from(disk, 1)?;
        self.check_primary()?;
        self.status |= GptStatus::PRIMARY_HEADER_VALID;

        self.entries = read_entries(disk, &self.primary)?;
        self.status |= GptStatus::PRIMARY_ENTRIES_VALID;
        Ok(())
    }

    fn read_backup<D: DiskDevice>(&mut self, disk: &mut Disk<D>) -> Result<(), GptError> {
        let sector = if self.status.contains(GptStatus::PRIMARY_HEADER_VALID) {
            let sector = self.primary.backup_lba;
            if let Some(total) = disk.total_sectors() {
                if sector >= total {
                    return Err(GptError::OutOfRange(format!(
                        "backup GPT located at {:#x}, beyond last disk sector at {:#x}",
                        sector,
                        total.saturating_sub(1)
                    )));
                }
            }
            sector
        } else {
            match disk.total_sectors() {
                Some(total) if total > 0 => total - 1,
                _ => {
                    return Err(GptError::OutOfRange(
                        "size of disk unknown, cannot locate backup GPT".to_string(),
                    ))
                }
            }
        };

        trace!("reading backup GPT from LBA {:#x}", sector);
        self.backup = Header::read_from(disk, sector)?;
        self.check_backup()?;

        // it must think it is where we found it
        if self.backup.current_lba != sector {
            return Err(HeaderError::InvalidBackupLba.into());
        }
        self.status |= GptStatus::BACKUP_HEADER_VALID;

        let entries = read_entries(disk, &self.backup)?;
        if self.status.contains(GptStatus::PRIMARY_ENTRIES_VALID) {
            if entries != self.entries {
                return Err(HeaderError::BackupOutOfSync.into());
            }
        } else {
            self.entries = entries;
        }
        self.status |= GptStatus::BACKUP_ENTRIES_VALID;
        Ok(())
    }

    /// Check the primary header on its own and against the disk layout.
    pub fn check_primary(&self) -> Result<(), HeaderError> {
        header::check_primary(&self.primary, self.lb_size)
    }

    /// Check the backup header, and whether it agrees with the primary one
    /// when the primary header is currently valid.
    pub fn check_backup(&self) -> Result<(), HeaderError> {
        let primary = self
            .status
            .contains(GptStatus::PRIMARY_HEADER_VALID)
            .then_some(&self.primary);
        header::check_backup(&self.backup, primary, self.lb_size)
    }

    /// Rebuild whichever copy is broken from the valid one.
    ///
    /// When the primary is kept and the disk has grown past its backup, the
    /// backup moves to the new last sector and the primary's `backup_lba`
    /// is updated to follow it. Nothing is written to disk.
    pub fn repair<D>(&mut self, disk: &Disk<D>) -> Result<(), GptError> {
        if self.status.contains(GptStatus::BOTH_VALID) {
            return Ok(());
        }

        debug!("repairing GPT, status {:?}", self.status);

        if disk.logical_block_size() != self.lb_size {
            return Err(GptError::NotImplemented(
                "GPT sector size must match disk sector size".to_string(),
            ));
        }

        if self.status.contains(GptStatus::PRIMARY_VALID) {
            debug!("primary GPT is valid");

            let mut backup_lba = self.primary.backup_lba;
            if let Some(last) = disk.total_sectors().and_then(|t| t.checked_sub(1)) {
                if last > backup_lba {
                    backup_lba = last;
                    debug!("backup GPT header will be located at {:#x}", backup_lba);
                    self.primary.backup_lba = backup_lba;
                }
            }

            let entries_sectors = self.lb_size.bytes_to_sectors(self.entries.len() as u64);
            let part_start = backup_lba.checked_sub(entries_sectors).ok_or_else(|| {
                GptError::Bug(format!(
                    "backup GPT header at {:#x} leaves no room for {:#x} entry sectors",
                    backup_lba, entries_sectors
                ))
            })?;

            self.backup = Header {
                current_lba: self.primary.backup_lba,
                backup_lba: self.primary.current_lba,
                part_start,
                ..self.primary.clone()
            };
        } else if self.status.contains(GptStatus::BACKUP_VALID) {
            debug!("backup GPT is valid");

            self.primary = Header {
                current_lba: self.backup.backup_lba,
                backup_lba: self.backup.current_lba,
                part_start: 2,
                ..self.backup.clone()
            };
        } else {
            return Err(HeaderError::NoValidGpt.into());
        }

        self.update()?;
        debug!("repairing GPT successful");
        Ok(())
    }

    /// Recompute both headers' checksums from the partition array and
    /// re-derive the validity flags.
    ///
    /// Failing checks here mean the headers were generated wrong, which is
    /// reported as [`GptError::Bug`].
    pub fn update(&mut self) -> Result<(), GptError> {
        self.status.remove(GptStatus::BOTH_VALID);

        // larger headers than ours cannot be written
        self.primary.header_size_le = HEADER_SIZE;
        self.backup.header_size_le = HEADER_SIZE;

        if self.entries.len() as u64 != self.primary.entries_size() {
            return Err(GptError::Bug(format!(
                "partition array is {:#x} bytes, header expects {:#x}",
                self.entries.len(),
                self.primary.entries_size()
            )));
        }

        let crc = crc32(&self.entries);
        self.primary.crc32_parts = crc;
        self.backup.crc32_parts = crc;

        self.primary.crc32 = self.primary.compute_crc32();
        self.backup.crc32 = self.backup.compute_crc32();

        self.check_primary()
            .map_err(|e| GptError::Bug(format!("generated invalid GPT primary header: {}", e)))?;
        self.status |= GptStatus::PRIMARY_VALID;

        self.check_backup()
            .map_err(|e| GptError::Bug(format!("generated invalid GPT backup header: {}", e)))?;
        self.status |= GptStatus::BACKUP_VALID;

        Ok(())
    }

    /// Write both copies to `disk`, backup first.
    ///
    /// A backup located past the end of the disk is skipped with a warning;
    /// it will have to be repaired by the OS.
    pub fn write<D: DiskDevice>(&self, disk: &mut Disk<D>) -> Result<(), GptError> {
        if !self.status.contains(GptStatus::BOTH_VALID) {
            return Err(HeaderError::InvalidGptData.into());
        }
        if !disk.is_writable() {
            return Err(GptError::ReadOnly);
        }
        if disk.logical_block_size() != self.lb_size {
            return Err(GptError::NotImplemented(
                "GPT sector size must match disk sector size".to_string(),
            ));
        }

        let mut disk = disk.whole_disk();

        let backup_lba = self.backup.current_lba;
        match disk.total_sectors() {
            Some(total) if backup_lba >= total => {
                warn!(
                    "backup GPT located at {:#x}, beyond last disk sector at {:#x}",
                    backup_lba,
                    total.saturating_sub(1)
                );
                warn!("only writing primary GPT, the backup GPT must be repaired from the OS");
            }
            _ => {
                debug!("writing backup GPT");
                self.write_table(&mut *disk, &self.backup)?;
            }
        }

        debug!("writing primary GPT");
        self.write_table(&mut *disk, &self.primary)?;

        disk.flush()
    }

    fn write_table<D: DiskDevice>(
        &self,
        disk: &mut Disk<D>,
        header: &Header,
    ) -> Result<(), GptError> {
        // never clobber the protective MBR or the primary header
        if header.part_start < 2 {
            return Err(GptError::Bug(format!(
                "refusing to write GPT entries to LBA {:#x}",
                header.part_start
            )));
        }
        header.write_to(disk)?;
        disk.write(header.part_start, 0, &self.entries)
    }

    /// Validity flags.
    pub fn status(&self) -> GptStatus {
        self.status
    }

    /// Sector size the GPT was read with.
    pub fn logical_block_size(&self) -> LogicalBlockSize {
        self.lb_size
    }

    /// The primary header as read or rebuilt, valid or not.
    pub fn primary_header(&self) -> &Header {
        &self.primary
    }

    /// The backup header as read or rebuilt, valid or not.
    pub fn backup_header(&self) -> &Header {
        &self.backup
    }

    /// The raw partition array. Empty if neither copy had a valid one.
    pub fn entries(&self) -> &[u8] {
        &self.entries
    }

    /// The header to trust: the primary if valid, else the backup if valid.
    pub fn header(&self) -> Option<&Header> {
        if self.status.contains(GptStatus::PRIMARY_HEADER_VALID) {
            Some(&self.primary)
        } else if self.status.contains(GptStatus::BACKUP_HEADER_VALID) {
            Some(&self.backup)
        } else {
            None
        }
    }

    /// Raw bytes of entry `n`, including any vendor data past 128 bytes.
    pub fn partentry_bytes(&self, n: u32) -> Option<&[u8]> {
        let header = self.header()?;
        if n >= header.num_parts {
            return None;
        }
        let size = usize::try_from(header.part_size).ok()?;
        let offset = usize::try_from(n).ok()?.checked_mul(size)?;
        self.entries.get(offset..offset.checked_add(size)?)
    }

    /// Decoded entry `n`, used or not.
    pub fn partentry(&self, n: u32) -> Option<Partition> {
        Partition::from_bytes(self.partentry_bytes(n)?)
    }

    /// Used entries with their index.
    pub fn partitions(&self) -> impl Iterator<Item = (u32, Partition)> + '_ {
        let count = self.header().map_or(0, |h| h.num_parts);
        (0..count)
            .map_while(move |n| self.partentry(n).map(|p| (n, p)))
            .filter(|(_, p)| p.is_used())
    }

    /// First used entry named `label`.
    pub fn find_partition_by_label(&self, label: &str) -> Option<(u32, Partition)> {
        self.partitions().find(|(_, p)| p.name == label)
    }

    /// First used entry with the given unique GUID.
    pub fn find_partition_by_uuid(&self, part_guid: &uuid::Uuid) -> Option<(u32, Partition)> {
        self.partitions().find(|(_, p)| &p.part_guid == part_guid)
    }

    /// Canonical string of the disk GUID.
    pub fn disk_uuid(&self) -> Option<String> {
        self.header()
            .map(|h| guid::format_guid(&guid::to_disk_bytes(&h.disk_guid)))
    }

    /// Where partition `n` and its entry live on disk, for scoping a
    /// [`Disk`] handle to it. `None` for unused entries.
    pub fn partition_context(&self, n: u32) -> Option<PartitionContext> {
        let header = self.header()?;
        let part = self.partentry(n).filter(Partition::is_used)?;
        let offset = u64::from(n).checked_mul(u64::from(header.part_size))?;
        let lb = self.lb_size.as_u64();
        Some(PartitionContext {
            start: part.first_lba,
            len: part.sectors_len()?,
            entry_lba: header.part_start.checked_add(offset / lb)?,
            entry_offset: offset % lb,
        })
    }
}

/// Read the partition array described by `header` and check its CRC32.
pub(crate) fn read_entries<D: DiskDevice>(
    disk: &mut Disk<D>,
    header: &Header,
) -> Result<Vec<u8>, GptError> {
    let count = usize::try_from(header.num_parts)
        .map_err(|_| GptError::OutOfMemory("partition array size"))?;
    let size = usize::try_from(header.part_size)
        .map_err(|_| GptError::OutOfMemory("partition array size"))?;
    let entries_size = count
        .checked_mul(size)
        .ok_or(GptError::OutOfMemory("partition array size"))?;

    // the header should have been checked already
    if (entries_size as u64) < MIN_ENTRIES_SIZE {
        return Err(GptError::Bug(format!(
            "invalid GPT entries table size {:#x}",
            entries_size
        )));
    }

    let mut disk = disk.whole_disk();
    // refuse before allocating for an array that cannot be on the disk
    disk.addr(header.part_start, 0, entries_size as u64)?;

    let mut entries = Vec::new();
    entries
        .try_reserve_exact(entries_size)
        .map_err(|_| GptError::OutOfMemory("partition array"))?;
    entries.resize(entries_size, 0);

    disk.read(header.part_start, 0, &mut entries)?;

    let crc = crc32(&entries);
    trace!(
        "entries CRC32: {:#x} - computed CRC32: {:#x}",
        header.crc32_parts,
        crc
    );
    if crc != header.crc32_parts {
        return Err(HeaderError::InvalidEntriesCrc32.into());
    }

    Ok(entries)
}
