//! Locating room for a boot loader core image on a GPT disk.
//!
//! On PC-BIOS machines the core image goes into the BIOS Boot Partition,
//! a small partition with no filesystem.

use crate::partition_types;
use crate::{Gpt, GptError};

/// Kind of firmware the core image is embedded for.
#[non_exhaustive]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EmbedType {
    /// Legacy PC BIOS, embedding into the BIOS Boot Partition.
    PcBios,
    /// UEFI firmware, which loads boot loaders from the ESP instead.
    Efi,
}

impl Gpt {
    /// Sectors of the first BIOS Boot Partition usable for an image of
    /// `nsectors`, capped at `max_nsectors`.
    pub fn embed_sectors(
        &self,
        embed_type: EmbedType,
        nsectors: u64,
        max_nsectors: u64,
    ) -> Result<Vec<u64>, GptError> {
        if embed_type != EmbedType::PcBios {
            return Err(GptError::NotImplemented(
                "GPT currently supports only PC-BIOS embedding".to_string(),
            ));
        }

        let (index, part) = self
            .partitions()
            .find(|(_, p)| p.part_type_guid == partition_types::BIOS)
            .ok_or(GptError::NotFound(
                "this GPT partition label contains no BIOS Boot Partition; \
                 embedding won't be possible",
            ))?;

        let len = part.sectors_len().ok_or_else(|| {
            GptError::OutOfRange(format!(
                "BIOS Boot Partition has an invalid range {:#x} - {:#x}",
                part.first_lba, part.last_lba
            ))
        })?;
        trace!(
            "BIOS Boot Partition {} at {:#x}, {:#x} sectors",
            index,
            part.first_lba,
            len
        );
        if len < nsectors {
            return Err(GptError::OutOfRange(format!(
                "your BIOS Boot Partition is too small ({} < {} sectors); \
                 embedding won't be possible",
                len, nsectors
            )));
        }

        let count = len.min(max_nsectors);
        let end = part.first_lba.checked_add(count).ok_or_else(|| {
            GptError::OutOfRange(format!(
                "BIOS Boot Partition at {:#x} runs past the last addressable sector",
                part.first_lba
            ))
        })?;

        let mut sectors = Vec::new();
        usize::try_from(count)
            .ok()
            .and_then(|n| sectors.try_reserve_exact(n).ok())
            .ok_or(GptError::OutOfMemory("embedding sector list"))?;
        sectors.extend(part.first_lba..end);
        Ok(sectors)
    }
}
