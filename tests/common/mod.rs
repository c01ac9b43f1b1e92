#![allow(dead_code)]

use bootgpt::checksum::crc32;
use bootgpt::header::{Header, HEADER_REVISION, HEADER_SIGNATURE, HEADER_SIZE};
use bootgpt::mbr::ProtectiveMBR;
use bootgpt::{guid, partition_types, Disk, LogicalBlockSize};

use std::io::Cursor;
use std::str::FromStr;
use uuid::Uuid;

pub const SECTOR: usize = 512;
/// 1 MiB disk
pub const SECTORS: u64 = 2048;
pub const NUM_PARTS: u32 = 128;
pub const PART_SIZE: u32 = 128;
pub const ENTRIES_SECTORS: u64 = 32;

pub const DISK_GUID: &str = "69C131AD-67D6-46C6-93C4-124C755256AC";
pub const EFI_PART_GUID: &str = "A0F1792E-B4CE-4136-BCF2-1AFC133C2828";
pub const BIOS_PART_GUID: &str = "876C898D-1B40-4727-A161-EDF9B5486674";

pub const ENTRIES_CRC32: u32 = 0x074e052c;
pub const PRIMARY_CRC32: u32 = 0xb985abe0;
pub const BACKUP_CRC32: u32 = 0x0af785eb;

pub type MemDisk = Disk<Cursor<Vec<u8>>>;

fn entry(type_guid: Uuid, part_guid: &str, first: u64, last: u64, attrs: u64, name: &str) -> Vec<u8> {
    let mut raw = Vec::with_capacity(PART_SIZE as usize);
    raw.extend_from_slice(&guid::to_disk_bytes(&type_guid));
    raw.extend_from_slice(&guid::to_disk_bytes(&Uuid::from_str(part_guid).unwrap()));
    raw.extend_from_slice(&first.to_le_bytes());
    raw.extend_from_slice(&last.to_le_bytes());
    raw.extend_from_slice(&attrs.to_le_bytes());
    for unit in name.encode_utf16() {
        raw.extend_from_slice(&unit.to_le_bytes());
    }
    raw.resize(PART_SIZE as usize, 0);
    raw
}

/// The partition array: an ESP followed by a BIOS Boot partition.
pub fn entries() -> Vec<u8> {
    let mut raw = Vec::with_capacity((NUM_PARTS * PART_SIZE) as usize);
    raw.extend(entry(
        partition_types::EFI.guid,
        EFI_PART_GUID,
        34,
        0x3f,
        0,
        "EFI SYSTEM",
    ));
    raw.extend(entry(
        partition_types::BIOS.guid,
        BIOS_PART_GUID,
        0x40,
        0x7f,
        1 << 2,
        "BIOS BOOT",
    ));
    raw.resize((NUM_PARTS * PART_SIZE) as usize, 0);
    raw
}

/// Primary header for a disk of `sectors` with the given array.
pub fn primary_header(sectors: u64, entries: &[u8]) -> Header {
    let mut h = Header {
        signature: HEADER_SIGNATURE,
        revision: HEADER_REVISION,
        header_size_le: HEADER_SIZE,
        crc32: 0,
        reserved: 0,
        current_lba: 1,
        backup_lba: sectors - 1,
        first_usable: 2 + ENTRIES_SECTORS,
        last_usable: sectors - 2 - ENTRIES_SECTORS,
        disk_guid: Uuid::from_str(DISK_GUID).unwrap(),
        part_start: 2,
        num_parts: NUM_PARTS,
        part_size: PART_SIZE,
        crc32_parts: crc32(entries),
    };
    h.crc32 = h.compute_crc32();
    h
}

/// The matching backup header.
pub fn backup_header(sectors: u64, entries: &[u8]) -> Header {
    let mut h = Header {
        current_lba: sectors - 1,
        backup_lba: 1,
        part_start: sectors - 1 - ENTRIES_SECTORS,
        ..primary_header(sectors, entries)
    };
    h.crc32 = h.compute_crc32();
    h
}

fn put(image: &mut [u8], lba: u64, data: &[u8]) {
    let at = lba as usize * SECTOR;
    image[at..at + data.len()].copy_from_slice(data);
}

/// A complete GPT disk image of `sectors` holding `entries`.
pub fn build_image(sectors: u64, entries: &[u8]) -> Vec<u8> {
    let mut image = vec![0u8; sectors as usize * SECTOR];
    let mbr = ProtectiveMBR::with_lb_size((sectors - 1) as u32);
    put(&mut image, 0, &mbr.to_bytes());

    let primary = primary_header(sectors, entries);
    let backup = backup_header(sectors, entries);
    put(&mut image, primary.current_lba, &primary.as_bytes());
    put(&mut image, primary.part_start, entries);
    put(&mut image, backup.part_start, entries);
    put(&mut image, backup.current_lba, &backup.as_bytes());
    image
}

/// The 1 MiB reference image.
pub fn fixture_image() -> Vec<u8> {
    build_image(SECTORS, &entries())
}

/// Writable in-memory disk over `image`.
pub fn mem_disk(image: Vec<u8>) -> MemDisk {
    Disk::new(Cursor::new(image), LogicalBlockSize::Lb512).with_writable(true)
}

/// Flip every bit of one byte.
pub fn corrupt(image: &mut [u8], lba: u64, offset: usize) {
    image[lba as usize * SECTOR + offset] ^= 0xff;
}

pub fn image_of(disk: MemDisk) -> Vec<u8> {
    disk.take_device().into_inner()
}
