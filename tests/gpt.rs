mod common;

use bootgpt::header::{Header, HeaderError};
use bootgpt::{Disk, Gpt, GptConfig, GptError, GptStatus, LogicalBlockSize};
use common::*;

use std::io::Cursor;

const ALL: GptStatus = GptStatus::all();

#[test]
fn read_reference_disk() {
    let mut disk = mem_disk(fixture_image());
    let gpt = Gpt::read(&mut disk).unwrap();

    assert_eq!(gpt.status(), ALL);
    assert_eq!(gpt.status().bits(), 0x1f);
    assert_eq!(gpt.primary_header().crc32, PRIMARY_CRC32);
    assert_eq!(gpt.primary_header().crc32_parts, ENTRIES_CRC32);
    assert_eq!(gpt.backup_header().crc32, BACKUP_CRC32);
    assert_eq!(gpt.entries(), &entries()[..]);

    assert_eq!(gpt.disk_uuid().unwrap(), DISK_GUID);
    let (n, esp) = gpt.find_partition_by_label("EFI SYSTEM").unwrap();
    assert_eq!(n, 0);
    assert_eq!(esp.part_type_guid, bootgpt::partition_types::EFI);
    assert_eq!(
        bootgpt::guid::format_guid(&bootgpt::guid::to_disk_bytes(&esp.part_guid)),
        EFI_PART_GUID
    );
    let (n, _) = gpt.find_partition_by_uuid(&esp.part_guid).unwrap();
    assert_eq!(n, 0);
    assert!(gpt.find_partition_by_label("EFI").is_none());
}

#[test]
fn reference_checksums() {
    let e = entries();
    assert_eq!(bootgpt::checksum::crc32(&e), ENTRIES_CRC32);
    assert_eq!(primary_header(SECTORS, &e).crc32, PRIMARY_CRC32);
    assert_eq!(backup_header(SECTORS, &e).crc32, BACKUP_CRC32);
}

#[test]
fn update_is_idempotent_on_valid_gpt() {
    let mut disk = mem_disk(fixture_image());
    let gpt = Gpt::read(&mut disk).unwrap();

    let mut updated = gpt.clone();
    updated.update().unwrap();
    assert_eq!(updated.status(), gpt.status());
    assert_eq!(updated.primary_header(), gpt.primary_header());
    assert_eq!(updated.backup_header(), gpt.backup_header());

    // nothing to do either
    updated.repair(&disk).unwrap();
    assert_eq!(updated.primary_header(), gpt.primary_header());
}

#[test]
fn write_of_unchanged_gpt_is_byte_identical() {
    let image = fixture_image();
    let mut disk = mem_disk(image.clone());
    let gpt = Gpt::read(&mut disk).unwrap();
    gpt.write(&mut disk).unwrap();
    assert!(image_of(disk) == image);
}

#[test]
fn entries_checksum_sensitivity() {
    // one byte of an unused entry is enough
    let mut image = fixture_image();
    corrupt(&mut image, 2 + ENTRIES_SECTORS - 1, SECTOR - 1);
    let mut disk = mem_disk(image);
    let gpt = Gpt::read(&mut disk).unwrap();
    assert_eq!(
        gpt.status(),
        GptStatus::PROTECTIVE_MBR | GptStatus::PRIMARY_HEADER_VALID | GptStatus::BACKUP_VALID
    );
    assert_eq!(gpt.entries(), &entries()[..]);
}

#[test]
fn fallback_matrix() {
    const PH: u8 = 1;
    const PE: u8 = 2;
    const BH: u8 = 4;
    const BE: u8 = 8;
    let pristine = fixture_image();

    for mask in 0u8..16 {
        let mut image = pristine.clone();
        if mask & PH != 0 {
            corrupt(&mut image, 1, 0);
        }
        if mask & PE != 0 {
            corrupt(&mut image, 2, 0);
        }
        if mask & BH != 0 {
            corrupt(&mut image, SECTORS - 1, 0);
        }
        if mask & BE != 0 {
            corrupt(&mut image, SECTORS - 1 - ENTRIES_SECTORS, 0);
        }

        let mut disk = mem_disk(image);
        let result = Gpt::read(&mut disk);

        let ph_ok = mask & PH == 0;
        let pe_ok = ph_ok && mask & PE == 0;
        let bh_ok = mask & BH == 0;
        let be_ok = bh_ok && mask & BE == 0;

        if !ph_ok && !bh_ok {
            let err = result.unwrap_err();
            assert!(
                matches!(err, GptError::Header(HeaderError::InvalidGptSignature)),
                "mask {mask:#x}: {err}"
            );
            continue;
        }

        let mut gpt = result.unwrap();
        let mut expected = GptStatus::PROTECTIVE_MBR;
        expected.set(GptStatus::PRIMARY_HEADER_VALID, ph_ok);
        expected.set(GptStatus::PRIMARY_ENTRIES_VALID, pe_ok);
        expected.set(GptStatus::BACKUP_HEADER_VALID, bh_ok);
        expected.set(GptStatus::BACKUP_ENTRIES_VALID, be_ok);
        assert_eq!(gpt.status(), expected, "mask {mask:#x}");

        if pe_ok || be_ok {
            assert_eq!(gpt.entries(), &pristine[2 * SECTOR..34 * SECTOR]);
        }

        if !pe_ok && !be_ok {
            assert!(
                matches!(gpt.repair(&disk), Err(GptError::Header(HeaderError::NoValidGpt))),
                "mask {mask:#x}"
            );
            continue;
        }

        gpt.repair(&disk).unwrap();
        assert_eq!(gpt.status() & GptStatus::BOTH_VALID, GptStatus::BOTH_VALID);
        gpt.write(&mut disk).unwrap();
        assert!(image_of(disk) == pristine, "mask {mask:#x}");
    }
}

#[test]
fn repair_recreates_reference_backup() {
    let pristine = fixture_image();
    let mut image = pristine.clone();
    let backup_region = (SECTORS - 1 - ENTRIES_SECTORS) as usize * SECTOR;
    image[backup_region..].fill(0);
    let mut disk = mem_disk(image);

    let mut gpt = Gpt::read(&mut disk).unwrap();
    assert_eq!(gpt.status(), GptStatus::PROTECTIVE_MBR | GptStatus::PRIMARY_VALID);
    gpt.repair(&disk).unwrap();

    assert_eq!(gpt.status(), ALL);
    assert_eq!(gpt.backup_header(), &backup_header(SECTORS, &entries()));
    assert_eq!(gpt.backup_header().crc32, BACKUP_CRC32);

    gpt.write(&mut disk).unwrap();
    assert!(image_of(disk) == pristine);
}

#[test]
fn repair_from_backup() {
    let mut image = fixture_image();
    image[SECTOR..2 * SECTOR].fill(0);
    let mut disk = mem_disk(image);

    let mut gpt = Gpt::read(&mut disk).unwrap();
    assert_eq!(gpt.status(), GptStatus::PROTECTIVE_MBR | GptStatus::BACKUP_VALID);
    assert_eq!(gpt.header(), Some(gpt.backup_header()));

    gpt.repair(&disk).unwrap();
    assert_eq!(gpt.primary_header(), &primary_header(SECTORS, &entries()));
    assert_eq!(gpt.primary_header().crc32, PRIMARY_CRC32);
}

#[test]
fn backup_out_of_sync() {
    let mut image = fixture_image();
    let mut other = backup_header(SECTORS, &entries());
    other.disk_guid = uuid::Uuid::nil();
    other.crc32 = other.compute_crc32();
    let at = (SECTORS as usize - 1) * SECTOR;
    image[at..at + 92].copy_from_slice(&other.as_bytes());

    let mut disk = mem_disk(image.clone());
    let gpt = Gpt::read(&mut disk).unwrap();
    assert_eq!(gpt.status(), GptStatus::PROTECTIVE_MBR | GptStatus::PRIMARY_VALID);
    assert_eq!(
        gpt.check_backup(),
        Err(HeaderError::BackupOutOfSync)
    );

    // with no primary to compare against the backup stands on its own
    corrupt(&mut image, 1, 0);
    let mut disk = mem_disk(image);
    let gpt = Gpt::read(&mut disk).unwrap();
    assert_eq!(gpt.status(), GptStatus::PROTECTIVE_MBR | GptStatus::BACKUP_VALID);
    assert_eq!(gpt.header().unwrap().disk_guid, uuid::Uuid::nil());
}

#[test]
fn backup_must_sit_where_it_claims() {
    // primary broken, so the backup is looked for in the last sector of a
    // larger disk; put a copy there that still claims the old location
    let mut image = fixture_image();
    corrupt(&mut image, 1, 0);
    let backup = image[(SECTORS as usize - 1) * SECTOR..].to_vec();
    image.resize(2 * SECTORS as usize * SECTOR, 0);
    let last = image.len() - SECTOR;
    image[last..].copy_from_slice(&backup);

    let mut disk = mem_disk(image);
    assert!(matches!(
        Gpt::read(&mut disk),
        Err(GptError::Header(HeaderError::InvalidGptSignature))
    ));
}

#[test]
fn repair_relocates_backup_on_grown_disk() {
    let mut image = fixture_image();
    corrupt(&mut image, SECTORS - 1, 0);
    image.resize(2 * SECTORS as usize * SECTOR, 0);
    let mut disk = mem_disk(image);

    let mut gpt = Gpt::read(&mut disk).unwrap();
    assert_eq!(gpt.status(), GptStatus::PROTECTIVE_MBR | GptStatus::PRIMARY_VALID);
    gpt.repair(&disk).unwrap();

    let new_last = 2 * SECTORS - 1;
    assert_eq!(gpt.primary_header().backup_lba, new_last);
    assert_eq!(gpt.backup_header().current_lba, new_last);
    assert_eq!(gpt.backup_header().part_start, new_last - ENTRIES_SECTORS);
    // the usable range is not grown
    assert_eq!(gpt.backup_header().last_usable, SECTORS - 2 - ENTRIES_SECTORS);

    gpt.write(&mut disk).unwrap();
    let reread = Gpt::read(&mut disk).unwrap();
    assert_eq!(reread.status(), ALL);
    assert_eq!(reread.backup_header(), gpt.backup_header());
}

#[test]
fn disk_reported_short() {
    let mut image = fixture_image();
    corrupt(&mut image, SECTORS - 1, 0);
    let mut disk = mem_disk(image).with_total_sectors(Some(SECTORS - 128));

    let mut gpt = Gpt::read(&mut disk).unwrap();
    assert_eq!(gpt.status(), GptStatus::PROTECTIVE_MBR | GptStatus::PRIMARY_VALID);

    gpt.repair(&disk).unwrap();
    assert_eq!(gpt.backup_header().current_lba, SECTORS - 1);
    // the backup cannot be written, the primary still is
    gpt.write(&mut disk).unwrap();

    let mut disk = mem_disk(image_of(disk));
    let reread = Gpt::read(&mut disk).unwrap();
    assert_eq!(reread.status(), GptStatus::PROTECTIVE_MBR | GptStatus::PRIMARY_VALID);
    assert_eq!(reread.primary_header().crc32, PRIMARY_CRC32);
}

#[test]
fn backup_beyond_reported_size() {
    let mut disk = mem_disk(fixture_image()).with_total_sectors(Some(SECTORS - 1));
    let gpt = Gpt::read(&mut disk).unwrap();
    assert_eq!(gpt.status(), GptStatus::PROTECTIVE_MBR | GptStatus::PRIMARY_VALID);
}

#[test]
fn entry_lookup_bounds() {
    let mut disk = mem_disk(fixture_image());
    let gpt = Gpt::read(&mut disk).unwrap();

    assert_eq!(gpt.partentry_bytes(0).unwrap().len(), PART_SIZE as usize);
    assert_eq!(gpt.partentry(1).unwrap().name, "BIOS BOOT");
    assert!(!gpt.partentry(NUM_PARTS - 1).unwrap().is_used());
    assert!(gpt.partentry(NUM_PARTS).is_none());
    assert!(gpt.partentry_bytes(u32::MAX).is_none());
    assert_eq!(gpt.partitions().count(), 2);
    assert!(gpt.partition_context(2).is_none());
}

#[test]
fn partition_scoped_helpers() {
    let mut disk = mem_disk(fixture_image());
    let gpt = Gpt::read(&mut disk).unwrap();

    assert!(matches!(bootgpt::part_label(&mut disk), Err(GptError::Bug(_))));

    let ctx = gpt.partition_context(1).unwrap();
    assert_eq!(ctx.start, 0x40);
    assert_eq!(ctx.len, 0x40);
    assert_eq!((ctx.entry_lba, ctx.entry_offset), (2, 128));
    disk.set_partition(Some(ctx));

    assert_eq!(bootgpt::part_label(&mut disk).unwrap(), "BIOS BOOT");
    assert_eq!(bootgpt::part_uuid(&mut disk).unwrap(), BIOS_PART_GUID);
    assert_eq!(bootgpt::disk_uuid(&mut disk).unwrap(), DISK_GUID);
    assert_eq!(disk.partition(), Some(&ctx));

    // sector 0 of the partition is disk sector 0x40, the last one is 0x7f
    let mut buf = [0u8; 4];
    disk.read(0x3f, 0, &mut buf).unwrap();
    assert!(matches!(disk.read(0x40, 0, &mut buf), Err(GptError::OutOfRange(_))));
    assert_eq!(disk.partition(), Some(&ctx));
}

#[test]
fn write_requires_valid_gpt_and_writable_disk() {
    let mut image = fixture_image();
    corrupt(&mut image, SECTORS - 1, 0);

    let mut disk = mem_disk(image.clone());
    let mut gpt = Gpt::read(&mut disk).unwrap();
    assert!(matches!(
        gpt.write(&mut disk),
        Err(GptError::Header(HeaderError::InvalidGptData))
    ));

    gpt.repair(&disk).unwrap();
    let mut ro = Disk::new(Cursor::new(image.clone()), LogicalBlockSize::Lb512);
    assert!(matches!(gpt.write(&mut ro), Err(GptError::ReadOnly)));
    assert!(image_of(ro) == image);
}

#[test]
fn sector_size_mismatch() {
    let mut disk = mem_disk(fixture_image());
    let mut gpt = Gpt::read(&mut disk).unwrap();
    let big = Disk::new(Cursor::new(fixture_image()), LogicalBlockSize::Lb4096);
    gpt.repair(&big).unwrap();

    let mut image = fixture_image();
    corrupt(&mut image, 1, 0);
    let mut disk = mem_disk(image);
    let mut gpt = Gpt::read(&mut disk).unwrap();
    assert!(matches!(gpt.repair(&big), Err(GptError::NotImplemented(_))));
}

#[test]
fn header_write_guards() {
    let mut disk = mem_disk(fixture_image());
    let mut h = primary_header(SECTORS, &entries());

    h.header_size_le = 96;
    assert!(matches!(h.write_to(&mut disk), Err(GptError::Bug(_))));

    h.header_size_le = 92;
    h.current_lba = 0;
    assert!(matches!(h.write_to(&mut disk), Err(GptError::Bug(_))));
    assert!(image_of(disk) == fixture_image());
}

#[test]
fn protective_mbr_is_optional() {
    let mut image = fixture_image();
    image[..SECTOR].fill(0);
    let mut disk = mem_disk(image);
    let gpt = Gpt::read(&mut disk).unwrap();
    assert_eq!(gpt.status(), GptStatus::BOTH_VALID);
}

#[test]
fn config_only_valid_headers() {
    let mut image = fixture_image();
    corrupt(&mut image, SECTORS - 1, 0);

    let strict = GptConfig::new().only_valid_headers(true);
    let mut disk = strict.open_from_device(Cursor::new(image.clone()));
    assert!(!disk.is_writable());
    assert!(matches!(
        strict.read(&mut disk),
        Err(GptError::Header(HeaderError::InvalidGptData))
    ));

    let mut disk = GptConfig::new().open_from_device(Cursor::new(image));
    assert!(GptConfig::new().read(&mut disk).is_ok());
}

#[test]
fn config_total_sectors() {
    let cfg = GptConfig::new().total_sectors(SECTORS - 1);
    let mut disk = cfg.open_from_device(Cursor::new(fixture_image()));
    assert_eq!(disk.total_sectors(), Some(SECTORS - 1));
    let gpt = cfg.read(&mut disk).unwrap();
    assert!(!gpt.status().contains(GptStatus::BACKUP_HEADER_VALID));
}

#[test]
fn embed_into_bios_boot_partition() {
    let mut disk = mem_disk(fixture_image());
    let gpt = Gpt::read(&mut disk).unwrap();

    let sectors = gpt
        .embed_sectors(bootgpt::EmbedType::PcBios, 32, 1024)
        .unwrap();
    assert_eq!(sectors, (0x40..0x80).collect::<Vec<u64>>());

    let capped = gpt
        .embed_sectors(bootgpt::EmbedType::PcBios, 32, 40)
        .unwrap();
    assert_eq!(capped.len(), 40);

    assert!(matches!(
        gpt.embed_sectors(bootgpt::EmbedType::PcBios, 65, 1024),
        Err(GptError::OutOfRange(_))
    ));
    assert!(matches!(
        gpt.embed_sectors(bootgpt::EmbedType::Efi, 32, 1024),
        Err(GptError::NotImplemented(_))
    ));
}

#[test]
fn embed_without_bios_boot_partition() {
    let mut e = entries();
    e[128..256].fill(0);
    let mut disk = mem_disk(build_image(SECTORS, &e));
    let gpt = Gpt::read(&mut disk).unwrap();
    assert!(matches!(
        gpt.embed_sectors(bootgpt::EmbedType::PcBios, 1, 1),
        Err(GptError::NotFound(_))
    ));
}

fn with_bios_range(first: u64, last: u64) -> Gpt {
    let mut e = entries();
    e[128 + 32..128 + 40].copy_from_slice(&first.to_le_bytes());
    e[128 + 40..128 + 48].copy_from_slice(&last.to_le_bytes());
    let mut disk = mem_disk(build_image(SECTORS, &e));
    let gpt = Gpt::read(&mut disk).unwrap();
    assert_eq!(gpt.status(), ALL);
    gpt
}

#[test]
fn entry_ranges_spanning_the_whole_lba_space() {
    let gpt = with_bios_range(0, u64::MAX);
    assert_eq!(gpt.partentry(1).unwrap().sectors_len(), None);
    assert!(gpt.partition_context(1).is_none());
    assert!(matches!(
        gpt.embed_sectors(bootgpt::EmbedType::PcBios, 1, 1),
        Err(GptError::OutOfRange(_))
    ));

    let gpt = with_bios_range(u64::MAX, u64::MAX);
    let ctx = gpt.partition_context(1).unwrap();
    assert_eq!((ctx.start, ctx.len), (u64::MAX, 1));
    assert!(matches!(
        gpt.embed_sectors(bootgpt::EmbedType::PcBios, 1, 1),
        Err(GptError::OutOfRange(_))
    ));

    let gpt = with_bios_range(0x80, 0x7f);
    assert!(gpt.partition_context(1).is_none());
    assert!(matches!(
        gpt.embed_sectors(bootgpt::EmbedType::PcBios, 1, 1),
        Err(GptError::OutOfRange(_))
    ));
}

#[test]
fn headers_read_back_from_disk() {
    let mut disk = mem_disk(fixture_image());
    let h = Header::read_from(&mut disk, SECTORS - 1).unwrap();
    assert_eq!(h, backup_header(SECTORS, &entries()));
}
