//! Partition type GUIDs a boot loader cares about.

use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// A partition type: its GUID and a human readable description.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Type {
    /// Type GUID as stored in the entry.
    pub guid: Uuid,
    /// Description, "Unknown" for GUIDs not listed here.
    pub desc: &'static str,
}

impl Type {
    /// Whether this is the all-zero type marking an unused entry.
    pub fn is_unused(&self) -> bool {
        self.guid.is_nil()
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.desc, self.guid.as_hyphenated())
    }
}

partition_types! {
    /// Unused entry
    (UNUSED, "00000000-0000-0000-0000-000000000000", "Unused"),
    /// MBR partition scheme
    (MBR, "024DEE41-33E7-11D3-9D69-0008C781F39F", "MBR Partition Scheme"),
    /// EFI System Partition
    (EFI, "C12A7328-F81F-11D2-BA4B-00A0C93EC93B", "EFI System Partition"),
    /// BIOS Boot Partition, where a PC boot loader embeds its core image
    (BIOS, "21686148-6449-6E6F-744E-656564454649", "BIOS Boot Partition"),
    /// Microsoft Reserved Partition
    (MICROSOFT_RESERVED, "E3C9E316-0B5C-4DB8-817D-F92DF00215AE", "Microsoft Reserved Partition"),
    /// Basic Data Partition
    (BASIC, "EBD0A0A2-B9E5-4433-87C0-68B6B72699C7", "Basic Data Partition"),
    /// Linux filesystem data
    (LINUX_FS, "0FC63DAF-8483-4772-8E79-3D69D8477DE4", "Linux Filesystem Data"),
    /// Linux swap
    (LINUX_SWAP, "0657FD6D-A4AB-43C4-84E5-0933C84B4F4F", "Swap Partition"),
    /// Linux LVM
    (LINUX_LVM, "E6D6D379-F507-44C2-A23C-238F2A3DF928", "Logical Volume Manager Partition"),
    /// Linux root (x86-64)
    (LINUX_ROOT_X64, "4F68BCE3-E8CD-4DB1-96E7-FBCAF984B709", "Root Partition (x86-64)"),
    /// Linux root (AArch64)
    (LINUX_ROOT_ARM_64, "B921B045-1DF0-41C3-AF44-4C6F280D3FAE", "Root Partition (64-bit ARM/AArch64)"),
    /// Extended boot loader partition
    (FREEDESK_BOOT, "BC13C2FF-59E6-4262-A352-B275FD6F7172", "Shared Boot Loader Configuration"),
}
