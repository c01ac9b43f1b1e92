//! CRC32 as used by GPT headers and partition arrays.

use crc::Crc;

const CRC_32: Crc<u32> = Crc::<u32>::new(&crc::CRC_32_ISO_HDLC);

/// CRC32 (IEEE 802.3 polynomial) of `b`.
///
/// The value is host-order; GPT stores it little-endian.
pub fn crc32(b: &[u8]) -> u32 {
    let mut digest = CRC_32.digest();
    digest.update(b);
    digest.finalize()
}
