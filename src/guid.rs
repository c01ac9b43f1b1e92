//! GUID helpers.
//!
//! GPT stores GUIDs "mixed-endian": the first three fields are little-endian
//! integers, the last eight bytes are stored as-is.

use simple_bytes::BytesRead;
use uuid::Uuid;

/// Decode a raw on-disk GUID.
pub fn from_disk_bytes(raw: &[u8; 16]) -> Uuid {
    Uuid::from_bytes_le(*raw)
}

/// Encode a GUID the way GPT stores it.
pub fn to_disk_bytes(guid: &Uuid) -> [u8; 16] {
    guid.to_bytes_le()
}

/// Read a GUID from a byte reader. `None` if fewer than 16 bytes remain.
pub fn parse_guid<R: BytesRead>(rdr: &mut R) -> Option<Uuid> {
    if rdr.remaining().len() < 16 {
        return None;
    }
    let mut raw = [0u8; 16];
    raw.copy_from_slice(rdr.read(16));
    Some(from_disk_bytes(&raw))
}

/// Canonical `XXXXXXXX-XXXX-XXXX-XXXX-XXXXXXXXXXXX` form of a raw GUID.
pub fn format_guid(raw: &[u8; 16]) -> String {
    from_disk_bytes(raw)
        .as_hyphenated()
        .encode_upper(&mut Uuid::encode_buffer())
        .to_owned()
}
