//! Binary layout of the encrypted descriptor payload
//!
//! ```text
//! offset  size  field
//!      0     4  magic        (u32, little-endian)
//!      4     4  version      (u32, little-endian)
//!      8     4  flags        (u32, little-endian)
//!     12     4  root id      (u32, little-endian)
//!     16    32  label        (NUL-terminated, zero-padded)
//!     48   128  description  (NUL-terminated, zero-padded)
//!    176     -  zero
//! ```

use cvfs_core::{CoreError, CoreResult};
use cvfs_crypto::PAYLOAD_SIZE;

use crate::{DESCRIPTION_SIZE, LABEL_SIZE};

const LABEL_OFFSET: usize = 16;
const DESCRIPTION_OFFSET: usize = LABEL_OFFSET + LABEL_SIZE;

/// Bytes of payload occupied by the record.
pub const RECORD_SIZE: usize = DESCRIPTION_OFFSET + DESCRIPTION_SIZE;

const _: () = assert!(RECORD_SIZE <= PAYLOAD_SIZE);

/// Fields stored in the encrypted descriptor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SuperblockRecord {
    pub magic: u32,
    pub version: u32,
    pub flags: u32,
    pub root_id: u32,
    pub label: String,
    pub description: String,
}

impl SuperblockRecord {
    /// Serialize into the first [`RECORD_SIZE`] bytes of `payload`. Strings
    /// are cut with [`bounded`] so the last byte of each field stays NUL.
    pub fn encode(&self, payload: &mut [u8]) -> CoreResult<()> {
        let out = record_area_mut(payload)?;
        out[0..4].copy_from_slice(&self.magic.to_le_bytes());
        out[4..8].copy_from_slice(&self.version.to_le_bytes());
        out[8..12].copy_from_slice(&self.flags.to_le_bytes());
        out[12..16].copy_from_slice(&self.root_id.to_le_bytes());
        encode_str(&mut out[LABEL_OFFSET..DESCRIPTION_OFFSET], &self.label);
        encode_str(&mut out[DESCRIPTION_OFFSET..RECORD_SIZE], &self.description);
        Ok(())
    }

    /// Deserialize from decrypted payload bytes. Any byte pattern decodes;
    /// whether it makes sense is for the caller to judge from `magic` and
    /// `version`.
    pub fn decode(payload: &[u8]) -> CoreResult<Self> {
        if payload.len() < RECORD_SIZE {
            return Err(CoreError::InvalidParameter(format!(
                "payload of {} bytes cannot hold a {RECORD_SIZE}-byte record",
                payload.len()
            )));
        }
        Ok(Self {
            magic: read_u32(payload, 0),
            version: read_u32(payload, 4),
            flags: read_u32(payload, 8),
            root_id: read_u32(payload, 12),
            label: decode_str(&payload[LABEL_OFFSET..DESCRIPTION_OFFSET]),
            description: decode_str(&payload[DESCRIPTION_OFFSET..RECORD_SIZE]),
        })
    }
}

fn record_area_mut(payload: &mut [u8]) -> CoreResult<&mut [u8]> {
    let len = payload.len();
    payload.get_mut(..RECORD_SIZE).ok_or_else(|| {
        CoreError::InvalidParameter(format!(
            "payload of {len} bytes cannot hold a {RECORD_SIZE}-byte record"
        ))
    })
}

fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    let mut word = [0u8; 4];
    word.copy_from_slice(&bytes[offset..offset + 4]);
    u32::from_le_bytes(word)
}

/// Cut `text` at its first NUL and to at most `field_size - 1` bytes,
/// backing off to a char boundary.
pub fn bounded(text: &str, field_size: usize) -> String {
    let text = text.split('\0').next().unwrap_or_default();
    let mut end = text.len().min(field_size.saturating_sub(1));
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].to_string()
}

fn encode_str(field: &mut [u8], text: &str) {
    let text = bounded(text, field.len());
    field.fill(0);
    field[..text.len()].copy_from_slice(text.as_bytes());
}

fn decode_str(field: &[u8]) -> String {
    // The last byte is treated as NUL whatever it holds.
    let usable = &field[..field.len().saturating_sub(1)];
    let end = usable.iter().position(|&b| b == 0).unwrap_or(usable.len());
    // Replacement characters are wider than the bytes they stand for.
    bounded(&String::from_utf8_lossy(&usable[..end]), field.len())
}
