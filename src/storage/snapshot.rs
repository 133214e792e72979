//! Snapshot file format
//!
//! ## Layout
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ Header (18 bytes)                                            │
//! │   Magic "QSDB" (4) | Format: u16 (2) | Schema version: u32 (4)│
//! │   Payload length: u64 (8)                                    │
//! ├──────────────────────────────────────────────────────────────┤
//! │ Payload (bincode)                                            │
//! ├──────────────────────────────────────────────────────────────┤
//! │ CRC32 over header + payload (4)                              │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//! All integers are little-endian.

use crate::error::{Result, StoreError};

/// Magic bytes identifying a QuoteStore snapshot
pub(crate) const MAGIC: &[u8; 4] = b"QSDB";

/// Current snapshot format version
pub(crate) const FORMAT_VERSION: u16 = 1;

/// Magic (4) + Format (2) + Schema version (4) + Payload length (8)
pub(crate) const HEADER_SIZE: usize = 18;

/// Trailing CRC32
pub(crate) const CRC_SIZE: usize = 4;

/// Frame an encoded payload
pub(crate) fn encode(schema_version: u32, payload: &[u8]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(HEADER_SIZE + payload.len() + CRC_SIZE);
    bytes.extend_from_slice(MAGIC);
    bytes.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    bytes.extend_from_slice(&schema_version.to_le_bytes());
    bytes.extend_from_slice(&(payload.len() as u64).to_le_bytes());
    bytes.extend_from_slice(payload);

    let crc = crc32fast::hash(&bytes);
    bytes.extend_from_slice(&crc.to_le_bytes());
    bytes
}

/// Validate a frame and return `(schema_version, payload)`
pub(crate) fn decode(bytes: &[u8]) -> Result<(u32, &[u8])> {
    if bytes.len() < HEADER_SIZE + CRC_SIZE {
        return Err(StoreError::Corruption(format!(
            "snapshot too small: {} bytes",
            bytes.len()
        )));
    }

    if &bytes[0..4] != MAGIC {
        return Err(StoreError::Corruption(format!(
            "invalid snapshot magic: expected QSDB, got {:?}",
            &bytes[0..4]
        )));
    }

    let format = u16::from_le_bytes([bytes[4], bytes[5]]);
    if format != FORMAT_VERSION {
        return Err(StoreError::Corruption(format!(
            "unsupported snapshot format: {}",
            format
        )));
    }

    let schema_version = u32::from_le_bytes([bytes[6], bytes[7], bytes[8], bytes[9]]);

    let mut len_bytes = [0u8; 8];
    len_bytes.copy_from_slice(&bytes[10..18]);
    let payload_len = u64::from_le_bytes(len_bytes) as usize;

    let expected = HEADER_SIZE
        .checked_add(payload_len)
        .and_then(|n| n.checked_add(CRC_SIZE))
        .ok_or_else(|| StoreError::Corruption("payload length overflow".to_string()))?;
    if bytes.len() != expected {
        return Err(StoreError::Corruption(format!(
            "snapshot length mismatch: header says {} bytes, file has {}",
            expected,
            bytes.len()
        )));
    }

    let body_end = HEADER_SIZE + payload_len;
    let mut crc_bytes = [0u8; CRC_SIZE];
    crc_bytes.copy_from_slice(&bytes[body_end..]);
    let stored = u32::from_le_bytes(crc_bytes);
    let computed = crc32fast::hash(&bytes[..body_end]);
    if stored != computed {
        return Err(StoreError::Corruption(format!(
            "snapshot CRC mismatch: stored {:08x}, computed {:08x}",
            stored, computed
        )));
    }

    Ok((schema_version, &bytes[HEADER_SIZE..body_end]))
}
