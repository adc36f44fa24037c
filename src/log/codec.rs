//! Entry codec
//!
//! Encoding and decoding of log records.
//!
//! ## Record Format
//! ```text
//! ┌──────────┬──────────┬─────────┬─────────┬───────────────┬────────────────┐
//! │ Len (4)  │ CRC (4)  │ Kind(1) │ Type(1) │ Timestamp (8) │ ExpiresAt (8)  │
//! ├──────────┴──┬───────┴─────────┴──┬──────┴───────────────┴────────────────┤
//! │ KeyLen (4)  │ MemberLen (4)      │ ValueLen (4)                          │
//! ├─────────────┴────────────────────┴───────────────────────────────────────┤
//! │ Key | Member | Value                                                     │
//! └──────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! - Len is the total record length, header included, so a reader can bound
//!   check or skip a record without parsing it.
//! - CRC32 covers every byte after the CRC field.
//! - A Len of zero marks the end of written data (zero-filled preallocation).

use bytes::{Buf, BufMut, BytesMut};
use thiserror::Error;

use crate::partition::DataType;

use super::{Entry, EntryKind};

/// Fixed header size: Len + CRC + Kind + Type + Timestamp + ExpiresAt + 3 lengths
pub const HEADER_SIZE: usize = 4 + 4 + 1 + 1 + 8 + 8 + 4 + 4 + 4;

/// Bytes needed to learn a record's length and checksum
pub const PREFIX_SIZE: usize = 8;

/// Reasons a record fails to decode
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("record truncated: need {needed} bytes, have {available}")]
    Truncated { needed: usize, available: usize },

    #[error("invalid record header: declared length {0}")]
    InvalidHeader(u32),

    #[error("checksum mismatch: stored {stored:#010x}, computed {computed:#010x}")]
    ChecksumMismatch { stored: u32, computed: u32 },

    #[error("unknown entry kind {0}")]
    InvalidKind(u8),

    #[error("unknown data type {0}")]
    InvalidDataType(u8),

    #[error("field lengths do not add up to the record length")]
    LengthMismatch,
}

/// Size of `entry` once encoded
pub fn encoded_len(entry: &Entry) -> usize {
    HEADER_SIZE + entry.key.len() + entry.member.len() + entry.value.len()
}

/// Encode an entry to bytes
///
/// Deterministic: the same entry always produces the same bytes.
pub fn encode(entry: &Entry) -> Vec<u8> {
    let total_len = encoded_len(entry);
    let mut buf = BytesMut::with_capacity(total_len);

    buf.put_u32_le(total_len as u32);
    buf.put_u32_le(0); // CRC placeholder
    buf.put_u8(entry.kind as u8);
    buf.put_u8(entry.data_type as u8);
    buf.put_u64_le(entry.timestamp);
    buf.put_u64_le(entry.expires_at);
    buf.put_u32_le(entry.key.len() as u32);
    buf.put_u32_le(entry.member.len() as u32);
    buf.put_u32_le(entry.value.len() as u32);
    buf.put_slice(&entry.key);
    buf.put_slice(&entry.member);
    buf.put_slice(&entry.value);

    let crc = crc32fast::hash(&buf[PREFIX_SIZE..]);
    buf[4..8].copy_from_slice(&crc.to_le_bytes());

    buf.to_vec()
}

/// Read the declared length and stored checksum from a record prefix
///
/// Returns `None` when the prefix is the zero end-of-data marker.
pub fn decode_prefix(bytes: &[u8]) -> Result<Option<(u32, u32)>, CodecError> {
    if bytes.len() < PREFIX_SIZE {
        return Err(CodecError::Truncated {
            needed: PREFIX_SIZE,
            available: bytes.len(),
        });
    }

    let mut prefix = &bytes[..PREFIX_SIZE];
    let total_len = prefix.get_u32_le();
    let crc = prefix.get_u32_le();

    if total_len == 0 {
        return Ok(None);
    }
    if (total_len as usize) < HEADER_SIZE {
        return Err(CodecError::InvalidHeader(total_len));
    }
    Ok(Some((total_len, crc)))
}

/// Decode one entry from the start of `bytes`
///
/// `bytes` may extend past the record; only the declared length is consumed.
pub fn decode(bytes: &[u8]) -> Result<Entry, CodecError> {
    let (total_len, stored_crc) = match decode_prefix(bytes)? {
        Some(prefix) => prefix,
        None => return Err(CodecError::InvalidHeader(0)),
    };
    let total_len = total_len as usize;

    if bytes.len() < total_len {
        return Err(CodecError::Truncated {
            needed: total_len,
            available: bytes.len(),
        });
    }

    let body = &bytes[PREFIX_SIZE..total_len];
    let computed = crc32fast::hash(body);
    if computed != stored_crc {
        return Err(CodecError::ChecksumMismatch {
            stored: stored_crc,
            computed,
        });
    }

    let mut buf = body;
    let kind_byte = buf.get_u8();
    let kind = EntryKind::from_u8(kind_byte).ok_or(CodecError::InvalidKind(kind_byte))?;
    let type_byte = buf.get_u8();
    let data_type =
        DataType::from_u8(type_byte).ok_or(CodecError::InvalidDataType(type_byte))?;
    let timestamp = buf.get_u64_le();
    let expires_at = buf.get_u64_le();
    let key_len = buf.get_u32_le() as usize;
    let member_len = buf.get_u32_le() as usize;
    let value_len = buf.get_u32_le() as usize;

    if key_len + member_len + value_len != buf.remaining() {
        return Err(CodecError::LengthMismatch);
    }

    let key = buf[..key_len].to_vec();
    buf.advance(key_len);
    let member = buf[..member_len].to_vec();
    buf.advance(member_len);
    let value = buf[..value_len].to_vec();

    Ok(Entry {
        kind,
        data_type,
        key,
        member,
        value,
        timestamp,
        expires_at,
    })
}
