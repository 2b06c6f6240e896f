//! Vault wire format with explicit detection and migration.
//!
//! # Current format
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │ MAGIC: [u8; 4] = "SVLT"                         │
//! ├─────────────────────────────────────────────────┤
//! │ VERSION: u16 (little-endian)                    │
//! ├─────────────────────────────────────────────────┤
//! │ SLOT_COUNT: u16                                 │
//! ├─────────────────────────────────────────────────┤
//! │ Per slot:                                       │
//! │   PRESENT: u8 (0 = empty, 1 = occupied)         │
//! │   if occupied:                                  │
//! │     PAYLOAD_LEN: u32                            │
//! │     PAYLOAD: [u8]                               │
//! ├─────────────────────────────────────────────────┤
//! │ CRC32 (iSCSI polynomial) over everything above  │
//! └─────────────────────────────────────────────────┘
//! ```
//!
//! # Legacy format
//!
//! Headerless bincode of `Vec<Option<Vec<u8>>>`, the representation the
//! engine wrote before the framed format existed. Detection is by magic
//! mismatch. Legacy records decode normally; the coordinator schedules a
//! background re-save in the current format (write-back migration) so
//! the read path never blocks on the rewrite.

use crate::types::{Item, Vault};
use bytes::Bytes;
use crc::{Crc, CRC_32_ISCSI};
use thiserror::Error;

/// Magic number for framed vault records.
pub const MAGIC: [u8; 4] = *b"SVLT";

/// Current format version.
pub const VERSION: u16 = 1;

/// Fixed prefix size: magic + version + slot count.
const PREFIX_SIZE: usize = 8;

/// Trailing checksum size.
const CRC_SIZE: usize = 4;

/// CRC-32 calculator (iSCSI polynomial).
const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISCSI);

/// Which representation a stored record uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatTag {
    /// The framed, checksummed current format.
    Current,
    /// The pre-framing bincode representation.
    Legacy,
}

/// Wire format errors. All map to corrupt data from the engine's view;
/// the durable bytes are left untouched.
#[derive(Error, Debug)]
pub enum FormatError {
    /// Record too short to contain a valid frame.
    #[error("record truncated at {offset} bytes")]
    Truncated {
        /// Byte offset where data ran out.
        offset: usize,
    },

    /// Version newer than this build understands.
    #[error("unsupported format version {0}")]
    UnsupportedVersion(u16),

    /// Slot count above the configured sanity cap.
    #[error("slot count {count} exceeds cap {max}")]
    TooManySlots {
        /// Decoded slot count.
        count: usize,
        /// Configured cap.
        max: usize,
    },

    /// Checksum mismatch.
    #[error("checksum mismatch: stored {stored:#010x}, computed {computed:#010x}")]
    ChecksumMismatch {
        /// Checksum stored in the record.
        stored: u32,
        /// Checksum computed over the payload.
        computed: u32,
    },

    /// Legacy bincode payload failed to deserialize.
    #[error("legacy record unreadable: {0}")]
    Legacy(String),
}

/// Detect which format `bytes` is in.
///
/// Records shorter than the frame prefix cannot be framed and are
/// treated as legacy; the legacy decoder produces the real diagnostic.
pub fn detect(bytes: &[u8]) -> FormatTag {
    if bytes.len() >= PREFIX_SIZE && bytes[0..4] == MAGIC {
        FormatTag::Current
    } else {
        FormatTag::Legacy
    }
}

/// Encode a vault in the current format.
///
/// Placeholder items are written as empty slots, so a decode of the
/// result is a normalized fixed point: re-encoding reproduces identical
/// bytes.
pub fn encode(vault: &Vault) -> Bytes {
    let mut buf = Vec::with_capacity(PREFIX_SIZE + vault.capacity() + CRC_SIZE);

    buf.extend_from_slice(&MAGIC);
    buf.extend_from_slice(&VERSION.to_le_bytes());
    buf.extend_from_slice(&(vault.capacity() as u16).to_le_bytes());

    for index in 0..vault.capacity() {
        match vault.slot(index) {
            Some(item) => {
                buf.push(1);
                let payload = item.payload();
                buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
                buf.extend_from_slice(payload);
            }
            None => buf.push(0),
        }
    }

    let crc = CRC32.checksum(&buf);
    buf.extend_from_slice(&crc.to_le_bytes());

    Bytes::from(buf)
}

/// Decode a record previously identified by [`detect`].
///
/// `max_slots` is a sanity cap on the decoded slot count; anything above
/// it is rejected as corrupt rather than allocated.
pub fn decode(tag: FormatTag, bytes: &[u8], max_slots: usize) -> Result<Vault, FormatError> {
    match tag {
        FormatTag::Current => decode_current(bytes, max_slots),
        FormatTag::Legacy => decode_legacy(bytes, max_slots),
    }
}

fn decode_current(bytes: &[u8], max_slots: usize) -> Result<Vault, FormatError> {
    if bytes.len() < PREFIX_SIZE + CRC_SIZE {
        return Err(FormatError::Truncated { offset: bytes.len() });
    }

    let version = u16::from_le_bytes([bytes[4], bytes[5]]);
    if version > VERSION {
        return Err(FormatError::UnsupportedVersion(version));
    }

    let body_len = bytes.len() - CRC_SIZE;
    let stored = u32::from_le_bytes(bytes[body_len..].try_into().expect("crc slice is 4 bytes"));
    let computed = CRC32.checksum(&bytes[..body_len]);
    if stored != computed {
        return Err(FormatError::ChecksumMismatch { stored, computed });
    }

    let slot_count = u16::from_le_bytes([bytes[6], bytes[7]]) as usize;
    if slot_count > max_slots {
        return Err(FormatError::TooManySlots {
            count: slot_count,
            max: max_slots,
        });
    }

    let mut slots = Vec::with_capacity(slot_count);
    let mut offset = PREFIX_SIZE;
    for _ in 0..slot_count {
        if offset >= body_len {
            return Err(FormatError::Truncated { offset });
        }
        let present = bytes[offset];
        offset += 1;

        if present == 0 {
            slots.push(None);
            continue;
        }

        if offset + 4 > body_len {
            return Err(FormatError::Truncated { offset });
        }
        let len = u32::from_le_bytes(
            bytes[offset..offset + 4]
                .try_into()
                .expect("length slice is 4 bytes"),
        ) as usize;
        offset += 4;

        if offset + len > body_len {
            return Err(FormatError::Truncated { offset });
        }
        slots.push(Some(Item::new(bytes[offset..offset + len].to_vec())));
        offset += len;
    }

    if offset != body_len {
        // Trailing garbage would silently vanish on re-encode.
        return Err(FormatError::Truncated { offset });
    }

    Ok(Vault::from_slots(slots))
}

fn decode_legacy(bytes: &[u8], max_slots: usize) -> Result<Vault, FormatError> {
    let raw: Vec<Option<Vec<u8>>> =
        bincode::deserialize(bytes).map_err(|e| FormatError::Legacy(e.to_string()))?;

    if raw.len() > max_slots {
        return Err(FormatError::TooManySlots {
            count: raw.len(),
            max: max_slots,
        });
    }

    Ok(Vault::from_slots(
        raw.into_iter()
            .map(|slot| slot.map(Item::new))
            .collect(),
    ))
}

/// Encode a vault in the legacy representation. Test-only seeding helper
/// for exercising the migration path.
#[cfg(test)]
pub fn encode_legacy(vault: &Vault) -> Bytes {
    let raw: Vec<Option<Vec<u8>>> = (0..vault.capacity())
        .map(|i| vault.slot(i).map(|item| item.payload().to_vec()))
        .collect();
    Bytes::from(bincode::serialize(&raw).expect("legacy encoding of in-memory slots"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_vault() -> Vault {
        let mut vault = Vault::empty(18);
        vault.set_slot(0, Some(Item::new(vec![1, 2, 3])));
        vault.set_slot(9, Some(Item::new(vec![4])));
        vault.set_slot(17, Some(Item::new(vec![5, 6])));
        vault
    }

    #[test]
    fn round_trip_current() {
        let vault = sample_vault();
        let bytes = encode(&vault);

        assert_eq!(detect(&bytes), FormatTag::Current);
        let decoded = decode(FormatTag::Current, &bytes, 256).unwrap();
        assert_eq!(decoded, vault);
    }

    #[test]
    fn encode_is_a_fixed_point() {
        let vault = sample_vault();
        let first = encode(&vault);
        let decoded = decode(FormatTag::Current, &first, 256).unwrap();
        let second = encode(&decoded);
        assert_eq!(first, second);
    }

    #[test]
    fn placeholders_normalize_to_empty() {
        let mut vault = Vault::empty(9);
        vault.set_slot(2, Some(Item::new(Vec::new())));
        let bytes = encode(&vault);
        let decoded = decode(FormatTag::Current, &bytes, 256).unwrap();
        assert!(decoded.slot(2).is_none());
    }

    #[test]
    fn legacy_detect_and_decode() {
        let vault = sample_vault();
        let bytes = encode_legacy(&vault);

        assert_eq!(detect(&bytes), FormatTag::Legacy);
        let decoded = decode(FormatTag::Legacy, &bytes, 256).unwrap();
        assert_eq!(decoded, vault);
    }

    #[test]
    fn corrupted_payload_fails_checksum() {
        let vault = sample_vault();
        let mut bytes = encode(&vault).to_vec();
        let mid = bytes.len() / 2;
        bytes[mid] ^= 0xff;

        let err = decode(FormatTag::Current, &bytes, 256).unwrap_err();
        assert!(matches!(err, FormatError::ChecksumMismatch { .. }));
    }

    #[test]
    fn newer_version_rejected() {
        let vault = sample_vault();
        let mut bytes = encode(&vault).to_vec();
        bytes[4..6].copy_from_slice(&(VERSION + 1).to_le_bytes());

        let err = decode(FormatTag::Current, &bytes, 256).unwrap_err();
        assert!(matches!(err, FormatError::UnsupportedVersion(_)));
    }

    #[test]
    fn oversized_slot_count_rejected() {
        let vault = Vault::empty(100);
        let bytes = encode(&vault);
        let err = decode(FormatTag::Current, &bytes, 54).unwrap_err();
        assert!(matches!(err, FormatError::TooManySlots { .. }));
    }

    #[test]
    fn truncated_record_rejected() {
        let vault = sample_vault();
        let bytes = encode(&vault);
        let cut = &bytes[..bytes.len() - 6];
        // The cut invalidates the checksum before slot parsing even runs.
        assert!(decode(FormatTag::Current, cut, 256).is_err());
    }

    #[test]
    fn garbage_is_legacy_and_unreadable() {
        let garbage = [0xde, 0xad, 0xbe, 0xef, 0x01];
        assert_eq!(detect(&garbage), FormatTag::Legacy);
        assert!(decode(FormatTag::Legacy, &garbage, 256).is_err());
    }
}
