//! Binary format for Tessera log records
//!
//! Every record is a fixed header followed by its payload:
//! RecordHeader (24 bytes) + key_len(u32) + value_len(u32) + key_bytes + value_bytes

use std::path::Path;

use crate::error::{StoreError, StoreResult};

/// Magic bytes opening every record: "TSRA"
pub const MAGIC: [u8; 4] = *b"TSRA";

/// Header size in bytes
pub const HEADER_SIZE: usize = 24;

/// key_len(u32) + value_len(u32)
const LENGTHS_SIZE: usize = 8;

/// Hard ceiling on value length; configured limits sit below this.
pub const MAX_VALUE_SIZE: usize = 128 * 1024 * 1024;

/// Hard ceiling on key length.
pub const MAX_KEY_SIZE: usize = u16::MAX as usize;

/// Logged mutation kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Operation {
    /// Insert or overwrite a key
    Put = 1,
    /// Tombstone a key
    Delete = 2,
}

impl Operation {
    fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(Operation::Put),
            2 => Some(Operation::Delete),
            _ => None,
        }
    }
}

/// Fixed-size record header
///
/// Layout:
///   [0..4]   magic:    "TSRA"
///   [4..8]   length:   u32 LE - payload length in bytes
///   [8..12]  checksum: u32 LE - CRC32C of header bytes [12..24] then the payload
///   [12]     op:       u8     - operation type
///   [13..16] reserved: zero
///   [16..24] sequence: u64 LE - position in the store's mutation order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    pub length: u32,
    pub checksum: u32,
    pub op: u8,
    pub sequence: u64,
}

impl RecordHeader {
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..4].copy_from_slice(&MAGIC);
        buf[4..8].copy_from_slice(&self.length.to_le_bytes());
        buf[8..12].copy_from_slice(&self.checksum.to_le_bytes());
        buf[12] = self.op;
        buf[16..24].copy_from_slice(&self.sequence.to_le_bytes());
        buf
    }

    /// Parse a header; `None` when the magic does not match.
    pub fn from_bytes(bytes: &[u8; HEADER_SIZE]) -> Option<Self> {
        if bytes[0..4] != MAGIC {
            return None;
        }
        Some(Self {
            length: read_u32(bytes, 4),
            checksum: read_u32(bytes, 8),
            op: bytes[12],
            sequence: u64::from_le_bytes(bytes[16..24].try_into().ok()?),
        })
    }
}

/// A decoded log record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub sequence: u64,
    pub op: Operation,
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

/// CRC32C over the header fields after the checksum, continued over the payload.
fn record_checksum(header: &[u8; HEADER_SIZE], payload: &[u8]) -> u32 {
    crc32c::crc32c_append(crc32c::crc32c(&header[12..HEADER_SIZE]), payload)
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

/// Serialize a mutation into a complete record, appending to `out`.
///
/// Sizes are validated before anything is allocated.
pub fn encode_record(
    out: &mut Vec<u8>,
    sequence: u64,
    op: Operation,
    key: &[u8],
    value: &[u8],
) -> StoreResult<()> {
    if key.len() > MAX_KEY_SIZE {
        return Err(StoreError::OversizedEntry {
            component: "key",
            size: key.len() as u64,
            max: MAX_KEY_SIZE as u64,
        });
    }
    if value.len() > MAX_VALUE_SIZE {
        return Err(StoreError::OversizedEntry {
            component: "value",
            size: value.len() as u64,
            max: MAX_VALUE_SIZE as u64,
        });
    }

    let payload_len = LENGTHS_SIZE + key.len() + value.len();
    let start = out.len();
    out.reserve(HEADER_SIZE + payload_len);
    out.extend_from_slice(&[0u8; HEADER_SIZE]);
    out.extend_from_slice(&(key.len() as u32).to_le_bytes());
    out.extend_from_slice(&(value.len() as u32).to_le_bytes());
    out.extend_from_slice(key);
    out.extend_from_slice(value);

    let mut header = RecordHeader {
        length: payload_len as u32,
        checksum: 0,
        op: op as u8,
        sequence,
    };
    header.checksum = record_checksum(&header.to_bytes(), &out[start + HEADER_SIZE..]);
    out[start..start + HEADER_SIZE].copy_from_slice(&header.to_bytes());
    Ok(())
}

/// Outcome of decoding at one offset of a log buffer.
#[derive(Debug)]
pub enum Decoded {
    /// A verified record and the total bytes it occupies
    Record(Record, usize),
    /// The buffer ends inside this record
    Truncated(StoreError),
    /// The bytes at this offset are not a valid record
    Invalid(StoreError),
}

/// Decode the record starting at `offset` in `buf`. `path` is only used for
/// error context.
pub fn decode_record(buf: &[u8], offset: usize, path: &Path) -> Decoded {
    let remaining = buf.len().saturating_sub(offset);
    if remaining < HEADER_SIZE {
        return Decoded::Truncated(StoreError::TornWrite {
            path: path.to_path_buf(),
            offset: offset as u64,
            expected: HEADER_SIZE as u64,
            available: remaining as u64,
        });
    }

    let mut header_bytes = [0u8; HEADER_SIZE];
    header_bytes.copy_from_slice(&buf[offset..offset + HEADER_SIZE]);
    let header = match RecordHeader::from_bytes(&header_bytes) {
        Some(header) => header,
        None => {
            return Decoded::Invalid(StoreError::Corrupted {
                path: path.to_path_buf(),
                offset: offset as u64,
                reason: format!("bad magic {:02x?}", &header_bytes[0..4]),
            })
        }
    };

    let payload_start = offset + HEADER_SIZE;
    let payload_end = payload_start + header.length as usize;
    if payload_end > buf.len() {
        return Decoded::Truncated(StoreError::TornWrite {
            path: path.to_path_buf(),
            offset: offset as u64,
            expected: header.length as u64,
            available: (buf.len() - payload_start) as u64,
        });
    }

    let payload = &buf[payload_start..payload_end];
    let actual = record_checksum(&header_bytes, payload);
    if actual != header.checksum {
        return Decoded::Invalid(StoreError::ChecksumMismatch {
            path: path.to_path_buf(),
            offset: offset as u64,
            expected: header.checksum,
            actual,
        });
    }

    let corrupted = |reason: String| {
        Decoded::Invalid(StoreError::Corrupted {
            path: path.to_path_buf(),
            offset: offset as u64,
            reason,
        })
    };

    let op = match Operation::from_byte(header.op) {
        Some(op) => op,
        None => return corrupted(format!("invalid operation type: {}", header.op)),
    };
    if payload.len() < LENGTHS_SIZE {
        return corrupted("payload too short for length fields".to_string());
    }
    let key_len = read_u32(payload, 0) as usize;
    let value_len = read_u32(payload, 4) as usize;
    if LENGTHS_SIZE + key_len + value_len != payload.len() {
        return corrupted(format!(
            "payload is {} bytes but key({}) + value({}) need {}",
            payload.len(),
            key_len,
            value_len,
            LENGTHS_SIZE + key_len + value_len
        ));
    }

    let key_end = LENGTHS_SIZE + key_len;
    let record = Record {
        sequence: header.sequence,
        op,
        key: payload[LENGTHS_SIZE..key_end].to_vec(),
        value: payload[key_end..].to_vec(),
    };
    Decoded::Record(record, HEADER_SIZE + payload.len())
}

/// Scan forward for the next occurrence of the record magic.
/// Used to resynchronize after a corrupted record.
pub fn find_next_magic(buf: &[u8], start: usize) -> Option<usize> {
    if start >= buf.len() {
        return None;
    }
    buf[start..]
        .windows(MAGIC.len())
        .position(|window| window == MAGIC)
        .map(|pos| start + pos)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(sequence: u64, op: Operation, key: &[u8], value: &[u8]) -> Vec<u8> {
        let mut buf = Vec::new();
        encode_record(&mut buf, sequence, op, key, value).unwrap();
        buf
    }

    fn decode_ok(buf: &[u8]) -> (Record, usize) {
        match decode_record(buf, 0, Path::new("<buffer>")) {
            Decoded::Record(record, len) => (record, len),
            other => panic!("expected record, got {:?}", other),
        }
    }

    #[test]
    fn test_put_record() {
        let buf = encode(7, Operation::Put, b"user:1", b"alice");
        let (record, len) = decode_ok(&buf);
        assert_eq!(len, buf.len());
        assert_eq!(record.sequence, 7);
        assert_eq!(record.op, Operation::Put);
        assert_eq!(record.key, b"user:1");
        assert_eq!(record.value, b"alice");
    }

    #[test]
    fn test_tombstone_record_has_empty_value() {
        let buf = encode(1, Operation::Delete, b"gone", b"");
        let (record, _) = decode_ok(&buf);
        assert_eq!(record.op, Operation::Delete);
        assert!(record.value.is_empty());
    }

    #[test]
    fn test_oversized_key_rejected() {
        let key = vec![0u8; MAX_KEY_SIZE + 1];
        let mut buf = Vec::new();
        let result = encode_record(&mut buf, 0, Operation::Put, &key, b"v");
        assert!(matches!(result, Err(StoreError::OversizedEntry { component: "key", .. })));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_corrupted_magic_detected() {
        let mut buf = encode(1, Operation::Put, b"key", b"value");
        buf[0] = 0xFF;
        assert!(matches!(
            decode_record(&buf, 0, Path::new("<buffer>")),
            Decoded::Invalid(StoreError::Corrupted { .. })
        ));
    }

    #[test]
    fn test_corrupted_payload_detected() {
        let mut buf = encode(1, Operation::Put, b"key", b"value");
        let last = buf.len() - 1;
        buf[last] ^= 0xFF;
        assert!(matches!(
            decode_record(&buf, 0, Path::new("<buffer>")),
            Decoded::Invalid(StoreError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_checksum_covers_op_and_sequence() {
        let clean = encode(1, Operation::Put, b"key", b"value");

        let mut flipped_op = clean.clone();
        flipped_op[12] = Operation::Delete as u8;
        assert!(matches!(
            decode_record(&flipped_op, 0, Path::new("<buffer>")),
            Decoded::Invalid(StoreError::ChecksumMismatch { .. })
        ));

        let mut flipped_sequence = clean;
        flipped_sequence[16] ^= 0x01;
        assert!(matches!(
            decode_record(&flipped_sequence, 0, Path::new("<buffer>")),
            Decoded::Invalid(StoreError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_truncated_record_detected() {
        let buf = encode(1, Operation::Put, b"key", b"value");
        let cut = &buf[..buf.len() - 2];
        assert!(matches!(
            decode_record(cut, 0, Path::new("<buffer>")),
            Decoded::Truncated(StoreError::TornWrite { .. })
        ));
    }

    #[test]
    fn test_find_next_magic_skips_garbage() {
        let mut buf = vec![0xAB; 5];
        let record_at = buf.len();
        buf.extend(encode(3, Operation::Put, b"k", b"v"));
        assert_eq!(find_next_magic(&buf, 0), Some(record_at));
        assert_eq!(find_next_magic(&buf, record_at + 1), None);
    }
}
