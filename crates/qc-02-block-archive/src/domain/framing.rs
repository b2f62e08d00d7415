//! # Record Framing
//!
//! Every record in a segment is `varint(payload_len) || payload`, with the
//! length encoded as an unsigned LEB128 varint (protobuf style). There is no
//! record-level checksum.

use super::errors::{ArchiveError, ArchiveResult};
use super::segment::RecordPlacement;
use bytes::BufMut;

/// Longest possible encoding of a `u64` varint.
pub const MAX_VARINT_LEN: usize = 10;

/// Result of decoding a length prefix from a byte window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarintDecode {
    /// A complete prefix: `value` decoded from the first `len` bytes.
    Complete { value: u64, len: usize },
    /// The window ended before the terminating byte.
    Incomplete,
    /// Ten bytes without a terminator, or a value beyond `u64`.
    Overflow,
}

/// Append `value` as a varint.
pub fn encode_varint(buf: &mut impl BufMut, mut value: u64) {
    while value >= 0x80 {
        buf.put_u8((value as u8) | 0x80);
        value >>= 7;
    }
    buf.put_u8(value as u8);
}

/// Encoded length of `value` in bytes.
#[must_use]
pub fn varint_len(value: u64) -> usize {
    let bits = 64 - (value | 1).leading_zeros() as usize;
    bits.div_ceil(7)
}

/// Decode a varint from the start of `window`.
#[must_use]
pub fn decode_varint(window: &[u8]) -> VarintDecode {
    let mut value: u64 = 0;
    for (i, &byte) in window.iter().take(MAX_VARINT_LEN).enumerate() {
        // The tenth byte may only contribute the top bit of a u64.
        if i == MAX_VARINT_LEN - 1 && byte > 1 {
            return VarintDecode::Overflow;
        }
        value |= u64::from(byte & 0x7f) << (7 * i);
        if byte & 0x80 == 0 {
            return VarintDecode::Complete { value, len: i + 1 };
        }
    }
    if window.len() >= MAX_VARINT_LEN {
        VarintDecode::Overflow
    } else {
        VarintDecode::Incomplete
    }
}

/// Append one framed record.
pub fn encode_record(buf: &mut impl BufMut, payload: &[u8]) {
    encode_varint(buf, payload.len() as u64);
    buf.put_slice(payload);
}

/// Iterates the records of a whole segment image held in memory.
///
/// Used to validate a segment before upload and to decode segments fetched
/// back from the remote repository. Stops after the first error.
pub struct RecordCursor<'a> {
    bytes: &'a [u8],
    segment: u64,
    offset: usize,
    failed: bool,
}

impl<'a> RecordCursor<'a> {
    #[must_use]
    pub fn new(segment: u64, bytes: &'a [u8]) -> Self {
        Self {
            bytes,
            segment,
            offset: 0,
            failed: false,
        }
    }

    fn fail(&mut self, err: ArchiveError) -> Option<ArchiveResult<(&'a [u8], RecordPlacement)>> {
        self.failed = true;
        Some(Err(err))
    }
}

impl<'a> Iterator for RecordCursor<'a> {
    type Item = ArchiveResult<(&'a [u8], RecordPlacement)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.offset == self.bytes.len() {
            return None;
        }

        let start = self.offset;
        let (len, prefix) = match decode_varint(&self.bytes[start..]) {
            VarintDecode::Complete { value, len } => (value, len),
            VarintDecode::Incomplete => {
                return self.fail(ArchiveError::UnexpectedEndOfSegment {
                    segment: self.segment,
                    offset: start as u64,
                })
            }
            VarintDecode::Overflow => {
                return self.fail(ArchiveError::MalformedLength {
                    segment: self.segment,
                    offset: start as u64,
                })
            }
        };

        let payload_start = start + prefix;
        let available = (self.bytes.len() - payload_start) as u64;
        if len > available {
            return self.fail(ArchiveError::UnexpectedEndOfSegment {
                segment: self.segment,
                offset: start as u64,
            });
        }

        let payload_end = payload_start + len as usize;
        self.offset = payload_end;
        Some(Ok((
            &self.bytes[payload_start..payload_end],
            RecordPlacement {
                segment: self.segment,
                record_start_offset: start as u64,
                payload_offset: payload_start as u64,
            },
        )))
    }
}
