//! # Segment Reader
//!
//! Sequential reader over one segment file.
//!
//! A segment can be read while the writer is still appending to it, so the
//! reader re-checks the file size before every record. Reaching the current
//! end of file exactly is a clean end (`Ok(None)`). Running out of bytes in
//! the middle of a record is a torn write (`UnexpectedEndOfSegment`), which
//! tells the writer where to resume.

use super::errors::{ArchiveError, ArchiveResult};
use super::framing::{decode_varint, VarintDecode, MAX_VARINT_LEN};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{ErrorKind, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

/// File name prefix shared by all segments.
pub const SEGMENT_FILE_PREFIX: &str = "segment_";

/// Default read buffer size.
pub const DEFAULT_READ_BUFFER: usize = 64 * 1024;

/// `segment_000042`
#[must_use]
pub fn segment_file_name(segment: u64) -> String {
    format!("{SEGMENT_FILE_PREFIX}{segment:06}")
}

#[must_use]
pub fn segment_path(dir: &Path, segment: u64) -> PathBuf {
    dir.join(segment_file_name(segment))
}

/// Inverse of [`segment_file_name`].
#[must_use]
pub fn parse_segment_file_name(name: &str) -> Option<u64> {
    let digits = name.strip_prefix(SEGMENT_FILE_PREFIX)?;
    if digits.len() < 6 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Segment numbers present in `dir`, ascending. A missing directory has none.
pub fn list_segments(dir: &Path) -> ArchiveResult<Vec<u64>> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(ArchiveError::io(format!("list {}", dir.display()), e)),
    };

    let mut segments = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| ArchiveError::io(format!("list {}", dir.display()), e))?;
        if let Some(n) = entry.file_name().to_str().and_then(parse_segment_file_name) {
            segments.push(n);
        }
    }
    segments.sort_unstable();
    Ok(segments)
}

/// Where a record's length prefix and payload begin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordPlacement {
    pub segment: u64,
    pub record_start_offset: u64,
    pub payload_offset: u64,
}

/// Sequential record reader over one segment file.
pub struct SegmentReader {
    segment: u64,
    path: PathBuf,
    file: Option<File>,
    buf: Vec<u8>,
    /// Next unconsumed byte in `buf`.
    pos: usize,
    /// End of valid bytes in `buf`.
    filled: usize,
    /// File offset of `buf[pos]`.
    offset: u64,
}

impl SegmentReader {
    /// Open `path` positioned exactly at `start_offset`.
    pub fn open(path: impl AsRef<Path>, segment: u64, start_offset: u64) -> ArchiveResult<Self> {
        Self::with_buffer_capacity(path, segment, start_offset, DEFAULT_READ_BUFFER)
    }

    /// Like [`open`](Self::open) with an explicit read buffer size.
    pub fn with_buffer_capacity(
        path: impl AsRef<Path>,
        segment: u64,
        start_offset: u64,
        capacity: usize,
    ) -> ArchiveResult<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(ArchiveError::SegmentNotFound { segment, path })
            }
            Err(e) => return Err(ArchiveError::io(format!("open {}", path.display()), e)),
        };

        let file_size = file
            .metadata()
            .map_err(|e| ArchiveError::io(format!("stat {}", path.display()), e))?
            .len();
        if start_offset > file_size {
            return Err(ArchiveError::InvalidStartOffset {
                segment,
                requested: start_offset,
                file_size,
            });
        }

        let positioned = file
            .seek(SeekFrom::Start(start_offset))
            .map_err(|e| ArchiveError::io(format!("seek {}", path.display()), e))?;
        if positioned != start_offset {
            return Err(ArchiveError::InvalidStartOffset {
                segment,
                requested: start_offset,
                file_size,
            });
        }

        Ok(Self {
            segment,
            path,
            file: Some(file),
            buf: vec![0u8; capacity.max(MAX_VARINT_LEN)],
            pos: 0,
            filled: 0,
            offset: start_offset,
        })
    }

    #[must_use]
    pub fn segment(&self) -> u64 {
        self.segment
    }

    /// File offset of the next record.
    #[must_use]
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Read the next record.
    ///
    /// Returns `Ok(None)` when the cursor sits exactly at the current end of
    /// file.
    pub fn next_record(&mut self) -> ArchiveResult<Option<(Vec<u8>, RecordPlacement)>> {
        let file_size = self.current_size()?;
        if self.offset == file_size {
            return Ok(None);
        }
        if self.offset > file_size {
            // The file shrank under us; whatever was here is gone.
            return Err(self.torn(self.offset));
        }

        let record_start = self.offset;
        let remaining = file_size - record_start;
        let window = remaining.min(MAX_VARINT_LEN as u64) as usize;
        self.fill_at_least(window)?;

        let (len, prefix) = match decode_varint(&self.buf[self.pos..self.pos + window]) {
            VarintDecode::Complete { value, len } => (value, len),
            VarintDecode::Incomplete => return Err(self.torn(record_start)),
            VarintDecode::Overflow => {
                return Err(ArchiveError::MalformedLength {
                    segment: self.segment,
                    offset: record_start,
                })
            }
        };

        let payload_offset = record_start + prefix as u64;
        if len > file_size - payload_offset {
            return Err(self.torn(record_start));
        }

        self.consume(prefix);
        let payload = self.read_payload(len as usize, record_start)?;

        Ok(Some((
            payload,
            RecordPlacement {
                segment: self.segment,
                record_start_offset: record_start,
                payload_offset,
            },
        )))
    }

    /// Release the file handle. A second close reports `AlreadyClosed`.
    pub fn close(&mut self) -> ArchiveResult<()> {
        match self.file.take() {
            Some(_) => Ok(()),
            None => Err(ArchiveError::AlreadyClosed),
        }
    }

    fn file(&mut self) -> ArchiveResult<&mut File> {
        self.file.as_mut().ok_or(ArchiveError::AlreadyClosed)
    }

    fn current_size(&mut self) -> ArchiveResult<u64> {
        let path = self.path.display().to_string();
        self.file()?
            .metadata()
            .map(|m| m.len())
            .map_err(|e| ArchiveError::io(format!("stat {path}"), e))
    }

    fn torn(&self, offset: u64) -> ArchiveError {
        ArchiveError::UnexpectedEndOfSegment {
            segment: self.segment,
            offset,
        }
    }

    fn buffered(&self) -> usize {
        self.filled - self.pos
    }

    fn consume(&mut self, n: usize) {
        self.pos += n;
        self.offset += n as u64;
    }

    /// Make at least `n` bytes available at `buf[pos..]`, compacting first.
    fn fill_at_least(&mut self, n: usize) -> ArchiveResult<()> {
        if self.buffered() >= n {
            return Ok(());
        }
        self.buf.copy_within(self.pos..self.filled, 0);
        self.filled -= self.pos;
        self.pos = 0;
        if self.buf.len() < n {
            self.buf.resize(n, 0);
        }

        while self.filled < n {
            let filled = self.filled;
            let path = self.path.display().to_string();
            let file = self.file.as_mut().ok_or(ArchiveError::AlreadyClosed)?;
            let read = match file.read(&mut self.buf[filled..]) {
                Ok(read) => read,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(ArchiveError::io(format!("read {path}"), e)),
            };
            if read == 0 {
                return Err(self.torn(self.offset));
            }
            self.filled += read;
        }
        Ok(())
    }

    fn read_payload(&mut self, len: usize, record_start: u64) -> ArchiveResult<Vec<u8>> {
        let mut payload = Vec::with_capacity(len);

        let from_buffer = self.buffered().min(len);
        payload.extend_from_slice(&self.buf[self.pos..self.pos + from_buffer]);
        self.consume(from_buffer);

        let rest = len - from_buffer;
        if rest == 0 {
            return Ok(payload);
        }

        if rest >= self.buf.len() {
            // Large payloads bypass the buffer; the file position equals
            // `offset` because the buffer is drained.
            payload.resize(len, 0);
            let path = self.path.display().to_string();
            let segment = self.segment;
            let file = self.file()?;
            match file.read_exact(&mut payload[from_buffer..]) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                    return Err(ArchiveError::UnexpectedEndOfSegment {
                        segment,
                        offset: record_start,
                    })
                }
                Err(e) => return Err(ArchiveError::io(format!("read {path}"), e)),
            }
            self.offset += rest as u64;
        } else {
            self.fill_at_least(rest)
                .map_err(|e| match e {
                    ArchiveError::UnexpectedEndOfSegment { segment, .. } => {
                        ArchiveError::UnexpectedEndOfSegment {
                            segment,
                            offset: record_start,
                        }
                    }
                    other => other,
                })?;
            payload.extend_from_slice(&self.buf[self.pos..self.pos + rest]);
            self.consume(rest);
        }
        Ok(payload)
    }
}

#[cfg(test)]
mod tests;
