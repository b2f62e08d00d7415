//! # Segment Chain Reader
//!
//! Presents consecutive segments as one logical record stream. On a clean
//! end of the current segment the reader moves to the next one at offset 0.
//! A torn write is propagated as-is and the reader does not advance past it.

use super::errors::{ArchiveError, ArchiveResult};
use super::segment::{segment_path, RecordPlacement, SegmentReader, DEFAULT_READ_BUFFER};
use std::path::{Path, PathBuf};
use tracing::debug;

pub struct SegmentChainReader {
    dir: PathBuf,
    current_segment: u64,
    /// `None` follows growth: new segments are picked up as they appear.
    end_segment: Option<u64>,
    reader: SegmentReader,
    buffer_capacity: usize,
}

impl SegmentChainReader {
    pub fn open(
        dir: impl AsRef<Path>,
        start_segment: u64,
        start_offset: u64,
        end_segment: Option<u64>,
    ) -> ArchiveResult<Self> {
        Self::with_buffer_capacity(dir, start_segment, start_offset, end_segment, DEFAULT_READ_BUFFER)
    }

    pub fn with_buffer_capacity(
        dir: impl AsRef<Path>,
        start_segment: u64,
        start_offset: u64,
        end_segment: Option<u64>,
        buffer_capacity: usize,
    ) -> ArchiveResult<Self> {
        if let Some(end) = end_segment {
            if start_segment > end {
                return Err(ArchiveError::InvalidSegmentRange {
                    start: start_segment,
                    end,
                });
            }
        }

        let dir = dir.as_ref().to_path_buf();
        let reader = SegmentReader::with_buffer_capacity(
            segment_path(&dir, start_segment),
            start_segment,
            start_offset,
            buffer_capacity,
        )?;

        Ok(Self {
            dir,
            current_segment: start_segment,
            end_segment,
            reader,
            buffer_capacity,
        })
    }

    #[must_use]
    pub fn current_segment(&self) -> u64 {
        self.current_segment
    }

    /// Offset of the next record within the current segment.
    #[must_use]
    pub fn offset(&self) -> u64 {
        self.reader.offset()
    }

    /// Next record across segment boundaries.
    pub fn next_record(&mut self) -> ArchiveResult<Option<(Vec<u8>, RecordPlacement)>> {
        loop {
            if let Some(record) = self.reader.next_record()? {
                return Ok(Some(record));
            }

            let next = self.current_segment + 1;
            let path = segment_path(&self.dir, next);
            match self.end_segment {
                Some(end) if self.current_segment >= end => return Ok(None),
                // Unbounded: the next segment may simply not exist yet.
                None if !path.exists() => return Ok(None),
                _ => {}
            }

            let reader =
                SegmentReader::with_buffer_capacity(path, next, 0, self.buffer_capacity)?;
            // Either closes now or was already closed; both are fine here.
            let _ = self.reader.close();
            self.reader = reader;
            self.current_segment = next;
            debug!(segment = next, "[qc-02] Chain reader advanced to next segment");
        }
    }

    pub fn close(&mut self) -> ArchiveResult<()> {
        self.reader.close()
    }
}
