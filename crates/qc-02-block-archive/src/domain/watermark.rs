//! # Archive Watermark
//!
//! The highest segment (and its last block) known to be archived. It only
//! moves forward, and one coordinator per channel writes it. Readers take a
//! snapshot through [`SharedWatermark`].

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ArchiveWatermark {
    pub last_archived_segment: Option<u64>,
    pub last_archived_block: Option<u64>,
}

impl ArchiveWatermark {
    #[must_use]
    pub fn new(segment: u64, end_block: u64) -> Self {
        Self {
            last_archived_segment: Some(segment),
            last_archived_block: Some(end_block),
        }
    }

    /// Block number used in height arithmetic; 0 when nothing is archived.
    #[must_use]
    pub fn block_floor(&self) -> u64 {
        self.last_archived_block.unwrap_or(0)
    }

    /// Segment following the last archived one, if any is archived.
    #[must_use]
    pub fn next_segment(&self) -> Option<u64> {
        self.last_archived_segment.map(|s| s + 1)
    }

    #[must_use]
    pub fn covers_block(&self, number: u64) -> bool {
        self.last_archived_block.is_some_and(|b| number <= b)
    }

    #[must_use]
    pub fn covers_segment(&self, segment: u64) -> bool {
        self.last_archived_segment.is_some_and(|s| segment <= s)
    }

    /// Move forward to `(segment, end_block)`. Never moves backwards.
    ///
    /// Returns whether anything changed.
    pub fn advance(&mut self, segment: u64, end_block: u64) -> bool {
        let forward = self.last_archived_segment.map_or(true, |s| segment > s);
        if forward {
            self.last_archived_segment = Some(segment);
            self.last_archived_block = Some(
                self.last_archived_block
                    .map_or(end_block, |b| b.max(end_block)),
            );
        }
        forward
    }
}

/// Synchronized view of a channel's watermark.
#[derive(Debug, Clone, Default)]
pub struct SharedWatermark(Arc<RwLock<ArchiveWatermark>>);

impl SharedWatermark {
    #[must_use]
    pub fn new(initial: ArchiveWatermark) -> Self {
        Self(Arc::new(RwLock::new(initial)))
    }

    /// Snapshot.
    #[must_use]
    pub fn get(&self) -> ArchiveWatermark {
        *self.0.read()
    }

    /// Publish a newer watermark. Older values are ignored.
    pub fn store(&self, watermark: ArchiveWatermark) {
        let mut current = self.0.write();
        if let (Some(segment), Some(block)) =
            (watermark.last_archived_segment, watermark.last_archived_block)
        {
            current.advance(segment, block);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_watermark() {
        let wm = ArchiveWatermark::default();
        assert_eq!(wm.block_floor(), 0);
        assert_eq!(wm.next_segment(), None);
        assert!(!wm.covers_block(0));
        assert!(!wm.covers_segment(0));
    }

    #[test]
    fn test_advance_is_monotonic() {
        let mut wm = ArchiveWatermark::default();
        assert!(wm.advance(1, 100));
        assert!(wm.advance(2, 200));
        assert!(!wm.advance(1, 100));
        assert_eq!(wm, ArchiveWatermark::new(2, 200));
        assert!(wm.covers_block(200));
        assert!(!wm.covers_block(201));
        assert!(wm.covers_segment(2));
        assert!(!wm.covers_segment(3));
        assert_eq!(wm.next_segment(), Some(3));
    }

    #[test]
    fn test_shared_watermark_ignores_regression() {
        let shared = SharedWatermark::default();
        shared.store(ArchiveWatermark::new(4, 400));
        shared.store(ArchiveWatermark::new(3, 300));
        shared.store(ArchiveWatermark::default());
        assert_eq!(shared.get(), ArchiveWatermark::new(4, 400));

        let reader = shared.clone();
        shared.store(ArchiveWatermark::new(5, 500));
        assert_eq!(reader.get().last_archived_block, Some(500));
    }
}
