use crate::domain::errors::ArchiveResult;
use crate::domain::watermark::ArchiveWatermark;
use crate::ports::outbound::ArchiveIndex;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// In-memory archive index for unit tests and ephemeral nodes.
#[derive(Default)]
pub struct InMemoryArchiveIndex {
    ends: RwLock<BTreeMap<u64, u64>>,
    watermark: RwLock<ArchiveWatermark>,
    watermark_writes: AtomicU64,
}

impl InMemoryArchiveIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populated with finalized segments.
    pub fn with_segments(entries: &[(u64, u64)]) -> Self {
        let index = Self::default();
        index.ends.write().extend(entries.iter().copied());
        index
    }

    /// How many times the watermark was persisted.
    pub fn watermark_writes(&self) -> u64 {
        self.watermark_writes.load(Ordering::Relaxed)
    }
}

impl ArchiveIndex for InMemoryArchiveIndex {
    fn segment_end_block(&self, segment: u64) -> ArchiveResult<Option<u64>> {
        Ok(self.ends.read().get(&segment).copied())
    }

    fn record_segment_end_block(&self, segment: u64, end_block: u64) -> ArchiveResult<()> {
        self.ends.write().insert(segment, end_block);
        Ok(())
    }

    fn segments(&self) -> ArchiveResult<Vec<(u64, u64)>> {
        Ok(self.ends.read().iter().map(|(s, e)| (*s, *e)).collect())
    }

    fn watermark(&self) -> ArchiveResult<ArchiveWatermark> {
        Ok(*self.watermark.read())
    }

    fn set_watermark(&self, watermark: ArchiveWatermark) -> ArchiveResult<()> {
        *self.watermark.write() = watermark;
        self.watermark_writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}
