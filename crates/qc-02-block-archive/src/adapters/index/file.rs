use crate::domain::errors::{ArchiveError, ArchiveResult};
use crate::domain::watermark::ArchiveWatermark;
use crate::ports::outbound::ArchiveIndex;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Default file name inside a channel directory.
pub const INDEX_FILE_NAME: &str = "archive_index.json";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct IndexState {
    watermark: ArchiveWatermark,
    /// Finalized segment -> end block.
    segments: BTreeMap<u64, u64>,
}

/// File-backed archive index.
///
/// Keeps the whole index in memory and rewrites a small JSON file on every
/// change, atomically via a temp file and rename. The watermark written
/// here survives restarts. A change becomes visible only once it is on disk.
pub struct FileArchiveIndex {
    state: Mutex<IndexState>,
    path: PathBuf,
}

impl FileArchiveIndex {
    /// Open (or create on first write) the index at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> ArchiveResult<Self> {
        let path = path.as_ref().to_path_buf();
        let state = match std::fs::read(&path) {
            Ok(bytes) => {
                let state: IndexState =
                    serde_json::from_slice(&bytes).map_err(|e| ArchiveError::Index {
                        message: format!("{}: {e}", path.display()),
                    })?;
                info!(
                    "[qc-02] Loaded archive index from {} ({} segments, watermark {:?})",
                    path.display(),
                    state.segments.len(),
                    state.watermark.last_archived_segment
                );
                state
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                info!("[qc-02] No archive index at {}", path.display());
                IndexState::default()
            }
            Err(e) => return Err(ArchiveError::io(format!("read {}", path.display()), e)),
        };

        Ok(Self {
            state: Mutex::new(state),
            path,
        })
    }

    /// Index file for a channel directory.
    pub fn in_channel_dir<P: AsRef<Path>>(dir: P) -> ArchiveResult<Self> {
        Self::open(dir.as_ref().join(INDEX_FILE_NAME))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn save(&self, state: &IndexState) -> ArchiveResult<()> {
        let io_err = |e: std::io::Error| ArchiveError::io(format!("write {}", self.path.display()), e);

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        let bytes = serde_json::to_vec(state).map_err(ArchiveError::serialization)?;

        // Write atomically via temp file
        let temp_path = self.path.with_extension("tmp");
        let mut file = std::fs::File::create(&temp_path).map_err(io_err)?;
        file.write_all(&bytes).map_err(io_err)?;
        file.sync_all().map_err(io_err)?;
        std::fs::rename(&temp_path, &self.path).map_err(io_err)?;
        Ok(())
    }
}

impl ArchiveIndex for FileArchiveIndex {
    fn segment_end_block(&self, segment: u64) -> ArchiveResult<Option<u64>> {
        Ok(self.state.lock().segments.get(&segment).copied())
    }

    fn record_segment_end_block(&self, segment: u64, end_block: u64) -> ArchiveResult<()> {
        let mut state = self.state.lock();
        if state.segments.get(&segment) == Some(&end_block) {
            return Ok(());
        }
        let mut next = state.clone();
        if let Some(previous) = next.segments.insert(segment, end_block) {
            warn!(
                segment,
                previous, end_block, "[qc-02] Segment end block rewritten"
            );
        }
        self.save(&next)?;
        *state = next;
        Ok(())
    }

    fn segments(&self) -> ArchiveResult<Vec<(u64, u64)>> {
        Ok(self
            .state
            .lock()
            .segments
            .iter()
            .map(|(s, e)| (*s, *e))
            .collect())
    }

    fn watermark(&self) -> ArchiveResult<ArchiveWatermark> {
        Ok(self.state.lock().watermark)
    }

    fn set_watermark(&self, watermark: ArchiveWatermark) -> ArchiveResult<()> {
        let mut state = self.state.lock();
        let next = IndexState {
            watermark,
            ..state.clone()
        };
        self.save(&next)?;
        *state = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_state_survives_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let index = FileArchiveIndex::in_channel_dir(dir.path()).unwrap();
            index.record_segment_end_block(0, 9).unwrap();
            index.record_segment_end_block(1, 19).unwrap();
            index.set_watermark(ArchiveWatermark::new(0, 9)).unwrap();
        }

        let index = FileArchiveIndex::in_channel_dir(dir.path()).unwrap();
        assert_eq!(index.segments().unwrap(), vec![(0, 9), (1, 19)]);
        assert_eq!(index.watermark().unwrap(), ArchiveWatermark::new(0, 9));
        assert!(!index.path().with_extension("tmp").exists());
    }

    #[test]
    fn test_missing_file_is_empty_index() {
        let dir = TempDir::new().unwrap();
        let index = FileArchiveIndex::open(dir.path().join("nested").join("idx.json")).unwrap();
        assert!(index.segments().unwrap().is_empty());
        assert_eq!(index.watermark().unwrap(), ArchiveWatermark::default());
        // First write creates the parent directory.
        index.record_segment_end_block(0, 3).unwrap();
        assert!(index.path().exists());
    }

    #[test]
    fn test_failed_write_leaves_state_unchanged() {
        let dir = TempDir::new().unwrap();
        let index = FileArchiveIndex::in_channel_dir(dir.path()).unwrap();
        index.record_segment_end_block(1, 100).unwrap();
        index.set_watermark(ArchiveWatermark::new(1, 100)).unwrap();

        // A directory in the temp file's place makes every save fail.
        let temp_path = index.path().with_extension("tmp");
        std::fs::create_dir(&temp_path).unwrap();

        assert!(index.set_watermark(ArchiveWatermark::new(2, 200)).is_err());
        assert!(index.record_segment_end_block(2, 200).is_err());
        assert_eq!(index.watermark().unwrap(), ArchiveWatermark::new(1, 100));
        assert_eq!(index.segment_end_block(2).unwrap(), None);

        std::fs::remove_dir(&temp_path).unwrap();
        index.set_watermark(ArchiveWatermark::new(2, 200)).unwrap();
        let reopened = FileArchiveIndex::in_channel_dir(dir.path()).unwrap();
        assert_eq!(reopened.watermark().unwrap(), ArchiveWatermark::new(2, 200));
    }

    #[test]
    fn test_garbage_file_is_index_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(INDEX_FILE_NAME);
        std::fs::write(&path, b"not json").unwrap();
        assert!(matches!(
            FileArchiveIndex::open(&path),
            Err(ArchiveError::Index { .. })
        ));
    }
}
