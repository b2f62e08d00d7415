//! # Segment Transfer
//!
//! Copies finalized local segments into the [`RemoteRepository`].
//!
//! A transfer is idempotent: a remote object with the same size as the
//! local file is treated as a completed earlier attempt and not uploaded
//! again. Segments are validated record by record before upload so a
//! corrupt file never reaches the repository.

use crate::adapters::repository::RemoteRepository;
use crate::domain::errors::{ArchiveError, ArchiveResult};
use crate::domain::framing::RecordCursor;
use crate::domain::manifest::ArchiveManifest;
use crate::domain::segment::segment_path;
use crate::ports::outbound::{SegmentTransfer, TransferOutcome};
use async_trait::async_trait;
use bytes::Bytes;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub struct ObjectStoreTransfer {
    /// Parent of the per-channel segment directories.
    local_root: PathBuf,
    repository: RemoteRepository,
}

impl ObjectStoreTransfer {
    pub fn new(local_root: impl AsRef<Path>, repository: RemoteRepository) -> Self {
        Self {
            local_root: local_root.as_ref().to_path_buf(),
            repository,
        }
    }

    #[must_use]
    pub fn repository(&self) -> &RemoteRepository {
        &self.repository
    }
}

/// Reject a segment image that does not frame cleanly.
fn validate_segment(channel_id: &str, segment: u64, bytes: &[u8]) -> ArchiveResult<usize> {
    let mut records = 0;
    for record in RecordCursor::new(segment, bytes) {
        record.map_err(|e| ArchiveError::Corruption {
            channel: channel_id.to_string(),
            segment,
            reason: e.to_string(),
        })?;
        records += 1;
    }
    Ok(records)
}

#[async_trait]
impl SegmentTransfer for ObjectStoreTransfer {
    async fn send(&self, channel_id: &str, segment: u64) -> ArchiveResult<TransferOutcome> {
        let path = segment_path(&self.local_root.join(channel_id), segment);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                // Deleted after an earlier successful transfer.
                debug!(channel = channel_id, segment, "[qc-02] No local copy to send");
                return Ok(TransferOutcome::AlreadyArchived);
            }
            Err(e) => return Err(ArchiveError::io(format!("read {}", path.display()), e)),
        };

        let records = validate_segment(channel_id, segment, &bytes)?;
        let location = self.repository.segment_location(channel_id, segment);
        let size = bytes.len() as u64;

        if self.repository.head_size(channel_id, &location).await? == Some(size) {
            debug!(channel = channel_id, segment, "[qc-02] Remote copy already complete");
            return Ok(TransferOutcome::AlreadyArchived);
        }

        self.repository
            .put_bytes(channel_id, &location, Bytes::from(bytes))
            .await?;

        info!(
            channel = channel_id,
            segment,
            records,
            bytes = size,
            "[qc-02] Segment transferred to {}",
            self.repository.url()
        );
        Ok(TransferOutcome::Transferred { bytes: size })
    }

    async fn publish_manifest(&self, manifest: &ArchiveManifest) -> ArchiveResult<()> {
        self.repository.store_manifest(manifest).await?;
        debug!(
            channel = %manifest.channel_id,
            segments = manifest.segments.len(),
            "[qc-02] Archive manifest published"
        );
        Ok(())
    }
}
