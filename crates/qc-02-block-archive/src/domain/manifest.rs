//! # Remote Archive Manifest
//!
//! A small JSON document the Archiver keeps next to a channel's segments in
//! the remote repository. It is the cluster-visible watermark and tells any
//! peer which archived segment holds a given block.

use super::errors::{ArchiveError, ArchiveResult};
use super::watermark::ArchiveWatermark;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Object name of the manifest inside a channel's remote directory.
pub const MANIFEST_FILE_NAME: &str = "archive_manifest.json";

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ArchiveManifest {
    pub channel_id: String,
    pub watermark: ArchiveWatermark,
    /// Archived segment number -> its end block.
    pub segments: BTreeMap<u64, u64>,
}

impl ArchiveManifest {
    #[must_use]
    pub fn new(channel_id: impl Into<String>) -> Self {
        Self {
            channel_id: channel_id.into(),
            ..Self::default()
        }
    }

    /// Build from index entries, keeping those covered by `watermark`.
    #[must_use]
    pub fn from_index(
        channel_id: impl Into<String>,
        watermark: ArchiveWatermark,
        entries: &[(u64, u64)],
    ) -> Self {
        let segments = match watermark.last_archived_segment {
            Some(last) => entries
                .iter()
                .filter(|(segment, _)| *segment <= last)
                .copied()
                .collect(),
            None => BTreeMap::new(),
        };
        Self {
            channel_id: channel_id.into(),
            watermark,
            segments,
        }
    }

    /// Cluster-visible archived height.
    #[must_use]
    pub fn archived_block_height(&self) -> Option<u64> {
        self.watermark.last_archived_block
    }

    /// Segment holding block `number`, with that segment's end block.
    #[must_use]
    pub fn segment_for_block(&self, number: u64) -> Option<(u64, u64)> {
        if !self.watermark.covers_block(number) {
            return None;
        }
        self.segments
            .iter()
            .find(|(_, end)| **end >= number)
            .map(|(segment, end)| (*segment, *end))
    }

    pub fn to_json(&self) -> ArchiveResult<Vec<u8>> {
        serde_json::to_vec_pretty(self).map_err(ArchiveError::serialization)
    }

    pub fn from_json(bytes: &[u8]) -> ArchiveResult<Self> {
        serde_json::from_slice(bytes).map_err(ArchiveError::serialization)
    }
}
