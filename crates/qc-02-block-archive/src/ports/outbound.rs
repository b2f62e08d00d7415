//! # Outbound Ports (Driven Ports)
//!
//! Dependencies required by the archiving coordinator, the read path and
//! the consistency checker.

use crate::domain::errors::ArchiveResult;
use crate::domain::manifest::ArchiveManifest;
use crate::domain::watermark::ArchiveWatermark;
use async_trait::async_trait;
use shared_bus::{ArchiveNotification, Subscription};
use shared_types::{Block, Envelope};

/// Persistent per-channel archive bookkeeping.
///
/// Production: `FileArchiveIndex`
/// Testing: `InMemoryArchiveIndex`
pub trait ArchiveIndex: Send + Sync {
    /// End block of a finalized segment.
    fn segment_end_block(&self, segment: u64) -> ArchiveResult<Option<u64>>;

    /// Called by the write path when it finalizes `segment`.
    fn record_segment_end_block(&self, segment: u64, end_block: u64) -> ArchiveResult<()>;

    /// All finalized segments with their end blocks, ascending.
    fn segments(&self) -> ArchiveResult<Vec<(u64, u64)>>;

    fn watermark(&self) -> ArchiveResult<ArchiveWatermark>;

    fn set_watermark(&self, watermark: ArchiveWatermark) -> ArchiveResult<()>;

    /// Lowest finalized segment known to the index.
    fn first_segment(&self) -> ArchiveResult<Option<u64>> {
        Ok(self.segments()?.first().map(|(segment, _)| *segment))
    }

    /// First block of `segment`, derived from the previous segment's end.
    ///
    /// `None` when the predecessor is unknown.
    fn segment_start_block(&self, segment: u64) -> ArchiveResult<Option<u64>> {
        if segment == 0 {
            return Ok(Some(0));
        }
        Ok(self.segment_end_block(segment - 1)?.map(|end| end + 1))
    }
}

/// What the coordinator needs to know about the local write path.
pub trait ChainView: Send + Sync {
    /// Number of committed blocks.
    fn chain_height(&self) -> u64;

    /// Number of the channel's most recent configuration block.
    fn latest_config_block(&self) -> Option<u64>;

    /// Segment numbers present on local disk, ascending.
    fn local_segments(&self) -> ArchiveResult<Vec<u64>>;

    /// Segment currently open for appends.
    fn open_segment(&self) -> u64;

    /// Delete a local segment file. `Ok(false)` when it was already gone.
    fn remove_segment(&self, segment: u64) -> ArchiveResult<bool>;
}

/// Outcome of a successful `send`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferOutcome {
    /// Nothing to do: the local file is gone or the remote copy is complete.
    AlreadyArchived,
    Transferred { bytes: u64 },
}

/// Moves segments to the remote repository.
#[async_trait]
pub trait SegmentTransfer: Send + Sync {
    /// Copy one local segment to the repository.
    ///
    /// ## Errors
    ///
    /// - `RemoteUnreachable`: retry at the next trigger
    /// - `Corruption`: the local segment does not decode
    async fn send(&self, channel_id: &str, segment: u64) -> ArchiveResult<TransferOutcome>;

    /// Publish the cluster-visible manifest for a channel.
    async fn publish_manifest(&self, manifest: &ArchiveManifest) -> ArchiveResult<()>;
}

/// Cluster-facing side of archiving: broadcast and read-through.
#[async_trait]
pub trait NotificationBridge: Send + Sync {
    /// Broadcast an archive notification. Returns the receiver count.
    async fn publish(&self, notification: ArchiveNotification) -> ArchiveResult<usize>;

    /// Archived height the cluster currently reports for `channel_id`.
    async fn read_archived_block_height(&self, channel_id: &str) -> ArchiveResult<Option<u64>>;

    async fn retrieve_block(&self, number: u64, channel_id: &str) -> ArchiveResult<Block>;

    async fn retrieve_transaction(&self, tx_id: &str, channel_id: &str) -> ArchiveResult<Envelope>;

    /// Inbound archive notifications for `channel_id`.
    fn subscribe(&self, channel_id: &str) -> Subscription;
}

/// Identity and policy check for a block's signatures.
pub trait BlockVerifier: Send + Sync {
    /// `Err(reason)` when the block's signatures do not satisfy the policy.
    fn verify_block(&self, channel_id: &str, block: &Block) -> Result<(), String>;
}

/// Random access to a channel's blocks, wherever they live.
#[async_trait]
pub trait BlockSource: Send + Sync {
    fn height(&self) -> u64;

    async fn block_by_number(&self, number: u64) -> ArchiveResult<Block>;
}
