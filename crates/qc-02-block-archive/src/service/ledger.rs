//! # Archived Ledger
//!
//! Read API of one channel over local and archived blocks. Blocks still on
//! disk are served from the segment store; blocks whose segment was
//! discarded are fetched through the notification bridge's read-through.
//! With archiving disabled only local data is served.

use crate::domain::config::ArchivingRole;
use crate::domain::errors::{ArchiveError, ArchiveResult};
use crate::domain::watermark::SharedWatermark;
use crate::ports::outbound::{BlockSource, ChainView, NotificationBridge};
use crate::service::iterator::BlocksIterator;
use crate::service::segment_store::SegmentStore;
use async_trait::async_trait;
use shared_types::{Block, Envelope, Hash};
use std::sync::Arc;
use tracing::debug;

#[derive(Clone)]
pub struct ArchivedLedger {
    channel_id: String,
    store: Arc<SegmentStore>,
    bridge: Arc<dyn NotificationBridge>,
    watermark: SharedWatermark,
    role: ArchivingRole,
}

impl ArchivedLedger {
    pub fn new(
        store: Arc<SegmentStore>,
        bridge: Arc<dyn NotificationBridge>,
        watermark: SharedWatermark,
        role: ArchivingRole,
    ) -> Self {
        Self {
            channel_id: store.channel_id().to_string(),
            store,
            bridge,
            watermark,
            role,
        }
    }

    #[must_use]
    pub fn channel_id(&self) -> &str {
        &self.channel_id
    }

    #[must_use]
    pub fn height(&self) -> u64 {
        self.store.chain_height()
    }

    #[must_use]
    pub fn store(&self) -> &Arc<SegmentStore> {
        &self.store
    }

    /// Block `number`, locally if possible.
    pub async fn retrieve_block_by_number(&self, number: u64) -> ArchiveResult<Block> {
        if number >= self.height() {
            return Err(ArchiveError::BlockNotFound {
                channel: self.channel_id.clone(),
                number,
            });
        }

        let read_through = self.role.is_enabled();
        if read_through
            && self.watermark.get().covers_block(number)
            && !self.store.has_local_block(number)
        {
            return self.remote_block(number).await;
        }

        match self.store.block_by_number(number) {
            Ok(block) => Ok(block),
            // Discarded between the check above and the read, or the
            // watermark lags the cluster.
            Err(e) if read_through && e.is_local_miss() => self.remote_block(number).await,
            Err(e) => Err(e),
        }
    }

    /// Block with header hash `hash`.
    ///
    /// The hash index only covers blocks indexed since the last restart;
    /// older archived blocks are found by scanning the archive.
    pub async fn retrieve_block_by_hash(&self, hash: &Hash) -> ArchiveResult<Block> {
        if let Some(number) = self.store.block_number_by_hash(hash) {
            return self.retrieve_block_by_number(number).await;
        }

        let watermark = self.watermark.get();
        if let (true, Some(last)) = (self.role.is_enabled(), watermark.last_archived_block) {
            for number in 0..=last {
                if self.store.has_local_block(number) {
                    continue;
                }
                let block = self.remote_block(number).await?;
                if block.header.hash() == *hash {
                    return Ok(block);
                }
            }
        }

        Err(ArchiveError::BlockHashNotFound {
            channel: self.channel_id.clone(),
            hash: *hash,
        })
    }

    /// Transaction envelope `tx_id`.
    pub async fn retrieve_tx_by_id(&self, tx_id: &str) -> ArchiveResult<Envelope> {
        if let Some((number, position)) = self.store.tx_location(tx_id) {
            let block = self.retrieve_block_by_number(number).await?;
            return block
                .data
                .into_iter()
                .nth(position)
                .ok_or_else(|| ArchiveError::Corruption {
                    channel: self.channel_id.clone(),
                    segment: self.store.placement(number).map_or(0, |p| p.segment),
                    reason: format!("block {number} has no transaction at {position}"),
                });
        }

        if self.role.is_enabled() && self.watermark.get().last_archived_block.is_some() {
            debug!(channel = %self.channel_id, tx_id, "[qc-02] Transaction lookup goes remote");
            return self.bridge.retrieve_transaction(tx_id, &self.channel_id).await;
        }

        Err(ArchiveError::TransactionNotFound {
            channel: self.channel_id.clone(),
            tx_id: tx_id.to_string(),
        })
    }

    /// Blocks from `start` onwards, waiting at the head for new commits.
    #[must_use]
    pub fn retrieve_blocks(&self, start: u64) -> BlocksIterator {
        BlocksIterator::new(
            Arc::new(self.clone()),
            self.store.commit_signal(),
            start,
        )
    }

    async fn remote_block(&self, number: u64) -> ArchiveResult<Block> {
        debug!(channel = %self.channel_id, number, "[qc-02] Block read goes remote");
        self.bridge.retrieve_block(number, &self.channel_id).await
    }
}

#[async_trait]
impl BlockSource for ArchivedLedger {
    fn height(&self) -> u64 {
        ArchivedLedger::height(self)
    }

    async fn block_by_number(&self, number: u64) -> ArchiveResult<Block> {
        self.retrieve_block_by_number(number).await
    }
}
