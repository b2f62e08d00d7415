//! # Notification Bridge
//!
//! Connects the archiving subsystem to the rest of the cluster:
//!
//! - archive notifications travel over the shared bus, scoped to the
//!   channel and the sending organization
//! - the archived height and read-through lookups come from the manifest
//!   and segments the Archiver keeps in the [`RemoteRepository`]
//!
//! The bridge keeps the most recently fetched segment decoded in memory, so
//! sequential remote reads cost one download per segment. Block lookups also
//! reuse the last manifest while it covers the requested block: archived
//! segments never change and the manifest only grows, so a covering copy
//! resolves the same segment a fresh one would. The archived height and
//! transaction lookups always read the current manifest.

use crate::adapters::repository::RemoteRepository;
use crate::domain::errors::{ArchiveError, ArchiveResult};
use crate::domain::framing::RecordCursor;
use crate::domain::manifest::ArchiveManifest;
use crate::ports::outbound::NotificationBridge;
use async_trait::async_trait;
use parking_lot::Mutex;
use shared_bus::{
    ArchiveNotification, ClusterMessage, EventFilter, EventPublisher, EventSubscriber,
    EventTopic, Subscription,
};
use shared_types::{Block, Envelope};
use std::sync::Arc;
use tracing::debug;

struct CachedSegment {
    channel_id: String,
    segment: u64,
    blocks: Arc<Vec<Block>>,
}

struct CachedManifest {
    channel_id: String,
    manifest: Arc<ArchiveManifest>,
}

pub struct BusNotificationBridge<B> {
    bus: Arc<B>,
    org_id: String,
    repository: RemoteRepository,
    cache: Mutex<Option<CachedSegment>>,
    manifest_cache: Mutex<Option<CachedManifest>>,
}

impl<B> BusNotificationBridge<B>
where
    B: EventPublisher + EventSubscriber,
{
    pub fn new(bus: Arc<B>, org_id: impl Into<String>, repository: RemoteRepository) -> Self {
        Self {
            bus,
            org_id: org_id.into(),
            repository,
            cache: Mutex::new(None),
            manifest_cache: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn org_id(&self) -> &str {
        &self.org_id
    }

    /// Current manifest, remembered for later block lookups.
    async fn fetch_manifest(
        &self,
        channel_id: &str,
    ) -> ArchiveResult<Option<Arc<ArchiveManifest>>> {
        let manifest = self.repository.load_manifest(channel_id).await?.map(Arc::new);
        *self.manifest_cache.lock() = manifest.as_ref().map(|m| CachedManifest {
            channel_id: channel_id.to_string(),
            manifest: Arc::clone(m),
        });
        Ok(manifest)
    }

    /// Manifest covering block `number`; fetched only when the remembered
    /// one ends below it.
    async fn manifest_covering(
        &self,
        channel_id: &str,
        number: u64,
    ) -> ArchiveResult<Option<Arc<ArchiveManifest>>> {
        let cached = self
            .manifest_cache
            .lock()
            .as_ref()
            .filter(|c| {
                c.channel_id == channel_id
                    && c.manifest
                        .archived_block_height()
                        .is_some_and(|height| number <= height)
            })
            .map(|c| Arc::clone(&c.manifest));
        match cached {
            Some(manifest) => Ok(Some(manifest)),
            None => self.fetch_manifest(channel_id).await,
        }
    }

    /// Decoded blocks of one archived segment.
    async fn archived_segment(
        &self,
        channel_id: &str,
        segment: u64,
    ) -> ArchiveResult<Arc<Vec<Block>>> {
        let cached = self
            .cache
            .lock()
            .as_ref()
            .filter(|c| c.channel_id == channel_id && c.segment == segment)
            .map(|c| Arc::clone(&c.blocks));
        if let Some(blocks) = cached {
            return Ok(blocks);
        }

        let location = self.repository.segment_location(channel_id, segment);
        let bytes = self
            .repository
            .get_bytes(channel_id, &location)
            .await?
            .ok_or_else(|| ArchiveError::Corruption {
                channel: channel_id.to_string(),
                segment,
                reason: "listed in the archive manifest but absent from the repository".into(),
            })?;

        let mut blocks = Vec::new();
        for record in RecordCursor::new(segment, &bytes) {
            let (payload, _) = record?;
            blocks.push(Block::from_bytes(payload).map_err(ArchiveError::serialization)?);
        }
        debug!(
            channel = channel_id,
            segment,
            blocks = blocks.len(),
            "[qc-02] Decoded archived segment"
        );

        let blocks = Arc::new(blocks);
        *self.cache.lock() = Some(CachedSegment {
            channel_id: channel_id.to_string(),
            segment,
            blocks: Arc::clone(&blocks),
        });
        Ok(blocks)
    }
}

#[async_trait]
impl<B> NotificationBridge for BusNotificationBridge<B>
where
    B: EventPublisher + EventSubscriber + 'static,
{
    async fn publish(&self, notification: ArchiveNotification) -> ArchiveResult<usize> {
        let message = ClusterMessage::segment_archived(self.org_id.clone(), notification);
        Ok(self.bus.publish(message).await)
    }

    async fn read_archived_block_height(&self, channel_id: &str) -> ArchiveResult<Option<u64>> {
        Ok(self
            .fetch_manifest(channel_id)
            .await?
            .and_then(|m| m.archived_block_height()))
    }

    async fn retrieve_block(&self, number: u64, channel_id: &str) -> ArchiveResult<Block> {
        let not_found = || ArchiveError::BlockNotFound {
            channel: channel_id.to_string(),
            number,
        };

        let manifest = self
            .manifest_covering(channel_id, number)
            .await?
            .ok_or_else(not_found)?;
        let (segment, _) = manifest.segment_for_block(number).ok_or_else(not_found)?;

        let blocks = self.archived_segment(channel_id, segment).await?;
        blocks
            .iter()
            .find(|b| b.number() == number)
            .cloned()
            .ok_or_else(not_found)
    }

    async fn retrieve_transaction(&self, tx_id: &str, channel_id: &str) -> ArchiveResult<Envelope> {
        let not_found = || ArchiveError::TransactionNotFound {
            channel: channel_id.to_string(),
            tx_id: tx_id.to_string(),
        };

        let manifest = self.fetch_manifest(channel_id).await?.ok_or_else(not_found)?;

        for segment in manifest.segments.keys().copied() {
            let blocks = self.archived_segment(channel_id, segment).await?;
            if let Some(envelope) = blocks
                .iter()
                .flat_map(|b| b.data.iter())
                .find(|env| env.tx_id == tx_id)
            {
                return Ok(envelope.clone());
            }
        }
        Err(not_found())
    }

    fn subscribe(&self, channel_id: &str) -> Subscription {
        self.bus.subscribe(
            EventFilter::topics(vec![EventTopic::Archive])
                .for_channel(channel_id)
                .for_org(self.org_id.clone()),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::framing::encode_record;
    use crate::domain::watermark::ArchiveWatermark;
    use crate::test_utils::make_test_block;
    use bytes::Bytes;
    use object_store::memory::InMemory;
    use object_store::ObjectStore;
    use shared_bus::InMemoryEventBus;

    /// Upload `blocks` as `segment` and return its end block.
    async fn upload(repo: &RemoteRepository, segment: u64, blocks: &[Block]) -> u64 {
        let mut bytes = Vec::new();
        for b in blocks {
            encode_record(&mut bytes, &b.to_bytes().unwrap());
        }
        repo.put_bytes(
            "mychannel",
            &repo.segment_location("mychannel", segment),
            Bytes::from(bytes),
        )
        .await
        .unwrap();
        blocks.last().unwrap().number()
    }

    async fn archived_repo() -> RemoteRepository {
        archive_into(RemoteRepository::in_memory()).await
    }

    /// Segments 0 (blocks 0..=2) and 1 (3..=5) plus their manifest.
    async fn archive_into(repo: RemoteRepository) -> RemoteRepository {
        let first: Vec<_> = (0..3).map(make_test_block).collect();
        let second: Vec<_> = (3..6).map(make_test_block).collect();
        let end0 = upload(&repo, 0, &first).await;
        let end1 = upload(&repo, 1, &second).await;
        let manifest = ArchiveManifest::from_index(
            "mychannel",
            ArchiveWatermark::new(1, end1),
            &[(0, end0), (1, end1)],
        );
        repo.store_manifest(&manifest).await.unwrap();
        repo
    }

    #[tokio::test]
    async fn test_archived_height_from_manifest() {
        let bus = Arc::new(InMemoryEventBus::new());
        let empty = BusNotificationBridge::new(bus.clone(), "org1", RemoteRepository::in_memory());
        assert_eq!(empty.read_archived_block_height("mychannel").await.unwrap(), None);

        let bridge = BusNotificationBridge::new(bus, "org1", archived_repo().await);
        assert_eq!(
            bridge.read_archived_block_height("mychannel").await.unwrap(),
            Some(5)
        );
    }

    #[tokio::test]
    async fn test_retrieve_block_and_transaction() {
        let bus = Arc::new(InMemoryEventBus::new());
        let bridge = BusNotificationBridge::new(bus, "org1", archived_repo().await);

        let block = bridge.retrieve_block(4, "mychannel").await.unwrap();
        assert_eq!(block, make_test_block(4));
        // Served from the cached segment.
        assert_eq!(bridge.retrieve_block(3, "mychannel").await.unwrap().number(), 3);

        let tx_id = make_test_block(1).data[0].tx_id.clone();
        let env = bridge.retrieve_transaction(&tx_id, "mychannel").await.unwrap();
        assert_eq!(env.tx_id, tx_id);

        assert!(matches!(
            bridge.retrieve_block(6, "mychannel").await,
            Err(ArchiveError::BlockNotFound { number: 6, .. })
        ));
        assert!(matches!(
            bridge.retrieve_transaction("missing", "mychannel").await,
            Err(ArchiveError::TransactionNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_block_lookups_reuse_covering_manifest() {
        let store = Arc::new(InMemory::new());
        let repo = archive_into(RemoteRepository::new(store.clone(), "memory://")).await;
        let bus = Arc::new(InMemoryEventBus::new());
        let bridge = BusNotificationBridge::new(bus, "org1", repo.clone());

        assert_eq!(bridge.retrieve_block(4, "mychannel").await.unwrap().number(), 4);
        store
            .delete(&repo.manifest_location("mychannel"))
            .await
            .unwrap();

        // Blocks the remembered manifest covers need no new manifest.
        for number in 0..=5 {
            assert_eq!(
                bridge.retrieve_block(number, "mychannel").await.unwrap().number(),
                number
            );
        }

        // Beyond it the manifest is read again, and is gone.
        assert!(matches!(
            bridge.retrieve_block(6, "mychannel").await,
            Err(ArchiveError::BlockNotFound { number: 6, .. })
        ));
        assert_eq!(bridge.read_archived_block_height("mychannel").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_newer_manifest_fetched_for_later_blocks() {
        let repo = archived_repo().await;
        let bus = Arc::new(InMemoryEventBus::new());
        let bridge = BusNotificationBridge::new(bus, "org1", repo.clone());
        assert_eq!(bridge.retrieve_block(1, "mychannel").await.unwrap().number(), 1);

        let third: Vec<_> = (6..9).map(make_test_block).collect();
        let end2 = upload(&repo, 2, &third).await;
        let manifest = ArchiveManifest::from_index(
            "mychannel",
            ArchiveWatermark::new(2, end2),
            &[(0, 2), (1, 5), (2, end2)],
        );
        repo.store_manifest(&manifest).await.unwrap();

        assert_eq!(bridge.retrieve_block(7, "mychannel").await.unwrap(), make_test_block(7));
    }

    #[tokio::test]
    async fn test_publish_reaches_same_channel_subscribers() {
        let bus = Arc::new(InMemoryEventBus::new());
        let sender = BusNotificationBridge::new(bus.clone(), "org1", RemoteRepository::in_memory());
        let receiver = BusNotificationBridge::new(bus, "org1", RemoteRepository::in_memory());

        let mut mine = receiver.subscribe("mychannel");
        let mut other = receiver.subscribe("otherchannel");

        sender
            .publish(ArchiveNotification::new("mychannel", 3))
            .await
            .unwrap();

        let msg = mine.recv().await.unwrap();
        assert_eq!(msg.channel_id(), "mychannel");
        assert!(other.try_recv().unwrap().is_none());
    }
}
