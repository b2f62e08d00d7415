use crate::domain::config::ArchivingRole;
use crate::domain::errors::{ArchiveError, ArchiveResult};
use crate::domain::manifest::ArchiveManifest;
use crate::ports::inbound::{
    ArchiveControl, ArchiveTrigger, SetArchivedOutcome, TriggerReport,
};
use crate::ports::outbound::{
    BlockSource, ChainView, NotificationBridge, SegmentTransfer, TransferOutcome,
};
use async_trait::async_trait;
use ed25519_dalek::{Signer, SigningKey};
use parking_lot::Mutex;
use shared_bus::{
    ArchiveNotification, EventFilter, EventSubscriber, EventTopic, InMemoryEventBus, Subscription,
};
use shared_types::{
    compute_data_hash, Block, BlockHeader, BlockMetadata, BlockSignature, Envelope, ZERO_HASH,
};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

// =============================================================================
// BLOCK BUILDERS
// =============================================================================

/// A standalone block with two transactions and no parent link.
pub fn make_test_block(number: u64) -> Block {
    let data = vec![
        Envelope {
            tx_id: format!("tx-{number}-0"),
            payload: format!("payload {number}/0").into_bytes(),
        },
        Envelope {
            tx_id: format!("tx-{number}-1"),
            payload: vec![number as u8; 16],
        },
    ];
    Block {
        header: BlockHeader {
            number,
            previous_hash: ZERO_HASH,
            data_hash: compute_data_hash(&data),
        },
        data,
        metadata: BlockMetadata::default(),
    }
}

/// `count` hash-linked blocks. Blocks listed in `config_blocks` are
/// configuration blocks; the others point at the latest one before them.
pub fn build_chain_with_configs(count: u64, config_blocks: &[u64]) -> Vec<Block> {
    let mut chain: Vec<Block> = Vec::with_capacity(count as usize);
    let mut last_config = 0;
    for number in 0..count {
        let mut block = make_test_block(number);
        if let Some(prev) = chain.last() {
            block.header.previous_hash = prev.header.hash();
        }
        if config_blocks.contains(&number) {
            last_config = number;
        }
        block.metadata.last_config_index = last_config;
        chain.push(block);
    }
    chain
}

/// `count` hash-linked blocks; only genesis is a configuration block.
pub fn build_chain(count: u64) -> Vec<Block> {
    build_chain_with_configs(count, &[0])
}

pub fn test_signer(seed: u8) -> SigningKey {
    SigningKey::from_bytes(&[seed; 32])
}

pub fn sign_block(block: &mut Block, key: &SigningKey) {
    let signature = key.sign(&block.header.hash());
    block.metadata.signatures.push(BlockSignature {
        signer: key.verifying_key().to_bytes(),
        signature: signature.to_bytes(),
    });
}

// =============================================================================
// MOCKS
// =============================================================================

/// In-memory `BlockSource`.
#[derive(Default)]
pub struct VecBlockSource {
    blocks: Mutex<Vec<Block>>,
}

impl VecBlockSource {
    pub fn new(blocks: Vec<Block>) -> Self {
        Self {
            blocks: Mutex::new(blocks),
        }
    }

    pub fn push(&self, block: Block) {
        self.blocks.lock().push(block);
    }
}

#[async_trait]
impl BlockSource for VecBlockSource {
    fn height(&self) -> u64 {
        self.blocks.lock().len() as u64
    }

    async fn block_by_number(&self, number: u64) -> ArchiveResult<Block> {
        self.blocks
            .lock()
            .get(number as usize)
            .cloned()
            .ok_or_else(|| ArchiveError::BlockNotFound {
                channel: "mychannel".into(),
                number,
            })
    }
}

/// `ChainView` over a fixed height and a set of "local" segments.
pub struct MockChain {
    pub height: u64,
    pub config_block: Option<u64>,
    pub open_segment: u64,
    segments: Mutex<BTreeSet<u64>>,
    removed: Mutex<Vec<u64>>,
}

impl MockChain {
    pub fn new(height: u64, segments: impl IntoIterator<Item = u64>, open_segment: u64) -> Self {
        let mut set: BTreeSet<u64> = segments.into_iter().collect();
        set.insert(open_segment);
        Self {
            height,
            config_block: Some(0),
            open_segment,
            segments: Mutex::new(set),
            removed: Mutex::new(Vec::new()),
        }
    }

    pub fn with_config_block(mut self, config_block: u64) -> Self {
        self.config_block = Some(config_block);
        self
    }

    pub fn removed(&self) -> Vec<u64> {
        self.removed.lock().clone()
    }

    pub fn holds(&self, segment: u64) -> bool {
        self.segments.lock().contains(&segment)
    }
}

impl ChainView for MockChain {
    fn chain_height(&self) -> u64 {
        self.height
    }

    fn latest_config_block(&self) -> Option<u64> {
        self.config_block
    }

    fn local_segments(&self) -> ArchiveResult<Vec<u64>> {
        Ok(self.segments.lock().iter().copied().collect())
    }

    fn open_segment(&self) -> u64 {
        self.open_segment
    }

    fn remove_segment(&self, segment: u64) -> ArchiveResult<bool> {
        let removed = self.segments.lock().remove(&segment);
        if removed {
            self.removed.lock().push(segment);
        }
        Ok(removed)
    }
}

/// `SegmentTransfer` that remembers what it shipped.
#[derive(Default)]
pub struct MockTransfer {
    unreachable: AtomicBool,
    corrupt: Mutex<HashSet<u64>>,
    manifest_failures: AtomicUsize,
    remote: Mutex<BTreeSet<u64>>,
    sends: Mutex<Vec<u64>>,
    manifests: Mutex<Vec<ArchiveManifest>>,
}

impl MockTransfer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    pub fn mark_corrupt(&self, segment: u64) {
        self.corrupt.lock().insert(segment);
    }

    /// Fail the next `count` manifest writes.
    pub fn fail_manifests(&self, count: usize) {
        self.manifest_failures.store(count, Ordering::SeqCst);
    }

    /// Every `send` call, in order.
    pub fn sends(&self) -> Vec<u64> {
        self.sends.lock().clone()
    }

    pub fn manifests(&self) -> Vec<ArchiveManifest> {
        self.manifests.lock().clone()
    }
}

#[async_trait]
impl SegmentTransfer for MockTransfer {
    async fn send(&self, channel_id: &str, segment: u64) -> ArchiveResult<TransferOutcome> {
        self.sends.lock().push(segment);
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(ArchiveError::RemoteUnreachable {
                channel: channel_id.to_string(),
                target: format!("segment {segment}"),
                reason: "connection refused".into(),
            });
        }
        if self.corrupt.lock().contains(&segment) {
            return Err(ArchiveError::Corruption {
                channel: channel_id.to_string(),
                segment,
                reason: "bad frame".into(),
            });
        }
        if self.remote.lock().insert(segment) {
            Ok(TransferOutcome::Transferred { bytes: 1024 })
        } else {
            Ok(TransferOutcome::AlreadyArchived)
        }
    }

    async fn publish_manifest(&self, manifest: &ArchiveManifest) -> ArchiveResult<()> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(ArchiveError::RemoteUnreachable {
                channel: manifest.channel_id.clone(),
                target: "manifest".into(),
                reason: "connection refused".into(),
            });
        }
        if self
            .manifest_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(ArchiveError::RemoteUnreachable {
                channel: manifest.channel_id.clone(),
                target: "manifest".into(),
                reason: "request timed out".into(),
            });
        }
        self.manifests.lock().push(manifest.clone());
        Ok(())
    }
}

/// `NotificationBridge` with a settable archived height and canned blocks.
#[derive(Default)]
pub struct RecordingBridge {
    bus: InMemoryEventBus,
    archived_height: Mutex<Option<u64>>,
    blocks: Mutex<BTreeMap<u64, Block>>,
    published: Mutex<Vec<ArchiveNotification>>,
    block_requests: AtomicUsize,
}

impl RecordingBridge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_archived_height(&self, height: Option<u64>) {
        *self.archived_height.lock() = height;
    }

    pub fn serve_blocks(&self, blocks: impl IntoIterator<Item = Block>) {
        let mut served = self.blocks.lock();
        for block in blocks {
            served.insert(block.number(), block);
        }
    }

    pub fn published(&self) -> Vec<ArchiveNotification> {
        self.published.lock().clone()
    }

    pub fn block_requests(&self) -> usize {
        self.block_requests.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl NotificationBridge for RecordingBridge {
    async fn publish(&self, notification: ArchiveNotification) -> ArchiveResult<usize> {
        self.published.lock().push(notification);
        Ok(1)
    }

    async fn read_archived_block_height(&self, _channel_id: &str) -> ArchiveResult<Option<u64>> {
        Ok(*self.archived_height.lock())
    }

    async fn retrieve_block(&self, number: u64, channel_id: &str) -> ArchiveResult<Block> {
        self.block_requests.fetch_add(1, Ordering::SeqCst);
        self.blocks
            .lock()
            .get(&number)
            .cloned()
            .ok_or_else(|| ArchiveError::BlockNotFound {
                channel: channel_id.to_string(),
                number,
            })
    }

    async fn retrieve_transaction(&self, tx_id: &str, channel_id: &str) -> ArchiveResult<Envelope> {
        self.blocks
            .lock()
            .values()
            .flat_map(|b| b.data.iter())
            .find(|env| env.tx_id == tx_id)
            .cloned()
            .ok_or_else(|| ArchiveError::TransactionNotFound {
                channel: channel_id.to_string(),
                tx_id: tx_id.to_string(),
            })
    }

    fn subscribe(&self, channel_id: &str) -> Subscription {
        self.bus
            .subscribe(EventFilter::topics(vec![EventTopic::Archive]).for_channel(channel_id))
    }
}

/// `ArchiveControl` that only counts triggers.
pub struct CountingControl {
    channel_id: String,
    role: ArchivingRole,
    triggers: Mutex<Vec<ArchiveTrigger>>,
    set_archived_calls: AtomicUsize,
}

impl CountingControl {
    pub fn new(channel_id: &str, role: ArchivingRole) -> Self {
        Self {
            channel_id: channel_id.to_string(),
            role,
            triggers: Mutex::new(Vec::new()),
            set_archived_calls: AtomicUsize::new(0),
        }
    }

    pub fn triggers(&self) -> Vec<ArchiveTrigger> {
        self.triggers.lock().clone()
    }

    pub fn calls(&self) -> usize {
        self.triggers.lock().len() + self.set_archived_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ArchiveControl for CountingControl {
    fn channel_id(&self) -> &str {
        &self.channel_id
    }

    fn role(&self) -> ArchivingRole {
        self.role
    }

    async fn on_trigger(&self, trigger: ArchiveTrigger) -> ArchiveResult<TriggerReport> {
        self.triggers.lock().push(trigger);
        Ok(TriggerReport::Ignored)
    }

    async fn set_archived(
        &self,
        _segment: u64,
        _delete_local: bool,
    ) -> ArchiveResult<SetArchivedOutcome> {
        self.set_archived_calls.fetch_add(1, Ordering::SeqCst);
        Ok(SetArchivedOutcome::default())
    }
}
