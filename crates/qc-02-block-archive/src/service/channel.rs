//! # Channel Wiring
//!
//! Assembles the archive subsystem of one channel:
//!
//! ```text
//!  append_block ──► SegmentStore ──(hand-off queue)──┐
//!                        │                           ▼
//!                        │                    ArchiveListener ◄── cluster bus
//!                        │                           │
//!                        ▼                           ▼
//!                 ArchivedLedger ◄── watermark ── ArchivingCoordinator
//!                        │                           │
//!                        └──► NotificationBridge ◄───┴──► SegmentTransfer
//! ```
//!
//! The hand-off queue exists only when archiving is enabled. Only a Client
//! subscribes to the cluster bus; the Archiver is its only publisher.
//!
//! [`ArchivingChannel::open_read_only`] serves reads and verification over a
//! directory another process owns: nothing on disk is repaired or indexed
//! and no listener is started.

use crate::domain::config::{ArchivingConfig, ArchivingRole, SegmentStoreConfig};
use crate::domain::errors::ArchiveResult;
use crate::domain::segment::RecordPlacement;
use crate::ports::outbound::{ArchiveIndex, BlockVerifier, NotificationBridge, SegmentTransfer};
use crate::service::checker::ConsistencyChecker;
use crate::service::coordinator::ArchivingCoordinator;
use crate::service::ledger::ArchivedLedger;
use crate::service::listener::{ArchiveListener, ArchiveListenerHandle};
use crate::service::queue::archive_queue;
use crate::service::segment_store::SegmentStore;
use shared_bus::ArchiveNotification;
use shared_types::Block;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

pub struct ArchivingChannel {
    store: Arc<SegmentStore>,
    coordinator: Arc<ArchivingCoordinator>,
    ledger: ArchivedLedger,
    bridge: Arc<dyn NotificationBridge>,
    queue: Option<mpsc::Receiver<ArchiveNotification>>,
    check_interval: Option<Duration>,
}

impl ArchivingChannel {
    pub fn open(
        store_config: SegmentStoreConfig,
        config: ArchivingConfig,
        channel_id: impl Into<String>,
        index: Arc<dyn ArchiveIndex>,
        transfer: Arc<dyn SegmentTransfer>,
        bridge: Arc<dyn NotificationBridge>,
    ) -> ArchiveResult<Self> {
        let channel_id = channel_id.into();
        let mut store = SegmentStore::open(store_config, channel_id.clone(), Arc::clone(&index))?;
        let mut queue = None;
        if config.role.is_enabled() {
            let (notifier, rx) = archive_queue(config.queue_capacity);
            store = store.with_notifier(notifier);
            queue = Some(rx);
        }
        Self::assemble(store, queue, config, channel_id, index, transfer, bridge)
    }

    /// Open for inspection only. Writes through the store fail with
    /// `ReadOnly` and `start` returns `None`.
    pub fn open_read_only(
        store_config: SegmentStoreConfig,
        config: ArchivingConfig,
        channel_id: impl Into<String>,
        index: Arc<dyn ArchiveIndex>,
        transfer: Arc<dyn SegmentTransfer>,
        bridge: Arc<dyn NotificationBridge>,
    ) -> ArchiveResult<Self> {
        let channel_id = channel_id.into();
        let store =
            SegmentStore::open_read_only(store_config, channel_id.clone(), Arc::clone(&index))?;
        Self::assemble(store, None, config, channel_id, index, transfer, bridge)
    }

    fn assemble(
        store: SegmentStore,
        queue: Option<mpsc::Receiver<ArchiveNotification>>,
        config: ArchivingConfig,
        channel_id: String,
        index: Arc<dyn ArchiveIndex>,
        transfer: Arc<dyn SegmentTransfer>,
        bridge: Arc<dyn NotificationBridge>,
    ) -> ArchiveResult<Self> {
        let role = config.role;
        let check_interval = config.check_interval;
        let store = Arc::new(store);

        let coordinator = Arc::new(ArchivingCoordinator::new(
            channel_id,
            config,
            store.clone(),
            index,
            transfer,
            bridge.clone(),
        )?);
        let ledger = ArchivedLedger::new(
            store.clone(),
            bridge.clone(),
            coordinator.watermark(),
            role,
        );

        Ok(Self {
            store,
            coordinator,
            ledger,
            bridge,
            queue,
            check_interval,
        })
    }

    /// Spawn the channel's listener.
    ///
    /// `None` when archiving is disabled or the listener already runs.
    pub fn start(&mut self) -> Option<ArchiveListenerHandle> {
        let role = self.coordinator.config().role;
        let queue = self.queue.take()?;
        let subscription = (role == ArchivingRole::Client)
            .then(|| self.bridge.subscribe(self.store.channel_id()));
        let listener = ArchiveListener::new(self.coordinator.clone());
        Some(listener.spawn(Some(queue), subscription, self.check_interval))
    }

    pub fn append_block(&self, block: &Block) -> ArchiveResult<RecordPlacement> {
        self.store.append_block(block)
    }

    #[must_use]
    pub fn store(&self) -> &Arc<SegmentStore> {
        &self.store
    }

    #[must_use]
    pub fn coordinator(&self) -> &Arc<ArchivingCoordinator> {
        &self.coordinator
    }

    #[must_use]
    pub fn ledger(&self) -> &ArchivedLedger {
        &self.ledger
    }

    /// Checker reading through this channel's ledger.
    pub fn checker(&self, verifier: Arc<dyn BlockVerifier>) -> ConsistencyChecker {
        ConsistencyChecker::new(
            self.store.channel_id(),
            Arc::new(self.ledger.clone()),
            verifier,
        )
    }
}
