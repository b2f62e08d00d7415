//! # Archiving Coordinator
//!
//! Per-channel state machine that decides when a finalized segment leaves
//! local storage.
//!
//! ## Archiver
//!
//! With `H` the chain height, `W` the last archived block and `K` the keep
//! count, segments are archived in order while `H - W > K` and the next
//! segment's end block `E` satisfies `H - E > K`, at most
//! `max_catch_up_segments` per trigger. The pass then:
//!
//! 1. persists the watermark once,
//! 2. publishes the remote manifest (the cluster-visible watermark),
//! 3. broadcasts one notification per archived segment,
//! 4. optionally deletes the local copies.
//!
//! ## Client
//!
//! Trusts the archived height the cluster reports and deletes local
//! segments at or below it, keeping `K` blocks of margin. A segment holding
//! the channel's latest configuration block is never deleted.
//!
//! Watermark updates are serialized by an async lock, so a listener pass
//! and an administrative `set_archived` never interleave.

use crate::domain::config::{ArchivingConfig, ArchivingRole};
use crate::domain::errors::{ArchiveError, ArchiveResult};
use crate::domain::manifest::ArchiveManifest;
use crate::domain::metrics;
use crate::domain::watermark::{ArchiveWatermark, SharedWatermark};
use crate::ports::inbound::{
    ArchiveControl, ArchiveReport, ArchiveTrigger, DiscardReport, SetArchivedOutcome,
    TriggerReport,
};
use crate::ports::outbound::{
    ArchiveIndex, ChainView, NotificationBridge, SegmentTransfer, TransferOutcome,
};
use async_trait::async_trait;
use shared_bus::ArchiveNotification;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Result of a guarded local delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LocalDelete {
    Deleted,
    AlreadyGone,
    Protected,
}

pub struct ArchivingCoordinator {
    channel_id: String,
    config: ArchivingConfig,
    chain: Arc<dyn ChainView>,
    index: Arc<dyn ArchiveIndex>,
    transfer: Arc<dyn SegmentTransfer>,
    bridge: Arc<dyn NotificationBridge>,
    watermark: SharedWatermark,
    /// The persisted watermark is ahead of the published manifest.
    manifest_pending: AtomicBool,
    update_lock: Mutex<()>,
}

impl ArchivingCoordinator {
    pub fn new(
        channel_id: impl Into<String>,
        config: ArchivingConfig,
        chain: Arc<dyn ChainView>,
        index: Arc<dyn ArchiveIndex>,
        transfer: Arc<dyn SegmentTransfer>,
        bridge: Arc<dyn NotificationBridge>,
    ) -> ArchiveResult<Self> {
        let channel_id = channel_id.into();
        let persisted = index.watermark()?;
        let watermark = SharedWatermark::new(persisted);
        // A restart cannot tell whether the last manifest write and broadcast
        // happened, so an Archiver with archived segments repeats them once.
        let manifest_pending =
            config.role == ArchivingRole::Archiver && persisted.last_archived_segment.is_some();
        info!(
            channel = %channel_id,
            role = ?config.role,
            keep = config.keep_latest_blocks,
            watermark = ?watermark.get().last_archived_block,
            "[qc-02] Archiving coordinator created"
        );
        Ok(Self {
            channel_id,
            config,
            chain,
            index,
            transfer,
            bridge,
            watermark,
            manifest_pending: AtomicBool::new(manifest_pending),
            update_lock: Mutex::new(()),
        })
    }

    /// Reader-side view of the watermark.
    #[must_use]
    pub fn watermark(&self) -> SharedWatermark {
        self.watermark.clone()
    }

    #[must_use]
    pub fn config(&self) -> &ArchivingConfig {
        &self.config
    }

    // =========================================================================
    // ARCHIVER
    // =========================================================================

    /// Archive every eligible segment, up to the catch-up bound.
    ///
    /// On a transfer failure the segments archived before it are still
    /// finalized (watermark, manifest, broadcast) and the error is returned.
    pub async fn archive_if_necessary(&self) -> ArchiveResult<ArchiveReport> {
        let _guard = self.update_lock.lock().await;

        let height = self.chain.chain_height();
        let keep = self.config.keep_latest_blocks;
        let mut watermark = self.index.watermark()?;
        let mut report = ArchiveReport::default();
        let mut failure = None;
        // Segments of an earlier pass whose manifest never went out are
        // announced and deleted once it does.
        let retrying = self.manifest_pending.load(Ordering::Acquire);

        let mut next = match watermark.next_segment() {
            Some(segment) => Some(segment),
            None => self.index.first_segment()?,
        };
        let mut attempts = 0;

        while let Some(segment) = next {
            if height.saturating_sub(watermark.block_floor()) <= keep {
                break;
            }
            if attempts >= self.config.max_catch_up_segments {
                debug!(
                    channel = %self.channel_id,
                    attempts,
                    "[qc-02] Catch-up bound reached, continuing at next trigger"
                );
                break;
            }
            // Only finalized segments have an end block.
            let Some(end_block) = self.index.segment_end_block(segment)? else {
                break;
            };
            if height.saturating_sub(end_block) <= keep {
                break;
            }

            attempts += 1;
            match self.transfer.send(&self.channel_id, segment).await {
                Ok(TransferOutcome::Transferred { bytes }) => {
                    report.bytes_transferred += bytes;
                    metrics::record_segment_archived(&self.channel_id, bytes);
                }
                Ok(TransferOutcome::AlreadyArchived) => {
                    debug!(channel = %self.channel_id, segment, "[qc-02] Segment already archived");
                    report.already_archived.push(segment);
                }
                Err(e) => {
                    if e.is_retryable() {
                        warn!(
                            channel = %self.channel_id,
                            segment,
                            error = %e,
                            "[qc-02] Remote repository unreachable, retrying at next trigger"
                        );
                    } else {
                        error!(
                            channel = %self.channel_id,
                            segment,
                            error = %e,
                            "[qc-02] Segment cannot be archived; watermark held"
                        );
                    }
                    failure = Some(e);
                    break;
                }
            }

            watermark.advance(segment, end_block);
            report.archived.push(segment);
            next = Some(segment + 1);
        }

        if !report.archived.is_empty() {
            self.index.set_watermark(watermark)?;
            self.watermark.store(watermark);
            self.manifest_pending.store(true, Ordering::Release);
            info!(
                channel = %self.channel_id,
                segments = ?report.archived,
                bytes = report.bytes_transferred,
                last_archived_block = ?watermark.last_archived_block,
                "[qc-02] Segments archived"
            );
        }
        report.watermark = watermark;

        match self.publish_manifest(watermark).await {
            Ok(()) => {
                let mut settled = report.archived.clone();
                if retrying {
                    match self.unsettled_segments(watermark) {
                        Ok(earlier) => {
                            settled.extend(earlier);
                            settled.sort_unstable();
                            settled.dedup();
                        }
                        Err(e) => warn!(
                            channel = %self.channel_id,
                            error = %e,
                            "[qc-02] Earlier archived segments not listed"
                        ),
                    }
                }
                self.broadcast(&settled).await;
                if self.config.delete_after_archive {
                    for &segment in &settled {
                        match self.delete_local(segment) {
                            Ok(LocalDelete::Deleted) => report.deleted_locally.push(segment),
                            Ok(_) => {}
                            Err(e) => warn!(
                                channel = %self.channel_id,
                                segment,
                                error = %e,
                                "[qc-02] Local copy not removed after archiving"
                            ),
                        }
                    }
                }
            }
            Err(e) => {
                warn!(
                    channel = %self.channel_id,
                    error = %e,
                    "[qc-02] Archive manifest not published, broadcast deferred"
                );
                failure.get_or_insert(e);
            }
        }

        match failure {
            Some(e) => Err(e),
            None => Ok(report),
        }
    }

    async fn publish_manifest(&self, watermark: ArchiveWatermark) -> ArchiveResult<()> {
        if !self.manifest_pending.load(Ordering::Acquire) {
            return Ok(());
        }
        let entries = self.index.segments()?;
        let manifest = ArchiveManifest::from_index(self.channel_id.clone(), watermark, &entries);
        self.transfer.publish_manifest(&manifest).await?;
        self.manifest_pending.store(false, Ordering::Release);
        Ok(())
    }

    /// Finalized local segments already covered by `watermark`.
    fn unsettled_segments(&self, watermark: ArchiveWatermark) -> ArchiveResult<Vec<u64>> {
        let open = self.chain.open_segment();
        Ok(self
            .chain
            .local_segments()?
            .into_iter()
            .filter(|&segment| segment < open && watermark.covers_segment(segment))
            .collect())
    }

    async fn broadcast(&self, segments: &[u64]) {
        for &segment in segments {
            let notification = ArchiveNotification::new(self.channel_id.clone(), segment);
            match self.bridge.publish(notification).await {
                Ok(receivers) => debug!(
                    channel = %self.channel_id,
                    segment,
                    receivers,
                    "[qc-02] Archive notification broadcast"
                ),
                Err(e) => warn!(
                    channel = %self.channel_id,
                    segment,
                    error = %e,
                    "[qc-02] Archive notification not broadcast"
                ),
            }
        }
    }

    // =========================================================================
    // CLIENT
    // =========================================================================

    /// Discard local segments the cluster reports as archived.
    pub async fn discard_if_necessary(&self) -> ArchiveResult<DiscardReport> {
        let _guard = self.update_lock.lock().await;

        let mut watermark = self.index.watermark()?;
        let reported = self
            .bridge
            .read_archived_block_height(&self.channel_id)
            .await?;
        let mut report = DiscardReport {
            reported_height: reported,
            watermark,
            ..DiscardReport::default()
        };
        let Some(reported) = reported else {
            debug!(channel = %self.channel_id, "[qc-02] Nothing archived in the cluster yet");
            return Ok(report);
        };

        let height = self.chain.chain_height();
        let keep = self.config.keep_latest_blocks;
        let open = self.chain.open_segment();
        let mut advanced = false;

        for segment in self.chain.local_segments()? {
            if segment >= open {
                break;
            }
            let Some(end_block) = self.index.segment_end_block(segment)? else {
                continue;
            };
            if end_block > reported || height.saturating_sub(end_block) <= keep {
                break;
            }

            match self.delete_local(segment)? {
                LocalDelete::Protected => {
                    report.protected.push(segment);
                    continue;
                }
                LocalDelete::Deleted => {
                    metrics::record_segment_discarded(&self.channel_id);
                    report.discarded.push(segment);
                }
                LocalDelete::AlreadyGone => {}
            }
            advanced |= watermark.advance(segment, end_block);
        }

        if advanced {
            self.index.set_watermark(watermark)?;
            self.watermark.store(watermark);
        }
        if !report.discarded.is_empty() {
            info!(
                channel = %self.channel_id,
                segments = ?report.discarded,
                reported_height = reported,
                "[qc-02] Archived segments discarded locally"
            );
        }
        report.watermark = watermark;
        Ok(report)
    }

    // =========================================================================
    // SHARED
    // =========================================================================

    /// Delete a finalized segment unless it holds the latest config block.
    fn delete_local(&self, segment: u64) -> ArchiveResult<LocalDelete> {
        let end_block = self.index.segment_end_block(segment)?.ok_or_else(|| {
            ArchiveError::SegmentNotFinalized {
                channel: self.channel_id.clone(),
                segment,
            }
        })?;
        // Unknown start means the predecessor was never indexed; assume the
        // segment may reach back to genesis.
        let start_block = self.index.segment_start_block(segment)?.unwrap_or(0);

        if let Some(config_block) = self.chain.latest_config_block() {
            if (start_block..=end_block).contains(&config_block) {
                let refused = ArchiveError::ConfigBlockProtected {
                    segment,
                    config_block,
                };
                warn!(channel = %self.channel_id, "[qc-02] {refused}");
                return Ok(LocalDelete::Protected);
            }
        }

        if self.chain.remove_segment(segment)? {
            Ok(LocalDelete::Deleted)
        } else {
            Ok(LocalDelete::AlreadyGone)
        }
    }
}

#[async_trait]
impl ArchiveControl for ArchivingCoordinator {
    fn channel_id(&self) -> &str {
        &self.channel_id
    }

    fn role(&self) -> ArchivingRole {
        self.config.role
    }

    async fn on_trigger(&self, trigger: ArchiveTrigger) -> ArchiveResult<TriggerReport> {
        debug!(channel = %self.channel_id, ?trigger, "[qc-02] Archive trigger");
        match (self.config.role, trigger) {
            (ArchivingRole::None, _) => Ok(TriggerReport::Disabled),
            // Only one Archiver per channel; peers' notifications are not ours to act on.
            (ArchivingRole::Archiver, ArchiveTrigger::RemoteArchived(_)) => {
                Ok(TriggerReport::Ignored)
            }
            (ArchivingRole::Archiver, _) => {
                self.archive_if_necessary().await.map(TriggerReport::Archived)
            }
            (ArchivingRole::Client, _) => {
                self.discard_if_necessary().await.map(TriggerReport::Discarded)
            }
        }
    }

    async fn set_archived(
        &self,
        segment: u64,
        delete_local: bool,
    ) -> ArchiveResult<SetArchivedOutcome> {
        let _guard = self.update_lock.lock().await;

        let end_block = self.index.segment_end_block(segment)?.ok_or_else(|| {
            ArchiveError::SegmentNotFinalized {
                channel: self.channel_id.clone(),
                segment,
            }
        })?;

        let mut watermark = self.index.watermark()?;
        let mut outcome = SetArchivedOutcome {
            watermark_advanced: watermark.advance(segment, end_block),
            ..SetArchivedOutcome::default()
        };
        if outcome.watermark_advanced {
            self.index.set_watermark(watermark)?;
            self.watermark.store(watermark);
            info!(
                channel = %self.channel_id,
                segment,
                end_block,
                "[qc-02] Segment marked archived"
            );
            if self.config.role == ArchivingRole::Archiver {
                self.manifest_pending.store(true, Ordering::Release);
                if let Err(e) = self.publish_manifest(watermark).await {
                    warn!(
                        channel = %self.channel_id,
                        error = %e,
                        "[qc-02] Archive manifest not published, retrying at next trigger"
                    );
                }
            }
        }

        if delete_local {
            match self.delete_local(segment)? {
                LocalDelete::Deleted => outcome.deleted = true,
                LocalDelete::Protected => outcome.protected = true,
                LocalDelete::AlreadyGone => {}
            }
        }
        Ok(outcome)
    }
}
