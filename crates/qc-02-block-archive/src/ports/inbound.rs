//! # Inbound Ports (Driving Ports)
//!
//! The control surface of the archiving coordinator. The per-channel
//! listener drives it from notifications; administrative tools drive it
//! directly.

use crate::domain::config::ArchivingRole;
use crate::domain::errors::ArchiveResult;
use crate::domain::watermark::ArchiveWatermark;
use async_trait::async_trait;
use shared_bus::ArchiveNotification;

/// Why the coordinator is being asked to look at the channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchiveTrigger {
    /// The local write path finalized a segment.
    SegmentFinalized(ArchiveNotification),
    /// Another peer announced an archived segment.
    RemoteArchived(ArchiveNotification),
    /// Timer-driven re-check.
    Periodic,
    /// Operator request.
    Administrative,
}

/// Outcome of one archive-if-necessary pass.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ArchiveReport {
    /// Segments the watermark moved past, in order.
    pub archived: Vec<u64>,
    /// Subset of `archived` the repository already held.
    pub already_archived: Vec<u64>,
    pub bytes_transferred: u64,
    pub watermark: ArchiveWatermark,
    /// Local copies removed after archiving.
    pub deleted_locally: Vec<u64>,
}

/// Outcome of one discard-if-necessary pass.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DiscardReport {
    /// Archived height the cluster reported, if any.
    pub reported_height: Option<u64>,
    pub discarded: Vec<u64>,
    /// Eligible segments kept because they hold the latest config block.
    pub protected: Vec<u64>,
    pub watermark: ArchiveWatermark,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerReport {
    /// Role `None`.
    Disabled,
    /// The trigger does not apply to this role.
    Ignored,
    Archived(ArchiveReport),
    Discarded(DiscardReport),
}

/// Result of `set_archived`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SetArchivedOutcome {
    pub watermark_advanced: bool,
    pub deleted: bool,
    /// Deletion was refused to keep the latest config block local.
    pub protected: bool,
}

/// Archive control for one channel.
#[async_trait]
pub trait ArchiveControl: Send + Sync {
    fn channel_id(&self) -> &str;

    fn role(&self) -> ArchivingRole;

    /// Run the role's policy in response to `trigger`.
    async fn on_trigger(&self, trigger: ArchiveTrigger) -> ArchiveResult<TriggerReport>;

    /// Record `segment` as archived and optionally delete the local file.
    async fn set_archived(&self, segment: u64, delete_local: bool)
        -> ArchiveResult<SetArchivedOutcome>;
}
