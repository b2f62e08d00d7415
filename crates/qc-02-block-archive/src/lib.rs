//! # Block Archive (qc-02)
//!
//! Append-only segmented block storage with tiered archiving. Old,
//! immutable segments are shipped to a remote repository shared by the
//! cluster while recent segments stay on local disk.
//!
//! ## Architecture
//!
//! ```text
//!            ┌──────────────────── peer (Archiver) ────────────────────┐
//! write ───► │ SegmentStore ──queue──► Listener ──► Coordinator ───────┼──► remote repository
//!            └──────────────────────────────────────────┬──────────────┘        ▲
//!                                                       │ SegmentArchived       │
//!                                                       ▼                       │ read-through
//!            ┌──────────────────── peer (Client) ───────────────────────┐       │
//!            │ Listener ──► Coordinator ──► discard local segments      │       │
//!            │ ArchivedLedger ── local miss ──► NotificationBridge ─────┼───────┘
//!            └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Domain Invariants
//!
//! | Invariant | Description |
//! |-----------|-------------|
//! | Torn tail only at the head | Only the highest segment may end mid-record |
//! | Monotonic watermark | The archive watermark never moves backwards |
//! | Persist before broadcast | The Archiver stores its watermark before announcing |
//! | Config block stays local | A segment holding the latest config block is never deleted |
//! | Writer never waits | Writer-to-coordinator hand-off drops when full |
//!
//! ## Crate Structure (Hexagonal Architecture)
//!
//! - `domain/` - Segment format, readers, watermark, configuration
//! - `ports/` - Archive control (inbound), collaborators (outbound)
//! - `adapters/` - Archive index, `object_store` repository, cluster bridge
//! - `service/` - Segment store, coordinator, listener, ledger, checker
//!
//! ## Usage
//!
//! ```ignore
//! use qc_02_block_archive::{ArchivingChannel, ArchivingConfig, SegmentStoreConfig};
//!
//! let mut channel = ArchivingChannel::open(
//!     SegmentStoreConfig::new("/var/lib/qc/segments"),
//!     ArchivingConfig::from_env(),
//!     "mychannel",
//!     index,
//!     transfer,
//!     bridge,
//! )?;
//! let listener = channel.start();
//!
//! channel.append_block(&block)?;
//! let block = channel.ledger().retrieve_block_by_number(7).await?;
//! ```

// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod adapters;
pub mod domain;
pub mod ports;
pub mod service;

#[cfg(test)]
mod test_utils;

// Re-export key types for convenience
pub use adapters::{
    BusNotificationBridge, Ed25519PolicyVerifier, FileArchiveIndex, InMemoryArchiveIndex,
    ObjectStoreTransfer, RemoteRepository,
};
pub use domain::{
    ArchiveError, ArchiveManifest, ArchiveResult, ArchiveWatermark, ArchivingConfig,
    ArchivingRole, ArchivingSettings, FailureKind, RecordPlacement, SegmentChainReader,
    SegmentReader, SegmentStoreConfig, SharedWatermark, VerificationReport,
};
pub use ports::{
    ArchiveControl, ArchiveIndex, ArchiveReport, ArchiveTrigger, BlockSource, BlockVerifier,
    ChainView, DiscardReport, NotificationBridge, SegmentTransfer, SetArchivedOutcome,
    TransferOutcome, TriggerReport,
};
pub use service::{
    ArchiveListener, ArchiveListenerHandle, ArchivedLedger, ArchivingChannel,
    ArchivingCoordinator, BlocksIterator, ConsistencyChecker, SegmentStore,
};
