//! # Ports Layer
//!
//! Hexagonal boundaries of the archive subsystem.

pub mod inbound;
pub mod outbound;

pub use inbound::{
    ArchiveControl, ArchiveReport, ArchiveTrigger, DiscardReport, SetArchivedOutcome,
    TriggerReport,
};
pub use outbound::{
    ArchiveIndex, BlockSource, BlockVerifier, ChainView, NotificationBridge, SegmentTransfer,
    TransferOutcome,
};
