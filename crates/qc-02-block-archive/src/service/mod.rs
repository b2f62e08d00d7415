//! # Archive Service
//!
//! Runtime pieces of one channel's archive subsystem: the local write path,
//! the coordinator and the listener driving it, and the read side.

pub mod channel;
pub mod checker;
pub mod coordinator;
pub mod iterator;
pub mod ledger;
pub mod listener;
pub mod queue;
pub mod segment_store;

pub use channel::ArchivingChannel;
pub use checker::ConsistencyChecker;
pub use coordinator::ArchivingCoordinator;
pub use iterator::{BlocksIterator, BlocksIteratorCloser, CommitSignal};
pub use ledger::ArchivedLedger;
pub use listener::{ArchiveListener, ArchiveListenerHandle, NotificationOutcome};
pub use queue::{archive_queue, ArchiveNotifier};
pub use segment_store::SegmentStore;
