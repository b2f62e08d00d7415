//! # Writer Hand-off Queue
//!
//! Bounded queue from the block write path to the channel's archive
//! listener. The writer never waits on it: when the queue is full the
//! notification is dropped with a warning, and the next finalized segment
//! (or the periodic check) catches the coordinator up.

use crate::domain::metrics;
use shared_bus::ArchiveNotification;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

/// Create a hand-off queue holding at most `capacity` notifications.
pub fn archive_queue(capacity: usize) -> (ArchiveNotifier, mpsc::Receiver<ArchiveNotification>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (ArchiveNotifier { tx }, rx)
}

/// Producer side, held by the segment store.
#[derive(Debug, Clone)]
pub struct ArchiveNotifier {
    tx: mpsc::Sender<ArchiveNotification>,
}

impl ArchiveNotifier {
    /// Enqueue without blocking. Returns whether the notification was queued.
    pub fn notify(&self, notification: ArchiveNotification) -> bool {
        match self.tx.try_send(notification) {
            Ok(()) => true,
            Err(TrySendError::Full(n)) => {
                warn!(
                    channel = %n.channel_id,
                    segment = n.segment_number,
                    "[qc-02] Archive queue full, notification dropped"
                );
                metrics::record_notification_dropped();
                false
            }
            Err(TrySendError::Closed(n)) => {
                debug!(
                    channel = %n.channel_id,
                    segment = n.segment_number,
                    "[qc-02] Archive listener gone, notification dropped"
                );
                false
            }
        }
    }
}
