//! # Blocking Range Iterator
//!
//! `BlocksIterator::next` waits for blocks that are not committed yet. The
//! wait is tied to the write path's committed height through a
//! [`CommitSignal`] and ends on either a new commit or `close()`.
//!
//! The close flag is read and written under the commit lock, and every
//! waiter registers for wake-up before it checks the condition, so a commit
//! or close racing with a waiter is never missed.

use crate::domain::errors::ArchiveResult;
use crate::ports::outbound::BlockSource;
use parking_lot::Mutex;
use shared_types::Block;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

struct CommitState {
    height: u64,
}

/// Committed-height counter with wake-ups, owned by the write path.
pub struct CommitSignal {
    state: Mutex<CommitState>,
    notify: Notify,
}

impl CommitSignal {
    #[must_use]
    pub fn new(height: u64) -> Self {
        Self {
            state: Mutex::new(CommitState { height }),
            notify: Notify::new(),
        }
    }

    #[must_use]
    pub fn height(&self) -> u64 {
        self.state.lock().height
    }

    /// Publish a new committed height and wake every waiter.
    pub fn advance(&self, height: u64) {
        {
            let mut state = self.state.lock();
            if height <= state.height {
                return;
            }
            state.height = height;
        }
        self.notify.notify_waiters();
    }

    fn close(&self, flag: &AtomicBool) {
        {
            let _state = self.state.lock();
            flag.store(true, Ordering::Release);
        }
        self.notify.notify_waiters();
    }
}

impl Default for CommitSignal {
    fn default() -> Self {
        Self::new(0)
    }
}

/// Sequential blocks from `start`, waiting at the head of the chain.
pub struct BlocksIterator {
    source: Arc<dyn BlockSource>,
    signal: Arc<CommitSignal>,
    next_number: u64,
    closed: Arc<AtomicBool>,
}

impl BlocksIterator {
    pub fn new(source: Arc<dyn BlockSource>, signal: Arc<CommitSignal>, start: u64) -> Self {
        Self {
            source,
            signal,
            next_number: start,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Number of the block the next call returns.
    #[must_use]
    pub fn position(&self) -> u64 {
        self.next_number
    }

    /// Next block, waiting until it is committed.
    ///
    /// Returns `Ok(None)` once the iterator is closed.
    pub async fn next(&mut self) -> ArchiveResult<Option<Block>> {
        loop {
            let notified = self.signal.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let state = self.signal.state.lock();
                if self.closed.load(Ordering::Acquire) {
                    return Ok(None);
                }
                if state.height > self.next_number {
                    break;
                }
            }
            notified.await;
        }

        let block = self.source.block_by_number(self.next_number).await?;
        self.next_number += 1;
        Ok(Some(block))
    }

    /// Stop the iterator. Idempotent; wakes a pending `next`.
    pub fn close(&self) {
        self.signal.close(&self.closed);
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Handle that closes this iterator from another task.
    #[must_use]
    pub fn closer(&self) -> BlocksIteratorCloser {
        BlocksIteratorCloser {
            signal: Arc::clone(&self.signal),
            closed: Arc::clone(&self.closed),
        }
    }
}

#[derive(Clone)]
pub struct BlocksIteratorCloser {
    signal: Arc<CommitSignal>,
    closed: Arc<AtomicBool>,
}

impl BlocksIteratorCloser {
    pub fn close(&self) {
        self.signal.close(&self.closed);
    }
}
