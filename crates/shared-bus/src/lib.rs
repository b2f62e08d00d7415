//! # Shared Bus - Cluster Messaging Fabric
//!
//! Publish/subscribe transport between peers of a channel. The archiving
//! subsystem uses it to announce archived segments to the rest of the
//! cluster.
//!
//! ```text
//! ┌──────────────┐                    ┌──────────────┐
//! │  Archiver    │                    │   Client     │
//! │  peer        │    publish()       │   peer       │
//! │              │ ──────┐            │              │
//! └──────────────┘       │            └──────────────┘
//!                        ▼                    ↑
//!                  ┌──────────────┐          │
//!                  │ Cluster Bus  │          │
//!                  │              │ ─────────┘
//!                  └──────────────┘  subscribe(filter)
//! ```
//!
//! ## Delivery
//!
//! - At-most-once, best effort. A lagging subscriber skips messages.
//! - Scoping is by [`MessageTag`]; `ChannelAndOrg` messages only match
//!   subscribers of the same channel and organization.

// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod events;
pub mod publisher;
pub mod subscriber;

// Re-export main types
pub use events::{
    ArchiveNotification, ClusterEvent, ClusterMessage, EventFilter, EventTopic, MessageTag,
};
pub use publisher::{EventPublisher, InMemoryEventBus};
pub use subscriber::{EventSubscriber, Subscription, SubscriptionError};

/// Maximum messages to buffer per subscriber before lagging.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1000;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_capacity() {
        assert_eq!(DEFAULT_CHANNEL_CAPACITY, 1000);
    }
}
