//! # Cluster Events
//!
//! Defines the messages that flow between peers over the cluster fabric.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// "Segment N of channel C has been archived."
///
/// The unit of cross-component signaling. It travels on the internal
/// writer-to-coordinator queue and on the cluster bus between peers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArchiveNotification {
    pub channel_id: String,
    pub segment_number: u64,
}

impl ArchiveNotification {
    #[must_use]
    pub fn new(channel_id: impl Into<String>, segment_number: u64) -> Self {
        Self {
            channel_id: channel_id.into(),
            segment_number,
        }
    }
}

/// All events that can be published to the cluster bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ClusterEvent {
    /// A segment was transferred to the remote repository.
    SegmentArchived(ArchiveNotification),
}

impl ClusterEvent {
    /// Get the topic for this event.
    #[must_use]
    pub fn topic(&self) -> EventTopic {
        match self {
            Self::SegmentArchived(_) => EventTopic::Archive,
        }
    }

    /// Channel the event belongs to.
    #[must_use]
    pub fn channel_id(&self) -> &str {
        match self {
            Self::SegmentArchived(n) => &n.channel_id,
        }
    }
}

/// Event topics for filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventTopic {
    /// Archive notifications.
    Archive,
    /// Every topic.
    All,
}

/// Dissemination scope of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageTag {
    /// Any peer may receive it.
    Empty,
    /// Only peers of the same organization.
    OrgOnly,
    /// Only peers in the same channel.
    ChannelOnly,
    /// Only peers in the same channel AND the same organization.
    ChannelAndOrg,
}

/// An event wrapped with its routing envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterMessage {
    /// Unique message id, for log correlation.
    pub message_id: Uuid,
    /// Dissemination scope.
    pub tag: MessageTag,
    /// Organization of the sending peer.
    pub org_id: String,
    /// The event itself.
    pub event: ClusterEvent,
}

impl ClusterMessage {
    /// Wrap an event with a fresh message id.
    #[must_use]
    pub fn new(tag: MessageTag, org_id: impl Into<String>, event: ClusterEvent) -> Self {
        Self {
            message_id: Uuid::new_v4(),
            tag,
            org_id: org_id.into(),
            event,
        }
    }

    /// An archive notification scoped to the sender's channel and organization.
    #[must_use]
    pub fn segment_archived(org_id: impl Into<String>, notification: ArchiveNotification) -> Self {
        Self::new(
            MessageTag::ChannelAndOrg,
            org_id,
            ClusterEvent::SegmentArchived(notification),
        )
    }

    #[must_use]
    pub fn topic(&self) -> EventTopic {
        self.event.topic()
    }

    #[must_use]
    pub fn channel_id(&self) -> &str {
        self.event.channel_id()
    }
}

/// Filter for subscribing to specific messages.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    /// Topics to include. Empty means all topics.
    pub topics: Vec<EventTopic>,
    /// Channel to include. `None` means every channel.
    pub channel_id: Option<String>,
    /// Organization of the subscriber. Used to honor org-scoped tags.
    pub org_id: Option<String>,
}

impl EventFilter {
    /// Create a filter that accepts all messages.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Create a filter for specific topics.
    #[must_use]
    pub fn topics(topics: Vec<EventTopic>) -> Self {
        Self {
            topics,
            ..Self::default()
        }
    }

    /// Restrict to one channel.
    #[must_use]
    pub fn for_channel(mut self, channel_id: impl Into<String>) -> Self {
        self.channel_id = Some(channel_id.into());
        self
    }

    /// Declare the subscriber's organization.
    #[must_use]
    pub fn for_org(mut self, org_id: impl Into<String>) -> Self {
        self.org_id = Some(org_id.into());
        self
    }

    /// Check if a message matches this filter.
    #[must_use]
    pub fn matches(&self, message: &ClusterMessage) -> bool {
        let topic_match = self.topics.is_empty()
            || self.topics.contains(&EventTopic::All)
            || self.topics.contains(&message.topic());

        let channel_match = match (&self.channel_id, message.tag) {
            (None, _) => true,
            (_, MessageTag::Empty | MessageTag::OrgOnly) => true,
            (Some(channel), _) => channel == message.channel_id(),
        };

        let org_match = match (&self.org_id, message.tag) {
            (Some(org), MessageTag::OrgOnly | MessageTag::ChannelAndOrg) => *org == message.org_id,
            _ => true,
        };

        topic_match && channel_match && org_match
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn archived(channel: &str, org: &str, segment: u64) -> ClusterMessage {
        ClusterMessage::segment_archived(org, ArchiveNotification::new(channel, segment))
    }

    #[test]
    fn test_event_topic_mapping() {
        let msg = archived("mychannel", "org1", 5);
        assert_eq!(msg.topic(), EventTopic::Archive);
        assert_eq!(msg.channel_id(), "mychannel");
        assert_eq!(msg.tag, MessageTag::ChannelAndOrg);
    }

    #[test]
    fn test_filter_all() {
        let filter = EventFilter::all();
        assert!(filter.matches(&archived("a", "org1", 1)));
    }

    #[test]
    fn test_filter_by_channel() {
        let filter = EventFilter::topics(vec![EventTopic::Archive]).for_channel("mychannel");
        assert!(filter.matches(&archived("mychannel", "org1", 1)));
        assert!(!filter.matches(&archived("otherchannel", "org1", 1)));
    }

    #[test]
    fn test_filter_honors_org_scope() {
        let filter = EventFilter::all().for_channel("mychannel").for_org("org1");
        assert!(filter.matches(&archived("mychannel", "org1", 1)));
        assert!(!filter.matches(&archived("mychannel", "org2", 1)));
    }

    #[test]
    fn test_unscoped_message_ignores_channel_filter() {
        let filter = EventFilter::all().for_channel("mychannel");
        let msg = ClusterMessage::new(
            MessageTag::Empty,
            "org1",
            ClusterEvent::SegmentArchived(ArchiveNotification::new("elsewhere", 2)),
        );
        assert!(filter.matches(&msg));
    }
}
