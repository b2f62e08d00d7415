//! # Archive Listener
//!
//! One task per channel that turns notifications into coordinator triggers:
//!
//! | Source | Trigger |
//! |--------|---------|
//! | writer hand-off queue | `SegmentFinalized` |
//! | cluster bus | `RemoteArchived` |
//! | check interval | `Periodic` |
//!
//! Each notification is processed to completion before the next one. A
//! notification for another channel is logged and ignored.

use crate::domain::errors::ArchiveError;
use crate::ports::inbound::{ArchiveControl, ArchiveTrigger, TriggerReport};
use shared_bus::{ArchiveNotification, ClusterEvent, Subscription};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

/// What happened to one notification.
#[derive(Debug)]
pub enum NotificationOutcome {
    Handled(TriggerReport),
    /// Addressed to another channel; nothing ran.
    ChannelMismatch,
    Failed(ArchiveError),
}

pub struct ArchiveListener {
    channel_id: String,
    control: Arc<dyn ArchiveControl>,
}

impl ArchiveListener {
    pub fn new(control: Arc<dyn ArchiveControl>) -> Self {
        Self {
            channel_id: control.channel_id().to_string(),
            control,
        }
    }

    #[must_use]
    pub fn channel_id(&self) -> &str {
        &self.channel_id
    }

    /// A segment finalized by this peer's write path.
    pub async fn handle_local(&self, notification: ArchiveNotification) -> NotificationOutcome {
        if !self.accepts(&notification) {
            return NotificationOutcome::ChannelMismatch;
        }
        self.dispatch(ArchiveTrigger::SegmentFinalized(notification))
            .await
    }

    /// A segment another peer announced as archived.
    pub async fn handle_notification(
        &self,
        notification: ArchiveNotification,
    ) -> NotificationOutcome {
        if !self.accepts(&notification) {
            return NotificationOutcome::ChannelMismatch;
        }
        self.dispatch(ArchiveTrigger::RemoteArchived(notification))
            .await
    }

    pub async fn handle_periodic(&self) -> NotificationOutcome {
        self.dispatch(ArchiveTrigger::Periodic).await
    }

    fn accepts(&self, notification: &ArchiveNotification) -> bool {
        if notification.channel_id == self.channel_id {
            return true;
        }
        warn!(
            channel = %self.channel_id,
            received_channel = %notification.channel_id,
            segment = notification.segment_number,
            "[qc-02] Archive notification for another channel ignored"
        );
        false
    }

    async fn dispatch(&self, trigger: ArchiveTrigger) -> NotificationOutcome {
        match self.control.on_trigger(trigger).await {
            Ok(report) => NotificationOutcome::Handled(report),
            Err(e) => {
                // The coordinator already logged the cause; the next trigger retries.
                debug!(channel = %self.channel_id, error = %e, "[qc-02] Archive trigger failed");
                NotificationOutcome::Failed(e)
            }
        }
    }

    /// Run the listener until the handle is stopped.
    ///
    /// A source that closes is dropped from the loop; the others keep running.
    pub fn spawn(
        self,
        queue: Option<mpsc::Receiver<ArchiveNotification>>,
        subscription: Option<Subscription>,
        check_interval: Option<Duration>,
    ) -> ArchiveListenerHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(async move {
            let mut queue = queue;
            let mut subscription = subscription;
            let mut ticker = check_interval.map(|period| {
                let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                ticker
            });

            info!(
                channel = %self.channel_id,
                local = queue.is_some(),
                cluster = subscription.is_some(),
                interval = ?check_interval,
                "[qc-02] Archive listener started"
            );

            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => break,

                    local = next_local(&mut queue) => match local {
                        Some(notification) => {
                            self.handle_local(notification).await;
                        }
                        None => {
                            debug!(channel = %self.channel_id, "[qc-02] Writer queue closed");
                            queue = None;
                        }
                    },

                    remote = next_remote(&mut subscription) => match remote {
                        Some(Some(notification)) => {
                            self.handle_notification(notification).await;
                        }
                        Some(None) => {}
                        None => {
                            debug!(channel = %self.channel_id, "[qc-02] Cluster subscription closed");
                            subscription = None;
                        }
                    },

                    _ = next_tick(&mut ticker) => {
                        self.handle_periodic().await;
                    }
                }
            }

            info!(channel = %self.channel_id, "[qc-02] Archive listener stopped");
        });

        ArchiveListenerHandle { shutdown_tx, task }
    }
}

async fn next_local(
    queue: &mut Option<mpsc::Receiver<ArchiveNotification>>,
) -> Option<ArchiveNotification> {
    match queue {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// `None` once the subscription closes; `Some(None)` for an unrelated event.
async fn next_remote(
    subscription: &mut Option<Subscription>,
) -> Option<Option<ArchiveNotification>> {
    let Some(sub) = subscription else {
        return std::future::pending().await;
    };
    let message = sub.recv().await?;
    match message.event {
        ClusterEvent::SegmentArchived(notification) => Some(Some(notification)),
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// Handle to a running listener.
pub struct ArchiveListenerHandle {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ArchiveListenerHandle {
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Signal shutdown and wait for the current notification to finish.
    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.task.await {
            warn!(error = %e, "[qc-02] Archive listener task ended abnormally");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::config::ArchivingRole;
    use crate::service::queue::archive_queue;
    use crate::test_utils::CountingControl;
    use shared_bus::{
        ClusterMessage, EventFilter, EventPublisher, EventSubscriber, EventTopic, InMemoryEventBus,
    };

    async fn wait_for(control: &CountingControl, calls: usize) {
        for _ in 0..100 {
            if control.calls() >= calls {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("expected {calls} triggers, saw {}", control.calls());
    }

    #[tokio::test]
    async fn test_channel_mismatch_is_ignored() {
        let control = Arc::new(CountingControl::new("otherchannel", ArchivingRole::Archiver));
        let listener = ArchiveListener::new(control.clone());

        let outcome = listener
            .handle_local(ArchiveNotification::new("mychannel", 5))
            .await;
        assert!(matches!(outcome, NotificationOutcome::ChannelMismatch));
        let outcome = listener
            .handle_notification(ArchiveNotification::new("mychannel", 5))
            .await;
        assert!(matches!(outcome, NotificationOutcome::ChannelMismatch));

        assert_eq!(control.calls(), 0);
    }

    #[tokio::test]
    async fn test_sources_map_to_triggers() {
        let control = Arc::new(CountingControl::new("mychannel", ArchivingRole::Client));
        let listener = ArchiveListener::new(control.clone());
        let n = ArchiveNotification::new("mychannel", 5);

        listener.handle_local(n.clone()).await;
        listener.handle_notification(n.clone()).await;
        listener.handle_periodic().await;

        assert_eq!(
            control.triggers(),
            vec![
                ArchiveTrigger::SegmentFinalized(n.clone()),
                ArchiveTrigger::RemoteArchived(n),
                ArchiveTrigger::Periodic,
            ]
        );
    }

    #[tokio::test]
    async fn test_spawned_listener_drains_queue_and_bus() {
        let control = Arc::new(CountingControl::new("mychannel", ArchivingRole::Client));
        let bus = InMemoryEventBus::new();
        let subscription = bus.subscribe(
            EventFilter::topics(vec![EventTopic::Archive])
                .for_channel("mychannel")
                .for_org("org1"),
        );
        let (notifier, queue) = archive_queue(8);

        let handle =
            ArchiveListener::new(control.clone()).spawn(Some(queue), Some(subscription), None);

        assert!(notifier.notify(ArchiveNotification::new("mychannel", 1)));
        wait_for(&control, 1).await;
        bus.publish(ClusterMessage::segment_archived(
            "org1",
            ArchiveNotification::new("mychannel", 1),
        ))
        .await;
        wait_for(&control, 2).await;

        handle.stop().await;
        let triggers = control.triggers();
        assert!(matches!(triggers[0], ArchiveTrigger::SegmentFinalized(_)));
        assert!(matches!(triggers[1], ArchiveTrigger::RemoteArchived(_)));
    }

    #[tokio::test]
    async fn test_periodic_check_fires() {
        let control = Arc::new(CountingControl::new("mychannel", ArchivingRole::Archiver));
        let handle = ArchiveListener::new(control.clone()).spawn(
            None,
            None,
            Some(Duration::from_millis(10)),
        );

        wait_for(&control, 2).await;
        handle.stop().await;
        assert!(control
            .triggers()
            .iter()
            .all(|t| *t == ArchiveTrigger::Periodic));
    }

    #[tokio::test]
    async fn test_listener_survives_closed_queue() {
        let control = Arc::new(CountingControl::new("mychannel", ArchivingRole::Archiver));
        let (notifier, queue) = archive_queue(1);
        drop(notifier);

        let handle = ArchiveListener::new(control.clone()).spawn(
            Some(queue),
            None,
            Some(Duration::from_millis(10)),
        );
        wait_for(&control, 1).await;
        assert!(!handle.is_finished());
        handle.stop().await;
    }
}
