//! Change notifications for external consumers.
//!
//! The connection router (an external collaborator) needs to learn about
//! leadership and topology changes without reaching into the controller.
//! This bus is that narrow interface: the controller publishes leadership
//! transitions, a forwarder task translates store watch events into
//! topology changes, and subscribers consume a filtered stream.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;
use vigil_core::{now_ms, ClusterMember, FailoverReason, MemberId};
use vigil_store::CoordClient;

/// Leadership transitions, as seen by the local controller.
#[derive(Debug, Clone)]
pub enum LeadershipChange {
    Elected {
        member_id: MemberId,
        term: u64,
        reason: FailoverReason,
        timestamp: u64,
    },
    SteppedDown {
        member_id: MemberId,
        term: u64,
        reason: String,
        timestamp: u64,
    },
}

/// Cluster membership changes, derived from store watch events.
#[derive(Debug, Clone)]
pub enum TopologyChange {
    MemberUpdated {
        member_id: MemberId,
        healthy: bool,
        timestamp: u64,
    },
    MemberExpired {
        member_id: MemberId,
        timestamp: u64,
    },
}

/// Combined notification type.
#[derive(Debug, Clone)]
pub enum Notification {
    Leadership(LeadershipChange),
    Topology(TopologyChange),
}

/// Subscription filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationFilter {
    All,
    Leadership,
    Topology,
}

impl NotificationFilter {
    fn matches(&self, notification: &Notification) -> bool {
        match self {
            NotificationFilter::All => true,
            NotificationFilter::Leadership => matches!(notification, Notification::Leadership(_)),
            NotificationFilter::Topology => matches!(notification, Notification::Topology(_)),
        }
    }
}

pub type SubscriptionId = Uuid;

/// Fan-out bus for leadership and topology notifications.
pub struct NotificationBus {
    broadcast_tx: broadcast::Sender<Notification>,
    subscribers: DashMap<SubscriptionId, (NotificationFilter, mpsc::UnboundedSender<Notification>)>,
}

impl Default for NotificationBus {
    fn default() -> Self {
        Self::new()
    }
}

impl NotificationBus {
    pub fn new() -> Self {
        let (broadcast_tx, _) = broadcast::channel(256);
        Self {
            broadcast_tx,
            subscribers: DashMap::new(),
        }
    }

    /// Subscribe with a filter; drop the receiver to unsubscribe lazily, or
    /// call [`unsubscribe`](Self::unsubscribe) to do it eagerly.
    pub fn subscribe(
        &self,
        filter: NotificationFilter,
    ) -> (SubscriptionId, mpsc::UnboundedReceiver<Notification>) {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.insert(id, (filter, tx));
        (id, rx)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.subscribers.remove(&id);
    }

    pub fn subscription_count(&self) -> usize {
        self.subscribers.len()
    }

    fn publish(&self, notification: Notification) {
        // Broadcast channel errors just mean nobody is listening there.
        let _ = self.broadcast_tx.send(notification.clone());
        self.subscribers.retain(|_, (filter, tx)| {
            !filter.matches(&notification) || tx.send(notification.clone()).is_ok()
        });
        debug!(?notification, "published notification");
    }

    pub fn notify_elected(&self, member_id: MemberId, term: u64, reason: FailoverReason) {
        self.publish(Notification::Leadership(LeadershipChange::Elected {
            member_id,
            term,
            reason,
            timestamp: now_ms(),
        }));
    }

    pub fn notify_stepped_down(&self, member_id: MemberId, term: u64, reason: impl Into<String>) {
        self.publish(Notification::Leadership(LeadershipChange::SteppedDown {
            member_id,
            term,
            reason: reason.into(),
            timestamp: now_ms(),
        }));
    }

    pub fn notify_member_updated(&self, member_id: MemberId, healthy: bool) {
        self.publish(Notification::Topology(TopologyChange::MemberUpdated {
            member_id,
            healthy,
            timestamp: now_ms(),
        }));
    }

    pub fn notify_member_expired(&self, member_id: MemberId) {
        self.publish(Notification::Topology(TopologyChange::MemberExpired {
            member_id,
            timestamp: now_ms(),
        }));
    }
}

/// Translate member-record watch events into topology notifications.
///
/// Runs until shutdown; this is how the router-facing bus observes the whole
/// cluster rather than just the local node.
pub fn spawn_topology_forwarder(
    client: CoordClient,
    bus: Arc<NotificationBus>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> JoinHandle<()> {
    use vigil_core::store::StoreEvent;
    use vigil_store::MEMBER_PREFIX;

    tokio::spawn(async move {
        let mut events = match client.watch_members().await {
            Ok(rx) => rx,
            Err(e) => {
                warn!(error = %e, "could not watch member records");
                return;
            }
        };
        loop {
            tokio::select! {
                event = events.recv() => {
                    let Some(event) = event else { break };
                    match event {
                        StoreEvent::Put { value, .. } => {
                            match serde_json::from_str::<ClusterMember>(&value.value) {
                                Ok(member) => bus.notify_member_updated(member.id, member.healthy),
                                Err(e) => warn!(error = %e, "undecodable member record"),
                            }
                        }
                        StoreEvent::Deleted { key } | StoreEvent::Expired { key } => {
                            if let Some(id) = key.strip_prefix(MEMBER_PREFIX) {
                                bus.notify_member_expired(MemberId::new(id));
                            }
                        }
                    }
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscribe_and_unsubscribe() {
        let bus = NotificationBus::new();
        let (id, _rx) = bus.subscribe(NotificationFilter::All);
        assert_eq!(bus.subscription_count(), 1);
        bus.unsubscribe(id);
        assert_eq!(bus.subscription_count(), 0);
    }

    #[tokio::test]
    async fn test_filtered_delivery() {
        let bus = NotificationBus::new();
        let (_l, mut leadership_rx) = bus.subscribe(NotificationFilter::Leadership);
        let (_t, mut topology_rx) = bus.subscribe(NotificationFilter::Topology);

        bus.notify_elected(MemberId::new("pg-a"), 3, FailoverReason::LeaseExpired);

        let received = leadership_rx.recv().await.unwrap();
        assert!(matches!(
            received,
            Notification::Leadership(LeadershipChange::Elected { term: 3, .. })
        ));
        assert!(topology_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_dropped_subscriber_pruned() {
        let bus = NotificationBus::new();
        let (_id, rx) = bus.subscribe(NotificationFilter::All);
        drop(rx);
        bus.notify_member_expired(MemberId::new("pg-a"));
        assert_eq!(bus.subscription_count(), 0);
    }
}
