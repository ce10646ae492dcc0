use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, info};

use auxcast_core::metrics;
use auxcast_core::models::{BroadcastId, UserId};

use crate::events::FanoutEvent;

/// In-process hub routing events to connected listeners
///
/// One logical connection per user: a reconnect replaces the previous
/// subscription, whose receiver then reads as closed. Channels are
/// bounded and delivery is `try_send`; a slow consumer loses events
/// (at-most-once) and catches up from the next snapshot, a closed
/// consumer is removed.
#[derive(Clone)]
pub struct FanoutHub {
    /// user -> live subscription
    connections: Arc<DashMap<UserId, mpsc::Sender<FanoutEvent>>>,
    /// broadcast -> users interested in its scoped events
    groups: Arc<DashMap<BroadcastId, HashSet<UserId>>>,
    capacity: usize,
}

impl FanoutHub {
    pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;

    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            connections: Arc::new(DashMap::new()),
            groups: Arc::new(DashMap::new()),
            capacity,
        }
    }

    /// Open the subscription for a user, replacing any previous one
    pub fn connect(&self, user_id: UserId) -> mpsc::Receiver<FanoutEvent> {
        let (tx, rx) = mpsc::channel(self.capacity);
        let replaced = self.connections.insert(user_id.clone(), tx).is_some();
        metrics::fanout::CONNECTED_SUBSCRIBERS.set(self.connections.len() as i64);

        info!(user_id = %user_id, replaced, "Subscriber connected");
        rx
    }

    /// Drop a user's subscription and interest registrations
    pub fn disconnect(&self, user_id: &UserId) {
        if self.connections.remove(user_id).is_none() {
            debug!(user_id = %user_id, "Disconnect for unknown subscriber");
            return;
        }
        metrics::fanout::CONNECTED_SUBSCRIBERS.set(self.connections.len() as i64);

        self.groups.retain(|_, members| {
            members.remove(user_id);
            !members.is_empty()
        });
        info!(user_id = %user_id, "Subscriber disconnected");
    }

    /// Register interest in a broadcast's scoped events
    pub fn watch(&self, user_id: UserId, broadcast_id: BroadcastId) {
        self.groups.entry(broadcast_id).or_default().insert(user_id);
    }

    /// Drop interest in a broadcast
    pub fn unwatch(&self, user_id: &UserId, broadcast_id: &BroadcastId) {
        if let Some(mut members) = self.groups.get_mut(broadcast_id) {
            members.remove(user_id);
            if members.is_empty() {
                drop(members);
                self.groups.remove(broadcast_id);
            }
        }
    }

    /// Drop a broadcast's whole interest group (it ended)
    pub fn drop_group(&self, broadcast_id: &BroadcastId) {
        if self.groups.remove(broadcast_id).is_some() {
            debug!(broadcast_id = %broadcast_id, "Interest group dropped");
        }
    }

    /// Deliver an event to every connected subscriber
    pub fn publish_global(&self, event: FanoutEvent) -> usize {
        let targets: Vec<UserId> = self.connections.iter().map(|e| e.key().clone()).collect();
        self.deliver(&targets, &event)
    }

    /// Deliver an event to the broadcast's interest group only
    pub fn publish_to_group(&self, broadcast_id: &BroadcastId, event: FanoutEvent) -> usize {
        let Some(members) = self.groups.get(broadcast_id) else {
            return 0;
        };
        let targets: Vec<UserId> = members.iter().cloned().collect();
        drop(members);
        self.deliver(&targets, &event)
    }

    /// `try_send` to each target; full channels drop the event, closed
    /// channels evict the subscriber
    fn deliver(&self, targets: &[UserId], event: &FanoutEvent) -> usize {
        let event_type = event.event_type();
        let mut sent = 0;
        let mut closed: Vec<UserId> = Vec::new();

        for user_id in targets {
            let Some(sender) = self.connections.get(user_id) else {
                continue;
            };
            match sender.try_send(event.clone()) {
                Ok(()) => {
                    sent += 1;
                    metrics::fanout::EVENTS_PUBLISHED
                        .with_label_values(&[event_type])
                        .inc();
                }
                Err(mpsc::error::TrySendError::Full(_)) => {
                    metrics::fanout::EVENTS_DROPPED
                        .with_label_values(&[event_type])
                        .inc();
                    debug!(
                        user_id = %user_id,
                        event_type,
                        "Subscriber channel full, event dropped"
                    );
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    closed.push(user_id.clone());
                }
            }
        }

        for user_id in &closed {
            self.disconnect(user_id);
        }

        sent
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.connections.len()
    }

    #[must_use]
    pub fn group_size(&self, broadcast_id: &BroadcastId) -> usize {
        self.groups.get(broadcast_id).map_or(0, |m| m.len())
    }
}

impl Default for FanoutHub {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CHANNEL_CAPACITY)
    }
}

impl std::fmt::Debug for FanoutHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FanoutHub")
            .field("subscribers", &self.connections.len())
            .field("groups", &self.groups.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}
