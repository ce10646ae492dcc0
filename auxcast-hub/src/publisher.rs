use std::sync::Arc;

use chrono::Utc;

use auxcast_core::models::{Broadcast, BroadcastId, ChatMessage, CurrentTrack, EndReason, MessageId, UserId};
use auxcast_core::service::EventPublisher;

use crate::events::FanoutEvent;
use crate::hub::FanoutHub;

/// Bridges service-layer domain events onto the fan-out hub
///
/// Lifecycle events go to every subscriber so discovery views stay
/// fresh; listener and chat events stay scoped to the broadcast's
/// interest group.
pub struct HubEventPublisher {
    hub: Arc<FanoutHub>,
}

impl HubEventPublisher {
    #[must_use]
    pub fn new(hub: Arc<FanoutHub>) -> Self {
        Self { hub }
    }
}

impl EventPublisher for HubEventPublisher {
    fn broadcast_started(&self, broadcast: &Broadcast, track: Option<&CurrentTrack>) {
        self.hub.publish_global(FanoutEvent::BroadcastStarted {
            broadcast: broadcast.clone(),
            current_track: track.cloned(),
            timestamp: Utc::now(),
        });
    }

    fn broadcast_ended(&self, broadcast: &Broadcast, reason: EndReason) {
        self.hub.publish_global(FanoutEvent::BroadcastEnded {
            broadcast_id: broadcast.id.clone(),
            curator_id: broadcast.curator_id.clone(),
            reason,
            timestamp: Utc::now(),
        });
        // Nobody left to scope to once the broadcast is gone
        self.hub.drop_group(&broadcast.id);
    }

    fn listener_joined(&self, broadcast_id: &BroadcastId, user_id: &UserId, listener_count: i64) {
        self.hub.publish_to_group(
            broadcast_id,
            FanoutEvent::ListenerJoined {
                broadcast_id: broadcast_id.clone(),
                user_id: user_id.clone(),
                listener_count,
                timestamp: Utc::now(),
            },
        );
    }

    fn listener_left(&self, broadcast_id: &BroadcastId, user_id: &UserId, listener_count: i64) {
        self.hub.publish_to_group(
            broadcast_id,
            FanoutEvent::ListenerLeft {
                broadcast_id: broadcast_id.clone(),
                user_id: user_id.clone(),
                listener_count,
                timestamp: Utc::now(),
            },
        );
    }

    fn chat_message(&self, message: &ChatMessage) {
        self.hub.publish_to_group(
            &message.broadcast_id,
            FanoutEvent::ChatMessage {
                message: message.clone(),
            },
        );
    }

    fn chat_message_deleted(&self, broadcast_id: &BroadcastId, message_id: &MessageId) {
        self.hub.publish_to_group(
            broadcast_id,
            FanoutEvent::ChatMessageDeleted {
                broadcast_id: broadcast_id.clone(),
                message_id: message_id.clone(),
                timestamp: Utc::now(),
            },
        );
    }
}

impl std::fmt::Debug for HubEventPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HubEventPublisher").finish_non_exhaustive()
    }
}
