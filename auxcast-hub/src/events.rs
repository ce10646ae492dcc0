use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use auxcast_core::models::{
    Broadcast, BroadcastId, ChatMessage, CurrentTrack, EndReason, MessageId, UserId,
};
use auxcast_core::service::LiveBroadcastSummary;

/// Events fanned out to connected listeners
///
/// Global events (started, ended, the snapshot) reach every connection;
/// the rest reach only the broadcast's interest group. Delivery is
/// best-effort, so the periodic `live_broadcasts` snapshot is the
/// reconciliation point for anything a client missed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FanoutEvent {
    /// A curator went live
    BroadcastStarted {
        broadcast: Broadcast,
        current_track: Option<CurrentTrack>,
        timestamp: DateTime<Utc>,
    },

    /// A broadcast ended, by the curator or by the liveness sweep
    BroadcastEnded {
        broadcast_id: BroadcastId,
        curator_id: UserId,
        reason: EndReason,
        timestamp: DateTime<Utc>,
    },

    /// A listener joined; carries the post-join count
    ListenerJoined {
        broadcast_id: BroadcastId,
        user_id: UserId,
        listener_count: i64,
        timestamp: DateTime<Utc>,
    },

    /// A listener left; carries the post-leave count
    ListenerLeft {
        broadcast_id: BroadcastId,
        user_id: UserId,
        listener_count: i64,
        timestamp: DateTime<Utc>,
    },

    /// A chat message was accepted
    ChatMessage { message: ChatMessage },

    /// A chat message was removed by its author
    ChatMessageDeleted {
        broadcast_id: BroadcastId,
        message_id: MessageId,
        timestamp: DateTime<Utc>,
    },

    /// Full snapshot of what is live right now
    LiveBroadcasts {
        broadcasts: Vec<LiveBroadcastSummary>,
        timestamp: DateTime<Utc>,
    },
}

impl FanoutEvent {
    /// Short description of the event type
    #[must_use]
    pub const fn event_type(&self) -> &'static str {
        match self {
            Self::BroadcastStarted { .. } => "broadcast_started",
            Self::BroadcastEnded { .. } => "broadcast_ended",
            Self::ListenerJoined { .. } => "listener_joined",
            Self::ListenerLeft { .. } => "listener_left",
            Self::ChatMessage { .. } => "chat_message",
            Self::ChatMessageDeleted { .. } => "chat_message_deleted",
            Self::LiveBroadcasts { .. } => "live_broadcasts",
        }
    }

    /// The broadcast this event belongs to, if it is scoped to one
    #[must_use]
    pub const fn broadcast_id(&self) -> Option<&BroadcastId> {
        match self {
            Self::BroadcastStarted { broadcast, .. } => Some(&broadcast.id),
            Self::BroadcastEnded { broadcast_id, .. }
            | Self::ListenerJoined { broadcast_id, .. }
            | Self::ListenerLeft { broadcast_id, .. }
            | Self::ChatMessageDeleted { broadcast_id, .. } => Some(broadcast_id),
            Self::ChatMessage { message } => Some(&message.broadcast_id),
            Self::LiveBroadcasts { .. } => None,
        }
    }

    /// When the event was produced
    #[must_use]
    pub const fn timestamp(&self) -> &DateTime<Utc> {
        match self {
            Self::BroadcastStarted { timestamp, .. }
            | Self::BroadcastEnded { timestamp, .. }
            | Self::ListenerJoined { timestamp, .. }
            | Self::ListenerLeft { timestamp, .. }
            | Self::ChatMessageDeleted { timestamp, .. }
            | Self::LiveBroadcasts { timestamp, .. } => timestamp,
            Self::ChatMessage { message } => &message.created_at,
        }
    }
}
