pub mod chat;
pub mod discovery;
pub mod locks;
pub mod now_playing;
pub mod presence;
pub mod rate_limit;

pub use chat::ChatService;
pub use discovery::{DiscoveryService, FeedFilter, LiveBroadcastSummary};
pub use locks::KeyLocks;
pub use now_playing::NowPlayingService;
pub use presence::PresenceService;
pub use rate_limit::{RateLimitError, RateLimiter};

use crate::models::{
    Broadcast, BroadcastId, ChatMessage, CurrentTrack, EndReason, MessageId, UserId,
};

/// Seam for pushing domain events into the fan-out transport
///
/// Implementations must be fast and non-blocking (enqueue and return).
/// Services hold this as `Option<Arc<dyn EventPublisher>>` wired after
/// construction, so the core crate never depends on a transport.
pub trait EventPublisher: Send + Sync {
    fn broadcast_started(&self, broadcast: &Broadcast, track: Option<&CurrentTrack>);

    fn broadcast_ended(&self, broadcast: &Broadcast, reason: EndReason);

    fn listener_joined(&self, broadcast_id: &BroadcastId, user_id: &UserId, listener_count: i64);

    fn listener_left(&self, broadcast_id: &BroadcastId, user_id: &UserId, listener_count: i64);

    fn chat_message(&self, message: &ChatMessage);

    fn chat_message_deleted(&self, broadcast_id: &BroadcastId, message_id: &MessageId);
}

/// Seam for notifying a curator's followers that a broadcast started
///
/// Fire-and-forget: delivery failures are the implementation's problem,
/// never the presence engine's.
#[cfg_attr(test, mockall::automock)]
pub trait PushNotifier: Send + Sync {
    fn broadcast_started(&self, curator_id: &UserId, broadcast_id: &BroadcastId, caption: &str);
}
