//! Test helpers and fixtures
//!
//! Fixture builders and a fully wired in-memory service set, shared by
//! unit tests and the integration suite. Compiled unconditionally so
//! `tests/` targets can use it.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use crate::cache::MemoryFactCache;
use crate::models::{
    Broadcast, BroadcastId, BroadcastStatus, ChatMessage, MessageId, MessageKind, User, UserId,
};
use crate::platform::StaticPlatform;
use crate::repository::{MemoryStore, Store};
use crate::service::{
    ChatService, DiscoveryService, EventPublisher, NowPlayingService, PresenceService,
    RateLimiter,
};

/// Create a user ID from a fixed string
pub fn test_user_id(id: &str) -> UserId {
    UserId::from_string(id.to_string())
}

/// Create a broadcast ID from a fixed string
pub fn test_broadcast_id(id: &str) -> BroadcastId {
    BroadcastId::from_string(id.to_string())
}

/// Test fixture builder for User
pub struct UserFixture {
    id: UserId,
    display_name: String,
    genre_tags: Vec<String>,
}

impl UserFixture {
    pub fn new() -> Self {
        Self {
            id: UserId::new(),
            display_name: "test_user".to_string(),
            genre_tags: Vec::new(),
        }
    }

    pub fn with_id(mut self, id: UserId) -> Self {
        self.id = id;
        self
    }

    pub fn with_display_name(mut self, name: &str) -> Self {
        self.display_name = name.to_string();
        self
    }

    pub fn with_genres(mut self, tags: &[&str]) -> Self {
        self.genre_tags = tags.iter().map(|t| (*t).to_string()).collect();
        self
    }

    pub fn build(self) -> User {
        User {
            id: self.id,
            display_name: self.display_name,
            genre_tags: self.genre_tags,
            created_at: Utc::now(),
        }
    }
}

impl Default for UserFixture {
    fn default() -> Self {
        Self::new()
    }
}

/// Test fixture builder for Broadcast
pub struct BroadcastFixture {
    id: BroadcastId,
    curator_id: UserId,
    caption: String,
    status: BroadcastStatus,
    heartbeat_age_seconds: i64,
    peak_listeners: i32,
}

impl BroadcastFixture {
    pub fn new() -> Self {
        Self {
            id: BroadcastId::new(),
            curator_id: UserId::new(),
            caption: "Test broadcast".to_string(),
            status: BroadcastStatus::Live,
            heartbeat_age_seconds: 0,
            peak_listeners: 0,
        }
    }

    pub fn with_id(mut self, id: BroadcastId) -> Self {
        self.id = id;
        self
    }

    pub fn with_curator(mut self, curator_id: UserId) -> Self {
        self.curator_id = curator_id;
        self
    }

    pub fn with_caption(mut self, caption: &str) -> Self {
        self.caption = caption.to_string();
        self
    }

    pub fn ended(mut self) -> Self {
        self.status = BroadcastStatus::Ended;
        self
    }

    /// Age the heartbeat so the lease reads as expired
    pub fn with_heartbeat_age(mut self, seconds: i64) -> Self {
        self.heartbeat_age_seconds = seconds;
        self
    }

    pub fn with_peak_listeners(mut self, peak: i32) -> Self {
        self.peak_listeners = peak;
        self
    }

    pub fn build(self) -> Broadcast {
        let now = Utc::now();
        let started_at = now - chrono::Duration::seconds(self.heartbeat_age_seconds.max(0));
        Broadcast {
            id: self.id,
            curator_id: self.curator_id,
            caption: self.caption,
            status: self.status,
            started_at,
            ended_at: (self.status == BroadcastStatus::Ended).then_some(now),
            last_heartbeat_at: now - chrono::Duration::seconds(self.heartbeat_age_seconds),
            peak_listeners: self.peak_listeners,
            message_count: 0,
        }
    }
}

impl Default for BroadcastFixture {
    fn default() -> Self {
        Self::new()
    }
}

/// Test fixture builder for chat messages
pub struct ChatMessageFixture {
    id: MessageId,
    broadcast_id: BroadcastId,
    user_id: UserId,
    kind: MessageKind,
    content: String,
}

impl ChatMessageFixture {
    pub fn new() -> Self {
        Self {
            id: MessageId::new(),
            broadcast_id: BroadcastId::new(),
            user_id: UserId::new(),
            kind: MessageKind::Text,
            content: "Test message".to_string(),
        }
    }

    pub fn with_id(mut self, id: &str) -> Self {
        self.id = MessageId::from_string(id.to_string());
        self
    }

    pub fn with_broadcast_id(mut self, broadcast_id: BroadcastId) -> Self {
        self.broadcast_id = broadcast_id;
        self
    }

    pub fn with_user_id(mut self, user_id: UserId) -> Self {
        self.user_id = user_id;
        self
    }

    pub fn with_kind(mut self, kind: MessageKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_content(mut self, content: &str) -> Self {
        self.content = content.to_string();
        self
    }

    pub fn build(self) -> ChatMessage {
        ChatMessage {
            id: self.id,
            broadcast_id: self.broadcast_id,
            user_id: self.user_id,
            kind: self.kind,
            content: self.content,
            created_at: Utc::now(),
        }
    }
}

impl Default for ChatMessageFixture {
    fn default() -> Self {
        Self::new()
    }
}

/// The full service set wired over in-memory backends
///
/// Mirrors the production wiring minus the transports: shared store and
/// fact cache, an in-process rate limiter, and a scriptable music
/// platform.
pub struct MemoryHarness {
    pub store: Arc<MemoryStore>,
    pub cache: Arc<MemoryFactCache>,
    pub platform: Arc<StaticPlatform>,
    pub presence: PresenceService,
    pub now_playing: NowPlayingService,
    pub discovery: DiscoveryService,
    pub chat: ChatService,
}

impl MemoryHarness {
    pub fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        let cache = Arc::new(MemoryFactCache::default());
        let platform = Arc::new(StaticPlatform::new());

        let presence = PresenceService::new(store.clone(), cache.clone(), 300, 330);
        let now_playing = NowPlayingService::new(
            platform.clone(),
            store.clone(),
            cache.clone(),
            120,
            15,
            300,
        );
        let discovery = DiscoveryService::new(
            store.clone(),
            cache.clone(),
            300,
            DiscoveryService::DEFAULT_LIMIT,
            DiscoveryService::MAX_LIMIT,
        );
        let chat = ChatService::new(
            store.clone(),
            Arc::new(RateLimiter::in_memory_only("test:".to_string())),
            300,
            ChatService::DEFAULT_RATE_MAX_MESSAGES,
            ChatService::DEFAULT_RATE_WINDOW_SECS,
            ChatMessage::MAX_CONTENT_CHARS,
        );

        Self {
            store,
            cache,
            platform,
            presence,
            now_playing,
            discovery,
            chat,
        }
    }

    /// Wire one publisher into every emitting service
    pub fn set_event_publisher(&mut self, publisher: Arc<dyn EventPublisher>) {
        self.presence.set_event_publisher(publisher.clone());
        self.chat.set_event_publisher(publisher);
    }

    /// Insert a user and return it
    pub async fn seed_user(&self, name: &str) -> User {
        self.store
            .insert_user(&UserFixture::new().with_display_name(name).build())
            .await
            .unwrap()
    }
}

impl Default for MemoryHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// Async test wrapper with timeout
///
/// Use this to prevent tests from hanging indefinitely.
pub async fn with_timeout<F>(duration: Duration, future: F) -> F::Output
where
    F: std::future::Future,
{
    tokio::select! {
        result = future => result,
        _ = tokio::time::sleep(duration) => {
            panic!("Test timed out after {duration:?}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_fixture() {
        let user = UserFixture::new()
            .with_display_name("alice")
            .with_genres(&["ambient", "idm"])
            .build();

        assert_eq!(user.display_name, "alice");
        assert_eq!(user.genre_tags, vec!["ambient", "idm"]);
    }

    #[test]
    fn test_broadcast_fixture() {
        let curator = test_user_id("curator00001");
        let broadcast = BroadcastFixture::new()
            .with_curator(curator.clone())
            .with_caption("late night set")
            .with_heartbeat_age(400)
            .build();

        assert_eq!(broadcast.curator_id, curator);
        assert_eq!(broadcast.caption, "late night set");
        assert!(!broadcast.lease_valid_at(Utc::now(), chrono::Duration::seconds(300)));
    }

    #[test]
    fn test_chat_message_fixture() {
        let broadcast_id = test_broadcast_id("broadcast001");
        let message = ChatMessageFixture::new()
            .with_broadcast_id(broadcast_id.clone())
            .with_kind(MessageKind::Emoji)
            .with_content("🎶")
            .build();

        assert_eq!(message.broadcast_id, broadcast_id);
        assert_eq!(message.kind, MessageKind::Emoji);
        assert_eq!(message.content, "🎶");
    }

    #[tokio::test]
    async fn test_harness_wiring() {
        use crate::cache::FactCache;
        use crate::models::CurrentTrack;

        let harness = MemoryHarness::new();
        let curator = harness.seed_user("dj").await;
        harness
            .cache
            .put_current_track(
                &curator.id,
                &CurrentTrack::new("t1", "Teardrop", "Massive Attack", "static"),
                Duration::from_secs(120),
            )
            .await
            .unwrap();

        let broadcast = harness
            .presence
            .start(&curator.id, "wired".to_string())
            .await
            .unwrap();
        assert_eq!(
            harness
                .store
                .get_broadcast(&broadcast.id)
                .await
                .unwrap()
                .unwrap()
                .caption,
            "wired"
        );
    }
}
