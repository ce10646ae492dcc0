//! Chat gateway
//!
//! Message intake for live broadcasts: validation, a per-(broadcast,
//! author) rate gate, durable insert, then best-effort fan-out. History
//! reads page oldest to newest on `(created_at, id)` so two messages in
//! the same millisecond keep a stable order.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::{
    metrics,
    models::{Broadcast, BroadcastId, ChatMessage, MessageId, MessageKind, UserId},
    repository::Store,
    service::{rate_limit::RateLimiter, EventPublisher},
    Error, Result,
};

#[derive(Clone)]
pub struct ChatService {
    store: Arc<dyn Store>,
    rate_limiter: Arc<RateLimiter>,
    liveness_threshold: chrono::Duration,
    rate_max_messages: u32,
    rate_window_secs: u64,
    max_content_chars: usize,
    event_publisher: Option<Arc<dyn EventPublisher>>,
}

impl ChatService {
    /// One message per author per broadcast in this window
    pub const DEFAULT_RATE_MAX_MESSAGES: u32 = 1;
    pub const DEFAULT_RATE_WINDOW_SECS: u64 = 3;
    pub const DEFAULT_HISTORY_LIMIT: i64 = 50;
    pub const MAX_HISTORY_LIMIT: i64 = 200;

    #[must_use]
    pub fn new(
        store: Arc<dyn Store>,
        rate_limiter: Arc<RateLimiter>,
        liveness_threshold_secs: u64,
        rate_max_messages: u32,
        rate_window_secs: u64,
        max_content_chars: usize,
    ) -> Self {
        Self {
            store,
            rate_limiter,
            liveness_threshold: chrono::Duration::seconds(liveness_threshold_secs as i64),
            rate_max_messages,
            rate_window_secs,
            max_content_chars,
            event_publisher: None,
        }
    }

    /// Wire the fan-out publisher after construction
    pub fn set_event_publisher(&mut self, publisher: Arc<dyn EventPublisher>) {
        self.event_publisher = Some(publisher);
    }

    /// Accept a message into a live broadcast
    ///
    /// Liveness is re-checked against the heartbeat lease before the
    /// rate gate, so an ended or zombie broadcast never consumes the
    /// author's rate allowance.
    pub async fn send_message(
        &self,
        broadcast_id: &BroadcastId,
        author_id: &UserId,
        kind: MessageKind,
        content: &str,
    ) -> Result<ChatMessage> {
        if content.trim().is_empty() {
            return Err(Self::rejected(Error::Validation(
                "Message content cannot be empty".to_string(),
            )));
        }
        if content.chars().count() > self.max_content_chars {
            return Err(Self::rejected(Error::Validation(format!(
                "Message content exceeds {} characters",
                self.max_content_chars
            ))));
        }

        let broadcast = self.require_live(broadcast_id, Utc::now()).await?;

        let rate_key = format!("chat:rate:{broadcast_id}:{author_id}");
        if let Err(e) = self
            .rate_limiter
            .check_rate_limit(&rate_key, self.rate_max_messages, self.rate_window_secs)
            .await
        {
            return Err(Self::rejected(e.into()));
        }

        let message = self
            .store
            .insert_message(&ChatMessage::new(
                broadcast.id.clone(),
                author_id.clone(),
                kind,
                content.to_string(),
            ))
            .await?;
        self.store.increment_message_count(&broadcast.id).await?;

        debug!(
            broadcast_id = %broadcast.id,
            message_id = %message.id,
            author_id = %author_id,
            "Chat message accepted"
        );
        metrics::chat::MESSAGES_SENT.inc();
        if let Some(publisher) = &self.event_publisher {
            publisher.chat_message(&message);
        }

        Ok(message)
    }

    /// Latest messages, returned oldest to newest
    pub async fn get_messages(
        &self,
        broadcast_id: &BroadcastId,
        limit: Option<i64>,
    ) -> Result<Vec<ChatMessage>> {
        let limit = Self::resolve_limit(limit)?;
        if self.store.get_broadcast(broadcast_id).await?.is_none() {
            return Err(Error::BroadcastNotFound);
        }
        self.store.list_messages(broadcast_id, limit).await
    }

    /// Messages strictly newer than `after`, oldest to newest
    pub async fn get_messages_after(
        &self,
        broadcast_id: &BroadcastId,
        after: DateTime<Utc>,
        limit: Option<i64>,
    ) -> Result<Vec<ChatMessage>> {
        let limit = Self::resolve_limit(limit)?;
        if self.store.get_broadcast(broadcast_id).await?.is_none() {
            return Err(Error::BroadcastNotFound);
        }
        self.store.list_messages_after(broadcast_id, after, limit).await
    }

    /// Hard-delete a message; only the author may delete
    pub async fn delete_message(
        &self,
        message_id: &MessageId,
        requester_id: &UserId,
    ) -> Result<()> {
        let Some(message) = self.store.get_message(message_id).await? else {
            return Err(Error::MessageNotFound);
        };
        if message.user_id != *requester_id {
            return Err(Error::NotAuthor);
        }
        // A concurrent delete may win the race; report the row as gone
        if !self.store.delete_message(message_id).await? {
            return Err(Error::MessageNotFound);
        }

        debug!(message_id = %message_id, broadcast_id = %message.broadcast_id, "Chat message deleted");
        if let Some(publisher) = &self.event_publisher {
            publisher.chat_message_deleted(&message.broadcast_id, message_id);
        }
        Ok(())
    }

    /// Retention: keep only the newest N messages per broadcast
    pub async fn prune_history(&self, keep_per_broadcast: i64) -> Result<u64> {
        if keep_per_broadcast < 0 {
            return Err(Error::Validation(
                "Retention count cannot be negative".to_string(),
            ));
        }
        let removed = self.store.prune_messages(keep_per_broadcast).await?;
        if removed > 0 {
            info!(removed, keep_per_broadcast, "Pruned chat history");
            metrics::chat::MESSAGES_PRUNED.inc_by(removed);
        }
        Ok(removed)
    }

    /// Run chat retention on a fixed interval until shutdown
    pub fn spawn_retention(
        &self,
        interval: Duration,
        keep_per_broadcast: i64,
        shutdown: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let service = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    () = shutdown.cancelled() => {
                        info!("Chat retention task stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = service.prune_history(keep_per_broadcast).await {
                            error!("Chat retention pass failed: {e}");
                        }
                    }
                }
            }
        })
    }

    fn resolve_limit(limit: Option<i64>) -> Result<i64> {
        match limit {
            None => Ok(Self::DEFAULT_HISTORY_LIMIT),
            Some(n) if n <= 0 => Err(Error::Validation("Limit must be positive".to_string())),
            Some(n) => Ok(n.min(Self::MAX_HISTORY_LIMIT)),
        }
    }

    async fn require_live(
        &self,
        broadcast_id: &BroadcastId,
        now: DateTime<Utc>,
    ) -> Result<Broadcast> {
        let Some(broadcast) = self.store.get_broadcast(broadcast_id).await? else {
            return Err(Self::rejected(Error::BroadcastNotFound));
        };
        if !broadcast.is_live_at(now, self.liveness_threshold) {
            return Err(Self::rejected(Error::BroadcastNotLive));
        }
        Ok(broadcast)
    }

    fn rejected(err: Error) -> Error {
        metrics::chat::MESSAGES_REJECTED
            .with_label_values(&[err.code()])
            .inc();
        err
    }
}

impl std::fmt::Debug for ChatService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatService")
            .field("rate_max_messages", &self.rate_max_messages)
            .field("rate_window_secs", &self.rate_window_secs)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        models::{CurrentTrack, EndReason, User},
        repository::MemoryStore,
    };
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingPublisher {
        events: Mutex<Vec<String>>,
    }

    impl RecordingPublisher {
        fn events(&self) -> Vec<String> {
            self.events.lock().clone()
        }
    }

    impl EventPublisher for RecordingPublisher {
        fn broadcast_started(&self, _: &Broadcast, _: Option<&CurrentTrack>) {}
        fn broadcast_ended(&self, _: &Broadcast, _: EndReason) {}
        fn listener_joined(&self, _: &BroadcastId, _: &UserId, _: i64) {}
        fn listener_left(&self, _: &BroadcastId, _: &UserId, _: i64) {}

        fn chat_message(&self, message: &ChatMessage) {
            self.events.lock().push(format!("chat:{}", message.id));
        }

        fn chat_message_deleted(&self, broadcast_id: &BroadcastId, message_id: &MessageId) {
            self.events
                .lock()
                .push(format!("chat_deleted:{broadcast_id}:{message_id}"));
        }
    }

    struct Fixture {
        service: ChatService,
        store: Arc<MemoryStore>,
        publisher: Arc<RecordingPublisher>,
    }

    fn fixture() -> Fixture {
        fixture_with_rate(
            ChatService::DEFAULT_RATE_MAX_MESSAGES,
            ChatService::DEFAULT_RATE_WINDOW_SECS,
        )
    }

    fn fixture_with_rate(max_messages: u32, window_secs: u64) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let publisher = Arc::new(RecordingPublisher::default());
        let mut service = ChatService::new(
            store.clone(),
            Arc::new(RateLimiter::in_memory_only("test:".to_string())),
            300,
            max_messages,
            window_secs,
            ChatMessage::MAX_CONTENT_CHARS,
        );
        service.set_event_publisher(publisher.clone());
        Fixture {
            service,
            store,
            publisher,
        }
    }

    async fn live_broadcast(store: &MemoryStore) -> Broadcast {
        let curator = store
            .insert_user(&User::new("curator".to_string()))
            .await
            .unwrap();
        store
            .insert_broadcast(&Broadcast::new(curator.id, "chatting".to_string()))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_send_and_fetch() {
        let fx = fixture();
        let broadcast = live_broadcast(&fx.store).await;
        let author = UserId::new();

        let message = fx
            .service
            .send_message(&broadcast.id, &author, MessageKind::Text, "hello room")
            .await
            .unwrap();
        assert_eq!(message.content, "hello room");

        let history = fx.service.get_messages(&broadcast.id, None).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].id, message.id);

        // The durable counter moved with the insert
        let stored = fx.store.get_broadcast(&broadcast.id).await.unwrap().unwrap();
        assert_eq!(stored.message_count, 1);
        assert_eq!(fx.publisher.events(), vec![format!("chat:{}", message.id)]);
    }

    #[tokio::test]
    async fn test_content_validation() {
        let fx = fixture();
        let broadcast = live_broadcast(&fx.store).await;
        let author = UserId::new();

        for bad in ["", "   "] {
            let err = fx
                .service
                .send_message(&broadcast.id, &author, MessageKind::Text, bad)
                .await
                .unwrap_err();
            assert!(matches!(err, Error::Validation(_)));
        }

        // Limit counts characters, not bytes
        let exactly_max = "é".repeat(ChatMessage::MAX_CONTENT_CHARS);
        fx.service
            .send_message(&broadcast.id, &author, MessageKind::Text, &exactly_max)
            .await
            .unwrap();

        let over = "x".repeat(ChatMessage::MAX_CONTENT_CHARS + 1);
        let other_author = UserId::new();
        let err = fx
            .service
            .send_message(&broadcast.id, &other_author, MessageKind::Text, &over)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn test_rate_limit_second_message_in_window() {
        let fx = fixture();
        let broadcast = live_broadcast(&fx.store).await;
        let author = UserId::new();

        fx.service
            .send_message(&broadcast.id, &author, MessageKind::Text, "first")
            .await
            .unwrap();
        let err = fx
            .service
            .send_message(&broadcast.id, &author, MessageKind::Text, "second")
            .await
            .unwrap_err();
        match err {
            Error::RateLimited {
                retry_after_seconds,
            } => assert!(retry_after_seconds >= 1),
            other => panic!("Expected RateLimited, got {other:?}"),
        }

        // A different author in the same broadcast is unaffected
        let other = UserId::new();
        fx.service
            .send_message(&broadcast.id, &other, MessageKind::Emoji, "🔥")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_ended_broadcast_rejects_before_rate_gate() {
        let fx = fixture();
        let broadcast = live_broadcast(&fx.store).await;
        let author = UserId::new();

        fx.store
            .end_broadcast(&broadcast.id, Utc::now())
            .await
            .unwrap();

        let err = fx
            .service
            .send_message(&broadcast.id, &author, MessageKind::Text, "too late")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::BroadcastNotLive));

        let err = fx
            .service
            .send_message(&BroadcastId::new(), &author, MessageKind::Text, "nowhere")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::BroadcastNotFound));
    }

    #[tokio::test]
    async fn test_zombie_broadcast_rejects_messages() {
        let fx = fixture();
        let curator = fx
            .store
            .insert_user(&User::new("curator".to_string()))
            .await
            .unwrap();
        let mut zombie = Broadcast::new(curator.id, "stale".to_string());
        zombie.last_heartbeat_at = Utc::now() - chrono::Duration::seconds(301);
        let zombie = fx.store.insert_broadcast(&zombie).await.unwrap();

        let err = fx
            .service
            .send_message(&zombie.id, &UserId::new(), MessageKind::Text, "anyone?")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::BroadcastNotLive));
    }

    #[tokio::test]
    async fn test_history_ordering_breaks_ties_by_id() {
        let fx = fixture();
        let broadcast = live_broadcast(&fx.store).await;
        let at = Utc::now();

        // Same timestamp, ids decide the order
        for id in ["cccccccccccc", "aaaaaaaaaaaa", "bbbbbbbbbbbb"] {
            let message = ChatMessage {
                id: MessageId::from(id.to_string()),
                broadcast_id: broadcast.id.clone(),
                user_id: UserId::new(),
                kind: MessageKind::Text,
                content: format!("msg {id}"),
                created_at: at,
            };
            fx.store.insert_message(&message).await.unwrap();
        }

        let history = fx.service.get_messages(&broadcast.id, None).await.unwrap();
        let ids: Vec<&str> = history.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["aaaaaaaaaaaa", "bbbbbbbbbbbb", "cccccccccccc"]);
    }

    #[tokio::test]
    async fn test_history_limit_rules() {
        let fx = fixture_with_rate(100, 3);
        let broadcast = live_broadcast(&fx.store).await;
        let author = UserId::new();

        for i in 0..5 {
            fx.service
                .send_message(&broadcast.id, &author, MessageKind::Text, &format!("m{i}"))
                .await
                .unwrap();
        }

        let err = fx
            .service
            .get_messages(&broadcast.id, Some(0))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));

        // Oversized limits clamp, keeping the newest and oldest-first order
        let history = fx
            .service
            .get_messages(&broadcast.id, Some(100_000))
            .await
            .unwrap();
        assert_eq!(history.len(), 5);

        let last_two = fx
            .service
            .get_messages(&broadcast.id, Some(2))
            .await
            .unwrap();
        let contents: Vec<&str> = last_two.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["m3", "m4"]);

        let err = fx
            .service
            .get_messages(&BroadcastId::new(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::BroadcastNotFound));
    }

    #[tokio::test]
    async fn test_messages_after_is_strict() {
        let fx = fixture_with_rate(100, 3);
        let broadcast = live_broadcast(&fx.store).await;
        let author = UserId::new();

        let first = fx
            .service
            .send_message(&broadcast.id, &author, MessageKind::Text, "first")
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        let second = fx
            .service
            .send_message(&broadcast.id, &author, MessageKind::Text, "second")
            .await
            .unwrap();

        let newer = fx
            .service
            .get_messages_after(&broadcast.id, first.created_at, None)
            .await
            .unwrap();
        assert_eq!(newer.len(), 1);
        assert_eq!(newer[0].id, second.id);

        let none = fx
            .service
            .get_messages_after(&broadcast.id, second.created_at, None)
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_delete_is_author_only() {
        let fx = fixture();
        let broadcast = live_broadcast(&fx.store).await;
        let author = UserId::new();
        let stranger = UserId::new();

        let message = fx
            .service
            .send_message(&broadcast.id, &author, MessageKind::Text, "delete me")
            .await
            .unwrap();

        let err = fx
            .service
            .delete_message(&message.id, &stranger)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotAuthor));

        fx.service.delete_message(&message.id, &author).await.unwrap();
        assert!(fx
            .service
            .get_messages(&broadcast.id, None)
            .await
            .unwrap()
            .is_empty());

        // Second delete reports the row gone
        let err = fx
            .service
            .delete_message(&message.id, &author)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::MessageNotFound));

        let events = fx.publisher.events();
        assert_eq!(
            events.last().map(String::as_str),
            Some(format!("chat_deleted:{}:{}", broadcast.id, message.id).as_str())
        );
    }

    #[tokio::test]
    async fn test_prune_history() {
        let fx = fixture_with_rate(100, 3);
        let broadcast = live_broadcast(&fx.store).await;
        let author = UserId::new();

        for i in 0..6 {
            fx.service
                .send_message(&broadcast.id, &author, MessageKind::Text, &format!("m{i}"))
                .await
                .unwrap();
        }

        let removed = fx.service.prune_history(2).await.unwrap();
        assert_eq!(removed, 4);

        let remaining = fx.service.get_messages(&broadcast.id, None).await.unwrap();
        let contents: Vec<&str> = remaining.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["m4", "m5"]);

        let err = fx.service.prune_history(-1).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }
}
