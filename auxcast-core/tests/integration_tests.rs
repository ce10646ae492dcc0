//! Integration tests for auxcast-core services
//!
//! These tests drive full curator/listener flows across the presence,
//! now-playing, discovery, and chat services over the in-memory backends.
//!
//! Run with: cargo test --test integration_tests

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;

use auxcast_core::{
    cache::FactCache,
    models::{
        Broadcast, BroadcastId, BroadcastStatus, ChatMessage, CurrentTrack, EndReason,
        MessageId, MessageKind, UserId,
    },
    repository::Store,
    service::{EventPublisher, FeedFilter},
    test_helpers::{with_timeout, MemoryHarness},
    Error,
};

/// Publisher that records every event as a readable line
#[derive(Default)]
struct RecordingPublisher {
    events: Mutex<Vec<String>>,
}

impl RecordingPublisher {
    fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }

    fn count_of(&self, prefix: &str) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| e.starts_with(prefix))
            .count()
    }
}

impl EventPublisher for RecordingPublisher {
    fn broadcast_started(&self, broadcast: &Broadcast, track: Option<&CurrentTrack>) {
        self.events
            .lock()
            .push(format!("started:{}:{}", broadcast.id, track.is_some()));
    }

    fn broadcast_ended(&self, broadcast: &Broadcast, reason: EndReason) {
        self.events
            .lock()
            .push(format!("ended:{}:{reason}", broadcast.id));
    }

    fn listener_joined(&self, broadcast_id: &BroadcastId, user_id: &UserId, count: i64) {
        self.events
            .lock()
            .push(format!("joined:{broadcast_id}:{user_id}:{count}"));
    }

    fn listener_left(&self, broadcast_id: &BroadcastId, user_id: &UserId, count: i64) {
        self.events
            .lock()
            .push(format!("left:{broadcast_id}:{user_id}:{count}"));
    }

    fn chat_message(&self, message: &ChatMessage) {
        self.events.lock().push(format!("chat:{}", message.id));
    }

    fn chat_message_deleted(&self, broadcast_id: &BroadcastId, message_id: &MessageId) {
        self.events
            .lock()
            .push(format!("chat_deleted:{broadcast_id}:{message_id}"));
    }
}

fn wired_harness() -> (MemoryHarness, Arc<RecordingPublisher>) {
    let mut harness = MemoryHarness::new();
    let publisher = Arc::new(RecordingPublisher::default());
    harness.set_event_publisher(publisher.clone());
    (harness, publisher)
}

async fn cache_track(harness: &MemoryHarness, curator: &UserId, title: &str) {
    harness
        .cache
        .put_current_track(
            curator,
            &CurrentTrack::new(format!("t-{title}"), title, "Test Artist", "spotify"),
            Duration::from_secs(120),
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn test_full_broadcast_lifecycle() {
    let (harness, publisher) = wired_harness();
    let curator = harness.seed_user("dj_luna").await;
    let listener = harness.seed_user("night_owl").await;

    // Cannot go live with nothing playing
    let err = harness
        .presence
        .start(&curator.id, "opening set".to_string())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NoActiveTrack));

    cache_track(&harness, &curator.id, "First Light").await;
    let broadcast = harness
        .presence
        .start(&curator.id, "opening set".to_string())
        .await
        .unwrap();
    assert_eq!(broadcast.status, BroadcastStatus::Live);

    let count = harness
        .presence
        .join(&broadcast.id, &listener.id)
        .await
        .unwrap();
    assert_eq!(count, 1);

    let message = harness
        .chat
        .send_message(&broadcast.id, &listener.id, MessageKind::Text, "tune!")
        .await
        .unwrap();

    harness
        .presence
        .stop(&curator.id, &broadcast.id)
        .await
        .unwrap();

    // Ended broadcast refuses joins and messages
    let err = harness
        .presence
        .join(&broadcast.id, &listener.id)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::BroadcastNotLive));
    let err = harness
        .chat
        .send_message(&broadcast.id, &listener.id, MessageKind::Text, "too late")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::BroadcastNotLive));

    // History survives the end of the broadcast
    let history = harness.chat.get_messages(&broadcast.id, None).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].id, message.id);

    let events = publisher.events();
    assert_eq!(events[0], format!("started:{}:true", broadcast.id));
    assert!(events.contains(&format!("chat:{}", message.id)));
    assert_eq!(
        events.last(),
        Some(&format!("ended:{}:stopped", broadcast.id))
    );
}

#[tokio::test]
async fn test_concurrent_starts_yield_one_live_broadcast() {
    let (harness, _publisher) = wired_harness();
    let curator = harness.seed_user("dj_race").await;
    cache_track(&harness, &curator.id, "Photon").await;

    let svc_a = harness.presence.clone();
    let svc_b = harness.presence.clone();
    let id_a = curator.id.clone();
    let id_b = curator.id.clone();

    let (a, b) = with_timeout(Duration::from_secs(5), async {
        tokio::join!(
            tokio::spawn(async move { svc_a.start(&id_a, "one".to_string()).await }),
            tokio::spawn(async move { svc_b.start(&id_b, "two".to_string()).await }),
        )
    })
    .await;
    let results = [a.unwrap(), b.unwrap()];

    let ok = results.iter().filter(|r| r.is_ok()).count();
    let already_live = results
        .iter()
        .filter(|r| matches!(r, Err(Error::AlreadyLive)))
        .count();
    assert_eq!((ok, already_live), (1, 1));

    let live = harness.store.list_live_broadcasts().await.unwrap();
    assert_eq!(live.len(), 1);
}

#[tokio::test]
async fn test_sweep_tears_down_silent_broadcast() {
    let (harness, publisher) = wired_harness();
    let curator = harness.seed_user("dj_gone").await;
    let listener = harness.seed_user("fan").await;
    cache_track(&harness, &curator.id, "Fade Out").await;

    let broadcast = harness
        .presence
        .start(&curator.id, "will vanish".to_string())
        .await
        .unwrap();
    harness
        .presence
        .join(&broadcast.id, &listener.id)
        .await
        .unwrap();

    // Six minutes of silence, then a sweep pass
    let later = Utc::now() + chrono::Duration::minutes(6);
    let ended = harness.presence.sweep(later).await.unwrap();
    assert_eq!(ended, 1);

    let stored = harness
        .store
        .get_broadcast(&broadcast.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, BroadcastStatus::Ended);
    assert!(stored.ended_at.is_some());
    assert_eq!(harness.store.count_listeners(&broadcast.id).await.unwrap(), 0);
    assert!(harness
        .cache
        .live_pointer(&curator.id)
        .await
        .unwrap()
        .is_none());
    assert!(harness
        .cache
        .current_track(&curator.id)
        .await
        .unwrap()
        .is_none());

    assert_eq!(
        publisher.events().last(),
        Some(&format!("ended:{}:liveness_expired", broadcast.id))
    );

    let err = harness
        .presence
        .join(&broadcast.id, &listener.id)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::BroadcastNotLive));
}

#[tokio::test]
async fn test_join_idempotent_and_peak_monotonic() {
    let (harness, publisher) = wired_harness();
    let curator = harness.seed_user("dj_peak").await;
    let a = harness.seed_user("a").await;
    let b = harness.seed_user("b").await;
    cache_track(&harness, &curator.id, "Crowd").await;

    let broadcast = harness
        .presence
        .start(&curator.id, "counting".to_string())
        .await
        .unwrap();

    harness.presence.join(&broadcast.id, &a.id).await.unwrap();
    harness.presence.join(&broadcast.id, &b.id).await.unwrap();
    // Re-join is a no-op for membership and events
    harness.presence.join(&broadcast.id, &a.id).await.unwrap();
    assert_eq!(harness.store.count_listeners(&broadcast.id).await.unwrap(), 2);
    assert_eq!(publisher.count_of("joined:"), 2);

    harness.presence.leave(&broadcast.id, &b.id).await.unwrap();
    harness.presence.join(&broadcast.id, &b.id).await.unwrap();

    let stored = harness
        .store
        .get_broadcast(&broadcast.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.peak_listeners, 2);
}

#[tokio::test]
async fn test_track_refresh_feeds_discovery() {
    let (harness, _publisher) = wired_harness();
    let curator = harness.seed_user("dj_sync").await;
    let viewer = harness.seed_user("viewer").await;
    cache_track(&harness, &curator.id, "Warmup").await;

    let broadcast = harness
        .presence
        .start(&curator.id, "sync test".to_string())
        .await
        .unwrap();

    // The platform moves to a new track; a synchronizer pass picks it up
    harness.platform.set_playing(
        &curator.id,
        CurrentTrack::new("t-next", "Next Up", "Test Artist", "spotify"),
    );
    let refreshed = harness.now_playing.refresh_once(Utc::now()).await.unwrap();
    assert_eq!(refreshed, 1);

    let feed = harness
        .discovery
        .feed(&viewer.id, FeedFilter::Trending, None, Utc::now())
        .await
        .unwrap();
    assert_eq!(feed.len(), 1);
    assert_eq!(feed[0].broadcast.id, broadcast.id);
    assert_eq!(
        feed[0].current_track.as_ref().map(|t| t.track_id.as_str()),
        Some("t-next")
    );
    assert_eq!(feed[0].listener_count, 0);
}

#[tokio::test]
async fn test_discovery_filters_and_zombie_exclusion() {
    let (harness, _publisher) = wired_harness();
    let viewer = harness.seed_user("viewer").await;
    let followed = harness.seed_user("followed_dj").await;
    let tagged = harness
        .store
        .insert_user(
            &auxcast_core::test_helpers::UserFixture::new()
                .with_display_name("genre_dj")
                .with_genres(&["Synthwave"])
                .build(),
        )
        .await
        .unwrap();

    harness
        .discovery
        .follow(&viewer.id, &followed.id)
        .await
        .unwrap();

    cache_track(&harness, &followed.id, "A").await;
    cache_track(&harness, &tagged.id, "B").await;
    let followed_b = harness
        .presence
        .start(&followed.id, "followed set".to_string())
        .await
        .unwrap();
    let tagged_b = harness
        .presence
        .start(&tagged.id, "tagged set".to_string())
        .await
        .unwrap();

    let now = Utc::now();
    let following = harness
        .discovery
        .feed(&viewer.id, FeedFilter::Following, None, now)
        .await
        .unwrap();
    assert_eq!(following.len(), 1);
    assert_eq!(following[0].broadcast.id, followed_b.id);

    let genre = harness
        .discovery
        .feed(&viewer.id, FeedFilter::Genre("synthwave".to_string()), None, now)
        .await
        .unwrap();
    assert_eq!(genre.len(), 1);
    assert_eq!(genre[0].broadcast.id, tagged_b.id);

    // Both fall out of discovery once their leases lapse, before any sweep
    let later = now + chrono::Duration::minutes(6);
    let trending = harness
        .discovery
        .feed(&viewer.id, FeedFilter::Trending, None, later)
        .await
        .unwrap();
    assert!(trending.is_empty());
}

#[tokio::test]
async fn test_chat_rate_limit_and_moderation() {
    let (harness, publisher) = wired_harness();
    let curator = harness.seed_user("dj_mod").await;
    let chatty = harness.seed_user("chatty").await;
    let other = harness.seed_user("other").await;
    cache_track(&harness, &curator.id, "Limits").await;

    let broadcast = harness
        .presence
        .start(&curator.id, "moderated".to_string())
        .await
        .unwrap();

    let first = harness
        .chat
        .send_message(&broadcast.id, &chatty.id, MessageKind::Text, "first")
        .await
        .unwrap();

    match harness
        .chat
        .send_message(&broadcast.id, &chatty.id, MessageKind::Text, "second")
        .await
        .unwrap_err()
    {
        Error::RateLimited {
            retry_after_seconds,
        } => assert!(retry_after_seconds >= 1),
        other => panic!("Expected RateLimited, got {other:?}"),
    }

    // Deleting someone else's message is refused and changes nothing
    let err = harness
        .chat
        .delete_message(&first.id, &other.id)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotAuthor));
    assert_eq!(
        harness
            .chat
            .get_messages(&broadcast.id, None)
            .await
            .unwrap()
            .len(),
        1
    );

    harness
        .chat
        .delete_message(&first.id, &chatty.id)
        .await
        .unwrap();
    assert!(harness
        .chat
        .get_messages(&broadcast.id, None)
        .await
        .unwrap()
        .is_empty());
    assert_eq!(publisher.count_of("chat_deleted:"), 1);
}

#[tokio::test]
async fn test_heartbeat_keeps_broadcast_alive() {
    let (harness, _publisher) = wired_harness();
    let curator = harness.seed_user("dj_alive").await;
    cache_track(&harness, &curator.id, "Pulse").await;

    let broadcast = harness
        .presence
        .start(&curator.id, "heartbeats".to_string())
        .await
        .unwrap();

    harness
        .presence
        .heartbeat(&curator.id, &broadcast.id)
        .await
        .unwrap();

    // A sweep inside the lease window ends nothing
    let soon = Utc::now() + chrono::Duration::seconds(200);
    assert_eq!(harness.presence.sweep(soon).await.unwrap(), 0);

    // Only the owner may heartbeat
    let stranger = harness.seed_user("stranger").await;
    let err = harness
        .presence
        .heartbeat(&stranger.id, &broadcast.id)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotOwner));
}
