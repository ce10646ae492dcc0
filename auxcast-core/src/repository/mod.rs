//! Durable store behind the `Store` trait
//!
//! Two backends: `PgStore` over PostgreSQL for production and
//! `MemoryStore` for tests and single-node dev. Services depend only on
//! `Arc<dyn Store>`, so the backends must agree on semantics (CAS end,
//! idempotent membership, monotonic heartbeat and peak updates).

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    models::{Broadcast, BroadcastId, ChatMessage, ListenerPresence, MessageId, User, UserId},
    Result,
};

#[async_trait]
pub trait Store: Send + Sync {
    // --- users ---

    async fn insert_user(&self, user: &User) -> Result<User>;
    async fn get_user(&self, id: &UserId) -> Result<Option<User>>;
    /// Batch lookup; missing ids are simply absent from the result
    async fn get_users(&self, ids: &[UserId]) -> Result<Vec<User>>;

    // --- follow graph ---

    /// Returns true when a new edge was created (duplicates are no-ops)
    async fn insert_follow(&self, follower: &UserId, curator: &UserId) -> Result<bool>;
    /// Returns true when an edge was actually removed
    async fn delete_follow(&self, follower: &UserId, curator: &UserId) -> Result<bool>;
    async fn following(&self, follower: &UserId) -> Result<Vec<UserId>>;
    async fn followers(&self, curator: &UserId) -> Result<Vec<UserId>>;
    async fn follower_count(&self, curator: &UserId) -> Result<i64>;
    async fn follower_counts(&self, curators: &[UserId]) -> Result<HashMap<UserId, i64>>;
    /// Curators followed by accounts the viewer follows, minus the
    /// viewer's direct follows and the viewer themselves
    async fn second_degree_curators(&self, viewer: &UserId) -> Result<Vec<UserId>>;

    // --- broadcasts ---

    async fn insert_broadcast(&self, broadcast: &Broadcast) -> Result<Broadcast>;
    async fn get_broadcast(&self, id: &BroadcastId) -> Result<Option<Broadcast>>;
    async fn live_broadcast_for_curator(&self, curator: &UserId) -> Result<Option<Broadcast>>;
    async fn list_live_broadcasts(&self) -> Result<Vec<Broadcast>>;
    /// Live broadcasts whose last heartbeat is strictly before `cutoff`
    async fn list_lease_expired(&self, cutoff: DateTime<Utc>) -> Result<Vec<Broadcast>>;
    /// Advance `last_heartbeat_at` to `max(current, now)`; returns false
    /// when the broadcast is missing or no longer live
    async fn touch_heartbeat(&self, id: &BroadcastId, now: DateTime<Utc>) -> Result<bool>;
    /// Compare-and-set Live -> Ended; returns true only for the caller
    /// that actually made the transition
    async fn end_broadcast(&self, id: &BroadcastId, ended_at: DateTime<Utc>) -> Result<bool>;
    /// Raise `peak_listeners` to `max(current, observed)`
    async fn raise_peak_listeners(&self, id: &BroadcastId, observed: i32) -> Result<()>;
    async fn increment_message_count(&self, id: &BroadcastId) -> Result<()>;

    // --- listener presence ---

    /// Idempotent join; returns true only when a new membership row was
    /// created
    async fn upsert_listener(&self, broadcast_id: &BroadcastId, user_id: &UserId) -> Result<bool>;
    /// Idempotent leave; returns true only when a membership was removed
    async fn remove_listener(&self, broadcast_id: &BroadcastId, user_id: &UserId) -> Result<bool>;
    async fn count_listeners(&self, broadcast_id: &BroadcastId) -> Result<i64>;
    async fn list_listeners(&self, broadcast_id: &BroadcastId) -> Result<Vec<ListenerPresence>>;
    async fn clear_listeners(&self, broadcast_id: &BroadcastId) -> Result<u64>;

    // --- chat ---

    async fn insert_message(&self, message: &ChatMessage) -> Result<ChatMessage>;
    async fn get_message(&self, id: &MessageId) -> Result<Option<ChatMessage>>;
    async fn delete_message(&self, id: &MessageId) -> Result<bool>;
    /// Latest `limit` messages returned oldest -> newest, ties in
    /// `created_at` broken by id
    async fn list_messages(&self, broadcast_id: &BroadcastId, limit: i64) -> Result<Vec<ChatMessage>>;
    /// Messages strictly newer than `after`, oldest -> newest
    async fn list_messages_after(
        &self,
        broadcast_id: &BroadcastId,
        after: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<ChatMessage>>;
    /// Retention: keep only the newest N messages per broadcast; returns
    /// rows removed
    async fn prune_messages(&self, keep_per_broadcast: i64) -> Result<u64>;
}
