//! Ephemeral fact cache
//!
//! Holds short-lived facts the durable store never sees: the current track
//! per curator, the live-broadcast pointer per curator, and the cached
//! listener set per broadcast. Every entry carries a TTL; expiry means
//! "unknown", never an error. Two backends:
//! - `MemoryFactCache`: Moka with per-entry TTL (local to the node)
//! - `RedisFactCache`: Redis via connection manager (shared across nodes)

pub mod memory;
pub mod redis;

use std::time::Duration;

use async_trait::async_trait;

use crate::{
    models::{BroadcastId, CurrentTrack, UserId},
    Result,
};

pub use memory::MemoryFactCache;
pub use redis::RedisFactCache;

/// Default key prefix when none is configured
pub const DEFAULT_KEY_PREFIX: &str = "auxcast:";

pub(crate) fn track_key(prefix: &str, curator_id: &UserId) -> String {
    format!("{prefix}track:{curator_id}")
}

pub(crate) fn live_key(prefix: &str, curator_id: &UserId) -> String {
    format!("{prefix}live:{curator_id}")
}

pub(crate) fn listeners_key(prefix: &str, broadcast_id: &BroadcastId) -> String {
    format!("{prefix}listeners:{broadcast_id}")
}

/// Cache access used by the presence engine, synchronizer, and discovery
///
/// A read that finds nothing returns `Ok(None)` (or an empty set); only
/// backend failures surface as `Error::Cache`.
#[async_trait]
pub trait FactCache: Send + Sync {
    /// Current track for a curator, if one was observed recently
    async fn current_track(&self, curator_id: &UserId) -> Result<Option<CurrentTrack>>;

    /// Record the curator's current track with a fresh TTL
    async fn put_current_track(
        &self,
        curator_id: &UserId,
        track: &CurrentTrack,
        ttl: Duration,
    ) -> Result<()>;

    async fn clear_current_track(&self, curator_id: &UserId) -> Result<()>;

    /// Live-broadcast pointer for a curator (fast-path conflict check)
    async fn live_pointer(&self, curator_id: &UserId) -> Result<Option<BroadcastId>>;

    /// Set or refresh the live pointer with a fresh TTL
    async fn put_live_pointer(
        &self,
        curator_id: &UserId,
        broadcast_id: &BroadcastId,
        ttl: Duration,
    ) -> Result<()>;

    async fn clear_live_pointer(&self, curator_id: &UserId) -> Result<()>;

    /// Add a listener to the cached set for fan-out sizing
    async fn add_listener(&self, broadcast_id: &BroadcastId, user_id: &UserId) -> Result<()>;

    async fn remove_listener(&self, broadcast_id: &BroadcastId, user_id: &UserId) -> Result<()>;

    /// Cached listener set; the durable store stays the source of truth
    async fn listener_set(&self, broadcast_id: &BroadcastId) -> Result<Vec<UserId>>;

    async fn clear_listener_set(&self, broadcast_id: &BroadcastId) -> Result<()>;
}
