//! Redis-backed fact cache (shared across nodes)

use std::time::Duration;

use async_trait::async_trait;
use redis::{aio::ConnectionManager, AsyncCommands};

use crate::{
    models::{BroadcastId, CurrentTrack, UserId},
    Error, Result,
};

use super::{listeners_key, live_key, track_key, FactCache};

/// Fact cache over a Redis connection manager
///
/// Track and pointer entries carry the TTL supplied per write; listener
/// sets idle-expire so an abandoned set cannot outlive its broadcast by
/// more than the idle window.
#[derive(Clone)]
pub struct RedisFactCache {
    conn: ConnectionManager,
    key_prefix: String,
}

impl RedisFactCache {
    const LISTENER_IDLE_TTL_SECS: i64 = 900;

    #[must_use]
    pub const fn new(conn: ConnectionManager, key_prefix: String) -> Self {
        Self { conn, key_prefix }
    }
}

impl std::fmt::Debug for RedisFactCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisFactCache")
            .field("key_prefix", &self.key_prefix)
            .finish()
    }
}

#[async_trait]
impl FactCache for RedisFactCache {
    async fn current_track(&self, curator_id: &UserId) -> Result<Option<CurrentTrack>> {
        let key = track_key(&self.key_prefix, curator_id);
        let mut conn = self.conn.clone();

        let track_json: Option<String> = conn
            .get(&key)
            .await
            .map_err(|e| Error::Cache(format!("Failed to get current track: {e}")))?;

        match track_json {
            Some(json) => {
                crate::metrics::cache::CACHE_HITS
                    .with_label_values(&["track"])
                    .inc();
                let track: CurrentTrack = serde_json::from_str(&json)
                    .map_err(|e| Error::Cache(format!("Failed to deserialize cached track: {e}")))?;
                Ok(Some(track))
            }
            None => {
                crate::metrics::cache::CACHE_MISSES
                    .with_label_values(&["track"])
                    .inc();
                Ok(None)
            }
        }
    }

    async fn put_current_track(
        &self,
        curator_id: &UserId,
        track: &CurrentTrack,
        ttl: Duration,
    ) -> Result<()> {
        let key = track_key(&self.key_prefix, curator_id);
        let json = serde_json::to_string(track)
            .map_err(|e| Error::Cache(format!("Failed to serialize track: {e}")))?;

        let mut conn = self.conn.clone();
        let _: () = conn
            .set_ex(&key, json, ttl.as_secs().max(1))
            .await
            .map_err(|e| Error::Cache(format!("Failed to cache current track: {e}")))?;

        tracing::debug!(
            curator_id = %curator_id,
            track_id = %track.track_id,
            ttl_seconds = ttl.as_secs(),
            "Current track cached"
        );
        Ok(())
    }

    async fn clear_current_track(&self, curator_id: &UserId) -> Result<()> {
        let key = track_key(&self.key_prefix, curator_id);
        let mut conn = self.conn.clone();
        let _: () = conn
            .del(&key)
            .await
            .map_err(|e| Error::Cache(format!("Failed to clear current track: {e}")))?;
        Ok(())
    }

    async fn live_pointer(&self, curator_id: &UserId) -> Result<Option<BroadcastId>> {
        let key = live_key(&self.key_prefix, curator_id);
        let mut conn = self.conn.clone();

        let broadcast_id: Option<String> = conn
            .get(&key)
            .await
            .map_err(|e| Error::Cache(format!("Failed to get live pointer: {e}")))?;

        match broadcast_id {
            Some(id) => {
                crate::metrics::cache::CACHE_HITS
                    .with_label_values(&["live"])
                    .inc();
                Ok(Some(BroadcastId::from_string(id)))
            }
            None => {
                crate::metrics::cache::CACHE_MISSES
                    .with_label_values(&["live"])
                    .inc();
                Ok(None)
            }
        }
    }

    async fn put_live_pointer(
        &self,
        curator_id: &UserId,
        broadcast_id: &BroadcastId,
        ttl: Duration,
    ) -> Result<()> {
        let key = live_key(&self.key_prefix, curator_id);
        let mut conn = self.conn.clone();
        let _: () = conn
            .set_ex(&key, broadcast_id.as_str(), ttl.as_secs().max(1))
            .await
            .map_err(|e| Error::Cache(format!("Failed to set live pointer: {e}")))?;

        tracing::debug!(
            curator_id = %curator_id,
            broadcast_id = %broadcast_id,
            ttl_seconds = ttl.as_secs(),
            "Live pointer cached"
        );
        Ok(())
    }

    async fn clear_live_pointer(&self, curator_id: &UserId) -> Result<()> {
        let key = live_key(&self.key_prefix, curator_id);
        let mut conn = self.conn.clone();
        let _: () = conn
            .del(&key)
            .await
            .map_err(|e| Error::Cache(format!("Failed to clear live pointer: {e}")))?;
        Ok(())
    }

    async fn add_listener(&self, broadcast_id: &BroadcastId, user_id: &UserId) -> Result<()> {
        let key = listeners_key(&self.key_prefix, broadcast_id);
        let mut conn = self.conn.clone();
        let _: () = conn
            .sadd(&key, user_id.as_str())
            .await
            .map_err(|e| Error::Cache(format!("Failed to add cached listener: {e}")))?;
        // Refresh the idle window on every touch
        let _: () = conn
            .expire(&key, Self::LISTENER_IDLE_TTL_SECS)
            .await
            .map_err(|e| Error::Cache(format!("Failed to refresh listener set ttl: {e}")))?;
        Ok(())
    }

    async fn remove_listener(&self, broadcast_id: &BroadcastId, user_id: &UserId) -> Result<()> {
        let key = listeners_key(&self.key_prefix, broadcast_id);
        let mut conn = self.conn.clone();
        let _: () = conn
            .srem(&key, user_id.as_str())
            .await
            .map_err(|e| Error::Cache(format!("Failed to remove cached listener: {e}")))?;
        Ok(())
    }

    async fn listener_set(&self, broadcast_id: &BroadcastId) -> Result<Vec<UserId>> {
        let key = listeners_key(&self.key_prefix, broadcast_id);
        let mut conn = self.conn.clone();
        let members: Vec<String> = conn
            .smembers(&key)
            .await
            .map_err(|e| Error::Cache(format!("Failed to read listener set: {e}")))?;
        Ok(members.into_iter().map(UserId::from_string).collect())
    }

    async fn clear_listener_set(&self, broadcast_id: &BroadcastId) -> Result<()> {
        let key = listeners_key(&self.key_prefix, broadcast_id);
        let mut conn = self.conn.clone();
        let _: () = conn
            .del(&key)
            .await
            .map_err(|e| Error::Cache(format!("Failed to clear listener set: {e}")))?;
        tracing::debug!(broadcast_id = %broadcast_id, "Listener set cleared");
        Ok(())
    }
}
