//! In-process fact cache (Moka + DashMap)

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use moka::Expiry;

use crate::{
    models::{BroadcastId, CurrentTrack, UserId},
    Result,
};

use super::FactCache;

/// Reads the TTL each entry was stored with
struct PerEntryTtl;

impl<K, V> Expiry<K, (V, Duration)> for PerEntryTtl {
    fn expire_after_create(
        &self,
        _key: &K,
        value: &(V, Duration),
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.1)
    }

    fn expire_after_update(
        &self,
        _key: &K,
        value: &(V, Duration),
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.1)
    }
}

/// Single-node fact cache
///
/// Tracks and live pointers live in Moka caches with per-entry TTL;
/// listener sets live in a `DashMap` and are dropped when the broadcast
/// ends.
#[derive(Clone)]
pub struct MemoryFactCache {
    tracks: moka::future::Cache<String, (CurrentTrack, Duration)>,
    pointers: moka::future::Cache<String, (BroadcastId, Duration)>,
    listeners: Arc<DashMap<String, HashSet<String>>>,
}

impl MemoryFactCache {
    const DEFAULT_MAX_CAPACITY: u64 = 100_000;

    #[must_use]
    pub fn new(max_capacity: u64) -> Self {
        Self {
            tracks: moka::future::Cache::builder()
                .max_capacity(max_capacity)
                .expire_after(PerEntryTtl)
                .build(),
            pointers: moka::future::Cache::builder()
                .max_capacity(max_capacity)
                .expire_after(PerEntryTtl)
                .build(),
            listeners: Arc::new(DashMap::new()),
        }
    }
}

impl Default for MemoryFactCache {
    fn default() -> Self {
        Self::new(Self::DEFAULT_MAX_CAPACITY)
    }
}

impl std::fmt::Debug for MemoryFactCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryFactCache")
            .field("listener_sets", &self.listeners.len())
            .finish()
    }
}

#[async_trait]
impl FactCache for MemoryFactCache {
    async fn current_track(&self, curator_id: &UserId) -> Result<Option<CurrentTrack>> {
        match self.tracks.get(curator_id.as_str()).await {
            Some((track, _)) => {
                crate::metrics::cache::CACHE_HITS
                    .with_label_values(&["track"])
                    .inc();
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
        self.tracks
            .insert(curator_id.as_str().to_string(), (track.clone(), ttl))
            .await;
        tracing::debug!(
            curator_id = %curator_id,
            track_id = %track.track_id,
            ttl_seconds = ttl.as_secs(),
            "Current track cached"
        );
        Ok(())
    }

    async fn clear_current_track(&self, curator_id: &UserId) -> Result<()> {
        self.tracks.invalidate(curator_id.as_str()).await;
        Ok(())
    }

    async fn live_pointer(&self, curator_id: &UserId) -> Result<Option<BroadcastId>> {
        match self.pointers.get(curator_id.as_str()).await {
            Some((broadcast_id, _)) => {
                crate::metrics::cache::CACHE_HITS
                    .with_label_values(&["live"])
                    .inc();
                Ok(Some(broadcast_id))
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
        self.pointers
            .insert(curator_id.as_str().to_string(), (broadcast_id.clone(), ttl))
            .await;
        tracing::debug!(
            curator_id = %curator_id,
            broadcast_id = %broadcast_id,
            ttl_seconds = ttl.as_secs(),
            "Live pointer cached"
        );
        Ok(())
    }

    async fn clear_live_pointer(&self, curator_id: &UserId) -> Result<()> {
        self.pointers.invalidate(curator_id.as_str()).await;
        Ok(())
    }

    async fn add_listener(&self, broadcast_id: &BroadcastId, user_id: &UserId) -> Result<()> {
        self.listeners
            .entry(broadcast_id.as_str().to_string())
            .or_default()
            .insert(user_id.as_str().to_string());
        Ok(())
    }

    async fn remove_listener(&self, broadcast_id: &BroadcastId, user_id: &UserId) -> Result<()> {
        if let Some(mut members) = self.listeners.get_mut(broadcast_id.as_str()) {
            members.remove(user_id.as_str());
        }
        Ok(())
    }

    async fn listener_set(&self, broadcast_id: &BroadcastId) -> Result<Vec<UserId>> {
        Ok(self
            .listeners
            .get(broadcast_id.as_str())
            .map(|members| {
                members
                    .iter()
                    .map(|id| UserId::from_string(id.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn clear_listener_set(&self, broadcast_id: &BroadcastId) -> Result<()> {
        self.listeners.remove(broadcast_id.as_str());
        tracing::debug!(broadcast_id = %broadcast_id, "Listener set cleared");
        Ok(())
    }
}
