//! Broadcast lifecycle and listener presence
//!
//! Owns the live/ended state machine: starting a broadcast, keeping it
//! alive through heartbeats, listener join/leave membership, and the
//! liveness sweep that ends broadcasts whose curator went silent. All
//! state transitions happen under a per-key lock so one curator or
//! broadcast never blocks another.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    cache::FactCache,
    models::{Broadcast, BroadcastId, BroadcastStatus, EndReason, ListenerPresence, UserId},
    repository::Store,
    service::{EventPublisher, KeyLocks, PushNotifier},
    Error, Result,
};

/// Presence engine
///
/// Liveness rule: a broadcast counts as live only while
/// `status == Live` and the last heartbeat is within the threshold.
/// A broadcast past the threshold is a zombie; reads treat it as ended
/// even before the sweep persists that fact.
#[derive(Clone)]
pub struct PresenceService {
    store: Arc<dyn Store>,
    cache: Arc<dyn FactCache>,
    locks: KeyLocks,
    liveness_threshold: chrono::Duration,
    pointer_ttl: Duration,
    event_publisher: Option<Arc<dyn EventPublisher>>,
    push_notifier: Option<Arc<dyn PushNotifier>>,
}

impl PresenceService {
    pub const DEFAULT_LIVENESS_THRESHOLD_SECS: u64 = 300;
    pub const DEFAULT_POINTER_TTL_SECS: u64 = 330;

    #[must_use]
    pub fn new(
        store: Arc<dyn Store>,
        cache: Arc<dyn FactCache>,
        liveness_threshold_secs: u64,
        pointer_ttl_secs: u64,
    ) -> Self {
        Self {
            store,
            cache,
            locks: KeyLocks::new(),
            liveness_threshold: chrono::Duration::seconds(liveness_threshold_secs as i64),
            pointer_ttl: Duration::from_secs(pointer_ttl_secs),
            event_publisher: None,
            push_notifier: None,
        }
    }

    /// Wire the fan-out publisher (two-phase: services are constructed
    /// before the transport exists)
    pub fn set_event_publisher(&mut self, publisher: Arc<dyn EventPublisher>) {
        self.event_publisher = Some(publisher);
    }

    /// Wire follower push notifications
    pub fn set_push_notifier(&mut self, notifier: Arc<dyn PushNotifier>) {
        self.push_notifier = Some(notifier);
    }

    #[must_use]
    pub fn liveness_threshold(&self) -> chrono::Duration {
        self.liveness_threshold
    }

    /// Start broadcasting what the curator is currently playing
    ///
    /// Requires a fresh `CurrentTrack` in the fact cache; a curator with
    /// nothing playing has nothing to broadcast. At most one live
    /// broadcast per curator, checked against the cached pointer first
    /// and the durable store second (the partial unique index catches
    /// anything that slips between the two).
    pub async fn start(&self, curator_id: &UserId, caption: String) -> Result<Broadcast> {
        if caption.chars().count() > Broadcast::MAX_CAPTION_CHARS {
            return Err(Error::Validation(format!(
                "Caption must be at most {} characters",
                Broadcast::MAX_CAPTION_CHARS
            )));
        }

        let _guard = self.locks.acquire(&format!("curator:{curator_id}")).await;

        let Some(track) = self.cache.current_track(curator_id).await? else {
            return Err(Error::NoActiveTrack);
        };

        // Fast path via the cached pointer, then the durable truth
        if self.cache.live_pointer(curator_id).await?.is_some() {
            return Err(Error::AlreadyLive);
        }
        if self
            .store
            .live_broadcast_for_curator(curator_id)
            .await?
            .is_some()
        {
            return Err(Error::AlreadyLive);
        }

        let broadcast = self
            .store
            .insert_broadcast(&Broadcast::new(curator_id.clone(), caption))
            .await?;

        if let Err(e) = self
            .cache
            .put_live_pointer(curator_id, &broadcast.id, self.pointer_ttl)
            .await
        {
            warn!(
                curator_id = %curator_id,
                broadcast_id = %broadcast.id,
                "Failed to cache live pointer: {e}"
            );
        }

        if let Some(ref publisher) = self.event_publisher {
            publisher.broadcast_started(&broadcast, Some(&track));
        }
        if let Some(ref notifier) = self.push_notifier {
            notifier.broadcast_started(curator_id, &broadcast.id, &broadcast.caption);
        }

        crate::metrics::presence::BROADCASTS_STARTED.inc();
        info!(
            broadcast_id = %broadcast.id,
            curator_id = %curator_id,
            track_id = %track.track_id,
            "Broadcast started"
        );

        Ok(broadcast)
    }

    /// End a broadcast at the curator's request
    pub async fn stop(&self, curator_id: &UserId, broadcast_id: &BroadcastId) -> Result<Broadcast> {
        let _guard = self
            .locks
            .acquire(&format!("broadcast:{broadcast_id}"))
            .await;

        let Some(broadcast) = self.store.get_broadcast(broadcast_id).await? else {
            return Err(Error::NotLive);
        };
        if broadcast.curator_id != *curator_id {
            return Err(Error::NotOwner);
        }
        if broadcast.is_ended() {
            return Err(Error::NotLive);
        }

        let ended_at = Utc::now();
        if !self
            .end_broadcast_inner(&broadcast, EndReason::Stopped, ended_at)
            .await?
        {
            // Another caller won the transition race
            return Err(Error::NotLive);
        }

        let mut ended = broadcast;
        ended.status = BroadcastStatus::Ended;
        ended.ended_at = Some(ended_at);
        Ok(ended)
    }

    /// Renew the broadcast lease
    ///
    /// `last_heartbeat_at` only ever moves forward; a delayed heartbeat
    /// arriving after a newer one is absorbed.
    pub async fn heartbeat(&self, curator_id: &UserId, broadcast_id: &BroadcastId) -> Result<()> {
        let _guard = self
            .locks
            .acquire(&format!("broadcast:{broadcast_id}"))
            .await;

        let Some(broadcast) = self.store.get_broadcast(broadcast_id).await? else {
            return Err(Error::NotLive);
        };
        if broadcast.curator_id != *curator_id {
            return Err(Error::NotOwner);
        }
        if !self.store.touch_heartbeat(broadcast_id, Utc::now()).await? {
            return Err(Error::NotLive);
        }

        if let Err(e) = self
            .cache
            .put_live_pointer(curator_id, broadcast_id, self.pointer_ttl)
            .await
        {
            warn!(curator_id = %curator_id, "Failed to refresh live pointer: {e}");
        }

        debug!(broadcast_id = %broadcast_id, "Heartbeat applied");
        Ok(())
    }

    /// Join a live broadcast as a listener
    ///
    /// Idempotent: re-joining changes nothing and emits nothing. Returns
    /// the current listener count.
    pub async fn join(&self, broadcast_id: &BroadcastId, user_id: &UserId) -> Result<i64> {
        let _guard = self
            .locks
            .acquire(&format!("broadcast:{broadcast_id}"))
            .await;

        let Some(broadcast) = self.store.get_broadcast(broadcast_id).await? else {
            return Err(Error::BroadcastNotFound);
        };
        if !broadcast.is_live_at(Utc::now(), self.liveness_threshold) {
            return Err(Error::BroadcastNotLive);
        }

        let newly_joined = self.store.upsert_listener(broadcast_id, user_id).await?;
        let count = self.store.count_listeners(broadcast_id).await?;

        if newly_joined {
            self.store
                .raise_peak_listeners(broadcast_id, i32::try_from(count).unwrap_or(i32::MAX))
                .await?;

            if let Err(e) = self.cache.add_listener(broadcast_id, user_id).await {
                warn!(broadcast_id = %broadcast_id, "Failed to cache listener: {e}");
            }
            if let Some(ref publisher) = self.event_publisher {
                publisher.listener_joined(broadcast_id, user_id, count);
            }

            crate::metrics::presence::LISTENER_JOINS.inc();
            debug!(
                broadcast_id = %broadcast_id,
                user_id = %user_id,
                listener_count = count,
                "Listener joined"
            );
        }

        Ok(count)
    }

    /// Leave a broadcast
    ///
    /// Removing a non-member or leaving an ended broadcast is a no-op
    /// success. Returns the remaining listener count.
    pub async fn leave(&self, broadcast_id: &BroadcastId, user_id: &UserId) -> Result<i64> {
        let _guard = self
            .locks
            .acquire(&format!("broadcast:{broadcast_id}"))
            .await;

        let removed = self.store.remove_listener(broadcast_id, user_id).await?;
        let count = self.store.count_listeners(broadcast_id).await?;

        if removed {
            if let Err(e) = self.cache.remove_listener(broadcast_id, user_id).await {
                warn!(broadcast_id = %broadcast_id, "Failed to uncache listener: {e}");
            }
            if let Some(ref publisher) = self.event_publisher {
                publisher.listener_left(broadcast_id, user_id, count);
            }

            crate::metrics::presence::LISTENER_LEAVES.inc();
            debug!(
                broadcast_id = %broadcast_id,
                user_id = %user_id,
                listener_count = count,
                "Listener left"
            );
        }

        Ok(count)
    }

    /// Durable listener membership, oldest join first
    pub async fn active_listeners(
        &self,
        broadcast_id: &BroadcastId,
    ) -> Result<Vec<ListenerPresence>> {
        if self.store.get_broadcast(broadcast_id).await?.is_none() {
            return Err(Error::BroadcastNotFound);
        }
        self.store.list_listeners(broadcast_id).await
    }

    pub async fn get_broadcast(&self, broadcast_id: &BroadcastId) -> Result<Broadcast> {
        self.store
            .get_broadcast(broadcast_id)
            .await?
            .ok_or(Error::BroadcastNotFound)
    }

    /// End every broadcast whose lease expired at `now`
    ///
    /// Each expired broadcast is handled under its own lock; one failure
    /// never aborts the rest. Returns how many this pass ended. `now` is
    /// an argument so tests control the clock.
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<u64> {
        let cutoff = now - self.liveness_threshold;
        let expired = self.store.list_lease_expired(cutoff).await?;

        let mut ended = 0u64;
        for candidate in expired {
            let _guard = self
                .locks
                .acquire(&format!("broadcast:{}", candidate.id))
                .await;

            // Re-read under the lock: a heartbeat or stop may have won
            let current = match self.store.get_broadcast(&candidate.id).await {
                Ok(Some(b)) => b,
                Ok(None) => continue,
                Err(e) => {
                    error!(broadcast_id = %candidate.id, "Sweep read failed: {e}");
                    continue;
                }
            };
            if current.is_ended() || current.lease_valid_at(now, self.liveness_threshold) {
                continue;
            }

            match self
                .end_broadcast_inner(&current, EndReason::LivenessExpired, now)
                .await
            {
                Ok(true) => ended += 1,
                Ok(false) => {}
                Err(e) => {
                    error!(broadcast_id = %current.id, "Sweep failed to end broadcast: {e}");
                }
            }
        }

        crate::metrics::presence::SWEEP_PASSES.inc();
        crate::metrics::presence::SWEPT_BROADCASTS.inc_by(ended);
        if ended > 0 {
            info!(ended, "Liveness sweep ended expired broadcasts");
        } else {
            debug!("Liveness sweep found nothing to end");
        }

        Ok(ended)
    }

    /// Run the liveness sweep on a fixed interval until shutdown
    pub fn spawn_sweeper(
        &self,
        interval: Duration,
        shutdown: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let service = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    () = shutdown.cancelled() => {
                        info!("Liveness sweeper stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = service.sweep(Utc::now()).await {
                            error!("Liveness sweep pass failed: {e}");
                        }
                    }
                }
            }
        })
    }

    /// Shared end path for stop and sweep
    ///
    /// The store transition is a compare-and-set; only the caller that
    /// actually flipped Live to Ended tears down caches and emits the
    /// ended event.
    async fn end_broadcast_inner(
        &self,
        broadcast: &Broadcast,
        reason: EndReason,
        ended_at: DateTime<Utc>,
    ) -> Result<bool> {
        if !self.store.end_broadcast(&broadcast.id, ended_at).await? {
            return Ok(false);
        }

        if let Err(e) = self.cache.clear_listener_set(&broadcast.id).await {
            warn!(broadcast_id = %broadcast.id, "Failed to clear cached listener set: {e}");
        }
        if let Err(e) = self.cache.clear_live_pointer(&broadcast.curator_id).await {
            warn!(curator_id = %broadcast.curator_id, "Failed to clear live pointer: {e}");
        }
        if let Err(e) = self.cache.clear_current_track(&broadcast.curator_id).await {
            warn!(curator_id = %broadcast.curator_id, "Failed to clear current track: {e}");
        }

        let listeners_cleared = self.store.clear_listeners(&broadcast.id).await?;

        if let Some(ref publisher) = self.event_publisher {
            let mut ended = broadcast.clone();
            ended.status = BroadcastStatus::Ended;
            ended.ended_at = Some(ended_at);
            publisher.broadcast_ended(&ended, reason);
        }

        crate::metrics::presence::BROADCASTS_ENDED
            .with_label_values(&[reason.as_str()])
            .inc();
        info!(
            broadcast_id = %broadcast.id,
            curator_id = %broadcast.curator_id,
            reason = %reason,
            listeners_cleared,
            "Broadcast ended"
        );

        Ok(true)
    }
}

impl std::fmt::Debug for PresenceService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PresenceService")
            .field("liveness_threshold_secs", &self.liveness_threshold.num_seconds())
            .finish()
    }
}
