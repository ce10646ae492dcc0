//! Now-playing synchronizer
//!
//! Polls the music platform for every curator with a live broadcast and
//! refreshes the cached `CurrentTrack`. The cache entry's TTL is the
//! staleness bound: when the platform stops answering, the old fact ages
//! out instead of flapping to "unknown" on the first failed poll.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    cache::FactCache,
    platform::MusicPlatform,
    repository::Store,
    Result,
};

#[derive(Clone)]
pub struct NowPlayingService {
    platform: Arc<dyn MusicPlatform>,
    store: Arc<dyn Store>,
    cache: Arc<dyn FactCache>,
    track_ttl: Duration,
    poll_interval: Duration,
    liveness_threshold: chrono::Duration,
}

impl NowPlayingService {
    pub const DEFAULT_TRACK_TTL_SECS: u64 = 120;
    pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 15;

    #[must_use]
    pub fn new(
        platform: Arc<dyn MusicPlatform>,
        store: Arc<dyn Store>,
        cache: Arc<dyn FactCache>,
        track_ttl_secs: u64,
        poll_interval_secs: u64,
        liveness_threshold_secs: u64,
    ) -> Self {
        Self {
            platform,
            store,
            cache,
            track_ttl: Duration::from_secs(track_ttl_secs),
            poll_interval: Duration::from_secs(poll_interval_secs),
            liveness_threshold: chrono::Duration::seconds(liveness_threshold_secs as i64),
        }
    }

    /// Refresh the cached track for every curator live at `now`
    ///
    /// One platform failure never aborts the pass; the affected curator
    /// keeps their previous cached track until it expires. Returns the
    /// number of entries refreshed.
    pub async fn refresh_once(&self, now: DateTime<Utc>) -> Result<usize> {
        let live = self.store.list_live_broadcasts().await?;
        let mut refreshed = 0;

        for broadcast in live {
            if !broadcast.lease_valid_at(now, self.liveness_threshold) {
                // Zombie: the sweep will end it, nothing to refresh
                continue;
            }

            match self.platform.currently_playing(&broadcast.curator_id).await {
                Ok(Some(mut track)) => {
                    track.observed_at = now;
                    match self
                        .cache
                        .put_current_track(&broadcast.curator_id, &track, self.track_ttl)
                        .await
                    {
                        Ok(()) => {
                            refreshed += 1;
                            crate::metrics::sync::TRACK_REFRESHES.inc();
                        }
                        Err(e) => {
                            warn!(
                                curator_id = %broadcast.curator_id,
                                "Failed to cache refreshed track: {e}"
                            );
                            crate::metrics::sync::TRACK_REFRESH_FAILURES.inc();
                        }
                    }
                }
                Ok(None) => {
                    debug!(
                        curator_id = %broadcast.curator_id,
                        platform = self.platform.name(),
                        "Nothing playing, keeping previous track until it expires"
                    );
                }
                Err(e) => {
                    warn!(
                        curator_id = %broadcast.curator_id,
                        platform = self.platform.name(),
                        "Platform lookup failed: {e}"
                    );
                    crate::metrics::sync::TRACK_REFRESH_FAILURES.inc();
                }
            }
        }

        debug!(refreshed, "Now-playing refresh pass complete");
        Ok(refreshed)
    }

    /// Poll the platform on the configured interval until shutdown
    pub fn spawn(&self, shutdown: CancellationToken) -> tokio::task::JoinHandle<()> {
        let service = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(service.poll_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    () = shutdown.cancelled() => {
                        info!("Now-playing synchronizer stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = service.refresh_once(Utc::now()).await {
                            error!("Now-playing refresh pass failed: {e}");
                        }
                    }
                }
            }
        })
    }
}

impl std::fmt::Debug for NowPlayingService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NowPlayingService")
            .field("platform", &self.platform.name())
            .field("track_ttl_secs", &self.track_ttl.as_secs())
            .finish()
    }
}
