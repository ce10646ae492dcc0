//! Discovery ranker
//!
//! Filterable, ranked views over the set of live broadcasts, plus the
//! follow graph that feeds them. Every read re-checks the liveness lease
//! so a zombie broadcast disappears from discovery the moment its lease
//! runs out, before the sweep persists the end.

use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{
    cache::FactCache,
    models::{Broadcast, CuratorSummary, CurrentTrack, UserId},
    repository::Store,
    Error, Result,
};

/// Feed selection, parsed from the client-supplied filter string
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedFilter {
    /// Curators the viewer follows
    Following,
    /// Curators followed by the accounts the viewer follows
    SecondDegree,
    /// Everything live, ranked by crowd size
    Trending,
    /// Curators tagged with a genre (case-insensitive)
    Genre(String),
}

impl FromStr for FeedFilter {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "following" => Ok(Self::Following),
            "second_degree" => Ok(Self::SecondDegree),
            "trending" => Ok(Self::Trending),
            _ => {
                if let Some(tag) = s.strip_prefix("genre:") {
                    if tag.is_empty() {
                        return Err(Error::Validation("Genre filter requires a tag".to_string()));
                    }
                    return Ok(Self::Genre(tag.to_string()));
                }
                Err(Error::Validation(format!("Unknown feed filter: {s}")))
            }
        }
    }
}

impl std::fmt::Display for FeedFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Following => write!(f, "following"),
            Self::SecondDegree => write!(f, "second_degree"),
            Self::Trending => write!(f, "trending"),
            Self::Genre(tag) => write!(f, "genre:{tag}"),
        }
    }
}

/// One discovery feed item
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiveBroadcastSummary {
    pub broadcast: Broadcast,
    pub curator: CuratorSummary,
    /// None when the cached fact expired (unknown, not an error)
    pub current_track: Option<CurrentTrack>,
    pub listener_count: i64,
}

#[derive(Clone)]
pub struct DiscoveryService {
    store: Arc<dyn Store>,
    cache: Arc<dyn FactCache>,
    liveness_threshold: chrono::Duration,
    default_limit: i64,
    max_limit: i64,
}

impl DiscoveryService {
    pub const DEFAULT_LIMIT: i64 = 50;
    pub const MAX_LIMIT: i64 = 100;

    #[must_use]
    pub fn new(
        store: Arc<dyn Store>,
        cache: Arc<dyn FactCache>,
        liveness_threshold_secs: u64,
        default_limit: i64,
        max_limit: i64,
    ) -> Self {
        Self {
            store,
            cache,
            liveness_threshold: chrono::Duration::seconds(liveness_threshold_secs as i64),
            default_limit,
            max_limit,
        }
    }

    /// Ranked live broadcasts for a viewer
    ///
    /// `limit` defaults when absent and clamps to the configured maximum;
    /// zero or negative is a validation error. `now` is an argument so
    /// the lease re-check is testable.
    pub async fn feed(
        &self,
        viewer_id: &UserId,
        filter: FeedFilter,
        limit: Option<i64>,
        now: DateTime<Utc>,
    ) -> Result<Vec<LiveBroadcastSummary>> {
        let limit = self.resolve_limit(limit)?;
        let mut candidates = self.live_at(now).await?;

        match &filter {
            FeedFilter::Following => {
                let followed: HashSet<UserId> =
                    self.store.following(viewer_id).await?.into_iter().collect();
                candidates.retain(|b| followed.contains(&b.curator_id));
            }
            FeedFilter::SecondDegree => {
                let second: HashSet<UserId> = self
                    .store
                    .second_degree_curators(viewer_id)
                    .await?
                    .into_iter()
                    .collect();
                candidates.retain(|b| second.contains(&b.curator_id));
            }
            FeedFilter::Trending => {}
            FeedFilter::Genre(_) => {}
        }

        let curators = self.load_curators(&candidates).await?;
        if let FeedFilter::Genre(tag) = &filter {
            candidates.retain(|b| {
                curators
                    .get(&b.curator_id)
                    .is_some_and(|user| user.has_genre(tag))
            });
        }

        if filter == FeedFilter::Trending {
            let curator_ids: Vec<UserId> =
                candidates.iter().map(|b| b.curator_id.clone()).collect();
            let follower_counts = self.store.follower_counts(&curator_ids).await?;
            let count_for = |b: &Broadcast| -> i64 {
                follower_counts.get(&b.curator_id).copied().unwrap_or(0)
            };
            candidates.sort_by(|a, b| {
                b.peak_listeners
                    .cmp(&a.peak_listeners)
                    .then_with(|| count_for(b).cmp(&count_for(a)))
                    .then_with(|| b.started_at.cmp(&a.started_at))
                    .then_with(|| a.id.as_str().cmp(b.id.as_str()))
            });
        } else {
            Self::rank_by_recency(&mut candidates);
        }

        candidates.truncate(limit as usize);
        self.assemble(candidates, &curators).await
    }

    /// Viewer-independent snapshot of everything live, newest first
    ///
    /// Feeds the reconciler's periodic snapshot event.
    pub async fn live_broadcasts(
        &self,
        limit: Option<i64>,
        now: DateTime<Utc>,
    ) -> Result<Vec<LiveBroadcastSummary>> {
        let limit = self.resolve_limit(limit)?;
        let mut candidates = self.live_at(now).await?;
        Self::rank_by_recency(&mut candidates);
        candidates.truncate(limit as usize);

        let curators = self.load_curators(&candidates).await?;
        self.assemble(candidates, &curators).await
    }

    /// Follow a curator; duplicate follows are a no-op
    pub async fn follow(&self, follower_id: &UserId, curator_id: &UserId) -> Result<bool> {
        if follower_id == curator_id {
            return Err(Error::Validation("Cannot follow yourself".to_string()));
        }
        if self.store.get_user(curator_id).await?.is_none() {
            return Err(Error::NotFound("Curator not found".to_string()));
        }
        self.store.insert_follow(follower_id, curator_id).await
    }

    /// Remove a follow edge; missing edges are a no-op
    pub async fn unfollow(&self, follower_id: &UserId, curator_id: &UserId) -> Result<bool> {
        self.store.delete_follow(follower_id, curator_id).await
    }

    pub async fn following(&self, user_id: &UserId) -> Result<Vec<UserId>> {
        self.store.following(user_id).await
    }

    pub async fn followers(&self, curator_id: &UserId) -> Result<Vec<UserId>> {
        self.store.followers(curator_id).await
    }

    pub async fn follower_count(&self, curator_id: &UserId) -> Result<i64> {
        self.store.follower_count(curator_id).await
    }

    fn resolve_limit(&self, limit: Option<i64>) -> Result<i64> {
        match limit {
            None => Ok(self.default_limit),
            Some(n) if n <= 0 => Err(Error::Validation("Limit must be positive".to_string())),
            Some(n) => Ok(n.min(self.max_limit)),
        }
    }

    /// Live broadcasts whose lease is still valid at `now`
    async fn live_at(&self, now: DateTime<Utc>) -> Result<Vec<Broadcast>> {
        let mut live = self.store.list_live_broadcasts().await?;
        live.retain(|b| b.lease_valid_at(now, self.liveness_threshold));
        Ok(live)
    }

    fn rank_by_recency(candidates: &mut [Broadcast]) {
        candidates.sort_by(|a, b| {
            b.started_at
                .cmp(&a.started_at)
                .then_with(|| a.id.as_str().cmp(b.id.as_str()))
        });
    }

    async fn load_curators(
        &self,
        candidates: &[Broadcast],
    ) -> Result<HashMap<UserId, crate::models::User>> {
        let ids: Vec<UserId> = candidates.iter().map(|b| b.curator_id.clone()).collect();
        let users = self.store.get_users(&ids).await?;
        Ok(users.into_iter().map(|u| (u.id.clone(), u)).collect())
    }

    async fn assemble(
        &self,
        candidates: Vec<Broadcast>,
        curators: &HashMap<UserId, crate::models::User>,
    ) -> Result<Vec<LiveBroadcastSummary>> {
        let mut summaries = Vec::with_capacity(candidates.len());
        for broadcast in candidates {
            let Some(user) = curators.get(&broadcast.curator_id) else {
                warn!(
                    broadcast_id = %broadcast.id,
                    curator_id = %broadcast.curator_id,
                    "Live broadcast references an unknown curator, skipping"
                );
                continue;
            };

            // Track lookup is best-effort: an expired or unreachable fact
            // degrades the summary, never the feed
            let current_track = match self.cache.current_track(&broadcast.curator_id).await {
                Ok(track) => track,
                Err(e) => {
                    warn!(curator_id = %broadcast.curator_id, "Track lookup failed: {e}");
                    None
                }
            };
            let listener_count = self.store.count_listeners(&broadcast.id).await?;

            summaries.push(LiveBroadcastSummary {
                curator: CuratorSummary::from(user),
                current_track,
                listener_count,
                broadcast,
            });
        }
        Ok(summaries)
    }
}

impl std::fmt::Debug for DiscoveryService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscoveryService")
            .field("default_limit", &self.default_limit)
            .field("max_limit", &self.max_limit)
            .finish()
    }
}
