use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use governor::clock::{Clock, DefaultClock};
use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter as KeyedGcra};
use nonzero_ext::nonzero;
use redis::AsyncCommands;
use thiserror::Error;
use tracing::warn;

/// Rejection carrying the caller-facing retry hint
#[derive(Error, Debug)]
pub enum RateLimitError {
    #[error("Rate limit exceeded. Try again in {retry_after_seconds}s")]
    RateLimitExceeded { retry_after_seconds: u64 },
}

impl From<RateLimitError> for crate::Error {
    fn from(err: RateLimitError) -> Self {
        match err {
            RateLimitError::RateLimitExceeded {
                retry_after_seconds,
            } => Self::RateLimited {
                retry_after_seconds,
            },
        }
    }
}

/// Sliding-window log evaluated atomically inside Redis.
///
/// Expired entries are dropped, then the request is admitted and recorded
/// only while the key is under its limit. A rejected attempt leaves no
/// entry behind: a client that keeps retrying recovers one window after
/// its last *accepted* message, not its last attempt.
///
/// KEYS[1] window key. ARGV: [1] cutoff ms, [2] now ms, [3] limit,
/// [4] key TTL secs. Reply: {1, 0} admitted, {0, retry_ms} rejected.
const WINDOW_SCRIPT: &str = r"
redis.call('ZREMRANGEBYSCORE', KEYS[1], '-inf', ARGV[1])
local used = redis.call('ZCARD', KEYS[1])
if used < tonumber(ARGV[3]) then
    redis.call('ZADD', KEYS[1], ARGV[2], ARGV[2])
    redis.call('EXPIRE', KEYS[1], ARGV[4])
    return {1, 0}
end
local oldest = redis.call('ZRANGE', KEYS[1], 0, 0, 'WITHSCORES')
local retry_ms = 0
if oldest[2] then
    retry_ms = tonumber(oldest[2]) - tonumber(ARGV[1])
end
return {0, retry_ms}
";

/// Keyed rate limiter: Redis sliding window when configured, in-process
/// GCRA otherwise.
///
/// The Redis window is shared across replicas and exact. Without Redis,
/// `governor` enforces the same quota per process. A Redis failure is
/// downgraded to the local check with a warning, so a cache outage
/// loosens limiting instead of blocking sends.
#[derive(Clone)]
pub struct RateLimiter {
    redis: Option<redis::aio::ConnectionManager>,
    key_prefix: String,
    // governor pins the quota at construction, so each distinct
    // (limit, window) pair gets its own keyed limiter
    cells: Arc<DashMap<(u32, u64), Arc<DefaultKeyedRateLimiter<String>>>>,
}

impl RateLimiter {
    /// Create a limiter, distributed when `redis` is provided.
    pub fn new(redis: Option<redis::aio::ConnectionManager>, key_prefix: String) -> Self {
        if redis.is_none() {
            warn!(
                "rate limiting is per-instance only (governor); Redis not configured, \
                 limits are not shared across replicas"
            );
        }
        Self {
            redis,
            key_prefix,
            cells: Arc::new(DashMap::new()),
        }
    }

    /// Limiter with no Redis backend; local GCRA only.
    #[must_use]
    pub fn in_memory_only(key_prefix: String) -> Self {
        Self {
            redis: None,
            key_prefix,
            cells: Arc::new(DashMap::new()),
        }
    }

    /// Admit or reject one request for `key`, allowing `max_requests`
    /// per sliding `window_seconds`.
    ///
    /// Keys scope the limit; the chat gate uses
    /// `chat:rate:{broadcast_id}:{author_id}`.
    pub async fn check_rate_limit(
        &self,
        key: &str,
        max_requests: u32,
        window_seconds: u64,
    ) -> std::result::Result<(), RateLimitError> {
        let scoped = format!("{}{}", self.key_prefix, key);

        let Some(conn) = &self.redis else {
            return self.local_check(scoped, max_requests, window_seconds);
        };

        match Self::window_check(conn.clone(), &scoped, max_requests, window_seconds).await {
            Ok(verdict) => verdict,
            Err(e) => {
                // Degrade to the per-instance limiter rather than block sends
                warn!(key = %scoped, error = %e, "rate limit backend unreachable, enforcing locally");
                self.local_check(scoped, max_requests, window_seconds)
            }
        }
    }

    async fn window_check(
        mut conn: redis::aio::ConnectionManager,
        scoped: &str,
        max_requests: u32,
        window_seconds: u64,
    ) -> redis::RedisResult<std::result::Result<(), RateLimitError>> {
        let now = unix_millis();
        let cutoff = now.saturating_sub(window_seconds.saturating_mul(1000));

        let (admitted, retry_ms): (i64, u64) = redis::Script::new(WINDOW_SCRIPT)
            .key(scoped)
            .arg(cutoff)
            .arg(now)
            .arg(max_requests)
            .arg(window_seconds.saturating_add(1))
            .invoke_async(&mut conn)
            .await?;

        if admitted == 1 {
            return Ok(Ok(()));
        }
        Ok(Err(RateLimitError::RateLimitExceeded {
            retry_after_seconds: (retry_ms / 1000).max(1),
        }))
    }

    fn local_check(
        &self,
        scoped: String,
        max_requests: u32,
        window_seconds: u64,
    ) -> std::result::Result<(), RateLimitError> {
        let cell = Arc::clone(
            self.cells
                .entry((max_requests, window_seconds))
                .or_insert_with(|| Arc::new(KeyedGcra::keyed(quota_for(max_requests, window_seconds))))
                .value(),
        );

        cell.check_key(&scoped).map_err(|not_until| {
            let wait = not_until.wait_time_from(DefaultClock::default().now());
            RateLimitError::RateLimitExceeded {
                retry_after_seconds: wait.as_secs().max(1),
            }
        })
    }

    /// Clear the window for a key. The local GCRA cells cannot be reset
    /// individually; they decay on their own.
    pub async fn reset(&self, key: &str) -> crate::Result<()> {
        if let Some(conn) = &self.redis {
            let mut conn = conn.clone();
            let scoped = format!("{}{}", self.key_prefix, key);
            let _: () = conn
                .del(&scoped)
                .await
                .map_err(|e| crate::Error::Cache(format!("rate limit reset failed: {e}")))?;
        }
        Ok(())
    }
}

/// GCRA quota equivalent to `max_requests` per `window_seconds`: a full
/// burst of `max_requests`, replenished one cell per `window / max`.
fn quota_for(max_requests: u32, window_seconds: u64) -> Quota {
    let burst = NonZeroU32::new(max_requests).unwrap_or(nonzero!(1u32));
    let replenish = Duration::from_secs(window_seconds.max(1))
        .checked_div(burst.get())
        .filter(|d| !d.is_zero());
    match replenish.and_then(Quota::with_period) {
        Some(quota) => quota.allow_burst(burst),
        // window / burst truncated to zero; one cell per second is the
        // tightest quota governor can express here
        None => Quota::per_second(burst),
    }
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("redis_enabled", &self.redis.is_some())
            .field("key_prefix", &self.key_prefix)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quota_for_survives_extreme_inputs() {
        // Must not panic for any input combination
        quota_for(0, 0);
        quota_for(1, 3);
        quota_for(u32::MAX, 1);
    }

    #[tokio::test]
    async fn test_second_message_inside_window_is_limited() {
        let limiter = RateLimiter::in_memory_only("test:".to_string());

        let key = "chat:rate:bcast1:alice";
        limiter.check_rate_limit(key, 1, 3).await.unwrap();

        let Err(RateLimitError::RateLimitExceeded {
            retry_after_seconds,
        }) = limiter.check_rate_limit(key, 1, 3).await
        else {
            panic!("second message within the window must be limited");
        };
        assert!(retry_after_seconds >= 1);
    }

    #[tokio::test]
    async fn test_same_author_different_broadcasts_are_independent() {
        let limiter = RateLimiter::in_memory_only("test:".to_string());

        limiter
            .check_rate_limit("chat:rate:bcast1:alice", 1, 3)
            .await
            .unwrap();
        assert!(limiter
            .check_rate_limit("chat:rate:bcast1:alice", 1, 3)
            .await
            .is_err());

        // Same author, different broadcast: independent window
        assert!(limiter
            .check_rate_limit("chat:rate:bcast2:alice", 1, 3)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_different_authors_same_broadcast_are_independent() {
        let limiter = RateLimiter::in_memory_only("test:".to_string());

        limiter
            .check_rate_limit("chat:rate:bcast1:alice", 1, 3)
            .await
            .unwrap();
        assert!(limiter
            .check_rate_limit("chat:rate:bcast1:alice", 1, 3)
            .await
            .is_err());

        assert!(limiter
            .check_rate_limit("chat:rate:bcast1:bob", 1, 3)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_burst_up_to_limit_then_rejected() {
        let limiter = RateLimiter::in_memory_only("test:".to_string());

        let key = "chat:rate:bcast_burst:carol";
        for i in 0..5 {
            limiter
                .check_rate_limit(key, 5, 1)
                .await
                .unwrap_or_else(|_| panic!("message {i} should be admitted"));
        }

        assert!(matches!(
            limiter.check_rate_limit(key, 5, 1).await,
            Err(RateLimitError::RateLimitExceeded { .. })
        ));
    }

    #[tokio::test]
    #[ignore = "Requires Redis server"]
    async fn test_redis_window_admits_again_after_expiry() {
        let client = redis::Client::open("redis://127.0.0.1:6379").unwrap();
        let conn = redis::aio::ConnectionManager::new(client).await.unwrap();
        let limiter = RateLimiter::new(Some(conn), "test:".to_string());

        let key = "chat:rate:bcast_redis:alice";
        limiter.reset(key).await.unwrap();

        limiter.check_rate_limit(key, 1, 2).await.unwrap();
        let rejected = limiter.check_rate_limit(key, 1, 2).await;
        let Err(RateLimitError::RateLimitExceeded {
            retry_after_seconds,
        }) = rejected
        else {
            panic!("second send inside the window must be rejected");
        };
        assert!((1..=2).contains(&retry_after_seconds));

        tokio::time::sleep(tokio::time::Duration::from_millis(2100)).await;
        limiter.check_rate_limit(key, 1, 2).await.unwrap();
    }

    #[tokio::test]
    #[ignore = "Requires Redis server"]
    async fn test_redis_rejections_do_not_extend_the_window() {
        let client = redis::Client::open("redis://127.0.0.1:6379").unwrap();
        let conn = redis::aio::ConnectionManager::new(client).await.unwrap();
        let limiter = RateLimiter::new(Some(conn), "test:".to_string());

        let key = "chat:rate:bcast_window:alice";
        limiter.reset(key).await.unwrap();

        limiter.check_rate_limit(key, 1, 1).await.unwrap();

        // Hammer the gate mid-window; none of these may push the
        // recovery point past the first accepted send
        for _ in 0..3 {
            assert!(limiter.check_rate_limit(key, 1, 1).await.is_err());
            tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
        }

        tokio::time::sleep(tokio::time::Duration::from_millis(800)).await;
        limiter.check_rate_limit(key, 1, 1).await.unwrap();
    }
}
