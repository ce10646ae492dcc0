//! Service initialization and dependency injection

use std::sync::Arc;

use sqlx::PgPool;
use tracing::{info, warn};

use crate::{
    cache::{FactCache, MemoryFactCache, RedisFactCache},
    platform::StaticPlatform,
    repository::{MemoryStore, PgStore, Store},
    service::{ChatService, DiscoveryService, NowPlayingService, PresenceService, RateLimiter},
    Config,
};

/// Container for all initialized services
#[derive(Clone)]
pub struct Services {
    pub store: Arc<dyn Store>,
    pub cache: Arc<dyn FactCache>,
    /// Scripted now-playing source; a real platform client replaces this
    pub platform: Arc<StaticPlatform>,
    pub rate_limiter: Arc<RateLimiter>,
    pub presence: PresenceService,
    pub now_playing: NowPlayingService,
    pub discovery: DiscoveryService,
    pub chat: ChatService,
}

impl Services {
    /// Wire one publisher into every emitting service
    ///
    /// Must run before the services are cloned into background tasks.
    pub fn set_event_publisher(&mut self, publisher: Arc<dyn crate::service::EventPublisher>) {
        self.presence.set_event_publisher(publisher.clone());
        self.chat.set_event_publisher(publisher);
    }
}

/// Initialize the full service set
///
/// `pool` is Some only when the durable store runs on PostgreSQL;
/// without it everything lives in the in-memory store. Redis, when
/// enabled, backs both the fact cache and the rate limiter through one
/// shared connection.
pub async fn init_services(pool: Option<PgPool>, config: &Config) -> Result<Services, anyhow::Error> {
    info!("Initializing services...");

    let store: Arc<dyn Store> = match pool {
        Some(pool) => Arc::new(PgStore::new(pool)),
        None => {
            warn!("Database disabled, state will not survive a restart");
            Arc::new(MemoryStore::new())
        }
    };

    let redis_conn = if config.redis.enabled {
        let client = redis::Client::open(config.redis_url())?;
        let conn = redis::aio::ConnectionManager::new(client).await?;
        info!("Redis connected");
        Some(conn)
    } else {
        None
    };

    let cache: Arc<dyn FactCache> = match redis_conn.clone() {
        Some(conn) => Arc::new(RedisFactCache::new(conn, config.redis.key_prefix.clone())),
        None => Arc::new(MemoryFactCache::default()),
    };

    let rate_limiter = Arc::new(RateLimiter::new(
        redis_conn,
        config.redis.key_prefix.clone(),
    ));

    let platform = Arc::new(StaticPlatform::new());

    let presence = PresenceService::new(
        store.clone(),
        cache.clone(),
        config.presence.liveness_threshold_seconds,
        config.presence.pointer_ttl_seconds,
    );
    info!("PresenceService initialized");

    let now_playing = NowPlayingService::new(
        platform.clone(),
        store.clone(),
        cache.clone(),
        config.tracks.ttl_seconds,
        config.tracks.poll_interval_seconds,
        config.presence.liveness_threshold_seconds,
    );
    info!("NowPlayingService initialized");

    let discovery = DiscoveryService::new(
        store.clone(),
        cache.clone(),
        config.presence.liveness_threshold_seconds,
        config.discovery.default_limit,
        config.discovery.max_limit,
    );
    info!("DiscoveryService initialized");

    let chat = ChatService::new(
        store.clone(),
        rate_limiter.clone(),
        config.presence.liveness_threshold_seconds,
        config.chat.rate_max_messages,
        config.chat.rate_window_seconds,
        config.chat.max_content_chars,
    );
    info!(
        rate_max = config.chat.rate_max_messages,
        window_seconds = config.chat.rate_window_seconds,
        "ChatService initialized"
    );

    Ok(Services {
        store,
        cache,
        platform,
        rate_limiter,
        presence,
        now_playing,
        discovery,
        chat,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_init_services_without_backends() {
        let config = Config::default();
        let services = init_services(None, &config).await.unwrap();

        let curator = services
            .store
            .insert_user(&crate::test_helpers::UserFixture::new().build())
            .await
            .unwrap();
        assert!(services
            .store
            .get_user(&curator.id)
            .await
            .unwrap()
            .is_some());
    }
}
