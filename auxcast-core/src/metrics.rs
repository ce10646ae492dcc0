//! Prometheus metrics for production monitoring
//!
//! Every counter here is incremented by a real code path; `gather_metrics`
//! renders the registry for exposition.

use prometheus::{Encoder, Registry, TextEncoder};

/// Global metrics registry
pub static REGISTRY: std::sync::LazyLock<Registry> = std::sync::LazyLock::new(Registry::new);

/// Broadcast lifecycle and listener presence
pub mod presence {
    use prometheus::{
        register_int_counter_vec_with_registry, register_int_counter_with_registry, IntCounter,
        IntCounterVec,
    };

    use super::REGISTRY;

    pub static BROADCASTS_STARTED: std::sync::LazyLock<IntCounter> =
        std::sync::LazyLock::new(|| {
            register_int_counter_with_registry!(
                "broadcasts_started_total",
                "Total number of broadcasts started",
                REGISTRY.clone()
            )
            .expect("Failed to register BROADCASTS_STARTED")
        });

    pub static BROADCASTS_ENDED: std::sync::LazyLock<IntCounterVec> =
        std::sync::LazyLock::new(|| {
            register_int_counter_vec_with_registry!(
                "broadcasts_ended_total",
                "Total number of broadcasts ended",
                &["reason"],
                REGISTRY.clone()
            )
            .expect("Failed to register BROADCASTS_ENDED")
        });

    pub static LISTENER_JOINS: std::sync::LazyLock<IntCounter> = std::sync::LazyLock::new(|| {
        register_int_counter_with_registry!(
            "listener_joins_total",
            "Total number of new listener memberships",
            REGISTRY.clone()
        )
        .expect("Failed to register LISTENER_JOINS")
    });

    pub static LISTENER_LEAVES: std::sync::LazyLock<IntCounter> = std::sync::LazyLock::new(|| {
        register_int_counter_with_registry!(
            "listener_leaves_total",
            "Total number of listener memberships removed",
            REGISTRY.clone()
        )
        .expect("Failed to register LISTENER_LEAVES")
    });

    pub static SWEEP_PASSES: std::sync::LazyLock<IntCounter> = std::sync::LazyLock::new(|| {
        register_int_counter_with_registry!(
            "presence_sweep_passes_total",
            "Total number of liveness sweep passes",
            REGISTRY.clone()
        )
        .expect("Failed to register SWEEP_PASSES")
    });

    pub static SWEPT_BROADCASTS: std::sync::LazyLock<IntCounter> = std::sync::LazyLock::new(|| {
        register_int_counter_with_registry!(
            "presence_sweep_ended_total",
            "Total number of broadcasts ended by the liveness sweep",
            REGISTRY.clone()
        )
        .expect("Failed to register SWEPT_BROADCASTS")
    });
}

/// Chat gateway
pub mod chat {
    use prometheus::{
        register_int_counter_vec_with_registry, register_int_counter_with_registry, IntCounter,
        IntCounterVec,
    };

    use super::REGISTRY;

    pub static MESSAGES_SENT: std::sync::LazyLock<IntCounter> = std::sync::LazyLock::new(|| {
        register_int_counter_with_registry!(
            "chat_messages_sent_total",
            "Total number of chat messages persisted",
            REGISTRY.clone()
        )
        .expect("Failed to register MESSAGES_SENT")
    });

    pub static MESSAGES_REJECTED: std::sync::LazyLock<IntCounterVec> =
        std::sync::LazyLock::new(|| {
            register_int_counter_vec_with_registry!(
                "chat_messages_rejected_total",
                "Total number of chat messages rejected",
                &["reason"],
                REGISTRY.clone()
            )
            .expect("Failed to register MESSAGES_REJECTED")
        });

    pub static MESSAGES_PRUNED: std::sync::LazyLock<IntCounter> = std::sync::LazyLock::new(|| {
        register_int_counter_with_registry!(
            "chat_messages_pruned_total",
            "Total number of chat messages removed by retention",
            REGISTRY.clone()
        )
        .expect("Failed to register MESSAGES_PRUNED")
    });
}

/// Fact cache operations
pub mod cache {
    use prometheus::{register_int_counter_vec_with_registry, IntCounterVec};

    use super::REGISTRY;

    pub static CACHE_HITS: std::sync::LazyLock<IntCounterVec> = std::sync::LazyLock::new(|| {
        register_int_counter_vec_with_registry!(
            "cache_hits_total",
            "Total number of fact cache hits",
            &["kind"],
            REGISTRY.clone()
        )
        .expect("Failed to register CACHE_HITS")
    });

    pub static CACHE_MISSES: std::sync::LazyLock<IntCounterVec> = std::sync::LazyLock::new(|| {
        register_int_counter_vec_with_registry!(
            "cache_misses_total",
            "Total number of fact cache misses",
            &["kind"],
            REGISTRY.clone()
        )
        .expect("Failed to register CACHE_MISSES")
    });
}

/// Fan-out transport
pub mod fanout {
    use prometheus::{
        register_int_counter_vec_with_registry, register_int_gauge_with_registry, IntCounterVec,
        IntGauge,
    };

    use super::REGISTRY;

    pub static EVENTS_PUBLISHED: std::sync::LazyLock<IntCounterVec> =
        std::sync::LazyLock::new(|| {
            register_int_counter_vec_with_registry!(
                "fanout_events_published_total",
                "Total number of fan-out events delivered to subscriber channels",
                &["type"],
                REGISTRY.clone()
            )
            .expect("Failed to register EVENTS_PUBLISHED")
        });

    pub static EVENTS_DROPPED: std::sync::LazyLock<IntCounterVec> = std::sync::LazyLock::new(|| {
        register_int_counter_vec_with_registry!(
            "fanout_events_dropped_total",
            "Total number of fan-out events dropped on full subscriber channels",
            &["type"],
            REGISTRY.clone()
        )
        .expect("Failed to register EVENTS_DROPPED")
    });

    pub static CONNECTED_SUBSCRIBERS: std::sync::LazyLock<IntGauge> =
        std::sync::LazyLock::new(|| {
            register_int_gauge_with_registry!(
                "fanout_connected_subscribers",
                "Current number of connected fan-out subscribers",
                REGISTRY.clone()
            )
            .expect("Failed to register CONNECTED_SUBSCRIBERS")
        });
}

/// Now-playing synchronizer
pub mod sync {
    use prometheus::{register_int_counter_with_registry, IntCounter};

    use super::REGISTRY;

    pub static TRACK_REFRESHES: std::sync::LazyLock<IntCounter> = std::sync::LazyLock::new(|| {
        register_int_counter_with_registry!(
            "track_refreshes_total",
            "Total number of current-track cache refreshes",
            REGISTRY.clone()
        )
        .expect("Failed to register TRACK_REFRESHES")
    });

    pub static TRACK_REFRESH_FAILURES: std::sync::LazyLock<IntCounter> =
        std::sync::LazyLock::new(|| {
            register_int_counter_with_registry!(
                "track_refresh_failures_total",
                "Total number of failed platform lookups during refresh",
                REGISTRY.clone()
            )
            .expect("Failed to register TRACK_REFRESH_FAILURES")
        });
}

/// Expose metrics in Prometheus text format
pub fn gather_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer).map_err(|_| prometheus::Error::Msg("Invalid UTF-8".to_string()))
}
