//! Server lifecycle management
//!
//! Spawns the engine's background loops (liveness sweeper, now-playing
//! synchronizer, snapshot reconciler, chat retention) and tears them
//! down gracefully on SIGTERM or Ctrl+C.

use std::sync::Arc;
use std::time::Duration;

use sqlx::PgPool;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use auxcast_core::{bootstrap::Services, Config};
use auxcast_hub::{FanoutHub, Reconciler};

pub struct AuxcastServer {
    config: Config,
    services: Services,
    hub: Arc<FanoutHub>,
    pool: Option<PgPool>,
}

impl AuxcastServer {
    pub const fn new(
        config: Config,
        services: Services,
        hub: Arc<FanoutHub>,
        pool: Option<PgPool>,
    ) -> Self {
        Self {
            config,
            services,
            hub,
            pool,
        }
    }

    /// Start the background loops and wait for a shutdown signal
    pub async fn start(self) -> anyhow::Result<()> {
        let shutdown = CancellationToken::new();
        let mut tasks: Vec<(&str, JoinHandle<()>)> = Vec::new();

        tasks.push((
            "liveness sweeper",
            self.services.presence.spawn_sweeper(
                Duration::from_secs(self.config.presence.sweep_interval_seconds),
                shutdown.clone(),
            ),
        ));
        tasks.push((
            "now-playing synchronizer",
            self.services.now_playing.spawn(shutdown.clone()),
        ));

        let reconciler = Reconciler::new(self.hub.clone(), self.services.discovery.clone());
        tasks.push((
            "snapshot reconciler",
            reconciler.spawn(
                Duration::from_secs(self.config.hub.snapshot_interval_seconds),
                shutdown.clone(),
            ),
        ));
        tasks.push((
            "chat retention",
            self.services.chat.spawn_retention(
                Duration::from_secs(self.config.chat.retention_interval_seconds),
                self.config.chat.retention_keep,
                shutdown.clone(),
            ),
        ));

        info!(tasks = tasks.len(), "All background loops started");

        shutdown_signal().await;
        info!("Shutdown signal received, starting graceful shutdown...");

        shutdown.cancel();
        drain(tasks, Duration::from_secs(self.config.server.shutdown_grace_seconds)).await;

        if let Some(pool) = &self.pool {
            info!("Closing database connection pool...");
            pool.close().await;
            info!("Database pool closed");
        }

        info!(
            subscribers = self.hub.subscriber_count(),
            "Server shut down complete"
        );
        Ok(())
    }
}

/// Wait for every background task, bounded by one shared grace period
async fn drain(tasks: Vec<(&str, JoinHandle<()>)>, grace: Duration) {
    let deadline = tokio::time::Instant::now() + grace;

    for (name, mut handle) in tasks {
        match tokio::time::timeout_at(deadline, &mut handle).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(task = name, "Background task failed: {e}"),
            Err(_) => {
                warn!(task = name, "Task did not stop within the grace period, aborting");
                handle.abort();
            }
        }
    }
}

/// Wait for a shutdown signal (SIGTERM or SIGINT/Ctrl+C)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { info!("Received Ctrl+C"); }
        () = terminate => { info!("Received SIGTERM"); }
    }
}
