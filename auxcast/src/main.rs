mod server;

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use auxcast_core::{
    bootstrap::{init_database, init_services, load_config},
    logging,
};
use auxcast_hub::{FanoutHub, HubEventPublisher};

use server::AuxcastServer;

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Load configuration (fails fast on misconfigurations)
    let config = load_config()?;

    // 2. Initialize logging
    logging::init_logging(&config.logging)?;
    info!(name = %config.server.name, "Server starting...");

    // 3. Durable store backend
    let pool = if config.database.enabled {
        let pool = init_database(&config.database).await?;

        info!("Running database migrations...");
        sqlx::migrate!("../migrations")
            .run(&pool)
            .await
            .context("running database migrations")?;
        info!("Migrations completed");

        Some(pool)
    } else {
        None
    };

    // 4. Initialize services
    let mut services = init_services(pool.clone(), &config).await?;

    // 5. Fan-out hub, wired as the event publisher before anything clones
    //    the services
    let hub = Arc::new(FanoutHub::new(config.hub.channel_capacity));
    services.set_event_publisher(Arc::new(HubEventPublisher::new(hub.clone())));
    info!(
        channel_capacity = config.hub.channel_capacity,
        "Fan-out hub initialized"
    );

    // 6. Run the background loops until a shutdown signal
    let server = AuxcastServer::new(config, services, hub, pool);
    server.start().await
}
