//! Postgres pool construction

use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

use crate::config::DatabaseConfig;

/// Build the connection pool and verify it with an initial connection.
///
/// Migrations run separately in the binary. The URL is never logged; it
/// carries credentials.
pub async fn init_database(config: &DatabaseConfig) -> Result<PgPool> {
    let pool = pool_options(config)
        .connect(&config.url)
        .await
        .context("database connection failed")?;

    info!(
        max_connections = config.max_connections,
        min_connections = config.min_connections,
        "database pool ready"
    );

    Ok(pool)
}

fn pool_options(config: &DatabaseConfig) -> PgPoolOptions {
    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(config.connect_timeout_seconds))
        .idle_timeout(Duration::from_secs(config.idle_timeout_seconds))
}
