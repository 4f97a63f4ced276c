//! Database Layer
//!
//! `PostgreSQL` and Redis connections.

use std::time::Duration;

use anyhow::Result;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

/// Create `PostgreSQL` connection pool with health configuration.
pub async fn create_pool(database_url: &str) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        // Keep a few connections warm for webhook bursts
        .min_connections(2)
        .max_connections(20)
        // Fail fast on pool exhaustion so the provider retries the delivery
        .acquire_timeout(Duration::from_secs(5))
        .idle_timeout(Duration::from_secs(600))
        .test_before_acquire(true)
        .connect(database_url)
        .await?;

    info!("Connected to PostgreSQL");
    Ok(pool)
}

/// Run database migrations.
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    info!("Database migrations completed");
    Ok(())
}

/// Create Redis client.
pub async fn create_redis_client(redis_url: &str) -> Result<fred::clients::Client> {
    use fred::prelude::*;

    let config = Config::from_url(redis_url)?;
    let client = Client::new(config, None, None, None);
    client.connect();
    client.wait_for_connect().await?;

    info!("Connected to Redis");
    Ok(client)
}
