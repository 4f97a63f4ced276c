//! Autopilot Server - Main Entry Point
//!
//! Webhook intake, automation and conversation memory backend.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{error, info, warn};

use autopilot_server::automation::collaborators::{
    EnvTokenVault, LoggingGateway, TemplateOnlyGenerator,
};
use autopilot_server::automation::ActionExecutor;
use autopilot_server::config::{Config, StorageBackend};
use autopilot_server::store::{MemoryStore, PgStore, Store};
use autopilot_server::webhooks::dedup::DeliveryDedup;
use autopilot_server::webhooks::dispatch::WebhookDispatcher;
use autopilot_server::webhooks::provider::ProviderRegistry;
use autopilot_server::{api, db, retention};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "autopilot_server=debug,tower_http=debug".into()),
        )
        .json()
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = ?config.environment,
        "Starting Autopilot Server"
    );
    if !config.is_production() {
        warn!("Development mode: unsigned social platform deliveries are accepted");
    }

    // Initialize storage
    let store: Arc<dyn Store> = match (config.storage_backend, config.database_url.as_deref()) {
        (StorageBackend::Postgres, Some(url)) => {
            let pool = db::create_pool(url).await?;
            db::run_migrations(&pool).await?;
            Arc::new(PgStore::new(pool))
        }
        (StorageBackend::Postgres, None) => anyhow::bail!("DATABASE_URL must be set"),
        (StorageBackend::Memory, _) => {
            warn!("Using in-memory storage, data is lost on restart");
            Arc::new(MemoryStore::new())
        }
    };

    // Delivery dedup (Redis when configured, otherwise per-process)
    let dedup_ttl = Duration::from_secs(config.dedup_ttl_secs);
    let dedup = match &config.redis_url {
        Some(url) => DeliveryDedup::redis(db::create_redis_client(url).await?, dedup_ttl),
        None => {
            info!("REDIS_URL not set, delivery dedup is per-process");
            DeliveryDedup::in_memory(dedup_ttl)
        }
    };

    let executor = ActionExecutor::new(
        Arc::clone(&store),
        Arc::new(EnvTokenVault::from_env()),
        Arc::new(LoggingGateway),
        Arc::new(TemplateOnlyGenerator),
    );
    let context_ttl = config
        .context_ttl()
        .context("DEFAULT_CONTEXT_TTL_HOURS is out of range")?;
    let dispatcher = WebhookDispatcher::new(Arc::clone(&store), executor, dedup, context_ttl);
    let registry = ProviderRegistry::from_config(&config);

    // Build application state
    let state = api::AppState::new(Arc::clone(&store), config.clone(), registry, dispatcher);

    // Background retention sweeper
    let retention_handle = retention::spawn_retention_task(store, Arc::clone(&state.config));

    // Build router
    let app = api::create_router(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    info!(address = %config.bind_address, "Server listening");

    // Graceful shutdown handler
    let shutdown_signal = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for shutdown signal");
        }
        info!("Received shutdown signal, cleaning up...");
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await?;

    retention_handle.abort();
    info!("Server shutdown complete");

    Ok(())
}
