//! API Router and Application State
//!
//! Central routing configuration and shared state.

mod auth;
mod error;
pub mod operator;

use axum::{
    extract::{DefaultBodyLimit, State},
    middleware::from_fn_with_state,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::store::Store;
use crate::webhooks::{self, dispatch::WebhookDispatcher, provider::ProviderRegistry};

pub use error::ApiError;

/// Largest webhook or operator body accepted (1 MiB).
const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Storage handle
    pub store: Arc<dyn Store>,
    /// Server configuration
    pub config: Arc<Config>,
    /// Webhook providers by route segment
    pub registry: Arc<ProviderRegistry>,
    /// Sub-event routing into memory and automation
    pub dispatcher: Arc<WebhookDispatcher>,
}

impl AppState {
    /// Create new application state.
    #[must_use]
    pub fn new(
        store: Arc<dyn Store>,
        config: Config,
        registry: ProviderRegistry,
        dispatcher: WebhookDispatcher,
    ) -> Self {
        Self {
            store,
            config: Arc::new(config),
            registry: Arc::new(registry),
            dispatcher: Arc::new(dispatcher),
        }
    }
}

/// Create the main application router.
pub fn create_router(state: AppState) -> Router {
    let operator_routes = Router::new()
        .route(
            "/workspaces/{id}/rules",
            get(operator::list_rules).post(operator::create_rule),
        )
        .route("/workspaces/{id}/accounts", post(operator::connect_account))
        .route(
            "/workspaces/{id}/conversations/stats",
            get(operator::conversation_stats),
        )
        .route(
            "/conversations/{id}/context",
            get(operator::conversation_context),
        )
        .layer(from_fn_with_state(state.clone(), auth::require_operator));

    Router::new()
        // Health check
        .route("/health", get(health_check))
        // Signed provider deliveries
        .nest("/webhooks", webhooks::router())
        // Operator API
        .nest("/api", operator_routes)
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        // State
        .with_state(state)
}

/// Health check response.
#[derive(Serialize)]
struct HealthResponse {
    /// Service status
    status: &'static str,
    /// Whether the operator API is enabled
    operator_api: bool,
}

/// Health check endpoint.
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        operator_api: state.config.operator_api_key.is_some(),
    })
}
