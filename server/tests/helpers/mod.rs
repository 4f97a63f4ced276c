//! Reusable test helpers for HTTP integration tests.
//!
//! Provides `TestApp` for sending requests through the full axum router backed
//! by `MemoryStore`, plus builders for signed provider deliveries.
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{self, Method, Request, Response};
use axum::Router;
use chrono::Utc;
use http_body_util::BodyExt;
use tower::ServiceExt;
use uuid::Uuid;

use autopilot_server::api::{create_router, AppState};
use autopilot_server::automation::collaborators::{
    EnvTokenVault, LoggingGateway, TemplateOnlyGenerator,
};
use autopilot_server::automation::ActionExecutor;
use autopilot_server::config::Config;
use autopilot_server::conversations::types::Platform;
use autopilot_server::store::{MemoryStore, Store};
use autopilot_server::webhooks::dedup::DeliveryDedup;
use autopilot_server::webhooks::dispatch::WebhookDispatcher;
use autopilot_server::webhooks::provider::ProviderRegistry;
use autopilot_server::webhooks::signing::{sign_payload, sign_payment_payload};

/// Business account connected to the test workspace.
pub const ACCOUNT_ID: &str = "17841400000000001";

pub struct TestApp {
    pub router: Router,
    pub store: Arc<MemoryStore>,
    pub config: Arc<Config>,
    pub workspace_id: Uuid,
}

impl TestApp {
    /// Test app on the default test configuration with `ACCOUNT_ID` connected.
    pub async fn new() -> Self {
        Self::with_config(Config::default_for_test()).await
    }

    pub async fn with_config(config: Config) -> Self {
        let store = Arc::new(MemoryStore::new());
        let workspace_id = Uuid::now_v7();
        store
            .connect_account(workspace_id, Platform::Instagram, ACCOUNT_ID)
            .await
            .expect("Failed to connect test account");

        let executor = ActionExecutor::new(
            store.clone(),
            Arc::new(EnvTokenVault::default().with_default_token("test-page-token")),
            Arc::new(LoggingGateway),
            Arc::new(TemplateOnlyGenerator),
        );
        let dispatcher = WebhookDispatcher::new(
            store.clone(),
            executor,
            DeliveryDedup::in_memory(Duration::from_secs(config.dedup_ttl_secs)),
            chrono::Duration::hours(config.default_context_ttl_hours),
        );
        let registry = ProviderRegistry::from_config(&config);

        let state = AppState::new(store.clone(), config, registry, dispatcher);
        let config = Arc::clone(&state.config);
        let router = create_router(state);

        Self {
            router,
            store,
            config,
            workspace_id,
        }
    }

    /// Build an HTTP request with the given method and URI.
    pub fn request(method: Method, uri: &str) -> http::request::Builder {
        Request::builder().method(method).uri(uri)
    }

    /// Send a request through the router via `tower::ServiceExt::oneshot`.
    pub async fn oneshot(&self, request: Request<Body>) -> Response<Body> {
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("oneshot request failed")
    }

    /// POST a platform delivery signed with the configured app secret.
    pub async fn post_platform(&self, provider: &str, body: &serde_json::Value) -> Response<Body> {
        let raw = body.to_string();
        let secret = self.config.platform_app_secret.as_deref().unwrap_or_default();
        let signature = format!("sha256={}", sign_payload(secret, raw.as_bytes()));
        let req = Self::request(Method::POST, &format!("/webhooks/{provider}"))
            .header("Content-Type", "application/json")
            .header("X-Hub-Signature-256", signature)
            .body(Body::from(raw))
            .unwrap();
        self.oneshot(req).await
    }

    /// POST a payment delivery signed `age_secs` ago.
    pub async fn post_payment(&self, body: &serde_json::Value, age_secs: i64) -> Response<Body> {
        let raw = body.to_string();
        let secret = self.config.payment_webhook_secret.as_deref().unwrap_or_default();
        let header =
            sign_payment_payload(secret, Utc::now().timestamp() - age_secs, raw.as_bytes());
        let req = Self::request(Method::POST, "/webhooks/stripe")
            .header("Content-Type", "application/json")
            .header("Stripe-Signature", header)
            .body(Body::from(raw))
            .unwrap();
        self.oneshot(req).await
    }

    /// Request to the operator API with the configured bearer key.
    pub fn operator(&self, method: Method, uri: &str) -> http::request::Builder {
        let key = self.config.operator_api_key.as_deref().unwrap_or_default();
        Self::request(method, uri)
            .header("Authorization", format!("Bearer {key}"))
            .header("Content-Type", "application/json")
    }
}

/// Collect a response body and parse it as JSON.
pub async fn body_to_json(response: Response<Body>) -> serde_json::Value {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("Failed to collect response body")
        .to_bytes();
    serde_json::from_slice(&bytes).unwrap_or_else(|e| {
        let preview = String::from_utf8_lossy(&bytes);
        panic!("Failed to parse response as JSON: {e}\nBody: {preview}")
    })
}

/// Collect a response body as text.
pub async fn body_to_string(response: Response<Body>) -> String {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("Failed to collect response body")
        .to_bytes();
    String::from_utf8_lossy(&bytes).into_owned()
}

/// Instagram delivery with one comment change.
pub fn comment_delivery(
    comment_id: &str,
    from_id: &str,
    username: &str,
    text: &str,
) -> serde_json::Value {
    serde_json::json!({
        "object": "instagram",
        "entry": [{
            "id": ACCOUNT_ID,
            "time": 1_740_830_400,
            "changes": [{
                "field": "comments",
                "value": {
                    "id": comment_id,
                    "text": text,
                    "from": {"id": from_id, "username": username},
                    "media": {"id": "media-1"}
                }
            }]
        }]
    })
}
