//! Webhook Intake Handlers
//!
//! `GET /webhooks/{provider}` answers the subscription handshake.
//! `POST /webhooks/{provider}` verifies, parses and dispatches a delivery.

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::Json;
use serde_json::{json, Value};
use tracing::{debug, instrument};

use super::error::WebhookError;
use super::provider::HandshakeQuery;
use crate::api::AppState;

/// Echo the challenge once the subscription is confirmed.
#[instrument(skip(state, query))]
pub async fn verify_subscription(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    Query(query): Query<HandshakeQuery>,
) -> Result<String, WebhookError> {
    let provider = state.registry.get(&provider)?;
    provider.verify_subscription(&query)
}

/// Receive a signed delivery.
///
/// Nothing in the body is trusted before the signature check passes. A 2xx is
/// returned only once every sub-event has been handled or deliberately ignored.
#[instrument(skip(state, headers, body), fields(bytes = body.len()))]
pub async fn receive(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, WebhookError> {
    let provider = state.registry.get(&provider)?;
    provider.verify(&headers, &body)?;
    let events = provider.parse(&body)?;

    let summary = state.dispatcher.dispatch(events).await?;
    debug!(
        provider = provider.id(),
        handled = summary.handled,
        duplicates = summary.duplicates,
        ignored = summary.ignored,
        "Webhook delivery processed"
    );

    Ok(Json(json!({ "received": true })))
}
