//! Inbound Webhooks
//!
//! Signed deliveries from social platforms and the payment provider: signature
//! verification, schema validation, delivery dedup and per-event dispatch into
//! conversation memory and automation.

pub mod dedup;
pub mod dispatch;
mod error;
pub mod events;
pub mod handlers;
pub mod payment;
pub mod platform;
pub mod provider;
pub mod signing;

use axum::routing::get;
use axum::Router;

pub use error::WebhookError;

use crate::api::AppState;

/// Public intake routes. Authentication is the provider signature.
pub fn router() -> Router<AppState> {
    Router::new().route(
        "/{provider}",
        get(handlers::verify_subscription).post(handlers::receive),
    )
}
