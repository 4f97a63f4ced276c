//! Operator Authentication Middleware

use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::Response;
use tracing::warn;

use super::error::ApiError;
use super::AppState;
use crate::webhooks::signing::constant_time_eq;

/// Require `Authorization: Bearer <OPERATOR_API_KEY>`.
///
/// With no key configured every operator route answers 404.
pub async fn require_operator(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let expected = state
        .config
        .operator_api_key
        .as_deref()
        .ok_or(ApiError::Disabled)?;

    let token = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .ok_or(ApiError::Unauthorized)?;

    if !constant_time_eq(expected.as_bytes(), token.as_bytes()) {
        warn!(security_event = true, path = %request.uri().path(), "Rejected operator API key");
        return Err(ApiError::Unauthorized);
    }

    Ok(next.run(request).await)
}
