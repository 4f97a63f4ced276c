//! Webhook Error Types

use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use thiserror::Error;

use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum WebhookError {
    /// Authenticity check failed. Logged as a security event.
    #[error("Invalid {provider} signature: {reason}")]
    SignatureInvalid {
        provider: &'static str,
        reason: String,
    },

    #[error("Payload does not match the {provider} schema: {reason}")]
    SchemaInvalid {
        provider: &'static str,
        reason: String,
    },

    #[error("Unknown webhook provider: {0}")]
    UnknownProvider(String),

    #[error("Subscription handshake is not supported by {0}")]
    HandshakeUnsupported(&'static str),

    #[error("Verify token mismatch")]
    VerifyTokenMismatch,

    #[error("Unsupported subscription mode")]
    InvalidMode,

    #[error("Missing challenge")]
    MissingChallenge,

    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),
}

impl WebhookError {
    pub(crate) fn signature(provider: &'static str, reason: impl Into<String>) -> Self {
        Self::SignatureInvalid {
            provider,
            reason: reason.into(),
        }
    }

    pub(crate) fn schema(provider: &'static str, reason: impl Into<String>) -> Self {
        Self::SchemaInvalid {
            provider,
            reason: reason.into(),
        }
    }
}

impl IntoResponse for WebhookError {
    fn into_response(self) -> axum::response::Response {
        let (status, code, message) = match &self {
            Self::SignatureInvalid { provider, reason } => {
                tracing::warn!(
                    security_event = true,
                    provider = %provider,
                    reason = %reason,
                    "Webhook signature rejected"
                );
                (
                    StatusCode::BAD_REQUEST,
                    "invalid_signature",
                    "Invalid signature".to_string(),
                )
            }
            Self::SchemaInvalid { provider, reason } => {
                tracing::warn!(provider = %provider, reason = %reason, "Webhook payload rejected");
                (StatusCode::BAD_REQUEST, "invalid_payload", self.to_string())
            }
            Self::UnknownProvider(_) => {
                (StatusCode::NOT_FOUND, "unknown_provider", self.to_string())
            }
            Self::HandshakeUnsupported(_) => (
                StatusCode::METHOD_NOT_ALLOWED,
                "handshake_unsupported",
                self.to_string(),
            ),
            Self::VerifyTokenMismatch => {
                tracing::warn!(security_event = true, "Webhook subscription token mismatch");
                (StatusCode::FORBIDDEN, "verify_token_mismatch", self.to_string())
            }
            Self::InvalidMode => (StatusCode::BAD_REQUEST, "invalid_mode", self.to_string()),
            Self::MissingChallenge => {
                (StatusCode::BAD_REQUEST, "missing_challenge", self.to_string())
            }
            Self::Storage(err) => {
                tracing::error!("Storage error in webhook processing: {}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "storage_error",
                    "Storage error".to_string(),
                )
            }
        };

        (
            status,
            Json(serde_json::json!({ "error": code, "message": message })),
        )
            .into_response()
    }
}
