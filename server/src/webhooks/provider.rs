//! Webhook Providers
//!
//! Each provider knows how to authenticate and explode its own deliveries.
//! The registry maps the `/webhooks/{provider}` route segment to one.

use std::collections::HashMap;
use std::sync::Arc;

use axum::http::HeaderMap;
use serde::Deserialize;

use super::error::WebhookError;
use super::events::InboundEvent;
use super::payment::PaymentProvider;
use super::platform::PlatformProvider;
use crate::config::Config;
use crate::conversations::types::Platform;

/// Subscription handshake query. Accepts bare and `hub.`-prefixed names.
#[derive(Debug, Default, Deserialize)]
pub struct HandshakeQuery {
    #[serde(alias = "hub.mode")]
    pub mode: Option<String>,
    #[serde(alias = "hub.verify_token")]
    pub verify_token: Option<String>,
    #[serde(alias = "hub.challenge")]
    pub challenge: Option<String>,
}

/// A source of signed webhook deliveries.
pub trait WebhookProvider: Send + Sync {
    /// Route segment and log label.
    fn id(&self) -> &'static str;

    /// Authenticate the raw body against the request headers.
    fn verify(&self, headers: &HeaderMap, body: &[u8]) -> Result<(), WebhookError>;

    /// Validate and explode a verified body into sub-events.
    fn parse(&self, body: &[u8]) -> Result<Vec<InboundEvent>, WebhookError>;

    /// Answer a subscription handshake with the challenge to echo.
    fn verify_subscription(&self, _query: &HandshakeQuery) -> Result<String, WebhookError> {
        Err(WebhookError::HandshakeUnsupported(self.id()))
    }
}

/// Providers by route id.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<&'static str, Arc<dyn WebhookProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every provider this server accepts.
    pub fn from_config(config: &Config) -> Self {
        let mut registry = Self::new();
        for platform in [Platform::Instagram, Platform::Facebook] {
            registry.register(Arc::new(PlatformProvider::new(
                platform,
                config.platform_app_secret.clone(),
                config.platform_verify_token.clone(),
                config.is_production(),
            )));
        }
        registry.register(Arc::new(PaymentProvider::new(
            config.payment_webhook_secret.clone(),
            config.payment_signature_tolerance_secs,
        )));
        registry
    }

    pub fn register(&mut self, provider: Arc<dyn WebhookProvider>) {
        self.providers.insert(provider.id(), provider);
    }

    pub fn get(&self, id: &str) -> Result<Arc<dyn WebhookProvider>, WebhookError> {
        self.providers
            .get(id)
            .cloned()
            .ok_or_else(|| WebhookError::UnknownProvider(id.to_string()))
    }
}
