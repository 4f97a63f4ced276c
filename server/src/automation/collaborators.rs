//! External Collaborators
//!
//! The executor decides what to send and to whom. Token storage, the network
//! call that posts a reply, and generated text live behind these traits.

use std::collections::HashMap;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use super::error::AutomationError;
use crate::conversations::types::{ContextFact, Platform};

/// Env var prefix for per-account tokens (`PLATFORM_ACCESS_TOKEN_<ACCOUNT_ID>`).
const TOKEN_ENV_PREFIX: &str = "PLATFORM_ACCESS_TOKEN_";

/// Env var holding the token used when no per-account token is set.
const DEFAULT_TOKEN_ENV: &str = "PLATFORM_ACCESS_TOKEN";

/// Where a reply is posted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReplyChannel {
    /// Public reply under a comment or media.
    PublicReply { target_id: String },
    /// Private message to the participant.
    DirectMessage,
}

/// A concrete reply for the gateway to post.
#[derive(Debug, Clone, Serialize)]
pub struct OutboundRequest {
    pub workspace_id: Uuid,
    pub conversation_id: Uuid,
    pub rule_id: Uuid,
    pub platform: Platform,
    /// Business account the reply is sent from.
    pub account_id: String,
    /// Participant the reply is addressed to.
    pub recipient_id: String,
    pub channel: ReplyChannel,
    pub text: String,
}

/// Input for generated replies. The returned string is used verbatim.
#[derive(Debug)]
pub struct GenerationRequest<'a> {
    pub instructions: &'a str,
    pub inbound_text: &'a str,
    pub participant_username: Option<&'a str>,
    pub context: &'a [ContextFact],
}

/// Source of live, decrypted access tokens.
#[async_trait]
pub trait TokenVault: Send + Sync {
    async fn access_token(
        &self,
        workspace_id: Uuid,
        platform: Platform,
        account_id: &str,
    ) -> Result<SecretString, AutomationError>;
}

/// Performs the outbound platform call.
#[async_trait]
pub trait MessagingGateway: Send + Sync {
    async fn send(
        &self,
        token: &SecretString,
        request: &OutboundRequest,
    ) -> Result<(), AutomationError>;
}

/// AI content service.
#[async_trait]
pub trait ContentGenerator: Send + Sync {
    async fn generate(&self, request: &GenerationRequest<'_>) -> Result<String, AutomationError>;
}

/// Tokens read from the environment at startup.
#[derive(Default)]
pub struct EnvTokenVault {
    default_token: Option<SecretString>,
    per_account: HashMap<String, SecretString>,
}

impl EnvTokenVault {
    pub fn from_env() -> Self {
        let mut vault = Self::default();
        for (key, value) in std::env::vars() {
            if value.trim().is_empty() {
                continue;
            }
            if key == DEFAULT_TOKEN_ENV {
                vault.default_token = Some(SecretString::from(value));
            } else if let Some(account_id) = key.strip_prefix(TOKEN_ENV_PREFIX) {
                vault
                    .per_account
                    .insert(account_id.to_string(), SecretString::from(value));
            }
        }
        vault
    }

    #[must_use]
    pub fn with_default_token(mut self, token: impl Into<String>) -> Self {
        self.default_token = Some(SecretString::from(token.into()));
        self
    }

    #[must_use]
    pub fn with_account_token(
        mut self,
        account_id: impl Into<String>,
        token: impl Into<String>,
    ) -> Self {
        self.per_account
            .insert(account_id.into(), SecretString::from(token.into()));
        self
    }
}

#[async_trait]
impl TokenVault for EnvTokenVault {
    async fn access_token(
        &self,
        _workspace_id: Uuid,
        _platform: Platform,
        account_id: &str,
    ) -> Result<SecretString, AutomationError> {
        self.per_account
            .get(account_id)
            .or(self.default_token.as_ref())
            .map(|token| SecretString::from(token.expose_secret().to_owned()))
            .ok_or_else(|| AutomationError::Vault {
                account_id: account_id.to_string(),
                reason: "no token configured".to_string(),
            })
    }
}

/// Gateway that only logs what would be posted.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingGateway;

#[async_trait]
impl MessagingGateway for LoggingGateway {
    async fn send(
        &self,
        _token: &SecretString,
        request: &OutboundRequest,
    ) -> Result<(), AutomationError> {
        info!(
            workspace_id = %request.workspace_id,
            rule_id = %request.rule_id,
            platform = %request.platform,
            recipient_id = %request.recipient_id,
            channel = ?request.channel,
            "Outbound reply ready"
        );
        Ok(())
    }
}

/// Generator used when no content service is wired; actions fall back to
/// their configured fallback text.
#[derive(Debug, Default, Clone, Copy)]
pub struct TemplateOnlyGenerator;

#[async_trait]
impl ContentGenerator for TemplateOnlyGenerator {
    async fn generate(&self, _request: &GenerationRequest<'_>) -> Result<String, AutomationError> {
        Err(AutomationError::Content(
            "no content service configured".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn vault_prefers_account_token() {
        let vault = EnvTokenVault::default()
            .with_default_token("fallback")
            .with_account_token("1784", "account-token");

        let token = vault
            .access_token(Uuid::nil(), Platform::Instagram, "1784")
            .await
            .unwrap();
        assert_eq!(token.expose_secret(), "account-token");

        let token = vault
            .access_token(Uuid::nil(), Platform::Instagram, "other")
            .await
            .unwrap();
        assert_eq!(token.expose_secret(), "fallback");
    }

    #[tokio::test]
    async fn vault_without_token_errors() {
        let err = EnvTokenVault::default()
            .access_token(Uuid::nil(), Platform::Facebook, "1784")
            .await
            .unwrap_err();
        assert!(matches!(err, AutomationError::Vault { .. }));
    }
}
