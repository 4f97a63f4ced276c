//! Storage Layer
//!
//! `Store` is the storage handle every component receives at construction.
//! `PgStore` backs production; `MemoryStore` is a complete in-process
//! implementation used by tests and `STORAGE_BACKEND=memory`.
//!
//! Counter updates (`message_count`, `last_message_at`) happen inside the
//! storage write itself, never as an application-side read-modify-write.

mod memory;
mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use crate::automation::types::{RuleType, StoredRule};
use crate::conversations::types::{
    ContextFact, Conversation, ConversationKey, ConversationStats, Message, NewContextFact,
    NewMessage, Platform,
};

/// Storage errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: Uuid },

    #[error("Corrupt {entity} row: {reason}")]
    Decode {
        entity: &'static str,
        reason: String,
    },
}

/// Backend-agnostic storage covering accounts, rules, and conversation memory.
#[async_trait]
pub trait Store: Send + Sync {
    // ── Connected accounts ──────────────────────────────────────────

    /// Link a platform account to a workspace (re-linking moves it).
    async fn connect_account(
        &self,
        workspace_id: Uuid,
        platform: Platform,
        account_id: &str,
    ) -> Result<(), StoreError>;

    /// Which workspace owns a platform account.
    async fn resolve_workspace(
        &self,
        platform: Platform,
        account_id: &str,
    ) -> Result<Option<Uuid>, StoreError>;

    // ── Automation rules ────────────────────────────────────────────

    /// Insert a rule row.
    async fn insert_rule(&self, rule: &StoredRule) -> Result<(), StoreError>;

    /// All rules of a workspace in storage order.
    async fn list_rules(&self, workspace_id: Uuid) -> Result<Vec<StoredRule>, StoreError>;

    /// Active rules of one type in storage order.
    async fn active_rules(
        &self,
        workspace_id: Uuid,
        rule_type: RuleType,
    ) -> Result<Vec<StoredRule>, StoreError>;

    /// Stamp `last_run` (and `next_run` when given) after a match.
    async fn record_rule_run(
        &self,
        rule_id: Uuid,
        last_run: DateTime<Utc>,
        next_run: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError>;

    // ── Conversations ───────────────────────────────────────────────

    /// Fetch the conversation for `key`, creating it on first contact.
    ///
    /// Idempotent. A known username replaces a missing one but is never cleared.
    async fn get_or_create_conversation(
        &self,
        key: &ConversationKey,
        participant_username: Option<&str>,
    ) -> Result<Conversation, StoreError>;

    /// Fetch a conversation by id.
    async fn get_conversation(&self, id: Uuid) -> Result<Option<Conversation>, StoreError>;

    /// Append a message, atomically bumping `message_count` and `last_message_at`.
    ///
    /// A message from the participant also reactivates a dormant conversation.
    async fn append_message(
        &self,
        conversation_id: Uuid,
        message: NewMessage,
    ) -> Result<Message, StoreError>;

    /// Most recent messages, newest first.
    async fn recent_messages(
        &self,
        conversation_id: Uuid,
        limit: usize,
    ) -> Result<Vec<Message>, StoreError>;

    /// Insert a context fact. Never merges with existing facts.
    async fn record_context(
        &self,
        conversation_id: Uuid,
        fact: NewContextFact,
    ) -> Result<ContextFact, StoreError>;

    /// Facts not expired at `now`, newest extraction first.
    async fn active_context(
        &self,
        conversation_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Vec<ContextFact>, StoreError>;

    /// Workspace totals; conversations silent since `dormant_before` count as dormant.
    async fn conversation_stats(
        &self,
        workspace_id: Uuid,
        dormant_before: DateTime<Utc>,
    ) -> Result<ConversationStats, StoreError>;

    // ── Retention ───────────────────────────────────────────────────

    /// Delete facts with `expires_at < now`. Returns rows deleted.
    async fn delete_expired_context(&self, now: DateTime<Utc>) -> Result<u64, StoreError>;

    /// Delete messages created before `cutoff`. Returns rows deleted.
    async fn prune_messages(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError>;

    /// Flag active conversations silent since `inactive_since`. Returns rows flagged.
    async fn mark_dormant(&self, inactive_since: DateTime<Utc>) -> Result<u64, StoreError>;
}
