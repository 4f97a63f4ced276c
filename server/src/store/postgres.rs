//! `PostgreSQL` `Store`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::{Store, StoreError};
use crate::automation::types::{RuleType, StoredRule};
use crate::conversations::types::{
    ContextFact, Conversation, ConversationKey, ConversationStats, Message, MessageType,
    NewContextFact, NewMessage, Platform, Sender, Sentiment,
};

/// Rows removed per `DELETE` statement during retention.
const DELETE_BATCH_SIZE: i64 = 10_000;

const CONVERSATION_COLUMNS: &str = "id, workspace_id, platform, participant_id, \
     participant_username, last_message_at, message_count, is_active, created_at";

const MESSAGE_COLUMNS: &str = "id, conversation_id, sender, content, message_type, \
     sentiment, topics, ai_response, automation_rule_id, external_id, created_at";

const FACT_COLUMNS: &str =
    "id, conversation_id, context_type, context_value, confidence, extracted_at, expires_at";

const RULE_COLUMNS: &str = "id, workspace_id, name, is_active, rule_type, trigger, actions, \
     last_run, next_run, created_at";

#[derive(sqlx::FromRow)]
struct ConversationRow {
    id: Uuid,
    workspace_id: Uuid,
    platform: String,
    participant_id: String,
    participant_username: Option<String>,
    last_message_at: Option<DateTime<Utc>>,
    message_count: i64,
    is_active: bool,
    created_at: DateTime<Utc>,
}

impl TryFrom<ConversationRow> for Conversation {
    type Error = StoreError;

    fn try_from(row: ConversationRow) -> Result<Self, Self::Error> {
        let platform = Platform::parse_str(&row.platform).ok_or_else(|| StoreError::Decode {
            entity: "conversation",
            reason: format!("unknown platform {:?}", row.platform),
        })?;
        Ok(Self {
            id: row.id,
            workspace_id: row.workspace_id,
            platform,
            participant_id: row.participant_id,
            participant_username: row.participant_username,
            last_message_at: row.last_message_at,
            message_count: row.message_count,
            is_active: row.is_active,
            created_at: row.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct MessageRow {
    id: Uuid,
    conversation_id: Uuid,
    sender: String,
    content: String,
    message_type: String,
    sentiment: Option<String>,
    topics: Vec<String>,
    ai_response: bool,
    automation_rule_id: Option<Uuid>,
    external_id: Option<String>,
    created_at: DateTime<Utc>,
}

impl TryFrom<MessageRow> for Message {
    type Error = StoreError;

    fn try_from(row: MessageRow) -> Result<Self, Self::Error> {
        let decode = |reason: String| StoreError::Decode {
            entity: "message",
            reason,
        };
        let sender = Sender::parse_str(&row.sender)
            .ok_or_else(|| decode(format!("unknown sender {:?}", row.sender)))?;
        let message_type = MessageType::parse_str(&row.message_type)
            .ok_or_else(|| decode(format!("unknown message type {:?}", row.message_type)))?;
        let sentiment = match row.sentiment.as_deref() {
            Some(s) => Some(
                Sentiment::parse_str(s).ok_or_else(|| decode(format!("unknown sentiment {s:?}")))?,
            ),
            None => None,
        };
        Ok(Self {
            id: row.id,
            conversation_id: row.conversation_id,
            sender,
            content: row.content,
            message_type,
            sentiment,
            topics: row.topics,
            ai_response: row.ai_response,
            automation_rule_id: row.automation_rule_id,
            external_id: row.external_id,
            created_at: row.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct FactRow {
    id: Uuid,
    conversation_id: Uuid,
    context_type: String,
    context_value: String,
    confidence: i16,
    extracted_at: DateTime<Utc>,
    expires_at: Option<DateTime<Utc>>,
}

impl TryFrom<FactRow> for ContextFact {
    type Error = StoreError;

    fn try_from(row: FactRow) -> Result<Self, Self::Error> {
        let confidence = u8::try_from(row.confidence)
            .ok()
            .filter(|c| *c <= 100)
            .ok_or_else(|| StoreError::Decode {
                entity: "context fact",
                reason: format!("confidence {} out of range", row.confidence),
            })?;
        Ok(Self {
            id: row.id,
            conversation_id: row.conversation_id,
            context_type: row.context_type,
            context_value: row.context_value,
            confidence,
            extracted_at: row.extracted_at,
            expires_at: row.expires_at,
        })
    }
}

/// Store backed by a `PostgreSQL` pool.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run a batched `DELETE` until fewer than a full batch is removed.
    ///
    /// `sql` must accept `$1` (cutoff timestamp) and `$2` (batch size).
    async fn purge_in_batches(&self, sql: &str, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut total_deleted = 0u64;
        loop {
            let deleted = sqlx::query(sql)
                .bind(cutoff)
                .bind(DELETE_BATCH_SIZE)
                .execute(&self.pool)
                .await?
                .rows_affected();
            total_deleted += deleted;
            if deleted < DELETE_BATCH_SIZE as u64 {
                break;
            }
        }
        Ok(total_deleted)
    }
}

#[async_trait]
impl Store for PgStore {
    async fn connect_account(
        &self,
        workspace_id: Uuid,
        platform: Platform,
        account_id: &str,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r"
            INSERT INTO connected_accounts (platform, account_id, workspace_id)
            VALUES ($1, $2, $3)
            ON CONFLICT (platform, account_id)
            DO UPDATE SET workspace_id = EXCLUDED.workspace_id, connected_at = NOW()
            ",
        )
        .bind(platform.as_str())
        .bind(account_id)
        .bind(workspace_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn resolve_workspace(
        &self,
        platform: Platform,
        account_id: &str,
    ) -> Result<Option<Uuid>, StoreError> {
        let workspace_id = sqlx::query_scalar::<_, Uuid>(
            "SELECT workspace_id FROM connected_accounts WHERE platform = $1 AND account_id = $2",
        )
        .bind(platform.as_str())
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(workspace_id)
    }

    async fn insert_rule(&self, rule: &StoredRule) -> Result<(), StoreError> {
        sqlx::query(
            r"
            INSERT INTO automation_rules
                (id, workspace_id, name, is_active, rule_type, trigger, actions, last_run, next_run, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ",
        )
        .bind(rule.id)
        .bind(rule.workspace_id)
        .bind(&rule.name)
        .bind(rule.is_active)
        .bind(&rule.rule_type)
        .bind(&rule.trigger)
        .bind(&rule.actions)
        .bind(rule.last_run)
        .bind(rule.next_run)
        .bind(rule.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_rules(&self, workspace_id: Uuid) -> Result<Vec<StoredRule>, StoreError> {
        let rules = sqlx::query_as::<_, StoredRule>(&format!(
            "SELECT {RULE_COLUMNS} FROM automation_rules WHERE workspace_id = $1 \
             ORDER BY created_at, id"
        ))
        .bind(workspace_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rules)
    }

    async fn active_rules(
        &self,
        workspace_id: Uuid,
        rule_type: RuleType,
    ) -> Result<Vec<StoredRule>, StoreError> {
        let rules = sqlx::query_as::<_, StoredRule>(&format!(
            "SELECT {RULE_COLUMNS} FROM automation_rules \
             WHERE workspace_id = $1 AND rule_type = $2 AND is_active \
             ORDER BY created_at, id"
        ))
        .bind(workspace_id)
        .bind(rule_type.as_str())
        .fetch_all(&self.pool)
        .await?;
        Ok(rules)
    }

    async fn record_rule_run(
        &self,
        rule_id: Uuid,
        last_run: DateTime<Utc>,
        next_run: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE automation_rules SET last_run = $2, next_run = COALESCE($3, next_run) WHERE id = $1",
        )
        .bind(rule_id)
        .bind(last_run)
        .bind(next_run)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                entity: "automation rule",
                id: rule_id,
            });
        }
        Ok(())
    }

    async fn get_or_create_conversation(
        &self,
        key: &ConversationKey,
        participant_username: Option<&str>,
    ) -> Result<Conversation, StoreError> {
        // Upsert so concurrent first contacts converge on one row.
        let row = sqlx::query_as::<_, ConversationRow>(&format!(
            r"
            INSERT INTO conversations (id, workspace_id, platform, participant_id, participant_username)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (workspace_id, platform, participant_id)
            DO UPDATE SET participant_username =
                COALESCE(EXCLUDED.participant_username, conversations.participant_username)
            RETURNING {CONVERSATION_COLUMNS}
            "
        ))
        .bind(Uuid::now_v7())
        .bind(key.workspace_id)
        .bind(key.platform.as_str())
        .bind(&key.participant_id)
        .bind(participant_username)
        .fetch_one(&self.pool)
        .await?;
        row.try_into()
    }

    async fn get_conversation(&self, id: Uuid) -> Result<Option<Conversation>, StoreError> {
        sqlx::query_as::<_, ConversationRow>(&format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .map(Conversation::try_from)
        .transpose()
    }

    async fn append_message(
        &self,
        conversation_id: Uuid,
        message: NewMessage,
    ) -> Result<Message, StoreError> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let bumped = sqlx::query(
            r"
            UPDATE conversations
            SET message_count = message_count + 1,
                last_message_at = $2,
                is_active = is_active OR $3
            WHERE id = $1
            ",
        )
        .bind(conversation_id)
        .bind(now)
        .bind(message.sender == Sender::User)
        .execute(&mut *tx)
        .await?;
        if bumped.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                entity: "conversation",
                id: conversation_id,
            });
        }

        let row = sqlx::query_as::<_, MessageRow>(&format!(
            r"
            INSERT INTO messages
                (id, conversation_id, sender, content, message_type, sentiment, topics,
                 ai_response, automation_rule_id, external_id, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING {MESSAGE_COLUMNS}
            "
        ))
        .bind(Uuid::now_v7())
        .bind(conversation_id)
        .bind(message.sender.as_str())
        .bind(&message.content)
        .bind(message.message_type.as_str())
        .bind(message.sentiment.map(|s| s.as_str()))
        .bind(&message.topics)
        .bind(message.ai_response)
        .bind(message.automation_rule_id)
        .bind(&message.external_id)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        row.try_into()
    }

    async fn recent_messages(
        &self,
        conversation_id: Uuid,
        limit: usize,
    ) -> Result<Vec<Message>, StoreError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        sqlx::query_as::<_, MessageRow>(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE conversation_id = $1 \
             ORDER BY created_at DESC, id DESC LIMIT $2"
        ))
        .bind(conversation_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(Message::try_from)
        .collect()
    }

    async fn record_context(
        &self,
        conversation_id: Uuid,
        fact: NewContextFact,
    ) -> Result<ContextFact, StoreError> {
        let row = sqlx::query_as::<_, FactRow>(&format!(
            r"
            INSERT INTO context_facts
                (id, conversation_id, context_type, context_value, confidence, extracted_at, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {FACT_COLUMNS}
            "
        ))
        .bind(Uuid::now_v7())
        .bind(conversation_id)
        .bind(&fact.context_type)
        .bind(&fact.context_value)
        .bind(i16::from(fact.confidence))
        .bind(fact.extracted_at)
        .bind(fact.expires_at)
        .fetch_one(&self.pool)
        .await?;
        row.try_into()
    }

    async fn active_context(
        &self,
        conversation_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Vec<ContextFact>, StoreError> {
        sqlx::query_as::<_, FactRow>(&format!(
            "SELECT {FACT_COLUMNS} FROM context_facts \
             WHERE conversation_id = $1 AND (expires_at IS NULL OR expires_at > $2) \
             ORDER BY extracted_at DESC, id DESC"
        ))
        .bind(conversation_id)
        .bind(now)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(ContextFact::try_from)
        .collect()
    }

    async fn conversation_stats(
        &self,
        workspace_id: Uuid,
        dormant_before: DateTime<Utc>,
    ) -> Result<ConversationStats, StoreError> {
        let (total, active, messages) = sqlx::query_as::<_, (i64, i64, i64)>(
            r"
            SELECT
                COUNT(*),
                COUNT(*) FILTER (
                    WHERE is_active AND COALESCE(last_message_at, created_at) >= $2
                ),
                COALESCE(SUM(message_count), 0)::BIGINT
            FROM conversations
            WHERE workspace_id = $1
            ",
        )
        .bind(workspace_id)
        .bind(dormant_before)
        .fetch_one(&self.pool)
        .await?;

        Ok(ConversationStats {
            total,
            active,
            dormant: total - active,
            messages,
        })
    }

    async fn delete_expired_context(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        self.purge_in_batches(
            "DELETE FROM context_facts WHERE id IN (\
                 SELECT id FROM context_facts WHERE expires_at < $1 LIMIT $2\
             )",
            now,
        )
        .await
    }

    async fn prune_messages(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        self.purge_in_batches(
            "DELETE FROM messages WHERE id IN (\
                 SELECT id FROM messages WHERE created_at < $1 LIMIT $2\
             )",
            cutoff,
        )
        .await
    }

    async fn mark_dormant(&self, inactive_since: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query(
            r"
            UPDATE conversations SET is_active = FALSE
            WHERE is_active AND COALESCE(last_message_at, created_at) < $1
            ",
        )
        .bind(inactive_since)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}
