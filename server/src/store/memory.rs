//! In-memory `Store`.
//!
//! Every mutation of a conversation (counter bump, message push, fact push)
//! happens while holding that conversation's `DashMap` entry, which makes each
//! write atomic with respect to concurrent deliveries.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use uuid::Uuid;

use super::{Store, StoreError};
use crate::automation::types::{RuleType, StoredRule};
use crate::conversations::types::{
    ContextFact, Conversation, ConversationKey, ConversationStats, Message, NewContextFact,
    NewMessage, Platform, Sender,
};

struct ConversationEntry {
    conversation: Conversation,
    messages: Vec<Message>,
    facts: Vec<ContextFact>,
}

/// Process-local store backed by concurrent hash maps.
#[derive(Default)]
pub struct MemoryStore {
    accounts: DashMap<(Platform, String), Uuid>,
    /// Workspace id -> rules in insertion order.
    rules: DashMap<Uuid, Vec<StoredRule>>,
    /// Rule id -> workspace id.
    rule_workspaces: DashMap<Uuid, Uuid>,
    conversation_index: DashMap<ConversationKey, Uuid>,
    conversations: DashMap<Uuid, ConversationEntry>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn missing_conversation(id: Uuid) -> StoreError {
        StoreError::NotFound {
            entity: "conversation",
            id,
        }
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn connect_account(
        &self,
        workspace_id: Uuid,
        platform: Platform,
        account_id: &str,
    ) -> Result<(), StoreError> {
        self.accounts
            .insert((platform, account_id.to_string()), workspace_id);
        Ok(())
    }

    async fn resolve_workspace(
        &self,
        platform: Platform,
        account_id: &str,
    ) -> Result<Option<Uuid>, StoreError> {
        Ok(self
            .accounts
            .get(&(platform, account_id.to_string()))
            .map(|entry| *entry))
    }

    async fn insert_rule(&self, rule: &StoredRule) -> Result<(), StoreError> {
        self.rule_workspaces.insert(rule.id, rule.workspace_id);
        self.rules
            .entry(rule.workspace_id)
            .or_default()
            .push(rule.clone());
        Ok(())
    }

    async fn list_rules(&self, workspace_id: Uuid) -> Result<Vec<StoredRule>, StoreError> {
        Ok(self
            .rules
            .get(&workspace_id)
            .map(|rules| rules.clone())
            .unwrap_or_default())
    }

    async fn active_rules(
        &self,
        workspace_id: Uuid,
        rule_type: RuleType,
    ) -> Result<Vec<StoredRule>, StoreError> {
        Ok(self
            .rules
            .get(&workspace_id)
            .map(|rules| {
                rules
                    .iter()
                    .filter(|r| r.is_active && r.rule_type == rule_type.as_str())
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn record_rule_run(
        &self,
        rule_id: Uuid,
        last_run: DateTime<Utc>,
        next_run: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        let not_found = StoreError::NotFound {
            entity: "automation rule",
            id: rule_id,
        };
        let Some(workspace_id) = self.rule_workspaces.get(&rule_id).map(|w| *w) else {
            return Err(not_found);
        };
        let mut rules = self.rules.get_mut(&workspace_id).ok_or(not_found)?;
        if let Some(rule) = rules.iter_mut().find(|r| r.id == rule_id) {
            rule.last_run = Some(last_run);
            if next_run.is_some() {
                rule.next_run = next_run;
            }
            return Ok(());
        }
        Err(StoreError::NotFound {
            entity: "automation rule",
            id: rule_id,
        })
    }

    async fn get_or_create_conversation(
        &self,
        key: &ConversationKey,
        participant_username: Option<&str>,
    ) -> Result<Conversation, StoreError> {
        let now = Utc::now();
        let id = *self
            .conversation_index
            .entry(key.clone())
            .or_insert_with(|| {
                let conversation = Conversation::new(key, participant_username, now);
                let id = conversation.id;
                self.conversations.insert(
                    id,
                    ConversationEntry {
                        conversation,
                        messages: Vec::new(),
                        facts: Vec::new(),
                    },
                );
                id
            });

        let mut entry = self
            .conversations
            .get_mut(&id)
            .ok_or_else(|| Self::missing_conversation(id))?;
        if let Some(username) = participant_username {
            entry.conversation.participant_username = Some(username.to_string());
        }
        Ok(entry.conversation.clone())
    }

    async fn get_conversation(&self, id: Uuid) -> Result<Option<Conversation>, StoreError> {
        Ok(self
            .conversations
            .get(&id)
            .map(|entry| entry.conversation.clone()))
    }

    async fn append_message(
        &self,
        conversation_id: Uuid,
        message: NewMessage,
    ) -> Result<Message, StoreError> {
        let now = Utc::now();
        let mut entry = self
            .conversations
            .get_mut(&conversation_id)
            .ok_or_else(|| Self::missing_conversation(conversation_id))?;

        let message = message.into_message(conversation_id, now);
        entry.conversation.message_count += 1;
        entry.conversation.last_message_at = Some(now);
        if message.sender == Sender::User {
            entry.conversation.is_active = true;
        }
        entry.messages.push(message.clone());
        Ok(message)
    }

    async fn recent_messages(
        &self,
        conversation_id: Uuid,
        limit: usize,
    ) -> Result<Vec<Message>, StoreError> {
        let entry = self
            .conversations
            .get(&conversation_id)
            .ok_or_else(|| Self::missing_conversation(conversation_id))?;
        Ok(entry.messages.iter().rev().take(limit).cloned().collect())
    }

    async fn record_context(
        &self,
        conversation_id: Uuid,
        fact: NewContextFact,
    ) -> Result<ContextFact, StoreError> {
        let mut entry = self
            .conversations
            .get_mut(&conversation_id)
            .ok_or_else(|| Self::missing_conversation(conversation_id))?;
        let fact = fact.into_fact(conversation_id);
        entry.facts.push(fact.clone());
        Ok(fact)
    }

    async fn active_context(
        &self,
        conversation_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Vec<ContextFact>, StoreError> {
        let entry = self
            .conversations
            .get(&conversation_id)
            .ok_or_else(|| Self::missing_conversation(conversation_id))?;
        // Newest insert first among equal timestamps, matching the postgres ordering.
        let mut facts: Vec<ContextFact> = entry
            .facts
            .iter()
            .rev()
            .filter(|f| f.is_active_at(now))
            .cloned()
            .collect();
        facts.sort_by(|a, b| b.extracted_at.cmp(&a.extracted_at));
        Ok(facts)
    }

    async fn conversation_stats(
        &self,
        workspace_id: Uuid,
        dormant_before: DateTime<Utc>,
    ) -> Result<ConversationStats, StoreError> {
        let mut stats = ConversationStats {
            total: 0,
            active: 0,
            dormant: 0,
            messages: 0,
        };
        for entry in &self.conversations {
            let c = &entry.conversation;
            if c.workspace_id != workspace_id {
                continue;
            }
            stats.total += 1;
            stats.messages += c.message_count;
            if c.is_active && c.last_activity() >= dormant_before {
                stats.active += 1;
            }
        }
        stats.dormant = stats.total - stats.active;
        Ok(stats)
    }

    async fn delete_expired_context(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut deleted = 0u64;
        for mut entry in self.conversations.iter_mut() {
            let before = entry.facts.len();
            entry
                .facts
                .retain(|f| f.expires_at.map_or(true, |expires| expires >= now));
            deleted += (before - entry.facts.len()) as u64;
        }
        Ok(deleted)
    }

    async fn prune_messages(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut deleted = 0u64;
        for mut entry in self.conversations.iter_mut() {
            let before = entry.messages.len();
            entry.messages.retain(|m| m.created_at >= cutoff);
            deleted += (before - entry.messages.len()) as u64;
        }
        Ok(deleted)
    }

    async fn mark_dormant(&self, inactive_since: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut flagged = 0u64;
        for mut entry in self.conversations.iter_mut() {
            let c = &mut entry.conversation;
            if c.is_active && c.last_activity() < inactive_since {
                c.is_active = false;
                flagged += 1;
            }
        }
        Ok(flagged)
    }
}
