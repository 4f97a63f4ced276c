//! Conversation Memory Types
//!
//! Conversations, their append-only messages, and time-bounded context facts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Social platform a conversation lives on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    Instagram,
    Facebook,
}

impl Platform {
    /// Parse from the stored string form.
    pub fn parse_str(s: &str) -> Option<Self> {
        match s {
            "instagram" => Some(Self::Instagram),
            "facebook" => Some(Self::Facebook),
            _ => None,
        }
    }

    /// Stored string form.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Instagram => "instagram",
            Self::Facebook => "facebook",
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unique identity of a conversation: one per participant per platform per workspace.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConversationKey {
    pub workspace_id: Uuid,
    pub platform: Platform,
    pub participant_id: String,
}

impl ConversationKey {
    pub fn new(workspace_id: Uuid, platform: Platform, participant_id: impl Into<String>) -> Self {
        Self {
            workspace_id,
            platform,
            participant_id: participant_id.into(),
        }
    }
}

/// A conversation with a single participant.
#[derive(Debug, Clone, Serialize)]
pub struct Conversation {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub platform: Platform,
    pub participant_id: String,
    pub participant_username: Option<String>,
    pub last_message_at: Option<DateTime<Utc>>,
    /// Monotonic; only ever incremented by `append_message`.
    pub message_count: i64,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl Conversation {
    /// Fresh conversation for a first contact.
    pub fn new(
        key: &ConversationKey,
        participant_username: Option<&str>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            workspace_id: key.workspace_id,
            platform: key.platform,
            participant_id: key.participant_id.clone(),
            participant_username: participant_username.map(String::from),
            last_message_at: None,
            message_count: 0,
            is_active: true,
            created_at: now,
        }
    }

    /// Most recent activity: the last message, or creation time when empty.
    pub fn last_activity(&self) -> DateTime<Utc> {
        self.last_message_at.unwrap_or(self.created_at)
    }
}

/// Who authored a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Ai,
}

impl Sender {
    pub fn parse_str(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Self::User),
            "ai" => Some(Self::Ai),
            _ => None,
        }
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Ai => "ai",
        }
    }
}

/// Kind of content a message carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Comment,
    DirectMessage,
    StoryReply,
    Mention,
}

impl MessageType {
    pub fn parse_str(s: &str) -> Option<Self> {
        match s {
            "comment" => Some(Self::Comment),
            "direct_message" => Some(Self::DirectMessage),
            "story_reply" => Some(Self::StoryReply),
            "mention" => Some(Self::Mention),
            _ => None,
        }
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Comment => "comment",
            Self::DirectMessage => "direct_message",
            Self::StoryReply => "story_reply",
            Self::Mention => "mention",
        }
    }
}

/// Coarse sentiment of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    Positive,
    Neutral,
    Negative,
}

impl Sentiment {
    pub fn parse_str(s: &str) -> Option<Self> {
        match s {
            "positive" => Some(Self::Positive),
            "neutral" => Some(Self::Neutral),
            "negative" => Some(Self::Negative),
            _ => None,
        }
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Positive => "positive",
            Self::Neutral => "neutral",
            Self::Negative => "negative",
        }
    }
}

/// A stored message. Append-only.
#[derive(Debug, Clone, Serialize)]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender: Sender,
    pub content: String,
    pub message_type: MessageType,
    pub sentiment: Option<Sentiment>,
    pub topics: Vec<String>,
    pub ai_response: bool,
    pub automation_rule_id: Option<Uuid>,
    /// Platform id of the comment/message, when known.
    pub external_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Message to append to a conversation.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub sender: Sender,
    pub content: String,
    pub message_type: MessageType,
    pub sentiment: Option<Sentiment>,
    pub topics: Vec<String>,
    pub ai_response: bool,
    pub automation_rule_id: Option<Uuid>,
    pub external_id: Option<String>,
}

impl NewMessage {
    /// Inbound message from the participant.
    pub fn inbound(content: impl Into<String>, message_type: MessageType) -> Self {
        Self {
            sender: Sender::User,
            content: content.into(),
            message_type,
            sentiment: None,
            topics: Vec::new(),
            ai_response: false,
            automation_rule_id: None,
            external_id: None,
        }
    }

    /// Automated reply produced by a rule.
    pub fn automated(content: impl Into<String>, message_type: MessageType, rule_id: Uuid) -> Self {
        Self {
            sender: Sender::Ai,
            content: content.into(),
            message_type,
            sentiment: None,
            topics: Vec::new(),
            ai_response: true,
            automation_rule_id: Some(rule_id),
            external_id: None,
        }
    }

    #[must_use]
    pub fn with_external_id(mut self, external_id: Option<String>) -> Self {
        self.external_id = external_id;
        self
    }

    pub(crate) fn into_message(self, conversation_id: Uuid, now: DateTime<Utc>) -> Message {
        Message {
            id: Uuid::now_v7(),
            conversation_id,
            sender: self.sender,
            content: self.content,
            message_type: self.message_type,
            sentiment: self.sentiment,
            topics: self.topics,
            ai_response: self.ai_response,
            automation_rule_id: self.automation_rule_id,
            external_id: self.external_id,
            created_at: now,
        }
    }
}

/// A piece of extracted, time-bounded knowledge about a conversation.
///
/// Facts of the same type accumulate; they are never merged or updated in place.
#[derive(Debug, Clone, Serialize)]
pub struct ContextFact {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub context_type: String,
    pub context_value: String,
    /// 0-100, fixed at extraction.
    pub confidence: u8,
    pub extracted_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl ContextFact {
    /// Whether the fact is still usable at `now`.
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(true, |expires| expires > now)
    }
}

/// Fact to record against a conversation.
#[derive(Debug, Clone)]
pub struct NewContextFact {
    pub context_type: String,
    pub context_value: String,
    pub confidence: u8,
    pub extracted_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl NewContextFact {
    /// Build a fact, clamping confidence into 0-100.
    pub fn new(
        context_type: impl Into<String>,
        context_value: impl Into<String>,
        confidence: u8,
        extracted_at: DateTime<Utc>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            context_type: context_type.into(),
            context_value: context_value.into(),
            confidence: confidence.min(100),
            extracted_at,
            expires_at,
        }
    }

    pub(crate) fn into_fact(self, conversation_id: Uuid) -> ContextFact {
        ContextFact {
            id: Uuid::now_v7(),
            conversation_id,
            context_type: self.context_type,
            context_value: self.context_value,
            confidence: self.confidence,
            extracted_at: self.extracted_at,
            expires_at: self.expires_at,
        }
    }
}

/// Per-workspace conversation statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ConversationStats {
    pub total: i64,
    pub active: i64,
    pub dormant: i64,
    pub messages: i64,
}
