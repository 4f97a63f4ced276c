//! Normalized Inbound Events
//!
//! Providers explode a delivery into a list of these. Each one is routed
//! independently by `(provider, kind)`.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Route key for platform comment changes.
pub const KIND_COMMENTS: &str = "comments";
/// Route key for platform mention changes.
pub const KIND_MENTIONS: &str = "mentions";
/// Route key for periodic story insight changes.
pub const KIND_STORY_INSIGHTS: &str = "story_insights";
/// Route key for direct messages.
pub const KIND_MESSAGES: &str = "messages";
/// Route key for replies to a story.
pub const KIND_STORY_REPLIES: &str = "story_replies";

/// Billing event types we act on.
pub const BILLING_EVENT_TYPES: &[&str] = &[
    "checkout.session.completed",
    "customer.subscription.created",
    "customer.subscription.updated",
    "customer.subscription.deleted",
    "invoice.paid",
    "invoice.payment_failed",
];

/// One discrete sub-event of a webhook delivery.
#[derive(Debug, Clone, Serialize)]
pub struct InboundEvent {
    pub provider: &'static str,
    /// Provider-assigned id used for delivery dedup.
    pub event_id: String,
    /// Business account that received the event, when the provider has one.
    pub account_id: Option<String>,
    pub occurred_at: DateTime<Utc>,
    /// Field name or billing event type; the routing key.
    pub kind: String,
    pub payload: EventPayload,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    Comment(CommentEvent),
    Mention(MentionEvent),
    DirectMessage(DirectMessageEvent),
    StoryReply(StoryReplyEvent),
    StoryInsights(StoryInsightsEvent),
    Billing(BillingEvent),
    /// A field we do not model. Kept for logging only.
    Unrecognized(serde_json::Value),
}

#[derive(Debug, Clone, Serialize)]
pub struct CommentEvent {
    pub comment_id: String,
    pub media_id: Option<String>,
    pub from_id: String,
    pub from_username: Option<String>,
    pub text: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct MentionEvent {
    pub media_id: String,
    pub comment_id: Option<String>,
    pub from_id: Option<String>,
    pub from_username: Option<String>,
    pub text: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DirectMessageEvent {
    pub message_id: String,
    pub sender_id: String,
    pub text: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct StoryReplyEvent {
    pub message_id: String,
    pub sender_id: String,
    pub story_id: String,
    pub text: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct StoryInsightsEvent {
    pub media_id: String,
    /// Numeric metrics as delivered (impressions, reach, exits, ...).
    pub metrics: std::collections::BTreeMap<String, i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BillingEvent {
    pub event_type: String,
    pub object_id: Option<String>,
    pub customer_id: Option<String>,
    pub livemode: bool,
}
