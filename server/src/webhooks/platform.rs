//! Social Platform Provider
//!
//! Graph-style deliveries: `{object, entry: [{id, time, changes[], messaging[]}]}`.
//! `changes` carry comments, mentions and story insights; `messaging` carries
//! direct messages and story replies.

use std::collections::BTreeMap;

use axum::http::HeaderMap;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::warn;

use super::error::WebhookError;
use super::events::{
    CommentEvent, DirectMessageEvent, EventPayload, InboundEvent, MentionEvent, StoryInsightsEvent,
    StoryReplyEvent, KIND_COMMENTS, KIND_MENTIONS, KIND_MESSAGES, KIND_STORY_INSIGHTS,
    KIND_STORY_REPLIES,
};
use super::provider::{HandshakeQuery, WebhookProvider};
use super::signing::{constant_time_eq, verify_platform_signature};
use crate::conversations::types::Platform;

/// Header carrying `sha256=<hex>`.
pub const PLATFORM_SIGNATURE_HEADER: &str = "x-hub-signature-256";

/// Kind assigned to messaging items that are not messages (reads, reactions, ...).
const KIND_MESSAGING_OTHER: &str = "messaging_event";

#[derive(Debug, Deserialize)]
struct Envelope {
    object: String,
    entry: Vec<Entry>,
}

#[derive(Debug, Deserialize)]
struct Entry {
    id: String,
    time: i64,
    #[serde(default)]
    changes: Vec<Change>,
    #[serde(default)]
    messaging: Vec<Messaging>,
}

#[derive(Debug, Deserialize)]
struct Change {
    field: String,
    value: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct Party {
    id: String,
}

#[derive(Debug, Deserialize)]
struct Author {
    id: String,
    username: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MediaRef {
    id: String,
}

#[derive(Debug, Deserialize)]
struct CommentValue {
    id: String,
    text: String,
    from: Author,
    media: Option<MediaRef>,
}

#[derive(Debug, Deserialize)]
struct MentionValue {
    media_id: String,
    comment_id: Option<String>,
    text: Option<String>,
    from: Option<Author>,
}

#[derive(Debug, Deserialize)]
struct InsightsValue {
    media_id: String,
    #[serde(flatten)]
    metrics: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct Messaging {
    sender: Party,
    recipient: Party,
    timestamp: i64,
    message: Option<MessagingMessage>,
}

#[derive(Debug, Deserialize)]
struct MessagingMessage {
    mid: String,
    text: Option<String>,
    #[serde(default)]
    is_echo: bool,
    reply_to: Option<ReplyTo>,
}

#[derive(Debug, Deserialize)]
struct ReplyTo {
    story: Option<StoryRef>,
}

#[derive(Debug, Deserialize)]
struct StoryRef {
    id: String,
}

/// Platform timestamps arrive in seconds on changes and milliseconds on messaging.
fn timestamp_to_utc(raw: i64) -> DateTime<Utc> {
    let parsed = if raw > 100_000_000_000 {
        DateTime::from_timestamp_millis(raw)
    } else {
        DateTime::from_timestamp(raw, 0)
    };
    parsed.unwrap_or_else(Utc::now)
}

/// Event id for changes that carry no id of their own.
fn derived_event_id(entry_id: &str, field: &str, time: i64, discriminator: Option<&str>) -> String {
    match discriminator {
        Some(d) => format!("{entry_id}:{field}:{time}:{d}"),
        None => format!("{entry_id}:{field}:{time}"),
    }
}

/// Instagram or Facebook page deliveries.
pub struct PlatformProvider {
    platform: Platform,
    app_secret: Option<String>,
    verify_token: Option<String>,
    /// When false, a missing secret or header is accepted (development only).
    enforce_signatures: bool,
}

impl PlatformProvider {
    pub fn new(
        platform: Platform,
        app_secret: Option<String>,
        verify_token: Option<String>,
        enforce_signatures: bool,
    ) -> Self {
        Self {
            platform,
            app_secret,
            verify_token,
            enforce_signatures,
        }
    }

    const fn expected_object(&self) -> &'static str {
        match self.platform {
            Platform::Instagram => "instagram",
            Platform::Facebook => "page",
        }
    }

    fn decode<T: serde::de::DeserializeOwned>(
        &self,
        field: &str,
        value: serde_json::Value,
    ) -> Result<T, WebhookError> {
        serde_json::from_value(value)
            .map_err(|e| WebhookError::schema(self.id(), format!("{field}: {e}")))
    }

    fn parse_change(
        &self,
        entry: &Entry,
        change: Change,
    ) -> Result<Option<InboundEvent>, WebhookError> {
        let occurred_at = timestamp_to_utc(entry.time);
        let (event_id, payload) = match change.field.as_str() {
            KIND_COMMENTS => {
                let value: CommentValue = self.decode(KIND_COMMENTS, change.value)?;
                // Our own replies come back as comments
                if value.from.id == entry.id {
                    return Ok(None);
                }
                (
                    value.id.clone(),
                    EventPayload::Comment(CommentEvent {
                        comment_id: value.id,
                        media_id: value.media.map(|m| m.id),
                        from_id: value.from.id,
                        from_username: value.from.username,
                        text: value.text,
                    }),
                )
            }
            KIND_MENTIONS => {
                let value: MentionValue = self.decode(KIND_MENTIONS, change.value)?;
                let event_id = value.comment_id.clone().unwrap_or_else(|| {
                    derived_event_id(&entry.id, KIND_MENTIONS, entry.time, Some(&value.media_id))
                });
                let (from_id, from_username) = value
                    .from
                    .map_or((None, None), |a| (Some(a.id), a.username));
                (
                    event_id,
                    EventPayload::Mention(MentionEvent {
                        media_id: value.media_id,
                        comment_id: value.comment_id,
                        from_id,
                        from_username,
                        text: value.text.unwrap_or_default(),
                    }),
                )
            }
            KIND_STORY_INSIGHTS => {
                let value: InsightsValue = self.decode(KIND_STORY_INSIGHTS, change.value)?;
                let metrics = value
                    .metrics
                    .into_iter()
                    .filter_map(|(k, v)| v.as_i64().map(|n| (k, n)))
                    .collect();
                (
                    derived_event_id(
                        &entry.id,
                        KIND_STORY_INSIGHTS,
                        entry.time,
                        Some(&value.media_id),
                    ),
                    EventPayload::StoryInsights(StoryInsightsEvent {
                        media_id: value.media_id,
                        metrics,
                    }),
                )
            }
            other => (
                derived_event_id(&entry.id, other, entry.time, None),
                EventPayload::Unrecognized(change.value),
            ),
        };

        Ok(Some(InboundEvent {
            provider: self.id(),
            event_id,
            account_id: Some(entry.id.clone()),
            occurred_at,
            kind: change.field,
            payload,
        }))
    }

    fn parse_messaging(&self, entry: &Entry, item: Messaging) -> Option<InboundEvent> {
        let occurred_at = timestamp_to_utc(item.timestamp);
        let Some(message) = item.message else {
            return Some(InboundEvent {
                provider: self.id(),
                event_id: derived_event_id(
                    &entry.id,
                    KIND_MESSAGING_OTHER,
                    item.timestamp,
                    Some(&item.sender.id),
                ),
                account_id: Some(item.recipient.id),
                occurred_at,
                kind: KIND_MESSAGING_OTHER.to_string(),
                payload: EventPayload::Unrecognized(serde_json::Value::Null),
            });
        };
        // Messages sent by the business account itself
        if message.is_echo {
            return None;
        }

        let text = message.text.unwrap_or_default();
        let story = message.reply_to.and_then(|r| r.story);
        let (kind, payload) = match story {
            Some(story) => (
                KIND_STORY_REPLIES,
                EventPayload::StoryReply(StoryReplyEvent {
                    message_id: message.mid.clone(),
                    sender_id: item.sender.id,
                    story_id: story.id,
                    text,
                }),
            ),
            None => (
                KIND_MESSAGES,
                EventPayload::DirectMessage(DirectMessageEvent {
                    message_id: message.mid.clone(),
                    sender_id: item.sender.id,
                    text,
                }),
            ),
        };

        Some(InboundEvent {
            provider: self.id(),
            event_id: message.mid,
            account_id: Some(item.recipient.id),
            occurred_at,
            kind: kind.to_string(),
            payload,
        })
    }
}

impl WebhookProvider for PlatformProvider {
    fn id(&self) -> &'static str {
        self.platform.as_str()
    }

    fn verify(&self, headers: &HeaderMap, body: &[u8]) -> Result<(), WebhookError> {
        let header = headers
            .get(PLATFORM_SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok());

        match (self.app_secret.as_deref(), header) {
            (Some(secret), Some(header)) => {
                if verify_platform_signature(secret, body, header) {
                    Ok(())
                } else {
                    Err(WebhookError::signature(self.id(), "signature mismatch"))
                }
            }
            _ if !self.enforce_signatures => {
                warn!(
                    provider = self.id(),
                    "Accepting unsigned webhook outside production"
                );
                Ok(())
            }
            (None, _) => Err(WebhookError::signature(self.id(), "app secret not configured")),
            (Some(_), None) => Err(WebhookError::signature(self.id(), "missing signature header")),
        }
    }

    fn parse(&self, body: &[u8]) -> Result<Vec<InboundEvent>, WebhookError> {
        let envelope: Envelope = serde_json::from_slice(body)
            .map_err(|e| WebhookError::schema(self.id(), e.to_string()))?;
        if envelope.object != self.expected_object() {
            return Err(WebhookError::schema(
                self.id(),
                format!(
                    "expected object {:?}, got {:?}",
                    self.expected_object(),
                    envelope.object
                ),
            ));
        }

        let mut events = Vec::new();
        for mut entry in envelope.entry {
            let changes = std::mem::take(&mut entry.changes);
            for change in changes {
                events.extend(self.parse_change(&entry, change)?);
            }
            let messaging = std::mem::take(&mut entry.messaging);
            events.extend(
                messaging
                    .into_iter()
                    .filter_map(|item| self.parse_messaging(&entry, item)),
            );
        }
        Ok(events)
    }

    fn verify_subscription(&self, query: &HandshakeQuery) -> Result<String, WebhookError> {
        if query.mode.as_deref() != Some("subscribe") {
            return Err(WebhookError::InvalidMode);
        }
        let expected = self
            .verify_token
            .as_deref()
            .ok_or(WebhookError::VerifyTokenMismatch)?;
        let provided = query.verify_token.as_deref().unwrap_or_default();
        if !constant_time_eq(expected.as_bytes(), provided.as_bytes()) {
            return Err(WebhookError::VerifyTokenMismatch);
        }
        query
            .challenge
            .clone()
            .filter(|c| !c.is_empty())
            .ok_or(WebhookError::MissingChallenge)
    }
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;
    use serde_json::json;

    use super::*;
    use crate::webhooks::signing::sign_payload;

    const SECRET: &str = "app-secret";

    fn provider(enforce: bool) -> PlatformProvider {
        PlatformProvider::new(
            Platform::Instagram,
            Some(SECRET.into()),
            Some("verify-me".into()),
            enforce,
        )
    }

    fn signed_headers(body: &[u8]) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            PLATFORM_SIGNATURE_HEADER,
            HeaderValue::from_str(&format!("sha256={}", sign_payload(SECRET, body))).unwrap(),
        );
        headers
    }

    fn parse(value: serde_json::Value) -> Result<Vec<InboundEvent>, WebhookError> {
        provider(true).parse(value.to_string().as_bytes())
    }

    #[test]
    fn verifies_signed_body() {
        let body = br#"{"object":"instagram","entry":[]}"#;
        assert!(provider(true).verify(&signed_headers(body), body).is_ok());

        let mut tampered = body.to_vec();
        tampered[3] ^= 0x01;
        assert!(matches!(
            provider(true).verify(&signed_headers(body), &tampered),
            Err(WebhookError::SignatureInvalid { .. })
        ));
    }

    #[test]
    fn missing_header_only_passes_outside_production() {
        let body = b"{}";
        assert!(provider(false).verify(&HeaderMap::new(), body).is_ok());
        assert!(provider(true).verify(&HeaderMap::new(), body).is_err());

        let unconfigured = PlatformProvider::new(Platform::Instagram, None, None, true);
        assert!(unconfigured.verify(&signed_headers(body), body).is_err());
    }

    #[test]
    fn wrong_signature_fails_even_in_development() {
        let body = b"{}";
        let mut headers = HeaderMap::new();
        headers.insert(PLATFORM_SIGNATURE_HEADER, HeaderValue::from_static("sha256=00"));
        assert!(provider(false).verify(&headers, body).is_err());
    }

    #[test]
    fn explodes_changes_and_messaging() {
        let events = parse(json!({
            "object": "instagram",
            "entry": [{
                "id": "biz-1",
                "time": 1_700_000_000,
                "changes": [
                    {"field": "comments", "value": {
                        "id": "c-1", "text": "Is there a sale?",
                        "from": {"id": "u-1", "username": "alice"},
                        "media": {"id": "m-1"}
                    }},
                    {"field": "mentions", "value": {"media_id": "m-2", "comment_id": "c-2"}},
                    {"field": "story_insights", "value": {
                        "media_id": "s-1", "impressions": 120, "reach": 80, "note": "x"
                    }},
                    {"field": "live_comments", "value": {"id": "lc-1"}}
                ],
                "messaging": [
                    {"sender": {"id": "u-2"}, "recipient": {"id": "biz-1"}, "timestamp": 1_700_000_000_123_i64,
                     "message": {"mid": "mid-1", "text": "price?"}},
                    {"sender": {"id": "u-3"}, "recipient": {"id": "biz-1"}, "timestamp": 1_700_000_000_456_i64,
                     "message": {"mid": "mid-2", "text": "wow", "reply_to": {"story": {"id": "s-9"}}}},
                    {"sender": {"id": "biz-1"}, "recipient": {"id": "u-2"}, "timestamp": 1_700_000_000_789_i64,
                     "message": {"mid": "mid-3", "text": "thanks!", "is_echo": true}}
                ]
            }]
        }))
        .unwrap();

        let kinds: Vec<&str> = events.iter().map(|e| e.kind.as_str()).collect();
        assert_eq!(
            kinds,
            vec![
                "comments",
                "mentions",
                "story_insights",
                "live_comments",
                "messages",
                "story_replies",
            ]
        );

        assert_eq!(events[0].event_id, "c-1");
        assert_eq!(events[0].account_id.as_deref(), Some("biz-1"));
        match &events[0].payload {
            EventPayload::Comment(c) => {
                assert_eq!(c.text, "Is there a sale?");
                assert_eq!(c.media_id.as_deref(), Some("m-1"));
                assert_eq!(c.from_username.as_deref(), Some("alice"));
            }
            other => panic!("unexpected payload {other:?}"),
        }
        assert_eq!(events[1].event_id, "c-2");
        match &events[2].payload {
            EventPayload::StoryInsights(i) => {
                assert_eq!(i.metrics.get("impressions"), Some(&120));
                assert!(!i.metrics.contains_key("note"));
            }
            other => panic!("unexpected payload {other:?}"),
        }
        assert!(matches!(events[3].payload, EventPayload::Unrecognized(_)));
        assert_eq!(events[4].event_id, "mid-1");
        assert_eq!(events[4].occurred_at.timestamp_millis(), 1_700_000_000_123);
        assert!(matches!(&events[5].payload, EventPayload::StoryReply(r) if r.story_id == "s-9"));
    }

    #[test]
    fn own_comments_are_dropped() {
        let events = parse(json!({
            "object": "instagram",
            "entry": [{"id": "biz-1", "time": 1, "changes": [
                {"field": "comments", "value": {"id": "c", "text": "reply", "from": {"id": "biz-1"}}}
            ]}]
        }))
        .unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn structural_mismatch_is_rejected() {
        for bad in [
            json!({"object": "instagram"}),
            json!({"object": "page", "entry": []}),
            json!({"object": "instagram", "entry": [{"id": "b", "time": "yesterday"}]}),
            json!({"object": "instagram", "entry": [{"id": "b", "time": 1, "changes": [
                {"field": "comments", "value": {"id": "c", "text": "no author"}}
            ]}]}),
        ] {
            assert!(
                matches!(parse(bad.clone()), Err(WebhookError::SchemaInvalid { .. })),
                "accepted {bad}"
            );
        }
        assert!(provider(true).parse(b"not json").is_err());
    }

    #[test]
    fn subscription_handshake() {
        let p = provider(true);
        let query = |mode: &str, token: &str, challenge: Option<&str>| HandshakeQuery {
            mode: Some(mode.into()),
            verify_token: Some(token.into()),
            challenge: challenge.map(String::from),
        };

        assert_eq!(
            p.verify_subscription(&query("subscribe", "verify-me", Some("42"))).unwrap(),
            "42"
        );
        assert!(matches!(
            p.verify_subscription(&query("subscribe", "nope", Some("42"))),
            Err(WebhookError::VerifyTokenMismatch)
        ));
        assert!(matches!(
            p.verify_subscription(&query("unsubscribe", "verify-me", Some("42"))),
            Err(WebhookError::InvalidMode)
        ));
        assert!(matches!(
            p.verify_subscription(&query("subscribe", "verify-me", None)),
            Err(WebhookError::MissingChallenge)
        ));
    }
}
