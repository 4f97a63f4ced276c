//! Webhook Event Dispatch
//!
//! Routes each verified sub-event to a typed handler keyed by
//! `(provider, kind)`. Sub-events are independent: a failure in one is logged
//! and does not stop the rest of the batch.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Duration, Utc};
use serde::Serialize;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use super::dedup::DeliveryDedup;
use super::error::WebhookError;
use super::events::{
    EventPayload, InboundEvent, BILLING_EVENT_TYPES, KIND_COMMENTS, KIND_MENTIONS, KIND_MESSAGES,
    KIND_STORY_INSIGHTS, KIND_STORY_REPLIES,
};
use crate::automation::types::{MatchInput, RuleType};
use crate::automation::{ActionExecutor, AutomationError, ExecutionContext, RuleMatcher};
use crate::conversations::analysis::analyze;
use crate::conversations::types::{ConversationKey, MessageType, NewMessage, Platform};
use crate::store::Store;

/// Handler a sub-event is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Route {
    Comment,
    Mention,
    DirectMessage,
    StoryReply,
    StoryInsights,
    Billing,
}

/// Outcome counts for one delivery.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DispatchSummary {
    pub handled: usize,
    pub duplicates: usize,
    pub ignored: usize,
}

/// A participant interaction that may trigger automation.
struct Interaction<'a> {
    participant_id: &'a str,
    participant_username: Option<&'a str>,
    text: &'a str,
    message_type: MessageType,
    rule_type: RuleType,
    media_id: Option<&'a str>,
    reply_target: Option<&'a str>,
}

/// Rule-level failures stay local; storage failures fail the delivery so the
/// provider retries it.
fn escalate(err: AutomationError) -> Result<(), WebhookError> {
    match err {
        AutomationError::Storage(e) => Err(WebhookError::Storage(e)),
        other => {
            warn!(error = %other, "Automation failed for event");
            Ok(())
        }
    }
}

pub struct WebhookDispatcher {
    store: Arc<dyn Store>,
    matcher: RuleMatcher,
    executor: ActionExecutor,
    dedup: DeliveryDedup,
    routes: HashMap<(&'static str, &'static str), Route>,
    context_ttl: Duration,
}

impl WebhookDispatcher {
    pub fn new(
        store: Arc<dyn Store>,
        executor: ActionExecutor,
        dedup: DeliveryDedup,
        context_ttl: Duration,
    ) -> Self {
        let mut routes = HashMap::new();
        for platform in [Platform::Instagram, Platform::Facebook] {
            let provider = platform.as_str();
            routes.insert((provider, KIND_COMMENTS), Route::Comment);
            routes.insert((provider, KIND_MENTIONS), Route::Mention);
            routes.insert((provider, KIND_MESSAGES), Route::DirectMessage);
            routes.insert((provider, KIND_STORY_REPLIES), Route::StoryReply);
            routes.insert((provider, KIND_STORY_INSIGHTS), Route::StoryInsights);
        }
        for event_type in BILLING_EVENT_TYPES {
            routes.insert(("stripe", *event_type), Route::Billing);
        }

        Self {
            matcher: RuleMatcher::new(Arc::clone(&store)),
            store,
            executor,
            dedup,
            routes,
            context_ttl,
        }
    }

    /// Process every sub-event of a verified delivery.
    ///
    /// Returns the first storage failure after the whole batch has been
    /// attempted; failed events are released from dedup so a retry reprocesses them.
    #[instrument(skip(self, events), fields(events = events.len()))]
    pub async fn dispatch(
        &self,
        events: Vec<InboundEvent>,
    ) -> Result<DispatchSummary, WebhookError> {
        let mut summary = DispatchSummary::default();
        let mut first_failure = None;

        for event in events {
            let Some(route) = self
                .routes
                .get(&(event.provider, event.kind.as_str()))
                .copied()
            else {
                debug!(
                    provider = event.provider,
                    kind = %event.kind,
                    "Ignoring unrecognized webhook event"
                );
                summary.ignored += 1;
                continue;
            };

            if !self.dedup.first_sighting(event.provider, &event.event_id).await {
                debug!(
                    provider = event.provider,
                    event_id = %event.event_id,
                    "Skipping duplicate webhook delivery"
                );
                summary.duplicates += 1;
                continue;
            }

            match self.handle(route, &event).await {
                Ok(()) => summary.handled += 1,
                Err(e) => {
                    self.dedup.release(event.provider, &event.event_id).await;
                    error!(
                        provider = event.provider,
                        event_id = %event.event_id,
                        kind = %event.kind,
                        error = %e,
                        "Failed to process webhook event"
                    );
                    first_failure.get_or_insert(e);
                }
            }
        }

        match first_failure {
            Some(e) => Err(e),
            None => Ok(summary),
        }
    }

    #[instrument(
        skip(self, event),
        fields(provider = event.provider, kind = %event.kind, event_id = %event.event_id)
    )]
    async fn handle(&self, route: Route, event: &InboundEvent) -> Result<(), WebhookError> {
        match (route, &event.payload) {
            (Route::Comment, EventPayload::Comment(c)) => {
                self.handle_interaction(
                    event,
                    Interaction {
                        participant_id: &c.from_id,
                        participant_username: c.from_username.as_deref(),
                        text: &c.text,
                        message_type: MessageType::Comment,
                        rule_type: RuleType::CommentDm,
                        media_id: c.media_id.as_deref(),
                        reply_target: Some(&c.comment_id),
                    },
                )
                .await
            }
            (Route::Mention, EventPayload::Mention(m)) => {
                let Some(from_id) = m.from_id.as_deref() else {
                    debug!(
                        media_id = %m.media_id,
                        "Mention without author, nothing to reply to"
                    );
                    return Ok(());
                };
                self.handle_interaction(
                    event,
                    Interaction {
                        participant_id: from_id,
                        participant_username: m.from_username.as_deref(),
                        text: &m.text,
                        message_type: MessageType::Mention,
                        rule_type: RuleType::Mention,
                        media_id: Some(&m.media_id),
                        reply_target: Some(m.comment_id.as_deref().unwrap_or(&m.media_id)),
                    },
                )
                .await
            }
            (Route::DirectMessage, EventPayload::DirectMessage(dm)) => {
                self.handle_interaction(
                    event,
                    Interaction {
                        participant_id: &dm.sender_id,
                        participant_username: None,
                        text: &dm.text,
                        message_type: MessageType::DirectMessage,
                        rule_type: RuleType::Dm,
                        media_id: None,
                        reply_target: None,
                    },
                )
                .await
            }
            (Route::StoryReply, EventPayload::StoryReply(reply)) => {
                self.handle_interaction(
                    event,
                    Interaction {
                        participant_id: &reply.sender_id,
                        participant_username: None,
                        text: &reply.text,
                        message_type: MessageType::StoryReply,
                        rule_type: RuleType::StoryReply,
                        media_id: Some(&reply.story_id),
                        reply_target: None,
                    },
                )
                .await
            }
            (Route::StoryInsights, EventPayload::StoryInsights(insights)) => {
                let Some(workspace_id) = self.resolve_workspace(event).await? else {
                    return Ok(());
                };
                let input = MatchInput {
                    rule_type: RuleType::StoryInsights,
                    text: "",
                    media_id: Some(&insights.media_id),
                };
                match self.matcher.find_match(workspace_id, &input, Utc::now()).await {
                    Ok(Some(rule)) => info!(
                        workspace_id = %workspace_id,
                        rule_id = %rule.id,
                        media_id = %insights.media_id,
                        metrics = ?insights.metrics,
                        "Story insights rule triggered"
                    ),
                    Ok(None) => {}
                    Err(e) => escalate(e)?,
                }
                Ok(())
            }
            (Route::Billing, EventPayload::Billing(billing)) => {
                info!(
                    event_type = %billing.event_type,
                    object_id = ?billing.object_id,
                    customer_id = ?billing.customer_id,
                    livemode = billing.livemode,
                    "Verified billing event"
                );
                Ok(())
            }
            (route, _) => {
                warn!(?route, "Webhook event payload does not fit its route");
                Ok(())
            }
        }
    }

    async fn resolve_workspace(
        &self,
        event: &InboundEvent,
    ) -> Result<Option<Uuid>, WebhookError> {
        let Some(platform) = Platform::parse_str(event.provider) else {
            return Ok(None);
        };
        let Some(account_id) = event.account_id.as_deref() else {
            debug!("Event carries no account id");
            return Ok(None);
        };
        let workspace_id = self.store.resolve_workspace(platform, account_id).await?;
        if workspace_id.is_none() {
            info!(
                platform = %platform,
                account_id,
                "No workspace connected for account, ignoring event"
            );
        }
        Ok(workspace_id)
    }

    /// Extract context, remember the message, then match and execute a rule.
    ///
    /// Facts are written before the message so a failed fact write leaves no
    /// message behind for the provider's retry to append again.
    async fn handle_interaction(
        &self,
        event: &InboundEvent,
        interaction: Interaction<'_>,
    ) -> Result<(), WebhookError> {
        let Some(workspace_id) = self.resolve_workspace(event).await? else {
            return Ok(());
        };
        let (Some(platform), Some(account_id)) = (
            Platform::parse_str(event.provider),
            event.account_id.as_deref(),
        ) else {
            return Ok(());
        };

        let now = Utc::now();
        let key = ConversationKey::new(workspace_id, platform, interaction.participant_id);
        let conversation = self
            .store
            .get_or_create_conversation(&key, interaction.participant_username)
            .await?;

        let analysis = analyze(interaction.text, now, self.context_ttl);
        for fact in analysis.facts {
            self.store.record_context(conversation.id, fact).await?;
        }
        let mut message = NewMessage::inbound(interaction.text, interaction.message_type)
            .with_external_id(Some(event.event_id.clone()));
        message.sentiment = Some(analysis.sentiment);
        message.topics = analysis.topics;
        self.store.append_message(conversation.id, message).await?;

        let input = MatchInput {
            rule_type: interaction.rule_type,
            text: interaction.text,
            media_id: interaction.media_id,
        };
        let rule = match self.matcher.find_match(workspace_id, &input, now).await {
            Ok(Some(rule)) => rule,
            Ok(None) => {
                debug!(workspace_id = %workspace_id, "No automation rule matched");
                return Ok(());
            }
            Err(e) => return escalate(e),
        };

        let ctx = ExecutionContext {
            conversation: &conversation,
            account_id,
            message_type: interaction.message_type,
            reply_target: interaction.reply_target,
            inbound_text: interaction.text,
        };
        match self.executor.execute(&rule, &ctx, now).await {
            Ok(requests) => {
                info!(
                    workspace_id = %workspace_id,
                    rule_id = %rule.id,
                    conversation_id = %conversation.id,
                    replies = requests.len(),
                    "Automation rule executed"
                );
                Ok(())
            }
            Err(e) => escalate(e),
        }
    }
}
