//! Action Executor
//!
//! Turns a matched rule's actions into concrete outbound replies. The reply is
//! recorded in the conversation before the gateway call, which runs on its own
//! task so the webhook response never waits on the platform API.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use secrecy::SecretString;
use tracing::{error, instrument, warn};

use super::collaborators::{
    ContentGenerator, GenerationRequest, MessagingGateway, OutboundRequest, ReplyChannel,
    TokenVault,
};
use super::error::AutomationError;
use super::types::{Action, AutomationRule};
use crate::conversations::types::{ContextFact, Conversation, MessageType, NewMessage};
use crate::store::Store;

/// Event details the executor needs besides the rule.
#[derive(Debug, Clone, Copy)]
pub struct ExecutionContext<'a> {
    pub conversation: &'a Conversation,
    /// Business account that received the event.
    pub account_id: &'a str,
    pub message_type: MessageType,
    /// Comment or media a public reply goes under.
    pub reply_target: Option<&'a str>,
    pub inbound_text: &'a str,
}

/// Pick one response deterministically: `items[message_count % len]` over the
/// non-blank items.
pub fn select_response(items: &[String], message_count: i64) -> Option<&str> {
    let usable: Vec<&str> = items
        .iter()
        .map(String::as_str)
        .filter(|i| !i.trim().is_empty())
        .collect();
    if usable.is_empty() {
        return None;
    }
    let index = usize::try_from(message_count.unsigned_abs() % usable.len() as u64).unwrap_or(0);
    Some(usable[index])
}

/// Substitute `{username}` and `{context.<type>}` placeholders.
///
/// `facts` must be newest first; the newest fact of a type wins. Unknown
/// placeholders are left untouched, missing values render empty.
pub fn render_template(template: &str, username: Option<&str>, facts: &[ContextFact]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        let Some(end) = after.find('}') else {
            out.push_str(&rest[start..]);
            return out;
        };

        let key = &after[..end];
        match key {
            "username" => out.push_str(username.unwrap_or("there")),
            _ => match key.strip_prefix("context.") {
                Some(context_type) => {
                    if let Some(fact) = facts.iter().find(|f| f.context_type == context_type) {
                        out.push_str(&fact.context_value);
                    }
                }
                None => {
                    out.push('{');
                    out.push_str(key);
                    out.push('}');
                }
            },
        }
        rest = &after[end + 1..];
    }

    out.push_str(rest);
    out
}

/// Executes rule actions against the external collaborators.
#[derive(Clone)]
pub struct ActionExecutor {
    store: Arc<dyn Store>,
    vault: Arc<dyn TokenVault>,
    gateway: Arc<dyn MessagingGateway>,
    content: Arc<dyn ContentGenerator>,
}

impl ActionExecutor {
    pub fn new(
        store: Arc<dyn Store>,
        vault: Arc<dyn TokenVault>,
        gateway: Arc<dyn MessagingGateway>,
        content: Arc<dyn ContentGenerator>,
    ) -> Self {
        Self {
            store,
            vault,
            gateway,
            content,
        }
    }

    /// Build, record and hand off the replies for `rule`.
    ///
    /// Returns the requests handed to the gateway. Delivery itself happens in
    /// the background; its failures are logged only.
    #[instrument(
        skip(self, rule, ctx),
        fields(rule_id = %rule.id, conversation_id = %ctx.conversation.id)
    )]
    pub async fn execute(
        &self,
        rule: &AutomationRule,
        ctx: &ExecutionContext<'_>,
        now: DateTime<Utc>,
    ) -> Result<Vec<OutboundRequest>, AutomationError> {
        let conversation = ctx.conversation;
        let facts = self.store.active_context(conversation.id, now).await?;
        let username = conversation.participant_username.as_deref();

        let mut requests = Vec::new();
        for action in &rule.actions {
            let (template, channel) = match action {
                Action::SendTemplateResponses { items } => {
                    let channel = ctx.reply_target.map_or(ReplyChannel::DirectMessage, |target| {
                        ReplyChannel::PublicReply {
                            target_id: target.to_string(),
                        }
                    });
                    (
                        select_response(items, conversation.message_count).map(str::to_string),
                        channel,
                    )
                }
                Action::SendDmResponses { items } => (
                    select_response(items, conversation.message_count).map(str::to_string),
                    ReplyChannel::DirectMessage,
                ),
                Action::GenerateReply {
                    instructions,
                    fallback,
                } => {
                    let request = GenerationRequest {
                        instructions,
                        inbound_text: ctx.inbound_text,
                        participant_username: username,
                        context: &facts,
                    };
                    let text = match self.content.generate(&request).await {
                        Ok(text) => Some(text),
                        Err(e) => {
                            warn!(
                                rule_id = %rule.id,
                                error = %e,
                                "Content generation failed, using fallback"
                            );
                            fallback.clone()
                        }
                    };
                    (text, ReplyChannel::DirectMessage)
                }
            };

            let Some(template) = template else {
                continue;
            };
            let text = render_template(&template, username, &facts);
            if text.trim().is_empty() {
                continue;
            }

            requests.push(OutboundRequest {
                workspace_id: conversation.workspace_id,
                conversation_id: conversation.id,
                rule_id: rule.id,
                platform: conversation.platform,
                account_id: ctx.account_id.to_string(),
                recipient_id: conversation.participant_id.clone(),
                channel,
                text,
            });
        }

        if requests.is_empty() {
            return Ok(requests);
        }

        let token = Arc::new(
            self.vault
                .access_token(conversation.workspace_id, conversation.platform, ctx.account_id)
                .await?,
        );

        for request in &requests {
            self.store
                .append_message(
                    conversation.id,
                    NewMessage::automated(request.text.clone(), ctx.message_type, rule.id),
                )
                .await?;
            self.spawn_send(Arc::clone(&token), request.clone());
        }

        Ok(requests)
    }

    fn spawn_send(&self, token: Arc<SecretString>, request: OutboundRequest) {
        let gateway = Arc::clone(&self.gateway);
        tokio::spawn(async move {
            if let Err(e) = gateway.send(&token, &request).await {
                error!(
                    rule_id = %request.rule_id,
                    conversation_id = %request.conversation_id,
                    error = %e,
                    "Failed to deliver automated reply"
                );
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::Duration;
    use secrecy::ExposeSecret;
    use tokio::sync::mpsc;

    use uuid::Uuid;

    use super::*;
    use crate::automation::collaborators::{EnvTokenVault, TemplateOnlyGenerator};
    use crate::automation::types::{RuleType, Trigger};
    use crate::conversations::types::{ConversationKey, NewContextFact, Platform, Sender};
    use crate::store::MemoryStore;

    struct ChannelGateway {
        tx: mpsc::UnboundedSender<(String, OutboundRequest)>,
    }

    #[async_trait]
    impl MessagingGateway for ChannelGateway {
        async fn send(
            &self,
            token: &SecretString,
            request: &OutboundRequest,
        ) -> Result<(), AutomationError> {
            let _ = self
                .tx
                .send((token.expose_secret().to_string(), request.clone()));
            Ok(())
        }
    }

    struct CannedGenerator {
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ContentGenerator for CannedGenerator {
        async fn generate(
            &self,
            request: &GenerationRequest<'_>,
        ) -> Result<String, AutomationError> {
            self.seen
                .lock()
                .unwrap()
                .push(request.instructions.to_string());
            Ok(format!("generated for {}", request.participant_username.unwrap_or("?")))
        }
    }

    fn fact(context_type: &str, value: &str, age_mins: i64) -> ContextFact {
        NewContextFact::new(
            context_type,
            value,
            80,
            Utc::now() - Duration::minutes(age_mins),
            None,
        )
        .into_fact(Uuid::nil())
    }

    fn rule(actions: Vec<Action>) -> AutomationRule {
        AutomationRule {
            id: Uuid::now_v7(),
            workspace_id: Uuid::nil(),
            name: "test".into(),
            is_active: true,
            rule_type: RuleType::CommentDm,
            trigger: Trigger::CommentKeyword {
                keywords: vec![],
                target_media_ids: vec![],
            },
            actions,
            last_run: None,
            next_run: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn selection_is_deterministic() {
        let items = vec!["a".to_string(), " ".to_string(), "b".to_string()];
        assert_eq!(select_response(&items, 0), Some("a"));
        assert_eq!(select_response(&items, 1), Some("b"));
        assert_eq!(select_response(&items, 2), Some("a"));
        assert_eq!(select_response(&[], 5), None);
    }

    #[test]
    fn renders_placeholders() {
        let facts = vec![fact("intent", "purchase", 1), fact("intent", "pricing", 10)];
        assert_eq!(
            render_template("Hi {username}, about {context.intent}!", Some("alice"), &facts),
            "Hi alice, about purchase!"
        );
        assert_eq!(
            render_template("Hey {username} {context.email}{unknown}", None, &facts),
            "Hey there {unknown}"
        );
        assert_eq!(render_template("open { brace", None, &[]), "open { brace");
    }

    #[tokio::test]
    async fn sends_and_records_replies() {
        let store = Arc::new(MemoryStore::new());
        let key = ConversationKey::new(Uuid::nil(), Platform::Instagram, "participant-1");
        let conversation = store
            .get_or_create_conversation(&key, Some("alice"))
            .await
            .unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let executor = ActionExecutor::new(
            store.clone(),
            Arc::new(EnvTokenVault::default().with_default_token("tok")),
            Arc::new(ChannelGateway { tx }),
            Arc::new(TemplateOnlyGenerator),
        );

        let rule = rule(vec![
            Action::SendTemplateResponses {
                items: vec!["Check your DMs, {username}!".into()],
            },
            Action::SendDmResponses {
                items: vec!["Here is the link".into()],
            },
        ]);
        let ctx = ExecutionContext {
            conversation: &conversation,
            account_id: "biz-1",
            message_type: MessageType::Comment,
            reply_target: Some("comment-9"),
            inbound_text: "sale?",
        };

        let requests = executor.execute(&rule, &ctx, Utc::now()).await.unwrap();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].text, "Check your DMs, alice!");
        assert_eq!(
            requests[0].channel,
            ReplyChannel::PublicReply {
                target_id: "comment-9".into()
            }
        );
        assert_eq!(requests[1].channel, ReplyChannel::DirectMessage);

        let (token, sent) = rx.recv().await.unwrap();
        assert_eq!(token, "tok");
        assert_eq!(sent.recipient_id, "participant-1");
        assert!(rx.recv().await.is_some());

        let messages = store.recent_messages(conversation.id, 10).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert!(messages.iter().all(|m| {
            m.sender == Sender::Ai && m.ai_response && m.automation_rule_id == Some(rule.id)
        }));
    }

    #[tokio::test]
    async fn generated_reply_falls_back() {
        let store = Arc::new(MemoryStore::new());
        let key = ConversationKey::new(Uuid::nil(), Platform::Instagram, "p");
        let conversation = store.get_or_create_conversation(&key, None).await.unwrap();
        let (tx, _rx) = mpsc::unbounded_channel();

        let executor = ActionExecutor::new(
            store.clone(),
            Arc::new(EnvTokenVault::default().with_default_token("tok")),
            Arc::new(ChannelGateway { tx }),
            Arc::new(TemplateOnlyGenerator),
        );
        let ctx = ExecutionContext {
            conversation: &conversation,
            account_id: "biz-1",
            message_type: MessageType::DirectMessage,
            reply_target: None,
            inbound_text: "hello",
        };

        let with_fallback = rule(vec![Action::GenerateReply {
            instructions: "be nice".into(),
            fallback: Some("Thanks for reaching out!".into()),
        }]);
        let requests = executor.execute(&with_fallback, &ctx, Utc::now()).await.unwrap();
        assert_eq!(requests[0].text, "Thanks for reaching out!");

        let without = rule(vec![Action::GenerateReply {
            instructions: "be nice".into(),
            fallback: None,
        }]);
        assert!(executor.execute(&without, &ctx, Utc::now()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn generator_output_is_used() {
        let store = Arc::new(MemoryStore::new());
        let key = ConversationKey::new(Uuid::nil(), Platform::Instagram, "p");
        let conversation = store
            .get_or_create_conversation(&key, Some("bob"))
            .await
            .unwrap();
        let (tx, _rx) = mpsc::unbounded_channel();
        let generator = Arc::new(CannedGenerator {
            seen: Mutex::new(Vec::new()),
        });

        let executor = ActionExecutor::new(
            store,
            Arc::new(EnvTokenVault::default().with_default_token("tok")),
            Arc::new(ChannelGateway { tx }),
            generator.clone(),
        );
        let ctx = ExecutionContext {
            conversation: &conversation,
            account_id: "biz-1",
            message_type: MessageType::DirectMessage,
            reply_target: None,
            inbound_text: "hello",
        };
        let requests = executor
            .execute(
                &rule(vec![Action::GenerateReply {
                    instructions: "answer warmly".into(),
                    fallback: None,
                }]),
                &ctx,
                Utc::now(),
            )
            .await
            .unwrap();

        assert_eq!(requests[0].text, "generated for bob");
        assert_eq!(generator.seen.lock().unwrap().as_slice(), ["answer warmly"]);
    }

    #[tokio::test]
    async fn missing_token_records_nothing() {
        let store = Arc::new(MemoryStore::new());
        let key = ConversationKey::new(Uuid::nil(), Platform::Instagram, "p");
        let conversation = store.get_or_create_conversation(&key, None).await.unwrap();
        let (tx, _rx) = mpsc::unbounded_channel();

        let executor = ActionExecutor::new(
            store.clone(),
            Arc::new(EnvTokenVault::default()),
            Arc::new(ChannelGateway { tx }),
            Arc::new(TemplateOnlyGenerator),
        );
        let ctx = ExecutionContext {
            conversation: &conversation,
            account_id: "biz-1",
            message_type: MessageType::DirectMessage,
            reply_target: None,
            inbound_text: "hello",
        };
        let err = executor
            .execute(
                &rule(vec![Action::SendDmResponses {
                    items: vec!["hi".into()],
                }]),
                &ctx,
                Utc::now(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, AutomationError::Vault { .. }));
        assert!(store.recent_messages(conversation.id, 10).await.unwrap().is_empty());
    }
}
