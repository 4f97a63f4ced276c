//! Automation Rule Types
//!
//! Rules pair a trigger (when to act) with a list of actions (what to send).
//! Triggers and actions are stored as JSON and decoded per rule, so one
//! malformed rule cannot poison the rest of a workspace.

use std::borrow::Cow;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;
use validator::{Validate, ValidationError};

/// Event type a rule listens to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleType {
    /// Comment on a post; replies publicly and/or by DM.
    CommentDm,
    /// Direct message.
    Dm,
    /// Reply to a story.
    StoryReply,
    /// Account was mentioned in a comment or caption.
    Mention,
    /// Periodic story performance report.
    StoryInsights,
}

impl RuleType {
    /// Parse from the stored string form.
    pub fn parse_str(s: &str) -> Option<Self> {
        match s {
            "comment_dm" => Some(Self::CommentDm),
            "dm" => Some(Self::Dm),
            "story_reply" => Some(Self::StoryReply),
            "mention" => Some(Self::Mention),
            "story_insights" => Some(Self::StoryInsights),
            _ => None,
        }
    }

    /// Stored string form.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::CommentDm => "comment_dm",
            Self::Dm => "dm",
            Self::StoryReply => "story_reply",
            Self::Mention => "mention",
            Self::StoryInsights => "story_insights",
        }
    }
}

impl std::fmt::Display for RuleType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Condition half of a rule.
///
/// An empty keyword list means "every event of the rule's type" (catch-all);
/// an empty media list means "any media".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Trigger {
    CommentKeyword {
        #[serde(default)]
        keywords: Vec<String>,
        #[serde(default)]
        target_media_ids: Vec<String>,
    },
    DmKeyword {
        #[serde(default)]
        keywords: Vec<String>,
    },
    PostInteraction {
        #[serde(default)]
        target_media_ids: Vec<String>,
    },
    /// Fires from periodic events; `cron` drives `next_run`.
    Schedule {
        cron: String,
        #[serde(default)]
        target_media_ids: Vec<String>,
    },
}

impl Trigger {
    pub fn keywords(&self) -> &[String] {
        match self {
            Self::CommentKeyword { keywords, .. } | Self::DmKeyword { keywords } => keywords,
            Self::PostInteraction { .. } | Self::Schedule { .. } => &[],
        }
    }

    pub fn target_media_ids(&self) -> &[String] {
        match self {
            Self::CommentKeyword {
                target_media_ids, ..
            }
            | Self::PostInteraction { target_media_ids }
            | Self::Schedule {
                target_media_ids, ..
            } => target_media_ids,
            Self::DmKeyword { .. } => &[],
        }
    }

    /// Cron expression for periodic rules.
    pub fn schedule(&self) -> Option<&str> {
        match self {
            Self::Schedule { cron, .. } => Some(cron),
            _ => None,
        }
    }
}

/// Effect half of a rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Action {
    /// Public reply on the comment/media, chosen from `items`.
    SendTemplateResponses { items: Vec<String> },
    /// Private reply to the participant, chosen from `items`.
    SendDmResponses { items: Vec<String> },
    /// Private reply written by the content service; `fallback` is sent
    /// when the service is unavailable.
    GenerateReply {
        instructions: String,
        #[serde(default)]
        fallback: Option<String>,
    },
}

/// A decoded automation rule.
#[derive(Debug, Clone, Serialize)]
pub struct AutomationRule {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub name: String,
    pub is_active: bool,
    pub rule_type: RuleType,
    pub trigger: Trigger,
    pub actions: Vec<Action>,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Rule row as stored: type, trigger and actions not yet decoded.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StoredRule {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub name: String,
    pub is_active: bool,
    pub rule_type: String,
    pub trigger: serde_json::Value,
    pub actions: serde_json::Value,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// A stored rule that could not be decoded.
#[derive(Debug, Error)]
pub enum RuleDecodeError {
    #[error("unknown rule type {0:?}")]
    UnknownType(String),
    #[error("invalid trigger: {0}")]
    Trigger(serde_json::Error),
    #[error("invalid actions: {0}")]
    Actions(serde_json::Error),
}

impl TryFrom<StoredRule> for AutomationRule {
    type Error = RuleDecodeError;

    fn try_from(row: StoredRule) -> Result<Self, Self::Error> {
        let rule_type = RuleType::parse_str(&row.rule_type)
            .ok_or_else(|| RuleDecodeError::UnknownType(row.rule_type.clone()))?;
        let trigger = serde_json::from_value(row.trigger).map_err(RuleDecodeError::Trigger)?;
        let actions = serde_json::from_value(row.actions).map_err(RuleDecodeError::Actions)?;

        Ok(Self {
            id: row.id,
            workspace_id: row.workspace_id,
            name: row.name,
            is_active: row.is_active,
            rule_type,
            trigger,
            actions,
            last_run: row.last_run,
            next_run: row.next_run,
            created_at: row.created_at,
        })
    }
}

/// Request to create a rule.
#[derive(Debug, Clone, Deserialize, Validate)]
#[validate(schema(function = "validate_rule_shape"))]
pub struct NewAutomationRule {
    #[validate(length(min = 1, max = 100, message = "Rule name must be 1-100 characters"))]
    pub name: String,
    #[serde(rename = "type")]
    pub rule_type: RuleType,
    pub trigger: Trigger,
    pub actions: Vec<Action>,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

const fn default_true() -> bool {
    true
}

fn shape_error(message: String) -> ValidationError {
    ValidationError::new("invalid_rule").with_message(Cow::Owned(message))
}

/// Cross-field checks: trigger kind against rule type, and usable actions.
fn validate_rule_shape(rule: &NewAutomationRule) -> Result<(), ValidationError> {
    if rule.name.trim().is_empty() {
        return Err(shape_error("Rule name must not be blank".to_string()));
    }

    match (&rule.trigger, rule.rule_type) {
        (Trigger::Schedule { cron, .. }, RuleType::StoryInsights) => {
            super::matcher::next_cron_fire(cron, Utc::now()).map_err(shape_error)?;
        }
        (Trigger::Schedule { .. }, other) => {
            return Err(shape_error(format!(
                "Schedule triggers are only valid for story_insights rules, not {other}"
            )));
        }
        (Trigger::DmKeyword { .. }, RuleType::CommentDm | RuleType::Mention) => {
            return Err(shape_error(format!(
                "dm_keyword triggers cannot be used with {} rules",
                rule.rule_type
            )));
        }
        _ => {}
    }

    if rule.actions.is_empty() && rule.rule_type != RuleType::StoryInsights {
        return Err(shape_error("At least one action is required".to_string()));
    }
    for action in &rule.actions {
        match action {
            Action::SendTemplateResponses { items } | Action::SendDmResponses { items }
                if items.iter().all(|i| i.trim().is_empty()) =>
            {
                return Err(shape_error(
                    "Response lists must contain at least one non-empty item".to_string(),
                ));
            }
            Action::GenerateReply { instructions, .. } if instructions.trim().is_empty() => {
                return Err(shape_error("generate_reply requires instructions".to_string()));
            }
            _ => {}
        }
    }

    Ok(())
}

impl NewAutomationRule {
    /// Build the stored row for this rule.
    pub fn into_stored(
        self,
        workspace_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<StoredRule, serde_json::Error> {
        Ok(StoredRule {
            id: Uuid::now_v7(),
            workspace_id,
            name: self.name.trim().to_string(),
            is_active: self.is_active,
            rule_type: self.rule_type.as_str().to_string(),
            trigger: serde_json::to_value(&self.trigger)?,
            actions: serde_json::to_value(&self.actions)?,
            last_run: None,
            next_run: None,
            created_at: now,
        })
    }
}

/// What the matcher needs to know about an event.
#[derive(Debug, Clone, Copy)]
pub struct MatchInput<'a> {
    pub rule_type: RuleType,
    pub text: &'a str,
    pub media_id: Option<&'a str>,
}
