//! Automation Rule Matcher
//!
//! Picks the rule to act on for a workspace event. Rules are evaluated in
//! storage order and the first match wins. A rule that fails to evaluate is
//! logged and skipped so it cannot block the rest of the workspace.
//!
//! Keyword automata are compiled once per rule and cached by rule id; a
//! cached entry is rebuilt only when the rule's keyword list changes.

use std::str::FromStr;
use std::sync::Arc;

use aho_corasick::AhoCorasick;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use super::error::AutomationError;
use super::types::{AutomationRule, MatchInput, StoredRule, Trigger};
use crate::store::Store;

/// Next fire time of a cron expression strictly after `after`.
pub fn next_cron_fire(
    expr: &str,
    after: DateTime<Utc>,
) -> Result<Option<DateTime<Utc>>, String> {
    let schedule = cron::Schedule::from_str(expr).map_err(|e| format!("invalid cron: {e}"))?;
    Ok(schedule.after(&after).next())
}

/// Compiled, case-insensitive keyword condition of one trigger.
///
/// Blank keywords are ignored; a list with no usable keyword is a catch-all.
#[derive(Debug)]
pub struct KeywordSet {
    automaton: Option<AhoCorasick>,
}

impl KeywordSet {
    pub fn new(keywords: &[String]) -> Result<Self, aho_corasick::BuildError> {
        let patterns: Vec<String> = keywords
            .iter()
            .map(|k| k.trim().to_lowercase())
            .filter(|k| !k.is_empty())
            .collect();
        if patterns.is_empty() {
            return Ok(Self { automaton: None });
        }
        Ok(Self {
            automaton: Some(AhoCorasick::new(&patterns)?),
        })
    }

    /// Whether any keyword is a substring of `text`.
    pub fn is_match(&self, text: &str) -> bool {
        self.automaton
            .as_ref()
            .is_none_or(|automaton| automaton.is_match(&text.to_lowercase()))
    }
}

/// Whether a trigger accepts the event: keyword condition AND media condition.
pub fn trigger_matches(trigger: &Trigger, keywords: &KeywordSet, input: &MatchInput<'_>) -> bool {
    let targets = trigger.target_media_ids();
    let media_ok = targets.is_empty()
        || input
            .media_id
            .is_some_and(|media_id| targets.iter().any(|t| t == media_id));
    media_ok && keywords.is_match(input.text)
}

/// Compiled keyword set paired with the list it was built from.
struct CachedKeywords {
    keywords: Vec<String>,
    set: Arc<KeywordSet>,
}

/// Rule matcher bound to a storage handle.
#[derive(Clone)]
pub struct RuleMatcher {
    store: Arc<dyn Store>,
    keyword_sets: Arc<DashMap<Uuid, CachedKeywords>>,
}

impl RuleMatcher {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            keyword_sets: Arc::new(DashMap::new()),
        }
    }

    /// Compiled keywords for a rule, building them on first use.
    fn keyword_set(
        &self,
        rule: &AutomationRule,
    ) -> Result<Arc<KeywordSet>, aho_corasick::BuildError> {
        let keywords = rule.trigger.keywords();
        if let Some(entry) = self.keyword_sets.get(&rule.id) {
            if entry.keywords == keywords {
                return Ok(Arc::clone(&entry.set));
            }
        }

        let set = Arc::new(KeywordSet::new(keywords)?);
        self.keyword_sets.insert(
            rule.id,
            CachedKeywords {
                keywords: keywords.to_vec(),
                set: Arc::clone(&set),
            },
        );
        Ok(set)
    }

    fn evaluate(
        &self,
        row: StoredRule,
        input: &MatchInput<'_>,
    ) -> Result<Option<AutomationRule>, AutomationError> {
        let rule_id = row.id;
        let failed = |reason: String| AutomationError::RuleExecution { rule_id, reason };

        let rule = AutomationRule::try_from(row).map_err(|e| failed(e.to_string()))?;
        let keywords = self.keyword_set(&rule).map_err(|e| failed(e.to_string()))?;
        Ok(trigger_matches(&rule.trigger, &keywords, input).then_some(rule))
    }

    /// Find the first active rule of `input.rule_type` that matches.
    ///
    /// On a match the rule's `last_run` is stamped with `now`; schedule-driven
    /// rules also get `next_run` recomputed. Only a failure to load the rule
    /// list is returned as an error.
    #[instrument(skip(self, input), fields(rule_type = %input.rule_type))]
    pub async fn find_match(
        &self,
        workspace_id: Uuid,
        input: &MatchInput<'_>,
        now: DateTime<Utc>,
    ) -> Result<Option<AutomationRule>, AutomationError> {
        let rules = self
            .store
            .active_rules(workspace_id, input.rule_type)
            .await?;

        for row in rules {
            let rule_id = row.id;
            let rule = match self.evaluate(row, input) {
                Ok(Some(rule)) => rule,
                Ok(None) => continue,
                Err(e) => {
                    warn!(
                        workspace_id = %workspace_id,
                        rule_id = %rule_id,
                        error = %e,
                        "Skipping automation rule that failed to evaluate"
                    );
                    continue;
                }
            };

            let next_run = rule.trigger.schedule().and_then(|expr| {
                next_cron_fire(expr, now).unwrap_or_else(|e| {
                    warn!(rule_id = %rule.id, error = %e, "Cannot compute next run");
                    None
                })
            });

            // last_run is advisory; a failed stamp must not drop the match.
            if let Err(e) = self.store.record_rule_run(rule.id, now, next_run).await {
                warn!(rule_id = %rule.id, error = %e, "Failed to record rule run");
            }

            debug!(workspace_id = %workspace_id, rule_id = %rule.id, "Automation rule matched");
            return Ok(Some(rule));
        }

        Ok(None)
    }
}
