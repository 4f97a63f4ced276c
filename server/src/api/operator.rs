//! Operator Handlers
//!
//! Rule management, account linking and read-only views into conversation
//! memory for a workspace.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

use super::error::ApiError;
use super::AppState;
use crate::automation::matcher::next_cron_fire;
use crate::automation::types::{AutomationRule, NewAutomationRule};
use crate::conversations::types::{ContextFact, ConversationStats, Platform};

/// Create an automation rule. Schedule rules get their first `next_run`.
#[instrument(skip(state, body))]
pub async fn create_rule(
    State(state): State<AppState>,
    Path(workspace_id): Path<Uuid>,
    Json(body): Json<NewAutomationRule>,
) -> Result<(StatusCode, Json<AutomationRule>), ApiError> {
    body.validate().map_err(|e| ApiError::Validation(e.to_string()))?;

    let now = Utc::now();
    let next_run = match body.trigger.schedule() {
        Some(expr) => next_cron_fire(expr, now).map_err(ApiError::Validation)?,
        None => None,
    };

    let mut stored = body
        .into_stored(workspace_id, now)
        .map_err(|e| ApiError::Validation(e.to_string()))?;
    stored.next_run = next_run;
    state.store.insert_rule(&stored).await?;

    let rule =
        AutomationRule::try_from(stored).map_err(|e| ApiError::Validation(e.to_string()))?;
    info!(
        workspace_id = %workspace_id,
        rule_id = %rule.id,
        rule_type = %rule.rule_type,
        "Automation rule created"
    );
    Ok((StatusCode::CREATED, Json(rule)))
}

/// List a workspace's rules in evaluation order. Undecodable rows are skipped.
#[instrument(skip(state))]
pub async fn list_rules(
    State(state): State<AppState>,
    Path(workspace_id): Path<Uuid>,
) -> Result<Json<Vec<AutomationRule>>, ApiError> {
    let rows = state.store.list_rules(workspace_id).await?;
    let rules = rows
        .into_iter()
        .filter_map(|row| {
            let rule_id = row.id;
            AutomationRule::try_from(row)
                .inspect_err(|e| {
                    warn!(rule_id = %rule_id, error = %e, "Skipping undecodable rule");
                })
                .ok()
        })
        .collect();
    Ok(Json(rules))
}

#[derive(Debug, Deserialize)]
pub struct ConnectAccountRequest {
    pub platform: Platform,
    pub account_id: String,
}

#[derive(Debug, Serialize)]
pub struct ConnectedAccount {
    pub workspace_id: Uuid,
    pub platform: Platform,
    pub account_id: String,
}

/// Link a platform account to the workspace so its webhooks resolve here.
#[instrument(skip(state, body))]
pub async fn connect_account(
    State(state): State<AppState>,
    Path(workspace_id): Path<Uuid>,
    Json(body): Json<ConnectAccountRequest>,
) -> Result<(StatusCode, Json<ConnectedAccount>), ApiError> {
    let account_id = body.account_id.trim();
    if account_id.is_empty() {
        return Err(ApiError::Validation("account_id is required".to_string()));
    }

    state
        .store
        .connect_account(workspace_id, body.platform, account_id)
        .await?;
    info!(
        workspace_id = %workspace_id,
        platform = %body.platform,
        account_id,
        "Account connected"
    );

    Ok((
        StatusCode::CREATED,
        Json(ConnectedAccount {
            workspace_id,
            platform: body.platform,
            account_id: account_id.to_string(),
        }),
    ))
}

/// Conversation totals for the workspace.
#[instrument(skip(state))]
pub async fn conversation_stats(
    State(state): State<AppState>,
    Path(workspace_id): Path<Uuid>,
) -> Result<Json<ConversationStats>, ApiError> {
    let now = Utc::now();
    let dormant_before = state
        .config
        .dormancy()
        .and_then(|window| now.checked_sub_signed(window))
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
    let stats = state
        .store
        .conversation_stats(workspace_id, dormant_before)
        .await?;
    Ok(Json(stats))
}

/// Active context facts, newest first.
#[instrument(skip(state))]
pub async fn conversation_context(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
) -> Result<Json<Vec<ContextFact>>, ApiError> {
    if state.store.get_conversation(conversation_id).await?.is_none() {
        return Err(ApiError::NotFound("Conversation"));
    }
    let facts = state.store.active_context(conversation_id, Utc::now()).await?;
    Ok(Json(facts))
}
