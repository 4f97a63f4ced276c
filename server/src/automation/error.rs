//! Automation Error Types

use thiserror::Error;
use uuid::Uuid;

use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum AutomationError {
    /// One rule could not be evaluated; the rule is skipped.
    #[error("Rule {rule_id} failed: {reason}")]
    RuleExecution { rule_id: Uuid, reason: String },

    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),

    #[error("No access token for account {account_id}: {reason}")]
    Vault { account_id: String, reason: String },

    #[error("Messaging gateway error: {0}")]
    Gateway(String),

    #[error("Content service error: {0}")]
    Content(String),
}
