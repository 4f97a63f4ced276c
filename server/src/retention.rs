//! Conversation memory retention.
//!
//! Runs periodically to:
//! 1. Delete context facts whose `expires_at` has passed.
//! 2. Delete messages older than `MESSAGE_RETENTION_DAYS`.
//! 3. Flag conversations silent for `DORMANCY_DAYS` as inactive.
//!
//! Every predicate is "already expired by wall clock", so the sweep runs
//! alongside live webhook traffic without locking conversations.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

use crate::config::Config;
use crate::store::{Store, StoreError};

/// Rows touched by one cycle. A failed step reports zero.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RetentionReport {
    pub facts_deleted: u64,
    pub messages_deleted: u64,
    pub conversations_dormant: u64,
}

/// Start the retention background task.
///
/// The first tick is consumed immediately so no sweep runs during the
/// startup burst.
pub fn spawn_retention_task(
    store: Arc<dyn Store>,
    config: Arc<Config>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let period = Duration::from_secs(config.retention_interval_secs.max(1));
        let mut interval = tokio::time::interval(period);
        interval.tick().await; // consume immediate first tick
        loop {
            interval.tick().await;
            run_retention_cycle(store.as_ref(), &config, Utc::now()).await;
        }
    })
}

/// Execute one retention cycle. Steps are independent; a failing step is
/// logged and the next one still runs.
#[tracing::instrument(skip_all)]
pub async fn run_retention_cycle(
    store: &dyn Store,
    config: &Config,
    now: DateTime<Utc>,
) -> RetentionReport {
    let start = Instant::now();

    let facts_deleted = step("expired context facts", store.delete_expired_context(now).await);

    let messages_deleted = match cutoff(now, config.message_retention(), "old messages") {
        Some(before) => step("old messages", store.prune_messages(before).await),
        None => 0,
    };

    let conversations_dormant = match cutoff(now, config.dormancy(), "dormant conversations") {
        Some(since) => step("dormant conversations", store.mark_dormant(since).await),
        None => 0,
    };

    tracing::info!(
        elapsed_ms = start.elapsed().as_millis() as u64,
        facts_deleted,
        messages_deleted,
        conversations_dormant,
        "Retention cycle completed"
    );

    RetentionReport {
        facts_deleted,
        messages_deleted,
        conversations_dormant,
    }
}

/// `now - window`, or `None` (step skipped) when the window is unusable.
fn cutoff(
    now: DateTime<Utc>,
    window: Option<chrono::Duration>,
    label: &str,
) -> Option<DateTime<Utc>> {
    let cutoff = window.and_then(|w| now.checked_sub_signed(w));
    if cutoff.is_none() {
        tracing::warn!(step = label, "Retention window out of range, skipping step");
    }
    cutoff
}

fn step(label: &str, result: Result<u64, StoreError>) -> u64 {
    result.unwrap_or_else(|e| {
        tracing::warn!(error = %e, step = label, "Retention step failed");
        0
    })
}
