//! Delivery Dedup
//!
//! Providers redeliver on timeouts and errors. Each `(provider, event_id)` is
//! processed once per TTL window. Backend errors fail open: a duplicate that
//! slips through is tolerated, a dropped event is not.

use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use fred::prelude::*;
use tracing::warn;

/// Redis key prefix for seen deliveries.
const DEDUP_KEY_PREFIX: &str = "webhook:seen";

/// In-memory entries beyond which expired keys are swept on insert.
const MEMORY_SWEEP_THRESHOLD: usize = 10_000;

fn dedup_key(provider: &str, event_id: &str) -> String {
    format!("{DEDUP_KEY_PREFIX}:{provider}:{event_id}")
}

enum Backend {
    Redis(Client),
    Memory(DashMap<String, Instant>),
}

/// Remembers which deliveries were already processed.
pub struct DeliveryDedup {
    backend: Backend,
    ttl: Duration,
}

impl DeliveryDedup {
    pub fn redis(client: Client, ttl: Duration) -> Self {
        Self {
            backend: Backend::Redis(client),
            ttl,
        }
    }

    pub fn in_memory(ttl: Duration) -> Self {
        Self {
            backend: Backend::Memory(DashMap::new()),
            ttl,
        }
    }

    /// Record the delivery. Returns false if it was already seen within the TTL.
    pub async fn first_sighting(&self, provider: &str, event_id: &str) -> bool {
        let key = dedup_key(provider, event_id);
        match &self.backend {
            Backend::Redis(client) => {
                let ttl = i64::try_from(self.ttl.as_secs()).unwrap_or(i64::MAX).max(1);
                match client
                    .set::<Option<String>, _, _>(
                        &key,
                        "1",
                        Some(Expiration::EX(ttl)),
                        Some(SetOptions::NX),
                        false,
                    )
                    .await
                {
                    Ok(reply) => reply.is_some(),
                    Err(e) => {
                        warn!(
                            provider,
                            event_id,
                            error = %e,
                            "Dedup check failed, processing anyway"
                        );
                        true
                    }
                }
            }
            Backend::Memory(seen) => {
                let now = Instant::now();
                if seen.len() >= MEMORY_SWEEP_THRESHOLD {
                    seen.retain(|_, at| now.duration_since(*at) < self.ttl);
                }
                match seen.entry(key) {
                    Entry::Occupied(mut seen_at) => {
                        if now.duration_since(*seen_at.get()) < self.ttl {
                            return false;
                        }
                        seen_at.insert(now);
                        true
                    }
                    Entry::Vacant(slot) => {
                        slot.insert(now);
                        true
                    }
                }
            }
        }
    }

    /// Forget a delivery so a provider retry is processed again.
    pub async fn release(&self, provider: &str, event_id: &str) {
        let key = dedup_key(provider, event_id);
        match &self.backend {
            Backend::Redis(client) => {
                if let Err(e) = client.del::<(), _>(&key).await {
                    warn!(provider, event_id, error = %e, "Failed to release dedup key");
                }
            }
            Backend::Memory(seen) => {
                seen.remove(&key);
            }
        }
    }
}
