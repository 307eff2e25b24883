//! CSRF protection for the authorization flow.
//!
//! Before redirecting a user to the provider's consent screen, an opaque
//! single-use state nonce is generated and bound server-side to that user's
//! id. The exchange endpoint later verifies the nonce echoed back by the
//! provider. The nonce itself carries no identity: it is a random UUID, and
//! the binding lives only in this table.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use uuid::Uuid;

/// A pending authorization awaiting its callback
#[derive(Clone, Debug)]
pub struct PendingAuth {
    pub user_id: String,
    pub issued_at: DateTime<Utc>,
}

/// State nonce table with TTL-based expiry
#[derive(Clone)]
pub struct StateManager {
    states: Arc<DashMap<String, PendingAuth>>,
    ttl: Duration,
}

impl StateManager {
    /// # Arguments
    /// * `ttl_seconds` - How long a pending authorization remains valid
    pub fn new(ttl_seconds: i64) -> Self {
        Self {
            states: Arc::new(DashMap::new()),
            ttl: Duration::seconds(ttl_seconds),
        }
    }

    /// Generate a state nonce bound to a user.
    pub fn create(&self, user_id: &str) -> String {
        let state = Uuid::new_v4().to_string();
        self.states.insert(
            state.clone(),
            PendingAuth {
                user_id: user_id.to_string(),
                issued_at: Utc::now(),
            },
        );
        state
    }

    /// Verify and consume a state nonce (single-use).
    ///
    /// Returns the bound pending authorization if the nonce exists and has
    /// not expired; the entry is removed either way.
    pub fn consume(&self, state: &str) -> Option<PendingAuth> {
        let (_, entry) = self.states.remove(state)?;

        if Utc::now() - entry.issued_at > self.ttl {
            return None;
        }

        Some(entry)
    }

    /// Drop expired entries (called periodically).
    pub fn sweep_expired(&self) {
        let now = Utc::now();
        self.states.retain(|_, entry| now - entry.issued_at <= self.ttl);
    }

    /// Number of pending authorizations (for debugging/monitoring)
    pub fn count(&self) -> usize {
        self.states.len()
    }
}

/// Background task that periodically sweeps expired states
pub async fn run_state_cleanup(manager: StateManager, interval_seconds: u64) {
    let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(interval_seconds));

    loop {
        interval.tick().await;
        manager.sweep_expired();
        tracing::debug!(pending = manager.count(), "OAuth state sweep complete");
    }
}
