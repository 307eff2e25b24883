//! Session registry: the seam between this service and the host
//! authentication system.
//!
//! The quoting backend authenticates users and mints a session here; the
//! resulting opaque bearer token is what the SPA presents on every credlink
//! request. The registry only answers "which user does this bearer token
//! belong to"; it owns no user data.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use uuid::Uuid;

/// An active session for one application user
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    /// Application user id (owned by the host auth system)
    pub user_id: String,
    /// Opaque bearer token (UUID v4)
    pub token: String,
    /// When the session was minted
    pub created_at: DateTime<Utc>,
}

/// In-memory session registry
///
/// Index: token -> Session. A user may hold several concurrent sessions
/// (multiple browser tabs, devices).
#[derive(Clone)]
pub struct SessionRegistry {
    sessions: Arc<DashMap<String, Session>>,
}

impl SessionRegistry {
    /// Create new empty registry
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(DashMap::new()),
        }
    }

    /// Mint a session for a user, returning the bearer token
    pub fn issue(&self, user_id: &str) -> String {
        let token = Uuid::new_v4().to_string();
        let session = Session {
            user_id: user_id.to_string(),
            token: token.clone(),
            created_at: Utc::now(),
        };
        self.sessions.insert(token.clone(), session);
        token
    }

    /// Resolve a bearer token to its user id
    pub fn resolve(&self, token: &str) -> Option<String> {
        self.sessions.get(token).map(|s| s.user_id.clone())
    }

    /// Revoke a session; returns whether it existed
    pub fn revoke(&self, token: &str) -> bool {
        self.sessions.remove(token).is_some()
    }

    /// Number of active sessions (for debugging/monitoring)
    pub fn count(&self) -> usize {
        self.sessions.len()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
