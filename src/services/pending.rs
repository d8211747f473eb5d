// SPDX-License-Identifier: MIT

//! Session-scoped cache of in-flight authorization attempts.
//!
//! Each entry associates a browser session with the PKCE verifier, the
//! anti-forgery state token, the target pilot and the redirect target of
//! one authorization attempt. Entries are single-use: `take` removes them
//! atomically so a duplicate callback delivery observes a miss. Entries
//! expire after a configurable TTL; an expired lookup behaves exactly
//! like a miss. A periodic sweep bounds memory for abandoned attempts,
//! but correctness never depends on it.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Payload of one pending authorization attempt.
#[derive(Debug, Clone)]
pub struct PendingAuthorization {
    /// PKCE code verifier to send with the token exchange
    pub code_verifier: String,
    /// Anti-forgery state token the callback must echo
    pub state: String,
    /// Pilot the resulting account will be linked to
    pub pilot_id: i64,
    /// Caller-supplied post-completion redirect URL (may be empty)
    pub redirect_to: String,
}

struct StoredAttempt {
    auth: PendingAuthorization,
    expires_at: Instant,
}

/// Concurrent store of pending authorization attempts, keyed by session.
///
/// Cheap to clone; clones share the same underlying map.
#[derive(Clone)]
pub struct PendingStore {
    entries: Arc<DashMap<String, StoredAttempt>>,
    ttl: Duration,
}

impl PendingStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            ttl,
        }
    }

    /// Register an attempt for a session, replacing any prior attempt.
    ///
    /// Only one authorization may be in flight per session.
    pub fn insert(&self, session_key: &str, auth: PendingAuthorization) {
        self.entries.insert(
            session_key.to_string(),
            StoredAttempt {
                auth,
                expires_at: Instant::now() + self.ttl,
            },
        );
    }

    /// Consume the attempt for a session, if one is pending.
    ///
    /// The entry is removed whether or not it is returned: `DashMap::remove`
    /// makes the read-and-delete atomic, so of two concurrent callback
    /// deliveries for the same session at most one obtains the attempt.
    /// An entry past its TTL is discarded and reported as a miss.
    pub fn take(&self, session_key: &str) -> Option<PendingAuthorization> {
        let (_, stored) = self.entries.remove(session_key)?;
        if Instant::now() >= stored.expires_at {
            tracing::debug!(session = session_key, "Pending authorization expired");
            return None;
        }
        Some(stored.auth)
    }

    /// Drop all expired entries. Returns how many were removed.
    pub fn sweep_expired(&self) -> usize {
        let before = self.entries.len();
        let now = Instant::now();
        self.entries.retain(|_, stored| now < stored.expires_at);
        before - self.entries.len()
    }

    /// Number of attempts currently stored (expired ones included until swept).
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
