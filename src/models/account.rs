// SPDX-License-Identifier: MIT

//! Linked Fitbit account with its OAuth tokens.

use chrono::{DateTime, Utc};

/// A Fitbit account linked to at most one pilot.
///
/// Deliberately not `Serialize`: tokens never leave the server. Route
/// handlers expose link status through dedicated response types instead.
#[derive(Debug, Clone)]
pub struct FitbitAccount {
    /// Fitbit user ID, as returned by the token endpoint (primary key)
    pub fitbit_user_id: String,
    /// Current access token
    pub access_token: String,
    /// Current refresh token
    pub refresh_token: String,
    /// Absolute expiry of the access token
    pub token_expires_at: DateTime<Utc>,
    /// When the account was first linked
    pub created_at: DateTime<Utc>,
    /// Last token update
    pub updated_at: DateTime<Utc>,
}

impl FitbitAccount {
    /// Whether the access token has expired as of `now`.
    pub fn is_token_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.token_expires_at
    }
}
