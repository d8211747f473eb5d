// SPDX-License-Identifier: MIT

//! Application configuration loaded from environment variables.
//!
//! Fitbit client credentials are secrets and must come from the
//! environment (or an injected secret binding); they are never
//! hard-coded anywhere else in the crate.

use std::env;

/// Application configuration, loaded once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// Fitbit OAuth client ID (public)
    pub fitbit_client_id: String,
    /// Fitbit OAuth client secret
    pub fitbit_client_secret: String,
    /// Base URL of the Fitbit authorization host (browser-facing)
    pub fitbit_auth_base_url: String,
    /// Base URL of the Fitbit API host (token + data endpoints)
    pub fitbit_api_base_url: String,
    /// Public base URL of this server, used to build the OAuth callback URI
    pub public_base_url: String,
    /// Frontend URL allowed by CORS
    pub frontend_url: String,
    /// Server port
    pub port: u16,
    /// SQLite connection string
    pub database_url: String,
    /// Lifetime of a pending authorization attempt, in seconds
    pub pending_auth_ttl_secs: u64,
    /// Timeout applied to every upstream Fitbit request, in seconds
    pub upstream_timeout_secs: u64,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// For local development a `.env` file is honored.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok(); // Load .env file if present

        Ok(Self {
            fitbit_client_id: env::var("FITBIT_CLIENT_ID")
                .map_err(|_| ConfigError::Missing("FITBIT_CLIENT_ID"))?,
            fitbit_client_secret: env::var("FITBIT_CLIENT_SECRET")
                .map(|v| v.trim().to_string())
                .map_err(|_| ConfigError::Missing("FITBIT_CLIENT_SECRET"))?,
            fitbit_auth_base_url: env::var("FITBIT_AUTH_BASE_URL")
                .unwrap_or_else(|_| "https://www.fitbit.com".to_string()),
            fitbit_api_base_url: env::var("FITBIT_API_BASE_URL")
                .unwrap_or_else(|_| "https://api.fitbit.com".to_string()),
            public_base_url: env::var("PUBLIC_BASE_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:8080".to_string()),
            frontend_url: env::var("FRONTEND_URL")
                .unwrap_or_else(|_| "http://localhost:5173".to_string()),
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .unwrap_or(8080),
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite:pulsewing.db".to_string()),
            pending_auth_ttl_secs: env::var("PENDING_AUTH_TTL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(600),
            upstream_timeout_secs: env::var("UPSTREAM_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(10),
        })
    }

    /// The redirect URI registered with Fitbit for this deployment.
    pub fn callback_url(&self) -> String {
        format!("{}/fitbit/callback", self.public_base_url)
    }

    /// Config for tests only: in-memory database, placeholder credentials.
    pub fn test_default() -> Self {
        Self {
            fitbit_client_id: "test_client_id".to_string(),
            fitbit_client_secret: "test_client_secret".to_string(),
            fitbit_auth_base_url: "https://www.fitbit.com".to_string(),
            fitbit_api_base_url: "https://api.fitbit.com".to_string(),
            public_base_url: "http://127.0.0.1:8080".to_string(),
            frontend_url: "http://localhost:5173".to_string(),
            port: 8080,
            database_url: "sqlite::memory:".to_string(),
            pending_auth_ttl_secs: 600,
            upstream_timeout_secs: 10,
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),
}
