// SPDX-License-Identifier: MIT

//! Fitbit API client and OAuth token-lifecycle service.
//!
//! Handles:
//! - PKCE pair and state token generation
//! - Authorization URL construction
//! - Code-for-token exchange and account linking
//! - Token refresh when expired
//! - Windowed intraday heart-rate retrieval

use crate::config::Config;
use crate::db::SqliteDb;
use crate::error::AppError;
use crate::models::{Experiment, FitbitAccount};
use crate::services::pending::PendingAuthorization;
use crate::time_utils::format_hour_minute;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{Duration, Utc};
use rand::{Rng, RngCore};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// OAuth scope requested from Fitbit.
const SCOPE: &str = "heartrate";

/// Length of the PKCE code verifier (RFC 7636 allows 43-128 characters).
const CODE_VERIFIER_LEN: usize = 64;

/// Entropy of state tokens and session keys, in bytes.
const STATE_TOKEN_BYTES: usize = 32;

/// A freshly generated PKCE verifier/challenge pair (S256 method).
pub struct PkcePair {
    pub verifier: String,
    pub challenge: String,
}

impl PkcePair {
    /// Generate a cryptographically random pair, never reused across attempts.
    pub fn generate() -> Self {
        const CHARS: &[u8] =
            b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-._~";
        let mut rng = rand::thread_rng();
        let verifier: String = (0..CODE_VERIFIER_LEN)
            .map(|_| CHARS[rng.gen_range(0..CHARS.len())] as char)
            .collect();

        let mut hasher = Sha256::new();
        hasher.update(verifier.as_bytes());
        let challenge = URL_SAFE_NO_PAD.encode(hasher.finalize());

        Self {
            verifier,
            challenge,
        }
    }
}

/// Generate a random URL-safe token (used for state tokens and session keys).
pub fn random_urlsafe_token() -> String {
    let mut bytes = [0u8; STATE_TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Low-level Fitbit API client.
#[derive(Clone)]
pub struct FitbitClient {
    http: reqwest::Client,
    auth_base_url: String,
    api_base_url: String,
    client_id: String,
    client_secret: String,
}

impl FitbitClient {
    /// Create a client from configuration.
    ///
    /// Every upstream request carries the configured timeout; a timeout
    /// surfaces through the same error kinds as any other transport failure.
    pub fn new(config: &Config) -> Result<Self, AppError> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.upstream_timeout_secs))
            .build()
            .map_err(|e| {
                AppError::Internal(anyhow::anyhow!("Failed to build HTTP client: {}", e))
            })?;

        Ok(Self {
            http,
            auth_base_url: config.fitbit_auth_base_url.clone(),
            api_base_url: config.fitbit_api_base_url.clone(),
            client_id: config.fitbit_client_id.clone(),
            client_secret: config.fitbit_client_secret.clone(),
        })
    }

    /// Build the browser-facing authorization URL.
    ///
    /// The pilot id rides along in the URL even though the pending-attempt
    /// cache stores it too: the cache may have been evicted by the time the
    /// callback arrives, and the redundancy lets operators reconstruct what
    /// was being linked. State and challenge are base64url and need no
    /// further encoding.
    pub fn authorization_url(
        &self,
        challenge: &str,
        state: &str,
        redirect_uri: &str,
        pilot_id: i64,
    ) -> String {
        format!(
            "{}/oauth2/authorize?response_type=code&client_id={}&scope={}&code_challenge={}&code_challenge_method=S256&state={}&redirect_uri={}&pilot_id={}&prompt=login",
            self.auth_base_url,
            urlencoding::encode(&self.client_id),
            SCOPE,
            challenge,
            state,
            urlencoding::encode(redirect_uri),
            pilot_id,
        )
    }

    /// Exchange an authorization code for tokens.
    ///
    /// Single attempt, no retry; transport errors and non-2xx statuses both
    /// map to `UpstreamExchangeFailure`.
    pub async fn exchange_code(
        &self,
        code: &str,
        code_verifier: &str,
        redirect_uri: &str,
    ) -> Result<TokenEndpointResponse, AppError> {
        let response = self
            .http
            .post(format!("{}/oauth2/token", self.api_base_url))
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("grant_type", "authorization_code"),
                ("redirect_uri", redirect_uri),
                ("code", code),
                ("code_verifier", code_verifier),
            ])
            .send()
            .await
            .map_err(|e| {
                AppError::UpstreamExchangeFailure(format!("Token exchange request failed: {}", e))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "Fitbit token exchange failed");
            return Err(AppError::UpstreamExchangeFailure(format!(
                "Token exchange failed with status {}",
                status
            )));
        }

        response.json().await.map_err(|e| {
            AppError::MalformedUpstreamResponse(format!("Token response is not valid JSON: {}", e))
        })
    }

    /// Exchange a refresh token for a new access token.
    pub async fn refresh_token(
        &self,
        refresh_token: &str,
    ) -> Result<TokenEndpointResponse, AppError> {
        let response = self
            .http
            .post(format!("{}/oauth2/token", self.api_base_url))
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
                ("client_id", self.client_id.as_str()),
            ])
            .send()
            .await
            .map_err(|e| AppError::RefreshFailure(format!("Refresh request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(AppError::RefreshFailure(format!(
                "Refresh failed with status {}",
                status
            )));
        }

        response.json().await.map_err(|e| {
            AppError::RefreshFailure(format!("Refresh response is not valid JSON: {}", e))
        })
    }

    /// Fetch the intraday heart-rate series for one day's time window.
    ///
    /// The experiment date is used as both start and end date; the window is
    /// narrowed by start/end clock times at the requested detail level.
    pub async fn intraday_heart_rate(
        &self,
        access_token: &str,
        user_id: &str,
        experiment: &Experiment,
    ) -> Result<serde_json::Value, AppError> {
        let url = format!(
            "{}/1/user/{}/activities/heart/date/{}/{}/{}/time/{}/{}.json",
            self.api_base_url,
            user_id,
            experiment.date,
            experiment.date,
            experiment.detail_level.as_str(),
            format_hour_minute(experiment.start_time),
            format_hour_minute(experiment.end_time),
        );

        let response = self
            .http
            .get(&url)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| {
                AppError::UpstreamExchangeFailure(format!("Heart-rate request failed: {}", e))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "Fitbit heart-rate fetch failed");
            return Err(AppError::UpstreamExchangeFailure(format!(
                "Heart-rate fetch failed with status {}",
                status
            )));
        }

        response.json().await.map_err(|e| {
            AppError::MalformedUpstreamResponse(format!(
                "Heart-rate response is not valid JSON: {}",
                e
            ))
        })
    }
}

/// Response of the Fitbit token endpoint.
///
/// All fields are optional at the wire level; which of them are required
/// depends on the flow. The callback exchange needs all four, the refresh
/// path needs the access token and expiry only.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenEndpointResponse {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub user_id: Option<String>,
    pub expires_in: Option<i64>,
}

fn require_field<T>(value: Option<T>, field: &str) -> Result<T, AppError> {
    value.ok_or_else(|| {
        AppError::MalformedUpstreamResponse(format!("missing required field `{}`", field))
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// FitbitService - token lifecycle and account linking on top of the client
// ─────────────────────────────────────────────────────────────────────────────

/// Result of starting an authorization attempt.
pub struct StartedAuthorization {
    /// Entry to register in the pending store under the caller's session
    pub pending: PendingAuthorization,
    /// URL the browser must navigate to
    pub authorization_url: String,
}

/// Terminal state of a successful callback.
#[derive(Debug, Clone)]
pub struct LinkedAccount {
    pub fitbit_user_id: String,
    pub pilot_id: i64,
}

/// High-level Fitbit service owning the OAuth and token lifecycle.
#[derive(Clone)]
pub struct FitbitService {
    client: FitbitClient,
    db: SqliteDb,
    callback_url: String,
}

impl FitbitService {
    pub fn new(config: &Config, db: SqliteDb) -> Result<Self, AppError> {
        Ok(Self {
            client: FitbitClient::new(config)?,
            db,
            callback_url: config.callback_url(),
        })
    }

    /// Begin an authorization attempt for a pilot.
    ///
    /// Generates a fresh PKCE pair and state token on every call. The caller
    /// registers the returned pending entry under its session key, replacing
    /// any earlier attempt for that session.
    pub fn start_authorization(&self, pilot_id: i64, redirect_to: String) -> StartedAuthorization {
        let pkce = PkcePair::generate();
        let state = random_urlsafe_token();
        let authorization_url =
            self.client
                .authorization_url(&pkce.challenge, &state, &self.callback_url, pilot_id);

        StartedAuthorization {
            pending: PendingAuthorization {
                code_verifier: pkce.verifier,
                state,
                pilot_id,
                redirect_to,
            },
            authorization_url,
        }
    }

    /// Complete a callback delivery: validate state, exchange the code,
    /// upsert the account and link it to the attempt's pilot.
    ///
    /// The pending entry has already been consumed by the caller; this method
    /// never retries and returns the first failure it hits.
    pub async fn complete_authorization(
        &self,
        attempt: &PendingAuthorization,
        code: &str,
        received_state: &str,
    ) -> Result<LinkedAccount, AppError> {
        // Constant-time comparison; mismatched lengths also compare unequal.
        let state_matches: bool = received_state
            .as_bytes()
            .ct_eq(attempt.state.as_bytes())
            .into();
        if !state_matches {
            tracing::warn!(pilot_id = attempt.pilot_id, "OAuth state mismatch");
            return Err(AppError::StateMismatch);
        }

        let tokens = self
            .client
            .exchange_code(code, &attempt.code_verifier, &self.callback_url)
            .await?;

        let access_token = require_field(tokens.access_token, "access_token")?;
        let refresh_token = require_field(tokens.refresh_token, "refresh_token")?;
        let fitbit_user_id = require_field(tokens.user_id, "user_id")?;
        let expires_in = require_field(tokens.expires_in, "expires_in")?;
        let expires_at = Utc::now() + Duration::seconds(expires_in);

        // Lookup-or-create: a pre-existing account keeps its stored tokens.
        let account = match self.db.get_account(&fitbit_user_id).await? {
            Some(existing) => existing,
            None => {
                self.db
                    .upsert_account(&fitbit_user_id, &access_token, &refresh_token, expires_at)
                    .await?
            }
        };

        // One Fitbit account backs at most one pilot. Enforced here, in the
        // service layer, not by a uniqueness constraint on the link column.
        if self
            .db
            .pilot_for_account(&account.fitbit_user_id)
            .await?
            .is_some()
        {
            return Err(AppError::AccountAlreadyLinked);
        }

        // The pilot may have been deleted between initiation and callback.
        self.db
            .get_pilot(attempt.pilot_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Pilot {}", attempt.pilot_id)))?;

        self.db
            .set_pilot_fitbit_user(attempt.pilot_id, Some(&account.fitbit_user_id))
            .await?;

        tracing::info!(
            fitbit_user_id = %account.fitbit_user_id,
            pilot_id = attempt.pilot_id,
            "Fitbit account linked"
        );

        Ok(LinkedAccount {
            fitbit_user_id: account.fitbit_user_id,
            pilot_id: attempt.pilot_id,
        })
    }

    /// Refresh the account's access token if it has expired.
    ///
    /// A no-op while the token is still valid. On success the new tokens are
    /// persisted and the updated account returned. On `RefreshFailure` the
    /// ingestion caller logs and proceeds with the stale token; the refresh
    /// endpoint surfaces the failure instead.
    pub async fn ensure_fresh_token(
        &self,
        account: &FitbitAccount,
    ) -> Result<FitbitAccount, AppError> {
        let now = Utc::now();
        if !account.is_token_expired(now) {
            return Ok(account.clone());
        }

        tracing::info!(
            fitbit_user_id = %account.fitbit_user_id,
            "Access token expired, refreshing"
        );

        let tokens = self.client.refresh_token(&account.refresh_token).await?;

        let access_token = tokens.access_token.ok_or_else(|| {
            AppError::RefreshFailure("refresh response missing `access_token`".to_string())
        })?;
        let expires_in = tokens.expires_in.ok_or_else(|| {
            AppError::RefreshFailure("refresh response missing `expires_in`".to_string())
        })?;
        // Fitbit rotates the refresh token; keep the old one if it is omitted.
        let refresh_token = tokens
            .refresh_token
            .unwrap_or_else(|| account.refresh_token.clone());
        let expires_at = Utc::now() + Duration::seconds(expires_in);

        self.db
            .update_account_tokens(
                &account.fitbit_user_id,
                &access_token,
                &refresh_token,
                expires_at,
            )
            .await?;

        tracing::info!(fitbit_user_id = %account.fitbit_user_id, "Token refreshed");

        Ok(FitbitAccount {
            access_token,
            refresh_token,
            token_expires_at: expires_at,
            updated_at: now,
            ..account.clone()
        })
    }

    /// Fetch the raw intraday payload for a pilot's account over an
    /// experiment's window.
    pub async fn fetch_heart_rate(
        &self,
        account: &FitbitAccount,
        experiment: &Experiment,
    ) -> Result<serde_json::Value, AppError> {
        self.client
            .intraday_heart_rate(&account.access_token, &account.fitbit_user_id, experiment)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DetailLevel;
    use chrono::{NaiveDate, NaiveTime};
    use wiremock::matchers::{body_string_contains, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_client(base_url: &str) -> FitbitClient {
        let mut config = Config::test_default();
        config.fitbit_auth_base_url = base_url.to_string();
        config.fitbit_api_base_url = base_url.to_string();
        FitbitClient::new(&config).unwrap()
    }

    fn test_experiment() -> Experiment {
        Experiment {
            id: 1,
            name: "Crosswind landing".to_string(),
            date: NaiveDate::from_ymd_opt(2026, 3, 14).unwrap(),
            start_time: NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
            end_time: NaiveTime::from_hms_opt(11, 30, 0).unwrap(),
            detail_level: DetailLevel::OneMinute,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_pkce_pair_shape() {
        let pair = PkcePair::generate();
        assert_eq!(pair.verifier.len(), CODE_VERIFIER_LEN);
        assert!(pair
            .verifier
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b"-._~".contains(&b)));

        // Challenge is the unpadded base64url SHA-256 of the verifier.
        let mut hasher = Sha256::new();
        hasher.update(pair.verifier.as_bytes());
        let expected = URL_SAFE_NO_PAD.encode(hasher.finalize());
        assert_eq!(pair.challenge, expected);
        assert!(!pair.challenge.contains('='));
    }

    #[test]
    fn test_pkce_pairs_are_unique() {
        let a = PkcePair::generate();
        let b = PkcePair::generate();
        assert_ne!(a.verifier, b.verifier);
    }

    #[test]
    fn test_random_token_is_urlsafe() {
        let token = random_urlsafe_token();
        // 32 bytes encode to 43 base64url characters without padding.
        assert_eq!(token.len(), 43);
        assert!(!token.contains('+'));
        assert!(!token.contains('/'));
        assert!(!token.contains('='));
        assert_ne!(token, random_urlsafe_token());
    }

    #[test]
    fn test_authorization_url_embeds_required_params() {
        let client = test_client("https://www.fitbit.com");
        let url = client.authorization_url("chal", "st4te", "http://127.0.0.1:8080/fitbit/callback", 7);

        assert!(url.starts_with("https://www.fitbit.com/oauth2/authorize?"));
        assert!(url.contains("response_type=code"));
        assert!(url.contains("client_id=test_client_id"));
        assert!(url.contains("scope=heartrate"));
        assert!(url.contains("code_challenge=chal"));
        assert!(url.contains("code_challenge_method=S256"));
        assert!(url.contains("state=st4te"));
        assert!(url.contains("redirect_uri=http%3A%2F%2F127.0.0.1%3A8080%2Ffitbit%2Fcallback"));
        assert!(url.contains("pilot_id=7"));
        assert!(url.contains("prompt=login"));
    }

    #[tokio::test]
    async fn test_exchange_code_posts_form_with_basic_auth() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth2/token"))
            .and(header_exists("authorization"))
            .and(body_string_contains("grant_type=authorization_code"))
            .and(body_string_contains("code_verifier=verif"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "at",
                "refresh_token": "rt",
                "user_id": "ABC123",
                "expires_in": 28800
            })))
            .mount(&server)
            .await;

        let client = test_client(&server.uri());
        let tokens = client
            .exchange_code("c0de", "verif", "http://127.0.0.1:8080/fitbit/callback")
            .await
            .unwrap();

        assert_eq!(tokens.access_token.as_deref(), Some("at"));
        assert_eq!(tokens.user_id.as_deref(), Some("ABC123"));
        assert_eq!(tokens.expires_in, Some(28800));
    }

    #[tokio::test]
    async fn test_exchange_code_non_2xx_is_exchange_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth2/token"))
            .respond_with(ResponseTemplate::new(400).set_body_string("invalid_grant"))
            .mount(&server)
            .await;

        let client = test_client(&server.uri());
        let err = client
            .exchange_code("bad", "verif", "http://127.0.0.1:8080/fitbit/callback")
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::UpstreamExchangeFailure(_)));
    }

    #[tokio::test]
    async fn test_refresh_non_2xx_is_refresh_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth2/token"))
            .respond_with(ResponseTemplate::new(401).set_body_string("expired"))
            .mount(&server)
            .await;

        let client = test_client(&server.uri());
        let err = client.refresh_token("stale").await.unwrap_err();
        assert!(matches!(err, AppError::RefreshFailure(_)));
    }

    #[tokio::test]
    async fn test_intraday_url_encodes_window() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(
                "/1/user/ABC123/activities/heart/date/2026-03-14/2026-03-14/1min/time/10:00/11:30.json",
            ))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "activities-heart": [],
            })))
            .mount(&server)
            .await;

        let client = test_client(&server.uri());
        let payload = client
            .intraday_heart_rate("tok", "ABC123", &test_experiment())
            .await
            .unwrap();
        assert!(payload.get("activities-heart").is_some());
    }

    #[tokio::test]
    async fn test_intraday_non_json_is_malformed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>not json</html>"))
            .mount(&server)
            .await;

        let client = test_client(&server.uri());
        let err = client
            .intraday_heart_rate("tok", "ABC123", &test_experiment())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::MalformedUpstreamResponse(_)));
    }
}
