// SPDX-License-Identifier: MIT

//! Fitbit OAuth authorization routes.
//!
//! `POST /fitbit/connect` starts an authorization attempt and hands the
//! caller the URL to navigate to; `GET /fitbit/callback` is the browser
//! return leg. Because the callback is rendered in a browser, its failures
//! are plain text with the mapped status code instead of the JSON error
//! body the API routes use.

use axum::{
    extract::{Path, Query, State},
    response::{IntoResponse, Redirect, Response},
    routing::{get, post},
    Json, Router,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
#[cfg(feature = "binding-generation")]
use ts_rs::TS;

use crate::error::{AppError, Result};
use crate::services::fitbit::random_urlsafe_token;
use crate::time_utils::format_utc_rfc3339;
use crate::AppState;

/// Cookie carrying the session key that scopes pending authorizations.
pub const SESSION_COOKIE: &str = "pw_session";

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/fitbit/connect", post(connect))
        .route("/pilots/{pilot_id}/fitbit/connect", post(connect_for_pilot))
        .route("/fitbit/callback", get(callback))
        .route("/fitbit/refresh/{pilot_id}", post(force_refresh))
}

// ─── Initiation ──────────────────────────────────────────────

#[derive(Deserialize)]
pub struct ConnectRequest {
    pilot_id: i64,
    /// Where the browser is sent after the callback completes. Required;
    /// an empty string means "no redirect" for API-only callers.
    #[serde(default)]
    redirect_to: Option<String>,
}

#[derive(Deserialize)]
pub struct ConnectForPilotRequest {
    #[serde(default)]
    redirect_to: Option<String>,
}

#[derive(Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct ConnectResponse {
    pub authorization_url: String,
}

/// Start an authorization attempt for the pilot named in the body.
async fn connect(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Json(body): Json<ConnectRequest>,
) -> Result<(CookieJar, Json<ConnectResponse>)> {
    start_connect(&state, jar, body.pilot_id, body.redirect_to).await
}

/// Start an authorization attempt for the pilot named in the path.
async fn connect_for_pilot(
    State(state): State<Arc<AppState>>,
    Path(pilot_id): Path<i64>,
    jar: CookieJar,
    Json(body): Json<ConnectForPilotRequest>,
) -> Result<(CookieJar, Json<ConnectResponse>)> {
    start_connect(&state, jar, pilot_id, body.redirect_to).await
}

async fn start_connect(
    state: &Arc<AppState>,
    jar: CookieJar,
    pilot_id: i64,
    redirect_to: Option<String>,
) -> Result<(CookieJar, Json<ConnectResponse>)> {
    let redirect_to = redirect_to.ok_or_else(|| {
        AppError::InvalidRequest(
            "`redirect_to` is required (use \"\" for API-only flows)".to_string(),
        )
    })?;

    state
        .db
        .get_pilot(pilot_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Pilot {}", pilot_id)))?;

    let (jar, session_key) = ensure_session(jar);

    let started = state.fitbit.start_authorization(pilot_id, redirect_to);
    // Overwrites any earlier attempt for this session.
    state.pending.insert(&session_key, started.pending);

    tracing::info!(pilot_id, "Fitbit authorization started");

    Ok((
        jar,
        Json(ConnectResponse {
            authorization_url: started.authorization_url,
        }),
    ))
}

/// Reuse the caller's session cookie, or mint one.
fn ensure_session(jar: CookieJar) -> (CookieJar, String) {
    if let Some(existing) = jar.get(SESSION_COOKIE) {
        let key = existing.value().to_string();
        return (jar, key);
    }

    let key = random_urlsafe_token();
    let cookie = Cookie::build((SESSION_COOKIE, key.clone()))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .build();

    (jar.add(cookie), key)
}

// ─── Callback ────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct CallbackParams {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    state: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct LinkedResponse {
    pub status: String,
    pub fitbit_user_id: String,
    pub pilot_id: i64,
}

/// OAuth return leg. Terminal on first failure; the pending attempt is
/// consumed exactly once whatever the outcome.
async fn callback(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Query(params): Query<CallbackParams>,
) -> Response {
    match run_callback(&state, &jar, params).await {
        Ok(done) => done,
        Err(err) => {
            let status = err.status_code();
            tracing::warn!(code = err.code(), status = %status, "Fitbit callback failed");
            (status, err.to_string()).into_response()
        }
    }
}

async fn run_callback(
    state: &Arc<AppState>,
    jar: &CookieJar,
    params: CallbackParams,
) -> Result<Response> {
    if let Some(error) = params.error {
        return Err(AppError::InvalidRequest(format!(
            "authorization failed upstream: {}",
            error
        )));
    }
    let code = params
        .code
        .ok_or_else(|| AppError::InvalidRequest("missing `code` query parameter".to_string()))?;
    let received_state = params
        .state
        .ok_or_else(|| AppError::InvalidRequest("missing `state` query parameter".to_string()))?;

    let session_key = jar
        .get(SESSION_COOKIE)
        .map(|c| c.value().to_string())
        .ok_or(AppError::ExpiredOrMissingAttempt)?;

    // Consumed atomically here; a duplicate delivery observes a miss, and a
    // state mismatch below still leaves the attempt spent.
    let attempt = state
        .pending
        .take(&session_key)
        .ok_or(AppError::ExpiredOrMissingAttempt)?;

    let linked = state
        .fitbit
        .complete_authorization(&attempt, &code, &received_state)
        .await?;

    if attempt.redirect_to.is_empty() {
        // Valid terminal state for API-only callers.
        return Ok(Json(LinkedResponse {
            status: "linked".to_string(),
            fitbit_user_id: linked.fitbit_user_id,
            pilot_id: linked.pilot_id,
        })
        .into_response());
    }

    Ok(Redirect::temporary(&attempt.redirect_to).into_response())
}

// ─── Forced refresh ──────────────────────────────────────────

#[derive(Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct RefreshResponse {
    pub fitbit_user_id: String,
    pub token_expires_at: String,
    /// False when the stored token was still valid and nothing was done.
    pub refreshed: bool,
}

/// Refresh a pilot's access token if it has expired. Unlike the ingestion
/// path, a refresh failure here is surfaced to the caller.
async fn force_refresh(
    State(state): State<Arc<AppState>>,
    Path(pilot_id): Path<i64>,
) -> Result<Json<RefreshResponse>> {
    let pilot = state
        .db
        .get_pilot(pilot_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Pilot {}", pilot_id)))?;
    let fitbit_user_id = pilot.fitbit_user_id.ok_or(AppError::NoLinkedAccount)?;
    let account = state
        .db
        .get_account(&fitbit_user_id)
        .await?
        .ok_or(AppError::NoLinkedAccount)?;

    let before = account.token_expires_at;
    let fresh = state.fitbit.ensure_fresh_token(&account).await?;

    Ok(Json(RefreshResponse {
        fitbit_user_id: fresh.fitbit_user_id,
        token_expires_at: format_utc_rfc3339(fresh.token_expires_at),
        refreshed: fresh.token_expires_at != before,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ensure_session_mints_cookie_when_absent() {
        let (jar, key) = ensure_session(CookieJar::new());
        let cookie = jar.get(SESSION_COOKIE).expect("cookie set");
        assert_eq!(cookie.value(), key);
        assert_eq!(cookie.path(), Some("/"));
        assert_eq!(cookie.http_only(), Some(true));
        assert_eq!(cookie.same_site(), Some(SameSite::Lax));
    }

    #[test]
    fn test_ensure_session_reuses_existing_cookie() {
        let jar = CookieJar::new().add(Cookie::new(SESSION_COOKIE, "existing-key"));
        let (jar, key) = ensure_session(jar);
        assert_eq!(key, "existing-key");
        assert_eq!(jar.get(SESSION_COOKIE).unwrap().value(), "existing-key");
    }
}
