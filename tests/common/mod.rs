// SPDX-License-Identifier: MIT

//! Shared helpers for integration tests: an app backed by in-memory SQLite
//! with both Fitbit hosts pointed at a mock upstream.

use chrono::{Duration, NaiveDate, NaiveTime, Utc};
use pulsewing::config::Config;
use pulsewing::db::SqliteDb;
use pulsewing::models::{DetailLevel, Experiment, Pilot, Sex};
use pulsewing::routes::create_router;
use pulsewing::services::{FitbitService, HeartRateIngestor, PendingStore};
use pulsewing::AppState;
use std::sync::Arc;

/// Create a test app whose Fitbit base URLs point at `upstream_url`
/// (usually a wiremock server).
#[allow(dead_code)]
pub async fn create_test_app_with_upstream(upstream_url: &str) -> (axum::Router, Arc<AppState>) {
    let mut config = Config::test_default();
    config.fitbit_auth_base_url = upstream_url.to_string();
    config.fitbit_api_base_url = upstream_url.to_string();
    create_app(config).await
}

/// Create a test app with the default config (tests that never reach the
/// upstream).
#[allow(dead_code)]
pub async fn create_test_app() -> (axum::Router, Arc<AppState>) {
    create_app(Config::test_default()).await
}

async fn create_app(config: Config) -> (axum::Router, Arc<AppState>) {
    let db = SqliteDb::new(&config.database_url)
        .await
        .expect("in-memory SQLite");
    let pending = PendingStore::new(std::time::Duration::from_secs(
        config.pending_auth_ttl_secs,
    ));
    let fitbit = FitbitService::new(&config, db.clone()).expect("Fitbit service");
    let ingestor = HeartRateIngestor::new(db.clone(), fitbit.clone());

    let state = Arc::new(AppState {
        config,
        db,
        pending,
        fitbit,
        ingestor,
    });

    (create_router(state.clone()), state)
}

/// Insert a pilot directly through the db layer.
#[allow(dead_code)]
pub async fn seed_pilot(state: &Arc<AppState>, first_name: &str, last_name: &str) -> Pilot {
    state
        .db
        .create_pilot(first_name, last_name, "captain", 35, Sex::F)
        .await
        .expect("create pilot")
}

/// Insert an experiment with a 10:00-11:30 window at 1-minute detail.
#[allow(dead_code)]
pub async fn seed_experiment(state: &Arc<AppState>, name: &str) -> Experiment {
    state
        .db
        .create_experiment(
            name,
            NaiveDate::from_ymd_opt(2026, 3, 14).unwrap(),
            NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
            NaiveTime::from_hms_opt(11, 30, 0).unwrap(),
            DetailLevel::OneMinute,
        )
        .await
        .expect("create experiment")
}

/// Create an account whose access token is still valid and link it to the
/// pilot.
#[allow(dead_code)]
pub async fn seed_linked_account(state: &Arc<AppState>, pilot_id: i64, fitbit_user_id: &str) {
    state
        .db
        .upsert_account(
            fitbit_user_id,
            "valid-access-token",
            "refresh-token",
            Utc::now() + Duration::hours(8),
        )
        .await
        .expect("create account");
    state
        .db
        .set_pilot_fitbit_user(pilot_id, Some(fitbit_user_id))
        .await
        .expect("link account");
}

/// Create an account whose access token expired an hour ago and link it.
#[allow(dead_code)]
pub async fn seed_linked_account_expired(
    state: &Arc<AppState>,
    pilot_id: i64,
    fitbit_user_id: &str,
) {
    state
        .db
        .upsert_account(
            fitbit_user_id,
            "stale-access-token",
            "refresh-token",
            Utc::now() - Duration::hours(1),
        )
        .await
        .expect("create account");
    state
        .db
        .set_pilot_fitbit_user(pilot_id, Some(fitbit_user_id))
        .await
        .expect("link account");
}

/// A Fitbit intraday payload with the given summary value and samples.
#[allow(dead_code)]
pub fn intraday_payload(
    summary_value: serde_json::Value,
    samples: &[(&str, i64)],
) -> serde_json::Value {
    let dataset: Vec<serde_json::Value> = samples
        .iter()
        .map(|(time, value)| serde_json::json!({"time": time, "value": value}))
        .collect();

    serde_json::json!({
        "activities-heart": [{
            "dateTime": "2026-03-14",
            "value": summary_value,
        }],
        "activities-heart-intraday": {
            "dataset": dataset,
            "datasetInterval": 1,
            "datasetType": "minute",
        },
    })
}

/// Read a response body as JSON.
#[allow(dead_code)]
pub async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read body");
    serde_json::from_slice(&bytes).expect("JSON body")
}

/// Read a response body as a string (plain-text callback failures).
#[allow(dead_code)]
pub async fn body_text(response: axum::response::Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read body");
    String::from_utf8(bytes.to_vec()).expect("UTF-8 body")
}

/// Extract the `pw_session` cookie value from a response's `set-cookie`
/// header.
#[allow(dead_code)]
pub fn session_cookie(response: &axum::response::Response) -> Option<String> {
    let header = response.headers().get(axum::http::header::SET_COOKIE)?;
    let raw = header.to_str().ok()?;
    let pair = raw.split(';').next()?;
    let (name, value) = pair.split_once('=')?;
    (name == "pw_session").then(|| value.to_string())
}
