// SPDX-License-Identifier: MIT

//! Dashboard payload tests: per-participant series, global aggregates and
//! the per-pilot grouping.

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use chrono::NaiveTime;
use std::sync::Arc;
use tower::ServiceExt;

use pulsewing::AppState;

mod common;

fn get_request(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

/// Enroll a pilot with a stored series and aggregates, bypassing the
/// Fitbit fetch.
async fn seed_series(
    state: &Arc<AppState>,
    experiment_id: i64,
    pilot_id: i64,
    average: Option<f64>,
    samples: &[(&str, i64)],
) -> i64 {
    let participation = state
        .db
        .create_participation(experiment_id, pilot_id)
        .await
        .unwrap();

    let parsed: Vec<(NaiveTime, i64)> = samples
        .iter()
        .map(|(time, value)| {
            (
                NaiveTime::parse_from_str(time, "%H:%M:%S").unwrap(),
                *value,
            )
        })
        .collect();
    state
        .db
        .insert_samples(participation.id, &parsed)
        .await
        .unwrap();

    let max = samples.iter().map(|(_, v)| *v).max();
    let min = samples.iter().map(|(_, v)| *v).min();
    state
        .db
        .update_participation_aggregates(participation.id, average, max, min)
        .await
        .unwrap();

    participation.id
}

// ─── Experiment dashboard ────────────────────────────────────

#[tokio::test]
async fn test_experiment_dashboard_aggregates_participants() {
    let (app, state) = common::create_test_app().await;
    let experiment = common::seed_experiment(&state, "Crosswind landing").await;
    let amelia = common::seed_pilot(&state, "Amelia", "Earhart").await;
    let bessie = common::seed_pilot(&state, "Bessie", "Coleman").await;

    let amelia_participation = seed_series(
        &state,
        experiment.id,
        amelia.id,
        Some(82.5),
        &[("10:00:00", 70), ("10:01:00", 110), ("10:02:00", 95)],
    )
    .await;
    seed_series(
        &state,
        experiment.id,
        bessie.id,
        Some(91.0),
        &[("10:00:00", 88), ("10:01:00", 130)],
    )
    .await;

    let response = app
        .oneshot(get_request(&format!(
            "/experiments/{}/dashboard",
            experiment.id
        )))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = common::body_json(response).await;

    assert_eq!(body["global_heart_rate_range"]["min"], 70);
    assert_eq!(body["global_heart_rate_range"]["max"], 130);
    assert_eq!(body["global_average_heart_rate"], 86.75);
    assert_eq!(body["total_elevated_count"], 2);

    let series = &body["heart_rate_by_participant"][amelia.id.to_string().as_str()];
    assert_eq!(series["name"], "Amelia Earhart");
    assert_eq!(series["role"], "captain");
    assert_eq!(series["labels"], serde_json::json!(["10:00", "10:01", "10:02"]));
    assert_eq!(series["data"], serde_json::json!([70, 110, 95]));
    assert_eq!(series["average_heart_rate"], 82.5);
    assert_eq!(series["min_heart_rate"], 70);
    assert_eq!(series["max_heart_rate"], 110);
    // 110 is the only sample strictly above the 100 bpm threshold.
    assert_eq!(series["elevated_count"], 1);

    let details = &body["experiment_details"];
    assert_eq!(details["name"], "Crosswind landing");
    assert_eq!(details["date"], "14/03/2026");
    assert_eq!(details["start_time"], "10:00");
    assert_eq!(details["end_time"], "11:30");

    // The derived count is written back to the participation row.
    let stored = state
        .db
        .get_participation(experiment.id, amelia.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.id, amelia_participation);
    assert_eq!(stored.elevated_count, Some(1));
}

#[tokio::test]
async fn test_experiment_dashboard_skips_missing_aggregates() {
    let (app, state) = common::create_test_app().await;
    let experiment = common::seed_experiment(&state, "Night circuit").await;
    let amelia = common::seed_pilot(&state, "Amelia", "Earhart").await;
    let bessie = common::seed_pilot(&state, "Bessie", "Coleman").await;

    // Amelia enrolled but her fetch produced nothing.
    seed_series(&state, experiment.id, amelia.id, None, &[]).await;
    seed_series(
        &state,
        experiment.id,
        bessie.id,
        Some(91.0),
        &[("10:00:00", 88), ("10:01:00", 130)],
    )
    .await;

    let response = app
        .oneshot(get_request(&format!(
            "/experiments/{}/dashboard",
            experiment.id
        )))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = common::body_json(response).await;

    assert_eq!(body["global_heart_rate_range"]["min"], 88);
    assert_eq!(body["global_heart_rate_range"]["max"], 130);
    assert_eq!(body["global_average_heart_rate"], 91.0);
    assert_eq!(body["total_elevated_count"], 1);

    let empty = &body["heart_rate_by_participant"][amelia.id.to_string().as_str()];
    assert_eq!(empty["labels"], serde_json::json!([]));
    assert!(empty["average_heart_rate"].is_null());
    assert_eq!(empty["elevated_count"], 0);
}

#[tokio::test]
async fn test_experiment_dashboard_without_participants() {
    let (app, state) = common::create_test_app().await;
    let experiment = common::seed_experiment(&state, "Solo flight").await;

    let response = app
        .oneshot(get_request(&format!(
            "/experiments/{}/dashboard",
            experiment.id
        )))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = common::body_json(response).await;
    assert_eq!(
        body["heart_rate_by_participant"],
        serde_json::json!({})
    );
    assert!(body["global_heart_rate_range"]["min"].is_null());
    assert!(body["global_heart_rate_range"]["max"].is_null());
    assert!(body["global_average_heart_rate"].is_null());
    assert_eq!(body["total_elevated_count"], 0);
    assert_eq!(body["experiment_details"]["name"], "Solo flight");
}

#[tokio::test]
async fn test_experiment_dashboard_unknown_is_not_found() {
    let (app, _state) = common::create_test_app().await;

    let response = app
        .oneshot(get_request("/experiments/999/dashboard"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

// ─── Pilot dashboard ─────────────────────────────────────────

#[tokio::test]
async fn test_pilot_dashboard_groups_series_by_experiment() {
    let (app, state) = common::create_test_app().await;
    let amelia = common::seed_pilot(&state, "Amelia", "Earhart").await;
    let bessie = common::seed_pilot(&state, "Bessie", "Coleman").await;
    let first = common::seed_experiment(&state, "Crosswind landing").await;
    let second = common::seed_experiment(&state, "Night circuit").await;

    seed_series(
        &state,
        first.id,
        amelia.id,
        Some(80.0),
        &[("10:00:00", 75), ("10:01:00", 85)],
    )
    .await;
    seed_series(
        &state,
        first.id,
        bessie.id,
        Some(90.0),
        &[("10:00:00", 90)],
    )
    .await;
    seed_series(
        &state,
        second.id,
        amelia.id,
        Some(70.0),
        &[("10:00:00", 70)],
    )
    .await;

    let response = app
        .oneshot(get_request(&format!("/pilots/{}/dashboard", amelia.id)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = common::body_json(response).await;

    assert_eq!(body["pilot"]["id"], amelia.id);
    assert_eq!(body["experiments"].as_array().unwrap().len(), 2);

    let first_series = &body["heart_rate_by_experiment"][first.id.to_string().as_str()];
    assert_eq!(first_series["labels"], serde_json::json!(["10:00", "10:01"]));
    assert_eq!(first_series["data"], serde_json::json!([75, 85]));
    let second_series = &body["heart_rate_by_experiment"][second.id.to_string().as_str()];
    assert_eq!(second_series["data"], serde_json::json!([70]));

    // Everyone in the shared experiment is listed; the solo one has only her.
    let members = &body["experiment_members"][first.id.to_string().as_str()];
    assert_eq!(
        members,
        &serde_json::json!(["Amelia Earhart", "Bessie Coleman"])
    );
    let solo = &body["experiment_members"][second.id.to_string().as_str()];
    assert_eq!(solo, &serde_json::json!(["Amelia Earhart"]));
}

#[tokio::test]
async fn test_pilot_dashboard_without_participations() {
    let (app, state) = common::create_test_app().await;
    let pilot = common::seed_pilot(&state, "Amelia", "Earhart").await;

    let response = app
        .oneshot(get_request(&format!("/pilots/{}/dashboard", pilot.id)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = common::body_json(response).await;
    assert_eq!(body["experiments"], serde_json::json!([]));
    assert_eq!(body["heart_rate_by_experiment"], serde_json::json!({}));
}

#[tokio::test]
async fn test_pilot_dashboard_unknown_is_not_found() {
    let (app, _state) = common::create_test_app().await;

    let response = app
        .oneshot(get_request("/pilots/999/dashboard"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
