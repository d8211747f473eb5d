// SPDX-License-Identifier: MIT

//! Pilot CRUD, Fitbit link management and the per-pilot dashboard.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
#[cfg(feature = "binding-generation")]
use ts_rs::TS;

use crate::error::{AppError, Result};
use crate::models::{Experiment, Pilot, Sex};
use crate::time_utils::format_hour_minute;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/pilots", get(list_pilots).post(create_pilot))
        .route(
            "/pilots/{pilot_id}",
            get(get_pilot).put(update_pilot).delete(delete_pilot),
        )
        .route("/pilots/{pilot_id}/fitbit", delete(unlink_fitbit))
        .route("/pilots/{pilot_id}/dashboard", get(pilot_dashboard))
}

// ─── CRUD ────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct PilotPayload {
    first_name: String,
    last_name: String,
    role: String,
    age: i64,
    sex: Sex,
}

impl PilotPayload {
    fn validate(&self) -> Result<()> {
        if self.first_name.trim().is_empty() || self.last_name.trim().is_empty() {
            return Err(AppError::InvalidRequest(
                "pilot name must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

async fn create_pilot(
    State(state): State<Arc<AppState>>,
    Json(body): Json<PilotPayload>,
) -> Result<(StatusCode, Json<Pilot>)> {
    body.validate()?;
    let pilot = state
        .db
        .create_pilot(&body.first_name, &body.last_name, &body.role, body.age, body.sex)
        .await?;

    tracing::info!(pilot_id = pilot.id, "Pilot created");
    Ok((StatusCode::CREATED, Json(pilot)))
}

async fn list_pilots(State(state): State<Arc<AppState>>) -> Result<Json<Vec<Pilot>>> {
    Ok(Json(state.db.list_pilots().await?))
}

async fn get_pilot(
    State(state): State<Arc<AppState>>,
    Path(pilot_id): Path<i64>,
) -> Result<Json<Pilot>> {
    let pilot = state
        .db
        .get_pilot(pilot_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Pilot {}", pilot_id)))?;
    Ok(Json(pilot))
}

/// Full replacement of a pilot's attributes. The Fitbit link is managed
/// through the connect/unlink endpoints and is not touched here.
async fn update_pilot(
    State(state): State<Arc<AppState>>,
    Path(pilot_id): Path<i64>,
    Json(body): Json<PilotPayload>,
) -> Result<Json<Pilot>> {
    body.validate()?;
    let found = state
        .db
        .update_pilot(pilot_id, &body.first_name, &body.last_name, &body.role, body.age, body.sex)
        .await?;
    if !found {
        return Err(AppError::NotFound(format!("Pilot {}", pilot_id)));
    }

    let pilot = state
        .db
        .get_pilot(pilot_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Pilot {}", pilot_id)))?;
    Ok(Json(pilot))
}

async fn delete_pilot(
    State(state): State<Arc<AppState>>,
    Path(pilot_id): Path<i64>,
) -> Result<StatusCode> {
    if !state.db.delete_pilot(pilot_id).await? {
        return Err(AppError::NotFound(format!("Pilot {}", pilot_id)));
    }
    tracing::info!(pilot_id, "Pilot deleted");
    Ok(StatusCode::NO_CONTENT)
}

// ─── Fitbit link ─────────────────────────────────────────────

/// Remove the pilot's Fitbit account. Deleting the account row clears the
/// pilot's link via the foreign key, and drops the stored tokens with it.
async fn unlink_fitbit(
    State(state): State<Arc<AppState>>,
    Path(pilot_id): Path<i64>,
) -> Result<StatusCode> {
    let pilot = state
        .db
        .get_pilot(pilot_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Pilot {}", pilot_id)))?;
    let fitbit_user_id = pilot.fitbit_user_id.ok_or(AppError::NoLinkedAccount)?;

    state.db.delete_account(&fitbit_user_id).await?;

    tracing::info!(pilot_id, fitbit_user_id = %fitbit_user_id, "Fitbit account unlinked");
    Ok(StatusCode::NO_CONTENT)
}

// ─── Dashboard ───────────────────────────────────────────────

/// One participation's chart series: sample times as `HH:MM` labels and
/// bpm values in the same order.
#[derive(Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct SeriesPayload {
    pub labels: Vec<String>,
    pub data: Vec<i64>,
}

#[derive(Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct PilotDashboard {
    pub pilot: Pilot,
    pub experiments: Vec<Experiment>,
    /// Heart-rate series keyed by experiment id
    pub heart_rate_by_experiment: BTreeMap<i64, SeriesPayload>,
    /// Full names of everyone in each of those experiments
    pub experiment_members: BTreeMap<i64, Vec<String>>,
}

async fn pilot_dashboard(
    State(state): State<Arc<AppState>>,
    Path(pilot_id): Path<i64>,
) -> Result<Json<PilotDashboard>> {
    let pilot = state
        .db
        .get_pilot(pilot_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Pilot {}", pilot_id)))?;

    let participations = state.db.participations_for_pilot(pilot.id).await?;
    let experiments = state.db.experiments_for_pilot(pilot.id).await?;

    let mut heart_rate_by_experiment = BTreeMap::new();
    for participation in &participations {
        let samples = state.db.samples_for_participation(participation.id).await?;
        let mut series = SeriesPayload {
            labels: Vec::with_capacity(samples.len()),
            data: Vec::with_capacity(samples.len()),
        };
        for sample in samples {
            series.labels.push(format_hour_minute(sample.time));
            series.data.push(sample.value);
        }
        heart_rate_by_experiment.insert(participation.experiment_id, series);
    }

    let mut experiment_members = BTreeMap::new();
    for experiment in &experiments {
        let members = state
            .db
            .pilots_for_experiment(experiment.id)
            .await?
            .into_iter()
            .map(|p| p.full_name())
            .collect();
        experiment_members.insert(experiment.id, members);
    }

    Ok(Json(PilotDashboard {
        pilot,
        experiments,
        heart_rate_by_experiment,
        experiment_members,
    }))
}
