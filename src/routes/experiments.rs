// SPDX-License-Identifier: MIT

//! Experiment CRUD, participant enrollment (heart-rate ingestion) and the
//! experiment dashboard.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
#[cfg(feature = "binding-generation")]
use ts_rs::TS;

use crate::error::{AppError, Result};
use crate::models::{DetailLevel, Experiment, Participation};
use crate::services::ingest::elevated_count;
use crate::time_utils::format_hour_minute;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/experiments", get(list_experiments).post(create_experiment))
        .route(
            "/experiments/{experiment_id}",
            get(get_experiment)
                .put(update_experiment)
                .delete(delete_experiment),
        )
        .route("/experiments/{experiment_id}/participants", post(add_participant))
        .route("/experiments/{experiment_id}/dashboard", get(experiment_dashboard))
}

// ─── CRUD ────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct ExperimentPayload {
    name: String,
    date: NaiveDate,
    /// `HH:MM:SS` clock time
    start_time: NaiveTime,
    end_time: NaiveTime,
    #[serde(default)]
    detail_level: DetailLevel,
}

impl ExperimentPayload {
    fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(AppError::InvalidRequest(
                "experiment name must not be empty".to_string(),
            ));
        }
        if self.end_time <= self.start_time {
            return Err(AppError::InvalidRequest(
                "experiment window must end after it starts".to_string(),
            ));
        }
        Ok(())
    }
}

async fn create_experiment(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ExperimentPayload>,
) -> Result<(StatusCode, Json<Experiment>)> {
    body.validate()?;
    let experiment = state
        .db
        .create_experiment(
            &body.name,
            body.date,
            body.start_time,
            body.end_time,
            body.detail_level,
        )
        .await?;

    tracing::info!(experiment_id = experiment.id, "Experiment created");
    Ok((StatusCode::CREATED, Json(experiment)))
}

async fn list_experiments(State(state): State<Arc<AppState>>) -> Result<Json<Vec<Experiment>>> {
    Ok(Json(state.db.list_experiments().await?))
}

async fn get_experiment(
    State(state): State<Arc<AppState>>,
    Path(experiment_id): Path<i64>,
) -> Result<Json<Experiment>> {
    let experiment = state
        .db
        .get_experiment(experiment_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Experiment {}", experiment_id)))?;
    Ok(Json(experiment))
}

async fn update_experiment(
    State(state): State<Arc<AppState>>,
    Path(experiment_id): Path<i64>,
    Json(body): Json<ExperimentPayload>,
) -> Result<Json<Experiment>> {
    body.validate()?;
    let found = state
        .db
        .update_experiment(
            experiment_id,
            &body.name,
            body.date,
            body.start_time,
            body.end_time,
            body.detail_level,
        )
        .await?;
    if !found {
        return Err(AppError::NotFound(format!("Experiment {}", experiment_id)));
    }

    let experiment = state
        .db
        .get_experiment(experiment_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Experiment {}", experiment_id)))?;
    Ok(Json(experiment))
}

async fn delete_experiment(
    State(state): State<Arc<AppState>>,
    Path(experiment_id): Path<i64>,
) -> Result<StatusCode> {
    if !state.db.delete_experiment(experiment_id).await? {
        return Err(AppError::NotFound(format!("Experiment {}", experiment_id)));
    }
    tracing::info!(experiment_id, "Experiment deleted");
    Ok(StatusCode::NO_CONTENT)
}

// ─── Enrollment ──────────────────────────────────────────────

#[derive(Deserialize)]
pub struct AddParticipantRequest {
    pilot_id: i64,
}

#[derive(Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct ParticipationResponse {
    pub participation: Participation,
    pub sample_count: usize,
}

/// Enroll a pilot and ingest their heart-rate series for the experiment
/// window in one step.
async fn add_participant(
    State(state): State<Arc<AppState>>,
    Path(experiment_id): Path<i64>,
    Json(body): Json<AddParticipantRequest>,
) -> Result<(StatusCode, Json<ParticipationResponse>)> {
    let experiment = state
        .db
        .get_experiment(experiment_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Experiment {}", experiment_id)))?;
    let pilot = state
        .db
        .get_pilot(body.pilot_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Pilot {}", body.pilot_id)))?;

    let outcome = state.ingestor.ingest(&experiment, &pilot).await?;

    Ok((
        StatusCode::CREATED,
        Json(ParticipationResponse {
            participation: outcome.participation,
            sample_count: outcome.sample_count,
        }),
    ))
}

// ─── Dashboard ───────────────────────────────────────────────

#[derive(Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct ParticipantSeries {
    pub id: i64,
    pub name: String,
    pub role: String,
    pub labels: Vec<String>,
    pub data: Vec<i64>,
    pub average_heart_rate: Option<f64>,
    pub min_heart_rate: Option<i64>,
    pub max_heart_rate: Option<i64>,
    pub elevated_count: i64,
}

#[derive(Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct HeartRateRange {
    pub min: Option<i64>,
    pub max: Option<i64>,
}

#[derive(Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct ExperimentDetails {
    pub name: String,
    /// `DD/MM/YYYY`, the header format dashboards render
    pub date: String,
    pub start_time: String,
    pub end_time: String,
}

#[derive(Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct ExperimentDashboard {
    /// Per-pilot series and aggregates, keyed by pilot id
    pub heart_rate_by_participant: BTreeMap<i64, ParticipantSeries>,
    pub global_heart_rate_range: HeartRateRange,
    /// Mean of the per-participant averages that are present
    pub global_average_heart_rate: Option<f64>,
    pub total_elevated_count: i64,
    pub experiment_details: ExperimentDetails,
}

async fn experiment_dashboard(
    State(state): State<Arc<AppState>>,
    Path(experiment_id): Path<i64>,
) -> Result<Json<ExperimentDashboard>> {
    let experiment = state
        .db
        .get_experiment(experiment_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Experiment {}", experiment_id)))?;

    let participations = state.db.list_participations(experiment.id).await?;

    let mut heart_rate_by_participant = BTreeMap::new();
    let mut global_min: Option<i64> = None;
    let mut global_max: Option<i64> = None;
    let mut averages: Vec<f64> = Vec::new();
    let mut total_elevated: i64 = 0;

    for participation in participations {
        let pilot = state
            .db
            .get_pilot(participation.pilot_id)
            .await?
            .ok_or_else(|| {
                AppError::Database(format!(
                    "pilot {} missing for participation {}",
                    participation.pilot_id, participation.id
                ))
            })?;

        let samples = state.db.samples_for_participation(participation.id).await?;
        let mut labels = Vec::with_capacity(samples.len());
        let mut data = Vec::with_capacity(samples.len());
        for sample in &samples {
            labels.push(format_hour_minute(sample.time));
            data.push(sample.value);
        }

        if let Some(average) = participation.average_heart_rate {
            averages.push(average);
        }
        if let Some(min) = participation.min_heart_rate {
            global_min = Some(global_min.map_or(min, |g| g.min(min)));
        }
        if let Some(max) = participation.max_heart_rate {
            global_max = Some(global_max.map_or(max, |g| g.max(max)));
        }

        // Elevated load is derived from the stored series and persisted on
        // the participation at read time.
        let elevated = elevated_count(&samples);
        state
            .db
            .set_participation_elevated_count(participation.id, elevated)
            .await?;
        total_elevated += elevated;

        heart_rate_by_participant.insert(
            pilot.id,
            ParticipantSeries {
                id: pilot.id,
                name: pilot.full_name(),
                role: pilot.role,
                labels,
                data,
                average_heart_rate: participation.average_heart_rate,
                min_heart_rate: participation.min_heart_rate,
                max_heart_rate: participation.max_heart_rate,
                elevated_count: elevated,
            },
        );
    }

    Ok(Json(ExperimentDashboard {
        heart_rate_by_participant,
        global_heart_rate_range: HeartRateRange {
            min: global_min,
            max: global_max,
        },
        global_average_heart_rate: mean(&averages),
        total_elevated_count: total_elevated,
        experiment_details: ExperimentDetails {
            name: experiment.name,
            date: experiment.date.format("%d/%m/%Y").to_string(),
            start_time: format_hour_minute(experiment.start_time),
            end_time: format_hour_minute(experiment.end_time),
        },
    }))
}

/// Mean of the collected per-participant averages; `None` when no
/// participant has one (never zero).
fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}
