// SPDX-License-Identifier: MIT

//! Heart-rate retrieval and ingestion for experiment participations.
//!
//! Enrolling a pilot into an experiment creates the participation row,
//! fetches the intraday series for the experiment's window, stores the
//! raw samples and folds the stored aggregates. Parsing is defensive:
//! malformed entries are skipped, never fatal.

use crate::db::SqliteDb;
use crate::error::AppError;
use crate::models::{Experiment, HeartRateSample, Participation, Pilot};
use crate::services::fitbit::FitbitService;
use crate::time_utils::parse_sample_time;
use chrono::NaiveTime;

/// Heart rate above which a sample counts toward elevated load, in bpm.
pub const ELEVATED_BPM_THRESHOLD: i64 = 100;

/// Aggregates folded from one ingestion run.
#[derive(Debug, Clone, PartialEq)]
pub struct Aggregates {
    pub average: Option<f64>,
    pub max: Option<i64>,
    pub min: Option<i64>,
}

/// Outcome of enrolling a pilot into an experiment.
#[derive(Debug)]
pub struct IngestOutcome {
    pub participation: Participation,
    pub sample_count: usize,
}

/// Orchestrates enrollment and heart-rate ingestion.
#[derive(Clone)]
pub struct HeartRateIngestor {
    db: SqliteDb,
    fitbit: FitbitService,
}

impl HeartRateIngestor {
    pub fn new(db: SqliteDb, fitbit: FitbitService) -> Self {
        Self { db, fitbit }
    }

    /// Enroll a pilot in an experiment and ingest their heart-rate series.
    ///
    /// The participation row is created before any upstream call, so a fetch
    /// failure leaves an enrolled pilot with null aggregates rather than no
    /// enrollment at all. A failed token refresh is logged and ingestion
    /// proceeds with the stored token; any other refresh-path error aborts.
    pub async fn ingest(
        &self,
        experiment: &Experiment,
        pilot: &Pilot,
    ) -> Result<IngestOutcome, AppError> {
        let fitbit_user_id = pilot
            .fitbit_user_id
            .as_deref()
            .ok_or(AppError::NoLinkedAccount)?;
        let account = self
            .db
            .get_account(fitbit_user_id)
            .await?
            .ok_or(AppError::NoLinkedAccount)?;

        // Enrollment first. The unique (experiment, pilot) constraint turns a
        // second enrollment into DuplicateParticipation before any API call.
        let participation = self.db.create_participation(experiment.id, pilot.id).await?;

        let account = match self.fitbit.ensure_fresh_token(&account).await {
            Ok(fresh) => fresh,
            Err(AppError::RefreshFailure(reason)) => {
                tracing::warn!(
                    pilot_id = pilot.id,
                    reason = %reason,
                    "Token refresh failed, proceeding with stored token"
                );
                account
            }
            Err(other) => return Err(other),
        };

        let payload = self.fitbit.fetch_heart_rate(&account, experiment).await?;

        let samples = parse_intraday_samples(&payload);
        self.db.insert_samples(participation.id, &samples).await?;

        let aggregates = fold_aggregates(&samples, daily_summary_average(&payload));
        self.db
            .update_participation_aggregates(
                participation.id,
                aggregates.average,
                aggregates.max,
                aggregates.min,
            )
            .await?;

        tracing::info!(
            experiment_id = experiment.id,
            pilot_id = pilot.id,
            participation_id = participation.id,
            samples = samples.len(),
            "Heart-rate ingestion complete"
        );

        Ok(IngestOutcome {
            sample_count: samples.len(),
            participation: Participation {
                average_heart_rate: aggregates.average,
                max_heart_rate: aggregates.max,
                min_heart_rate: aggregates.min,
                ..participation
            },
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Payload parsing and aggregate folding
// ─────────────────────────────────────────────────────────────────────────────

/// Extract `(time, value)` pairs from the intraday section of the payload.
///
/// A missing series or dataset yields no samples. Entries with a missing or
/// unparsable time or a non-integer value are skipped.
pub fn parse_intraday_samples(payload: &serde_json::Value) -> Vec<(NaiveTime, i64)> {
    let Some(dataset) = payload
        .get("activities-heart-intraday")
        .and_then(|v| v.get("dataset"))
        .and_then(|v| v.as_array())
    else {
        return Vec::new();
    };

    dataset
        .iter()
        .filter_map(|entry| {
            let time = entry
                .get("time")
                .and_then(|t| t.as_str())
                .and_then(parse_sample_time)?;
            let value = entry.get("value").and_then(|v| v.as_i64())?;
            Some((time, value))
        })
        .collect()
}

/// The upstream daily-summary average, when present and numeric.
pub fn daily_summary_average(payload: &serde_json::Value) -> Option<f64> {
    payload
        .get("activities-heart")
        .and_then(|v| v.get(0))
        .and_then(|entry| entry.get("value"))
        .and_then(|v| v.as_f64())
}

/// Fold the stored aggregates from the parsed samples and the summary value.
///
/// An empty series leaves every aggregate null; zeroes are never fabricated.
/// Max and min come from the window's own samples while the average is the
/// upstream daily-summary value, which covers the whole day. The two sources
/// can disagree (an average outside [min, max]); the stored values keep that
/// disagreement rather than recomputing the average locally.
pub fn fold_aggregates(samples: &[(NaiveTime, i64)], summary_average: Option<f64>) -> Aggregates {
    if samples.is_empty() {
        return Aggregates {
            average: None,
            max: None,
            min: None,
        };
    }

    Aggregates {
        average: summary_average,
        max: samples.iter().map(|(_, v)| *v).max(),
        min: samples.iter().map(|(_, v)| *v).min(),
    }
}

/// Count samples strictly above the elevated-load threshold.
pub fn elevated_count(samples: &[HeartRateSample]) -> i64 {
    samples
        .iter()
        .filter(|s| s.value > ELEVATED_BPM_THRESHOLD)
        .count() as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(summary_value: serde_json::Value, dataset: serde_json::Value) -> serde_json::Value {
        json!({
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

    fn sample(value: i64) -> HeartRateSample {
        HeartRateSample {
            id: 0,
            participation_id: 1,
            time: NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
            value,
        }
    }

    #[test]
    fn test_parse_extracts_time_value_pairs() {
        let p = payload(
            json!(76.5),
            json!([
                {"time": "10:00:00", "value": 72},
                {"time": "10:01:00", "value": 118},
            ]),
        );
        let samples = parse_intraday_samples(&p);
        assert_eq!(
            samples,
            vec![
                (NaiveTime::from_hms_opt(10, 0, 0).unwrap(), 72),
                (NaiveTime::from_hms_opt(10, 1, 0).unwrap(), 118),
            ]
        );
    }

    #[test]
    fn test_parse_missing_intraday_section_is_empty() {
        let p = json!({"activities-heart": [{"value": 80}]});
        assert!(parse_intraday_samples(&p).is_empty());
    }

    #[test]
    fn test_parse_missing_dataset_is_empty() {
        let p = json!({"activities-heart-intraday": {"datasetType": "minute"}});
        assert!(parse_intraday_samples(&p).is_empty());
    }

    #[test]
    fn test_parse_skips_malformed_entries() {
        let p = payload(
            json!(70),
            json!([
                {"time": "10:00:00", "value": 72},
                {"time": "10:01:00"},
                {"value": 90},
                {"time": "not a time", "value": 91},
                {"time": "10:04:00", "value": "high"},
                {"time": "10:05:00", "value": 95},
            ]),
        );
        let samples = parse_intraday_samples(&p);
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[1].1, 95);
    }

    #[test]
    fn test_summary_average_numeric_forms() {
        assert_eq!(daily_summary_average(&payload(json!(76.5), json!([]))), Some(76.5));
        assert_eq!(daily_summary_average(&payload(json!(80), json!([]))), Some(80.0));
    }

    #[test]
    fn test_summary_average_non_numeric_is_none() {
        // Some Fitbit responses carry a zone object here instead of a number.
        let p = payload(json!({"restingHeartRate": 61}), json!([]));
        assert_eq!(daily_summary_average(&p), None);
        assert_eq!(daily_summary_average(&json!({})), None);
    }

    #[test]
    fn test_fold_empty_series_is_all_null() {
        let agg = fold_aggregates(&[], Some(75.0));
        assert_eq!(
            agg,
            Aggregates {
                average: None,
                max: None,
                min: None
            }
        );
    }

    #[test]
    fn test_fold_computes_extrema_locally() {
        let t = NaiveTime::from_hms_opt(10, 0, 0).unwrap();
        let agg = fold_aggregates(&[(t, 70), (t, 130), (t, 101)], Some(76.5));
        assert_eq!(agg.average, Some(76.5));
        assert_eq!(agg.max, Some(130));
        assert_eq!(agg.min, Some(70));
    }

    #[test]
    fn test_fold_keeps_summary_average_outside_window_extrema() {
        // Daily average below every sample in the window stays as-is.
        let t = NaiveTime::from_hms_opt(10, 0, 0).unwrap();
        let agg = fold_aggregates(&[(t, 110), (t, 120)], Some(68.0));
        assert_eq!(agg.average, Some(68.0));
        assert_eq!(agg.min, Some(110));
    }

    #[test]
    fn test_fold_missing_summary_leaves_average_null() {
        let t = NaiveTime::from_hms_opt(10, 0, 0).unwrap();
        let agg = fold_aggregates(&[(t, 88)], None);
        assert_eq!(agg.average, None);
        assert_eq!(agg.max, Some(88));
        assert_eq!(agg.min, Some(88));
    }

    #[test]
    fn test_elevated_count_is_strictly_above_threshold() {
        let samples = vec![sample(99), sample(100), sample(101), sample(180)];
        assert_eq!(elevated_count(&samples), 2);
        assert_eq!(elevated_count(&[]), 0);
    }
}
