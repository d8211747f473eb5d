// SPDX-License-Identifier: MIT

//! Participation of a pilot in an experiment, with its heart-rate data.

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
#[cfg(feature = "binding-generation")]
use ts_rs::TS;

/// One pilot's participation in one experiment.
///
/// Aggregates are tri-state: `None` means no intraday data was returned
/// for the experiment window, which is distinct from zero.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct Participation {
    /// Database ID
    pub id: i64,
    /// Experiment this participation belongs to
    pub experiment_id: i64,
    /// Pilot who took part
    pub pilot_id: i64,
    /// Daily average heart rate reported by Fitbit, if any
    pub average_heart_rate: Option<f64>,
    /// Maximum of the intraday samples in the window, if any
    pub max_heart_rate: Option<i64>,
    /// Minimum of the intraday samples in the window, if any
    pub min_heart_rate: Option<i64>,
    /// Number of samples above the elevated-load threshold, set when a
    /// dashboard is generated
    pub elevated_count: Option<i64>,
}

/// A single intraday heart-rate sample.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct HeartRateSample {
    /// Database ID
    pub id: i64,
    /// Participation this sample belongs to
    pub participation_id: i64,
    /// Time of day the sample was taken
    #[cfg_attr(feature = "binding-generation", ts(type = "string"))]
    pub time: NaiveTime,
    /// Heart rate in beats per minute
    pub value: i64,
}
