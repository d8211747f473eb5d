// SPDX-License-Identifier: MIT

//! Experiment model and intraday detail levels.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
#[cfg(feature = "binding-generation")]
use ts_rs::TS;

/// Resolution of the intraday heart-rate series requested from Fitbit.
///
/// The string forms match the path segments the Fitbit API accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub enum DetailLevel {
    #[serde(rename = "1sec")]
    OneSecond,
    #[default]
    #[serde(rename = "1min")]
    OneMinute,
    #[serde(rename = "5min")]
    FiveMinutes,
    #[serde(rename = "15min")]
    FifteenMinutes,
}

impl DetailLevel {
    /// String form used both in the database and in Fitbit URLs.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::OneSecond => "1sec",
            Self::OneMinute => "1min",
            Self::FiveMinutes => "5min",
            Self::FifteenMinutes => "15min",
        }
    }

    /// Parse from the database string representation.
    pub fn parse(s: &str) -> Self {
        match s {
            "1sec" => Self::OneSecond,
            "5min" => Self::FiveMinutes,
            "15min" => Self::FifteenMinutes,
            _ => Self::OneMinute,
        }
    }
}

/// A timed experiment during which heart rate is recorded.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct Experiment {
    /// Database ID
    pub id: i64,
    /// Experiment name
    pub name: String,
    /// Day the experiment took place
    #[cfg_attr(feature = "binding-generation", ts(type = "string"))]
    pub date: NaiveDate,
    /// Window start (time of day)
    #[cfg_attr(feature = "binding-generation", ts(type = "string"))]
    pub start_time: NaiveTime,
    /// Window end (time of day, must be after start)
    #[cfg_attr(feature = "binding-generation", ts(type = "string"))]
    pub end_time: NaiveTime,
    /// Intraday resolution to request
    pub detail_level: DetailLevel,
    /// When the experiment was created
    #[cfg_attr(feature = "binding-generation", ts(type = "string"))]
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detail_level_round_trip() {
        for level in [
            DetailLevel::OneSecond,
            DetailLevel::OneMinute,
            DetailLevel::FiveMinutes,
            DetailLevel::FifteenMinutes,
        ] {
            assert_eq!(DetailLevel::parse(level.as_str()), level);
        }
    }

    #[test]
    fn test_detail_level_unknown_falls_back() {
        assert_eq!(DetailLevel::parse("30sec"), DetailLevel::OneMinute);
    }

    #[test]
    fn test_detail_level_serde_uses_fitbit_segments() {
        assert_eq!(
            serde_json::to_string(&DetailLevel::OneSecond).unwrap(),
            "\"1sec\""
        );
        let parsed: DetailLevel = serde_json::from_str("\"15min\"").unwrap();
        assert_eq!(parsed, DetailLevel::FifteenMinutes);
    }
}
