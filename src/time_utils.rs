// SPDX-License-Identifier: MIT

//! Small time formatting helpers shared across routes and services.

use chrono::{DateTime, NaiveTime, Utc};

/// Format a UTC timestamp as RFC 3339 with second precision.
pub fn format_utc_rfc3339(dt: DateTime<Utc>) -> String {
    dt.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

/// Format a time-of-day as `HH:MM`, the granularity Fitbit's intraday
/// endpoint accepts and the label format used by dashboards.
pub fn format_hour_minute(t: NaiveTime) -> String {
    t.format("%H:%M").to_string()
}

/// Parse a `HH:MM:SS` sample timestamp as returned by the intraday endpoint.
pub fn parse_sample_time(s: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(s, "%H:%M:%S").ok()
}
