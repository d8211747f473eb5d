// SPDX-License-Identifier: MIT

//! Pilot model for storage and API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
#[cfg(feature = "binding-generation")]
use ts_rs::TS;

/// Biological sex recorded for a pilot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub enum Sex {
    M,
    F,
}

impl Sex {
    /// String form stored in the database.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::M => "M",
            Self::F => "F",
        }
    }

    /// Parse from the database string representation.
    pub fn parse(s: &str) -> Self {
        match s {
            "F" => Self::F,
            _ => Self::M,
        }
    }
}

/// A pilot taking part in experiments.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct Pilot {
    /// Database ID
    pub id: i64,
    /// First name
    pub first_name: String,
    /// Last name
    pub last_name: String,
    /// Crew role (captain, first officer, ...)
    pub role: String,
    /// Age in years
    pub age: i64,
    /// Biological sex
    pub sex: Sex,
    /// Linked Fitbit user ID, if any
    pub fitbit_user_id: Option<String>,
    /// When the pilot was created
    #[cfg_attr(feature = "binding-generation", ts(type = "string"))]
    pub created_at: DateTime<Utc>,
}

impl Pilot {
    /// Whether this pilot has a linked Fitbit account.
    pub fn has_fitbit_link(&self) -> bool {
        self.fitbit_user_id.is_some()
    }

    /// Display name used in dashboard payloads.
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sex_round_trip() {
        assert_eq!(Sex::parse(Sex::M.as_str()), Sex::M);
        assert_eq!(Sex::parse(Sex::F.as_str()), Sex::F);
    }

    #[test]
    fn test_sex_serde_single_letter() {
        assert_eq!(serde_json::to_string(&Sex::F).unwrap(), "\"F\"");
        let parsed: Sex = serde_json::from_str("\"M\"").unwrap();
        assert_eq!(parsed, Sex::M);
    }

    #[test]
    fn test_full_name() {
        let pilot = Pilot {
            id: 1,
            first_name: "Amelia".to_string(),
            last_name: "Earhart".to_string(),
            role: "captain".to_string(),
            age: 39,
            sex: Sex::F,
            fitbit_user_id: None,
            created_at: Utc::now(),
        };
        assert_eq!(pilot.full_name(), "Amelia Earhart");
        assert!(!pilot.has_fitbit_link());
    }
}
