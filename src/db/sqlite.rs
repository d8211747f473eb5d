// SPDX-License-Identifier: MIT

//! SQLite client wrapper with typed operations.
//!
//! Provides high-level operations for:
//! - Fitbit accounts (token storage)
//! - Pilots
//! - Experiments
//! - Participations and their heart-rate samples

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;

use crate::error::AppError;
use crate::models::{
    DetailLevel, Experiment, FitbitAccount, HeartRateSample, Participation, Pilot, Sex,
};

/// SQLite database client.
#[derive(Clone)]
pub struct SqliteDb {
    pool: SqlitePool,
}

impl SqliteDb {
    /// Connect to the database and run migrations.
    ///
    /// Creates the database file if it does not exist yet.
    pub async fn new(database_url: &str) -> Result<Self, AppError> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| AppError::Database(format!("Invalid database URL: {}", e)))?
            .create_if_missing(true)
            .foreign_keys(true);

        // Every pooled connection to `:memory:` opens its own empty database,
        // so in-memory URLs are pinned to a single connection.
        let max_connections = if database_url.contains(":memory:") { 1 } else { 5 };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .map_err(|e| AppError::Database(format!("Failed to connect to SQLite: {}", e)))?;

        let db = Self { pool };
        db.migrate().await?;

        tracing::info!(url = database_url, "Connected to SQLite");

        Ok(db)
    }

    /// Create all tables if they do not exist yet.
    async fn migrate(&self) -> Result<(), AppError> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS fitbit_accounts (
                fitbit_user_id TEXT PRIMARY KEY,
                access_token TEXT NOT NULL,
                refresh_token TEXT NOT NULL,
                token_expires_at TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS pilots (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                first_name TEXT NOT NULL,
                last_name TEXT NOT NULL,
                role TEXT NOT NULL,
                age INTEGER NOT NULL,
                sex TEXT NOT NULL,
                fitbit_user_id TEXT
                    REFERENCES fitbit_accounts(fitbit_user_id) ON DELETE SET NULL,
                created_at TEXT NOT NULL
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS experiments (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                date TEXT NOT NULL,
                start_time TEXT NOT NULL,
                end_time TEXT NOT NULL,
                detail_level TEXT NOT NULL,
                created_at TEXT NOT NULL
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS participations (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                experiment_id INTEGER NOT NULL
                    REFERENCES experiments(id) ON DELETE CASCADE,
                pilot_id INTEGER NOT NULL
                    REFERENCES pilots(id) ON DELETE CASCADE,
                average_heart_rate REAL,
                max_heart_rate INTEGER,
                min_heart_rate INTEGER,
                elevated_count INTEGER,
                UNIQUE (experiment_id, pilot_id)
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS heart_rate_samples (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                participation_id INTEGER NOT NULL
                    REFERENCES participations(id) ON DELETE CASCADE,
                sample_time TEXT NOT NULL,
                value INTEGER NOT NULL
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r"
            CREATE INDEX IF NOT EXISTS idx_samples_participation
            ON heart_rate_samples(participation_id)
            ",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // ─── Fitbit Account Operations ───────────────────────────────

    /// Get an account by Fitbit user ID.
    pub async fn get_account(
        &self,
        fitbit_user_id: &str,
    ) -> Result<Option<FitbitAccount>, AppError> {
        let row = sqlx::query(
            r"
            SELECT fitbit_user_id, access_token, refresh_token,
                   token_expires_at, created_at, updated_at
            FROM fitbit_accounts
            WHERE fitbit_user_id = $1
            ",
        )
        .bind(fitbit_user_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| row_to_account(&r)).transpose()
    }

    /// Create an account or, if it already exists, replace its tokens.
    pub async fn upsert_account(
        &self,
        fitbit_user_id: &str,
        access_token: &str,
        refresh_token: &str,
        token_expires_at: DateTime<Utc>,
    ) -> Result<FitbitAccount, AppError> {
        let now = Utc::now();

        sqlx::query(
            r"
            INSERT INTO fitbit_accounts (
                fitbit_user_id, access_token, refresh_token,
                token_expires_at, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $5)
            ON CONFLICT (fitbit_user_id) DO UPDATE SET
                access_token = excluded.access_token,
                refresh_token = excluded.refresh_token,
                token_expires_at = excluded.token_expires_at,
                updated_at = excluded.updated_at
            ",
        )
        .bind(fitbit_user_id)
        .bind(access_token)
        .bind(refresh_token)
        .bind(token_expires_at)
        .bind(now)
        .execute(&self.pool)
        .await?;

        self.get_account(fitbit_user_id).await?.ok_or_else(|| {
            AppError::Database("Account disappeared right after upsert".to_string())
        })
    }

    /// Replace the tokens of an existing account.
    pub async fn update_account_tokens(
        &self,
        fitbit_user_id: &str,
        access_token: &str,
        refresh_token: &str,
        token_expires_at: DateTime<Utc>,
    ) -> Result<(), AppError> {
        sqlx::query(
            r"
            UPDATE fitbit_accounts
            SET access_token = $2, refresh_token = $3,
                token_expires_at = $4, updated_at = $5
            WHERE fitbit_user_id = $1
            ",
        )
        .bind(fitbit_user_id)
        .bind(access_token)
        .bind(refresh_token)
        .bind(token_expires_at)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Delete an account row. Pilot links are cleared by the FK action.
    pub async fn delete_account(&self, fitbit_user_id: &str) -> Result<(), AppError> {
        sqlx::query("DELETE FROM fitbit_accounts WHERE fitbit_user_id = $1")
            .bind(fitbit_user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Get the pilot linked to an account, if any.
    pub async fn pilot_for_account(
        &self,
        fitbit_user_id: &str,
    ) -> Result<Option<Pilot>, AppError> {
        let row = sqlx::query(
            r"
            SELECT id, first_name, last_name, role, age, sex, fitbit_user_id, created_at
            FROM pilots
            WHERE fitbit_user_id = $1
            ",
        )
        .bind(fitbit_user_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| row_to_pilot(&r)).transpose()
    }

    // ─── Pilot Operations ────────────────────────────────────────

    /// Create a pilot.
    pub async fn create_pilot(
        &self,
        first_name: &str,
        last_name: &str,
        role: &str,
        age: i64,
        sex: Sex,
    ) -> Result<Pilot, AppError> {
        let now = Utc::now();

        let result = sqlx::query(
            r"
            INSERT INTO pilots (first_name, last_name, role, age, sex, fitbit_user_id, created_at)
            VALUES ($1, $2, $3, $4, $5, NULL, $6)
            ",
        )
        .bind(first_name)
        .bind(last_name)
        .bind(role)
        .bind(age)
        .bind(sex.as_str())
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(Pilot {
            id: result.last_insert_rowid(),
            first_name: first_name.to_string(),
            last_name: last_name.to_string(),
            role: role.to_string(),
            age,
            sex,
            fitbit_user_id: None,
            created_at: now,
        })
    }

    /// Get a pilot by ID.
    pub async fn get_pilot(&self, id: i64) -> Result<Option<Pilot>, AppError> {
        let row = sqlx::query(
            r"
            SELECT id, first_name, last_name, role, age, sex, fitbit_user_id, created_at
            FROM pilots
            WHERE id = $1
            ",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| row_to_pilot(&r)).transpose()
    }

    /// List all pilots, most recent first.
    pub async fn list_pilots(&self) -> Result<Vec<Pilot>, AppError> {
        let rows = sqlx::query(
            r"
            SELECT id, first_name, last_name, role, age, sex, fitbit_user_id, created_at
            FROM pilots
            ORDER BY id DESC
            ",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_pilot).collect()
    }

    /// Replace a pilot's identifying attributes. Returns false if no such pilot.
    pub async fn update_pilot(
        &self,
        id: i64,
        first_name: &str,
        last_name: &str,
        role: &str,
        age: i64,
        sex: Sex,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            r"
            UPDATE pilots
            SET first_name = $2, last_name = $3, role = $4, age = $5, sex = $6
            WHERE id = $1
            ",
        )
        .bind(id)
        .bind(first_name)
        .bind(last_name)
        .bind(role)
        .bind(age)
        .bind(sex.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Delete a pilot. Returns false if no such pilot existed.
    pub async fn delete_pilot(&self, id: i64) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM pilots WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Point a pilot at a Fitbit account, or clear the link with `None`.
    pub async fn set_pilot_fitbit_user(
        &self,
        pilot_id: i64,
        fitbit_user_id: Option<&str>,
    ) -> Result<(), AppError> {
        sqlx::query("UPDATE pilots SET fitbit_user_id = $2 WHERE id = $1")
            .bind(pilot_id)
            .bind(fitbit_user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // ─── Experiment Operations ───────────────────────────────────

    /// Create an experiment.
    pub async fn create_experiment(
        &self,
        name: &str,
        date: NaiveDate,
        start_time: NaiveTime,
        end_time: NaiveTime,
        detail_level: DetailLevel,
    ) -> Result<Experiment, AppError> {
        let now = Utc::now();

        let result = sqlx::query(
            r"
            INSERT INTO experiments (name, date, start_time, end_time, detail_level, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ",
        )
        .bind(name)
        .bind(date)
        .bind(start_time)
        .bind(end_time)
        .bind(detail_level.as_str())
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(Experiment {
            id: result.last_insert_rowid(),
            name: name.to_string(),
            date,
            start_time,
            end_time,
            detail_level,
            created_at: now,
        })
    }

    /// Get an experiment by ID.
    pub async fn get_experiment(&self, id: i64) -> Result<Option<Experiment>, AppError> {
        let row = sqlx::query(
            r"
            SELECT id, name, date, start_time, end_time, detail_level, created_at
            FROM experiments
            WHERE id = $1
            ",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| row_to_experiment(&r)).transpose()
    }

    /// List all experiments, most recent first.
    pub async fn list_experiments(&self) -> Result<Vec<Experiment>, AppError> {
        let rows = sqlx::query(
            r"
            SELECT id, name, date, start_time, end_time, detail_level, created_at
            FROM experiments
            ORDER BY date DESC, id DESC
            ",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_experiment).collect()
    }

    /// Replace an experiment's fields. Returns false if no such experiment.
    #[allow(clippy::too_many_arguments)]
    pub async fn update_experiment(
        &self,
        id: i64,
        name: &str,
        date: NaiveDate,
        start_time: NaiveTime,
        end_time: NaiveTime,
        detail_level: DetailLevel,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            r"
            UPDATE experiments
            SET name = $2, date = $3, start_time = $4, end_time = $5, detail_level = $6
            WHERE id = $1
            ",
        )
        .bind(id)
        .bind(name)
        .bind(date)
        .bind(start_time)
        .bind(end_time)
        .bind(detail_level.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Delete an experiment and, via FK cascade, its participations.
    pub async fn delete_experiment(&self, id: i64) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM experiments WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Experiments a pilot took part in, most recent first.
    pub async fn experiments_for_pilot(&self, pilot_id: i64) -> Result<Vec<Experiment>, AppError> {
        let rows = sqlx::query(
            r"
            SELECT e.id, e.name, e.date, e.start_time, e.end_time, e.detail_level, e.created_at
            FROM experiments e
            JOIN participations p ON p.experiment_id = e.id
            WHERE p.pilot_id = $1
            ORDER BY e.date DESC, e.id DESC
            ",
        )
        .bind(pilot_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_experiment).collect()
    }

    /// Pilots taking part in an experiment, in participation order.
    pub async fn pilots_for_experiment(&self, experiment_id: i64) -> Result<Vec<Pilot>, AppError> {
        let rows = sqlx::query(
            r"
            SELECT pi.id, pi.first_name, pi.last_name, pi.role, pi.age, pi.sex,
                   pi.fitbit_user_id, pi.created_at
            FROM pilots pi
            JOIN participations pa ON pa.pilot_id = pi.id
            WHERE pa.experiment_id = $1
            ORDER BY pa.id
            ",
        )
        .bind(experiment_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_pilot).collect()
    }

    // ─── Participation Operations ────────────────────────────────

    /// Create a participation with empty aggregates.
    ///
    /// The UNIQUE constraint on (experiment, pilot) backs up the
    /// duplicate check done by the ingestion service.
    pub async fn create_participation(
        &self,
        experiment_id: i64,
        pilot_id: i64,
    ) -> Result<Participation, AppError> {
        let result = sqlx::query(
            r"
            INSERT INTO participations (experiment_id, pilot_id)
            VALUES ($1, $2)
            ",
        )
        .bind(experiment_id)
        .bind(pilot_id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if e.as_database_error()
                .is_some_and(|d| d.is_unique_violation())
            {
                AppError::DuplicateParticipation
            } else {
                AppError::from(e)
            }
        })?;

        Ok(Participation {
            id: result.last_insert_rowid(),
            experiment_id,
            pilot_id,
            average_heart_rate: None,
            max_heart_rate: None,
            min_heart_rate: None,
            elevated_count: None,
        })
    }

    /// Get the participation of a pilot in an experiment, if any.
    pub async fn get_participation(
        &self,
        experiment_id: i64,
        pilot_id: i64,
    ) -> Result<Option<Participation>, AppError> {
        let row = sqlx::query(
            r"
            SELECT id, experiment_id, pilot_id, average_heart_rate,
                   max_heart_rate, min_heart_rate, elevated_count
            FROM participations
            WHERE experiment_id = $1 AND pilot_id = $2
            ",
        )
        .bind(experiment_id)
        .bind(pilot_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| row_to_participation(&r)).transpose()
    }

    /// List all participations of an experiment.
    pub async fn list_participations(
        &self,
        experiment_id: i64,
    ) -> Result<Vec<Participation>, AppError> {
        let rows = sqlx::query(
            r"
            SELECT id, experiment_id, pilot_id, average_heart_rate,
                   max_heart_rate, min_heart_rate, elevated_count
            FROM participations
            WHERE experiment_id = $1
            ORDER BY id
            ",
        )
        .bind(experiment_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_participation).collect()
    }

    /// List all participations of a pilot across experiments.
    pub async fn participations_for_pilot(
        &self,
        pilot_id: i64,
    ) -> Result<Vec<Participation>, AppError> {
        let rows = sqlx::query(
            r"
            SELECT id, experiment_id, pilot_id, average_heart_rate,
                   max_heart_rate, min_heart_rate, elevated_count
            FROM participations
            WHERE pilot_id = $1
            ORDER BY id
            ",
        )
        .bind(pilot_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_participation).collect()
    }

    /// Store the aggregates computed during ingestion.
    pub async fn update_participation_aggregates(
        &self,
        participation_id: i64,
        average: Option<f64>,
        max: Option<i64>,
        min: Option<i64>,
    ) -> Result<(), AppError> {
        sqlx::query(
            r"
            UPDATE participations
            SET average_heart_rate = $2, max_heart_rate = $3, min_heart_rate = $4
            WHERE id = $1
            ",
        )
        .bind(participation_id)
        .bind(average)
        .bind(max)
        .bind(min)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Persist the elevated-sample count computed for a dashboard.
    pub async fn set_participation_elevated_count(
        &self,
        participation_id: i64,
        count: i64,
    ) -> Result<(), AppError> {
        sqlx::query("UPDATE participations SET elevated_count = $2 WHERE id = $1")
            .bind(participation_id)
            .bind(count)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // ─── Heart-Rate Sample Operations ────────────────────────────

    /// Insert a batch of samples for a participation in one transaction.
    ///
    /// Returns the number of rows written.
    pub async fn insert_samples(
        &self,
        participation_id: i64,
        samples: &[(NaiveTime, i64)],
    ) -> Result<u64, AppError> {
        let mut tx = self.pool.begin().await?;

        for (time, value) in samples {
            sqlx::query(
                r"
                INSERT INTO heart_rate_samples (participation_id, sample_time, value)
                VALUES ($1, $2, $3)
                ",
            )
            .bind(participation_id)
            .bind(*time)
            .bind(*value)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        Ok(samples.len() as u64)
    }

    /// Get all samples of a participation, ordered by time of day.
    pub async fn samples_for_participation(
        &self,
        participation_id: i64,
    ) -> Result<Vec<HeartRateSample>, AppError> {
        let rows = sqlx::query(
            r"
            SELECT id, participation_id, sample_time, value
            FROM heart_rate_samples
            WHERE participation_id = $1
            ORDER BY sample_time
            ",
        )
        .bind(participation_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_sample).collect()
    }
}

// ─── Row Mappers ─────────────────────────────────────────────────

fn row_to_account(row: &SqliteRow) -> Result<FitbitAccount, AppError> {
    Ok(FitbitAccount {
        fitbit_user_id: row.try_get("fitbit_user_id")?,
        access_token: row.try_get("access_token")?,
        refresh_token: row.try_get("refresh_token")?,
        token_expires_at: row.try_get("token_expires_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn row_to_pilot(row: &SqliteRow) -> Result<Pilot, AppError> {
    let sex: String = row.try_get("sex")?;
    Ok(Pilot {
        id: row.try_get("id")?,
        first_name: row.try_get("first_name")?,
        last_name: row.try_get("last_name")?,
        role: row.try_get("role")?,
        age: row.try_get("age")?,
        sex: Sex::parse(&sex),
        fitbit_user_id: row.try_get("fitbit_user_id")?,
        created_at: row.try_get("created_at")?,
    })
}

fn row_to_experiment(row: &SqliteRow) -> Result<Experiment, AppError> {
    let detail: String = row.try_get("detail_level")?;
    Ok(Experiment {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        date: row.try_get("date")?,
        start_time: row.try_get("start_time")?,
        end_time: row.try_get("end_time")?,
        detail_level: DetailLevel::parse(&detail),
        created_at: row.try_get("created_at")?,
    })
}

fn row_to_participation(row: &SqliteRow) -> Result<Participation, AppError> {
    Ok(Participation {
        id: row.try_get("id")?,
        experiment_id: row.try_get("experiment_id")?,
        pilot_id: row.try_get("pilot_id")?,
        average_heart_rate: row.try_get("average_heart_rate")?,
        max_heart_rate: row.try_get("max_heart_rate")?,
        min_heart_rate: row.try_get("min_heart_rate")?,
        elevated_count: row.try_get("elevated_count")?,
    })
}

fn row_to_sample(row: &SqliteRow) -> Result<HeartRateSample, AppError> {
    Ok(HeartRateSample {
        id: row.try_get("id")?,
        participation_id: row.try_get("participation_id")?,
        time: row.try_get("sample_time")?,
        value: row.try_get("value")?,
    })
}
