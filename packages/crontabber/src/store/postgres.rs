//! Postgres-backed ledger and run log.
//!
//! The schema matches the historical tables: state in `crontabber`,
//! executions in `crontabber_log`. Bootstrap creates both tables when
//! missing and adds the `ongoing` column to state tables created before
//! that column existed.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::types::PgInterval;
use sqlx::{FromRow, PgPool};

use super::{JobStateStore, RunLog};
use crate::error::CronError;
use crate::state::{ErrorInfo, JobState};

const CREATE_CRONTABBER_SQL: &str = "
    CREATE TABLE IF NOT EXISTS crontabber (
        app_name text NOT NULL,
        next_run timestamp with time zone,
        first_run timestamp with time zone,
        last_run timestamp with time zone,
        last_success timestamp with time zone,
        ongoing timestamp with time zone,
        error_count integer DEFAULT 0,
        depends_on text[],
        last_error json
    )
";

const CREATE_CRONTABBER_LOG_SQL: &str = "
    CREATE TABLE IF NOT EXISTS crontabber_log (
        id SERIAL NOT NULL,
        app_name text NOT NULL,
        log_time timestamp with time zone DEFAULT now() NOT NULL,
        duration interval,
        success timestamp with time zone,
        exc_type text,
        exc_value text,
        exc_traceback text
    )
";

const ONGOING_COLUMN_SQL: &str = "
    SELECT column_name FROM information_schema.columns
    WHERE table_name = 'crontabber' AND column_name = 'ongoing'
";

const STATE_COLUMNS: &str =
    "next_run, first_run, last_run, last_success, depends_on, error_count, last_error, ongoing";

/// Ledger and run log in one Postgres database.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Wrap `pool`, creating or migrating the backing tables as needed.
    ///
    /// Safe under concurrent initialization: table creation is
    /// `IF NOT EXISTS` and the column migration tolerates losing the race.
    pub async fn create(pool: PgPool) -> Result<Self> {
        let store = Self { pool };
        store.bootstrap().await?;
        Ok(store)
    }

    async fn bootstrap(&self) -> Result<()> {
        sqlx::query(CREATE_CRONTABBER_SQL)
            .execute(&self.pool)
            .await
            .context("creating crontabber table")?;

        // deployments from before the ongoing marker lack the column
        let ongoing: Option<String> = sqlx::query_scalar(ONGOING_COLUMN_SQL)
            .fetch_optional(&self.pool)
            .await?;
        if ongoing.is_none() {
            tracing::info!("migrating crontabber table: adding the ongoing column");
            let migrated = sqlx::query("ALTER TABLE crontabber ADD ongoing TIMESTAMP WITH TIME ZONE")
                .execute(&self.pool)
                .await;
            if let Err(err) = migrated {
                // a concurrent initializer may have added it first
                let ongoing: Option<String> = sqlx::query_scalar(ONGOING_COLUMN_SQL)
                    .fetch_optional(&self.pool)
                    .await?;
                if ongoing.is_none() {
                    return Err(err).context("adding the ongoing column");
                }
            }
        }

        sqlx::query(CREATE_CRONTABBER_LOG_SQL)
            .execute(&self.pool)
            .await
            .context("creating crontabber_log table")?;
        Ok(())
    }
}

#[derive(FromRow)]
struct StateRow {
    next_run: Option<DateTime<Utc>>,
    first_run: Option<DateTime<Utc>>,
    last_run: Option<DateTime<Utc>>,
    last_success: Option<DateTime<Utc>>,
    depends_on: Option<Vec<String>>,
    error_count: Option<i32>,
    last_error: Option<serde_json::Value>,
    ongoing: Option<DateTime<Utc>>,
}

impl From<StateRow> for JobState {
    fn from(row: StateRow) -> Self {
        JobState {
            next_run: row.next_run,
            first_run: row.first_run,
            last_run: row.last_run,
            last_success: row.last_success,
            depends_on: row.depends_on.unwrap_or_default(),
            error_count: row.error_count.unwrap_or(0),
            last_error: row.last_error.as_ref().and_then(JobState::parse_last_error),
            ongoing: row.ongoing,
        }
    }
}

#[derive(FromRow)]
struct SnapshotRow {
    app_name: String,
    #[sqlx(flatten)]
    state: StateRow,
}

fn pg_interval(duration: Duration) -> PgInterval {
    PgInterval {
        months: 0,
        days: 0,
        microseconds: duration.as_micros() as i64,
    }
}

#[async_trait]
impl JobStateStore for PgStore {
    async fn contains(&self, app_name: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        let found: Option<String> =
            sqlx::query_scalar("SELECT app_name FROM crontabber WHERE app_name = $1")
                .bind(app_name)
                .fetch_optional(&mut *tx)
                .await?;
        tx.commit().await?;
        Ok(found.is_some())
    }

    async fn get(&self, app_name: &str) -> Result<Option<JobState>> {
        let sql = format!("SELECT {STATE_COLUMNS} FROM crontabber WHERE app_name = $1");
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query_as::<_, StateRow>(&sql)
            .bind(app_name)
            .fetch_optional(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(row.map(JobState::from))
    }

    async fn set(&self, app_name: &str, state: &JobState) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        // the table has no unique constraint (historical schema), so the
        // upsert is select-then-write inside one transaction
        let existing: Option<String> =
            sqlx::query_scalar("SELECT app_name FROM crontabber WHERE app_name = $1")
                .bind(app_name)
                .fetch_optional(&mut *tx)
                .await?;
        let sql = if existing.is_some() {
            "UPDATE crontabber SET
                next_run = $2, first_run = $3, last_run = $4, last_success = $5,
                depends_on = $6, error_count = $7, last_error = $8, ongoing = $9
             WHERE app_name = $1"
        } else {
            "INSERT INTO crontabber (
                app_name, next_run, first_run, last_run, last_success,
                depends_on, error_count, last_error, ongoing
             ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)"
        };
        sqlx::query(sql)
            .bind(app_name)
            .bind(state.next_run)
            .bind(state.first_run)
            .bind(state.last_run)
            .bind(state.last_success)
            .bind(&state.depends_on)
            .bind(state.error_count)
            .bind(state.last_error_json())
            .bind(state.ongoing)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn delete(&self, app_name: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let deleted = sqlx::query("DELETE FROM crontabber WHERE app_name = $1")
            .bind(app_name)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        if deleted == 0 {
            return Err(CronError::StateNotFound(app_name.to_string()).into());
        }
        tx.commit().await?;
        Ok(())
    }

    async fn app_names(&self) -> Result<Vec<String>> {
        let mut tx = self.pool.begin().await?;
        let names: Vec<String> = sqlx::query_scalar("SELECT app_name FROM crontabber")
            .fetch_all(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(names)
    }

    async fn snapshot(&self) -> Result<HashMap<String, JobState>> {
        let sql = format!("SELECT app_name, {STATE_COLUMNS} FROM crontabber");
        let mut tx = self.pool.begin().await?;
        let rows = sqlx::query_as::<_, SnapshotRow>(&sql)
            .fetch_all(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(rows
            .into_iter()
            .map(|row| (row.app_name, JobState::from(row.state)))
            .collect())
    }

    async fn has_data(&self) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM crontabber")
            .fetch_one(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(count > 0)
    }
}

#[async_trait]
impl RunLog for PgStore {
    async fn log_success(
        &self,
        app_name: &str,
        success: DateTime<Utc>,
        duration: Duration,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("INSERT INTO crontabber_log (app_name, success, duration) VALUES ($1, $2, $3)")
            .bind(app_name)
            .bind(success)
            .bind(pg_interval(duration))
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn log_failure(
        &self,
        app_name: &str,
        duration: Duration,
        error: &ErrorInfo,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "INSERT INTO crontabber_log (app_name, duration, exc_type, exc_value, exc_traceback)
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(app_name)
        .bind(pg_interval(duration))
        .bind(&error.error_type)
        .bind(&error.value)
        .bind(&error.traceback)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pg_interval_converts_to_microseconds() {
        let interval = pg_interval(Duration::from_millis(1_500));
        assert_eq!(interval.months, 0);
        assert_eq!(interval.days, 0);
        assert_eq!(interval.microseconds, 1_500_000);
    }

    #[test]
    fn state_row_with_all_nulls_maps_to_defaults() {
        let row = StateRow {
            next_run: None,
            first_run: None,
            last_run: None,
            last_success: None,
            depends_on: None,
            error_count: None,
            last_error: None,
            ongoing: None,
        };
        assert_eq!(JobState::from(row), JobState::default());
    }

    #[test]
    fn state_row_parses_last_error_json() {
        let row = StateRow {
            next_run: None,
            first_run: None,
            last_run: None,
            last_success: None,
            depends_on: Some(vec!["parent".into()]),
            error_count: Some(2),
            last_error: Some(serde_json::json!({
                "type": "timeout",
                "value": "fetching upstream",
                "traceback": "fetching upstream\n\nCaused by:\n    timeout",
            })),
            ongoing: None,
        };
        let state = JobState::from(row);
        assert_eq!(state.error_count, 2);
        let error = state.last_error.expect("error should parse");
        assert_eq!(error.error_type, "timeout");
        assert_eq!(error.value, "fetching upstream");
    }

    #[test]
    fn state_row_treats_empty_error_object_as_none() {
        let row = StateRow {
            next_run: None,
            first_run: None,
            last_run: None,
            last_success: None,
            depends_on: None,
            error_count: Some(0),
            last_error: Some(serde_json::json!({})),
            ongoing: None,
        };
        assert!(JobState::from(row).last_error.is_none());
    }
}
