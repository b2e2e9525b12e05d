//! Durable job state and run-log storage.
//!
//! The scheduler core talks to storage through two narrow traits: a
//! transactional `app_name -> JobState` map and an append-only run log.
//! [`postgres`] is the production backend; [`memory`] backs tests and
//! embedders that want to introspect without a database.

pub mod memory;
pub mod postgres;

use std::collections::HashMap;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::state::{ErrorInfo, JobState};

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Transactional mapping of `app_name` to [`JobState`].
///
/// Every operation runs in its own transaction: commit on normal return,
/// roll back on any error.
#[async_trait]
pub trait JobStateStore: Send + Sync {
    /// True iff a row exists for `app_name`.
    async fn contains(&self, app_name: &str) -> Result<bool>;

    /// The state row, or `None` when the job has never run.
    async fn get(&self, app_name: &str) -> Result<Option<JobState>>;

    /// Atomic upsert: insert when absent, overwrite all columns when
    /// present.
    async fn set(&self, app_name: &str, state: &JobState) -> Result<()>;

    /// Remove the row; fails with [`crate::CronError::StateNotFound`]
    /// when absent.
    async fn delete(&self, app_name: &str) -> Result<()>;

    /// All ledger keys.
    async fn app_names(&self) -> Result<Vec<String>>;

    /// The full `app_name -> JobState` map.
    async fn snapshot(&self) -> Result<HashMap<String, JobState>>;

    /// True iff at least one row exists.
    async fn has_data(&self) -> Result<bool>;
}

/// Append-only log of job executions.
///
/// No read API: the log is for operator post-mortem, not for scheduling
/// decisions.
#[async_trait]
pub trait RunLog: Send + Sync {
    /// Record one successful execution.
    async fn log_success(
        &self,
        app_name: &str,
        success: DateTime<Utc>,
        duration: Duration,
    ) -> Result<()>;

    /// Record one failed execution.
    async fn log_failure(
        &self,
        app_name: &str,
        duration: Duration,
        error: &ErrorInfo,
    ) -> Result<()>;
}
