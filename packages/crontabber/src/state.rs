//! Ledger row model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Captured failure detail, stored in the ledger's `last_error` column and
/// the run log's `exc_*` columns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    #[serde(rename = "type")]
    pub error_type: String,
    pub value: String,
    pub traceback: String,
}

impl ErrorInfo {
    /// Capture an `anyhow::Error` chain.
    ///
    /// Concrete error types are erased by the time a job failure reaches
    /// the executor, so `error_type` records the root cause, `value` the
    /// outermost message and `traceback` the full chain rendering.
    pub fn from_error(err: &anyhow::Error) -> Self {
        Self {
            error_type: err.root_cause().to_string(),
            value: err.to_string(),
            traceback: format!("{err:?}"),
        }
    }
}

/// One row of the state ledger, keyed by `app_name`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobState {
    /// When the job becomes due again. Null only transiently, before the
    /// first completed run.
    pub next_run: Option<DateTime<Utc>>,
    /// Set once on the first recorded run, never overwritten.
    pub first_run: Option<DateTime<Utc>>,
    /// Most recent run attempt, success or failure.
    pub last_run: Option<DateTime<Utc>>,
    /// Most recent successful completion.
    pub last_success: Option<DateTime<Utc>>,
    /// Snapshot of the descriptor's dependency list at the last run.
    pub depends_on: Vec<String>,
    /// Consecutive failures; reset to zero on any success.
    pub error_count: i32,
    pub last_error: Option<ErrorInfo>,
    /// Set while a run is in flight, cleared at finalization.
    pub ongoing: Option<DateTime<Utc>>,
}

impl JobState {
    /// Skeletal row written when a job starts with no prior history. It
    /// only hosts the `ongoing` marker and is overwritten at finalization.
    pub fn ongoing_placeholder(depends_on: Vec<String>, started: DateTime<Utc>) -> Self {
        Self {
            depends_on,
            ongoing: Some(started),
            ..Self::default()
        }
    }

    /// `last_error` as stored: a JSON object, `{}` when there is none.
    pub fn last_error_json(&self) -> serde_json::Value {
        match &self.last_error {
            Some(info) => {
                serde_json::to_value(info).unwrap_or_else(|_| serde_json::json!({}))
            }
            None => serde_json::json!({}),
        }
    }

    /// Parse a stored `last_error` value; an empty object or anything
    /// unrecognizable means "no error".
    pub fn parse_last_error(value: &serde_json::Value) -> Option<ErrorInfo> {
        if value.as_object().map_or(true, |map| map.is_empty()) {
            return None;
        }
        serde_json::from_value(value.clone()).ok()
    }
}
