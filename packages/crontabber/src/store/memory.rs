//! In-memory ledger and run log.
//!
//! Drop-in stand-in for the Postgres store in tests. Every log append is
//! kept so assertions can inspect the run history.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{JobStateStore, RunLog};
use crate::error::CronError;
use crate::state::{ErrorInfo, JobState};

/// One appended run-log row.
#[derive(Debug, Clone, PartialEq)]
pub enum LogEntry {
    Success {
        app_name: String,
        success: DateTime<Utc>,
        duration: Duration,
    },
    Failure {
        app_name: String,
        duration: Duration,
        error: ErrorInfo,
    },
}

impl LogEntry {
    pub fn app_name(&self) -> &str {
        match self {
            LogEntry::Success { app_name, .. } | LogEntry::Failure { app_name, .. } => app_name,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, LogEntry::Success { .. })
    }
}

/// Ledger and run log backed by process memory.
#[derive(Default)]
pub struct MemoryStore {
    states: Mutex<HashMap<String, JobState>>,
    log: Mutex<Vec<LogEntry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All appended log entries, in append order.
    pub fn log_entries(&self) -> Vec<LogEntry> {
        self.log.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Overwrite a state row directly. Test setup helper, e.g. for
    /// winding the clock back.
    pub fn put(&self, app_name: &str, state: JobState) {
        self.states
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(app_name.to_string(), state);
    }
}

#[async_trait]
impl JobStateStore for MemoryStore {
    async fn contains(&self, app_name: &str) -> Result<bool> {
        Ok(self
            .states
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(app_name))
    }

    async fn get(&self, app_name: &str) -> Result<Option<JobState>> {
        Ok(self
            .states
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(app_name)
            .cloned())
    }

    async fn set(&self, app_name: &str, state: &JobState) -> Result<()> {
        self.states
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(app_name.to_string(), state.clone());
        Ok(())
    }

    async fn delete(&self, app_name: &str) -> Result<()> {
        let removed = self
            .states
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(app_name);
        if removed.is_none() {
            return Err(CronError::StateNotFound(app_name.to_string()).into());
        }
        Ok(())
    }

    async fn app_names(&self) -> Result<Vec<String>> {
        Ok(self
            .states
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect())
    }

    async fn snapshot(&self) -> Result<HashMap<String, JobState>> {
        Ok(self.states.lock().unwrap_or_else(|e| e.into_inner()).clone())
    }

    async fn has_data(&self) -> Result<bool> {
        Ok(!self
            .states
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_empty())
    }
}

#[async_trait]
impl RunLog for MemoryStore {
    async fn log_success(
        &self,
        app_name: &str,
        success: DateTime<Utc>,
        duration: Duration,
    ) -> Result<()> {
        self.log
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(LogEntry::Success {
                app_name: app_name.to_string(),
                success,
                duration,
            });
        Ok(())
    }

    async fn log_failure(
        &self,
        app_name: &str,
        duration: Duration,
        error: &ErrorInfo,
    ) -> Result<()> {
        self.log
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(LogEntry::Failure {
                app_name: app_name.to_string(),
                duration,
                error: error.clone(),
            });
        Ok(())
    }
}
