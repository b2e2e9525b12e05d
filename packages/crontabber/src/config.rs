//! Environment-driven configuration and job-line parsing.

use std::env;

use anyhow::{Context, Result};
use dotenvy::dotenv;

use crate::error::CronError;

pub const DEFAULT_ERROR_RETRY_SECONDS: i64 = 300;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    /// Raw job list, one `class|frequency[|HH:MM]` entry per line.
    pub jobs: String,
    /// Seconds until a failed job is retried.
    pub error_retry_seconds: i64,
    pub sentry_dsn: Option<String>,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        Ok(Self {
            database_url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            jobs: env::var("CRONTABBER_JOBS").unwrap_or_default(),
            error_retry_seconds: env::var("CRONTABBER_ERROR_RETRY_TIME")
                .unwrap_or_else(|_| DEFAULT_ERROR_RETRY_SECONDS.to_string())
                .parse()
                .context("CRONTABBER_ERROR_RETRY_TIME must be a number of seconds")?,
            sentry_dsn: env::var("SENTRY_DSN").ok(),
        })
    }

    /// The configured job list, parsed.
    pub fn job_specs(&self) -> Result<Vec<JobSpec>, CronError> {
        parse_jobs(&self.jobs)
    }
}

/// One parsed job entry. The schedule stays in raw string form so that
/// `configtest` can report bad values instead of refusing to start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSpec {
    pub class_identity: String,
    pub frequency: String,
    pub time: Option<String>,
}

/// Parse the free-form jobs option: one entry per line, commas and
/// semicolons also separate, `#` lines are comments.
pub fn parse_jobs(text: &str) -> Result<Vec<JobSpec>, CronError> {
    text.split(['\n', ',', ';'])
        .map(str::trim)
        .filter(|entry| !entry.is_empty() && !entry.starts_with('#'))
        .map(parse_entry)
        .collect()
}

fn parse_entry(entry: &str) -> Result<JobSpec, CronError> {
    let (class_identity, metadata) = entry
        .split_once('|')
        .ok_or_else(|| CronError::JobDescription(entry.to_string()))?;
    let fields: Vec<&str> = metadata.split('|').map(str::trim).collect();
    let (frequency, time) = match fields.as_slice() {
        // a bare `HH:MM` means "daily at that time"
        [single] if single.contains(':') => ("1d".to_string(), Some(single.to_string())),
        [single] => (single.to_string(), None),
        [frequency, time] => (
            frequency.to_string(),
            (!time.is_empty()).then(|| time.to_string()),
        ),
        _ => return Err(CronError::JobDescription(entry.to_string())),
    };
    Ok(JobSpec {
        class_identity: class_identity.trim().to_string(),
        frequency,
        time,
    })
}
