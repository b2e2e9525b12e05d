//! Per-job execution envelope.
//!
//! [`JobExecutor::run`] wraps a single job invocation: the due and
//! dependency short-circuits, the ongoing marker, driving the invoker's
//! success stream, and the finalization upsert that settles the ledger no
//! matter how the invocation ended. Job failures are captured and
//! recorded, never propagated; storage failures propagate.

use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use tracing::{debug, warn};

use crate::job::{JobContext, JobDescriptor};
use crate::scheduler::{self, DependencyStatus};
use crate::state::{ErrorInfo, JobState};
use crate::store::{JobStateStore, RunLog};

/// What [`JobExecutor::run`] did with the job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Ran; every yielded window succeeded.
    Completed,
    /// Ran and failed; the error is recorded in the ledger and log.
    Failed,
    /// Did not run.
    Skipped(SkipReason),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    NotDue,
    Dependency { dependency: String, reason: String },
}

/// Runs one job to completion and keeps the ledger truthful about it.
pub struct JobExecutor {
    store: Arc<dyn JobStateStore>,
    run_log: Arc<dyn RunLog>,
    error_retry_seconds: i64,
}

/// What driving the invoker produced.
struct DriveResult {
    last_success: Option<DateTime<Utc>>,
    failure: Option<ErrorInfo>,
    /// First run-log write failure; reported after finalization.
    log_error: Option<anyhow::Error>,
}

impl JobExecutor {
    pub fn new(
        store: Arc<dyn JobStateStore>,
        run_log: Arc<dyn RunLog>,
        error_retry_seconds: i64,
    ) -> Self {
        Self {
            store,
            run_log,
            error_retry_seconds,
        }
    }

    /// Execute one job.
    ///
    /// Unless `force`, the job is skipped when it is not due or when a
    /// dependency is missing, errored or stale. `force` bypasses both
    /// checks, including failed parents.
    pub async fn run(&self, descriptor: &JobDescriptor, force: bool) -> Result<RunOutcome> {
        let now = Utc::now();
        let prior = self.store.get(&descriptor.app_name).await?;

        if !force {
            if !scheduler::time_to_run(descriptor, prior.as_ref(), now) {
                debug!(app_name = %descriptor.app_name, "skipping, not time to run");
                return Ok(RunOutcome::Skipped(SkipReason::NotDue));
            }
            if let DependencyStatus::Blocked { dependency, reason } =
                scheduler::check_dependencies(self.store.as_ref(), descriptor, now).await?
            {
                debug!(
                    app_name = %descriptor.app_name,
                    dependency = %dependency,
                    reason = %reason,
                    "skipping, dependencies not met"
                );
                return Ok(RunOutcome::Skipped(SkipReason::Dependency {
                    dependency,
                    reason,
                }));
            }
        }

        debug!(app_name = %descriptor.app_name, "about to run");
        self.set_ongoing(descriptor, prior.clone(), now).await?;

        let drive = self.drive(descriptor, prior).await;

        // the ledger must be settled even after a mid-run storage failure
        self.finalize(descriptor, now, &drive).await?;

        if let Some(log_error) = drive.log_error {
            return Err(log_error);
        }
        Ok(if drive.failure.is_some() {
            RunOutcome::Failed
        } else {
            RunOutcome::Completed
        })
    }

    /// Publish the ongoing marker. Creates a skeletal row when the job
    /// has no history yet; finalization overwrites it either way.
    async fn set_ongoing(
        &self,
        descriptor: &JobDescriptor,
        prior: Option<JobState>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let state = match prior {
            Some(mut state) => {
                state.ongoing = Some(now);
                state
            }
            None => JobState::ongoing_placeholder(descriptor.depends_on.clone(), now),
        };
        self.store.set(&descriptor.app_name, &state).await
    }

    /// Invoke the job and log each yielded success before pulling the
    /// next. The duration of each window is measured from the previous
    /// yield (or the start of the run) on the monotonic clock.
    async fn drive(&self, descriptor: &JobDescriptor, prior: Option<JobState>) -> DriveResult {
        let mut result = DriveResult {
            last_success: None,
            failure: None,
            log_error: None,
        };
        let ctx = JobContext {
            app_name: descriptor.app_name.clone(),
            frequency_seconds: descriptor.frequency_seconds,
            time_of_day: descriptor.time_of_day,
            prior_state: prior,
        };

        let mut t0 = Instant::now();
        let mut job_failure = None;
        match descriptor.invoker.invoke(ctx).await {
            Ok(mut successes) => {
                while let Some(item) = successes.next().await {
                    match item {
                        Ok(success) => {
                            let duration = t0.elapsed();
                            // the yield counts even if the log write fails
                            result.last_success = Some(success);
                            debug!(
                                app_name = %descriptor.app_name,
                                success = %success,
                                "successfully ran"
                            );
                            if let Err(err) = self
                                .run_log
                                .log_success(&descriptor.app_name, success, duration)
                                .await
                            {
                                result.log_error = Some(err);
                                break;
                            }
                            t0 = Instant::now();
                        }
                        Err(err) => {
                            job_failure = Some(err);
                            break;
                        }
                    }
                }
            }
            Err(err) => job_failure = Some(err),
        }

        if let Some(err) = job_failure {
            let duration = t0.elapsed();
            let info = ErrorInfo::from_error(&err);
            warn!(app_name = %descriptor.app_name, error = %err, "job failed");
            self.capture_telemetry(&err);
            if let Err(log_err) = self
                .run_log
                .log_failure(&descriptor.app_name, duration, &info)
                .await
            {
                if result.log_error.is_none() {
                    result.log_error = Some(log_err);
                }
            }
            result.failure = Some(info);
        }
        result
    }

    /// Settle the ledger row. Runs whether the invocation completed,
    /// partially completed or failed.
    async fn finalize(
        &self,
        descriptor: &JobDescriptor,
        now: DateTime<Utc>,
        drive: &DriveResult,
    ) -> Result<()> {
        let mut state = self
            .store
            .get(&descriptor.app_name)
            .await?
            .unwrap_or_default();
        state.depends_on = descriptor.depends_on.clone();
        if state.first_run.is_none() {
            state.first_run = Some(now);
        }
        state.last_run = Some(now);
        if let Some(success) = drive.last_success {
            state.last_success = Some(success);
        }
        let failed = drive.failure.is_some();
        state.next_run = Some(scheduler::next_run_time(
            now,
            descriptor.frequency_seconds,
            descriptor.time_of_day,
            failed,
            self.error_retry_seconds,
        ));
        match &drive.failure {
            Some(info) => {
                state.last_error = Some(info.clone());
                state.error_count += 1;
            }
            None => {
                state.last_error = None;
                state.error_count = 0;
            }
        }
        state.ongoing = None;
        self.store.set(&descriptor.app_name, &state).await
    }

    /// Hand a captured job error to sentry when a client is configured.
    /// Telemetry must never mask the job error or block the ledger write.
    fn capture_telemetry(&self, err: &anyhow::Error) {
        if sentry::Hub::current().client().is_some() {
            let event_id = sentry::integrations::anyhow::capture_anyhow(err);
            debug!(%event_id, "error captured in sentry");
        }
    }
}
