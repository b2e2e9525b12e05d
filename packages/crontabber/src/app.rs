//! Top-level commands composed from the resolver, executor and stores.

use std::collections::BTreeSet;
use std::io::Write;
use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::JobSpec;
use crate::dag;
use crate::error::CronError;
use crate::executor::JobExecutor;
use crate::freq::{self, TimeOfDay};
use crate::job::{self, JobDescriptor, JobRegistry};
use crate::store::{JobStateStore, RunLog};
use crate::timeutil::timesince;

/// The job runner: descriptors in dependency order plus the machinery to
/// run and inspect them.
pub struct CronTabber {
    jobs: Vec<JobDescriptor>,
    store: Arc<dyn JobStateStore>,
    executor: JobExecutor,
    cancel: CancellationToken,
}

impl std::fmt::Debug for CronTabber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CronTabber")
            .field("jobs", &self.jobs)
            .finish_non_exhaustive()
    }
}

impl CronTabber {
    /// Build descriptors from configuration, resolve the dependency order
    /// and wire up the executor. Configuration and resolver problems are
    /// fatal here, before any job runs.
    pub fn new(
        registry: &JobRegistry,
        specs: &[JobSpec],
        store: Arc<dyn JobStateStore>,
        run_log: Arc<dyn RunLog>,
        error_retry_seconds: i64,
    ) -> Result<Self> {
        let descriptors = job::build_descriptors(registry, specs)?;
        let jobs = dag::reorder(descriptors)?;
        let executor = JobExecutor::new(store.clone(), run_log, error_retry_seconds);
        Ok(Self {
            jobs,
            store,
            executor,
            cancel: CancellationToken::new(),
        })
    }

    /// Token external signal handlers can trip to stop `run_all` before
    /// the next job. The job in flight always runs to completion.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run every due job, in dependency order, one at a time.
    ///
    /// A job's failure is recorded and the loop continues; only storage
    /// failures abort the run.
    pub async fn run_all(&self) -> Result<()> {
        for descriptor in &self.jobs {
            if self.cancel.is_cancelled() {
                info!("cancelled, stopping before the next job");
                break;
            }
            self.executor.run(descriptor, false).await?;
        }
        Ok(())
    }

    /// Run a single job named by app name or class identity.
    pub async fn run_one(&self, target: &str, force: bool) -> Result<()> {
        let descriptor = self.find(target)?;
        self.executor.run(descriptor, force).await?;
        Ok(())
    }

    /// Forget a job's history so its next run starts from scratch.
    pub async fn reset_job(&self, target: &str) -> Result<()> {
        let descriptor = self.find(target)?;
        if self.store.contains(&descriptor.app_name).await? {
            self.store.delete(&descriptor.app_name).await?;
            info!(app_name = %descriptor.app_name, "job reset");
        } else {
            warn!(app_name = %descriptor.app_name, "job already reset");
        }
        Ok(())
    }

    fn find(&self, target: &str) -> Result<&JobDescriptor> {
        self.jobs
            .iter()
            .find(|descriptor| descriptor.matches(target))
            .ok_or_else(|| CronError::JobNotFound(target.to_string()).into())
    }

    /// Print one block per configured job with its schedule and history.
    /// Purely informational; never writes to the ledger.
    pub async fn list_jobs(&self, out: &mut dyn Write) -> Result<()> {
        const PAD: usize = 15;
        let fmt = "%Y-%m-%d %H:%M:%S";
        let now = Utc::now();
        for descriptor in &self.jobs {
            let mut schedule = descriptor.frequency.clone();
            if let Some(slot) = descriptor.time_of_day {
                schedule.push_str(&format!(" @ {slot}"));
            }
            writeln!(out, "=== JOB {}", "=".repeat(72))?;
            writeln!(out, "{:<PAD$} {}", "Class:", descriptor.class_identity)?;
            writeln!(out, "{:<PAD$} {}", "App name:", descriptor.app_name)?;
            writeln!(out, "{:<PAD$} {}", "Frequency:", schedule)?;

            let Some(state) = self.store.get(&descriptor.app_name).await? else {
                writeln!(out, "*NO PREVIOUS RUN INFO*")?;
                continue;
            };

            if let Some(ongoing) = state.ongoing {
                writeln!(
                    out,
                    "{:<PAD$} Started {} ago",
                    "Ongoing now!",
                    timesince(ongoing, now)
                )?;
            }
            match state.last_run {
                Some(last_run) => writeln!(
                    out,
                    "{:<PAD$} {:<20} ({} ago)",
                    "Last run:",
                    last_run.format(fmt),
                    timesince(last_run, now)
                )?,
                None => writeln!(out, "{:<PAD$} none", "Last run:")?,
            }
            match state.last_success {
                Some(last_success) => writeln!(
                    out,
                    "{:<PAD$} {:<20} ({} ago)",
                    "Last success:",
                    last_success.format(fmt),
                    timesince(last_success, now)
                )?,
                None => writeln!(out, "{:<PAD$} no previous successful run", "Last success:")?,
            }
            match state.next_run {
                Some(next_run) if now > next_run => writeln!(
                    out,
                    "{:<PAD$} {:<20} (was {} ago)",
                    "Next run:",
                    next_run.format(fmt),
                    timesince(next_run, now)
                )?,
                Some(next_run) => writeln!(
                    out,
                    "{:<PAD$} {:<20} (in {})",
                    "Next run:",
                    next_run.format(fmt),
                    timesince(now, next_run)
                )?,
                None => writeln!(out, "{:<PAD$} none", "Next run:")?,
            }
            if let Some(error) = &state.last_error {
                writeln!(out, "{:<PAD$} ({} times)", "Error!!", state.error_count)?;
                writeln!(out, "{}", error.traceback)?;
                writeln!(out, "{}: {}", error.error_type, error.value)?;
            }
            writeln!(out)?;
        }
        Ok(())
    }

    /// Health summary for monitoring.
    ///
    /// Exit 2 (CRITICAL) when any job is failing, except that a backfill
    /// job's single failure only warns (exit 1). Any CRITICAL wins over
    /// any number of warnings.
    pub async fn nagios(&self, out: &mut dyn Write) -> Result<i32> {
        let mut warnings = Vec::new();
        let mut criticals = Vec::new();
        for descriptor in &self.jobs {
            let Some(state) = self.store.get(&descriptor.app_name).await? else {
                continue;
            };
            if state.error_count == 0 {
                continue;
            }
            let (error_type, value) = state
                .last_error
                .as_ref()
                .map(|error| (error.error_type.as_str(), error.value.as_str()))
                .unwrap_or(("", ""));
            let serialized = format!(
                "{} ({}) | {} | {}",
                descriptor.app_name, descriptor.class_identity, error_type, value
            );
            if state.error_count == 1 && descriptor.is_backfill {
                warnings.push(serialized);
            } else {
                criticals.push(serialized);
            }
        }
        if !criticals.is_empty() {
            writeln!(out, "CRITICAL - {}", criticals.join("; "))?;
            return Ok(2);
        }
        if !warnings.is_empty() {
            writeln!(out, "WARNING - {}", warnings.join("; "))?;
            return Ok(1);
        }
        writeln!(out, "OK - All systems nominal")?;
        Ok(0)
    }

    /// Print ledger rows whose app name no longer matches any configured
    /// job.
    pub async fn audit_ghosts(&self, out: &mut dyn Write) -> Result<()> {
        let configured: BTreeSet<&str> = self
            .jobs
            .iter()
            .map(|descriptor| descriptor.app_name.as_str())
            .collect();
        let mut ghosts: Vec<String> = self
            .store
            .app_names()
            .await?
            .into_iter()
            .filter(|name| !configured.contains(name.as_str()))
            .collect();
        if ghosts.is_empty() {
            return Ok(());
        }
        ghosts.sort_unstable();
        writeln!(
            out,
            "Found the following in the state database but not available as a configured job:"
        )?;
        for ghost in ghosts {
            writeln!(out, "\t{ghost}")?;
        }
        Ok(())
    }
}

/// Validate every configured job entry without running anything.
///
/// Returns true when the whole configuration is sound; each failure is
/// detailed on `err`.
pub fn configtest(registry: &JobRegistry, specs: &[JobSpec], err: &mut dyn Write) -> Result<bool> {
    let mut failed = 0;
    for spec in specs {
        if let Err(problem) = configtest_one(registry, spec) {
            writeln!(err, "Error in {:?}: {}", spec.class_identity, problem)?;
            failed += 1;
        }
    }
    Ok(failed == 0)
}

fn configtest_one(registry: &JobRegistry, spec: &JobSpec) -> Result<(), CronError> {
    if !registry.is_registered(&spec.class_identity) {
        return Err(CronError::JobNotFound(spec.class_identity.clone()));
    }
    let seconds = freq::parse_frequency(&spec.frequency)?;
    let time_of_day = spec
        .time
        .as_deref()
        .map(|t| t.parse::<TimeOfDay>())
        .transpose()?;
    freq::validate_schedule(seconds, time_of_day)?;
    Ok(())
}
