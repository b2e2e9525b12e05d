//! Job descriptors, the invoker contract and the job registry.
//!
//! The registry maps a class identity (e.g. `jobs::ReportsCleanupJob`) to
//! the job's metadata and a factory producing its [`JobInvoker`]. Each
//! domain registers its jobs at startup; configuration contributes only
//! the schedule (frequency and optional time-of-day) per entry. The
//! scheduler core sees nothing but the uniform `invoke` contract.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;

use crate::config::JobSpec;
use crate::error::CronError;
use crate::freq::{self, TimeOfDay};
use crate::state::JobState;

/// Lazy sequence of success timestamps produced by one job invocation.
///
/// Ordinary jobs yield a single timestamp. Backfill jobs yield one per
/// caught-up window; the executor records each yield before pulling the
/// next, so an error mid-sequence keeps everything yielded so far.
pub type SuccessStream = BoxStream<'static, Result<DateTime<Utc>>>;

/// What a job body gets to see when it runs.
#[derive(Debug, Clone)]
pub struct JobContext {
    pub app_name: String,
    pub frequency_seconds: u64,
    pub time_of_day: Option<TimeOfDay>,
    /// Ledger state from before this run, if the job has run before.
    pub prior_state: Option<JobState>,
}

/// The uniform contract the executor invokes.
#[async_trait]
pub trait JobInvoker: Send + Sync {
    async fn invoke(&self, ctx: JobContext) -> Result<SuccessStream>;
}

/// Immutable, configured specification of one job.
#[derive(Clone)]
pub struct JobDescriptor {
    /// Stable identifier; the ledger key.
    pub app_name: String,
    /// Registry key, also accepted by `--job`/`--reset-job`.
    pub class_identity: String,
    /// Raw configured frequency, kept for display.
    pub frequency: String,
    pub frequency_seconds: u64,
    pub time_of_day: Option<TimeOfDay>,
    pub depends_on: Vec<String>,
    pub is_backfill: bool,
    pub invoker: Arc<dyn JobInvoker>,
}

impl JobDescriptor {
    /// True when `target` names this job by app name or class identity.
    pub fn matches(&self, target: &str) -> bool {
        self.app_name == target || self.class_identity == target
    }
}

impl fmt::Debug for JobDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobDescriptor")
            .field("app_name", &self.app_name)
            .field("class_identity", &self.class_identity)
            .field("frequency", &self.frequency)
            .field("time_of_day", &self.time_of_day)
            .field("depends_on", &self.depends_on)
            .field("is_backfill", &self.is_backfill)
            .finish_non_exhaustive()
    }
}

type InvokerFactory = Box<dyn Fn() -> Arc<dyn JobInvoker> + Send + Sync>;

struct JobEntry {
    app_name: &'static str,
    depends_on: &'static [&'static str],
    is_backfill: bool,
    factory: InvokerFactory,
}

/// Compile-time registry of job classes.
#[derive(Default)]
pub struct JobRegistry {
    entries: HashMap<&'static str, JobEntry>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Register a job class under its class identity.
    pub fn register(
        &mut self,
        class_identity: &'static str,
        app_name: &'static str,
        depends_on: &'static [&'static str],
        factory: impl Fn() -> Arc<dyn JobInvoker> + Send + Sync + 'static,
    ) {
        self.insert(class_identity, app_name, depends_on, false, factory);
    }

    /// Register a backfill job class: its invoker may yield several
    /// success timestamps per run and its first failure only warns in
    /// health reports.
    pub fn register_backfill(
        &mut self,
        class_identity: &'static str,
        app_name: &'static str,
        depends_on: &'static [&'static str],
        factory: impl Fn() -> Arc<dyn JobInvoker> + Send + Sync + 'static,
    ) {
        self.insert(class_identity, app_name, depends_on, true, factory);
    }

    fn insert(
        &mut self,
        class_identity: &'static str,
        app_name: &'static str,
        depends_on: &'static [&'static str],
        is_backfill: bool,
        factory: impl Fn() -> Arc<dyn JobInvoker> + Send + Sync + 'static,
    ) {
        self.entries.insert(
            class_identity,
            JobEntry {
                app_name,
                depends_on,
                is_backfill,
                factory: Box::new(factory),
            },
        );
    }

    /// Check whether a class identity is registered.
    pub fn is_registered(&self, class_identity: &str) -> bool {
        self.entries.contains_key(class_identity)
    }

    /// All registered class identities.
    pub fn registered_identities(&self) -> Vec<&'static str> {
        self.entries.keys().copied().collect()
    }
}

/// Resolve configured job specs against the registry into descriptors.
///
/// Fails on unknown class identities and on schedule parse errors; both
/// are configuration problems and fatal before any job runs.
pub fn build_descriptors(
    registry: &JobRegistry,
    specs: &[JobSpec],
) -> Result<Vec<JobDescriptor>> {
    let mut descriptors = Vec::with_capacity(specs.len());
    for spec in specs {
        let entry = registry
            .entries
            .get(spec.class_identity.as_str())
            .ok_or_else(|| CronError::JobNotFound(spec.class_identity.clone()))?;
        let frequency_seconds = freq::parse_frequency(&spec.frequency)?;
        let time_of_day = spec
            .time
            .as_deref()
            .map(|t| t.parse::<TimeOfDay>())
            .transpose()?;
        freq::validate_schedule(frequency_seconds, time_of_day)?;
        descriptors.push(JobDescriptor {
            app_name: entry.app_name.to_string(),
            class_identity: spec.class_identity.clone(),
            frequency: spec.frequency.clone(),
            frequency_seconds,
            time_of_day,
            depends_on: entry.depends_on.iter().map(|dep| dep.to_string()).collect(),
            is_backfill: entry.is_backfill,
            invoker: (entry.factory)(),
        });
    }
    Ok(descriptors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    struct NullJob;

    #[async_trait]
    impl JobInvoker for NullJob {
        async fn invoke(&self, _ctx: JobContext) -> Result<SuccessStream> {
            Ok(futures::stream::empty().boxed())
        }
    }

    fn registry() -> JobRegistry {
        let mut registry = JobRegistry::new();
        registry.register("jobs::FooJob", "foo", &[], || Arc::new(NullJob));
        registry.register_backfill("jobs::BarJob", "bar", &["foo"], || Arc::new(NullJob));
        registry
    }

    fn spec(class_identity: &str, frequency: &str, time: Option<&str>) -> JobSpec {
        JobSpec {
            class_identity: class_identity.to_string(),
            frequency: frequency.to_string(),
            time: time.map(str::to_string),
        }
    }

    #[test]
    fn builds_descriptors_from_registry_and_specs() {
        let descriptors = build_descriptors(
            &registry(),
            &[
                spec("jobs::FooJob", "12h", None),
                spec("jobs::BarJob", "1d", Some("03:00")),
            ],
        )
        .unwrap();

        assert_eq!(descriptors.len(), 2);
        assert_eq!(descriptors[0].app_name, "foo");
        assert_eq!(descriptors[0].frequency_seconds, 43_200);
        assert!(!descriptors[0].is_backfill);
        assert_eq!(descriptors[1].app_name, "bar");
        assert_eq!(descriptors[1].depends_on, vec!["foo".to_string()]);
        assert!(descriptors[1].is_backfill);
        assert_eq!(
            descriptors[1].time_of_day,
            Some(TimeOfDay { hour: 3, minute: 0 })
        );
    }

    #[test]
    fn unknown_class_is_job_not_found() {
        let err = build_descriptors(&registry(), &[spec("jobs::Ghost", "1d", None)])
            .unwrap_err();
        assert_eq!(
            err.downcast_ref::<CronError>(),
            Some(&CronError::JobNotFound("jobs::Ghost".into()))
        );
    }

    #[test]
    fn sub_daily_frequency_with_time_is_rejected() {
        let err = build_descriptors(&registry(), &[spec("jobs::FooJob", "1h", Some("03:00"))])
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CronError>(),
            Some(CronError::FrequencyDefinition(_))
        ));
    }

    #[test]
    fn matches_on_app_name_or_class_identity() {
        let descriptors =
            build_descriptors(&registry(), &[spec("jobs::FooJob", "1d", None)]).unwrap();
        assert!(descriptors[0].matches("foo"));
        assert!(descriptors[0].matches("jobs::FooJob"));
        assert!(!descriptors[0].matches("bar"));
    }

    #[test]
    fn registry_knows_its_identities() {
        let registry = registry();
        assert!(registry.is_registered("jobs::FooJob"));
        assert!(!registry.is_registered("jobs::Ghost"));
        let mut identities = registry.registered_identities();
        identities.sort_unstable();
        assert_eq!(identities, vec!["jobs::BarJob", "jobs::FooJob"]);
    }
}
