//! Structured error types for the scheduler core.
//!
//! `CronError` provides pattern-matchable errors instead of generic
//! `anyhow::Error`. Fallible paths in this crate return `anyhow::Result`;
//! a typed error enters as a `CronError` value and callers that care about
//! the variant (the CLI exit paths, configtest) downcast it back out:
//!
//! ```ignore
//! match err.downcast_ref::<CronError>() {
//!     Some(CronError::JobNotFound(target)) => eprintln!("unknown job {target}"),
//!     _ => eprintln!("{err:#}"),
//! }
//! ```

use thiserror::Error;

/// Structured error type for scheduler operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CronError {
    /// Operator referenced a job that is not configured.
    #[error("no configured job matches {0:?}")]
    JobNotFound(String),

    /// A job line in the configuration is malformed.
    #[error("no frequency and/or time defined in job entry {0:?}")]
    JobDescription(String),

    /// Bad or inconsistent frequency definition.
    #[error("invalid frequency definition {0:?}")]
    FrequencyDefinition(String),

    /// Bad `HH:MM` time definition.
    #[error("invalid definition of time {0:?}")]
    TimeDefinition(String),

    /// A declared dependency has no matching configured job.
    #[error("job {job:?} depends on {dependency:?} which is not configured")]
    MissingDependency { job: String, dependency: String },

    /// The dependency graph contains a cycle.
    #[error("cyclic dependency among jobs: {}", .0.join(", "))]
    CyclicDependency(Vec<String>),

    /// A ledger lookup missed. Predicates treat this as "absent";
    /// `reset-job` reports a warning instead.
    #[error("no state recorded for job {0:?}")]
    StateNotFound(String),
}
