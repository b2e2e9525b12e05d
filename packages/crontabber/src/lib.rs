//! A periodic job runner with a durable state ledger and dependency-aware
//! dispatch.
//!
//! Unlike classic cron, every tick consults the ledger of previous runs:
//! a job's next execution derives from its last success, children never
//! run before their parents have succeeded recently, failures retry after
//! a short delay, and operators can inspect all of it (`--list-jobs`,
//! `--nagios`, `--audit-ghosts`).
//!
//! # Architecture
//!
//! ```text
//! CronTabber (app)
//!     │
//!     ├─► build_descriptors (job) ── registry + configured schedules
//!     ├─► reorder (dag) ──────────── dependency-stable topological order
//!     └─► JobExecutor (executor)
//!             ├─► time_to_run / check_dependencies (scheduler)
//!             ├─► JobInvoker::invoke ── lazy stream of success times
//!             └─► JobStateStore + RunLog (store) ── Postgres or memory
//! ```

pub mod app;
pub mod config;
pub mod dag;
pub mod error;
pub mod executor;
pub mod freq;
pub mod job;
pub mod scheduler;
pub mod state;
pub mod store;
pub mod timeutil;

pub use app::{configtest, CronTabber};
pub use config::{Config, JobSpec};
pub use error::CronError;
pub use executor::{JobExecutor, RunOutcome, SkipReason};
pub use freq::TimeOfDay;
pub use job::{JobContext, JobDescriptor, JobInvoker, JobRegistry, SuccessStream};
pub use state::{ErrorInfo, JobState};
pub use store::{JobStateStore, MemoryStore, PgStore, RunLog};
