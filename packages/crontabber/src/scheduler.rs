//! Scheduling predicates: is it time, are dependencies fresh, when next.

use chrono::{DateTime, Duration, TimeZone, Timelike, Utc};

use crate::freq::TimeOfDay;
use crate::job::JobDescriptor;
use crate::state::JobState;
use crate::store::JobStateStore;

/// Whether a dependency check passed, and if not, why.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DependencyStatus {
    Satisfied,
    Blocked { dependency: String, reason: String },
}

/// True when the job is due.
///
/// With no prior state the job runs immediately, except that a job pinned
/// to a time-of-day waits until today's slot has passed. With prior state
/// the job runs once `next_run` is reached (inclusive).
pub fn time_to_run(
    descriptor: &JobDescriptor,
    state: Option<&JobState>,
    now: DateTime<Utc>,
) -> bool {
    match state.and_then(|state| state.next_run) {
        Some(next_run) => now >= next_run,
        None => match descriptor.time_of_day {
            Some(slot) => {
                now.hour() > slot.hour || (now.hour() == slot.hour && now.minute() >= slot.minute)
            }
            None => true,
        },
    }
}

/// Check that every dependency has run recently and without error.
pub async fn check_dependencies(
    store: &dyn JobStateStore,
    descriptor: &JobDescriptor,
    now: DateTime<Utc>,
) -> anyhow::Result<DependencyStatus> {
    for dependency in &descriptor.depends_on {
        let blocked = |reason: &str| DependencyStatus::Blocked {
            dependency: dependency.clone(),
            reason: reason.to_string(),
        };
        let Some(state) = store.get(dependency).await? else {
            return Ok(blocked("hasn't been run yet"));
        };
        if state.last_error.is_some() {
            return Ok(blocked("errored last time it ran"));
        }
        // overdue, or only a transient skeleton row: the dependency has
        // not completed its current cycle
        if state.next_run.map_or(true, |next_run| next_run < now) {
            return Ok(blocked("hasn't recently run"));
        }
    }
    Ok(DependencyStatus::Satisfied)
}

/// Compute the next due time after a run.
///
/// Failures retry after the configured short delay regardless of
/// time-of-day; successes advance by the frequency and are then pinned to
/// the daily slot when one is configured.
pub fn next_run_time(
    last_run: DateTime<Utc>,
    frequency_seconds: u64,
    time_of_day: Option<TimeOfDay>,
    failed: bool,
    error_retry_seconds: i64,
) -> DateTime<Utc> {
    if failed {
        return last_run + Duration::seconds(error_retry_seconds);
    }
    let base = last_run + Duration::seconds(frequency_seconds as i64);
    match time_of_day {
        Some(slot) => match base.date_naive().and_hms_opt(slot.hour, slot.minute, 0) {
            Some(aligned) => Utc.from_utc_datetime(&aligned),
            // hour and minute are range-checked at parse time
            None => base,
        },
        None => base,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use anyhow::Result;
    use async_trait::async_trait;
    use futures::StreamExt;

    use super::*;
    use crate::job::{JobContext, JobInvoker, SuccessStream};
    use crate::state::ErrorInfo;
    use crate::store::MemoryStore;

    struct NullJob;

    #[async_trait]
    impl JobInvoker for NullJob {
        async fn invoke(&self, _ctx: JobContext) -> Result<SuccessStream> {
            Ok(futures::stream::empty().boxed())
        }
    }

    fn descriptor(
        app_name: &str,
        time_of_day: Option<TimeOfDay>,
        depends_on: &[&str],
    ) -> JobDescriptor {
        JobDescriptor {
            app_name: app_name.to_string(),
            class_identity: format!("jobs::{app_name}"),
            frequency: "1d".to_string(),
            frequency_seconds: 86_400,
            time_of_day,
            depends_on: depends_on.iter().map(|dep| dep.to_string()).collect(),
            is_backfill: false,
            invoker: Arc::new(NullJob),
        }
    }

    fn at(timestamp: &str) -> DateTime<Utc> {
        timestamp.parse().unwrap()
    }

    fn slot(hour: u32, minute: u32) -> TimeOfDay {
        TimeOfDay { hour, minute }
    }

    #[test]
    fn no_state_and_no_slot_runs_immediately() {
        let job = descriptor("a", None, &[]);
        assert!(time_to_run(&job, None, at("2024-01-02T00:00:00Z")));
    }

    #[test]
    fn no_state_with_slot_waits_for_the_slot() {
        let job = descriptor("a", Some(slot(3, 0)), &[]);
        assert!(!time_to_run(&job, None, at("2024-01-02T02:59:00Z")));
        assert!(time_to_run(&job, None, at("2024-01-02T03:00:00Z")));
        assert!(time_to_run(&job, None, at("2024-01-02T04:00:00Z")));
    }

    #[test]
    fn slot_minute_is_inclusive() {
        let job = descriptor("a", Some(slot(3, 30)), &[]);
        assert!(!time_to_run(&job, None, at("2024-01-02T03:29:59Z")));
        assert!(time_to_run(&job, None, at("2024-01-02T03:30:00Z")));
    }

    #[test]
    fn with_state_next_run_gates_execution() {
        let job = descriptor("a", None, &[]);
        let state = JobState {
            next_run: Some(at("2024-01-02T03:00:00Z")),
            ..JobState::default()
        };
        assert!(!time_to_run(&job, Some(&state), at("2024-01-02T02:59:59Z")));
        // the boundary is inclusive
        assert!(time_to_run(&job, Some(&state), at("2024-01-02T03:00:00Z")));
        assert!(time_to_run(&job, Some(&state), at("2024-01-02T03:00:01Z")));
    }

    #[test]
    fn skeleton_state_without_next_run_behaves_like_no_state() {
        let job = descriptor("a", None, &[]);
        let state = JobState::ongoing_placeholder(vec![], at("2024-01-02T00:00:00Z"));
        assert!(time_to_run(&job, Some(&state), at("2024-01-02T00:00:01Z")));
    }

    #[tokio::test]
    async fn empty_dependency_list_is_satisfied() {
        let store = MemoryStore::new();
        let job = descriptor("a", None, &[]);
        let status = check_dependencies(&store, &job, at("2024-01-02T00:00:00Z"))
            .await
            .unwrap();
        assert_eq!(status, DependencyStatus::Satisfied);
    }

    #[tokio::test]
    async fn unrun_dependency_blocks() {
        let store = MemoryStore::new();
        let job = descriptor("b", None, &["a"]);
        let status = check_dependencies(&store, &job, at("2024-01-02T00:00:00Z"))
            .await
            .unwrap();
        assert_eq!(
            status,
            DependencyStatus::Blocked {
                dependency: "a".into(),
                reason: "hasn't been run yet".into(),
            }
        );
    }

    #[tokio::test]
    async fn errored_dependency_blocks() {
        let store = MemoryStore::new();
        store.put(
            "a",
            JobState {
                next_run: Some(at("2024-01-03T00:00:00Z")),
                last_error: Some(ErrorInfo {
                    error_type: "boom".into(),
                    value: "boom".into(),
                    traceback: "boom".into(),
                }),
                ..JobState::default()
            },
        );
        let job = descriptor("b", None, &["a"]);
        let status = check_dependencies(&store, &job, at("2024-01-02T00:00:00Z"))
            .await
            .unwrap();
        assert_eq!(
            status,
            DependencyStatus::Blocked {
                dependency: "a".into(),
                reason: "errored last time it ran".into(),
            }
        );
    }

    #[tokio::test]
    async fn overdue_dependency_blocks() {
        let store = MemoryStore::new();
        store.put(
            "a",
            JobState {
                next_run: Some(at("2024-01-01T00:00:00Z")),
                ..JobState::default()
            },
        );
        let job = descriptor("b", None, &["a"]);
        let status = check_dependencies(&store, &job, at("2024-01-02T00:00:00Z"))
            .await
            .unwrap();
        assert_eq!(
            status,
            DependencyStatus::Blocked {
                dependency: "a".into(),
                reason: "hasn't recently run".into(),
            }
        );
    }

    #[tokio::test]
    async fn fresh_dependency_satisfies() {
        let store = MemoryStore::new();
        store.put(
            "a",
            JobState {
                next_run: Some(at("2024-01-03T00:00:00Z")),
                ..JobState::default()
            },
        );
        let job = descriptor("b", None, &["a"]);
        let status = check_dependencies(&store, &job, at("2024-01-02T00:00:00Z"))
            .await
            .unwrap();
        assert_eq!(status, DependencyStatus::Satisfied);
    }

    #[test]
    fn success_advances_by_the_frequency() {
        let next = next_run_time(at("2024-01-01T06:30:00Z"), 3_600, None, false, 300);
        assert_eq!(next, at("2024-01-01T07:30:00Z"));
    }

    #[test]
    fn failure_retries_after_the_short_delay() {
        let next = next_run_time(at("2024-01-01T06:30:00Z"), 3_600, None, true, 300);
        assert_eq!(next, at("2024-01-01T06:35:00Z"));
    }

    #[test]
    fn success_with_slot_is_pinned_to_the_slot() {
        let next = next_run_time(
            at("2024-01-02T04:17:23Z"),
            86_400,
            Some(slot(3, 0)),
            false,
            300,
        );
        assert_eq!(next, at("2024-01-03T03:00:00Z"));
    }

    #[test]
    fn failure_ignores_the_slot() {
        let next = next_run_time(
            at("2024-01-02T04:00:00Z"),
            86_400,
            Some(slot(3, 0)),
            true,
            300,
        );
        assert_eq!(next, at("2024-01-02T04:05:00Z"));
    }

    #[test]
    fn slot_alignment_preserves_the_date_component() {
        let next = next_run_time(
            at("2024-01-31T23:59:00Z"),
            86_400,
            Some(slot(12, 45)),
            false,
            300,
        );
        assert_eq!(next, at("2024-02-01T12:45:00Z"));
    }
}
