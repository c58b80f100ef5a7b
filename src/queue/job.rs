//! The `Job` record and its state machine, grounded in the teacher's
//! `kernel::jobs::job::Job`/`JobStatus`/`JobPriority`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Priority ordering: lower numeric value dispatches first. `as_i16`
/// mirrors the teacher's DB-ordering helper of the same name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub enum JobPriority {
    Critical = 0,
    High = 1,
    #[default]
    Normal = 2,
    Low = 3,
}

impl JobPriority {
    pub fn as_i16(self) -> i16 {
        self as i16
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
    Stalled,
}

impl JobStatus {
    /// A job in one of these states will never transition again.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Cancelled)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub job_type: String,
    pub data: serde_json::Value,
    pub priority: JobPriority,
    pub status: JobStatus,
    pub attempts: u32,
    pub max_attempts: u32,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub parent_id: Option<Uuid>,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

/// Options accepted by [`crate::queue::WorkflowQueue::add`], mirroring the
/// teacher's `ScheduleOptions` builder in `kernel::jobs::manager`.
#[derive(Debug, Clone, Default)]
pub struct AddJobOptions {
    pub priority: JobPriority,
    pub max_attempts: Option<u32>,
    pub delay_ms: i64,
    pub parent_id: Option<Uuid>,
    pub metadata: Option<serde_json::Value>,
}

impl Job {
    pub fn new(job_type: impl Into<String>, data: serde_json::Value, now: DateTime<Utc>, opts: &AddJobOptions) -> Self {
        let next_retry_at = if opts.delay_ms > 0 {
            Some(now + chrono::Duration::milliseconds(opts.delay_ms))
        } else {
            None
        };
        Self {
            id: Uuid::new_v4(),
            job_type: job_type.into(),
            data,
            priority: opts.priority,
            status: JobStatus::Pending,
            attempts: 0,
            max_attempts: opts.max_attempts.unwrap_or(3),
            next_retry_at,
            created_at: now,
            started_at: None,
            completed_at: None,
            parent_id: opts.parent_id,
            result: None,
            error: None,
            metadata: opts.metadata.clone(),
        }
    }

    /// Whether the job is eligible to be claimed right now: pending, and
    /// any delay or backoff window has elapsed.
    pub fn is_ready(&self, now: DateTime<Utc>) -> bool {
        self.status == JobStatus::Pending && self.next_retry_at.map(|at| at <= now).unwrap_or(true)
    }

    /// Exponential backoff delay before the next attempt: `1000 * 2^(attempts-1)` ms,
    /// capped at 60s.
    pub fn backoff_delay_ms(attempts: u32) -> i64 {
        let exp = attempts.saturating_sub(1).min(10);
        (1000i64 * 2i64.pow(exp)).min(60_000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_ordering_is_correct() {
        let mut priorities = vec![JobPriority::Low, JobPriority::Critical, JobPriority::Normal, JobPriority::High];
        priorities.sort();
        assert_eq!(
            priorities,
            vec![JobPriority::Critical, JobPriority::High, JobPriority::Normal, JobPriority::Low]
        );
    }

    #[test]
    fn is_ready_respects_delay() {
        let now = Utc::now();
        let opts = AddJobOptions {
            delay_ms: 5_000,
            ..Default::default()
        };
        let job = Job::new("noop", serde_json::json!({}), now, &opts);
        assert!(!job.is_ready(now));
        assert!(job.is_ready(now + chrono::Duration::milliseconds(5_001)));
    }

    #[test]
    fn is_ready_false_once_running() {
        let now = Utc::now();
        let mut job = Job::new("noop", serde_json::json!({}), now, &AddJobOptions::default());
        job.status = JobStatus::Running;
        assert!(!job.is_ready(now));
    }

    #[test]
    fn backoff_delay_doubles_and_caps() {
        assert_eq!(Job::backoff_delay_ms(1), 1000);
        assert_eq!(Job::backoff_delay_ms(2), 2000);
        assert_eq!(Job::backoff_delay_ms(3), 4000);
        assert_eq!(Job::backoff_delay_ms(7), 60_000);
        assert_eq!(Job::backoff_delay_ms(20), 60_000);
    }

    #[test]
    fn terminal_states_never_progress() {
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
        assert!(!JobStatus::Failed.is_terminal());
        assert!(!JobStatus::Stalled.is_terminal());
    }
}
