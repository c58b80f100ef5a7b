//! Lifecycle events emitted by the queue, grounded in the teacher's
//! `kernel::jobs::events::JobEvent`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::job::JobPriority;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum QueueEvent {
    Added {
        job_id: Uuid,
        job_type: String,
        priority: JobPriority,
        at: DateTime<Utc>,
    },
    Started {
        job_id: Uuid,
        attempt: u32,
        at: DateTime<Utc>,
    },
    Completed {
        job_id: Uuid,
        at: DateTime<Utc>,
    },
    Failed {
        job_id: Uuid,
        attempt: u32,
        error: String,
        will_retry: bool,
        at: DateTime<Utc>,
    },
    Stalled {
        job_id: Uuid,
        at: DateTime<Utc>,
    },
    Cancelled {
        job_id: Uuid,
        at: DateTime<Utc>,
    },
}
