use chrono::{DateTime, Utc};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub enum SchedulerEvent {
    Fired {
        schedule_id: Uuid,
        execution_id: Uuid,
        at: DateTime<Utc>,
    },
    Completed {
        schedule_id: Uuid,
        execution_id: Uuid,
        at: DateTime<Utc>,
    },
    Failed {
        schedule_id: Uuid,
        execution_id: Uuid,
        error: String,
        will_retry: bool,
        at: DateTime<Utc>,
    },
    Skipped {
        schedule_id: Uuid,
        reason: &'static str,
        at: DateTime<Utc>,
    },
}
