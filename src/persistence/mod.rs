//! Persistence gateway: the narrow interface the queue and scheduler write
//! through. Persistence is a write-through sink, not a source of truth
//! during a run — rehydration on startup re-establishes in-memory state
//! from persisted rows, mirroring the distinction this codebase draws
//! between its in-memory dispatch state and the Postgres-backed `jobs`
//! table it mirrors into.
//!
//! Payloads (`data`, `request`, `result`) are opaque across this boundary:
//! the gateway stores `serde_json::Value` and leaves typing to the
//! collaborating endpoints, the same split the teacher's `Job::args` column
//! draws.

mod memory;
#[cfg(feature = "postgres")]
mod postgres;

pub use memory::MemoryPersistence;
#[cfg(feature = "postgres")]
pub use postgres::PostgresPersistence;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Row shape for `queue_jobs`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: Uuid,
    pub queue_name: String,
    pub job_type: String,
    pub data: serde_json::Value,
    pub priority: i32,
    pub status: String,
    pub attempts: i32,
    pub max_attempts: i32,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub parent_id: Option<Uuid>,
    pub metadata: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub next_retry_at: Option<DateTime<Utc>>,
}

/// Row shape for `scheduled_workflows`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledWorkflowRecord {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub trigger_type: String,
    pub trigger_config: serde_json::Value,
    pub request: serde_json::Value,
    pub enabled: bool,
    pub max_concurrent: i32,
    pub retry_on_fail: bool,
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub last_run_at: Option<DateTime<Utc>>,
}

/// Row shape for `schedule_executions`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleExecutionRecord {
    pub id: Uuid,
    pub schedule_id: Uuid,
    pub status: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub workflow_execution_id: Option<String>,
}

/// Row shape for the scheduler's `events` audit table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    pub id: Uuid,
    pub event_type: String,
    pub payload: Option<serde_json::Value>,
    pub source_type: String,
    pub source_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

/// Narrow persistence interface for upsert/select/delete of queue jobs,
/// scheduled workflows, and schedule executions.
///
/// Failures from this trait are logged by callers and never abort an
/// in-flight dispatch or trigger — in-memory state is authoritative during
/// a run (see spec §4/§7, `PersistenceError`).
#[async_trait]
pub trait PersistenceGateway: Send + Sync {
    async fn upsert_job(&self, job: JobRecord) -> anyhow::Result<()>;
    async fn select_jobs(&self, status: Option<&str>) -> anyhow::Result<Vec<JobRecord>>;
    async fn delete_job(&self, id: Uuid) -> anyhow::Result<()>;

    async fn upsert_schedule(&self, schedule: ScheduledWorkflowRecord) -> anyhow::Result<()>;
    async fn select_schedules(&self) -> anyhow::Result<Vec<ScheduledWorkflowRecord>>;
    async fn delete_schedule(&self, id: Uuid) -> anyhow::Result<()>;

    async fn insert_execution(&self, execution: ScheduleExecutionRecord) -> anyhow::Result<()>;
    async fn update_execution(&self, execution: ScheduleExecutionRecord) -> anyhow::Result<()>;
    async fn select_executions(
        &self,
        schedule_id: Uuid,
        limit: i64,
    ) -> anyhow::Result<Vec<ScheduleExecutionRecord>>;

    async fn insert_event(&self, event: EventRecord) -> anyhow::Result<()>;
}
