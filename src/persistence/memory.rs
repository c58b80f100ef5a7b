//! In-memory `PersistenceGateway`, the default gateway and what every
//! unit/integration test in this crate runs against. Grounded in the
//! teacher's `TestJobManager`: a handful of `RwLock<HashMap<Uuid, T>>`
//! tables guarded independently, no cross-table transactions.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use uuid::Uuid;

use super::{
    EventRecord, JobRecord, PersistenceGateway, ScheduleExecutionRecord, ScheduledWorkflowRecord,
};

#[derive(Default)]
pub struct MemoryPersistence {
    jobs: RwLock<HashMap<Uuid, JobRecord>>,
    schedules: RwLock<HashMap<Uuid, ScheduledWorkflowRecord>>,
    executions: RwLock<HashMap<Uuid, ScheduleExecutionRecord>>,
    events: RwLock<HashMap<Uuid, EventRecord>>,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PersistenceGateway for MemoryPersistence {
    async fn upsert_job(&self, job: JobRecord) -> anyhow::Result<()> {
        self.jobs
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(job.id, job);
        Ok(())
    }

    async fn select_jobs(&self, status: Option<&str>) -> anyhow::Result<Vec<JobRecord>> {
        let jobs = self.jobs.read().unwrap_or_else(|e| e.into_inner());
        Ok(jobs
            .values()
            .filter(|j| status.map(|s| j.status == s).unwrap_or(true))
            .cloned()
            .collect())
    }

    async fn delete_job(&self, id: Uuid) -> anyhow::Result<()> {
        self.jobs.write().unwrap_or_else(|e| e.into_inner()).remove(&id);
        Ok(())
    }

    async fn upsert_schedule(&self, schedule: ScheduledWorkflowRecord) -> anyhow::Result<()> {
        self.schedules
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(schedule.id, schedule);
        Ok(())
    }

    async fn select_schedules(&self) -> anyhow::Result<Vec<ScheduledWorkflowRecord>> {
        Ok(self
            .schedules
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect())
    }

    async fn delete_schedule(&self, id: Uuid) -> anyhow::Result<()> {
        self.schedules
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&id);
        Ok(())
    }

    async fn insert_execution(&self, execution: ScheduleExecutionRecord) -> anyhow::Result<()> {
        self.executions
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(execution.id, execution);
        Ok(())
    }

    async fn update_execution(&self, execution: ScheduleExecutionRecord) -> anyhow::Result<()> {
        self.executions
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(execution.id, execution);
        Ok(())
    }

    async fn select_executions(
        &self,
        schedule_id: Uuid,
        limit: i64,
    ) -> anyhow::Result<Vec<ScheduleExecutionRecord>> {
        let executions = self.executions.read().unwrap_or_else(|e| e.into_inner());
        let mut matching: Vec<ScheduleExecutionRecord> = executions
            .values()
            .filter(|e| e.schedule_id == schedule_id)
            .cloned()
            .collect();
        matching.sort_by_key(|e| std::cmp::Reverse(e.started_at));
        if limit >= 0 {
            matching.truncate(limit as usize);
        }
        Ok(matching)
    }

    async fn insert_event(&self, event: EventRecord) -> anyhow::Result<()> {
        self.events
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(event.id, event);
        Ok(())
    }
}
