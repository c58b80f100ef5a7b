//! Postgres-backed `PersistenceGateway`, gated behind the `postgres`
//! feature. Grounded in the teacher's `PostgresJobQueue` (`kernel::jobs::queue`):
//! plain `sqlx::query`/`query_as` calls bound to a `PgPool`, no ORM.
//!
//! Unlike the teacher's `kernel` module this uses runtime-checked queries
//! (`sqlx::query_as` with bound parameters) rather than the `sqlx::query!`
//! compile-time macro family, since the macro requires a live database or a
//! checked `.sqlx` cache at build time — a dependency this crate's tests
//! must not require. See DESIGN.md.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use sqlx::Row;
use uuid::Uuid;

use super::{
    EventRecord, JobRecord, PersistenceGateway, ScheduleExecutionRecord, ScheduledWorkflowRecord,
};

pub struct PostgresPersistence {
    pool: PgPool,
}

impl PostgresPersistence {
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPool::connect(database_url).await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PersistenceGateway for PostgresPersistence {
    async fn upsert_job(&self, job: JobRecord) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            insert into queue_jobs
                (id, queue_name, job_type, data, priority, status, attempts, max_attempts,
                 result, error, parent_id, metadata, created_at, started_at, completed_at, next_retry_at)
            values ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            on conflict (id) do update set
                status = excluded.status,
                attempts = excluded.attempts,
                result = excluded.result,
                error = excluded.error,
                metadata = excluded.metadata,
                started_at = excluded.started_at,
                completed_at = excluded.completed_at,
                next_retry_at = excluded.next_retry_at
            "#,
        )
        .bind(job.id)
        .bind(&job.queue_name)
        .bind(&job.job_type)
        .bind(&job.data)
        .bind(job.priority)
        .bind(&job.status)
        .bind(job.attempts)
        .bind(job.max_attempts)
        .bind(&job.result)
        .bind(&job.error)
        .bind(job.parent_id)
        .bind(&job.metadata)
        .bind(job.created_at)
        .bind(job.started_at)
        .bind(job.completed_at)
        .bind(job.next_retry_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn select_jobs(&self, status: Option<&str>) -> anyhow::Result<Vec<JobRecord>> {
        let rows = match status {
            Some(status) => {
                sqlx::query("select * from queue_jobs where status = $1")
                    .bind(status)
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                sqlx::query("select * from queue_jobs")
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        rows.into_iter().map(row_to_job).collect()
    }

    async fn delete_job(&self, id: Uuid) -> anyhow::Result<()> {
        sqlx::query("delete from queue_jobs where id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn upsert_schedule(&self, schedule: ScheduledWorkflowRecord) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            insert into scheduled_workflows
                (id, name, description, trigger_type, trigger_config, request, enabled,
                 max_concurrent, retry_on_fail, tags, created_at, last_run_at)
            values ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            on conflict (id) do update set
                enabled = excluded.enabled,
                max_concurrent = excluded.max_concurrent,
                retry_on_fail = excluded.retry_on_fail,
                tags = excluded.tags,
                last_run_at = excluded.last_run_at
            "#,
        )
        .bind(schedule.id)
        .bind(&schedule.name)
        .bind(&schedule.description)
        .bind(&schedule.trigger_type)
        .bind(&schedule.trigger_config)
        .bind(&schedule.request)
        .bind(schedule.enabled)
        .bind(schedule.max_concurrent)
        .bind(schedule.retry_on_fail)
        .bind(&schedule.tags)
        .bind(schedule.created_at)
        .bind(schedule.last_run_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn select_schedules(&self) -> anyhow::Result<Vec<ScheduledWorkflowRecord>> {
        let rows = sqlx::query("select * from scheduled_workflows")
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(row_to_schedule).collect()
    }

    async fn delete_schedule(&self, id: Uuid) -> anyhow::Result<()> {
        sqlx::query("delete from scheduled_workflows where id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn insert_execution(&self, execution: ScheduleExecutionRecord) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            insert into schedule_executions
                (id, schedule_id, status, started_at, completed_at, error, workflow_execution_id)
            values ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(execution.id)
        .bind(execution.schedule_id)
        .bind(&execution.status)
        .bind(execution.started_at)
        .bind(execution.completed_at)
        .bind(&execution.error)
        .bind(&execution.workflow_execution_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_execution(&self, execution: ScheduleExecutionRecord) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            update schedule_executions
            set status = $2, completed_at = $3, error = $4, workflow_execution_id = $5
            where id = $1
            "#,
        )
        .bind(execution.id)
        .bind(&execution.status)
        .bind(execution.completed_at)
        .bind(&execution.error)
        .bind(&execution.workflow_execution_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn select_executions(
        &self,
        schedule_id: Uuid,
        limit: i64,
    ) -> anyhow::Result<Vec<ScheduleExecutionRecord>> {
        let rows = sqlx::query(
            "select * from schedule_executions where schedule_id = $1 order by started_at desc limit $2",
        )
        .bind(schedule_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(row_to_execution).collect()
    }

    async fn insert_event(&self, event: EventRecord) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            insert into events (id, event_type, payload, source_type, source_id, created_at)
            values ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(event.id)
        .bind(&event.event_type)
        .bind(&event.payload)
        .bind(&event.source_type)
        .bind(event.source_id)
        .bind(event.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn row_to_job(row: sqlx::postgres::PgRow) -> anyhow::Result<JobRecord> {
    Ok(JobRecord {
        id: row.try_get("id")?,
        queue_name: row.try_get("queue_name")?,
        job_type: row.try_get("job_type")?,
        data: row.try_get("data")?,
        priority: row.try_get("priority")?,
        status: row.try_get("status")?,
        attempts: row.try_get("attempts")?,
        max_attempts: row.try_get("max_attempts")?,
        result: row.try_get("result")?,
        error: row.try_get("error")?,
        parent_id: row.try_get("parent_id")?,
        metadata: row.try_get("metadata")?,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
        started_at: row.try_get("started_at")?,
        completed_at: row.try_get("completed_at")?,
        next_retry_at: row.try_get("next_retry_at")?,
    })
}

fn row_to_schedule(row: sqlx::postgres::PgRow) -> anyhow::Result<ScheduledWorkflowRecord> {
    Ok(ScheduledWorkflowRecord {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        trigger_type: row.try_get("trigger_type")?,
        trigger_config: row.try_get("trigger_config")?,
        request: row.try_get("request")?,
        enabled: row.try_get("enabled")?,
        max_concurrent: row.try_get("max_concurrent")?,
        retry_on_fail: row.try_get("retry_on_fail")?,
        tags: row.try_get("tags")?,
        created_at: row.try_get("created_at")?,
        last_run_at: row.try_get("last_run_at")?,
    })
}

fn row_to_execution(row: sqlx::postgres::PgRow) -> anyhow::Result<ScheduleExecutionRecord> {
    Ok(ScheduleExecutionRecord {
        id: row.try_get("id")?,
        schedule_id: row.try_get("schedule_id")?,
        status: row.try_get("status")?,
        started_at: row.try_get("started_at")?,
        completed_at: row.try_get("completed_at")?,
        error: row.try_get("error")?,
        workflow_execution_id: row.try_get("workflow_execution_id")?,
    })
}
