//! Priority job queue: in-memory ordering, a handler registry, and a
//! background dispatch loop with retries, backoff, and stall detection.
//! Grounded in the teacher's `kernel::jobs::runner::JobRunner` poll loop and
//! `kernel::jobs::queue::JobQueue` trait.

pub mod error;
pub mod events;
pub mod job;
pub mod registry;

pub use error::QueueError;
pub use events::QueueEvent;
pub use job::{AddJobOptions, Job, JobPriority, JobStatus};
pub use registry::{HandlerRegistry, JobHandler};

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::clock::{system_clock, SharedClock};
use crate::events::EventEmitter;
use crate::persistence::{JobRecord, PersistenceGateway};

/// Runtime configuration for a [`WorkflowQueue`], covering the Queue block
/// in the external configuration surface.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub max_concurrent: usize,
    pub poll_interval: Duration,
    pub stall_timeout: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 5,
            poll_interval: Duration::from_millis(100),
            stall_timeout: Duration::from_secs(5 * 60),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct QueueStats {
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub stalled: usize,
}

struct State {
    jobs: HashMap<Uuid, Job>,
    /// Pending job ids, kept ordered by priority then insertion (FIFO
    /// within a priority tier). Insertion is O(n): we scan for the first
    /// entry whose priority is strictly worse and insert before it,
    /// matching the scheduling algorithm carried forward from the
    /// distilled spec rather than reaching for a binary heap.
    pending: Vec<Uuid>,
}

struct Inner {
    state: AsyncMutex<State>,
    registry: AsyncMutex<HandlerRegistry>,
    events: EventEmitter<QueueEvent>,
    clock: SharedClock,
    persistence: Option<Arc<dyn PersistenceGateway>>,
    config: QueueConfig,
    shutdown: AtomicBool,
    dispatcher: std::sync::Mutex<Option<JoinHandle<()>>>,
}

/// In-memory priority queue with retry, backoff, and stall-detection
/// semantics. Cloning shares the same underlying state (`Arc` internally).
#[derive(Clone)]
pub struct WorkflowQueue {
    inner: Arc<Inner>,
}

impl WorkflowQueue {
    pub fn new(config: QueueConfig, persistence: Option<Arc<dyn PersistenceGateway>>) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: AsyncMutex::new(State {
                    jobs: HashMap::new(),
                    pending: Vec::new(),
                }),
                registry: AsyncMutex::new(HandlerRegistry::new()),
                events: EventEmitter::new(),
                clock: system_clock(),
                persistence,
                config,
                shutdown: AtomicBool::new(false),
                dispatcher: std::sync::Mutex::new(None),
            }),
        }
    }

    #[cfg(test)]
    pub fn with_clock(config: QueueConfig, clock: SharedClock) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: AsyncMutex::new(State {
                    jobs: HashMap::new(),
                    pending: Vec::new(),
                }),
                registry: AsyncMutex::new(HandlerRegistry::new()),
                events: EventEmitter::new(),
                clock,
                persistence: None,
                config,
                shutdown: AtomicBool::new(false),
                dispatcher: std::sync::Mutex::new(None),
            }),
        }
    }

    pub fn on(&self, name: &'static str, handler: impl Fn(&QueueEvent) + Send + Sync + 'static) {
        self.inner.events.on(name, handler);
    }

    pub async fn register(&self, job_type: impl Into<String>, handler: Arc<dyn JobHandler>) {
        self.inner.registry.lock().await.register(job_type, handler);
    }

    /// Insert `job_id` into the pending order, preserving priority then
    /// FIFO-within-priority.
    fn insert_pending(state: &mut State, job_id: Uuid) {
        let State { jobs, pending } = state;
        let priority = jobs[&job_id].priority;
        let position = pending
            .iter()
            .position(|id| jobs[id].priority > priority)
            .unwrap_or(pending.len());
        pending.insert(position, job_id);
    }

    pub async fn add(
        &self,
        job_type: impl Into<String>,
        data: serde_json::Value,
        opts: AddJobOptions,
    ) -> Result<Uuid, QueueError> {
        let now = self.inner.clock.now();
        let job = Job::new(job_type, data, now, &opts);
        let id = job.id;

        self.persist(&job).await?;

        let mut state = self.inner.state.lock().await;
        state.jobs.insert(id, job.clone());
        Self::insert_pending(&mut state, id);
        drop(state);

        debug!(job_id = %id, job_type = %job.job_type, priority = ?job.priority, "job added");
        self.inner.events.emit(
            "added",
            &QueueEvent::Added {
                job_id: id,
                job_type: job.job_type.clone(),
                priority: job.priority,
                at: now,
            },
        );
        Ok(id)
    }

    pub async fn add_bulk(
        &self,
        jobs: Vec<(String, serde_json::Value, AddJobOptions)>,
    ) -> Result<Vec<Uuid>, QueueError> {
        let mut ids = Vec::with_capacity(jobs.len());
        for (job_type, data, opts) in jobs {
            ids.push(self.add(job_type, data, opts).await?);
        }
        Ok(ids)
    }

    pub async fn get_job(&self, id: Uuid) -> Option<Job> {
        self.inner.state.lock().await.jobs.get(&id).cloned()
    }

    pub async fn get_jobs(&self, status: Option<JobStatus>) -> Vec<Job> {
        self.inner
            .state
            .lock()
            .await
            .jobs
            .values()
            .filter(|j| status.map(|s| j.status == s).unwrap_or(true))
            .cloned()
            .collect()
    }

    pub async fn get_stats(&self) -> QueueStats {
        let state = self.inner.state.lock().await;
        let mut stats = QueueStats::default();
        for job in state.jobs.values() {
            match job.status {
                JobStatus::Pending => stats.pending += 1,
                JobStatus::Running => stats.running += 1,
                JobStatus::Completed => stats.completed += 1,
                JobStatus::Failed => stats.failed += 1,
                JobStatus::Cancelled => stats.cancelled += 1,
                JobStatus::Stalled => stats.stalled += 1,
            }
        }
        stats
    }

    /// Cancel a pending job. Mirrors the spec's pending-only cancel:
    /// once a job is running (or already terminal), cancelling it here
    /// would otherwise be clobbered when the in-flight attempt settles,
    /// regressing the job out of `cancelled` and violating terminal
    /// stability.
    pub async fn cancel(&self, id: Uuid) -> Result<(), QueueError> {
        let now = self.inner.clock.now();
        let mut state = self.inner.state.lock().await;
        let snapshot = {
            let job = state.jobs.get_mut(&id).ok_or(QueueError::NotFound(id))?;
            if job.status != JobStatus::Pending {
                return Err(QueueError::NotCancellable(id));
            }
            job.status = JobStatus::Cancelled;
            job.completed_at = Some(now);
            job.clone()
        };
        state.pending.retain(|pending_id| *pending_id != id);
        drop(state);

        self.persist(&snapshot).await?;
        info!(job_id = %id, "job cancelled");
        self.inner.events.emit(
            "cancelled",
            &QueueEvent::Cancelled {
                job_id: id,
                at: self.inner.clock.now(),
            },
        );
        Ok(())
    }

    /// Manually requeue a failed job, resetting its attempt counter.
    pub async fn retry(&self, id: Uuid) -> Result<(), QueueError> {
        let mut state = self.inner.state.lock().await;
        let job = state.jobs.get_mut(&id).ok_or(QueueError::NotFound(id))?;
        if job.status != JobStatus::Failed {
            return Err(QueueError::NotRetryable(id));
        }
        job.status = JobStatus::Pending;
        job.attempts = 0;
        job.next_retry_at = None;
        job.error = None;
        job.started_at = None;
        job.completed_at = None;
        Self::insert_pending(&mut state, id);
        Ok(())
    }

    async fn persist(&self, job: &Job) -> Result<(), QueueError> {
        if let Some(persistence) = &self.inner.persistence {
            persistence
                .upsert_job(to_record(job))
                .await
                .map_err(QueueError::PersistenceError)?;
        }
        Ok(())
    }

    /// Rehydrate in-memory state from the persistence gateway. Intended to
    /// run once at startup.
    pub async fn load_from_database(&self) -> Result<(), QueueError> {
        let Some(persistence) = &self.inner.persistence else {
            return Ok(());
        };
        let records = persistence
            .select_jobs(None)
            .await
            .map_err(QueueError::PersistenceError)?;

        let mut state = self.inner.state.lock().await;
        for record in records {
            let job = from_record(&record);
            let id = job.id;
            let is_pending = job.status == JobStatus::Pending;
            state.jobs.insert(id, job);
            if is_pending {
                Self::insert_pending(&mut state, id);
            }
        }
        Ok(())
    }

    /// Remove terminal jobs (completed/failed/cancelled) older than `age`.
    pub async fn clean(&self, age: Duration) -> usize {
        let cutoff = self.inner.clock.now() - chrono::Duration::from_std(age).unwrap_or_default();
        let mut state = self.inner.state.lock().await;
        let before = state.jobs.len();
        state.jobs.retain(|_, job| {
            !(job.status.is_terminal() || job.status == JobStatus::Failed)
                || job.completed_at.map(|at| at > cutoff).unwrap_or(true)
        });
        before - state.jobs.len()
    }

    /// Block until there are no pending or running jobs.
    pub async fn drain(&self) {
        loop {
            let stats = self.get_stats().await;
            if stats.pending == 0 && stats.running == 0 {
                return;
            }
            tokio::time::sleep(self.inner.config.poll_interval).await;
        }
    }

    /// Start the background dispatch/stall-watchdog loop.
    pub fn start(&self) {
        self.inner.shutdown.store(false, Ordering::SeqCst);
        let queue = self.clone();
        let handle = tokio::spawn(async move { queue.run_dispatch_loop().await });
        *self.inner.dispatcher.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);
    }

    pub async fn stop(&self) {
        self.inner.shutdown.store(true, Ordering::SeqCst);
        let handle = self.inner.dispatcher.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    async fn run_dispatch_loop(&self) {
        while !self.inner.shutdown.load(Ordering::SeqCst) {
            self.detect_stalled().await;
            self.dispatch_ready().await;
            tokio::time::sleep(self.inner.config.poll_interval).await;
        }
    }

    async fn detect_stalled(&self) {
        let now = self.inner.clock.now();
        let stall_after = chrono::Duration::from_std(self.inner.config.stall_timeout).unwrap_or_default();
        let mut stalled = Vec::new();
        {
            let mut state = self.inner.state.lock().await;
            for job in state.jobs.values_mut() {
                if job.status == JobStatus::Running {
                    if let Some(started) = job.started_at {
                        if now - started > stall_after {
                            job.status = JobStatus::Stalled;
                            stalled.push(job.clone());
                        }
                    }
                }
            }
        }
        for job in stalled {
            warn!(job_id = %job.id, "job stalled, requeueing for retry");
            let _ = self.persist(&job).await;
            self.inner.events.emit(
                "stalled",
                &QueueEvent::Stalled { job_id: job.id, at: now },
            );
            self.complete_attempt(job.id, Err(anyhow::anyhow!("stall timeout exceeded"))).await;
        }
    }

    async fn dispatch_ready(&self) {
        loop {
            let running = self
                .inner
                .state
                .lock()
                .await
                .jobs
                .values()
                .filter(|j| j.status == JobStatus::Running)
                .count();
            if running >= self.inner.config.max_concurrent {
                return;
            }

            let claimed = self.claim_next().await;
            let Some(job) = claimed else { return };

            let handler = self.inner.registry.lock().await.get(&job.job_type);
            let queue = self.clone();
            tokio::spawn(async move {
                let outcome = match handler {
                    Some(handler) => handler.handle(job.data.clone()).await,
                    None => Err(anyhow::Error::new(QueueError::HandlerMissing(job.job_type.clone()))),
                };
                queue.complete_attempt(job.id, outcome).await;
            });
        }
    }

    async fn claim_next(&self) -> Option<Job> {
        let now = self.inner.clock.now();
        let mut state = self.inner.state.lock().await;
        let position = state
            .pending
            .iter()
            .position(|id| state.jobs.get(id).map(|j| j.is_ready(now)).unwrap_or(false))?;
        let id = state.pending.remove(position);
        let job = state.jobs.get_mut(&id)?;
        job.status = JobStatus::Running;
        job.started_at = Some(now);
        job.attempts += 1;
        let snapshot = job.clone();
        drop(state);
        let _ = self.persist(&snapshot).await;
        debug!(job_id = %snapshot.id, attempt = snapshot.attempts, "job claimed");
        self.inner.events.emit(
            "started",
            &QueueEvent::Started {
                job_id: snapshot.id,
                attempt: snapshot.attempts,
                at: now,
            },
        );
        Some(snapshot)
    }

    /// Record the outcome of a dispatch attempt (whether it ran to
    /// completion, errored, or stalled) and decide the next state:
    /// completed, requeued with backoff, or terminally failed.
    async fn complete_attempt(&self, job_id: Uuid, outcome: anyhow::Result<serde_json::Value>) {
        let now = self.inner.clock.now();
        let snapshot = {
            let mut state = self.inner.state.lock().await;
            let Some(job) = state.jobs.get_mut(&job_id) else { return };
            match outcome {
                Ok(result) => {
                    job.status = JobStatus::Completed;
                    job.result = Some(result);
                    job.completed_at = Some(now);
                }
                Err(err) => {
                    if job.attempts >= job.max_attempts {
                        job.status = JobStatus::Failed;
                        job.error = Some(err.to_string());
                        job.completed_at = Some(now);
                    } else {
                        job.status = JobStatus::Pending;
                        job.error = Some(err.to_string());
                        job.next_retry_at = Some(now + chrono::Duration::milliseconds(Job::backoff_delay_ms(job.attempts)));
                        Self::insert_pending(&mut state, job_id);
                    }
                }
            }
            state.jobs.get(&job_id).cloned()
        };
        let Some(job) = snapshot else { return };
        let _ = self.persist(&job).await;

        match job.status {
            JobStatus::Completed => {
                info!(job_id = %job.id, "job completed");
                self.inner.events.emit("completed", &QueueEvent::Completed { job_id: job.id, at: now });
            }
            JobStatus::Failed => {
                warn!(job_id = %job.id, attempts = job.attempts, "job failed permanently");
                self.inner.events.emit(
                    "failed",
                    &QueueEvent::Failed {
                        job_id: job.id,
                        attempt: job.attempts,
                        error: job.error.clone().unwrap_or_default(),
                        will_retry: false,
                        at: now,
                    },
                );
            }
            JobStatus::Pending => {
                debug!(job_id = %job.id, attempts = job.attempts, "job requeued with backoff");
                self.inner.events.emit(
                    "failed",
                    &QueueEvent::Failed {
                        job_id: job.id,
                        attempt: job.attempts,
                        error: job.error.clone().unwrap_or_default(),
                        will_retry: true,
                        at: now,
                    },
                );
            }
            _ => {}
        }
    }
}

fn to_record(job: &Job) -> JobRecord {
    JobRecord {
        id: job.id,
        queue_name: "default".into(),
        job_type: job.job_type.clone(),
        data: job.data.clone(),
        priority: job.priority.as_i16() as i32,
        status: format!("{:?}", job.status).to_lowercase(),
        attempts: job.attempts as i32,
        max_attempts: job.max_attempts as i32,
        result: job.result.clone(),
        error: job.error.clone(),
        parent_id: job.parent_id,
        metadata: job.metadata.clone(),
        created_at: job.created_at,
        started_at: job.started_at,
        completed_at: job.completed_at,
        next_retry_at: job.next_retry_at,
    }
}

fn from_record(record: &JobRecord) -> Job {
    let priority = match record.priority {
        0 => JobPriority::Critical,
        1 => JobPriority::High,
        3 => JobPriority::Low,
        _ => JobPriority::Normal,
    };
    let status = match record.status.as_str() {
        "running" => JobStatus::Running,
        "completed" => JobStatus::Completed,
        "failed" => JobStatus::Failed,
        "cancelled" => JobStatus::Cancelled,
        "stalled" => JobStatus::Stalled,
        _ => JobStatus::Pending,
    };
    Job {
        id: record.id,
        job_type: record.job_type.clone(),
        data: record.data.clone(),
        priority,
        status,
        attempts: record.attempts as u32,
        max_attempts: record.max_attempts as u32,
        next_retry_at: record.next_retry_at,
        created_at: record.created_at,
        started_at: record.started_at,
        completed_at: record.completed_at,
        parent_id: record.parent_id,
        result: record.result.clone(),
        error: record.error.clone(),
        metadata: record.metadata.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::TestClock;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

    #[tokio::test]
    async fn higher_priority_dispatches_before_lower() {
        let queue = WorkflowQueue::with_clock(QueueConfig::default(), TestClock::new(Utc::now()));
        queue
            .add("low-job", serde_json::json!({}), AddJobOptions { priority: JobPriority::Low, ..Default::default() })
            .await
            .unwrap();
        let critical_id = queue
            .add(
                "critical-job",
                serde_json::json!({}),
                AddJobOptions { priority: JobPriority::Critical, ..Default::default() },
            )
            .await
            .unwrap();

        let state = queue.inner.state.lock().await;
        assert_eq!(state.pending[0], critical_id);
    }

    #[tokio::test]
    async fn fifo_within_same_priority() {
        let queue = WorkflowQueue::with_clock(QueueConfig::default(), TestClock::new(Utc::now()));
        let first = queue.add("a", serde_json::json!({}), AddJobOptions::default()).await.unwrap();
        let second = queue.add("b", serde_json::json!({}), AddJobOptions::default()).await.unwrap();

        let state = queue.inner.state.lock().await;
        assert_eq!(state.pending, vec![first, second]);
    }

    #[tokio::test]
    async fn cancel_removes_from_pending() {
        let queue = WorkflowQueue::with_clock(QueueConfig::default(), TestClock::new(Utc::now()));
        let id = queue.add("job", serde_json::json!({}), AddJobOptions::default()).await.unwrap();
        queue.cancel(id).await.unwrap();

        let job = queue.get_job(id).await.unwrap();
        assert_eq!(job.status, JobStatus::Cancelled);
        assert!(!queue.inner.state.lock().await.pending.contains(&id));
    }

    #[tokio::test]
    async fn completed_attempt_marks_job_done() {
        let queue = WorkflowQueue::with_clock(QueueConfig::default(), TestClock::new(Utc::now()));
        queue
            .register("echo", Arc::new(|data: serde_json::Value| async move { Ok(data) }))
            .await;
        let id = queue.add("echo", serde_json::json!({"x": 1}), AddJobOptions::default()).await.unwrap();

        let claimed = queue.claim_next().await.unwrap();
        assert_eq!(claimed.id, id);
        queue.complete_attempt(id, Ok(serde_json::json!({"x": 1}))).await;

        let job = queue.get_job(id).await.unwrap();
        assert_eq!(job.status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn failed_attempt_requeues_until_max_attempts_then_fails() {
        let clock = TestClock::new(Utc::now());
        let queue = WorkflowQueue::with_clock(QueueConfig::default(), clock.clone());
        let id = queue
            .add(
                "flaky",
                serde_json::json!({}),
                AddJobOptions { max_attempts: Some(2), ..Default::default() },
            )
            .await
            .unwrap();

        queue.claim_next().await.unwrap();
        queue.complete_attempt(id, Err(anyhow::anyhow!("transient"))).await;
        let job = queue.get_job(id).await.unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert!(job.next_retry_at.is_some());

        clock.advance(Duration::from_secs(60));
        queue.claim_next().await.unwrap();
        queue.complete_attempt(id, Err(anyhow::anyhow!("transient again"))).await;
        let job = queue.get_job(id).await.unwrap();
        assert_eq!(job.status, JobStatus::Failed);
    }

    #[tokio::test]
    async fn end_to_end_dispatch_runs_registered_handler() {
        let queue = WorkflowQueue::new(QueueConfig { poll_interval: Duration::from_millis(10), ..Default::default() }, None);
        let invocations = Arc::new(AtomicUsize::new(0));
        let invocations2 = invocations.clone();
        queue
            .register(
                "count",
                Arc::new(move |_data: serde_json::Value| {
                    let invocations = invocations2.clone();
                    async move {
                        invocations.fetch_add(1, AtomicOrdering::SeqCst);
                        Ok(serde_json::json!(null))
                    }
                }),
            )
            .await;

        queue.add("count", serde_json::json!({}), AddJobOptions::default()).await.unwrap();
        queue.start();
        queue.drain().await;
        queue.stop().await;

        assert_eq!(invocations.load(AtomicOrdering::SeqCst), 1);
    }
}
