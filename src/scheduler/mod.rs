//! Trigger-driven workflow scheduler: cron/interval/event triggers,
//! per-schedule and global concurrency gates, and execution history.
//! Grounded in the teacher's `kernel::scheduled_tasks` (tick loop +
//! `tokio_cron_scheduler` wiring) generalized from a fixed job list to a
//! dynamic schedule registry.

pub mod cron;
pub mod error;
pub mod events;
pub mod execution;
pub mod schedule;

pub use cron::{CrateCronEvaluator, CronEvaluator};
pub use error::SchedulerError;
pub use events::SchedulerEvent;
pub use execution::{ExecutionStatus, ScheduleExecution};
pub use schedule::{RegisterOptions, ScheduledWorkflow, Trigger};

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::clock::{system_clock, SharedClock};
use crate::events::EventEmitter;
use crate::persistence::{PersistenceGateway, ScheduleExecutionRecord, ScheduledWorkflowRecord};

/// External collaborator the scheduler invokes on every fire. Implemented
/// outside this crate by whatever dispatches the actual workflow (or, for
/// event-triggered schedules, by code that enqueues into the
/// [`crate::queue::WorkflowQueue`]).
#[async_trait]
pub trait WorkflowRunner: Send + Sync {
    async fn run(&self, schedule: &ScheduledWorkflow) -> anyhow::Result<String>;
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub max_global_concurrent: u32,
    pub tick_interval: Duration,
    pub retry_delay: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_global_concurrent: 10,
            tick_interval: Duration::from_secs(1),
            retry_delay: Duration::from_secs(60),
        }
    }
}

struct State {
    schedules: HashMap<Uuid, ScheduledWorkflow>,
    running_counts: HashMap<Uuid, u32>,
    global_running: u32,
    history: HashMap<Uuid, Vec<ScheduleExecution>>,
}

struct Inner {
    state: AsyncMutex<State>,
    runner: AsyncMutex<Option<Arc<dyn WorkflowRunner>>>,
    cron: Arc<dyn CronEvaluator>,
    clock: SharedClock,
    persistence: Option<Arc<dyn PersistenceGateway>>,
    events: EventEmitter<SchedulerEvent>,
    config: SchedulerConfig,
    shutdown: AtomicBool,
    ticker: std::sync::Mutex<Option<JoinHandle<()>>>,
    retry_timers: std::sync::Mutex<HashMap<Uuid, JoinHandle<()>>>,
}

#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig, persistence: Option<Arc<dyn PersistenceGateway>>) -> Self {
        Self::with_cron_evaluator(config, persistence, Arc::new(CrateCronEvaluator))
    }

    pub fn with_cron_evaluator(
        config: SchedulerConfig,
        persistence: Option<Arc<dyn PersistenceGateway>>,
        cron: Arc<dyn CronEvaluator>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: AsyncMutex::new(State {
                    schedules: HashMap::new(),
                    running_counts: HashMap::new(),
                    global_running: 0,
                    history: HashMap::new(),
                }),
                runner: AsyncMutex::new(None),
                cron,
                clock: system_clock(),
                persistence,
                events: EventEmitter::new(),
                config,
                shutdown: AtomicBool::new(false),
                ticker: std::sync::Mutex::new(None),
                retry_timers: std::sync::Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn on(&self, name: &'static str, handler: impl Fn(&SchedulerEvent) + Send + Sync + 'static) {
        self.inner.events.on(name, handler);
    }

    pub async fn set_workflow_runner(&self, runner: Arc<dyn WorkflowRunner>) {
        *self.inner.runner.lock().await = Some(runner);
    }

    pub async fn register(
        &self,
        name: impl Into<String>,
        trigger: Trigger,
        request: serde_json::Value,
        opts: RegisterOptions,
    ) -> Result<Uuid, SchedulerError> {
        if let Trigger::Cron(expr) = &trigger {
            self.inner.cron.validate(expr)?;
        }

        let now = self.inner.clock.now();
        let next_run_at = self.compute_next_run(&trigger, now)?;
        let schedule = ScheduledWorkflow {
            id: Uuid::new_v4(),
            name: name.into(),
            description: opts.description,
            trigger,
            request,
            enabled: opts.enabled,
            max_concurrent: opts.max_concurrent.max(1),
            retry_on_fail: opts.retry_on_fail,
            tags: opts.tags,
            created_at: now,
            last_run_at: None,
            next_run_at: if opts.enabled { next_run_at } else { None },
        };
        let id = schedule.id;

        self.persist_schedule(&schedule).await?;
        let mut state = self.inner.state.lock().await;
        state.schedules.insert(id, schedule);
        drop(state);

        info!(schedule_id = %id, "schedule registered");
        Ok(id)
    }

    fn compute_next_run(
        &self,
        trigger: &Trigger,
        now: chrono::DateTime<Utc>,
    ) -> Result<Option<chrono::DateTime<Utc>>, SchedulerError> {
        match trigger {
            Trigger::Cron(expr) => Ok(Some(self.inner.cron.next_after(expr, now)?)),
            Trigger::Interval(ms) => Ok(Some(now + chrono::Duration::milliseconds(*ms as i64))),
            Trigger::Event(_) => Ok(None),
        }
    }

    pub async fn unregister(&self, id: Uuid) -> Result<(), SchedulerError> {
        let mut state = self.inner.state.lock().await;
        state.schedules.remove(&id).ok_or(SchedulerError::NotFound(id))?;
        drop(state);
        if let Some(persistence) = &self.inner.persistence {
            let _ = persistence.delete_schedule(id).await;
        }
        self.cancel_retry_timer(id).await;
        Ok(())
    }

    pub async fn enable(&self, id: Uuid) -> Result<(), SchedulerError> {
        let now = self.inner.clock.now();
        let mut state = self.inner.state.lock().await;
        let schedule = state.schedules.get_mut(&id).ok_or(SchedulerError::NotFound(id))?;
        schedule.enabled = true;
        schedule.next_run_at = self.compute_next_run(&schedule.trigger, now)?;
        Ok(())
    }

    pub async fn disable(&self, id: Uuid) -> Result<(), SchedulerError> {
        let mut state = self.inner.state.lock().await;
        let schedule = state.schedules.get_mut(&id).ok_or(SchedulerError::NotFound(id))?;
        schedule.enabled = false;
        schedule.next_run_at = None;
        drop(state);
        self.cancel_retry_timer(id).await;
        Ok(())
    }

    pub async fn get_schedules(&self) -> Vec<ScheduledWorkflow> {
        self.inner.state.lock().await.schedules.values().cloned().collect()
    }

    pub async fn get_schedule(&self, id: Uuid) -> Option<ScheduledWorkflow> {
        self.inner.state.lock().await.schedules.get(&id).cloned()
    }

    pub async fn get_execution_history(&self, id: Uuid, limit: usize) -> Vec<ScheduleExecution> {
        let state = self.inner.state.lock().await;
        let mut history = state.history.get(&id).cloned().unwrap_or_default();
        history.sort_by_key(|e| std::cmp::Reverse(e.started_at));
        history.truncate(limit);
        history
    }

    /// Dispatch every enabled schedule whose trigger is `Event(event_type)`,
    /// subject to concurrency gates. Returns the ids of schedules actually
    /// launched (skipped schedules are not included).
    pub async fn trigger_event(&self, event_type: &str, _payload: serde_json::Value) -> Vec<Uuid> {
        let matching: Vec<Uuid> = {
            let state = self.inner.state.lock().await;
            state
                .schedules
                .values()
                .filter(|s| s.enabled && matches!(&s.trigger, Trigger::Event(t) if t == event_type))
                .map(|s| s.id)
                .collect()
        };

        let mut launched = Vec::new();
        for id in matching {
            if self.execute(id).await {
                launched.push(id);
            }
        }
        launched
    }

    /// Force a schedule to run immediately, still subject to concurrency
    /// gates. Returns whether it actually launched.
    pub async fn run_now(&self, id: Uuid) -> Result<bool, SchedulerError> {
        if !self.inner.state.lock().await.schedules.contains_key(&id) {
            return Err(SchedulerError::NotFound(id));
        }
        Ok(self.execute(id).await)
    }

    /// Start the background tick loop evaluating cron/interval triggers.
    pub fn start(&self) {
        self.inner.shutdown.store(false, Ordering::SeqCst);
        let scheduler = self.clone();
        let handle = tokio::spawn(async move { scheduler.run_tick_loop().await });
        *self.inner.ticker.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);
    }

    pub async fn stop(&self) {
        self.inner.shutdown.store(true, Ordering::SeqCst);
        let handle = self.inner.ticker.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        let timers: Vec<JoinHandle<()>> = self
            .inner
            .retry_timers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain()
            .map(|(_, h)| h)
            .collect();
        for timer in timers {
            timer.abort();
        }
    }

    async fn run_tick_loop(&self) {
        while !self.inner.shutdown.load(Ordering::SeqCst) {
            self.tick().await;
            tokio::time::sleep(self.inner.config.tick_interval).await;
        }
    }

    async fn tick(&self) {
        let now = self.inner.clock.now();
        let due: Vec<Uuid> = {
            let state = self.inner.state.lock().await;
            state
                .schedules
                .values()
                .filter(|s| s.enabled && s.next_run_at.map(|at| at <= now).unwrap_or(false))
                .map(|s| s.id)
                .collect()
        };
        for id in due {
            self.advance_next_run(id).await;
            self.execute(id).await;
        }
    }

    async fn advance_next_run(&self, id: Uuid) {
        let now = self.inner.clock.now();
        let mut state = self.inner.state.lock().await;
        if let Some(schedule) = state.schedules.get_mut(&id) {
            schedule.next_run_at = self.compute_next_run(&schedule.trigger, now).unwrap_or_default();
        }
    }

    /// Run `id` now if concurrency gates allow it. Returns whether it
    /// launched.
    async fn execute(&self, id: Uuid) -> bool {
        let now = self.inner.clock.now();
        let schedule = {
            let mut state = self.inner.state.lock().await;
            let Some(schedule) = state.schedules.get(&id).cloned() else {
                return false;
            };
            let schedule_running = *state.running_counts.get(&id).unwrap_or(&0);
            if schedule_running >= schedule.max_concurrent {
                drop(state);
                self.emit_skipped(id, "schedule_concurrency_cap", now);
                return false;
            }
            if state.global_running >= self.inner.config.max_global_concurrent {
                drop(state);
                self.emit_skipped(id, "global_concurrency_cap", now);
                return false;
            }
            *state.running_counts.entry(id).or_insert(0) += 1;
            state.global_running += 1;
            if let Some(s) = state.schedules.get_mut(&id) {
                s.last_run_at = Some(now);
            }
            schedule
        };

        let execution_id = Uuid::new_v4();
        let execution = ScheduleExecution {
            id: execution_id,
            schedule_id: id,
            status: ExecutionStatus::Running,
            started_at: now,
            completed_at: None,
            error: None,
            workflow_execution_id: None,
        };
        self.record_execution(execution.clone()).await;

        debug!(schedule_id = %id, execution_id = %execution_id, trigger = schedule.trigger.type_name(), "schedule fired");
        self.inner.events.emit(
            "fired",
            &SchedulerEvent::Fired { schedule_id: id, execution_id, at: now },
        );

        let scheduler = self.clone();
        tokio::spawn(async move {
            scheduler.run_and_settle(schedule, execution_id).await;
        });
        true
    }

    fn emit_skipped(&self, schedule_id: Uuid, reason: &'static str, at: chrono::DateTime<Utc>) {
        warn!(schedule_id = %schedule_id, reason, "schedule trigger skipped");
        self.inner.events.emit("skipped", &SchedulerEvent::Skipped { schedule_id, reason, at });
    }

    async fn run_and_settle(&self, schedule: ScheduledWorkflow, execution_id: Uuid) {
        let runner = self.inner.runner.lock().await.clone();
        let outcome = match runner {
            Some(runner) => runner.run(&schedule).await,
            None => Err(anyhow::Error::new(SchedulerError::RunnerMissing)),
        };

        let now = self.inner.clock.now();
        {
            let mut state = self.inner.state.lock().await;
            if let Some(count) = state.running_counts.get_mut(&schedule.id) {
                *count = count.saturating_sub(1);
            }
            state.global_running = state.global_running.saturating_sub(1);
        }

        match outcome {
            Ok(workflow_execution_id) => {
                self.settle_execution(execution_id, ExecutionStatus::Completed, None, Some(workflow_execution_id), now)
                    .await;
                info!(schedule_id = %schedule.id, execution_id = %execution_id, "schedule execution completed");
                self.inner.events.emit(
                    "completed",
                    &SchedulerEvent::Completed { schedule_id: schedule.id, execution_id, at: now },
                );
            }
            Err(err) => {
                self.settle_execution(execution_id, ExecutionStatus::Failed, Some(err.to_string()), None, now)
                    .await;
                warn!(schedule_id = %schedule.id, execution_id = %execution_id, error = %err, "schedule execution failed");
                self.inner.events.emit(
                    "failed",
                    &SchedulerEvent::Failed {
                        schedule_id: schedule.id,
                        execution_id,
                        error: err.to_string(),
                        will_retry: schedule.retry_on_fail,
                        at: now,
                    },
                );
                if schedule.retry_on_fail {
                    self.schedule_retry(schedule.id);
                }
            }
        }
    }

    fn schedule_retry(&self, schedule_id: Uuid) {
        let scheduler = self.clone();
        let delay = self.inner.config.retry_delay;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            scheduler.execute(schedule_id).await;
            scheduler
                .inner
                .retry_timers
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .remove(&schedule_id);
        });
        self.inner
            .retry_timers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(schedule_id, handle);
    }

    async fn cancel_retry_timer(&self, schedule_id: Uuid) {
        let handle = self
            .inner
            .retry_timers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&schedule_id);
        if let Some(handle) = handle {
            handle.abort();
        }
    }

    async fn record_execution(&self, execution: ScheduleExecution) {
        let mut state = self.inner.state.lock().await;
        state.history.entry(execution.schedule_id).or_default().push(execution.clone());
        drop(state);
        if let Some(persistence) = &self.inner.persistence {
            let _ = persistence.insert_execution(to_execution_record(&execution)).await;
        }
    }

    async fn settle_execution(
        &self,
        execution_id: Uuid,
        status: ExecutionStatus,
        error: Option<String>,
        workflow_execution_id: Option<String>,
        completed_at: chrono::DateTime<Utc>,
    ) {
        let record = {
            let mut state = self.inner.state.lock().await;
            let mut found = None;
            for history in state.history.values_mut() {
                if let Some(execution) = history.iter_mut().find(|e| e.id == execution_id) {
                    execution.status = status;
                    execution.error = error.clone();
                    execution.workflow_execution_id = workflow_execution_id.clone();
                    execution.completed_at = Some(completed_at);
                    found = Some(execution.clone());
                    break;
                }
            }
            found
        };
        if let (Some(record), Some(persistence)) = (record, &self.inner.persistence) {
            let _ = persistence.update_execution(to_execution_record(&record)).await;
        }
    }

    async fn persist_schedule(&self, schedule: &ScheduledWorkflow) -> Result<(), SchedulerError> {
        if let Some(persistence) = &self.inner.persistence {
            persistence
                .upsert_schedule(to_schedule_record(schedule))
                .await
                .map_err(SchedulerError::PersistenceError)?;
        }
        Ok(())
    }
}

fn to_schedule_record(schedule: &ScheduledWorkflow) -> ScheduledWorkflowRecord {
    let (trigger_type, trigger_config) = match &schedule.trigger {
        Trigger::Cron(expr) => ("cron".to_string(), serde_json::json!({ "expression": expr })),
        Trigger::Interval(ms) => ("interval".to_string(), serde_json::json!({ "ms": ms })),
        Trigger::Event(event_type) => ("event".to_string(), serde_json::json!({ "eventType": event_type })),
    };
    ScheduledWorkflowRecord {
        id: schedule.id,
        name: schedule.name.clone(),
        description: schedule.description.clone(),
        trigger_type,
        trigger_config,
        request: schedule.request.clone(),
        enabled: schedule.enabled,
        max_concurrent: schedule.max_concurrent as i32,
        retry_on_fail: schedule.retry_on_fail,
        tags: schedule.tags.clone(),
        created_at: schedule.created_at,
        last_run_at: schedule.last_run_at,
    }
}

fn to_execution_record(execution: &ScheduleExecution) -> ScheduleExecutionRecord {
    ScheduleExecutionRecord {
        id: execution.id,
        schedule_id: execution.schedule_id,
        status: format!("{:?}", execution.status).to_lowercase(),
        started_at: execution.started_at,
        completed_at: execution.completed_at,
        error: execution.error.clone(),
        workflow_execution_id: execution.workflow_execution_id.clone(),
    }
}
