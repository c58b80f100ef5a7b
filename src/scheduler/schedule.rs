use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Trigger {
    Cron(String),
    Interval(u64),
    Event(String),
}

impl Trigger {
    pub fn type_name(&self) -> &'static str {
        match self {
            Trigger::Cron(_) => "cron",
            Trigger::Interval(_) => "interval",
            Trigger::Event(_) => "event",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScheduledWorkflow {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub trigger: Trigger,
    pub request: serde_json::Value,
    pub enabled: bool,
    pub max_concurrent: u32,
    pub retry_on_fail: bool,
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub next_run_at: Option<DateTime<Utc>>,
}

/// Options accepted by [`crate::scheduler::Scheduler::register`].
#[derive(Debug, Clone)]
pub struct RegisterOptions {
    pub description: Option<String>,
    pub max_concurrent: u32,
    pub retry_on_fail: bool,
    pub tags: Vec<String>,
    pub enabled: bool,
}

impl Default for RegisterOptions {
    fn default() -> Self {
        Self {
            description: None,
            max_concurrent: 1,
            retry_on_fail: false,
            tags: Vec::new(),
            enabled: true,
        }
    }
}
