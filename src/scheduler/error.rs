use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("invalid cron expression {0:?}: {1}")]
    ConfigurationError(String, String),

    #[error("schedule {0} not found")]
    NotFound(Uuid),

    #[error("workflow runner failed for schedule {schedule_id}: {source}")]
    RunnerThrown {
        schedule_id: Uuid,
        #[source]
        source: anyhow::Error,
    },

    #[error("no workflow runner has been configured")]
    RunnerMissing,

    #[error("persistence operation failed: {0}")]
    PersistenceError(anyhow::Error),
}
