//! Queue error kinds, one variant per anticipated failure mode — no
//! catch-all `Other`, matching the split the teacher draws between
//! `ErrorKind::Retryable`/`NonRetryable` in `kernel::jobs::job`.

use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("no handler registered for job type {0:?}")]
    HandlerMissing(String),

    #[error("handler for job {job_id} failed: {source}")]
    HandlerThrown {
        job_id: Uuid,
        #[source]
        source: anyhow::Error,
    },

    #[error("job {0} exceeded its stall timeout while running")]
    StallTimeout(Uuid),

    #[error("persistence operation failed: {0}")]
    PersistenceError(anyhow::Error),

    #[error("invalid queue configuration: {0}")]
    ConfigurationError(String),

    #[error("job {0} not found")]
    NotFound(Uuid),

    #[error("job {0} cannot be cancelled from its current state")]
    NotCancellable(Uuid),

    #[error("job {0} cannot be retried from its current state")]
    NotRetryable(Uuid),
}

impl QueueError {
    /// Whether retrying the same job immediately could plausibly succeed.
    /// Mirrors the teacher's `classify_error` substring heuristic in
    /// `kernel::jobs::runner`, applied here to our own typed errors instead
    /// of a raw `anyhow::Error` message.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            QueueError::HandlerThrown { .. } | QueueError::StallTimeout(_) | QueueError::PersistenceError(_)
        )
    }
}
