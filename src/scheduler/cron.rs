//! Cron parsing/evaluation behind a trait, so tests can substitute a fake
//! evaluator instead of waiting on wall-clock cron fires. The production
//! implementation wraps the `cron` crate, the same parser
//! `tokio-cron-scheduler` wraps.

use chrono::{DateTime, Utc};

use super::error::SchedulerError;

pub trait CronEvaluator: Send + Sync {
    /// Validate `expression`, returning an error describing why it's
    /// malformed.
    fn validate(&self, expression: &str) -> Result<(), SchedulerError>;

    /// The next fire time strictly after `after`.
    fn next_after(&self, expression: &str, after: DateTime<Utc>) -> Result<DateTime<Utc>, SchedulerError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CrateCronEvaluator;

impl CronEvaluator for CrateCronEvaluator {
    fn validate(&self, expression: &str) -> Result<(), SchedulerError> {
        expression
            .parse::<cron::Schedule>()
            .map(|_| ())
            .map_err(|e| SchedulerError::ConfigurationError(expression.to_string(), e.to_string()))
    }

    fn next_after(&self, expression: &str, after: DateTime<Utc>) -> Result<DateTime<Utc>, SchedulerError> {
        let schedule: cron::Schedule = expression
            .parse()
            .map_err(|e: cron::error::Error| SchedulerError::ConfigurationError(expression.to_string(), e.to_string()))?;
        schedule
            .after(&after)
            .next()
            .ok_or_else(|| SchedulerError::ConfigurationError(expression.to_string(), "no future fire time".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validates_well_formed_expression() {
        let evaluator = CrateCronEvaluator;
        assert!(evaluator.validate("0 0 * * * *").is_ok());
    }

    #[test]
    fn rejects_malformed_expression() {
        let evaluator = CrateCronEvaluator;
        assert!(evaluator.validate("not a cron expression").is_err());
    }

    #[test]
    fn next_after_advances_to_the_top_of_the_hour() {
        let evaluator = CrateCronEvaluator;
        let now: DateTime<Utc> = "2026-01-01T10:15:00Z".parse().unwrap();
        let next = evaluator.next_after("0 0 * * * *", now).unwrap();
        assert_eq!(next.to_rfc3339(), "2026-01-01T11:00:00+00:00");
    }
}
