//! Environment-driven configuration, grounded in the teacher's
//! `config::Config::from_env`: `dotenvy` loads a local `.env`, then every
//! field is read with `anyhow::Context` explaining what's missing.

use std::env;
use std::time::Duration;

use anyhow::Context;

#[derive(Debug, Clone)]
pub struct QueueSettings {
    pub max_concurrent: usize,
    pub poll_interval: Duration,
    pub stall_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub max_global_concurrent: u32,
    pub tick_interval: Duration,
    pub retry_delay: Duration,
}

#[derive(Debug, Clone)]
pub struct BacktesterSettings {
    pub risk_free_rate: f64,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub queue: QueueSettings,
    pub scheduler: SchedulerSettings,
    pub backtester: BacktesterSettings,
    /// Only required when the `postgres` feature's gateway is constructed.
    pub database_url: Option<String>,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let _ = dotenvy::dotenv();

        Ok(Self {
            queue: QueueSettings {
                max_concurrent: parse_env("QUEUE_MAX_CONCURRENT", 5)?,
                poll_interval: Duration::from_millis(parse_env("QUEUE_POLL_INTERVAL_MS", 100)?),
                stall_timeout: Duration::from_secs(parse_env("QUEUE_STALL_TIMEOUT_SECS", 300)?),
            },
            scheduler: SchedulerSettings {
                max_global_concurrent: parse_env("SCHEDULER_MAX_GLOBAL_CONCURRENT", 10)?,
                tick_interval: Duration::from_secs(parse_env("SCHEDULER_TICK_INTERVAL_SECS", 1)?),
                retry_delay: Duration::from_secs(parse_env("SCHEDULER_RETRY_DELAY_SECS", 60)?),
            },
            backtester: BacktesterSettings { risk_free_rate: parse_env("BACKTESTER_RISK_FREE_RATE", 0.0)? },
            database_url: env::var("DATABASE_URL").ok(),
        })
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> anyhow::Result<T>
where
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(value) => value
            .parse()
            .map_err(|e| anyhow::anyhow!("{e}"))
            .with_context(|| format!("{key} is set but not a valid value: {value:?}")),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_queue_settings_load_without_env_vars() {
        assert_eq!(parse_env::<usize>("QUEUE_SETTING_THAT_DOES_NOT_EXIST", 5).unwrap(), 5);
    }

    #[test]
    fn malformed_numeric_env_var_is_a_context_error() {
        env::set_var("CONFIG_TEST_MALFORMED_VAR", "not-a-number");
        let result = parse_env::<usize>("CONFIG_TEST_MALFORMED_VAR", 5);
        env::remove_var("CONFIG_TEST_MALFORMED_VAR");
        assert!(result.is_err());
    }
}
