use thiserror::Error;

#[derive(Debug, Error)]
pub enum BacktestError {
    #[error("invalid historical data: {0}")]
    DataError(String),

    #[error("strategy callback failed: {0}")]
    StrategyError(anyhow::Error),

    #[error("order rejected: {0}")]
    ExecutionRejection(String),

    #[error("invalid backtest configuration: {0}")]
    ConfigurationError(String),
}
