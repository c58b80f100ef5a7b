use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use super::metrics::{DailySnapshot, PerformanceMetrics};
use super::order::Trade;

#[derive(Debug, Clone)]
pub enum BacktestEvent {
    DataLoaded {
        symbol_count: usize,
        bar_count: usize,
    },
    Progress {
        timestamp: DateTime<Utc>,
        fraction_complete: f64,
    },
    Trade(Trade),
    Snapshot(DailySnapshot),
    Complete {
        final_value: Decimal,
        metrics: PerformanceMetrics,
    },
}
