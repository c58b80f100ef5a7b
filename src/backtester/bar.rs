use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct HistoricalBar {
    pub timestamp: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

/// Restrict `bars` to `[start, end]` inclusive and assert strictly
/// ascending timestamps, matching the data-model invariant that bars per
/// symbol are ordered and bounded by the requested date range.
pub fn clip_and_validate(
    mut bars: Vec<HistoricalBar>,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<Vec<HistoricalBar>, crate::backtester::error::BacktestError> {
    bars.retain(|bar| bar.timestamp >= start && bar.timestamp <= end);
    bars.sort_by_key(|bar| bar.timestamp);
    for window in bars.windows(2) {
        if window[0].timestamp >= window[1].timestamp {
            return Err(crate::backtester::error::BacktestError::DataError(format!(
                "bars are not strictly ascending at {}",
                window[1].timestamp
            )));
        }
    }
    Ok(bars)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn bar(ts: &str) -> HistoricalBar {
        HistoricalBar {
            timestamp: ts.parse().unwrap(),
            open: dec!(1),
            high: dec!(1),
            low: dec!(1),
            close: dec!(1),
            volume: dec!(1),
        }
    }

    #[test]
    fn clips_to_date_range() {
        let bars = vec![bar("2026-01-01T00:00:00Z"), bar("2026-01-05T00:00:00Z"), bar("2026-01-10T00:00:00Z")];
        let clipped = clip_and_validate(
            bars,
            "2026-01-02T00:00:00Z".parse().unwrap(),
            "2026-01-06T00:00:00Z".parse().unwrap(),
        )
        .unwrap();
        assert_eq!(clipped.len(), 1);
    }

    #[test]
    fn rejects_duplicate_timestamps() {
        let bars = vec![bar("2026-01-01T00:00:00Z"), bar("2026-01-01T00:00:00Z")];
        let result = clip_and_validate(bars, "2026-01-01T00:00:00Z".parse().unwrap(), "2026-01-02T00:00:00Z".parse().unwrap());
        assert!(result.is_err());
    }
}
