//! Deterministic, event-driven historical market-replay engine. Grounded in
//! the `Environment`/`step`/`finalize_step` loop from the reference
//! gym-style trading environment: a time-ordered event queue drives
//! mark-to-market valuation and strategy invocation bar by bar.

pub mod bar;
pub mod error;
pub mod events;
pub mod metrics;
pub mod order;
pub mod portfolio;

pub use bar::HistoricalBar;
pub use error::BacktestError;
pub use events::BacktestEvent;
pub use metrics::{DailySnapshot, PerformanceMetrics};
pub use order::{ExecutionModel, OrderAction, OrderRequest, PositionSizing, Trade};
pub use portfolio::{Portfolio, Position};

use std::collections::{BTreeSet, HashMap};

use rust_decimal::Decimal;

use crate::events::EventEmitter;

/// Current-bar snapshot and portfolio state passed to the strategy
/// callback at each timestamp.
pub struct BacktestContext<'a> {
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub bars: &'a HashMap<String, HistoricalBar>,
    pub portfolio: &'a Portfolio,
}

pub type Strategy = dyn FnMut(&BacktestContext) -> Vec<OrderRequest> + Send + Sync;

#[derive(Debug, Clone)]
pub struct BacktestConfig {
    pub initial_cash: Decimal,
    pub execution: ExecutionModelConfig,
    pub risk_free_rate: f64,
}

#[derive(Debug, Clone, Default)]
pub struct ExecutionModelConfig {
    pub commission_per_trade: Decimal,
    pub commission_pct: Decimal,
    pub slippage_pct: Decimal,
    pub max_positions: usize,
    pub allow_shorts: bool,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            initial_cash: Decimal::new(100_000, 0),
            execution: ExecutionModelConfig { max_positions: usize::MAX, ..Default::default() },
            risk_free_rate: 0.0,
        }
    }
}

pub struct BacktestResult {
    pub final_portfolio: Portfolio,
    pub trades: Vec<Trade>,
    pub snapshots: Vec<DailySnapshot>,
    pub metrics: PerformanceMetrics,
    /// Every rejected order attempt and strategy failure, recorded
    /// per-attempt rather than aborting the run.
    pub errors: Vec<String>,
}

pub struct Backtester {
    data: HashMap<String, Vec<HistoricalBar>>,
    config: BacktestConfig,
    events: EventEmitter<BacktestEvent>,
}

impl Backtester {
    pub fn new(config: BacktestConfig) -> Self {
        Self { data: HashMap::new(), config, events: EventEmitter::new() }
    }

    /// Load and validate bars for `symbol`, clipped to `[start, end]`.
    pub fn load_data(
        &mut self,
        symbol: impl Into<String>,
        bars: Vec<HistoricalBar>,
        start: chrono::DateTime<chrono::Utc>,
        end: chrono::DateTime<chrono::Utc>,
    ) -> Result<(), BacktestError> {
        let clipped = bar::clip_and_validate(bars, start, end)?;
        self.data.insert(symbol.into(), clipped);
        Ok(())
    }

    pub fn on(&self, name: &'static str, handler: impl Fn(&BacktestEvent) + Send + Sync + 'static) {
        self.events.on(name, handler);
    }

    /// Run `strategy` over the loaded bars. Deterministic: given the same
    /// data, config, and strategy, repeated calls produce byte-identical
    /// trades and metrics (all monetary math is `Decimal`, no floats on
    /// the hot path).
    pub fn run(&self, strategy: &mut Strategy) -> Result<BacktestResult, BacktestError> {
        if self.data.is_empty() {
            return Err(BacktestError::DataError("no data loaded".into()));
        }

        let bar_count: usize = self.data.values().map(Vec::len).sum();
        self.events.emit(
            "dataLoaded",
            &BacktestEvent::DataLoaded { symbol_count: self.data.len(), bar_count },
        );

        let execution = ExecutionModel {
            commission_per_trade: self.config.execution.commission_per_trade,
            commission_pct: self.config.execution.commission_pct,
            slippage_pct: self.config.execution.slippage_pct,
            max_positions: self.config.execution.max_positions,
            allow_shorts: self.config.execution.allow_shorts,
        };

        let timeline = self.build_timeline();
        let mut portfolio = Portfolio::new(self.config.initial_cash);
        let mut trades = Vec::new();
        let mut snapshots = Vec::new();
        let mut errors = Vec::new();
        let mut previous_value = self.config.initial_cash;
        let total_steps = timeline.len().max(1);

        for (step, timestamp) in timeline.iter().enumerate() {
            let current_bars = self.bars_at(*timestamp);
            for (symbol, bar) in &current_bars {
                portfolio.mark_to_market(symbol, bar.close);
            }

            let context = BacktestContext { timestamp: *timestamp, bars: &current_bars, portfolio: &portfolio };
            for order in strategy(&context) {
                let Some(bar) = current_bars.get(&order.symbol) else { continue };
                match execution.execute(&order, &mut portfolio, bar.close, *timestamp) {
                    Ok(trade) => {
                        self.events.emit("trade", &BacktestEvent::Trade(trade.clone()));
                        trades.push(trade);
                    }
                    Err(rejected) => {
                        errors.push(rejected.to_string());
                    }
                }
            }

            let total_value = portfolio.total_value();
            let daily_return = if previous_value.is_zero() {
                Decimal::ZERO
            } else {
                (total_value - previous_value) / previous_value
            };
            let cumulative_return = if self.config.initial_cash.is_zero() {
                Decimal::ZERO
            } else {
                (total_value - self.config.initial_cash) / self.config.initial_cash
            };
            let snapshot = DailySnapshot { date: *timestamp, cash: portfolio.cash, total_value, cumulative_return, daily_return };
            self.events.emit("snapshot", &BacktestEvent::Snapshot(snapshot.clone()));
            snapshots.push(snapshot);
            previous_value = total_value;

            self.events.emit(
                "progress",
                &BacktestEvent::Progress { timestamp: *timestamp, fraction_complete: (step + 1) as f64 / total_steps as f64 },
            );
        }

        let metrics = metrics::compute_metrics(&snapshots, &trades, self.config.risk_free_rate);
        self.events.emit(
            "complete",
            &BacktestEvent::Complete { final_value: portfolio.total_value(), metrics: metrics.clone() },
        );

        Ok(BacktestResult { final_portfolio: portfolio, trades, snapshots, metrics, errors })
    }

    /// Every distinct bar timestamp across all loaded symbols, ascending —
    /// the time-aligned replay order.
    fn build_timeline(&self) -> Vec<chrono::DateTime<chrono::Utc>> {
        let mut timestamps = BTreeSet::new();
        for bars in self.data.values() {
            for bar in bars {
                timestamps.insert(bar.timestamp);
            }
        }
        timestamps.into_iter().collect()
    }

    fn bars_at(&self, timestamp: chrono::DateTime<chrono::Utc>) -> HashMap<String, HistoricalBar> {
        let mut current = HashMap::new();
        for (symbol, bars) in &self.data {
            if let Ok(index) = bars.binary_search_by_key(&timestamp, |b| b.timestamp) {
                current.insert(symbol.clone(), bars[index]);
            }
        }
        current
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn bar(ts: &str, close: Decimal) -> HistoricalBar {
        HistoricalBar { timestamp: ts.parse().unwrap(), open: close, high: close, low: close, close, volume: dec!(1000) }
    }

    #[test]
    fn buy_and_hold_on_an_uptrend_grows_equity() {
        let mut backtester = Backtester::new(BacktestConfig { initial_cash: dec!(10000), ..Default::default() });
        let bars = vec![
            bar("2026-01-01T00:00:00Z", dec!(100)),
            bar("2026-01-02T00:00:00Z", dec!(110)),
            bar("2026-01-03T00:00:00Z", dec!(120)),
        ];
        backtester
            .load_data("AAPL", bars, "2026-01-01T00:00:00Z".parse().unwrap(), "2026-01-03T00:00:00Z".parse().unwrap())
            .unwrap();

        let mut bought = false;
        let mut strategy = move |ctx: &BacktestContext| {
            if !bought && ctx.bars.contains_key("AAPL") {
                bought = true;
                vec![OrderRequest { symbol: "AAPL".into(), action: OrderAction::Buy, sizing: PositionSizing::Fixed(dec!(10)), reason: Some("entry".into()) }]
            } else {
                vec![]
            }
        };

        let result = backtester.run(&mut strategy).unwrap();
        assert_eq!(result.trades.len(), 1);
        assert!(result.final_portfolio.total_value() > dec!(10000));
        assert_eq!(result.snapshots.len(), 3);
    }

    #[test]
    fn repeated_runs_are_deterministic() {
        let mut backtester = Backtester::new(BacktestConfig::default());
        backtester
            .load_data(
                "AAPL",
                vec![bar("2026-01-01T00:00:00Z", dec!(100)), bar("2026-01-02T00:00:00Z", dec!(105))],
                "2026-01-01T00:00:00Z".parse().unwrap(),
                "2026-01-02T00:00:00Z".parse().unwrap(),
            )
            .unwrap();

        let mut strategy = |_: &BacktestContext| -> Vec<OrderRequest> { vec![] };
        let first = backtester.run(&mut strategy).unwrap();
        let second = backtester.run(&mut strategy).unwrap();
        assert_eq!(first.final_portfolio.total_value(), second.final_portfolio.total_value());
        assert_eq!(first.snapshots.len(), second.snapshots.len());
    }

    #[test]
    fn rejected_orders_are_recorded_in_errors_not_dropped() {
        let mut backtester = Backtester::new(BacktestConfig { initial_cash: dec!(10), ..Default::default() });
        backtester
            .load_data("AAPL", vec![bar("2026-01-01T00:00:00Z", dec!(100))], "2026-01-01T00:00:00Z".parse().unwrap(), "2026-01-01T00:00:00Z".parse().unwrap())
            .unwrap();

        let mut strategy = |_: &BacktestContext| {
            vec![OrderRequest { symbol: "AAPL".into(), action: OrderAction::Buy, sizing: PositionSizing::Fixed(dec!(10)), reason: None }]
        };

        let result = backtester.run(&mut strategy).unwrap();
        assert!(result.trades.is_empty());
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].contains("insufficient cash"));
    }

    #[test]
    fn empty_data_is_rejected() {
        let backtester = Backtester::new(BacktestConfig::default());
        let mut strategy = |_: &BacktestContext| -> Vec<OrderRequest> { vec![] };
        assert!(backtester.run(&mut strategy).is_err());
    }
}
