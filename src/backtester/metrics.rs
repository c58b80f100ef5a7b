use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::order::{OrderAction, Trade};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailySnapshot {
    pub date: DateTime<Utc>,
    pub cash: Decimal,
    pub total_value: Decimal,
    pub cumulative_return: Decimal,
    pub daily_return: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PerformanceMetrics {
    pub total_return: Decimal,
    pub volatility: f64,
    pub annualized_volatility: f64,
    pub sharpe_ratio: f64,
    pub max_drawdown: Decimal,
    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub win_rate: f64,
    pub average_win: f64,
    pub average_loss: f64,
    pub profit_factor: f64,
}

/// Derive performance metrics from a completed run's equity curve and
/// trade log. Everything but volatility/Sharpe stays in `Decimal`; the two
/// statistics that require a square root drop to `f64` at the boundary,
/// since `rust_decimal` has no irrational-function support.
pub fn compute_metrics(snapshots: &[DailySnapshot], trades: &[Trade], risk_free_rate: f64) -> PerformanceMetrics {
    let total_return = snapshots.last().map(|s| s.cumulative_return).unwrap_or(Decimal::ZERO);

    let daily_returns: Vec<f64> = snapshots.iter().filter_map(|s| s.daily_return.to_f64()).collect();
    let volatility = stddev(&daily_returns);
    let annualized_volatility = volatility * (252.0_f64).sqrt();

    let mean_return = mean(&daily_returns);
    let sharpe_ratio = if volatility > 0.0 {
        ((mean_return - risk_free_rate / 252.0) / volatility) * (252.0_f64).sqrt()
    } else {
        0.0
    };

    let max_drawdown = max_drawdown(snapshots);

    let stats = trade_stats(trades);

    PerformanceMetrics {
        total_return,
        volatility,
        annualized_volatility,
        sharpe_ratio,
        max_drawdown,
        total_trades: trades.len(),
        winning_trades: stats.winning_trades,
        losing_trades: stats.losing_trades,
        win_rate: stats.win_rate,
        average_win: stats.average_win,
        average_loss: stats.average_loss,
        profit_factor: stats.profit_factor,
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

fn stddev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let avg = mean(values);
    let variance = values.iter().map(|v| (v - avg).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    variance.sqrt()
}

fn max_drawdown(snapshots: &[DailySnapshot]) -> Decimal {
    let mut peak = Decimal::MIN;
    let mut worst = Decimal::ZERO;
    for snapshot in snapshots {
        if snapshot.total_value > peak {
            peak = snapshot.total_value;
        }
        if peak > Decimal::ZERO {
            let drawdown = (peak - snapshot.total_value) / peak;
            if drawdown > worst {
                worst = drawdown;
            }
        }
    }
    worst
}

struct TradeStats {
    winning_trades: usize,
    losing_trades: usize,
    win_rate: f64,
    average_win: f64,
    average_loss: f64,
    profit_factor: f64,
}

/// Pairs sell/cover fills against the preceding buy/short for the same
/// symbol's realized P&L sign, approximated here via commission-adjusted
/// notional direction since individual lot cost basis lives in the
/// portfolio, not the trade log.
fn trade_stats(trades: &[Trade]) -> TradeStats {
    let mut gains = 0.0_f64;
    let mut losses = 0.0_f64;
    let mut winning = 0;
    let mut losing = 0;

    for pair in trades.windows(2) {
        let (entry, exit) = (&pair[0], &pair[1]);
        if entry.symbol != exit.symbol {
            continue;
        }
        let pnl = match (entry.action, exit.action) {
            (OrderAction::Buy, OrderAction::Sell) => (exit.price - entry.price) * exit.quantity,
            (OrderAction::Short, OrderAction::Cover) => (entry.price - exit.price) * exit.quantity,
            _ => continue,
        };
        let pnl = pnl.to_f64().unwrap_or(0.0);
        if pnl > 0.0 {
            gains += pnl;
            winning += 1;
        } else if pnl < 0.0 {
            losses += -pnl;
            losing += 1;
        }
    }

    let closed = winning + losing;
    let win_rate = if closed > 0 { winning as f64 / closed as f64 } else { 0.0 };
    let average_win = if winning > 0 { gains / winning as f64 } else { 0.0 };
    let average_loss = if losing > 0 { losses / losing as f64 } else { 0.0 };
    let profit_factor = if losses > 0.0 { gains / losses } else if gains > 0.0 { f64::INFINITY } else { 0.0 };

    TradeStats { winning_trades: winning, losing_trades: losing, win_rate, average_win, average_loss, profit_factor }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn snapshot(total_value: Decimal, cumulative_return: Decimal, daily_return: Decimal) -> DailySnapshot {
        DailySnapshot { date: Utc::now(), cash: Decimal::ZERO, total_value, cumulative_return, daily_return }
    }

    #[test]
    fn max_drawdown_tracks_worst_peak_to_trough_decline() {
        let snapshots = vec![
            snapshot(dec!(100), dec!(0), dec!(0)),
            snapshot(dec!(120), dec!(0.2), dec!(0.2)),
            snapshot(dec!(90), dec!(-0.1), dec!(-0.25)),
            snapshot(dec!(110), dec!(0.1), dec!(0.22)),
        ];
        let metrics = compute_metrics(&snapshots, &[], 0.0);
        assert_eq!(metrics.max_drawdown, (dec!(120) - dec!(90)) / dec!(120));
    }

    #[test]
    fn profit_factor_is_ratio_of_gains_to_losses() {
        let ts = Utc::now();
        let trades = vec![
            Trade { timestamp: ts, symbol: "AAPL".into(), action: OrderAction::Buy, price: dec!(100), quantity: dec!(10), commission: dec!(0), slippage: dec!(0), reason: None },
            Trade { timestamp: ts, symbol: "AAPL".into(), action: OrderAction::Sell, price: dec!(110), quantity: dec!(10), commission: dec!(0), slippage: dec!(0), reason: None },
        ];
        let metrics = compute_metrics(&[], &trades, 0.0);
        assert_eq!(metrics.winning_trades, 1);
        assert_eq!(metrics.win_rate, 1.0);
        assert_eq!(metrics.average_win, 100.0);
        assert_eq!(metrics.average_loss, 0.0);
        assert!(metrics.profit_factor.is_infinite());
    }
}
