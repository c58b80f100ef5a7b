use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::error::BacktestError;
use super::portfolio::{Portfolio, Position};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderAction {
    Buy,
    Sell,
    Short,
    Cover,
}

#[derive(Debug, Clone)]
pub enum PositionSizing {
    /// A fixed share count.
    Fixed(Decimal),
    /// A fraction (0.0-1.0) of current portfolio equity, converted to
    /// shares at the fill price.
    PercentOfEquity(Decimal),
    /// Risk a fixed dollar `amount` per trade, sized by distance to
    /// `stop_price`: `quantity = amount / |fillPrice - stopPrice|`.
    Risk { amount: Decimal, stop_price: Decimal },
}

#[derive(Debug, Clone)]
pub struct OrderRequest {
    pub symbol: String,
    pub action: OrderAction,
    pub sizing: PositionSizing,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub timestamp: DateTime<Utc>,
    pub symbol: String,
    pub action: OrderAction,
    pub price: Decimal,
    pub quantity: Decimal,
    pub commission: Decimal,
    pub slippage: Decimal,
    pub reason: Option<String>,
}

/// Commission/slippage model applied at fill time.
#[derive(Debug, Clone)]
pub struct ExecutionModel {
    pub commission_per_trade: Decimal,
    pub commission_pct: Decimal,
    pub slippage_pct: Decimal,
    pub max_positions: usize,
    pub allow_shorts: bool,
}

impl Default for ExecutionModel {
    fn default() -> Self {
        Self {
            commission_per_trade: Decimal::ZERO,
            commission_pct: Decimal::ZERO,
            slippage_pct: Decimal::ZERO,
            max_positions: usize::MAX,
            allow_shorts: false,
        }
    }
}

impl ExecutionModel {
    fn fill_price(&self, raw_price: Decimal, action: OrderAction) -> Decimal {
        let slip = raw_price * self.slippage_pct;
        match action {
            OrderAction::Buy | OrderAction::Cover => raw_price + slip,
            OrderAction::Sell | OrderAction::Short => raw_price - slip,
        }
    }

    fn commission(&self, notional: Decimal) -> Decimal {
        self.commission_per_trade + notional * self.commission_pct
    }

    fn quantity_for(&self, sizing: &PositionSizing, portfolio: &Portfolio, fill_price: Decimal) -> Decimal {
        match sizing {
            PositionSizing::Fixed(qty) => *qty,
            PositionSizing::PercentOfEquity(pct) => {
                if fill_price.is_zero() {
                    Decimal::ZERO
                } else {
                    (portfolio.total_value() * pct / fill_price).trunc()
                }
            }
            PositionSizing::Risk { amount, stop_price } => {
                let distance = (fill_price - stop_price).abs();
                if distance.is_zero() {
                    Decimal::ZERO
                } else {
                    (amount / distance).trunc()
                }
            }
        }
    }

    /// Execute `order` against `portfolio` at `raw_price`, mutating cash
    /// and positions and returning the resulting fill, or an
    /// `ExecutionRejection` if the order cannot be filled (insufficient
    /// cash, no position to sell/cover, or the position-count cap is hit).
    pub fn execute(
        &self,
        order: &OrderRequest,
        portfolio: &mut Portfolio,
        raw_price: Decimal,
        timestamp: DateTime<Utc>,
    ) -> Result<Trade, BacktestError> {
        let fill_price = self.fill_price(raw_price, order.action);
        let slippage = (fill_price - raw_price).abs();

        match order.action {
            OrderAction::Buy => {
                if !portfolio.positions.contains_key(&order.symbol)
                    && portfolio.open_position_count() >= self.max_positions
                {
                    return Err(BacktestError::ExecutionRejection(format!(
                        "max open positions ({}) reached",
                        self.max_positions
                    )));
                }
                let quantity = self.quantity_for(&order.sizing, portfolio, fill_price);
                if quantity <= Decimal::ZERO {
                    return Err(BacktestError::ExecutionRejection("computed buy quantity is zero".into()));
                }
                let notional = fill_price * quantity;
                let commission = self.commission(notional);
                let total_cost = notional + commission;
                if total_cost > portfolio.cash {
                    return Err(BacktestError::ExecutionRejection(format!(
                        "insufficient cash: need {total_cost}, have {}",
                        portfolio.cash
                    )));
                }

                portfolio.cash -= total_cost;
                portfolio
                    .positions
                    .entry(order.symbol.clone())
                    .and_modify(|pos| {
                        let total_qty = pos.quantity + quantity;
                        pos.avg_cost = (pos.avg_cost * pos.quantity + fill_price * quantity) / total_qty;
                        pos.quantity = total_qty;
                        pos.current_price = fill_price;
                    })
                    .or_insert(Position {
                        symbol: order.symbol.clone(),
                        quantity,
                        avg_cost: fill_price,
                        current_price: fill_price,
                    });

                Ok(Trade {
                    timestamp,
                    symbol: order.symbol.clone(),
                    action: order.action,
                    price: fill_price,
                    quantity,
                    commission,
                    slippage,
                    reason: order.reason.clone(),
                })
            }
            OrderAction::Sell => {
                let position = portfolio
                    .positions
                    .get(&order.symbol)
                    .ok_or_else(|| BacktestError::ExecutionRejection(format!("no open position in {}", order.symbol)))?;
                let requested = self.quantity_for(&order.sizing, portfolio, fill_price);
                let quantity = requested.min(position.quantity);
                if quantity <= Decimal::ZERO {
                    return Err(BacktestError::ExecutionRejection("computed sell quantity is zero".into()));
                }
                let notional = fill_price * quantity;
                let commission = self.commission(notional);
                let realized = (fill_price - position.avg_cost) * quantity;

                portfolio.cash += notional - commission;
                portfolio.realized_pnl += realized;
                let remaining = position.quantity - quantity;
                if remaining <= Decimal::ZERO {
                    portfolio.positions.remove(&order.symbol);
                } else if let Some(pos) = portfolio.positions.get_mut(&order.symbol) {
                    pos.quantity = remaining;
                    pos.current_price = fill_price;
                }

                Ok(Trade {
                    timestamp,
                    symbol: order.symbol.clone(),
                    action: order.action,
                    price: fill_price,
                    quantity,
                    commission,
                    slippage,
                    reason: order.reason.clone(),
                })
            }
            OrderAction::Short => {
                if !self.allow_shorts {
                    return Err(BacktestError::ExecutionRejection(
                        "short selling is disabled for this execution model".into(),
                    ));
                }
                match portfolio.positions.get(&order.symbol) {
                    Some(existing) if existing.quantity > Decimal::ZERO => {
                        return Err(BacktestError::ExecutionRejection(format!(
                            "cannot short {}: an existing long position is open",
                            order.symbol
                        )));
                    }
                    None if portfolio.open_position_count() >= self.max_positions => {
                        return Err(BacktestError::ExecutionRejection(format!(
                            "max open positions ({}) reached",
                            self.max_positions
                        )));
                    }
                    _ => {}
                }
                let quantity = self.quantity_for(&order.sizing, portfolio, fill_price);
                if quantity <= Decimal::ZERO {
                    return Err(BacktestError::ExecutionRejection("computed short quantity is zero".into()));
                }
                let notional = fill_price * quantity;
                let commission = self.commission(notional);
                portfolio.cash += notional - commission;
                portfolio
                    .positions
                    .entry(order.symbol.clone())
                    .and_modify(|pos| {
                        let prior_short_qty = -pos.quantity;
                        let total_short_qty = prior_short_qty + quantity;
                        pos.avg_cost = (pos.avg_cost * prior_short_qty + fill_price * quantity) / total_short_qty;
                        pos.quantity = -total_short_qty;
                        pos.current_price = fill_price;
                    })
                    .or_insert(Position {
                        symbol: order.symbol.clone(),
                        quantity: -quantity,
                        avg_cost: fill_price,
                        current_price: fill_price,
                    });

                Ok(Trade {
                    timestamp,
                    symbol: order.symbol.clone(),
                    action: order.action,
                    price: fill_price,
                    quantity,
                    commission,
                    slippage,
                    reason: order.reason.clone(),
                })
            }
            OrderAction::Cover => {
                let position = portfolio
                    .positions
                    .get(&order.symbol)
                    .filter(|p| p.quantity < Decimal::ZERO)
                    .ok_or_else(|| BacktestError::ExecutionRejection(format!("no open short position in {}", order.symbol)))?;
                let short_qty = -position.quantity;
                let requested = self.quantity_for(&order.sizing, portfolio, fill_price);
                let quantity = requested.min(short_qty);
                if quantity <= Decimal::ZERO {
                    return Err(BacktestError::ExecutionRejection("computed cover quantity is zero".into()));
                }
                let notional = fill_price * quantity;
                let commission = self.commission(notional);
                let realized = (position.avg_cost - fill_price) * quantity;

                portfolio.cash -= notional + commission;
                portfolio.realized_pnl += realized;
                let remaining_short = short_qty - quantity;
                if remaining_short <= Decimal::ZERO {
                    portfolio.positions.remove(&order.symbol);
                } else if let Some(pos) = portfolio.positions.get_mut(&order.symbol) {
                    pos.quantity = -remaining_short;
                    pos.current_price = fill_price;
                }

                Ok(Trade {
                    timestamp,
                    symbol: order.symbol.clone(),
                    action: order.action,
                    price: fill_price,
                    quantity,
                    commission,
                    slippage,
                    reason: order.reason.clone(),
                })
            }
        }
    }
}
