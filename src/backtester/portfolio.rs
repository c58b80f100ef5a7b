use std::collections::HashMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub quantity: Decimal,
    pub avg_cost: Decimal,
    pub current_price: Decimal,
}

impl Position {
    pub fn market_value(&self) -> Decimal {
        self.quantity * self.current_price
    }

    pub fn unrealized_pnl(&self) -> Decimal {
        (self.current_price - self.avg_cost) * self.quantity
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Portfolio {
    pub cash: Decimal,
    pub positions: HashMap<String, Position>,
    pub realized_pnl: Decimal,
    pub initial_cash: Decimal,
}

impl Portfolio {
    pub fn new(initial_cash: Decimal) -> Self {
        Self {
            cash: initial_cash,
            positions: HashMap::new(),
            realized_pnl: Decimal::ZERO,
            initial_cash,
        }
    }

    /// cash + sum(quantity * currentPrice) across open positions.
    pub fn total_value(&self) -> Decimal {
        self.cash + self.positions.values().map(Position::market_value).sum::<Decimal>()
    }

    pub fn unrealized_pnl(&self) -> Decimal {
        self.positions.values().map(Position::unrealized_pnl).sum()
    }

    pub fn mark_to_market(&mut self, symbol: &str, price: Decimal) {
        if let Some(position) = self.positions.get_mut(symbol) {
            position.current_price = price;
        }
    }

    pub fn open_position_count(&self) -> usize {
        self.positions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn total_value_is_cash_plus_market_value() {
        let mut portfolio = Portfolio::new(dec!(10000));
        portfolio.positions.insert(
            "AAPL".into(),
            Position { symbol: "AAPL".into(), quantity: dec!(10), avg_cost: dec!(100), current_price: dec!(110) },
        );
        assert_eq!(portfolio.total_value(), dec!(11100));
    }

    #[test]
    fn unrealized_pnl_reflects_price_move() {
        let mut portfolio = Portfolio::new(dec!(10000));
        portfolio.positions.insert(
            "AAPL".into(),
            Position { symbol: "AAPL".into(), quantity: dec!(10), avg_cost: dec!(100), current_price: dec!(110) },
        );
        assert_eq!(portfolio.unrealized_pnl(), dec!(100));
    }
}
