use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::PositionError;
use crate::models::PositionSide;

/// Holding in one instrument. Flat positions always carry zero quantity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    symbol: String,
    side: PositionSide,
    quantity: f64,
    entry_price: f64,
    updated_at: DateTime<Utc>,
}

impl Position {
    pub fn flat(symbol: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            side: PositionSide::Flat,
            quantity: 0.0,
            entry_price: 0.0,
            updated_at: Utc::now(),
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn side(&self) -> PositionSide {
        self.side
    }

    pub fn quantity(&self) -> f64 {
        self.quantity
    }

    /// Meaningless while flat; reported as 0.
    pub fn entry_price(&self) -> f64 {
        self.entry_price
    }

    pub fn is_flat(&self) -> bool {
        self.side == PositionSide::Flat
    }

    pub fn is_long(&self) -> bool {
        self.side == PositionSide::Long
    }

    /// FLAT -> LONG.
    pub fn open_long(&mut self, quantity: f64, entry_price: f64) -> Result<(), PositionError> {
        if !self.is_flat() {
            return Err(PositionError::NotFlat);
        }
        if !(quantity > 0.0) || !quantity.is_finite() {
            return Err(PositionError::InvalidQuantity(quantity));
        }
        self.side = PositionSide::Long;
        self.quantity = quantity;
        self.entry_price = entry_price;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// LONG -> FLAT, returning the closed (quantity, entry price).
    pub fn close(&mut self) -> Result<(f64, f64), PositionError> {
        if !self.is_long() {
            return Err(PositionError::NotLong);
        }
        let closed = (self.quantity, self.entry_price);
        self.side = PositionSide::Flat;
        self.quantity = 0.0;
        self.entry_price = 0.0;
        self.updated_at = Utc::now();
        Ok(closed)
    }

    /// Realized PnL if the whole position were sold at `exit_price`.
    pub fn pnl_at(&self, exit_price: f64) -> f64 {
        realized_pnl(self.entry_price, exit_price, self.quantity)
    }
}

pub fn realized_pnl(entry_price: f64, exit_price: f64, quantity: f64) -> f64 {
    (exit_price - entry_price) * quantity
}

#[cfg(test)]
mod tests {
    use super::*;

    fn invariant_holds(p: &Position) -> bool {
        p.is_flat() == (p.quantity() == 0.0)
    }

    #[test]
    fn starts_flat() {
        let p = Position::flat("BTCUSDT");
        assert!(p.is_flat());
        assert_eq!(p.quantity(), 0.0);
        assert!(invariant_holds(&p));
    }

    #[test]
    fn open_then_close_round_trip() {
        let mut p = Position::flat("BTCUSDT");
        p.open_long(1.0, 100.0).unwrap();
        assert!(p.is_long());
        assert!(invariant_holds(&p));
        assert_eq!(p.pnl_at(110.0), 10.0);

        let (qty, entry) = p.close().unwrap();
        assert_eq!((qty, entry), (1.0, 100.0));
        assert!(p.is_flat());
        assert!(invariant_holds(&p));
    }

    #[test]
    fn cannot_buy_twice() {
        let mut p = Position::flat("BTCUSDT");
        p.open_long(1.0, 100.0).unwrap();
        assert_eq!(p.open_long(2.0, 101.0), Err(PositionError::NotFlat));
        assert_eq!(p.quantity(), 1.0);
    }

    #[test]
    fn cannot_sell_while_flat() {
        let mut p = Position::flat("BTCUSDT");
        assert_eq!(p.close(), Err(PositionError::NotLong));
    }

    #[test]
    fn zero_quantity_entry_is_rejected() {
        let mut p = Position::flat("BTCUSDT");
        assert_eq!(p.open_long(0.0, 100.0), Err(PositionError::InvalidQuantity(0.0)));
        assert!(p.is_flat());
        assert!(invariant_holds(&p));
    }

    #[test]
    fn pnl_is_exit_minus_entry_times_quantity() {
        assert_eq!(realized_pnl(100.0, 110.0, 1.0), 10.0);
        assert_eq!(realized_pnl(100.0, 90.0, 2.0), -20.0);
    }
}
