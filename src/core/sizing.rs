use crate::models::SymbolFilters;

/// Buffer applied when bumping an order up to the exchange's minimum notional.
pub const MIN_NOTIONAL_BUFFER: f64 = 1.01;

// Relative slack for representation error in quantity / step
// (0.3 / 0.1 = 2.9999999999999996). Any larger shortfall is floored.
const STEP_REL_TOLERANCE: f64 = 1e-12;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SizingRequest {
    /// Free balance of the quote asset.
    pub balance: f64,
    /// Fraction of the balance to commit, in (0, 1].
    pub risk_fraction: f64,
    /// Absolute cap on the order notional; 0 disables the cap.
    pub max_notional: f64,
    pub price: f64,
}

impl SizingRequest {
    pub fn target_notional(&self) -> f64 {
        let amount = self.balance * self.risk_fraction;
        if self.max_notional > 0.0 {
            amount.min(self.max_notional)
        } else {
            amount
        }
    }
}

/// Round down to a multiple of `step_size`. A non-positive step leaves the
/// quantity untouched.
pub fn round_step_size(quantity: f64, step_size: f64) -> f64 {
    if step_size <= 0.0 {
        return quantity;
    }
    let steps = quantity / step_size;
    let nearest = steps.round();
    let whole = if (steps - nearest).abs() <= nearest.abs() * STEP_REL_TOLERANCE {
        nearest
    } else {
        steps.floor()
    };
    whole * step_size
}

/// Clamp to the lot limits, round down to the step, then bump to the minimum
/// notional (plus buffer) if the order is too small.
pub fn conform_quantity(quantity: f64, price: f64, filters: &SymbolFilters) -> f64 {
    if price <= 0.0 {
        return 0.0;
    }

    let mut qty = quantity.min(filters.max_qty).max(filters.min_qty);
    qty = round_step_size(qty, filters.step_size);

    if qty * price < filters.min_notional {
        qty = round_step_size(
            filters.min_notional / price * MIN_NOTIONAL_BUFFER,
            filters.step_size,
        );
    }

    qty
}

/// Order quantity for a sizing request under the given filters.
pub fn order_quantity(req: &SizingRequest, filters: &SymbolFilters) -> f64 {
    if req.price <= 0.0 {
        return 0.0;
    }
    let raw = req.target_notional() / req.price;
    conform_quantity(raw, req.price, filters)
}
