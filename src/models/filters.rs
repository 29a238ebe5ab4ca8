use serde::{Deserialize, Serialize};

/// Exchange constraints on order quantity and value for one instrument.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SymbolFilters {
    pub min_qty: f64,
    pub max_qty: f64,
    pub step_size: f64,
    pub min_notional: f64,
}

impl Default for SymbolFilters {
    /// Values assumed when the exchange omits a filter.
    fn default() -> Self {
        Self {
            min_qty: 0.0,
            max_qty: 1e12,
            step_size: 1e-8,
            min_notional: 0.0,
        }
    }
}
