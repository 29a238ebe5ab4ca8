pub mod indicators;
pub mod sizing;
pub mod trend_phase;

pub use indicators::{IndicatorEngine, IndicatorSnapshot};
pub use sizing::{order_quantity, SizingRequest};
pub use trend_phase::{TrendClassifier, TrendFlags};
