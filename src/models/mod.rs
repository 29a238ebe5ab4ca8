pub mod bar;
pub mod filters;
pub mod interval;
pub mod side;

pub use bar::{Bar, BarSeries};
pub use filters::SymbolFilters;
pub use interval::Interval;
pub use side::*;
