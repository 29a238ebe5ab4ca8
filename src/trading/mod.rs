pub mod engine;
pub mod ledger;
pub mod position;
pub mod registry;
pub mod trade_record;

pub use engine::{ExecutionEngine, StopSignal, TickOutcome};
pub use ledger::{JsonlLedger, Ledger, MemoryLedger};
pub use position::{realized_pnl, Position};
pub use registry::{BotHandle, BotRegistry, BotStatus};
pub use trade_record::{LogEntry, TradeRecord};
