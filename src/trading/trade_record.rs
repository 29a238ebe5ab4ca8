use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{LogLevel, OrderSide, TradeTag};

/// One executed (or simulated) fill. Never mutated once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub timestamp: DateTime<Utc>,
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: f64,
    pub price: f64,
    pub notional: f64,
    /// Present on exits only.
    #[serde(default)]
    pub pnl: Option<f64>,
    pub tag: TradeTag,
}

impl TradeRecord {
    pub fn entry(symbol: &str, quantity: f64, price: f64) -> Self {
        Self {
            timestamp: Utc::now(),
            symbol: symbol.to_string(),
            side: OrderSide::Buy,
            quantity,
            price,
            notional: quantity * price,
            pnl: None,
            tag: TradeTag::Entry,
        }
    }

    pub fn exit(symbol: &str, quantity: f64, price: f64, pnl: f64) -> Self {
        Self {
            timestamp: Utc::now(),
            symbol: symbol.to_string(),
            side: OrderSide::Sell,
            quantity,
            price,
            notional: quantity * price,
            pnl: Some(pnl),
            tag: TradeTag::Exit,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub symbol: Option<String>,
    pub level: LogLevel,
    pub message: String,
}

impl LogEntry {
    pub fn new(symbol: Option<&str>, level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            symbol: symbol.map(str::to_string),
            level,
            message: message.into(),
        }
    }
}
