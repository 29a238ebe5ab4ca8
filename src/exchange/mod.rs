pub mod binance;

pub use binance::{BinanceClient, BinanceConnector};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::BotParams;
use crate::error::ExchangeError;
use crate::models::{BarSeries, Interval, OrderSide, SymbolFilters};

/// Quote assets recognised by symbol suffix.
const KNOWN_QUOTES: &[&str] = &["FDUSD", "USDT", "USDC", "BUSD", "TUSD"];
const FALLBACK_QUOTE_LEN: usize = 3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderConfirmation {
    pub order_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub executed_qty: f64,
    pub status: String,
}

#[async_trait]
pub trait Exchange: Send + Sync {
    /// Most recent `limit` bars, oldest first.
    async fn fetch_bars(
        &mut self,
        symbol: &str,
        interval: Interval,
        limit: usize,
    ) -> Result<BarSeries, ExchangeError>;
    async fn fetch_filters(&mut self, symbol: &str) -> Result<SymbolFilters, ExchangeError>;
    async fn fetch_live_price(&mut self, symbol: &str) -> Result<f64, ExchangeError>;
    /// Free balance of `asset`; 0 when the account holds none.
    async fn fetch_quote_balance(&mut self, asset: &str) -> Result<f64, ExchangeError>;
    async fn submit_market_order(
        &mut self,
        symbol: &str,
        side: OrderSide,
        quantity: f64,
    ) -> Result<OrderConfirmation, ExchangeError>;
}

/// Builds a dedicated exchange client for one instrument's engine.
pub trait ExchangeConnector: Send + Sync {
    fn connect(&self, params: &BotParams) -> Box<dyn Exchange>;
}

/// Currency the instrument is priced in, inferred from the symbol suffix.
pub fn quote_asset(symbol: &str) -> &str {
    if let Some(q) = KNOWN_QUOTES.iter().find(|q| symbol.ends_with(*q)) {
        return &symbol[symbol.len() - q.len()..];
    }
    let start = symbol
        .char_indices()
        .rev()
        .nth(FALLBACK_QUOTE_LEN - 1)
        .map(|(i, _)| i)
        .unwrap_or(0);
    &symbol[start..]
}
