#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::sync::{Arc, Mutex, MutexGuard};

use spot_trend_bot::config::BotParams;
use spot_trend_bot::error::ExchangeError;
use spot_trend_bot::exchange::{Exchange, ExchangeConnector, OrderConfirmation};
use spot_trend_bot::models::{Bar, BarSeries, Interval, OrderSide, SymbolFilters};

/// Flat bars before the trend starts; enough to warm up every indicator.
pub const FLAT_BARS: usize = 60;
pub const RISING_BARS: usize = 16;
pub const FALLING_BARS: usize = 30;

fn bar_at(i: usize, open: f64, high: f64, low: f64, close: f64) -> Bar {
    let base = DateTime::parse_from_rfc3339("2024-01-15T12:00:00Z")
        .unwrap()
        .with_timezone(&Utc);
    let open_time = base + Duration::minutes(i as i64);
    Bar {
        open_time,
        close_time: open_time + Duration::milliseconds(59_999),
        open,
        high,
        low,
        close,
        volume: 100.0,
    }
}

/// Create bars from (open, high, low, close) tuples, one minute apart.
pub fn make_bars(data: &[(f64, f64, f64, f64)]) -> Vec<Bar> {
    data.iter()
        .enumerate()
        .map(|(i, &(o, h, l, c))| bar_at(i, o, h, l, c))
        .collect()
}

/// Bar index (into `trend_cycle`) where the uptrend begins.
pub const UPTREND_BEGINS: usize = 63;
/// Bar where the uptrend ends; the slide has not yet turned into a downtrend.
pub const UPTREND_ENDS: usize = 79;
/// Bar where the slide becomes a strong downtrend.
pub const DOWNTREND_BEGINS: usize = 87;

/// Flat market at 100, a steady climb of +1 per bar, then a slide of -2 per
/// bar. Produces exactly one strong uptrend with a clean start and end,
/// followed later by the start of a strong downtrend.
pub fn trend_cycle() -> Vec<Bar> {
    trend_cycle_from(100.0)
}

/// `trend_cycle` shifted to start at `base`. Indicator flags depend only on
/// price differences, so the signal bars are the same for any base.
pub fn trend_cycle_from(base: f64) -> Vec<Bar> {
    let mut data = vec![(base, base, base, base); FLAT_BARS];
    for k in 0..RISING_BARS {
        let open = base + k as f64;
        let close = open + 1.0;
        data.push((open, close + 0.2, open - 0.2, close));
    }
    let peak = base + RISING_BARS as f64;
    for j in 0..FALLING_BARS {
        let open = peak - 2.0 * j as f64;
        let close = open - 2.0;
        data.push((open, open + 0.2, close - 0.2, close));
    }
    make_bars(&data)
}

pub fn test_filters() -> SymbolFilters {
    SymbolFilters {
        min_qty: 0.0001,
        max_qty: 1000.0,
        step_size: 0.0001,
        min_notional: 10.0,
    }
}

pub fn test_params(symbol: &str) -> BotParams {
    let mut p = BotParams::new(symbol, Interval::M1);
    p.poll_interval = std::time::Duration::from_millis(5);
    p
}

#[derive(Debug)]
pub struct MockState {
    pub bars: Vec<Bar>,
    /// Bars the exchange currently reports; tests advance this to simulate time.
    pub visible: usize,
    pub live_price: Option<f64>,
    pub balance: f64,
    pub balance_fails: bool,
    /// `None` makes the filter lookup fail with an unknown symbol.
    pub filters: Option<SymbolFilters>,
    pub bars_fail: bool,
    pub reject_orders: bool,
    pub orders: Vec<(OrderSide, f64)>,
    pub bar_fetches: usize,
}

/// Scripted exchange. Clones share state, so a test can keep one clone and
/// hand another to the engine.
#[derive(Debug, Clone)]
pub struct MockExchange {
    state: Arc<Mutex<MockState>>,
}

impl MockExchange {
    pub fn new(bars: Vec<Bar>, visible: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                bars,
                visible,
                live_price: None,
                balance: 1000.0,
                balance_fails: false,
                filters: Some(test_filters()),
                bars_fail: false,
                reject_orders: false,
                orders: Vec::new(),
                bar_fetches: 0,
            })),
        }
    }

    pub fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    /// Reveals the next bar. Returns false once every bar is visible.
    pub fn advance(&self) -> bool {
        let mut s = self.state();
        if s.visible >= s.bars.len() {
            return false;
        }
        s.visible += 1;
        true
    }
}

#[async_trait]
impl Exchange for MockExchange {
    async fn fetch_bars(
        &mut self,
        _symbol: &str,
        _interval: Interval,
        limit: usize,
    ) -> Result<BarSeries, ExchangeError> {
        let mut s = self.state();
        if s.bars_fail {
            return Err(ExchangeError::Transient("connection reset".into()));
        }
        s.bar_fetches += 1;
        let end = s.visible.min(s.bars.len());
        let start = end.saturating_sub(limit);
        Ok(BarSeries::new(s.bars[start..end].to_vec()))
    }

    async fn fetch_filters(&mut self, symbol: &str) -> Result<SymbolFilters, ExchangeError> {
        self.state()
            .filters
            .ok_or_else(|| ExchangeError::SymbolNotFound(symbol.to_string()))
    }

    async fn fetch_live_price(&mut self, _symbol: &str) -> Result<f64, ExchangeError> {
        let s = self.state();
        if let Some(p) = s.live_price {
            return Ok(p);
        }
        let end = s.visible.min(s.bars.len());
        s.bars[..end]
            .last()
            .map(|b| b.close)
            .ok_or_else(|| ExchangeError::Transient("no price".into()))
    }

    async fn fetch_quote_balance(&mut self, _asset: &str) -> Result<f64, ExchangeError> {
        let s = self.state();
        if s.balance_fails {
            return Err(ExchangeError::Transient("account endpoint timed out".into()));
        }
        Ok(s.balance)
    }

    async fn submit_market_order(
        &mut self,
        symbol: &str,
        side: OrderSide,
        quantity: f64,
    ) -> Result<OrderConfirmation, ExchangeError> {
        let mut s = self.state();
        if s.reject_orders {
            return Err(ExchangeError::Rejected {
                code: Some(-2010),
                message: "Account has insufficient balance for requested action.".into(),
            });
        }
        s.orders.push((side, quantity));
        Ok(OrderConfirmation {
            order_id: s.orders.len().to_string(),
            symbol: symbol.to_string(),
            side,
            executed_qty: quantity,
            status: "FILLED".into(),
        })
    }
}

/// Hands every engine a clone of the same scripted exchange.
pub struct MockConnector {
    pub exchange: MockExchange,
}

impl ExchangeConnector for MockConnector {
    fn connect(&self, _params: &BotParams) -> Box<dyn Exchange> {
        Box::new(self.exchange.clone())
    }
}

/// Polls `cond` for up to two seconds.
pub async fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if cond() {
            return true;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    cond()
}
