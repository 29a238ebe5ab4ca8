use chrono::{DateTime, Utc};
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::config::{BotParams, StrategyConfig};
use crate::core::indicators::IndicatorEngine;
use crate::core::sizing::{order_quantity, SizingRequest};
use crate::core::trend_phase::{TrendClassifier, TrendFlags};
use crate::error::{EngineError, ErrorPolicy, ExchangeError};
use crate::exchange::{quote_asset, Exchange};
use crate::models::{BarSeries, LogLevel, OrderSide, PositionSide};
use crate::trading::ledger::Ledger;
use crate::trading::position::Position;
use crate::trading::trade_record::{LogEntry, TradeRecord};

/// Cooperative cancellation flag, checked at the top of every loop iteration.
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// What a single tick did.
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// No closed bar newer than the last processed one.
    Stale,
    /// Bar evaluated, no transition.
    Hold(TrendFlags),
    Entered(TradeRecord),
    Exited(TradeRecord),
    /// Entry signal fired but the sized quantity was not positive.
    EntrySkipped { price: f64, quantity: f64 },
}

/// Per-instrument decision loop. Owns its position exclusively; readers get
/// snapshots through [`ExecutionEngine::subscribe`].
pub struct ExecutionEngine {
    params: BotParams,
    market: Box<dyn Exchange>,
    ledger: Arc<dyn Ledger>,
    indicators: IndicatorEngine,
    classifier: TrendClassifier,
    position: Position,
    last_close_time: Option<DateTime<Utc>>,
    stop: StopSignal,
    status: watch::Sender<Position>,
}

impl ExecutionEngine {
    pub fn new(
        params: BotParams,
        strategy: &StrategyConfig,
        market: Box<dyn Exchange>,
        ledger: Arc<dyn Ledger>,
    ) -> Self {
        let position = Position::flat(&params.symbol);
        let (status, _) = watch::channel(position.clone());
        Self {
            indicators: IndicatorEngine::new(strategy),
            classifier: TrendClassifier::new(strategy),
            params,
            market,
            ledger,
            position,
            last_close_time: None,
            stop: StopSignal::new(),
            status,
        }
    }

    pub fn symbol(&self) -> &str {
        &self.params.symbol
    }

    pub fn position(&self) -> &Position {
        &self.position
    }

    pub fn last_close_time(&self) -> Option<DateTime<Utc>> {
        self.last_close_time
    }

    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Position> {
        self.status.subscribe()
    }

    pub async fn run(mut self) -> Result<(), EngineError> {
        self.journal(
            LogLevel::Info,
            format!(
                "Bot start testnet={} dry_run={}",
                self.params.environment.is_testnet(),
                self.params.dry_run
            ),
        );

        if let Err(e) = self.initialize().await {
            self.journal(LogLevel::Error, format!("Init klines failed: {}", e));
            return Err(e);
        }

        while !self.stop.is_stopped() {
            tokio::time::sleep(self.params.poll_interval).await;
            if let Err(e) = self.tick().await {
                if self.report(&e) == ErrorPolicy::StopInstrument {
                    return Err(e);
                }
            }
        }

        self.journal(LogLevel::Info, "Bot stopped.");
        Ok(())
    }

    /// Loads the starting window and remembers its newest close time, so the
    /// first decision waits for a fresh bar.
    pub async fn initialize(&mut self) -> Result<(), EngineError> {
        let bars = self
            .fetch_closed_bars()
            .await
            .map_err(EngineError::Initialization)?;
        self.last_close_time = bars.last().map(|b| b.close_time);
        debug!(
            symbol = %self.params.symbol,
            "initial window: {} bars, last close {:?}",
            bars.len(),
            self.last_close_time
        );
        Ok(())
    }

    pub async fn tick(&mut self) -> Result<TickOutcome, EngineError> {
        let bars = self.fetch_closed_bars().await?;
        let Some(newest) = bars.last() else {
            return Ok(TickOutcome::Stale);
        };
        let close_time = newest.close_time;
        let price = newest.close;

        if self.last_close_time.is_some_and(|last| close_time <= last) {
            return Ok(TickOutcome::Stale);
        }
        self.last_close_time = Some(close_time);

        let snapshots = self.indicators.compute(&bars);
        let flags = self.classifier.latest(&snapshots).unwrap_or_default();

        self.journal(
            LogLevel::Debug,
            json!({
                "close_time": close_time.to_rfc3339(),
                "price": price,
                "signals": {
                    "begin_uptrend": flags.begin_uptrend,
                    "end_uptrend": flags.end_uptrend,
                    "begin_downtrend": flags.begin_downtrend,
                    "end_downtrend": flags.end_downtrend,
                },
                "pos": {
                    "side": self.position.side().as_str(),
                    "qty": self.position.quantity(),
                    "entry": self.position.entry_price(),
                },
            })
            .to_string(),
        );

        match self.position.side() {
            PositionSide::Long if flags.begin_downtrend || flags.end_uptrend => {
                self.exit(price).await.map(TickOutcome::Exited)
            }
            PositionSide::Flat if flags.begin_uptrend => self.enter().await,
            _ => Ok(TickOutcome::Hold(flags)),
        }
    }

    async fn fetch_closed_bars(&mut self) -> Result<BarSeries, ExchangeError> {
        let bars = self
            .market
            .fetch_bars(&self.params.symbol, self.params.interval, self.params.lookback)
            .await?;
        Ok(bars.closed_at(Utc::now()))
    }

    async fn enter(&mut self) -> Result<TickOutcome, EngineError> {
        let symbol = self.params.symbol.clone();
        let price = self.market.fetch_live_price(&symbol).await?;
        let quantity = self.compute_quantity(price).await?;

        if !(quantity > 0.0) {
            self.journal(
                LogLevel::Warn,
                format!(
                    "Entry signal at {} but quantity {} is not positive, no order sent",
                    price, quantity
                ),
            );
            return Ok(TickOutcome::EntrySkipped { price, quantity });
        }

        self.place_order(OrderSide::Buy, quantity).await?;

        let record = TradeRecord::entry(&symbol, quantity, price);
        self.record_trade(&record);
        self.position.open_long(quantity, price)?;
        if let Err(e) = self.ledger.upsert_position(&self.position) {
            warn!(symbol = %symbol, "ledger position write failed: {:#}", e);
        }
        self.publish();

        self.journal(
            LogLevel::Info,
            format!("ENTRY LONG {} @ {} (notional {:.2})", quantity, price, record.notional),
        );
        Ok(TickOutcome::Entered(record))
    }

    async fn exit(&mut self, price: f64) -> Result<TradeRecord, EngineError> {
        let symbol = self.params.symbol.clone();
        let quantity = self.position.quantity();

        self.place_order(OrderSide::Sell, quantity).await?;

        let pnl = self.position.pnl_at(price);
        let (quantity, entry_price) = self.position.close()?;
        let record = TradeRecord::exit(&symbol, quantity, price, pnl);
        self.record_trade(&record);
        if let Err(e) = self.ledger.clear_position(&symbol) {
            warn!(symbol = %symbol, "ledger position clear failed: {:#}", e);
        }
        self.publish();

        self.journal(
            LogLevel::Info,
            format!(
                "EXIT {} @ {} (entry {}) PnL {:+.4}",
                quantity, price, entry_price, pnl
            ),
        );
        Ok(record)
    }

    async fn compute_quantity(&mut self, price: f64) -> Result<f64, EngineError> {
        let quote = quote_asset(&self.params.symbol).to_string();
        let balance = match self.market.fetch_quote_balance(&quote).await {
            Ok(b) => b,
            Err(e) => {
                self.journal(
                    LogLevel::Error,
                    format!("Balance lookup for {} failed: {}", quote, e),
                );
                0.0
            }
        };

        let filters = self.market.fetch_filters(&self.params.symbol).await?;
        let req = SizingRequest {
            balance,
            risk_fraction: self.params.risk_fraction,
            max_notional: self.params.max_position_notional,
            price,
        };
        let quantity = order_quantity(&req, &filters);

        debug!(
            symbol = %self.params.symbol,
            "sizing: {} {} balance, target {:.4}, price {}, qty {} ({:?})",
            balance,
            quote,
            req.target_notional(),
            price,
            quantity,
            filters
        );
        Ok(quantity)
    }

    async fn place_order(&mut self, side: OrderSide, quantity: f64) -> Result<(), EngineError> {
        if self.params.dry_run {
            self.journal(LogLevel::Info, format!("DRY_RUN {} {}", side, quantity));
            return Ok(());
        }
        let confirmation = self
            .market
            .submit_market_order(&self.params.symbol, side, quantity)
            .await?;
        self.journal(
            LogLevel::Info,
            format!(
                "{} -> order {} {} executed {}",
                side, confirmation.order_id, confirmation.status, confirmation.executed_qty
            ),
        );
        Ok(())
    }

    fn record_trade(&self, record: &TradeRecord) {
        if let Err(e) = self.ledger.append_trade(record) {
            warn!(symbol = %self.params.symbol, "ledger trade write failed: {:#}", e);
        }
    }

    fn publish(&self) {
        self.status.send_replace(self.position.clone());
    }

    fn report(&self, e: &EngineError) -> ErrorPolicy {
        let kind = e.kind();
        self.journal(LogLevel::Error, format!("{} error: {}", kind, e));
        kind.policy()
    }

    /// Emits to tracing and mirrors the line into the ledger's log stream.
    fn journal(&self, level: LogLevel, message: impl Into<String>) {
        let message = message.into();
        let symbol = self.params.symbol.as_str();
        match level {
            LogLevel::Debug => debug!(symbol = %symbol, "{}", message),
            LogLevel::Info => info!(symbol = %symbol, "{}", message),
            LogLevel::Warn => warn!(symbol = %symbol, "{}", message),
            LogLevel::Error => error!(symbol = %symbol, "{}", message),
        }
        if let Err(e) = self
            .ledger
            .append_log(&LogEntry::new(Some(symbol), level, message))
        {
            warn!(symbol = %symbol, "ledger log write failed: {:#}", e);
        }
    }
}
