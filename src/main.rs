use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use spot_trend_bot::config::Config;
use spot_trend_bot::exchange::BinanceConnector;
use spot_trend_bot::trading::{BotRegistry, JsonlLedger, Ledger};

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = Config::from_env();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cfg.log_level));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_timer(fmt::time::UtcTime::rfc_3339())
        .init();

    let ledger: Arc<dyn Ledger> = Arc::new(
        JsonlLedger::open(&cfg.ledger_dir)
            .with_context(|| format!("opening ledger at {}", cfg.ledger_dir))?,
    );
    let registry = BotRegistry::new(
        Arc::new(BinanceConnector),
        Arc::clone(&ledger),
        cfg.strategy.clone(),
    );

    info!("========================================");
    info!("  Spot trend bot");
    info!(
        "  Symbols: {} | Interval: {} | Testnet: {} | Dry run: {}",
        cfg.symbols.join(","),
        cfg.interval,
        cfg.environment.is_testnet(),
        cfg.dry_run
    );
    info!("========================================");

    for symbol in &cfg.symbols {
        if let Err(e) = registry.start(cfg.bot_params(symbol)) {
            error!(symbol = %symbol, "failed to start: {}", e);
        }
    }

    tokio::signal::ctrl_c()
        .await
        .context("waiting for Ctrl+C")?;
    info!("Shutting down...");
    registry.shutdown().await;

    println!();
    println!("{:<12} {:>8} {:>14}", "SYMBOL", "TRADES", "REALIZED PNL");
    for symbol in &cfg.symbols {
        let trades = ledger.trades(Some(symbol))?;
        let pnl: f64 = trades.iter().filter_map(|t| t.pnl).sum();
        println!("{:<12} {:>8} {:>14.4}", symbol, trades.len(), pnl);
    }

    Ok(())
}
