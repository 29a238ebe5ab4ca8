use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::error::ValidationError;
use crate::models::Interval;

/// Indicator periods and classification thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyConfig {
    pub ema_short: usize,
    pub ema_long: usize,
    pub rsi_len: usize,
    pub adx_len: usize,
    pub adx_smooth: usize,
    pub adx_threshold: f64,
    pub rsi_upper: f64,
    pub rsi_lower: f64,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            ema_short: 20,
            ema_long: 50,
            rsi_len: 14,
            adx_len: 14,
            adx_smooth: 14,
            adx_threshold: 25.0,
            rsi_upper: 55.0,
            rsi_lower: 35.0,
        }
    }
}

impl StrategyConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        let periods = [
            ("ema_short", self.ema_short),
            ("ema_long", self.ema_long),
            ("rsi_len", self.rsi_len),
            ("adx_len", self.adx_len),
            ("adx_smooth", self.adx_smooth),
        ];
        for (name, value) in periods {
            if value == 0 {
                return Err(ValidationError(format!("{name} must be at least 1")));
            }
        }
        Ok(())
    }
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Credentials {
    pub api_key: String,
    pub api_secret: String,
}

impl Credentials {
    pub fn new(api_key: impl Into<String>, api_secret: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            api_secret: api_secret.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &self.api_key)
            .field("api_secret", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Live,
    Testnet,
}

impl Environment {
    pub fn is_testnet(&self) -> bool {
        matches!(self, Environment::Testnet)
    }
}

/// Everything needed to start one instrument's engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotParams {
    pub symbol: String,
    pub interval: Interval,
    pub risk_fraction: f64,
    /// Cap on entry notional in the quote asset; 0 means uncapped.
    pub max_position_notional: f64,
    pub credentials: Credentials,
    pub environment: Environment,
    pub dry_run: bool,
    /// Number of trailing bars fetched per tick.
    pub lookback: usize,
    pub poll_interval: Duration,
}

impl BotParams {
    pub fn new(symbol: &str, interval: Interval) -> Self {
        Self {
            symbol: symbol.to_uppercase(),
            interval,
            risk_fraction: 0.10,
            max_position_notional: 0.0,
            credentials: Credentials::default(),
            environment: Environment::Testnet,
            dry_run: true,
            lookback: 500,
            poll_interval: Duration::from_secs(2),
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.symbol.trim().is_empty() {
            return Err(ValidationError("symbol is empty".into()));
        }
        if !(self.risk_fraction > 0.0 && self.risk_fraction <= 1.0) {
            return Err(ValidationError(format!(
                "risk fraction {} outside (0, 1]",
                self.risk_fraction
            )));
        }
        if self.max_position_notional < 0.0 {
            return Err(ValidationError(format!(
                "max position notional {} is negative",
                self.max_position_notional
            )));
        }
        if self.lookback < 2 {
            return Err(ValidationError(format!(
                "lookback {} is too short",
                self.lookback
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    // Exchange
    pub credentials: Credentials,
    pub environment: Environment,
    pub dry_run: bool,

    // Instruments
    pub symbols: Vec<String>,
    pub interval: Interval,

    // Risk
    pub risk_fraction: f64,
    pub max_position_notional: f64,

    // Loop
    pub lookback: usize,
    pub poll_interval: Duration,

    pub strategy: StrategyConfig,

    // Storage & logging
    pub ledger_dir: String,
    pub log_level: String,
}

impl Config {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let env = |key: &str, default: &str| -> String {
            std::env::var(key).unwrap_or_else(|_| default.to_string())
        };
        let flag = |key: &str, default: &str| -> bool {
            matches!(env(key, default).to_lowercase().as_str(), "1" | "true" | "yes")
        };

        let defaults = StrategyConfig::default();
        let strategy = StrategyConfig {
            ema_short: env("EMA_SHORT", "20").parse().unwrap_or(defaults.ema_short),
            ema_long: env("EMA_LONG", "50").parse().unwrap_or(defaults.ema_long),
            rsi_len: env("RSI_LEN", "14").parse().unwrap_or(defaults.rsi_len),
            adx_len: env("ADX_LEN", "14").parse().unwrap_or(defaults.adx_len),
            adx_smooth: env("ADX_SMOOTH", "14").parse().unwrap_or(defaults.adx_smooth),
            adx_threshold: env("ADX_THRESHOLD", "25").parse().unwrap_or(defaults.adx_threshold),
            rsi_upper: env("RSI_UPPER", "55").parse().unwrap_or(defaults.rsi_upper),
            rsi_lower: env("RSI_LOWER", "35").parse().unwrap_or(defaults.rsi_lower),
        };

        let symbols = env("SYMBOLS", "BTCUSDT")
            .split(',')
            .map(|s| s.trim().to_uppercase())
            .filter(|s| !s.is_empty())
            .collect();

        Config {
            credentials: Credentials::new(
                env("BINANCE_API_KEY", ""),
                env("BINANCE_API_SECRET", ""),
            ),
            environment: if flag("TESTNET", "true") {
                Environment::Testnet
            } else {
                Environment::Live
            },
            dry_run: flag("DRY_RUN", "true"),
            symbols,
            interval: env("INTERVAL", "1m").parse().unwrap_or(Interval::M1),
            risk_fraction: env("RISK_PCT", "0.10").parse().unwrap_or(0.10),
            max_position_notional: env("MAX_POSITION", "0").parse().unwrap_or(0.0),
            lookback: env("LOOKBACK", "500").parse().unwrap_or(500),
            poll_interval: Duration::from_secs(env("POLL_SECS", "2").parse().unwrap_or(2)),
            strategy,
            ledger_dir: env("LEDGER_DIR", "data"),
            log_level: env("LOG_LEVEL", "info"),
        }
    }

    pub fn bot_params(&self, symbol: &str) -> BotParams {
        BotParams {
            symbol: symbol.to_uppercase(),
            interval: self.interval,
            risk_fraction: self.risk_fraction,
            max_position_notional: self.max_position_notional,
            credentials: self.credentials.clone(),
            environment: self.environment,
            dry_run: self.dry_run,
            lookback: self.lookback,
            poll_interval: self.poll_interval,
        }
    }
}
