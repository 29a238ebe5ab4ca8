use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use sha2::Sha256;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::config::{BotParams, Credentials, Environment};
use crate::error::ExchangeError;
use crate::exchange::{Exchange, ExchangeConnector, OrderConfirmation};
use crate::models::{Bar, BarSeries, Interval, OrderSide, SymbolFilters};

const LIVE_URL: &str = "https://api.binance.com";
const TESTNET_URL: &str = "https://testnet.binance.vision";
const MIN_REQUEST_INTERVAL: Duration = Duration::from_millis(100);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const RECV_WINDOW_MS: u64 = 5000;
const MAX_KLINES: usize = 1000;
const INVALID_SYMBOL: i64 = -1121;

/// [open time, open, high, low, close, volume, close time, quote volume,
/// trades, taker base volume, taker quote volume, ignore]
#[derive(Debug, Deserialize)]
#[allow(dead_code)]
struct RawKline(
    i64,
    String,
    String,
    String,
    String,
    String,
    i64,
    String,
    u64,
    String,
    String,
    String,
);

#[derive(Debug, Deserialize)]
struct ApiError {
    code: i64,
    msg: String,
}

#[derive(Debug, Deserialize)]
struct ExchangeInfo {
    symbols: Vec<SymbolInfo>,
}

#[derive(Debug, Deserialize)]
struct SymbolInfo {
    symbol: String,
    filters: Vec<RawFilter>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawFilter {
    filter_type: String,
    min_qty: Option<String>,
    max_qty: Option<String>,
    step_size: Option<String>,
    min_notional: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TickerPrice {
    price: String,
}

#[derive(Debug, Deserialize)]
struct Account {
    balances: Vec<Balance>,
}

#[derive(Debug, Deserialize)]
struct Balance {
    asset: String,
    free: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderResponse {
    symbol: String,
    order_id: i64,
    status: String,
    executed_qty: String,
}

/// Binance spot REST client. One instance per running instrument.
pub struct BinanceClient {
    client: Client,
    base_url: String,
    credentials: Credentials,
    last_request: Option<Instant>,
}

impl BinanceClient {
    pub fn new(credentials: &Credentials, environment: Environment) -> Self {
        let base_url = match environment {
            Environment::Live => LIVE_URL,
            Environment::Testnet => TESTNET_URL,
        };
        Self::with_base_url(credentials, base_url)
    }

    pub fn with_base_url(credentials: &Credentials, base_url: &str) -> Self {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            credentials: credentials.clone(),
            last_request: None,
        }
    }

    async fn rate_limit(&mut self) {
        if let Some(last) = self.last_request {
            let elapsed = last.elapsed();
            if elapsed < MIN_REQUEST_INTERVAL {
                tokio::time::sleep(MIN_REQUEST_INTERVAL - elapsed).await;
            }
        }
        self.last_request = Some(Instant::now());
    }

    fn sign(&self, query: &str) -> Result<String, ExchangeError> {
        sign_query(&self.credentials.api_secret, query)
    }

    fn signed_query(&self, params: &[(&str, String)]) -> Result<String, ExchangeError> {
        let mut query = encode_params(params);
        if !query.is_empty() {
            query.push('&');
        }
        query.push_str(&format!(
            "recvWindow={}&timestamp={}",
            RECV_WINDOW_MS,
            Utc::now().timestamp_millis()
        ));
        let signature = self.sign(&query)?;
        Ok(format!("{}&signature={}", query, signature))
    }

    async fn public_get(
        &mut self,
        path: &str,
        params: &[(&str, String)],
        symbol: &str,
    ) -> Result<Response, ExchangeError> {
        self.rate_limit().await;
        let resp = self
            .client
            .get(format!("{}{}", self.base_url, path))
            .query(params)
            .send()
            .await?;
        check_status(resp, symbol).await
    }

    async fn signed_request(
        &mut self,
        method: reqwest::Method,
        path: &str,
        params: &[(&str, String)],
        symbol: &str,
    ) -> Result<Response, ExchangeError> {
        self.rate_limit().await;
        let query = self.signed_query(params)?;
        let resp = self
            .client
            .request(method, format!("{}{}?{}", self.base_url, path, query))
            .header("X-MBX-APIKEY", &self.credentials.api_key)
            .send()
            .await?;
        check_status(resp, symbol).await
    }

    pub async fn fetch_bars(
        &mut self,
        symbol: &str,
        interval: Interval,
        limit: usize,
    ) -> Result<BarSeries, ExchangeError> {
        let resp = self
            .public_get(
                "/api/v3/klines",
                &[
                    ("symbol", symbol.to_string()),
                    ("interval", interval.as_str().to_string()),
                    ("limit", limit.clamp(1, MAX_KLINES).to_string()),
                ],
                symbol,
            )
            .await?;
        let raw: Vec<RawKline> = resp.json().await?;
        parse_klines(raw)
    }

    pub async fn fetch_filters(&mut self, symbol: &str) -> Result<SymbolFilters, ExchangeError> {
        let resp = self
            .public_get(
                "/api/v3/exchangeInfo",
                &[("symbol", symbol.to_string())],
                symbol,
            )
            .await?;
        let info: ExchangeInfo = resp.json().await?;
        parse_filters(info, symbol)
    }

    pub async fn fetch_live_price(&mut self, symbol: &str) -> Result<f64, ExchangeError> {
        let resp = self
            .public_get(
                "/api/v3/ticker/price",
                &[("symbol", symbol.to_string())],
                symbol,
            )
            .await?;
        let ticker: TickerPrice = resp.json().await?;
        parse_number(&ticker.price, "price")
    }

    pub async fn fetch_quote_balance(&mut self, asset: &str) -> Result<f64, ExchangeError> {
        let resp = self
            .signed_request(reqwest::Method::GET, "/api/v3/account", &[], asset)
            .await?;
        let account: Account = resp.json().await?;
        match account.balances.iter().find(|b| b.asset == asset) {
            Some(b) => parse_number(&b.free, "free balance"),
            None => Ok(0.0),
        }
    }

    pub async fn submit_market_order(
        &mut self,
        symbol: &str,
        side: OrderSide,
        quantity: f64,
    ) -> Result<OrderConfirmation, ExchangeError> {
        let params = [
            ("symbol", symbol.to_string()),
            ("side", side.as_str().to_string()),
            ("type", "MARKET".to_string()),
            ("quantity", format_quantity(quantity)),
        ];
        debug!("{} {} MARKET {}", symbol, side, format_quantity(quantity));
        let resp = self
            .signed_request(reqwest::Method::POST, "/api/v3/order", &params, symbol)
            .await?;
        let order: OrderResponse = resp.json().await?;
        Ok(OrderConfirmation {
            order_id: order.order_id.to_string(),
            symbol: order.symbol,
            side,
            executed_qty: parse_number(&order.executed_qty, "executed quantity")?,
            status: order.status,
        })
    }
}

#[async_trait]
impl Exchange for BinanceClient {
    async fn fetch_bars(
        &mut self,
        symbol: &str,
        interval: Interval,
        limit: usize,
    ) -> Result<BarSeries, ExchangeError> {
        self.fetch_bars(symbol, interval, limit).await
    }

    async fn fetch_filters(&mut self, symbol: &str) -> Result<SymbolFilters, ExchangeError> {
        self.fetch_filters(symbol).await
    }

    async fn fetch_live_price(&mut self, symbol: &str) -> Result<f64, ExchangeError> {
        self.fetch_live_price(symbol).await
    }

    async fn fetch_quote_balance(&mut self, asset: &str) -> Result<f64, ExchangeError> {
        self.fetch_quote_balance(asset).await
    }

    async fn submit_market_order(
        &mut self,
        symbol: &str,
        side: OrderSide,
        quantity: f64,
    ) -> Result<OrderConfirmation, ExchangeError> {
        self.submit_market_order(symbol, side, quantity).await
    }
}

/// Connects each engine to Binance using the credentials and environment in its params.
#[derive(Debug, Clone, Copy, Default)]
pub struct BinanceConnector;

impl ExchangeConnector for BinanceConnector {
    fn connect(&self, params: &BotParams) -> Box<dyn Exchange> {
        Box::new(BinanceClient::new(&params.credentials, params.environment))
    }
}

async fn check_status(resp: Response, symbol: &str) -> Result<Response, ExchangeError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(classify_failure(status, &body, symbol))
}

fn classify_failure(status: StatusCode, body: &str, symbol: &str) -> ExchangeError {
    if status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::IM_A_TEAPOT
        || status.is_server_error()
    {
        return ExchangeError::Transient(format!("HTTP {}: {}", status, body));
    }
    match serde_json::from_str::<ApiError>(body) {
        Ok(e) if e.code == INVALID_SYMBOL => ExchangeError::SymbolNotFound(symbol.to_string()),
        Ok(e) => ExchangeError::Rejected {
            code: Some(e.code),
            message: e.msg,
        },
        Err(_) => ExchangeError::Rejected {
            code: None,
            message: format!("HTTP {}: {}", status, body),
        },
    }
}

fn sign_query(secret: &str, query: &str) -> Result<String, ExchangeError> {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .map_err(|e| ExchangeError::Other(anyhow::anyhow!("HMAC error: {}", e)))?;
    mac.update(query.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

fn encode_params(params: &[(&str, String)]) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&")
}

/// Eight decimals, trailing zeros trimmed.
fn format_quantity(quantity: f64) -> String {
    let s = format!("{:.8}", quantity);
    let s = s.trim_end_matches('0').trim_end_matches('.');
    if s.is_empty() {
        "0".to_string()
    } else {
        s.to_string()
    }
}

fn parse_number(raw: &str, what: &str) -> Result<f64, ExchangeError> {
    raw.parse::<f64>()
        .map_err(|_| ExchangeError::Decode(format!("bad {}: {:?}", what, raw)))
}

fn millis(ms: i64) -> Result<DateTime<Utc>, ExchangeError> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| ExchangeError::Decode(format!("bad timestamp {}", ms)))
}

fn parse_klines(raw: Vec<RawKline>) -> Result<BarSeries, ExchangeError> {
    let mut bars = raw
        .into_iter()
        .map(|k| {
            Ok(Bar {
                open_time: millis(k.0)?,
                open: parse_number(&k.1, "open")?,
                high: parse_number(&k.2, "high")?,
                low: parse_number(&k.3, "low")?,
                close: parse_number(&k.4, "close")?,
                volume: parse_number(&k.5, "volume")?,
                close_time: millis(k.6)?,
            })
        })
        .collect::<Result<Vec<Bar>, ExchangeError>>()?;
    bars.sort_by_key(|b| b.open_time);
    Ok(BarSeries::new(bars))
}

fn parse_filters(info: ExchangeInfo, symbol: &str) -> Result<SymbolFilters, ExchangeError> {
    let Some(info) = info.symbols.into_iter().find(|s| s.symbol == symbol) else {
        return Err(ExchangeError::SymbolNotFound(symbol.to_string()));
    };

    let mut filters = SymbolFilters::default();
    let mut saw_min_notional = false;
    for f in &info.filters {
        match f.filter_type.as_str() {
            "LOT_SIZE" => {
                if let Some(v) = &f.min_qty {
                    filters.min_qty = parse_number(v, "minQty")?;
                }
                if let Some(v) = &f.max_qty {
                    filters.max_qty = parse_number(v, "maxQty")?;
                }
                if let Some(v) = &f.step_size {
                    filters.step_size = parse_number(v, "stepSize")?;
                }
            }
            "MIN_NOTIONAL" => {
                if let Some(v) = &f.min_notional {
                    filters.min_notional = parse_number(v, "minNotional")?;
                    saw_min_notional = true;
                }
            }
            // Newer symbols carry NOTIONAL instead of MIN_NOTIONAL
            "NOTIONAL" if !saw_min_notional => {
                if let Some(v) = &f.min_notional {
                    filters.min_notional = parse_number(v, "minNotional")?;
                }
            }
            _ => {}
        }
    }
    Ok(filters)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_matches_reference_vector() {
        let secret = "NhqPtmdSJYdKjVHjA7PZj4Mge3R5YNiP1e3UZjInClVN65XAbvqqM6A7H5fATj0j";
        let query = "symbol=LTCBTC&side=BUY&type=LIMIT&timeInForce=GTC&quantity=1&price=0.1&recvWindow=5000&timestamp=1499827319559";
        assert_eq!(
            sign_query(secret, query).unwrap(),
            "c8db56825ae71d6d79447849e617115f4a920fa2acdcab2b053c4b2838bd6b71"
        );
    }

    #[test]
    fn signed_query_appends_window_timestamp_and_signature() {
        let client = BinanceClient::new(&Credentials::new("k", "s"), Environment::Testnet);
        let q = client
            .signed_query(&[("symbol", "BTCUSDT".to_string())])
            .unwrap();
        assert!(q.starts_with("symbol=BTCUSDT&recvWindow=5000&timestamp="));
        let (unsigned, sig) = q.rsplit_once("&signature=").unwrap();
        assert_eq!(sig, sign_query("s", unsigned).unwrap());
    }

    #[test]
    fn klines_are_decoded_oldest_first() {
        let body = r#"[
            [1700000060000,"101.0","103.0","100.5","102.0","12.5",1700000119999,"0",10,"0","0","0"],
            [1700000000000,"100.0","102.0","99.0","101.0","10.0",1700000059999,"0",8,"0","0","0"]
        ]"#;
        let raw: Vec<RawKline> = serde_json::from_str(body).unwrap();
        let bars = parse_klines(raw).unwrap();
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].open, 100.0);
        assert_eq!(bars[1].close, 102.0);
        assert_eq!(bars[1].close_time.timestamp_millis(), 1700000119999);
    }

    #[test]
    fn malformed_kline_price_is_a_decode_error() {
        let body = r#"[[1700000000000,"abc","102.0","99.0","101.0","10.0",1700000059999,"0",8,"0","0","0"]]"#;
        let raw: Vec<RawKline> = serde_json::from_str(body).unwrap();
        assert!(matches!(parse_klines(raw), Err(ExchangeError::Decode(_))));
    }

    #[test]
    fn filters_read_lot_size_and_min_notional() {
        let body = r#"{"symbols":[{"symbol":"BTCUSDT","filters":[
            {"filterType":"PRICE_FILTER","minPrice":"0.01","maxPrice":"1000000","tickSize":"0.01"},
            {"filterType":"LOT_SIZE","minQty":"0.00001","maxQty":"9000","stepSize":"0.00001"},
            {"filterType":"NOTIONAL","minNotional":"5.0","applyMinToMarket":true}
        ]}]}"#;
        let info: ExchangeInfo = serde_json::from_str(body).unwrap();
        let f = parse_filters(info, "BTCUSDT").unwrap();
        assert_eq!(f.min_qty, 0.00001);
        assert_eq!(f.max_qty, 9000.0);
        assert_eq!(f.step_size, 0.00001);
        assert_eq!(f.min_notional, 5.0);
    }

    #[test]
    fn missing_filters_fall_back_to_defaults() {
        let body = r#"{"symbols":[{"symbol":"ETHBTC","filters":[]}]}"#;
        let info: ExchangeInfo = serde_json::from_str(body).unwrap();
        assert_eq!(parse_filters(info, "ETHBTC").unwrap(), SymbolFilters::default());
    }

    #[test]
    fn unknown_symbol_is_not_found() {
        let info: ExchangeInfo = serde_json::from_str(r#"{"symbols":[]}"#).unwrap();
        assert!(matches!(
            parse_filters(info, "NOPEUSDT"),
            Err(ExchangeError::SymbolNotFound(_))
        ));

        let e = classify_failure(
            StatusCode::BAD_REQUEST,
            r#"{"code":-1121,"msg":"Invalid symbol."}"#,
            "NOPEUSDT",
        );
        assert!(matches!(e, ExchangeError::SymbolNotFound(s) if s == "NOPEUSDT"));
    }

    #[test]
    fn rate_limits_and_server_errors_are_transient() {
        for status in [
            StatusCode::TOO_MANY_REQUESTS,
            StatusCode::IM_A_TEAPOT,
            StatusCode::BAD_GATEWAY,
        ] {
            assert!(matches!(
                classify_failure(status, "", "BTCUSDT"),
                ExchangeError::Transient(_)
            ));
        }
    }

    #[test]
    fn order_refusal_is_rejected_with_code() {
        let e = classify_failure(
            StatusCode::BAD_REQUEST,
            r#"{"code":-2010,"msg":"Account has insufficient balance for requested action."}"#,
            "BTCUSDT",
        );
        assert!(matches!(e, ExchangeError::Rejected { code: Some(-2010), .. }));
    }

    #[test]
    fn quantities_are_formatted_without_float_noise() {
        assert_eq!(format_quantity(0.30000000000000004), "0.3");
        assert_eq!(format_quantity(1.0), "1");
        assert_eq!(format_quantity(0.00012345), "0.00012345");
        assert_eq!(format_quantity(0.0), "0");
    }
}
