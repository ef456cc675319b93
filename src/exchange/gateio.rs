use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::DateTime;
use hmac::{Hmac, Mac};
use reqwest::{Client, Method, Response};
use serde::Deserialize;
use sha2::{Digest, Sha512};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex;

use crate::config::Config;
use crate::error::BotError;
use crate::exchange::{ExchangeGateway, OrderResult, OrderSide, OrderStatus, PositionInfo};
use crate::models::{Candle, CandleSeries, Interval};

const BASE_URL: &str = "https://api.gateio.ws";
const PREFIX: &str = "/api/v4/futures/usdt";
const MIN_REQUEST_INTERVAL: Duration = Duration::from_millis(100);

type HmacSha512 = Hmac<Sha512>;

#[derive(Debug, Deserialize)]
struct FuturesAccount {
    total: String,
}

#[derive(Debug, Deserialize)]
struct FuturesCandle {
    t: f64,
    #[serde(default)]
    v: Option<f64>,
    c: String,
    h: String,
    l: String,
    o: String,
}

#[derive(Debug, Deserialize)]
struct FuturesTicker {
    last: String,
}

#[derive(Debug, Deserialize)]
struct FuturesOrder {
    id: i64,
    status: String,
    size: i64,
    left: i64,
    #[serde(default)]
    fill_price: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FuturesPosition {
    size: i64,
    #[serde(default)]
    entry_price: Option<String>,
}

/// Gate.io USDT-settled futures over APIv4. Private calls carry the
/// KEY/Timestamp/SIGN headers with an HMAC-SHA512 signature over method,
/// path, query, body hash and timestamp.
pub struct GateioFutures {
    client: Client,
    api_key: String,
    api_secret: String,
    last_request: Mutex<Option<Instant>>,
}

impl GateioFutures {
    pub fn new(cfg: &Config) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(cfg.http_timeout_secs))
            .build()
            .context("Failed to build http client")?;
        Ok(Self {
            client,
            api_key: cfg.gate_api_key.clone(),
            api_secret: cfg.gate_api_secret.clone(),
            last_request: Mutex::new(None),
        })
    }

    async fn rate_limit(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < MIN_REQUEST_INTERVAL {
                tokio::time::sleep(MIN_REQUEST_INTERVAL - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }

    fn hmac_sign(&self, payload: &str) -> Result<String, BotError> {
        let mut mac = HmacSha512::new_from_slice(self.api_secret.as_bytes())
            .map_err(|e| BotError::Connectivity(format!("bad api secret: {}", e)))?;
        mac.update(payload.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    /// Signed private request. `query` must already be URL-encoded; it is
    /// part of the signature, so it is appended to the URL verbatim.
    async fn signed(
        &self,
        method: Method,
        path: &str,
        query: &str,
        body: &str,
    ) -> Result<Response, BotError> {
        self.rate_limit().await;

        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| BotError::Connectivity(e.to_string()))?
            .as_secs()
            .to_string();
        let payload = sign_payload(method.as_str(), path, query, body, &timestamp);
        let signature = self.hmac_sign(&payload)?;

        let mut url = format!("{}{}", BASE_URL, path);
        if !query.is_empty() {
            url = format!("{}?{}", url, query);
        }

        let mut req = self
            .client
            .request(method, url)
            .header("KEY", &self.api_key)
            .header("Timestamp", &timestamp)
            .header("SIGN", signature)
            .header("Accept", "application/json");
        if !body.is_empty() {
            req = req
                .header("Content-Type", "application/json")
                .body(body.to_string());
        }

        Ok(req.send().await?)
    }

    async fn public_get(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<Response, BotError> {
        self.rate_limit().await;
        let resp = self
            .client
            .get(format!("{}{}", BASE_URL, path))
            .query(query)
            .send()
            .await?;
        Ok(resp)
    }

    async fn submit_order(&self, body: &str) -> Result<OrderResult, BotError> {
        let resp = self
            .signed(Method::POST, &format!("{}/orders", PREFIX), "", body)
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(BotError::OrderRejected(format!("{}: {}", status, text)));
        }
        let order: FuturesOrder = resp.json().await?;
        Ok(map_order(order))
    }
}

/// Body of a market IOC order. Price "0" means market; a negative size
/// sells. `reduce_only` marks an exit leg.
fn order_body(symbol: &str, size: i64, reduce_only: bool) -> String {
    let mut body = serde_json::json!({
        "contract": symbol,
        "size": size,
        "price": "0",
        "tif": "ioc",
    });
    if reduce_only {
        body["reduce_only"] = serde_json::Value::Bool(true);
    }
    body.to_string()
}

/// The string Gate.io expects under the SIGN header, before hashing.
fn sign_payload(method: &str, path: &str, query: &str, body: &str, timestamp: &str) -> String {
    let body_hash = hex::encode(Sha512::digest(body.as_bytes()));
    format!("{}\n{}\n{}\n{}\n{}", method, path, query, body_hash, timestamp)
}

async fn check(resp: Response, what: &str) -> Result<Response, BotError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(BotError::Connectivity(format!("{} {}: {}", what, status, body)))
}

fn parse_candles(raw: Vec<FuturesCandle>) -> CandleSeries {
    let mut candles: Vec<Candle> = raw
        .into_iter()
        .filter_map(|rc| {
            let timestamp = DateTime::from_timestamp(rc.t as i64, 0)?;
            Some(Candle {
                timestamp,
                open: rc.o.parse().ok()?,
                high: rc.h.parse().ok()?,
                low: rc.l.parse().ok()?,
                close: rc.c.parse().ok()?,
                volume: rc.v.unwrap_or(0.0),
            })
        })
        .collect();

    // callers need oldest first whatever the API serves
    candles.sort_by_key(|c| c.timestamp);
    CandleSeries::new(candles)
}

fn map_order(order: FuturesOrder) -> OrderResult {
    let total = order.size.unsigned_abs() as f64;
    let remaining = order.left.unsigned_abs() as f64;
    let status = match order.status.as_str() {
        "finished" if order.left == 0 => OrderStatus::Filled,
        "finished" => OrderStatus::PartiallyFilled,
        _ => OrderStatus::Rejected,
    };
    OrderResult {
        id: order.id.to_string(),
        status,
        filled_size: total - remaining,
        remaining_size: remaining,
        fill_price: order
            .fill_price
            .as_deref()
            .and_then(|p| p.parse::<f64>().ok())
            .filter(|p| *p > 0.0),
    }
}

#[async_trait]
impl ExchangeGateway for GateioFutures {
    async fn get_balance(&self) -> Result<f64, BotError> {
        let resp = self
            .signed(Method::GET, &format!("{}/accounts", PREFIX), "", "")
            .await?;
        let resp = check(resp, "gate accounts").await?;
        let account: FuturesAccount = resp.json().await?;
        account
            .total
            .parse()
            .map_err(|_| BotError::Connectivity(format!("unparseable balance: {}", account.total)))
    }

    async fn symbol_exists(&self, symbol: &str) -> Result<bool, BotError> {
        let resp = self
            .public_get(&format!("{}/contracts/{}", PREFIX, symbol), &[])
            .await?;
        let status = resp.status();
        if status.is_success() {
            Ok(true)
        } else if status.is_client_error() {
            Ok(false)
        } else {
            let body = resp.text().await.unwrap_or_default();
            Err(BotError::Connectivity(format!(
                "gate contracts {}: {}",
                status, body
            )))
        }
    }

    async fn fetch_candles(
        &self,
        symbol: &str,
        interval: Interval,
        limit: usize,
    ) -> Result<CandleSeries, BotError> {
        let query = [
            ("contract", symbol.to_string()),
            ("interval", interval.as_str().to_string()),
            ("limit", limit.to_string()),
        ];
        let resp = self
            .public_get(&format!("{}/candlesticks", PREFIX), &query)
            .await?;
        let resp = check(resp, "gate candlesticks").await?;
        let raw: Vec<FuturesCandle> = resp.json().await?;
        Ok(parse_candles(raw))
    }

    async fn last_price(&self, symbol: &str) -> Result<f64, BotError> {
        let query = [("contract", symbol.to_string())];
        let resp = self.public_get(&format!("{}/tickers", PREFIX), &query).await?;
        let resp = check(resp, "gate tickers").await?;
        let tickers: Vec<FuturesTicker> = resp.json().await?;
        tickers
            .first()
            .and_then(|t| t.last.parse().ok())
            .ok_or_else(|| BotError::Connectivity(format!("no ticker for {}", symbol)))
    }

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<(), BotError> {
        let path = format!("{}/positions/{}/leverage", PREFIX, symbol);
        let query = format!("leverage={}", leverage);
        let resp = self.signed(Method::POST, &path, &query, "").await?;
        check(resp, "gate leverage").await?;
        Ok(())
    }

    async fn place_order(
        &self,
        symbol: &str,
        side: OrderSide,
        notional: f64,
    ) -> Result<OrderResult, BotError> {
        let price = self.last_price(symbol).await?;
        let contracts = (notional / price) as i64;
        if contracts <= 0 {
            return Err(BotError::OrderRejected(format!(
                "notional {:.4} below one contract at {:.6}",
                notional, price
            )));
        }
        let size = match side {
            OrderSide::Buy => contracts,
            OrderSide::Sell => -contracts,
        };
        self.submit_order(&order_body(symbol, size, false)).await
    }

    async fn close_position(
        &self,
        symbol: &str,
        side: OrderSide,
        contracts: f64,
    ) -> Result<OrderResult, BotError> {
        let contracts = contracts.round() as i64;
        if contracts <= 0 {
            return Err(BotError::OrderRejected(
                "close size rounds to zero contracts".to_string(),
            ));
        }
        let size = match side {
            OrderSide::Buy => contracts,
            OrderSide::Sell => -contracts,
        };
        self.submit_order(&order_body(symbol, size, true)).await
    }

    async fn get_position(&self, symbol: &str) -> Result<PositionInfo, BotError> {
        let path = format!("{}/positions/{}", PREFIX, symbol);
        let resp = self.signed(Method::GET, &path, "", "").await?;
        let status = resp.status();
        if status.is_client_error() {
            // no position opened on this contract yet
            return Ok(PositionInfo::default());
        }
        let resp = check(resp, "gate positions").await?;
        let position: FuturesPosition = resp.json().await?;
        Ok(PositionInfo {
            size: position.size as f64,
            entry_price: position
                .entry_price
                .as_deref()
                .and_then(|p| p.parse::<f64>().ok())
                .filter(|p| *p > 0.0),
        })
    }
}
