use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::DateTime;
use hmac::{Hmac, Mac};
use reqwest::{Client, Method, Response};
use serde::Deserialize;
use sha2::Sha256;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex;

use crate::config::Config;
use crate::error::BotError;
use crate::exchange::{ExchangeGateway, OrderResult, OrderSide, OrderStatus, PositionInfo};
use crate::models::{Candle, CandleSeries, Interval};

const BASE_URL: &str = "https://fapi.binance.com";
const MIN_REQUEST_INTERVAL: Duration = Duration::from_millis(100);

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Deserialize)]
struct AssetBalance {
    asset: String,
    balance: String,
}

#[derive(Debug, Deserialize)]
struct TickerPrice {
    price: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderAck {
    order_id: i64,
    status: String,
    executed_qty: String,
    orig_qty: String,
    #[serde(default)]
    avg_price: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PositionRisk {
    position_amt: String,
    entry_price: String,
}

/// Binance USDT-margined futures. Signed calls append an HMAC-SHA256
/// signature over the query string and carry the key in X-MBX-APIKEY.
pub struct BinanceFutures {
    client: Client,
    api_key: String,
    api_secret: String,
    last_request: Mutex<Option<Instant>>,
}

impl BinanceFutures {
    pub fn new(cfg: &Config) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(cfg.http_timeout_secs))
            .build()
            .context("Failed to build http client")?;
        Ok(Self {
            client,
            api_key: cfg.binance_api_key.clone(),
            api_secret: cfg.binance_api_secret.clone(),
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

    fn hmac_sign(&self, query: &str) -> Result<String, BotError> {
        let mut mac = HmacSha256::new_from_slice(self.api_secret.as_bytes())
            .map_err(|e| BotError::Connectivity(format!("bad api secret: {}", e)))?;
        mac.update(query.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    async fn signed(
        &self,
        method: Method,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<Response, BotError> {
        self.rate_limit().await;

        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| BotError::Connectivity(e.to_string()))?
            .as_millis();
        let mut query: Vec<String> = params
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();
        query.push(format!("timestamp={}", timestamp));
        let query = query.join("&");
        let signature = self.hmac_sign(&query)?;

        let url = format!("{}{}?{}&signature={}", BASE_URL, path, query, signature);
        let resp = self
            .client
            .request(method, url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await?;
        Ok(resp)
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

    async fn submit_order(&self, params: &[(&str, String)]) -> Result<OrderResult, BotError> {
        let resp = self.signed(Method::POST, "/fapi/v1/order", params).await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(BotError::OrderRejected(format!("{}: {}", status, body)));
        }
        let ack: OrderAck = resp.json().await?;

        let filled: f64 = ack.executed_qty.parse().unwrap_or(0.0);
        let total: f64 = ack.orig_qty.parse().unwrap_or(filled);
        Ok(OrderResult {
            id: ack.order_id.to_string(),
            status: map_status(&ack.status),
            filled_size: filled,
            remaining_size: total - filled,
            fill_price: ack
                .avg_price
                .as_deref()
                .and_then(|p| p.parse::<f64>().ok())
                .filter(|p| *p > 0.0),
        })
    }
}

/// Query parameters of a market order. `reduce_only` marks an exit leg so
/// it can never grow or flip the position.
fn order_params(
    symbol: &str,
    side: OrderSide,
    quantity: f64,
    reduce_only: bool,
) -> Vec<(&'static str, String)> {
    let order_side = match side {
        OrderSide::Buy => "BUY",
        OrderSide::Sell => "SELL",
    };
    let mut params = vec![
        ("symbol", map_symbol(symbol)),
        ("side", order_side.to_string()),
        ("type", "MARKET".to_string()),
        ("quantity", format!("{}", quantity)),
    ];
    if reduce_only {
        params.push(("reduceOnly", "true".to_string()));
    }
    params.push(("newOrderRespType", "RESULT".to_string()));
    params
}

/// Binance spells futures pairs without the underscore separator.
fn map_symbol(symbol: &str) -> String {
    symbol.replace('_', "")
}

async fn check(resp: Response, what: &str) -> Result<Response, BotError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(BotError::Connectivity(format!("{} {}: {}", what, status, body)))
}

/// Klines come back as positional arrays: open time, then OHLCV as strings.
fn parse_kline(row: &[serde_json::Value]) -> Option<Candle> {
    let timestamp = DateTime::from_timestamp_millis(row.first()?.as_i64()?)?;
    let field = |i: usize| row.get(i)?.as_str()?.parse::<f64>().ok();
    Some(Candle {
        timestamp,
        open: field(1)?,
        high: field(2)?,
        low: field(3)?,
        close: field(4)?,
        volume: field(5)?,
    })
}

fn map_status(status: &str) -> OrderStatus {
    match status {
        "FILLED" => OrderStatus::Filled,
        "PARTIALLY_FILLED" => OrderStatus::PartiallyFilled,
        _ => OrderStatus::Rejected,
    }
}

#[async_trait]
impl ExchangeGateway for BinanceFutures {
    async fn get_balance(&self) -> Result<f64, BotError> {
        let resp = self.signed(Method::GET, "/fapi/v2/balance", &[]).await?;
        let resp = check(resp, "binance balance").await?;
        let balances: Vec<AssetBalance> = resp.json().await?;
        balances
            .iter()
            .find(|b| b.asset == "USDT")
            .and_then(|b| b.balance.parse().ok())
            .ok_or_else(|| BotError::Connectivity("no USDT balance entry".to_string()))
    }

    async fn symbol_exists(&self, symbol: &str) -> Result<bool, BotError> {
        let query = [("symbol", map_symbol(symbol))];
        let resp = self.public_get("/fapi/v1/exchangeInfo", &query).await?;
        let status = resp.status();
        if status.is_success() {
            Ok(true)
        } else if status.is_client_error() {
            Ok(false)
        } else {
            let body = resp.text().await.unwrap_or_default();
            Err(BotError::Connectivity(format!(
                "binance exchangeInfo {}: {}",
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
            ("symbol", map_symbol(symbol)),
            ("interval", interval.as_str().to_string()),
            ("limit", limit.to_string()),
        ];
        let resp = self.public_get("/fapi/v1/klines", &query).await?;
        let resp = check(resp, "binance klines").await?;
        let rows: Vec<Vec<serde_json::Value>> = resp.json().await?;
        let mut candles: Vec<Candle> = rows.iter().filter_map(|r| parse_kline(r)).collect();
        candles.sort_by_key(|c| c.timestamp);
        Ok(CandleSeries::new(candles))
    }

    async fn last_price(&self, symbol: &str) -> Result<f64, BotError> {
        let query = [("symbol", map_symbol(symbol))];
        let resp = self.public_get("/fapi/v1/ticker/price", &query).await?;
        let resp = check(resp, "binance ticker").await?;
        let ticker: TickerPrice = resp.json().await?;
        ticker
            .price
            .parse()
            .map_err(|_| BotError::Connectivity(format!("unparseable price: {}", ticker.price)))
    }

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<(), BotError> {
        let params = [
            ("symbol", map_symbol(symbol)),
            ("leverage", leverage.to_string()),
        ];
        let resp = self.signed(Method::POST, "/fapi/v1/leverage", &params).await?;
        check(resp, "binance leverage").await?;
        Ok(())
    }

    async fn place_order(
        &self,
        symbol: &str,
        side: OrderSide,
        notional: f64,
    ) -> Result<OrderResult, BotError> {
        let price = self.last_price(symbol).await?;
        let quantity = (notional / price).floor();
        if quantity <= 0.0 {
            return Err(BotError::OrderRejected(format!(
                "notional {:.4} below one unit at {:.6}",
                notional, price
            )));
        }
        self.submit_order(&order_params(symbol, side, quantity, false))
            .await
    }

    async fn close_position(
        &self,
        symbol: &str,
        side: OrderSide,
        contracts: f64,
    ) -> Result<OrderResult, BotError> {
        if contracts <= 0.0 {
            return Err(BotError::OrderRejected(
                "close quantity must be positive".to_string(),
            ));
        }
        self.submit_order(&order_params(symbol, side, contracts, true))
            .await
    }

    async fn get_position(&self, symbol: &str) -> Result<PositionInfo, BotError> {
        let params = [("symbol", map_symbol(symbol))];
        let resp = self
            .signed(Method::GET, "/fapi/v2/positionRisk", &params)
            .await?;
        let resp = check(resp, "binance positionRisk").await?;
        let positions: Vec<PositionRisk> = resp.json().await?;
        let first = match positions.first() {
            Some(p) => p,
            None => return Ok(PositionInfo::default()),
        };
        Ok(PositionInfo {
            size: first.position_amt.parse().unwrap_or(0.0),
            entry_price: first
                .entry_price
                .parse::<f64>()
                .ok()
                .filter(|p| *p > 0.0),
        })
    }
}
