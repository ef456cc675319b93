use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::config::Config;
use crate::error::BotError;
use crate::exchange::{ExchangeGateway, OrderResult, OrderSide, OrderStatus, PositionInfo};
use crate::models::{Candle, CandleSeries, Interval};

/// Create candles from (open, high, low, close) tuples with auto-incrementing 1m timestamps.
pub fn make_candles(data: &[(f64, f64, f64, f64)]) -> CandleSeries {
    let base = DateTime::parse_from_rfc3339("2024-01-15T12:00:00Z")
        .unwrap()
        .with_timezone(&Utc);

    let candles: Vec<Candle> = data
        .iter()
        .enumerate()
        .map(|(i, &(o, h, l, c))| Candle {
            timestamp: base + Duration::minutes(i as i64),
            open: o,
            high: h,
            low: l,
            close: c,
            volume: 100.0,
        })
        .collect();

    CandleSeries::new(candles)
}

/// Create candles where every OHLC field equals the given close. Handy when
/// only the close series matters.
pub fn make_flat_candles(closes: &[f64]) -> CandleSeries {
    let base = DateTime::parse_from_rfc3339("2024-01-15T12:00:00Z")
        .unwrap()
        .with_timezone(&Utc);

    let candles: Vec<Candle> = closes
        .iter()
        .enumerate()
        .map(|(i, &c)| Candle {
            timestamp: base + Duration::minutes(15 * i as i64),
            open: c,
            high: c,
            low: c,
            close: c,
            volume: 100.0,
        })
        .collect();

    CandleSeries::new(candles)
}

/// A Config suitable for tests: tiny intervals, no hour gating, quiet logs.
pub fn default_test_config() -> Config {
    let mut cfg = Config::default();
    cfg.poll_interval_secs = 0;
    cfg.monitor_interval_ms = 20;
    cfg.http_timeout_secs = 2;
    cfg.log_level = "error".to_string();
    cfg.long.allowed_hours.clear();
    cfg.short.allowed_hours.clear();
    cfg
}

/// Scripted gateway for tests. Every knob is public so a test can push the
/// exchange into whatever state it needs before poking the code under test.
pub struct MockGateway {
    pub balance: Mutex<f64>,
    pub price: Mutex<f64>,
    pub candles: Mutex<CandleSeries>,
    pub position: Mutex<PositionInfo>,
    pub unknown_symbols: Mutex<Vec<String>>,
    pub fail_orders: AtomicBool,
    pub fail_price: AtomicBool,
    /// Fills report no average price when set.
    pub blank_fills: AtomicBool,
    /// Overrides the reported fill price; None falls back to `price`.
    pub fill_price: Mutex<Option<f64>>,
    pub orders: Mutex<Vec<(String, OrderSide, f64)>>,
    pub leverage_calls: Mutex<Vec<(String, u32)>>,
    next_order_id: AtomicUsize,
}

impl MockGateway {
    pub fn new() -> Self {
        Self {
            balance: Mutex::new(1000.0),
            price: Mutex::new(100.0),
            candles: Mutex::new(CandleSeries::default()),
            position: Mutex::new(PositionInfo::default()),
            unknown_symbols: Mutex::new(Vec::new()),
            fail_orders: AtomicBool::new(false),
            fail_price: AtomicBool::new(false),
            blank_fills: AtomicBool::new(false),
            fill_price: Mutex::new(None),
            orders: Mutex::new(Vec::new()),
            leverage_calls: Mutex::new(Vec::new()),
            next_order_id: AtomicUsize::new(1),
        }
    }

    pub fn set_price(&self, price: f64) {
        *self.price.lock().unwrap() = price;
    }

    pub fn set_balance(&self, balance: f64) {
        *self.balance.lock().unwrap() = balance;
    }

    pub fn set_candles(&self, series: CandleSeries) {
        *self.candles.lock().unwrap() = series;
    }

    pub fn order_count(&self) -> usize {
        self.orders.lock().unwrap().len()
    }
}

impl Default for MockGateway {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExchangeGateway for MockGateway {
    async fn get_balance(&self) -> Result<f64, BotError> {
        Ok(*self.balance.lock().unwrap())
    }

    async fn symbol_exists(&self, symbol: &str) -> Result<bool, BotError> {
        let unknown = self.unknown_symbols.lock().unwrap();
        Ok(!unknown.iter().any(|s| s == symbol))
    }

    async fn fetch_candles(
        &self,
        _symbol: &str,
        _interval: Interval,
        _limit: usize,
    ) -> Result<CandleSeries, BotError> {
        Ok(self.candles.lock().unwrap().clone())
    }

    async fn last_price(&self, _symbol: &str) -> Result<f64, BotError> {
        if self.fail_price.load(Ordering::SeqCst) {
            return Err(BotError::Connectivity("mock price offline".to_string()));
        }
        Ok(*self.price.lock().unwrap())
    }

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<(), BotError> {
        self.leverage_calls
            .lock()
            .unwrap()
            .push((symbol.to_string(), leverage));
        Ok(())
    }

    async fn place_order(
        &self,
        symbol: &str,
        side: OrderSide,
        notional: f64,
    ) -> Result<OrderResult, BotError> {
        if self.fail_orders.load(Ordering::SeqCst) {
            return Err(BotError::OrderRejected("mock refuses orders".to_string()));
        }
        self.orders
            .lock()
            .unwrap()
            .push((symbol.to_string(), side, notional));
        let id = self.next_order_id.fetch_add(1, Ordering::SeqCst);
        let price = *self.price.lock().unwrap();
        let fill = if self.blank_fills.load(Ordering::SeqCst) {
            None
        } else {
            (*self.fill_price.lock().unwrap()).or(Some(price))
        };
        Ok(OrderResult {
            id: format!("mock-{}", id),
            status: OrderStatus::Filled,
            filled_size: notional / price,
            remaining_size: 0.0,
            fill_price: fill,
        })
    }

    async fn close_position(
        &self,
        symbol: &str,
        side: OrderSide,
        contracts: f64,
    ) -> Result<OrderResult, BotError> {
        if self.fail_orders.load(Ordering::SeqCst) {
            return Err(BotError::OrderRejected("mock refuses orders".to_string()));
        }
        self.orders
            .lock()
            .unwrap()
            .push((symbol.to_string(), side, contracts));
        let id = self.next_order_id.fetch_add(1, Ordering::SeqCst);
        let price = *self.price.lock().unwrap();
        Ok(OrderResult {
            id: format!("mock-{}", id),
            status: OrderStatus::Filled,
            filled_size: contracts,
            remaining_size: 0.0,
            fill_price: Some(price),
        })
    }

    async fn get_position(&self, _symbol: &str) -> Result<PositionInfo, BotError> {
        Ok(self.position.lock().unwrap().clone())
    }
}
