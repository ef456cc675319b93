pub mod binance;
pub mod gateio;

pub use binance::BinanceFutures;
pub use gateio::GateioFutures;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::config::Config;
use crate::error::BotError;
use crate::models::{CandleSeries, Interval};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "buy"),
            OrderSide::Sell => write!(f, "sell"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Filled,
    PartiallyFilled,
    Rejected,
}

/// Outcome of a market order, normalized across exchanges. Sizes are in
/// the exchange's native quantity unit; a fully filled order reports
/// `remaining_size` of zero.
#[derive(Debug, Clone)]
pub struct OrderResult {
    pub id: String,
    pub status: OrderStatus,
    pub filled_size: f64,
    pub remaining_size: f64,
    pub fill_price: Option<f64>,
}

/// Net position as the exchange reports it. `size` keeps the exchange's
/// sign convention: positive long, negative short, zero flat.
#[derive(Debug, Clone, Default)]
pub struct PositionInfo {
    pub size: f64,
    pub entry_price: Option<f64>,
}

/// REST boundary to a futures exchange. Implementations map transport and
/// protocol failures into `BotError` so the trading core never handles a
/// raw HTTP error.
#[async_trait]
pub trait ExchangeGateway: Send + Sync {
    /// Available quote-currency balance of the futures account.
    async fn get_balance(&self) -> Result<f64, BotError>;

    async fn symbol_exists(&self, symbol: &str) -> Result<bool, BotError>;

    /// Most recent candles, oldest first.
    async fn fetch_candles(
        &self,
        symbol: &str,
        interval: Interval,
        limit: usize,
    ) -> Result<CandleSeries, BotError>;

    async fn last_price(&self, symbol: &str) -> Result<f64, BotError>;

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<(), BotError>;

    /// Place a market order worth `notional` quote units.
    async fn place_order(
        &self,
        symbol: &str,
        side: OrderSide,
        notional: f64,
    ) -> Result<OrderResult, BotError>;

    /// Reduce-only market order for `contracts` native units. Exits go
    /// through here so a close can never grow or flip the position.
    async fn close_position(
        &self,
        symbol: &str,
        side: OrderSide,
        contracts: f64,
    ) -> Result<OrderResult, BotError>;

    async fn get_position(&self, symbol: &str) -> Result<PositionInfo, BotError>;
}

pub type SharedGateway = Arc<dyn ExchangeGateway>;

pub fn build_gateway(cfg: &Config) -> anyhow::Result<SharedGateway> {
    match cfg.data_source.as_str() {
        "gateio" => Ok(Arc::new(GateioFutures::new(cfg)?)),
        "binance" => Ok(Arc::new(BinanceFutures::new(cfg)?)),
        other => anyhow::bail!("unknown data source: {}", other),
    }
}
