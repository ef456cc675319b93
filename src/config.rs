use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::models::{DisabledSide, Interval, RsiCondition, Side};

pub type SharedConfig = Arc<RwLock<Config>>;

/// Entry rules and sizing for one side of the book.
///
/// Every threshold is optional. An unset threshold means the rule does not
/// participate in the entry decision at all.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SideSettings {
    pub symbol: String,
    pub rsi_threshold: Option<f64>,
    pub rsi_condition: RsiCondition,
    pub tp_percent: Option<f64>,
    pub sl_percent: Option<f64>,
    pub leverage: Option<u32>,
    pub ma_threshold: Option<f64>,
    pub bollinger_threshold: Option<f64>,
    pub volatility_threshold: Option<f64>,
    pub allowed_hours: Vec<u32>,
}

impl SideSettings {
    pub fn leverage(&self) -> u32 {
        self.leverage.unwrap_or(1)
    }

    /// An empty list places no restriction on the hour.
    pub fn hour_allowed(&self, hour: u32) -> bool {
        self.allowed_hours.is_empty() || self.allowed_hours.contains(&hour)
    }

    fn default_for(side: Side) -> Self {
        let (rsi_threshold, rsi_condition) = match side {
            Side::Long => (Some(20.0), RsiCondition::LessThan),
            Side::Short => (Some(80.0), RsiCondition::GreaterThan),
        };
        Self {
            symbol: "DOGE_USDT".to_string(),
            rsi_threshold,
            rsi_condition,
            tp_percent: Some(0.01),
            sl_percent: Some(0.017),
            leverage: Some(15),
            ma_threshold: Some(0.007),
            bollinger_threshold: Some(0.0025),
            volatility_threshold: Some(0.5),
            allowed_hours: vec![1, 9, 11, 17, 19, 22, 23],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // Exchange
    pub data_source: String,
    pub gate_api_key: String,
    pub gate_api_secret: String,
    pub binance_api_key: String,
    pub binance_api_secret: String,

    // Telegram
    pub telegram_token: Option<String>,
    pub telegram_chat_id: Option<String>,

    // Polling
    pub interval: Interval,
    pub candle_limit: usize,
    pub poll_interval_secs: u64,
    pub monitor_interval_ms: u64,
    pub wait_for_candle_close: bool,

    // Strategy
    /// Fraction of the account balance staked per entry.
    pub entry_fraction: f64,
    pub disabled_side: DisabledSide,
    pub long: SideSettings,
    pub short: SideSettings,

    // Http & Logging
    pub http_timeout_secs: u64,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_source: "gateio".to_string(),
            gate_api_key: String::new(),
            gate_api_secret: String::new(),
            binance_api_key: String::new(),
            binance_api_secret: String::new(),
            telegram_token: None,
            telegram_chat_id: None,
            interval: Interval::M15,
            candle_limit: 100,
            poll_interval_secs: 10,
            monitor_interval_ms: 3000,
            wait_for_candle_close: false,
            entry_fraction: 0.1,
            disabled_side: DisabledSide::None_,
            long: SideSettings::default_for(Side::Long),
            short: SideSettings::default_for(Side::Short),
            http_timeout_secs: 10,
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Builds the configuration from environment variables, falling back to
    /// defaults for anything unset. Setting a threshold variable to an empty
    /// string disables that rule entirely.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let defaults = Config::default();
        let env = |key: &str| {
            std::env::var(key)
                .ok()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        Config {
            data_source: env("DATA_SOURCE")
                .map(|v| v.to_lowercase())
                .unwrap_or(defaults.data_source),
            gate_api_key: env("GATE_API_KEY").unwrap_or_default(),
            gate_api_secret: env("GATE_API_SECRET").unwrap_or_default(),
            binance_api_key: env("BINANCE_API_KEY").unwrap_or_default(),
            binance_api_secret: env("BINANCE_API_SECRET").unwrap_or_default(),
            telegram_token: env("TELEGRAM_BOT_TOKEN"),
            telegram_chat_id: env("TELEGRAM_CHAT_ID"),
            interval: env("CANDLE_INTERVAL")
                .and_then(|v| Interval::from_str_loose(&v))
                .unwrap_or(defaults.interval),
            candle_limit: env("CANDLE_LIMIT")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.candle_limit),
            poll_interval_secs: env("POLL_INTERVAL_SECS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.poll_interval_secs),
            monitor_interval_ms: env("MONITOR_INTERVAL_MS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.monitor_interval_ms),
            wait_for_candle_close: env("WAIT_FOR_CANDLE_CLOSE")
                .map(|v| parse_bool(&v))
                .unwrap_or(defaults.wait_for_candle_close),
            entry_fraction: env("ENTRY_FRACTION")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.entry_fraction),
            disabled_side: env("DISABLED_SIDE")
                .and_then(|v| DisabledSide::from_str_loose(&v))
                .unwrap_or(defaults.disabled_side),
            long: side_from_env("LONG", defaults.long),
            short: side_from_env("SHORT", defaults.short),
            http_timeout_secs: env("HTTP_TIMEOUT_SECS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.http_timeout_secs),
            log_level: env("LOG_LEVEL").unwrap_or(defaults.log_level),
        }
    }

    pub fn side(&self, side: Side) -> &SideSettings {
        match side {
            Side::Long => &self.long,
            Side::Short => &self.short,
        }
    }

    pub fn shared(self) -> SharedConfig {
        Arc::new(RwLock::new(self))
    }
}

/// Reads one side's settings from `{prefix}_*` variables. Unset keeps the
/// default, an empty string clears the rule.
fn side_from_env(prefix: &str, defaults: SideSettings) -> SideSettings {
    let key = |name: &str| format!("{}_{}", prefix, name);
    SideSettings {
        symbol: env_str(&key("SYMBOL")).unwrap_or(defaults.symbol),
        rsi_threshold: env_f64(&key("RSI_THRESHOLD"), defaults.rsi_threshold),
        rsi_condition: env_str(&key("RSI_CONDITION"))
            .and_then(|v| RsiCondition::from_str_loose(&v))
            .unwrap_or(defaults.rsi_condition),
        tp_percent: env_f64(&key("TP_PERCENT"), defaults.tp_percent),
        sl_percent: env_f64(&key("SL_PERCENT"), defaults.sl_percent),
        leverage: env_u32(&key("LEVERAGE"), defaults.leverage),
        ma_threshold: env_f64(&key("MA_THRESHOLD"), defaults.ma_threshold),
        bollinger_threshold: env_f64(&key("BOLLINGER_THRESHOLD"), defaults.bollinger_threshold),
        volatility_threshold: env_f64(&key("VOLATILITY_THRESHOLD"), defaults.volatility_threshold),
        allowed_hours: match std::env::var(key("ALLOWED_HOURS")) {
            Ok(v) if v.trim().is_empty() => Vec::new(),
            Ok(v) => parse_hours(&v),
            Err(_) => defaults.allowed_hours,
        },
    }
}

fn env_str(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_f64(key: &str, default: Option<f64>) -> Option<f64> {
    match std::env::var(key) {
        Ok(v) if v.trim().is_empty() => None,
        Ok(v) => v.trim().parse().ok().or(default),
        Err(_) => default,
    }
}

fn env_u32(key: &str, default: Option<u32>) -> Option<u32> {
    match std::env::var(key) {
        Ok(v) if v.trim().is_empty() => None,
        Ok(v) => v.trim().parse().ok().or(default),
        Err(_) => default,
    }
}

fn parse_hours(raw: &str) -> Vec<u32> {
    raw.split(',')
        .filter_map(|h| h.trim().parse().ok())
        .filter(|h| *h < 24)
        .collect()
}

fn parse_bool(raw: &str) -> bool {
    matches!(raw.to_lowercase().as_str(), "1" | "true" | "yes" | "on")
}
