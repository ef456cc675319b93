use thiserror::Error;

/// Errors surfaced by the trading pipeline. `Connectivity` covers transport
/// failures and malformed exchange responses; everything the exchange
/// explicitly refused gets its own variant so callers can react per case.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BotError {
    #[error("connectivity: {0}")]
    Connectivity(String),

    #[error("insufficient data: have {have} candles, need {need}")]
    InsufficientData { have: usize, need: usize },

    #[error("insufficient balance: {balance:.4} available, {required:.4} required")]
    InsufficientBalance { balance: f64, required: f64 },

    #[error("order rejected: {0}")]
    OrderRejected(String),

    #[error("close failed: {0}")]
    CloseFailed(String),

    #[error("unknown symbol: {0}")]
    UnknownSymbol(String),
}

impl From<reqwest::Error> for BotError {
    fn from(err: reqwest::Error) -> Self {
        BotError::Connectivity(err.to_string())
    }
}
