use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::side::{CloseReason, Side};

/// An open futures position. `size` is the stake in quote currency; the
/// direction is carried by `side`, never by the sign of `size`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub side: Side,
    pub entry_price: f64,
    pub size: f64,
    /// Exchange-native quantity filled at entry. The exit order reuses this
    /// exact amount, so a moved price never resizes the close.
    pub contracts: f64,
    pub leverage: u32,
    pub opened_at: DateTime<Utc>,
    /// Exit prices fixed at open time. None means the corresponding
    /// trigger is disabled.
    pub tp_price: Option<f64>,
    pub sl_price: Option<f64>,
}

impl Position {
    pub fn new(
        symbol: &str,
        side: Side,
        entry_price: f64,
        size: f64,
        leverage: u32,
        tp_percent: Option<f64>,
        sl_percent: Option<f64>,
    ) -> Self {
        let (tp_price, sl_price) = match side {
            Side::Long => (
                tp_percent.map(|p| entry_price * (1.0 + p)),
                sl_percent.map(|p| entry_price * (1.0 - p)),
            ),
            Side::Short => (
                tp_percent.map(|p| entry_price * (1.0 - p)),
                sl_percent.map(|p| entry_price * (1.0 + p)),
            ),
        };
        Self {
            symbol: symbol.to_string(),
            side,
            entry_price,
            size,
            contracts: size / entry_price,
            leverage,
            opened_at: Utc::now(),
            tp_price,
            sl_price,
        }
    }

    /// Replace the derived quantity with what the exchange reported. A zero
    /// or negative report keeps the derived value.
    pub fn with_contracts(mut self, contracts: f64) -> Self {
        if contracts > 0.0 {
            self.contracts = contracts;
        }
        self
    }

    /// Realized profit if the position exits at `exit_price`.
    pub fn profit_at(&self, exit_price: f64) -> f64 {
        let lev = self.leverage as f64;
        match self.side {
            Side::Long => (exit_price - self.entry_price) * self.size * lev,
            Side::Short => (self.entry_price - exit_price) * self.size * lev,
        }
    }

    /// Whether `price` trips the take-profit or stop-loss. Boundaries are
    /// inclusive: a print exactly on the level triggers.
    pub fn exit_reason(&self, price: f64) -> Option<CloseReason> {
        match self.side {
            Side::Long => {
                if let Some(tp) = self.tp_price {
                    if price >= tp {
                        return Some(CloseReason::TakeProfit);
                    }
                }
                if let Some(sl) = self.sl_price {
                    if price <= sl {
                        return Some(CloseReason::StopLoss);
                    }
                }
            }
            Side::Short => {
                if let Some(tp) = self.tp_price {
                    if price <= tp {
                        return Some(CloseReason::TakeProfit);
                    }
                }
                if let Some(sl) = self.sl_price {
                    if price >= sl {
                        return Some(CloseReason::StopLoss);
                    }
                }
            }
        }
        None
    }
}

/// Outcome of a completed close, returned by the position manager.
#[derive(Debug, Clone)]
pub struct ClosedTrade {
    pub position: Position,
    pub exit_price: f64,
    pub profit: f64,
    pub reason: CloseReason,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn long(entry: f64, size: f64, leverage: u32) -> Position {
        Position::new("DOGE_USDT", Side::Long, entry, size, leverage, Some(0.01), Some(0.017))
    }

    fn short(entry: f64, size: f64, leverage: u32) -> Position {
        Position::new("DOGE_USDT", Side::Short, entry, size, leverage, Some(0.01), Some(0.017))
    }

    #[test]
    fn profit_long() {
        let p = Position::new("DOGE_USDT", Side::Long, 100.0, 50.0, 10, None, None);
        assert!((p.profit_at(110.0) - 5000.0).abs() < 1e-9);
        assert!((p.profit_at(90.0) + 5000.0).abs() < 1e-9);
    }

    #[test]
    fn profit_short() {
        let p = Position::new("DOGE_USDT", Side::Short, 100.0, 50.0, 10, None, None);
        assert!((p.profit_at(110.0) + 5000.0).abs() < 1e-9);
        assert!((p.profit_at(90.0) - 5000.0).abs() < 1e-9);
    }

    #[test]
    fn contracts_default_to_stake_over_entry() {
        let p = long(0.08, 100.0, 15);
        assert!((p.contracts - 1250.0).abs() < 1e-9);

        let p = p.with_contracts(1248.0);
        assert!((p.contracts - 1248.0).abs() < 1e-9);
        // an empty exchange report keeps the previous value
        assert!((p.with_contracts(0.0).contracts - 1248.0).abs() < 1e-9);
    }

    #[test]
    fn exit_prices_fixed_at_open() {
        let p = long(100.0, 10.0, 15);
        assert!((p.tp_price.unwrap() - 101.0).abs() < 1e-9);
        assert!((p.sl_price.unwrap() - 98.3).abs() < 1e-9);

        let s = short(100.0, 10.0, 15);
        assert!((s.tp_price.unwrap() - 99.0).abs() < 1e-9);
        assert!((s.sl_price.unwrap() - 101.7).abs() < 1e-9);
    }

    #[test]
    fn long_triggers_are_inclusive() {
        let p = long(100.0, 10.0, 15);
        assert_eq!(p.exit_reason(101.0), Some(CloseReason::TakeProfit));
        assert_eq!(p.exit_reason(101.5), Some(CloseReason::TakeProfit));
        assert_eq!(p.exit_reason(98.3), Some(CloseReason::StopLoss));
        assert_eq!(p.exit_reason(98.0), Some(CloseReason::StopLoss));
        assert_eq!(p.exit_reason(100.0), None);
        assert_eq!(p.exit_reason(100.99), None);
    }

    #[test]
    fn short_triggers_are_inclusive() {
        let s = short(100.0, 10.0, 15);
        assert_eq!(s.exit_reason(99.0), Some(CloseReason::TakeProfit));
        assert_eq!(s.exit_reason(98.5), Some(CloseReason::TakeProfit));
        assert_eq!(s.exit_reason(101.7), Some(CloseReason::StopLoss));
        assert_eq!(s.exit_reason(102.0), Some(CloseReason::StopLoss));
        assert_eq!(s.exit_reason(100.0), None);
    }

    #[test]
    fn unset_thresholds_never_trigger() {
        let p = Position::new("DOGE_USDT", Side::Long, 100.0, 10.0, 15, None, None);
        assert_eq!(p.exit_reason(0.01), None);
        assert_eq!(p.exit_reason(1e9), None);
    }
}
