use chrono::{DateTime, Duration, Utc};
use futures_signal_bot::models::{Candle, CandleSeries};

/// Create candles where every OHLC field equals the given close, spaced 15m.
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

/// Closes that fall with alternating large and small steps. RSI pins near
/// zero while the percent-change volatility stays well above the default
/// entry threshold.
pub fn choppy_falling_closes(n: usize, start: f64) -> Vec<f64> {
    let mut closes = Vec::with_capacity(n);
    let mut price = start;
    for i in 0..n {
        closes.push(price);
        price *= if i % 2 == 0 { 0.98 } else { 0.999 };
    }
    closes
}

/// Rising mirror of `choppy_falling_closes`: RSI pins near one hundred.
pub fn choppy_rising_closes(n: usize, start: f64) -> Vec<f64> {
    let mut closes = Vec::with_capacity(n);
    let mut price = start;
    for i in 0..n {
        closes.push(price);
        price *= if i % 2 == 0 { 1.02 } else { 1.001 };
    }
    closes
}
