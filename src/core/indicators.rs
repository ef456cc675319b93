use serde::{Deserialize, Serialize};

use crate::error::BotError;
use crate::models::CandleSeries;

const RSI_PERIOD: usize = 6;
const MA_PERIOD: usize = 7;
const BOLLINGER_PERIOD: usize = 20;
const BOLLINGER_WIDTH: f64 = 2.0;
const VOLATILITY_PERIOD: usize = 20;

/// All four indicator readings for the latest candle. The snapshot is
/// all-or-nothing: with enough history every field is computable, so none
/// of them is optional.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IndicatorSnapshot {
    /// Wilder RSI of the closes.
    pub rsi: f64,
    /// Relative distance of the last close from its simple moving average.
    pub ma_distance: f64,
    /// Relative distance of the last close past the upper Bollinger band.
    /// Negative while price sits inside the band.
    pub bollinger_break: f64,
    /// Standard deviation of recent close-to-close returns, in percent.
    pub volatility: f64,
}

pub struct IndicatorEngine {
    rsi_period: usize,
    ma_period: usize,
    bollinger_period: usize,
    bollinger_width: f64,
    volatility_period: usize,
}

impl IndicatorEngine {
    pub fn new() -> Self {
        Self {
            rsi_period: RSI_PERIOD,
            ma_period: MA_PERIOD,
            bollinger_period: BOLLINGER_PERIOD,
            bollinger_width: BOLLINGER_WIDTH,
            volatility_period: VOLATILITY_PERIOD,
        }
    }

    /// Shortest series the engine accepts. The +1 covers the seed delta for
    /// RSI and the first percent change for volatility.
    pub fn min_candles(&self) -> usize {
        self.rsi_period
            .max(self.ma_period)
            .max(self.bollinger_period)
            .max(self.volatility_period)
            + 1
    }

    pub fn snapshot(&self, series: &CandleSeries) -> Result<IndicatorSnapshot, BotError> {
        let need = self.min_candles();
        if series.len() < need {
            return Err(BotError::InsufficientData {
                have: series.len(),
                need,
            });
        }

        let closes = series.closes();
        Ok(IndicatorSnapshot {
            rsi: wilder_rsi(&closes, self.rsi_period),
            ma_distance: ma_distance(&closes, self.ma_period),
            bollinger_break: bollinger_break(&closes, self.bollinger_period, self.bollinger_width),
            volatility: volatility(&closes, self.volatility_period),
        })
    }
}

/// Wilder-smoothed RSI: a simple average seeds the first `period` deltas,
/// every later delta folds in recursively. Flat series read 50, an
/// all-gains series reads 100.
fn wilder_rsi(closes: &[f64], period: usize) -> f64 {
    let mut gains = 0.0;
    let mut losses = 0.0;
    for w in closes[..=period].windows(2) {
        let delta = w[1] - w[0];
        if delta >= 0.0 {
            gains += delta;
        } else {
            losses -= delta;
        }
    }

    let n = period as f64;
    let mut avg_gain = gains / n;
    let mut avg_loss = losses / n;

    for w in closes[period..].windows(2) {
        let delta = w[1] - w[0];
        let (gain, loss) = if delta >= 0.0 { (delta, 0.0) } else { (0.0, -delta) };
        avg_gain = (avg_gain * (n - 1.0) + gain) / n;
        avg_loss = (avg_loss * (n - 1.0) + loss) / n;
    }

    if avg_loss == 0.0 {
        return if avg_gain == 0.0 { 50.0 } else { 100.0 };
    }
    let rs = avg_gain / avg_loss;
    100.0 - 100.0 / (1.0 + rs)
}

fn ma_distance(closes: &[f64], period: usize) -> f64 {
    let window = &closes[closes.len() - period..];
    let sma = mean(window);
    let close = closes[closes.len() - 1];
    (close - sma) / sma
}

fn bollinger_break(closes: &[f64], period: usize, width: f64) -> f64 {
    let window = &closes[closes.len() - period..];
    let upper = mean(window) + width * population_std(window);
    let close = closes[closes.len() - 1];
    (close - upper) / close
}

/// Percent-change volatility over the trailing window, scaled to percent.
fn volatility(closes: &[f64], period: usize) -> f64 {
    let changes: Vec<f64> = closes
        .windows(2)
        .map(|w| (w[1] - w[0]) / w[0])
        .collect();
    let window = &changes[changes.len() - period..];
    sample_std(window) * 100.0
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

fn population_std(values: &[f64]) -> f64 {
    let m = mean(values);
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64;
    var.sqrt()
}

fn sample_std(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    let var =
        values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    var.sqrt()
}
