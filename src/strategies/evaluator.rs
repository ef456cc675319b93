use tracing::debug;

use crate::config::SideSettings;
use crate::core::indicators::IndicatorSnapshot;
use crate::models::{DisabledSide, Side};

/// Entry rule engine. All configured threshold rules must pass at once; a
/// rule left unset passes by definition, so a side with nothing configured
/// trades on every tick its preconditions allow.
pub struct SignalEvaluator;

impl SignalEvaluator {
    pub fn new() -> Self {
        Self
    }

    pub fn should_open(
        &self,
        side: Side,
        settings: &SideSettings,
        disabled: DisabledSide,
        snapshot: &IndicatorSnapshot,
        hour: u32,
        has_open: bool,
    ) -> bool {
        if disabled.blocks(side) {
            debug!("{} skip: side disabled", side);
            return false;
        }
        if has_open {
            return false;
        }
        if !settings.hour_allowed(hour) {
            debug!("{} skip: hour {} not allowed", side, hour);
            return false;
        }

        if let Some(threshold) = settings.rsi_threshold {
            if !settings.rsi_condition.passes(snapshot.rsi, threshold) {
                debug!(
                    "{} skip: rsi {:.2} not {} {:.2}",
                    side, snapshot.rsi, settings.rsi_condition, threshold
                );
                return false;
            }
        }
        if let Some(threshold) = settings.ma_threshold {
            if snapshot.ma_distance.abs() <= threshold {
                debug!(
                    "{} skip: ma distance {:.5} within {:.5}",
                    side, snapshot.ma_distance, threshold
                );
                return false;
            }
        }
        if let Some(threshold) = settings.bollinger_threshold {
            if snapshot.bollinger_break.abs() <= threshold {
                debug!(
                    "{} skip: bollinger break {:.5} within {:.5}",
                    side, snapshot.bollinger_break, threshold
                );
                return false;
            }
        }
        if let Some(threshold) = settings.volatility_threshold {
            if snapshot.volatility <= threshold {
                debug!(
                    "{} skip: volatility {:.4} below {:.4}",
                    side, snapshot.volatility, threshold
                );
                return false;
            }
        }

        true
    }
}
