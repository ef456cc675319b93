use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Long,
    Short,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Long => write!(f, "long"),
            Side::Short => write!(f, "short"),
        }
    }
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Long => "long",
            Side::Short => "short",
        }
    }

    pub fn opposite(&self) -> Side {
        match self {
            Side::Long => Side::Short,
            Side::Short => Side::Long,
        }
    }
}

/// Comparison applied to the RSI reading before an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RsiCondition {
    LessThan,
    GreaterThan,
}

impl RsiCondition {
    pub fn passes(&self, rsi: f64, threshold: f64) -> bool {
        match self {
            RsiCondition::LessThan => rsi < threshold,
            RsiCondition::GreaterThan => rsi > threshold,
        }
    }

    pub fn from_str_loose(s: &str) -> Option<RsiCondition> {
        match s {
            "less_than" => Some(RsiCondition::LessThan),
            "greater_than" => Some(RsiCondition::GreaterThan),
            _ => None,
        }
    }
}

impl fmt::Display for RsiCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RsiCondition::LessThan => write!(f, "less_than"),
            RsiCondition::GreaterThan => write!(f, "greater_than"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DisabledSide {
    #[serde(rename = "none")]
    None_,
    Long,
    Short,
}

impl DisabledSide {
    pub fn blocks(&self, side: Side) -> bool {
        matches!(
            (self, side),
            (DisabledSide::Long, Side::Long) | (DisabledSide::Short, Side::Short)
        )
    }

    pub fn from_str_loose(s: &str) -> Option<DisabledSide> {
        match s {
            "none" => Some(DisabledSide::None_),
            "long" => Some(DisabledSide::Long),
            "short" => Some(DisabledSide::Short),
            _ => None,
        }
    }
}

impl fmt::Display for DisabledSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisabledSide::None_ => write!(f, "none"),
            DisabledSide::Long => write!(f, "long"),
            DisabledSide::Short => write!(f, "short"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    TakeProfit,
    StopLoss,
    ManualStop,
}

impl CloseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloseReason::TakeProfit => "take_profit",
            CloseReason::StopLoss => "stop_loss",
            CloseReason::ManualStop => "manual_stop",
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
