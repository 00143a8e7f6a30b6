use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::fmt;

/// Coarse label attached to a margin ratio for downstream warn/deny logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarginStatus {
    Safe,
    Caution,
    Warning,
    Critical,
}

impl fmt::Display for MarginStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MarginStatus::Safe => write!(f, "safe"),
            MarginStatus::Caution => write!(f, "caution"),
            MarginStatus::Warning => write!(f, "warning"),
            MarginStatus::Critical => write!(f, "critical"),
        }
    }
}

impl MarginStatus {
    /// Classify a ratio (already expressed in percent, e.g. `215` for 215%)
    /// against the configured thresholds.
    pub fn from_ratio_pct(ratio_pct: Decimal, thresholds: &MarginThresholds) -> Self {
        if ratio_pct >= thresholds.safe {
            MarginStatus::Safe
        } else if ratio_pct >= thresholds.caution {
            MarginStatus::Caution
        } else if ratio_pct >= thresholds.warning {
            MarginStatus::Warning
        } else {
            MarginStatus::Critical
        }
    }
}

/// Configured breakpoints, percent, for `MarginStatus::from_ratio_pct`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MarginThresholds {
    pub safe: Decimal,
    pub caution: Decimal,
    pub warning: Decimal,
    pub critical: Decimal,
}

impl Default for MarginThresholds {
    fn default() -> Self {
        use rust_decimal_macros::dec;
        Self {
            safe: dec!(200),
            caution: dec!(150),
            warning: dec!(100),
            critical: dec!(80),
        }
    }
}

/// A point-in-time margin snapshot, either read from the exchange or
/// derived from the balance/formula fallback.
#[derive(Debug, Clone, PartialEq)]
pub struct MarginData {
    pub balance: Decimal,
    pub position_value: Decimal,
    pub margin_ratio_pct: Decimal,
    pub status: MarginStatus,
    pub timestamp: DateTime<Utc>,
}

/// Result of projecting the margin ratio forward for a proposed new
/// position, prior to admission.
#[derive(Debug, Clone, PartialEq)]
pub struct MarginPrediction {
    pub current_ratio_pct: Decimal,
    pub predicted_ratio_pct: Decimal,
    pub would_breach_critical: bool,
}

/// Outcome of `validateMargin`: whether the account can support a proposed
/// notional addition.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MarginSufficiency {
    pub sufficient: bool,
    pub available: Decimal,
    pub required: Decimal,
}
