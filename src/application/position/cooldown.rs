use crate::domain::trading::TradeEvaluation;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

/// Normalization constants from the ADX/DI/EMA composite trend-strength
/// score. Each term is clamped to 1.0 before weighting.
const ADX_NORMALIZER: f64 = 50.0;
const DI_SPREAD_NORMALIZER: f64 = 40.0;
const EMA_SPREAD_NORMALIZER: f64 = 0.05;

const ADX_WEIGHT: f64 = 0.5;
const DI_WEIGHT: f64 = 0.3;
const EMA_WEIGHT: f64 = 0.2;

const DEFAULT_TREND_STRENGTH_THRESHOLD: f64 = 0.7;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrendStrengthBreakdown {
    pub adx_score: f64,
    pub di_score: f64,
    pub ema_score: f64,
    pub composite: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CooldownStatus {
    pub enabled: bool,
    pub flexible_mode: bool,
    pub trend_strength: Option<TrendStrengthBreakdown>,
    pub threshold: f64,
    pub should_apply: bool,
}

/// Decides whether an otherwise-due cooldown should be skipped because the
/// 4h trend is strong enough that waiting out the cooldown would cost more
/// than it protects against.
pub struct CooldownManager {
    enabled: bool,
    flexible_mode: bool,
    trend_strength_threshold: f64,
}

impl CooldownManager {
    pub fn new(enabled: bool, flexible_mode: bool, trend_strength_threshold: Option<f64>) -> Self {
        Self {
            enabled,
            flexible_mode,
            trend_strength_threshold: trend_strength_threshold.unwrap_or(DEFAULT_TREND_STRENGTH_THRESHOLD),
        }
    }

    fn to_f64(value: Decimal) -> f64 {
        value.to_f64().unwrap_or(0.0)
    }

    /// Composite trend strength read off the 4h bar's indicator snapshot.
    /// Returns `None` if any of the required indicators are absent.
    pub fn trend_strength(evaluation: &TradeEvaluation) -> Option<TrendStrengthBreakdown> {
        let adx_14 = Self::to_f64(evaluation.indicator("4h", "adx_14")?);
        let plus_di = Self::to_f64(evaluation.indicator("4h", "plus_di_14")?);
        let minus_di = Self::to_f64(evaluation.indicator("4h", "minus_di_14")?);
        let ema_20 = Self::to_f64(evaluation.indicator("4h", "ema_20")?);
        let ema_50 = Self::to_f64(evaluation.indicator("4h", "ema_50")?);

        if ema_50 == 0.0 {
            return None;
        }

        let adx_score = (adx_14 / ADX_NORMALIZER).min(1.0);
        let di_score = ((plus_di - minus_di).abs() / DI_SPREAD_NORMALIZER).min(1.0);
        let ema_score = (((ema_20 - ema_50).abs() / ema_50) / EMA_SPREAD_NORMALIZER).min(1.0);
        let composite = ADX_WEIGHT * adx_score + DI_WEIGHT * di_score + EMA_WEIGHT * ema_score;

        Some(TrendStrengthBreakdown {
            adx_score,
            di_score,
            ema_score,
            composite,
        })
    }

    /// `true` means apply the cooldown (deny admission); `false` means skip
    /// it, either because cooldown is globally off or the trend is strong
    /// enough to override it.
    pub fn should_apply_cooldown(&self, evaluation: &TradeEvaluation) -> bool {
        if !self.enabled {
            return false;
        }
        if !self.flexible_mode {
            return true;
        }
        match Self::trend_strength(evaluation) {
            Some(strength) => strength.composite < self.trend_strength_threshold,
            None => true,
        }
    }

    pub fn status(&self, evaluation: &TradeEvaluation) -> CooldownStatus {
        let trend_strength = Self::trend_strength(evaluation);
        CooldownStatus {
            enabled: self.enabled,
            flexible_mode: self.flexible_mode,
            trend_strength,
            threshold: self.trend_strength_threshold,
            should_apply: self.should_apply_cooldown(evaluation),
        }
    }
}
