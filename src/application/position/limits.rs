use crate::application::position::cooldown::CooldownManager;
use crate::config::PositionManagementConfig;
use crate::domain::errors::LimitViolation;
use crate::domain::trading::{Regime, TradeEvaluation};
use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

/// A proposed trade's notional size for the confidence-band gate, already
/// resolved to an amount so `check` doesn't need pricing logic of its own.
#[derive(Debug, Clone, Copy)]
pub struct ProposedTrade {
    pub notional: Decimal,
    pub is_minimum_lot: bool,
}

/// Six-gate admission control run before every entry. Gates run in order
/// and the first failure short-circuits (§4.7); callers never see more than
/// one violation per call.
pub struct PositionLimits {
    config: PositionManagementConfig,
    cooldown: CooldownManager,
}

impl PositionLimits {
    pub fn new(config: PositionManagementConfig, cooldown: CooldownManager) -> Self {
        Self { config, cooldown }
    }

    fn max_open_for_regime(&self, regime: Option<&Regime>) -> (String, usize) {
        let label = regime.map(|r| r.to_string()).unwrap_or_else(|| "normal".to_string());
        let limit = self
            .config
            .max_open_positions_by_regime
            .get(&label)
            .copied()
            .unwrap_or(self.config.max_open_positions) as usize;
        (label, limit)
    }

    fn confidence_band_ratio(&self, confidence: f64) -> f64 {
        let bands = &self.config.max_position_ratio_per_trade;
        if confidence >= 0.75 {
            bands.high_confidence
        } else if confidence >= 0.60 {
            bands.medium_confidence
        } else {
            bands.low_confidence
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn check(
        &self,
        evaluation: &TradeEvaluation,
        trade: ProposedTrade,
        open_position_count: usize,
        daily_trade_count: usize,
        last_order_time: Option<DateTime<Utc>>,
        balance: Decimal,
        initial_balance: Decimal,
        fallback_price: Decimal,
    ) -> Result<(), LimitViolation> {
        // Gate 1: minimum balance.
        if !self.config.dynamic_position_sizing.enabled {
            if balance < self.config.min_account_balance {
                return Err(LimitViolation::MinimumBalance {
                    balance,
                    minimum: self.config.min_account_balance,
                });
            }
        } else {
            let floor = self.config.min_trade_size * fallback_price * Decimal::new(11, 1);
            if balance < floor {
                return Err(LimitViolation::MinimumBalance { balance, minimum: floor });
            }
        }

        // Gate 2: cooldown.
        if self.config.cooldown_minutes > 0 {
            if let Some(last) = last_order_time {
                let elapsed_secs = (Utc::now() - last).num_seconds();
                let cooldown_secs = self.config.cooldown_minutes * 60;
                if elapsed_secs < cooldown_secs && self.cooldown.should_apply_cooldown(evaluation) {
                    return Err(LimitViolation::Cooldown {
                        elapsed_secs,
                        cooldown_secs,
                    });
                }
            }
        }

        // Gate 3: max open positions, regime-aware.
        let (regime_label, limit) = self.max_open_for_regime(evaluation.regime.as_ref());
        if open_position_count >= limit {
            return Err(LimitViolation::MaxOpenPositions {
                regime: regime_label,
                count: open_position_count,
                limit,
            });
        }

        // Gate 4: capital usage.
        if initial_balance > Decimal::ZERO {
            let used_pct = ((initial_balance - balance) / initial_balance * Decimal::from(100))
                .to_f64()
                .unwrap_or(0.0);
            if used_pct >= self.config.capital_usage_limit_pct {
                return Err(LimitViolation::CapitalUsage {
                    used_pct,
                    limit_pct: self.config.capital_usage_limit_pct,
                });
            }
        }

        // Gate 5: daily trade count.
        if daily_trade_count >= self.config.max_daily_trades {
            return Err(LimitViolation::DailyTradeCount {
                count: daily_trade_count,
                limit: self.config.max_daily_trades,
            });
        }

        // Gate 6: trade size by ML confidence, with minimum-lot override.
        if trade.is_minimum_lot && self.config.max_position_ratio_per_trade.enforce_minimum {
            return Ok(());
        }
        let allowed_ratio = self.confidence_band_ratio(evaluation.confidence_level);
        let allowed_notional = balance * Decimal::from_f64_retain(allowed_ratio).unwrap_or(Decimal::ZERO);
        if trade.notional > allowed_notional {
            return Err(LimitViolation::CapitalUsage {
                used_pct: (trade.notional / balance.max(Decimal::ONE) * Decimal::from(100))
                    .to_f64()
                    .unwrap_or(0.0),
                limit_pct: allowed_ratio * 100.0,
            });
        }

        Ok(())
    }
}
