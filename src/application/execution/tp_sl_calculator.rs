use crate::config::{PositionManagementConfig, RiskConfig};
use crate::domain::errors::TpSlError;
use crate::domain::market::Timeframe;
use crate::domain::ports::ExchangeClient;
use crate::domain::trading::{Regime, Side, TradeEvaluation};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::sync::Arc;
use ta::indicators::AverageTrueRange;
use ta::{DataItem, Next};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TpSl {
    pub take_profit: Decimal,
    pub stop_loss: Decimal,
}

/// Recomputes TP/SL from the actual fill price rather than the pre-trade
/// estimate (§4.10) — prices drift between signal generation and fill, and
/// sizing the stop off a stale price understates its real distance.
pub struct TpSlCalculator {
    exchange: Arc<dyn ExchangeClient>,
    position_config: PositionManagementConfig,
    risk_config: RiskConfig,
}

impl TpSlCalculator {
    pub fn new(exchange: Arc<dyn ExchangeClient>, position_config: PositionManagementConfig, risk_config: RiskConfig) -> Self {
        Self {
            exchange,
            position_config,
            risk_config,
        }
    }

    /// Three-tier ATR fallback chain: the evaluation's own indicator
    /// snapshot, then a direct 15m-bar lookback, then `None` (the caller
    /// decides whether the configured constant or an abort applies).
    async fn resolve_atr(&self, evaluation: &TradeEvaluation, symbol: &str) -> Option<Decimal> {
        if let Some(atr) = evaluation
            .indicator("15m", "atr_14")
            .or_else(|| evaluation.indicator("4h", "atr_14"))
        {
            return Some(atr);
        }

        let bars = match self.exchange.fetch_ohlcv(symbol, Timeframe::M15, None, Some(20)).await {
            Ok(bars) if bars.len() >= 15 => bars,
            Ok(_) => {
                warn!(%symbol, "insufficient 15m bars to derive ATR directly");
                return None;
            }
            Err(e) => {
                warn!(%symbol, "direct ATR lookback failed: {}", e);
                return None;
            }
        };

        let mut atr = AverageTrueRange::new(14).ok()?;
        let mut last = None;
        for bar in &bars {
            let item = DataItem::builder()
                .high(bar.high.to_f64()?)
                .low(bar.low.to_f64()?)
                .close(bar.close.to_f64()?)
                .open(bar.open.to_f64()?)
                .volume(bar.volume.to_f64()?)
                .build()
                .ok()?;
            last = Some(atr.next(&item));
        }
        last.and_then(Decimal::from_f64_retain)
    }

    fn atr_multiplier(&self, regime: Option<&Regime>) -> f64 {
        regime
            .and_then(|r| self.position_config.regime_based.get(&r.to_string()))
            .and_then(|o| o.atr_multiplier)
            .unwrap_or(self.position_config.stop_loss.default_atr_multiplier)
    }

    fn take_profit_ratio(&self, regime: Option<&Regime>) -> f64 {
        regime
            .and_then(|r| self.position_config.regime_based.get(&r.to_string()))
            .and_then(|o| o.take_profit_ratio)
            .unwrap_or(self.position_config.take_profit.default_ratio)
    }

    /// Computes TP/SL for a fill; aborts with `AtrUnavailable` when ATR
    /// cannot be resolved and `require_tpsl_recalculation=true` (the
    /// default), which the caller must translate into an atomic-entry abort.
    pub async fn calculate(
        &self,
        evaluation: &TradeEvaluation,
        symbol: &str,
        side: Side,
        entry_price: Decimal,
        regime: Option<&Regime>,
    ) -> Result<TpSl, TpSlError> {
        let atr = match self.resolve_atr(evaluation, symbol).await {
            Some(atr) => atr,
            None if self.risk_config.require_tpsl_recalculation => {
                return Err(TpSlError::AtrUnavailable { symbol: symbol.to_string() });
            }
            None => self.risk_config.fallback_atr,
        };

        let sl_cfg = &self.position_config.stop_loss;
        let tp_cfg = &self.position_config.take_profit;

        let atr_multiplier = Decimal::from_f64_retain(self.atr_multiplier(regime)).unwrap_or(Decimal::TWO);
        let min_distance_ratio = Decimal::from_f64_retain(sl_cfg.min_distance.ratio).unwrap_or(Decimal::ZERO);
        let max_loss_ratio = Decimal::from_f64_retain(sl_cfg.max_loss_ratio).unwrap_or(Decimal::ZERO);
        let min_profit_ratio = Decimal::from_f64_retain(tp_cfg.min_profit_ratio).unwrap_or(Decimal::ZERO);
        let take_profit_ratio = Decimal::from_f64_retain(self.take_profit_ratio(regime)).unwrap_or(Decimal::ONE);

        let stop_distance = (atr * atr_multiplier)
            .max(entry_price * min_distance_ratio)
            .max(entry_price * max_loss_ratio);
        let take_distance = (entry_price * min_profit_ratio).max(stop_distance * take_profit_ratio);

        Ok(match side {
            Side::Buy => TpSl {
                stop_loss: entry_price - stop_distance,
                take_profit: entry_price + take_distance,
            },
            Side::Sell => TpSl {
                stop_loss: entry_price + stop_distance,
                take_profit: entry_price - take_distance,
            },
        })
    }

    /// Fixed-amount TP variant: solves for the exit price that nets exactly
    /// `target_net_profit` after fees/interest, rather than a ratio-based
    /// distance. Fee/interest inputs are taken from the exchange's reported
    /// unrealized figures when available, falling back to the configured
    /// taker rate estimated against entry notional.
    pub fn fixed_amount_take_profit(
        &self,
        side: Side,
        entry_price: Decimal,
        amount: Decimal,
        unrealized_fee: Option<Decimal>,
        unrealized_interest: Option<Decimal>,
        fallback_fee_rate: Decimal,
    ) -> Option<Decimal> {
        let cfg = &self.position_config.take_profit.fixed_amount;
        if !cfg.enabled || amount <= Decimal::ZERO {
            return None;
        }

        let entry_fee = if cfg.include_entry_fee {
            unrealized_fee.unwrap_or(entry_price * amount * fallback_fee_rate)
        } else {
            Decimal::ZERO
        };
        let exit_fee_rebate = if cfg.include_exit_fee_rebate {
            entry_price * amount * fallback_fee_rate
        } else {
            Decimal::ZERO
        };
        let interest = if cfg.include_interest {
            unrealized_interest.unwrap_or(Decimal::ZERO)
        } else {
            Decimal::ZERO
        };

        let numerator = cfg.target_net_profit + entry_fee + interest - exit_fee_rebate;
        let offset = numerator / amount;

        Some(match side {
            Side::Buy => entry_price + offset,
            Side::Sell => entry_price - offset,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::trading::Decision;
    use crate::infrastructure::exchange::MockExchangeClient;
    use rust_decimal_macros::dec;
    use std::collections::HashMap;

    fn evaluation_with_atr(atr: Decimal) -> TradeEvaluation {
        let mut market_conditions = HashMap::new();
        market_conditions.insert("15m:atr_14".to_string(), atr);
        TradeEvaluation {
            decision: Decision::Approved,
            side: Some(Side::Buy),
            position_size: dec!(0.001),
            entry_price: Some(dec!(13_600_000)),
            stop_loss: None,
            take_profit: None,
            confidence_level: 0.75,
            strategy_name: "s".to_string(),
            regime: None,
            symbol: "BTC/JPY".to_string(),
            market_conditions,
        }
    }

    fn calculator() -> TpSlCalculator {
        TpSlCalculator::new(
            Arc::new(MockExchangeClient::new()),
            PositionManagementConfig::default(),
            RiskConfig::default(),
        )
    }

    #[tokio::test]
    async fn buy_tp_above_entry_and_sl_below() {
        let calc = calculator();
        let evaluation = evaluation_with_atr(dec!(50_000));
        let result = calc
            .calculate(&evaluation, "BTC/JPY", Side::Buy, dec!(13_600_000), None)
            .await
            .unwrap();
        assert!(result.take_profit > dec!(13_600_000));
        assert!(result.stop_loss < dec!(13_600_000));
    }

    #[tokio::test]
    async fn sell_tp_below_entry_and_sl_above() {
        let calc = calculator();
        let evaluation = evaluation_with_atr(dec!(50_000));
        let result = calc
            .calculate(&evaluation, "BTC/JPY", Side::Sell, dec!(13_600_000), None)
            .await
            .unwrap();
        assert!(result.take_profit < dec!(13_600_000));
        assert!(result.stop_loss > dec!(13_600_000));
    }

    #[tokio::test]
    async fn missing_atr_aborts_when_recalculation_required() {
        let calc = calculator();
        let mut evaluation = evaluation_with_atr(dec!(50_000));
        evaluation.market_conditions.clear();
        let err = calc
            .calculate(&evaluation, "BTC/JPY", Side::Buy, dec!(13_600_000), None)
            .await
            .unwrap_err();
        assert!(matches!(err, TpSlError::AtrUnavailable { .. }));
    }

    #[tokio::test]
    async fn missing_atr_falls_back_to_constant_when_recalculation_not_required() {
        let mut risk_config = RiskConfig::default();
        risk_config.require_tpsl_recalculation = false;
        let calc = TpSlCalculator::new(
            Arc::new(MockExchangeClient::new()),
            PositionManagementConfig::default(),
            risk_config,
        );
        let mut evaluation = evaluation_with_atr(dec!(50_000));
        evaluation.market_conditions.clear();
        let result = calc
            .calculate(&evaluation, "BTC/JPY", Side::Buy, dec!(13_600_000), None)
            .await
            .unwrap();
        assert!(result.stop_loss < dec!(13_600_000));
    }

    #[test]
    fn fixed_amount_take_profit_solves_for_target_net() {
        let calc = calculator();
        let mut config = PositionManagementConfig::default();
        config.take_profit.fixed_amount.enabled = true;
        config.take_profit.fixed_amount.target_net_profit = dec!(1000);
        config.take_profit.fixed_amount.include_entry_fee = false;
        config.take_profit.fixed_amount.include_exit_fee_rebate = false;
        config.take_profit.fixed_amount.include_interest = false;
        let calc = TpSlCalculator::new(Arc::new(MockExchangeClient::new()), config, RiskConfig::default());

        let tp = calc
            .fixed_amount_take_profit(Side::Buy, dec!(13_600_000), dec!(0.001), None, None, dec!(0.001))
            .unwrap();
        assert_eq!(tp, dec!(13_600_000) + dec!(1000) / dec!(0.001));
    }
}
