use super::types::{Regime, Side};
use rust_decimal::Decimal;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Approved,
    Denied,
    Conditional,
}

/// Transient input describing a proposed trade, produced upstream by an
/// opaque strategy/signal generator. The execution core never re-derives
/// `side`/`confidence_level`; it only consumes them.
#[derive(Debug, Clone)]
pub struct TradeEvaluation {
    pub decision: Decision,
    pub side: Option<Side>,
    pub position_size: Decimal,
    pub entry_price: Option<Decimal>,
    pub stop_loss: Option<Decimal>,
    pub take_profit: Option<Decimal>,
    pub confidence_level: f64,
    pub strategy_name: String,
    pub regime: Option<Regime>,
    pub symbol: String,
    /// Indicator snapshots keyed `"{timeframe}:{indicator}"`, e.g.
    /// `"15m:atr_14"`, `"4h:adx_14"`, `"4h:ema_20"`.
    pub market_conditions: HashMap<String, Decimal>,
}

impl TradeEvaluation {
    pub fn is_actionable(&self) -> bool {
        self.side.is_some() && self.decision != Decision::Denied
    }

    pub fn indicator(&self, timeframe: &str, name: &str) -> Option<Decimal> {
        self.market_conditions
            .get(&format!("{timeframe}:{name}"))
            .copied()
    }
}
