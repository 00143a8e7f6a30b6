use crate::application::balance::BalanceMonitor;
use crate::application::execution::atomic_entry_manager::AtomicEntryManager;
use crate::application::execution::order_strategy::OrderStrategy;
use crate::application::execution::tp_sl_calculator::TpSlCalculator;
use crate::application::position::{PositionLimits, PositionTracker, ProposedTrade};
use crate::application::resilience::ResilienceManager;
use crate::config::PositionManagementConfig;
use crate::domain::ports::ExchangeClient;
use crate::domain::trading::{ExecutionMode, ExecutionResult, ExecutionStatus, TradeEvaluation, VirtualPosition};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

/// Top-level orchestrator (§4.13): runs admission, places the entry,
/// recomputes TP/SL off the real fill, and places protective orders
/// atomically, rolling the whole attempt back on any failure past entry.
pub struct ExecutionService {
    exchange: Arc<dyn ExchangeClient>,
    mode: ExecutionMode,
    balance_monitor: BalanceMonitor,
    position_limits: PositionLimits,
    order_strategy: OrderStrategy,
    tp_sl_calculator: TpSlCalculator,
    atomic_entry: AtomicEntryManager,
    tracker: Arc<PositionTracker>,
    position_config: PositionManagementConfig,
    resilience: Arc<ResilienceManager>,
    last_order_time: Mutex<Option<DateTime<Utc>>>,
    daily_trade_count: Mutex<usize>,
}

impl ExecutionService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        exchange: Arc<dyn ExchangeClient>,
        mode: ExecutionMode,
        balance_monitor: BalanceMonitor,
        position_limits: PositionLimits,
        order_strategy: OrderStrategy,
        tp_sl_calculator: TpSlCalculator,
        atomic_entry: AtomicEntryManager,
        tracker: Arc<PositionTracker>,
        position_config: PositionManagementConfig,
        resilience: Arc<ResilienceManager>,
    ) -> Self {
        Self {
            exchange,
            mode,
            balance_monitor,
            position_limits,
            order_strategy,
            tp_sl_calculator,
            atomic_entry,
            tracker,
            position_config,
            resilience,
            last_order_time: Mutex::new(None),
            daily_trade_count: Mutex::new(0),
        }
    }

    fn ensure_minimum_trade_size(&self, mut evaluation: TradeEvaluation) -> (TradeEvaluation, bool) {
        let is_minimum_lot = evaluation.position_size < self.position_config.min_trade_size;
        if is_minimum_lot {
            evaluation.position_size = self.position_config.min_trade_size;
        }
        (evaluation, is_minimum_lot)
    }

    /// Runs the full executeTrade sequence for one evaluation. Strictly
    /// sequential: admission gates, entry placement, TP/SL recompute off
    /// the real fill, tracker registration, then atomic protective-order
    /// placement with full rollback on failure.
    pub async fn execute_trade(
        &self,
        evaluation: TradeEvaluation,
        balance: Decimal,
        initial_balance: Decimal,
        fallback_price: Decimal,
    ) -> ExecutionResult {
        if !evaluation.is_actionable() {
            return ExecutionResult::cancelled(self.mode);
        }
        let Some(side) = evaluation.side else {
            return ExecutionResult::cancelled(self.mode);
        };

        if self.resilience.emergency_stop_active() {
            return ExecutionResult::rejected(self.mode, "emergency stop active, trading halted");
        }

        if self.mode.is_live() {
            let required = evaluation.position_size * evaluation.entry_price.unwrap_or(fallback_price);
            match self.balance_monitor.validate_margin(required).await {
                Ok(sufficiency) if !sufficiency.sufficient => {
                    return ExecutionResult::rejected(self.mode, "insufficient margin balance");
                }
                Err(e) => {
                    return ExecutionResult::rejected(self.mode, format!("margin check failed: {e}"));
                }
                Ok(_) => {}
            }

            let prediction = self
                .balance_monitor
                .predict_future_ratio(&evaluation.symbol, evaluation.position_size, evaluation.entry_price.unwrap_or(fallback_price))
                .await;
            if let Err(e) = self.balance_monitor.check_admission_floor(&prediction) {
                return ExecutionResult::rejected(self.mode, e.to_string());
            }
        }

        let (evaluation, is_minimum_lot) = self.ensure_minimum_trade_size(evaluation);
        let notional = evaluation.position_size * evaluation.entry_price.unwrap_or(fallback_price);
        let trade = ProposedTrade { notional, is_minimum_lot };

        let last_order_time = *self.last_order_time.lock().await;
        let daily_trade_count = *self.daily_trade_count.lock().await;
        if let Err(violation) = self.position_limits.check(
            &evaluation,
            trade,
            self.tracker.count(),
            daily_trade_count,
            last_order_time,
            balance,
            initial_balance,
            fallback_price,
        ) {
            return ExecutionResult::rejected(self.mode, violation.to_string());
        }

        let order_book = match self.exchange.fetch_order_book(&evaluation.symbol, None).await {
            Ok(book) => book,
            Err(e) => return ExecutionResult::failed(self.mode, format!("order book fetch failed: {e}")),
        };

        let entry_ack = match self
            .order_strategy
            .execute(&evaluation, &order_book, &evaluation.symbol, side, evaluation.position_size, false)
            .await
        {
            Ok(ack) => ack,
            Err(e) => return ExecutionResult::failed(self.mode, format!("entry placement failed: {e}")),
        };

        let fill_price = entry_ack.average.or(entry_ack.price).unwrap_or(fallback_price);
        let tp_sl = match self
            .tp_sl_calculator
            .calculate(&evaluation, &evaluation.symbol, side, fill_price, evaluation.regime.as_ref())
            .await
        {
            Ok(tp_sl) => tp_sl,
            Err(e) => {
                warn!("TP/SL recalculation aborted after fill: {}", e);
                return ExecutionResult::failed(self.mode, format!("TP/SL calculation failed: {e}"));
            }
        };

        let position = match VirtualPosition::new(
            entry_ack.id.clone(),
            side,
            evaluation.position_size,
            fill_price,
            Utc::now(),
            Some(tp_sl.take_profit),
            Some(tp_sl.stop_loss),
            evaluation.strategy_name.clone(),
        ) {
            Ok(p) => p,
            Err(e) => return ExecutionResult::failed(self.mode, format!("invalid position: {e}")),
        };
        self.tracker.add(position);

        self.atomic_entry.cleanup_old_tpsl(side, &evaluation.symbol, &self.tracker).await;

        match self
            .atomic_entry
            .place_protective_orders(&evaluation.symbol, side, &entry_ack.id, evaluation.position_size, tp_sl.take_profit, tp_sl.stop_loss)
            .await
        {
            Ok(result) => {
                self.tracker.update_tpsl(&entry_ack.id, Some(result.tp_order_id.clone()), Some(result.sl_order_id.clone()));
            }
            Err((e, outcome)) => {
                self.tracker.remove(&entry_ack.id);
                if outcome.manual_intervention_required {
                    error!(order_id = %entry_ack.id, "atomic entry rollback left an unhedged position, manual intervention required");
                }
                return ExecutionResult::failed(self.mode, format!("atomic TP/SL placement failed: {e}"));
            }
        }

        *self.last_order_time.lock().await = Some(Utc::now());
        *self.daily_trade_count.lock().await += 1;

        info!(order_id = %entry_ack.id, %side, price = %fill_price, "trade filled and protected");

        ExecutionResult {
            success: true,
            mode: self.mode,
            order_id: Some(entry_ack.id),
            filled_price: Some(fill_price),
            filled_amount: entry_ack.filled.or(Some(evaluation.position_size)),
            fee: entry_ack.fee,
            status: ExecutionStatus::Filled,
            error_message: None,
            pnl: None,
        }
    }

    pub fn tracker(&self) -> &Arc<PositionTracker> {
        &self.tracker
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::position::CooldownManager;
    use crate::config::{CleanupConfig, MarginConfig, OrderExecutionConfig, RiskConfig};
    use crate::domain::ports::{OrderBookLevel, OrderState};
    use crate::domain::trading::{Decision, OrderStatus, Side};
    use crate::infrastructure::exchange::MockExchangeClient;
    use rust_decimal_macros::dec;
    use std::collections::HashMap;

    fn approved_evaluation() -> TradeEvaluation {
        let mut market_conditions = HashMap::new();
        market_conditions.insert("15m:atr_14".to_string(), dec!(50_000));
        TradeEvaluation {
            decision: Decision::Approved,
            side: Some(Side::Buy),
            position_size: dec!(0.001),
            entry_price: Some(dec!(13_600_000)),
            stop_loss: None,
            take_profit: None,
            confidence_level: 0.8,
            strategy_name: "s".to_string(),
            regime: None,
            symbol: "BTC/JPY".to_string(),
            market_conditions,
        }
    }

    fn service(mock: Arc<MockExchangeClient>) -> ExecutionService {
        service_with_resilience(mock, Arc::new(ResilienceManager::new()))
    }

    fn service_with_resilience(mock: Arc<MockExchangeClient>, resilience: Arc<ResilienceManager>) -> ExecutionService {
        let position_config = PositionManagementConfig::default();
        let tracker = Arc::new(PositionTracker::new());
        ExecutionService::new(
            mock.clone(),
            ExecutionMode::Paper,
            BalanceMonitor::new(mock.clone(), MarginConfig::default(), dec!(80), false),
            PositionLimits::new(position_config.clone(), CooldownManager::new(true, true, None)),
            OrderStrategy::new(mock.clone(), OrderExecutionConfig::default()),
            TpSlCalculator::new(mock.clone(), position_config.clone(), RiskConfig::default()),
            AtomicEntryManager::new(mock, CleanupConfig::default()),
            tracker,
            position_config,
            resilience,
        )
    }

    #[tokio::test]
    async fn cancelled_when_no_side() {
        let mock = Arc::new(MockExchangeClient::new());
        let service = service(mock);
        let mut evaluation = approved_evaluation();
        evaluation.side = None;
        let result = service.execute_trade(evaluation, dec!(100_000), dec!(100_000), dec!(13_600_000)).await;
        assert_eq!(result.status, ExecutionStatus::Cancelled);
    }

    #[tokio::test]
    async fn fills_and_tracks_position_on_success() {
        let mock = Arc::new(MockExchangeClient::new());
        *mock.ticker_price.lock().await = dec!(13_600_000);
        *mock.order_book.lock().await = crate::domain::ports::OrderBook {
            bids: vec![OrderBookLevel { price: dec!(13_599_000), quantity: dec!(1) }],
            asks: vec![OrderBookLevel { price: dec!(13_601_000), quantity: dec!(1) }],
        };
        let service = service(mock);
        let result = service.execute_trade(approved_evaluation(), dec!(100_000), dec!(100_000), dec!(13_600_000)).await;
        assert_eq!(result.status, ExecutionStatus::Filled);
        assert_eq!(service.tracker().count(), 1);
    }

    #[tokio::test]
    async fn rejected_when_position_limits_deny() {
        let mock = Arc::new(MockExchangeClient::new());
        let service = service(mock);
        let result = service.execute_trade(approved_evaluation(), dec!(1), dec!(1), dec!(13_600_000)).await;
        assert_eq!(result.status, ExecutionStatus::Rejected);
    }

    #[tokio::test]
    async fn rejected_with_emergency_stop_message_once_latch_is_set() {
        use crate::domain::resilience::Severity;

        let mock = Arc::new(MockExchangeClient::new());
        let resilience = Arc::new(ResilienceManager::new());
        for _ in 0..3 {
            resilience.record_error("market_data_fetcher", "connection_refused", "CONN refused", Severity::Critical);
        }
        assert!(resilience.emergency_stop_active());

        let service = service_with_resilience(mock, resilience);
        let result = service.execute_trade(approved_evaluation(), dec!(100_000), dec!(100_000), dec!(13_600_000)).await;
        assert_eq!(result.status, ExecutionStatus::Rejected);
        assert!(result.error_message.unwrap_or_default().contains("emergency stop"));
        assert_eq!(service.tracker().count(), 0);
    }

    #[allow(dead_code)]
    fn unused_order_state() -> OrderState {
        OrderState {
            id: "unused".to_string(),
            status: OrderStatus::Open,
            filled: dec!(0),
            average: None,
            price: None,
            amount: dec!(0),
            created_at: chrono::Utc::now(),
        }
    }
}
