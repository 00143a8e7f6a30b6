use crate::application::position::tracker::PositionTracker;
use crate::config::{CleanupConfig, EmergencyStopLossConfig, FeesConfig, StopLossConfig};
use crate::domain::ports::{ExchangeClient, NewOrder, OrderState};
use crate::domain::trading::{OrderStatus, OrderType, Side, VirtualPosition};
use crate::infrastructure::persistence::orphan_journal::OrphanSlJournal;
use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Safety margin applied around the SL price when verifying a timed-out
/// native stop before falling back to a bot-side market exit (§4.12).
const SL_TIMEOUT_SAFETY_MARGIN: Decimal = dec!(0.015);

#[derive(Debug, Clone, PartialEq)]
pub enum StopCheckOutcome {
    TakeProfitHit { order_id: String, exit_price: Decimal },
    StopLossFallbackTriggered { order_id: String, exit_price: Decimal },
    EmergencyExit { order_id: String, exit_price: Decimal },
    NoAction,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AutoExecution {
    pub order_id: String,
    pub realized_pnl: Decimal,
    pub via: AutoExecutionKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutoExecutionKind {
    TakeProfit,
    StopLoss,
}

/// Runtime monitoring loop owner (§4.12): per-tick TP/SL/emergency checks,
/// exchange-triggered auto-execution reconciliation, orphan-SL journaling,
/// and stale-order cleanup.
pub struct StopManager {
    exchange: Arc<dyn ExchangeClient>,
    stop_loss_config: StopLossConfig,
    emergency_config: EmergencyStopLossConfig,
    fees: FeesConfig,
    journal: OrphanSlJournal,
    cleanup_config: CleanupConfig,
}

impl StopManager {
    pub fn new(
        exchange: Arc<dyn ExchangeClient>,
        stop_loss_config: StopLossConfig,
        emergency_config: EmergencyStopLossConfig,
        fees: FeesConfig,
        journal: OrphanSlJournal,
        cleanup_config: CleanupConfig,
    ) -> Self {
        Self {
            exchange,
            stop_loss_config,
            emergency_config,
            fees,
            journal,
            cleanup_config,
        }
    }

    fn favorable_cross(side: Side, target: Decimal, price: Decimal) -> bool {
        match side {
            Side::Buy => price >= target,
            Side::Sell => price <= target,
        }
    }

    fn unfavorable_cross(side: Side, target: Decimal, price: Decimal) -> bool {
        match side {
            Side::Buy => price <= target,
            Side::Sell => price >= target,
        }
    }

    fn unrealized_loss_ratio(position: &VirtualPosition, price: Decimal) -> Decimal {
        if position.entry_price <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        let signed_move = match position.side {
            Side::Buy => price - position.entry_price,
            Side::Sell => position.entry_price - price,
        };
        (-signed_move / position.entry_price).max(Decimal::ZERO)
    }

    /// Evaluates one tracked position against the current price. Does not
    /// place the exit order itself — the caller (ExecutionService) owns
    /// order placement so this stays a pure decision plus a single
    /// exchange status check for the SL-timeout tier.
    pub async fn check_position(&self, position: &VirtualPosition, symbol: &str, current_price: Decimal) -> StopCheckOutcome {
        if let Some(tp) = position.take_profit
            && Self::favorable_cross(position.side, tp, current_price)
        {
            return StopCheckOutcome::TakeProfitHit {
                order_id: position.order_id.clone(),
                exit_price: current_price,
            };
        }

        if let Some(sl) = position.stop_loss {
            let native_sl_active = position.sl_order_id.is_some() && self.stop_loss_config.skip_bot_monitoring;

            if !native_sl_active {
                if Self::unfavorable_cross(position.side, sl, current_price) {
                    return StopCheckOutcome::StopLossFallbackTriggered {
                        order_id: position.order_id.clone(),
                        exit_price: current_price,
                    };
                }
            } else if let Some(placed_at) = position.sl_placed_at {
                let elapsed = (Utc::now() - placed_at).num_seconds();
                if elapsed > self.stop_loss_config.stop_limit_timeout {
                    if self.native_sl_confirmed_stuck(position).await
                        && self.price_inside_sl_zone(position.side, sl, current_price)
                    {
                        warn!(order_id = %position.order_id, %symbol, "native SL timed out and unconfirmed, falling back to market exit");
                        return StopCheckOutcome::StopLossFallbackTriggered {
                            order_id: position.order_id.clone(),
                            exit_price: current_price,
                        };
                    }
                }
            }
        }

        if self.emergency_config.enable {
            let held_minutes = (Utc::now() - position.timestamp).num_minutes();
            if held_minutes >= self.emergency_config.min_hold_minutes
                && Self::unrealized_loss_ratio(position, current_price) > Decimal::from_f64_retain(self.emergency_config.max_loss_threshold).unwrap_or(Decimal::MAX)
            {
                return StopCheckOutcome::EmergencyExit {
                    order_id: position.order_id.clone(),
                    exit_price: current_price,
                };
            }
        }

        StopCheckOutcome::NoAction
    }

    /// Only falls back to a bot-side exit when the exchange confirms the
    /// native SL is in neither an open, closed, nor cancelled state —
    /// protects against spurious fallback during a transient API blip.
    async fn native_sl_confirmed_stuck(&self, position: &VirtualPosition) -> bool {
        let Some(sl_id) = &position.sl_order_id else {
            return false;
        };
        match self.exchange.fetch_order(sl_id, "").await {
            Ok(state) => !matches!(state.status, OrderStatus::Open | OrderStatus::Closed | OrderStatus::Canceled),
            Err(e) => {
                warn!(order_id = %sl_id, "SL status check failed during timeout verification: {}", e);
                false
            }
        }
    }

    fn price_inside_sl_zone(&self, side: Side, sl: Decimal, price: Decimal) -> bool {
        let margin = sl * SL_TIMEOUT_SAFETY_MARGIN;
        match side {
            Side::Buy => price <= sl + margin,
            Side::Sell => price >= sl - margin,
        }
    }

    fn realized_pnl(&self, side: Side, entry: Decimal, exit: Decimal, amount: Decimal) -> Decimal {
        let gross = match side {
            Side::Buy => (exit - entry) * amount,
            Side::Sell => (entry - exit) * amount,
        };
        let entry_fee = entry * amount * Decimal::from_f64_retain(self.fees.entry_taker_rate).unwrap_or(Decimal::ZERO);
        let exit_fee = exit * amount * Decimal::from_f64_retain(self.fees.exit_taker_rate).unwrap_or(Decimal::ZERO);
        gross - entry_fee - exit_fee
    }

    /// Reconciles tracker state against the exchange's open positions,
    /// detecting TP/SL orders the exchange filled on its own. Cancels the
    /// surviving sibling and journals a failed cancel for later retry.
    pub async fn detect_auto_executions(&self, tracker: &PositionTracker, symbol: &str) -> Vec<AutoExecution> {
        let actual = self.exchange.fetch_margin_positions(symbol).await.unwrap_or_default();
        let disappeared = tracker.get_orphaned_positions(&actual);
        let mut results = Vec::new();

        for position in disappeared {
            let tp_closed = match &position.tp_order_id {
                Some(id) => matches!(self.exchange.fetch_order(id, symbol).await, Ok(s) if s.status == OrderStatus::Closed),
                None => false,
            };
            let sl_closed = match &position.sl_order_id {
                Some(id) => matches!(self.exchange.fetch_order(id, symbol).await, Ok(s) if s.status == OrderStatus::Closed),
                None => false,
            };

            let (kind, exit_price, sibling) = if tp_closed {
                let exit_price = position.take_profit.unwrap_or(position.entry_price);
                (AutoExecutionKind::TakeProfit, exit_price, position.sl_order_id.clone())
            } else if sl_closed {
                let exit_price = position.stop_loss.unwrap_or(position.entry_price);
                (AutoExecutionKind::StopLoss, exit_price, position.tp_order_id.clone())
            } else {
                continue;
            };

            if let Some(sibling_id) = sibling {
                self.cancel_sibling(&sibling_id, symbol).await;
            }

            let pnl = self.realized_pnl(position.side, position.entry_price, exit_price, position.amount);
            tracker.remove(&position.order_id);
            info!(order_id = %position.order_id, ?kind, %pnl, "detected exchange-triggered TP/SL auto-execution");

            results.push(AutoExecution {
                order_id: position.order_id.clone(),
                realized_pnl: pnl,
                via: kind,
            });
        }

        results
    }

    async fn cancel_sibling(&self, order_id: &str, symbol: &str) {
        match self.exchange.cancel_order(order_id, symbol).await {
            Ok(()) => {}
            Err(crate::domain::errors::MarketDataError::OrderNotFound { .. }) => {}
            Err(e) => {
                warn!(order_id, "sibling cancel failed, journaling for retry: {}", e);
                self.journal.record(order_id, &e.to_string()).await;
            }
        }
    }

    /// Cancels a position's surviving TP and SL orders after a bot-triggered
    /// market exit closed the position out from underneath them. A cancel
    /// failure here is journaled as an orphan so `drain_orphan_journal`
    /// retries it on the next startup (§4.12).
    pub async fn cancel_protective_orders(&self, handles: &crate::application::position::tracker::CleanupHandles, symbol: &str) {
        if let Some(tp_id) = &handles.tp_order_id {
            self.cancel_sibling(tp_id, symbol).await;
        }
        if let Some(sl_id) = &handles.sl_order_id {
            self.cancel_sibling(sl_id, symbol).await;
        }
    }

    /// Runs the startup drain routine: retries every pending orphan-SL
    /// cancel once and removes it from the journal on success.
    pub async fn drain_orphan_journal(&self, symbol: &str) {
        for record in self.journal.pending().await {
            match self.exchange.cancel_order(&record.sl_order_id, symbol).await {
                Ok(()) => {
                    self.journal.remove(&record.sl_order_id).await;
                    info!(order_id = %record.sl_order_id, "orphan SL cancel succeeded on retry, journal entry cleared");
                }
                Err(crate::domain::errors::MarketDataError::OrderNotFound { .. }) => {
                    self.journal.remove(&record.sl_order_id).await;
                }
                Err(e) => warn!(order_id = %record.sl_order_id, "orphan SL still uncancellable: {}", e),
            }
        }
    }

    /// Cancels orders older than `cleanup_config.max_age_hours` once the
    /// active-order count exceeds `cleanup_config.threshold_count`, skipping
    /// anything still referenced as a live position's TP/SL (§4.12, §6
    /// `position_management.cleanup`).
    pub async fn cleanup_stale_orders(&self, tracker: &PositionTracker, symbol: &str) {
        let candidates = match self.exchange.fetch_active_orders(symbol, 100).await {
            Ok(orders) => orders,
            Err(e) => {
                warn!(%symbol, "stale order cleanup: fetch_active_orders failed: {}", e);
                return;
            }
        };
        if candidates.len() <= self.cleanup_config.threshold_count {
            return;
        }
        let protected: std::collections::HashSet<String> = tracker
            .get_all()
            .into_iter()
            .flat_map(|p| [p.tp_order_id, p.sl_order_id])
            .flatten()
            .collect();

        let cutoff = Utc::now() - chrono::Duration::hours(self.cleanup_config.max_age_hours);
        for order in &candidates {
            if protected.contains(&order.id) || order.created_at >= cutoff || order.status != OrderStatus::Open {
                continue;
            }
            match self.exchange.cancel_order(&order.id, symbol).await {
                Ok(()) => info!(order_id = %order.id, "cancelled stale unfilled order"),
                Err(crate::domain::errors::MarketDataError::OrderNotFound { .. }) => {}
                Err(e) => warn!(order_id = %order.id, "stale order cleanup cancel failed: {}", e),
            }
        }
    }

    pub async fn place_market_exit(&self, symbol: &str, side: Side, amount: Decimal) -> Result<String, crate::domain::errors::TradingError> {
        self.exchange
            .create_order(NewOrder {
                symbol: symbol.to_string(),
                side: side.opposite(),
                order_type: OrderType::Market,
                amount,
                price: None,
                post_only: false,
                trigger_price: None,
                is_closing_order: true,
                entry_position_side: None,
            })
            .await
            .map(|ack| ack.id)
            .map_err(|e| crate::domain::errors::TradingError::ExecutionFailed { reason: e.to_string() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::exchange::MockExchangeClient;
    use rust_decimal_macros::dec;

    fn manager(mock: Arc<MockExchangeClient>) -> StopManager {
        StopManager::new(
            mock,
            StopLossConfig::default(),
            EmergencyStopLossConfig::default(),
            FeesConfig::default(),
            OrphanSlJournal::new(std::env::temp_dir().join(format!("stopmgr-test-{}.json", uuid::Uuid::new_v4()))),
            CleanupConfig::default(),
        )
    }

    fn position(side: Side, tp: Option<Decimal>, sl: Option<Decimal>) -> VirtualPosition {
        VirtualPosition::new("pos-1", side, dec!(0.001), dec!(13_600_000), Utc::now(), tp, sl, "s").unwrap()
    }

    #[tokio::test]
    async fn buy_take_profit_crossed_triggers_tp_hit() {
        let mock = Arc::new(MockExchangeClient::new());
        let manager = manager(mock);
        let pos = position(Side::Buy, Some(dec!(13_700_000)), Some(dec!(13_500_000)));
        let outcome = manager.check_position(&pos, "BTC/JPY", dec!(13_750_000)).await;
        assert_eq!(
            outcome,
            StopCheckOutcome::TakeProfitHit {
                order_id: "pos-1".to_string(),
                exit_price: dec!(13_750_000)
            }
        );
    }

    #[tokio::test]
    async fn buy_stop_loss_crossed_without_native_order_triggers_fallback() {
        let mock = Arc::new(MockExchangeClient::new());
        let mut stop_loss_config = StopLossConfig::default();
        stop_loss_config.skip_bot_monitoring = false;
        let manager = StopManager::new(
            mock,
            stop_loss_config,
            EmergencyStopLossConfig::default(),
            FeesConfig::default(),
            OrphanSlJournal::new(std::env::temp_dir().join(format!("stopmgr-test-{}.json", uuid::Uuid::new_v4()))),
            CleanupConfig::default(),
        );
        let pos = position(Side::Buy, Some(dec!(13_700_000)), Some(dec!(13_500_000)));
        let outcome = manager.check_position(&pos, "BTC/JPY", dec!(13_400_000)).await;
        assert_eq!(
            outcome,
            StopCheckOutcome::StopLossFallbackTriggered {
                order_id: "pos-1".to_string(),
                exit_price: dec!(13_400_000)
            }
        );
    }

    #[tokio::test]
    async fn native_sl_present_skips_bot_side_trigger() {
        let mock = Arc::new(MockExchangeClient::new());
        let manager = manager(mock);
        let mut pos = position(Side::Buy, Some(dec!(13_700_000)), Some(dec!(13_500_000)));
        pos.sl_order_id = Some("native-sl".to_string());
        pos.sl_placed_at = Some(Utc::now());
        let outcome = manager.check_position(&pos, "BTC/JPY", dec!(13_400_000)).await;
        assert_eq!(outcome, StopCheckOutcome::NoAction);
    }

    #[tokio::test]
    async fn no_action_when_price_between_tp_and_sl() {
        let mock = Arc::new(MockExchangeClient::new());
        let manager = manager(mock);
        let pos = position(Side::Buy, Some(dec!(13_700_000)), Some(dec!(13_500_000)));
        let outcome = manager.check_position(&pos, "BTC/JPY", dec!(13_600_000)).await;
        assert_eq!(outcome, StopCheckOutcome::NoAction);
    }

    #[test]
    fn realized_pnl_applies_both_leg_fees() {
        let mock = Arc::new(MockExchangeClient::new());
        let manager = manager(mock);
        let pnl = manager.realized_pnl(Side::Buy, dec!(13_000_000), dec!(13_500_000), dec!(0.001));
        let gross = dec!(500);
        assert!(pnl < gross);
        assert!(pnl > dec!(490));
    }

    #[tokio::test]
    async fn place_market_exit_sends_opposite_side_closing_order() {
        let mock = Arc::new(MockExchangeClient::new());
        *mock.ticker_price.lock().await = dec!(13_600_000);
        let manager = manager(mock);
        let order_id = manager.place_market_exit("BTC/JPY", Side::Buy, dec!(0.001)).await.unwrap();
        assert!(!order_id.is_empty());
    }

    #[tokio::test]
    async fn cancel_protective_orders_cancels_both_legs() {
        let mock = Arc::new(MockExchangeClient::new());
        mock.seed_order(
            "tp-1",
            OrderState {
                id: "tp-1".to_string(),
                status: OrderStatus::Open,
                filled: dec!(0),
                average: None,
                price: Some(dec!(13_700_000)),
                amount: dec!(0.001),
                created_at: Utc::now(),
            },
        )
        .await;
        mock.seed_order(
            "sl-1",
            OrderState {
                id: "sl-1".to_string(),
                status: OrderStatus::Open,
                filled: dec!(0),
                average: None,
                price: Some(dec!(13_500_000)),
                amount: dec!(0.001),
                created_at: Utc::now(),
            },
        )
        .await;
        let manager = manager(mock.clone());
        let handles = crate::application::position::tracker::CleanupHandles {
            tp_order_id: Some("tp-1".to_string()),
            sl_order_id: Some("sl-1".to_string()),
        };
        manager.cancel_protective_orders(&handles, "BTC/JPY").await;
        let tp = mock.fetch_order("tp-1", "BTC/JPY").await.unwrap();
        let sl = mock.fetch_order("sl-1", "BTC/JPY").await.unwrap();
        assert_eq!(tp.status, OrderStatus::Canceled);
        assert_eq!(sl.status, OrderStatus::Canceled);
    }

    fn manager_with_cleanup(mock: Arc<MockExchangeClient>, cleanup_config: CleanupConfig) -> StopManager {
        StopManager::new(
            mock,
            StopLossConfig::default(),
            EmergencyStopLossConfig::default(),
            FeesConfig::default(),
            OrphanSlJournal::new(std::env::temp_dir().join(format!("stopmgr-test-{}.json", uuid::Uuid::new_v4()))),
            cleanup_config,
        )
    }

    async fn seed_aged_order(mock: &MockExchangeClient, id: &str, age_hours: i64) {
        mock.seed_order(
            id,
            OrderState {
                id: id.to_string(),
                status: OrderStatus::Open,
                filled: dec!(0),
                average: None,
                price: Some(dec!(13_000_000)),
                amount: dec!(0.001),
                created_at: Utc::now() - chrono::Duration::hours(age_hours),
            },
        )
        .await;
    }

    #[tokio::test]
    async fn cleanup_stale_orders_below_threshold_does_nothing() {
        let mock = Arc::new(MockExchangeClient::new());
        seed_aged_order(&mock, "old-1", 48).await;
        seed_aged_order(&mock, "old-2", 48).await;
        let manager = manager_with_cleanup(mock.clone(), CleanupConfig { max_age_hours: 24, threshold_count: 2 });

        manager.cleanup_stale_orders(&PositionTracker::new(), "BTC/JPY").await;

        let o1 = mock.fetch_order("old-1", "BTC/JPY").await.unwrap();
        assert_eq!(o1.status, OrderStatus::Open);
    }

    #[tokio::test]
    async fn cleanup_stale_orders_cancels_aged_unprotected_orders_above_threshold() {
        let mock = Arc::new(MockExchangeClient::new());
        seed_aged_order(&mock, "old-unprotected", 48).await;
        seed_aged_order(&mock, "old-protected", 48).await;
        seed_aged_order(&mock, "young", 1).await;
        let manager = manager_with_cleanup(mock.clone(), CleanupConfig { max_age_hours: 24, threshold_count: 2 });

        let tracker = PositionTracker::new();
        let position = VirtualPosition::new("tracked-1", Side::Buy, dec!(0.001), dec!(13_000_000), Utc::now(), None, None, "s").unwrap();
        tracker.add(position);
        tracker.update_tpsl("tracked-1", Some("old-protected".to_string()), None);

        manager.cleanup_stale_orders(&tracker, "BTC/JPY").await;

        let unprotected = mock.fetch_order("old-unprotected", "BTC/JPY").await.unwrap();
        let protected = mock.fetch_order("old-protected", "BTC/JPY").await.unwrap();
        let young = mock.fetch_order("young", "BTC/JPY").await.unwrap();
        assert_eq!(unprotected.status, OrderStatus::Canceled);
        assert_eq!(protected.status, OrderStatus::Open);
        assert_eq!(young.status, OrderStatus::Open);
    }
}
