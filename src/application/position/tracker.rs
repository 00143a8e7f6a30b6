use crate::domain::ports::{MarginPositionSnapshot, PositionSide};
use crate::domain::trading::{Side, VirtualPosition};
use rust_decimal::Decimal;
use std::sync::RwLock;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TotalExposure {
    pub buy_notional: Decimal,
    pub sell_notional: Decimal,
    pub total: Decimal,
}

/// Order/SL ids cleaned up by the caller after `remove_with_cleanup`.
#[derive(Debug, Clone, PartialEq)]
pub struct CleanupHandles {
    pub tp_order_id: Option<String>,
    pub sl_order_id: Option<String>,
}

/// The sole owner of the bot's in-memory virtual positions. All mutation of
/// position fields goes through this typed API; callers never hold a
/// mutable reference to a `VirtualPosition` directly.
pub struct PositionTracker {
    positions: RwLock<Vec<VirtualPosition>>,
}

impl Default for PositionTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl PositionTracker {
    pub fn new() -> Self {
        Self {
            positions: RwLock::new(Vec::new()),
        }
    }

    pub fn add(&self, position: VirtualPosition) {
        info!(
            order_id = %position.order_id,
            side = %position.side,
            amount = %position.amount,
            price = %position.entry_price,
            strategy = %position.strategy_name,
            "tracking new virtual position"
        );
        self.positions.write().unwrap().push(position);
    }

    pub fn remove(&self, order_id: &str) -> Option<VirtualPosition> {
        let mut positions = self.positions.write().unwrap();
        let idx = positions.iter().position(|p| p.order_id == order_id)?;
        Some(positions.remove(idx))
    }

    pub fn remove_with_cleanup(&self, order_id: &str) -> Option<(VirtualPosition, CleanupHandles)> {
        let removed = self.remove(order_id)?;
        let handles = CleanupHandles {
            tp_order_id: removed.tp_order_id.clone(),
            sl_order_id: removed.sl_order_id.clone(),
        };
        Some((removed, handles))
    }

    pub fn find(&self, order_id: &str) -> Option<VirtualPosition> {
        self.positions
            .read()
            .unwrap()
            .iter()
            .find(|p| p.order_id == order_id)
            .cloned()
    }

    pub fn find_by_side(&self, side: Side) -> Vec<VirtualPosition> {
        self.positions
            .read()
            .unwrap()
            .iter()
            .filter(|p| p.side == side)
            .cloned()
            .collect()
    }

    pub fn get_all(&self) -> Vec<VirtualPosition> {
        self.positions.read().unwrap().clone()
    }

    pub fn count(&self) -> usize {
        self.positions.read().unwrap().len()
    }

    pub fn total_exposure(&self, mark_price: Decimal) -> TotalExposure {
        let positions = self.positions.read().unwrap();
        let mut buy_notional = Decimal::ZERO;
        let mut sell_notional = Decimal::ZERO;
        for position in positions.iter() {
            let notional = position.notional(mark_price);
            match position.side {
                Side::Buy => buy_notional += notional,
                Side::Sell => sell_notional += notional,
            }
        }
        TotalExposure {
            buy_notional,
            sell_notional,
            total: buy_notional + sell_notional,
        }
    }

    /// Partial update of the TP/SL order ids tracked against a position.
    /// Returns `false` if no position with that order_id is tracked.
    pub fn update_tpsl(&self, order_id: &str, tp_id: Option<String>, sl_id: Option<String>) -> bool {
        let mut positions = self.positions.write().unwrap();
        let Some(position) = positions.iter_mut().find(|p| p.order_id == order_id) else {
            return false;
        };
        if let Some(tp_id) = tp_id {
            position.tp_order_id = Some(tp_id);
        }
        if let Some(sl_id) = sl_id {
            position.sl_order_id = Some(sl_id);
            position.sl_placed_at = Some(chrono::Utc::now());
        }
        true
    }

    /// Positions in the registry whose side has no matching open position
    /// at the exchange. Matching is side-equal and the exchange reports a
    /// nonzero amount on that side; per-record amount reconciliation is not
    /// required.
    pub fn get_orphaned_positions(&self, actual: &[MarginPositionSnapshot]) -> Vec<VirtualPosition> {
        let has_side = |side: Side| {
            let wanted = match side {
                Side::Buy => PositionSide::Long,
                Side::Sell => PositionSide::Short,
            };
            actual
                .iter()
                .any(|p| p.side == wanted && p.amount > Decimal::ZERO)
        };

        self.positions
            .read()
            .unwrap()
            .iter()
            .filter(|p| !has_side(p.side))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn position(order_id: &str, side: Side) -> VirtualPosition {
        VirtualPosition::new(order_id, side, dec!(1), dec!(100), Utc::now(), None, None, "s").unwrap()
    }

    #[test]
    fn add_and_find_round_trips() {
        let tracker = PositionTracker::new();
        tracker.add(position("1", Side::Buy));
        assert!(tracker.find("1").is_some());
        assert_eq!(tracker.count(), 1);
    }

    #[test]
    fn remove_with_cleanup_returns_tp_sl_handles() {
        let tracker = PositionTracker::new();
        tracker.add(position("1", Side::Buy));
        tracker.update_tpsl("1", Some("tp-1".to_string()), Some("sl-1".to_string()));
        let (_, handles) = tracker.remove_with_cleanup("1").unwrap();
        assert_eq!(handles.tp_order_id, Some("tp-1".to_string()));
        assert_eq!(handles.sl_order_id, Some("sl-1".to_string()));
        assert_eq!(tracker.count(), 0);
    }

    #[test]
    fn total_exposure_separates_buy_and_sell() {
        let tracker = PositionTracker::new();
        tracker.add(position("1", Side::Buy));
        tracker.add(position("2", Side::Sell));
        let exposure = tracker.total_exposure(dec!(100));
        assert_eq!(exposure.buy_notional, dec!(100));
        assert_eq!(exposure.sell_notional, dec!(100));
        assert_eq!(exposure.total, dec!(200));
    }

    #[test]
    fn orphaned_positions_have_no_matching_exchange_side() {
        let tracker = PositionTracker::new();
        tracker.add(position("1", Side::Buy));
        tracker.add(position("2", Side::Sell));

        let actual = vec![MarginPositionSnapshot {
            side: PositionSide::Long,
            amount: dec!(1),
        }];

        let orphans = tracker.get_orphaned_positions(&actual);
        assert_eq!(orphans.len(), 1);
        assert_eq!(orphans[0].order_id, "2");
    }
}
