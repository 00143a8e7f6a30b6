use super::types::Side;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

/// The bot's in-memory view of an open position, paired with the exchange's
/// authoritative view by `order_id` and side.
///
/// Invariants (checked in `new`): `amount` and `entry_price` are positive;
/// if `stop_loss` is set on a buy it is below `entry_price` (mirrored for
/// sell).
#[derive(Debug, Clone, PartialEq)]
pub struct VirtualPosition {
    pub order_id: String,
    pub side: Side,
    pub amount: Decimal,
    pub entry_price: Decimal,
    pub timestamp: DateTime<Utc>,
    pub take_profit: Option<Decimal>,
    pub stop_loss: Option<Decimal>,
    pub tp_order_id: Option<String>,
    pub sl_order_id: Option<String>,
    pub sl_placed_at: Option<DateTime<Utc>>,
    pub strategy_name: String,
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum PositionInvariantError {
    #[error("amount must be positive, got {0}")]
    NonPositiveAmount(Decimal),
    #[error("entry_price must be positive, got {0}")]
    NonPositiveEntryPrice(Decimal),
    #[error("stop_loss {stop_loss} must be on the losing side of entry_price {entry_price} for a {side}")]
    StopLossWrongSide {
        side: Side,
        entry_price: Decimal,
        stop_loss: Decimal,
    },
}

impl VirtualPosition {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        order_id: impl Into<String>,
        side: Side,
        amount: Decimal,
        entry_price: Decimal,
        timestamp: DateTime<Utc>,
        take_profit: Option<Decimal>,
        stop_loss: Option<Decimal>,
        strategy_name: impl Into<String>,
    ) -> Result<Self, PositionInvariantError> {
        if amount <= Decimal::ZERO {
            return Err(PositionInvariantError::NonPositiveAmount(amount));
        }
        if entry_price <= Decimal::ZERO {
            return Err(PositionInvariantError::NonPositiveEntryPrice(entry_price));
        }
        if let Some(sl) = stop_loss {
            let valid = match side {
                Side::Buy => sl < entry_price,
                Side::Sell => sl > entry_price,
            };
            if !valid {
                return Err(PositionInvariantError::StopLossWrongSide {
                    side,
                    entry_price,
                    stop_loss: sl,
                });
            }
        }

        Ok(Self {
            order_id: order_id.into(),
            side,
            amount,
            entry_price,
            timestamp,
            take_profit,
            stop_loss,
            tp_order_id: None,
            sl_order_id: None,
            sl_placed_at: None,
            strategy_name: strategy_name.into(),
        })
    }

    /// Notional value of this position at the given mark price.
    pub fn notional(&self, mark_price: Decimal) -> Decimal {
        self.amount * mark_price
    }
}
