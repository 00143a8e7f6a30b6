use super::types::ExecutionMode;
use rust_decimal::Decimal;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionStatus {
    Pending,
    Submitted,
    Filled,
    Cancelled,
    Failed,
    Rejected,
}

/// Outcome of a single placement attempt. This is the only surface
/// `ExecutionService` exposes to its caller — failures never propagate as
/// exceptions/panics once past the admission gates.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub success: bool,
    pub mode: ExecutionMode,
    pub order_id: Option<String>,
    pub filled_price: Option<Decimal>,
    pub filled_amount: Option<Decimal>,
    pub fee: Option<Decimal>,
    pub status: ExecutionStatus,
    pub error_message: Option<String>,
    pub pnl: Option<Decimal>,
}

impl ExecutionResult {
    pub fn rejected(mode: ExecutionMode, reason: impl Into<String>) -> Self {
        Self {
            success: false,
            mode,
            order_id: None,
            filled_price: None,
            filled_amount: None,
            fee: None,
            status: ExecutionStatus::Rejected,
            error_message: Some(reason.into()),
            pnl: None,
        }
    }

    pub fn failed(mode: ExecutionMode, reason: impl Into<String>) -> Self {
        Self {
            success: false,
            mode,
            order_id: None,
            filled_price: None,
            filled_amount: None,
            fee: None,
            status: ExecutionStatus::Failed,
            error_message: Some(reason.into()),
            pnl: None,
        }
    }

    pub fn cancelled(mode: ExecutionMode) -> Self {
        Self {
            success: true,
            mode,
            order_id: None,
            filled_price: None,
            filled_amount: None,
            fee: None,
            status: ExecutionStatus::Cancelled,
            error_message: None,
            pnl: None,
        }
    }
}
