use rust_decimal::Decimal;
use thiserror::Error;

/// Errors raised while placing, filling, or reconciling exchange orders.
#[derive(Debug, Error)]
pub enum TradingError {
    #[error("insufficient funds: need {need}, available {available}")]
    InsufficientFunds { need: Decimal, available: Decimal },

    #[error("position not found: {order_id}")]
    PositionNotFound { order_id: String },

    #[error("invalid order: {reason}")]
    InvalidOrder { reason: String },

    #[error("order execution failed: {reason}")]
    ExecutionFailed { reason: String },

    #[error("trigger price required for stop order on {symbol}")]
    TriggerPriceRequired { symbol: String },

    #[error("position missing or already closed: {symbol}")]
    PositionMissing { symbol: String },
}

/// Errors surfaced by the admission-control gates in `PositionLimits`.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum LimitViolation {
    #[error("balance {balance} below minimum {minimum}")]
    MinimumBalance { balance: Decimal, minimum: Decimal },

    #[error("cooldown active: {elapsed_secs}s elapsed of {cooldown_secs}s")]
    Cooldown {
        elapsed_secs: i64,
        cooldown_secs: i64,
    },

    #[error("max open positions reached for regime {regime}: {count}/{limit}")]
    MaxOpenPositions {
        regime: String,
        count: usize,
        limit: usize,
    },

    #[error("capital usage limit breached: {used_pct:.2}% >= {limit_pct:.2}%")]
    CapitalUsage { used_pct: f64, limit_pct: f64 },

    #[error("daily trade count limit reached: {count}/{limit}")]
    DailyTradeCount { count: usize, limit: usize },
}

/// Errors related to margin / balance monitoring.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum MarginError {
    #[error("margin check auth failure, retry {attempt}/{max_retries}")]
    AuthFailure { attempt: u32, max_retries: u32 },

    #[error("trading halted: margin auth failures exceeded {max_retries} retries")]
    TradingHalted { max_retries: u32 },

    #[error("margin ratio {ratio:.1}% below admission floor {floor:.1}%")]
    BelowAdmissionFloor { ratio: f64, floor: f64 },
}

/// Errors related to OHLCV acquisition and validation.
#[derive(Debug, Error)]
pub enum MarketDataError {
    #[error("connection lost: {reason}")]
    ConnectionLost { reason: String },

    #[error("invalid market data for {symbol}: {reason}")]
    InvalidData { symbol: String, reason: String },

    #[error("service timeout after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    #[error("rate limit exceeded: retry after {retry_after_secs}s")]
    RateLimitExceeded { retry_after_secs: u64 },

    #[error("timestamp invalid: {reason}")]
    TimestampInvalid { reason: String },

    /// A call that returned an exchange-native numeric error code (§6);
    /// `code` feeds `ExchangeErrorCode::from_code` so callers can classify
    /// without re-parsing the message.
    #[error("exchange API error (code {code:?}): {message}")]
    ExchangeApiError { code: Option<i64>, message: String },

    /// Cancelling or fetching an order the exchange no longer recognizes.
    /// Distinguished from other cancel failures because it's treated as
    /// "already closed" rather than a persisted orphan (§4.12).
    #[error("order not found: {order_id}")]
    OrderNotFound { order_id: String },
}

/// Errors from the resilience layer (circuit breaker / emergency stop).
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ResilienceError {
    #[error("circuit breaker open for component '{component}'")]
    CircuitOpen { component: String },

    #[error("emergency stop active, refusing new entries until operator reset")]
    EmergencyStopActive,
}

/// Errors from TP/SL recomputation.
#[derive(Debug, Error)]
pub enum TpSlError {
    #[error("ATR unavailable for {symbol}, recalculation required")]
    AtrUnavailable { symbol: String },

    #[error("TP/SL recalculation failed for {symbol}: {reason}")]
    RecalculationFailed { symbol: String, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limit_violation_formatting() {
        let violation = LimitViolation::MaxOpenPositions {
            regime: "tight_range".to_string(),
            count: 2,
            limit: 2,
        };
        let msg = violation.to_string();
        assert!(msg.contains("tight_range"));
        assert!(msg.contains("2/2"));
    }

    #[test]
    fn margin_error_formatting() {
        let err = MarginError::BelowAdmissionFloor {
            ratio: 78.4,
            floor: 80.0,
        };
        let msg = err.to_string();
        assert!(msg.contains("78.4"));
        assert!(msg.contains("80.0"));
    }
}
