use crate::domain::errors::MarketDataError;
use crate::domain::market::{Bar, Timeframe};
use crate::domain::trading::{OrderStatus, OrderType, Side};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

/// Exchange-native order acknowledgement, as returned by `create_order`.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderAck {
    pub id: String,
    pub status: OrderStatus,
    pub price: Option<Decimal>,
    pub amount: Option<Decimal>,
    pub filled: Option<Decimal>,
    pub fee: Option<Decimal>,
}

/// Exchange-native order state, as returned by `fetch_order` and
/// `fetch_active_orders`. `id` is always populated (for `fetch_order` it
/// simply echoes the id the caller already had); `created_at` is what the
/// stale-order cleanup pass (§4.12) ages orders against.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderState {
    pub id: String,
    pub status: OrderStatus,
    pub filled: Decimal,
    pub average: Option<Decimal>,
    pub price: Option<Decimal>,
    pub amount: Decimal,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositionSide {
    Long,
    Short,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MarginPositionSnapshot {
    pub side: PositionSide,
    pub amount: Decimal,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct MarginStatusSnapshot {
    pub margin_ratio: Option<Decimal>,
    pub available_balance: Option<Decimal>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BalanceSnapshot {
    pub total: Decimal,
    pub free: Decimal,
    pub used: Decimal,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderBookLevel {
    pub price: Decimal,
    pub quantity: Decimal,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct OrderBook {
    pub bids: Vec<OrderBookLevel>,
    pub asks: Vec<OrderBookLevel>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Ticker {
    pub last: Decimal,
}

/// Parameters accepted by `create_order`. Not every field applies to every
/// order type; the exchange adapter is responsible for omitting what its
/// wire format doesn't accept.
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub symbol: String,
    pub side: Side,
    pub order_type: OrderType,
    pub amount: Decimal,
    pub price: Option<Decimal>,
    pub post_only: bool,
    pub trigger_price: Option<Decimal>,
    pub is_closing_order: bool,
    pub entry_position_side: Option<PositionSide>,
}

/// Exchange error codes that steer the resilience classifier and the
/// SL-fallback safety logic, when the exchange surfaces them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeErrorCode {
    InsufficientFunds,
    PositionMissing,
    TriggerPriceRequired,
    ApiAuth,
    Other,
}

impl ExchangeErrorCode {
    pub fn from_code(code: i64) -> Self {
        match code {
            50061 => ExchangeErrorCode::InsufficientFunds,
            50062 => ExchangeErrorCode::PositionMissing,
            30101 => ExchangeErrorCode::TriggerPriceRequired,
            20001 => ExchangeErrorCode::ApiAuth,
            _ => ExchangeErrorCode::Other,
        }
    }
}

/// The polymorphic exchange surface every application-layer component
/// depends on through this trait object rather than a concrete HTTP client.
/// All calls may fail; infrastructure adapters translate exchange-native
/// errors into `MarketDataError`/`TradingError` at this boundary.
#[async_trait]
pub trait ExchangeClient: Send + Sync {
    async fn fetch_ohlcv(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        since_ms: Option<i64>,
        limit: Option<u32>,
    ) -> Result<Vec<Bar>, MarketDataError>;

    async fn fetch_ticker(&self, symbol: &str) -> Result<Ticker, MarketDataError>;

    async fn fetch_order_book(
        &self,
        symbol: &str,
        depth: Option<u32>,
    ) -> Result<OrderBook, MarketDataError>;

    async fn create_order(&self, order: NewOrder) -> Result<OrderAck, MarketDataError>;

    async fn cancel_order(&self, id: &str, symbol: &str) -> Result<(), MarketDataError>;

    async fn fetch_order(&self, id: &str, symbol: &str) -> Result<OrderState, MarketDataError>;

    async fn fetch_active_orders(
        &self,
        symbol: &str,
        limit: u32,
    ) -> Result<Vec<OrderState>, MarketDataError>;

    async fn fetch_margin_positions(
        &self,
        symbol: &str,
    ) -> Result<Vec<MarginPositionSnapshot>, MarketDataError>;

    async fn fetch_margin_status(&self) -> Result<MarginStatusSnapshot, MarketDataError>;

    async fn fetch_balance(&self) -> Result<BalanceSnapshot, MarketDataError>;

    /// Milliseconds the pagination loop must sleep between fetch_ohlcv
    /// pages, per the exchange's declared rate limit.
    fn rate_limit_ms(&self) -> u64;
}
