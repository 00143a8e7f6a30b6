use crate::domain::errors::MarketDataError;
use crate::domain::market::{Bar, Timeframe};
use crate::domain::ports::{
    BalanceSnapshot, ExchangeClient, MarginPositionSnapshot, MarginStatusSnapshot, NewOrder,
    OrderAck, OrderBook, OrderState, Ticker,
};
use crate::domain::trading::OrderStatus;
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;

/// In-memory `ExchangeClient` for application-layer tests: fills every
/// order immediately at the requested (or a fixed fallback) price, tracks
/// orders by id so `fetch_order`/`cancel_order` behave like a real
/// exchange, and lets tests inject the failure modes `StopManager` /
/// `AtomicEntryManager` / `BalanceMonitor` need to exercise (forced order
/// rejection, forced cancel failure, forced auth error codes).
pub struct MockExchangeClient {
    pub bars: Mutex<Vec<Bar>>,
    pub ticker_price: Mutex<Decimal>,
    pub order_book: Mutex<OrderBook>,
    pub margin_status: Mutex<MarginStatusSnapshot>,
    pub balance: Mutex<BalanceSnapshot>,
    pub margin_positions: Mutex<Vec<MarginPositionSnapshot>>,
    pub orders: Mutex<HashMap<String, OrderState>>,
    next_id: AtomicU64,
    pub fail_next_order: Mutex<bool>,
    pub fail_next_cancel: Mutex<Option<String>>,
    pub fail_next_balance: Mutex<Option<i64>>,
    pub fail_next_margin_status: Mutex<Option<i64>>,
}

impl Default for MockExchangeClient {
    fn default() -> Self {
        Self {
            bars: Mutex::new(Vec::new()),
            ticker_price: Mutex::new(Decimal::ZERO),
            order_book: Mutex::new(OrderBook::default()),
            margin_status: Mutex::new(MarginStatusSnapshot::default()),
            balance: Mutex::new(BalanceSnapshot {
                total: Decimal::ZERO,
                free: Decimal::ZERO,
                used: Decimal::ZERO,
            }),
            margin_positions: Mutex::new(Vec::new()),
            orders: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            fail_next_order: Mutex::new(false),
            fail_next_cancel: Mutex::new(None),
            fail_next_balance: Mutex::new(None),
            fail_next_margin_status: Mutex::new(None),
        }
    }
}

impl MockExchangeClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test helper: mutate a previously-placed order's status directly, to
    /// simulate exchange-side TP/SL auto-execution or cancellation.
    pub async fn set_order_status(&self, order_id: &str, status: OrderStatus) {
        if let Some(order) = self.orders.lock().await.get_mut(order_id) {
            order.status = status;
        }
    }

    /// Test helper: seed an order directly (e.g. to represent an entry
    /// placed outside the mock's own `create_order`).
    pub async fn seed_order(&self, order_id: impl Into<String>, state: OrderState) {
        self.orders.lock().await.insert(order_id.into(), state);
    }
}

#[async_trait]
impl ExchangeClient for MockExchangeClient {
    async fn fetch_ohlcv(
        &self,
        _symbol: &str,
        _timeframe: Timeframe,
        since_ms: Option<i64>,
        limit: Option<u32>,
    ) -> Result<Vec<Bar>, MarketDataError> {
        let bars = self.bars.lock().await;
        let mut filtered: Vec<Bar> = bars
            .iter()
            .filter(|b| since_ms.is_none_or(|since| b.timestamp_ms >= since))
            .copied()
            .collect();
        if let Some(limit) = limit {
            filtered.truncate(limit as usize);
        }
        Ok(filtered)
    }

    async fn fetch_ticker(&self, _symbol: &str) -> Result<Ticker, MarketDataError> {
        Ok(Ticker {
            last: *self.ticker_price.lock().await,
        })
    }

    async fn fetch_order_book(
        &self,
        _symbol: &str,
        _depth: Option<u32>,
    ) -> Result<OrderBook, MarketDataError> {
        Ok(self.order_book.lock().await.clone())
    }

    async fn create_order(&self, order: NewOrder) -> Result<OrderAck, MarketDataError> {
        if *self.fail_next_order.lock().await {
            *self.fail_next_order.lock().await = false;
            return Err(MarketDataError::ConnectionLost {
                reason: "mock forced failure".to_string(),
            });
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst).to_string();
        let fill_price = order.price.unwrap_or(*self.ticker_price.lock().await);

        self.orders.lock().await.insert(
            id.clone(),
            OrderState {
                id: id.clone(),
                status: OrderStatus::Closed,
                filled: order.amount,
                average: Some(fill_price),
                price: Some(fill_price),
                amount: order.amount,
                created_at: chrono::Utc::now(),
            },
        );

        Ok(OrderAck {
            id,
            status: OrderStatus::Closed,
            price: Some(fill_price),
            amount: Some(order.amount),
            filled: Some(order.amount),
            fee: Some(Decimal::ZERO),
        })
    }

    async fn cancel_order(&self, id: &str, _symbol: &str) -> Result<(), MarketDataError> {
        if let Some(reason) = self.fail_next_cancel.lock().await.take() {
            return Err(MarketDataError::ConnectionLost { reason });
        }
        let mut orders = self.orders.lock().await;
        match orders.get_mut(id) {
            Some(order) => {
                order.status = OrderStatus::Canceled;
                Ok(())
            }
            None => Err(MarketDataError::OrderNotFound {
                order_id: id.to_string(),
            }),
        }
    }

    async fn fetch_order(&self, id: &str, symbol: &str) -> Result<OrderState, MarketDataError> {
        self.orders
            .lock()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| MarketDataError::InvalidData {
                symbol: symbol.to_string(),
                reason: format!("no order {id} known to mock"),
            })
    }

    async fn fetch_active_orders(
        &self,
        _symbol: &str,
        limit: u32,
    ) -> Result<Vec<OrderState>, MarketDataError> {
        let orders = self.orders.lock().await;
        Ok(orders
            .values()
            .filter(|o| o.status == OrderStatus::Open)
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn fetch_margin_positions(
        &self,
        _symbol: &str,
    ) -> Result<Vec<MarginPositionSnapshot>, MarketDataError> {
        Ok(self.margin_positions.lock().await.clone())
    }

    async fn fetch_margin_status(&self) -> Result<MarginStatusSnapshot, MarketDataError> {
        if let Some(code) = self.fail_next_margin_status.lock().await.take() {
            return Err(MarketDataError::ExchangeApiError {
                code: Some(code),
                message: "mock forced margin status failure".to_string(),
            });
        }
        Ok(self.margin_status.lock().await.clone())
    }

    async fn fetch_balance(&self) -> Result<BalanceSnapshot, MarketDataError> {
        if let Some(code) = self.fail_next_balance.lock().await.take() {
            return Err(MarketDataError::ExchangeApiError {
                code: Some(code),
                message: "mock forced balance failure".to_string(),
            });
        }
        Ok(self.balance.lock().await.clone())
    }

    fn rate_limit_ms(&self) -> u64 {
        0
    }
}
