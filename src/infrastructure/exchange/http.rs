use crate::domain::errors::MarketDataError;
use crate::domain::market::{Bar, Timeframe};
use crate::domain::ports::{
    BalanceSnapshot, ExchangeClient, MarginPositionSnapshot, MarginStatusSnapshot, NewOrder,
    OrderAck, OrderBook, OrderBookLevel, OrderState, Ticker,
};
use crate::domain::trading::{OrderStatus, OrderType, Side};
use crate::infrastructure::core::http_client_factory::HttpClientFactory;
use crate::infrastructure::observability::Metrics;
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest_middleware::ClientWithMiddleware;
use rust_decimal::Decimal;
use sha2::Sha256;
use std::str::FromStr;
use std::time::Instant;
use tracing::warn;

type HmacSha256 = Hmac<Sha256>;

/// REST adapter for a single margin exchange account. Generalized over
/// whatever base URL/credentials are injected; callers own interpreting
/// exchange-specific error codes via `ExchangeErrorCode::from_code`.
pub struct HttpExchangeClient {
    client: ClientWithMiddleware,
    base_url: String,
    api_key: String,
    api_secret: String,
    rate_limit_ms: u64,
    metrics: Metrics,
}

impl HttpExchangeClient {
    pub fn new(
        base_url: String,
        api_key: String,
        api_secret: String,
        rate_limit_ms: u64,
        metrics: Metrics,
    ) -> Self {
        Self {
            client: HttpClientFactory::create_client(),
            base_url,
            api_key,
            api_secret,
            rate_limit_ms,
            metrics,
        }
    }

    /// Times `endpoint` and records it to `margin_core_exchange_latency_seconds`
    /// regardless of whether the call succeeded.
    async fn timed<T>(
        &self,
        endpoint: &str,
        fut: impl std::future::Future<Output = Result<T, MarketDataError>>,
    ) -> Result<T, MarketDataError> {
        let start = Instant::now();
        let result = fut.await;
        self.metrics
            .observe_exchange_latency(endpoint, start.elapsed().as_secs_f64());
        result
    }

    fn sign(&self, payload: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(self.api_secret.as_bytes())
            .expect("HMAC accepts a key of any size");
        mac.update(payload.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    fn auth_headers(&self, payload: &str) -> Vec<(&'static str, String)> {
        let nonce = chrono::Utc::now().timestamp_millis().to_string();
        let signature_payload = format!("{}{}", nonce, payload);
        vec![
            ("ACCESS-KEY", self.api_key.clone()),
            ("ACCESS-NONCE", nonce),
            ("ACCESS-SIGNATURE", self.sign(&signature_payload)),
        ]
    }

    fn io_error(reason: impl Into<String>) -> MarketDataError {
        MarketDataError::ConnectionLost {
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl ExchangeClient for HttpExchangeClient {
    async fn fetch_ohlcv(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        since_ms: Option<i64>,
        limit: Option<u32>,
    ) -> Result<Vec<Bar>, MarketDataError> {
        self.timed("fetch_ohlcv", self.fetch_ohlcv_inner(symbol, timeframe, since_ms, limit))
            .await
    }

    async fn fetch_ticker(&self, symbol: &str) -> Result<Ticker, MarketDataError> {
        self.timed("fetch_ticker", self.fetch_ticker_inner(symbol)).await
    }

    async fn fetch_order_book(
        &self,
        symbol: &str,
        depth: Option<u32>,
    ) -> Result<OrderBook, MarketDataError> {
        self.timed("fetch_order_book", self.fetch_order_book_inner(symbol, depth))
            .await
    }

    async fn create_order(&self, order: NewOrder) -> Result<OrderAck, MarketDataError> {
        self.timed("create_order", self.create_order_inner(order)).await
    }

    async fn cancel_order(&self, id: &str, symbol: &str) -> Result<(), MarketDataError> {
        self.timed("cancel_order", self.cancel_order_inner(id, symbol)).await
    }

    async fn fetch_order(&self, id: &str, symbol: &str) -> Result<OrderState, MarketDataError> {
        self.timed("fetch_order", self.fetch_order_inner(id, symbol)).await
    }

    async fn fetch_active_orders(
        &self,
        symbol: &str,
        limit: u32,
    ) -> Result<Vec<OrderState>, MarketDataError> {
        self.timed("fetch_active_orders", self.fetch_active_orders_inner(symbol, limit))
            .await
    }

    async fn fetch_margin_positions(
        &self,
        symbol: &str,
    ) -> Result<Vec<MarginPositionSnapshot>, MarketDataError> {
        self.timed("fetch_margin_positions", self.fetch_margin_positions_inner(symbol))
            .await
    }

    async fn fetch_margin_status(&self) -> Result<MarginStatusSnapshot, MarketDataError> {
        self.timed("fetch_margin_status", self.fetch_margin_status_inner())
            .await
    }

    async fn fetch_balance(&self) -> Result<BalanceSnapshot, MarketDataError> {
        self.timed("fetch_balance", self.fetch_balance_inner()).await
    }

    fn rate_limit_ms(&self) -> u64 {
        self.rate_limit_ms
    }
}

impl HttpExchangeClient {
    async fn fetch_ohlcv_inner(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        since_ms: Option<i64>,
        limit: Option<u32>,
    ) -> Result<Vec<Bar>, MarketDataError> {
        let url = format!("{}/candlestick/{}/{}", self.base_url, symbol, timeframe.as_str());
        let mut request = self.client.get(&url);
        if let Some(since) = since_ms {
            request = request.query(&[("since", since.to_string())]);
        }
        if let Some(limit) = limit {
            request = request.query(&[("limit", limit.to_string())]);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Self::io_error(format!("fetch_ohlcv transport error: {e}")))?;

        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(MarketDataError::InvalidData {
                symbol: symbol.to_string(),
                reason: format!("exchange returned error body: {body}"),
            });
        }

        let raw: Vec<[serde_json::Value; 6]> = response
            .json()
            .await
            .map_err(|e| Self::io_error(format!("fetch_ohlcv decode error: {e}")))?;

        let bars = raw
            .into_iter()
            .filter_map(|row| {
                let timestamp_ms = row[0].as_i64()?;
                let parse = |v: &serde_json::Value| -> Option<Decimal> {
                    v.as_str()
                        .and_then(|s| Decimal::from_str(s).ok())
                        .or_else(|| v.as_f64().and_then(Decimal::from_f64_retain))
                };
                Some(Bar {
                    timestamp_ms,
                    open: parse(&row[1])?,
                    high: parse(&row[2])?,
                    low: parse(&row[3])?,
                    close: parse(&row[4])?,
                    volume: parse(&row[5])?,
                })
            })
            .collect();

        Ok(bars)
    }

    async fn fetch_ticker_inner(&self, symbol: &str) -> Result<Ticker, MarketDataError> {
        let url = format!("{}/ticker/{}", self.base_url, symbol);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| Self::io_error(format!("fetch_ticker transport error: {e}")))?;

        #[derive(serde::Deserialize)]
        struct TickerBody {
            last: String,
        }

        let body: TickerBody = response
            .json()
            .await
            .map_err(|e| Self::io_error(format!("fetch_ticker decode error: {e}")))?;

        let last = Decimal::from_str(&body.last).map_err(|e| MarketDataError::InvalidData {
            symbol: symbol.to_string(),
            reason: format!("unparseable ticker price: {e}"),
        })?;

        Ok(Ticker { last })
    }

    async fn fetch_order_book_inner(
        &self,
        symbol: &str,
        depth: Option<u32>,
    ) -> Result<OrderBook, MarketDataError> {
        let url = format!("{}/depth/{}", self.base_url, symbol);
        let mut request = self.client.get(&url);
        if let Some(depth) = depth {
            request = request.query(&[("depth", depth.to_string())]);
        }

        #[derive(serde::Deserialize)]
        struct DepthBody {
            bids: Vec<[String; 2]>,
            asks: Vec<[String; 2]>,
        }

        let body: DepthBody = request
            .send()
            .await
            .map_err(|e| Self::io_error(format!("fetch_order_book transport error: {e}")))?
            .json()
            .await
            .map_err(|e| Self::io_error(format!("fetch_order_book decode error: {e}")))?;

        let to_levels = |rows: Vec<[String; 2]>| -> Vec<OrderBookLevel> {
            rows.into_iter()
                .filter_map(|[px, qty]| {
                    Some(OrderBookLevel {
                        price: Decimal::from_str(&px).ok()?,
                        quantity: Decimal::from_str(&qty).ok()?,
                    })
                })
                .collect()
        };

        Ok(OrderBook {
            bids: to_levels(body.bids),
            asks: to_levels(body.asks),
        })
    }

    async fn create_order_inner(&self, order: NewOrder) -> Result<OrderAck, MarketDataError> {
        let side = match order.side {
            Side::Buy => "buy",
            Side::Sell => "sell",
        };
        let order_type = match order.order_type {
            OrderType::Market => "market",
            OrderType::Limit => "limit",
            OrderType::Stop => "stop",
            OrderType::StopLimit => "stop_limit",
        };

        let payload = serde_json::json!({
            "pair": order.symbol,
            "side": side,
            "type": order_type,
            "amount": order.amount.to_string(),
            "price": order.price.map(|p| p.to_string()),
            "post_only": order.post_only,
            "trigger_price": order.trigger_price.map(|p| p.to_string()),
        })
        .to_string();

        let headers = self.auth_headers(&payload);
        let url = format!("{}/user/spot/order", self.base_url);
        let mut request = self.client.post(&url).body(payload);
        for (key, value) in headers {
            request = request.header(key, value);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Self::io_error(format!("create_order transport error: {e}")))?;

        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!("create_order rejected by exchange: {}", body);
            return Err(MarketDataError::InvalidData {
                symbol: order.symbol.clone(),
                reason: format!("order rejected: {body}"),
            });
        }

        #[derive(serde::Deserialize)]
        struct OrderResponse {
            id: String,
            status: String,
            price: Option<String>,
            amount: Option<String>,
            filled: Option<String>,
            fee: Option<String>,
        }

        let body: OrderResponse = response
            .json()
            .await
            .map_err(|e| Self::io_error(format!("create_order decode error: {e}")))?;

        Ok(OrderAck {
            id: body.id,
            status: parse_status(&body.status),
            price: body.price.and_then(|p| Decimal::from_str(&p).ok()),
            amount: body.amount.and_then(|p| Decimal::from_str(&p).ok()),
            filled: body.filled.and_then(|p| Decimal::from_str(&p).ok()),
            fee: body.fee.and_then(|p| Decimal::from_str(&p).ok()),
        })
    }

    async fn cancel_order_inner(&self, id: &str, symbol: &str) -> Result<(), MarketDataError> {
        let payload = serde_json::json!({ "pair": symbol, "order_id": id }).to_string();
        let headers = self.auth_headers(&payload);
        let url = format!("{}/user/spot/cancel_order", self.base_url);
        let mut request = self.client.post(&url).body(payload);
        for (key, value) in headers {
            request = request.header(key, value);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Self::io_error(format!("cancel_order transport error: {e}")))?;

        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(MarketDataError::InvalidData {
                symbol: symbol.to_string(),
                reason: format!("cancel rejected: {body}"),
            });
        }
        Ok(())
    }

    async fn fetch_order_inner(&self, id: &str, symbol: &str) -> Result<OrderState, MarketDataError> {
        let url = format!("{}/user/spot/order", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[("pair", symbol), ("order_id", id)])
            .send()
            .await
            .map_err(|e| Self::io_error(format!("fetch_order transport error: {e}")))?;

        #[derive(serde::Deserialize)]
        struct OrderStateBody {
            status: String,
            filled: String,
            average: Option<String>,
            price: Option<String>,
            amount: String,
            created_at_ms: Option<i64>,
        }

        let body: OrderStateBody = response
            .json()
            .await
            .map_err(|e| Self::io_error(format!("fetch_order decode error: {e}")))?;

        Ok(OrderState {
            id: id.to_string(),
            status: parse_status(&body.status),
            filled: Decimal::from_str(&body.filled).unwrap_or(Decimal::ZERO),
            average: body.average.and_then(|p| Decimal::from_str(&p).ok()),
            price: body.price.and_then(|p| Decimal::from_str(&p).ok()),
            amount: Decimal::from_str(&body.amount).unwrap_or(Decimal::ZERO),
            created_at: body
                .created_at_ms
                .and_then(|ms| chrono::DateTime::from_timestamp_millis(ms))
                .unwrap_or_else(chrono::Utc::now),
        })
    }

    async fn fetch_active_orders_inner(
        &self,
        symbol: &str,
        limit: u32,
    ) -> Result<Vec<OrderState>, MarketDataError> {
        let limit = limit.min(100);
        let url = format!("{}/user/spot/active_orders", self.base_url);

        #[derive(serde::Deserialize)]
        struct ActiveOrdersBody {
            orders: Vec<OrderStateWire>,
        }

        #[derive(serde::Deserialize)]
        struct OrderStateWire {
            id: String,
            status: String,
            filled: String,
            average: Option<String>,
            price: Option<String>,
            amount: String,
            created_at_ms: Option<i64>,
        }

        let body: ActiveOrdersBody = self
            .client
            .get(&url)
            .query(&[("pair", symbol), ("count", &limit.to_string())])
            .send()
            .await
            .map_err(|e| Self::io_error(format!("fetch_active_orders transport error: {e}")))?
            .json()
            .await
            .map_err(|e| Self::io_error(format!("fetch_active_orders decode error: {e}")))?;

        Ok(body
            .orders
            .into_iter()
            .map(|o| OrderState {
                id: o.id,
                status: parse_status(&o.status),
                filled: Decimal::from_str(&o.filled).unwrap_or(Decimal::ZERO),
                average: o.average.and_then(|p| Decimal::from_str(&p).ok()),
                price: o.price.and_then(|p| Decimal::from_str(&p).ok()),
                amount: Decimal::from_str(&o.amount).unwrap_or(Decimal::ZERO),
                created_at: o
                    .created_at_ms
                    .and_then(|ms| chrono::DateTime::from_timestamp_millis(ms))
                    .unwrap_or_else(chrono::Utc::now),
            })
            .collect())
    }

    async fn fetch_margin_positions_inner(
        &self,
        symbol: &str,
    ) -> Result<Vec<MarginPositionSnapshot>, MarketDataError> {
        use crate::domain::ports::PositionSide;

        #[derive(serde::Deserialize)]
        struct PositionWire {
            side: String,
            amount: String,
        }

        let url = format!("{}/user/margin/positions", self.base_url);
        let positions: Vec<PositionWire> = self
            .client
            .get(&url)
            .query(&[("pair", symbol)])
            .send()
            .await
            .map_err(|e| Self::io_error(format!("fetch_margin_positions transport error: {e}")))?
            .json()
            .await
            .map_err(|e| Self::io_error(format!("fetch_margin_positions decode error: {e}")))?;

        Ok(positions
            .into_iter()
            .filter_map(|p| {
                let side = match p.side.as_str() {
                    "long" => PositionSide::Long,
                    "short" => PositionSide::Short,
                    _ => return None,
                };
                Some(MarginPositionSnapshot {
                    side,
                    amount: Decimal::from_str(&p.amount).ok()?,
                })
            })
            .collect())
    }

    async fn fetch_margin_status_inner(&self) -> Result<MarginStatusSnapshot, MarketDataError> {
        #[derive(serde::Deserialize, Default)]
        struct MarginStatusWire {
            margin_ratio: Option<String>,
            available_balance: Option<String>,
        }

        let url = format!("{}/user/margin/status", self.base_url);
        let body: MarginStatusWire = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| Self::io_error(format!("fetch_margin_status transport error: {e}")))?
            .json()
            .await
            .unwrap_or_default();

        Ok(MarginStatusSnapshot {
            margin_ratio: body.margin_ratio.and_then(|p| Decimal::from_str(&p).ok()),
            available_balance: body
                .available_balance
                .and_then(|p| Decimal::from_str(&p).ok()),
        })
    }

    async fn fetch_balance_inner(&self) -> Result<BalanceSnapshot, MarketDataError> {
        #[derive(serde::Deserialize)]
        struct BalanceWire {
            total: String,
            free: String,
            used: String,
        }

        let url = format!("{}/user/assets", self.base_url);
        let body: BalanceWire = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| Self::io_error(format!("fetch_balance transport error: {e}")))?
            .json()
            .await
            .map_err(|e| Self::io_error(format!("fetch_balance decode error: {e}")))?;

        Ok(BalanceSnapshot {
            total: Decimal::from_str(&body.total).unwrap_or(Decimal::ZERO),
            free: Decimal::from_str(&body.free).unwrap_or(Decimal::ZERO),
            used: Decimal::from_str(&body.used).unwrap_or(Decimal::ZERO),
        })
    }
}

fn parse_status(raw: &str) -> OrderStatus {
    match raw {
        "open" | "UNFILLED" | "PARTIALLY_FILLED" => OrderStatus::Open,
        "closed" | "FULLY_FILLED" => OrderStatus::Closed,
        "canceled" | "CANCELED_UNFILLED" | "CANCELED_PARTIALLY_FILLED" => OrderStatus::Canceled,
        "expired" => OrderStatus::Expired,
        _ => OrderStatus::Unverifiable,
    }
}
