use crate::config::{EntryPriceStrategy, OrderExecutionConfig};
use crate::domain::errors::TradingError;
use crate::domain::ports::{ExchangeClient, NewOrder, OrderAck, OrderBook};
use crate::domain::trading::{OrderStatus, OrderType, Side, TradeEvaluation};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionStyle {
    Market,
    Limit,
    MakerOnly,
}

/// Chooses, and then carries out, the execution style for one entry (§4.9).
/// Holds the exchange client because the maker-only path needs to place,
/// poll, and retry its own order — it isn't a pure decision function.
pub struct OrderStrategy {
    exchange: Arc<dyn ExchangeClient>,
    config: OrderExecutionConfig,
}

impl OrderStrategy {
    pub fn new(exchange: Arc<dyn ExchangeClient>, config: OrderExecutionConfig) -> Self {
        Self { exchange, config }
    }

    fn spread_ratio(order_book: &OrderBook) -> Option<Decimal> {
        let best_bid = order_book.bids.first()?.price;
        let best_ask = order_book.asks.first()?.price;
        if best_bid <= Decimal::ZERO {
            return None;
        }
        Some((best_ask - best_bid) / best_bid)
    }

    /// Pure decision per §4.9: emergency exits and low-confidence or
    /// wide-spread evaluations always go to market; a confident evaluation
    /// with adequate liquidity prefers a maker-rebate limit when the maker
    /// strategy is enabled, else a plain limit.
    pub fn choose_style(&self, evaluation: &TradeEvaluation, order_book: &OrderBook, is_emergency_exit: bool) -> ExecutionStyle {
        if is_emergency_exit {
            return ExecutionStyle::Market;
        }
        if evaluation.confidence_level < self.config.low_confidence_threshold {
            return ExecutionStyle::Market;
        }
        let spread = Self::spread_ratio(order_book);
        if spread.is_none_or(|s| s > Decimal::from_f64_retain(self.config.max_spread_ratio_for_limit).unwrap_or(Decimal::MAX)) {
            return ExecutionStyle::Market;
        }
        if evaluation.confidence_level >= self.config.high_confidence_threshold {
            if self.config.maker_strategy.enabled {
                ExecutionStyle::MakerOnly
            } else {
                ExecutionStyle::Limit
            }
        } else {
            ExecutionStyle::Market
        }
    }

    /// Guaranteed-fill (default) or price-improvement limit price, per §4.9.
    pub fn limit_price(&self, side: Side, order_book: &OrderBook) -> Option<Decimal> {
        let best_bid = order_book.bids.first()?.price;
        let best_ask = order_book.asks.first()?.price;

        match self.config.entry_price_strategy {
            EntryPriceStrategy::Favorable => {
                let premium = Decimal::from_f64_retain(self.config.guaranteed_execution_premium).unwrap_or(Decimal::ZERO);
                Some(match side {
                    Side::Buy => best_ask * (Decimal::ONE + premium),
                    Side::Sell => best_bid * (Decimal::ONE - premium),
                })
            }
            EntryPriceStrategy::Unfavorable => {
                let epsilon = Decimal::from_f64_retain(self.config.price_improvement_ratio).unwrap_or(Decimal::ZERO);
                Some(match side {
                    Side::Buy => (best_bid * (Decimal::ONE + epsilon)).min(best_ask),
                    Side::Sell => (best_ask * (Decimal::ONE - epsilon)).max(best_bid),
                })
            }
        }
    }

    /// Places the entry order using the style chosen for this evaluation.
    pub async fn execute(
        &self,
        evaluation: &TradeEvaluation,
        order_book: &OrderBook,
        symbol: &str,
        side: Side,
        amount: Decimal,
        is_emergency_exit: bool,
    ) -> Result<OrderAck, TradingError> {
        match self.choose_style(evaluation, order_book, is_emergency_exit) {
            ExecutionStyle::Market => {
                self.place(symbol, side, OrderType::Market, amount, None, false).await
            }
            ExecutionStyle::Limit => {
                let price = self.limit_price(side, order_book).ok_or_else(|| TradingError::InvalidOrder {
                    reason: "empty order book, cannot compute limit price".to_string(),
                })?;
                self.place(symbol, side, OrderType::Limit, amount, Some(price), false).await
            }
            ExecutionStyle::MakerOnly => self.place_maker_only(symbol, side, amount, order_book).await,
        }
    }

    async fn place(
        &self,
        symbol: &str,
        side: Side,
        order_type: OrderType,
        amount: Decimal,
        price: Option<Decimal>,
        post_only: bool,
    ) -> Result<OrderAck, TradingError> {
        self.exchange
            .create_order(NewOrder {
                symbol: symbol.to_string(),
                side,
                order_type,
                amount,
                price,
                post_only,
                trigger_price: None,
                is_closing_order: false,
                entry_position_side: None,
            })
            .await
            .map_err(|e| TradingError::ExecutionFailed { reason: e.to_string() })
    }

    /// Post-only limit at best_bid/ask +/- one tick, walking the price one
    /// tick further from the book in the unfavorable direction whenever the
    /// exchange cancels it as crossing, bounded by `max_retries`,
    /// `timeout_seconds`, and `max_price_adjustment_ratio` total walk.
    async fn place_maker_only(
        &self,
        symbol: &str,
        side: Side,
        amount: Decimal,
        order_book: &OrderBook,
    ) -> Result<OrderAck, TradingError> {
        let maker = &self.config.maker_strategy;
        let tick = maker.price_adjustment_tick;
        let max_walk_ratio = Decimal::from_f64_retain(maker.max_price_adjustment_ratio).unwrap_or(Decimal::ZERO);

        let mut price = match side {
            Side::Buy => order_book.bids.first().map(|l| l.price + tick),
            Side::Sell => order_book.asks.first().map(|l| l.price - tick),
        }
        .ok_or_else(|| TradingError::InvalidOrder {
            reason: "empty order book, cannot place maker order".to_string(),
        })?;
        let anchor = price;
        let max_walk = anchor * max_walk_ratio;

        let deadline = tokio::time::Instant::now() + Duration::from_secs(maker.timeout_seconds);

        for attempt in 1..=maker.max_retries {
            if tokio::time::Instant::now() >= deadline {
                break;
            }

            let ack = self.place(symbol, side, OrderType::Limit, amount, Some(price), true).await?;

            if ack.status != OrderStatus::Canceled {
                return Ok(ack);
            }

            info!(attempt, %symbol, "maker-only order crossed and was cancelled by exchange, walking price");
            price = match side {
                Side::Buy => price - tick,
                Side::Sell => price + tick,
            };
            if (price - anchor).abs() > max_walk {
                warn!(%symbol, "maker price walk exceeded max_price_adjustment_ratio, aborting");
                break;
            }

            tokio::time::sleep(Duration::from_millis(maker.retry_interval_ms)).await;
        }

        Err(TradingError::ExecutionFailed {
            reason: format!("maker-only order never filled within {} retries", maker.max_retries),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::OrderBookLevel;
    use crate::domain::trading::Decision;
    use crate::infrastructure::exchange::MockExchangeClient;
    use rust_decimal_macros::dec;
    use std::collections::HashMap;

    fn book(bid: Decimal, ask: Decimal) -> OrderBook {
        OrderBook {
            bids: vec![OrderBookLevel { price: bid, quantity: dec!(1) }],
            asks: vec![OrderBookLevel { price: ask, quantity: dec!(1) }],
        }
    }

    fn evaluation(confidence: f64) -> TradeEvaluation {
        TradeEvaluation {
            decision: Decision::Approved,
            side: Some(Side::Buy),
            position_size: dec!(0.001),
            entry_price: Some(dec!(13_000_000)),
            stop_loss: None,
            take_profit: None,
            confidence_level: confidence,
            strategy_name: "s".to_string(),
            regime: None,
            symbol: "BTC/JPY".to_string(),
            market_conditions: HashMap::new(),
        }
    }

    fn strategy() -> OrderStrategy {
        OrderStrategy::new(Arc::new(MockExchangeClient::new()), OrderExecutionConfig::default())
    }

    #[test]
    fn low_confidence_forces_market() {
        let s = strategy();
        let book = book(dec!(13_000_000), dec!(13_001_000));
        let style = s.choose_style(&evaluation(0.2), &book, false);
        assert_eq!(style, ExecutionStyle::Market);
    }

    #[test]
    fn emergency_exit_forces_market_regardless_of_confidence() {
        let s = strategy();
        let book = book(dec!(13_000_000), dec!(13_001_000));
        let style = s.choose_style(&evaluation(0.9), &book, true);
        assert_eq!(style, ExecutionStyle::Market);
    }

    #[test]
    fn wide_spread_forces_market() {
        let s = strategy();
        let book = book(dec!(13_000_000), dec!(13_200_000));
        let style = s.choose_style(&evaluation(0.9), &book, false);
        assert_eq!(style, ExecutionStyle::Market);
    }

    #[test]
    fn high_confidence_tight_spread_prefers_limit_when_maker_disabled() {
        let s = strategy();
        let book = book(dec!(13_000_000), dec!(13_001_000));
        let style = s.choose_style(&evaluation(0.9), &book, false);
        assert_eq!(style, ExecutionStyle::Limit);
    }

    #[test]
    fn guaranteed_fill_buy_price_is_above_best_ask() {
        let s = strategy();
        let book = book(dec!(13_000_000), dec!(13_001_000));
        let price = s.limit_price(Side::Buy, &book).unwrap();
        assert!(price > dec!(13_001_000));
    }

    #[tokio::test]
    async fn market_execution_fills_via_mock() {
        let s = strategy();
        let book = book(dec!(13_000_000), dec!(13_001_000));
        let ack = s
            .execute(&evaluation(0.2), &book, "BTC/JPY", Side::Buy, dec!(0.001), false)
            .await
            .unwrap();
        assert_eq!(ack.status, OrderStatus::Closed);
    }
}
