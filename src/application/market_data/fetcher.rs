use super::backoff::{self, BackoffKind, MAX_PAGINATION_ATTEMPTS};
use super::cleaning::clean;
use super::timestamp_guard::TimestampGuard;
use crate::domain::market::{Bar, BarFrame, Timeframe};
use crate::domain::ports::ExchangeClient;
use chrono::{Duration as ChronoDuration, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::warn;

const DEFAULT_PER_PAGE: u32 = 500;
const MAX_SPAN_DAYS: i64 = 30;
const PARALLEL_RACE_TIMEOUT: Duration = Duration::from_secs(90);

pub struct MarketDataFetcher {
    exchange: Arc<dyn ExchangeClient>,
}

/// Outcome of `get_price_frame`: callers distinguish an intentionally
/// partial rescue from a fully successful fetch so they can warn.
pub struct PriceFrameResult {
    pub frame: BarFrame,
    pub partial: bool,
}

impl MarketDataFetcher {
    pub fn new(exchange: Arc<dyn ExchangeClient>) -> Self {
        Self { exchange }
    }

    /// `getPriceFrame(timeframe, since?, limit?, paginate?, perPage=500)`.
    /// Returns an ordered, cleaned bar frame. Never errors outward: on total
    /// failure it returns an empty frame, on partial failure a rescued
    /// partial frame with `partial = true`.
    pub async fn get_price_frame(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        since_ms: Option<i64>,
        limit: Option<u32>,
        paginate: bool,
        per_page: Option<u32>,
    ) -> PriceFrameResult {
        let limit = limit.unwrap_or(DEFAULT_PER_PAGE);
        let per_page = per_page.unwrap_or(DEFAULT_PER_PAGE);

        if !paginate {
            let single = self
                .exchange
                .fetch_ohlcv(symbol, timeframe, since_ms, Some(limit))
                .await
                .unwrap_or_default();
            let cleaned = clean(&single, timeframe);
            return PriceFrameResult {
                frame: BarFrame::from_bars(cleaned),
                partial: false,
            };
        }

        self.paginate(symbol, timeframe, since_ms, limit, per_page)
            .await
    }

    async fn paginate(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        since_ms: Option<i64>,
        limit: u32,
        per_page: u32,
    ) -> PriceFrameResult {
        let default_since = Utc::now() - ChronoDuration::hours(24);
        let mut cursor = since_ms.unwrap_or(default_since.timestamp_millis());
        let span_start = cursor;

        let mut attempt: u32 = 0;
        let mut consecutive_empty: u32 = 0;
        let mut seen_ts: HashSet<i64> = HashSet::new();
        let mut records: Vec<Bar> = Vec::new();
        let mut partial = false;

        while (records.len() as u32) < limit && attempt < MAX_PAGINATION_ATTEMPTS {
            attempt += 1;

            let batch = match timeout(
                Duration::from_secs(30),
                self.exchange
                    .fetch_ohlcv(symbol, timeframe, Some(cursor), Some(per_page)),
            )
            .await
            {
                Ok(Ok(batch)) => batch,
                Ok(Err(e)) => {
                    warn!("fetch_ohlcv failed during pagination: {}", e);
                    Vec::new()
                }
                Err(_) => {
                    partial = !records.is_empty();
                    warn!("fetch_ohlcv timed out mid-pagination, rescuing partial frame");
                    break;
                }
            };

            if batch.is_empty() {
                consecutive_empty += 1;
                let span_days = ChronoDuration::milliseconds(cursor - span_start).num_days();
                if backoff::should_abort(consecutive_empty, false, span_days, attempt) {
                    break;
                }
                tokio::time::sleep(backoff::smart_backoff(
                    attempt,
                    consecutive_empty,
                    BackoffKind::Empty,
                ))
                .await;
                continue;
            }
            consecutive_empty = 0;

            let now_ms = Utc::now().timestamp_millis();
            let future_ceiling = now_ms + ChronoDuration::hours(24).num_milliseconds();
            let mut last_ts = cursor;
            for bar in batch {
                if bar.timestamp_ms > future_ceiling || bar.timestamp_ms <= 0 {
                    continue;
                }
                if !seen_ts.insert(bar.timestamp_ms) {
                    continue;
                }
                last_ts = last_ts.max(bar.timestamp_ms);
                records.push(bar);
            }

            cursor = (last_ts + timeframe.interval_ms()).min(now_ms);

            tokio::time::sleep(Duration::from_millis(self.exchange.rate_limit_ms())).await;

            let span_days = ChronoDuration::milliseconds(cursor - span_start).num_days();
            if span_days > MAX_SPAN_DAYS {
                break;
            }
        }

        let cleaned = clean(&records, timeframe);
        PriceFrameResult {
            frame: BarFrame::from_bars(cleaned),
            partial: partial || records.is_empty(),
        }
    }

    /// Launches a since-based and a latest-only fetch concurrently, racing
    /// them against a 90s timeout; returns whichever non-empty frame has
    /// the fresher max timestamp.
    pub async fn get_price_frame_racing(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        since_ms: i64,
        limit: u32,
    ) -> PriceFrameResult {
        let since_fetch = self.get_price_frame(symbol, timeframe, Some(since_ms), Some(limit), true, None);
        let latest_fetch = self.get_price_frame(symbol, timeframe, None, Some(limit), true, None);

        let raced = timeout(PARALLEL_RACE_TIMEOUT, async {
            tokio::join!(since_fetch, latest_fetch)
        })
        .await;

        match raced {
            Ok((since_result, latest_result)) => {
                let since_max = since_result.frame.max_timestamp();
                let latest_max = latest_result.frame.max_timestamp();
                if latest_max.unwrap_or(i64::MIN) >= since_max.unwrap_or(i64::MIN) {
                    latest_result
                } else {
                    since_result
                }
            }
            Err(_) => PriceFrameResult {
                frame: BarFrame::new(),
                partial: true,
            },
        }
    }

    /// Raw five-stage hardening exposed for callers validating a bare
    /// `since` argument before it reaches the pagination loop.
    pub fn harden_since(raw: f64) -> Option<i64> {
        TimestampGuard::harden(raw).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::exchange::MockExchangeClient;
    use rust_decimal_macros::dec;

    fn bar(ts: i64) -> Bar {
        Bar {
            timestamp_ms: ts,
            open: dec!(100),
            high: dec!(101),
            low: dec!(99),
            close: dec!(100),
            volume: dec!(1),
        }
    }

    #[tokio::test]
    async fn returns_empty_frame_when_exchange_has_no_bars() {
        let mock = Arc::new(MockExchangeClient::new());
        let fetcher = MarketDataFetcher::new(mock);
        let result = fetcher
            .get_price_frame("BTC/JPY", Timeframe::M15, None, Some(10), true, None)
            .await;
        assert!(result.frame.is_empty());
    }

    #[tokio::test]
    async fn paginates_and_dedups_across_pages() {
        let mock = Arc::new(MockExchangeClient::new());
        {
            let mut bars = mock.bars.lock().await;
            let interval = Timeframe::M15.interval_ms();
            for i in 0..5 {
                bars.push(bar(i * interval));
            }
        }
        let fetcher = MarketDataFetcher::new(mock);
        let result = fetcher
            .get_price_frame("BTC/JPY", Timeframe::M15, Some(0), Some(5), true, Some(500))
            .await;
        assert_eq!(result.frame.len(), 5);
    }
}
