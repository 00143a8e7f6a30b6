use crate::config::MarginConfig;
use crate::domain::errors::MarginError;
use crate::domain::margin::{MarginData, MarginPrediction, MarginStatus, MarginSufficiency, MarginThresholds};
use crate::domain::ports::ExchangeClient;
use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, warn};

const MAX_AUTH_RETRIES: u32 = 3;

/// `margin_ratio = (balance / position_value) * 100`, with the §4.6 edge
/// cases folded in: a sub-minimum-notional position returns the safe
/// sentinel, a non-positive notional returns +infinity.
pub fn margin_ratio_pct(balance: Decimal, position_value: Decimal, thresholds: &MarginConfig) -> Decimal {
    if position_value <= Decimal::ZERO {
        return Decimal::MAX;
    }
    if position_value < thresholds.min_position_value {
        return Decimal::from(500);
    }
    let ratio = (balance / position_value) * Decimal::from(100);
    ratio.min(thresholds.max_ratio_cap)
}

/// Margin-ratio monitoring with an API-first read and a formula fallback,
/// an admission floor, and the auth-failure retry counter that halts new
/// entries (never exits) once it saturates (§4.6, §7 `AuthError`).
pub struct BalanceMonitor {
    exchange: Arc<dyn ExchangeClient>,
    config: MarginConfig,
    admission_floor_pct: Decimal,
    backtest_mode: bool,
    history: Mutex<VecDeque<MarginData>>,
    auth_failures: Mutex<u32>,
}

impl BalanceMonitor {
    pub fn new(exchange: Arc<dyn ExchangeClient>, config: MarginConfig, admission_floor_pct: Decimal, backtest_mode: bool) -> Self {
        Self {
            exchange,
            config,
            admission_floor_pct,
            backtest_mode,
            history: Mutex::new(VecDeque::new()),
            auth_failures: Mutex::new(0),
        }
    }

    fn thresholds(&self) -> MarginThresholds {
        MarginThresholds {
            safe: self.config.safe,
            caution: self.config.caution,
            warning: self.config.warning,
            critical: self.config.critical,
        }
    }

    async fn record_history(&self, data: MarginData) {
        let mut history = self.history.lock().await;
        history.push_back(data);
        if history.len() > self.config.max_history_count {
            history.pop_front();
        }
    }

    pub async fn recent_history(&self) -> Vec<MarginData> {
        self.history.lock().await.iter().cloned().collect()
    }

    /// API-first margin read: in live/paper mode, ask the exchange for its
    /// own margin-ratio view; fall back to the balance/position-value
    /// formula if the endpoint errors or omits the ratio, or if we're
    /// running in backtest mode where there's no exchange to ask.
    pub async fn current_margin(&self, position_value: Decimal) -> MarginData {
        let balance = match self.exchange.fetch_balance().await {
            Ok(b) => b.total,
            Err(e) => {
                warn!("balance fetch failed, using zero balance: {}", e);
                Decimal::ZERO
            }
        };

        let ratio_pct = if self.backtest_mode {
            margin_ratio_pct(balance, position_value, &self.config)
        } else {
            match self.exchange.fetch_margin_status().await {
                Ok(snapshot) if snapshot.margin_ratio.is_some() => snapshot.margin_ratio.unwrap(),
                _ => margin_ratio_pct(balance, position_value, &self.config),
            }
        };

        let data = MarginData {
            balance,
            position_value,
            margin_ratio_pct: ratio_pct,
            status: MarginStatus::from_ratio_pct(ratio_pct, &self.thresholds()),
            timestamp: Utc::now(),
        };
        self.record_history(data.clone()).await;
        data
    }

    /// Projects the margin ratio forward for a proposed new position.
    /// Zero-position detection takes precedence over any cached estimate:
    /// if the exchange reports no open positions on `symbol`, the current
    /// position value is treated as 0 regardless of what the formula would
    /// otherwise infer.
    pub async fn predict_future_ratio(
        &self,
        symbol: &str,
        new_amount: Decimal,
        new_price: Decimal,
    ) -> MarginPrediction {
        let has_open_positions = !self
            .exchange
            .fetch_margin_positions(symbol)
            .await
            .unwrap_or_default()
            .is_empty();

        let balance = self.exchange.fetch_balance().await.map(|b| b.total).unwrap_or(Decimal::ZERO);

        let current_ratio_pct = match self.exchange.fetch_margin_status().await {
            Ok(s) if s.margin_ratio.is_some() => s.margin_ratio.unwrap(),
            _ => Decimal::MAX,
        };

        let current_position_value = if !has_open_positions {
            Decimal::ZERO
        } else if current_ratio_pct > Decimal::ZERO && current_ratio_pct < self.config.max_ratio_cap {
            // Invert the formula: position_value = balance / ratio * 100
            (balance / current_ratio_pct) * Decimal::from(100)
        } else {
            Decimal::ZERO
        };

        let new_notional = new_amount * new_price;
        let predicted_position_value = current_position_value + new_notional;
        let predicted_ratio_pct = margin_ratio_pct(balance, predicted_position_value, &self.config);

        MarginPrediction {
            current_ratio_pct,
            predicted_ratio_pct,
            would_breach_critical: predicted_ratio_pct < self.config.critical,
        }
    }

    /// Balance sufficiency check for a proposed notional addition. API-auth
    /// failures (exchange error code 20001) accumulate in a sticky counter;
    /// once it reaches `MAX_AUTH_RETRIES` trading halts for new entries
    /// (exits/monitoring are unaffected — the caller decides that, this
    /// method only reports the gate). The counter resets on the next
    /// successful check.
    pub async fn validate_margin(&self, required: Decimal) -> Result<MarginSufficiency, MarginError> {
        {
            let failures = *self.auth_failures.lock().await;
            if failures >= MAX_AUTH_RETRIES {
                return Err(MarginError::TradingHalted { max_retries: MAX_AUTH_RETRIES });
            }
        }

        match self.exchange.fetch_balance().await {
            Ok(balance) => {
                *self.auth_failures.lock().await = 0;
                let sufficient = balance.free >= required;
                Ok(MarginSufficiency {
                    sufficient,
                    available: balance.free,
                    required,
                })
            }
            Err(e) => {
                use crate::domain::ports::ExchangeErrorCode;
                let is_auth_error = matches!(
                    &e,
                    crate::domain::errors::MarketDataError::ExchangeApiError { code: Some(c), .. }
                        if ExchangeErrorCode::from_code(*c) == ExchangeErrorCode::ApiAuth
                );
                if is_auth_error {
                    let mut failures = self.auth_failures.lock().await;
                    *failures += 1;
                    let attempt = *failures;
                    warn!("margin auth check failed, attempt {}/{}", attempt, MAX_AUTH_RETRIES);
                    if attempt >= MAX_AUTH_RETRIES {
                        error!("margin auth failures exceeded {}, halting new entries", MAX_AUTH_RETRIES);
                        return Err(MarginError::TradingHalted { max_retries: MAX_AUTH_RETRIES });
                    }
                    return Err(MarginError::AuthFailure { attempt, max_retries: MAX_AUTH_RETRIES });
                }
                warn!("balance fetch failed ({}), treating as insufficient", e);
                Ok(MarginSufficiency {
                    sufficient: false,
                    available: Decimal::ZERO,
                    required,
                })
            }
        }
    }

    /// Admission-time floor check: denies if the predicted post-trade
    /// ratio would fall below the configured admission floor.
    pub fn check_admission_floor(&self, prediction: &MarginPrediction) -> Result<(), MarginError> {
        if prediction.predicted_ratio_pct < self.admission_floor_pct {
            return Err(MarginError::BelowAdmissionFloor {
                ratio: prediction.predicted_ratio_pct.to_f64().unwrap_or(0.0),
                floor: self.admission_floor_pct.to_f64().unwrap_or(0.0),
            });
        }
        Ok(())
    }
}
