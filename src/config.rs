//! Configuration sources: environment variables for credentials/paths
//! (`Config::from_env`), and a hot-reloadable TOML thresholds document for
//! every tunable referenced by the position/order/margin/risk subsystems
//! (`ThresholdsConfig::load`). Mirrors the teacher's `config/` module split
//! between env-driven broker config and a parsed tunables document.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::path::Path;

/// Runtime identity/connection settings, read once at process start.
#[derive(Debug, Clone)]
pub struct Config {
    pub api_key: String,
    pub api_secret: String,
    pub testnet: bool,
    pub symbol: String,
    pub model_dir: String,
    pub feature_catalog_path: String,
    pub database_url: String,
    pub orphan_journal_path: String,
    pub thresholds_path: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            api_key: env::var("EXCHANGE_API_KEY").unwrap_or_default(),
            api_secret: env::var("EXCHANGE_API_SECRET").unwrap_or_default(),
            testnet: matches!(env::var("EXCHANGE_TESTNET").as_deref(), Ok("true") | Ok("1")),
            symbol: env::var("TRADING_SYMBOL").unwrap_or_else(|_| "BTC/JPY".to_string()),
            model_dir: env::var("MODEL_DIR").unwrap_or_else(|_| "models".to_string()),
            feature_catalog_path: env::var("FEATURE_CATALOG_PATH")
                .unwrap_or_else(|_| "config/feature_catalog.json".to_string()),
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite://data/margin-core.db".to_string()),
            orphan_journal_path: env::var("ORPHAN_SL_JOURNAL_PATH")
                .unwrap_or_else(|_| "data/orphan_sl_journal.json".to_string()),
            thresholds_path: env::var("THRESHOLDS_CONFIG_PATH").ok(),
        })
    }
}

fn dec_default<const N: i64>() -> Decimal {
    Decimal::from(N)
}

#[derive(Debug, Clone, Deserialize)]
pub struct TradeSizeBands {
    #[serde(default = "default_low_confidence_ratio")]
    pub low_confidence: f64,
    #[serde(default = "default_medium_confidence_ratio")]
    pub medium_confidence: f64,
    #[serde(default = "default_high_confidence_ratio")]
    pub high_confidence: f64,
    #[serde(default = "default_true")]
    pub enforce_minimum: bool,
}
fn default_low_confidence_ratio() -> f64 {
    0.03
}
fn default_medium_confidence_ratio() -> f64 {
    0.05
}
fn default_high_confidence_ratio() -> f64 {
    0.10
}
fn default_true() -> bool {
    true
}

impl Default for TradeSizeBands {
    fn default() -> Self {
        Self {
            low_confidence: default_low_confidence_ratio(),
            medium_confidence: default_medium_confidence_ratio(),
            high_confidence: default_high_confidence_ratio(),
            enforce_minimum: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct DynamicPositionSizing {
    #[serde(default)]
    pub enabled: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FixedAmountTakeProfit {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub target_net_profit: Decimal,
    #[serde(default = "default_true")]
    pub include_entry_fee: bool,
    #[serde(default = "default_true")]
    pub include_exit_fee_rebate: bool,
    #[serde(default = "default_true")]
    pub include_interest: bool,
}

impl Default for FixedAmountTakeProfit {
    fn default() -> Self {
        Self {
            enabled: false,
            target_net_profit: Decimal::ZERO,
            include_entry_fee: true,
            include_exit_fee_rebate: true,
            include_interest: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TakeProfitConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_min_profit_ratio")]
    pub min_profit_ratio: f64,
    #[serde(default = "default_take_profit_ratio")]
    pub default_ratio: f64,
    #[serde(default)]
    pub fixed_amount: FixedAmountTakeProfit,
}
fn default_min_profit_ratio() -> f64 {
    0.009
}
fn default_take_profit_ratio() -> f64 {
    1.29
}

impl Default for TakeProfitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_profit_ratio: default_min_profit_ratio(),
            default_ratio: default_take_profit_ratio(),
            fixed_amount: FixedAmountTakeProfit::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct RetryOnUnfilled {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_slippage_increase")]
    pub slippage_increase_per_retry: f64,
}
fn default_max_retries() -> u32 {
    3
}
fn default_slippage_increase() -> f64 {
    0.001
}

#[derive(Debug, Clone, Deserialize)]
pub struct FillConfirmation {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_fill_timeout")]
    pub timeout_seconds: u64,
    #[serde(default = "default_fill_check_interval")]
    pub check_interval_seconds: u64,
}
fn default_fill_timeout() -> u64 {
    30
}
fn default_fill_check_interval() -> u64 {
    3
}
impl Default for FillConfirmation {
    fn default() -> Self {
        Self {
            enabled: false,
            timeout_seconds: default_fill_timeout(),
            check_interval_seconds: default_fill_check_interval(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopOrderType {
    Stop,
    StopLimit,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MinDistance {
    #[serde(default = "default_min_distance_ratio")]
    pub ratio: f64,
}
fn default_min_distance_ratio() -> f64 {
    0.001
}
impl Default for MinDistance {
    fn default() -> Self {
        Self {
            ratio: default_min_distance_ratio(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StopLossConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_max_loss_ratio")]
    pub max_loss_ratio: f64,
    #[serde(default = "default_atr_multiplier")]
    pub default_atr_multiplier: f64,
    #[serde(default)]
    pub min_distance: MinDistance,
    #[serde(default = "default_stop_order_type")]
    pub order_type: StopOrderType,
    #[serde(default = "default_true")]
    pub skip_bot_monitoring: bool,
    #[serde(default = "default_stop_limit_timeout")]
    pub stop_limit_timeout: i64,
    #[serde(default)]
    pub retry_on_unfilled: RetryOnUnfilled,
    #[serde(default)]
    pub fill_confirmation: FillConfirmation,
}
fn default_max_loss_ratio() -> f64 {
    0.007
}
fn default_atr_multiplier() -> f64 {
    2.0
}
fn default_stop_order_type() -> StopOrderType {
    StopOrderType::StopLimit
}
fn default_stop_limit_timeout() -> i64 {
    300
}

impl Default for StopLossConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_loss_ratio: default_max_loss_ratio(),
            default_atr_multiplier: default_atr_multiplier(),
            min_distance: MinDistance::default(),
            order_type: default_stop_order_type(),
            skip_bot_monitoring: true,
            stop_limit_timeout: default_stop_limit_timeout(),
            retry_on_unfilled: RetryOnUnfilled::default(),
            fill_confirmation: FillConfirmation::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmergencyStopLossConfig {
    #[serde(default)]
    pub enable: bool,
    #[serde(default = "default_max_loss_threshold")]
    pub max_loss_threshold: f64,
    #[serde(default = "default_min_hold_minutes")]
    pub min_hold_minutes: i64,
    #[serde(default = "default_price_change_threshold")]
    pub price_change_threshold: f64,
}
fn default_max_loss_threshold() -> f64 {
    0.05
}
fn default_min_hold_minutes() -> i64 {
    1
}
fn default_price_change_threshold() -> f64 {
    0.03
}
impl Default for EmergencyStopLossConfig {
    fn default() -> Self {
        Self {
            enable: true,
            max_loss_threshold: default_max_loss_threshold(),
            min_hold_minutes: default_min_hold_minutes(),
            price_change_threshold: default_price_change_threshold(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct TrailingConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub activation_profit: f64,
    #[serde(default)]
    pub trailing_percent: f64,
    #[serde(default)]
    pub min_update_distance: f64,
    #[serde(default)]
    pub min_profit_lock: f64,
    #[serde(default)]
    pub cancel_tp_when_exceeds: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CleanupConfig {
    #[serde(default = "default_max_age_hours")]
    pub max_age_hours: i64,
    #[serde(default = "default_threshold_count")]
    pub threshold_count: usize,
}
fn default_max_age_hours() -> i64 {
    24
}
fn default_threshold_count() -> usize {
    25
}
impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            max_age_hours: default_max_age_hours(),
            threshold_count: default_threshold_count(),
        }
    }
}

/// Per-regime TP/SL overrides, looked up as `regime_based.<regime_name>`.
/// Any field left unset falls back to the top-level stop-loss/take-profit
/// default for that parameter.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RegimeTpSlOverride {
    #[serde(default)]
    pub atr_multiplier: Option<f64>,
    #[serde(default)]
    pub take_profit_ratio: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PositionManagementConfig {
    #[serde(default = "default_min_account_balance")]
    pub min_account_balance: Decimal,
    #[serde(default = "default_min_trade_size")]
    pub min_trade_size: Decimal,
    #[serde(default = "default_max_open_positions")]
    pub max_open_positions: u32,
    #[serde(default)]
    pub max_open_positions_by_regime: HashMap<String, u32>,
    #[serde(default = "default_cooldown_minutes")]
    pub cooldown_minutes: i64,
    #[serde(default = "default_max_daily_trades")]
    pub max_daily_trades: usize,
    #[serde(default)]
    pub max_position_ratio_per_trade: TradeSizeBands,
    #[serde(default)]
    pub dynamic_position_sizing: DynamicPositionSizing,
    #[serde(default)]
    pub take_profit: TakeProfitConfig,
    #[serde(default)]
    pub stop_loss: StopLossConfig,
    #[serde(default)]
    pub emergency_stop_loss: EmergencyStopLossConfig,
    #[serde(default)]
    pub trailing: TrailingConfig,
    #[serde(default)]
    pub cleanup: CleanupConfig,
    #[serde(default = "default_capital_usage_limit_pct")]
    pub capital_usage_limit_pct: f64,
    #[serde(default)]
    pub regime_based: HashMap<String, RegimeTpSlOverride>,
}
fn default_min_account_balance() -> Decimal {
    dec_default::<10_000>()
}
fn default_min_trade_size() -> Decimal {
    "0.0001".parse().unwrap_or(dec!(0.0001))
}
fn default_max_open_positions() -> u32 {
    3
}
fn default_cooldown_minutes() -> i64 {
    30
}
fn default_max_daily_trades() -> usize {
    20
}
fn default_capital_usage_limit_pct() -> f64 {
    30.0
}

impl Default for PositionManagementConfig {
    fn default() -> Self {
        Self {
            min_account_balance: default_min_account_balance(),
            min_trade_size: default_min_trade_size(),
            max_open_positions: default_max_open_positions(),
            max_open_positions_by_regime: HashMap::from([
                ("tight_range".to_string(), 2),
                ("normal".to_string(), 3),
                ("breakout".to_string(), 4),
            ]),
            cooldown_minutes: default_cooldown_minutes(),
            max_daily_trades: default_max_daily_trades(),
            max_position_ratio_per_trade: TradeSizeBands::default(),
            dynamic_position_sizing: DynamicPositionSizing::default(),
            take_profit: TakeProfitConfig::default(),
            stop_loss: StopLossConfig::default(),
            emergency_stop_loss: EmergencyStopLossConfig::default(),
            trailing: TrailingConfig::default(),
            cleanup: CleanupConfig::default(),
            capital_usage_limit_pct: default_capital_usage_limit_pct(),
            regime_based: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryPriceStrategy {
    Favorable,
    Unfavorable,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MakerStrategyConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_interval_ms")]
    pub retry_interval_ms: u64,
    #[serde(default = "default_maker_timeout_seconds")]
    pub timeout_seconds: u64,
    #[serde(default = "default_min_spread_for_maker")]
    pub min_spread_for_maker: f64,
    #[serde(default = "default_volatility_threshold")]
    pub volatility_threshold: f64,
    #[serde(default = "default_price_adjustment_tick")]
    pub price_adjustment_tick: Decimal,
    #[serde(default = "default_max_price_adjustment_ratio")]
    pub max_price_adjustment_ratio: f64,
}
fn default_retry_interval_ms() -> u64 {
    500
}
fn default_maker_timeout_seconds() -> u64 {
    30
}
fn default_min_spread_for_maker() -> f64 {
    0.001
}
fn default_volatility_threshold() -> f64 {
    0.02
}
fn default_price_adjustment_tick() -> Decimal {
    Decimal::ONE
}
fn default_max_price_adjustment_ratio() -> f64 {
    0.001
}

impl Default for MakerStrategyConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_retries: default_max_retries(),
            retry_interval_ms: default_retry_interval_ms(),
            timeout_seconds: default_maker_timeout_seconds(),
            min_spread_for_maker: default_min_spread_for_maker(),
            volatility_threshold: default_volatility_threshold(),
            price_adjustment_tick: default_price_adjustment_tick(),
            max_price_adjustment_ratio: default_max_price_adjustment_ratio(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct OrderExecutionConfig {
    #[serde(default)]
    pub smart_order_enabled: bool,
    #[serde(default = "default_entry_price_strategy")]
    pub entry_price_strategy: EntryPriceStrategy,
    #[serde(default = "default_guaranteed_execution_premium")]
    pub guaranteed_execution_premium: f64,
    #[serde(default = "default_price_improvement_ratio")]
    pub price_improvement_ratio: f64,
    #[serde(default = "default_high_confidence_threshold")]
    pub high_confidence_threshold: f64,
    #[serde(default = "default_low_confidence_threshold")]
    pub low_confidence_threshold: f64,
    #[serde(default = "default_max_spread_ratio_for_limit")]
    pub max_spread_ratio_for_limit: f64,
    #[serde(default)]
    pub maker_strategy: MakerStrategyConfig,
}
fn default_entry_price_strategy() -> EntryPriceStrategy {
    EntryPriceStrategy::Favorable
}
fn default_guaranteed_execution_premium() -> f64 {
    0.0005
}
fn default_price_improvement_ratio() -> f64 {
    0.001
}
fn default_high_confidence_threshold() -> f64 {
    0.75
}
fn default_low_confidence_threshold() -> f64 {
    0.40
}
fn default_max_spread_ratio_for_limit() -> f64 {
    0.005
}

impl Default for OrderExecutionConfig {
    fn default() -> Self {
        Self {
            smart_order_enabled: false,
            entry_price_strategy: default_entry_price_strategy(),
            guaranteed_execution_premium: default_guaranteed_execution_premium(),
            price_improvement_ratio: default_price_improvement_ratio(),
            high_confidence_threshold: default_high_confidence_threshold(),
            low_confidence_threshold: default_low_confidence_threshold(),
            max_spread_ratio_for_limit: default_max_spread_ratio_for_limit(),
            maker_strategy: MakerStrategyConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MarginConfig {
    #[serde(default = "default_margin_safe")]
    pub safe: Decimal,
    #[serde(default = "default_margin_caution")]
    pub caution: Decimal,
    #[serde(default = "default_margin_warning")]
    pub warning: Decimal,
    #[serde(default = "default_margin_critical")]
    pub critical: Decimal,
    #[serde(default = "default_min_position_value")]
    pub min_position_value: Decimal,
    #[serde(default = "default_max_ratio_cap")]
    pub max_ratio_cap: Decimal,
    #[serde(default = "default_large_drop_threshold")]
    pub large_drop_threshold: Decimal,
    #[serde(default = "default_max_history_count")]
    pub max_history_count: usize,
}
fn default_margin_safe() -> Decimal {
    dec_default::<200>()
}
fn default_margin_caution() -> Decimal {
    dec_default::<150>()
}
fn default_margin_warning() -> Decimal {
    dec_default::<100>()
}
fn default_margin_critical() -> Decimal {
    dec_default::<80>()
}
fn default_min_position_value() -> Decimal {
    dec_default::<1_000>()
}
fn default_max_ratio_cap() -> Decimal {
    dec_default::<10_000>()
}
fn default_large_drop_threshold() -> Decimal {
    dec_default::<50>()
}
fn default_max_history_count() -> usize {
    100
}

impl Default for MarginConfig {
    fn default() -> Self {
        Self {
            safe: default_margin_safe(),
            caution: default_margin_caution(),
            warning: default_margin_warning(),
            critical: default_margin_critical(),
            min_position_value: default_min_position_value(),
            max_ratio_cap: default_max_ratio_cap(),
            large_drop_threshold: default_large_drop_threshold(),
            max_history_count: default_max_history_count(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RiskConfig {
    #[serde(default = "default_true")]
    pub require_tpsl_recalculation: bool,
    #[serde(default = "default_fallback_atr")]
    pub fallback_atr: Decimal,
}
fn default_fallback_atr() -> Decimal {
    dec_default::<500_000>()
}
impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            require_tpsl_recalculation: true,
            fallback_atr: default_fallback_atr(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeesConfig {
    #[serde(default = "default_fee_rate")]
    pub entry_taker_rate: f64,
    #[serde(default = "default_fee_rate")]
    pub exit_taker_rate: f64,
}
fn default_fee_rate() -> f64 {
    0.001
}
impl Default for FeesConfig {
    fn default() -> Self {
        Self {
            entry_taker_rate: default_fee_rate(),
            exit_taker_rate: default_fee_rate(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TradingConfig {
    #[serde(default = "default_fallback_btc_jpy")]
    pub fallback_btc_jpy: Decimal,
    #[serde(default)]
    pub fees: FeesConfig,
}
fn default_fallback_btc_jpy() -> Decimal {
    dec_default::<16_500_000>()
}
impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            fallback_btc_jpy: default_fallback_btc_jpy(),
            fees: FeesConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BalanceAlertConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_min_required_margin")]
    pub min_required_margin: Decimal,
}
fn default_min_required_margin() -> Decimal {
    dec_default::<14_000>()
}
impl Default for BalanceAlertConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_required_margin: default_min_required_margin(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct TpSlVerificationConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub delay_seconds: u64,
    #[serde(default)]
    pub rebuild_on_missing: bool,
    #[serde(default)]
    pub default_regime: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TpSlAutoDetectionConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
}
impl Default for TpSlAutoDetectionConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// The full thresholds document described in spec.md §6, hot-reloadable
/// from a TOML file. Every section has a `Default` matching the spec's
/// literal examples, so a missing or partial document still produces a
/// fully workable configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ThresholdsConfig {
    #[serde(default)]
    pub position_management: PositionManagementConfig,
    #[serde(default)]
    pub order_execution: OrderExecutionConfig,
    #[serde(default)]
    pub margin: MarginConfig,
    #[serde(default)]
    pub risk: RiskConfig,
    #[serde(default)]
    pub trading: TradingConfig,
    #[serde(default)]
    pub balance_alert: BalanceAlertConfig,
    #[serde(default)]
    pub tp_sl_verification: TpSlVerificationConfig,
    #[serde(default)]
    pub tp_sl_auto_detection: TpSlAutoDetectionConfig,
}

impl ThresholdsConfig {
    /// Parses the TOML document at `path`. Missing sections fall back to
    /// their `Default`; a missing file entirely is not an error here (the
    /// caller decides whether to require one), callers should use
    /// `load_or_default` for the common "run with the built-in defaults"
    /// path.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading thresholds config at {path:?}"))?;
        toml::from_str(&raw).with_context(|| format!("parsing thresholds config at {path:?}"))
    }

    pub fn load_or_default(path: Option<impl AsRef<Path>>) -> Self {
        match path {
            Some(p) => Self::load(p).unwrap_or_else(|e| {
                tracing::warn!("falling back to default thresholds config: {}", e);
                Self::default()
            }),
            None => Self::default(),
        }
    }
}
