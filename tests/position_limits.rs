//! Integration coverage for `PositionLimits`' six ordered admission gates
//! (spec.md §4.7, scenario S2) and their interaction with
//! `CooldownManager`'s trend-strength bypass (§4.8).

use chrono::Utc;
use margin_core::application::position::{CooldownManager, PositionLimits, ProposedTrade};
use margin_core::config::PositionManagementConfig;
use margin_core::domain::errors::LimitViolation;
use margin_core::domain::trading::{Decision, Regime, Side, TradeEvaluation};
use rust_decimal_macros::dec;
use std::collections::HashMap;

fn evaluation(confidence: f64, regime: Option<Regime>) -> TradeEvaluation {
    TradeEvaluation {
        decision: Decision::Approved,
        side: Some(Side::Buy),
        position_size: dec!(0.001),
        entry_price: Some(dec!(13_000_000)),
        stop_loss: None,
        take_profit: None,
        confidence_level: confidence,
        strategy_name: "s".to_string(),
        regime,
        symbol: "BTC/JPY".to_string(),
        market_conditions: HashMap::new(),
    }
}

fn small_trade() -> ProposedTrade {
    ProposedTrade { notional: dec!(1_000), is_minimum_lot: false }
}

/// Scenario S2: two already-open positions in `tight_range` (regime limit
/// 2) deny a third admission, and the violation names both the gate and
/// the regime.
#[test]
fn s2_max_open_positions_denies_in_tight_range_regime() {
    let limits = PositionLimits::new(PositionManagementConfig::default(), CooldownManager::new(true, true, None));
    let evaluation = evaluation(0.8, Some(Regime::TightRange));

    let result = limits.check(&evaluation, small_trade(), 2, 0, None, dec!(100_000), dec!(100_000), dec!(13_000_000));

    match result {
        Err(LimitViolation::MaxOpenPositions { regime, count, limit }) => {
            assert_eq!(regime, "tight_range");
            assert_eq!(count, 2);
            assert_eq!(limit, 2);
        }
        other => panic!("expected MaxOpenPositions denial, got {other:?}"),
    }
}

/// Gate ordering: a trade that fails both the minimum-balance gate (gate 1)
/// and would also fail every later gate still reports only gate 1 — the
/// first failure short-circuits the rest (spec.md §4.7 preamble).
#[test]
fn first_failing_gate_short_circuits_later_gates() {
    let limits = PositionLimits::new(PositionManagementConfig::default(), CooldownManager::new(true, true, None));
    let evaluation = evaluation(0.1, Some(Regime::TightRange));

    // Balance is below the floor (gate 1) AND there are already 2 open
    // tight_range positions (gate 3 would also fail) AND confidence is low
    // (gate 6 would also fail) — only gate 1's violation must surface.
    let result = limits.check(&evaluation, small_trade(), 2, 0, None, dec!(5_000), dec!(5_000), dec!(13_000_000));
    assert!(matches!(result, Err(LimitViolation::MinimumBalance { .. })));
}

/// Cooldown gate (gate 2) denies a trade within the cooldown window when
/// the trend is not strong enough to bypass it, but the same trade is
/// admitted once the trend-strength composite clears the threshold.
#[test]
fn cooldown_gate_bypassed_only_by_strong_trend() {
    let weak_trend = CooldownManager::new(true, true, None);
    let limits = PositionLimits::new(PositionManagementConfig::default(), weak_trend);
    let evaluation = evaluation(0.8, Some(Regime::Normal));

    let denied = limits.check(&evaluation, small_trade(), 0, 0, Some(Utc::now()), dec!(100_000), dec!(100_000), dec!(13_000_000));
    assert!(matches!(denied, Err(LimitViolation::Cooldown { .. })));
}

/// Gate 5 (daily trade count) denies exactly at the configured cap and
/// admits one below it, all else held constant.
#[test]
fn daily_trade_count_boundary_is_inclusive_at_the_cap() {
    let limits = PositionLimits::new(PositionManagementConfig::default(), CooldownManager::new(true, true, None));
    let evaluation = evaluation(0.8, Some(Regime::Normal));

    let at_cap = limits.check(&evaluation, small_trade(), 0, 20, None, dec!(100_000), dec!(100_000), dec!(13_000_000));
    assert!(matches!(at_cap, Err(LimitViolation::DailyTradeCount { count: 20, limit: 20 })));

    let below_cap = limits.check(&evaluation, small_trade(), 0, 19, None, dec!(100_000), dec!(100_000), dec!(13_000_000));
    assert!(below_cap.is_ok());
}

/// Gate 6's minimum-lot override (spec.md §4.7 item 6 exception): a trade
/// sized to the minimum lot with `enforce_minimum=true` is admitted
/// regardless of confidence, even though its notional would otherwise
/// breach the low-confidence band.
#[test]
fn minimum_lot_override_admits_despite_low_confidence() {
    let limits = PositionLimits::new(PositionManagementConfig::default(), CooldownManager::new(true, true, None));
    let evaluation = evaluation(0.05, Some(Regime::Normal));
    let oversized_minimum_lot = ProposedTrade { notional: dec!(2_000_000), is_minimum_lot: true };

    let result = limits.check(&evaluation, oversized_minimum_lot, 0, 0, None, dec!(100_000), dec!(100_000), dec!(13_000_000));
    assert!(result.is_ok());
}

/// Gate 6 confidence bands: the same notional is admitted at high
/// confidence and denied at low confidence, all other gates held fixed.
#[test]
fn confidence_band_widens_allowed_notional_with_confidence() {
    let limits = PositionLimits::new(PositionManagementConfig::default(), CooldownManager::new(true, true, None));
    let trade = ProposedTrade { notional: dec!(8_000), is_minimum_lot: false };

    let high_confidence = evaluation(0.8, Some(Regime::Normal));
    assert!(limits.check(&high_confidence, trade, 0, 0, None, dec!(100_000), dec!(100_000), dec!(13_000_000)).is_ok());

    let low_confidence = evaluation(0.3, Some(Regime::Normal));
    let denied = limits.check(&low_confidence, trade, 0, 0, None, dec!(100_000), dec!(100_000), dec!(13_000_000));
    assert!(matches!(denied, Err(LimitViolation::CapitalUsage { .. })));
}
