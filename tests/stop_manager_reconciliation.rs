//! Integration coverage for `StopManager` (spec.md §4.12, scenarios S4-S5,
//! §8 property 8): exchange-side TP/SL auto-execution detection with
//! sibling cancellation, and the safety-margin-guarded SL timeout fallback.

use margin_core::application::position::PositionTracker;
use margin_core::config::{CleanupConfig, EmergencyStopLossConfig, FeesConfig, StopLossConfig};
use margin_core::domain::ports::{MarginPositionSnapshot, OrderState, PositionSide};
use margin_core::domain::trading::{OrderStatus, Side, VirtualPosition};
use margin_core::infrastructure::exchange::MockExchangeClient;
use margin_core::infrastructure::persistence::OrphanSlJournal;
use margin_core::application::execution::{AutoExecutionKind, StopManager};
use rust_decimal_macros::dec;
use std::sync::Arc;

fn manager(mock: Arc<MockExchangeClient>, stop_loss_config: StopLossConfig) -> StopManager {
    StopManager::new(
        mock,
        stop_loss_config,
        EmergencyStopLossConfig::default(),
        FeesConfig::default(),
        OrphanSlJournal::new(std::env::temp_dir().join(format!("stopmgr-reconcile-{}.json", uuid::Uuid::new_v4()))),
        CleanupConfig::default(),
    )
}

fn position_with_orders(order_id: &str, side: Side, entry: rust_decimal::Decimal, tp: Option<rust_decimal::Decimal>, sl: Option<rust_decimal::Decimal>) -> VirtualPosition {
    VirtualPosition::new(order_id, side, dec!(0.001), entry, chrono::Utc::now(), tp, sl, "s").unwrap()
}

/// Scenario S4: the exchange filled the TP on its own (the bot's position
/// disappeared from the margin snapshot, and the TP order is reported
/// closed). The sibling SL gets cancelled, the tracker entry is removed,
/// and the realized PnL is the gross move minus both leg fees.
#[tokio::test]
async fn tp_auto_execution_cancels_sibling_sl_and_realizes_pnl() {
    let mock = Arc::new(MockExchangeClient::new());
    mock.seed_order(
        "tp-1",
        OrderState {
            id: "tp-1".to_string(),
            status: OrderStatus::Closed,
            filled: dec!(0.001),
            average: Some(dec!(13_700_000)),
            price: Some(dec!(13_700_000)),
            amount: dec!(0.001),
            created_at: chrono::Utc::now(),
        },
    )
    .await;
    mock.seed_order(
        "sl-1",
        OrderState {
            id: "sl-1".to_string(),
            status: OrderStatus::Open,
            filled: dec!(0),
            average: None,
            price: Some(dec!(13_500_000)),
            amount: dec!(0.001),
            created_at: chrono::Utc::now(),
        },
    )
    .await;

    let tracker = PositionTracker::new();
    let mut pos = position_with_orders("entry-1", Side::Buy, dec!(13_600_000), Some(dec!(13_700_000)), Some(dec!(13_500_000)));
    pos.tp_order_id = Some("tp-1".to_string());
    pos.sl_order_id = Some("sl-1".to_string());
    tracker.add(pos);

    // No margin positions reported -> the tracked buy position is gone from
    // the exchange's point of view, i.e. it closed out somehow.
    let manager = manager(mock.clone(), StopLossConfig::default());
    let executions = manager.detect_auto_executions(&tracker, "BTC/JPY").await;

    assert_eq!(executions.len(), 1);
    assert_eq!(executions[0].via, AutoExecutionKind::TakeProfit);
    assert!(executions[0].realized_pnl > dec!(0));
    assert!(tracker.find("entry-1").is_none());

    let sl = mock.fetch_order("sl-1", "BTC/JPY").await.unwrap();
    assert_eq!(sl.status, OrderStatus::Canceled);
}

/// Mirrored for a stop-loss auto-execution: the sibling TP gets cancelled
/// and the realized PnL is negative.
#[tokio::test]
async fn sl_auto_execution_cancels_sibling_tp_and_realizes_loss() {
    let mock = Arc::new(MockExchangeClient::new());
    mock.seed_order(
        "tp-2",
        OrderState {
            id: "tp-2".to_string(),
            status: OrderStatus::Open,
            filled: dec!(0),
            average: None,
            price: Some(dec!(13_700_000)),
            amount: dec!(0.001),
            created_at: chrono::Utc::now(),
        },
    )
    .await;
    mock.seed_order(
        "sl-2",
        OrderState {
            id: "sl-2".to_string(),
            status: OrderStatus::Closed,
            filled: dec!(0.001),
            average: Some(dec!(13_500_000)),
            price: Some(dec!(13_500_000)),
            amount: dec!(0.001),
            created_at: chrono::Utc::now(),
        },
    )
    .await;

    let tracker = PositionTracker::new();
    let mut pos = position_with_orders("entry-2", Side::Buy, dec!(13_600_000), Some(dec!(13_700_000)), Some(dec!(13_500_000)));
    pos.tp_order_id = Some("tp-2".to_string());
    pos.sl_order_id = Some("sl-2".to_string());
    tracker.add(pos);

    let manager = manager(mock.clone(), StopLossConfig::default());
    let executions = manager.detect_auto_executions(&tracker, "BTC/JPY").await;

    assert_eq!(executions.len(), 1);
    assert_eq!(executions[0].via, AutoExecutionKind::StopLoss);
    assert!(executions[0].realized_pnl < dec!(0));

    let tp = mock.fetch_order("tp-2", "BTC/JPY").await.unwrap();
    assert_eq!(tp.status, OrderStatus::Canceled);
}

/// Property 8: a position still held at the exchange is neither reported as
/// a TP nor an SL auto-execution, and nothing gets cancelled or removed.
#[tokio::test]
async fn still_open_position_yields_no_auto_execution() {
    let mock = Arc::new(MockExchangeClient::new());
    let tracker = PositionTracker::new();
    tracker.add(position_with_orders("entry-3", Side::Buy, dec!(13_600_000), Some(dec!(13_700_000)), Some(dec!(13_500_000))));

    *mock.margin_positions.lock().await = vec![MarginPositionSnapshot { side: PositionSide::Long, amount: dec!(0.001) }];

    let manager = manager(mock, StopLossConfig::default());
    let executions = manager.detect_auto_executions(&tracker, "BTC/JPY").await;

    assert!(executions.is_empty());
    assert!(tracker.find("entry-3").is_some());
}

/// Scenario S5 case A: price sits inside the SL safety zone but the
/// exchange still reports the native stop as open. No fallback — a
/// transient check must not race an order that is simply still live.
#[tokio::test]
async fn native_sl_confirmed_open_suppresses_timeout_fallback() {
    let mock = Arc::new(MockExchangeClient::new());
    mock.seed_order(
        "native-sl",
        OrderState {
            id: "native-sl".to_string(),
            status: OrderStatus::Open,
            filled: dec!(0),
            average: None,
            price: Some(dec!(13_500_000)),
            amount: dec!(0.001),
            created_at: chrono::Utc::now(),
        },
    )
    .await;

    let mut stop_loss_config = StopLossConfig::default();
    stop_loss_config.skip_bot_monitoring = true;
    stop_loss_config.stop_limit_timeout = 0;
    let manager = manager(mock, stop_loss_config);

    let mut pos = position_with_orders("entry-4", Side::Buy, dec!(13_600_000), Some(dec!(13_700_000)), Some(dec!(13_500_000)));
    pos.sl_order_id = Some("native-sl".to_string());
    pos.sl_placed_at = Some(chrono::Utc::now() - chrono::Duration::seconds(120));

    // Price is just inside the 1.5% safety zone below the SL trigger.
    let price = dec!(13_495_000);
    let outcome = manager.check_position(&pos, "BTC/JPY", price).await;
    assert_eq!(outcome, margin_core::application::execution::StopCheckOutcome::NoAction);
}

/// Scenario S5 case B: price sits inside the SL safety zone and the
/// exchange reports the native stop as neither open, closed, nor
/// cancelled — the bot falls back to a market exit rather than trusting a
/// native order that may never have been accepted.
#[tokio::test]
async fn native_sl_unconfirmed_inside_zone_triggers_fallback() {
    let mock = Arc::new(MockExchangeClient::new());
    // Order intentionally never seeded: fetch_order returns InvalidData,
    // which native_sl_confirmed_stuck treats as "failed to confirm" (false)
    // -- so instead seed it with a status outside the confirmed set.
    mock.seed_order(
        "native-sl-2",
        OrderState {
            id: "native-sl-2".to_string(),
            status: OrderStatus::Unverifiable,
            filled: dec!(0),
            average: None,
            price: Some(dec!(13_500_000)),
            amount: dec!(0.001),
            created_at: chrono::Utc::now(),
        },
    )
    .await;

    let mut stop_loss_config = StopLossConfig::default();
    stop_loss_config.skip_bot_monitoring = true;
    stop_loss_config.stop_limit_timeout = 0;
    let manager = manager(mock, stop_loss_config);

    let mut pos = position_with_orders("entry-5", Side::Buy, dec!(13_600_000), Some(dec!(13_700_000)), Some(dec!(13_500_000)));
    pos.sl_order_id = Some("native-sl-2".to_string());
    pos.sl_placed_at = Some(chrono::Utc::now() - chrono::Duration::seconds(120));

    let price = dec!(13_495_000);
    let outcome = manager.check_position(&pos, "BTC/JPY", price).await;
    assert_eq!(
        outcome,
        margin_core::application::execution::StopCheckOutcome::StopLossFallbackTriggered {
            order_id: "entry-5".to_string(),
            exit_price: price,
        }
    );
}
