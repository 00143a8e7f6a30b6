//! Process entry point: wires the execution core's components together
//! from `Config`/`ThresholdsConfig` and runs the background monitoring
//! loop (§4.12 StopManager) plus the orphan-SL startup drain (§4.12,
//! §6 persisted state). Trade evaluations themselves are produced by an
//! external strategy/signal layer out of this core's scope (spec.md §1);
//! this binary wires and operates the core's always-on
//! resilience/monitoring surface.

use std::sync::Arc;
use std::time::Duration;

use margin_core::application::execution::StopManager;
use margin_core::application::execution::stop_manager::{AutoExecutionKind, StopCheckOutcome};
use margin_core::application::ml::{MLAdapter, MLLoader};
use margin_core::application::position::tracker::PositionTracker;
use margin_core::application::resilience::ResilienceManager;
use margin_core::config::{Config, ThresholdsConfig};
use margin_core::domain::ml::feature_catalog::{FeatureCatalog, FeatureCatalogManifest};
use margin_core::domain::resilience::types::Severity;
use margin_core::infrastructure::exchange::http::HttpExchangeClient;
use margin_core::infrastructure::observability::metrics::Metrics;
use margin_core::infrastructure::persistence::database::Database;
use margin_core::infrastructure::persistence::orphan_journal::OrphanSlJournal;
use tracing::{error, info, warn};
use tracing_subscriber::prelude::*;

/// How often the StopManager tick runs (spec.md §4.12: "ticks
/// approximately every few seconds").
const MONITOR_TICK: Duration = Duration::from_secs(5);
/// Cadence for logging the Prometheus text encoding; a real deployment
/// scrapes `Metrics::render()` through whatever push path the surrounding
/// operator stack uses (out of this core's scope).
const METRICS_LOG_INTERVAL: Duration = Duration::from_secs(60);
/// Cadence for the stale-unfilled-order cleanup pass (§4.12 background
/// cleanup). Runs far less often than the monitor tick: it only matters
/// once the exchange's active-order count is already past the configured
/// threshold.
const CLEANUP_TICK: Duration = Duration::from_secs(900);

fn load_feature_catalog(path: &str) -> FeatureCatalog {
    match std::fs::read_to_string(path) {
        Ok(raw) => match serde_json::from_str::<FeatureCatalogManifest>(&raw) {
            Ok(manifest) => FeatureCatalog::from_manifest(manifest),
            Err(e) => {
                warn!("feature catalog manifest at {path} is malformed ({e}); using fallback");
                FeatureCatalog::fallback()
            }
        },
        Err(e) => {
            warn!("feature catalog manifest not found at {path} ({e}); using fallback");
            FeatureCatalog::fallback()
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    info!("starting margin-core execution engine");

    let config = Config::from_env()?;
    let thresholds = ThresholdsConfig::load_or_default(config.thresholds_path.as_deref());

    let _db = Database::new(&config.database_url).await?;

    let metrics = Metrics::new()?;

    let exchange: Arc<HttpExchangeClient> = Arc::new(HttpExchangeClient::new(
        if config.testnet {
            "https://testnet.example-exchange.invalid".to_string()
        } else {
            "https://api.example-exchange.invalid".to_string()
        },
        config.api_key.clone(),
        config.api_secret.clone(),
        500,
        metrics.clone(),
    ));

    let resilience = Arc::new(ResilienceManager::new());
    let tracker = Arc::new(PositionTracker::new());

    let catalog = load_feature_catalog(&config.feature_catalog_path);
    let ml_loader = MLLoader::new(config.model_dir.clone(), catalog.has_stacking());
    let ml_adapter = MLAdapter::new(ml_loader, catalog);
    info!(level = ?ml_adapter.active_level(), "ML model pipeline loaded");

    let journal = OrphanSlJournal::new(config.orphan_journal_path.clone());
    let stop_manager = StopManager::new(
        exchange.clone(),
        thresholds.position_management.stop_loss.clone(),
        thresholds.position_management.emergency_stop_loss.clone(),
        thresholds.trading.fees.clone(),
        journal,
        thresholds.position_management.cleanup.clone(),
    );

    info!("draining orphan-SL journal from previous run");
    stop_manager.drain_orphan_journal(&config.symbol).await;

    info!(symbol = %config.symbol, "entering monitoring loop");
    let mut monitor_ticker = tokio::time::interval(MONITOR_TICK);
    let mut metrics_ticker = tokio::time::interval(METRICS_LOG_INTERVAL);
    let mut cleanup_ticker = tokio::time::interval(CLEANUP_TICK);

    loop {
        tokio::select! {
            _ = monitor_ticker.tick() => {
                if !resilience.can_proceed("stop_manager") {
                    warn!("stop_manager circuit breaker open or emergency stop active; skipping tick");
                    continue;
                }

                let auto_execs = stop_manager.detect_auto_executions(&tracker, &config.symbol).await;
                for exec in &auto_execs {
                    info!(?exec, "exchange-triggered TP/SL detected");
                    metrics.inc_tp_sl_execution(
                        match exec.via {
                            AutoExecutionKind::TakeProfit => "tp",
                            AutoExecutionKind::StopLoss => "sl",
                        },
                        "auto_detected",
                    );
                }

                match exchange.fetch_ticker(&config.symbol).await {
                    Ok(ticker) => {
                        resilience.record_success("market_data_fetcher");
                        for position in tracker.get_all() {
                            let outcome = stop_manager
                                .check_position(&position, &config.symbol, ticker.last)
                                .await;
                            if matches!(outcome, StopCheckOutcome::NoAction) {
                                continue;
                            }
                            info!(?outcome, order_id = %position.order_id, "stop check outcome, placing market exit");
                            match stop_manager
                                .place_market_exit(&config.symbol, position.side, position.amount)
                                .await
                            {
                                Ok(exit_order_id) => {
                                    info!(order_id = %position.order_id, %exit_order_id, "stop-triggered market exit placed");
                                    if let Some((_, handles)) = tracker.remove_with_cleanup(&position.order_id) {
                                        stop_manager.cancel_protective_orders(&handles, &config.symbol).await;
                                    }
                                    metrics.inc_tp_sl_execution(
                                        match outcome {
                                            StopCheckOutcome::TakeProfitHit { .. } => "tp",
                                            StopCheckOutcome::StopLossFallbackTriggered { .. } => "sl",
                                            StopCheckOutcome::EmergencyExit { .. } => "emergency",
                                            StopCheckOutcome::NoAction => unreachable!(),
                                        },
                                        "bot_triggered",
                                    );
                                }
                                Err(e) => {
                                    error!(order_id = %position.order_id, "stop-triggered market exit failed: {e}");
                                }
                            }
                        }
                    }
                    Err(e) => {
                        resilience.record_error(
                            "market_data_fetcher",
                            "ticker_fetch_failed",
                            &e.to_string(),
                            Severity::Warning,
                        );
                        error!("ticker fetch failed: {e}");
                    }
                }

                metrics.open_positions_count.set(tracker.count() as f64);
                metrics.emergency_stop_active.set(if resilience.emergency_stop_active() { 1.0 } else { 0.0 });
            }
            _ = metrics_ticker.tick() => {
                info!(metrics = %metrics.render(), "metrics snapshot");
            }
            _ = cleanup_ticker.tick() => {
                if !resilience.can_proceed("stop_manager") {
                    warn!("stop_manager circuit breaker open or emergency stop active; skipping stale-order cleanup");
                    continue;
                }
                stop_manager.cleanup_stale_orders(&tracker, &config.symbol).await;
            }
        }
    }
}
