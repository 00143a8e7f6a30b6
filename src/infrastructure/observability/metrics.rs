//! Prometheus metrics definitions for margin-core
//!
//! All metrics use the `margin_core_` prefix and are read-only.

use prometheus::{
    CounterVec, Gauge, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
    core::{AtomicF64, GenericGauge, GenericGaugeVec},
};
use std::sync::Arc;

/// Prometheus metrics for the execution core
#[derive(Clone)]
pub struct Metrics {
    registry: Arc<Registry>,
    /// Current margin ratio, percent
    pub margin_ratio_pct: GenericGauge<AtomicF64>,
    /// Account balance
    pub balance: GenericGauge<AtomicF64>,
    /// Number of open virtual positions
    pub open_positions_count: GenericGauge<AtomicF64>,
    /// Circuit breaker state per component (0=closed, 1=half_open, 2=open)
    pub circuit_breaker_state: GenericGaugeVec<AtomicF64>,
    /// Whether the emergency stop latch is set (0/1)
    pub emergency_stop_active: GenericGauge<AtomicF64>,
    /// Orders placed, by side and status
    pub orders_total: CounterVec,
    /// Atomic entry rollbacks, by failed leg
    pub atomic_entry_rollbacks_total: CounterVec,
    /// Orphan SL journal entries currently pending
    pub orphan_sl_journal_size: GenericGauge<AtomicF64>,
    /// TP/SL auto-executions, by kind (tp/sl) and outcome
    pub tp_sl_executions_total: CounterVec,
    /// Exchange API latency in seconds
    pub exchange_latency_seconds: HistogramVec,
    /// Admission gate denials, by gate name
    pub position_limit_denials_total: CounterVec,
    /// Positions denied by cooldown that were overridden by trend strength
    pub cooldown_bypass_total: CounterVec,
}

impl Metrics {
    /// Create a new Metrics instance with all gauges and counters registered
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let margin_ratio_pct = Gauge::with_opts(Opts::new(
            "margin_core_margin_ratio_pct",
            "Current margin ratio, percent",
        ))?;
        registry.register(Box::new(margin_ratio_pct.clone()))?;

        let balance = Gauge::with_opts(Opts::new("margin_core_balance", "Account balance"))?;
        registry.register(Box::new(balance.clone()))?;

        let open_positions_count = Gauge::with_opts(Opts::new(
            "margin_core_open_positions_count",
            "Number of open virtual positions",
        ))?;
        registry.register(Box::new(open_positions_count.clone()))?;

        let circuit_breaker_state = GaugeVec::new(
            Opts::new(
                "margin_core_circuit_breaker_state",
                "Circuit breaker state per component (0=closed, 1=half_open, 2=open)",
            ),
            &["component"],
        )?;
        registry.register(Box::new(circuit_breaker_state.clone()))?;

        let emergency_stop_active = Gauge::with_opts(Opts::new(
            "margin_core_emergency_stop_active",
            "Whether the emergency stop latch is set",
        ))?;
        registry.register(Box::new(emergency_stop_active.clone()))?;

        let orders_total = CounterVec::new(
            Opts::new("margin_core_orders_total", "Total orders by side and status"),
            &["side", "status"],
        )?;
        registry.register(Box::new(orders_total.clone()))?;

        let atomic_entry_rollbacks_total = CounterVec::new(
            Opts::new(
                "margin_core_atomic_entry_rollbacks_total",
                "Atomic entry rollbacks by failed leg",
            ),
            &["failed_leg"],
        )?;
        registry.register(Box::new(atomic_entry_rollbacks_total.clone()))?;

        let orphan_sl_journal_size = Gauge::with_opts(Opts::new(
            "margin_core_orphan_sl_journal_size",
            "Orphan SL journal entries currently pending",
        ))?;
        registry.register(Box::new(orphan_sl_journal_size.clone()))?;

        let tp_sl_executions_total = CounterVec::new(
            Opts::new(
                "margin_core_tp_sl_executions_total",
                "TP/SL auto-executions by kind and outcome",
            ),
            &["kind", "outcome"],
        )?;
        registry.register(Box::new(tp_sl_executions_total.clone()))?;

        let exchange_latency_seconds = HistogramVec::new(
            HistogramOpts::new(
                "margin_core_exchange_latency_seconds",
                "Exchange request latency in seconds",
            )
            .buckets(vec![
                0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0,
            ]),
            &["endpoint"],
        )?;
        registry.register(Box::new(exchange_latency_seconds.clone()))?;

        let position_limit_denials_total = CounterVec::new(
            Opts::new(
                "margin_core_position_limit_denials_total",
                "Admission gate denials by gate name",
            ),
            &["gate"],
        )?;
        registry.register(Box::new(position_limit_denials_total.clone()))?;

        let cooldown_bypass_total = CounterVec::new(
            Opts::new(
                "margin_core_cooldown_bypass_total",
                "Cooldown denials overridden by trend strength",
            ),
            &["symbol"],
        )?;
        registry.register(Box::new(cooldown_bypass_total.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            margin_ratio_pct,
            balance,
            open_positions_count,
            circuit_breaker_state,
            emergency_stop_active,
            orders_total,
            atomic_entry_rollbacks_total,
            orphan_sl_journal_size,
            tp_sl_executions_total,
            exchange_latency_seconds,
            position_limit_denials_total,
            cooldown_bypass_total,
        })
    }

    /// Render all metrics in Prometheus text format
    pub fn render(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        encoder
            .encode_to_string(&metric_families)
            .unwrap_or_default()
    }

    pub fn set_circuit_breaker_state(&self, component: &str, state_value: f64) {
        self.circuit_breaker_state
            .with_label_values(&[component])
            .set(state_value);
    }

    pub fn inc_orders(&self, side: &str, status: &str) {
        self.orders_total.with_label_values(&[side, status]).inc();
    }

    pub fn inc_rollback(&self, failed_leg: &str) {
        self.atomic_entry_rollbacks_total
            .with_label_values(&[failed_leg])
            .inc();
    }

    pub fn inc_tp_sl_execution(&self, kind: &str, outcome: &str) {
        self.tp_sl_executions_total
            .with_label_values(&[kind, outcome])
            .inc();
    }

    pub fn observe_exchange_latency(&self, endpoint: &str, latency: f64) {
        self.exchange_latency_seconds
            .with_label_values(&[endpoint])
            .observe(latency);
    }

    pub fn inc_limit_denial(&self, gate: &str) {
        self.position_limit_denials_total
            .with_label_values(&[gate])
            .inc();
    }

    pub fn inc_cooldown_bypass(&self, symbol: &str) {
        self.cooldown_bypass_total
            .with_label_values(&[symbol])
            .inc();
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new().expect("Failed to create default Metrics")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = Metrics::new().expect("Failed to create metrics");
        assert!(metrics.render().contains("margin_core_"));
    }

    #[test]
    fn test_margin_ratio_update() {
        let metrics = Metrics::new().expect("Failed to create metrics");
        metrics.margin_ratio_pct.set(215.0);
        let output = metrics.render();
        assert!(output.contains("margin_core_margin_ratio_pct 215"));
    }

    #[test]
    fn test_circuit_breaker_state_per_component() {
        let metrics = Metrics::new().expect("Failed to create metrics");
        metrics.set_circuit_breaker_state("exchange", 2.0);
        metrics.set_circuit_breaker_state("market_data", 0.0);
        let output = metrics.render();
        assert!(output.contains("margin_core_circuit_breaker_state"));
        assert!(output.contains("exchange"));
    }

    #[test]
    fn test_order_counter() {
        let metrics = Metrics::new().expect("Failed to create metrics");
        metrics.inc_orders("buy", "filled");
        metrics.inc_orders("sell", "rejected");
        let output = metrics.render();
        assert!(output.contains("margin_core_orders_total"));
    }
}
