//! Push-based observability for margin-core.
//!
//! No HTTP server, no incoming requests. Metrics are gathered in-process and
//! rendered to Prometheus text format on whatever cadence the caller (the
//! bootstrap loop, a periodic task) decides to push or scrape-proxy them.

pub mod latency_tracker;
pub mod metrics;

pub use latency_tracker::LatencyGuard;
pub use metrics::Metrics;
