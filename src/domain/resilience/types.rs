use chrono::{DateTime, Utc};
use std::fmt;

/// Severity attached to a recorded error; CRITICAL errors count toward the
/// emergency-stop latch, WARNING errors only toward the per-component
/// circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Warning,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Warning => write!(f, "warning"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

/// One entry in the bounded error history kept by `ResilienceManager`.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorRecord {
    pub timestamp: DateTime<Utc>,
    pub component: String,
    pub error_type: String,
    pub error_message: String,
    pub severity: Severity,
}

/// Per-component circuit breaker lifecycle state, driven by
/// `ResilienceManager`'s recordError/recordSuccess algorithm rather than
/// wrapping a single future.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Snapshot of a component's breaker, as exposed to callers/metrics.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BreakerSnapshot {
    pub state: CircuitState,
    pub failure_count: u32,
    pub failure_threshold: u32,
}
