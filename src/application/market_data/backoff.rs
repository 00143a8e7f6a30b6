use std::time::Duration;

/// Error-kind classification used to weight the smart backoff delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffKind {
    Empty,
    RateLimit,
    Timeout,
    ApiError,
}

impl BackoffKind {
    fn multiplier(self) -> f64 {
        match self {
            BackoffKind::Empty => 2.0,
            BackoffKind::RateLimit => 5.0,
            BackoffKind::Timeout => 3.0,
            BackoffKind::ApiError => 2.5,
        }
    }
}

const BASE_DELAY_SECS: f64 = 0.5;
const MIN_DELAY_SECS: f64 = 0.5;
const MAX_DELAY_SECS: f64 = 15.0;
/// Once this many consecutive empty batches accrue, the pagination loop
/// aborts rather than keep paying an ever-larger backoff.
pub const CONSECUTIVE_EMPTY_ABORT_THRESHOLD: u32 = 15;
pub const MAX_PAGINATION_ATTEMPTS: u32 = 25;
const MAX_SPAN_DAYS: i64 = 30;

/// `delay = clamp(0.5, base*2^(attempt-1)*multiplier + 0.5*consecutive_empty, 15s)`
pub fn smart_backoff(attempt: u32, consecutive_empty: u32, kind: BackoffKind) -> Duration {
    let exponent = attempt.saturating_sub(1) as i32;
    let exponential = BASE_DELAY_SECS * 2f64.powi(exponent) * kind.multiplier();
    let delay = exponential + 0.5 * consecutive_empty as f64;
    let clamped = delay.clamp(MIN_DELAY_SECS, MAX_DELAY_SECS);
    Duration::from_secs_f64(clamped)
}

/// Whether the pagination loop should give up rather than keep retrying.
pub fn should_abort(
    consecutive_empty: u32,
    timestamp_anomaly: bool,
    span_days: i64,
    attempt: u32,
) -> bool {
    consecutive_empty >= CONSECUTIVE_EMPTY_ABORT_THRESHOLD
        || timestamp_anomaly
        || span_days > MAX_SPAN_DAYS
        || attempt >= MAX_PAGINATION_ATTEMPTS
}
