use chrono::{Duration as ChronoDuration, Utc};

/// Five-stage timestamp hardening applied to any inbound `since` cursor or
/// batch timestamp before it is trusted. Each stage can reject (stage 1) or
/// clamp (stages 3-5); stage 2 only ever promotes units.
pub struct TimestampGuard;

const EPOCH_FLOOR_MS: i64 = 1_577_836_800_000; // 2020-01-01T00:00:00Z
const MAX_FUTURE_YEARS: i64 = 100;
const EXCHANGE_WINDOW_HOURS: i64 = 167;
const FUTURE_CLAMP_HOURS: i64 = 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimestampRejection {
    NonFinite,
}

impl TimestampGuard {
    /// Stage 1: type/finiteness check on a raw numeric timestamp before any
    /// unit assumptions are made.
    pub fn check_finite(raw: f64) -> Result<i64, TimestampRejection> {
        if !raw.is_finite() {
            return Err(TimestampRejection::NonFinite);
        }
        Ok(raw as i64)
    }

    /// Stage 2: a 10-digit value is seconds-since-epoch; promote to
    /// milliseconds. 13-digit values pass through unchanged.
    pub fn normalize_unit(ts: i64) -> i64 {
        if ts.unsigned_abs().checked_ilog10().unwrap_or(0) < 12 {
            ts * 1000
        } else {
            ts
        }
    }

    /// Stage 3: clamp to a realistic absolute range, [2020-01-01, now+100y].
    pub fn clamp_realistic_range(ts_ms: i64) -> i64 {
        let now_ms = Utc::now().timestamp_millis();
        let ceiling = now_ms
            + ChronoDuration::days(365 * MAX_FUTURE_YEARS)
                .num_milliseconds();
        ts_ms.clamp(EPOCH_FLOOR_MS, ceiling)
    }

    /// Stage 4: clamp to the exchange's lookback window, one hour inside
    /// its declared 168h limit.
    pub fn clamp_exchange_window(ts_ms: i64) -> i64 {
        let now_ms = Utc::now().timestamp_millis();
        let floor = now_ms - ChronoDuration::hours(EXCHANGE_WINDOW_HOURS).num_milliseconds();
        ts_ms.max(floor)
    }

    /// Stage 5: cap at now + 24h to reject clock-skewed future timestamps.
    pub fn clamp_future(ts_ms: i64) -> i64 {
        let now_ms = Utc::now().timestamp_millis();
        let ceiling = now_ms + ChronoDuration::hours(FUTURE_CLAMP_HOURS).num_milliseconds();
        ts_ms.min(ceiling)
    }

    /// Runs all five stages in order on a raw numeric timestamp.
    pub fn harden(raw: f64) -> Result<i64, TimestampRejection> {
        let ts = Self::check_finite(raw)?;
        let ts = Self::normalize_unit(ts);
        let ts = Self::clamp_realistic_range(ts);
        let ts = Self::clamp_exchange_window(ts);
        let ts = Self::clamp_future(ts);
        Ok(ts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_nan_and_infinite() {
        assert_eq!(
            TimestampGuard::check_finite(f64::NAN),
            Err(TimestampRejection::NonFinite)
        );
        assert_eq!(
            TimestampGuard::check_finite(f64::INFINITY),
            Err(TimestampRejection::NonFinite)
        );
    }

    #[test]
    fn promotes_ten_digit_seconds_to_milliseconds() {
        let seconds = 1_700_000_000_i64; // 10 digits
        assert_eq!(TimestampGuard::normalize_unit(seconds), seconds * 1000);
    }

    #[test]
    fn leaves_thirteen_digit_milliseconds_unchanged() {
        let millis = 1_700_000_000_000_i64; // 13 digits
        assert_eq!(TimestampGuard::normalize_unit(millis), millis);
    }

    #[test]
    fn clamps_below_epoch_floor() {
        let ancient = 0_i64;
        assert_eq!(TimestampGuard::clamp_realistic_range(ancient), EPOCH_FLOOR_MS);
    }

    #[test]
    fn clamps_future_timestamp_to_now_plus_24h() {
        let now_ms = Utc::now().timestamp_millis();
        let far_future = now_ms + ChronoDuration::days(3650).num_milliseconds();
        let hardened = TimestampGuard::clamp_future(far_future);
        assert!(hardened <= now_ms + ChronoDuration::hours(25).num_milliseconds());
    }

    #[test]
    fn clamps_to_exchange_window_floor() {
        let now_ms = Utc::now().timestamp_millis();
        let too_old = now_ms - ChronoDuration::days(30).num_milliseconds();
        let hardened = TimestampGuard::clamp_exchange_window(too_old);
        assert!(hardened > too_old);
    }
}
