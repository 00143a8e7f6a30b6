use crate::domain::resilience::{BreakerSnapshot, CircuitState, ErrorRecord, Severity};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

const DEFAULT_FAILURE_THRESHOLD: u32 = 5;
const DEFAULT_RECOVERY_TIMEOUT: Duration = Duration::from_secs(300);
const HISTORY_CAP: usize = 1000;
const EMERGENCY_STOP_CRITICAL_COUNT: u32 = 3;

struct Breaker {
    state: CircuitState,
    failure_count: u32,
    failure_threshold: u32,
    recovery_timeout: Duration,
    opened_at: Option<Instant>,
}

impl Breaker {
    fn new(failure_threshold: u32, recovery_timeout: Duration) -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            failure_threshold,
            recovery_timeout,
            opened_at: None,
        }
    }

    fn snapshot(&self) -> BreakerSnapshot {
        BreakerSnapshot {
            state: self.state,
            failure_count: self.failure_count,
            failure_threshold: self.failure_threshold,
        }
    }
}

struct Inner {
    breakers: HashMap<String, Breaker>,
    history: Vec<ErrorRecord>,
    critical_count: u32,
    emergency_stop: bool,
    failure_threshold: u32,
    recovery_timeout: Duration,
}

/// Process-singleton resilience gate: classifies errors, drives a per-
/// component circuit breaker, and raises a sticky emergency-stop latch once
/// enough CRITICAL errors accumulate. All operations serialize on a single
/// mutex; none of them do meaningful work under the lock, so contention is
/// not a concern.
pub struct ResilienceManager {
    inner: Mutex<Inner>,
}

impl Default for ResilienceManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ResilienceManager {
    pub fn new() -> Self {
        Self::with_thresholds(DEFAULT_FAILURE_THRESHOLD, DEFAULT_RECOVERY_TIMEOUT)
    }

    /// Same state machine as `new()` with a configurable failure threshold
    /// and recovery timeout — lets integration tests exercise the full
    /// CLOSED -> OPEN -> HALF_OPEN -> CLOSED cycle (§8 testable property 5)
    /// without sleeping for the production default of 300s.
    pub fn with_thresholds(failure_threshold: u32, recovery_timeout: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner {
                breakers: HashMap::new(),
                history: Vec::new(),
                critical_count: 0,
                emergency_stop: false,
                failure_threshold,
                recovery_timeout,
            }),
        }
    }

    fn breaker_mut<'a>(inner: &'a mut Inner, component: &str) -> &'a mut Breaker {
        let failure_threshold = inner.failure_threshold;
        let recovery_timeout = inner.recovery_timeout;
        inner
            .breakers
            .entry(component.to_string())
            .or_insert_with(|| Breaker::new(failure_threshold, recovery_timeout))
    }

    pub fn record_error(
        &self,
        component: &str,
        error_type: &str,
        message: &str,
        severity: Severity,
    ) {
        let mut inner = self.inner.lock().unwrap();

        inner.history.push(ErrorRecord {
            timestamp: Utc::now(),
            component: component.to_string(),
            error_type: error_type.to_string(),
            error_message: message.to_string(),
            severity,
        });
        if inner.history.len() > HISTORY_CAP {
            let overflow = inner.history.len() - HISTORY_CAP;
            inner.history.drain(0..overflow);
        }

        {
            let breaker = Self::breaker_mut(&mut inner, component);
            breaker.failure_count += 1;
            match breaker.state {
                CircuitState::Closed => {
                    if breaker.failure_count >= breaker.failure_threshold {
                        warn!(
                            "resilience: breaker for '{}' closed -> open ({} failures)",
                            component, breaker.failure_count
                        );
                        breaker.state = CircuitState::Open;
                        breaker.opened_at = Some(Instant::now());
                    }
                }
                CircuitState::HalfOpen => {
                    warn!(
                        "resilience: breaker for '{}' half_open -> open (failure during recovery)",
                        component
                    );
                    breaker.state = CircuitState::Open;
                    breaker.opened_at = Some(Instant::now());
                }
                CircuitState::Open => {}
            }
        }

        if severity == Severity::Critical {
            inner.critical_count += 1;
            if inner.critical_count >= EMERGENCY_STOP_CRITICAL_COUNT && !inner.emergency_stop {
                error!(
                    "resilience: emergency stop latched after {} CRITICAL errors",
                    inner.critical_count
                );
                inner.emergency_stop = true;
            }
        }
    }

    pub fn record_success(&self, component: &str) {
        let mut inner = self.inner.lock().unwrap();
        let breaker = Self::breaker_mut(&mut inner, component);
        match breaker.state {
            CircuitState::HalfOpen => {
                info!("resilience: breaker for '{}' half_open -> closed", component);
                breaker.state = CircuitState::Closed;
                breaker.failure_count = 0;
                breaker.opened_at = None;
            }
            CircuitState::Closed => {
                breaker.failure_count = breaker.failure_count.saturating_sub(1);
            }
            CircuitState::Open => {}
        }
    }

    pub fn can_proceed(&self, component: &str) -> bool {
        let mut inner = self.inner.lock().unwrap();
        if inner.emergency_stop {
            return false;
        }

        let breaker = Self::breaker_mut(&mut inner, component);
        match breaker.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let elapsed = breaker
                    .opened_at
                    .map(|t| t.elapsed())
                    .unwrap_or(Duration::MAX);
                if elapsed >= breaker.recovery_timeout {
                    info!(
                        "resilience: breaker for '{}' open -> half_open (recovery timeout elapsed)",
                        component
                    );
                    breaker.state = CircuitState::HalfOpen;
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Operator-initiated reset of a single component's breaker. Does not
    /// clear the emergency-stop latch; use `force_recovery_global` for that.
    pub fn force_recovery(&self, component: &str) {
        let mut inner = self.inner.lock().unwrap();
        let breaker = Self::breaker_mut(&mut inner, component);
        breaker.state = CircuitState::Closed;
        breaker.failure_count = 0;
        breaker.opened_at = None;
        info!("resilience: operator reset breaker for '{}'", component);
    }

    /// Operator-initiated reset of the sticky emergency-stop latch.
    pub fn force_recovery_global(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.emergency_stop = false;
        inner.critical_count = 0;
        info!("resilience: operator cleared emergency stop latch");
    }

    pub fn emergency_stop_active(&self) -> bool {
        self.inner.lock().unwrap().emergency_stop
    }

    pub fn breaker_snapshot(&self, component: &str) -> BreakerSnapshot {
        let mut inner = self.inner.lock().unwrap();
        Self::breaker_mut(&mut inner, component).snapshot()
    }

    pub fn history_len(&self) -> usize {
        self.inner.lock().unwrap().history.len()
    }
}
