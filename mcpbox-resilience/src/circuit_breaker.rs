//! Circuit breaker pattern implementation
//!
//! One state machine per named service. Closed counts consecutive
//! failures; open fails fast with the remaining cool-down; half-open
//! admits trial calls and reopens on the first failure.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Requests pass through normally.
    Closed,
    /// Requests are blocked.
    Open,
    /// Limited trial requests allowed to test recovery.
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Circuit breaker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening the circuit.
    pub failure_threshold: u32,

    /// Successes in half-open state before closing.
    pub success_threshold: u32,

    /// Time to wait in open state before allowing a trial call.
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            timeout: Duration::from_secs(60),
        }
    }
}

/// Error returned when a call is refused because the circuit is open.
#[derive(Debug, Clone, thiserror::Error)]
#[error("circuit breaker open for {service}; retry after {retry_after:.1?}")]
pub struct CircuitBreakerOpen {
    pub service: String,
    pub retry_after: Duration,
}

/// Point-in-time view of one circuit, for operational endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct CircuitSnapshot {
    pub service: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub seconds_since_last_failure: Option<f64>,
}

struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    last_failure_time: Option<Instant>,
}

/// Thread-safe circuit breaker for a single named service.
#[derive(Clone)]
pub struct CircuitBreaker {
    service: Arc<str>,
    config: Arc<CircuitBreakerConfig>,
    state: Arc<Mutex<BreakerState>>,
}

impl CircuitBreaker {
    pub fn new(service: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            service: service.into().into(),
            config: Arc::new(config),
            state: Arc::new(Mutex::new(BreakerState {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                last_failure_time: None,
            })),
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    /// Check whether a call may proceed. Open circuits transition to
    /// half-open once the cool-down elapses; otherwise the caller gets the
    /// remaining wait.
    pub fn check(&self) -> Result<(), CircuitBreakerOpen> {
        let mut state = self.state.lock();
        if state.state == CircuitState::Open {
            let elapsed = state
                .last_failure_time
                .map(|t| t.elapsed())
                .unwrap_or(Duration::MAX);
            if elapsed >= self.config.timeout {
                tracing::info!(service = %self.service, "circuit breaker half-opening");
                state.state = CircuitState::HalfOpen;
                state.success_count = 0;
            } else {
                return Err(CircuitBreakerOpen {
                    service: self.service.to_string(),
                    retry_after: self.config.timeout - elapsed,
                });
            }
        }
        Ok(())
    }

    /// Record a successful call.
    pub fn record_success(&self) {
        let mut state = self.state.lock();
        match state.state {
            CircuitState::HalfOpen => {
                state.success_count += 1;
                if state.success_count >= self.config.success_threshold {
                    tracing::info!(service = %self.service, "circuit breaker closing");
                    state.state = CircuitState::Closed;
                    state.failure_count = 0;
                }
            }
            CircuitState::Closed => {
                state.failure_count = 0;
            }
            CircuitState::Open => {}
        }
    }

    /// Record a failed call.
    pub fn record_failure(&self) {
        let mut state = self.state.lock();
        state.failure_count += 1;
        state.last_failure_time = Some(Instant::now());

        match state.state {
            CircuitState::HalfOpen => {
                tracing::warn!(service = %self.service, "circuit breaker reopening");
                state.state = CircuitState::Open;
            }
            CircuitState::Closed => {
                if state.failure_count >= self.config.failure_threshold {
                    tracing::warn!(
                        service = %self.service,
                        failures = state.failure_count,
                        "circuit breaker opening"
                    );
                    state.state = CircuitState::Open;
                }
            }
            CircuitState::Open => {}
        }
    }

    /// Current state, without triggering the open→half-open transition.
    pub fn state(&self) -> CircuitState {
        self.state.lock().state
    }

    /// Reset to closed with cleared counters.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.state = CircuitState::Closed;
        state.failure_count = 0;
        state.success_count = 0;
        state.last_failure_time = None;
        tracing::info!(service = %self.service, "circuit breaker reset");
    }

    pub fn snapshot(&self) -> CircuitSnapshot {
        let state = self.state.lock();
        CircuitSnapshot {
            service: self.service.to_string(),
            state: state.state,
            failure_count: state.failure_count,
            success_count: state.success_count,
            seconds_since_last_failure: state.last_failure_time.map(|t| t.elapsed().as_secs_f64()),
        }
    }
}

/// Process-wide registry of circuit breakers by service name.
#[derive(Default)]
pub struct CircuitBreakerRegistry {
    breakers: Mutex<HashMap<String, CircuitBreaker>>,
    default_config: CircuitBreakerConfig,
}

impl CircuitBreakerRegistry {
    pub fn new(default_config: CircuitBreakerConfig) -> Self {
        Self {
            breakers: Mutex::new(HashMap::new()),
            default_config,
        }
    }

    /// Get the breaker for a service, creating it with the registry default
    /// config on first use.
    pub fn get_or_create(&self, service: &str) -> CircuitBreaker {
        let mut breakers = self.breakers.lock();
        breakers
            .entry(service.to_string())
            .or_insert_with(|| CircuitBreaker::new(service, self.default_config.clone()))
            .clone()
    }

    /// Snapshots of every known circuit.
    pub fn snapshots(&self) -> Vec<CircuitSnapshot> {
        let breakers = self.breakers.lock();
        let mut out: Vec<_> = breakers.values().map(CircuitBreaker::snapshot).collect();
        out.sort_by(|a, b| a.service.cmp(&b.service));
        out
    }

    /// Reset every circuit to closed.
    pub fn reset_all(&self) {
        for breaker in self.breakers.lock().values() {
            breaker.reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(failures: u32, successes: u32, timeout_ms: u64) -> CircuitBreaker {
        CircuitBreaker::new(
            "test",
            CircuitBreakerConfig {
                failure_threshold: failures,
                success_threshold: successes,
                timeout: Duration::from_millis(timeout_ms),
            },
        )
    }

    #[test]
    fn opens_after_consecutive_failures() {
        let cb = breaker(3, 2, 100);
        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);

        let err = cb.check().unwrap_err();
        assert_eq!(err.service, "test");
        assert!(err.retry_after <= Duration::from_millis(100));
    }

    #[test]
    fn success_resets_failure_count_in_closed() {
        let cb = breaker(3, 2, 100);
        cb.record_failure();
        cb.record_failure();
        cb.record_success();
        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn half_open_closes_after_success_threshold() {
        let cb = breaker(1, 2, 10);
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);

        std::thread::sleep(Duration::from_millis(20));
        assert!(cb.check().is_ok());
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        cb.record_success();
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn half_open_reopens_on_failure() {
        let cb = breaker(1, 2, 10);
        cb.record_failure();
        std::thread::sleep(Duration::from_millis(20));
        assert!(cb.check().is_ok());
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[test]
    fn registry_reuses_breakers() {
        let registry = CircuitBreakerRegistry::new(CircuitBreakerConfig::default());
        let a = registry.get_or_create("sandbox");
        a.record_failure();
        let b = registry.get_or_create("sandbox");
        assert_eq!(b.snapshot().failure_count, 1);
        assert_eq!(registry.snapshots().len(), 1);
    }

    #[test]
    fn reset_all_closes_circuits() {
        let registry = CircuitBreakerRegistry::new(CircuitBreakerConfig {
            failure_threshold: 1,
            success_threshold: 1,
            timeout: Duration::from_secs(60),
        });
        registry.get_or_create("svc").record_failure();
        assert_eq!(registry.snapshots()[0].state, CircuitState::Open);
        registry.reset_all();
        assert_eq!(registry.snapshots()[0].state, CircuitState::Closed);
    }
}
