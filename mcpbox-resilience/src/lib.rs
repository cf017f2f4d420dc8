//! Resilience patterns for MCPbox
//!
//! Per-service circuit breakers and a retry executor with exponential
//! backoff and jitter. Circuits are process-wide, held in a
//! [`CircuitBreakerRegistry`], and queryable through the operational
//! endpoints of the management plane.

pub mod backoff;
pub mod circuit_breaker;
pub mod retry;

pub use backoff::BackoffPolicy;
pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerOpen, CircuitBreakerRegistry,
    CircuitSnapshot, CircuitState,
};
pub use retry::{retry, retry_with_breaker, RetryError, RetryPolicy, Retryable, RETRYABLE_STATUS_CODES};
