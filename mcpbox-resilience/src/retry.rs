//! Retry executor with backoff, optionally guarded by a circuit breaker

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

use crate::backoff::BackoffPolicy;
use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerOpen};

/// Retry policy: attempt count plus backoff shape.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt; total attempts = `max_retries + 1`.
    pub max_retries: u32,
    pub backoff: BackoffPolicy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff: BackoffPolicy::default(),
        }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            backoff: BackoffPolicy::default(),
        }
    }
}

/// Classification trait: which errors are worth retrying.
///
/// Connection errors, timeouts and HTTP {429, 502, 503, 504} are the
/// canonical transient set; each error type decides for itself.
pub trait Retryable {
    fn is_retryable(&self) -> bool;

    /// Server-suggested delay (e.g. from `Retry-After`), overriding backoff.
    fn retry_delay(&self) -> Option<Duration> {
        None
    }
}

/// HTTP status codes treated as transient everywhere.
pub const RETRYABLE_STATUS_CODES: &[u16] = &[429, 502, 503, 504];

/// Retry error types
#[derive(Debug, thiserror::Error)]
pub enum RetryError<E> {
    /// All attempts failed with retryable errors.
    #[error("retries exhausted after {attempts} attempts: {last_error}")]
    Exhausted { attempts: u32, last_error: E },

    /// A non-retryable error surfaced immediately.
    #[error(transparent)]
    NonRetryable(E),

    /// The circuit breaker refused the call; never retried.
    #[error(transparent)]
    CircuitOpen(#[from] CircuitBreakerOpen),
}

impl<E> RetryError<E> {
    /// The underlying error, when one exists.
    pub fn into_inner(self) -> Option<E> {
        match self {
            RetryError::Exhausted { last_error, .. } => Some(last_error),
            RetryError::NonRetryable(error) => Some(error),
            RetryError::CircuitOpen(_) => None,
        }
    }
}

/// Execute `f` with retries according to `policy`.
pub async fn retry<F, Fut, T, E>(policy: &RetryPolicy, mut f: F) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable + std::fmt::Display,
{
    let mut attempt: u32 = 0;

    loop {
        match f().await {
            Ok(value) => {
                if attempt > 0 {
                    tracing::info!(attempts = attempt + 1, "operation succeeded after retries");
                }
                return Ok(value);
            }
            Err(error) => {
                if !error.is_retryable() {
                    tracing::warn!(%error, "non-retryable error");
                    return Err(RetryError::NonRetryable(error));
                }
                if attempt >= policy.max_retries {
                    tracing::warn!(attempts = attempt + 1, %error, "retries exhausted");
                    return Err(RetryError::Exhausted {
                        attempts: attempt + 1,
                        last_error: error,
                    });
                }

                let delay = error
                    .retry_delay()
                    .unwrap_or_else(|| policy.backoff.delay_for_attempt(attempt));
                tracing::debug!(
                    attempt = attempt + 1,
                    max = policy.max_retries + 1,
                    ?delay,
                    %error,
                    "retrying after transient error"
                );
                sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

/// Execute `f` behind a circuit breaker, with retries for transient errors.
///
/// The breaker is consulted before *each* attempt; an open circuit is
/// surfaced immediately and never retried.
pub async fn retry_with_breaker<F, Fut, T, E>(
    policy: &RetryPolicy,
    breaker: &CircuitBreaker,
    mut f: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable + std::fmt::Display,
{
    let mut attempt: u32 = 0;

    loop {
        breaker.check()?;

        match f().await {
            Ok(value) => {
                breaker.record_success();
                return Ok(value);
            }
            Err(error) => {
                breaker.record_failure();

                if !error.is_retryable() {
                    return Err(RetryError::NonRetryable(error));
                }
                if attempt >= policy.max_retries {
                    return Err(RetryError::Exhausted {
                        attempts: attempt + 1,
                        last_error: error,
                    });
                }

                let delay = error
                    .retry_delay()
                    .unwrap_or_else(|| policy.backoff.delay_for_attempt(attempt));
                sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit_breaker::CircuitBreakerConfig;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[derive(Debug)]
    struct TestError {
        retryable: bool,
    }

    impl std::fmt::Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "test error (retryable={})", self.retryable)
        }
    }

    impl Retryable for TestError {
        fn is_retryable(&self) -> bool {
            self.retryable
        }
    }

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            backoff: BackoffPolicy {
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(5),
                factor: 2.0,
                jitter: false,
            },
        }
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = retry(&fast_policy(3), || {
            let count = counter_clone.fetch_add(1, Ordering::Relaxed);
            async move {
                if count < 2 {
                    Err(TestError { retryable: true })
                } else {
                    Ok("done")
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(counter.load(Ordering::Relaxed), 3);
    }

    #[tokio::test]
    async fn exhausts_retries() {
        let result: Result<(), _> =
            retry(&fast_policy(2), || async { Err(TestError { retryable: true }) }).await;
        assert!(matches!(
            result.unwrap_err(),
            RetryError::Exhausted { attempts: 3, .. }
        ));
    }

    #[tokio::test]
    async fn non_retryable_fails_immediately() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result: Result<(), _> = retry(&fast_policy(3), || {
            counter_clone.fetch_add(1, Ordering::Relaxed);
            async { Err(TestError { retryable: false }) }
        })
        .await;

        assert!(matches!(result.unwrap_err(), RetryError::NonRetryable(_)));
        assert_eq!(counter.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn open_circuit_is_never_retried() {
        let breaker = CircuitBreaker::new(
            "svc",
            CircuitBreakerConfig {
                failure_threshold: 1,
                success_threshold: 1,
                timeout: Duration::from_secs(60),
            },
        );
        breaker.record_failure();

        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();
        let result: Result<(), _> = retry_with_breaker(&fast_policy(3), &breaker, || {
            calls_clone.fetch_add(1, Ordering::Relaxed);
            async { Err(TestError { retryable: true }) }
        })
        .await;

        assert!(matches!(result.unwrap_err(), RetryError::CircuitOpen(_)));
        assert_eq!(calls.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn breaker_records_outcomes() {
        let breaker = CircuitBreaker::new(
            "svc",
            CircuitBreakerConfig {
                failure_threshold: 10,
                success_threshold: 1,
                timeout: Duration::from_secs(60),
            },
        );

        let _ = retry_with_breaker(&fast_policy(1), &breaker, || async {
            Err::<(), _>(TestError { retryable: true })
        })
        .await;
        assert_eq!(breaker.snapshot().failure_count, 2);

        let _ = retry_with_breaker(&fast_policy(0), &breaker, || async { Ok::<_, TestError>(()) }).await;
        assert_eq!(breaker.snapshot().failure_count, 0);
    }
}
