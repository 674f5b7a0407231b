// ============================================================================
// Resilience policy for lock store round-trips
// ============================================================================
//
// Composition, outermost first:
//
//   CircuitBreaker -> RetryPolicy -> per-attempt timeout -> store call
//
// One exhausted retry sequence therefore counts as a single breaker failure,
// and an open circuit skips the retries entirely. An attempt that exceeds
// the operation timeout is a transient error, so it is retried.
//
// ============================================================================

mod circuit_breaker;
mod retry;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState, StateListener};
pub use retry::{MAX_RETRY_DELAY, RetryPolicy};

use eventpull_config::LockConfig;
use eventpull_error::{CircuitBreakerError, StoreError};
use std::future::Future;
use std::time::Duration;

pub struct ResiliencePolicy {
    retry: RetryPolicy,
    breaker: CircuitBreaker,
    operation_timeout: Option<Duration>,
}

impl ResiliencePolicy {
    pub fn new(retry: RetryPolicy, breaker: CircuitBreaker, operation_timeout: Option<Duration>) -> Self {
        Self {
            retry,
            breaker,
            operation_timeout,
        }
    }

    /// Build the policy from the LOCK_* settings
    pub fn from_config(config: &LockConfig) -> Self {
        let breaker = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: config.circuit_failure_threshold,
            sampling_window: config.circuit_sampling_window,
            minimum_throughput: config.circuit_minimum_throughput,
            break_duration: config.circuit_break_duration,
        });

        Self::new(
            RetryPolicy::new(config.retry_count, config.retry_delay_base_secs),
            breaker,
            config.operation_timeout,
        )
    }

    /// Invoke `listener` whenever the breaker changes state
    pub fn with_state_listener(mut self, listener: StateListener) -> Self {
        self.breaker = self.breaker.with_state_listener(listener);
        self
    }

    /// Run `operation` behind the breaker, retrying transient failures
    pub async fn execute<F, Fut, T>(
        &self,
        operation_name: &str,
        mut operation: F,
    ) -> Result<T, CircuitBreakerError<StoreError>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let timeout = self.operation_timeout;
        let retried = self
            .retry
            .run(operation_name, || with_timeout(timeout, operation()));

        self.breaker.call(retried).await
    }

    pub async fn circuit_state(&self) -> CircuitState {
        self.breaker.state().await
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }
}

async fn with_timeout<T, Fut>(timeout: Option<Duration>, attempt: Fut) -> Result<T, StoreError>
where
    Fut: Future<Output = Result<T, StoreError>>,
{
    match timeout {
        Some(limit) => match tokio::time::timeout(limit, attempt).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Transient(format!(
                "operation timed out after {}ms",
                limit.as_millis()
            ))),
        },
        None => attempt.await,
    }
}
