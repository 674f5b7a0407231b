// ============================================================================
// Lock Store Retry Policy
// ============================================================================
//
// Retries transient store errors a fixed number of times. The delay before
// retry attempt n (1-based) is `delay_base_secs ^ n` seconds:
//
//   base 2.0  -> 2s, 4s, 8s
//   base 0.5  -> 0.5s, 0.25s, 0.125s
//
// Permanent errors are returned immediately.
//
// ============================================================================

use eventpull_error::StoreError;
use std::future::Future;
use std::time::Duration;
use tracing::{info, warn};

/// Upper bound for a single retry delay (large bases overflow quickly)
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Number of retries after the first attempt
    pub retry_count: u32,
    /// Base of the `base ^ attempt` delay, in seconds
    pub delay_base_secs: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retry_count: 3,
            delay_base_secs: 2.0,
        }
    }
}

impl RetryPolicy {
    pub fn new(retry_count: u32, delay_base_secs: f64) -> Self {
        Self {
            retry_count,
            delay_base_secs,
        }
    }

    /// Delay before retry attempt `attempt` (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let secs = self.delay_base_secs.powi(exponent);
        Duration::try_from_secs_f64(secs)
            .map(|delay| delay.min(MAX_RETRY_DELAY))
            .unwrap_or(MAX_RETRY_DELAY)
    }

    /// Run `operation` until it succeeds, fails permanently, or retries run out
    pub async fn run<F, Fut, T>(&self, operation_name: &str, mut operation: F) -> Result<T, StoreError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let mut attempt = 0;

        loop {
            match operation().await {
                Ok(value) => {
                    if attempt > 0 {
                        info!(
                            operation = operation_name,
                            attempt = attempt,
                            "Lock store operation succeeded after retry"
                        );
                    }
                    return Ok(value);
                }
                Err(e) if e.is_transient() && attempt < self.retry_count => {
                    attempt += 1;
                    let delay = self.delay_for(attempt);
                    warn!(
                        operation = operation_name,
                        attempt = attempt,
                        max_retries = self.retry_count,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Lock store operation failed, will retry"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
