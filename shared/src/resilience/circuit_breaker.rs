// ============================================================================
// Circuit Breaker for the Lock Store
// ============================================================================
//
// Stops hammering the shared store once it is clearly unhealthy.
//
// Health is sampled over a rolling window split into buckets. The circuit
// opens when, over the window:
//
//   throughput >= minimum_throughput  AND  failures / throughput >= failure_threshold
//
// Below the throughput floor the failure rate is not evaluated at all.
//
// States:
// - CLOSED:    calls go through, outcomes are sampled
// - OPEN:      calls fail fast for `break_duration`, the store is not touched
// - HALF_OPEN: exactly one trial call is admitted; success closes the
//              circuit (window reset), failure opens it again
//
// Only transient store errors count as failures. Permanent errors pass
// through without affecting health.
//
// ============================================================================

use eventpull_error::{CircuitBreakerError, StoreError};
use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Number of buckets the sampling window is split into
const WINDOW_BUCKETS: u32 = 10;

/// Circuit Breaker configuration
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Failure ratio in (0, 1] that opens the circuit
    pub failure_threshold: f64,
    /// Length of the rolling health window
    pub sampling_window: Duration,
    /// Minimum calls in the window before the ratio is evaluated
    pub minimum_throughput: u32,
    /// How long the circuit stays open before a trial call
    pub break_duration: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 0.1,
            sampling_window: Duration::from_secs(900),
            minimum_throughput: 100,
            break_duration: Duration::from_secs(300),
        }
    }
}

/// Circuit Breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    /// Value exported on the circuit state gauge
    pub fn as_gauge(&self) -> i64 {
        match self {
            CircuitState::Closed => 0,
            CircuitState::Open => 1,
            CircuitState::HalfOpen => 2,
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        };
        f.write_str(name)
    }
}

/// Callback invoked on every state transition
pub type StateListener = Arc<dyn Fn(CircuitState) + Send + Sync>;

#[derive(Debug, Clone, Copy)]
struct Bucket {
    started: Instant,
    successes: u32,
    failures: u32,
}

/// Rolling success/failure counts
#[derive(Debug)]
struct HealthWindow {
    window: Duration,
    bucket_len: Duration,
    buckets: VecDeque<Bucket>,
}

impl HealthWindow {
    fn new(window: Duration) -> Self {
        let bucket_len = (window / WINDOW_BUCKETS).max(Duration::from_millis(1));
        Self {
            window,
            bucket_len,
            buckets: VecDeque::with_capacity(WINDOW_BUCKETS as usize + 1),
        }
    }

    fn record(&mut self, now: Instant, failed: bool) {
        self.evict(now);

        let needs_bucket = match self.buckets.back() {
            Some(bucket) => now.duration_since(bucket.started) >= self.bucket_len,
            None => true,
        };
        if needs_bucket {
            self.buckets.push_back(Bucket {
                started: now,
                successes: 0,
                failures: 0,
            });
        }

        if let Some(bucket) = self.buckets.back_mut() {
            if failed {
                bucket.failures += 1;
            } else {
                bucket.successes += 1;
            }
        }
    }

    fn evict(&mut self, now: Instant) {
        while let Some(bucket) = self.buckets.front() {
            if now.duration_since(bucket.started) >= self.window {
                self.buckets.pop_front();
            } else {
                break;
            }
        }
    }

    /// (throughput, failures) over the window
    fn totals(&self) -> (u64, u64) {
        self.buckets.iter().fold((0, 0), |(total, failures), b| {
            (
                total + u64::from(b.successes) + u64::from(b.failures),
                failures + u64::from(b.failures),
            )
        })
    }

    fn reset(&mut self) {
        self.buckets.clear();
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    opened_at: Option<Instant>,
    health: HealthWindow,
}

/// Releases the half-open trial slot, also when the trial future is dropped
struct TrialPermit<'a>(&'a AtomicBool);

impl Drop for TrialPermit<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Rolling-window circuit breaker
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
    trial_in_flight: AtomicBool,
    listener: Option<StateListener>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        let health = HealthWindow::new(config.sampling_window);
        Self {
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                opened_at: None,
                health,
            }),
            trial_in_flight: AtomicBool::new(false),
            listener: None,
        }
    }

    /// Invoke `listener` on every state transition
    pub fn with_state_listener(mut self, listener: StateListener) -> Self {
        self.listener = Some(listener);
        self
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Execute an operation with circuit breaker protection
    ///
    /// # Returns
    /// * `Ok(T)` - Operation succeeded
    /// * `Err(CircuitBreakerError::Open)` - Circuit is open, operation not attempted
    /// * `Err(CircuitBreakerError::Inner(e))` - Operation failed
    pub async fn call<F, T>(&self, operation: F) -> Result<T, CircuitBreakerError<StoreError>>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        let trial = self.admit().await?;

        let result = operation.await;

        {
            let mut inner = self.inner.lock().await;
            let now = Instant::now();
            match &result {
                Ok(_) => self.on_success(&mut inner, now, trial.is_some()),
                Err(e) if e.is_transient() => self.on_failure(&mut inner, now, trial.is_some()),
                Err(_) => {}
            }
        }
        drop(trial);

        result.map_err(CircuitBreakerError::Inner)
    }

    /// Current state; an open circuit past its break duration reports HalfOpen
    pub async fn state(&self) -> CircuitState {
        let inner = self.inner.lock().await;
        match (inner.state, inner.opened_at) {
            (CircuitState::Open, Some(opened_at))
                if opened_at.elapsed() >= self.config.break_duration =>
            {
                CircuitState::HalfOpen
            }
            (state, _) => state,
        }
    }

    /// Decide whether a call may run; `Some` marks the half-open trial
    async fn admit(&self) -> Result<Option<TrialPermit<'_>>, CircuitBreakerError<StoreError>> {
        let mut inner = self.inner.lock().await;

        if inner.state == CircuitState::Open {
            let elapsed = inner.opened_at.map(|t| t.elapsed()).unwrap_or_default();
            if elapsed < self.config.break_duration {
                return Err(CircuitBreakerError::Open {
                    remaining: self.config.break_duration - elapsed,
                });
            }
            self.transition(&mut inner, CircuitState::HalfOpen);
        }

        match inner.state {
            CircuitState::Closed => Ok(None),
            _ => {
                if self
                    .trial_in_flight
                    .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    tracing::info!("Lock store circuit half-open - admitting trial call");
                    Ok(Some(TrialPermit(&self.trial_in_flight)))
                } else {
                    Err(CircuitBreakerError::Open {
                        remaining: Duration::ZERO,
                    })
                }
            }
        }
    }

    fn on_success(&self, inner: &mut BreakerInner, now: Instant, trial: bool) {
        if trial && inner.state == CircuitState::HalfOpen {
            inner.health.reset();
            inner.opened_at = None;
            self.transition(inner, CircuitState::Closed);
        } else {
            inner.health.record(now, false);
        }
    }

    fn on_failure(&self, inner: &mut BreakerInner, now: Instant, trial: bool) {
        if trial && inner.state == CircuitState::HalfOpen {
            inner.opened_at = Some(now);
            self.transition(inner, CircuitState::Open);
            return;
        }

        inner.health.record(now, true);
        if inner.state != CircuitState::Closed {
            return;
        }

        let (throughput, failures) = inner.health.totals();
        if throughput < u64::from(self.config.minimum_throughput) {
            return;
        }

        let ratio = failures as f64 / throughput as f64;
        if ratio >= self.config.failure_threshold {
            tracing::error!(
                failures = failures,
                throughput = throughput,
                threshold = self.config.failure_threshold,
                break_duration_secs = self.config.break_duration.as_secs(),
                "Lock store circuit OPENED - failure rate over threshold"
            );
            inner.opened_at = Some(now);
            self.transition(inner, CircuitState::Open);
        }
    }

    fn transition(&self, inner: &mut BreakerInner, to: CircuitState) {
        let from = inner.state;
        if from == to {
            return;
        }
        inner.state = to;

        match to {
            CircuitState::Open => {
                tracing::error!(from = %from, "Lock store circuit breaker is OPEN")
            }
            CircuitState::HalfOpen => {
                tracing::info!(from = %from, "Lock store circuit breaker is HALF-OPEN")
            }
            CircuitState::Closed => {
                tracing::info!(from = %from, "Lock store circuit breaker CLOSED - store recovered")
            }
        }

        if let Some(listener) = &self.listener {
            listener(to);
        }
    }
}
