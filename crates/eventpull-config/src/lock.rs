// ============================================================================
// Distributed Lock Configuration
// ============================================================================

use crate::Env;
use crate::constants::*;
use anyhow::{Result, bail};
use std::time::Duration;

/// Where the distributed mutex keeps its lease
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LockBackend {
    #[default]
    Redis,
    /// Process-local store; only meaningful for a single instance
    Memory,
}

/// Lock store connection plus retry/circuit breaker policy
#[derive(Clone, Debug)]
pub struct LockConfig {
    pub backend: LockBackend,
    pub redis_url: Option<String>,
    /// Retries after the first failed attempt (transient errors only)
    pub retry_count: u32,
    /// Delay before retry n is `retry_delay_base_secs ^ n` seconds
    pub retry_delay_base_secs: f64,
    /// Failure ratio over the sampling window that opens the circuit
    pub circuit_failure_threshold: f64,
    pub circuit_sampling_window: Duration,
    /// How long an open circuit fails fast before a half-open trial
    pub circuit_break_duration: Duration,
    /// Calls needed in the window before the failure ratio is evaluated
    pub circuit_minimum_throughput: u32,
    /// Per-attempt timeout of a store round-trip
    pub operation_timeout: Option<Duration>,
}

impl LockConfig {
    pub(crate) fn from_env(env: &Env<'_>) -> Result<Self> {
        let backend = match env.string("LOCK_BACKEND").as_deref() {
            None | Some("redis") => LockBackend::Redis,
            Some("memory") => LockBackend::Memory,
            Some(other) => bail!(
                "Invalid value for LOCK_BACKEND: '{}' (expected redis/memory)",
                other
            ),
        };
        let operation_timeout_ms: u64 =
            env.parse_or("LOCK_OPERATION_TIMEOUT_MS", DEFAULT_OPERATION_TIMEOUT_MS)?;

        Ok(Self {
            backend,
            redis_url: env.string("REDIS_URL"),
            retry_count: env.parse_or("LOCK_RETRY_COUNT", DEFAULT_RETRY_COUNT)?,
            retry_delay_base_secs: env
                .parse_or("LOCK_RETRY_DELAY_BASE_SECS", DEFAULT_RETRY_DELAY_BASE_SECS)?,
            circuit_failure_threshold: env.parse_or(
                "LOCK_CIRCUIT_FAILURE_THRESHOLD",
                DEFAULT_CIRCUIT_FAILURE_THRESHOLD,
            )?,
            circuit_sampling_window: Duration::from_secs(env.parse_or(
                "LOCK_CIRCUIT_SAMPLING_WINDOW_SECS",
                DEFAULT_CIRCUIT_SAMPLING_WINDOW_SECS,
            )?),
            circuit_break_duration: Duration::from_secs(env.parse_or(
                "LOCK_CIRCUIT_BREAK_DURATION_SECS",
                DEFAULT_CIRCUIT_BREAK_DURATION_SECS,
            )?),
            circuit_minimum_throughput: env.parse_or(
                "LOCK_CIRCUIT_MINIMUM_THROUGHPUT",
                DEFAULT_CIRCUIT_MINIMUM_THROUGHPUT,
            )?,
            // 0 disables the per-attempt timeout
            operation_timeout: (operation_timeout_ms > 0)
                .then(|| Duration::from_millis(operation_timeout_ms)),
        })
    }

    pub(crate) fn validate(&self, lock_disabled: bool) -> Result<()> {
        if !lock_disabled && self.backend == LockBackend::Redis && self.redis_url.is_none() {
            bail!("REDIS_URL is required when LOCK_BACKEND=redis");
        }
        if !(self.circuit_failure_threshold > 0.0 && self.circuit_failure_threshold <= 1.0) {
            bail!("LOCK_CIRCUIT_FAILURE_THRESHOLD must be in (0, 1]");
        }
        if self.circuit_minimum_throughput == 0 {
            bail!("LOCK_CIRCUIT_MINIMUM_THROUGHPUT must be at least 1");
        }
        if self.circuit_sampling_window.is_zero() {
            bail!("LOCK_CIRCUIT_SAMPLING_WINDOW_SECS must be greater than 0");
        }
        if !self.retry_delay_base_secs.is_finite() || self.retry_delay_base_secs < 0.0 {
            bail!("LOCK_RETRY_DELAY_BASE_SECS must be a non-negative number");
        }
        Ok(())
    }
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            backend: LockBackend::Redis,
            redis_url: None,
            retry_count: DEFAULT_RETRY_COUNT,
            retry_delay_base_secs: DEFAULT_RETRY_DELAY_BASE_SECS,
            circuit_failure_threshold: DEFAULT_CIRCUIT_FAILURE_THRESHOLD,
            circuit_sampling_window: Duration::from_secs(DEFAULT_CIRCUIT_SAMPLING_WINDOW_SECS),
            circuit_break_duration: Duration::from_secs(DEFAULT_CIRCUIT_BREAK_DURATION_SECS),
            circuit_minimum_throughput: DEFAULT_CIRCUIT_MINIMUM_THROUGHPUT,
            operation_timeout: Some(Duration::from_millis(DEFAULT_OPERATION_TIMEOUT_MS)),
        }
    }
}
