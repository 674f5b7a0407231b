// ============================================================================
// Scheduler Configuration
// ============================================================================

use crate::Env;
use crate::constants::*;
use anyhow::{Result, bail};
use std::time::Duration;

/// Periodic ingestion pass settings
#[derive(Clone, Debug)]
pub struct SchedulerConfig {
    /// Interval between ticks; the first tick fires immediately
    pub polling_frequency: Duration,
    /// Key of the distributed mutex shared by all instances
    pub lock_key: String,
    /// TTL of the mutex lease; bounds how long a crashed holder blocks peers
    pub lock_timeout: Duration,
    /// Start a pass on every tick even if the previous one is still running
    pub allow_concurrent_runs: bool,
    /// Skip the distributed mutex: every instance ingests on every tick
    pub lock_disabled: bool,
    /// Stop a drain after this many non-empty batches (None = until empty)
    pub max_batches_per_drain: Option<usize>,
}

impl SchedulerConfig {
    pub(crate) fn from_env(env: &Env<'_>) -> Result<Self> {
        let max_batches: usize = env.parse_or("INGEST_MAX_BATCHES_PER_DRAIN", 0)?;

        Ok(Self {
            polling_frequency: Duration::from_secs(
                env.parse_or("INGEST_POLLING_FREQUENCY_SECS", DEFAULT_POLLING_FREQUENCY_SECS)?,
            ),
            lock_key: env
                .string("INGEST_LOCK_KEY")
                .unwrap_or_else(|| DEFAULT_LOCK_KEY.to_string()),
            lock_timeout: Duration::from_secs(
                env.parse_or("INGEST_LOCK_TIMEOUT_SECS", DEFAULT_LOCK_TIMEOUT_SECS)?,
            ),
            allow_concurrent_runs: env.bool_or("INGEST_ALLOW_CONCURRENT_RUNS", false)?,
            lock_disabled: env.bool_or("INGEST_LOCK_DISABLED", false)?,
            // 0 means unlimited
            max_batches_per_drain: (max_batches > 0).then_some(max_batches),
        })
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.polling_frequency.is_zero() {
            bail!("INGEST_POLLING_FREQUENCY_SECS must be greater than 0");
        }
        if self.lock_timeout.is_zero() {
            bail!("INGEST_LOCK_TIMEOUT_SECS must be greater than 0");
        }
        if self.lock_key.trim().is_empty() {
            bail!("INGEST_LOCK_KEY must not be empty");
        }
        Ok(())
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            polling_frequency: Duration::from_secs(DEFAULT_POLLING_FREQUENCY_SECS),
            lock_key: DEFAULT_LOCK_KEY.to_string(),
            lock_timeout: Duration::from_secs(DEFAULT_LOCK_TIMEOUT_SECS),
            allow_concurrent_runs: false,
            lock_disabled: false,
            max_batches_per_drain: None,
        }
    }
}
