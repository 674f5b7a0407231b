// ============================================================================
// Configuration Constants
// ============================================================================

// Scheduler
pub(crate) const DEFAULT_POLLING_FREQUENCY_SECS: u64 = 30;
pub(crate) const DEFAULT_LOCK_KEY: &str = "eventpull:ingestion-lock";
// Must outlive the longest expected pass; the lease self-expires after this
pub(crate) const DEFAULT_LOCK_TIMEOUT_SECS: u64 = 300;

// Lock store resilience
pub(crate) const DEFAULT_RETRY_COUNT: u32 = 3;
// Delay before retry n is base^n seconds (2, 4, 8 with the default)
pub(crate) const DEFAULT_RETRY_DELAY_BASE_SECS: f64 = 2.0;
pub(crate) const DEFAULT_CIRCUIT_FAILURE_THRESHOLD: f64 = 0.1;
pub(crate) const DEFAULT_CIRCUIT_SAMPLING_WINDOW_SECS: u64 = 15 * 60;
pub(crate) const DEFAULT_CIRCUIT_BREAK_DURATION_SECS: u64 = 5 * 60;
pub(crate) const DEFAULT_CIRCUIT_MINIMUM_THROUGHPUT: u32 = 100;
pub(crate) const DEFAULT_OPERATION_TIMEOUT_MS: u64 = 5000;

// Broker
pub(crate) const DEFAULT_EVENT_BATCH_SIZE: usize = 100;
pub(crate) const DEFAULT_MAX_WAIT_SECS: u64 = 10;
pub(crate) const DEFAULT_AMBIENT_TOKEN_ENV: &str = "BROKER_ACCESS_TOKEN";

// Logging
pub(crate) const DEFAULT_RUST_LOG: &str = "info";
