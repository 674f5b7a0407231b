//! Prometheus metrics for the ingestion pipeline
//!
//! - Ingestion passes (completed / skipped and why)
//! - Message outcomes and settle failures
//! - Drain errors per topic
//! - Lock store circuit breaker state

use anyhow::Result;
use once_cell::sync::Lazy;
use prometheus::{
    Encoder, IntCounter, IntCounterVec, IntGauge, TextEncoder, opts, register_int_counter,
    register_int_counter_vec, register_int_gauge,
};

// ============================================================================
// Scheduler Metrics
// ============================================================================

/// Ticks by result: completed, skipped_running, skipped_lock, panicked
pub static PASSES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        opts!(
            "eventpull_passes_total",
            "Ingestion ticks by result (completed, skipped_running, skipped_lock, panicked)"
        ),
        &["result"]
    )
    .expect("Failed to register PASSES_TOTAL metric")
});

// ============================================================================
// Coordinator Metrics
// ============================================================================

/// Handled messages by outcome: success, transient_failure, rejected
pub static MESSAGES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        opts!(
            "eventpull_messages_total",
            "Handled messages by outcome (success, transient_failure, rejected)"
        ),
        &["outcome"]
    )
    .expect("Failed to register MESSAGES_TOTAL metric")
});

/// Lock tokens the broker refused to settle, by operation
pub static SETTLE_FAILURES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        opts!(
            "eventpull_settle_failures_total",
            "Lock tokens that failed to settle (acknowledge, release, reject)"
        ),
        &["operation"]
    )
    .expect("Failed to register SETTLE_FAILURES_TOTAL metric")
});

/// Drains aborted by a topic-level broker error
pub static DRAIN_ERRORS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(opts!(
        "eventpull_drain_errors_total",
        "Topic/subscription drains aborted by a broker error"
    ))
    .expect("Failed to register DRAIN_ERRORS_TOTAL metric")
});

// ============================================================================
// Lock Metrics
// ============================================================================

/// Lock store circuit breaker state (0=Closed, 1=Open, 2=HalfOpen)
pub static LOCK_CIRCUIT_STATE: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(opts!(
        "eventpull_lock_circuit_state",
        "Lock store circuit breaker state (0=Closed, 1=Open, 2=HalfOpen)"
    ))
    .expect("Failed to register LOCK_CIRCUIT_STATE metric")
});

// ============================================================================
// Metrics Collection
// ============================================================================

/// Gather all registered metrics and encode as Prometheus text format
pub fn gather_metrics() -> Result<String> {
    let mut buffer = vec![];
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder.encode(&metric_families, &mut buffer)?;

    Ok(String::from_utf8(buffer)?)
}
