// ============================================================================
// Eventpull Error - error taxonomy of the ingestion pipeline
// ============================================================================
//
// Each failure scope has its own type so they cannot be confused:
// - StoreError:   the shared key/value store behind the distributed mutex
// - BrokerError:  a whole topic/subscription (client construction, receive)
// - HandlerError: a single message (always downgraded to a release)
// - Cancelled:    a producer-side wait that was given up
//
// Nothing here is fatal to the process. Composition code and binaries wrap
// these into anyhow::Error with context.
//
// ============================================================================

use std::time::Duration;
use thiserror::Error;

// ===== Mutex Store Errors =====

/// Error returned by a lock store round-trip
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Worth retrying: timeouts, dropped or refused connections, I/O
    #[error("Transient store error: {0}")]
    Transient(String),

    /// Retrying will not help: bad command, auth, wrong type, ...
    #[error("Permanent store error: {0}")]
    Permanent(String),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Transient(_))
    }
}

#[cfg(feature = "redis")]
impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_timeout()
            || err.is_connection_dropped()
            || err.is_connection_refusal()
            || err.is_io_error()
            || is_transient_reply(&err)
        {
            StoreError::Transient(err.to_string())
        } else {
            StoreError::Permanent(err.to_string())
        }
    }
}

/// Server replies that clear up on their own (loading, failover, busy script)
#[cfg(feature = "redis")]
fn is_transient_reply(err: &redis::RedisError) -> bool {
    matches!(
        err.kind(),
        redis::ErrorKind::BusyLoadingError
            | redis::ErrorKind::TryAgain
            | redis::ErrorKind::ClusterDown
            | redis::ErrorKind::MasterDown
    ) || err.code() == Some("BUSY")
}

// ===== Circuit Breaker Errors =====

/// Error of an operation executed behind a circuit breaker
#[derive(Debug, Error)]
pub enum CircuitBreakerError<E> {
    /// Circuit is open, the operation was not attempted
    #[error("Circuit breaker is OPEN - failing fast ({remaining:?} until half-open)")]
    Open { remaining: Duration },

    /// Underlying operation failed
    #[error("Operation failed: {0}")]
    Inner(#[source] E),
}

impl<E> CircuitBreakerError<E> {
    /// True when the store was never contacted
    pub fn is_open(&self) -> bool {
        matches!(self, CircuitBreakerError::Open { .. })
    }
}

// ===== Broker Errors (topic/subscription scope) =====

/// Failure that aborts the drain of one topic/subscription for this pass
#[derive(Error, Debug)]
pub enum BrokerError {
    #[error("Broker authentication error: {0}")]
    Auth(String),

    #[error("Broker transport error: {0}")]
    Transport(String),

    #[error("Broker returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Broker response could not be decoded: {0}")]
    Decode(String),

    #[error("Broker configuration error: {0}")]
    Config(String),
}

impl BrokerError {
    /// Error code for logs and metric labels
    pub fn error_code(&self) -> &'static str {
        match self {
            BrokerError::Auth(_) => "BROKER_AUTH",
            BrokerError::Transport(_) => "BROKER_TRANSPORT",
            BrokerError::Status { .. } => "BROKER_STATUS",
            BrokerError::Decode(_) => "BROKER_DECODE",
            BrokerError::Config(_) => "BROKER_CONFIG",
        }
    }
}

#[cfg(feature = "http")]
impl From<reqwest::Error> for BrokerError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            BrokerError::Decode(err.to_string())
        } else {
            BrokerError::Transport(err.to_string())
        }
    }
}

// ===== Handler Errors (message scope) =====

/// Error raised by a message handler; the message is released for redelivery
#[derive(Error, Debug)]
pub enum HandlerError {
    #[error("Transient handler failure: {0}")]
    Transient(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

// ===== Scheduler Errors =====

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("Ingestion scheduler is already started")]
    AlreadyStarted,

    #[error("Ingestion scheduler is not started")]
    NotStarted,
}

// ===== Producer Queue Errors =====

/// A wait was abandoned because its cancellation token fired
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Wait for events was cancelled")]
pub struct Cancelled;
