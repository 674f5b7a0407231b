// ============================================================================
// Distributed Mutex
// ============================================================================
//
// Cross-instance exclusion with a lease: whoever creates the key owns the
// lock until it is deleted or its TTL expires at the store. Acquisition
// never blocks or queues.
//
// Every round-trip goes through the ResiliencePolicy. Store trouble is
// never escalated: a failed acquire is simply "not acquired", a failed
// release is logged and left to the TTL.
//
// ============================================================================

use super::LockStore;
use crate::resilience::{CircuitState, ResiliencePolicy};
use eventpull_config::LockConfig;
use eventpull_error::CircuitBreakerError;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

/// A held lease on `key`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutexLease {
    key: String,
    ttl: Duration,
}

impl MutexLease {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }
}

pub struct DistributedMutex {
    store: Arc<dyn LockStore>,
    policy: ResiliencePolicy,
    instance_id: String,
}

impl DistributedMutex {
    pub fn new(store: Arc<dyn LockStore>, policy: ResiliencePolicy) -> Self {
        Self {
            store,
            policy,
            instance_id: uuid::Uuid::new_v4().to_string(),
        }
    }

    /// Policy from LOCK_* settings, breaker state exported as a gauge
    pub fn from_config(store: Arc<dyn LockStore>, config: &LockConfig) -> Self {
        let policy = ResiliencePolicy::from_config(config).with_state_listener(Arc::new(|state| {
            eventpull_metrics::LOCK_CIRCUIT_STATE.set(state.as_gauge());
        }));
        Self::new(store, policy)
    }

    /// Value written to the store; identifies this instance
    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Create `key` with expiry `ttl` if absent; `true` iff this call created it
    pub async fn try_acquire(&self, key: &str, ttl: Duration) -> bool {
        let store: &dyn LockStore = self.store.as_ref();
        let value = self.instance_id.as_str();

        match self
            .policy
            .execute("set_if_absent", move || store.set_if_absent(key, value, ttl))
            .await
        {
            Ok(acquired) => {
                debug!(key = %key, acquired = acquired, "Distributed lock acquire attempt");
                acquired
            }
            Err(CircuitBreakerError::Open { remaining }) => {
                warn!(
                    key = %key,
                    remaining_secs = remaining.as_secs(),
                    "Lock store circuit open, lock not acquired"
                );
                false
            }
            Err(CircuitBreakerError::Inner(e)) => {
                error!(key = %key, error = %e, "Failed to acquire distributed lock");
                false
            }
        }
    }

    /// Delete `key` unconditionally; failures are logged, never returned
    pub async fn release(&self, key: &str) {
        let store: &dyn LockStore = self.store.as_ref();

        match self.policy.execute("delete", move || store.delete(key)).await {
            Ok(()) => debug!(key = %key, "Distributed lock released"),
            Err(e) => error!(
                key = %key,
                error = %e,
                "Failed to release distributed lock, it will expire with its TTL"
            ),
        }
    }

    /// `try_acquire` returning the lease
    pub async fn lease(&self, key: &str, ttl: Duration) -> Option<MutexLease> {
        self.try_acquire(key, ttl).await.then(|| MutexLease {
            key: key.to_string(),
            ttl,
        })
    }

    pub async fn circuit_state(&self) -> CircuitState {
        self.policy.circuit_state().await
    }
}
