// ============================================================================
// Distributed Mutex Resilience Tests
// ============================================================================
//
// Drives DistributedMutex through a store that can be switched between
// healthy and failing, and checks retry, circuit breaking and recovery.
// Time is paused so retry delays and break durations elapse instantly.
//
// ============================================================================

use async_trait::async_trait;
use eventpull_error::StoreError;
use eventpull_shared::{
    CircuitBreaker, CircuitBreakerConfig, CircuitState, DistributedMutex, InMemoryLockStore,
    LockStore, ResiliencePolicy, RetryPolicy,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

const KEY: &str = "ingestion-lock";
const TTL: Duration = Duration::from_secs(300);

/// In-memory store that fails with a transient error while `failing` is set
#[derive(Default)]
struct FlakyStore {
    inner: InMemoryLockStore,
    failing: AtomicBool,
    calls: AtomicUsize,
}

impl FlakyStore {
    fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<(), StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            Err(StoreError::Transient("connection reset".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl LockStore for FlakyStore {
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, StoreError> {
        self.check()?;
        self.inner.set_if_absent(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.check()?;
        self.inner.delete(key).await
    }
}

fn mutex(store: Arc<FlakyStore>, retry_count: u32) -> DistributedMutex {
    DistributedMutex::new(
        store,
        ResiliencePolicy::new(
            RetryPolicy::new(retry_count, 2.0),
            CircuitBreaker::new(CircuitBreakerConfig {
                failure_threshold: 0.5,
                sampling_window: Duration::from_secs(60),
                minimum_throughput: 2,
                break_duration: Duration::from_secs(30),
            }),
            None,
        ),
    )
}

#[tokio::test(start_paused = true)]
async fn test_transient_failure_is_retried_until_store_recovers() {
    let store = Arc::new(FlakyStore::default());
    store.set_failing(true);
    let mutex = Arc::new(mutex(store.clone(), 3));

    let acquire = tokio::spawn({
        let mutex = mutex.clone();
        async move { mutex.try_acquire(KEY, TTL).await }
    });

    // First attempt fails at t=0, the retry waits 2s
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(store.calls(), 1);
    store.set_failing(false);

    assert!(acquire.await.unwrap());
    assert_eq!(store.calls(), 2);
    assert_eq!(mutex.circuit_state().await, CircuitState::Closed);
}

#[tokio::test(start_paused = true)]
async fn test_failing_store_opens_circuit_and_is_not_called_while_open() {
    let store = Arc::new(FlakyStore::default());
    store.set_failing(true);
    let mutex = mutex(store.clone(), 0);

    assert!(!mutex.try_acquire(KEY, TTL).await);
    assert!(!mutex.try_acquire(KEY, TTL).await);
    assert_eq!(mutex.circuit_state().await, CircuitState::Open);
    let calls_when_opened = store.calls();

    // Even a healthy store is not touched while the circuit is open
    store.set_failing(false);
    for _ in 0..5 {
        assert!(!mutex.try_acquire(KEY, TTL).await);
    }
    assert_eq!(store.calls(), calls_when_opened);
}

#[tokio::test(start_paused = true)]
async fn test_half_open_trial_success_closes_circuit() {
    let store = Arc::new(FlakyStore::default());
    store.set_failing(true);
    let mutex = mutex(store.clone(), 0);
    assert!(!mutex.try_acquire(KEY, TTL).await);
    assert!(!mutex.try_acquire(KEY, TTL).await);

    tokio::time::advance(Duration::from_secs(31)).await;
    assert_eq!(mutex.circuit_state().await, CircuitState::HalfOpen);

    store.set_failing(false);
    assert!(mutex.try_acquire(KEY, TTL).await);
    assert_eq!(mutex.circuit_state().await, CircuitState::Closed);
}

#[tokio::test(start_paused = true)]
async fn test_half_open_trial_failure_reopens_circuit() {
    let store = Arc::new(FlakyStore::default());
    store.set_failing(true);
    let mutex = mutex(store.clone(), 0);
    assert!(!mutex.try_acquire(KEY, TTL).await);
    assert!(!mutex.try_acquire(KEY, TTL).await);

    tokio::time::advance(Duration::from_secs(31)).await;
    let calls_before_trial = store.calls();

    assert!(!mutex.try_acquire(KEY, TTL).await);
    assert_eq!(store.calls(), calls_before_trial + 1);
    assert_eq!(mutex.circuit_state().await, CircuitState::Open);

    // A new break duration has started
    assert!(!mutex.try_acquire(KEY, TTL).await);
    assert_eq!(store.calls(), calls_before_trial + 1);
}

#[tokio::test(start_paused = true)]
async fn test_release_failure_leaves_lock_to_expire() {
    let store = Arc::new(FlakyStore::default());
    let mutex = mutex(store.clone(), 0);
    assert!(mutex.try_acquire(KEY, TTL).await);

    store.set_failing(true);
    mutex.release(KEY).await;
    store.set_failing(false);

    assert_eq!(store.inner.get(KEY).await.as_deref(), Some(mutex.instance_id()));

    tokio::time::advance(TTL + Duration::from_secs(1)).await;
    assert!(store.inner.get(KEY).await.is_none());
    assert!(mutex.try_acquire(KEY, TTL).await);
}
