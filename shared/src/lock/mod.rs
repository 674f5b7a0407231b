// ============================================================================
// Distributed mutex over a shared key/value store
// ============================================================================

mod memory_store;
mod mutex;
mod redis_store;

pub use memory_store::InMemoryLockStore;
pub use mutex::{DistributedMutex, MutexLease};
pub use redis_store::RedisLockStore;

use async_trait::async_trait;
use eventpull_error::StoreError;
use std::time::Duration;

/// Minimal store contract the mutex needs
#[async_trait]
pub trait LockStore: Send + Sync {
    /// Set `key` to `value` with expiry `ttl` only if it is absent.
    /// Returns `true` iff this call created the entry.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, StoreError>;

    /// Remove `key`; removing a missing key is not an error
    async fn delete(&self, key: &str) -> Result<(), StoreError>;
}
