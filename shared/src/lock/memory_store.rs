// ============================================================================
// In-memory lock store
// ============================================================================
//
// Single-process stand-in for Redis: tests and LOCK_BACKEND=memory.
// Entries past their expiry count as absent.
//
// ============================================================================

use super::LockStore;
use async_trait::async_trait;
use eventpull_error::StoreError;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

#[derive(Debug)]
struct Entry {
    value: String,
    expires_at: Instant,
}

/// Clones share the same entries
#[derive(Debug, Clone, Default)]
pub struct InMemoryLockStore {
    entries: Arc<Mutex<HashMap<String, Entry>>>,
}

impl InMemoryLockStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current holder of `key`, if the entry has not expired
    pub async fn get(&self, key: &str) -> Option<String> {
        let entries = self.entries.lock().await;
        entries
            .get(key)
            .filter(|entry| entry.expires_at > Instant::now())
            .map(|entry| entry.value.clone())
    }
}

#[async_trait]
impl LockStore for InMemoryLockStore {
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, StoreError> {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();

        if let Some(entry) = entries.get(key) {
            if entry.expires_at > now {
                return Ok(false);
            }
        }

        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: now + ttl,
            },
        );
        Ok(true)
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.entries.lock().await.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_if_absent_only_once() {
        let store = InMemoryLockStore::new();

        assert!(store.set_if_absent("lock", "a", Duration::from_secs(10)).await.unwrap());
        assert!(!store.set_if_absent("lock", "b", Duration::from_secs(10)).await.unwrap());
        assert_eq!(store.get("lock").await.as_deref(), Some("a"));

        store.delete("lock").await.unwrap();
        assert!(store.set_if_absent("lock", "b", Duration::from_secs(10)).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entry_counts_as_absent() {
        let store = InMemoryLockStore::new();
        store.set_if_absent("lock", "a", Duration::from_secs(5)).await.unwrap();

        tokio::time::advance(Duration::from_secs(6)).await;

        assert!(store.get("lock").await.is_none());
        assert!(store.set_if_absent("lock", "b", Duration::from_secs(5)).await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_missing_key_is_ok() {
        let store = InMemoryLockStore::new();
        assert!(store.delete("nothing").await.is_ok());
    }
}
