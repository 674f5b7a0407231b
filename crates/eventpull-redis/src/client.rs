//! Redis client implementation with connection management

use crate::Result;
use redis::aio::ConnectionManager;
use std::time::Duration;

/// Redis client with automatic reconnection
///
/// Cloning is cheap; clones share the underlying multiplexed connection.
#[derive(Clone)]
pub struct RedisClient {
    conn: ConnectionManager,
}

impl RedisClient {
    /// Connect to Redis server
    ///
    /// Supports both redis:// and rediss:// (TLS) URLs
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self { conn })
    }

    // ============================================================================
    // Conditional writes
    // ============================================================================

    /// SET key value NX PX ttl - set only if absent, with millisecond expiry
    ///
    /// Returns `true` iff this call created the key.
    pub async fn set_nx_px(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.conn.clone();
        // Redis rejects PX 0
        let ttl_ms = ttl.as_millis().max(1) as u64;
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(ttl_ms)
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }

    // ============================================================================
    // Key-Value Operations
    // ============================================================================

    /// GET - Get value by key
    pub async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        redis::cmd("GET").arg(key).query_async(&mut conn).await
    }

    /// DEL - Delete a key, returns the number of keys removed
    pub async fn del(&self, key: &str) -> Result<i64> {
        let mut conn = self.conn.clone();
        redis::cmd("DEL").arg(key).query_async(&mut conn).await
    }

    /// PTTL - Remaining time to live in milliseconds (-2 missing, -1 no expiry)
    pub async fn pttl(&self, key: &str) -> Result<i64> {
        let mut conn = self.conn.clone();
        redis::cmd("PTTL").arg(key).query_async(&mut conn).await
    }
}
