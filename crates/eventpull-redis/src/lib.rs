//! # Eventpull Redis
//!
//! Low-level Redis client used as the shared store of the distributed
//! ingestion mutex.
//!
//! - **No business logic** - pure infrastructure layer
//! - **No dependencies** on other eventpull-* crates
//! - Connection management with automatic reconnection
//! - Conditional set with expiry (`SET NX PX`) and delete
//!
//! ## Example
//!
//! ```rust,no_run
//! use eventpull_redis::RedisClient;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = RedisClient::connect("redis://localhost:6379").await?;
//!
//!     if client.set_nx_px("ingestion-lock", "instance-a", Duration::from_secs(300)).await? {
//!         // ... exclusive work ...
//!         client.del("ingestion-lock").await?;
//!     }
//!
//!     Ok(())
//! }
//! ```

mod client;

pub use client::RedisClient;

// Re-export commonly used types
pub use redis::RedisError;

/// Result type for Redis operations
pub type Result<T> = std::result::Result<T, RedisError>;
