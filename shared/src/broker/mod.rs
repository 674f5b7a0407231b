// ============================================================================
// Broker pull clients
// ============================================================================
//
// Lock-token pull model: `receive` leases a batch of messages, each carrying
// an opaque lock token; every token is then acknowledged (done), released
// (redeliver) or rejected (never redeliver).
//
// Clients are built per topic by a BrokerClientFactory and cached in an
// append-only ClientRegistry.
//
// ============================================================================

mod http;
mod memory;
mod registry;

pub use http::{
    EnvTokenSource, HttpAuthorization, HttpClientFactory, HttpPullClient, RECEIVE_API_VERSION,
    TokenSource,
};
pub use memory::{DEFAULT_LOCK_DURATION, InMemoryBroker, SettleCall, TOKEN_LOST};
pub use registry::ClientRegistry;

use async_trait::async_trait;
use eventpull_error::BrokerError;
use eventpull_types::{BrokerCredential, LockTokenResult, ReceivedMessage};
use std::sync::Arc;
use std::time::Duration;

#[async_trait]
pub trait BrokerPullClient: Send + Sync {
    /// Lease up to `max_events` messages, waiting at most `max_wait` for the first
    async fn receive(
        &self,
        topic: &str,
        subscription: &str,
        max_events: usize,
        max_wait: Duration,
    ) -> Result<Vec<ReceivedMessage>, BrokerError>;

    async fn acknowledge(
        &self,
        topic: &str,
        subscription: &str,
        lock_tokens: &[String],
    ) -> Result<LockTokenResult, BrokerError>;

    async fn release(
        &self,
        topic: &str,
        subscription: &str,
        lock_tokens: &[String],
    ) -> Result<LockTokenResult, BrokerError>;

    async fn reject(
        &self,
        topic: &str,
        subscription: &str,
        lock_tokens: &[String],
    ) -> Result<LockTokenResult, BrokerError>;
}

#[async_trait]
pub trait BrokerClientFactory: Send + Sync {
    /// Build the client used for every subscription of `topic`
    async fn create(
        &self,
        topic: &str,
        credential: &BrokerCredential,
    ) -> Result<Arc<dyn BrokerPullClient>, BrokerError>;
}

/// Terminal decision for a batch of lock tokens
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettleOperation {
    Acknowledge,
    Release,
    Reject,
}

impl SettleOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            SettleOperation::Acknowledge => "acknowledge",
            SettleOperation::Release => "release",
            SettleOperation::Reject => "reject",
        }
    }

    /// Issue this operation for `lock_tokens` on `client`
    pub async fn apply(
        self,
        client: &dyn BrokerPullClient,
        topic: &str,
        subscription: &str,
        lock_tokens: &[String],
    ) -> Result<LockTokenResult, BrokerError> {
        match self {
            SettleOperation::Acknowledge => client.acknowledge(topic, subscription, lock_tokens).await,
            SettleOperation::Release => client.release(topic, subscription, lock_tokens).await,
            SettleOperation::Reject => client.reject(topic, subscription, lock_tokens).await,
        }
    }
}

impl std::fmt::Display for SettleOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
