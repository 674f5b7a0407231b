// ============================================================================
// In-memory broker
// ============================================================================
//
// Lock-token broker living in the process: tests and BROKER_BACKEND=memory.
//
// Per (topic, subscription):
// - ready:     FIFO of events waiting for delivery
// - in_flight: lock token -> leased event and its lock expiry
// - acknowledged / rejected: retired events, kept for inspection
//
// A lease not settled within the lock duration expires: the event goes back
// to the front of the ready queue and its token is reported lost on settle.
//
// `receive` never waits; an empty ready queue returns an empty batch.
//
// ============================================================================

use super::{BrokerClientFactory, BrokerPullClient, SettleOperation};
use async_trait::async_trait;
use eventpull_error::BrokerError;
use eventpull_types::{BrokerCredential, CloudEvent, FailedLockToken, LockTokenResult, ReceivedMessage};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Failure code for a token that is not (or no longer) leased
pub const TOKEN_LOST: &str = "TokenLost";

/// How long a received event stays leased before it is redelivered
pub const DEFAULT_LOCK_DURATION: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
struct Delivery {
    event: CloudEvent,
    delivery_count: u32,
}

#[derive(Debug)]
struct Lease {
    delivery: Delivery,
    expires_at: Instant,
}

#[derive(Debug, Default)]
struct SubscriptionState {
    ready: VecDeque<Delivery>,
    in_flight: HashMap<String, Lease>,
    acknowledged: Vec<CloudEvent>,
    rejected: Vec<CloudEvent>,
}

impl SubscriptionState {
    /// Put every lease past its expiry back at the front, oldest first
    fn expire_leases(&mut self, now: Instant) {
        let mut expired: Vec<(String, Instant)> = self
            .in_flight
            .iter()
            .filter(|(_, lease)| lease.expires_at <= now)
            .map(|(token, lease)| (token.clone(), lease.expires_at))
            .collect();
        if expired.is_empty() {
            return;
        }
        expired.sort_by_key(|(_, expires_at)| *expires_at);

        for (token, _) in expired.into_iter().rev() {
            if let Some(lease) = self.in_flight.remove(&token) {
                self.ready.push_front(lease.delivery);
            }
        }
    }
}

/// One settle call as seen by the broker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettleCall {
    pub operation: SettleOperation,
    pub topic: String,
    pub subscription: String,
    pub lock_tokens: Vec<String>,
}

#[derive(Debug, Default)]
struct BrokerState {
    subscriptions: HashMap<(String, String), SubscriptionState>,
    settle_calls: Vec<SettleCall>,
}

/// Clones share the same queues
#[derive(Debug, Clone)]
pub struct InMemoryBroker {
    state: Arc<Mutex<BrokerState>>,
    lock_duration: Duration,
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self {
            state: Arc::default(),
            lock_duration: DEFAULT_LOCK_DURATION,
        }
    }
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_lock_duration(mut self, lock_duration: Duration) -> Self {
        self.lock_duration = lock_duration;
        self
    }

    /// Make `event` available to `subscription` of `topic`
    pub async fn publish(&self, topic: &str, subscription: &str, event: CloudEvent) {
        let mut state = self.state.lock().await;
        state
            .subscriptions
            .entry(key(topic, subscription))
            .or_default()
            .ready
            .push_back(Delivery {
                event,
                delivery_count: 0,
            });
    }

    /// Events waiting for delivery
    pub async fn ready_count(&self, topic: &str, subscription: &str) -> usize {
        self.with_subscription(topic, subscription, |s| s.ready.len())
            .await
    }

    /// Leased events not yet settled
    pub async fn in_flight_count(&self, topic: &str, subscription: &str) -> usize {
        self.with_subscription(topic, subscription, |s| s.in_flight.len())
            .await
    }

    pub async fn acknowledged(&self, topic: &str, subscription: &str) -> Vec<CloudEvent> {
        self.with_subscription(topic, subscription, |s| s.acknowledged.clone())
            .await
    }

    pub async fn rejected(&self, topic: &str, subscription: &str) -> Vec<CloudEvent> {
        self.with_subscription(topic, subscription, |s| s.rejected.clone())
            .await
    }

    /// Every settle call received so far, in order
    pub async fn settle_calls(&self) -> Vec<SettleCall> {
        self.state.lock().await.settle_calls.clone()
    }

    async fn with_subscription<T: Default>(
        &self,
        topic: &str,
        subscription: &str,
        f: impl FnOnce(&SubscriptionState) -> T,
    ) -> T {
        let mut state = self.state.lock().await;
        match state.subscriptions.get_mut(&key(topic, subscription)) {
            Some(sub) => {
                sub.expire_leases(Instant::now());
                f(sub)
            }
            None => T::default(),
        }
    }

    async fn settle(
        &self,
        operation: SettleOperation,
        topic: &str,
        subscription: &str,
        lock_tokens: &[String],
    ) -> LockTokenResult {
        let mut state = self.state.lock().await;
        state.settle_calls.push(SettleCall {
            operation,
            topic: topic.to_string(),
            subscription: subscription.to_string(),
            lock_tokens: lock_tokens.to_vec(),
        });

        let sub = state
            .subscriptions
            .entry(key(topic, subscription))
            .or_default();
        sub.expire_leases(Instant::now());
        let mut result = LockTokenResult::default();
        let mut released = Vec::new();

        for token in lock_tokens {
            let Some(Lease { delivery, .. }) = sub.in_flight.remove(token) else {
                result.failed.push(FailedLockToken {
                    lock_token: token.clone(),
                    code: TOKEN_LOST.to_string(),
                    description: "lock token not found or lock expired".to_string(),
                });
                continue;
            };

            match operation {
                SettleOperation::Acknowledge => sub.acknowledged.push(delivery.event),
                SettleOperation::Release => released.push(delivery),
                SettleOperation::Reject => sub.rejected.push(delivery.event),
            }
            result.succeeded.push(token.clone());
        }

        // Released batch goes back to the front in its original order
        for delivery in released.into_iter().rev() {
            sub.ready.push_front(delivery);
        }

        result
    }
}

fn key(topic: &str, subscription: &str) -> (String, String) {
    (topic.to_string(), subscription.to_string())
}

#[async_trait]
impl BrokerPullClient for InMemoryBroker {
    async fn receive(
        &self,
        topic: &str,
        subscription: &str,
        max_events: usize,
        _max_wait: Duration,
    ) -> Result<Vec<ReceivedMessage>, BrokerError> {
        let mut state = self.state.lock().await;
        let sub = state
            .subscriptions
            .entry(key(topic, subscription))
            .or_default();
        let now = Instant::now();
        sub.expire_leases(now);

        let take = max_events.min(sub.ready.len());
        let mut batch = Vec::with_capacity(take);
        for mut delivery in sub.ready.drain(..take).collect::<Vec<_>>() {
            delivery.delivery_count += 1;
            let lock_token = uuid::Uuid::new_v4().to_string();
            batch.push(ReceivedMessage {
                event: delivery.event.clone(),
                lock_token: lock_token.clone(),
                delivery_count: delivery.delivery_count,
            });
            sub.in_flight.insert(
                lock_token,
                Lease {
                    delivery,
                    expires_at: now + self.lock_duration,
                },
            );
        }

        Ok(batch)
    }

    async fn acknowledge(
        &self,
        topic: &str,
        subscription: &str,
        lock_tokens: &[String],
    ) -> Result<LockTokenResult, BrokerError> {
        Ok(self
            .settle(SettleOperation::Acknowledge, topic, subscription, lock_tokens)
            .await)
    }

    async fn release(
        &self,
        topic: &str,
        subscription: &str,
        lock_tokens: &[String],
    ) -> Result<LockTokenResult, BrokerError> {
        Ok(self
            .settle(SettleOperation::Release, topic, subscription, lock_tokens)
            .await)
    }

    async fn reject(
        &self,
        topic: &str,
        subscription: &str,
        lock_tokens: &[String],
    ) -> Result<LockTokenResult, BrokerError> {
        Ok(self
            .settle(SettleOperation::Reject, topic, subscription, lock_tokens)
            .await)
    }
}

#[async_trait]
impl BrokerClientFactory for InMemoryBroker {
    async fn create(
        &self,
        _topic: &str,
        _credential: &BrokerCredential,
    ) -> Result<Arc<dyn BrokerPullClient>, BrokerError> {
        Ok(Arc::new(self.clone()))
    }
}
