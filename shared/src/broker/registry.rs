use super::{BrokerClientFactory, BrokerPullClient};
use eventpull_error::BrokerError;
use eventpull_types::TopicSubscription;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{OnceCell, RwLock};
use tracing::info;

type ClientCell = Arc<OnceCell<Arc<dyn BrokerPullClient>>>;

/// Append-only cache of broker clients keyed by topic name
///
/// All subscriptions of a topic share one client. Entries are never removed.
/// The map lock is only held to find a topic's cell; creation runs on the
/// cell, so a slow topic never holds up the others.
pub struct ClientRegistry {
    factory: Arc<dyn BrokerClientFactory>,
    clients: RwLock<HashMap<String, ClientCell>>,
}

impl ClientRegistry {
    pub fn new(factory: Arc<dyn BrokerClientFactory>) -> Self {
        Self {
            factory,
            clients: RwLock::new(HashMap::new()),
        }
    }

    /// Cached client for `target.name`, built with the target's credential on first use
    pub async fn get_or_create(
        &self,
        target: &TopicSubscription,
    ) -> Result<Arc<dyn BrokerPullClient>, BrokerError> {
        let cell = self.cell(&target.name).await;

        let client = cell
            .get_or_try_init(|| async {
                let client = self
                    .factory
                    .create(&target.name, &target.broker_credential())
                    .await?;
                info!(topic = %target.name, "Created broker client");
                Ok::<_, BrokerError>(client)
            })
            .await?;

        Ok(client.clone())
    }

    async fn cell(&self, topic: &str) -> ClientCell {
        if let Some(cell) = self.clients.read().await.get(topic) {
            return cell.clone();
        }

        self.clients
            .write()
            .await
            .entry(topic.to_string())
            .or_default()
            .clone()
    }

    /// Topics with a built client
    pub async fn len(&self) -> usize {
        self.clients
            .read()
            .await
            .values()
            .filter(|cell| cell.initialized())
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
