// ============================================================================
// Consumption targets
// ============================================================================
//
// A topic is configured once with its optional shared key and the list of
// subscriptions to drain. Each subscription becomes its own
// TopicSubscription and drives an independent drain loop.
//
// ============================================================================

use serde::{Deserialize, Serialize};

/// Topic entry as written in configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicConfig {
    pub name: String,
    /// Shared access key; `None` means the ambient platform identity is used
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub subscriptions: Vec<String>,
}

impl TopicConfig {
    /// One consumption target per subscription
    pub fn targets(&self) -> Vec<TopicSubscription> {
        self.subscriptions
            .iter()
            .map(|subscription| TopicSubscription {
                name: self.name.clone(),
                credential: self.key.clone().map(Secret::new),
                subscription: subscription.clone(),
            })
            .collect()
    }
}

/// Flatten topic entries into drain targets
pub fn expand_targets(topics: &[TopicConfig]) -> Vec<TopicSubscription> {
    topics.iter().flat_map(TopicConfig::targets).collect()
}

/// One (topic, subscription) pair to drain on every pass
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TopicSubscription {
    pub name: String,
    pub credential: Option<Secret>,
    pub subscription: String,
}

impl TopicSubscription {
    pub fn new(name: impl Into<String>, subscription: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            credential: None,
            subscription: subscription.into(),
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.credential = Some(Secret::new(key.into()));
        self
    }

    /// How the broker client for this topic authenticates
    pub fn broker_credential(&self) -> BrokerCredential {
        match &self.credential {
            Some(secret) => BrokerCredential::SharedKey(secret.clone()),
            None => BrokerCredential::AmbientIdentity,
        }
    }
}

/// Authentication chosen per topic when its broker client is built
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BrokerCredential {
    SharedKey(Secret),
    AmbientIdentity,
}

/// String that never shows up in `Debug` output
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Secret(***)")
    }
}
