// ============================================================================
// Broker Configuration
// ============================================================================

use crate::Env;
use crate::constants::*;
use anyhow::{Context, Result, bail};
use eventpull_types::{TopicConfig, TopicSubscription, expand_targets};
use std::time::Duration;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BrokerBackend {
    /// Namespace pull REST API over HTTPS
    #[default]
    Http,
    /// In-process broker (local runs and tests)
    Memory,
}

/// Pull broker endpoint, batch sizing and topics to drain
#[derive(Clone, Debug)]
pub struct BrokerConfig {
    pub backend: BrokerBackend,
    /// Namespace endpoint, e.g. "https://my-ns.westeurope-1.eventgrid.azure.net"
    pub endpoint: Option<String>,
    /// Maximum events per receive call
    pub event_batch_size: usize,
    /// How long a receive call waits for events before returning empty
    pub max_wait_time: Duration,
    /// Env var holding the bearer token used by topics without a key
    pub ambient_token_env: String,
    pub topics: Vec<TopicConfig>,
}

impl BrokerConfig {
    pub(crate) fn from_env(env: &Env<'_>) -> Result<Self> {
        let backend = match env.string("BROKER_BACKEND").as_deref() {
            None | Some("http") => BrokerBackend::Http,
            Some("memory") => BrokerBackend::Memory,
            Some(other) => bail!(
                "Invalid value for BROKER_BACKEND: '{}' (expected http/memory)",
                other
            ),
        };

        let topics = match env.string("INGEST_TOPICS") {
            Some(raw) => serde_json::from_str::<Vec<TopicConfig>>(&raw)
                .context("INGEST_TOPICS must be a JSON list of {name, key?, subscriptions}")?,
            None => Vec::new(),
        };

        Ok(Self {
            backend,
            endpoint: env
                .string("BROKER_ENDPOINT")
                .map(|e| e.trim_end_matches('/').to_string()),
            event_batch_size: env.parse_or("BROKER_EVENT_BATCH_SIZE", DEFAULT_EVENT_BATCH_SIZE)?,
            max_wait_time: Duration::from_secs(
                env.parse_or("BROKER_MAX_WAIT_SECS", DEFAULT_MAX_WAIT_SECS)?,
            ),
            ambient_token_env: env
                .string("BROKER_AMBIENT_TOKEN_ENV")
                .unwrap_or_else(|| DEFAULT_AMBIENT_TOKEN_ENV.to_string()),
            topics,
        })
    }

    /// Every (topic, subscription) pair drained on a pass
    pub fn targets(&self) -> Vec<TopicSubscription> {
        expand_targets(&self.topics)
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.backend == BrokerBackend::Http && self.endpoint.is_none() {
            bail!("BROKER_ENDPOINT is required when BROKER_BACKEND=http");
        }
        if self.event_batch_size == 0 {
            bail!("BROKER_EVENT_BATCH_SIZE must be at least 1");
        }
        for topic in &self.topics {
            if topic.name.trim().is_empty() {
                bail!("INGEST_TOPICS contains a topic without a name");
            }
            if topic.subscriptions.iter().any(|s| s.trim().is_empty()) {
                bail!("INGEST_TOPICS topic '{}' has an empty subscription", topic.name);
            }
        }
        Ok(())
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            backend: BrokerBackend::Http,
            endpoint: None,
            event_batch_size: DEFAULT_EVENT_BATCH_SIZE,
            max_wait_time: Duration::from_secs(DEFAULT_MAX_WAIT_SECS),
            ambient_token_env: DEFAULT_AMBIENT_TOKEN_ENV.to_string(),
            topics: Vec::new(),
        }
    }
}
