// ============================================================================
// Eventpull Config - Centralized configuration management
// ============================================================================
//
// Loads every ingestion setting from environment variables (with .env
// support) and falls back to sensible defaults. Sub-configurations live in
// their own modules; `Config::validate` rejects values the pipeline cannot
// run with.
//
// ============================================================================

mod broker;
mod constants;
mod lock;
mod logging;
mod scheduler;

pub use broker::{BrokerBackend, BrokerConfig};
pub use lock::{LockBackend, LockConfig};
pub use logging::{LogFormat, LoggingConfig};
pub use scheduler::SchedulerConfig;

use anyhow::{Result, bail};
use constants::*;
use std::str::FromStr;

/// Main configuration structure for the ingestion worker
#[derive(Clone, Debug)]
pub struct Config {
    /// tracing EnvFilter directive (RUST_LOG)
    pub rust_log: String,
    /// Listener for /health, /metrics and /status; none when unset
    pub metrics_bind_addr: Option<String>,

    // Sub-configurations
    pub logging: LoggingConfig,
    pub scheduler: SchedulerConfig,
    pub lock: LockConfig,
    pub broker: BrokerConfig,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup (tests, embedding hosts)
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(&lookup);

        let config = Self {
            rust_log: env
                .string("RUST_LOG")
                .unwrap_or_else(|| DEFAULT_RUST_LOG.to_string()),
            metrics_bind_addr: env.string("METRICS_BIND_ADDR"),
            logging: LoggingConfig::from_env(&env)?,
            scheduler: SchedulerConfig::from_env(&env)?,
            lock: LockConfig::from_env(&env)?,
            broker: BrokerConfig::from_env(&env)?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        self.scheduler.validate()?;
        self.lock.validate(self.scheduler.lock_disabled)?;
        self.broker.validate()?;
        if let Some(addr) = &self.metrics_bind_addr {
            if addr.parse::<std::net::SocketAddr>().is_err() {
                bail!("Invalid value for METRICS_BIND_ADDR: '{}' (expected host:port)", addr);
            }
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            rust_log: DEFAULT_RUST_LOG.to_string(),
            metrics_bind_addr: None,
            logging: LoggingConfig::default(),
            scheduler: SchedulerConfig::default(),
            lock: LockConfig::default(),
            broker: BrokerConfig::default(),
        }
    }
}

/// Typed view over a key lookup
pub(crate) struct Env<'a>(&'a dyn Fn(&str) -> Option<String>);

impl Env<'_> {
    pub(crate) fn string(&self, key: &str) -> Option<String> {
        (self.0)(key).filter(|v| !v.trim().is_empty())
    }

    /// Parse a value, failing loudly on garbage instead of silently defaulting
    pub(crate) fn parse_or<T>(&self, key: &str, default: T) -> Result<T>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.string(key) {
            Some(raw) => match raw.trim().parse() {
                Ok(value) => Ok(value),
                Err(e) => bail!("Invalid value for {}: '{}' ({})", key, raw, e),
            },
            None => Ok(default),
        }
    }

    pub(crate) fn bool_or(&self, key: &str, default: bool) -> Result<bool> {
        match self.string(key) {
            Some(raw) => match raw.trim().to_lowercase().as_str() {
                "true" | "1" | "yes" => Ok(true),
                "false" | "0" | "no" => Ok(false),
                _ => bail!("Invalid value for {}: '{}' (expected true/false)", key, raw),
            },
            None => Ok(default),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::time::Duration;

    fn load(vars: &[(&str, &str)]) -> Result<Config> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(move |key| map.get(key).cloned())
    }

    #[test]
    fn test_defaults_with_memory_backends() {
        let config = load(&[("LOCK_BACKEND", "memory"), ("BROKER_BACKEND", "memory")]).unwrap();

        assert_eq!(config.rust_log, "info");
        assert!(config.metrics_bind_addr.is_none());
        assert_eq!(config.scheduler.polling_frequency, Duration::from_secs(30));
        assert_eq!(config.scheduler.lock_key, "eventpull:ingestion-lock");
        assert_eq!(config.scheduler.lock_timeout, Duration::from_secs(300));
        assert!(!config.scheduler.allow_concurrent_runs);
        assert_eq!(config.lock.retry_count, 3);
        assert_eq!(config.lock.retry_delay_base_secs, 2.0);
        assert_eq!(config.lock.circuit_failure_threshold, 0.1);
        assert_eq!(config.lock.circuit_minimum_throughput, 100);
        assert_eq!(config.broker.event_batch_size, 100);
        assert_eq!(config.broker.max_wait_time, Duration::from_secs(10));
        assert!(config.broker.topics.is_empty());
    }

    #[test]
    fn test_overrides_and_topics() {
        let config = load(&[
            ("REDIS_URL", "redis://cache:6379"),
            ("BROKER_ENDPOINT", "https://ns.example.net"),
            ("INGEST_POLLING_FREQUENCY_SECS", "5"),
            ("INGEST_ALLOW_CONCURRENT_RUNS", "true"),
            ("LOCK_RETRY_DELAY_BASE_SECS", "0.5"),
            ("BROKER_EVENT_BATCH_SIZE", "25"),
            (
                "INGEST_TOPICS",
                r#"[{"name":"orders","key":"k","subscriptions":["a","b"]},{"name":"audit","subscriptions":["c"]}]"#,
            ),
        ])
        .unwrap();

        assert_eq!(config.scheduler.polling_frequency, Duration::from_secs(5));
        assert!(config.scheduler.allow_concurrent_runs);
        assert_eq!(config.lock.retry_delay_base_secs, 0.5);
        assert_eq!(config.broker.event_batch_size, 25);
        assert_eq!(config.broker.targets().len(), 3);
        assert_eq!(config.lock.redis_url.as_deref(), Some("redis://cache:6379"));
    }

    #[test]
    fn test_redis_url_required_for_redis_backend() {
        let err = load(&[("BROKER_BACKEND", "memory")]).unwrap_err();
        assert!(err.to_string().contains("REDIS_URL"));
    }

    #[test]
    fn test_redis_url_not_required_when_lock_disabled() {
        let config = load(&[("BROKER_BACKEND", "memory"), ("INGEST_LOCK_DISABLED", "true")]);
        assert!(config.is_ok());
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let base = [("LOCK_BACKEND", "memory"), ("BROKER_BACKEND", "memory")];

        let mut vars = base.to_vec();
        vars.push(("BROKER_EVENT_BATCH_SIZE", "0"));
        assert!(load(&vars).is_err());

        let mut vars = base.to_vec();
        vars.push(("LOCK_CIRCUIT_FAILURE_THRESHOLD", "1.5"));
        assert!(load(&vars).is_err());

        let mut vars = base.to_vec();
        vars.push(("INGEST_POLLING_FREQUENCY_SECS", "soon"));
        let err = load(&vars).unwrap_err();
        assert!(err.to_string().contains("INGEST_POLLING_FREQUENCY_SECS"));

        let mut vars = base.to_vec();
        vars.push(("INGEST_TOPICS", r#"[{"name":"orders","subscriptions":[""]}]"#));
        assert!(load(&vars).is_err());

        let mut vars = base.to_vec();
        vars.push(("METRICS_BIND_ADDR", "everywhere"));
        assert!(load(&vars).is_err());
    }
}
