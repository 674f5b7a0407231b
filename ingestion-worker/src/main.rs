// ============================================================================
// Ingestion Worker
// ============================================================================
//
// Periodically drains every configured (topic, subscription) pair from the
// pull broker. Several replicas may run side by side: a Redis-backed
// distributed mutex lets only one of them ingest at a time, and a process
// local guard keeps overlapping ticks from stacking up.
//
// Modes:
// - default: tick every INGEST_POLLING_FREQUENCY_SECS until SIGTERM/Ctrl-C, then
//   wait for the in-flight pass and exit
// - --once:  run a single pass on the main task and exit
//
// ============================================================================

mod http;

use anyhow::{Context, Result};
use clap::Parser;
use eventpull_config::{BrokerBackend, BrokerConfig, Config, LockBackend, LogFormat};
use eventpull_metrics::LOCK_CIRCUIT_STATE;
use eventpull_shared::{
    BrokerClientFactory, ClientRegistry, CoordinatorOptions, DistributedMutex, HttpClientFactory,
    InMemoryBroker, InMemoryLockStore, IngestionCoordinator, IngestionScheduler, LockStore,
    LoggingHandler, RedisLockStore, TickResult,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "ingestion-worker", version, about = "Pull-broker event ingestion worker")]
struct Cli {
    /// Run a single ingestion pass and exit
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::from_env()?;
    init_tracing(&config);

    info!("=== Ingestion Worker Starting ===");
    info!("Broker backend: {:?}", config.broker.backend);
    info!("Lock backend: {:?}", config.lock.backend);
    info!(
        "Polling every {}s, lock key '{}'",
        config.scheduler.polling_frequency.as_secs(),
        config.scheduler.lock_key
    );

    let scheduler = Arc::new(build_scheduler(&config).await?);

    if cli.once {
        let result = scheduler.run_once().await;
        info!(result = result.as_str(), "Single ingestion pass finished");
        return match result {
            TickResult::Panicked => Err(anyhow::anyhow!("Ingestion pass panicked")),
            _ => Ok(()),
        };
    }

    let shutdown = CancellationToken::new();
    tokio::spawn(wait_for_signal(shutdown.clone()));

    if let Some(addr) = &config.metrics_bind_addr {
        let listener = tokio::net::TcpListener::bind(addr.as_str())
            .await
            .with_context(|| format!("Failed to bind metrics listener on {}", addr))?;
        info!("Metrics and status listening on {}", addr);

        let app = http::router(scheduler.clone());
        let server_shutdown = shutdown.clone();
        tokio::spawn(async move {
            let serve = axum::serve(listener, app)
                .with_graceful_shutdown(async move { server_shutdown.cancelled().await });
            if let Err(e) = serve.await {
                error!(error = %e, "Metrics server failed");
            }
        });
    }

    scheduler
        .start()
        .await
        .context("Failed to start ingestion scheduler")?;

    shutdown.cancelled().await;

    scheduler
        .stop()
        .await
        .context("Failed to stop ingestion scheduler")?;
    info!("=== Ingestion Worker Stopped ===");
    Ok(())
}

fn init_tracing(config: &Config) {
    let (text, json) = match config.logging.format {
        LogFormat::Text => (Some(tracing_subscriber::fmt::layer()), None),
        LogFormat::Json => (None, Some(tracing_subscriber::fmt::layer().json())),
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.rust_log.clone()))
        .with(text)
        .with(json)
        .init();
}

async fn build_scheduler(config: &Config) -> Result<IngestionScheduler> {
    let mutex = build_mutex(config).await?;
    let factory = build_factory(&config.broker)?;

    let targets = config.broker.targets();
    for target in &targets {
        info!(topic = %target.name, subscription = %target.subscription, "Ingestion target");
    }
    if targets.is_empty() {
        warn!("No topics configured, every pass will be empty");
    }

    let coordinator = IngestionCoordinator::new(
        ClientRegistry::new(factory),
        Arc::new(LoggingHandler),
        CoordinatorOptions::from_config(&config.broker, &config.scheduler),
    );

    Ok(IngestionScheduler::new(
        config.scheduler.clone(),
        coordinator,
        mutex,
        targets,
    ))
}

async fn build_mutex(config: &Config) -> Result<Option<Arc<DistributedMutex>>> {
    if config.scheduler.lock_disabled {
        info!("Distributed lock disabled");
        return Ok(None);
    }

    let store: Arc<dyn LockStore> = match config.lock.backend {
        LockBackend::Redis => {
            let url = config
                .lock
                .redis_url
                .as_deref()
                .context("REDIS_URL is required for the redis lock backend")?;
            info!("Connecting to Redis at: {}", mask_redis_url(url));
            let store = RedisLockStore::connect(url)
                .await
                .context("Failed to connect to Redis")?;
            info!("Connected to Redis");
            Arc::new(store)
        }
        LockBackend::Memory => {
            warn!("In-memory lock store: passes are only coordinated within this process");
            Arc::new(InMemoryLockStore::new())
        }
    };

    LOCK_CIRCUIT_STATE.set(0);
    Ok(Some(Arc::new(DistributedMutex::from_config(
        store,
        &config.lock,
    ))))
}

fn build_factory(config: &BrokerConfig) -> Result<Arc<dyn BrokerClientFactory>> {
    match config.backend {
        BrokerBackend::Http => {
            let endpoint = config
                .endpoint
                .as_deref()
                .context("BROKER_ENDPOINT is required for the http broker backend")?;
            info!("Broker endpoint: {}", endpoint);
            let factory = HttpClientFactory::new(endpoint, config.ambient_token_env.as_str())
                .context("Failed to create broker HTTP client")?;
            Ok(Arc::new(factory))
        }
        BrokerBackend::Memory => {
            warn!("In-memory broker: nothing outside this process can publish events");
            Ok(Arc::new(InMemoryBroker::new()))
        }
    }
}

/// Hide credentials between the scheme and '@'
fn mask_redis_url(url: &str) -> String {
    match url.find('@') {
        Some(at_pos) => {
            let protocol_end = url.find("://").map(|p| p + 3).unwrap_or(0);
            format!("{}***{}", &url[..protocol_end], &url[at_pos..])
        }
        None => url.to_string(),
    }
}

async fn wait_for_signal(shutdown: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = sigterm.recv() => {
                        info!("SIGTERM received, initiating graceful shutdown...");
                    }
                    _ = tokio::signal::ctrl_c() => {
                        info!("SIGINT received, initiating graceful shutdown...");
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "Failed to register SIGTERM handler, only Ctrl-C stops the worker");
                tokio::signal::ctrl_c().await.ok();
                info!("SIGINT received, initiating graceful shutdown...");
            }
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.ok();
        info!("Ctrl-C received, initiating graceful shutdown...");
    }
    shutdown.cancel();
}
