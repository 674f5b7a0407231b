// ============================================================================
// Ingestion Scheduler
// ============================================================================
//
// Periodic trigger. On every tick:
//
//   1. ReentrancyGuard::try_begin_pass   (skipped with allow_concurrent_runs)
//   2. DistributedMutex::try_acquire     (skipped with lock_disabled)
//   3. IngestionCoordinator::ingest_all  (panics caught and logged)
//   4. DistributedMutex::release         (always, once acquired)
//
// Ticks never wait for passes: each pass runs as its own task. `stop`
// cancels the timer and then waits for in-flight passes to finish; it
// never aborts them.
//
// ============================================================================

use crate::coordinator::{IngestionCoordinator, PassReport};
use crate::guard::ReentrancyGuard;
use crate::lock::DistributedMutex;
use eventpull_config::SchedulerConfig;
use eventpull_error::SchedulerError;
use eventpull_metrics::{PASSES_TOTAL, gather_metrics};
use eventpull_types::TopicSubscription;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

/// What a single tick did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickResult {
    Completed(PassReport),
    /// A pass was already running in this process
    SkippedRunning,
    /// Another instance holds the distributed lock
    SkippedLock,
    /// The pass body panicked; the lock was still released
    Panicked,
}

impl TickResult {
    /// Label on the passes counter
    pub fn as_str(&self) -> &'static str {
        match self {
            TickResult::Completed(_) => "completed",
            TickResult::SkippedRunning => "skipped_running",
            TickResult::SkippedLock => "skipped_lock",
            TickResult::Panicked => "panicked",
        }
    }
}

struct Pass {
    config: SchedulerConfig,
    guard: ReentrancyGuard,
    mutex: Option<Arc<DistributedMutex>>,
    coordinator: IngestionCoordinator,
    targets: Vec<TopicSubscription>,
}

impl Pass {
    async fn tick(&self) -> TickResult {
        let result = self.run().await;
        PASSES_TOTAL.with_label_values(&[result.as_str()]).inc();

        if tracing::enabled!(tracing::Level::DEBUG) {
            match gather_metrics() {
                Ok(metrics) => debug!(metrics = %metrics, "Ingestion metrics"),
                Err(e) => debug!(error = %e, "Failed to gather metrics"),
            }
        }

        result
    }

    async fn run(&self) -> TickResult {
        let _permit = if self.config.allow_concurrent_runs {
            None
        } else {
            match self.guard.try_begin_pass() {
                Some(permit) => Some(permit),
                None => {
                    info!("Ingestion pass already running, skipping tick");
                    return TickResult::SkippedRunning;
                }
            }
        };

        let mutex = self.mutex.as_deref().filter(|_| !self.config.lock_disabled);
        if let Some(mutex) = mutex {
            if !mutex
                .try_acquire(&self.config.lock_key, self.config.lock_timeout)
                .await
            {
                info!(
                    lock_key = %self.config.lock_key,
                    "Distributed lock not acquired, another instance is ingesting"
                );
                return TickResult::SkippedLock;
            }
        }

        info!(targets = self.targets.len(), "Ingestion pass started");
        let outcome = AssertUnwindSafe(self.coordinator.ingest_all(&self.targets))
            .catch_unwind()
            .await;

        if let Some(mutex) = mutex {
            mutex.release(&self.config.lock_key).await;
        }

        match outcome {
            Ok(report) => {
                info!(
                    drained = report.drains.len(),
                    failed = report.failed.len(),
                    received = report.received(),
                    "Ingestion pass completed"
                );
                TickResult::Completed(report)
            }
            Err(_) => {
                error!("Ingestion pass panicked");
                TickResult::Panicked
            }
        }
    }
}

struct Running {
    cancel: CancellationToken,
    timer: JoinHandle<()>,
}

pub struct IngestionScheduler {
    pass: Arc<Pass>,
    passes: TaskTracker,
    running: Mutex<Option<Running>>,
}

impl IngestionScheduler {
    /// `mutex` may be `None` only for single-instance deployments
    pub fn new(
        config: SchedulerConfig,
        coordinator: IngestionCoordinator,
        mutex: Option<Arc<DistributedMutex>>,
        targets: Vec<TopicSubscription>,
    ) -> Self {
        if mutex.is_none() && !config.lock_disabled {
            warn!("No distributed mutex configured, passes are not coordinated across instances");
        }

        Self {
            pass: Arc::new(Pass {
                config,
                guard: ReentrancyGuard::new(),
                mutex,
                coordinator,
                targets,
            }),
            passes: TaskTracker::new(),
            running: Mutex::new(None),
        }
    }

    pub fn guard(&self) -> &ReentrancyGuard {
        &self.pass.guard
    }

    pub fn mutex(&self) -> Option<&DistributedMutex> {
        self.pass.mutex.as_deref()
    }

    pub fn targets(&self) -> &[TopicSubscription] {
        &self.pass.targets
    }

    pub async fn is_started(&self) -> bool {
        self.running.lock().await.is_some()
    }

    /// Start ticking: first tick immediately, then every polling_frequency
    pub async fn start(&self) -> Result<(), SchedulerError> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Err(SchedulerError::AlreadyStarted);
        }

        self.passes.reopen();
        let cancel = CancellationToken::new();
        let timer_cancel = cancel.clone();
        let pass = self.pass.clone();
        let passes = self.passes.clone();
        let period = pass.config.polling_frequency;

        let timer = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    biased;
                    _ = timer_cancel.cancelled() => break,
                    _ = interval.tick() => {
                        let pass = pass.clone();
                        passes.spawn(async move {
                            pass.tick().await;
                        });
                    }
                }
            }
        });

        info!(
            polling_frequency_secs = period.as_secs(),
            targets = self.pass.targets.len(),
            "Ingestion scheduler started"
        );
        *running = Some(Running { cancel, timer });
        Ok(())
    }

    /// Stop ticking and wait for in-flight passes
    pub async fn stop(&self) -> Result<(), SchedulerError> {
        let Some(Running { cancel, timer }) = self.running.lock().await.take() else {
            return Err(SchedulerError::NotStarted);
        };

        cancel.cancel();
        if let Err(e) = timer.await {
            error!(error = %e, "Ingestion timer task failed");
        }

        self.passes.close();
        if !self.passes.is_empty() {
            info!(in_flight = self.passes.len(), "Waiting for in-flight ingestion passes");
        }
        self.passes.wait().await;

        info!("Ingestion scheduler stopped");
        Ok(())
    }

    /// Run one tick on the calling task
    pub async fn run_once(&self) -> TickResult {
        self.pass.tick().await
    }
}
