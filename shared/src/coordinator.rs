// ============================================================================
// Ingestion Coordinator
// ============================================================================
//
// Drains topic/subscription pairs. For one pair:
//
//   loop {
//     batch = receive(batch_size, max_wait)      // empty batch -> done
//     outcomes = handle every message concurrently
//     acknowledge(successes) / release(transient failures) / reject(rejected)
//   }
//
// Every received token lands in exactly one settle batch of its iteration.
// Each settle call is issued at most once per iteration and only for a
// non-empty token list. Partially failed settles are logged, never retried:
// the broker redelivers those tokens once their lock expires.
//
// Failure scopes:
// - message: handler error or panic -> TransientFailure -> release
// - pair:    client construction or receive failure -> BrokerError, a
//            panic inside the drain -> DrainFailure; the drain of that pair
//            stops, other pairs carry on
//
// ============================================================================

use crate::broker::{BrokerPullClient, ClientRegistry, SettleOperation};
use crate::handler::MessageHandler;
use eventpull_config::{BrokerConfig, SchedulerConfig};
use eventpull_error::BrokerError;
use eventpull_metrics::{DRAIN_ERRORS_TOTAL, MESSAGES_TOTAL, SETTLE_FAILURES_TOTAL};
use eventpull_types::{IngestionOutcome, LockTokenResult, OutcomeKind, ReceivedMessage, SettlePlan, TopicSubscription};
use futures::FutureExt;
use futures::future::join_all;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinatorOptions {
    /// Max messages per receive call
    pub event_batch_size: usize,
    /// Max time a receive call waits for the first message
    pub max_wait_time: Duration,
    /// Stop a drain after this many non-empty batches
    pub max_batches_per_drain: Option<usize>,
}

impl Default for CoordinatorOptions {
    fn default() -> Self {
        Self {
            event_batch_size: 100,
            max_wait_time: Duration::from_secs(10),
            max_batches_per_drain: None,
        }
    }
}

impl CoordinatorOptions {
    pub fn from_config(broker: &BrokerConfig, scheduler: &SchedulerConfig) -> Self {
        Self {
            event_batch_size: broker.event_batch_size,
            max_wait_time: broker.max_wait_time,
            max_batches_per_drain: scheduler.max_batches_per_drain,
        }
    }
}

/// What one drain of one pair did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub topic: String,
    pub subscription: String,
    /// Non-empty batches received
    pub batches: usize,
    pub received: usize,
    pub acknowledged: usize,
    pub released: usize,
    pub rejected: usize,
    /// Tokens the broker refused to settle, or that were part of a failed settle call
    pub settle_failures: usize,
}

impl DrainReport {
    fn new(target: &TopicSubscription) -> Self {
        Self {
            topic: target.name.clone(),
            subscription: target.subscription.clone(),
            ..Self::default()
        }
    }

    fn record_settled(&mut self, operation: SettleOperation, succeeded: usize) {
        match operation {
            SettleOperation::Acknowledge => self.acknowledged += succeeded,
            SettleOperation::Release => self.released += succeeded,
            SettleOperation::Reject => self.rejected += succeeded,
        }
    }
}

/// A pair whose drain was aborted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrainFailure {
    pub topic: String,
    pub subscription: String,
    pub error: String,
}

/// Outcome of one pass over every configured pair
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassReport {
    pub drains: Vec<DrainReport>,
    pub failed: Vec<DrainFailure>,
}

impl PassReport {
    pub fn received(&self) -> usize {
        self.drains.iter().map(|d| d.received).sum()
    }

    pub fn is_clean(&self) -> bool {
        self.failed.is_empty() && self.drains.iter().all(|d| d.settle_failures == 0)
    }
}

pub struct IngestionCoordinator {
    registry: ClientRegistry,
    handler: Arc<dyn MessageHandler>,
    options: CoordinatorOptions,
}

impl IngestionCoordinator {
    pub fn new(
        registry: ClientRegistry,
        handler: Arc<dyn MessageHandler>,
        options: CoordinatorOptions,
    ) -> Self {
        Self {
            registry,
            handler,
            options,
        }
    }

    pub fn options(&self) -> &CoordinatorOptions {
        &self.options
    }

    pub fn registry(&self) -> &ClientRegistry {
        &self.registry
    }

    /// Drain every pair concurrently; a failing or panicking pair never
    /// affects the others
    pub async fn ingest_all(&self, targets: &[TopicSubscription]) -> PassReport {
        let drains = targets.iter().map(|target| async move {
            let result = AssertUnwindSafe(self.drain(target)).catch_unwind().await;
            (target, result)
        });

        let mut report = PassReport::default();
        for (target, result) in join_all(drains).await {
            let error = match result {
                Ok(Ok(drain)) => {
                    report.drains.push(drain);
                    continue;
                }
                Ok(Err(e)) => {
                    error!(
                        topic = %target.name,
                        subscription = %target.subscription,
                        error_code = e.error_code(),
                        error = %e,
                        "Error occurred when ingesting topic events"
                    );
                    e.to_string()
                }
                Err(panic) => {
                    let message = panic_message(panic.as_ref());
                    error!(
                        topic = %target.name,
                        subscription = %target.subscription,
                        panic = %message,
                        "Drain panicked while ingesting topic events"
                    );
                    format!("drain panicked: {}", message)
                }
            };

            DRAIN_ERRORS_TOTAL.inc();
            report.failed.push(DrainFailure {
                topic: target.name.clone(),
                subscription: target.subscription.clone(),
                error,
            });
        }

        report
    }

    /// Receive and process batches from one pair until a batch comes back empty
    pub async fn drain(&self, target: &TopicSubscription) -> Result<DrainReport, BrokerError> {
        let client = self.registry.get_or_create(target).await?;
        let mut report = DrainReport::new(target);

        loop {
            if let Some(max_batches) = self.options.max_batches_per_drain {
                if report.batches >= max_batches {
                    info!(
                        topic = %target.name,
                        subscription = %target.subscription,
                        batches = report.batches,
                        "Batch limit reached, resuming on the next pass"
                    );
                    break;
                }
            }

            debug!(topic = %target.name, subscription = %target.subscription, "Events requested");
            let batch = client
                .receive(
                    &target.name,
                    &target.subscription,
                    self.options.event_batch_size,
                    self.options.max_wait_time,
                )
                .await?;

            if batch.is_empty() {
                break;
            }

            info!(
                topic = %target.name,
                subscription = %target.subscription,
                count = batch.len(),
                "Events received"
            );
            report.batches += 1;
            report.received += batch.len();

            let outcomes = join_all(batch.iter().map(|message| self.ingest_message(message))).await;
            let plan = SettlePlan::from_outcomes(outcomes);
            self.settle(client.as_ref(), target, &plan, &mut report).await;
        }

        Ok(report)
    }

    async fn ingest_message(&self, message: &ReceivedMessage) -> IngestionOutcome {
        let handled = AssertUnwindSafe(self.handler.handle(&message.event))
            .catch_unwind()
            .await;

        let kind = match handled {
            Ok(Ok(outcome)) => OutcomeKind::from(outcome),
            Ok(Err(e)) => {
                error!(
                    event_id = %message.event.id,
                    delivery_count = message.delivery_count,
                    error = %e,
                    "Error ingesting event"
                );
                OutcomeKind::TransientFailure
            }
            Err(panic) => {
                error!(
                    event_id = %message.event.id,
                    delivery_count = message.delivery_count,
                    panic = %panic_message(panic.as_ref()),
                    "Handler panicked while ingesting event"
                );
                OutcomeKind::TransientFailure
            }
        };

        MESSAGES_TOTAL.with_label_values(&[kind.as_str()]).inc();
        IngestionOutcome::new(kind, message.lock_token.clone())
    }

    async fn settle(
        &self,
        client: &dyn BrokerPullClient,
        target: &TopicSubscription,
        plan: &SettlePlan,
        report: &mut DrainReport,
    ) {
        let batches = [
            (SettleOperation::Acknowledge, &plan.acknowledge),
            (SettleOperation::Release, &plan.release),
            (SettleOperation::Reject, &plan.reject),
        ];

        for (operation, tokens) in batches {
            if tokens.is_empty() {
                continue;
            }

            match operation
                .apply(client, &target.name, &target.subscription, tokens)
                .await
            {
                Ok(result) => {
                    info!(
                        topic = %target.name,
                        subscription = %target.subscription,
                        operation = %operation,
                        count = tokens.len(),
                        succeeded = result.succeeded.len(),
                        failed = result.failed.len(),
                        "Lock tokens settled"
                    );
                    log_lock_token_result(target, operation, &result);
                    report.record_settled(operation, result.succeeded.len());
                    report.settle_failures += result.failed.len();
                    SETTLE_FAILURES_TOTAL
                        .with_label_values(&[operation.as_str()])
                        .inc_by(result.failed.len() as u64);
                }
                Err(e) => {
                    error!(
                        topic = %target.name,
                        subscription = %target.subscription,
                        operation = %operation,
                        count = tokens.len(),
                        error = %e,
                        "Settle call failed, tokens will be redelivered after their lock expires"
                    );
                    report.settle_failures += tokens.len();
                    SETTLE_FAILURES_TOTAL
                        .with_label_values(&[operation.as_str()])
                        .inc_by(tokens.len() as u64);
                }
            }
        }
    }
}

fn log_lock_token_result(
    target: &TopicSubscription,
    operation: SettleOperation,
    result: &LockTokenResult,
) {
    for failed in &result.failed {
        warn!(
            topic = %target.name,
            operation = %operation,
            lock_token = %failed.lock_token,
            code = %failed.code,
            description = %failed.description,
            "Failed to settle lock token"
        );
    }
    for token in &result.succeeded {
        debug!(topic = %target.name, operation = %operation, lock_token = %token, "Lock token settled");
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
