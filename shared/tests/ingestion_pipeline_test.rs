// ============================================================================
// Ingestion Pipeline Integration Tests
// ============================================================================
//
// Scheduler -> guard -> distributed mutex -> coordinator -> broker, wired the
// way the worker wires them, with in-memory broker and lock store.
//
// ============================================================================

use async_trait::async_trait;
use eventpull_config::SchedulerConfig;
use eventpull_error::{BrokerError, HandlerError};
use eventpull_shared::{
    BrokerClientFactory, BrokerPullClient, CircuitBreaker, CircuitBreakerConfig, ClientRegistry,
    CoordinatorOptions, DistributedMutex, FnHandler, HandlerOutcome, InMemoryBroker,
    InMemoryLockStore, IngestionCoordinator, IngestionScheduler, MessageHandler, ResiliencePolicy,
    RetryPolicy, SettleOperation, TickResult,
};
use eventpull_types::{BrokerCredential, CloudEvent, TopicSubscription};
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Semaphore;

fn event(id: &str, event_type: &str) -> CloudEvent {
    CloudEvent::new("/tests", event_type, json!({ "id": id })).with_id(id)
}

fn mutex(store: &InMemoryLockStore) -> Arc<DistributedMutex> {
    Arc::new(DistributedMutex::new(
        Arc::new(store.clone()),
        ResiliencePolicy::new(
            RetryPolicy::new(0, 1.0),
            CircuitBreaker::new(CircuitBreakerConfig::default()),
            None,
        ),
    ))
}

fn coordinator(
    factory: Arc<dyn BrokerClientFactory>,
    handler: Arc<dyn MessageHandler>,
    options: CoordinatorOptions,
) -> IngestionCoordinator {
    IngestionCoordinator::new(ClientRegistry::new(factory), handler, options)
}

fn accept_all() -> Arc<dyn MessageHandler> {
    Arc::new(FnHandler::new(|_event: CloudEvent| async {
        Ok(HandlerOutcome::Success)
    }))
}

/// Handler that holds every event until a permit is added to `gate`
fn gated(gate: Arc<Semaphore>) -> Arc<dyn MessageHandler> {
    Arc::new(FnHandler::new(move |_event: CloudEvent| {
        let gate = gate.clone();
        async move {
            let permit = gate.acquire().await.map_err(|e| HandlerError::Transient(e.to_string()))?;
            permit.forget();
            Ok(HandlerOutcome::Success)
        }
    }))
}

async fn wait_until_running(scheduler: &IngestionScheduler) {
    for _ in 0..200 {
        if scheduler.guard().is_running() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("ingestion pass never started");
}

/// Fails client creation for one topic, delegates the rest
struct PartiallyBrokenFactory {
    broker: InMemoryBroker,
    broken_topic: &'static str,
}

#[async_trait]
impl BrokerClientFactory for PartiallyBrokenFactory {
    async fn create(
        &self,
        topic: &str,
        credential: &BrokerCredential,
    ) -> Result<Arc<dyn BrokerPullClient>, BrokerError> {
        if topic == self.broken_topic {
            return Err(BrokerError::Auth(format!("no credential for {}", topic)));
        }
        self.broker.create(topic, credential).await
    }
}

/// Panics while building the client of one topic, delegates the rest
struct PanickingFactory {
    broker: InMemoryBroker,
    panicking_topic: &'static str,
}

#[async_trait]
impl BrokerClientFactory for PanickingFactory {
    async fn create(
        &self,
        topic: &str,
        credential: &BrokerCredential,
    ) -> Result<Arc<dyn BrokerPullClient>, BrokerError> {
        if topic == self.panicking_topic {
            panic!("factory exploded");
        }
        self.broker.create(topic, credential).await
    }
}

/// Yields before accepting so sibling drains interleave
fn yielding_accept_all() -> Arc<dyn MessageHandler> {
    Arc::new(FnHandler::new(|_event: CloudEvent| async {
        tokio::task::yield_now().await;
        Ok(HandlerOutcome::Success)
    }))
}

#[tokio::test]
async fn test_drain_receives_until_empty_batch() {
    let broker = InMemoryBroker::new();
    for i in 0..5 {
        broker
            .publish("orders", "billing", event(&i.to_string(), "order.created"))
            .await;
    }
    let coordinator = coordinator(
        Arc::new(broker.clone()),
        accept_all(),
        CoordinatorOptions {
            event_batch_size: 3,
            ..CoordinatorOptions::default()
        },
    );

    let report = coordinator
        .drain(&TopicSubscription::new("orders", "billing"))
        .await
        .unwrap();

    // Batches of 3 and 2, then the empty batch ends the drain
    assert_eq!(report.batches, 2);
    assert_eq!(report.received, 5);
    assert_eq!(report.acknowledged, 5);
    assert_eq!(broker.acknowledged("orders", "billing").await.len(), 5);
    assert_eq!(broker.in_flight_count("orders", "billing").await, 0);
}

#[tokio::test]
async fn test_outcomes_are_partitioned_into_settle_calls() {
    let broker = InMemoryBroker::new();
    broker.publish("orders", "billing", event("1", "ok")).await;
    broker.publish("orders", "billing", event("2", "poison")).await;
    broker.publish("orders", "billing", event("3", "retry")).await;
    broker.publish("orders", "billing", event("4", "error")).await;
    broker.publish("orders", "billing", event("5", "ok")).await;

    let handler: Arc<dyn MessageHandler> = Arc::new(FnHandler::new(|event: CloudEvent| async move {
        match event.event_type.as_str() {
            "ok" => Ok(HandlerOutcome::Success),
            "poison" => Ok(HandlerOutcome::Rejected),
            "retry" => Ok(HandlerOutcome::TransientFailure),
            _ => Err(HandlerError::Transient("downstream unavailable".into())),
        }
    }));
    let coordinator = coordinator(
        Arc::new(broker.clone()),
        handler,
        CoordinatorOptions {
            event_batch_size: 10,
            max_batches_per_drain: Some(1),
            ..CoordinatorOptions::default()
        },
    );

    let report = coordinator
        .drain(&TopicSubscription::new("orders", "billing"))
        .await
        .unwrap();

    assert_eq!((report.acknowledged, report.released, report.rejected), (2, 2, 1));

    let calls: Vec<(SettleOperation, usize)> = broker
        .settle_calls()
        .await
        .iter()
        .map(|call| (call.operation, call.lock_tokens.len()))
        .collect();
    assert_eq!(
        calls,
        vec![
            (SettleOperation::Acknowledge, 2),
            (SettleOperation::Release, 2),
            (SettleOperation::Reject, 1),
        ]
    );

    let rejected = broker.rejected("orders", "billing").await;
    assert_eq!(rejected[0].id, "2");
    // Released events are back in the queue for the next pass
    assert_eq!(broker.ready_count("orders", "billing").await, 2);
}

#[tokio::test]
async fn test_handler_panic_releases_message() {
    let broker = InMemoryBroker::new();
    broker.publish("orders", "billing", event("1", "boom")).await;
    let handler: Arc<dyn MessageHandler> = Arc::new(FnHandler::new(|event: CloudEvent| async move {
        if event.event_type == "boom" {
            panic!("handler bug");
        }
        Ok(HandlerOutcome::Success)
    }));
    let coordinator = coordinator(
        Arc::new(broker.clone()),
        handler,
        CoordinatorOptions {
            max_batches_per_drain: Some(1),
            ..CoordinatorOptions::default()
        },
    );

    let report = coordinator
        .drain(&TopicSubscription::new("orders", "billing"))
        .await
        .unwrap();

    assert_eq!(report.released, 1);
    assert_eq!(broker.ready_count("orders", "billing").await, 1);
}

#[tokio::test]
async fn test_failing_pair_does_not_affect_others() {
    let broker = InMemoryBroker::new();
    broker.publish("orders", "billing", event("1", "ok")).await;
    broker.publish("orders", "audit", event("2", "ok")).await;
    let factory = Arc::new(PartiallyBrokenFactory {
        broker: broker.clone(),
        broken_topic: "payments",
    });
    let coordinator = coordinator(factory, accept_all(), CoordinatorOptions::default());

    let report = coordinator
        .ingest_all(&[
            TopicSubscription::new("orders", "billing"),
            TopicSubscription::new("payments", "billing"),
            TopicSubscription::new("orders", "audit"),
        ])
        .await;

    assert_eq!(report.drains.len(), 2);
    assert_eq!(report.received(), 2);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].topic, "payments");
    assert!(report.failed[0].error.contains("no credential"));
    assert!(!report.is_clean());
}

#[tokio::test]
async fn test_two_instances_never_ingest_at_the_same_time() {
    let broker = InMemoryBroker::new();
    broker.publish("orders", "billing", event("1", "ok")).await;
    let store = InMemoryLockStore::new();
    let gate = Arc::new(Semaphore::new(0));
    let targets = vec![TopicSubscription::new("orders", "billing")];

    let first = Arc::new(IngestionScheduler::new(
        SchedulerConfig::default(),
        coordinator(Arc::new(broker.clone()), gated(gate.clone()), CoordinatorOptions::default()),
        Some(mutex(&store)),
        targets.clone(),
    ));
    let second = IngestionScheduler::new(
        SchedulerConfig::default(),
        coordinator(Arc::new(broker.clone()), accept_all(), CoordinatorOptions::default()),
        Some(mutex(&store)),
        targets,
    );

    let first_pass = tokio::spawn({
        let first = first.clone();
        async move { first.run_once().await }
    });
    wait_until_running(&first).await;

    assert_eq!(second.run_once().await, TickResult::SkippedLock);

    gate.add_permits(1);
    assert!(matches!(first_pass.await.unwrap(), TickResult::Completed(_)));

    // Lock is free again once the first pass is done
    assert!(matches!(second.run_once().await, TickResult::Completed(_)));
}

#[tokio::test]
async fn test_overlapping_tick_in_same_process_is_skipped() {
    let broker = InMemoryBroker::new();
    broker.publish("orders", "billing", event("1", "ok")).await;
    let gate = Arc::new(Semaphore::new(0));
    let scheduler = Arc::new(IngestionScheduler::new(
        SchedulerConfig {
            lock_disabled: true,
            ..SchedulerConfig::default()
        },
        coordinator(Arc::new(broker.clone()), gated(gate.clone()), CoordinatorOptions::default()),
        None,
        vec![TopicSubscription::new("orders", "billing")],
    ));

    let pass = tokio::spawn({
        let scheduler = scheduler.clone();
        async move { scheduler.run_once().await }
    });
    wait_until_running(&scheduler).await;

    assert_eq!(scheduler.run_once().await, TickResult::SkippedRunning);

    gate.add_permits(1);
    assert!(matches!(pass.await.unwrap(), TickResult::Completed(_)));
    assert_eq!(scheduler.guard().passes_started(), 1);
    assert!(!scheduler.guard().is_running());
}

#[tokio::test]
async fn test_allow_concurrent_runs_bypasses_guard() {
    let broker = InMemoryBroker::new();
    broker.publish("orders", "billing", event("1", "ok")).await;
    let gate = Arc::new(Semaphore::new(0));
    let scheduler = Arc::new(IngestionScheduler::new(
        SchedulerConfig {
            lock_disabled: true,
            allow_concurrent_runs: true,
            ..SchedulerConfig::default()
        },
        coordinator(Arc::new(broker.clone()), gated(gate.clone()), CoordinatorOptions::default()),
        None,
        vec![TopicSubscription::new("orders", "billing")],
    ));

    let pass = tokio::spawn({
        let scheduler = scheduler.clone();
        async move { scheduler.run_once().await }
    });
    // Wait for the first pass to lease the only event
    for _ in 0..200 {
        if broker.in_flight_count("orders", "billing").await == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    // Nothing left to receive, but the pass is not skipped
    assert!(matches!(scheduler.run_once().await, TickResult::Completed(_)));

    gate.add_permits(1);
    assert!(matches!(pass.await.unwrap(), TickResult::Completed(_)));
}

#[tokio::test]
async fn test_panicking_pair_does_not_abort_siblings() {
    let broker = InMemoryBroker::new();
    for i in 0..3 {
        broker.publish("orders", "billing", event(&i.to_string(), "ok")).await;
    }
    let factory = Arc::new(PanickingFactory {
        broker: broker.clone(),
        panicking_topic: "payments",
    });
    let coordinator = coordinator(factory, accept_all(), CoordinatorOptions::default());

    let report = coordinator
        .ingest_all(&[
            TopicSubscription::new("payments", "billing"),
            TopicSubscription::new("orders", "billing"),
        ])
        .await;

    assert_eq!(report.received(), 3);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].topic, "payments");
    assert!(report.failed[0].error.contains("factory exploded"));
    assert_eq!(broker.acknowledged("orders", "billing").await.len(), 3);
    assert_eq!(broker.ready_count("orders", "billing").await, 0);
}

#[tokio::test]
async fn test_leased_messages_are_settled_when_a_later_pair_panics() {
    let broker = InMemoryBroker::new();
    for i in 0..3 {
        broker.publish("orders", "billing", event(&i.to_string(), "ok")).await;
    }
    let factory = Arc::new(PanickingFactory {
        broker: broker.clone(),
        panicking_topic: "payments",
    });
    let coordinator = coordinator(factory, yielding_accept_all(), CoordinatorOptions::default());

    let report = coordinator
        .ingest_all(&[
            TopicSubscription::new("orders", "billing"),
            TopicSubscription::new("payments", "billing"),
        ])
        .await;

    assert_eq!(report.drains.len(), 1);
    assert_eq!(report.failed.len(), 1);
    // Every leased token got a terminal decision
    assert_eq!(broker.in_flight_count("orders", "billing").await, 0);
    assert_eq!(broker.acknowledged("orders", "billing").await.len(), 3);
}

#[tokio::test]
async fn test_panicking_pair_still_releases_mutex() {
    let broker = InMemoryBroker::new();
    let store = InMemoryLockStore::new();
    let config = SchedulerConfig::default();
    let factory = Arc::new(PanickingFactory {
        broker,
        panicking_topic: "orders",
    });
    let scheduler = IngestionScheduler::new(
        config.clone(),
        coordinator(factory, accept_all(), CoordinatorOptions::default()),
        Some(mutex(&store)),
        vec![TopicSubscription::new("orders", "billing")],
    );

    match scheduler.run_once().await {
        TickResult::Completed(report) => assert_eq!(report.failed.len(), 1),
        other => panic!("unexpected tick result: {:?}", other),
    }
    assert!(store.get(&config.lock_key).await.is_none());
    assert!(!scheduler.guard().is_running());
}

#[tokio::test]
async fn test_stop_waits_for_in_flight_pass() {
    let broker = InMemoryBroker::new();
    broker.publish("orders", "billing", event("1", "ok")).await;
    let gate = Arc::new(Semaphore::new(0));
    let scheduler = Arc::new(IngestionScheduler::new(
        SchedulerConfig {
            lock_disabled: true,
            polling_frequency: Duration::from_secs(3600),
            ..SchedulerConfig::default()
        },
        coordinator(Arc::new(broker.clone()), gated(gate.clone()), CoordinatorOptions::default()),
        None,
        vec![TopicSubscription::new("orders", "billing")],
    ));

    scheduler.start().await.unwrap();
    wait_until_running(&scheduler).await;

    let stopped = Arc::new(AtomicUsize::new(0));
    let stop = tokio::spawn({
        let scheduler = scheduler.clone();
        let stopped = stopped.clone();
        async move {
            scheduler.stop().await.unwrap();
            stopped.fetch_add(1, Ordering::SeqCst);
        }
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(stopped.load(Ordering::SeqCst), 0);
    assert!(scheduler.guard().is_running());

    gate.add_permits(1);
    stop.await.unwrap();

    assert_eq!(stopped.load(Ordering::SeqCst), 1);
    assert_eq!(broker.acknowledged("orders", "billing").await.len(), 1);
    assert!(!scheduler.is_started().await);
}
