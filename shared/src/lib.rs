// ============================================================================
// Eventpull Shared - distributed single-flight ingestion pipeline
// ============================================================================
//
// Leaves first:
// - guard:       in-process "is a pass already running" cell
// - resilience:  retry (inner) + rolling-window circuit breaker (outer)
// - lock:        cross-instance mutex over a LockStore (Redis / in-memory)
// - broker:      pull client traits, client registry, HTTP + in-memory adapters
// - handler:     per-message processing contract
// - coordinator: drains topic/subscription pairs and settles lock tokens
// - scheduler:   periodic trigger tying guard, mutex and coordinator together
// - queue:       producer-side in-memory event buffer
//
// ============================================================================

pub mod broker;
pub mod coordinator;
pub mod guard;
pub mod handler;
pub mod lock;
pub mod queue;
pub mod resilience;
pub mod scheduler;

pub use broker::{
    BrokerClientFactory, BrokerPullClient, ClientRegistry, EnvTokenSource, HttpClientFactory,
    HttpPullClient, InMemoryBroker, SettleOperation, TokenSource,
};
pub use coordinator::{
    CoordinatorOptions, DrainFailure, DrainReport, IngestionCoordinator, PassReport,
};
pub use guard::{PassPermit, ReentrancyGuard};
pub use handler::{FnHandler, HandlerOutcome, LoggingHandler, MessageHandler};
pub use lock::{DistributedMutex, InMemoryLockStore, LockStore, MutexLease, RedisLockStore};
pub use queue::{EventQueueItem, MemoryEventQueue};
pub use resilience::{
    CircuitBreaker, CircuitBreakerConfig, CircuitState, ResiliencePolicy, RetryPolicy,
};
pub use scheduler::{IngestionScheduler, TickResult};
