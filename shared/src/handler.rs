// ============================================================================
// Message handlers
// ============================================================================
//
// A handler processes one event and reports what should happen to its lock
// token. The same event may be delivered more than once (at-least-once), so
// handlers must be idempotent.
//
// ============================================================================

use async_trait::async_trait;
use eventpull_error::HandlerError;
use eventpull_types::{CloudEvent, OutcomeKind};
use futures::future::BoxFuture;
use tracing::info;

/// Handler verdict for one event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerOutcome {
    Success,
    /// Try again later; the token is released
    TransientFailure,
    /// Never deliver again; the token is rejected
    Rejected,
}

impl From<HandlerOutcome> for OutcomeKind {
    fn from(outcome: HandlerOutcome) -> Self {
        match outcome {
            HandlerOutcome::Success => OutcomeKind::Success,
            HandlerOutcome::TransientFailure => OutcomeKind::TransientFailure,
            HandlerOutcome::Rejected => OutcomeKind::Rejected,
        }
    }
}

#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, event: &CloudEvent) -> Result<HandlerOutcome, HandlerError>;
}

/// Logs every event and accepts it
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingHandler;

#[async_trait]
impl MessageHandler for LoggingHandler {
    async fn handle(&self, event: &CloudEvent) -> Result<HandlerOutcome, HandlerError> {
        info!(
            event_id = %event.id,
            event_type = %event.event_type,
            source = %event.source,
            "Ingested event"
        );
        Ok(HandlerOutcome::Success)
    }
}

type HandlerFn =
    dyn Fn(CloudEvent) -> BoxFuture<'static, Result<HandlerOutcome, HandlerError>> + Send + Sync;

/// Adapts an async closure into a MessageHandler
pub struct FnHandler {
    f: Box<HandlerFn>,
}

impl FnHandler {
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(CloudEvent) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<HandlerOutcome, HandlerError>> + Send + 'static,
    {
        Self {
            f: Box::new(move |event| Box::pin(f(event))),
        }
    }
}

#[async_trait]
impl MessageHandler for FnHandler {
    async fn handle(&self, event: &CloudEvent) -> Result<HandlerOutcome, HandlerError> {
        (self.f)(event.clone()).await
    }
}
