// ============================================================================
// Producer-side event queue
// ============================================================================
//
// In-memory buffer between code that produces events and the task that
// publishes them. FIFO per topic; one wake-up signal per `enqueue` call and
// one per non-empty `enqueue_many` call.
//
// ============================================================================

use eventpull_error::Cancelled;
use eventpull_types::CloudEvent;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{Mutex, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Debug, Clone, PartialEq)]
pub struct EventQueueItem {
    pub topic: String,
    pub event: CloudEvent,
}

impl EventQueueItem {
    pub fn new(topic: impl Into<String>, event: CloudEvent) -> Self {
        Self {
            topic: topic.into(),
            event,
        }
    }
}

/// Clones share the same queues and signal
#[derive(Debug, Clone)]
pub struct MemoryEventQueue {
    topics: Arc<Mutex<HashMap<String, VecDeque<EventQueueItem>>>>,
    available: Arc<Semaphore>,
}

impl Default for MemoryEventQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryEventQueue {
    pub fn new() -> Self {
        Self {
            topics: Arc::new(Mutex::new(HashMap::new())),
            available: Arc::new(Semaphore::new(0)),
        }
    }

    pub async fn enqueue(&self, item: EventQueueItem) {
        let topic = item.topic.clone();
        self.topics
            .lock()
            .await
            .entry(item.topic.clone())
            .or_default()
            .push_back(item);
        self.available.add_permits(1);
        debug!(topic = %topic, "Event enqueued");
    }

    pub async fn enqueue_many(&self, items: impl IntoIterator<Item = EventQueueItem>) {
        let mut count = 0;
        {
            let mut topics = self.topics.lock().await;
            for item in items {
                topics.entry(item.topic.clone()).or_default().push_back(item);
                count += 1;
            }
        }

        if count > 0 {
            self.available.add_permits(1);
        }
        debug!(count = count, "Events enqueued");
    }

    /// Up to `batch_size` items of `topic`, oldest first
    pub async fn dequeue(&self, topic: &str, batch_size: usize) -> Vec<EventQueueItem> {
        let mut topics = self.topics.lock().await;
        let items: Vec<EventQueueItem> = match topics.get_mut(topic) {
            Some(queue) => {
                let take = batch_size.min(queue.len());
                queue.drain(..take).collect()
            }
            None => Vec::new(),
        };

        debug!(topic = %topic, count = items.len(), "Events dequeued");
        items
    }

    /// Items waiting for `topic`
    pub async fn len(&self, topic: &str) -> usize {
        self.topics.lock().await.get(topic).map_or(0, VecDeque::len)
    }

    /// Topics that currently have items waiting
    pub async fn pending_topics(&self) -> Vec<String> {
        let topics = self.topics.lock().await;
        let mut names: Vec<String> = topics
            .iter()
            .filter(|(_, queue)| !queue.is_empty())
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    /// Consume one enqueue signal, waiting until one is available
    pub async fn wait_for_events(&self, cancel: &CancellationToken) -> Result<(), Cancelled> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Cancelled),
            permit = self.available.acquire() => match permit {
                Ok(permit) => {
                    permit.forget();
                    Ok(())
                }
                // The semaphore is never closed
                Err(_) => Err(Cancelled),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    fn item(topic: &str, id: &str) -> EventQueueItem {
        EventQueueItem::new(topic, CloudEvent::new("/tests", "test.event", json!({})).with_id(id))
    }

    #[tokio::test]
    async fn test_dequeue_is_fifo_per_topic() {
        let queue = MemoryEventQueue::new();
        queue.enqueue(item("orders", "1")).await;
        queue.enqueue(item("audit", "a")).await;
        queue
            .enqueue_many(vec![item("orders", "2"), item("orders", "3")])
            .await;

        let batch = queue.dequeue("orders", 2).await;
        let ids: Vec<_> = batch.iter().map(|i| i.event.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2"]);

        assert_eq!(queue.len("orders").await, 1);
        assert_eq!(queue.pending_topics().await, vec!["audit", "orders"]);
        assert!(queue.dequeue("missing", 10).await.is_empty());
    }

    #[tokio::test]
    async fn test_wait_returns_after_enqueue() {
        let queue = MemoryEventQueue::new();
        let cancel = CancellationToken::new();

        let producer = queue.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            producer.enqueue(item("orders", "1")).await;
        });

        tokio::time::timeout(Duration::from_secs(5), queue.wait_for_events(&cancel))
            .await
            .expect("wait_for_events did not wake up")
            .unwrap();
    }

    #[tokio::test]
    async fn test_one_signal_per_enqueue_many() {
        let queue = MemoryEventQueue::new();
        let cancel = CancellationToken::new();

        queue
            .enqueue_many(vec![item("orders", "1"), item("orders", "2")])
            .await;
        queue.enqueue_many(Vec::new()).await;

        assert!(queue.wait_for_events(&cancel).await.is_ok());
        let second =
            tokio::time::timeout(Duration::from_millis(20), queue.wait_for_events(&cancel)).await;
        assert!(second.is_err());
    }

    #[tokio::test]
    async fn test_wait_respects_cancellation() {
        let queue = MemoryEventQueue::new();
        let cancel = CancellationToken::new();
        cancel.cancel();

        assert_eq!(queue.wait_for_events(&cancel).await, Err(Cancelled));
    }
}
