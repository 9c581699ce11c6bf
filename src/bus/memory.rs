//! In-memory message bus

use super::{BusError, BusMessage, MessageBus};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};

/// Process-local bus delivering to per-topic mpsc subscribers
///
/// Slow subscribers do not block publishers: a full channel drops the
/// message for that subscriber and logs it.
pub struct InMemoryBus {
    subscribers: Arc<RwLock<HashMap<String, Vec<mpsc::Sender<BusMessage>>>>>,
    capacity: usize,
}

impl InMemoryBus {
    /// Create a bus with the given per-subscriber channel capacity
    pub fn new(capacity: usize) -> Self {
        Self {
            subscribers: Arc::new(RwLock::new(HashMap::new())),
            capacity,
        }
    }

    /// Number of live subscribers on a topic
    pub async fn subscriber_count(&self, topic: &str) -> usize {
        let subs = self.subscribers.read().await;
        subs.get(topic)
            .map(|senders| senders.iter().filter(|tx| !tx.is_closed()).count())
            .unwrap_or(0)
    }
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl MessageBus for InMemoryBus {
    async fn publish(&self, topic: &str, payload: Value) -> Result<(), BusError> {
        let mut subs = self.subscribers.write().await;
        if let Some(senders) = subs.get_mut(topic) {
            senders.retain(|tx| !tx.is_closed());
            for tx in senders.iter() {
                let message = BusMessage {
                    topic: topic.to_string(),
                    payload: payload.clone(),
                };
                if tx.try_send(message).is_err() {
                    tracing::warn!(topic, "Dropping message for slow subscriber");
                }
            }
        }
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<mpsc::Receiver<BusMessage>, BusError> {
        let (tx, rx) = mpsc::channel(self.capacity);
        let mut subs = self.subscribers.write().await;
        subs.entry(topic.to_string()).or_default().push(tx);
        Ok(rx)
    }
}
