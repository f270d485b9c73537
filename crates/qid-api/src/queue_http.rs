//! HTTP bridge over the pub/sub queue.
//!
//! Remote workers pop messages with a lease and ack them explicitly;
//! leases that expire (worker crashed mid-message) are nacked so the
//! underlying queue redelivers. Delivery stays at-least-once across the
//! bridge.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::warn;
use uuid::Uuid;

use qid_queue::{Message, QueueResult, Subscription, Topic};

/// How long a popped message may stay unacked before it is redelivered.
pub const LEASE: Duration = Duration::from_secs(60);

struct Leased {
    message: Message,
    taken_at: Instant,
}

/// Server-side state for the queue endpoints.
pub struct QueueBridge {
    topic: Arc<dyn Topic>,
    subscription: Arc<dyn Subscription>,
    leased: Mutex<HashMap<Uuid, Leased>>,
}

impl QueueBridge {
    pub fn new(topic: Arc<dyn Topic>, subscription: Arc<dyn Subscription>) -> QueueBridge {
        QueueBridge {
            topic,
            subscription,
            leased: Mutex::new(HashMap::new()),
        }
    }

    /// Publishes a message on behalf of a remote worker.
    pub async fn push(&self, body: Vec<u8>) -> QueueResult<()> {
        self.topic.send(body).await
    }

    /// Pops the next message, leasing it to the caller. Returns `None`
    /// when the queue stays empty for the given wait.
    pub async fn pop(&self, wait: Duration) -> Option<(Uuid, Vec<u8>)> {
        self.expire_leases();
        let message = tokio::time::timeout(wait, self.subscription.receive())
            .await
            .ok()?
            .ok()?;
        let id = Uuid::new_v4();
        let body = message.body().to_vec();
        self.leased.lock().insert(
            id,
            Leased {
                message,
                taken_at: Instant::now(),
            },
        );
        Some((id, body))
    }

    /// Acks a leased message. Unknown ids (already expired) are ignored.
    pub fn ack(&self, id: Uuid) {
        if let Some(leased) = self.leased.lock().remove(&id) {
            leased.message.ack();
        }
    }

    /// Drops expired leases; dropping the message nacks it back onto the
    /// queue.
    fn expire_leases(&self) {
        let mut leased = self.leased.lock();
        let before = leased.len();
        leased.retain(|_, l| l.taken_at.elapsed() < LEASE);
        let expired = before - leased.len();
        if expired > 0 {
            warn!(expired, "requeued expired message leases");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qid_queue::{MemoryQueue, Topic};

    #[tokio::test]
    async fn test_pop_and_ack_consumes() {
        let queue = MemoryQueue::new();
        queue.send(b"m".to_vec()).await.unwrap();
        let bridge = QueueBridge::new(Arc::new(queue.clone()), Arc::new(queue.clone()));

        let (id, body) = bridge.pop(Duration::from_millis(50)).await.unwrap();
        assert_eq!(body, b"m");
        bridge.ack(id);
        assert!(queue.is_empty());
        assert!(bridge.pop(Duration::from_millis(10)).await.is_none());
    }

    #[tokio::test]
    async fn test_unacked_lease_redelivers_on_expiry() {
        let queue = MemoryQueue::new();
        queue.send(b"m".to_vec()).await.unwrap();
        let bridge = QueueBridge::new(Arc::new(queue.clone()), Arc::new(queue.clone()));

        let (_id, _) = bridge.pop(Duration::from_millis(50)).await.unwrap();
        // Force the lease to look expired.
        bridge.leased.lock().values_mut().for_each(|l| {
            l.taken_at = Instant::now() - LEASE - Duration::from_secs(1);
        });

        let (id, body) = bridge.pop(Duration::from_millis(50)).await.unwrap();
        assert_eq!(body, b"m");
        bridge.ack(id);
    }

    #[tokio::test]
    async fn test_pop_empty_times_out() {
        let queue = MemoryQueue::new();
        let bridge = QueueBridge::new(Arc::new(queue.clone()), Arc::new(queue));
        assert!(bridge.pop(Duration::from_millis(10)).await.is_none());
    }
}
