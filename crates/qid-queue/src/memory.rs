//! In-memory queue.
//!
//! Single shared FIFO with competing consumers, the local-development
//! counterpart of an external broker. Delivery is at-least-once: a
//! message dropped without ack goes back to the front of the queue.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Notify;

use crate::{Acker, Message, QueueResult, Subscription, Topic};

/// In-memory topic + subscription pair. Clones share the same queue, so
/// one clone serves as the topic handle and others as subscription
/// handles for competing workers.
#[derive(Clone, Default)]
pub struct MemoryQueue {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    queue: Mutex<VecDeque<Vec<u8>>>,
    notify: Notify,
}

impl Inner {
    fn push_back(&self, body: Vec<u8>) {
        self.queue.lock().push_back(body);
        self.notify.notify_one();
    }

    fn push_front(&self, body: Vec<u8>) {
        self.queue.lock().push_front(body);
        self.notify.notify_one();
    }
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.inner.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl Topic for MemoryQueue {
    async fn send(&self, body: Vec<u8>) -> QueueResult<()> {
        self.inner.push_back(body);
        Ok(())
    }
}

#[async_trait]
impl Subscription for MemoryQueue {
    async fn receive(&self) -> QueueResult<Message> {
        loop {
            // Register for wakeup before checking, so a send between the
            // check and the await is not lost.
            let notified = self.inner.notify.notified();
            if let Some(body) = self.inner.queue.lock().pop_front() {
                // Another waiter may still have work queued.
                self.inner.notify.notify_one();
                let acker = MemoryAcker {
                    inner: self.inner.clone(),
                    body: body.clone(),
                };
                return Ok(Message::new(body, Box::new(acker)));
            }
            notified.await;
        }
    }
}

struct MemoryAcker {
    inner: Arc<Inner>,
    body: Vec<u8>,
}

impl Acker for MemoryAcker {
    fn ack(self: Box<Self>) {}

    fn nack(self: Box<Self>) {
        self.inner.push_front(self.body);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_send_receive_ack() {
        let q = MemoryQueue::new();
        q.send(b"one".to_vec()).await.unwrap();

        let m = q.receive().await.unwrap();
        assert_eq!(m.body(), b"one");
        m.ack();
        assert!(q.is_empty());
    }

    #[tokio::test]
    async fn test_drop_without_ack_redelivers() {
        let q = MemoryQueue::new();
        q.send(b"one".to_vec()).await.unwrap();

        let m = q.receive().await.unwrap();
        drop(m);

        let again = q.receive().await.unwrap();
        assert_eq!(again.body(), b"one");
        again.ack();
    }

    #[tokio::test]
    async fn test_receive_blocks_until_send() {
        let q = MemoryQueue::new();
        let consumer = q.clone();
        let handle = tokio::spawn(async move { consumer.receive().await.unwrap() });

        tokio::task::yield_now().await;
        q.send(b"late".to_vec()).await.unwrap();

        let m = handle.await.unwrap();
        assert_eq!(m.body(), b"late");
        m.ack();
    }

    #[tokio::test]
    async fn test_competing_consumers_each_get_one() {
        let q = MemoryQueue::new();
        q.send(b"a".to_vec()).await.unwrap();
        q.send(b"b".to_vec()).await.unwrap();

        let m1 = q.receive().await.unwrap();
        let m2 = q.receive().await.unwrap();
        let mut got = vec![m1.body().to_vec(), m2.body().to_vec()];
        got.sort();
        assert_eq!(got, vec![b"a".to_vec(), b"b".to_vec()]);
        m1.ack();
        m2.ack();
    }
}
