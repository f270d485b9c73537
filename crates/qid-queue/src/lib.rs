//! Pub/sub abstraction for QID.
//!
//! A `Topic` publishes opaque message bodies; a `Subscription` hands them
//! to competing consumers with at-least-once delivery. Workers must ack
//! every message they finish with; a message dropped without ack is
//! redelivered.

pub mod memory;

pub use memory::MemoryQueue;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("transport error: {0}")]
    Transport(String),
}

pub type QueueResult<T> = std::result::Result<T, QueueError>;

/// Publishes messages to all subscriptions of the queue.
#[async_trait]
pub trait Topic: Send + Sync {
    /// Returns once the message has been handed to the transport.
    async fn send(&self, body: Vec<u8>) -> QueueResult<()>;
}

/// Receives messages for a group of competing consumers.
#[async_trait]
pub trait Subscription: Send + Sync {
    /// Blocks until the next message is available. Safe to call from any
    /// number of consumers concurrently; each message goes to exactly one
    /// of them per delivery.
    async fn receive(&self) -> QueueResult<Message>;
}

/// Transport hook for acknowledging one delivery.
pub trait Acker: Send {
    fn ack(self: Box<Self>);
    fn nack(self: Box<Self>);
}

/// A received message. Dropping it without calling [`Message::ack`]
/// nacks the delivery so the transport can redeliver.
pub struct Message {
    body: Vec<u8>,
    acker: Option<Box<dyn Acker>>,
}

impl Message {
    pub fn new(body: Vec<u8>, acker: Box<dyn Acker>) -> Message {
        Message {
            body,
            acker: Some(acker),
        }
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Acknowledges the delivery.
    pub fn ack(mut self) {
        if let Some(acker) = self.acker.take() {
            acker.ack();
        }
    }
}

impl Drop for Message {
    fn drop(&mut self) {
        if let Some(acker) = self.acker.take() {
            acker.nack();
        }
    }
}

impl std::fmt::Debug for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Message")
            .field("body", &String::from_utf8_lossy(&self.body))
            .finish()
    }
}
