use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::BusError;

/// One delivered bus message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    pub subject: String,
    pub payload: Vec<u8>,
}

/// A live subscription. Dropping the receiver ends delivery; the bus
/// prunes dead subscriptions on the next publish.
#[derive(Debug)]
pub struct Subscription {
    pub pattern: String,
    receiver: mpsc::Receiver<BusMessage>,
}

impl Subscription {
    pub fn new(pattern: String, receiver: mpsc::Receiver<BusMessage>) -> Self {
        Self { pattern, receiver }
    }

    pub async fn next(&mut self) -> Option<BusMessage> {
        self.receiver.recv().await
    }

    pub fn try_next(&mut self) -> Option<BusMessage> {
        self.receiver.try_recv().ok()
    }
}

/// The message-bus seam. The production transport (NATS) lives behind
/// this trait; [`crate::MemoryBus`] implements it in-process.
///
/// Subject patterns follow NATS semantics: `*` matches one token, `>`
/// matches the rest of the subject.
#[async_trait]
pub trait Bus: Send + Sync + 'static {
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<(), BusError>;
    async fn subscribe(&self, pattern: &str) -> Result<Subscription, BusError>;
    async fn flush(&self) -> Result<(), BusError>;
    async fn close(&self) -> Result<(), BusError>;
}
