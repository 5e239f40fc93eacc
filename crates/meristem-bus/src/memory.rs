use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tracing::trace;

use crate::bus::{Bus, BusMessage, Subscription};
use crate::error::BusError;
use crate::subjects::subject_matches;

const CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug)]
struct SubEntry {
    pattern: String,
    sender: mpsc::Sender<BusMessage>,
}

#[derive(Debug, Default)]
struct Inner {
    subs: Vec<SubEntry>,
    closed: bool,
}

/// In-process implementation of [`Bus`].
///
/// Serves tests and standalone runtime mode. Delivery is fan-out to every
/// matching subscription; a subscription whose receiver lagged past its
/// channel capacity loses the message rather than blocking the publisher.
#[derive(Debug, Clone, Default)]
pub struct MemoryBus {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Bus for MemoryBus {
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<(), BusError> {
        let mut guard = self.inner.lock().await;
        if guard.closed {
            return Err(BusError::Closed);
        }
        // Prune subscriptions whose receiver side is gone.
        guard.subs.retain(|s| !s.sender.is_closed());

        for sub in guard.subs.iter() {
            if subject_matches(&sub.pattern, subject) {
                let message =
                    BusMessage { subject: subject.to_string(), payload: payload.clone() };
                if sub.sender.try_send(message).is_err() {
                    trace!(subject, pattern = %sub.pattern, "dropping message for lagging subscriber");
                }
            }
        }
        Ok(())
    }

    async fn subscribe(&self, pattern: &str) -> Result<Subscription, BusError> {
        if pattern.is_empty() {
            return Err(BusError::InvalidPattern(pattern.to_string()));
        }
        let mut guard = self.inner.lock().await;
        if guard.closed {
            return Err(BusError::Closed);
        }
        let (sender, receiver) = mpsc::channel(CHANNEL_CAPACITY);
        guard.subs.push(SubEntry { pattern: pattern.to_string(), sender });
        Ok(Subscription::new(pattern.to_string(), receiver))
    }

    async fn flush(&self) -> Result<(), BusError> {
        Ok(())
    }

    async fn close(&self) -> Result<(), BusError> {
        let mut guard = self.inner.lock().await;
        guard.closed = true;
        guard.subs.clear();
        Ok(())
    }
}
