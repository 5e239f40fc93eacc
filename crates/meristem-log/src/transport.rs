use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use meristem_bus::Bus;
use meristem_domain::now_ms;
use tokio::sync::Notify;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::envelope::{LogEnvelope, LogFragment};

#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Byte ceiling for the buffered ring; oldest entries are dropped
    /// FIFO when a write would exceed it.
    pub max_buffer_bytes: usize,
    /// Flush as soon as this many envelopes are buffered.
    pub min_batch: usize,
    /// Periodic flush interval.
    pub flush_interval: Duration,
    /// Per-message byte ceiling; larger payloads are fragmented.
    pub max_msg_bytes: usize,
    /// Fragment budget per envelope; beyond it the envelope is dropped.
    pub max_fragments: u32,
    /// Fragment reassembly deadline.
    pub fragment_ttl_ms: i64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            max_buffer_bytes: 4 * 1024 * 1024,
            min_batch: 32,
            flush_interval: Duration::from_millis(500),
            max_msg_bytes: 1_048_576,
            max_fragments: 16,
            fragment_ttl_ms: 60_000,
        }
    }
}

#[derive(Debug, Default)]
struct Ring {
    entries: VecDeque<(LogEnvelope, usize)>,
    total_bytes: usize,
}

/// Batching ring-buffer transport between the envelope logger and the
/// bus. Writes never block the logger: over-capacity writes evict the
/// oldest entries and count them as dropped.
#[derive(Debug)]
pub struct BusTransport {
    config: TransportConfig,
    ring: Mutex<Ring>,
    flush_notify: Notify,
    stopped: AtomicBool,
    dropped: AtomicU64,
    oversize: AtomicU64,
    published: AtomicU64,
}

impl BusTransport {
    pub fn new(config: TransportConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            ring: Mutex::new(Ring::default()),
            flush_notify: Notify::new(),
            stopped: AtomicBool::new(false),
            dropped: AtomicU64::new(0),
            oversize: AtomicU64::new(0),
            published: AtomicU64::new(0),
        })
    }

    /// Append an envelope. Synchronous so the logger can call it from any
    /// context; signals the flush task when the min-batch threshold is hit.
    pub fn push(&self, envelope: LogEnvelope) {
        let size = serde_json::to_vec(&envelope).map(|b| b.len()).unwrap_or(0);
        let should_flush;
        {
            let mut ring = match self.ring.lock() {
                Ok(ring) => ring,
                Err(poisoned) => poisoned.into_inner(),
            };
            while ring.total_bytes + size > self.config.max_buffer_bytes {
                match ring.entries.pop_front() {
                    Some((_, evicted)) => {
                        ring.total_bytes -= evicted;
                        self.dropped.fetch_add(1, Ordering::Relaxed);
                    }
                    None => break,
                }
            }
            ring.total_bytes += size;
            ring.entries.push_back((envelope, size));
            should_flush = ring.entries.len() >= self.config.min_batch;
        }
        if should_flush {
            self.flush_notify.notify_one();
        }
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn oversize_count(&self) -> u64 {
        self.oversize.load(Ordering::Relaxed)
    }

    pub fn published_count(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    pub fn buffered_count(&self) -> usize {
        match self.ring.lock() {
            Ok(ring) => ring.entries.len(),
            Err(poisoned) => poisoned.into_inner().entries.len(),
        }
    }

    /// Stop the run loop after one final flush.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.flush_notify.notify_one();
    }

    /// Flush loop: drains on min-batch notification or interval tick. On a
    /// failed publish the remainder is re-prepended and retried on the
    /// next tick.
    pub async fn run(self: Arc<Self>, bus: Arc<dyn Bus>) {
        let mut interval = tokio::time::interval(self.config.flush_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = self.flush_notify.notified() => {}
            }
            self.flush(bus.as_ref()).await;
            if self.stopped.load(Ordering::SeqCst) {
                self.flush(bus.as_ref()).await;
                debug!("log transport stopped");
                return;
            }
        }
    }

    /// Drain the current ring contents in order. Envelopes that fail to
    /// publish go back to the front of the ring, preserving order.
    pub async fn flush(&self, bus: &dyn Bus) {
        let mut batch: VecDeque<(LogEnvelope, usize)> = {
            let mut ring = match self.ring.lock() {
                Ok(ring) => ring,
                Err(poisoned) => poisoned.into_inner(),
            };
            ring.total_bytes = 0;
            std::mem::take(&mut ring.entries)
        };

        while let Some((envelope, size)) = batch.pop_front() {
            match self.publish_one(bus, &envelope).await {
                Ok(()) => {}
                Err(reason) => {
                    warn!(%reason, "log publish failed; re-queueing remainder");
                    batch.push_front((envelope, size));
                    let mut ring = match self.ring.lock() {
                        Ok(ring) => ring,
                        Err(poisoned) => poisoned.into_inner(),
                    };
                    for (envelope, size) in batch.into_iter().rev() {
                        ring.total_bytes += size;
                        ring.entries.push_front((envelope, size));
                    }
                    return;
                }
            }
        }
    }

    async fn publish_one(&self, bus: &dyn Bus, envelope: &LogEnvelope) -> Result<(), String> {
        let subject = envelope.subject();
        let payload = serde_json::to_vec(envelope).map_err(|e| e.to_string())?;

        if payload.len() <= self.config.max_msg_bytes {
            self.published.fetch_add(1, Ordering::Relaxed);
            return bus.publish(&subject, payload).await.map_err(|e| e.to_string());
        }

        // Fragment path. The chunk size leaves headroom for the fragment
        // frame fields themselves.
        let chunk_size = (self.config.max_msg_bytes / 2).max(1);
        let encoded = String::from_utf8_lossy(&payload).into_owned();
        let chunks: Vec<&str> = {
            let mut out = Vec::new();
            let mut rest = encoded.as_str();
            while !rest.is_empty() {
                let cut = rest
                    .char_indices()
                    .take_while(|(i, _)| *i < chunk_size)
                    .last()
                    .map(|(i, c)| i + c.len_utf8())
                    .unwrap_or(rest.len());
                let (head, tail) = rest.split_at(cut);
                out.push(head);
                rest = tail;
            }
            out
        };

        let total = chunks.len() as u32;
        if total > self.config.max_fragments {
            self.oversize.fetch_add(1, Ordering::Relaxed);
            warn!(
                subject,
                fragments = total,
                budget = self.config.max_fragments,
                "envelope exceeds fragment budget; dropping"
            );
            return Ok(());
        }

        let fragment_id = Uuid::new_v4().to_string();
        let expires_at = now_ms() + self.config.fragment_ttl_ms;
        for (index, chunk) in chunks.iter().enumerate() {
            let fragment = LogFragment {
                fragment_id: fragment_id.clone(),
                fragment_index: index as u32,
                fragment_total: total,
                fragment_subject: subject.clone(),
                fragment_expires_at: expires_at,
                trace_id: envelope.trace_id.clone(),
                payload_chunk: (*chunk).to_string(),
            };
            let bytes = serde_json::to_vec(&fragment).map_err(|e| e.to_string())?;
            bus.publish(&subject, bytes).await.map_err(|e| e.to_string())?;
        }
        self.published.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meristem_bus::MemoryBus;
    use meristem_domain::{AuditLevel, NodeId};
    use serde_json::Map;

    fn envelope(content: &str) -> LogEnvelope {
        LogEnvelope {
            ts: 1,
            level: AuditLevel::Info,
            node_id: NodeId::new("n1"),
            source: "test".to_string(),
            trace_id: "tr".to_string(),
            content: content.to_string(),
            meta: Map::new(),
        }
    }

    fn transport(config: TransportConfig) -> Arc<BusTransport> {
        BusTransport::new(config)
    }

    #[tokio::test]
    async fn flush_publishes_to_sys_subject() {
        let bus = Arc::new(MemoryBus::new());
        let mut sub = bus.subscribe("meristem.v1.logs.sys.n1").await.unwrap();
        let transport = transport(TransportConfig::default());

        transport.push(envelope("hello"));
        transport.flush(bus.as_ref()).await;

        let msg = sub.next().await.unwrap();
        let decoded: LogEnvelope = serde_json::from_slice(&msg.payload).unwrap();
        assert_eq!(decoded.content, "hello");
        assert_eq!(transport.published_count(), 1);
        assert_eq!(transport.buffered_count(), 0);
    }

    #[tokio::test]
    async fn ring_drops_oldest_when_over_capacity() {
        let transport = transport(TransportConfig {
            max_buffer_bytes: 400,
            ..TransportConfig::default()
        });
        for i in 0..50 {
            transport.push(envelope(&format!("message-{i}")));
        }
        assert!(transport.dropped_count() > 0);
        // The newest entries survive; total stays under the cap.
        assert!(transport.buffered_count() < 50);
    }

    #[tokio::test]
    async fn failed_publish_requeues_in_order() {
        let bus = Arc::new(MemoryBus::new());
        bus.close().await.unwrap();
        let transport = transport(TransportConfig::default());

        transport.push(envelope("a"));
        transport.push(envelope("b"));
        transport.flush(bus.as_ref()).await;

        // Everything is back in the ring, order preserved.
        assert_eq!(transport.buffered_count(), 2);
        let live = Arc::new(MemoryBus::new());
        let mut sub = live.subscribe("meristem.v1.logs.sys.n1").await.unwrap();
        transport.flush(live.as_ref()).await;
        let first: LogEnvelope = serde_json::from_slice(&sub.next().await.unwrap().payload).unwrap();
        assert_eq!(first.content, "a");
    }

    #[tokio::test]
    async fn oversize_envelope_fragments() {
        let bus = Arc::new(MemoryBus::new());
        let mut sub = bus.subscribe("meristem.v1.logs.sys.n1").await.unwrap();
        let transport = transport(TransportConfig {
            max_msg_bytes: 256,
            max_fragments: 64,
            ..TransportConfig::default()
        });

        transport.push(envelope(&"x".repeat(600)));
        transport.flush(bus.as_ref()).await;

        let first = sub.next().await.unwrap();
        let fragment: LogFragment = serde_json::from_slice(&first.payload).unwrap();
        assert!(fragment.fragment_total > 1);
        assert_eq!(fragment.fragment_index, 0);
        assert_eq!(fragment.trace_id, "tr");
    }

    #[tokio::test]
    async fn fragment_budget_exceeded_drops_envelope() {
        let bus = Arc::new(MemoryBus::new());
        let transport = transport(TransportConfig {
            max_msg_bytes: 64,
            max_fragments: 2,
            ..TransportConfig::default()
        });

        transport.push(envelope(&"y".repeat(2_000)));
        transport.flush(bus.as_ref()).await;

        assert_eq!(transport.oversize_count(), 1);
        assert_eq!(transport.buffered_count(), 0);
    }
}
