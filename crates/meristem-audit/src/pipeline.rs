use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use meristem_domain::now_ms;
use meristem_store::{
    AuditEventInput, AuditFailure, AuditGlobalAnchor, AuditGlobalState, AuditIntent, AuditLog,
    AuditPartitionState, AuditStore, PartitionHead, Store, WriteOp,
};
use serde_json::{json, Value};
use tokio::sync::{Mutex, Notify};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::canonical::{canonical_json, hmac_sha256_hex, sha256_hex};
use crate::error::AuditError;
use crate::partition::partition_for;

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub hmac_secret: String,
    pub hmac_key_id: String,
    pub partition_count: u32,
    pub batch_size: u32,
    pub lease_duration_ms: u64,
    pub max_retry_attempts: u32,
    pub backlog_hard_limit: u64,
    pub drain_interval: Duration,
    pub anchor_interval: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            hmac_secret: "audit-secret".to_string(),
            hmac_key_id: "k1".to_string(),
            partition_count: 8,
            batch_size: 64,
            lease_duration_ms: 30_000,
            max_retry_attempts: 5,
            backlog_hard_limit: 10_000,
            drain_interval: Duration::from_millis(500),
            anchor_interval: Duration::from_secs(60),
        }
    }
}

/// What `record` hands back to the caller.
#[derive(Debug)]
pub enum RecordOutcome {
    /// Pipeline not ready: the event was committed inline.
    Committed(Box<AuditLog>),
    /// Queued as an intent; the drain loop will commit it.
    Queued { event_id: String },
    /// Backlog at the hard limit; caller maps this to AUDIT_BACKPRESSURE.
    Backpressure { retry_after_seconds: u32 },
}

#[derive(Default)]
struct TailCache {
    /// partition id → (last_sequence, last_hash); authoritative copy in
    /// the store, mirror updated only after a successful transaction.
    partitions: HashMap<u32, (u64, String)>,
    global: Option<(u64, String)>,
}

/// The write-behind audit pipeline: partitioned hash chains, HMAC-sealed
/// intents, lease-based drain workers, global sequencing, periodic
/// anchors.
pub struct AuditPipeline {
    store: Arc<dyn Store>,
    config: PipelineConfig,
    /// Lease owner identity for claims.
    worker_id: String,
    ready: AtomicBool,
    backlog: AtomicU64,
    /// In-flight guard: one drain per process. Held only for the duration
    /// of a drain, so an aborted holder releases it.
    drain_lock: Mutex<()>,
    stopped: AtomicBool,
    wake: Notify,
    tails: Mutex<TailCache>,
}

impl AuditPipeline {
    pub fn new(store: Arc<dyn Store>, config: PipelineConfig, worker_id: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            store,
            config,
            worker_id: worker_id.into(),
            ready: AtomicBool::new(false),
            backlog: AtomicU64::new(0),
            drain_lock: Mutex::new(()),
            stopped: AtomicBool::new(false),
            wake: Notify::new(),
            tails: Mutex::new(TailCache::default()),
        })
    }

    /// Load authoritative state and mark the pipeline ready for the
    /// queued (two-phase) path.
    pub async fn start(&self) -> Result<(), AuditError> {
        let backlog = self.store.count_backlog().await?;
        self.backlog.store(backlog, Ordering::SeqCst);
        let global = self.store.get_global_state().await?;
        {
            let mut tails = self.tails.lock().await;
            tails.global = Some((global.last_sequence, global.last_hash));
            for state in self.store.list_partition_states().await? {
                tails.partitions.insert(state.partition_id, (state.last_sequence, state.last_hash));
            }
        }
        self.ready.store(true, Ordering::SeqCst);
        info!(backlog, "audit pipeline ready");
        Ok(())
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    pub fn backlog_estimate(&self) -> u64 {
        self.backlog.load(Ordering::SeqCst)
    }

    // ── Enqueue ───────────────────────────────────────────────────────────────

    /// Seal `input` into an intent: canonical payload, SHA-256 digest,
    /// HMAC, deterministic partition.
    pub fn build_intent(&self, input: &AuditEventInput) -> Result<AuditIntent, AuditError> {
        let payload = serde_json::to_value(input)?;
        let digest = sha256_hex(&canonical_json(&payload));
        let hmac = hmac_sha256_hex(self.config.hmac_secret.as_bytes(), digest.as_bytes());
        let now = now_ms();
        Ok(AuditIntent {
            event_id: Uuid::new_v4().to_string(),
            route_tag: input.source.clone(),
            partition_id: partition_for(
                input.node_id.as_str(),
                &input.trace_id,
                &input.source,
                self.config.partition_count,
            ),
            status: meristem_domain::IntentStatus::Pending,
            lease_owner: None,
            lease_until: None,
            attempt_count: 0,
            created_at: now,
            updated_at: now,
            payload,
            payload_digest: digest,
            payload_hmac: hmac,
            hmac_key_id: self.config.hmac_key_id.clone(),
            global_sequence: None,
            committed_at: None,
            error_last: None,
        })
    }

    /// Backpressure decision: fast-check the counter; at the limit,
    /// refresh from the store and re-check.
    pub async fn over_backpressure_limit(&self) -> Result<bool, AuditError> {
        if self.backlog.load(Ordering::SeqCst) < self.config.backlog_hard_limit {
            return Ok(false);
        }
        let authoritative = self.store.count_backlog().await?;
        self.backlog.store(authoritative, Ordering::SeqCst);
        Ok(authoritative >= self.config.backlog_hard_limit)
    }

    /// Account for an intent inserted outside `record` (e.g. staged in the
    /// caller's transaction alongside its business write).
    pub fn note_enqueued(&self) {
        self.backlog.fetch_add(1, Ordering::SeqCst);
    }

    fn note_settled(&self) {
        // Saturating: the counter is an estimate, refreshed on demand.
        let _ = self
            .backlog
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| Some(v.saturating_sub(1)));
    }

    /// Record one audit event.
    pub async fn record(&self, input: &AuditEventInput) -> Result<RecordOutcome, AuditError> {
        let intent = self.build_intent(input)?;

        if !self.is_ready() {
            // Inline path: commit synchronously in this call.
            self.store.insert_intent(&intent).await?;
            let claimed = vec![AuditIntent {
                status: meristem_domain::IntentStatus::Processing,
                lease_owner: Some(self.worker_id.clone()),
                lease_until: Some(now_ms() + self.config.lease_duration_ms as i64),
                ..intent
            }];
            let mut logs = self.commit_batch(claimed).await?;
            return match logs.pop() {
                Some(log) => Ok(RecordOutcome::Committed(Box::new(log))),
                None => Err(AuditError::IntegrityViolation {
                    event_id: "inline".to_string(),
                    detail: "inline commit produced no log".to_string(),
                }),
            };
        }

        if self.over_backpressure_limit().await? {
            return Ok(RecordOutcome::Backpressure { retry_after_seconds: 1 });
        }

        let event_id = intent.event_id.clone();
        self.store.insert_intent(&intent).await?;
        self.note_enqueued();
        Ok(RecordOutcome::Queued { event_id })
    }

    // ── Drain ─────────────────────────────────────────────────────────────────

    /// Claim-and-commit until the queue is empty. Only one drain runs per
    /// process at a time; an overlapping call returns immediately.
    pub async fn drain(&self) -> Result<usize, AuditError> {
        let Ok(_guard) = self.drain_lock.try_lock() else {
            return Ok(0);
        };
        self.drain_inner().await
    }

    /// Drain that waits for an in-flight drain to finish first. Used by
    /// the shutdown flush, which must not be skipped.
    async fn drain_exclusive(&self) -> Result<usize, AuditError> {
        let _guard = self.drain_lock.lock().await;
        self.drain_inner().await
    }

    async fn drain_inner(&self) -> Result<usize, AuditError> {
        let mut committed = 0usize;
        loop {
            let claimed = self
                .store
                .claim_intents(
                    &self.worker_id,
                    self.config.batch_size,
                    now_ms(),
                    self.config.lease_duration_ms,
                )
                .await?;
            if claimed.is_empty() {
                break;
            }
            committed += self.commit_batch(claimed).await?.len();
        }
        if committed > 0 {
            debug!(committed, "audit drain committed intents");
        }
        Ok(committed)
    }

    /// Commit one claimed batch: verify seals, extend the partition and
    /// global hash chains, and apply every staged write plus the global
    /// tail in a single transaction.
    pub async fn commit_batch(&self, claimed: Vec<AuditIntent>) -> Result<Vec<AuditLog>, AuditError> {
        if claimed.is_empty() {
            return Ok(Vec::new());
        }
        let mut tails = self.tails.lock().await;

        let (mut global_seq, mut global_hash) = match &tails.global {
            Some((seq, hash)) => (*seq, hash.clone()),
            None => {
                let state = self.store.get_global_state().await?;
                (state.last_sequence, state.last_hash)
            }
        };

        let mut pending_partitions: HashMap<u32, (u64, String)> = HashMap::new();
        let mut ops: Vec<WriteOp> = Vec::new();
        let mut logs: Vec<AuditLog> = Vec::new();
        let mut committable: Vec<AuditIntent> = Vec::new();

        for intent in claimed {
            // Integrity re-check before commit.
            let digest = sha256_hex(&canonical_json(&intent.payload));
            let hmac = hmac_sha256_hex(self.config.hmac_secret.as_bytes(), digest.as_bytes());
            if digest != intent.payload_digest || hmac != intent.payload_hmac {
                warn!(event_id = %intent.event_id, "audit intent failed integrity re-check");
                self.fail_terminal(&intent, "payload integrity mismatch").await?;
                continue;
            }

            let event: AuditEventInput = match serde_json::from_value(intent.payload.clone()) {
                Ok(event) => event,
                Err(e) => {
                    self.fail_terminal(&intent, &format!("payload decode: {e}")).await?;
                    continue;
                }
            };

            // Partition tail: batch-local first, then cache, then store.
            let (last_seq, last_hash) = match pending_partitions.get(&intent.partition_id) {
                Some(tail) => tail.clone(),
                None => match tails.partitions.get(&intent.partition_id) {
                    Some(tail) => tail.clone(),
                    None => self
                        .store
                        .get_partition_state(intent.partition_id)
                        .await?
                        .map(|s| (s.last_sequence, s.last_hash))
                        .unwrap_or((0, String::new())),
                },
            };

            let partition_sequence = last_seq + 1;
            let partition_previous_hash = last_hash;
            let partition_hash = {
                let mut sealed = intent.payload.clone();
                if let Value::Object(map) = &mut sealed {
                    map.insert("partition_sequence".to_string(), json!(partition_sequence));
                    map.insert(
                        "partition_previous_hash".to_string(),
                        json!(partition_previous_hash),
                    );
                }
                sha256_hex(&canonical_json(&sealed))
            };

            global_seq += 1;
            let previous_hash = global_hash.clone();

            let mut log = AuditLog {
                event_id: intent.event_id.clone(),
                chain_version: 1,
                event,
                partition_id: intent.partition_id,
                partition_sequence,
                partition_previous_hash,
                partition_hash: partition_hash.clone(),
                sequence: global_seq,
                previous_hash,
                hash: String::new(),
            };
            log.hash = hash_entire_log(&log)?;
            global_hash = log.hash.clone();

            pending_partitions
                .insert(intent.partition_id, (partition_sequence, partition_hash.clone()));

            let now = now_ms();
            ops.push(WriteOp::InsertAuditLogSwallowDuplicate(log.clone()));
            ops.push(WriteOp::CommitIntent {
                event_id: intent.event_id.clone(),
                global_sequence: global_seq,
                committed_at: now,
            });
            ops.push(WriteOp::UpsertPartitionState(AuditPartitionState {
                partition_id: intent.partition_id,
                last_sequence: partition_sequence,
                last_hash: partition_hash,
                updated_at: now,
            }));
            logs.push(log);
            committable.push(intent);
        }

        if committable.is_empty() {
            return Ok(Vec::new());
        }

        ops.push(WriteOp::UpsertGlobalState(AuditGlobalState {
            last_sequence: global_seq,
            last_hash: global_hash.clone(),
            updated_at: now_ms(),
        }));

        match self.store.run_transaction(ops).await {
            Ok(()) => {
                // Mirrors move only after the transaction landed.
                for (partition, tail) in pending_partitions {
                    tails.partitions.insert(partition, tail);
                }
                tails.global = Some((global_seq, global_hash));
                for _ in &committable {
                    self.note_settled();
                }
                Ok(logs)
            }
            Err(e) => {
                warn!(error = %e, batch = committable.len(), "audit commit transaction failed");
                let now = now_ms();
                for intent in &committable {
                    let terminal = intent.attempt_count + 1 >= self.config.max_retry_attempts;
                    self.store.fail_intent(&intent.event_id, &e.to_string(), terminal, now).await?;
                    if terminal {
                        self.insert_failure(intent, &e.to_string()).await?;
                        self.note_settled();
                    }
                }
                Ok(Vec::new())
            }
        }
    }

    async fn fail_terminal(&self, intent: &AuditIntent, reason: &str) -> Result<(), AuditError> {
        self.store.fail_intent(&intent.event_id, reason, true, now_ms()).await?;
        self.insert_failure(intent, reason).await?;
        self.note_settled();
        Ok(())
    }

    async fn insert_failure(&self, intent: &AuditIntent, reason: &str) -> Result<(), AuditError> {
        self.store
            .run_transaction(vec![WriteOp::InsertFailure(AuditFailure {
                event_id: intent.event_id.clone(),
                partition_id: intent.partition_id,
                reason: reason.to_string(),
                attempt_count: intent.attempt_count + 1,
                failed_at: now_ms(),
                payload: intent.payload.clone(),
            })])
            .await?;
        Ok(())
    }

    // ── Anchors ───────────────────────────────────────────────────────────────

    /// Capture every partition tail, chain it to the previous anchor, and
    /// insert the new checkpoint. No-op while no partition has committed.
    pub async fn anchor(&self) -> Result<Option<AuditGlobalAnchor>, AuditError> {
        let mut heads: Vec<PartitionHead> = self
            .store
            .list_partition_states()
            .await?
            .into_iter()
            .map(|s| PartitionHead {
                partition_id: s.partition_id,
                last_sequence: s.last_sequence,
                last_hash: s.last_hash,
            })
            .collect();
        if heads.is_empty() {
            return Ok(None);
        }
        heads.sort_by_key(|h| h.partition_id);

        let previous_anchor_hash = self
            .store
            .latest_anchor()
            .await?
            .map(|a| a.anchor_hash)
            .unwrap_or_default();

        let anchor_hash = sha256_hex(&canonical_json(&json!({
            "partition_heads": heads,
            "previous_anchor_hash": previous_anchor_hash,
        })));

        let anchor = AuditGlobalAnchor {
            anchor_id: Uuid::new_v4().to_string(),
            ts: now_ms(),
            partition_heads: heads,
            previous_anchor_hash,
            anchor_hash,
        };
        self.store.run_transaction(vec![WriteOp::InsertAnchor(anchor.clone())]).await?;
        Ok(Some(anchor))
    }

    // ── Background loop ───────────────────────────────────────────────────────

    /// Drain/anchor loop. Exits after a final flush once `stop` is called.
    pub async fn run(self: Arc<Self>) {
        let mut drain_tick = tokio::time::interval(self.config.drain_interval);
        drain_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut anchor_tick = tokio::time::interval(self.config.anchor_interval);
        anchor_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = drain_tick.tick() => {
                    if let Err(e) = self.drain().await {
                        warn!(error = %e, "audit drain failed");
                    }
                }
                _ = anchor_tick.tick() => {
                    if let Err(e) = self.anchor().await {
                        warn!(error = %e, "audit anchor failed");
                    }
                }
                _ = self.wake.notified() => {}
            }
            if self.stopped.load(Ordering::SeqCst) {
                return;
            }
        }
    }

    /// Flush the backlog, write a final anchor, and stop the loop. Called
    /// by the shutdown lifecycle.
    pub async fn flush_and_stop(&self) -> Result<(), AuditError> {
        self.stopped.store(true, Ordering::SeqCst);
        self.wake.notify_one();
        self.drain_exclusive().await?;
        self.anchor().await?;
        info!("audit pipeline stopped");
        Ok(())
    }
}

/// The global `_hash` covers the entire log record except the hash field
/// itself.
pub(crate) fn hash_entire_log(log: &AuditLog) -> Result<String, AuditError> {
    let mut value = serde_json::to_value(log)?;
    if let Value::Object(map) = &mut value {
        map.remove("_hash");
    }
    Ok(sha256_hex(&canonical_json(&value)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use meristem_domain::{AuditLevel, IntentStatus, NodeId};
    use meristem_store::MemoryStore;
    use serde_json::Map;

    fn input(node: &str, trace: &str, source: &str, content: &str) -> AuditEventInput {
        AuditEventInput {
            ts: now_ms(),
            level: AuditLevel::Info,
            node_id: NodeId::new(node),
            source: source.to_string(),
            trace_id: trace.to_string(),
            content: content.to_string(),
            meta: Map::new(),
        }
    }

    fn pipeline(store: Arc<MemoryStore>, config: PipelineConfig) -> Arc<AuditPipeline> {
        AuditPipeline::new(store, config, "worker-1")
    }

    #[tokio::test]
    async fn inline_path_commits_immediately() {
        let store = Arc::new(MemoryStore::new());
        let pipeline = pipeline(store.clone(), PipelineConfig::default());
        // Not started: pipeline is not ready, so record commits inline.
        let outcome = pipeline.record(&input("n1", "t1", "api", "hello")).await.unwrap();
        match outcome {
            RecordOutcome::Committed(log) => {
                assert_eq!(log.sequence, 1);
                assert_eq!(log.partition_sequence, 1);
            }
            other => panic!("expected Committed, got {:?}", other),
        }
        assert_eq!(store.list_logs(None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn queued_path_then_drain_commits() {
        let store = Arc::new(MemoryStore::new());
        let pipeline = pipeline(store.clone(), PipelineConfig::default());
        pipeline.start().await.unwrap();

        let outcome = pipeline.record(&input("n1", "t1", "api", "queued")).await.unwrap();
        assert!(matches!(outcome, RecordOutcome::Queued { .. }));
        assert_eq!(store.list_logs(None).await.unwrap().len(), 0);
        assert_eq!(pipeline.backlog_estimate(), 1);

        let committed = pipeline.drain().await.unwrap();
        assert_eq!(committed, 1);
        assert_eq!(store.list_logs(None).await.unwrap().len(), 1);
        assert_eq!(pipeline.backlog_estimate(), 0);
    }

    #[tokio::test]
    async fn chains_hold_under_many_interleaved_keys() {
        let store = Arc::new(MemoryStore::new());
        let config = PipelineConfig { partition_count: 4, batch_size: 16, ..Default::default() };
        let secret = config.hmac_secret.clone();
        let pipeline = pipeline(store.clone(), config);
        pipeline.start().await.unwrap();

        for i in 0..200 {
            let event = input(
                &format!("node-{}", i % 7),
                &format!("trace-{}", i % 13),
                &format!("source-{}", i % 3),
                &format!("event {i}"),
            );
            pipeline.record(&event).await.unwrap();
        }
        pipeline.drain().await.unwrap();

        let report = crate::verify::verify_chain(store.as_ref(), secret.as_bytes()).await.unwrap();
        assert!(report.ok(), "chain violations: {:?}", report.violations);
        assert_eq!(report.checked_logs, 200);

        // Anchor heads must match per-partition tails.
        let anchor = pipeline.anchor().await.unwrap().expect("anchor");
        let states = store.list_partition_states().await.unwrap();
        assert_eq!(anchor.partition_heads.len(), states.len());
        for (head, state) in anchor.partition_heads.iter().zip(states.iter()) {
            assert_eq!(head.partition_id, state.partition_id);
            assert_eq!(head.last_sequence, state.last_sequence);
            assert_eq!(head.last_hash, state.last_hash);
        }
    }

    #[tokio::test]
    async fn global_sequence_is_dense_from_one() {
        let store = Arc::new(MemoryStore::new());
        let pipeline = pipeline(store.clone(), PipelineConfig::default());
        pipeline.start().await.unwrap();
        for i in 0..10 {
            pipeline.record(&input("n", &format!("t{i}"), "s", "x")).await.unwrap();
        }
        pipeline.drain().await.unwrap();

        let logs = store.list_logs(None).await.unwrap();
        let sequences: Vec<u64> = logs.iter().map(|l| l.sequence).collect();
        assert_eq!(sequences, (1..=10).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn backpressure_at_hard_limit() {
        let store = Arc::new(MemoryStore::new());
        let config = PipelineConfig { backlog_hard_limit: 3, ..Default::default() };
        let pipeline = pipeline(store.clone(), config);
        pipeline.start().await.unwrap();

        for i in 0..3 {
            let outcome = pipeline.record(&input("n", &format!("t{i}"), "s", "x")).await.unwrap();
            assert!(matches!(outcome, RecordOutcome::Queued { .. }));
        }
        let outcome = pipeline.record(&input("n", "t-over", "s", "x")).await.unwrap();
        assert!(matches!(outcome, RecordOutcome::Backpressure { retry_after_seconds: 1 }));

        // Draining clears the backlog and enqueue works again.
        pipeline.drain().await.unwrap();
        let outcome = pipeline.record(&input("n", "t-after", "s", "x")).await.unwrap();
        assert!(matches!(outcome, RecordOutcome::Queued { .. }));
    }

    #[tokio::test]
    async fn tampered_payload_fails_terminally() {
        let store = Arc::new(MemoryStore::new());
        let pipeline = pipeline(store.clone(), PipelineConfig::default());
        pipeline.start().await.unwrap();

        let mut intent = pipeline.build_intent(&input("n", "t", "s", "legit")).unwrap();
        intent.payload["content"] = json!("tampered");
        store.insert_intent(&intent).await.unwrap();
        pipeline.note_enqueued();

        let committed = pipeline.drain().await.unwrap();
        assert_eq!(committed, 0);

        let stored = store.get_intent(&intent.event_id).await.unwrap().unwrap();
        assert_eq!(stored.status, IntentStatus::FailedTerminal);
        let failures = store.list_failures().await.unwrap();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].event_id, intent.event_id);
        assert_eq!(store.list_logs(None).await.unwrap().len(), 0);
    }

    #[tokio::test]
    async fn drain_twice_changes_nothing() {
        let store = Arc::new(MemoryStore::new());
        let pipeline = pipeline(store.clone(), PipelineConfig::default());
        pipeline.start().await.unwrap();
        pipeline.record(&input("n", "t", "s", "once")).await.unwrap();

        pipeline.drain().await.unwrap();
        let global_before = store.get_global_state().await.unwrap();
        let committed = pipeline.drain().await.unwrap();
        assert_eq!(committed, 0);
        let global_after = store.get_global_state().await.unwrap();
        assert_eq!(global_before.last_sequence, global_after.last_sequence);
        assert_eq!(global_before.last_hash, global_after.last_hash);
    }

    #[tokio::test]
    async fn anchors_chain_to_each_other() {
        let store = Arc::new(MemoryStore::new());
        let pipeline = pipeline(store.clone(), PipelineConfig::default());
        pipeline.start().await.unwrap();
        pipeline.record(&input("n", "t1", "s", "a")).await.unwrap();
        pipeline.drain().await.unwrap();

        let first = pipeline.anchor().await.unwrap().expect("first anchor");
        assert_eq!(first.previous_anchor_hash, "");

        pipeline.record(&input("n", "t2", "s", "b")).await.unwrap();
        pipeline.drain().await.unwrap();
        let second = pipeline.anchor().await.unwrap().expect("second anchor");
        assert_eq!(second.previous_anchor_hash, first.anchor_hash);
        assert_ne!(second.anchor_hash, first.anchor_hash);
    }

    #[tokio::test]
    async fn anchor_without_partitions_is_noop() {
        let store = Arc::new(MemoryStore::new());
        let pipeline = pipeline(store.clone(), PipelineConfig::default());
        assert!(pipeline.anchor().await.unwrap().is_none());
        assert!(store.list_anchors().await.unwrap().is_empty());
    }
}
