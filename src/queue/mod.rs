// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Durable sync queue.
//!
//! At most one pending [`SyncOperation`] per record id. A newer operation
//! for a record with a pending entry is coalesced into it (see
//! [`SyncOperation::coalesce`]), keeping that record's original position.
//!
//! Every mutation is written through to the local store under one mutex,
//! so the in-memory index and the persisted entries never disagree and a
//! restart resumes from exactly what was pending.
//!
//! # Outcomes are keyed by operation id
//!
//! The drain takes entries out with [`SyncQueue::due`], calls the remote
//! without holding the lock, then reports back with
//! [`complete`](SyncQueue::complete), [`reschedule`](SyncQueue::reschedule),
//! [`release`](SyncQueue::release) or
//! [`dead_letter`](SyncQueue::dead_letter). If the record was coalesced in
//! the meantime the entry carries a new operation id and the stale outcome
//! is ignored.

pub mod operation;

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::{OverflowPolicy, SyncConfig};
use crate::storage::traits::{LocalStore, RemoteErrorKind, StorageError};

pub use operation::{DeadLetter, DeadLetterReason, DecodeError, OperationType, SyncOperation};

pub const QUEUE_PREFIX: &str = "syncq/";
pub const DEAD_LETTER_PREFIX: &str = "deadletter/";

fn queue_key(record_id: &str) -> String {
    format!("{}{}", QUEUE_PREFIX, record_id)
}

fn dead_letter_key(operation_id: &str) -> String {
    format!("{}{}", DEAD_LETTER_PREFIX, operation_id)
}

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Sync queue is full ({limit} pending records)")]
    Capacity { limit: usize },
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Result of [`SyncQueue::enqueue`].
#[derive(Debug, Clone)]
pub struct EnqueueOutcome {
    /// The operation as stored
    pub operation: SyncOperation,
    /// Folded into an existing entry for the same record
    pub coalesced: bool,
    /// Entry pushed out to make room
    pub evicted: Option<DeadLetter>,
}

struct Entry {
    op: SyncOperation,
    in_flight: bool,
}

#[derive(Default)]
struct QueueState {
    entries: HashMap<String, Entry>,
    dead: VecDeque<DeadLetter>,
    next_seq: u64,
}

pub struct SyncQueue {
    local: Arc<dyn LocalStore>,
    max_size: usize,
    max_dead_letters: usize,
    policy: OverflowPolicy,
    state: Mutex<QueueState>,
}

impl SyncQueue {
    /// Open the queue, loading persisted entries and dead letters.
    ///
    /// Entries that fail to decode are logged and left in place untouched.
    pub async fn open(local: Arc<dyn LocalStore>, config: &SyncConfig) -> Result<Self, StorageError> {
        let mut state = QueueState::default();

        for (key, bytes) in local.list_by_prefix(QUEUE_PREFIX).await? {
            match operation::decode_operation(&bytes) {
                Ok(op) => {
                    state.next_seq = state.next_seq.max(op.enqueued_seq + 1);
                    state.entries.insert(op.record_id.clone(), Entry { op, in_flight: false });
                }
                Err(e) => warn!(key = %key, error = %e, "Skipping undecodable queue entry"),
            }
        }

        let mut dead = Vec::new();
        for (key, bytes) in local.list_by_prefix(DEAD_LETTER_PREFIX).await? {
            match operation::decode_dead_letter(&bytes) {
                Ok(d) => dead.push(d),
                Err(e) => warn!(key = %key, error = %e, "Skipping undecodable dead letter"),
            }
        }
        dead.sort_by_key(|d| (d.dead_lettered_at, d.operation.enqueued_seq));
        state.dead = dead.into();

        if !state.entries.is_empty() || !state.dead.is_empty() {
            info!(
                pending = state.entries.len(),
                dead_letters = state.dead.len(),
                "Resumed sync queue from local store"
            );
        }
        crate::metrics::set_queue_depth(state.entries.len());
        crate::metrics::set_dead_letters(state.dead.len());

        Ok(Self {
            local,
            max_size: config.max_queue_size.max(1),
            max_dead_letters: config.max_dead_letters,
            policy: config.overflow_policy,
            state: Mutex::new(state),
        })
    }

    /// Would enqueueing for `record_id` be refused?
    ///
    /// Only the `Reject` policy refuses; eviction always makes room.
    pub async fn check_capacity(&self, record_id: &str) -> Result<(), QueueError> {
        let state = self.state.lock().await;
        if self.policy == OverflowPolicy::Reject
            && !state.entries.contains_key(record_id)
            && state.entries.len() >= self.max_size
        {
            return Err(QueueError::Capacity { limit: self.max_size });
        }
        Ok(())
    }

    pub async fn enqueue(&self, op: SyncOperation, now: i64) -> Result<EnqueueOutcome, QueueError> {
        let mut state = self.state.lock().await;

        if let Some(existing) = state.entries.get(&op.record_id) {
            let merged = existing.op.clone().coalesce(op, existing.in_flight);
            self.persist(&merged).await?;
            debug!(
                record_id = %merged.record_id,
                operation = %merged.operation_type,
                "Coalesced into pending operation"
            );
            state.entries.insert(
                merged.record_id.clone(),
                Entry {
                    op: merged.clone(),
                    in_flight: false,
                },
            );
            crate::metrics::record_enqueue("coalesced");
            return Ok(EnqueueOutcome {
                operation: merged,
                coalesced: true,
                evicted: None,
            });
        }

        let mut evicted = None;
        if state.entries.len() >= self.max_size {
            match self.policy {
                OverflowPolicy::Reject => {
                    warn!(record_id = %op.record_id, limit = self.max_size, "Sync queue full, rejecting");
                    return Err(QueueError::Capacity { limit: self.max_size });
                }
                OverflowPolicy::EvictOldest => {
                    // Prefer an idle entry; an in-flight one only if nothing else is left
                    let oldest = state
                        .entries
                        .values()
                        .min_by_key(|e| (e.in_flight, e.op.enqueued_seq))
                        .map(|e| e.op.record_id.clone());
                    if let Some(record_id) = oldest {
                        evicted = self
                            .move_to_dead_letters(&mut state, &record_id, DeadLetterReason::Evicted, now)
                            .await?;
                        if let Some(dead) = &evicted {
                            warn!(
                                record_id = %dead.operation.record_id,
                                limit = self.max_size,
                                "Sync queue full, evicted oldest entry"
                            );
                        }
                    }
                }
            }
        }

        let mut op = op;
        op.enqueued_seq = state.next_seq;
        state.next_seq += 1;
        self.persist(&op).await?;
        state.entries.insert(
            op.record_id.clone(),
            Entry {
                op: op.clone(),
                in_flight: false,
            },
        );

        crate::metrics::record_enqueue("fresh");
        crate::metrics::set_queue_depth(state.entries.len());
        Ok(EnqueueOutcome {
            operation: op,
            coalesced: false,
            evicted,
        })
    }

    /// Up to `limit` entries due at `now`, by `next_attempt_at` then enqueue
    /// order. Returned entries are marked in flight until an outcome is
    /// reported.
    pub async fn due(&self, now: i64, limit: usize) -> Vec<SyncOperation> {
        let mut state = self.state.lock().await;

        let mut ready: Vec<(i64, u64, String)> = state
            .entries
            .values()
            .filter(|e| !e.in_flight && e.op.next_attempt_at <= now)
            .map(|e| (e.op.next_attempt_at, e.op.enqueued_seq, e.op.record_id.clone()))
            .collect();
        ready.sort();
        ready.truncate(limit);

        ready
            .into_iter()
            .filter_map(|(_, _, record_id)| {
                let entry = state.entries.get_mut(&record_id)?;
                entry.in_flight = true;
                Some(entry.op.clone())
            })
            .collect()
    }

    /// Remote confirmed `op`. Returns false if the entry has moved on.
    pub async fn complete(&self, op: &SyncOperation) -> Result<bool, QueueError> {
        let mut state = self.state.lock().await;
        if !Self::is_current(&state, op) {
            return Ok(false);
        }
        self.local.delete(&queue_key(&op.record_id)).await?;
        state.entries.remove(&op.record_id);
        crate::metrics::set_queue_depth(state.entries.len());
        Ok(true)
    }

    /// Record a failed attempt and schedule the next one.
    pub async fn reschedule(
        &self,
        op: &SyncOperation,
        attempts: u32,
        next_attempt_at: i64,
        error: Option<RemoteErrorKind>,
    ) -> Result<bool, QueueError> {
        let mut state = self.state.lock().await;
        if !Self::is_current(&state, op) {
            return Ok(false);
        }

        let mut updated = op.clone();
        updated.attempts = attempts;
        updated.next_attempt_at = next_attempt_at;
        updated.last_error = error;
        if let Some(entry) = state.entries.get(&op.record_id) {
            updated.superseded = entry.op.superseded;
        }

        self.persist(&updated).await?;
        state.entries.insert(
            updated.record_id.clone(),
            Entry {
                op: updated,
                in_flight: false,
            },
        );
        Ok(true)
    }

    /// Return `op` to the pool untouched (e.g. the breaker refused it).
    pub async fn release(&self, op: &SyncOperation) {
        let mut state = self.state.lock().await;
        if let Some(entry) = state.entries.get_mut(&op.record_id) {
            if entry.op.operation_id == op.operation_id {
                entry.in_flight = false;
            }
        }
    }

    /// Move `op` out of the retry path.
    pub async fn dead_letter(
        &self,
        op: &SyncOperation,
        reason: DeadLetterReason,
        now: i64,
    ) -> Result<Option<DeadLetter>, QueueError> {
        let mut state = self.state.lock().await;
        if !Self::is_current(&state, op) {
            return Ok(None);
        }
        // Keep the attempt count the drain reached
        if let Some(entry) = state.entries.get_mut(&op.record_id) {
            entry.op.attempts = op.attempts;
            entry.op.last_error = op.last_error;
        }
        self.move_to_dead_letters(&mut state, &op.record_id, reason, now)
            .await
    }

    /// Flag the pending operation for `record_id` as superseded by a newer
    /// remote version. The drain drops it without a remote call.
    pub async fn mark_superseded(&self, record_id: &str) -> Result<bool, QueueError> {
        let mut state = self.state.lock().await;
        let Some(entry) = state.entries.get(record_id) else {
            return Ok(false);
        };
        if entry.op.superseded {
            return Ok(true);
        }
        let mut updated = entry.op.clone();
        updated.superseded = true;
        self.persist(&updated).await?;
        if let Some(entry) = state.entries.get_mut(record_id) {
            entry.op = updated;
        }
        debug!(record_id = %record_id, "Pending operation superseded by remote");
        Ok(true)
    }

    pub async fn get(&self, record_id: &str) -> Option<SyncOperation> {
        self.state.lock().await.entries.get(record_id).map(|e| e.op.clone())
    }

    /// All pending operations in enqueue order.
    pub async fn pending(&self) -> Vec<SyncOperation> {
        let state = self.state.lock().await;
        let mut ops: Vec<SyncOperation> = state.entries.values().map(|e| e.op.clone()).collect();
        ops.sort_by_key(|op| op.enqueued_seq);
        ops
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.lock().await.entries.is_empty()
    }

    /// Retained dead letters, oldest first.
    pub async fn dead_letters(&self) -> Vec<DeadLetter> {
        self.state.lock().await.dead.iter().cloned().collect()
    }

    pub async fn dead_letter_count(&self) -> usize {
        self.state.lock().await.dead.len()
    }

    /// Put a dead-lettered operation back on the retry path with a fresh
    /// attempt budget.
    ///
    /// If the record has gained a newer pending operation since, the dead
    /// letter is stale: it is discarded and `None` returned.
    pub async fn requeue_dead_letter(&self, operation_id: &str, now: i64) -> Result<Option<SyncOperation>, QueueError> {
        let mut state = self.state.lock().await;
        let Some(pos) = state.dead.iter().position(|d| d.operation.operation_id == operation_id) else {
            return Ok(None);
        };

        let record_id = state.dead[pos].operation.record_id.clone();
        if state.entries.contains_key(&record_id) {
            self.local.delete(&dead_letter_key(operation_id)).await?;
            state.dead.remove(pos);
            crate::metrics::set_dead_letters(state.dead.len());
            debug!(record_id = %record_id, "Dropped stale dead letter");
            return Ok(None);
        }
        if self.policy == OverflowPolicy::Reject && state.entries.len() >= self.max_size {
            return Err(QueueError::Capacity { limit: self.max_size });
        }

        let mut op = state.dead[pos].operation.clone();
        op.attempts = 0;
        op.next_attempt_at = now;
        op.last_error = None;
        op.superseded = false;
        // Seq is kept unless something newer already sits behind it
        if state.entries.values().any(|e| e.op.enqueued_seq >= op.enqueued_seq) {
            op.enqueued_seq = state.next_seq;
            state.next_seq += 1;
        }

        self.persist(&op).await?;
        self.local.delete(&dead_letter_key(operation_id)).await?;
        state.dead.remove(pos);
        state.entries.insert(
            record_id.clone(),
            Entry {
                op: op.clone(),
                in_flight: false,
            },
        );

        info!(record_id = %record_id, "Requeued dead letter");
        crate::metrics::set_queue_depth(state.entries.len());
        crate::metrics::set_dead_letters(state.dead.len());
        Ok(Some(op))
    }

    /// Forget a dead letter.
    pub async fn discard_dead_letter(&self, operation_id: &str) -> Result<bool, QueueError> {
        let mut state = self.state.lock().await;
        let Some(pos) = state.dead.iter().position(|d| d.operation.operation_id == operation_id) else {
            return Ok(false);
        };
        self.local.delete(&dead_letter_key(operation_id)).await?;
        state.dead.remove(pos);
        crate::metrics::set_dead_letters(state.dead.len());
        Ok(true)
    }

    fn is_current(state: &QueueState, op: &SyncOperation) -> bool {
        let current = state
            .entries
            .get(&op.record_id)
            .is_some_and(|e| e.op.operation_id == op.operation_id);
        if !current {
            debug!(record_id = %op.record_id, operation_id = %op.operation_id, "Ignoring outcome for replaced operation");
        }
        current
    }

    async fn persist(&self, op: &SyncOperation) -> Result<(), StorageError> {
        let key = queue_key(&op.record_id);
        let bytes = operation::encode_operation(op).map_err(|e| StorageError::Encoding {
            key: key.clone(),
            reason: e.to_string(),
        })?;
        self.local.put(&key, &bytes).await
    }

    /// Write the dead letter first, then drop the queue entry, so a crash
    /// in between leaves a duplicate rather than a loss.
    async fn move_to_dead_letters(
        &self,
        state: &mut QueueState,
        record_id: &str,
        reason: DeadLetterReason,
        now: i64,
    ) -> Result<Option<DeadLetter>, QueueError> {
        let Some(entry) = state.entries.get(record_id) else {
            return Ok(None);
        };
        let dead = DeadLetter {
            operation: entry.op.clone(),
            reason,
            dead_lettered_at: now,
        };

        let key = dead_letter_key(&dead.operation.operation_id);
        let bytes = operation::encode_dead_letter(&dead).map_err(|e| StorageError::Encoding {
            key: key.clone(),
            reason: e.to_string(),
        })?;
        self.local.put(&key, &bytes).await?;
        self.local.delete(&queue_key(record_id)).await?;
        state.entries.remove(record_id);

        warn!(
            record_id = %record_id,
            operation = %dead.operation.operation_type,
            attempts = dead.operation.attempts,
            reason = %reason,
            "Operation dead-lettered"
        );
        crate::metrics::record_dead_letter(reason.as_str());

        state.dead.push_back(dead.clone());
        while state.dead.len() > self.max_dead_letters {
            let Some(dropped) = state.dead.pop_front() else { break };
            self.local.delete(&dead_letter_key(&dropped.operation.operation_id)).await?;
            warn!(
                record_id = %dropped.operation.record_id,
                limit = self.max_dead_letters,
                "Dead letter retention exceeded, dropped oldest"
            );
        }

        crate::metrics::set_queue_depth(state.entries.len());
        crate::metrics::set_dead_letters(state.dead.len());
        Ok(Some(dead))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Record;
    use crate::storage::memory::InMemoryLocalStore;
    use serde_json::json;

    fn record(id: &str, wpm: u32) -> Record {
        Record::test_result(id, "alice", json!({ "wpm": wpm }))
    }

    fn op(id: &str, operation_type: OperationType, now: i64) -> SyncOperation {
        SyncOperation::new(operation_type, record(id, 80), now)
    }

    async fn queue_with(config: SyncConfig) -> (SyncQueue, Arc<InMemoryLocalStore>) {
        let local = Arc::new(InMemoryLocalStore::new());
        let queue = SyncQueue::open(local.clone(), &config).await.unwrap();
        (queue, local)
    }

    async fn queue() -> (SyncQueue, Arc<InMemoryLocalStore>) {
        queue_with(SyncConfig::default()).await
    }

    #[tokio::test]
    async fn test_enqueue_persists_entry() {
        let (queue, local) = queue().await;
        let outcome = queue.enqueue(op("t1", OperationType::Create, 0), 0).await.unwrap();

        assert!(!outcome.coalesced);
        assert_eq!(queue.len().await, 1);
        assert!(local.get("syncq/t1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_update_then_delete_coalesces_to_single_delete() {
        let (queue, _) = queue().await;
        queue.enqueue(op("t1", OperationType::Update, 0), 0).await.unwrap();
        let outcome = queue.enqueue(op("t1", OperationType::Delete, 0), 0).await.unwrap();

        assert!(outcome.coalesced);
        assert_eq!(queue.len().await, 1);
        assert_eq!(queue.get("t1").await.unwrap().operation_type, OperationType::Delete);
    }

    #[tokio::test]
    async fn test_due_orders_by_time_then_seq() {
        let (queue, _) = queue().await;
        queue.enqueue(op("a", OperationType::Create, 50), 0).await.unwrap();
        queue.enqueue(op("b", OperationType::Create, 10), 0).await.unwrap();
        queue.enqueue(op("c", OperationType::Create, 10), 0).await.unwrap();
        queue.enqueue(op("later", OperationType::Create, 1_000), 0).await.unwrap();

        let due = queue.due(100, 10).await;
        let ids: Vec<&str> = due.iter().map(|o| o.record_id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c", "a"]);

        // In flight now
        assert!(queue.due(100, 10).await.is_empty());
    }

    #[tokio::test]
    async fn test_due_respects_limit() {
        let (queue, _) = queue().await;
        for i in 0..5 {
            queue.enqueue(op(&format!("r{}", i), OperationType::Create, 0), 0).await.unwrap();
        }
        assert_eq!(queue.due(0, 2).await.len(), 2);
        assert_eq!(queue.due(0, 10).await.len(), 3);
    }

    #[tokio::test]
    async fn test_complete_removes_and_unpersists() {
        let (queue, local) = queue().await;
        queue.enqueue(op("t1", OperationType::Create, 0), 0).await.unwrap();
        let taken = queue.due(0, 1).await;

        assert!(queue.complete(&taken[0]).await.unwrap());
        assert!(queue.is_empty().await);
        assert!(local.get("syncq/t1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_stale_outcome_is_ignored_after_coalescing() {
        let (queue, _) = queue().await;
        queue.enqueue(op("t1", OperationType::Create, 0), 0).await.unwrap();
        let taken = queue.due(0, 1).await.remove(0);

        // A new save lands while the create is in flight
        let outcome = queue.enqueue(op("t1", OperationType::Update, 0), 0).await.unwrap();
        assert_eq!(outcome.operation.operation_type, OperationType::Update);

        assert!(!queue.complete(&taken).await.unwrap());
        let pending = queue.get("t1").await.unwrap();
        assert_eq!(pending.operation_id, outcome.operation.operation_id);
        assert_eq!(queue.due(0, 10).await.len(), 1);
    }

    #[tokio::test]
    async fn test_reschedule_and_release() {
        let (queue, _) = queue().await;
        queue.enqueue(op("t1", OperationType::Create, 0), 0).await.unwrap();
        let taken = queue.due(0, 1).await.remove(0);

        assert!(queue
            .reschedule(&taken, 1, 2_000, Some(RemoteErrorKind::Timeout))
            .await
            .unwrap());
        let pending = queue.get("t1").await.unwrap();
        assert_eq!(pending.attempts, 1);
        assert_eq!(pending.last_error, Some(RemoteErrorKind::Timeout));
        assert!(queue.due(1_999, 10).await.is_empty());

        let taken = queue.due(2_000, 10).await.remove(0);
        queue.release(&taken).await;
        assert_eq!(queue.due(2_000, 10).await.len(), 1);
    }

    #[tokio::test]
    async fn test_dead_letter_persists_and_requeues() {
        let (queue, local) = queue().await;
        queue.enqueue(op("t1", OperationType::Create, 0), 0).await.unwrap();
        let mut taken = queue.due(0, 1).await.remove(0);
        taken.attempts = 3;

        let dead = queue
            .dead_letter(&taken, DeadLetterReason::RetriesExhausted, 9_000)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(dead.operation.attempts, 3);
        assert!(queue.is_empty().await);
        assert_eq!(queue.dead_letter_count().await, 1);
        let key = format!("deadletter/{}", dead.operation.operation_id);
        assert!(local.get(&key).await.unwrap().is_some());

        let requeued = queue
            .requeue_dead_letter(&dead.operation.operation_id, 10_000)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(requeued.attempts, 0);
        assert_eq!(requeued.next_attempt_at, 10_000);
        assert_eq!(queue.len().await, 1);
        assert_eq!(queue.dead_letter_count().await, 0);
        assert!(local.get(&key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_stale_dead_letter_is_discarded_on_requeue() {
        let (queue, _) = queue().await;
        queue.enqueue(op("t1", OperationType::Create, 0), 0).await.unwrap();
        let taken = queue.due(0, 1).await.remove(0);
        let dead = queue
            .dead_letter(&taken, DeadLetterReason::RetriesExhausted, 0)
            .await
            .unwrap()
            .unwrap();

        queue.enqueue(op("t1", OperationType::Update, 0), 0).await.unwrap();
        let requeued = queue.requeue_dead_letter(&dead.operation.operation_id, 0).await.unwrap();
        assert!(requeued.is_none());
        assert_eq!(queue.dead_letter_count().await, 0);
        assert_eq!(queue.get("t1").await.unwrap().operation_type, OperationType::Update);
    }

    #[tokio::test]
    async fn test_overflow_evicts_oldest() {
        let (queue, _) = queue_with(SyncConfig {
            max_queue_size: 2,
            ..Default::default()
        })
        .await;
        queue.enqueue(op("a", OperationType::Create, 0), 0).await.unwrap();
        queue.enqueue(op("b", OperationType::Create, 0), 0).await.unwrap();
        let outcome = queue.enqueue(op("c", OperationType::Create, 0), 5).await.unwrap();

        let evicted = outcome.evicted.unwrap();
        assert_eq!(evicted.operation.record_id, "a");
        assert_eq!(evicted.reason, DeadLetterReason::Evicted);
        assert_eq!(queue.len().await, 2);
        assert!(queue.get("a").await.is_none());

        // Coalescing never needs room
        let outcome = queue.enqueue(op("b", OperationType::Update, 0), 5).await.unwrap();
        assert!(outcome.coalesced);
        assert!(outcome.evicted.is_none());
    }

    #[tokio::test]
    async fn test_overflow_reject_policy() {
        let (queue, _) = queue_with(SyncConfig {
            max_queue_size: 1,
            overflow_policy: OverflowPolicy::Reject,
            ..Default::default()
        })
        .await;
        queue.enqueue(op("a", OperationType::Create, 0), 0).await.unwrap();

        assert!(queue.check_capacity("a").await.is_ok());
        assert!(matches!(
            queue.check_capacity("b").await,
            Err(QueueError::Capacity { limit: 1 })
        ));
        assert!(matches!(
            queue.enqueue(op("b", OperationType::Create, 0), 0).await,
            Err(QueueError::Capacity { .. })
        ));
    }

    #[tokio::test]
    async fn test_dead_letter_retention_is_bounded() {
        let (queue, local) = queue_with(SyncConfig {
            max_dead_letters: 2,
            ..Default::default()
        })
        .await;
        for i in 0..3 {
            let id = format!("r{}", i);
            queue.enqueue(op(&id, OperationType::Create, 0), 0).await.unwrap();
            let taken = queue.due(0, 1).await.remove(0);
            queue
                .dead_letter(&taken, DeadLetterReason::RetriesExhausted, i)
                .await
                .unwrap();
        }

        let dead = queue.dead_letters().await;
        let ids: Vec<&str> = dead.iter().map(|d| d.operation.record_id.as_str()).collect();
        assert_eq!(ids, vec!["r1", "r2"]);
        assert_eq!(local.list_by_prefix("deadletter/").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_mark_superseded() {
        let (queue, _) = queue().await;
        assert!(!queue.mark_superseded("t1").await.unwrap());

        queue.enqueue(op("t1", OperationType::Update, 0), 0).await.unwrap();
        assert!(queue.mark_superseded("t1").await.unwrap());
        assert!(queue.get("t1").await.unwrap().superseded);
    }

    #[tokio::test]
    async fn test_reopen_resumes_pending_and_dead_letters() {
        let local = Arc::new(InMemoryLocalStore::new());
        {
            let queue = SyncQueue::open(local.clone(), &SyncConfig::default()).await.unwrap();
            queue.enqueue(op("a", OperationType::Create, 0), 0).await.unwrap();
            queue.enqueue(op("b", OperationType::Update, 0), 0).await.unwrap();
            let taken = queue.due(0, 1).await.remove(0);
            queue
                .dead_letter(&taken, DeadLetterReason::RetriesExhausted, 1)
                .await
                .unwrap();
        }
        local.put("syncq/garbage", b"{not json").await.unwrap();

        let queue = SyncQueue::open(local.clone(), &SyncConfig::default()).await.unwrap();
        assert_eq!(queue.len().await, 1);
        assert_eq!(queue.get("b").await.unwrap().operation_type, OperationType::Update);
        assert_eq!(queue.dead_letter_count().await, 1);

        // New entries order after the resumed ones
        let outcome = queue.enqueue(op("c", OperationType::Create, 0), 0).await.unwrap();
        assert!(outcome.operation.enqueued_seq > queue.get("b").await.unwrap().enqueued_seq);
    }

    #[tokio::test]
    async fn test_persist_failure_leaves_queue_unchanged() {
        let (queue, local) = queue().await;
        local.fail_writes(true);

        let result = queue.enqueue(op("t1", OperationType::Create, 0), 0).await;
        assert!(matches!(result, Err(QueueError::Storage(_))));
        assert!(queue.is_empty().await);
    }
}
