// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! One drain pass over the sync queue.
//!
//! 1. Skip the pass while the breaker is open and cooling down.
//! 2. Take up to `drain_batch_size` due entries, oldest `next_attempt_at` first.
//! 3. Push each one, asking the breaker first. A refusal ends the batch.
//! 4. Confirm, reschedule with backoff, dead-letter or mark conflicted.
//!
//! Remote failures never escape a pass; they land in the queue, the record
//! state, the event stream and the returned [`SyncSummary`].

use std::time::Instant;

use tracing::{debug, error, info, warn};

use super::{DrainOutcome, SyncEngine, SyncEvent, SyncSummary};
use crate::queue::{DeadLetterReason, OperationType, SyncOperation};
use crate::record::{Record, SyncState};
use crate::resilience::circuit_breaker::BreakerStatus;
use crate::resolver::{self, Side};
use crate::storage::traits::{RemoteError, RemoteErrorKind, StorageError};

/// How a push settled when the remote accepted it.
enum Pushed {
    Confirmed,
    /// A create collided with an existing document and the merge was
    /// written back to the remote
    Merged { record: Record, superseded: bool },
    /// Newer remote state won; nothing was written
    Superseded(Record),
}

impl SyncEngine {
    /// Drain due entries now and report what happened.
    ///
    /// Runs the same pass as the background timer; concurrent calls wait
    /// for each other.
    #[tracing::instrument(skip(self))]
    pub async fn sync_now(&self) -> SyncSummary {
        self.tick().await
    }

    /// One drain pass.
    pub async fn tick(&self) -> SyncSummary {
        let _pass = self.drain_lock.lock().await;
        let mut summary = SyncSummary::default();

        if self.note_breaker() == BreakerStatus::Open {
            debug!("Circuit open, skipping drain pass");
            summary.skipped_breaker_open = true;
            return summary;
        }

        let start = Instant::now();
        let now = self.clock.now_millis();
        let mut batch = self
            .queue
            .due(now, self.config.drain_batch_size)
            .await
            .into_iter();

        while let Some(op) = batch.next() {
            let outcome = match self.drain_one(&op).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!(record_id = %op.record_id, error = %e, "Local store failed while draining, stopping pass");
                    self.queue.release(&op).await;
                    DrainOutcome::Refused
                }
            };

            if outcome == DrainOutcome::Refused {
                for rest in batch.by_ref() {
                    self.queue.release(&rest).await;
                }
                break;
            }

            summary.attempted += 1;
            summary.count(&outcome);
            crate::metrics::record_drain_outcome(outcome.as_str());
        }

        *self.last_sync_at.lock() = Some(self.clock.now_millis());
        crate::metrics::record_drain_duration(start.elapsed());

        if summary.attempted > 0 {
            info!(
                attempted = summary.attempted,
                confirmed = summary.confirmed,
                requeued = summary.requeued,
                dead_lettered = summary.dead_lettered,
                conflicted = summary.conflicted,
                superseded = summary.superseded,
                "Drain pass complete"
            );
        }
        summary
    }

    async fn drain_one(&self, op: &SyncOperation) -> Result<DrainOutcome, StorageError> {
        if op.superseded {
            if !self.queue.complete(op).await.map_err(into_storage)? {
                return Ok(DrainOutcome::Stale);
            }
            debug!(record_id = %op.record_id, "Dropped superseded operation");
            self.emit(SyncEvent::Superseded {
                record_id: op.record_id.clone(),
            });
            return Ok(DrainOutcome::Superseded);
        }

        if !self.allow_remote() {
            debug!(record_id = %op.record_id, "Circuit refused drain call");
            self.queue.release(op).await;
            return Ok(DrainOutcome::Refused);
        }

        let result = self.push(op).await;
        self.observe_remote(&result);

        match result {
            Ok(pushed) => self.settle_success(op, pushed).await,
            Err(e) if e.kind.is_transient() => self.settle_transient(op, e.kind).await,
            Err(e) => self.settle_permanent(op, e).await,
        }
    }

    /// Perform the remote call(s) for `op`.
    ///
    /// - update of a missing document: retried as create
    /// - delete of a missing document: already done
    /// - create of an existing document: reconciled against it
    async fn push(&self, op: &SyncOperation) -> Result<Pushed, RemoteError> {
        let timeout = self.config.remote_timeout();
        let id = op.record_id.as_str();

        match op.operation_type {
            OperationType::Create => {
                match self.call_remote("create", timeout, self.remote.create(&op.snapshot)).await {
                    Err(e) if e.kind == RemoteErrorKind::Conflict => self.reconcile_create(op).await,
                    other => other.map(|_| Pushed::Confirmed),
                }
            }
            OperationType::Update => {
                match self.call_remote("update", timeout, self.remote.update(id, &op.snapshot)).await {
                    Err(e) if e.kind == RemoteErrorKind::NotFound => {
                        debug!(record_id = %id, "Update target missing, creating instead");
                        self.call_remote("create", timeout, self.remote.create(&op.snapshot))
                            .await
                            .map(|_| Pushed::Confirmed)
                    }
                    other => other.map(|_| Pushed::Confirmed),
                }
            }
            OperationType::Delete => match self.call_remote("delete", timeout, self.remote.delete(id)).await {
                Err(e) if e.kind == RemoteErrorKind::NotFound => Ok(Pushed::Confirmed),
                other => other.map(|_| Pushed::Confirmed),
            },
        }
    }

    async fn reconcile_create(&self, op: &SyncOperation) -> Result<Pushed, RemoteError> {
        let timeout = self.config.remote_timeout();
        let id = op.record_id.as_str();

        let Some(remote) = self.call_remote("get", timeout, self.remote.get(id)).await? else {
            // Deleted between the two calls; try again later
            return Err(RemoteError::unavailable(format!("'{}' vanished after create conflict", id)));
        };

        // An earlier attempt landed but its answer was lost
        if remote.version == op.snapshot.version && remote.payload == op.snapshot.payload {
            debug!(record_id = %id, version = remote.version, "Create already applied");
            return Ok(Pushed::Confirmed);
        }

        let resolution = resolver::resolve(&op.snapshot, &remote);
        crate::metrics::record_merge(&resolution.winner.to_string());

        if resolution.winner == Side::Local || resolution.republish {
            let record = resolution.record.with_sync_state(SyncState::Synced);
            self.call_remote("update", timeout, self.remote.update(id, &record))
                .await?;
            return Ok(Pushed::Merged {
                record,
                superseded: resolution.winner == Side::Remote,
            });
        }
        Ok(Pushed::Superseded(resolution.record))
    }

    async fn settle_success(&self, op: &SyncOperation, pushed: Pushed) -> Result<DrainOutcome, StorageError> {
        if !self.queue.complete(op).await.map_err(into_storage)? {
            return Ok(DrainOutcome::Stale);
        }

        match pushed {
            Pushed::Confirmed => {
                self.apply_confirmed(op).await?;
                debug!(record_id = %op.record_id, operation = %op.operation_type, "Operation confirmed");
                self.emit(SyncEvent::Confirmed {
                    record_id: op.record_id.clone(),
                    operation: op.operation_type,
                    version: op.snapshot.version,
                });
                Ok(DrainOutcome::Confirmed)
            }
            Pushed::Merged { record, superseded } => {
                let version = record.version;
                self.apply_reconciled(op, record).await?;
                if superseded {
                    self.emit(SyncEvent::Superseded {
                        record_id: op.record_id.clone(),
                    });
                    return Ok(DrainOutcome::Superseded);
                }
                self.emit(SyncEvent::Confirmed {
                    record_id: op.record_id.clone(),
                    operation: op.operation_type,
                    version,
                });
                Ok(DrainOutcome::Confirmed)
            }
            Pushed::Superseded(record) => {
                info!(record_id = %op.record_id, "Local create superseded by newer remote copy");
                self.apply_reconciled(op, record.with_sync_state(SyncState::Synced))
                    .await?;
                self.emit(SyncEvent::Superseded {
                    record_id: op.record_id.clone(),
                });
                Ok(DrainOutcome::Superseded)
            }
        }
    }

    async fn settle_transient(&self, op: &SyncOperation, kind: RemoteErrorKind) -> Result<DrainOutcome, StorageError> {
        let now = self.clock.now_millis();
        let attempts = op.attempts.saturating_add(1);

        if attempts >= self.config.max_retries {
            let mut exhausted = op.clone();
            exhausted.attempts = attempts;
            exhausted.last_error = Some(kind);

            let dead = self
                .queue
                .dead_letter(&exhausted, DeadLetterReason::RetriesExhausted, now)
                .await
                .map_err(into_storage)?;
            let Some(dead) = dead else {
                return Ok(DrainOutcome::Stale);
            };

            self.mark_conflicted(&op.record_id, op.snapshot.version).await?;
            self.emit(SyncEvent::DeadLettered {
                record_id: op.record_id.clone(),
                operation_id: dead.operation.operation_id.clone(),
                reason: dead.reason,
                attempts,
            });
            return Ok(DrainOutcome::DeadLettered);
        }

        let delay = self.retry.backoff(op.attempts);
        let next_attempt_at = now.saturating_add(delay.as_millis() as i64);
        if !self
            .queue
            .reschedule(op, attempts, next_attempt_at, Some(kind))
            .await
            .map_err(into_storage)?
        {
            return Ok(DrainOutcome::Stale);
        }

        debug!(
            record_id = %op.record_id,
            attempts,
            delay_ms = delay.as_millis() as u64,
            error = %kind,
            "Transient failure, rescheduled"
        );
        self.emit(SyncEvent::Requeued {
            record_id: op.record_id.clone(),
            attempts,
            next_attempt_at,
            error: kind,
        });
        Ok(DrainOutcome::Requeued)
    }

    /// Drop a rejected operation. A rejected delete is kept as a dead
    /// letter so the intent survives; its record becomes visible again as
    /// `Conflicted`.
    async fn settle_permanent(&self, op: &SyncOperation, error: RemoteError) -> Result<DrainOutcome, StorageError> {
        if op.operation_type == OperationType::Delete {
            let mut rejected = op.clone();
            rejected.attempts = op.attempts.saturating_add(1);
            rejected.last_error = Some(error.kind);
            let now = self.clock.now_millis();
            let dead = self
                .queue
                .dead_letter(&rejected, DeadLetterReason::Rejected, now)
                .await
                .map_err(into_storage)?;
            if dead.is_none() {
                return Ok(DrainOutcome::Stale);
            }
        } else if !self.queue.complete(op).await.map_err(into_storage)? {
            return Ok(DrainOutcome::Stale);
        }

        warn!(
            record_id = %op.record_id,
            operation = %op.operation_type,
            error = %error,
            "Remote rejected operation, record needs reconciliation"
        );
        self.mark_conflicted(&op.record_id, op.snapshot.version).await?;
        self.emit(SyncEvent::Conflicted {
            record_id: op.record_id.clone(),
            error: error.kind,
        });
        Ok(DrainOutcome::Conflicted)
    }
}

fn into_storage(e: crate::queue::QueueError) -> StorageError {
    match e {
        crate::queue::QueueError::Storage(e) => e,
        other => StorageError::Backend(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use serde_json::json;

    use crate::clock::{Clock, ManualClock};
    use crate::config::SyncConfig;
    use crate::queue::SyncQueue;
    use crate::resilience::circuit_breaker::{CircuitBreaker, CircuitConfig};
    use crate::storage::memory::{InMemoryLocalStore, InMemoryRemoteStore};
    use crate::storage::records::LocalRecords;

    struct Harness {
        engine: SyncEngine,
        remote: Arc<InMemoryRemoteStore>,
        clock: Arc<ManualClock>,
    }

    async fn harness(config: SyncConfig) -> Harness {
        let local = Arc::new(InMemoryLocalStore::new());
        let remote = Arc::new(InMemoryRemoteStore::new());
        let clock = Arc::new(ManualClock::new(1_000));
        let breaker = Arc::new(CircuitBreaker::new("remote", config.circuit.clone(), clock.clone()));
        let queue = Arc::new(SyncQueue::open(local.clone(), &config).await.unwrap());
        let engine = SyncEngine::new(LocalRecords::new(local), remote.clone(), breaker, queue, clock.clone(), config);
        Harness { engine, remote, clock }
    }

    fn quiet_config() -> SyncConfig {
        SyncConfig {
            backoff_jitter: 0.0,
            circuit: CircuitConfig {
                failure_threshold: 10,
                cool_down: Duration::from_secs(30),
                half_open_max_probes: 1,
            },
            ..Default::default()
        }
    }

    /// Store `record` locally as pending and queue it, like a failed save.
    async fn pending(h: &Harness, record: Record, operation_type: OperationType) -> SyncOperation {
        let record = record.with_sync_state(operation_type.pending_state());
        h.engine.records.put(&record).await.unwrap();
        let now = h.clock.now_millis();
        h.engine
            .queue
            .enqueue(SyncOperation::new(operation_type, record, now), now)
            .await
            .unwrap()
            .operation
    }

    #[tokio::test]
    async fn test_drain_confirms_create() {
        let h = harness(quiet_config()).await;
        let record = Record::test_result("t1", "alice", json!({"wpm": 80})).with_version(1);
        pending(&h, record, OperationType::Create).await;

        let summary = h.engine.sync_now().await;
        assert_eq!(summary.attempted, 1);
        assert_eq!(summary.confirmed, 1);
        assert!(h.engine.queue.is_empty().await);

        let local = h.engine.records.get("t1").await.unwrap().unwrap();
        assert_eq!(local.sync_state, SyncState::Synced);
        assert_eq!(h.remote.snapshot("t1").unwrap().version, 1);
    }

    #[tokio::test]
    async fn test_transient_failure_backs_off() {
        let h = harness(quiet_config()).await;
        pending(&h, Record::test_result("t1", "a", json!({})).with_version(1), OperationType::Create).await;
        h.remote.fail_next(RemoteErrorKind::Unavailable, 1);

        let summary = h.engine.sync_now().await;
        assert_eq!(summary.requeued, 1);

        let op = h.engine.queue.get("t1").await.unwrap();
        assert_eq!(op.attempts, 1);
        assert_eq!(op.last_error, Some(RemoteErrorKind::Unavailable));
        // base delay, no jitter
        assert_eq!(op.next_attempt_at, 2_000);

        // Not due yet
        assert_eq!(h.engine.sync_now().await.attempted, 0);

        h.clock.advance(Duration::from_secs(1));
        assert_eq!(h.engine.sync_now().await.confirmed, 1);
    }

    #[tokio::test]
    async fn test_retry_ceiling_dead_letters() {
        let h = harness(quiet_config()).await;
        pending(&h, Record::test_result("t1", "a", json!({})).with_version(1), OperationType::Create).await;
        h.remote.set_outage(Some(RemoteErrorKind::Timeout));

        let mut dead_lettered = 0;
        for _ in 0..10 {
            let summary = h.engine.sync_now().await;
            dead_lettered += summary.dead_lettered;
            if let Some(op) = h.engine.queue.get("t1").await {
                assert!(op.attempts < 3);
            }
            h.clock.advance(Duration::from_secs(600));
        }

        assert_eq!(dead_lettered, 1);
        assert!(h.engine.queue.is_empty().await);
        let dead = h.engine.queue.dead_letters().await;
        assert_eq!(dead[0].operation.attempts, 3);
        let local = h.engine.records.get("t1").await.unwrap().unwrap();
        assert_eq!(local.sync_state, SyncState::Conflicted);
    }

    #[tokio::test]
    async fn test_permanent_failure_marks_conflicted_without_tripping_breaker() {
        let config = SyncConfig {
            circuit: CircuitConfig {
                failure_threshold: 1,
                ..Default::default()
            },
            ..quiet_config()
        };
        let h = harness(config).await;
        pending(&h, Record::test_result("t1", "a", json!({})).with_version(1), OperationType::Update).await;
        h.remote.fail_next(RemoteErrorKind::Rejected, 1);

        let summary = h.engine.sync_now().await;
        assert_eq!(summary.conflicted, 1);
        assert!(h.engine.queue.is_empty().await);
        assert_eq!(h.engine.breaker.status(), BreakerStatus::Closed);

        let local = h.engine.records.get("t1").await.unwrap().unwrap();
        assert_eq!(local.sync_state, SyncState::Conflicted);
    }

    #[tokio::test]
    async fn test_duplicate_create_is_idempotent() {
        let h = harness(quiet_config()).await;
        let record = Record::test_result("t1", "a", json!({"wpm": 70})).with_version(1);
        // An earlier attempt landed but the answer never came back
        h.remote.insert(record.clone());
        pending(&h, record, OperationType::Create).await;

        let summary = h.engine.sync_now().await;
        assert_eq!(summary.confirmed, 1);
        let local = h.engine.records.get("t1").await.unwrap().unwrap();
        assert_eq!(local.sync_state, SyncState::Synced);
        assert_eq!(local.payload["wpm"], 70);
    }

    #[tokio::test]
    async fn test_update_of_missing_document_creates_it() {
        let h = harness(quiet_config()).await;
        pending(&h, Record::test_result("t1", "a", json!({})).with_version(2), OperationType::Update).await;

        assert_eq!(h.engine.sync_now().await.confirmed, 1);
        assert!(h.remote.snapshot("t1").is_some());
    }

    #[tokio::test]
    async fn test_delete_confirmation_removes_tombstone() {
        let h = harness(quiet_config()).await;
        h.remote.insert(Record::test_result("t1", "a", json!({})).with_version(1));
        pending(&h, Record::test_result("t1", "a", json!({})).with_version(2), OperationType::Delete).await;

        assert_eq!(h.engine.sync_now().await.confirmed, 1);
        assert!(h.remote.snapshot("t1").is_none());
        assert!(h.engine.records.get("t1").await.unwrap().is_none());

        // Deleting what is already gone counts as done
        pending(&h, Record::test_result("t2", "a", json!({})).with_version(1), OperationType::Delete).await;
        assert_eq!(h.engine.sync_now().await.confirmed, 1);
    }

    #[tokio::test]
    async fn test_superseded_entry_dropped_without_remote_call() {
        let h = harness(quiet_config()).await;
        pending(&h, Record::preferences("p1", "a", json!({})).with_version(1), OperationType::Update).await;
        h.engine.queue.mark_superseded("p1").await.unwrap();

        let summary = h.engine.sync_now().await;
        assert_eq!(summary.superseded, 1);
        assert_eq!(h.remote.call_count(), 0);
    }

    #[tokio::test]
    async fn test_create_collision_resolves_by_updated_at() {
        let h = harness(quiet_config()).await;
        let theirs = Record::preferences("p1", "alice", json!({"theme": "light"}))
            .with_version(1)
            .with_updated_at(5_000);
        h.remote.insert(theirs);
        let ours = Record::preferences("p1", "alice", json!({"theme": "dark"}))
            .with_version(1)
            .with_updated_at(2_000);
        pending(&h, ours, OperationType::Create).await;

        let summary = h.engine.sync_now().await;
        assert_eq!(summary.superseded, 1);
        assert_eq!(summary.conflicted, 0);

        let local = h.engine.records.get("p1").await.unwrap().unwrap();
        assert_eq!(local.payload["theme"], "light");
        assert_eq!(local.sync_state, SyncState::Synced);
    }

    #[tokio::test]
    async fn test_open_breaker_skips_pass() {
        let config = SyncConfig {
            circuit: CircuitConfig {
                failure_threshold: 1,
                cool_down: Duration::from_secs(30),
                half_open_max_probes: 1,
            },
            ..quiet_config()
        };
        let h = harness(config).await;
        pending(&h, Record::test_result("t1", "a", json!({})).with_version(1), OperationType::Create).await;
        h.engine.breaker.record_failure();

        let summary = h.engine.sync_now().await;
        assert!(summary.skipped_breaker_open);
        assert_eq!(h.remote.call_count(), 0);
        assert_eq!(h.engine.queue.len().await, 1);
    }

    #[tokio::test]
    async fn test_failed_probe_stops_batch() {
        let config = SyncConfig {
            circuit: CircuitConfig {
                failure_threshold: 1,
                cool_down: Duration::from_secs(30),
                half_open_max_probes: 1,
            },
            ..quiet_config()
        };
        let h = harness(config).await;
        for id in ["a", "b", "c"] {
            pending(&h, Record::test_result(id, "o", json!({})).with_version(1), OperationType::Create).await;
        }
        h.engine.breaker.record_failure();
        h.clock.advance(Duration::from_secs(30));
        h.remote.fail_next(RemoteErrorKind::Unavailable, 1);

        let summary = h.engine.sync_now().await;
        assert_eq!(summary.attempted, 1);
        assert_eq!(summary.requeued, 1);
        assert_eq!(h.engine.breaker.status(), BreakerStatus::Open);
        // The untouched entries are back in the pool
        assert_eq!(h.engine.queue.len().await, 3);
        assert_eq!(h.remote.call_count(), 1);
    }

    #[tokio::test]
    async fn test_stale_version_not_marked_synced() {
        let h = harness(quiet_config()).await;
        let op = pending(&h, Record::test_result("t1", "a", json!({"wpm": 1})).with_version(1), OperationType::Create).await;

        // The user edits again before the drain confirms v1
        let newer = op.snapshot.clone().with_version(2).with_sync_state(SyncState::PendingUpdate);
        h.engine.records.put(&newer).await.unwrap();
        h.engine.apply_confirmed(&op).await.unwrap();

        let local = h.engine.records.get("t1").await.unwrap().unwrap();
        assert_eq!(local.sync_state, SyncState::PendingUpdate);
    }

    #[tokio::test]
    async fn test_events_are_broadcast() {
        let h = harness(quiet_config()).await;
        let mut events = h.engine.subscribe();
        pending(&h, Record::test_result("t1", "a", json!({})).with_version(1), OperationType::Create).await;

        h.engine.sync_now().await;
        match events.recv().await.unwrap() {
            SyncEvent::Confirmed { record_id, operation, version } => {
                assert_eq!(record_id, "t1");
                assert_eq!(operation, OperationType::Create);
                assert_eq!(version, 1);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_remote_times_out_as_transient() {
        let config = SyncConfig {
            remote_timeout_ms: 100,
            ..quiet_config()
        };
        let h = harness(config).await;
        pending(&h, Record::test_result("t1", "a", json!({})).with_version(1), OperationType::Create).await;
        h.remote.set_latency(Duration::from_secs(5));

        let summary = h.engine.sync_now().await;
        assert_eq!(summary.requeued, 1);
        let op = h.engine.queue.get("t1").await.unwrap();
        assert_eq!(op.last_error, Some(RemoteErrorKind::Timeout));
    }

    #[tokio::test]
    async fn test_rejected_delete_is_kept_as_dead_letter() {
        let h = harness(quiet_config()).await;
        h.remote.insert(Record::test_result("t1", "a", json!({"wpm": 70})).with_version(1));
        pending(&h, Record::test_result("t1", "a", json!({"wpm": 70})).with_version(2), OperationType::Delete).await;
        h.remote.fail_next(RemoteErrorKind::Rejected, 1);

        let summary = h.engine.sync_now().await;
        assert_eq!(summary.conflicted, 1);
        assert!(h.engine.queue.is_empty().await);
        assert!(h.remote.snapshot("t1").is_some());

        let dead = h.engine.queue.dead_letters().await;
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].reason, DeadLetterReason::Rejected);
        assert_eq!(dead[0].operation.operation_type, OperationType::Delete);
        assert_eq!(dead[0].operation.last_error, Some(RemoteErrorKind::Rejected));

        // No longer a hidden tombstone
        let local = h.engine.records.get("t1").await.unwrap().unwrap();
        assert_eq!(local.sync_state, SyncState::Conflicted);
        assert!(!local.is_tombstone());
        assert_eq!(local.payload["wpm"], 70);
    }

    #[tokio::test]
    async fn test_exhausted_delete_marks_record_conflicted() {
        let h = harness(quiet_config()).await;
        h.remote.insert(Record::test_result("t1", "a", json!({})).with_version(1));
        pending(&h, Record::test_result("t1", "a", json!({})).with_version(2), OperationType::Delete).await;
        h.remote.set_outage(Some(RemoteErrorKind::Unavailable));

        let mut dead_lettered = 0;
        for _ in 0..5 {
            dead_lettered += h.engine.sync_now().await.dead_lettered;
            h.clock.advance(Duration::from_secs(600));
        }

        assert_eq!(dead_lettered, 1);
        let dead = h.engine.queue.dead_letters().await;
        assert_eq!(dead[0].reason, DeadLetterReason::RetriesExhausted);
        assert_eq!(dead[0].operation.operation_type, OperationType::Delete);
        let local = h.engine.records.get("t1").await.unwrap().unwrap();
        assert_eq!(local.sync_state, SyncState::Conflicted);
    }

    #[tokio::test]
    async fn test_breaker_events_cover_half_open() {
        let config = SyncConfig {
            circuit: CircuitConfig {
                failure_threshold: 1,
                cool_down: Duration::from_secs(30),
                half_open_max_probes: 1,
            },
            ..quiet_config()
        };
        let h = harness(config).await;
        let mut events = h.engine.subscribe();
        pending(&h, Record::test_result("t1", "a", json!({})).with_version(1), OperationType::Create).await;

        h.remote.fail_next(RemoteErrorKind::Unavailable, 1);
        assert_eq!(h.engine.sync_now().await.requeued, 1);
        h.clock.advance(Duration::from_secs(30));
        assert_eq!(h.engine.sync_now().await.confirmed, 1);

        let mut transitions = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let SyncEvent::BreakerChanged { from, to } = event {
                transitions.push((from, to));
            }
        }
        assert_eq!(
            transitions,
            vec![
                (BreakerStatus::Closed, BreakerStatus::Open),
                (BreakerStatus::Open, BreakerStatus::HalfOpen),
                (BreakerStatus::HalfOpen, BreakerStatus::Closed),
            ]
        );
    }
}
