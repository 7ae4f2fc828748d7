// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Sync engine: drains the sync queue against the remote store.
//!
//! The engine is shared (`Arc`) between the hybrid repository's write path
//! and the background worker. Besides a drain mutex that keeps passes from
//! overlapping it owns the per-record locks: every read-check-write of a
//! local record, from a save or from a drain settling an operation, holds
//! that record's lock. Queue and breaker state are serialized inside those
//! components.
//!
//! # Module layout
//!
//! - [`types`]: public types (`SyncSummary`, `SyncStatus`, `SyncEvent`, ...)
//! - `drain`: one drain pass (`tick` / `sync_now`)
//! - `lifecycle`: background worker and graceful shutdown

mod drain;
mod lifecycle;
pub mod types;

pub use lifecycle::SyncWorker;
pub use types::{DrainOutcome, EngineState, SyncEvent, SyncStatus, SyncSummary};

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex as SyncMutex;
use tokio::sync::{broadcast, watch, Mutex, OwnedMutexGuard};
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::config::SyncConfig;
use crate::metrics::LatencyTimer;
use crate::queue::{DeadLetter, OperationType, SyncOperation, SyncQueue};
use crate::record::{Record, SyncState};
use crate::resilience::circuit_breaker::{BreakerStatus, CircuitBreaker};
use crate::resilience::retry::RetryConfig;
use crate::storage::records::LocalRecords;
use crate::storage::traits::{RemoteError, RemoteStore, StorageError};

pub struct SyncEngine {
    pub(crate) records: LocalRecords,
    pub(crate) remote: Arc<dyn RemoteStore>,
    pub(crate) breaker: Arc<CircuitBreaker>,
    pub(crate) queue: Arc<SyncQueue>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) config: SyncConfig,
    retry: RetryConfig,

    events: broadcast::Sender<SyncEvent>,

    /// Engine state (broadcast to watchers)
    state: watch::Sender<EngineState>,
    state_rx: watch::Receiver<EngineState>,

    /// One drain pass at a time
    drain_lock: Mutex<()>,
    last_sync_at: SyncMutex<Option<i64>>,

    /// Per-record write serialization
    record_locks: DashMap<String, Arc<Mutex<()>>>,
    /// Breaker status as last reported in a `BreakerChanged` event
    last_breaker: SyncMutex<BreakerStatus>,
}

impl SyncEngine {
    pub fn new(
        records: LocalRecords,
        remote: Arc<dyn RemoteStore>,
        breaker: Arc<CircuitBreaker>,
        queue: Arc<SyncQueue>,
        clock: Arc<dyn Clock>,
        config: SyncConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(config.event_buffer.max(1));
        let (state, state_rx) = watch::channel(EngineState::Created);
        let last_breaker = SyncMutex::new(breaker.status());
        Self {
            records,
            remote,
            breaker,
            queue,
            clock,
            retry: config.retry_config(),
            config,
            events,
            state,
            state_rx,
            drain_lock: Mutex::new(()),
            last_sync_at: SyncMutex::new(None),
            record_locks: DashMap::new(),
            last_breaker,
        }
    }

    #[must_use]
    pub fn state(&self) -> EngineState {
        *self.state_rx.borrow()
    }

    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<EngineState> {
        self.state_rx.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub fn queue(&self) -> &Arc<SyncQueue> {
        &self.queue
    }

    pub async fn status(&self) -> SyncStatus {
        SyncStatus {
            pending_count: self.queue.len().await,
            dead_letter_count: self.queue.dead_letter_count().await,
            last_sync_at: *self.last_sync_at.lock(),
            breaker_status: self.note_breaker(),
            engine_state: self.state(),
        }
    }

    pub(crate) fn emit(&self, event: SyncEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    pub(crate) fn set_state(&self, state: EngineState) {
        let _ = self.state.send(state);
    }

    /// Run one remote call under `timeout`, recording latency and outcome.
    /// An elapsed timeout becomes a `Timeout` error.
    pub(crate) async fn call_remote<T, F>(&self, operation: &'static str, timeout: Duration, call: F) -> Result<T, RemoteError>
    where
        F: Future<Output = Result<T, RemoteError>>,
    {
        let _timer = LatencyTimer::new(operation);
        let result = match tokio::time::timeout(timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(RemoteError::timeout(operation)),
        };
        let outcome = match &result {
            Ok(_) => "success",
            Err(e) => e.kind.as_str(),
        };
        crate::metrics::record_remote_call(operation, outcome);
        result
    }

    /// Take the write lock for one record. Held across every
    /// read-check-write of that record.
    pub(crate) async fn lock_record(&self, id: &str) -> RecordGuard<'_> {
        let lock = self
            .record_locks
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        RecordGuard {
            guard: Some(lock.lock_owned().await),
            locks: &self.record_locks,
            id: id.to_string(),
        }
    }

    /// Current breaker status. Emits `BreakerChanged` when it differs from
    /// the last reported one, which covers the cool-down driven Open to
    /// HalfOpen step as well as transitions caused by call outcomes.
    pub(crate) fn note_breaker(&self) -> BreakerStatus {
        let mut last = self.last_breaker.lock();
        let current = self.breaker.status();
        if *last != current {
            let from = std::mem::replace(&mut *last, current);
            self.emit(SyncEvent::BreakerChanged { from, to: current });
        }
        current
    }

    /// Ask the breaker for permission to call the remote.
    pub(crate) fn allow_remote(&self) -> bool {
        self.note_breaker();
        self.breaker.allow_request()
    }

    /// Feed a remote outcome to the breaker. Only transient failures count
    /// against the backend; a rejection means the backend answered.
    pub(crate) fn observe_remote<T>(&self, result: &Result<T, RemoteError>) {
        match result {
            Err(e) if e.kind.is_transient() => self.breaker.record_failure(),
            _ => self.breaker.record_success(),
        }
        self.note_breaker();
    }

    /// The remote confirmed `op`; bring the local record in line.
    ///
    /// Guarded by version: if the record changed locally since `op` was
    /// enqueued, a newer operation carries it and nothing is touched.
    pub(crate) async fn apply_confirmed(&self, op: &SyncOperation) -> Result<(), StorageError> {
        let _guard = self.lock_record(&op.record_id).await;
        let Some(local) = self.records.get(&op.record_id).await? else {
            return Ok(());
        };
        if local.version != op.snapshot.version {
            return Ok(());
        }

        match op.operation_type {
            OperationType::Delete => {
                if local.is_tombstone() {
                    self.records.remove(&op.record_id).await?;
                }
            }
            OperationType::Create | OperationType::Update => {
                if local.sync_state != SyncState::Synced && !local.is_tombstone() {
                    self.records
                        .put(&local.with_sync_state(SyncState::Synced))
                        .await?;
                }
            }
        }
        Ok(())
    }

    /// Replace the local record with the reconciled one, unless it moved on.
    pub(crate) async fn apply_reconciled(&self, op: &SyncOperation, record: Record) -> Result<(), StorageError> {
        let _guard = self.lock_record(&op.record_id).await;
        match self.records.get(&op.record_id).await? {
            Some(local) if local.version == op.snapshot.version && !local.is_tombstone() => {
                self.records.put(&record).await
            }
            _ => Ok(()),
        }
    }

    /// Flag a record for reconciliation on next read.
    ///
    /// A tombstone turns back into a visible record: the delete it carried
    /// failed, and its intent lives on as a dead letter. Callers must not
    /// hold the record's lock.
    pub(crate) async fn mark_conflicted(&self, record_id: &str, version: u64) -> Result<(), StorageError> {
        let _guard = self.lock_record(record_id).await;
        match self.records.get(record_id).await? {
            Some(local) if local.version == version => {
                debug!(record_id = %record_id, "Marking record conflicted");
                self.records
                    .put(&local.with_sync_state(SyncState::Conflicted))
                    .await
            }
            _ => Ok(()),
        }
    }

    /// Report an entry the queue pushed out to make room.
    pub(crate) async fn handle_evicted(&self, dead: &DeadLetter) -> Result<(), StorageError> {
        warn!(record_id = %dead.operation.record_id, "Pending operation evicted from full queue");
        self.mark_conflicted(&dead.operation.record_id, dead.operation.snapshot.version)
            .await?;
        self.emit(SyncEvent::Evicted {
            record_id: dead.operation.record_id.clone(),
        });
        Ok(())
    }
}

/// Holds one record's write lock; drops the lock entry when unused.
pub(crate) struct RecordGuard<'a> {
    guard: Option<OwnedMutexGuard<()>>,
    locks: &'a DashMap<String, Arc<Mutex<()>>>,
    id: String,
}

impl Drop for RecordGuard<'_> {
    fn drop(&mut self) {
        self.guard.take();
        self.locks.remove_if(&self.id, |_, lock| Arc::strong_count(lock) == 1);
    }
}
