// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Hybrid repository: the data-access surface the application talks to.
//!
//! # Dual write
//!
//! ```text
//! save(record)
//!   ├─ local store write (always, first; failure is fatal)
//!   ├─ breaker closed and no pending entry for the record?
//!   │     └─ remote create/update under `write_timeout`
//!   │           ├─ ok     → record Synced
//!   │           └─ failed → enqueue
//!   └─ otherwise → enqueue
//! ```
//!
//! A record with a pending queue entry is never written directly: the
//! direct write would overtake the queued one and break per-record order.
//!
//! # Merged reads
//!
//! `get_by_owner` lists the remote copy (when the breaker allows), merges it
//! with the local view through the [`resolver`](crate::resolver), writes the
//! outcome back locally and returns it. Any remote trouble degrades to the
//! local view with `is_offline = true`.

mod error;

pub use error::RepositoryError;

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info};

use crate::clock::Clock;
use crate::config::SyncConfig;
use crate::engine::{SyncEngine, SyncEvent, SyncStatus, SyncSummary, SyncWorker};
use crate::queue::{DeadLetter, OperationType, SyncOperation, SyncQueue};
use crate::record::{Record, RecordFilter, RecordSet, SyncState};
use crate::resilience::circuit_breaker::CircuitBreaker;
use crate::resolver::{self, MergeItem, Resolution, Side};
use crate::storage::records::LocalRecords;
use crate::storage::traits::{LocalStore, RemoteErrorKind, RemoteQuery, RemoteStore};

pub struct HybridRepository {
    engine: Arc<SyncEngine>,
    worker: Mutex<Option<SyncWorker>>,
}

impl HybridRepository {
    /// Compose a repository from its collaborators.
    ///
    /// `queue` must be opened over the same `local` store.
    pub fn new(
        local: Arc<dyn LocalStore>,
        remote: Arc<dyn RemoteStore>,
        breaker: Arc<CircuitBreaker>,
        queue: Arc<SyncQueue>,
        clock: Arc<dyn Clock>,
        config: SyncConfig,
    ) -> Self {
        let engine = SyncEngine::new(LocalRecords::new(local), remote, breaker, queue, clock, config);
        Self {
            engine: Arc::new(engine),
            worker: Mutex::new(None),
        }
    }

    /// Build the breaker and open the queue from `config`, then compose.
    pub async fn open(
        local: Arc<dyn LocalStore>,
        remote: Arc<dyn RemoteStore>,
        clock: Arc<dyn Clock>,
        config: SyncConfig,
    ) -> Result<Self, RepositoryError> {
        let breaker = Arc::new(CircuitBreaker::new("remote", config.circuit.clone(), clock.clone()));
        let queue = Arc::new(SyncQueue::open(local.clone(), &config).await?);
        Ok(Self::new(local, remote, breaker, queue, clock, config))
    }

    pub fn engine(&self) -> &Arc<SyncEngine> {
        &self.engine
    }

    /// Persist `record` locally, then push it to the remote or queue it.
    ///
    /// Returns once the local write has landed. The version is bumped past
    /// both the stored and the supplied one, and `updated_at` is stamped
    /// from the clock.
    #[tracing::instrument(skip(self, record), fields(record_id = %record.id))]
    pub async fn save(&self, record: Record) -> Result<(), RepositoryError> {
        validate(&record)?;
        let engine = &self.engine;
        let guard = engine.lock_record(&record.id).await;

        engine.queue.check_capacity(&record.id).await?;

        let existing = engine.records.get(&record.id).await?;
        let operation_type = match &existing {
            None => OperationType::Create,
            // Never reached the remote as far as we know
            Some(e) if e.sync_state == SyncState::PendingCreate => OperationType::Create,
            Some(_) => OperationType::Update,
        };
        let base_version = existing.as_ref().map_or(0, |e| e.version);
        let now = engine.clock.now_millis();

        let record = Record {
            version: base_version.max(record.version) + 1,
            updated_at: now,
            sync_state: operation_type.pending_state(),
            ..record
        };
        engine.records.put(&record).await?;
        debug!(version = record.version, operation = %operation_type, "Saved locally");

        let last_error = match self.try_direct_write(operation_type, &record).await {
            DirectWrite::Landed => {
                engine
                    .records
                    .put(&record.clone().with_sync_state(SyncState::Synced))
                    .await?;
                return Ok(());
            }
            DirectWrite::Failed(kind) => Some(kind),
            DirectWrite::Skipped => None,
        };

        let evicted = self
            .enqueue(SyncOperation::new(operation_type, record, now), last_error)
            .await?;
        drop(guard);
        self.report_evicted(evicted).await
    }

    /// Records for `owner_id`, merged with the remote copy when reachable.
    ///
    /// Never fails because of the remote; only a local store failure is an
    /// error.
    #[tracing::instrument(skip(self, filter))]
    pub async fn get_by_owner(&self, owner_id: &str, filter: &RecordFilter) -> Result<RecordSet, RepositoryError> {
        let engine = &self.engine;

        let stored = engine.records.list_owner(owner_id).await?;
        let tombstones: HashSet<String> = stored
            .iter()
            .filter(|r| r.is_tombstone())
            .map(|r| r.id.clone())
            .collect();
        let local: Vec<Record> = stored
            .into_iter()
            .filter(|r| !r.is_tombstone() && filter.matches(r))
            .collect();

        if !engine.allow_remote() {
            debug!("Circuit open, serving local view");
            return Ok(offline(filter, local));
        }

        let query = RemoteQuery::owner(owner_id, filter.clone());
        let result = engine
            .call_remote("list", engine.config.read_timeout(), engine.remote.list(&query))
            .await;
        engine.observe_remote(&result);

        let remote = match result {
            Ok(remote) => remote,
            Err(e) => {
                debug!(error = %e, "Remote listing failed, serving local view");
                return Ok(offline(filter, local));
            }
        };
        let remote: Vec<Record> = remote
            .into_iter()
            .filter(|r| !tombstones.contains(&r.id))
            .collect();

        let mut merged = Vec::new();
        for item in resolver::merge_owner_sets(local, remote) {
            if let Some(record) = self.write_back(item).await? {
                merged.push(record);
            }
        }

        crate::metrics::record_read(false);
        Ok(RecordSet {
            records: filter.apply(merged),
            is_offline: false,
        })
    }

    /// Delete locally (as a tombstone) and remotely, with the same
    /// discipline as [`save`](Self::save). Unknown ids are a no-op.
    #[tracing::instrument(skip(self))]
    pub async fn delete(&self, id: &str) -> Result<(), RepositoryError> {
        let engine = &self.engine;
        let guard = engine.lock_record(id).await;

        let Some(existing) = engine.records.get(id).await? else {
            debug!("Delete of unknown record ignored");
            return Ok(());
        };
        if existing.is_tombstone() {
            return Ok(());
        }
        engine.queue.check_capacity(id).await?;

        let now = engine.clock.now_millis();
        let tombstone = Record {
            version: existing.version + 1,
            updated_at: now,
            sync_state: SyncState::PendingDelete,
            ..existing
        };
        engine.records.put(&tombstone).await?;

        let last_error = match self.try_direct_write(OperationType::Delete, &tombstone).await {
            DirectWrite::Landed => {
                engine.records.remove(id).await?;
                return Ok(());
            }
            DirectWrite::Failed(kind) => Some(kind),
            DirectWrite::Skipped => None,
        };

        let evicted = self
            .enqueue(SyncOperation::new(OperationType::Delete, tombstone, now), last_error)
            .await?;
        drop(guard);
        self.report_evicted(evicted).await
    }

    /// Local read of one record. Pending deletes read as absent.
    pub async fn get(&self, id: &str) -> Result<Option<Record>, RepositoryError> {
        Ok(self
            .engine
            .records
            .get(id)
            .await?
            .filter(|r| !r.is_tombstone()))
    }

    pub async fn get_sync_status(&self) -> SyncStatus {
        self.engine.status().await
    }

    /// Drain the queue now.
    pub async fn sync_now(&self) -> SyncSummary {
        self.engine.sync_now().await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.engine.subscribe()
    }

    pub async fn dead_letters(&self) -> Vec<DeadLetter> {
        self.engine.queue.dead_letters().await
    }

    /// Give every dead letter a fresh retry budget. Returns how many went
    /// back on the queue.
    pub async fn requeue_dead_letters(&self) -> Result<usize, RepositoryError> {
        let engine = &self.engine;
        let now = engine.clock.now_millis();
        let mut requeued = 0;

        for dead in engine.queue.dead_letters().await {
            let _guard = engine.lock_record(&dead.operation.record_id).await;
            let Some(op) = engine
                .queue
                .requeue_dead_letter(&dead.operation.operation_id, now)
                .await?
            else {
                continue;
            };
            requeued += 1;

            if let Some(local) = engine.records.get(&op.record_id).await? {
                if local.version == op.snapshot.version && local.sync_state == SyncState::Conflicted {
                    engine
                        .records
                        .put(&local.with_sync_state(op.operation_type.pending_state()))
                        .await?;
                }
            }
        }

        if requeued > 0 {
            info!(requeued, "Requeued dead letters");
        }
        Ok(requeued)
    }

    /// Drop a dead letter for good; the local record keeps whatever state
    /// it has.
    pub async fn discard_dead_letter(&self, operation_id: &str) -> Result<bool, RepositoryError> {
        Ok(self.engine.queue.discard_dead_letter(operation_id).await?)
    }

    /// Start the background drain loop. Idempotent.
    pub async fn start(&self) {
        let mut worker = self.worker.lock().await;
        if worker.is_none() {
            *worker = Some(self.engine.spawn());
        }
    }

    /// Stop the background loop, letting an in-flight pass finish.
    pub async fn shutdown(&self) {
        let worker = self.worker.lock().await.take();
        if let Some(worker) = worker {
            worker.shutdown().await;
        }
    }

    /// One best-effort remote call for a freshly written record.
    async fn try_direct_write(&self, operation_type: OperationType, record: &Record) -> DirectWrite {
        let engine = &self.engine;

        if !engine.config.write_through {
            return DirectWrite::Skipped;
        }
        if engine.queue.get(&record.id).await.is_some() {
            debug!("Pending entry exists, queueing behind it");
            return DirectWrite::Skipped;
        }
        if !engine.allow_remote() {
            debug!("Circuit open, queueing");
            return DirectWrite::Skipped;
        }

        let timeout = engine.config.write_timeout();
        let result = match operation_type {
            OperationType::Create => {
                engine
                    .call_remote("create", timeout, engine.remote.create(record))
                    .await
            }
            OperationType::Update => {
                engine
                    .call_remote("update", timeout, engine.remote.update(&record.id, record))
                    .await
            }
            OperationType::Delete => {
                match engine
                    .call_remote("delete", timeout, engine.remote.delete(&record.id))
                    .await
                {
                    Err(e) if e.kind == RemoteErrorKind::NotFound => Ok(()),
                    other => other,
                }
            }
        };
        engine.observe_remote(&result);

        match result {
            Ok(()) => DirectWrite::Landed,
            Err(e) => {
                debug!(error = %e, "Direct remote write failed, queueing");
                DirectWrite::Failed(e.kind)
            }
        }
    }

    /// Queue `op`, returning the entry pushed out to make room, if any.
    /// The caller reports it with [`report_evicted`](Self::report_evicted)
    /// once it has released its own record lock.
    async fn enqueue(
        &self,
        mut op: SyncOperation,
        last_error: Option<RemoteErrorKind>,
    ) -> Result<Option<DeadLetter>, RepositoryError> {
        let now = op.next_attempt_at;
        op.last_error = last_error;
        let outcome = self.engine.queue.enqueue(op, now).await?;
        debug!(
            operation = %outcome.operation.operation_type,
            coalesced = outcome.coalesced,
            "Queued for background sync"
        );
        Ok(outcome.evicted)
    }

    /// Marking an evicted record takes that record's lock.
    async fn report_evicted(&self, evicted: Option<DeadLetter>) -> Result<(), RepositoryError> {
        if let Some(dead) = evicted {
            self.engine.handle_evicted(&dead).await?;
        }
        Ok(())
    }

    /// Persist the outcome of merging one record and return the record to
    /// show, or `None` when it was deleted locally meanwhile. Local changes
    /// made since the listing began take precedence.
    async fn write_back(&self, item: MergeItem) -> Result<Option<Record>, RepositoryError> {
        let engine = &self.engine;

        let (shown, evicted) = match item {
            MergeItem::LocalOnly(record) => return Ok(Some(record)),
            MergeItem::RemoteOnly(record) => {
                let _guard = engine.lock_record(&record.id).await;
                match engine.records.get(&record.id).await? {
                    None => {
                        engine.records.put(&record).await?;
                        return Ok(Some(record));
                    }
                    Some(current) if current.is_tombstone() => return Ok(None),
                    // Stored, but outside the filter's local view
                    Some(current) => {
                        let resolution = resolver::resolve(&current, &record);
                        self.apply_resolution(current, resolution).await?
                    }
                }
            }
            MergeItem::Both { local, resolution } => {
                let _guard = engine.lock_record(&local.id).await;

                let current = engine.records.get(&local.id).await?;
                if current.as_ref() != Some(&local) {
                    // Changed underneath us; show what is stored now
                    return Ok(current.filter(|r| !r.is_tombstone()));
                }
                self.apply_resolution(local, resolution).await?
            }
        };

        self.report_evicted(evicted).await?;
        Ok(Some(shown))
    }

    /// Write a resolution over `local`. Caller holds the record lock.
    async fn apply_resolution(
        &self,
        local: Record,
        resolution: Resolution,
    ) -> Result<(Record, Option<DeadLetter>), RepositoryError> {
        let engine = &self.engine;
        crate::metrics::record_merge(&resolution.winner.to_string());

        if resolution.record != local {
            engine.records.put(&resolution.record).await?;
        }

        let mut evicted = None;
        if resolution.republish {
            let now = engine.clock.now_millis();
            let op = SyncOperation::new(OperationType::Update, resolution.record.clone(), now);
            evicted = self.enqueue(op, None).await?;
        } else if resolution.superseded == Some(Side::Local) && local.sync_state.is_pending() {
            if engine.queue.mark_superseded(&local.id).await? {
                engine.emit(SyncEvent::Superseded {
                    record_id: local.id.clone(),
                });
            }
        } else if local.sync_state == SyncState::Conflicted && resolution.winner == Side::Remote {
            info!(record_id = %local.id, "Conflict cleared by remote copy");
        }

        Ok((resolution.record, evicted))
    }
}

enum DirectWrite {
    Landed,
    Failed(RemoteErrorKind),
    /// Not attempted: write-through off, breaker open or a pending entry
    Skipped,
}

fn validate(record: &Record) -> Result<(), RepositoryError> {
    if record.id.trim().is_empty() {
        return Err(RepositoryError::InvalidRecord("id must not be empty".to_string()));
    }
    if record.owner_id.trim().is_empty() {
        return Err(RepositoryError::InvalidRecord(format!(
            "owner_id must not be empty (record '{}')",
            record.id
        )));
    }
    Ok(())
}

fn offline(filter: &RecordFilter, local: Vec<Record>) -> RecordSet {
    crate::metrics::record_read(true);
    RecordSet {
        records: filter.apply(local),
        is_offline: true,
    }
}
