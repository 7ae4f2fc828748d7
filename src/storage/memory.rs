// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! In-memory stores.
//!
//! [`InMemoryLocalStore`] backs tests and ephemeral sessions.
//! [`InMemoryRemoteStore`] is the mock backend a composition root can pick
//! instead of a real networked store; it can simulate outages, latency and
//! one-off failures.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;

use super::traits::{LocalStore, RemoteError, RemoteErrorKind, RemoteQuery, RemoteStore, StorageError};
use crate::record::{Record, SyncState};

pub struct InMemoryLocalStore {
    data: DashMap<String, Vec<u8>>,
    fail_writes: AtomicBool,
}

impl InMemoryLocalStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            data: DashMap::new(),
            fail_writes: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Make every write fail, as a full disk would.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::Release);
    }

    fn check_writable(&self) -> Result<(), StorageError> {
        if self.fail_writes.load(Ordering::Acquire) {
            return Err(StorageError::Backend("simulated write failure (disk full)".to_string()));
        }
        Ok(())
    }
}

impl Default for InMemoryLocalStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LocalStore for InMemoryLocalStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.data.get(key).map(|r| r.value().clone()))
    }

    async fn put(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        self.check_writable()?;
        self.data.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.check_writable()?;
        self.data.remove(key);
        Ok(())
    }

    async fn list_by_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, StorageError> {
        let mut entries: Vec<(String, Vec<u8>)> = self
            .data
            .iter()
            .filter(|e| e.key().starts_with(prefix))
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(entries)
    }
}

/// Mock remote document store with fault injection.
pub struct InMemoryRemoteStore {
    docs: DashMap<String, Record>,
    outage: Mutex<Option<RemoteErrorKind>>,
    /// One-off failures consumed before the outage check
    scripted: Mutex<Option<(RemoteErrorKind, u32)>>,
    latency_ms: AtomicU64,
    calls: AtomicU32,
}

impl InMemoryRemoteStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            docs: DashMap::new(),
            outage: Mutex::new(None),
            scripted: Mutex::new(None),
            latency_ms: AtomicU64::new(0),
            calls: AtomicU32::new(0),
        }
    }

    /// Fail every call with `kind` until cleared with `None`.
    pub fn set_outage(&self, kind: Option<RemoteErrorKind>) {
        *self.outage.lock() = kind;
    }

    /// Fail the next `times` calls with `kind`.
    pub fn fail_next(&self, kind: RemoteErrorKind, times: u32) {
        *self.scripted.lock() = if times == 0 { None } else { Some((kind, times)) };
    }

    /// Delay every call, to exercise caller timeouts.
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms.store(latency.as_millis() as u64, Ordering::Release);
    }

    /// Total calls received, including failed ones.
    #[must_use]
    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.docs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    /// Direct read that bypasses fault injection.
    #[must_use]
    pub fn snapshot(&self, id: &str) -> Option<Record> {
        self.docs.get(id).map(|r| r.value().clone())
    }

    /// Seed a document as if another device had written it.
    pub fn insert(&self, record: Record) {
        self.docs.insert(record.id.clone(), record.with_sync_state(SyncState::Synced));
    }

    async fn enter(&self, operation: &str) -> Result<(), RemoteError> {
        self.calls.fetch_add(1, Ordering::AcqRel);

        let latency = self.latency_ms.load(Ordering::Acquire);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }

        {
            let mut scripted = self.scripted.lock();
            if let Some((kind, remaining)) = *scripted {
                *scripted = if remaining > 1 { Some((kind, remaining - 1)) } else { None };
                return Err(RemoteError::new(kind, format!("injected failure on {}", operation)));
            }
        }

        if let Some(kind) = *self.outage.lock() {
            return Err(RemoteError::new(kind, format!("simulated outage on {}", operation)));
        }
        Ok(())
    }
}

impl Default for InMemoryRemoteStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteStore for InMemoryRemoteStore {
    async fn create(&self, doc: &Record) -> Result<(), RemoteError> {
        self.enter("create").await?;
        match self.docs.entry(doc.id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                Err(RemoteError::conflict(format!("'{}' already exists", doc.id)))
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(doc.clone().with_sync_state(SyncState::Synced));
                Ok(())
            }
        }
    }

    async fn update(&self, id: &str, doc: &Record) -> Result<(), RemoteError> {
        self.enter("update").await?;
        match self.docs.get_mut(id) {
            Some(mut existing) => {
                *existing = doc.clone().with_sync_state(SyncState::Synced);
                Ok(())
            }
            None => Err(RemoteError::not_found(id)),
        }
    }

    async fn get(&self, id: &str) -> Result<Option<Record>, RemoteError> {
        self.enter("get").await?;
        Ok(self.docs.get(id).map(|r| r.value().clone()))
    }

    async fn list(&self, query: &RemoteQuery) -> Result<Vec<Record>, RemoteError> {
        self.enter("list").await?;
        let owned = self
            .docs
            .iter()
            .filter(|r| r.value().owner_id == query.owner_id)
            .map(|r| r.value().clone())
            .collect::<Vec<_>>();
        Ok(query.filter.apply(owned))
    }

    async fn delete(&self, id: &str) -> Result<(), RemoteError> {
        self.enter("delete").await?;
        match self.docs.remove(id) {
            Some(_) => Ok(()),
            None => Err(RemoteError::not_found(id)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::RecordFilter;
    use serde_json::json;
    use std::sync::Arc;

    fn doc(id: &str, owner: &str) -> Record {
        Record::test_result(id, owner, json!({"wpm": 60})).with_version(1)
    }

    #[tokio::test]
    async fn test_local_put_get_delete() {
        let store = InMemoryLocalStore::new();
        assert!(store.is_empty());

        store.put("k1", b"v1").await.unwrap();
        assert_eq!(store.get("k1").await.unwrap(), Some(b"v1".to_vec()));
        assert_eq!(store.len(), 1);

        store.delete("k1").await.unwrap();
        assert!(store.get("k1").await.unwrap().is_none());

        // Deleting a missing key is fine
        store.delete("k1").await.unwrap();
    }

    #[tokio::test]
    async fn test_local_list_by_prefix_sorted() {
        let store = InMemoryLocalStore::new();
        store.put("record/b", b"2").await.unwrap();
        store.put("record/a", b"1").await.unwrap();
        store.put("syncq/a", b"x").await.unwrap();

        let entries = store.list_by_prefix("record/").await.unwrap();
        let keys: Vec<&str> = entries.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["record/a", "record/b"]);
    }

    #[tokio::test]
    async fn test_local_fail_writes() {
        let store = InMemoryLocalStore::new();
        store.put("k", b"v").await.unwrap();
        store.fail_writes(true);

        assert!(store.put("k2", b"v").await.is_err());
        assert!(store.delete("k").await.is_err());
        // Reads still work
        assert!(store.get("k").await.unwrap().is_some());

        store.fail_writes(false);
        store.put("k2", b"v").await.unwrap();
    }

    #[tokio::test]
    async fn test_remote_create_conflicts_on_existing() {
        let remote = InMemoryRemoteStore::new();
        remote.create(&doc("t1", "alice")).await.unwrap();

        let err = remote.create(&doc("t1", "alice")).await.unwrap_err();
        assert_eq!(err.kind, RemoteErrorKind::Conflict);
        assert_eq!(remote.len(), 1);
    }

    #[tokio::test]
    async fn test_remote_update_and_delete_missing() {
        let remote = InMemoryRemoteStore::new();

        let err = remote.update("nope", &doc("nope", "a")).await.unwrap_err();
        assert_eq!(err.kind, RemoteErrorKind::NotFound);

        let err = remote.delete("nope").await.unwrap_err();
        assert_eq!(err.kind, RemoteErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_remote_stores_as_synced() {
        let remote = InMemoryRemoteStore::new();
        remote.create(&doc("t1", "alice")).await.unwrap();

        let stored = remote.get("t1").await.unwrap().unwrap();
        assert_eq!(stored.sync_state, SyncState::Synced);
    }

    #[tokio::test]
    async fn test_remote_list_filters_by_owner() {
        let remote = InMemoryRemoteStore::new();
        remote.insert(doc("a", "alice"));
        remote.insert(doc("b", "bob"));
        remote.insert(doc("c", "alice"));

        let listed = remote
            .list(&RemoteQuery::owner("alice", RecordFilter::default()))
            .await
            .unwrap();
        assert_eq!(listed.len(), 2);
        assert!(listed.iter().all(|r| r.owner_id == "alice"));
    }

    #[tokio::test]
    async fn test_remote_outage_and_scripted_failures() {
        let remote = InMemoryRemoteStore::new();

        remote.fail_next(RemoteErrorKind::RateLimited, 2);
        assert_eq!(remote.get("x").await.unwrap_err().kind, RemoteErrorKind::RateLimited);
        assert_eq!(remote.get("x").await.unwrap_err().kind, RemoteErrorKind::RateLimited);
        assert!(remote.get("x").await.is_ok());

        remote.set_outage(Some(RemoteErrorKind::Unavailable));
        assert_eq!(remote.get("x").await.unwrap_err().kind, RemoteErrorKind::Unavailable);
        remote.set_outage(None);
        assert!(remote.get("x").await.is_ok());

        assert_eq!(remote.call_count(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_remote_latency_trips_caller_timeout() {
        let remote = InMemoryRemoteStore::new();
        remote.set_latency(Duration::from_secs(5));

        let result = tokio::time::timeout(Duration::from_secs(1), remote.get("x")).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_concurrent_local_access() {
        let store = Arc::new(InMemoryLocalStore::new());
        let mut handles = vec![];

        for batch in 0..10 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                for i in 0..10 {
                    let key = format!("batch-{}-item-{}", batch, i);
                    store.put(&key, b"x").await.unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(store.len(), 100);
    }
}
