// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Record data model.
//!
//! A [`Record`] is either a finished typing-test result or a preferences
//! document. The payload is opaque to the engine; only `version`,
//! `updated_at` and `sync_state` drive persistence decisions.
//!
//! # Example
//!
//! ```
//! use typing_sync::{Record, RecordKind, SyncState};
//! use serde_json::json;
//!
//! let record = Record::test_result("t1", "alice", json!({"wpm": 80, "accuracy": 0.97}));
//!
//! assert_eq!(record.kind, RecordKind::TestResult);
//! assert_eq!(record.version, 0);
//! assert_eq!(record.sync_state, SyncState::PendingCreate);
//! assert_eq!(record.payload["wpm"], 80);
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// What a record holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    /// Append-only typing-test metrics; immutable once created.
    TestResult,
    /// Per-user settings; last writer by `updated_at` wins.
    Preferences,
}

impl std::fmt::Display for RecordKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TestResult => write!(f, "test_result"),
            Self::Preferences => write!(f, "preferences"),
        }
    }
}

/// Where a record stands relative to the remote store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    Synced,
    PendingCreate,
    PendingUpdate,
    /// Local tombstone waiting for the remote delete to be confirmed.
    PendingDelete,
    /// Could not be reconciled automatically (dead-lettered or rejected).
    Conflicted,
}

impl SyncState {
    #[must_use]
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::PendingCreate | Self::PendingUpdate | Self::PendingDelete)
    }
}

impl std::fmt::Display for SyncState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Synced => write!(f, "synced"),
            Self::PendingCreate => write!(f, "pending_create"),
            Self::PendingUpdate => write!(f, "pending_update"),
            Self::PendingDelete => write!(f, "pending_delete"),
            Self::Conflicted => write!(f, "conflicted"),
        }
    }
}

/// A typing-test result or a preferences document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Stable id, client- or server-assigned
    pub id: String,
    pub owner_id: String,
    pub kind: RecordKind,
    /// Domain fields (wpm, accuracy, theme, ...)
    #[serde(default)]
    pub payload: Map<String, Value>,
    /// Monotonic, bumped on every local mutation
    pub version: u64,
    /// Logical timestamp (epoch millis)
    pub updated_at: i64,
    pub sync_state: SyncState,
}

impl Record {
    /// Create a record of the given kind. Non-object payloads are stored
    /// under a single `value` key.
    pub fn new(
        id: impl Into<String>,
        owner_id: impl Into<String>,
        kind: RecordKind,
        payload: Value,
    ) -> Self {
        let payload = match payload {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                let mut map = Map::new();
                map.insert("value".to_string(), other);
                map
            }
        };
        Self {
            id: id.into(),
            owner_id: owner_id.into(),
            kind,
            payload,
            version: 0,
            updated_at: 0,
            sync_state: SyncState::PendingCreate,
        }
    }

    pub fn test_result(id: impl Into<String>, owner_id: impl Into<String>, payload: Value) -> Self {
        Self::new(id, owner_id, RecordKind::TestResult, payload)
    }

    pub fn preferences(id: impl Into<String>, owner_id: impl Into<String>, payload: Value) -> Self {
        Self::new(id, owner_id, RecordKind::Preferences, payload)
    }

    #[must_use]
    pub fn with_version(mut self, version: u64) -> Self {
        self.version = version;
        self
    }

    #[must_use]
    pub fn with_updated_at(mut self, updated_at: i64) -> Self {
        self.updated_at = updated_at;
        self
    }

    #[must_use]
    pub fn with_sync_state(mut self, sync_state: SyncState) -> Self {
        self.sync_state = sync_state;
        self
    }

    /// True for local tombstones that must not show up in reads.
    #[must_use]
    pub fn is_tombstone(&self) -> bool {
        self.sync_state == SyncState::PendingDelete
    }
}

/// Caller-supplied narrowing for owner listings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordFilter {
    #[serde(default)]
    pub kind: Option<RecordKind>,
    /// Only records with `updated_at >= updated_since`
    #[serde(default)]
    pub updated_since: Option<i64>,
    #[serde(default)]
    pub limit: Option<usize>,
}

impl RecordFilter {
    #[must_use]
    pub fn kind(kind: RecordKind) -> Self {
        Self {
            kind: Some(kind),
            ..Default::default()
        }
    }

    /// Check a single record against the kind and time bounds.
    #[must_use]
    pub fn matches(&self, record: &Record) -> bool {
        if let Some(kind) = self.kind {
            if record.kind != kind {
                return false;
            }
        }
        if let Some(since) = self.updated_since {
            if record.updated_at < since {
                return false;
            }
        }
        true
    }

    /// Filter, order (newest first, then by id) and truncate.
    pub fn apply(&self, records: impl IntoIterator<Item = Record>) -> Vec<Record> {
        let mut out: Vec<Record> = records.into_iter().filter(|r| self.matches(r)).collect();
        out.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then_with(|| a.id.cmp(&b.id)));
        if let Some(limit) = self.limit {
            out.truncate(limit);
        }
        out
    }
}

/// Result of an owner listing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordSet {
    pub records: Vec<Record>,
    /// Set when the remote store was skipped or unreachable and only the
    /// local view is returned.
    pub is_offline: bool,
}

impl RecordSet {
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    #[must_use]
    pub fn find(&self, id: &str) -> Option<&Record> {
        self.records.iter().find(|r| r.id == id)
    }
}
