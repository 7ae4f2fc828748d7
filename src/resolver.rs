// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Conflict resolution between the local and remote copy of a record.
//!
//! Pure functions; no I/O.
//!
//! # Policy
//!
//! | kind          | winner                                                   |
//! |---------------|----------------------------------------------------------|
//! | `TestResult`  | higher `version`; ties go to the remote                  |
//! | `Preferences` | later `updated_at`; ties fall back to the version rule   |
//!
//! When the local copy wins, payload keys it lacks are filled from the
//! remote copy. When the remote wins over a pending local write, that
//! write is reported as superseded so the queue drops it instead of
//! overwriting newer remote state.
//!
//! Versions never go backwards: a winner whose version is not above the
//! loser's is re-stamped at `max + 1` and flagged for republishing.
//!
//! ```
//! use typing_sync::resolver::{merge, resolve, Side};
//! use typing_sync::Record;
//! use serde_json::json;
//!
//! let phone = Record::preferences("prefs", "alice", json!({"theme": "dark"}))
//!     .with_version(1)
//!     .with_updated_at(2_000);
//! let laptop = Record::preferences("prefs", "alice", json!({"theme": "light"}))
//!     .with_version(1)
//!     .with_updated_at(1_000);
//!
//! let resolution = resolve(&phone, &laptop);
//! assert_eq!(resolution.winner, Side::Local);
//! assert_eq!(resolution.superseded, Some(Side::Remote));
//! assert_eq!(resolution.record.payload["theme"], "dark");
//!
//! assert_eq!(merge(&phone, &phone), phone);
//! ```

use std::collections::BTreeMap;

use crate::record::{Record, RecordKind, SyncState};

/// Which copy of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Local,
    Remote,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Local => write!(f, "local"),
            Self::Remote => write!(f, "remote"),
        }
    }
}

/// Outcome of resolving one record.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    /// The canonical record to keep locally
    pub record: Record,
    pub winner: Side,
    /// The losing side, when it held different content
    pub superseded: Option<Side>,
    /// `record` must be pushed to the remote by a fresh update; no pending
    /// local operation carries it
    pub republish: bool,
}

/// Merge two copies of the same record into the canonical one.
///
/// `merge(r, r) == r` for every record.
#[must_use]
pub fn merge(local: &Record, remote: &Record) -> Record {
    resolve(local, remote).record
}

/// Merge two copies of the same record and report how.
#[must_use]
pub fn resolve(local: &Record, remote: &Record) -> Resolution {
    if local == remote {
        return Resolution {
            record: remote.clone(),
            winner: Side::Remote,
            superseded: None,
            republish: false,
        };
    }

    match winner(local, remote) {
        Side::Local => local_wins(local, remote),
        Side::Remote => remote_wins(local, remote),
    }
}

fn winner(local: &Record, remote: &Record) -> Side {
    if local.kind == RecordKind::Preferences && remote.kind == RecordKind::Preferences {
        if local.updated_at > remote.updated_at {
            return Side::Local;
        }
        if local.updated_at < remote.updated_at {
            return Side::Remote;
        }
    }
    if local.version > remote.version {
        Side::Local
    } else {
        Side::Remote
    }
}

fn local_wins(local: &Record, remote: &Record) -> Resolution {
    let mut record = local.clone();
    for (key, value) in &remote.payload {
        record.payload.entry(key.clone()).or_insert_with(|| value.clone());
    }

    // Left for manual reconciliation; never pushed automatically
    if local.sync_state == SyncState::Conflicted {
        return Resolution {
            record,
            winner: Side::Local,
            superseded: Some(Side::Remote),
            republish: false,
        };
    }

    let mut republish = false;
    if record.version <= remote.version {
        record.version = remote.version + 1;
        republish = true;
    }
    if !record.sync_state.is_pending() {
        republish = true;
    }
    if republish {
        record.sync_state = SyncState::PendingUpdate;
    }

    Resolution {
        record,
        winner: Side::Local,
        superseded: Some(Side::Remote),
        republish,
    }
}

fn remote_wins(local: &Record, remote: &Record) -> Resolution {
    let superseded = local.sync_state.is_pending().then_some(Side::Local);

    if remote.version < local.version {
        let record = remote
            .clone()
            .with_version(local.version + 1)
            .with_sync_state(SyncState::PendingUpdate);
        return Resolution {
            record,
            winner: Side::Remote,
            superseded,
            republish: true,
        };
    }

    Resolution {
        record: remote.clone().with_sync_state(SyncState::Synced),
        winner: Side::Remote,
        superseded,
        republish: false,
    }
}

/// One entry of a merged owner view.
#[derive(Debug, Clone, PartialEq)]
pub enum MergeItem {
    LocalOnly(Record),
    RemoteOnly(Record),
    Both { local: Record, resolution: Resolution },
}

impl MergeItem {
    /// The record this entry contributes to the merged view.
    #[must_use]
    pub fn record(&self) -> &Record {
        match self {
            Self::LocalOnly(r) | Self::RemoteOnly(r) => r,
            Self::Both { resolution, .. } => &resolution.record,
        }
    }
}

/// Union two views of one owner's records by id, resolving ids present on
/// both sides. Nothing is dropped. Output is ordered by id.
#[must_use]
pub fn merge_owner_sets(local: Vec<Record>, remote: Vec<Record>) -> Vec<MergeItem> {
    let mut by_id: BTreeMap<String, (Option<Record>, Option<Record>)> = BTreeMap::new();
    for record in local {
        let id = record.id.clone();
        by_id.entry(id).or_default().0 = Some(record);
    }
    for record in remote {
        let id = record.id.clone();
        by_id.entry(id).or_default().1 = Some(record);
    }

    by_id
        .into_values()
        .filter_map(|pair| match pair {
            (Some(local), Some(remote)) => {
                let resolution = resolve(&local, &remote);
                Some(MergeItem::Both { local, resolution })
            }
            (Some(local), None) => Some(MergeItem::LocalOnly(local)),
            (None, Some(remote)) => Some(MergeItem::RemoteOnly(remote.with_sync_state(SyncState::Synced))),
            (None, None) => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn result(version: u64, wpm: u32) -> Record {
        Record::test_result("t1", "alice", json!({ "wpm": wpm }))
            .with_version(version)
            .with_updated_at(1_000)
    }

    fn prefs(version: u64, updated_at: i64, theme: &str) -> Record {
        Record::preferences("p1", "alice", json!({ "theme": theme }))
            .with_version(version)
            .with_updated_at(updated_at)
    }

    #[test]
    fn test_identical_records_merge_to_themselves() {
        for state in [SyncState::Synced, SyncState::PendingCreate, SyncState::Conflicted] {
            let r = result(3, 80).with_sync_state(state);
            assert_eq!(merge(&r, &r), r);
            assert!(!resolve(&r, &r).republish);
        }
    }

    #[test]
    fn test_local_newer_version_wins_and_fills_missing_keys() {
        let mut remote = result(1, 70).with_sync_state(SyncState::Synced);
        remote.payload.insert("accuracy".into(), json!(0.95));
        let local = result(2, 90).with_sync_state(SyncState::PendingUpdate);

        let resolution = resolve(&local, &remote);
        assert_eq!(resolution.winner, Side::Local);
        assert_eq!(resolution.superseded, Some(Side::Remote));
        assert!(!resolution.republish);
        assert_eq!(resolution.record.payload["wpm"], 90);
        assert_eq!(resolution.record.payload["accuracy"], 0.95);
        assert_eq!(resolution.record.version, 2);
        assert_eq!(resolution.record.sync_state, SyncState::PendingUpdate);
    }

    #[test]
    fn test_equal_versions_prefer_remote() {
        let local = result(2, 90).with_sync_state(SyncState::Synced);
        let remote = result(2, 85).with_sync_state(SyncState::Synced);

        let resolution = resolve(&local, &remote);
        assert_eq!(resolution.winner, Side::Remote);
        assert_eq!(resolution.superseded, None);
        assert_eq!(resolution.record.payload["wpm"], 85);
        assert_eq!(resolution.record.sync_state, SyncState::Synced);
    }

    #[test]
    fn test_remote_newer_supersedes_pending_local() {
        let local = result(2, 90).with_sync_state(SyncState::PendingUpdate);
        let remote = result(5, 60).with_sync_state(SyncState::Synced);

        let resolution = resolve(&local, &remote);
        assert_eq!(resolution.winner, Side::Remote);
        assert_eq!(resolution.superseded, Some(Side::Local));
        assert_eq!(resolution.record, remote);
    }

    #[test]
    fn test_later_preferences_win_regardless_of_version() {
        let local = prefs(4, 1_000, "dark").with_sync_state(SyncState::PendingUpdate);
        let remote = prefs(2, 5_000, "light").with_sync_state(SyncState::Synced);

        let resolution = resolve(&local, &remote);
        assert_eq!(resolution.winner, Side::Remote);
        assert_eq!(resolution.superseded, Some(Side::Local));
        assert_eq!(resolution.record.payload["theme"], "light");
        // Never below the local version
        assert_eq!(resolution.record.version, 5);
        assert!(resolution.republish);
    }

    #[test]
    fn test_later_local_preferences_restamp_version() {
        let local = prefs(1, 9_000, "dark").with_sync_state(SyncState::PendingCreate);
        let remote = prefs(3, 1_000, "light").with_sync_state(SyncState::Synced);

        let resolution = resolve(&local, &remote);
        assert_eq!(resolution.winner, Side::Local);
        assert_eq!(resolution.record.version, 4);
        assert_eq!(resolution.record.sync_state, SyncState::PendingUpdate);
        assert!(resolution.republish);
    }

    #[test]
    fn test_preferences_tie_falls_back_to_version() {
        let local = prefs(3, 1_000, "dark").with_sync_state(SyncState::PendingUpdate);
        let remote = prefs(2, 1_000, "light");
        assert_eq!(resolve(&local, &remote).winner, Side::Local);

        let local = prefs(2, 1_000, "dark").with_sync_state(SyncState::PendingUpdate);
        let remote = prefs(2, 1_000, "light");
        assert_eq!(resolve(&local, &remote).winner, Side::Remote);
    }

    #[test]
    fn test_conflicted_local_winner_is_not_republished() {
        let local = result(4, 90).with_sync_state(SyncState::Conflicted);
        let remote = result(1, 70).with_sync_state(SyncState::Synced);

        let resolution = resolve(&local, &remote);
        assert_eq!(resolution.winner, Side::Local);
        assert!(!resolution.republish);
        assert_eq!(resolution.record.sync_state, SyncState::Conflicted);
    }

    #[test]
    fn test_merge_owner_sets_is_a_union() {
        let local = vec![
            Record::test_result("a", "alice", json!({"wpm": 1})).with_sync_state(SyncState::PendingCreate),
            Record::test_result("b", "alice", json!({"wpm": 2})).with_version(2),
        ];
        let remote = vec![
            Record::test_result("b", "alice", json!({"wpm": 2})).with_version(1),
            Record::test_result("c", "alice", json!({"wpm": 3})).with_version(1),
        ];

        let merged = merge_owner_sets(local, remote);
        let ids: Vec<&str> = merged.iter().map(|m| m.record().id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);

        assert!(matches!(merged[0], MergeItem::LocalOnly(_)));
        match &merged[1] {
            MergeItem::Both { resolution, .. } => assert_eq!(resolution.winner, Side::Local),
            other => panic!("expected both, got {:?}", other),
        }
        assert_eq!(merged[2].record().sync_state, SyncState::Synced);
    }
}
