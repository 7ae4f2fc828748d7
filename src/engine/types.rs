// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Public types for the sync engine.

use crate::queue::{DeadLetterReason, OperationType};
use crate::resilience::circuit_breaker::BreakerStatus;
use crate::storage::traits::RemoteErrorKind;

/// Engine lifecycle state.
///
/// Use [`super::SyncEngine::state()`] to check the current state or
/// [`super::SyncEngine::state_receiver()`] to watch for changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Built, background loop not started (manual `sync_now` still works)
    Created,
    /// Background loop draining on its interval
    Running,
    /// Shutdown requested; the in-flight batch is finishing
    ShuttingDown,
    /// Background loop exited
    Stopped,
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "Created"),
            Self::Running => write!(f, "Running"),
            Self::ShuttingDown => write!(f, "ShuttingDown"),
            Self::Stopped => write!(f, "Stopped"),
        }
    }
}

/// Counts from one drain pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncSummary {
    /// Entries taken from the queue
    pub attempted: usize,
    pub confirmed: usize,
    /// Transient failure, scheduled for another attempt
    pub requeued: usize,
    pub dead_lettered: usize,
    /// Permanent failure, record marked `Conflicted`
    pub conflicted: usize,
    /// Dropped without a remote call because newer remote state won
    pub superseded: usize,
    /// The pass did not run because the breaker was open
    pub skipped_breaker_open: bool,
}

impl SyncSummary {
    /// Nothing was left unresolved by this pass
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.requeued == 0 && self.dead_lettered == 0 && self.conflicted == 0 && !self.skipped_breaker_open
    }

    pub(super) fn count(&mut self, outcome: &DrainOutcome) {
        match outcome {
            DrainOutcome::Confirmed => self.confirmed += 1,
            DrainOutcome::Requeued => self.requeued += 1,
            DrainOutcome::DeadLettered => self.dead_lettered += 1,
            DrainOutcome::Conflicted => self.conflicted += 1,
            DrainOutcome::Superseded => self.superseded += 1,
            DrainOutcome::Stale | DrainOutcome::Refused => {}
        }
    }
}

/// Snapshot for `get_sync_status`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncStatus {
    pub pending_count: usize,
    pub dead_letter_count: usize,
    /// Epoch millis of the last drain pass that reached the remote
    pub last_sync_at: Option<i64>,
    pub breaker_status: BreakerStatus,
    pub engine_state: EngineState,
}

/// What happened to one drained entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    Confirmed,
    Requeued,
    DeadLettered,
    Conflicted,
    Superseded,
    /// The entry was replaced while its call was in flight
    Stale,
    /// The breaker refused the call; the entry went back untouched
    Refused,
}

impl DrainOutcome {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Confirmed => "confirmed",
            Self::Requeued => "requeued",
            Self::DeadLettered => "dead_lettered",
            Self::Conflicted => "conflicted",
            Self::Superseded => "superseded",
            Self::Stale => "stale",
            Self::Refused => "refused",
        }
    }
}

/// Diagnostic events for external logging and UI badges.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    Confirmed {
        record_id: String,
        operation: OperationType,
        version: u64,
    },
    Requeued {
        record_id: String,
        attempts: u32,
        next_attempt_at: i64,
        error: RemoteErrorKind,
    },
    DeadLettered {
        record_id: String,
        operation_id: String,
        reason: DeadLetterReason,
        attempts: u32,
    },
    /// Permanent remote failure; the record needs reconciliation
    Conflicted {
        record_id: String,
        error: RemoteErrorKind,
    },
    /// A pending local write lost to newer remote state
    Superseded { record_id: String },
    /// The queue pushed an entry out to make room
    Evicted { record_id: String },
    BreakerChanged {
        from: BreakerStatus,
        to: BreakerStatus,
    },
}
