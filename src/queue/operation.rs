// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Queued remote writes and their persisted encoding.
//!
//! Entries are stored as a versioned JSON envelope so a restarted process
//! can resume draining:
//!
//! ```text
//! syncq/<record_id>        {"format":1,"operation":{...}}
//! deadletter/<op_id>       {"format":1,"operation":{...},"reason":"...","dead_lettered_at":...}
//! ```
//!
//! A newer format is rejected instead of guessed at.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::record::{Record, SyncState};
use crate::storage::traits::RemoteErrorKind;

/// Current envelope format.
pub const ENVELOPE_FORMAT: u32 = 1;

/// Remote call a queued operation will make.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    Create,
    Update,
    Delete,
}

impl OperationType {
    /// Pending state a local record carries while this operation is queued.
    #[must_use]
    pub fn pending_state(&self) -> SyncState {
        match self {
            Self::Create => SyncState::PendingCreate,
            Self::Update => SyncState::PendingUpdate,
            Self::Delete => SyncState::PendingDelete,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl std::fmt::Display for OperationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A unit of work queued against the remote store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncOperation {
    pub operation_id: String,
    pub record_id: String,
    pub operation_type: OperationType,
    /// The record as it was when enqueued
    pub snapshot: Record,
    pub attempts: u32,
    /// Epoch millis before which the drain leaves this entry alone
    pub next_attempt_at: i64,
    #[serde(default)]
    pub last_error: Option<RemoteErrorKind>,
    /// Assigned by the queue; per-record order never changes
    #[serde(default)]
    pub enqueued_seq: u64,
    /// A newer remote version won a merge; drop without calling the remote
    #[serde(default)]
    pub superseded: bool,
}

impl SyncOperation {
    pub fn new(operation_type: OperationType, snapshot: Record, now: i64) -> Self {
        Self {
            operation_id: Uuid::new_v4().to_string(),
            record_id: snapshot.id.clone(),
            operation_type,
            snapshot,
            attempts: 0,
            next_attempt_at: now,
            last_error: None,
            enqueued_seq: 0,
            superseded: false,
        }
    }

    /// Fold `newer` into this pending operation for the same record.
    ///
    /// `landed` says whether this operation may already have reached the
    /// remote (it was in flight when `newer` arrived). The remote's
    /// `NotFound` answers are forgiving enough that assuming it landed is
    /// always safe.
    #[must_use]
    pub fn coalesce(self, newer: SyncOperation, landed: bool) -> SyncOperation {
        use OperationType::*;

        let operation_type = match (self.operation_type, newer.operation_type) {
            (_, Delete) => Delete,
            _ if landed => Update,
            (Create, _) => Create,
            // The remote still holds the document the delete never removed
            (Delete, Create) => Update,
            (_, latest) => latest,
        };

        SyncOperation {
            operation_id: newer.operation_id,
            record_id: self.record_id,
            operation_type,
            snapshot: newer.snapshot,
            attempts: 0,
            next_attempt_at: newer.next_attempt_at,
            last_error: None,
            enqueued_seq: self.enqueued_seq,
            superseded: false,
        }
    }
}

/// Why an operation left the queue without being confirmed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeadLetterReason {
    RetriesExhausted,
    /// Pushed out by the queue capacity limit
    Evicted,
    /// The remote refused it outright
    Rejected,
}

impl DeadLetterReason {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RetriesExhausted => "retries_exhausted",
            Self::Evicted => "evicted",
            Self::Rejected => "rejected",
        }
    }
}

impl std::fmt::Display for DeadLetterReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An operation removed from the retry path, kept for out-of-band handling.
#[derive(Debug, Clone, PartialEq)]
pub struct DeadLetter {
    pub operation: SyncOperation,
    pub reason: DeadLetterReason,
    pub dead_lettered_at: i64,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("unsupported queue entry format {found} (expected {expected})")]
    UnsupportedFormat { found: u32, expected: u32 },
    #[error("malformed queue entry: {0}")]
    Malformed(String),
}

#[derive(Deserialize)]
struct FormatProbe {
    format: u32,
}

#[derive(Serialize, Deserialize)]
struct OperationEnvelope {
    format: u32,
    operation: SyncOperation,
}

#[derive(Serialize, Deserialize)]
struct DeadLetterEnvelope {
    format: u32,
    operation: SyncOperation,
    reason: DeadLetterReason,
    dead_lettered_at: i64,
}

fn check_format(bytes: &[u8]) -> Result<(), DecodeError> {
    let probe: FormatProbe = serde_json::from_slice(bytes).map_err(|e| DecodeError::Malformed(e.to_string()))?;
    if probe.format != ENVELOPE_FORMAT {
        return Err(DecodeError::UnsupportedFormat {
            found: probe.format,
            expected: ENVELOPE_FORMAT,
        });
    }
    Ok(())
}

pub fn encode_operation(op: &SyncOperation) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(&OperationEnvelope {
        format: ENVELOPE_FORMAT,
        operation: op.clone(),
    })
}

pub fn decode_operation(bytes: &[u8]) -> Result<SyncOperation, DecodeError> {
    check_format(bytes)?;
    let envelope: OperationEnvelope =
        serde_json::from_slice(bytes).map_err(|e| DecodeError::Malformed(e.to_string()))?;
    Ok(envelope.operation)
}

pub fn encode_dead_letter(dead: &DeadLetter) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(&DeadLetterEnvelope {
        format: ENVELOPE_FORMAT,
        operation: dead.operation.clone(),
        reason: dead.reason,
        dead_lettered_at: dead.dead_lettered_at,
    })
}

pub fn decode_dead_letter(bytes: &[u8]) -> Result<DeadLetter, DecodeError> {
    check_format(bytes)?;
    let envelope: DeadLetterEnvelope =
        serde_json::from_slice(bytes).map_err(|e| DecodeError::Malformed(e.to_string()))?;
    Ok(DeadLetter {
        operation: envelope.operation,
        reason: envelope.reason,
        dead_lettered_at: envelope.dead_lettered_at,
    })
}
