// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use thiserror::Error;

use crate::queue::QueueError;
use crate::storage::traits::StorageError;

/// Errors surfaced to callers of the hybrid repository.
///
/// Remote failures never appear here: they turn into queued work and are
/// visible only through the sync status and events.
#[derive(Error, Debug)]
pub enum RepositoryError {
    /// The local store failed. Not retried; a full disk or corrupted store
    /// needs attention.
    #[error("Local store failure: {0}")]
    LocalStore(#[from] StorageError),

    #[error("Sync queue is full ({limit} pending records)")]
    Capacity { limit: usize },

    #[error("Invalid record: {0}")]
    InvalidRecord(String),
}

impl From<QueueError> for RepositoryError {
    fn from(e: QueueError) -> Self {
        match e {
            QueueError::Capacity { limit } => Self::Capacity { limit },
            QueueError::Storage(e) => Self::LocalStore(e),
        }
    }
}
