// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Storage contracts consumed by the engine.
//!
//! - [`LocalStore`]: durable key/value persistence on the device. Failures
//!   are fatal; there is no retry path beneath it.
//! - [`RemoteStore`]: networked document store. Every call returns a tagged
//!   [`RemoteError`] so callers branch on [`RemoteErrorKind`] instead of
//!   unwinding through an error hierarchy.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::record::{Record, RecordFilter};

/// Local store failure. Never retried.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Local storage backend error: {0}")]
    Backend(String),
    #[error("Corrupted value at '{key}': {reason}")]
    Corruption { key: String, reason: String },
    #[error("Failed to encode value for '{key}': {reason}")]
    Encoding { key: String, reason: String },
}

/// Classification of a remote failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteErrorKind {
    /// The call did not finish within the caller's timeout
    Timeout,
    /// Network down or 5xx-equivalent
    Unavailable,
    RateLimited,
    /// Validation rejection
    Rejected,
    /// The backend refuses to resolve a conflicting write
    Conflict,
    NotFound,
}

impl RemoteErrorKind {
    /// Worth retrying with backoff.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout | Self::Unavailable | Self::RateLimited)
    }

    /// Retrying cannot help; the data is the problem, not the backend.
    #[must_use]
    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::Rejected | Self::Conflict)
    }

    /// Label for logs and metrics.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::Unavailable => "unavailable",
            Self::RateLimited => "rate_limited",
            Self::Rejected => "rejected",
            Self::Conflict => "conflict",
            Self::NotFound => "not_found",
        }
    }
}

impl std::fmt::Display for RemoteErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Remote store failure with its classification.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("remote {kind}: {message}")]
pub struct RemoteError {
    pub kind: RemoteErrorKind,
    pub message: String,
}

impl RemoteError {
    pub fn new(kind: RemoteErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn timeout(operation: &str) -> Self {
        Self::new(RemoteErrorKind::Timeout, format!("{} timed out", operation))
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::Unavailable, message)
    }

    pub fn not_found(id: &str) -> Self {
        Self::new(RemoteErrorKind::NotFound, format!("'{}' not found", id))
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::Conflict, message)
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::Rejected, message)
    }
}

/// Owner listing pushed down to the remote store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteQuery {
    pub owner_id: String,
    #[serde(default)]
    pub filter: RecordFilter,
}

impl RemoteQuery {
    pub fn owner(owner_id: impl Into<String>, filter: RecordFilter) -> Self {
        Self {
            owner_id: owner_id.into(),
            filter,
        }
    }
}

/// Durable key/value store on the client device.
#[async_trait]
pub trait LocalStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;
    async fn put(&self, key: &str, value: &[u8]) -> Result<(), StorageError>;
    async fn delete(&self, key: &str) -> Result<(), StorageError>;

    /// All entries whose key starts with `prefix`, sorted by key.
    async fn list_by_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, StorageError>;
}

/// Networked document store holding the canonical copy of each record.
///
/// Implementations return immediately on failure; the engine applies its
/// own timeouts around every call.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Fails with `Conflict` if the id already exists.
    async fn create(&self, doc: &Record) -> Result<(), RemoteError>;
    /// Fails with `NotFound` if the id does not exist.
    async fn update(&self, id: &str, doc: &Record) -> Result<(), RemoteError>;
    async fn get(&self, id: &str) -> Result<Option<Record>, RemoteError>;
    async fn list(&self, query: &RemoteQuery) -> Result<Vec<Record>, RemoteError>;
    /// Fails with `NotFound` if the id does not exist.
    async fn delete(&self, id: &str) -> Result<(), RemoteError>;
}
