// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Typed [`Record`] access over a raw [`LocalStore`].
//!
//! Every record lives under `record/<id>` as JSON. A value that no longer
//! decodes is reported as [`StorageError::Corruption`]; it is never skipped,
//! since silently dropping a user's test result is worse than failing loudly.

use std::sync::Arc;
use std::time::Instant;

use tracing::error;

use super::traits::{LocalStore, StorageError};
use crate::record::Record;

pub const RECORD_PREFIX: &str = "record/";

pub fn record_key(id: &str) -> String {
    format!("{}{}", RECORD_PREFIX, id)
}

#[derive(Clone)]
pub struct LocalRecords {
    store: Arc<dyn LocalStore>,
}

impl LocalRecords {
    pub fn new(store: Arc<dyn LocalStore>) -> Self {
        Self { store }
    }

    pub async fn get(&self, id: &str) -> Result<Option<Record>, StorageError> {
        let key = record_key(id);
        match self.store.get(&key).await {
            Ok(Some(bytes)) => decode(&key, &bytes).map(Some),
            Ok(None) => Ok(None),
            Err(e) => {
                crate::metrics::record_local_error("get");
                Err(e)
            }
        }
    }

    pub async fn put(&self, record: &Record) -> Result<(), StorageError> {
        let key = record_key(&record.id);
        let bytes = serde_json::to_vec(record).map_err(|e| StorageError::Encoding {
            key: key.clone(),
            reason: e.to_string(),
        })?;

        let start = Instant::now();
        let result = self.store.put(&key, &bytes).await;
        crate::metrics::record_local_write(start.elapsed());

        if let Err(e) = &result {
            error!(record_id = %record.id, error = %e, "Local record write failed");
            crate::metrics::record_local_error("put");
        }
        result
    }

    pub async fn remove(&self, id: &str) -> Result<(), StorageError> {
        let result = self.store.delete(&record_key(id)).await;
        if let Err(e) = &result {
            error!(record_id = %id, error = %e, "Local record delete failed");
            crate::metrics::record_local_error("delete");
        }
        result
    }

    /// Every stored record for `owner_id`, tombstones included.
    pub async fn list_owner(&self, owner_id: &str) -> Result<Vec<Record>, StorageError> {
        Ok(self
            .list_all()
            .await?
            .into_iter()
            .filter(|r| r.owner_id == owner_id)
            .collect())
    }

    /// Every stored record, ordered by id.
    pub async fn list_all(&self) -> Result<Vec<Record>, StorageError> {
        let entries = self.store.list_by_prefix(RECORD_PREFIX).await.map_err(|e| {
            crate::metrics::record_local_error("list");
            e
        })?;
        entries.iter().map(|(key, bytes)| decode(key, bytes)).collect()
    }
}

fn decode(key: &str, bytes: &[u8]) -> Result<Record, StorageError> {
    serde_json::from_slice(bytes).map_err(|e| StorageError::Corruption {
        key: key.to_string(),
        reason: e.to_string(),
    })
}
