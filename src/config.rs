//! Configuration for the sync engine and hybrid repository.
//!
//! Resolved once by the composition root and passed down; nothing in the
//! core reads the environment.
//!
//! # Example
//!
//! ```
//! use typing_sync::{OverflowPolicy, SyncConfig};
//!
//! // Minimal config (uses defaults)
//! let config = SyncConfig::default();
//! assert_eq!(config.sync_interval_ms, 30_000);
//! assert_eq!(config.max_retries, 3);
//!
//! // Partial JSON, the rest defaulted
//! let config = SyncConfig::from_json(r#"{
//!     "write_through": false,
//!     "overflow_policy": "reject",
//!     "circuit": { "failure_threshold": 2, "cool_down": 5000 }
//! }"#).unwrap();
//! assert!(!config.write_through);
//! assert_eq!(config.overflow_policy, OverflowPolicy::Reject);
//! assert_eq!(config.circuit.failure_threshold, 2);
//! assert_eq!(config.drain_batch_size, 50);
//! ```

use std::time::Duration;

use serde::Deserialize;

use crate::resilience::circuit_breaker::CircuitConfig;
use crate::resilience::retry::RetryConfig;

/// What the sync queue does when a new record would exceed `max_queue_size`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Dead-letter the oldest pending entry to make room
    #[default]
    EvictOldest,
    /// Refuse the save before anything is written locally
    Reject,
}

/// Configuration for the sync engine.
///
/// All fields have sensible defaults.
#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    /// Background drain interval
    #[serde(default = "default_sync_interval_ms")]
    pub sync_interval_ms: u64,

    /// Max queue entries attempted per drain pass
    #[serde(default = "default_drain_batch_size")]
    pub drain_batch_size: usize,

    /// Failed attempts before an operation is dead-lettered
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Backoff schedule: base * 2^attempts, capped, ±jitter
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
    #[serde(default = "default_backoff_jitter")]
    pub backoff_jitter: f64,

    /// Timeout for the best-effort remote write inside `save`
    #[serde(default = "default_write_timeout_ms")]
    pub write_timeout_ms: u64,

    /// Timeout for the remote listing inside `get_by_owner`
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,

    /// Timeout for each remote call made while draining
    #[serde(default = "default_remote_timeout_ms")]
    pub remote_timeout_ms: u64,

    /// Attempt the remote write synchronously inside `save`.
    /// When false every save goes through the queue.
    #[serde(default = "default_write_through")]
    pub write_through: bool,

    /// Sync queue capacity (pending records)
    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: usize,

    /// Dead letters retained before the oldest are dropped
    #[serde(default = "default_max_dead_letters")]
    pub max_dead_letters: usize,

    #[serde(default)]
    pub overflow_policy: OverflowPolicy,

    #[serde(default)]
    pub circuit: CircuitConfig,

    /// SQLite file for the durable local store (None = in-memory)
    #[serde(default)]
    pub local_db_path: Option<String>,

    /// Capacity of the sync event broadcast channel
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

fn default_sync_interval_ms() -> u64 { 30_000 }
fn default_drain_batch_size() -> usize { 50 }
fn default_max_retries() -> u32 { 3 }
fn default_backoff_base_ms() -> u64 { 1_000 }
fn default_backoff_max_ms() -> u64 { 300_000 } // 5 min
fn default_backoff_jitter() -> f64 { 0.25 }
fn default_write_timeout_ms() -> u64 { 1_500 }
fn default_read_timeout_ms() -> u64 { 3_000 }
fn default_remote_timeout_ms() -> u64 { 10_000 }
fn default_write_through() -> bool { true }
fn default_max_queue_size() -> usize { 10_000 }
fn default_max_dead_letters() -> usize { 1_000 }
fn default_event_buffer() -> usize { 256 }

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            sync_interval_ms: default_sync_interval_ms(),
            drain_batch_size: default_drain_batch_size(),
            max_retries: default_max_retries(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            backoff_jitter: default_backoff_jitter(),
            write_timeout_ms: default_write_timeout_ms(),
            read_timeout_ms: default_read_timeout_ms(),
            remote_timeout_ms: default_remote_timeout_ms(),
            write_through: default_write_through(),
            max_queue_size: default_max_queue_size(),
            max_dead_letters: default_max_dead_letters(),
            overflow_policy: OverflowPolicy::default(),
            circuit: CircuitConfig::default(),
            local_db_path: None,
            event_buffer: default_event_buffer(),
        }
    }
}

impl SyncConfig {
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Backoff schedule for queued operations.
    #[must_use]
    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            initial_delay: Duration::from_millis(self.backoff_base_ms),
            max_delay: Duration::from_millis(self.backoff_max_ms),
            factor: 2.0,
            max_retries: Some(self.max_retries as usize),
            jitter: self.backoff_jitter,
        }
    }

    #[must_use]
    pub fn sync_interval(&self) -> Duration {
        Duration::from_millis(self.sync_interval_ms.max(1))
    }

    #[must_use]
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    #[must_use]
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    #[must_use]
    pub fn remote_timeout(&self) -> Duration {
        Duration::from_millis(self.remote_timeout_ms)
    }
}
