//! # Typing Sync
//!
//! Offline-first persistence and sync for a typing-speed trainer.
//!
//! ## Architecture
//!
//! Every write lands on the device first. The remote backend is a best-effort
//! mirror: when it is slow or down, work queues up locally and drains in the
//! background once it recovers.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Hybrid Repository                       │
//! │  • save / delete / get_by_owner / sync_now                 │
//! │  • Local write first, then one direct remote attempt       │
//! │  • Merged reads with conflict resolution                   │
//! └─────────────────────────────────────────────────────────────┘
//!            │                                   │
//!            ▼                                   ▼
//! ┌──────────────────────────┐     ┌──────────────────────────┐
//! │       Local Store        │     │      Circuit Breaker     │
//! │  • Records + tombstones  │     │  • Closed / Open /       │
//! │  • Sync queue entries    │     │    HalfOpen              │
//! │  • Dead letters          │     └──────────────────────────┘
//! │  (memory or SQLite)      │                   │
//! └──────────────────────────┘                   ▼
//!            ▲                     ┌──────────────────────────┐
//!            │                     │       Remote Store       │
//! ┌──────────────────────────┐     │  • create / update /     │
//! │       Sync Engine        │────▶│    get / list / delete   │
//! │  • Timer-driven drain    │     └──────────────────────────┘
//! │  • Backoff with jitter   │
//! │  • Dead-letter on limit  │
//! └──────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use serde_json::json;
//! use typing_sync::{
//!     HybridRepository, InMemoryLocalStore, InMemoryRemoteStore, Record, RecordFilter,
//!     SyncConfig, SystemClock,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), typing_sync::RepositoryError> {
//!     let repo = HybridRepository::open(
//!         Arc::new(InMemoryLocalStore::new()),
//!         Arc::new(InMemoryRemoteStore::new()),
//!         Arc::new(SystemClock),
//!         SyncConfig::default(),
//!     )
//!     .await?;
//!     repo.start().await;
//!
//!     repo.save(Record::test_result("run-1", "alice", json!({ "wpm": 82, "accuracy": 0.97 })))
//!         .await?;
//!
//!     let results = repo.get_by_owner("alice", &RecordFilter::default()).await?;
//!     println!("{} results (offline: {})", results.len(), results.is_offline);
//!
//!     repo.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - **Local-first writes**: a save returns once the device copy is durable
//! - **Coalescing queue**: at most one pending operation per record, persisted
//! - **Circuit breaker**: stops hammering a backend that is down
//! - **Backoff with jitter**: exponential retry delays, capped, then dead letters
//! - **Conflict resolution**: version or timestamp wins, payloads merge
//!
//! ## Configuration
//!
//! See [`SyncConfig`] for all configuration options.
//!
//! ## Modules
//!
//! - [`repository`]: The [`HybridRepository`] the application talks to
//! - [`engine`]: The [`SyncEngine`] draining the queue
//! - [`queue`]: Persistent, coalescing sync queue and dead letters
//! - [`resolver`]: Local/remote conflict resolution
//! - [`storage`]: Store contracts plus memory and SQLite backends
//! - [`resilience`]: Circuit breaker and retry policy

pub mod clock;
pub mod config;
pub mod engine;
pub mod metrics;
pub mod queue;
pub mod record;
pub mod repository;
pub mod resilience;
pub mod resolver;
pub mod storage;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{OverflowPolicy, SyncConfig};
pub use engine::{EngineState, SyncEngine, SyncEvent, SyncStatus, SyncSummary, SyncWorker};
pub use metrics::LatencyTimer;
pub use queue::{DeadLetter, DeadLetterReason, OperationType, QueueError, SyncOperation, SyncQueue};
pub use record::{Record, RecordFilter, RecordKind, RecordSet, SyncState};
pub use repository::{HybridRepository, RepositoryError};
pub use resilience::circuit_breaker::{BreakerSnapshot, BreakerStatus, CircuitBreaker, CircuitConfig};
pub use resilience::retry::RetryConfig;
pub use storage::memory::{InMemoryLocalStore, InMemoryRemoteStore};
pub use storage::sqlite::SqliteLocalStore;
pub use storage::traits::{LocalStore, RemoteError, RemoteErrorKind, RemoteQuery, RemoteStore, StorageError};
