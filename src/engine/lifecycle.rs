// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Background worker: the timer-driven drain loop and its shutdown.
//!
//! Shutdown is cooperative. A pass that has started runs to completion
//! (its remote calls finish or hit their timeout); no new pass starts.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::{EngineState, SyncEngine};

/// Handle to a running drain loop.
pub struct SyncWorker {
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
    engine: Arc<SyncEngine>,
}

impl SyncWorker {
    /// Stop the loop and wait for the in-flight pass, if any.
    #[tracing::instrument(skip(self))]
    pub async fn shutdown(self) {
        info!("Stopping sync worker...");
        self.engine.set_state(EngineState::ShuttingDown);
        let _ = self.shutdown_tx.send(true);

        if let Err(e) = self.handle.await {
            warn!(error = %e, "Sync worker task ended abnormally");
        }
        self.engine.set_state(EngineState::Stopped);
        info!("Sync worker stopped");
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl SyncEngine {
    /// Start the background drain loop on the current tokio runtime.
    ///
    /// The first pass runs immediately, so work persisted by a previous
    /// process resumes at startup.
    pub fn spawn(self: &Arc<Self>) -> SyncWorker {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let engine = Arc::clone(self);
        engine.set_state(EngineState::Running);
        let handle = tokio::spawn(Arc::clone(&engine).run(shutdown_rx));

        SyncWorker {
            shutdown_tx,
            handle,
            engine,
        }
    }

    #[tracing::instrument(skip_all)]
    async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let interval = self.config.sync_interval();
        info!(interval_ms = interval.as_millis() as u64, "Sync worker running");

        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                // Fires on the shutdown signal or when the handle is dropped
                _ = shutdown.changed() => break,

                _ = ticker.tick() => {
                    let summary = self.tick().await;
                    debug!(
                        attempted = summary.attempted,
                        confirmed = summary.confirmed,
                        skipped = summary.skipped_breaker_open,
                        "Scheduled drain pass"
                    );
                }
            }
        }

        debug!("Sync worker loop exited");
    }
}
