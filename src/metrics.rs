// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics instrumentation.
//!
//! Uses the `metrics` crate for backend-agnostic collection; the host
//! application chooses the exporter.
//!
//! # Metric Naming Convention
//! - `typing_sync_` prefix for all metrics
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Labels
//! - `operation`: create, update, delete, get, list
//! - `outcome`: success, transient, permanent, not_found, rejected, ...

use metrics::{counter, gauge, histogram};
use std::time::{Duration, Instant};

/// Record a remote store call and how it ended
pub fn record_remote_call(operation: &str, outcome: &str) {
    counter!(
        "typing_sync_remote_calls_total",
        "operation" => operation.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Record remote call latency
pub fn record_remote_latency(operation: &str, duration: Duration) {
    histogram!(
        "typing_sync_remote_call_seconds",
        "operation" => operation.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Record local store write latency
pub fn record_local_write(duration: Duration) {
    histogram!("typing_sync_local_write_seconds").record(duration.as_secs_f64());
}

/// Record a failed local store operation (always fatal to the caller)
pub fn record_local_error(operation: &str) {
    counter!(
        "typing_sync_local_errors_total",
        "operation" => operation.to_string()
    )
    .increment(1);
}

/// Set pending sync queue depth
pub fn set_queue_depth(count: usize) {
    gauge!("typing_sync_queue_depth").set(count as f64);
}

/// Set retained dead-letter count
pub fn set_dead_letters(count: usize) {
    gauge!("typing_sync_dead_letters").set(count as f64);
}

/// Record a queue insertion (`fresh` or `coalesced`)
pub fn record_enqueue(kind: &str) {
    counter!(
        "typing_sync_enqueued_total",
        "kind" => kind.to_string()
    )
    .increment(1);
}

/// Record the fate of one drained operation
pub fn record_drain_outcome(outcome: &str) {
    counter!(
        "typing_sync_drain_outcomes_total",
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Record drain pass duration
pub fn record_drain_duration(duration: Duration) {
    histogram!("typing_sync_drain_seconds").record(duration.as_secs_f64());
}

/// Record a dead-lettered operation
pub fn record_dead_letter(reason: &str) {
    counter!(
        "typing_sync_dead_lettered_total",
        "reason" => reason.to_string()
    )
    .increment(1);
}

/// Set circuit breaker state (0 = closed, 1 = half-open, 2 = open)
pub fn set_circuit_state(circuit: &str, state: u8) {
    gauge!(
        "typing_sync_circuit_breaker_state",
        "circuit" => circuit.to_string()
    )
    .set(state as f64);
}

/// Record circuit breaker call outcome
pub fn record_circuit_call(circuit: &str, outcome: &str) {
    counter!(
        "typing_sync_circuit_breaker_calls_total",
        "circuit" => circuit.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Record an owner read and whether it was served offline
pub fn record_read(offline: bool) {
    let source = if offline { "local" } else { "merged" };
    counter!(
        "typing_sync_reads_total",
        "source" => source
    )
    .increment(1);
}

/// Record a conflict resolution outcome (`local`, `remote`, `identical`)
pub fn record_merge(winner: &str) {
    counter!(
        "typing_sync_merges_total",
        "winner" => winner.to_string()
    )
    .increment(1);
}

/// A timing guard that records remote latency on drop
pub struct LatencyTimer {
    operation: &'static str,
    start: Instant,
}

impl LatencyTimer {
    pub fn new(operation: &'static str) -> Self {
        Self {
            operation,
            start: Instant::now(),
        }
    }
}

impl Drop for LatencyTimer {
    fn drop(&mut self) {
        record_remote_latency(self.operation, self.start.elapsed());
    }
}
