// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Circuit breaker over the remote store.
//!
//! Pure state machine: it never performs I/O itself. Callers ask
//! [`CircuitBreaker::allow_request`] before a remote call and report the
//! outcome with [`CircuitBreaker::record_success`] or
//! [`CircuitBreaker::record_failure`].
//!
//! States:
//! - Closed: normal operation, requests pass through
//! - Open: remote unhealthy, requests fail fast until the cool-down elapses
//! - HalfOpen: probing, at most `half_open_max_probes` requests in flight
//!
//! All transitions happen under one mutex, so the repository's write path
//! and the sync engine's background loop can share a breaker.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use std::time::Duration;
//! use typing_sync::{BreakerStatus, CircuitBreaker, CircuitConfig, ManualClock};
//!
//! let clock = Arc::new(ManualClock::new(0));
//! let config = CircuitConfig { failure_threshold: 2, cool_down: Duration::from_secs(30), half_open_max_probes: 1 };
//! let breaker = CircuitBreaker::new("remote", config, clock.clone());
//!
//! breaker.record_failure();
//! breaker.record_failure();
//! assert_eq!(breaker.status(), BreakerStatus::Open);
//! assert!(!breaker.allow_request());
//!
//! clock.advance(Duration::from_secs(30));
//! assert!(breaker.allow_request()); // probe admitted
//! breaker.record_success();
//! assert_eq!(breaker.status(), BreakerStatus::Closed);
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::clock::Clock;

/// Breaker status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerStatus {
    Closed = 0,
    HalfOpen = 1,
    Open = 2,
}

impl std::fmt::Display for BreakerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::HalfOpen => write!(f, "half_open"),
            Self::Open => write!(f, "open"),
        }
    }
}

/// Configuration for a circuit breaker
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CircuitConfig {
    /// Consecutive failures before opening
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// How long to stay open before probing
    #[serde(default = "default_cool_down", with = "duration_ms")]
    pub cool_down: Duration,
    /// Concurrent probes allowed while half-open
    #[serde(default = "default_half_open_max_probes")]
    pub half_open_max_probes: u32,
}

fn default_failure_threshold() -> u32 { 5 }
fn default_cool_down() -> Duration { Duration::from_secs(30) }
fn default_half_open_max_probes() -> u32 { 1 }

mod duration_ms {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            cool_down: default_cool_down(),
            half_open_max_probes: default_half_open_max_probes(),
        }
    }
}

impl CircuitConfig {
    /// Trips fast, waits long before probing
    #[must_use]
    pub fn aggressive() -> Self {
        Self {
            failure_threshold: 3,
            cool_down: Duration::from_secs(60),
            half_open_max_probes: 1,
        }
    }

    /// Tolerates flaky networks
    #[must_use]
    pub fn lenient() -> Self {
        Self {
            failure_threshold: 10,
            cool_down: Duration::from_secs(15),
            half_open_max_probes: 2,
        }
    }
}

/// Point-in-time view of the breaker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakerSnapshot {
    pub status: BreakerStatus,
    pub consecutive_failures: u32,
    pub opened_at: Option<i64>,
    pub cool_down: Duration,
    pub probes_in_flight: u32,
}

#[derive(Debug)]
struct BreakerState {
    status: BreakerStatus,
    consecutive_failures: u32,
    opened_at: Option<i64>,
    probes_in_flight: u32,
}

/// A named circuit breaker with call accounting.
pub struct CircuitBreaker {
    name: String,
    config: CircuitConfig,
    clock: Arc<dyn Clock>,
    state: Mutex<BreakerState>,

    // Metrics
    successes: AtomicU64,
    failures: AtomicU64,
    rejections: AtomicU64,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            name: name.into(),
            config,
            clock,
            state: Mutex::new(BreakerState {
                status: BreakerStatus::Closed,
                consecutive_failures: 0,
                opened_at: None,
                probes_in_flight: 0,
            }),
            successes: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            rejections: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn config(&self) -> &CircuitConfig {
        &self.config
    }

    /// Current status. An open breaker whose cool-down has elapsed reports
    /// `HalfOpen`.
    #[must_use]
    pub fn status(&self) -> BreakerStatus {
        let mut state = self.state.lock();
        self.maybe_half_open(&mut state);
        state.status
    }

    #[must_use]
    pub fn snapshot(&self) -> BreakerSnapshot {
        let mut state = self.state.lock();
        self.maybe_half_open(&mut state);
        BreakerSnapshot {
            status: state.status,
            consecutive_failures: state.consecutive_failures,
            opened_at: state.opened_at,
            cool_down: self.config.cool_down,
            probes_in_flight: state.probes_in_flight,
        }
    }

    /// Ask permission for one remote call. In half-open state a `true`
    /// reserves a probe slot that the next `record_*` call releases.
    pub fn allow_request(&self) -> bool {
        let mut state = self.state.lock();
        self.maybe_half_open(&mut state);

        let allowed = match state.status {
            BreakerStatus::Closed => true,
            BreakerStatus::Open => false,
            BreakerStatus::HalfOpen => {
                if state.probes_in_flight < self.config.half_open_max_probes.max(1) {
                    state.probes_in_flight += 1;
                    true
                } else {
                    false
                }
            }
        };

        if !allowed {
            self.rejections.fetch_add(1, Ordering::Relaxed);
            crate::metrics::record_circuit_call(&self.name, "rejected");
        }
        allowed
    }

    pub fn record_success(&self) {
        self.successes.fetch_add(1, Ordering::Relaxed);
        crate::metrics::record_circuit_call(&self.name, "success");

        let mut state = self.state.lock();
        state.probes_in_flight = state.probes_in_flight.saturating_sub(1);
        state.consecutive_failures = 0;
        if state.status != BreakerStatus::Closed {
            info!(circuit = %self.name, from = %state.status, "Circuit closed after successful probe");
            state.status = BreakerStatus::Closed;
            state.opened_at = None;
            state.probes_in_flight = 0;
            crate::metrics::set_circuit_state(&self.name, BreakerStatus::Closed as u8);
        }
    }

    pub fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
        crate::metrics::record_circuit_call(&self.name, "failure");

        let now = self.clock.now_millis();
        let mut state = self.state.lock();
        state.probes_in_flight = state.probes_in_flight.saturating_sub(1);
        state.consecutive_failures = state.consecutive_failures.saturating_add(1);

        match state.status {
            BreakerStatus::Closed if state.consecutive_failures >= self.config.failure_threshold => {
                warn!(
                    circuit = %self.name,
                    failures = state.consecutive_failures,
                    cool_down_ms = self.config.cool_down.as_millis() as u64,
                    "Circuit opened"
                );
                state.status = BreakerStatus::Open;
                state.opened_at = Some(now);
                crate::metrics::set_circuit_state(&self.name, BreakerStatus::Open as u8);
            }
            BreakerStatus::Closed => {
                debug!(circuit = %self.name, failures = state.consecutive_failures, "Circuit failure recorded");
            }
            // A call admitted before the breaker opened; the cool-down is not re-armed
            BreakerStatus::Open => {
                debug!(circuit = %self.name, "Late failure recorded while open");
            }
            BreakerStatus::HalfOpen => {
                warn!(circuit = %self.name, "Probe failed, circuit re-opened");
                state.status = BreakerStatus::Open;
                state.opened_at = Some(now);
                state.probes_in_flight = 0;
                crate::metrics::set_circuit_state(&self.name, BreakerStatus::Open as u8);
            }
        }
    }

    fn maybe_half_open(&self, state: &mut BreakerState) {
        if state.status != BreakerStatus::Open {
            return;
        }
        let opened_at = state.opened_at.unwrap_or(i64::MIN);
        let elapsed = self.clock.now_millis().saturating_sub(opened_at);
        if elapsed >= self.config.cool_down.as_millis() as i64 {
            debug!(circuit = %self.name, "Cool-down elapsed, circuit half-open");
            state.status = BreakerStatus::HalfOpen;
            state.probes_in_flight = 0;
            crate::metrics::set_circuit_state(&self.name, BreakerStatus::HalfOpen as u8);
        }
    }

    #[must_use]
    pub fn successes(&self) -> u64 {
        self.successes.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    /// Calls refused while open or while half-open probes were exhausted
    #[must_use]
    pub fn rejections(&self) -> u64 {
        self.rejections.load(Ordering::Relaxed)
    }
}
