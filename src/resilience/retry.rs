// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Retry logic with exponential backoff and jitter.
//!
//! Two consumers:
//! - [`retry`] loops in place (opening the local SQLite store at startup).
//! - [`RetryConfig::backoff`] computes the delay before a queued sync
//!   operation becomes due again; the sync engine never sleeps on it.
//!
//! # Example
//!
//! ```
//! use typing_sync::RetryConfig;
//! use std::time::Duration;
//!
//! let sync = RetryConfig::sync();
//! assert_eq!(sync.max_retries, Some(3));
//!
//! // No jitter: 1s, 2s, 4s, ... capped at max_delay
//! let exact = RetryConfig { jitter: 0.0, ..RetryConfig::sync() };
//! assert_eq!(exact.backoff(2), Duration::from_secs(4));
//! assert_eq!(exact.backoff(30), exact.max_delay);
//! ```

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

/// Configuration for retry behaviour.
///
/// Use the preset constructors for common patterns:
/// - [`RetryConfig::startup()`] - fast-fail for opening local storage
/// - [`RetryConfig::sync()`] - background sync queue schedule
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub factor: f64,
    pub max_retries: Option<usize>,
    /// Relative jitter applied to each delay, 0.0 - 1.0 (0.25 = ±25%)
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::sync()
    }
}

impl RetryConfig {
    /// Fast-fail retry for opening local storage.
    /// 5 attempts, failing after a couple of seconds.
    #[must_use]
    pub fn startup() -> Self {
        Self {
            max_retries: Some(5),
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(2),
            factor: 2.0,
            jitter: 0.0,
        }
    }

    /// Schedule for queued sync operations: base 1s, doubling, capped at
    /// 5 minutes, ±25% jitter, dead-lettered after 3 attempts.
    #[must_use]
    pub fn sync() -> Self {
        Self {
            max_retries: Some(3),
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(300),
            factor: 2.0,
            jitter: 0.25,
        }
    }

    /// Fast retry for tests (minimal delays)
    #[cfg(test)]
    pub fn test() -> Self {
        Self {
            max_retries: Some(3),
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(10),
            factor: 2.0,
            jitter: 0.0,
        }
    }

    /// Delay before attempt number `attempts` (0-based):
    /// `min(initial * factor^attempts, max)`, then ±jitter.
    #[must_use]
    pub fn backoff(&self, attempts: u32) -> Duration {
        let exponent = attempts.min(63) as i32;
        let raw = self.initial_delay.as_secs_f64() * self.factor.powi(exponent);
        let capped = raw.min(self.max_delay.as_secs_f64());

        let jitter = self.jitter.clamp(0.0, 1.0);
        let jittered = if jitter > 0.0 {
            let spread: f64 = rand::rng().random_range(-jitter..=jitter);
            capped * (1.0 + spread)
        } else {
            capped
        };

        Duration::from_secs_f64(jittered.max(0.0))
    }
}

pub async fn retry<F, Fut, T, E>(
    operation_name: &str,
    config: &RetryConfig,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempts: u32 = 0;

    loop {
        match operation().await {
            Ok(val) => {
                if attempts > 0 {
                    info!("Operation '{}' succeeded after {} retries", operation_name, attempts);
                }
                return Ok(val);
            }
            Err(err) => {
                let delay = config.backoff(attempts);
                attempts += 1;

                match config.max_retries {
                    Some(max) if attempts as usize >= max => return Err(err),
                    Some(max) => warn!(
                        "Operation '{}' failed (attempt {}/{}): {}. Retrying in {:?}...",
                        operation_name, attempts, max, err, delay
                    ),
                    None => warn!(
                        "Operation '{}' failed (attempt {}, will retry forever): {}. Next retry in {:?}...",
                        operation_name, attempts, err, delay
                    ),
                }

                sleep(delay).await;
            }
        }
    }
}
