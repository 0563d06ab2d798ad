//! Retry with exponential backoff for async operations.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use backoff::backoff::Backoff;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Retry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Additional attempts after the first failure
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// Delay multiplier applied after each retry
    pub factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_secs(10),
            factor: 2.0,
        }
    }
}

/// Backoff schedule bounded by a retry count rather than elapsed time.
#[derive(Debug, Clone)]
pub struct AttemptBackoff {
    config: RetryConfig,
    remaining: u32,
    current: Duration,
}

impl AttemptBackoff {
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            config: config.clone(),
            remaining: config.max_retries,
            current: config.initial_delay.min(config.max_delay),
        }
    }
}

impl Backoff for AttemptBackoff {
    fn reset(&mut self) {
        self.remaining = self.config.max_retries;
        self.current = self.config.initial_delay.min(self.config.max_delay);
    }

    fn next_backoff(&mut self) -> Option<Duration> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;

        let delay = self.current;
        let factor = if self.config.factor.is_finite() && self.config.factor > 0.0 {
            self.config.factor
        } else {
            1.0
        };
        let next = delay.as_secs_f64() * factor;
        self.current = Duration::from_secs_f64(next.min(self.config.max_delay.as_secs_f64()));

        Some(delay)
    }
}

/// Retry `operation` on every failure, returning the last error once the
/// retry budget is spent.
pub async fn retry_with_backoff<T, E, F, Fut>(
    config: &RetryConfig,
    label: &str,
    operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    retry_if(config, label, operation, |_: &E| true).await
}

/// Retry `operation` while `is_retryable` accepts the failure. Rejected
/// failures are returned immediately without further attempts.
pub async fn retry_if<T, E, F, Fut, P>(
    config: &RetryConfig,
    label: &str,
    mut operation: F,
    is_retryable: P,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
    P: Fn(&E) -> bool,
{
    let is_retryable = &is_retryable;
    let max_attempts = config.max_retries + 1;
    let mut attempt = 0u32;

    backoff::future::retry_notify(
        AttemptBackoff::new(config),
        || {
            let fut = operation();
            async move {
                fut.await.map_err(|e| {
                    if is_retryable(&e) {
                        backoff::Error::transient(e)
                    } else {
                        backoff::Error::permanent(e)
                    }
                })
            }
        },
        |err: E, delay: Duration| {
            attempt += 1;
            warn!(
                operation = label,
                attempt,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Operation failed, retrying"
            );
        },
    )
    .await
}
