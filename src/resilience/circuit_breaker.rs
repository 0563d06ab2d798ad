//! Circuit breaker for calls to unreliable dependencies.
//!
//! CLOSED counts consecutive failures and opens at `failure_threshold`.
//! OPEN rejects calls with [`CircuitOpenError`] until the cool-down deadline,
//! then admits the next caller and flips to HALF_OPEN before it runs.
//! HALF_OPEN closes after `success_threshold` consecutive successes and
//! reopens on any failure.

use std::future::Future;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::Instant;
use tracing::{error, info};

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub success_threshold: u32,
    /// Cool-down before an open circuit admits a trial call
    pub timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            timeout: Duration::from_secs(60),
        }
    }
}

/// Raised instead of invoking the wrapped operation while the circuit is open.
#[derive(Debug, Clone, Error)]
#[error("circuit '{name}' is open, next attempt in {retry_in:?}")]
pub struct CircuitOpenError {
    pub name: String,
    pub retry_in: Duration,
}

#[derive(Debug, Error)]
pub enum CircuitError<E> {
    #[error(transparent)]
    Open(#[from] CircuitOpenError),

    #[error("{0}")]
    Inner(E),
}

/// Point-in-time view of a breaker, for operators and tests.
#[derive(Debug, Clone, Copy)]
pub struct CircuitStats {
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub next_attempt: Option<Instant>,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    next_attempt: Option<Instant>,
}

impl BreakerState {
    fn closed() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            next_attempt: None,
        }
    }
}

pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerState::closed()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run `operation` through the breaker.
    pub async fn call<T, E, F, Fut>(&self, operation: F) -> Result<T, CircuitError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.admit()?;

        match operation().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(e) => {
                self.record_failure();
                Err(CircuitError::Inner(e))
            }
        }
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn stats(&self) -> CircuitStats {
        let inner = self.lock();
        CircuitStats {
            state: inner.state,
            failure_count: inner.failure_count,
            success_count: inner.success_count,
            next_attempt: inner.next_attempt,
        }
    }

    /// Force the circuit closed and zero all counters.
    pub fn reset(&self) {
        *self.lock() = BreakerState::closed();
        info!(circuit = %self.name, "Circuit breaker reset");
    }

    fn admit(&self) -> Result<(), CircuitOpenError> {
        let mut inner = self.lock();
        if inner.state != CircuitState::Open {
            return Ok(());
        }

        let now = Instant::now();
        match inner.next_attempt {
            Some(deadline) if now < deadline => Err(CircuitOpenError {
                name: self.name.clone(),
                retry_in: deadline - now,
            }),
            _ => {
                // Every caller arriving while HALF_OPEN is admitted as well.
                inner.state = CircuitState::HalfOpen;
                inner.success_count = 0;
                info!(circuit = %self.name, "Circuit breaker half-open, admitting trial call");
                Ok(())
            }
        }
    }

    fn record_success(&self) {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => inner.failure_count = 0,
            CircuitState::HalfOpen => {
                inner.success_count += 1;
                if inner.success_count >= self.config.success_threshold {
                    inner.state = CircuitState::Closed;
                    inner.failure_count = 0;
                    inner.success_count = 0;
                    inner.next_attempt = None;
                    info!(circuit = %self.name, "Circuit breaker closed, dependency recovered");
                }
            }
            CircuitState::Open => {}
        }
    }

    fn record_failure(&self) {
        let mut inner = self.lock();
        inner.failure_count += 1;

        match inner.state {
            CircuitState::Closed => {
                if inner.failure_count >= self.config.failure_threshold {
                    self.trip(&mut inner);
                }
            }
            CircuitState::HalfOpen | CircuitState::Open => self.trip(&mut inner),
        }
    }

    fn trip(&self, inner: &mut BreakerState) {
        inner.state = CircuitState::Open;
        inner.success_count = 0;
        inner.next_attempt = Some(Instant::now() + self.config.timeout);
        error!(
            circuit = %self.name,
            failures = inner.failure_count,
            cooldown_secs = self.config.timeout.as_secs(),
            "Circuit breaker opened"
        );
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Run `operation` through `breaker` when one is configured.
pub async fn call_guarded<T, E, F, Fut>(
    breaker: Option<&CircuitBreaker>,
    operation: F,
) -> Result<T, CircuitError<E>>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    match breaker {
        Some(breaker) => breaker.call(operation).await,
        None => operation().await.map_err(CircuitError::Inner),
    }
}
