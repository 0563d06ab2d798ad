//! Resilience primitives wrapping every unreliable network call.

mod circuit_breaker;
mod retry;

pub use circuit_breaker::{
    call_guarded, CircuitBreaker, CircuitBreakerConfig, CircuitError, CircuitOpenError,
    CircuitState,
};
pub use retry::{retry_if, retry_with_backoff, RetryConfig};
