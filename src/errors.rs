//! Error types shared by the API clients and the order executor.

use reqwest::StatusCode;
use rust_decimal::Decimal;
use thiserror::Error;

use crate::resilience::{CircuitError, CircuitOpenError};

/// Failure talking to a remote HTTP endpoint.
#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("no response from {endpoint}: {source}")]
    NoResponse {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{endpoint} returned {status}: {body}")]
    Status {
        endpoint: String,
        status: StatusCode,
        body: String,
    },

    #[error("failed to decode response from {endpoint}: {reason}")]
    Decode { endpoint: String, reason: String },
}

impl NetworkError {
    /// No response, 5xx and rate limiting are worth retrying; anything else
    /// will fail the same way again.
    pub fn is_retryable(&self) -> bool {
        match self {
            NetworkError::NoResponse { .. } => true,
            NetworkError::Status { status, .. } => {
                status.is_server_error() || *status == StatusCode::TOO_MANY_REQUESTS
            }
            NetworkError::Decode { .. } => false,
        }
    }

    /// Map a transport-level reqwest error. Errors carrying a status code
    /// keep it so classification still works.
    pub fn from_reqwest(endpoint: &str, err: reqwest::Error) -> Self {
        if err.is_decode() {
            return NetworkError::Decode {
                endpoint: endpoint.to_string(),
                reason: err.to_string(),
            };
        }
        match err.status() {
            Some(status) => NetworkError::Status {
                endpoint: endpoint.to_string(),
                status,
                body: err.to_string(),
            },
            None => NetworkError::NoResponse {
                endpoint: endpoint.to_string(),
                source: err,
            },
        }
    }
}

/// Failure from the exchange collaborator.
#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error(transparent)]
    Network(#[from] NetworkError),

    #[error("order signing failed: {0}")]
    Signing(String),

    #[error("invalid exchange response: {0}")]
    InvalidResponse(String),
}

impl ExchangeError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ExchangeError::Network(e) if e.is_retryable())
    }
}

/// Failure executing a mirror order. An order the exchange rejects is not
/// an error; it only uses up one attempt.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("slippage {slippage} exceeds maximum {max}")]
    SlippageExceeded { slippage: Decimal, max: Decimal },

    #[error("best price {best} breaches price limit {limit}")]
    PriceProtectionTriggered { best: Decimal, limit: Decimal },

    #[error(transparent)]
    CircuitOpen(#[from] CircuitOpenError),

    #[error(transparent)]
    Exchange(#[from] ExchangeError),

    #[error("order failed after {attempts} attempts: {source}")]
    ExhaustedRetries {
        attempts: u32,
        #[source]
        source: Box<ExecutionError>,
    },
}

impl From<CircuitError<ExchangeError>> for ExecutionError {
    fn from(err: CircuitError<ExchangeError>) -> Self {
        match err {
            CircuitError::Open(open) => ExecutionError::CircuitOpen(open),
            CircuitError::Inner(inner) => ExecutionError::Exchange(inner),
        }
    }
}
