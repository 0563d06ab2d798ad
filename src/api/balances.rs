//! Balance lookups backed by the Data API and, when trading live, the CLOB.

use std::future::Future;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::resilience::{call_guarded, CircuitBreaker, CircuitError};

use super::{BalanceSource, ClobClient, DataClient};

/// Follower balance resolves to, in order: CLOB collateral, the follower
/// address's portfolio value, then a configured fixed amount.
///
/// Each lookup passes through the breaker of the upstream it hits. Retrying
/// is left to the caller.
pub struct AccountBalances {
    data: DataClient,
    clob: Option<Arc<ClobClient>>,
    follower_address: Option<String>,
    fallback: Decimal,
    data_breaker: Option<Arc<CircuitBreaker>>,
    clob_breaker: Option<Arc<CircuitBreaker>>,
}

impl AccountBalances {
    pub fn new(data: DataClient) -> Self {
        Self {
            data,
            clob: None,
            follower_address: None,
            fallback: Decimal::ZERO,
            data_breaker: None,
            clob_breaker: None,
        }
    }

    pub fn with_clob(mut self, clob: Arc<ClobClient>) -> Self {
        self.clob = Some(clob);
        self
    }

    pub fn with_follower_address(mut self, address: impl Into<String>) -> Self {
        self.follower_address = Some(address.into());
        self
    }

    pub fn with_fallback(mut self, amount: Decimal) -> Self {
        self.fallback = amount;
        self
    }

    pub fn with_data_breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.data_breaker = Some(breaker);
        self
    }

    pub fn with_clob_breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.clob_breaker = Some(breaker);
        self
    }

    async fn portfolio_value(&self, address: &str) -> Result<Decimal> {
        guarded(self.data_breaker.as_deref(), || self.data.get_portfolio_value(address))
            .await
            .with_context(|| format!("Failed to fetch portfolio value for {address}"))
    }
}

/// Run `operation` through `breaker`, keeping the typed error inside the
/// `anyhow` chain so callers can still classify it.
async fn guarded<T, E, F, Fut>(breaker: Option<&CircuitBreaker>, operation: F) -> Result<T>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::error::Error + Send + Sync + 'static,
{
    call_guarded(breaker, operation).await.map_err(|e| match e {
        CircuitError::Open(open) => anyhow::Error::new(open),
        CircuitError::Inner(inner) => anyhow::Error::new(inner),
    })
}

#[async_trait]
impl BalanceSource for AccountBalances {
    async fn follower_balance(&self) -> Result<Decimal> {
        if let Some(clob) = &self.clob {
            return guarded(self.clob_breaker.as_deref(), || clob.get_collateral_balance())
                .await
                .context("Failed to fetch collateral balance");
        }
        if let Some(address) = &self.follower_address {
            return self.portfolio_value(address).await;
        }
        Ok(self.fallback)
    }

    async fn trader_balance(&self, trader: &str) -> Result<Decimal> {
        self.portfolio_value(trader).await
    }
}
