//! Polymarket Data API client for trader activity and portfolio value.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::errors::NetworkError;

use super::types::{ActivityRecord, ValuePayload};
use super::ActivityFeed;

const DATA_API_BASE: &str = "https://data-api.polymarket.com";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_ACTIVITY_LIMIT: u32 = 100;

/// Client for Polymarket Data API (read-only operations).
#[derive(Debug, Clone)]
pub struct DataClient {
    client: Client,
    base_url: String,
    activity_limit: u32,
}

impl DataClient {
    /// Create a new data client with default settings.
    pub fn new() -> Result<Self, NetworkError> {
        Self::with_base_url(DATA_API_BASE.to_string())
    }

    /// Create with custom base URL (for testing).
    pub fn with_base_url(base_url: String) -> Result<Self, NetworkError> {
        let client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|e| NetworkError::from_reqwest("client builder", e))?;

        Ok(Self {
            client,
            base_url,
            activity_limit: DEFAULT_ACTIVITY_LIMIT,
        })
    }

    pub fn with_activity_limit(mut self, limit: u32) -> Self {
        self.activity_limit = limit.clamp(1, 500);
        self
    }

    /// Fetch trader activity (trades, splits, merges, redemptions), newest first.
    pub async fn get_activity(
        &self,
        address: &str,
        limit: u32,
    ) -> Result<Vec<ActivityRecord>, NetworkError> {
        let limit = limit.min(500).to_string();
        self.get_json(
            "/activity",
            &[("user", address), ("limit", limit.as_str())],
        )
        .await
    }

    /// Fetch the current value of a trader's open positions.
    pub async fn get_portfolio_value(&self, address: &str) -> Result<Decimal, NetworkError> {
        let payload: ValuePayload = self.get_json("/value", &[("user", address)]).await?;
        Ok(payload.total())
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, NetworkError> {
        let url = format!("{}{}", self.base_url, path);
        debug!(url = %url, ?query, "Data API request");

        let response = self
            .client
            .get(&url)
            .query(query)
            .send()
            .await
            .map_err(|e| NetworkError::from_reqwest(path, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NetworkError::Status {
                endpoint: path.to_string(),
                status,
                body,
            });
        }

        response
            .json()
            .await
            .map_err(|e| NetworkError::from_reqwest(path, e))
    }
}

#[async_trait]
impl ActivityFeed for DataClient {
    async fn fetch_activity(&self, trader: &str) -> Result<Vec<ActivityRecord>, NetworkError> {
        self.get_activity(trader, self.activity_limit).await
    }
}
