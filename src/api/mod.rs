//! Polymarket API clients and the seams the trading core talks through.

mod auth;
mod balances;
mod clob_client;
mod data_client;
mod types;

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::errors::{ExchangeError, NetworkError};
use crate::models::TradeSide;

pub use balances::AccountBalances;
pub use clob_client::{ClobClient, OrderResponse, OrderType, SignedOrder};
pub use data_client::DataClient;
pub use types::*;

/// Source of recent activity for a trader, newest first.
#[async_trait]
pub trait ActivityFeed: Send + Sync {
    async fn fetch_activity(&self, trader: &str) -> Result<Vec<ActivityRecord>, NetworkError>;
}

/// Order-book exchange the executor trades against.
#[async_trait]
pub trait Exchange: Send + Sync {
    async fn get_market(&self, market_id: &str) -> Result<MarketInfo, ExchangeError>;

    /// Book snapshot with both sides ordered best price first.
    async fn get_order_book(&self, token_id: &str) -> Result<OrderBook, ExchangeError>;

    /// Sign an order for `size` shares at `price`.
    async fn create_order(
        &self,
        side: TradeSide,
        token_id: &str,
        size: Decimal,
        price: Decimal,
    ) -> Result<SignedOrder, ExchangeError>;

    async fn submit_order(
        &self,
        order: &SignedOrder,
        order_type: OrderType,
    ) -> Result<OrderResponse, ExchangeError>;
}

/// USDC balances used for proportional sizing.
#[async_trait]
pub trait BalanceSource: Send + Sync {
    async fn follower_balance(&self) -> anyhow::Result<Decimal>;

    async fn trader_balance(&self, trader: &str) -> anyhow::Result<Decimal>;
}
