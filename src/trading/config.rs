//! Trading and monitoring configuration.

use std::time::Duration;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use super::position_sizer::MIN_ORDER_USD;

/// Configuration for the trade monitor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Addresses of the traders being mirrored
    pub traders: Vec<String>,

    /// Delay between polling ticks
    pub fetch_interval: Duration,

    /// Activities older than this are ignored
    pub aggregation_window: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            traders: Vec::new(),
            fetch_interval: Duration::from_secs(1),
            aggregation_window: Duration::from_secs(300),
        }
    }
}

impl MonitorConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.traders.is_empty() {
            anyhow::bail!("at least one trader address is required");
        }
        if self.traders.iter().any(|t| t.trim().is_empty()) {
            anyhow::bail!("trader addresses must not be blank");
        }
        Ok(())
    }
}

/// Configuration for sizing and order execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingConfig {
    /// Scales every mirror order after proportional sizing
    pub multiplier: f64,

    /// Smallest order in USDC
    pub min_order_usd: f64,

    /// Largest adverse move from the trader's price, as a fraction (0.02 = 2%)
    pub max_slippage: Decimal,

    /// Hard price bound: never buy above / sell below this
    pub max_price: Option<Decimal>,

    /// Consecutive unsuccessful submissions before giving up on an order
    pub max_order_attempts: u32,

    /// Remaining notional at or below this counts as filled
    pub min_remaining_usd: Decimal,

    /// Log orders instead of submitting them
    pub dry_run: bool,
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            multiplier: 1.0,
            min_order_usd: MIN_ORDER_USD,
            max_slippage: dec!(0.02),
            max_price: None,
            max_order_attempts: 3,
            min_remaining_usd: dec!(0.01),
            dry_run: false,
        }
    }
}

impl TradingConfig {
    /// Reject settings no trade could be sized or priced with.
    pub fn validate(&self) -> anyhow::Result<()> {
        if !self.multiplier.is_finite() || self.multiplier <= 0.0 {
            anyhow::bail!("multiplier must be a positive number, got {}", self.multiplier);
        }
        if self.max_slippage < Decimal::ZERO || self.max_slippage > Decimal::ONE {
            anyhow::bail!("max slippage must be within [0, 1], got {}", self.max_slippage);
        }
        if self.max_order_attempts == 0 {
            anyhow::bail!("max order attempts must be at least 1");
        }
        Ok(())
    }
}
