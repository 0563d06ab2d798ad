//! Trade signal model: one detected trade by a followed trader.

use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Direction of a trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeSide {
    Buy,
    Sell,
}

impl TradeSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeSide::Buy => "BUY",
            TradeSide::Sell => "SELL",
        }
    }

    /// Parse a feed side string, case-insensitively.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().as_str() {
            "BUY" => Some(TradeSide::Buy),
            "SELL" => Some(TradeSide::Sell),
            _ => None,
        }
    }
}

impl std::fmt::Display for TradeSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Binary market outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Outcome {
    Yes,
    No,
}

impl Outcome {
    /// Outcome index 0 is YES, anything else is NO.
    pub fn from_index(index: i64) -> Self {
        if index == 0 {
            Outcome::Yes
        } else {
            Outcome::No
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Yes => "YES",
            Outcome::No => "NO",
        }
    }

    /// Token label used by the exchange for this outcome.
    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Yes => "Yes",
            Outcome::No => "No",
        }
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalized record of one detected trade to be mirrored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeSignal {
    /// Followed trader's wallet address
    pub trader_address: String,

    /// Market condition ID
    pub market_id: String,

    /// Outcome token the trader touched (informational)
    #[serde(default)]
    pub asset: String,

    pub outcome: Outcome,

    pub side: TradeSide,

    /// Notional of the trader's trade in USDC
    pub size_usd: Decimal,

    /// Price per outcome token (0.0 to 1.0)
    pub price: Decimal,

    /// Activity time in epoch milliseconds
    pub timestamp_ms: i64,

    /// On-chain transaction hash of the source trade
    #[serde(default)]
    pub transaction_hash: String,
}

impl TradeSignal {
    /// Activity time as a UTC datetime.
    pub fn detected_at(&self) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(self.timestamp_ms)
            .single()
            .unwrap_or_else(Utc::now)
    }

    /// Notional of the source trade. Uses the feed's USD size when positive,
    /// otherwise size × price.
    pub fn notional_from_feed(usdc_size: Decimal, size: Decimal, price: Decimal) -> Decimal {
        if usdc_size > Decimal::ZERO {
            usdc_size
        } else {
            size * price
        }
    }
}
