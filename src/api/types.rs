//! Response types for the Polymarket Data and CLOB APIs.

use chrono::{DateTime, NaiveDateTime};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};

/// Millisecond values start above this; anything lower is seconds.
const MILLIS_THRESHOLD: f64 = 1_000_000_000_000.0;

fn null_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Activity timestamp as the feed sends it: epoch number or date string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FeedTimestamp {
    Number(f64),
    Text(String),
}

impl FeedTimestamp {
    /// Normalize to epoch milliseconds.
    pub fn to_millis(&self) -> Option<i64> {
        match self {
            FeedTimestamp::Number(n) => epoch_number_to_millis(*n),
            FeedTimestamp::Text(s) => {
                let s = s.trim();
                if let Ok(n) = s.parse::<f64>() {
                    return epoch_number_to_millis(n);
                }
                if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                    return Some(dt.timestamp_millis());
                }
                ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"]
                    .iter()
                    .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
                    .map(|naive| naive.and_utc().timestamp_millis())
            }
        }
    }
}

fn epoch_number_to_millis(n: f64) -> Option<i64> {
    if !n.is_finite() || n < 0.0 {
        return None;
    }
    if n > MILLIS_THRESHOLD {
        Some(n.floor() as i64)
    } else {
        Some((n * 1000.0).floor() as i64)
    }
}

/// Activity response from the /activity endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityRecord {
    #[serde(rename = "type", default, deserialize_with = "null_default")]
    pub activity_type: String,
    #[serde(default, deserialize_with = "null_default")]
    pub proxy_wallet: String,
    pub timestamp: FeedTimestamp,
    #[serde(default, deserialize_with = "null_default")]
    pub condition_id: String,
    #[serde(default, deserialize_with = "null_default")]
    pub asset: String,
    #[serde(default, deserialize_with = "null_default")]
    pub size: Decimal,
    #[serde(default, deserialize_with = "null_default")]
    pub usdc_size: Decimal,
    #[serde(default, deserialize_with = "null_default")]
    pub price: Decimal,
    #[serde(default, deserialize_with = "null_default")]
    pub side: String,
    #[serde(default, deserialize_with = "null_default")]
    pub outcome_index: i64,
    #[serde(default, deserialize_with = "null_default")]
    pub transaction_hash: String,
}

impl ActivityRecord {
    pub fn is_trade(&self) -> bool {
        self.activity_type.eq_ignore_ascii_case("TRADE")
    }
}

/// Portfolio value entry from the /value endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct ValueResponse {
    pub value: Decimal,
}

/// /value answers with a list today; older deployments sent one object.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ValuePayload {
    Many(Vec<ValueResponse>),
    One(ValueResponse),
}

impl ValuePayload {
    pub fn total(&self) -> Decimal {
        match self {
            ValuePayload::Many(items) => items.iter().map(|v| v.value).sum(),
            ValuePayload::One(v) => v.value,
        }
    }
}

/// Market information from the CLOB /markets endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketInfo {
    pub condition_id: String,
    #[serde(default)]
    pub question: String,
    #[serde(default)]
    pub tokens: Vec<TokenInfo>,
    #[serde(default)]
    pub neg_risk: bool,
}

/// Token information for a market outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenInfo {
    pub token_id: String,
    pub outcome: String,
}

/// Order book price level.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BookLevel {
    pub price: Decimal,
    pub size: Decimal,
}

impl BookLevel {
    pub fn new(price: Decimal, size: Decimal) -> Self {
        Self { price, size }
    }

    /// USDC value resting at this level.
    pub fn notional(&self) -> Decimal {
        self.price * self.size
    }
}

/// Order book snapshot. After [`OrderBook::best_first`] both sides are
/// ordered best price first.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrderBook {
    #[serde(default)]
    pub market: Option<String>,
    #[serde(default)]
    pub asset_id: Option<String>,
    #[serde(default)]
    pub bids: Vec<BookLevel>,
    #[serde(default)]
    pub asks: Vec<BookLevel>,
    #[serde(default)]
    pub hash: Option<String>,
}

impl OrderBook {
    /// Sort bids descending and asks ascending, dropping empty levels.
    pub fn best_first(mut self) -> Self {
        self.bids.retain(|l| l.size > Decimal::ZERO && l.price > Decimal::ZERO);
        self.asks.retain(|l| l.size > Decimal::ZERO && l.price > Decimal::ZERO);
        self.bids.sort_by(|a, b| b.price.cmp(&a.price));
        self.asks.sort_by(|a, b| a.price.cmp(&b.price));
        self
    }
}

/// Collateral balance from the CLOB /balance-allowance endpoint, in base
/// units (USDC has 6 decimals).
#[derive(Debug, Clone, Deserialize)]
pub struct BalanceAllowance {
    pub balance: Decimal,
}

impl BalanceAllowance {
    pub fn usdc(&self) -> Decimal {
        self.balance / Decimal::from(1_000_000u64)
    }
}
