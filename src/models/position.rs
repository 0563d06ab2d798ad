//! Position model for the follower's mirrored holdings.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::Outcome;

/// Follower position in one market outcome, built from mirrored fills.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    /// Market condition ID
    pub market_id: String,

    pub outcome: Outcome,

    /// Number of outcome tokens held
    pub size: Decimal,

    /// Average entry price per token
    pub average_price: Decimal,

    /// Cost basis in USDC
    pub cost_basis: Decimal,

    /// P&L realized by reducing this position
    #[serde(default)]
    pub realized_pnl: Decimal,

    /// Trader whose trade opened this position
    pub source_trader: Option<String>,

    #[serde(default = "Utc::now")]
    pub last_updated: DateTime<Utc>,
}

impl Position {
    /// Create a new position from an initial fill.
    pub fn new(market_id: String, outcome: Outcome, size: Decimal, price: Decimal) -> Self {
        Self {
            market_id,
            outcome,
            size,
            average_price: price,
            cost_basis: size * price,
            realized_pnl: Decimal::ZERO,
            source_trader: None,
            last_updated: Utc::now(),
        }
    }

    /// Add to position (averaging in).
    pub fn add(&mut self, size: Decimal, price: Decimal) {
        let total_cost = self.cost_basis + size * price;
        let new_size = self.size + size;

        if !new_size.is_zero() {
            self.average_price = total_cost / new_size;
        }

        self.size = new_size;
        self.cost_basis = total_cost;
        self.last_updated = Utc::now();
    }

    /// Reduce position size at `price`, returning the P&L realized.
    pub fn reduce(&mut self, size: Decimal, price: Decimal) -> Decimal {
        let reduce_size = size.min(self.size);
        let realized = reduce_size * (price - self.average_price);

        self.size -= reduce_size;
        self.cost_basis = self.size * self.average_price;
        self.realized_pnl += realized;
        self.last_updated = Utc::now();

        realized
    }

    /// Check if this position is closed (size is zero or negligible).
    pub fn is_closed(&self) -> bool {
        self.size < Decimal::new(1, 6)
    }
}
