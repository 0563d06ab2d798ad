//! Proportional position sizing.
//!
//! The mirror order is scaled by how large the follower's bankroll is
//! relative to the trader's bankroll at the time of the trade:
//!
//! ```text
//! ratio  = B_f / (B_t + S_t)
//! target = S_t * ratio * M
//! ```
//!
//! The trader's trade size is added back to their balance because the
//! balance is read after the trade already left it.

use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;

/// Smallest order the exchange accepts, in USDC.
pub const MIN_ORDER_USD: f64 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SizingInputs {
    pub follower_balance: f64,
    pub trader_balance: f64,
    pub trader_trade_usd: f64,
    pub multiplier: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SizingResult {
    pub target_usd_size: f64,
    pub ratio: f64,
}

impl SizingResult {
    /// Target size as a decimal USDC amount, rounded to cents.
    pub fn target_usd(&self) -> Decimal {
        Decimal::from_f64(self.target_usd_size)
            .map(|d| d.round_dp(2))
            .unwrap_or_else(|| Decimal::ONE)
    }
}

/// Compute the mirror size with the default minimum order.
#[cfg(test)]
pub fn compute_mirror_size(inputs: SizingInputs) -> SizingResult {
    compute_mirror_size_with_min(inputs, MIN_ORDER_USD)
}

/// Compute the mirror size. Never fails: negative or non-finite balances
/// count as zero, a trade size that is not positive sizes to `min_usd`
/// with a zero ratio, and any target below `min_usd` or non-finite becomes
/// `min_usd`. `ratio` is reported as computed, before the floor.
pub fn compute_mirror_size_with_min(inputs: SizingInputs, min_usd: f64) -> SizingResult {
    if !inputs.trader_trade_usd.is_finite() || inputs.trader_trade_usd <= 0.0 {
        return SizingResult {
            target_usd_size: min_usd,
            ratio: 0.0,
        };
    }

    let follower = non_negative(inputs.follower_balance);
    let trader = non_negative(inputs.trader_balance);

    let denominator = trader + inputs.trader_trade_usd;
    let ratio = if denominator == 0.0 {
        0.0
    } else {
        let r = follower / denominator;
        if r.is_finite() {
            r
        } else {
            0.0
        }
    };

    let target = inputs.trader_trade_usd * ratio * inputs.multiplier;
    let target_usd_size = if !target.is_finite() || target < min_usd {
        min_usd
    } else {
        target
    };

    SizingResult {
        target_usd_size,
        ratio,
    }
}

fn non_negative(value: f64) -> f64 {
    if value.is_finite() {
        value.max(0.0)
    } else {
        0.0
    }
}
