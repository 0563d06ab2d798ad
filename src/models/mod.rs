//! Data models for trade signals and mirrored positions.

mod position;
mod signal;

pub use position::Position;
pub use signal::{Outcome, TradeSide, TradeSignal};
