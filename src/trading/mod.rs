//! Trading logic: detection, sizing, execution and the pipeline between them.

mod config;
mod dedup;
mod executor;
mod monitor;
mod pipeline;
mod position_sizer;
mod scheduler;

#[cfg(test)]
pub(crate) mod testing;

pub use config::{MonitorConfig, TradingConfig};
pub use executor::OrderExecutor;
pub use monitor::TradeMonitor;
pub use pipeline::MirrorPipeline;
