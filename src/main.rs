//! Polymarket Trade Mirror
//!
//! Watches a set of traders and mirrors each of their trades with an order
//! sized in proportion to the follower's balance.

mod api;
mod bot;
mod db;
mod errors;
mod metrics;
mod models;
mod resilience;
mod trading;

use std::time::Duration;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use rust_decimal::Decimal;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::bot::{Bot, BotConfig};
use crate::db::{Ledger, SqliteLedger};
use crate::resilience::{CircuitBreakerConfig, RetryConfig};
use crate::trading::{MonitorConfig, TradingConfig};

/// Polymarket trade mirror CLI.
#[derive(Parser)]
#[command(name = "polymirror")]
#[command(about = "Mirror Polymarket trades from a set of followed traders", long_about = None)]
struct Cli {
    /// Database URL
    #[arg(short, long, env = "DATABASE_URL", default_value = "sqlite:./polymirror.db?mode=rwc")]
    database: String,

    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start mirroring until Ctrl-C
    Run(Settings),

    /// Show recent mirror attempts
    History {
        /// Number of records to show
        #[arg(short, long, default_value = "20")]
        limit: i64,
    },

    /// Show open positions
    Positions,

    /// Show realized P&L
    Pnl,

    /// Show the effective configuration
    Config(Settings),
}

#[derive(Args, Debug, Clone)]
struct Settings {
    /// Trader addresses to mirror, comma separated
    #[arg(long, env = "TRADER_ADDRESSES", value_delimiter = ',')]
    traders: Vec<String>,

    /// Follower wallet address
    #[arg(long, env = "FOLLOWER_ADDRESS")]
    follower: Option<String>,

    /// Polling interval in seconds
    #[arg(long, env = "FETCH_INTERVAL_SECS", default_value = "1")]
    interval: u64,

    /// Ignore activity older than this many seconds
    #[arg(long, env = "AGGREGATION_WINDOW_SECS", default_value = "300")]
    window: u64,

    /// Activities requested per trader on each poll (max 500)
    #[arg(long, env = "ACTIVITY_LIMIT", default_value = "100")]
    activity_limit: u32,

    /// Scale applied to every mirror order
    #[arg(long, env = "TRADE_MULTIPLIER", default_value = "1.0")]
    multiplier: f64,

    /// Largest adverse move from the trader's price (0.02 = 2%)
    #[arg(long, env = "MAX_SLIPPAGE", default_value = "0.02")]
    max_slippage: Decimal,

    /// Never buy above / sell below this price
    #[arg(long, env = "MAX_PRICE")]
    max_price: Option<Decimal>,

    /// Follower balance to size with when none can be read
    #[arg(long, env = "FALLBACK_BALANCE", default_value = "0")]
    fallback_balance: Decimal,

    /// Price orders without submitting them
    #[arg(long, env = "DRY_RUN")]
    dry_run: bool,

    /// Do not record trades
    #[arg(long)]
    no_ledger: bool,

    #[arg(long, env = "RETRY_ATTEMPTS", default_value = "3")]
    retry_attempts: u32,

    #[arg(long, env = "RETRY_INITIAL_DELAY_MS", default_value = "1000")]
    retry_initial_delay_ms: u64,

    #[arg(long, env = "RETRY_MAX_DELAY_MS", default_value = "10000")]
    retry_max_delay_ms: u64,

    #[arg(long, env = "RETRY_FACTOR", default_value = "2.0")]
    retry_factor: f64,

    #[arg(long, env = "CB_FAILURE_THRESHOLD", default_value = "5")]
    cb_failure_threshold: u32,

    #[arg(long, env = "CB_SUCCESS_THRESHOLD", default_value = "2")]
    cb_success_threshold: u32,

    #[arg(long, env = "CB_TIMEOUT_SECS", default_value = "60")]
    cb_timeout_secs: u64,

    #[arg(long, env = "POLYMARKET_CHAIN_ID", default_value = "137")]
    chain_id: u64,
}

impl Settings {
    fn into_bot_config(self, database_url: &str) -> BotConfig {
        let traders = self
            .traders
            .into_iter()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect();

        BotConfig {
            monitor: MonitorConfig {
                traders,
                fetch_interval: Duration::from_secs(self.interval),
                aggregation_window: Duration::from_secs(self.window),
            },
            activity_limit: self.activity_limit,
            trading: TradingConfig {
                multiplier: self.multiplier,
                max_slippage: self.max_slippage,
                max_price: self.max_price,
                dry_run: self.dry_run,
                ..Default::default()
            },
            retry: RetryConfig {
                max_retries: self.retry_attempts,
                initial_delay: Duration::from_millis(self.retry_initial_delay_ms),
                max_delay: Duration::from_millis(self.retry_max_delay_ms),
                factor: self.retry_factor,
            },
            breaker: CircuitBreakerConfig {
                failure_threshold: self.cb_failure_threshold,
                success_threshold: self.cb_success_threshold,
                timeout: Duration::from_secs(self.cb_timeout_secs),
            },
            database_url: (!self.no_ledger).then(|| database_url.to_string()),
            follower_address: self.follower,
            fallback_balance: self.fallback_balance,
            chain_id: self.chain_id,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // Setup logging
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cli.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    match cli.command {
        Commands::Run(settings) => {
            let config = settings.into_bot_config(&cli.database);
            info!(
                traders = config.monitor.traders.len(),
                interval_secs = config.monitor.fetch_interval.as_secs(),
                multiplier = config.trading.multiplier,
                "Starting trade mirror"
            );

            let bot = Bot::new(config.clone()).await?;

            println!("\n=== Polymarket Trade Mirror ===");
            println!("Traders:          {}", config.monitor.traders.join(", "));
            println!("Polling interval: {}s", config.monitor.fetch_interval.as_secs());
            println!(
                "Mode:             {}",
                if bot.is_dry_run() { "DRY RUN (no real trades)" } else { "LIVE TRADING" }
            );
            println!("\nPress Ctrl+C to stop.\n");

            bot.run().await?;
        }

        Commands::History { limit } => {
            let ledger = SqliteLedger::new(&cli.database).await?;
            let trades = ledger.get_trade_history(limit).await?;

            if trades.is_empty() {
                println!("No mirror trades recorded yet.");
                return Ok(());
            }

            println!(
                "\n{:>5} {:<20} {:<14} {:<22} {:<4} {:<4} {:>10} {:>8} {:<9}",
                "ID", "TIME", "TRADER", "MARKET", "SIDE", "OUT", "SIZE", "PRICE", "STATUS"
            );
            println!("{}", "-".repeat(104));
            for trade in trades {
                println!(
                    "{:>5} {:<20} {:<14} {:<22} {:<4} {:<4} {:>10.2} {:>8.3} {:<9}",
                    trade.id,
                    truncate(&trade.created_at, 19),
                    truncate(&trade.trader_address, 12),
                    truncate(&trade.market_id, 20),
                    trade.side,
                    trade.outcome,
                    trade.executed_size,
                    trade.executed_price,
                    trade.status
                );
                println!(
                    "      source: ${:.2} @ {:.3} token {} ({})",
                    trade.source_size_usd,
                    trade.source_price,
                    truncate(&trade.asset, 16),
                    truncate(&trade.source_tx_hash, 20)
                );
                if let Some(tx) = &trade.tx_hash {
                    println!("      tx: {}", tx);
                }
                if let Some(error) = &trade.error_message {
                    println!("      error: {}", error);
                }
            }
        }

        Commands::Positions => {
            let ledger = SqliteLedger::new(&cli.database).await?;
            let positions = ledger.get_open_positions().await?;

            if positions.is_empty() {
                println!("No open positions.");
                return Ok(());
            }

            println!(
                "\n{:<44} {:<4} {:>12} {:>10} {:>12}",
                "MARKET", "OUT", "SIZE", "AVG PRICE", "COST"
            );
            println!("{}", "-".repeat(86));
            for pos in positions {
                println!(
                    "{:<44} {:<4} {:>12.2} {:>10.3} {:>12.2}",
                    truncate(&pos.market_id, 42),
                    pos.outcome.as_str(),
                    pos.size,
                    pos.average_price,
                    pos.cost_basis
                );
            }
        }

        Commands::Pnl => {
            let ledger = SqliteLedger::new(&cli.database).await?;
            let pnl = ledger.get_total_pnl().await?;
            let open = ledger.get_open_positions().await?;

            println!("\n=== Realized P&L ===");
            println!("Total:            ${:.2}", pnl);
            println!("Open positions:   {}", open.len());
        }

        Commands::Config(settings) => {
            let config = settings.into_bot_config(&cli.database);

            println!("\n=== Monitor ===\n");
            println!("  Traders:              {}", config.monitor.traders.join(", "));
            println!("  Polling Interval:     {}s", config.monitor.fetch_interval.as_secs());
            println!("  Aggregation Window:   {}s", config.monitor.aggregation_window.as_secs());
            println!("  Activity Limit:       {}", config.activity_limit);

            println!("\n=== Trading ===\n");
            println!("  Multiplier:           {}", config.trading.multiplier);
            println!("  Min Order:            ${}", config.trading.min_order_usd);
            println!("  Max Slippage:         {}%", config.trading.max_slippage * Decimal::from(100));
            println!(
                "  Max Price:            {}",
                config
                    .trading
                    .max_price
                    .map_or_else(|| "none".to_string(), |p| p.to_string())
            );
            println!("  Order Attempts:       {}", config.trading.max_order_attempts);
            println!("  Dry Run:              {}", config.trading.dry_run);
            println!(
                "  Follower:             {}",
                config.follower_address.as_deref().unwrap_or("not set")
            );
            println!("  Fallback Balance:     ${}", config.fallback_balance);

            println!("\n=== Resilience ===\n");
            println!("  Retries:              {}", config.retry.max_retries);
            println!("  Initial Delay:        {:?}", config.retry.initial_delay);
            println!("  Max Delay:            {:?}", config.retry.max_delay);
            println!("  Backoff Factor:       {}", config.retry.factor);
            println!("  Breaker Failures:     {}", config.breaker.failure_threshold);
            println!("  Breaker Successes:    {}", config.breaker.success_threshold);
            println!("  Breaker Cool-down:    {:?}", config.breaker.timeout);

            println!("\n=== Ledger ===\n");
            println!(
                "  Database:             {}",
                config.database_url.as_deref().unwrap_or("disabled")
            );

            if let Err(e) = config.monitor.validate().and(config.trading.validate()) {
                println!("\nWarning: {}", e);
            }
        }
    }

    Ok(())
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", cut)
    }
}
