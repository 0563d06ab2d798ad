//! Bot runner: wires the monitor, pipeline and their collaborators together.
//!
//! Handles:
//! - Choosing live or dry-run execution from the available credentials
//! - One circuit breaker per upstream (Data API, CLOB)
//! - Running the monitor until Ctrl-C, then letting the in-flight tick finish

use std::sync::Arc;

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use crate::api::{AccountBalances, ClobClient, DataClient};
use crate::db::{Ledger, SqliteLedger};
use crate::metrics::{MetricsSink, RecorderSink, SharedMetrics};
use crate::resilience::{CircuitBreaker, CircuitBreakerConfig, CircuitState, RetryConfig};
use crate::trading::{MirrorPipeline, MonitorConfig, OrderExecutor, TradeMonitor, TradingConfig};

/// Bot configuration.
#[derive(Debug, Clone)]
pub struct BotConfig {
    pub monitor: MonitorConfig,

    /// Activities requested per trader on each poll
    pub activity_limit: u32,

    pub trading: TradingConfig,

    /// Applied to every feed, balance, market and book fetch and to ledger
    /// writes
    pub retry: RetryConfig,

    /// Shared by the Data API and CLOB breakers
    pub breaker: CircuitBreakerConfig,

    /// `None` disables the ledger
    pub database_url: Option<String>,

    /// Follower wallet; its portfolio value sizes orders when no CLOB
    /// balance is available
    pub follower_address: Option<String>,

    /// Follower balance used when nothing else can be read
    pub fallback_balance: Decimal,

    pub chain_id: u64,
}

/// Main bot runner.
pub struct Bot {
    monitor: TradeMonitor,
    data_breaker: Arc<CircuitBreaker>,
    clob_breaker: Arc<CircuitBreaker>,
    dry_run: bool,
}

impl Bot {
    /// Validate settings and build every component.
    pub async fn new(mut config: BotConfig) -> Result<Self> {
        config.monitor.validate()?;
        config.trading.validate()?;

        let clob = if config.trading.dry_run {
            ClobClient::public(config.chain_id)?
        } else {
            match ClobClient::from_env() {
                Ok(client) => {
                    info!(address = ?client.address(), "CLOB client initialized");
                    client
                }
                Err(e) => {
                    warn!("CLOB client not configured: {:#}. Running in dry-run mode.", e);
                    config.trading.dry_run = true;
                    ClobClient::public(config.chain_id)?
                }
            }
        };
        let clob = Arc::new(clob);

        let metrics: SharedMetrics = Some(Arc::new(RecorderSink) as Arc<dyn MetricsSink>);
        let data_breaker = Arc::new(CircuitBreaker::new("data-api", config.breaker.clone()));
        let clob_breaker = Arc::new(CircuitBreaker::new("clob", config.breaker.clone()));

        let feed = DataClient::new()
            .context("Failed to build Data API client")?
            .with_activity_limit(config.activity_limit);

        let mut balances = AccountBalances::new(
            DataClient::new().context("Failed to build Data API client")?,
        )
        .with_fallback(config.fallback_balance)
        .with_data_breaker(data_breaker.clone())
        .with_clob_breaker(clob_breaker.clone());
        if !config.trading.dry_run {
            balances = balances.with_clob(clob.clone());
        }
        if let Some(address) = &config.follower_address {
            balances = balances.with_follower_address(address.clone());
        }

        let executor = OrderExecutor::new(clob, config.trading.clone())
            .with_retry(config.retry.clone())
            .with_circuit_breaker(clob_breaker.clone())
            .with_metrics(metrics.clone());

        let mut pipeline = MirrorPipeline::new(executor, Arc::new(balances))
            .with_retry(config.retry.clone())
            .with_metrics(metrics.clone());
        if let Some(url) = &config.database_url {
            let ledger: Arc<dyn Ledger> = Arc::new(SqliteLedger::new(url).await?);
            pipeline = pipeline.with_ledger(ledger);
        } else {
            info!("Ledger disabled");
        }

        let monitor = TradeMonitor::new(config.monitor.clone(), Arc::new(feed), Arc::new(pipeline))
            .with_retry(config.retry.clone())
            .with_circuit_breaker(data_breaker.clone())
            .with_metrics(metrics);

        Ok(Self {
            monitor,
            data_breaker,
            clob_breaker,
            dry_run: config.trading.dry_run,
        })
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// Run until Ctrl-C.
    pub async fn run(&self) -> Result<()> {
        info!(dry_run = self.dry_run, "Starting mirror bot");

        let task = self.monitor.start().await;

        tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for shutdown signal")?;
        info!("Shutdown signal received");

        task.join().await;

        for breaker in [&self.data_breaker, &self.clob_breaker] {
            if breaker.state() == CircuitState::Closed {
                debug!(circuit = %breaker.name(), "Circuit closed at shutdown");
            } else {
                let stats = breaker.stats();
                warn!(
                    circuit = %breaker.name(),
                    state = ?stats.state,
                    failures = stats.failure_count,
                    successes = stats.success_count,
                    next_attempt = ?stats.next_attempt,
                    "Circuit not closed at shutdown"
                );
            }
        }

        info!(seen_transactions = self.monitor.seen_count(), "Bot shutdown complete");
        Ok(())
    }
}
