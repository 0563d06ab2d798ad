//! Mirror pipeline: the consumer behind the trade monitor.
//!
//! For each signal: read both balances, size the mirror order, execute it
//! (or price it, in dry-run), then write the outcome to the ledger. Any
//! execution-path failure is logged with trader context and recorded as a
//! failed trade; only ledger errors reach the monitor.
//!
//! Balance reads are retried on transient network failures; ledger writes
//! are retried on any failure since each write is one transaction.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tracing::{error, info};

use crate::api::{BalanceSource, Exchange};
use crate::db::{Ledger, TradeStatus};
use crate::errors::{ExchangeError, NetworkError};
use crate::metrics::{self, SharedMetrics};
use crate::models::TradeSignal;
use crate::resilience::{retry_if, retry_with_backoff, RetryConfig};

use super::executor::{ExecutionReport, OrderExecutor, OrderRequest};
use super::monitor::SignalHandler;
use super::position_sizer::{compute_mirror_size_with_min, SizingInputs, SizingResult};

pub struct MirrorPipeline<X: Exchange> {
    executor: OrderExecutor<X>,
    balances: Arc<dyn BalanceSource>,
    ledger: Option<Arc<dyn Ledger>>,
    retry: RetryConfig,
    metrics: SharedMetrics,
}

impl<X: Exchange> MirrorPipeline<X> {
    pub fn new(executor: OrderExecutor<X>, balances: Arc<dyn BalanceSource>) -> Self {
        Self {
            executor,
            balances,
            ledger: None,
            retry: RetryConfig::default(),
            metrics: None,
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_ledger(mut self, ledger: Arc<dyn Ledger>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    pub fn with_metrics(mut self, metrics: SharedMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    /// Size the mirror order for `signal` from current balances.
    pub async fn size(&self, signal: &TradeSignal) -> Result<SizingResult> {
        let (follower, trader) = tokio::join!(
            retry_if(
                &self.retry,
                "follower_balance",
                || self.balances.follower_balance(),
                is_transient,
            ),
            retry_if(
                &self.retry,
                "trader_balance",
                || self.balances.trader_balance(&signal.trader_address),
                is_transient,
            ),
        );
        let follower = follower.context("Failed to read follower balance")?;
        let trader = trader.context("Failed to read trader balance")?;

        let config = self.executor.config();
        let sizing = compute_mirror_size_with_min(
            SizingInputs {
                follower_balance: follower.to_f64().unwrap_or(0.0),
                trader_balance: trader.to_f64().unwrap_or(0.0),
                trader_trade_usd: signal.size_usd.to_f64().unwrap_or(0.0),
                multiplier: config.multiplier,
            },
            config.min_order_usd,
        );

        let ratio = format!("{:.4}", sizing.ratio);
        let target = format!("{:.2}", sizing.target_usd_size);
        info!(
            trader = %signal.trader_address,
            follower_balance = %follower,
            trader_balance = %trader,
            trader_trade_usd = %signal.size_usd,
            ratio = %ratio,
            target_usd = %target,
            "Sized mirror order"
        );
        Ok(sizing)
    }

    async fn mirror(&self, signal: &TradeSignal) -> Result<(ExecutionReport, TradeStatus)> {
        let sizing = self.size(signal).await?;
        let config = self.executor.config();

        let request = OrderRequest {
            market_id: signal.market_id.clone(),
            outcome: signal.outcome,
            side: signal.side,
            usd_amount: sizing.target_usd(),
            reference_price: Some(signal.price),
            price_limit: config.max_price,
        };

        if config.dry_run {
            let report = self.executor.simulate(&request).await?;
            info!(
                trader = %signal.trader_address,
                market = %signal.market_id,
                outcome = %signal.outcome,
                side = %signal.side,
                usd = %request.usd_amount,
                avg_price = ?report.average_price(),
                "[DRY RUN] Would execute trade"
            );
            return Ok((report, TradeStatus::Simulated));
        }

        let report = self.executor.execute(&request).await?;
        if report.fills.is_empty() {
            anyhow::bail!(
                "no liquidity filled for {} USD on {}",
                report.requested_usd,
                report.token_id
            );
        }
        Ok((report, TradeStatus::Executed))
    }

    async fn record(
        &self,
        signal: &TradeSignal,
        size: Decimal,
        price: Decimal,
        status: TradeStatus,
        tx_hash: Option<&str>,
        error: Option<&str>,
    ) -> Result<()> {
        let Some(ledger) = &self.ledger else {
            return Ok(());
        };
        retry_with_backoff(&self.retry, "record_trade", || {
            ledger.record_trade(signal, size, price, status, tx_hash, error)
        })
        .await
        .context("Failed to record mirror trade")?;
        Ok(())
    }
}

/// Network failures the upstream may recover from. Open circuits and
/// anything untyped fail the lookup straight away.
fn is_transient(err: &anyhow::Error) -> bool {
    if let Some(e) = err.downcast_ref::<NetworkError>() {
        return e.is_retryable();
    }
    if let Some(e) = err.downcast_ref::<ExchangeError>() {
        return e.is_retryable();
    }
    false
}

#[async_trait]
impl<X: Exchange + 'static> SignalHandler for MirrorPipeline<X> {
    async fn handle(&self, signal: TradeSignal) -> Result<()> {
        match self.mirror(&signal).await {
            Ok((report, status)) => {
                info!(
                    trader = %signal.trader_address,
                    market = %signal.market_id,
                    side = %signal.side,
                    status = %status,
                    source_time = %signal.detected_at(),
                    requested = %report.requested_usd,
                    filled = %report.filled_usd,
                    unfilled = %report.unfilled_usd(),
                    "Mirror trade complete"
                );
                let price = report.average_price().unwrap_or(signal.price);
                self.record(
                    &signal,
                    report.filled_quantity(),
                    price,
                    status,
                    report.transaction_hash(),
                    None,
                )
                .await
            }
            Err(e) => {
                metrics::incr(&self.metrics, metrics::EXECUTIONS_FAILED);
                let reason = format!("{e:#}");
                error!(
                    trader = %signal.trader_address,
                    market = %signal.market_id,
                    side = %signal.side,
                    error = %reason,
                    "Mirror trade failed"
                );
                self.record(
                    &signal,
                    Decimal::ZERO,
                    signal.price,
                    TradeStatus::Failed,
                    None,
                    Some(&reason),
                )
                .await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    use reqwest::StatusCode;
    use rust_decimal_macros::dec;

    use crate::db::TradeRecord;
    use crate::metrics::testing::CountingSink;
    use crate::models::{Outcome, Position, TradeSide};
    use crate::trading::testing::{level, FakeExchange, Reply};
    use crate::trading::TradingConfig;

    struct FixedBalances {
        follower: Decimal,
        trader: Option<Decimal>,
    }

    #[async_trait]
    impl BalanceSource for FixedBalances {
        async fn follower_balance(&self) -> Result<Decimal> {
            Ok(self.follower)
        }

        async fn trader_balance(&self, _trader: &str) -> Result<Decimal> {
            self.trader.context("value endpoint unavailable")
        }
    }

    /// Trader balance lookups fail with `status` a set number of times
    /// before answering.
    struct FlakyBalances {
        failures: Mutex<u32>,
        status: StatusCode,
        calls: Mutex<u32>,
    }

    impl FlakyBalances {
        fn new(failures: u32, status: StatusCode) -> Self {
            Self {
                failures: Mutex::new(failures),
                status,
                calls: Mutex::new(0),
            }
        }
    }

    #[async_trait]
    impl BalanceSource for FlakyBalances {
        async fn follower_balance(&self) -> Result<Decimal> {
            Ok(dec!(1000))
        }

        async fn trader_balance(&self, trader: &str) -> Result<Decimal> {
            *self.calls.lock().unwrap() += 1;
            let mut failures = self.failures.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                let err = NetworkError::Status {
                    endpoint: "/value".to_string(),
                    status: self.status,
                    body: String::new(),
                };
                return Err(anyhow::Error::new(err)
                    .context(format!("Failed to fetch portfolio value for {trader}")));
            }
            Ok(dec!(1000))
        }
    }

    fn fast_retry() -> RetryConfig {
        RetryConfig {
            max_retries: 2,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(1),
            factor: 1.0,
        }
    }

    #[derive(Debug, Clone)]
    struct Recorded {
        size: Decimal,
        price: Decimal,
        status: TradeStatus,
        error: Option<String>,
    }

    #[derive(Default)]
    struct RecordingLedger {
        trades: Mutex<Vec<Recorded>>,
    }

    impl RecordingLedger {
        fn trades(&self) -> Vec<Recorded> {
            self.trades.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Ledger for RecordingLedger {
        async fn record_trade(
            &self,
            _signal: &TradeSignal,
            executed_size: Decimal,
            executed_price: Decimal,
            status: TradeStatus,
            _tx_hash: Option<&str>,
            error: Option<&str>,
        ) -> Result<i64> {
            let mut trades = self.trades.lock().unwrap();
            trades.push(Recorded {
                size: executed_size,
                price: executed_price,
                status,
                error: error.map(str::to_string),
            });
            Ok(trades.len() as i64)
        }

        async fn get_open_positions(&self) -> Result<Vec<Position>> {
            Ok(Vec::new())
        }

        async fn get_trade_history(&self, _limit: i64) -> Result<Vec<TradeRecord>> {
            Ok(Vec::new())
        }

        async fn get_total_pnl(&self) -> Result<Decimal> {
            Ok(Decimal::ZERO)
        }
    }

    fn signal(size_usd: Decimal, price: Decimal) -> TradeSignal {
        TradeSignal {
            trader_address: "0xtrader".to_string(),
            market_id: "0xmarket".to_string(),
            asset: "yes-token".to_string(),
            outcome: Outcome::Yes,
            side: TradeSide::Buy,
            size_usd,
            price,
            timestamp_ms: 1_700_000_000_000,
            transaction_hash: "0xsource".to_string(),
        }
    }

    fn pipeline(
        exchange: Arc<FakeExchange>,
        config: TradingConfig,
        balances: FixedBalances,
        ledger: Arc<RecordingLedger>,
    ) -> MirrorPipeline<FakeExchange> {
        MirrorPipeline::new(OrderExecutor::new(exchange, config), Arc::new(balances))
            .with_ledger(ledger)
    }

    #[tokio::test]
    async fn test_executes_proportional_order_and_records_it() {
        let exchange = Arc::new(FakeExchange::new(vec![], vec![level(dec!(0.50), dec!(1000))]));
        let ledger = Arc::new(RecordingLedger::default());
        let balances = FixedBalances {
            follower: dec!(1000),
            trader: Some(dec!(1000)),
        };
        let pipeline = pipeline(exchange.clone(), TradingConfig::default(), balances, ledger.clone());

        pipeline.handle(signal(dec!(100), dec!(0.50))).await.unwrap();

        // 100 * 1000 / 1100 = 90.91 USD at 0.50
        let submissions = exchange.submissions();
        assert_eq!(submissions.len(), 1);
        assert_eq!(submissions[0].1, "yes-token");
        assert_eq!(submissions[0].3, dec!(0.50));

        let trades = ledger.trades();
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].status, TradeStatus::Executed);
        assert_eq!(trades[0].size, dec!(181.82));
        assert_eq!(trades[0].price, dec!(0.50));
        assert!(trades[0].error.is_none());
    }

    #[tokio::test]
    async fn test_dry_run_prices_without_submitting() {
        let exchange = Arc::new(FakeExchange::new(vec![], vec![level(dec!(0.40), dec!(1000))]));
        let ledger = Arc::new(RecordingLedger::default());
        let config = TradingConfig {
            dry_run: true,
            ..Default::default()
        };
        let balances = FixedBalances {
            follower: dec!(0),
            trader: Some(dec!(0)),
        };
        let pipeline = pipeline(exchange.clone(), config, balances, ledger.clone());

        pipeline.handle(signal(dec!(100), dec!(0.40))).await.unwrap();

        assert!(exchange.submissions().is_empty());
        let trades = ledger.trades();
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].status, TradeStatus::Simulated);
        // Minimum order of 1 USD at 0.40
        assert_eq!(trades[0].size, dec!(2.5));
    }

    #[tokio::test]
    async fn test_slippage_failure_is_recorded_not_raised() {
        let exchange = Arc::new(FakeExchange::new(vec![], vec![level(dec!(0.60), dec!(1000))]));
        let ledger = Arc::new(RecordingLedger::default());
        let sink = Arc::new(CountingSink::default());
        let balances = FixedBalances {
            follower: dec!(1000),
            trader: Some(dec!(1000)),
        };
        let pipeline = pipeline(exchange.clone(), TradingConfig::default(), balances, ledger.clone())
            .with_metrics(Some(sink.clone()));

        pipeline.handle(signal(dec!(100), dec!(0.50))).await.unwrap();

        assert!(exchange.submissions().is_empty());
        let trades = ledger.trades();
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].status, TradeStatus::Failed);
        assert_eq!(trades[0].size, Decimal::ZERO);
        assert!(trades[0].error.as_deref().unwrap().contains("slippage"));
        assert_eq!(sink.count(metrics::EXECUTIONS_FAILED), 1);
    }

    #[tokio::test]
    async fn test_balance_failure_is_recorded() {
        let exchange = Arc::new(FakeExchange::new(vec![], vec![level(dec!(0.50), dec!(1000))]));
        let ledger = Arc::new(RecordingLedger::default());
        let balances = FixedBalances {
            follower: dec!(1000),
            trader: None,
        };
        let pipeline = pipeline(exchange.clone(), TradingConfig::default(), balances, ledger.clone());

        pipeline.handle(signal(dec!(100), dec!(0.50))).await.unwrap();

        let trades = ledger.trades();
        assert_eq!(trades[0].status, TradeStatus::Failed);
        assert!(trades[0]
            .error
            .as_deref()
            .unwrap()
            .contains("Failed to read trader balance"));
    }

    #[tokio::test]
    async fn test_nothing_filled_counts_as_failure() {
        let exchange = Arc::new(
            FakeExchange::new(vec![], vec![level(dec!(0.50), dec!(1000))])
                .script(&[Reply::Reject, Reply::Reject, Reply::Reject]),
        );
        let ledger = Arc::new(RecordingLedger::default());
        let balances = FixedBalances {
            follower: dec!(1000),
            trader: Some(dec!(1000)),
        };
        let pipeline = pipeline(exchange.clone(), TradingConfig::default(), balances, ledger.clone());

        pipeline.handle(signal(dec!(100), dec!(0.50))).await.unwrap();

        assert_eq!(exchange.submissions().len(), 3);
        let trades = ledger.trades();
        assert_eq!(trades[0].status, TradeStatus::Failed);
        assert!(trades[0].error.as_deref().unwrap().contains("no liquidity filled"));
    }

    #[tokio::test]
    async fn test_runs_without_ledger() {
        let exchange = Arc::new(FakeExchange::new(vec![], vec![level(dec!(0.50), dec!(1000))]));
        let balances = FixedBalances {
            follower: dec!(10),
            trader: Some(dec!(10)),
        };
        let pipeline = MirrorPipeline::new(
            OrderExecutor::new(exchange.clone(), TradingConfig::default()),
            Arc::new(balances),
        );

        pipeline.handle(signal(dec!(10), dec!(0.50))).await.unwrap();
        assert_eq!(exchange.submissions().len(), 1);
    }

    #[tokio::test]
    async fn test_transient_balance_failure_is_retried() {
        let exchange = Arc::new(FakeExchange::new(vec![], vec![level(dec!(0.50), dec!(1000))]));
        let ledger = Arc::new(RecordingLedger::default());
        let balances = Arc::new(FlakyBalances::new(1, StatusCode::SERVICE_UNAVAILABLE));
        let pipeline = MirrorPipeline::new(
            OrderExecutor::new(exchange.clone(), TradingConfig::default()),
            balances.clone(),
        )
        .with_retry(fast_retry())
        .with_ledger(ledger.clone());

        pipeline.handle(signal(dec!(100), dec!(0.50))).await.unwrap();

        assert_eq!(*balances.calls.lock().unwrap(), 2);
        assert_eq!(exchange.submissions().len(), 1);
        let trades = ledger.trades();
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].status, TradeStatus::Executed);
    }

    #[tokio::test]
    async fn test_permanent_balance_failure_is_not_retried() {
        let exchange = Arc::new(FakeExchange::new(vec![], vec![level(dec!(0.50), dec!(1000))]));
        let ledger = Arc::new(RecordingLedger::default());
        let balances = Arc::new(FlakyBalances::new(1, StatusCode::NOT_FOUND));
        let pipeline = MirrorPipeline::new(
            OrderExecutor::new(exchange.clone(), TradingConfig::default()),
            balances.clone(),
        )
        .with_retry(fast_retry())
        .with_ledger(ledger.clone());

        pipeline.handle(signal(dec!(100), dec!(0.50))).await.unwrap();

        assert_eq!(*balances.calls.lock().unwrap(), 1);
        assert!(exchange.submissions().is_empty());
        assert_eq!(ledger.trades()[0].status, TradeStatus::Failed);
    }

    #[test]
    fn test_transient_classification() {
        let status = |code| NetworkError::Status {
            endpoint: "/value".to_string(),
            status: code,
            body: String::new(),
        };

        assert!(is_transient(&anyhow::Error::new(status(StatusCode::TOO_MANY_REQUESTS))));
        assert!(is_transient(
            &anyhow::Error::new(status(StatusCode::BAD_GATEWAY)).context("Failed to read")
        ));
        assert!(is_transient(&anyhow::Error::new(ExchangeError::Network(status(
            StatusCode::SERVICE_UNAVAILABLE
        )))));
        assert!(!is_transient(&anyhow::Error::new(status(StatusCode::NOT_FOUND))));
        assert!(!is_transient(&anyhow::anyhow!("value endpoint unavailable")));
    }
}
