//! Trade monitor: polls followed traders and emits each new trade once.
//!
//! Every tick fans out one task per trader. A task fetches the trader's
//! recent activity and walks it in feed order, forwarding trades that are
//! in the aggregation window, not yet seen, and newer than the trader's
//! watermark. One trader's failure (fetch error, handler error or panic)
//! never reaches the tick or the other traders.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use futures::future::join_all;
use rust_decimal::Decimal;
use tracing::{debug, error, info, warn};

use crate::api::{ActivityFeed, ActivityRecord};
use crate::errors::NetworkError;
use crate::metrics::{self, SharedMetrics};
use crate::models::{Outcome, TradeSide, TradeSignal};
use crate::resilience::{call_guarded, retry_if, CircuitBreaker, CircuitError, RetryConfig};

use super::dedup::{DedupCache, Watermarks};
use super::scheduler::ScheduledTask;
use super::MonitorConfig;

/// Consumer of detected trade signals.
#[async_trait]
pub trait SignalHandler: Send + Sync {
    async fn handle(&self, signal: TradeSignal) -> Result<()>;
}

#[derive(Debug, Default)]
struct DetectionState {
    cache: DedupCache,
    watermarks: Watermarks,
}

#[derive(Clone)]
struct MonitorInner {
    config: MonitorConfig,
    feed: Arc<dyn ActivityFeed>,
    handler: Arc<dyn SignalHandler>,
    retry: RetryConfig,
    breaker: Option<Arc<CircuitBreaker>>,
    metrics: SharedMetrics,
    state: Arc<Mutex<DetectionState>>,
}

/// Polls activity feeds for the configured traders. Cheap to clone.
#[derive(Clone)]
pub struct TradeMonitor {
    inner: Arc<MonitorInner>,
}

impl TradeMonitor {
    pub fn new(
        config: MonitorConfig,
        feed: Arc<dyn ActivityFeed>,
        handler: Arc<dyn SignalHandler>,
    ) -> Self {
        Self {
            inner: Arc::new(MonitorInner {
                config,
                feed,
                handler,
                retry: RetryConfig::default(),
                breaker: None,
                metrics: None,
                state: Arc::new(Mutex::new(DetectionState::default())),
            }),
        }
    }

    fn map_inner(self, f: impl FnOnce(&mut MonitorInner)) -> Self {
        let mut inner = Arc::unwrap_or_clone(self.inner);
        f(&mut inner);
        Self {
            inner: Arc::new(inner),
        }
    }

    pub fn with_retry(self, retry: RetryConfig) -> Self {
        self.map_inner(|inner| inner.retry = retry)
    }

    pub fn with_circuit_breaker(self, breaker: Arc<CircuitBreaker>) -> Self {
        self.map_inner(|inner| inner.breaker = Some(breaker))
    }

    pub fn with_metrics(self, metrics: SharedMetrics) -> Self {
        self.map_inner(|inner| inner.metrics = metrics)
    }

    #[cfg(test)]
    pub fn with_cache_limits(self, max_size: usize, batch_size: usize) -> Self {
        self.map_inner(|inner| {
            inner.state = Arc::new(Mutex::new(DetectionState {
                cache: DedupCache::with_limits(max_size, batch_size),
                watermarks: Watermarks::default(),
            }))
        })
    }

    /// Run one tick now, then keep ticking every fetch interval until the
    /// returned task is stopped. A circuit left open by an earlier run is
    /// closed first.
    pub async fn start(&self) -> ScheduledTask {
        if let Some(breaker) = &self.inner.breaker {
            breaker.reset();
        }

        info!(
            traders = self.inner.config.traders.len(),
            interval_ms = self.inner.config.fetch_interval.as_millis() as u64,
            window_secs = self.inner.config.aggregation_window.as_secs(),
            "Starting trade monitor"
        );

        self.tick().await;

        let monitor = self.clone();
        ScheduledTask::every("trade-monitor", self.inner.config.fetch_interval, move || {
            let monitor = monitor.clone();
            async move { monitor.tick().await }
        })
    }

    /// Poll every trader concurrently, wait for all of them, then bound the
    /// dedup cache.
    pub async fn tick(&self) {
        let started = Instant::now();

        let tasks = self.inner.config.traders.iter().map(|trader| {
            let inner = self.inner.clone();
            let trader = trader.clone();
            tokio::spawn(async move { inner.process_trader(&trader).await })
        });

        let results = join_all(tasks).await;
        for (trader, result) in self.inner.config.traders.iter().zip(results) {
            if let Err(e) = result {
                error!(trader = %trader, error = %e, "Trader task aborted");
                metrics::incr(&self.inner.metrics, metrics::CONSUMER_FAILURES);
            }
        }

        let evicted = lock(&self.inner.state).cache.cleanup();
        if evicted > 0 {
            debug!(evicted, "Evicted oldest transaction hashes");
        }

        metrics::observe(
            &self.inner.metrics,
            metrics::TICK_SECONDS,
            started.elapsed().as_secs_f64(),
        );
    }

    /// Number of transaction hashes currently remembered.
    pub fn seen_count(&self) -> usize {
        lock(&self.inner.state).cache.len()
    }

    /// Last forwarded activity time for a trader, epoch seconds.
    #[cfg(test)]
    pub fn watermark(&self, trader: &str) -> i64 {
        lock(&self.inner.state).watermarks.get(trader)
    }
}

impl MonitorInner {
    async fn process_trader(&self, trader: &str) {
        let activities = match self.fetch(trader).await {
            Ok(activities) => activities,
            Err(e) => {
                warn!(trader = %trader, error = %e, "Failed to fetch trader activity");
                metrics::incr(&self.metrics, metrics::FEED_FAILURES);
                return;
            }
        };

        let cutoff = Utc::now().timestamp() - self.config.aggregation_window.as_secs() as i64;

        for record in &activities {
            let Some(signal) = self.admit(trader, record, cutoff) else {
                continue;
            };

            metrics::incr(&self.metrics, metrics::SIGNALS_DETECTED);
            info!(
                trader = %trader,
                market = %signal.market_id,
                side = %signal.side,
                outcome = %signal.outcome,
                size_usd = %signal.size_usd,
                price = %signal.price,
                tx = %signal.transaction_hash,
                "New trade detected"
            );

            if let Err(e) = self.handler.handle(signal).await {
                let error = format!("{e:#}");
                error!(trader = %trader, error = %error, "Signal handler failed");
                metrics::incr(&self.metrics, metrics::CONSUMER_FAILURES);
            }
        }
    }

    async fn fetch(&self, trader: &str) -> Result<Vec<ActivityRecord>, CircuitError<NetworkError>> {
        retry_if(
            &self.retry,
            "fetch_activity",
            || call_guarded(self.breaker.as_deref(), || self.feed.fetch_activity(trader)),
            |e: &CircuitError<NetworkError>| {
                matches!(e, CircuitError::Inner(inner) if inner.is_retryable())
            },
        )
        .await
    }

    /// Decide whether an activity is a new trade. Check-and-record happens
    /// under one lock so concurrent traders cannot forward the same hash.
    fn admit(&self, trader: &str, record: &ActivityRecord, cutoff: i64) -> Option<TradeSignal> {
        if !record.is_trade() {
            return None;
        }

        let Some(timestamp_ms) = record.timestamp.to_millis() else {
            debug!(trader = %trader, timestamp = ?record.timestamp, "Skipping activity with unparseable timestamp");
            return None;
        };
        let timestamp = timestamp_ms.div_euclid(1000);
        if timestamp < cutoff {
            return None;
        }

        let mut state = lock(&self.state);

        if state.cache.contains(&record.transaction_hash) {
            metrics::incr(&self.metrics, metrics::DUPLICATES_SKIPPED);
            return None;
        }
        if !state.watermarks.is_newer(trader, timestamp) {
            return None;
        }

        let Some(side) = TradeSide::parse(&record.side) else {
            warn!(trader = %trader, side = %record.side, tx = %record.transaction_hash, "Skipping trade with unknown side");
            return None;
        };

        let size_usd = TradeSignal::notional_from_feed(record.usdc_size, record.size, record.price);
        if size_usd <= Decimal::ZERO {
            debug!(trader = %trader, size_usd = %size_usd, tx = %record.transaction_hash, "Skipping trade without positive notional");
            return None;
        }

        state.cache.insert(&record.transaction_hash);
        state.watermarks.advance(trader, timestamp);
        drop(state);

        Some(TradeSignal {
            trader_address: trader.to_string(),
            market_id: record.condition_id.clone(),
            asset: record.asset.clone(),
            outcome: Outcome::from_index(record.outcome_index),
            side,
            size_usd,
            price: record.price,
            timestamp_ms,
            transaction_hash: record.transaction_hash.clone(),
        })
    }
}

fn lock(state: &Mutex<DetectionState>) -> MutexGuard<'_, DetectionState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::time::Duration;

    use reqwest::StatusCode;
    use rust_decimal_macros::dec;

    use crate::api::FeedTimestamp;
    use crate::metrics::testing::CountingSink;
    use crate::resilience::{CircuitBreakerConfig, CircuitState};

    #[derive(Default)]
    struct FakeFeed {
        responses: Mutex<HashMap<String, Vec<ActivityRecord>>>,
        failing: Mutex<HashMap<String, StatusCode>>,
        calls: Mutex<HashMap<String, u32>>,
    }

    impl FakeFeed {
        fn set(&self, trader: &str, records: Vec<ActivityRecord>) {
            self.responses
                .lock()
                .unwrap()
                .insert(trader.to_string(), records);
        }

        fn fail(&self, trader: &str, status: StatusCode) {
            self.failing
                .lock()
                .unwrap()
                .insert(trader.to_string(), status);
        }

        fn calls(&self, trader: &str) -> u32 {
            self.calls.lock().unwrap().get(trader).copied().unwrap_or(0)
        }
    }

    #[async_trait]
    impl ActivityFeed for FakeFeed {
        async fn fetch_activity(&self, trader: &str) -> Result<Vec<ActivityRecord>, NetworkError> {
            *self
                .calls
                .lock()
                .unwrap()
                .entry(trader.to_string())
                .or_default() += 1;

            if let Some(status) = self.failing.lock().unwrap().get(trader) {
                return Err(NetworkError::Status {
                    endpoint: "/activity".to_string(),
                    status: *status,
                    body: String::new(),
                });
            }
            Ok(self
                .responses
                .lock()
                .unwrap()
                .get(trader)
                .cloned()
                .unwrap_or_default())
        }
    }

    #[derive(Default)]
    struct RecordingHandler {
        received: Mutex<Vec<TradeSignal>>,
        fail_for: Option<String>,
        panic_for: Option<String>,
    }

    impl RecordingHandler {
        fn hashes(&self) -> Vec<String> {
            self.received
                .lock()
                .unwrap()
                .iter()
                .map(|s| s.transaction_hash.clone())
                .collect()
        }
    }

    #[async_trait]
    impl SignalHandler for RecordingHandler {
        async fn handle(&self, signal: TradeSignal) -> Result<()> {
            if self.panic_for.as_deref() == Some(signal.trader_address.as_str()) {
                panic!("handler blew up");
            }
            let fail = self.fail_for.as_deref() == Some(signal.trader_address.as_str());
            self.received.lock().unwrap().push(signal);
            if fail {
                anyhow::bail!("downstream unavailable");
            }
            Ok(())
        }
    }

    fn now() -> i64 {
        Utc::now().timestamp()
    }

    fn trade(hash: &str, timestamp: i64) -> ActivityRecord {
        ActivityRecord {
            activity_type: "TRADE".to_string(),
            proxy_wallet: String::new(),
            timestamp: FeedTimestamp::Number(timestamp as f64),
            condition_id: "0xmarket".to_string(),
            asset: "token-yes".to_string(),
            size: dec!(100),
            usdc_size: dec!(42),
            price: dec!(0.42),
            side: "buy".to_string(),
            outcome_index: 0,
            transaction_hash: hash.to_string(),
        }
    }

    fn config(traders: &[&str]) -> MonitorConfig {
        MonitorConfig {
            traders: traders.iter().map(|t| t.to_string()).collect(),
            fetch_interval: Duration::from_secs(1),
            aggregation_window: Duration::from_secs(300),
        }
    }

    fn fast_retry() -> RetryConfig {
        RetryConfig {
            max_retries: 1,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(1),
            factor: 1.0,
        }
    }

    fn monitor(
        traders: &[&str],
        feed: Arc<FakeFeed>,
        handler: Arc<RecordingHandler>,
    ) -> TradeMonitor {
        TradeMonitor::new(config(traders), feed, handler).with_retry(fast_retry())
    }

    #[tokio::test]
    async fn test_signal_is_normalized() {
        let feed = Arc::new(FakeFeed::default());
        let handler = Arc::new(RecordingHandler::default());
        let ts = now() - 10;

        let mut record = trade("0x1", ts);
        record.usdc_size = Decimal::ZERO;
        record.outcome_index = 1;
        record.side = "Sell".to_string();
        feed.set("0xa", vec![record]);

        monitor(&["0xa"], feed, handler.clone()).tick().await;

        let received = handler.received.lock().unwrap();
        assert_eq!(received.len(), 1);
        let signal = &received[0];
        assert_eq!(signal.trader_address, "0xa");
        assert_eq!(signal.outcome, Outcome::No);
        assert_eq!(signal.side, TradeSide::Sell);
        assert_eq!(signal.size_usd, dec!(42.00));
        assert_eq!(signal.timestamp_ms, ts * 1000);
    }

    #[tokio::test]
    async fn test_same_hash_is_forwarded_once_across_ticks_and_traders() {
        let feed = Arc::new(FakeFeed::default());
        let handler = Arc::new(RecordingHandler::default());
        let ts = now() - 10;
        feed.set("0xa", vec![trade("0xshared", ts)]);
        feed.set("0xb", vec![trade("0xshared", ts)]);

        let monitor = monitor(&["0xa", "0xb"], feed, handler.clone());
        monitor.tick().await;
        monitor.tick().await;

        assert_eq!(handler.hashes(), vec!["0xshared".to_string()]);
        assert_eq!(monitor.seen_count(), 1);
    }

    #[tokio::test]
    async fn test_skips_non_trades_stale_and_malformed_activity() {
        let feed = Arc::new(FakeFeed::default());
        let handler = Arc::new(RecordingHandler::default());
        let ts = now() - 10;

        let mut redeem = trade("0xredeem", ts);
        redeem.activity_type = "REDEEM".to_string();
        let stale = trade("0xstale", now() - 400);
        let mut garbled = trade("0xgarbled", ts);
        garbled.timestamp = FeedTimestamp::Text("not a date".to_string());
        let mut sideless = trade("0xsideless", ts);
        sideless.side = "HOLD".to_string();
        let mut negative = trade("0xnegative", ts);
        negative.usdc_size = Decimal::ZERO;
        negative.size = dec!(-100);

        feed.set("0xa", vec![redeem, stale, garbled, sideless, negative]);

        let monitor = monitor(&["0xa"], feed, handler.clone());
        monitor.tick().await;

        assert!(handler.hashes().is_empty());
        assert_eq!(monitor.seen_count(), 0);
        assert_eq!(monitor.watermark("0xa"), 0);
    }

    #[tokio::test]
    async fn test_watermark_rejects_activity_at_or_before_last_forwarded() {
        let feed = Arc::new(FakeFeed::default());
        let handler = Arc::new(RecordingHandler::default());
        let ts = now() - 60;

        let monitor = monitor(&["0xa"], feed.clone(), handler.clone());

        feed.set("0xa", vec![trade("0x1", ts)]);
        monitor.tick().await;
        assert_eq!(monitor.watermark("0xa"), ts);

        feed.set("0xa", vec![trade("0x2", ts), trade("0x0", ts - 5)]);
        monitor.tick().await;

        feed.set("0xa", vec![trade("0x3", ts + 1)]);
        monitor.tick().await;

        assert_eq!(handler.hashes(), vec!["0x1".to_string(), "0x3".to_string()]);
        assert_eq!(monitor.watermark("0xa"), ts + 1);
    }

    #[tokio::test]
    async fn test_newest_first_feed_forwards_only_newest_per_tick() {
        let feed = Arc::new(FakeFeed::default());
        let handler = Arc::new(RecordingHandler::default());
        let ts = now() - 30;
        feed.set("0xa", vec![trade("0xnew", ts), trade("0xold", ts - 10)]);

        monitor(&["0xa"], feed, handler.clone()).tick().await;

        assert_eq!(handler.hashes(), vec!["0xnew".to_string()]);
    }

    #[tokio::test]
    async fn test_fetch_failure_is_isolated() {
        let feed = Arc::new(FakeFeed::default());
        let handler = Arc::new(RecordingHandler::default());
        let sink = Arc::new(CountingSink::default());
        feed.fail("0xa", StatusCode::SERVICE_UNAVAILABLE);
        feed.set("0xb", vec![trade("0xb1", now() - 5)]);

        monitor(&["0xa", "0xb"], feed.clone(), handler.clone())
            .with_metrics(Some(sink.clone()))
            .tick()
            .await;

        assert_eq!(handler.hashes(), vec!["0xb1".to_string()]);
        // One retry for a retryable failure.
        assert_eq!(feed.calls("0xa"), 2);
        assert_eq!(sink.count(metrics::FEED_FAILURES), 1);
        assert_eq!(sink.count(metrics::SIGNALS_DETECTED), 1);
    }

    #[tokio::test]
    async fn test_non_retryable_fetch_failure_is_not_retried() {
        let feed = Arc::new(FakeFeed::default());
        let handler = Arc::new(RecordingHandler::default());
        feed.fail("0xa", StatusCode::NOT_FOUND);

        monitor(&["0xa"], feed.clone(), handler).tick().await;

        assert_eq!(feed.calls("0xa"), 1);
    }

    #[tokio::test]
    async fn test_handler_error_and_panic_are_contained() {
        let feed = Arc::new(FakeFeed::default());
        let handler = Arc::new(RecordingHandler {
            fail_for: Some("0xa".to_string()),
            panic_for: Some("0xp".to_string()),
            ..Default::default()
        });
        let sink = Arc::new(CountingSink::default());
        let ts = now() - 5;
        feed.set("0xa", vec![trade("0xa1", ts)]);
        feed.set("0xp", vec![trade("0xp1", ts)]);
        feed.set("0xb", vec![trade("0xb1", ts)]);

        let monitor = monitor(&["0xa", "0xp", "0xb"], feed, handler.clone())
            .with_metrics(Some(sink.clone()));
        monitor.tick().await;

        let mut hashes = handler.hashes();
        hashes.sort();
        assert_eq!(hashes, vec!["0xa1".to_string(), "0xb1".to_string()]);
        // One handler error plus one aborted task.
        assert_eq!(sink.count(metrics::CONSUMER_FAILURES), 2);
        // A failed delivery still counts as seen.
        assert_eq!(monitor.seen_count(), 3);
    }

    #[tokio::test]
    async fn test_cache_stays_bounded_after_tick() {
        let feed = Arc::new(FakeFeed::default());
        let handler = Arc::new(RecordingHandler::default());
        let base = now() - 100;
        let traders: Vec<String> = (0..12).map(|i| format!("0xt{i}")).collect();
        for (i, trader) in traders.iter().enumerate() {
            feed.set(trader, vec![trade(&format!("0xh{i}"), base + i as i64)]);
        }
        let trader_refs: Vec<&str> = traders.iter().map(String::as_str).collect();

        let monitor = monitor(&trader_refs, feed, handler.clone()).with_cache_limits(10, 3);
        monitor.tick().await;

        assert_eq!(handler.hashes().len(), 12);
        assert!(monitor.seen_count() <= 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_ticks_immediately_then_on_interval() {
        let feed = Arc::new(FakeFeed::default());
        let handler = Arc::new(RecordingHandler::default());

        let monitor = monitor(&["0xa"], feed.clone(), handler);
        let task = monitor.start().await;
        assert_eq!(feed.calls("0xa"), 1);

        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert_eq!(feed.calls("0xa"), 3);

        task.join().await;
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(feed.calls("0xa"), 3);
    }

    #[tokio::test]
    async fn test_start_closes_a_circuit_left_open() {
        let feed = Arc::new(FakeFeed::default());
        let handler = Arc::new(RecordingHandler::default());
        let breaker = Arc::new(CircuitBreaker::new(
            "data-api",
            CircuitBreakerConfig {
                failure_threshold: 1,
                success_threshold: 1,
                timeout: Duration::from_secs(60),
            },
        ));
        let _ = breaker.call(|| async { Err::<(), _>("down") }).await;
        assert_eq!(breaker.state(), CircuitState::Open);

        let monitor = monitor(&["0xa"], feed.clone(), handler).with_circuit_breaker(breaker.clone());
        let task = monitor.start().await;

        assert_eq!(feed.calls("0xa"), 1);
        assert_eq!(breaker.state(), CircuitState::Closed);
        task.join().await;
    }
}
