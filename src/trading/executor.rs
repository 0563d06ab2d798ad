//! Order executor: turns a USD amount into fill-or-kill orders against the
//! live book.
//!
//! Before anything is submitted the best price is checked against the
//! trader's reference price (slippage ceiling) and against an optional hard
//! price bound. The fill loop then takes liquidity one level at a time,
//! re-reading the book before every attempt, until the amount is filled,
//! the book side is empty, or too many attempts in a row fail.

use std::sync::Arc;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use crate::api::{BookLevel, Exchange, MarketInfo, OrderBook, OrderResponse, OrderType};
use crate::errors::{ExchangeError, ExecutionError};
use crate::metrics::{self, SharedMetrics};
use crate::models::{Outcome, TradeSide};
use crate::resilience::{call_guarded, retry_if, CircuitBreaker, CircuitError, RetryConfig};

use super::TradingConfig;

/// What to execute.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderRequest {
    pub market_id: String,
    pub outcome: Outcome,
    pub side: TradeSide,
    /// Notional to fill, in USDC
    pub usd_amount: Decimal,
    /// Price the trader got; slippage is measured against it
    pub reference_price: Option<Decimal>,
    /// Never buy above / sell below this
    pub price_limit: Option<Decimal>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Fill {
    pub price: Decimal,
    pub quantity: Decimal,
    pub notional: Decimal,
    pub order_id: Option<String>,
    pub transaction_hash: Option<String>,
}

/// Outcome of an execution. `filled_usd` may fall short of `requested_usd`
/// when the book runs dry or the attempt budget runs out.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionReport {
    pub token_id: String,
    pub side: TradeSide,
    pub requested_usd: Decimal,
    pub filled_usd: Decimal,
    pub fills: Vec<Fill>,
}

impl ExecutionReport {
    fn new(token_id: &str, side: TradeSide, requested_usd: Decimal) -> Self {
        Self {
            token_id: token_id.to_string(),
            side,
            requested_usd,
            filled_usd: Decimal::ZERO,
            fills: Vec::new(),
        }
    }

    pub fn filled_quantity(&self) -> Decimal {
        self.fills.iter().map(|f| f.quantity).sum()
    }

    /// Volume-weighted average fill price.
    pub fn average_price(&self) -> Option<Decimal> {
        let quantity = self.filled_quantity();
        if quantity.is_zero() {
            None
        } else {
            Some(self.filled_usd / quantity)
        }
    }

    pub fn unfilled_usd(&self) -> Decimal {
        (self.requested_usd - self.filled_usd).max(Decimal::ZERO)
    }

    /// Last settlement hash reported by the exchange.
    pub fn transaction_hash(&self) -> Option<&str> {
        self.fills
            .iter()
            .rev()
            .find_map(|f| f.transaction_hash.as_deref())
    }
}

pub struct OrderExecutor<X: Exchange> {
    exchange: Arc<X>,
    config: TradingConfig,
    retry: RetryConfig,
    breaker: Option<Arc<CircuitBreaker>>,
    metrics: SharedMetrics,
}

impl<X: Exchange> OrderExecutor<X> {
    pub fn new(exchange: Arc<X>, config: TradingConfig) -> Self {
        Self {
            exchange,
            config,
            retry: RetryConfig::default(),
            breaker: None,
            metrics: None,
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_circuit_breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.breaker = Some(breaker);
        self
    }

    pub fn with_metrics(mut self, metrics: SharedMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn config(&self) -> &TradingConfig {
        &self.config
    }

    /// Execute `request` against the live book.
    pub async fn execute(&self, request: &OrderRequest) -> Result<ExecutionReport, ExecutionError> {
        let token_id = self.resolve_token(request).await?;
        let book = self.fetch_book(&token_id).await?;
        self.check_entry(request, &book)?;

        let max_attempts = self.config.max_order_attempts;
        let mut report = ExecutionReport::new(&token_id, request.side, request.usd_amount);
        let mut remaining = request.usd_amount;
        let mut attempts = 0u32;

        while remaining > self.config.min_remaining_usd && attempts < max_attempts {
            let book = self.fetch_book(&token_id).await?;
            let Some(level) = side_levels(&book, request.side).next().copied() else {
                warn!(token_id = %token_id, side = %request.side, remaining = %remaining, "Book side emptied before order filled");
                break;
            };

            if let Some(limit) = request.price_limit {
                if breaches_limit(request.side, level.price, limit) {
                    warn!(token_id = %token_id, best = %level.price, limit = %limit, remaining = %remaining, "Next level breaches price limit, stopping");
                    break;
                }
            }

            let fillable = remaining.min(level.notional());
            let quantity = fillable / level.price;

            debug!(
                token_id = %token_id,
                side = %request.side,
                price = %level.price,
                quantity = %quantity,
                attempt = attempts + 1,
                "Submitting fill-or-kill order"
            );

            match self.submit(request.side, &token_id, quantity, level.price).await {
                Ok(response) if response.success => {
                    remaining -= fillable;
                    attempts = 0;
                    report.filled_usd += fillable;
                    report.fills.push(Fill {
                        price: level.price,
                        quantity,
                        notional: fillable,
                        order_id: response.order_id.clone(),
                        transaction_hash: response.transaction_hash().map(str::to_string),
                    });
                    metrics::incr(&self.metrics, metrics::ORDERS_SUBMITTED);
                    info!(
                        token_id = %token_id,
                        price = %level.price,
                        filled = %fillable,
                        remaining = %remaining,
                        order_id = ?response.order_id,
                        "Order filled"
                    );
                }
                Ok(response) => {
                    attempts += 1;
                    metrics::incr(&self.metrics, metrics::ORDERS_REJECTED);
                    warn!(
                        token_id = %token_id,
                        attempt = attempts,
                        max_attempts,
                        reason = %response.error_msg,
                        "Order rejected"
                    );
                }
                Err(e) => {
                    attempts += 1;
                    warn!(token_id = %token_id, attempt = attempts, max_attempts, error = %e, "Order submission failed");
                    if attempts >= max_attempts {
                        metrics::incr(&self.metrics, metrics::EXECUTIONS_FAILED);
                        return Err(ExecutionError::ExhaustedRetries {
                            attempts,
                            source: Box::new(e.into()),
                        });
                    }
                }
            }
        }

        if report.filled_usd < report.requested_usd && remaining > self.config.min_remaining_usd {
            warn!(
                token_id = %token_id,
                requested = %report.requested_usd,
                filled = %report.filled_usd,
                "Order partially filled"
            );
        }
        metrics::observe(
            &self.metrics,
            metrics::FILLED_USD,
            report.filled_usd.to_f64().unwrap_or(0.0),
        );

        Ok(report)
    }

    /// Run every pre-trade check and price the order against the current
    /// book without submitting anything.
    pub async fn simulate(&self, request: &OrderRequest) -> Result<ExecutionReport, ExecutionError> {
        let token_id = self.resolve_token(request).await?;
        let book = self.fetch_book(&token_id).await?;
        self.check_entry(request, &book)?;

        let mut report = ExecutionReport::new(&token_id, request.side, request.usd_amount);
        let mut remaining = request.usd_amount;

        for level in side_levels(&book, request.side) {
            if remaining <= self.config.min_remaining_usd {
                break;
            }
            if let Some(limit) = request.price_limit {
                if breaches_limit(request.side, level.price, limit) {
                    break;
                }
            }
            let fillable = remaining.min(level.notional());
            remaining -= fillable;
            report.filled_usd += fillable;
            report.fills.push(Fill {
                price: level.price,
                quantity: fillable / level.price,
                notional: fillable,
                order_id: None,
                transaction_hash: None,
            });
        }

        Ok(report)
    }

    /// Slippage and price-bound checks on the best level.
    fn check_entry(&self, request: &OrderRequest, book: &OrderBook) -> Result<(), ExecutionError> {
        if request.usd_amount <= Decimal::ZERO {
            return Err(ExecutionError::Validation(format!(
                "order amount must be positive, got {}",
                request.usd_amount
            )));
        }

        let best = side_levels(book, request.side)
            .next()
            .map(|level| level.price)
            .ok_or_else(|| {
                ExecutionError::Validation(format!(
                    "no {} liquidity for {} in market {}",
                    match request.side {
                        TradeSide::Buy => "ask",
                        TradeSide::Sell => "bid",
                    },
                    request.outcome,
                    request.market_id
                ))
            })?;

        if let Some(reference) = request.reference_price.filter(|p| *p > Decimal::ZERO) {
            let slippage = adverse_slippage(request.side, best, reference);
            if slippage > Decimal::ZERO {
                warn!(
                    market = %request.market_id,
                    side = %request.side,
                    best = %best,
                    reference = %reference,
                    slippage = %slippage.round_dp(4),
                    "Price moved against the trader's entry"
                );
            }
            if slippage > self.config.max_slippage {
                return Err(ExecutionError::SlippageExceeded {
                    slippage,
                    max: self.config.max_slippage,
                });
            }
        }

        if let Some(limit) = request.price_limit {
            if breaches_limit(request.side, best, limit) {
                return Err(ExecutionError::PriceProtectionTriggered { best, limit });
            }
        }

        Ok(())
    }

    async fn resolve_token(&self, request: &OrderRequest) -> Result<String, ExecutionError> {
        let market = self.fetch_market(&request.market_id).await?;
        token_for_outcome(&market, request.outcome)
            .map(str::to_string)
            .ok_or_else(|| {
                ExecutionError::Validation(format!(
                    "market {} has no token for outcome {}",
                    request.market_id, request.outcome
                ))
            })
    }

    async fn fetch_market(&self, market_id: &str) -> Result<MarketInfo, ExecutionError> {
        let market = retry_if(
            &self.retry,
            "get_market",
            || call_guarded(self.breaker.as_deref(), || self.exchange.get_market(market_id)),
            is_retryable,
        )
        .await?;
        Ok(market)
    }

    async fn fetch_book(&self, token_id: &str) -> Result<OrderBook, ExecutionError> {
        let book = retry_if(
            &self.retry,
            "get_order_book",
            || call_guarded(self.breaker.as_deref(), || self.exchange.get_order_book(token_id)),
            is_retryable,
        )
        .await?;
        Ok(book)
    }

    /// Sign and submit one order. Not retried here; the fill loop owns the
    /// attempt budget.
    async fn submit(
        &self,
        side: TradeSide,
        token_id: &str,
        quantity: Decimal,
        price: Decimal,
    ) -> Result<OrderResponse, CircuitError<ExchangeError>> {
        call_guarded(self.breaker.as_deref(), || async {
            let order = self
                .exchange
                .create_order(side, token_id, quantity, price)
                .await?;
            self.exchange.submit_order(&order, OrderType::Fok).await
        })
        .await
    }
}

fn is_retryable(err: &CircuitError<ExchangeError>) -> bool {
    matches!(err, CircuitError::Inner(inner) if inner.is_retryable())
}

/// YES maps to the token labelled "Yes" or else the first token; NO to
/// "No" or else the second.
pub fn token_for_outcome(market: &MarketInfo, outcome: Outcome) -> Option<&str> {
    let fallback = match outcome {
        Outcome::Yes => 0,
        Outcome::No => 1,
    };

    market
        .tokens
        .iter()
        .find(|t| t.outcome.eq_ignore_ascii_case(outcome.label()))
        .or_else(|| market.tokens.get(fallback))
        .map(|t| t.token_id.as_str())
        .filter(|id| !id.is_empty())
}

/// Tradable levels on the side an order takes from. Levels without a
/// positive price and size are skipped whatever the exchange returned.
fn side_levels(book: &OrderBook, side: TradeSide) -> impl Iterator<Item = &BookLevel> {
    let levels = match side {
        TradeSide::Buy => &book.asks,
        TradeSide::Sell => &book.bids,
    };
    levels
        .iter()
        .filter(|level| level.price > Decimal::ZERO && level.size > Decimal::ZERO)
}

/// Positive when the market moved against us relative to `reference`.
fn adverse_slippage(side: TradeSide, best: Decimal, reference: Decimal) -> Decimal {
    match side {
        TradeSide::Buy => (best - reference) / reference,
        TradeSide::Sell => (reference - best) / reference,
    }
}

fn breaches_limit(side: TradeSide, price: Decimal, limit: Decimal) -> bool {
    match side {
        TradeSide::Buy => price > limit,
        TradeSide::Sell => price < limit,
    }
}
