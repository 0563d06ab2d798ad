//! In-memory exchange shared by the executor and pipeline tests.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use reqwest::StatusCode;
use rust_decimal::Decimal;

use crate::api::{
    BookLevel, Exchange, MarketInfo, OrderBook, OrderResponse, OrderType, SignedOrder, TokenInfo,
};
use crate::errors::{ExchangeError, NetworkError};
use crate::models::TradeSide;

#[derive(Debug, Clone, Copy)]
pub(crate) enum Reply {
    Accept,
    Reject,
    Fail,
}

/// Exchange whose book shrinks as orders fill.
pub(crate) struct FakeExchange {
    pub market: MarketInfo,
    pub book: Mutex<OrderBook>,
    replies: Mutex<VecDeque<Reply>>,
    submitted: Mutex<Vec<(TradeSide, String, Decimal, Decimal)>>,
    pub book_fetches: Mutex<u32>,
    pub market_failures: Mutex<u32>,
    raw_book: bool,
}

impl FakeExchange {
    pub fn new(bids: Vec<BookLevel>, asks: Vec<BookLevel>) -> Self {
        Self {
            market: MarketInfo {
                condition_id: "0xmarket".to_string(),
                question: "Will it happen?".to_string(),
                tokens: vec![
                    TokenInfo {
                        token_id: "yes-token".to_string(),
                        outcome: "Yes".to_string(),
                    },
                    TokenInfo {
                        token_id: "no-token".to_string(),
                        outcome: "No".to_string(),
                    },
                ],
                neg_risk: false,
            },
            book: Mutex::new(OrderBook {
                bids,
                asks,
                ..Default::default()
            }),
            replies: Mutex::new(VecDeque::new()),
            submitted: Mutex::new(Vec::new()),
            book_fetches: Mutex::new(0),
            market_failures: Mutex::new(0),
            raw_book: false,
        }
    }

    pub fn script(self, replies: &[Reply]) -> Self {
        self.replies.lock().unwrap().extend(replies.iter().copied());
        self
    }

    pub fn failing_market_fetches(self, count: u32) -> Self {
        *self.market_failures.lock().unwrap() = count;
        self
    }

    /// Serve the book exactly as given, without sorting or filtering.
    pub fn unsorted(mut self) -> Self {
        self.raw_book = true;
        self
    }

    pub fn submissions(&self) -> Vec<(TradeSide, String, Decimal, Decimal)> {
        self.submitted.lock().unwrap().clone()
    }

    fn consume(&self, side: TradeSide, quantity: Decimal) {
        let mut book = self.book.lock().unwrap();
        *book = std::mem::take(&mut *book).best_first();
        let levels = match side {
            TradeSide::Buy => &mut book.asks,
            TradeSide::Sell => &mut book.bids,
        };
        if let Some(level) = levels.first_mut() {
            level.size -= quantity;
            if level.size <= Decimal::ZERO {
                levels.remove(0);
            }
        }
    }
}

fn unavailable() -> ExchangeError {
    ExchangeError::Network(NetworkError::Status {
        endpoint: "/markets".to_string(),
        status: StatusCode::BAD_GATEWAY,
        body: String::new(),
    })
}

#[async_trait]
impl Exchange for FakeExchange {
    async fn get_market(&self, _market_id: &str) -> Result<MarketInfo, ExchangeError> {
        let mut failures = self.market_failures.lock().unwrap();
        if *failures > 0 {
            *failures -= 1;
            return Err(unavailable());
        }
        Ok(self.market.clone())
    }

    async fn get_order_book(&self, _token_id: &str) -> Result<OrderBook, ExchangeError> {
        *self.book_fetches.lock().unwrap() += 1;
        let book = self.book.lock().unwrap().clone();
        Ok(if self.raw_book { book } else { book.best_first() })
    }

    async fn create_order(
        &self,
        side: TradeSide,
        token_id: &str,
        size: Decimal,
        price: Decimal,
    ) -> Result<SignedOrder, ExchangeError> {
        self.submitted
            .lock()
            .unwrap()
            .push((side, token_id.to_string(), size, price));
        Ok(SignedOrder {
            salt: "1".to_string(),
            maker: String::new(),
            signer: String::new(),
            taker: String::new(),
            token_id: token_id.to_string(),
            maker_amount: size.to_string(),
            taker_amount: price.to_string(),
            side,
            expiration: "0".to_string(),
            nonce: "0".to_string(),
            fee_rate_bps: "0".to_string(),
            signature_type: 0,
            signature: "0x".to_string(),
        })
    }

    async fn submit_order(
        &self,
        order: &SignedOrder,
        order_type: OrderType,
    ) -> Result<OrderResponse, ExchangeError> {
        assert_eq!(order_type, OrderType::Fok);
        let reply = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Reply::Accept);

        match reply {
            Reply::Accept => {
                let quantity: Decimal = order.maker_amount.parse().unwrap();
                self.consume(order.side, quantity);
                Ok(OrderResponse {
                    success: true,
                    order_id: Some("0xorder".to_string()),
                    ..Default::default()
                })
            }
            Reply::Reject => Ok(OrderResponse::rejected("FOK order not filled")),
            Reply::Fail => Err(unavailable()),
        }
    }
}

pub(crate) fn level(price: Decimal, size: Decimal) -> BookLevel {
    BookLevel::new(price, size)
}
