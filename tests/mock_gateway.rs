//! Scriptable BrokerGateway for testing the loops without a broker

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;
use signal_engine::{
    BrokerGateway, Candle, CloseRequest, GatewayError, GatewayResult, OrderOutcome, OrderRequest,
    Position, Quote, SymbolConstraints, TimeFrame,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub const DONE: u32 = 10009;

/// Mock gateway that records every order and close it receives
pub struct MockGateway {
    candles: Mutex<Vec<Candle>>,
    balance: Mutex<Option<Decimal>>,
    constraints: Mutex<SymbolConstraints>,
    positions: Mutex<Vec<Position>>,
    /// Front quote is served; it is popped only while more remain
    quotes: Mutex<VecDeque<Quote>>,
    fail_candles: AtomicBool,
    fail_quotes: AtomicBool,
    fail_constraints: AtomicBool,
    /// Accepted closes leave the position listed, like a lagging snapshot
    keep_closed: AtomicBool,
    reject_orders: Mutex<Option<u32>>,
    reject_closes: Mutex<Option<u32>>,
    next_ticket: AtomicU64,
    candle_fetches: AtomicUsize,
    orders: Arc<Mutex<Vec<OrderRequest>>>,
    closes: Arc<Mutex<Vec<CloseRequest>>>,
}

impl MockGateway {
    pub fn new() -> Self {
        Self {
            candles: Mutex::new(Vec::new()),
            balance: Mutex::new(Some(Decimal::from(10_000))),
            constraints: Mutex::new(SymbolConstraints {
                min_volume: Decimal::new(1, 2),
                max_volume: Decimal::from(100),
                volume_step: Decimal::new(1, 2),
                price_digits: 5,
            }),
            positions: Mutex::new(Vec::new()),
            quotes: Mutex::new(VecDeque::new()),
            fail_candles: AtomicBool::new(false),
            fail_quotes: AtomicBool::new(false),
            fail_constraints: AtomicBool::new(false),
            keep_closed: AtomicBool::new(false),
            reject_orders: Mutex::new(None),
            reject_closes: Mutex::new(None),
            next_ticket: AtomicU64::new(1000),
            candle_fetches: AtomicUsize::new(0),
            orders: Arc::new(Mutex::new(Vec::new())),
            closes: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn set_candles(&self, candles: Vec<Candle>) {
        *self.candles.lock().unwrap() = candles;
    }

    pub fn set_balance(&self, balance: Option<Decimal>) {
        *self.balance.lock().unwrap() = balance;
    }

    pub fn add_position(&self, position: Position) {
        self.positions.lock().unwrap().push(position);
    }

    pub fn push_quote(&self, quote: Quote) {
        self.quotes.lock().unwrap().push_back(quote);
    }

    pub fn set_fail_candles(&self, fail: bool) {
        self.fail_candles.store(fail, Ordering::SeqCst);
    }

    pub fn set_constraints(&self, constraints: SymbolConstraints) {
        *self.constraints.lock().unwrap() = constraints;
    }

    pub fn set_fail_constraints(&self, fail: bool) {
        self.fail_constraints.store(fail, Ordering::SeqCst);
    }

    pub fn set_keep_closed(&self, keep: bool) {
        self.keep_closed.store(keep, Ordering::SeqCst);
    }

    pub fn remove_position(&self, ticket: u64) {
        self.positions.lock().unwrap().retain(|p| p.ticket != ticket);
    }

    pub fn set_fail_quotes(&self, fail: bool) {
        self.fail_quotes.store(fail, Ordering::SeqCst);
    }

    pub fn reject_orders_with(&self, code: Option<u32>) {
        *self.reject_orders.lock().unwrap() = code;
    }

    pub fn reject_closes_with(&self, code: Option<u32>) {
        *self.reject_closes.lock().unwrap() = code;
    }

    pub fn orders(&self) -> Vec<OrderRequest> {
        self.orders.lock().unwrap().clone()
    }

    pub fn closes(&self) -> Vec<CloseRequest> {
        self.closes.lock().unwrap().clone()
    }

    pub fn open_positions(&self) -> Vec<Position> {
        self.positions.lock().unwrap().clone()
    }

    pub fn candle_fetches(&self) -> usize {
        self.candle_fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BrokerGateway for MockGateway {
    async fn fetch_candles(
        &self,
        _symbol: &str,
        _timeframe: TimeFrame,
        count: usize,
    ) -> GatewayResult<Vec<Candle>> {
        self.candle_fetches.fetch_add(1, Ordering::SeqCst);
        if self.fail_candles.load(Ordering::SeqCst) {
            return Err(GatewayError::Unavailable("candles".to_string()));
        }
        let candles = self.candles.lock().unwrap();
        let skip = candles.len().saturating_sub(count);
        Ok(candles[skip..].to_vec())
    }

    async fn fetch_account_balance(&self) -> GatewayResult<Decimal> {
        self.balance
            .lock()
            .unwrap()
            .ok_or_else(|| GatewayError::Unavailable("account".to_string()))
    }

    async fn fetch_symbol_constraints(&self, symbol: &str) -> GatewayResult<SymbolConstraints> {
        if self.fail_constraints.load(Ordering::SeqCst) {
            return Err(GatewayError::Unavailable(format!("symbol info for {}", symbol)));
        }
        Ok(*self.constraints.lock().unwrap())
    }

    async fn fetch_open_positions(&self) -> GatewayResult<Vec<Position>> {
        Ok(self.positions.lock().unwrap().clone())
    }

    async fn fetch_quote(&self, symbol: &str) -> GatewayResult<Quote> {
        if self.fail_quotes.load(Ordering::SeqCst) {
            return Err(GatewayError::Unavailable(format!("quote for {}", symbol)));
        }
        let mut quotes = self.quotes.lock().unwrap();
        if quotes.len() > 1 {
            quotes.pop_front().ok_or_else(|| GatewayError::Unavailable("quote".to_string()))
        } else {
            quotes
                .front()
                .cloned()
                .ok_or_else(|| GatewayError::Unavailable("quote".to_string()))
        }
    }

    async fn submit_order(&self, request: &OrderRequest) -> GatewayResult<OrderOutcome> {
        self.orders.lock().unwrap().push(request.clone());

        if let Some(code) = *self.reject_orders.lock().unwrap() {
            return Ok(OrderOutcome {
                accepted: false,
                broker_code: code,
                ticket: None,
            });
        }

        let ticket = self.next_ticket.fetch_add(1, Ordering::SeqCst);
        self.positions.lock().unwrap().push(Position {
            ticket,
            symbol: request.symbol.clone(),
            direction: request.direction,
            volume: request.volume,
            open_price: request.entry_price,
        });
        Ok(OrderOutcome {
            accepted: true,
            broker_code: DONE,
            ticket: Some(ticket),
        })
    }

    async fn submit_close(&self, request: &CloseRequest) -> GatewayResult<OrderOutcome> {
        self.closes.lock().unwrap().push(request.clone());

        if let Some(code) = *self.reject_closes.lock().unwrap() {
            return Ok(OrderOutcome {
                accepted: false,
                broker_code: code,
                ticket: None,
            });
        }

        if !self.keep_closed.load(Ordering::SeqCst) {
            self.remove_position(request.ticket);
        }
        Ok(OrderOutcome {
            accepted: true,
            broker_code: DONE,
            ticket: Some(request.ticket),
        })
    }
}

pub fn dec(s: &str) -> Decimal {
    s.parse().unwrap()
}

pub fn minute(m: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap() + Duration::minutes(m)
}

pub fn quote(bid: &str, ask: &str, server_time: DateTime<Utc>) -> Quote {
    Quote {
        bid: dec(bid),
        ask: dec(ask),
        server_time,
    }
}

/// One-minute candle with the given low and high; open/close sit inside them
pub fn flat_candle(m: i64, low: &str, high: &str) -> Candle {
    let (low, high) = (dec(low), dec(high));
    let mid = (low + high) / Decimal::TWO;
    Candle {
        timestamp: minute(m),
        open: mid,
        high,
        low,
        close: mid,
        tick_volume: 10,
    }
}

/// Deterministic one-minute random walk; each candle opens at the previous close
/// and has wicks strictly beyond its body.
pub fn random_walk(seed: u64, count: usize) -> Vec<Candle> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut price = Decimal::new(11_000, 4);
    let mut candles = Vec::with_capacity(count);

    for i in 0..count {
        let open = price;
        let close = (open + Decimal::new(rng.gen_range(-30..=30), 5)).max(Decimal::new(5_000, 4));
        let high = open.max(close) + Decimal::new(rng.gen_range(1..=25), 5);
        let low = open.min(close) - Decimal::new(rng.gen_range(1..=25), 5);
        candles.push(Candle {
            timestamp: minute(i as i64),
            open,
            high,
            low,
            close,
            tick_volume: 10,
        });
        price = close;
    }

    candles
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_serves_tail_of_candles() {
        let gateway = MockGateway::new();
        gateway.set_candles(random_walk(1, 10));

        let candles = gateway.fetch_candles("EURUSD", TimeFrame::M1, 3).await.unwrap();
        assert_eq!(candles.len(), 3);
        assert_eq!(candles[0].timestamp, minute(7));
        assert_eq!(gateway.candle_fetches(), 1);
    }

    #[tokio::test]
    async fn test_mock_quotes_advance_then_repeat() {
        let gateway = MockGateway::new();
        gateway.push_quote(quote("1.1000", "1.1001", minute(0)));
        gateway.push_quote(quote("1.2000", "1.2001", minute(1)));

        assert_eq!(gateway.fetch_quote("EURUSD").await.unwrap().bid, dec("1.1000"));
        assert_eq!(gateway.fetch_quote("EURUSD").await.unwrap().bid, dec("1.2000"));
        assert_eq!(gateway.fetch_quote("EURUSD").await.unwrap().bid, dec("1.2000"));
    }

    #[test]
    fn test_random_walk_is_contiguous() {
        let candles = random_walk(3, 50);
        for pair in candles.windows(2) {
            assert_eq!(pair[1].open, pair[0].close);
        }
        for c in &candles {
            assert!(c.low < c.open.min(c.close));
            assert!(c.high > c.open.max(c.close));
        }
    }
}
