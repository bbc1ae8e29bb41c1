//! Paper Gateway - simulated broker for running without a terminal
//!
//! Prices follow a bounded random walk in wall-clock time. Orders fill
//! immediately at the current quote and broker-side stops / take-profits are
//! honoured on every price update, so positions can disappear on their own
//! just like on a live account.

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;
use std::collections::VecDeque;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::config::PaperConfig;
use crate::gateway::{BrokerGateway, GatewayError, GatewayResult};
use crate::types::{
    Candle, CloseRequest, Direction, OrderOutcome, OrderRequest, Position, Quote,
    SymbolConstraints, TimeFrame,
};

/// Request completed
pub const RETCODE_DONE: u32 = 10009;
/// Volume outside the symbol's grid
pub const RETCODE_INVALID_VOLUME: u32 = 10014;
/// Stop or take-profit on the wrong side of the market
pub const RETCODE_INVALID_STOPS: u32 = 10016;
/// Position no longer exists
pub const RETCODE_POSITION_CLOSED: u32 = 10036;

/// Ticks simulated inside each back-filled candle
const TICKS_PER_CANDLE: usize = 4;

#[derive(Debug, Clone)]
struct PaperPosition {
    position: Position,
    stop: Decimal,
    take_profit: Decimal,
}

struct PaperState {
    /// Oldest first; the last candle is still forming
    candles: VecDeque<Candle>,
    price: Decimal,
    rng: StdRng,
    balance: Decimal,
    positions: Vec<PaperPosition>,
    next_ticket: u64,
}

/// In-process simulated broker for a single symbol
pub struct PaperGateway {
    symbol: String,
    timeframe: TimeFrame,
    config: PaperConfig,
    state: Mutex<PaperState>,
}

impl PaperGateway {
    pub fn new(symbol: &str, timeframe: TimeFrame, config: PaperConfig) -> Self {
        Self::starting_at(symbol, timeframe, config, Utc::now())
    }

    /// Build with history ending at `now`
    pub fn starting_at(symbol: &str, timeframe: TimeFrame, config: PaperConfig, now: DateTime<Utc>) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let mut state = PaperState {
            candles: VecDeque::with_capacity(config.history_candles + 1),
            price: config.start_price,
            rng,
            balance: config.starting_balance,
            positions: Vec::new(),
            next_ticket: 1,
        };

        let step = Duration::seconds(timeframe.to_seconds());
        let current = bucket_start(now, timeframe);
        let mut open_time = current - step * config.history_candles as i32;
        while open_time <= current {
            let candle = walk_candle(&mut state, &config, open_time);
            state.candles.push_back(candle);
            open_time = open_time + step;
        }

        info!(
            symbol,
            timeframe = %timeframe,
            candles = state.candles.len(),
            balance = %state.balance,
            "Paper gateway initialized"
        );

        Self {
            symbol: symbol.to_string(),
            timeframe,
            config,
            state: Mutex::new(state),
        }
    }

    fn check_symbol(&self, symbol: &str) -> GatewayResult<()> {
        if symbol == self.symbol {
            Ok(())
        } else {
            Err(GatewayError::Unavailable(format!("symbol {}", symbol)))
        }
    }

    fn quote_at(&self, state: &PaperState, now: DateTime<Utc>) -> Quote {
        Quote {
            bid: state.price,
            ask: (state.price + self.config.spread).round_dp(self.config.price_digits),
            server_time: now,
        }
    }

    /// Roll the simulation forward to `now` and apply one price tick
    fn advance(&self, state: &mut PaperState, now: DateTime<Utc>) {
        let step = Duration::seconds(self.timeframe.to_seconds());
        let current = bucket_start(now, self.timeframe);

        loop {
            let last_open = match state.candles.back() {
                Some(candle) => candle.timestamp,
                None => current,
            };
            if last_open >= current && !state.candles.is_empty() {
                break;
            }
            let open_time = if state.candles.is_empty() { current } else { last_open + step };
            let candle = walk_candle(state, &self.config, open_time);
            state.candles.push_back(candle);
            while state.candles.len() > self.config.history_candles + 1 {
                state.candles.pop_front();
            }
        }

        let price = random_tick(state, &self.config);
        if let Some(forming) = state.candles.back_mut() {
            forming.high = forming.high.max(price);
            forming.low = forming.low.min(price);
            forming.close = price;
            forming.tick_volume += 1;
        }

        self.settle_protective_orders(state, now);
    }

    /// Close positions whose broker-side stop or take-profit was touched
    fn settle_protective_orders(&self, state: &mut PaperState, now: DateTime<Utc>) {
        let quote = self.quote_at(state, now);
        let mut index = 0;
        while index < state.positions.len() {
            let paper = &state.positions[index];
            let exit_price = exit_price(paper.position.direction, &quote);
            let hit = match paper.position.direction {
                Direction::Long => exit_price <= paper.stop || exit_price >= paper.take_profit,
                Direction::Short => exit_price >= paper.stop || exit_price <= paper.take_profit,
            };

            if hit {
                let paper = state.positions.remove(index);
                let pnl = self.book_close(state, &paper.position, exit_price);
                info!(ticket = paper.position.ticket, price = %exit_price, pnl = %pnl,
                    "Paper position closed by broker-side stop/take-profit");
            } else {
                index += 1;
            }
        }
    }

    fn book_close(&self, state: &mut PaperState, position: &Position, exit_price: Decimal) -> Decimal {
        let move_per_unit = match position.direction {
            Direction::Long => exit_price - position.open_price,
            Direction::Short => position.open_price - exit_price,
        };
        let pnl = (move_per_unit * position.volume * self.config.contract_size).round_dp(2);
        state.balance += pnl;
        pnl
    }

    fn volume_is_valid(&self, volume: Decimal) -> bool {
        volume >= self.config.min_volume
            && volume <= self.config.max_volume
            && (volume % self.config.volume_step).is_zero()
    }
}

#[async_trait]
impl BrokerGateway for PaperGateway {
    async fn fetch_candles(
        &self,
        symbol: &str,
        timeframe: TimeFrame,
        count: usize,
    ) -> GatewayResult<Vec<Candle>> {
        self.check_symbol(symbol)?;
        if timeframe != self.timeframe {
            return Err(GatewayError::Unavailable(format!("{} candles", timeframe)));
        }

        let mut state = self.state.lock().await;
        self.advance(&mut state, Utc::now());

        let skip = state.candles.len().saturating_sub(count);
        Ok(state.candles.iter().skip(skip).cloned().collect())
    }

    async fn fetch_account_balance(&self) -> GatewayResult<Decimal> {
        Ok(self.state.lock().await.balance)
    }

    async fn fetch_symbol_constraints(&self, symbol: &str) -> GatewayResult<SymbolConstraints> {
        self.check_symbol(symbol)?;
        Ok(SymbolConstraints {
            min_volume: self.config.min_volume,
            max_volume: self.config.max_volume,
            volume_step: self.config.volume_step,
            price_digits: self.config.price_digits,
        })
    }

    async fn fetch_open_positions(&self) -> GatewayResult<Vec<Position>> {
        let mut state = self.state.lock().await;
        self.advance(&mut state, Utc::now());
        Ok(state.positions.iter().map(|p| p.position.clone()).collect())
    }

    async fn fetch_quote(&self, symbol: &str) -> GatewayResult<Quote> {
        self.check_symbol(symbol)?;
        let now = Utc::now();
        let mut state = self.state.lock().await;
        self.advance(&mut state, now);
        Ok(self.quote_at(&state, now))
    }

    async fn submit_order(&self, request: &OrderRequest) -> GatewayResult<OrderOutcome> {
        self.check_symbol(&request.symbol)?;
        if !self.volume_is_valid(request.volume) {
            return Ok(rejected(RETCODE_INVALID_VOLUME));
        }

        let now = Utc::now();
        let mut state = self.state.lock().await;
        let quote = self.quote_at(&state, now);
        let fill = match request.direction {
            Direction::Long => quote.ask,
            Direction::Short => quote.bid,
        };

        let stops_ok = match request.direction {
            Direction::Long => request.stop_price < fill && request.take_profit_price > fill,
            Direction::Short => request.stop_price > fill && request.take_profit_price < fill,
        };
        if !stops_ok {
            return Ok(rejected(RETCODE_INVALID_STOPS));
        }

        let ticket = state.next_ticket;
        state.next_ticket += 1;
        state.positions.push(PaperPosition {
            position: Position {
                ticket,
                symbol: request.symbol.clone(),
                direction: request.direction,
                volume: request.volume,
                open_price: fill,
            },
            stop: request.stop_price,
            take_profit: request.take_profit_price,
        });

        info!(ticket, direction = %request.direction, volume = %request.volume, price = %fill,
            comment = %request.comment, "Paper order filled");
        Ok(OrderOutcome {
            accepted: true,
            broker_code: RETCODE_DONE,
            ticket: Some(ticket),
        })
    }

    async fn submit_close(&self, request: &CloseRequest) -> GatewayResult<OrderOutcome> {
        let now = Utc::now();
        let mut state = self.state.lock().await;

        let Some(index) = state
            .positions
            .iter()
            .position(|p| p.position.ticket == request.ticket)
        else {
            debug!(ticket = request.ticket, "Close for unknown ticket");
            return Ok(rejected(RETCODE_POSITION_CLOSED));
        };

        let quote = self.quote_at(&state, now);
        let paper = state.positions.remove(index);
        let price = exit_price(paper.position.direction, &quote);
        let pnl = self.book_close(&mut state, &paper.position, price);

        info!(ticket = request.ticket, price = %price, pnl = %pnl, "Paper position closed");
        Ok(OrderOutcome {
            accepted: true,
            broker_code: RETCODE_DONE,
            ticket: Some(request.ticket),
        })
    }
}

fn rejected(code: u32) -> OrderOutcome {
    OrderOutcome {
        accepted: false,
        broker_code: code,
        ticket: None,
    }
}

/// Price a position is closed at: longs sell at the bid, shorts buy at the ask
fn exit_price(direction: Direction, quote: &Quote) -> Decimal {
    match direction {
        Direction::Long => quote.bid,
        Direction::Short => quote.ask,
    }
}

/// Start of the timeframe bucket containing `now`
fn bucket_start(now: DateTime<Utc>, timeframe: TimeFrame) -> DateTime<Utc> {
    let secs = now.timestamp();
    let start = secs - secs.rem_euclid(timeframe.to_seconds());
    Utc.timestamp_opt(start, 0).single().unwrap_or(now)
}

/// Move the simulated price by a random amount within `max_tick_move`
fn random_tick(state: &mut PaperState, config: &PaperConfig) -> Decimal {
    let steps: i64 = state.rng.gen_range(-1000..=1000);
    let moved = (state.price + config.max_tick_move * Decimal::new(steps, 3)).round_dp(config.price_digits);
    if moved > Decimal::ZERO {
        state.price = moved;
    }
    state.price
}

/// A full candle opening at the current price
fn walk_candle(state: &mut PaperState, config: &PaperConfig, open_time: DateTime<Utc>) -> Candle {
    let open = state.price;
    let mut high = open;
    let mut low = open;
    for _ in 0..TICKS_PER_CANDLE {
        let price = random_tick(state, config);
        high = high.max(price);
        low = low.min(price);
    }

    Candle {
        timestamp: open_time,
        open,
        high,
        low,
        close: state.price,
        tick_volume: TICKS_PER_CANDLE as u64,
    }
}
