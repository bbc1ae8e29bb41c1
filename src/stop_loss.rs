//! Stop-Loss Cache & Exit Monitor
//!
//! Each open ticket gets one stop price, taken from the candle before the
//! most recently completed one: its low for longs, its high for shorts. The
//! stop is fixed for the life of the ticket; it is not a trailing stop.
//!
//! Ticket lifecycle: uncached -> cached -> closed (entry removed).

use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::config::ExitConfig;
use crate::error::{EngineError, Result};
use crate::gateway::{with_timeout, BrokerGateway};
use crate::types::{Candle, CloseRequest, Direction, Position, Quote, TimeFrame};

/// Completed candles needed to pick the reference, plus the forming one
const REFERENCE_FETCH: usize = 3;

/// Set-once stop prices keyed by position ticket
#[derive(Debug, Clone, Default)]
pub struct StopLossCache {
    entries: HashMap<u64, Decimal>,
}

impl StopLossCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, ticket: u64) -> Option<Decimal> {
        self.entries.get(&ticket).copied()
    }

    pub fn contains(&self, ticket: u64) -> bool {
        self.entries.contains_key(&ticket)
    }

    /// Store `stop` unless the ticket already has one; returns the effective stop.
    pub fn insert_once(&mut self, ticket: u64, stop: Decimal) -> Decimal {
        *self.entries.entry(ticket).or_insert(stop)
    }

    pub fn remove(&mut self, ticket: u64) -> Option<Decimal> {
        self.entries.remove(&ticket)
    }

    /// Drop entries whose tickets are no longer open; returns how many were dropped
    pub fn retain_open(&mut self, open: &HashSet<u64>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|ticket, _| open.contains(ticket));
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// The candle preceding the most recently completed one.
///
/// `candles` is oldest-first and its last element is the forming candle.
pub fn reference_candle(candles: &[Candle]) -> Option<&Candle> {
    if candles.len() < REFERENCE_FETCH {
        return None;
    }
    candles.get(candles.len() - REFERENCE_FETCH)
}

/// Stop for a position opened in `direction`, derived from `reference`
pub fn stop_from_reference(direction: Direction, reference: &Candle) -> Decimal {
    match direction {
        Direction::Long => reference.low,
        Direction::Short => reference.high,
    }
}

/// Price compared against the stop: ask for longs, bid for shorts
pub fn monitored_price(direction: Direction, quote: &Quote) -> Decimal {
    match direction {
        Direction::Long => quote.ask,
        Direction::Short => quote.bid,
    }
}

/// True once price has moved strictly through the stop
pub fn is_breached(direction: Direction, stop: Decimal, quote: &Quote) -> bool {
    let price = monitored_price(direction, quote);
    match direction {
        Direction::Long => price < stop,
        Direction::Short => price > stop,
    }
}

/// Counters for one monitoring pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassSummary {
    pub observed: usize,
    pub newly_cached: usize,
    pub closes_requested: usize,
    pub closes_accepted: usize,
    pub skipped: usize,
    /// Closed by us but still listed by the broker
    pub awaiting_close: usize,
    pub pruned: usize,
}

/// Watches open positions and closes them when their cached stop is breached
pub struct ExitMonitor {
    cache: StopLossCache,
    /// Tickets with an accepted close, kept until they leave the snapshot
    closed: HashSet<u64>,
    timeframe: TimeFrame,
    config: ExitConfig,
    timeout: Duration,
}

impl ExitMonitor {
    pub fn new(timeframe: TimeFrame, config: ExitConfig, timeout: Duration) -> Self {
        Self {
            cache: StopLossCache::new(),
            closed: HashSet::new(),
            timeframe,
            config,
            timeout,
        }
    }

    pub fn cache(&self) -> &StopLossCache {
        &self.cache
    }

    /// Check every open position once
    pub async fn run_pass(&mut self, gateway: &dyn BrokerGateway) -> Result<PassSummary> {
        let positions = with_timeout(self.timeout, gateway.fetch_open_positions())
            .await
            .map_err(|e| {
                warn!(error = %e, "Failed to fetch open positions");
                EngineError::unavailable("open positions")
            })?;

        let mut summary = PassSummary::default();
        if positions.is_empty() {
            debug!("No open positions");
        }

        for position in &positions {
            summary.observed += 1;

            if self.closed.contains(&position.ticket) {
                debug!(ticket = position.ticket, "Close accepted, waiting for broker to drop position");
                summary.awaiting_close += 1;
                continue;
            }

            let stop = match self.cache.get(position.ticket) {
                Some(stop) => stop,
                None => match self.establish_stop(gateway, position).await {
                    Ok(stop) => {
                        summary.newly_cached += 1;
                        stop
                    }
                    Err(e) => {
                        warn!(ticket = position.ticket, symbol = %position.symbol, error = %e,
                            "Could not derive stop, retrying next tick");
                        summary.skipped += 1;
                        continue;
                    }
                },
            };

            let quote = match with_timeout(self.timeout, gateway.fetch_quote(&position.symbol)).await {
                Ok(quote) => quote,
                Err(e) => {
                    warn!(ticket = position.ticket, symbol = %position.symbol, error = %e,
                        "Failed to fetch quote, retrying next tick");
                    summary.skipped += 1;
                    continue;
                }
            };

            if !is_breached(position.direction, stop, &quote) {
                debug!(ticket = position.ticket, stop = %stop,
                    price = %monitored_price(position.direction, &quote), "Stop intact");
                continue;
            }

            info!(
                ticket = position.ticket,
                symbol = %position.symbol,
                direction = %position.direction,
                price = %monitored_price(position.direction, &quote),
                stop = %stop,
                "Stop breached, closing position"
            );
            summary.closes_requested += 1;
            if self.close(gateway, position, &quote).await {
                summary.closes_accepted += 1;
            }
        }

        let open: HashSet<u64> = positions.iter().map(|p| p.ticket).collect();
        summary.pruned = self.cache.retain_open(&open);
        self.closed.retain(|ticket| open.contains(ticket));
        if summary.pruned > 0 {
            debug!(pruned = summary.pruned, "Dropped stops for positions closed elsewhere");
        }

        Ok(summary)
    }

    /// Fetch the reference candle and cache the stop for a new ticket
    async fn establish_stop(&mut self, gateway: &dyn BrokerGateway, position: &Position) -> Result<Decimal> {
        let candles = with_timeout(
            self.timeout,
            gateway.fetch_candles(&position.symbol, self.timeframe, REFERENCE_FETCH),
        )
        .await?;

        let reference = reference_candle(&candles).ok_or_else(|| {
            EngineError::unavailable(format!(
                "{} completed candles for {}",
                REFERENCE_FETCH - 1,
                position.symbol
            ))
        })?;

        let stop = self.cache.insert_once(
            position.ticket,
            stop_from_reference(position.direction, reference),
        );
        info!(
            ticket = position.ticket,
            symbol = %position.symbol,
            direction = %position.direction,
            candle_time = %reference.timestamp,
            low = %reference.low,
            high = %reference.high,
            stop = %stop,
            "Cached stop-loss"
        );
        Ok(stop)
    }

    /// Submit a close; the cache entry is dropped only when the broker accepts it
    async fn close(&mut self, gateway: &dyn BrokerGateway, position: &Position, quote: &Quote) -> bool {
        let request = CloseRequest::for_position(
            position,
            quote,
            self.config.close_deviation,
            self.config.close_magic,
            &self.config.close_comment,
        );

        match with_timeout(self.timeout, gateway.submit_close(&request)).await {
            Ok(outcome) if outcome.accepted => {
                self.cache.remove(position.ticket);
                self.closed.insert(position.ticket);
                info!(ticket = position.ticket, code = outcome.broker_code, "Position closed");
                true
            }
            Ok(outcome) => {
                error!(ticket = position.ticket, code = outcome.broker_code, request = ?request,
                    "Close rejected, keeping stop for retry");
                false
            }
            Err(e) => {
                error!(ticket = position.ticket, error = %e, request = ?request, "Close failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn candle(minute: u32, low: &str, high: &str) -> Candle {
        Candle {
            timestamp: Utc.with_ymd_and_hms(2024, 3, 1, 10, minute, 0).unwrap(),
            open: dec(low),
            high: dec(high),
            low: dec(low),
            close: dec(high),
            tick_volume: 0,
        }
    }

    fn quote(bid: &str, ask: &str) -> Quote {
        Quote {
            bid: dec(bid),
            ask: dec(ask),
            server_time: Utc::now(),
        }
    }

    #[test]
    fn test_reference_is_candle_before_last_completed() {
        let candles = vec![
            candle(0, "1.0980", "1.0990"),
            candle(1, "1.0985", "1.0995"),
            candle(2, "1.0990", "1.1000"),
            candle(3, "1.0995", "1.1005"),
        ];
        // minute 3 is forming, minute 2 is the last completed one
        let reference = reference_candle(&candles).unwrap();
        assert_eq!(reference.timestamp.format("%M").to_string(), "01");
        assert_eq!(stop_from_reference(Direction::Long, reference), dec("1.0985"));
        assert_eq!(stop_from_reference(Direction::Short, reference), dec("1.0995"));

        assert!(reference_candle(&candles[..2]).is_none());
    }

    #[test]
    fn test_insert_once_never_overwrites() {
        let mut cache = StopLossCache::new();
        assert_eq!(cache.insert_once(42, dec("1.0985")), dec("1.0985"));
        assert_eq!(cache.insert_once(42, dec("1.2000")), dec("1.0985"));
        assert_eq!(cache.get(42), Some(dec("1.0985")));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_retain_open_prunes_closed_tickets() {
        let mut cache = StopLossCache::new();
        cache.insert_once(1, dec("1.1"));
        cache.insert_once(2, dec("1.2"));
        let open: HashSet<u64> = [2].into_iter().collect();
        assert_eq!(cache.retain_open(&open), 1);
        assert!(!cache.contains(1));
        assert!(cache.contains(2));
    }

    #[test]
    fn test_breach_uses_ask_for_long_and_bid_for_short() {
        let stop = dec("1.1000");
        // Long compares the ask
        assert!(is_breached(Direction::Long, stop, &quote("1.0990", "1.0999")));
        assert!(!is_breached(Direction::Long, stop, &quote("1.0990", "1.1000")));
        // Short compares the bid
        assert!(is_breached(Direction::Short, stop, &quote("1.1001", "1.1010")));
        assert!(!is_breached(Direction::Short, stop, &quote("1.1000", "1.1010")));
    }
}
