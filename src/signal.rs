//! Signal Evaluator - turns the last completed candle into a trade signal
//!
//! Long when the candle pierced the lower band, closed bullish and the
//! oscillator K line is above D. Short is the mirror image on the upper band.
//! The in-progress candle is never evaluated; its open is the entry price.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::config::StrategyConfig;
use crate::indicators::{DerivedPoint, DerivedSeries};
use crate::types::{Candle, Direction};

/// Entry signal derived from one completed candle
#[derive(Debug, Clone, PartialEq)]
pub struct TradeSignal {
    pub direction: Direction,
    pub entry_price: Decimal,
    /// Extreme of the source candle; drives position sizing
    pub primary_stop_price: Decimal,
    /// Wider stop actually sent to the broker
    pub secondary_stop_price: Decimal,
    pub take_profit_price: Decimal,
    pub source_candle_timestamp: DateTime<Utc>,
}

/// Last (source candle, direction) pair an order was placed for.
///
/// Only written after the broker accepts an order, so a rejected signal may
/// legitimately fire again on the next poll.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LastTradeRecord {
    last: Option<(DateTime<Utc>, Direction)>,
}

impl LastTradeRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `signal` was already traded
    pub fn matches(&self, signal: &TradeSignal) -> bool {
        self.last == Some((signal.source_candle_timestamp, signal.direction))
    }

    pub fn record(&mut self, signal: &TradeSignal) {
        self.last = Some((signal.source_candle_timestamp, signal.direction));
    }

    pub fn last(&self) -> Option<(DateTime<Utc>, Direction)> {
        self.last
    }
}

/// Outcome of one evaluation
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// Not enough candles or indicator history to evaluate
    NotReady,
    NoSignal,
    /// Qualifying signal already traded from the same candle
    Duplicate(TradeSignal),
    Actionable(TradeSignal),
}

/// Band + oscillator entry rules
#[derive(Debug, Clone, Copy)]
pub struct SignalEvaluator {
    config: StrategyConfig,
}

impl SignalEvaluator {
    pub fn new(config: StrategyConfig) -> Self {
        Self { config }
    }

    /// Evaluate the last completed candle of `candles` against `series`
    pub fn evaluate(
        &self,
        candles: &[Candle],
        series: &DerivedSeries,
        record: &LastTradeRecord,
    ) -> Decision {
        if candles.len() < 2 || series.len() != candles.len() {
            return Decision::NotReady;
        }

        let completed_index = candles.len() - 2;
        let completed = &candles[completed_index];
        let next = &candles[completed_index + 1];

        let derived = match series.get(completed_index) {
            Some(point) if point.is_defined() => point,
            _ => return Decision::NotReady,
        };

        match self.signal_for(completed, derived, next.open) {
            Some(signal) if record.matches(&signal) => Decision::Duplicate(signal),
            Some(signal) => Decision::Actionable(signal),
            None => Decision::NoSignal,
        }
    }

    /// Apply the entry rules to a single completed candle
    pub fn signal_for(
        &self,
        completed: &Candle,
        derived: &DerivedPoint,
        entry_price: Decimal,
    ) -> Option<TradeSignal> {
        let (lower, upper, k, d) = (
            derived.lower_band?,
            derived.upper_band?,
            derived.oscillator_k?,
            derived.oscillator_d?,
        );

        let direction = if completed.low <= lower && k > d && completed.is_bullish() {
            Direction::Long
        } else if completed.high >= upper && k < d && completed.is_bearish() {
            Direction::Short
        } else {
            return None;
        };

        let tp = self.config.tp_multiplier;
        let wide = self.config.secondary_stop_multiplier;

        let signal = match direction {
            Direction::Long => {
                let primary = completed.low;
                TradeSignal {
                    direction,
                    entry_price,
                    primary_stop_price: primary,
                    secondary_stop_price: entry_price - wide * (entry_price - primary),
                    take_profit_price: entry_price + tp * (entry_price - primary),
                    source_candle_timestamp: completed.timestamp,
                }
            }
            Direction::Short => {
                let primary = completed.high;
                TradeSignal {
                    direction,
                    entry_price,
                    primary_stop_price: primary,
                    secondary_stop_price: entry_price + wide * (primary - entry_price),
                    take_profit_price: entry_price - tp * (primary - entry_price),
                    source_candle_timestamp: completed.timestamp,
                }
            }
        };

        Some(signal)
    }
}
