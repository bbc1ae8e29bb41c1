//! Core domain types shared by the decision pipeline and the broker gateway

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// OHLC candle as delivered by the broker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    #[serde(default)]
    pub tick_volume: u64,
}

impl Candle {
    pub fn is_bullish(&self) -> bool {
        self.close > self.open
    }

    pub fn is_bearish(&self) -> bool {
        self.close < self.open
    }
}

/// Supported candle timeframes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum TimeFrame {
    #[default]
    M1,
    M5,
    M15,
    M30,
    H1,
    H4,
    D1,
}

impl TimeFrame {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeFrame::M1 => "M1",
            TimeFrame::M5 => "M5",
            TimeFrame::M15 => "M15",
            TimeFrame::M30 => "M30",
            TimeFrame::H1 => "H1",
            TimeFrame::H4 => "H4",
            TimeFrame::D1 => "D1",
        }
    }

    pub fn to_seconds(&self) -> i64 {
        match self {
            TimeFrame::M1 => 60,
            TimeFrame::M5 => 300,
            TimeFrame::M15 => 900,
            TimeFrame::M30 => 1800,
            TimeFrame::H1 => 3600,
            TimeFrame::H4 => 14400,
            TimeFrame::D1 => 86400,
        }
    }
}

impl std::fmt::Display for TimeFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Trade direction for signals and positions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    pub fn opposite(&self) -> Self {
        match self {
            Direction::Long => Direction::Short,
            Direction::Short => Direction::Long,
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Long => write!(f, "Long"),
            Direction::Short => write!(f, "Short"),
        }
    }
}

/// Current bid/ask plus the broker's clock
#[derive(Debug, Clone, PartialEq)]
pub struct Quote {
    pub bid: Decimal,
    pub ask: Decimal,
    pub server_time: DateTime<Utc>,
}

/// Open position as reported by the broker. The engine never mutates it.
#[derive(Debug, Clone, PartialEq)]
pub struct Position {
    pub ticket: u64,
    pub symbol: String,
    pub direction: Direction,
    pub volume: Decimal,
    pub open_price: Decimal,
}

/// Volume grid and price precision for a symbol
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SymbolConstraints {
    pub min_volume: Decimal,
    pub max_volume: Decimal,
    pub volume_step: Decimal,
    pub price_digits: u32,
}

/// Market order with protective stop and take-profit
#[derive(Debug, Clone, PartialEq)]
pub struct OrderRequest {
    pub symbol: String,
    pub direction: Direction,
    pub volume: Decimal,
    pub entry_price: Decimal,
    pub stop_price: Decimal,
    pub take_profit_price: Decimal,
    /// Maximum accepted price deviation in points
    pub deviation: u32,
    pub magic: u64,
    pub comment: String,
}

impl OrderRequest {
    /// Reject requests the broker could never fill sensibly.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.symbol.is_empty() {
            return Err(EngineError::InvalidOrder("symbol is empty".to_string()));
        }
        if self.volume <= Decimal::ZERO {
            return Err(EngineError::InvalidOrder(format!(
                "volume must be positive, got {}",
                self.volume
            )));
        }
        for (name, price) in [
            ("entry", self.entry_price),
            ("stop", self.stop_price),
            ("take profit", self.take_profit_price),
        ] {
            if price <= Decimal::ZERO {
                return Err(EngineError::InvalidOrder(format!(
                    "{} price must be positive, got {}",
                    name, price
                )));
            }
        }

        let sides_ok = match self.direction {
            Direction::Long => {
                self.stop_price < self.entry_price && self.take_profit_price > self.entry_price
            }
            Direction::Short => {
                self.stop_price > self.entry_price && self.take_profit_price < self.entry_price
            }
        };
        if !sides_ok {
            return Err(EngineError::InvalidOrder(format!(
                "{} order with entry {} needs stop {} on the adverse side and take profit {} on the favourable side",
                self.direction, self.entry_price, self.stop_price, self.take_profit_price
            )));
        }

        Ok(())
    }
}

/// How long a request stays working at the broker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimeInForce {
    /// Good till cancelled
    #[default]
    Gtc,
    Day,
}

/// What the broker does with volume it cannot fill at once
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FillPolicy {
    /// Immediate or cancel: fill what is available, drop the rest
    #[default]
    Ioc,
    FillOrKill,
    Return,
}

/// Market order closing an existing position
#[derive(Debug, Clone, PartialEq)]
pub struct CloseRequest {
    pub ticket: u64,
    pub symbol: String,
    /// Side of the closing deal (opposite of the position)
    pub side: Direction,
    pub volume: Decimal,
    pub price: Decimal,
    pub deviation: u32,
    pub magic: u64,
    pub comment: String,
    pub time_in_force: TimeInForce,
    pub fill_policy: FillPolicy,
}

impl CloseRequest {
    /// Build a close for `position`: a long is sold at the bid, a short bought at the ask.
    pub fn for_position(
        position: &Position,
        quote: &Quote,
        deviation: u32,
        magic: u64,
        comment: &str,
    ) -> Self {
        let price = match position.direction {
            Direction::Long => quote.bid,
            Direction::Short => quote.ask,
        };

        Self {
            ticket: position.ticket,
            symbol: position.symbol.clone(),
            side: position.direction.opposite(),
            volume: position.volume,
            price,
            deviation,
            magic,
            comment: comment.to_string(),
            time_in_force: TimeInForce::Gtc,
            fill_policy: FillPolicy::Ioc,
        }
    }
}

/// Broker acknowledgement for an order or close
#[derive(Debug, Clone, PartialEq)]
pub struct OrderOutcome {
    pub accepted: bool,
    pub broker_code: u32,
    pub ticket: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn long_order() -> OrderRequest {
        OrderRequest {
            symbol: "EURUSD".to_string(),
            direction: Direction::Long,
            volume: dec("0.03"),
            entry_price: dec("1.1000"),
            stop_price: dec("1.0900"),
            take_profit_price: dec("1.1200"),
            deviation: 10,
            magic: 234000,
            comment: "Long trade".to_string(),
        }
    }

    #[test]
    fn test_valid_long_order() {
        assert!(long_order().validate().is_ok());
    }

    #[test]
    fn test_order_rejects_zero_volume() {
        let mut order = long_order();
        order.volume = Decimal::ZERO;
        assert!(matches!(order.validate(), Err(EngineError::InvalidOrder(_))));
    }

    #[test]
    fn test_order_rejects_stop_on_wrong_side() {
        let mut order = long_order();
        order.stop_price = dec("1.1100");
        assert!(order.validate().is_err());

        let short = OrderRequest {
            direction: Direction::Short,
            stop_price: dec("1.0900"),
            take_profit_price: dec("1.0800"),
            ..long_order()
        };
        assert!(short.validate().is_err());
    }

    #[test]
    fn test_close_request_uses_opposite_side_price() {
        let quote = Quote {
            bid: dec("1.1000"),
            ask: dec("1.1002"),
            server_time: Utc::now(),
        };
        let long = Position {
            ticket: 7,
            symbol: "EURUSD".to_string(),
            direction: Direction::Long,
            volume: dec("0.05"),
            open_price: dec("1.0990"),
        };

        let close = CloseRequest::for_position(&long, &quote, 20, 100, "stop exit");
        assert_eq!(close.side, Direction::Short);
        assert_eq!(close.price, quote.bid);
        assert_eq!(close.volume, dec("0.05"));
        assert_eq!(close.time_in_force, TimeInForce::Gtc);
        assert_eq!(close.fill_policy, FillPolicy::Ioc);

        let short = Position {
            direction: Direction::Short,
            ..long
        };
        let close = CloseRequest::for_position(&short, &quote, 20, 100, "stop exit");
        assert_eq!(close.side, Direction::Long);
        assert_eq!(close.price, quote.ask);
    }

    #[test]
    fn test_timeframe_seconds() {
        assert_eq!(TimeFrame::M1.to_seconds(), 60);
        assert_eq!(TimeFrame::H4.to_seconds(), 14400);
        assert_eq!(TimeFrame::default(), TimeFrame::M1);
    }
}
