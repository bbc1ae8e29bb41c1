//! Signal Engine Library
//!
//! Band + oscillator entry signals, fixed-fraction sizing and a set-once
//! stop-loss monitor, driven against any [`BrokerGateway`].

pub mod config;
pub mod error;
pub mod gateway;
pub mod indicators;
pub mod paper;
pub mod runner;
pub mod signal;
pub mod sizing;
pub mod stop_loss;
pub mod types;

// Re-export main types for convenience
pub use config::{
    EngineConfig, EntryConfig, ExitConfig, IndicatorConfig, LoggingConfig, PaperConfig,
    RiskConfig, StrategyConfig,
};
pub use error::{EngineError, Result};
pub use gateway::{with_timeout, BrokerGateway, GatewayError, GatewayResult};
pub use indicators::{DerivedPoint, DerivedSeries, IndicatorEngine};
pub use paper::PaperGateway;
pub use runner::{sleep_until_boundary, EntryLoop, EntryOutcome, ExitLoop};
pub use signal::{Decision, LastTradeRecord, SignalEvaluator, TradeSignal};
pub use sizing::{conform_volume, RiskSizer};
pub use stop_loss::{ExitMonitor, PassSummary, StopLossCache};
pub use types::{
    Candle, CloseRequest, Direction, FillPolicy, OrderOutcome, OrderRequest, Position, Quote,
    SymbolConstraints, TimeFrame, TimeInForce,
};
