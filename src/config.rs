//! Engine Configuration
//!
//! Loaded from an optional TOML file layered under `SIGNAL_ENGINE_*`
//! environment variables, e.g. `SIGNAL_ENGINE_RISK__RISK_FRACTION=0.0005`.

use rust_decimal::Decimal;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::types::TimeFrame;

/// Config file used when `SIGNAL_ENGINE_CONFIG` is not set
pub const DEFAULT_CONFIG_FILE: &str = "signal-engine.toml";

const ENV_PREFIX: &str = "SIGNAL_ENGINE";

/// Top-level engine configuration
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Traded symbol
    #[serde(default = "default_symbol")]
    pub symbol: String,
    #[serde(default)]
    pub timeframe: TimeFrame,
    /// Candles fetched per entry iteration
    #[serde(default = "default_candle_count")]
    pub candle_count: usize,
    /// Client-side bound on every gateway call
    #[serde(default = "default_gateway_timeout_ms")]
    pub gateway_timeout_ms: u64,
    #[serde(default)]
    pub indicators: IndicatorConfig,
    #[serde(default)]
    pub strategy: StrategyConfig,
    #[serde(default)]
    pub risk: RiskConfig,
    #[serde(default)]
    pub entry: EntryConfig,
    #[serde(default)]
    pub exit: ExitConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub paper: PaperConfig,
}

impl EngineConfig {
    /// Load from the file named by `SIGNAL_ENGINE_CONFIG` (or the default file) plus env overrides
    pub fn load() -> Result<Self, config::ConfigError> {
        let path = std::env::var("SIGNAL_ENGINE_CONFIG")
            .unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());
        Self::load_from(Path::new(&path))
    }

    /// Load from `path` (missing file is fine) plus env overrides
    pub fn load_from(path: &Path) -> Result<Self, config::ConfigError> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;

        let config: Self = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the loops cannot run with
    pub fn validate(&self) -> Result<(), config::ConfigError> {
        let invalid = |msg: String| Err(config::ConfigError::Message(msg));

        if self.entry.poll_interval_ms == 0 {
            return invalid("entry.poll_interval_ms must be greater than zero".to_string());
        }
        if self.gateway_timeout_ms == 0 {
            return invalid("gateway_timeout_ms must be greater than zero".to_string());
        }
        if self.risk.contract_size <= Decimal::ZERO {
            return invalid(format!(
                "risk.contract_size must be positive, got {}",
                self.risk.contract_size
            ));
        }
        if self.risk.risk_fraction <= Decimal::ZERO || self.risk.risk_fraction > Decimal::ONE {
            return invalid(format!(
                "risk.risk_fraction must be in (0, 1], got {}",
                self.risk.risk_fraction
            ));
        }
        if self.indicators.band_window < 2 || self.indicators.oscillator_window == 0 {
            return invalid("indicator windows are too small".to_string());
        }
        if self.candle_count < self.indicators.band_window {
            return invalid(format!(
                "candle_count {} is below indicators.band_window {}",
                self.candle_count, self.indicators.band_window
            ));
        }

        Ok(())
    }

    pub fn gateway_timeout(&self) -> Duration {
        Duration::from_millis(self.gateway_timeout_ms)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            symbol: default_symbol(),
            timeframe: TimeFrame::default(),
            candle_count: default_candle_count(),
            gateway_timeout_ms: default_gateway_timeout_ms(),
            indicators: IndicatorConfig::default(),
            strategy: StrategyConfig::default(),
            risk: RiskConfig::default(),
            entry: EntryConfig::default(),
            exit: ExitConfig::default(),
            logging: LoggingConfig::default(),
            paper: PaperConfig::default(),
        }
    }
}

/// Bollinger band and stochastic RSI parameters
#[derive(Debug, Clone, Copy, Deserialize, PartialEq)]
pub struct IndicatorConfig {
    /// Moving average / standard deviation window
    #[serde(default = "default_band_window")]
    pub band_window: usize,
    /// Band width in standard deviations
    #[serde(default = "default_band_width")]
    pub band_width: Decimal,
    /// RSI and stochastic lookback
    #[serde(default = "default_oscillator_window")]
    pub oscillator_window: usize,
    #[serde(default = "default_smoothing")]
    pub smooth_k: usize,
    #[serde(default = "default_smoothing")]
    pub smooth_d: usize,
}

impl Default for IndicatorConfig {
    fn default() -> Self {
        Self {
            band_window: default_band_window(),
            band_width: default_band_width(),
            oscillator_window: default_oscillator_window(),
            smooth_k: default_smoothing(),
            smooth_d: default_smoothing(),
        }
    }
}

/// Stop and take-profit multipliers applied to the primary stop distance
#[derive(Debug, Clone, Copy, Deserialize, PartialEq)]
pub struct StrategyConfig {
    #[serde(default = "default_tp_multiplier")]
    pub tp_multiplier: Decimal,
    /// Distance multiplier for the stop actually sent to the broker
    #[serde(default = "default_secondary_stop_multiplier")]
    pub secondary_stop_multiplier: Decimal,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            tp_multiplier: default_tp_multiplier(),
            secondary_stop_multiplier: default_secondary_stop_multiplier(),
        }
    }
}

/// Position sizing parameters
#[derive(Debug, Clone, Copy, Deserialize, PartialEq)]
pub struct RiskConfig {
    /// Fraction of balance risked per trade (0.0003 = 0.03%)
    #[serde(default = "default_risk_fraction")]
    pub risk_fraction: Decimal,
    /// Currency units per lot
    #[serde(default = "default_contract_size")]
    pub contract_size: Decimal,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            risk_fraction: default_risk_fraction(),
            contract_size: default_contract_size(),
        }
    }
}

/// Entry loop cadence and order tagging
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct EntryConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_entry_deviation")]
    pub deviation: u32,
    #[serde(default = "default_entry_magic")]
    pub magic: u64,
}

impl EntryConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for EntryConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            deviation: default_entry_deviation(),
            magic: default_entry_magic(),
        }
    }
}

/// Exit loop clock source and close tagging
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ExitConfig {
    /// Symbol whose quote supplies the broker's server time
    #[serde(default = "default_symbol")]
    pub clock_symbol: String,
    /// Sleep used when server time cannot be read
    #[serde(default = "default_fallback_sleep_secs")]
    pub fallback_sleep_secs: u64,
    #[serde(default = "default_close_deviation")]
    pub close_deviation: u32,
    #[serde(default = "default_close_magic")]
    pub close_magic: u64,
    #[serde(default = "default_close_comment")]
    pub close_comment: String,
}

impl Default for ExitConfig {
    fn default() -> Self {
        Self {
            clock_symbol: default_symbol(),
            fallback_sleep_secs: default_fallback_sleep_secs(),
            close_deviation: default_close_deviation(),
            close_magic: default_close_magic(),
            close_comment: default_close_comment(),
        }
    }
}

/// Log level and optional log file
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl LoggingConfig {
    /// Parsed level, falling back to INFO on anything unrecognised
    pub fn tracing_level(&self) -> tracing::Level {
        tracing::Level::from_str(&self.level).unwrap_or(tracing::Level::INFO)
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

/// Simulated broker used when no terminal is attached
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct PaperConfig {
    #[serde(default = "default_starting_balance")]
    pub starting_balance: Decimal,
    #[serde(default = "default_start_price")]
    pub start_price: Decimal,
    /// Maximum per-tick move of the random walk
    #[serde(default = "default_tick_size")]
    pub max_tick_move: Decimal,
    #[serde(default = "default_spread")]
    pub spread: Decimal,
    #[serde(default = "default_history_candles")]
    pub history_candles: usize,
    #[serde(default = "default_min_volume")]
    pub min_volume: Decimal,
    #[serde(default = "default_max_volume")]
    pub max_volume: Decimal,
    #[serde(default = "default_min_volume")]
    pub volume_step: Decimal,
    #[serde(default = "default_price_digits")]
    pub price_digits: u32,
    /// Used to book profit and loss on simulated closes
    #[serde(default = "default_contract_size")]
    pub contract_size: Decimal,
    /// Fixed RNG seed for reproducible runs
    #[serde(default)]
    pub seed: Option<u64>,
}

impl Default for PaperConfig {
    fn default() -> Self {
        Self {
            starting_balance: default_starting_balance(),
            start_price: default_start_price(),
            max_tick_move: default_tick_size(),
            spread: default_spread(),
            history_candles: default_history_candles(),
            min_volume: default_min_volume(),
            max_volume: default_max_volume(),
            volume_step: default_min_volume(),
            price_digits: default_price_digits(),
            contract_size: default_contract_size(),
            seed: None,
        }
    }
}

fn default_symbol() -> String { "EURUSD".to_string() }
fn default_candle_count() -> usize { 100 }
fn default_gateway_timeout_ms() -> u64 { 5_000 }
fn default_band_window() -> usize { 20 }
fn default_band_width() -> Decimal { Decimal::from(2) }
fn default_oscillator_window() -> usize { 14 }
fn default_smoothing() -> usize { 3 }
fn default_tp_multiplier() -> Decimal { Decimal::from(20) }
fn default_secondary_stop_multiplier() -> Decimal { Decimal::from(10) }
fn default_risk_fraction() -> Decimal { Decimal::new(3, 4) }
fn default_contract_size() -> Decimal { Decimal::from(100_000) }
fn default_poll_interval_ms() -> u64 { 100 }
fn default_entry_deviation() -> u32 { 10 }
fn default_entry_magic() -> u64 { 234_000 }
fn default_fallback_sleep_secs() -> u64 { 60 }
fn default_close_deviation() -> u32 { 20 }
fn default_close_magic() -> u64 { 100 }
fn default_close_comment() -> String { "stop-loss exit".to_string() }
fn default_log_level() -> String { "info".to_string() }
fn default_starting_balance() -> Decimal { Decimal::from(10_000) }
fn default_start_price() -> Decimal { Decimal::new(11_000, 4) }
fn default_tick_size() -> Decimal { Decimal::new(5, 5) }
fn default_spread() -> Decimal { Decimal::new(2, 5) }
fn default_history_candles() -> usize { 200 }
fn default_min_volume() -> Decimal { Decimal::new(1, 2) }
fn default_max_volume() -> Decimal { Decimal::from(100) }
fn default_price_digits() -> u32 { 5 }
