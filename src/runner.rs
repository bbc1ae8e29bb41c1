//! Entry and exit loops
//!
//! The entry loop polls for new candles, evaluates the last completed one and
//! places at most one order per (candle, direction). The exit loop walks the
//! open positions once per candle and closes any whose stop was breached.
//! The two loops share nothing but the gateway.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::gateway::{with_timeout, BrokerGateway};
use crate::indicators::IndicatorEngine;
use crate::signal::{Decision, LastTradeRecord, SignalEvaluator, TradeSignal};
use crate::sizing::RiskSizer;
use crate::stop_loss::{ExitMonitor, PassSummary};
use crate::types::{OrderRequest, TimeFrame};

/// Shortest pause between two exit passes
const MIN_EXIT_SLEEP: Duration = Duration::from_secs(1);

/// What one entry iteration ended with
#[derive(Debug, Clone, PartialEq)]
pub enum EntryOutcome {
    /// Too little history to evaluate
    NotReady,
    NoSignal,
    /// Signal already traded from this candle
    Duplicate,
    /// Order accepted by the broker
    Placed { ticket: Option<u64>, request: OrderRequest },
}

/// Polls for entry signals and submits orders
pub struct EntryLoop {
    gateway: Arc<dyn BrokerGateway>,
    config: EngineConfig,
    indicators: IndicatorEngine,
    evaluator: SignalEvaluator,
    sizer: RiskSizer,
    last_trade: LastTradeRecord,
}

impl EntryLoop {
    pub fn new(gateway: Arc<dyn BrokerGateway>, config: EngineConfig) -> Self {
        Self {
            indicators: IndicatorEngine::new(config.indicators),
            evaluator: SignalEvaluator::new(config.strategy),
            sizer: RiskSizer::new(config.risk),
            last_trade: LastTradeRecord::new(),
            gateway,
            config,
        }
    }

    pub fn last_trade(&self) -> &LastTradeRecord {
        &self.last_trade
    }

    /// Poll until a fatal error occurs
    pub async fn run(&mut self) -> Result<()> {
        self.config.validate()?;
        info!(
            symbol = %self.config.symbol,
            timeframe = %self.config.timeframe,
            poll_ms = self.config.entry.poll_interval_ms,
            "Entry loop starting"
        );

        let mut ticker = interval(self.config.entry.poll_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            match self.run_iteration().await {
                Ok(outcome) => debug!(?outcome, "Entry iteration complete"),
                Err(e) if e.is_fatal() => {
                    error!(error = %e, "Entry loop stopping");
                    return Err(e);
                }
                Err(e @ EngineError::InvalidSizing(_)) => info!(error = %e, "Signal discarded"),
                Err(e @ EngineError::InvalidOrder(_)) => error!(error = %e, "Order not submitted"),
                // Already logged with the full request
                Err(EngineError::OrderRejected { .. }) => {}
                Err(e) => warn!(error = %e, "Skipping iteration"),
            }
        }
    }

    /// One poll: fetch, compute, evaluate and maybe submit
    pub async fn run_iteration(&mut self) -> Result<EntryOutcome> {
        let timeout = self.config.gateway_timeout();
        let symbol = self.config.symbol.clone();

        let candles = with_timeout(
            timeout,
            self.gateway
                .fetch_candles(&symbol, self.config.timeframe, self.config.candle_count),
        )
        .await
        .map_err(|e| EngineError::unavailable(format!("candles for {}: {}", symbol, e)))?;

        if candles.len() < self.config.indicators.band_window {
            debug!(have = candles.len(), need = self.config.indicators.band_window, "Not enough candles");
            return Ok(EntryOutcome::NotReady);
        }

        let series = self.indicators.compute(&candles);

        let balance = with_timeout(timeout, self.gateway.fetch_account_balance())
            .await
            .map_err(|e| {
                error!(error = %e, "Failed to fetch account balance");
                EngineError::AccountUnavailable
            })?;

        let signal = match self.evaluator.evaluate(&candles, &series, &self.last_trade) {
            Decision::NotReady => return Ok(EntryOutcome::NotReady),
            Decision::NoSignal => return Ok(EntryOutcome::NoSignal),
            Decision::Duplicate(signal) => {
                debug!(direction = %signal.direction, candle = %signal.source_candle_timestamp,
                    "Signal already traded");
                return Ok(EntryOutcome::Duplicate);
            }
            Decision::Actionable(signal) => signal,
        };

        info!(
            direction = %signal.direction,
            candle = %signal.source_candle_timestamp,
            entry = %signal.entry_price,
            stop = %signal.primary_stop_price,
            take_profit = %signal.take_profit_price,
            "Signal detected"
        );

        let constraints = with_timeout(timeout, self.gateway.fetch_symbol_constraints(&symbol))
            .await
            .map_err(|e| EngineError::unavailable(format!("symbol info for {}: {}", symbol, e)))?;

        let volume = self.sizer.size(
            balance,
            signal.entry_price,
            signal.primary_stop_price,
            &constraints,
        )?;

        let request = self.order_for(&signal, volume, constraints.price_digits);
        request.validate()?;

        let outcome = with_timeout(timeout, self.gateway.submit_order(&request)).await?;
        if !outcome.accepted {
            error!(code = outcome.broker_code, request = ?request, "Order rejected");
            return Err(EngineError::OrderRejected { code: outcome.broker_code });
        }

        self.last_trade.record(&signal);
        info!(
            ticket = ?outcome.ticket,
            direction = %request.direction,
            volume = %request.volume,
            stop = %request.stop_price,
            take_profit = %request.take_profit_price,
            "Order placed"
        );

        Ok(EntryOutcome::Placed {
            ticket: outcome.ticket,
            request,
        })
    }

    /// The broker receives the secondary stop; prices are rounded to the symbol's digits
    fn order_for(&self, signal: &TradeSignal, volume: rust_decimal::Decimal, digits: u32) -> OrderRequest {
        OrderRequest {
            symbol: self.config.symbol.clone(),
            direction: signal.direction,
            volume,
            entry_price: signal.entry_price,
            stop_price: signal.secondary_stop_price.round_dp(digits),
            take_profit_price: signal.take_profit_price.round_dp(digits),
            deviation: self.config.entry.deviation,
            magic: self.config.entry.magic,
            comment: format!("{} trade", signal.direction),
        }
    }
}

/// Runs the exit monitor once per candle, aligned to the broker clock
pub struct ExitLoop {
    gateway: Arc<dyn BrokerGateway>,
    monitor: ExitMonitor,
    config: EngineConfig,
}

impl ExitLoop {
    pub fn new(gateway: Arc<dyn BrokerGateway>, config: EngineConfig) -> Self {
        Self {
            monitor: ExitMonitor::new(config.timeframe, config.exit.clone(), config.gateway_timeout()),
            gateway,
            config,
        }
    }

    pub fn monitor(&self) -> &ExitMonitor {
        &self.monitor
    }

    /// Loop forever; exit-side failures are never fatal
    pub async fn run(&mut self) {
        info!(
            timeframe = %self.config.timeframe,
            clock = %self.config.exit.clock_symbol,
            "Exit loop starting"
        );

        loop {
            let (_, pause) = self.run_once().await;
            debug!(secs = pause.as_secs(), "Exit loop sleeping");
            sleep(pause).await;
        }
    }

    /// One monitoring pass plus the pause before the next one
    pub async fn run_once(&mut self) -> (Option<PassSummary>, Duration) {
        let summary = match self.monitor.run_pass(self.gateway.as_ref()).await {
            Ok(summary) => {
                if summary.closes_requested > 0 || summary.newly_cached > 0 {
                    info!(?summary, "Exit pass complete");
                }
                Some(summary)
            }
            Err(e) => {
                warn!(error = %e, "Exit pass failed");
                None
            }
        };

        let clock = with_timeout(
            self.config.gateway_timeout(),
            self.gateway.fetch_quote(&self.config.exit.clock_symbol),
        )
        .await;

        let pause = match clock {
            Ok(quote) => sleep_until_boundary(quote.server_time, self.config.timeframe),
            Err(e) => {
                warn!(error = %e, symbol = %self.config.exit.clock_symbol,
                    "No server time, using fallback sleep");
                Duration::from_secs(self.config.exit.fallback_sleep_secs)
            }
        };

        (summary, pause)
    }
}

/// Time left until the next `timeframe` boundary, never under one second
pub fn sleep_until_boundary(server_time: DateTime<Utc>, timeframe: TimeFrame) -> Duration {
    let period_ms = timeframe.to_seconds() * 1000;
    let elapsed_ms = server_time.timestamp().rem_euclid(timeframe.to_seconds()) * 1000
        + i64::from(server_time.timestamp_subsec_millis().min(999));
    let remaining = Duration::from_millis((period_ms - elapsed_ms) as u64);
    remaining.max(MIN_EXIT_SLEEP)
}
