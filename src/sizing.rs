//! Risk Sizer - converts a risk budget and stop distance into broker volume

use rust_decimal::Decimal;

use crate::config::RiskConfig;
use crate::error::{EngineError, Result};
use crate::types::SymbolConstraints;

/// Fixed-fraction position sizing
#[derive(Debug, Clone, Copy)]
pub struct RiskSizer {
    config: RiskConfig,
}

impl RiskSizer {
    pub fn new(config: RiskConfig) -> Self {
        Self { config }
    }

    /// Volume, before broker constraints, risking `risk_fraction` of `balance`
    pub fn raw_size(&self, balance: Decimal, entry_price: Decimal, stop_price: Decimal) -> Result<Decimal> {
        if entry_price <= Decimal::ZERO {
            return Err(EngineError::InvalidSizing(format!(
                "entry price must be positive, got {}",
                entry_price
            )));
        }

        if self.config.contract_size <= Decimal::ZERO {
            return Err(EngineError::InvalidSizing(format!(
                "contract size must be positive, got {}",
                self.config.contract_size
            )));
        }

        let distance = (entry_price - stop_price).abs();
        if distance.is_zero() {
            return Err(EngineError::InvalidSizing(
                "stop price equals entry price".to_string(),
            ));
        }

        let risk_amount = balance * self.config.risk_fraction;
        let stop_fraction = distance / entry_price;
        Ok(risk_amount / (stop_fraction * self.config.contract_size))
    }

    /// Broker-compliant volume, or `InvalidSizing` when nothing tradeable remains
    pub fn size(
        &self,
        balance: Decimal,
        entry_price: Decimal,
        stop_price: Decimal,
        constraints: &SymbolConstraints,
    ) -> Result<Decimal> {
        let raw = self.raw_size(balance, entry_price, stop_price)?;
        let volume = conform_volume(raw, constraints)?;

        if volume <= Decimal::ZERO {
            return Err(EngineError::InvalidSizing(format!(
                "volume {} from raw size {} is not positive",
                volume, raw
            )));
        }
        Ok(volume)
    }
}

/// Clamp to `[min, max]` and round to the nearest step multiple.
pub fn conform_volume(volume: Decimal, constraints: &SymbolConstraints) -> Result<Decimal> {
    let SymbolConstraints {
        min_volume,
        max_volume,
        volume_step: step,
        ..
    } = *constraints;

    if step <= Decimal::ZERO || min_volume > max_volume {
        return Err(EngineError::InvalidSizing(format!(
            "unusable volume grid min={} max={} step={}",
            min_volume, max_volume, step
        )));
    }

    let clamped = volume.max(min_volume).min(max_volume);
    let mut stepped = (clamped / step).round() * step;

    // Rounding can step past a bound that is not itself on the grid
    if stepped > max_volume {
        stepped = (max_volume / step).floor() * step;
    }
    if stepped < min_volume {
        stepped = (min_volume / step).ceil() * step;
    }

    Ok(stepped.normalize())
}
