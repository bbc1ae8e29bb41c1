//! Indicator Engine
//!
//! Derives Bollinger bands and a smoothed stochastic RSI from closing prices.
//! Output is aligned index-for-index with the input candles; a `None` value
//! means there is not enough history (or the window is degenerate) and the
//! point must not be evaluated.

use rust_decimal::prelude::*;
use rust_decimal::Decimal;

use crate::config::IndicatorConfig;
use crate::types::Candle;

const HUNDRED: Decimal = Decimal::ONE_HUNDRED;

/// Indicator values for one candle
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DerivedPoint {
    pub moving_average: Option<Decimal>,
    pub upper_band: Option<Decimal>,
    pub lower_band: Option<Decimal>,
    /// Smoothed stochastic RSI, 0..1
    pub oscillator_k: Option<Decimal>,
    /// Signal line of `oscillator_k`, 0..1
    pub oscillator_d: Option<Decimal>,
}

impl DerivedPoint {
    /// True when every value is defined
    pub fn is_defined(&self) -> bool {
        self.moving_average.is_some()
            && self.upper_band.is_some()
            && self.lower_band.is_some()
            && self.oscillator_k.is_some()
            && self.oscillator_d.is_some()
    }
}

/// Indicator series aligned with a candle sequence
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DerivedSeries {
    points: Vec<DerivedPoint>,
}

impl DerivedSeries {
    pub fn from_points(points: Vec<DerivedPoint>) -> Self {
        Self { points }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&DerivedPoint> {
        self.points.get(index)
    }

    pub fn points(&self) -> &[DerivedPoint] {
        &self.points
    }

    /// First index at which every value is defined
    pub fn warm_up(&self) -> Option<usize> {
        self.points.iter().position(DerivedPoint::is_defined)
    }
}

/// Pure transformation from candles to indicator series
#[derive(Debug, Clone, Copy)]
pub struct IndicatorEngine {
    config: IndicatorConfig,
}

impl IndicatorEngine {
    pub fn new(config: IndicatorConfig) -> Self {
        Self { config }
    }

    /// Number of leading entries that are always undefined
    pub fn min_undefined(&self) -> usize {
        let oscillator =
            self.config.oscillator_window + self.config.smooth_k + self.config.smooth_d;
        self.config.band_window.max(oscillator).saturating_sub(1)
    }

    /// Compute the derived series for `candles`
    pub fn compute(&self, candles: &[Candle]) -> DerivedSeries {
        let closes: Vec<Decimal> = candles.iter().map(|c| c.close).collect();

        let (moving_average, upper_band, lower_band) =
            bollinger(&closes, self.config.band_window, self.config.band_width);
        let (oscillator_k, oscillator_d) = stoch_rsi(
            &closes,
            self.config.oscillator_window,
            self.config.smooth_k,
            self.config.smooth_d,
        );

        let points = (0..closes.len())
            .map(|i| DerivedPoint {
                moving_average: moving_average[i],
                upper_band: upper_band[i],
                lower_band: lower_band[i],
                oscillator_k: oscillator_k[i],
                oscillator_d: oscillator_d[i],
            })
            .collect();

        DerivedSeries { points }
    }
}

type Series = Vec<Option<Decimal>>;

/// Moving average with bands `width` sample standard deviations either side
fn bollinger(closes: &[Decimal], window: usize, width: Decimal) -> (Series, Series, Series) {
    let n = closes.len();
    let mut middle = vec![None; n];
    let mut upper = vec![None; n];
    let mut lower = vec![None; n];

    if window < 2 {
        return (middle, upper, lower);
    }

    for end in (window - 1)..n {
        let slice = &closes[end + 1 - window..=end];
        let mean = slice.iter().sum::<Decimal>() / Decimal::from(window);
        let variance = slice
            .iter()
            .map(|c| {
                let diff = *c - mean;
                diff * diff
            })
            .sum::<Decimal>()
            / Decimal::from(window - 1);

        if let Some(std_dev) = variance.sqrt() {
            middle[end] = Some(mean);
            upper[end] = Some(mean + std_dev * width);
            lower[end] = Some(mean - std_dev * width);
        }
    }

    (middle, upper, lower)
}

/// RSI with Wilder smoothing (alpha = 1/window), defined from index `window - 1`
fn rsi(closes: &[Decimal], window: usize) -> Series {
    let n = closes.len();
    let mut out = vec![None; n];
    if window == 0 || n == 0 {
        return out;
    }

    let alpha = Decimal::ONE / Decimal::from(window);
    let keep = Decimal::ONE - alpha;
    let mut avg_gain = Decimal::ZERO;
    let mut avg_loss = Decimal::ZERO;

    for i in 0..n {
        let change = if i == 0 {
            Decimal::ZERO
        } else {
            closes[i] - closes[i - 1]
        };
        let gain = change.max(Decimal::ZERO);
        let loss = (-change).max(Decimal::ZERO);

        if i == 0 {
            avg_gain = gain;
            avg_loss = loss;
        } else {
            avg_gain = keep * avg_gain + alpha * gain;
            avg_loss = keep * avg_loss + alpha * loss;
        }

        if i + 1 >= window {
            out[i] = Some(if avg_loss.is_zero() {
                HUNDRED
            } else {
                HUNDRED - HUNDRED / (Decimal::ONE + avg_gain / avg_loss)
            });
        }
    }

    out
}

/// Stochastic RSI smoothed into K and D lines
fn stoch_rsi(closes: &[Decimal], window: usize, smooth_k: usize, smooth_d: usize) -> (Series, Series) {
    let rsi = rsi(closes, window);
    let n = rsi.len();
    let mut raw = vec![None; n];

    if window > 0 {
        for end in (window - 1)..n {
            let slice = &rsi[end + 1 - window..=end];
            let values: Option<Vec<Decimal>> = slice.iter().copied().collect();
            let (Some(values), Some(current)) = (values, rsi[end]) else {
                continue;
            };
            let lowest = values.iter().copied().fold(Decimal::MAX, Decimal::min);
            let highest = values.iter().copied().fold(Decimal::MIN, Decimal::max);
            let range = highest - lowest;
            if !range.is_zero() {
                raw[end] = Some((current - lowest) / range);
            }
        }
    }

    let k = rolling_mean(&raw, smooth_k);
    let d = rolling_mean(&k, smooth_d);
    (k, d)
}

/// Trailing mean over `window` values; undefined if any value in the window is
fn rolling_mean(values: &[Option<Decimal>], window: usize) -> Series {
    let n = values.len();
    let mut out = vec![None; n];
    if window == 0 {
        return out;
    }

    for end in (window - 1)..n {
        let sum: Option<Decimal> = values[end + 1 - window..=end].iter().copied().sum();
        out[end] = sum.map(|s| s / Decimal::from(window));
    }
    out
}
