// =============================================================================
// Indicators — pure, deterministic computations over a bar series
// =============================================================================
//
// Every function returns a series exactly as long as its input. Indices where
// insufficient history exists hold `f64::NAN`; strategies gate on
// `is_defined` (equivalently `.is_finite()`) before reading a value. No I/O,
// no shared state.
//
// The `IndicatorFrame` bundles the full set the built-in strategies consume,
// computed once per (instrument, interval, last-bar-timestamp) and shared
// across every strategy in the scan via the symbol cache.
// =============================================================================

pub mod atr;
pub mod bollinger;
pub mod ema;
pub mod macd;
pub mod rsi;
pub mod sma;
pub mod volume;

use crate::bars::BarSeries;

pub use atr::atr;
pub use bollinger::{bollinger, BollingerSeries};
pub use ema::ema;
pub use macd::{macd, MacdSeries};
pub use rsi::rsi;
pub use sma::sma;
pub use volume::volume_average;

/// The undefined-value sentinel check. Leading indices of every indicator
/// series are NaN until the look-back window fills.
#[inline]
pub fn is_defined(value: f64) -> bool {
    value.is_finite()
}

/// Overnight gap between the previous close and today's open, as a signed
/// fraction of the previous close. NaN when the previous close is degenerate.
pub fn gap(prev_close: f64, open: f64) -> f64 {
    if !prev_close.is_finite() || !open.is_finite() || prev_close <= 0.0 {
        return f64::NAN;
    }
    (open - prev_close) / prev_close
}

// ---------------------------------------------------------------------------
// IndicatorFrame
// ---------------------------------------------------------------------------

/// All indicator series the built-in strategies read, aligned index-for-index
/// with the bar series they were computed from. Immutable once built.
#[derive(Debug, Clone)]
pub struct IndicatorFrame {
    pub ema_9: Vec<f64>,
    pub ema_21: Vec<f64>,
    pub sma_20: Vec<f64>,
    pub sma_50: Vec<f64>,
    pub rsi_14: Vec<f64>,
    pub macd: MacdSeries,
    pub bollinger: BollingerSeries,
    pub atr_14: Vec<f64>,
    pub volume_avg_20: Vec<f64>,
}

impl IndicatorFrame {
    /// Compute the full frame for `series`. Cost is linear in the series
    /// length for every member.
    pub fn compute(series: &BarSeries) -> Self {
        let closes = series.closes();
        let volumes = series.volumes();
        Self {
            ema_9: ema(&closes, 9),
            ema_21: ema(&closes, 21),
            sma_20: sma(&closes, 20),
            sma_50: sma(&closes, 50),
            rsi_14: rsi(&closes, 14),
            macd: macd(&closes, 12, 26, 9),
            bollinger: bollinger(&closes, 20, 2.0),
            atr_14: atr(series.bars(), 14),
            volume_avg_20: volume_average(&volumes, 20),
        }
    }

    /// Length of the underlying bar series.
    pub fn len(&self) -> usize {
        self.ema_9.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ema_9.is_empty()
    }
}
