// =============================================================================
// Bars — validated OHLCV series for one instrument and interval
// =============================================================================
//
// A `BarSeries` is the unit of market data the whole engine operates on:
// the fetcher produces one, the cache stores an immutable snapshot of one,
// and every indicator and strategy reads one. Construction validates the
// series invariants once so downstream code never re-checks them:
//
//   - timestamps strictly increasing (no duplicates, no reordering)
//   - prices finite and non-negative, high >= low
//   - volume finite and non-negative
// =============================================================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::Interval;

/// A single OHLCV bar.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
}

impl Bar {
    pub fn new(
        timestamp: DateTime<Utc>,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: u64,
    ) -> Self {
        Self { timestamp, open, high, low, close, volume }
    }

    fn check(&self) -> Result<(), BarSeriesError> {
        let prices = [self.open, self.high, self.low, self.close];
        if prices.iter().any(|p| !p.is_finite() || *p < 0.0) {
            return Err(BarSeriesError::InvalidPrice { at: self.timestamp });
        }
        if self.high < self.low {
            return Err(BarSeriesError::InvalidPrice { at: self.timestamp });
        }
        Ok(())
    }
}

/// Errors raised when a bar series fails validation at construction.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BarSeriesError {
    #[error("timestamps not strictly increasing at {at}")]
    NonMonotonic { at: DateTime<Utc> },
    #[error("non-finite or negative price in bar at {at}")]
    InvalidPrice { at: DateTime<Utc> },
}

/// An ordered, finite sequence of bars of one interval for one instrument.
///
/// Immutable once constructed; the cache hands out `Arc<BarSeries>` snapshots
/// and never mutates a published series.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BarSeries {
    instrument: String,
    interval: Interval,
    bars: Vec<Bar>,
}

impl BarSeries {
    /// Build a validated series. Bars must already be in chronological order.
    pub fn new(
        instrument: impl Into<String>,
        interval: Interval,
        bars: Vec<Bar>,
    ) -> Result<Self, BarSeriesError> {
        for window in bars.windows(2) {
            if window[1].timestamp <= window[0].timestamp {
                return Err(BarSeriesError::NonMonotonic { at: window[1].timestamp });
            }
        }
        for bar in &bars {
            bar.check()?;
        }
        Ok(Self { instrument: instrument.into(), interval, bars })
    }

    pub fn instrument(&self) -> &str {
        &self.instrument
    }

    pub fn interval(&self) -> Interval {
        self.interval
    }

    pub fn bars(&self) -> &[Bar] {
        &self.bars
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn last(&self) -> Option<&Bar> {
        self.bars.last()
    }

    /// Timestamp of the most recent bar, if any.
    pub fn last_timestamp(&self) -> Option<DateTime<Utc>> {
        self.bars.last().map(|b| b.timestamp)
    }

    /// Close prices, oldest first.
    pub fn closes(&self) -> Vec<f64> {
        self.bars.iter().map(|b| b.close).collect()
    }

    /// Volumes as floats (for averaging), oldest first.
    pub fn volumes(&self) -> Vec<f64> {
        self.bars.iter().map(|b| b.volume as f64).collect()
    }

    /// Drop bars stamped after `now`. A broker occasionally returns the
    /// still-forming bar; the engine only ever evaluates closed bars.
    pub fn truncate_after(&mut self, now: DateTime<Utc>) {
        self.bars.retain(|b| b.timestamp <= now);
    }
}
