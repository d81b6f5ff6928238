// =============================================================================
// Short-selling strategies (15m bars)
// =============================================================================
//
// Overbought rejection: an extended RSI reading that fails to ride the upper
// Bollinger band on heavy volume tends to mean the move is being sold into.
// The protective stop sits above the recent swing high.
// =============================================================================

use crate::indicators::is_defined;
use crate::types::{Candidate, Side, StrategyCategory};

use super::{StrategyDef, StrategyInput};

pub const OVERBOUGHT_REJECTION: StrategyDef = StrategyDef {
    name: "overbought_rejection",
    category: StrategyCategory::ShortSelling,
    min_history: 30,
    run: overbought_rejection,
};

/// SELL when RSI-14 exceeds `overbought_rsi`, the last close sits below the
/// upper Bollinger band, and volume runs at least `overbought_volume_ratio`
/// of average.
fn overbought_rejection(input: &StrategyInput<'_>) -> Vec<Candidate> {
    let bars = input.series.bars();
    let frame = input.indicators;
    let params = input.params;
    let n = bars.len();
    let lookback = params.swing_lookback.max(1);
    if n < lookback + 1 {
        return Vec::new();
    }

    let rsi = frame.rsi_14[n - 1];
    let upper_band = frame.bollinger.upper[n - 1];
    let atr = frame.atr_14[n - 1];
    let vol_avg = frame.volume_avg_20[n - 1];
    if ![rsi, upper_band, atr, vol_avg].iter().all(|v| is_defined(*v)) || vol_avg <= 0.0 {
        return Vec::new();
    }

    let last = &bars[n - 1];
    let vol_ratio = last.volume as f64 / vol_avg;

    let overbought = rsi > params.overbought_rsi;
    let rejected = last.close < upper_band;
    if !overbought || !rejected || vol_ratio < params.overbought_volume_ratio {
        return Vec::new();
    }

    let entry = last.close;
    // Stop above the recent swing high, padded so an exact retest survives.
    let swing_high = bars[n - lookback..]
        .iter()
        .map(|b| b.high)
        .fold(f64::MIN, f64::max);
    let stop = swing_high + 0.25 * atr;
    if stop <= entry {
        return Vec::new();
    }
    let target = entry - params.risk_reward * (stop - entry);
    if target <= 0.0 {
        return Vec::new();
    }

    // Deeper overbought readings carry more conviction.
    let stretch = ((rsi - params.overbought_rsi) / 10.0).clamp(0.0, 1.0);
    let confidence = (0.55 + 0.3 * stretch).clamp(0.0, 0.95);

    vec![Candidate {
        instrument: input.series.instrument().to_string(),
        side: Side::Sell,
        entry,
        stop,
        target,
        confidence,
        strategy_name: OVERBOUGHT_REJECTION.name,
        category: StrategyCategory::ShortSelling,
        produced_at: input.now,
    }]
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::bars::{Bar, BarSeries};
    use crate::indicators::IndicatorFrame;
    use crate::strategies::StrategyParams;
    use crate::types::Interval;
    use chrono::{Duration, TimeZone, Utc};

    fn bar(i: usize, close: f64, volume: u64) -> Bar {
        let start = Utc.with_ymd_and_hms(2025, 6, 2, 4, 0, 0).unwrap();
        Bar::new(
            start + Duration::minutes(15 * i as i64),
            close,
            close + 0.5,
            close - 0.5,
            close,
            volume,
        )
    }

    fn run(bars: Vec<Bar>) -> Vec<Candidate> {
        let s = BarSeries::new("NSE:TEST", Interval::Min15, bars).unwrap();
        let frame = IndicatorFrame::compute(&s);
        let params = StrategyParams::default();
        let input = StrategyInput {
            series: &s,
            indicators: &frame,
            params: &params,
            now: Utc.with_ymd_and_hms(2025, 6, 2, 10, 0, 0).unwrap(),
        };
        (OVERBOUGHT_REJECTION.run)(&input)
    }

    /// Relentless rise with tiny pullbacks: RSI pins far above 75 while the
    /// close trails the stretched upper band; the last bar trades heavy.
    fn overbought_bars() -> Vec<Bar> {
        let mut close = 100.0;
        let mut bars = Vec::new();
        for i in 0..40 {
            close += if i % 5 == 4 { -0.2 } else { 1.0 };
            let volume = if i == 39 { 25_000 } else { 10_000 };
            bars.push(bar(i, close, volume));
        }
        bars
    }

    #[test]
    fn fires_on_extended_rsi_with_heavy_volume() {
        let out = run(overbought_bars());
        assert_eq!(out.len(), 1);
        let c = &out[0];
        assert_eq!(c.side, Side::Sell);
        assert!(c.is_valid());
        assert!(c.stop > c.entry && c.target < c.entry);
    }

    #[test]
    fn silent_on_neutral_tape() {
        let bars = (0..40).map(|i| bar(i, 100.0, 25_000)).collect();
        assert!(run(bars).is_empty());
    }

    #[test]
    fn blocked_by_thin_volume() {
        let mut bars = overbought_bars();
        let last = bars.len() - 1;
        bars[last].volume = 10_000;
        assert!(run(bars).is_empty());
    }

    #[test]
    fn silent_without_history() {
        let bars = (0..10).map(|i| bar(i, 100.0, 25_000)).collect();
        assert!(run(bars).is_empty());
    }
}
