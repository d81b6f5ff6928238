// =============================================================================
// Long-term strategies (daily bars)
// =============================================================================
//
// Trend follow: price above the 50-day SMA with a strong trailing return
// buys continuation. The stop tracks just below the SMA; the target projects
// a fixed percentage above entry.
// =============================================================================

use crate::indicators::is_defined;
use crate::types::{Candidate, Side, StrategyCategory};

use super::{StrategyDef, StrategyInput};

pub const TREND_FOLLOW: StrategyDef = StrategyDef {
    name: "trend_follow",
    category: StrategyCategory::LongTerm,
    min_history: 60,
    run: trend_follow,
};

/// BUY when the close holds above SMA-50 and the trailing
/// `trend_return_lookback`-bar return is at least `trend_min_return`.
fn trend_follow(input: &StrategyInput<'_>) -> Vec<Candidate> {
    let bars = input.series.bars();
    let frame = input.indicators;
    let params = input.params;
    let n = bars.len();
    let lookback = params.trend_return_lookback.max(1);
    if n < lookback + 1 {
        return Vec::new();
    }

    let sma50 = frame.sma_50[n - 1];
    if !is_defined(sma50) {
        return Vec::new();
    }

    let last = &bars[n - 1];
    let base = bars[n - 1 - lookback].close;
    if base <= 0.0 {
        return Vec::new();
    }
    let trailing_return = (last.close - base) / base;

    if last.close <= sma50 || trailing_return < params.trend_min_return {
        return Vec::new();
    }

    let entry = last.close;
    let stop = sma50 * (1.0 - params.trend_stop_epsilon_pct / 100.0);
    if stop >= entry {
        return Vec::new();
    }
    let target = entry * (1.0 + params.trend_target_pct);

    // Stronger trailing returns carry more conviction, capped well short of
    // certainty.
    let excess = ((trailing_return - params.trend_min_return) / 0.2).clamp(0.0, 1.0);
    let confidence = (0.55 + 0.3 * excess).clamp(0.0, 0.95);

    vec![Candidate {
        instrument: input.series.instrument().to_string(),
        side: Side::Buy,
        entry,
        stop,
        target,
        confidence,
        strategy_name: TREND_FOLLOW.name,
        category: StrategyCategory::LongTerm,
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

    fn bar(i: usize, close: f64) -> Bar {
        let start = Utc.with_ymd_and_hms(2025, 1, 1, 10, 0, 0).unwrap();
        Bar::new(
            start + Duration::days(i as i64),
            close,
            close * 1.005,
            close * 0.995,
            close,
            100_000,
        )
    }

    fn run(bars: Vec<Bar>) -> Vec<Candidate> {
        let s = BarSeries::new("NSE:TEST", Interval::Day1, bars).unwrap();
        let frame = IndicatorFrame::compute(&s);
        let params = StrategyParams::default();
        let input = StrategyInput {
            series: &s,
            indicators: &frame,
            params: &params,
            now: Utc.with_ymd_and_hms(2025, 6, 2, 10, 0, 0).unwrap(),
        };
        (TREND_FOLLOW.run)(&input)
    }

    #[test]
    fn fires_in_sustained_uptrend() {
        // 0.5% a day compounds to ~16% over the 30-bar look-back.
        let bars = (0..70).map(|i| bar(i, 100.0 * 1.005_f64.powi(i as i32))).collect();
        let out = run(bars);
        assert_eq!(out.len(), 1);
        let c = &out[0];
        assert_eq!(c.side, Side::Buy);
        assert!(c.is_valid());
        // Target is exactly 20% above entry.
        assert!((c.target / c.entry - 1.2).abs() < 1e-9);
        // Stop tracks below the SMA-50, hence below entry.
        assert!(c.stop < c.entry);
    }

    #[test]
    fn silent_when_return_is_weak() {
        // 0.1% a day is ~3% over the look-back: below the 10% floor.
        let bars = (0..70).map(|i| bar(i, 100.0 * 1.001_f64.powi(i as i32))).collect();
        assert!(run(bars).is_empty());
    }

    #[test]
    fn silent_below_sma() {
        let mut closes: Vec<f64> = (0..60).map(|i| 100.0 + i as f64).collect();
        // Sharp collapse drops the close beneath the 50-day SMA.
        for (offset, close) in closes.iter_mut().rev().take(5).enumerate() {
            *close = 80.0 - offset as f64;
        }
        let bars = closes.into_iter().enumerate().map(|(i, c)| bar(i, c)).collect();
        assert!(run(bars).is_empty());
    }

    #[test]
    fn silent_without_history() {
        let bars = (0..20).map(|i| bar(i, 100.0 + i as f64)).collect();
        assert!(run(bars).is_empty());
    }
}
