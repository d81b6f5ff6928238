// =============================================================================
// Short-term swing strategies (1h bars)
// =============================================================================
//
// MACD momentum: ride an established hourly trend while momentum is positive
// and the RSI shows room left before exhaustion.
// =============================================================================

use crate::indicators::is_defined;
use crate::types::{Candidate, Side, StrategyCategory};

use super::{StrategyDef, StrategyInput};

pub const MACD_MOMENTUM: StrategyDef = StrategyDef {
    name: "macd_momentum",
    category: StrategyCategory::ShortTerm,
    min_history: 45,
    run: macd_momentum,
};

/// BUY when the MACD line holds above its signal, price holds above the
/// 20-bar SMA, and RSI-14 sits inside the sustainable band.
fn macd_momentum(input: &StrategyInput<'_>) -> Vec<Candidate> {
    let bars = input.series.bars();
    let frame = input.indicators;
    let params = input.params;
    let n = bars.len();
    if n == 0 {
        return Vec::new();
    }

    let line = frame.macd.line[n - 1];
    let signal = frame.macd.signal[n - 1];
    let histogram = frame.macd.histogram[n - 1];
    let sma20 = frame.sma_20[n - 1];
    let rsi = frame.rsi_14[n - 1];
    let atr = frame.atr_14[n - 1];
    if ![line, signal, histogram, sma20, rsi, atr].iter().all(|v| is_defined(*v)) {
        return Vec::new();
    }

    let last = &bars[n - 1];
    let momentum_up = line > signal && histogram > 0.0;
    let trend_up = last.close > sma20;
    let rsi_ok = rsi >= params.short_term_rsi_min && rsi <= params.short_term_rsi_max;
    if !momentum_up || !trend_up || !rsi_ok {
        return Vec::new();
    }

    let entry = last.close;
    let stop = entry - atr;
    if stop <= 0.0 || stop >= entry {
        return Vec::new();
    }
    let target = entry + params.risk_reward * (entry - stop);

    // Histogram expansion relative to ATR gauges momentum quality.
    let expansion = (histogram / atr).clamp(0.0, 1.0);
    let confidence = (0.5 + 0.35 * expansion).clamp(0.0, 0.95);

    vec![Candidate {
        instrument: input.series.instrument().to_string(),
        side: Side::Buy,
        entry,
        stop,
        target,
        confidence,
        strategy_name: MACD_MOMENTUM.name,
        category: StrategyCategory::ShortTerm,
        produced_at: input.now,
    }]
}
