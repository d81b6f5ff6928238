// =============================================================================
// Day-trading strategies (15m bars)
// =============================================================================
//
// Two long setups:
//   - EMA crossover: EMA-9 crossing above EMA-21 on the last closed bar with
//     acceptable volume participation.
//   - Range breakout: last close clearing the prior N-bar high with RSI in a
//     sustainable band and strong volume.
//
// Stops derive from the last low and ATR; targets project the configured
// reward-to-risk multiple.
// =============================================================================

use crate::indicators::is_defined;
use crate::types::{Candidate, Side, StrategyCategory};

use super::{StrategyDef, StrategyInput};

pub const EMA_CROSSOVER: StrategyDef = StrategyDef {
    name: "ema_crossover",
    category: StrategyCategory::DayTrading,
    min_history: 40,
    run: ema_crossover,
};

pub const RANGE_BREAKOUT: StrategyDef = StrategyDef {
    name: "range_breakout",
    category: StrategyCategory::DayTrading,
    min_history: 30,
    run: range_breakout,
};

/// BUY when EMA-9 crosses above EMA-21 on the last closed bar and current
/// volume is at least `crossover_volume_ratio` of its 20-bar average.
fn ema_crossover(input: &StrategyInput<'_>) -> Vec<Candidate> {
    let bars = input.series.bars();
    let frame = input.indicators;
    let n = bars.len();
    if n < 2 {
        return Vec::new();
    }

    let (e9_prev, e9_last) = (frame.ema_9[n - 2], frame.ema_9[n - 1]);
    let (e21_prev, e21_last) = (frame.ema_21[n - 2], frame.ema_21[n - 1]);
    let atr = frame.atr_14[n - 1];
    let vol_avg = frame.volume_avg_20[n - 1];
    if ![e9_prev, e9_last, e21_prev, e21_last, atr, vol_avg].iter().all(|v| is_defined(*v)) {
        return Vec::new();
    }

    let crossed_up = e9_prev <= e21_prev && e9_last > e21_last;
    if !crossed_up || vol_avg <= 0.0 {
        return Vec::new();
    }

    let last = &bars[n - 1];
    let vol_ratio = last.volume as f64 / vol_avg;
    if vol_ratio < input.params.crossover_volume_ratio {
        return Vec::new();
    }

    let entry = last.close;
    let stop = last.low - input.params.atr_stop_multiplier * atr;
    let target = entry + input.params.risk_reward * (entry - stop);
    let confidence = (0.6 + (vol_ratio - input.params.crossover_volume_ratio) * 0.1)
        .clamp(0.0, 0.95);

    vec![Candidate {
        instrument: input.series.instrument().to_string(),
        side: Side::Buy,
        entry,
        stop,
        target,
        confidence,
        strategy_name: EMA_CROSSOVER.name,
        category: StrategyCategory::DayTrading,
        produced_at: input.now,
    }]
}

/// BUY when the last close clears the highest high of the prior
/// `breakout_lookback` bars, RSI-14 sits in the acceptance band, and volume
/// runs at least `breakout_volume_ratio` of average.
fn range_breakout(input: &StrategyInput<'_>) -> Vec<Candidate> {
    let bars = input.series.bars();
    let frame = input.indicators;
    let params = input.params;
    let n = bars.len();
    let lookback = params.breakout_lookback.max(1);
    if n < lookback + 2 {
        return Vec::new();
    }

    let rsi = frame.rsi_14[n - 1];
    let atr = frame.atr_14[n - 1];
    let vol_avg = frame.volume_avg_20[n - 1];
    if ![rsi, atr, vol_avg].iter().all(|v| is_defined(*v)) || vol_avg <= 0.0 {
        return Vec::new();
    }

    let last = &bars[n - 1];
    let prior_high = bars[n - 1 - lookback..n - 1]
        .iter()
        .map(|b| b.high)
        .fold(f64::MIN, f64::max);

    let breakout = last.close > prior_high;
    let rsi_ok = rsi >= params.breakout_rsi_min && rsi <= params.breakout_rsi_max;
    let vol_ratio = last.volume as f64 / vol_avg;
    if !breakout || !rsi_ok || vol_ratio < params.breakout_volume_ratio {
        return Vec::new();
    }

    let entry = last.close;
    // The broken level becomes support; the stop sits just beneath it.
    let stop = prior_high - params.atr_stop_multiplier * atr;
    if stop >= entry {
        return Vec::new();
    }
    let target = entry + params.risk_reward * (entry - stop);

    // Most confident in the middle of the RSI band, fading toward its edges.
    let band_mid = (params.breakout_rsi_min + params.breakout_rsi_max) / 2.0;
    let band_half = ((params.breakout_rsi_max - params.breakout_rsi_min) / 2.0).max(1.0);
    let centrality = 1.0 - ((rsi - band_mid).abs() / band_half);
    let confidence = (0.55 + 0.25 * centrality).clamp(0.0, 0.95);

    vec![Candidate {
        instrument: input.series.instrument().to_string(),
        side: Side::Buy,
        entry,
        stop,
        target,
        confidence,
        strategy_name: RANGE_BREAKOUT.name,
        category: StrategyCategory::DayTrading,
        produced_at: input.now,
    }]
}
