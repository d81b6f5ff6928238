// =============================================================================
// Strategy registry — pure candidate generators keyed by category
// =============================================================================
//
// A strategy is a total pure function over (series, indicators, params): it
// never panics and returns an empty list whenever its preconditions (history
// depth, defined indicator values, setup conditions) are unmet.
//
// Within one (symbol, category) evaluation, strategies run in registration
// order and at most one candidate survives: highest confidence wins, earliest
// registered wins ties. Across categories every candidate is retained.
// =============================================================================

pub mod day_trading;
pub mod long_term;
pub mod short_selling;
pub mod short_term;

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::bars::BarSeries;
use crate::indicators::IndicatorFrame;
use crate::types::{Candidate, StrategyCategory};

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_crossover_volume_ratio() -> f64 {
    0.8
}

fn default_breakout_volume_ratio() -> f64 {
    1.5
}

fn default_breakout_rsi_min() -> f64 {
    55.0
}

fn default_breakout_rsi_max() -> f64 {
    75.0
}

fn default_breakout_lookback() -> usize {
    5
}

fn default_overbought_rsi() -> f64 {
    75.0
}

fn default_overbought_volume_ratio() -> f64 {
    1.5
}

fn default_swing_lookback() -> usize {
    5
}

fn default_short_term_rsi_min() -> f64 {
    45.0
}

fn default_short_term_rsi_max() -> f64 {
    70.0
}

fn default_trend_return_lookback() -> usize {
    30
}

fn default_trend_min_return() -> f64 {
    0.10
}

fn default_trend_target_pct() -> f64 {
    0.20
}

fn default_trend_stop_epsilon_pct() -> f64 {
    0.5
}

fn default_atr_stop_multiplier() -> f64 {
    0.5
}

fn default_risk_reward() -> f64 {
    2.0
}

// =============================================================================
// StrategyParams
// =============================================================================

/// Tunable thresholds shared by the built-in strategies. Every field carries
/// a serde default so older config files keep loading as knobs are added.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyParams {
    /// Minimum volume / average-volume ratio for the EMA crossover entry.
    #[serde(default = "default_crossover_volume_ratio")]
    pub crossover_volume_ratio: f64,

    /// Minimum volume ratio for the breakout entry.
    #[serde(default = "default_breakout_volume_ratio")]
    pub breakout_volume_ratio: f64,

    /// RSI acceptance band for the breakout entry.
    #[serde(default = "default_breakout_rsi_min")]
    pub breakout_rsi_min: f64,
    #[serde(default = "default_breakout_rsi_max")]
    pub breakout_rsi_max: f64,

    /// Prior bars whose high defines the breakout level.
    #[serde(default = "default_breakout_lookback")]
    pub breakout_lookback: usize,

    /// RSI floor for the overbought-rejection short.
    #[serde(default = "default_overbought_rsi")]
    pub overbought_rsi: f64,

    /// Minimum volume ratio for the overbought-rejection short.
    #[serde(default = "default_overbought_volume_ratio")]
    pub overbought_volume_ratio: f64,

    /// Bars scanned backwards for the protective swing high.
    #[serde(default = "default_swing_lookback")]
    pub swing_lookback: usize,

    /// RSI acceptance band for the short-term momentum entry.
    #[serde(default = "default_short_term_rsi_min")]
    pub short_term_rsi_min: f64,
    #[serde(default = "default_short_term_rsi_max")]
    pub short_term_rsi_max: f64,

    /// Look-back (bars) for the long-term return filter.
    #[serde(default = "default_trend_return_lookback")]
    pub trend_return_lookback: usize,

    /// Minimum return over the look-back to qualify as a trend.
    #[serde(default = "default_trend_min_return")]
    pub trend_min_return: f64,

    /// Long-term target as a fraction above entry.
    #[serde(default = "default_trend_target_pct")]
    pub trend_target_pct: f64,

    /// Long-term stop sits this percentage below the 50-bar SMA.
    #[serde(default = "default_trend_stop_epsilon_pct")]
    pub trend_stop_epsilon_pct: f64,

    /// ATR multiple subtracted below the last low for intraday stops.
    #[serde(default = "default_atr_stop_multiplier")]
    pub atr_stop_multiplier: f64,

    /// Reward-to-risk multiple used to project targets.
    #[serde(default = "default_risk_reward")]
    pub risk_reward: f64,
}

impl Default for StrategyParams {
    fn default() -> Self {
        Self {
            crossover_volume_ratio: default_crossover_volume_ratio(),
            breakout_volume_ratio: default_breakout_volume_ratio(),
            breakout_rsi_min: default_breakout_rsi_min(),
            breakout_rsi_max: default_breakout_rsi_max(),
            breakout_lookback: default_breakout_lookback(),
            overbought_rsi: default_overbought_rsi(),
            overbought_volume_ratio: default_overbought_volume_ratio(),
            swing_lookback: default_swing_lookback(),
            short_term_rsi_min: default_short_term_rsi_min(),
            short_term_rsi_max: default_short_term_rsi_max(),
            trend_return_lookback: default_trend_return_lookback(),
            trend_min_return: default_trend_min_return(),
            trend_target_pct: default_trend_target_pct(),
            trend_stop_epsilon_pct: default_trend_stop_epsilon_pct(),
            atr_stop_multiplier: default_atr_stop_multiplier(),
            risk_reward: default_risk_reward(),
        }
    }
}

// =============================================================================
// Strategy definitions
// =============================================================================

/// Everything a strategy sees. `now` stamps `produced_at` so the pure layer
/// never touches a clock.
pub struct StrategyInput<'a> {
    pub series: &'a BarSeries,
    pub indicators: &'a IndicatorFrame,
    pub params: &'a StrategyParams,
    pub now: DateTime<Utc>,
}

/// A total pure candidate generator.
pub type StrategyFn = fn(&StrategyInput<'_>) -> Vec<Candidate>;

/// A named strategy bound to its category and minimum history requirement.
#[derive(Clone, Copy)]
pub struct StrategyDef {
    pub name: &'static str,
    pub category: StrategyCategory,
    /// Bars required before the strategy can produce anything.
    pub min_history: usize,
    pub run: StrategyFn,
}

impl std::fmt::Debug for StrategyDef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StrategyDef")
            .field("name", &self.name)
            .field("category", &self.category)
            .field("min_history", &self.min_history)
            .finish()
    }
}

/// Outcome of running one category over one symbol.
#[derive(Debug, Default)]
pub struct CategoryRun {
    /// At most one candidate after the per-category tie-break.
    pub candidates: Vec<Candidate>,
    /// Candidates dropped for violating the ordering invariant.
    pub invalid_candidates: u64,
}

// =============================================================================
// Registry
// =============================================================================

/// Strategies keyed by category, preserving registration order.
pub struct StrategyRegistry {
    by_category: BTreeMap<StrategyCategory, Vec<StrategyDef>>,
}

impl StrategyRegistry {
    pub fn new() -> Self {
        Self { by_category: BTreeMap::new() }
    }

    /// Registry pre-loaded with the built-in strategy set.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(day_trading::EMA_CROSSOVER);
        registry.register(day_trading::RANGE_BREAKOUT);
        registry.register(short_selling::OVERBOUGHT_REJECTION);
        registry.register(short_term::MACD_MOMENTUM);
        registry.register(long_term::TREND_FOLLOW);
        registry
    }

    pub fn register(&mut self, def: StrategyDef) {
        self.by_category.entry(def.category).or_default().push(def);
    }

    pub fn strategies(&self, category: StrategyCategory) -> &[StrategyDef] {
        self.by_category.get(&category).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Deepest history any strategy of `category` needs.
    pub fn max_history(&self, category: StrategyCategory) -> usize {
        self.strategies(category).iter().map(|d| d.min_history).max().unwrap_or(0)
    }

    /// Run every strategy registered for `category` over one symbol, in
    /// registration order, then apply the tie-break: highest confidence
    /// wins, earliest registered wins ties.
    pub fn run_category(
        &self,
        category: StrategyCategory,
        series: &BarSeries,
        indicators: &IndicatorFrame,
        params: &StrategyParams,
        now: DateTime<Utc>,
    ) -> CategoryRun {
        let input = StrategyInput { series, indicators, params, now };
        let mut run = CategoryRun::default();
        let mut best: Option<Candidate> = None;

        for def in self.strategies(category) {
            if series.len() < def.min_history {
                continue;
            }
            for candidate in (def.run)(&input) {
                if !candidate.is_valid() {
                    warn!(
                        instrument = %candidate.instrument,
                        strategy = def.name,
                        %category,
                        "dropping invalid candidate"
                    );
                    run.invalid_candidates += 1;
                    continue;
                }
                // Strictly-greater keeps the earliest registered on ties.
                let better = match &best {
                    Some(current) => candidate.confidence > current.confidence,
                    None => true,
                };
                if better {
                    best = Some(candidate);
                }
            }
        }

        run.candidates.extend(best);
        run
    }
}

impl Default for StrategyRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}
