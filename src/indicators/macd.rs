// =============================================================================
// Moving Average Convergence Divergence (MACD)
// =============================================================================
//
// MACD line  = EMA(fast) - EMA(slow)
// Signal     = EMA(signal_period) of the MACD line
// Histogram  = MACD line - Signal
//
// The line becomes defined once the slow EMA does (index slow - 1); the
// signal needs a further `signal_period` defined line values on top of that.
// =============================================================================

use super::ema::ema;

/// MACD line, signal and histogram series, aligned with the input closes.
#[derive(Debug, Clone)]
pub struct MacdSeries {
    pub line: Vec<f64>,
    pub signal: Vec<f64>,
    pub histogram: Vec<f64>,
}

/// Compute MACD for `closes` with the given periods (conventional defaults
/// are 12 / 26 / 9).
///
/// All three output series match the input length, NaN where undefined.
pub fn macd(closes: &[f64], fast: usize, slow: usize, signal_period: usize) -> MacdSeries {
    let n = closes.len();
    let fast_ema = ema(closes, fast);
    let slow_ema = ema(closes, slow);

    let mut line = vec![f64::NAN; n];
    for i in 0..n {
        if fast_ema[i].is_finite() && slow_ema[i].is_finite() {
            line[i] = fast_ema[i] - slow_ema[i];
        }
    }

    // The signal is an EMA over the defined portion of the line, re-aligned
    // to the full-length series.
    let defined_start = line.iter().position(|v| v.is_finite());
    let mut signal = vec![f64::NAN; n];
    if let Some(start) = defined_start {
        let tail = &line[start..];
        let tail_signal = ema(tail, signal_period);
        for (offset, v) in tail_signal.into_iter().enumerate() {
            signal[start + offset] = v;
        }
    }

    let mut histogram = vec![f64::NAN; n];
    for i in 0..n {
        if line[i].is_finite() && signal[i].is_finite() {
            histogram[i] = line[i] - signal[i];
        }
    }

    MacdSeries { line, signal, histogram }
}
