// =============================================================================
// Average True Range (ATR) — Wilder's Smoothing Method
// =============================================================================
//
// ATR measures market volatility by decomposing the entire range of a bar.
//
// True Range (TR) for each bar:
//   TR = max(H - L, |H - prevClose|, |L - prevClose|)
//
// ATR is the smoothed average of TR using Wilder's method:
//   ATR_0 = SMA of first `period` TR values
//   ATR_t = (ATR_{t-1} * (period - 1) + TR_t) / period
// =============================================================================

use crate::bars::Bar;

/// Compute the ATR series for `bars` (oldest first) with look-back `period`.
///
/// Output length equals input length. The first defined value sits at index
/// `period` (each TR needs a previous bar, and the seed consumes `period`
/// TRs); earlier indices are NaN. A non-finite intermediate leaves the rest
/// of the series NaN.
pub fn atr(bars: &[Bar], period: usize) -> Vec<f64> {
    let mut out = vec![f64::NAN; bars.len()];
    if period == 0 || bars.len() < period + 1 {
        return out;
    }

    // --- True Range for each consecutive pair ------------------------------
    let mut tr_values = Vec::with_capacity(bars.len() - 1);
    for i in 1..bars.len() {
        let high = bars[i].high;
        let low = bars[i].low;
        let prev_close = bars[i - 1].close;

        let hl = high - low;
        let hc = (high - prev_close).abs();
        let lc = (low - prev_close).abs();

        tr_values.push(hl.max(hc).max(lc));
    }

    // --- Seed with SMA of the first `period` TR values ---------------------
    let seed: f64 = tr_values[..period].iter().sum::<f64>() / period as f64;
    if !seed.is_finite() {
        return out;
    }
    out[period] = seed;

    // --- Wilder's smoothing for the remainder ------------------------------
    let period_f = period as f64;
    let mut value = seed;
    for (i, &tr) in tr_values.iter().enumerate().skip(period) {
        value = (value * (period_f - 1.0) + tr) / period_f;
        if !value.is_finite() {
            break;
        }
        out[i + 1] = value;
    }

    out
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn bars_from_ohlc(rows: &[(f64, f64, f64, f64)]) -> Vec<Bar> {
        let start = Utc.with_ymd_and_hms(2025, 6, 2, 4, 0, 0).unwrap();
        rows.iter()
            .enumerate()
            .map(|(i, &(open, high, low, close))| Bar {
                timestamp: start + Duration::minutes(15 * i as i64),
                open,
                high,
                low,
                close,
                volume: 1_000,
            })
            .collect()
    }

    #[test]
    fn atr_empty_input() {
        assert!(atr(&[], 14).is_empty());
    }

    #[test]
    fn atr_period_zero() {
        let bars = bars_from_ohlc(&[(1.0, 2.0, 0.5, 1.5); 5]);
        assert!(atr(&bars, 0).iter().all(|v| v.is_nan()));
    }

    #[test]
    fn atr_insufficient_data() {
        let bars = bars_from_ohlc(&[(1.0, 2.0, 0.5, 1.5); 10]);
        assert!(atr(&bars, 14).iter().all(|v| v.is_nan()));
    }

    #[test]
    fn atr_constant_range() {
        // Identical bars: TR = high - low = 1.0 for every pair, so ATR = 1.0.
        let bars = bars_from_ohlc(&[(10.0, 10.5, 9.5, 10.0); 20]);
        let out = atr(&bars, 14);
        assert!(out[13].is_nan());
        for &v in out.iter().filter(|v| v.is_finite()) {
            assert!((v - 1.0).abs() < 1e-10, "expected 1.0, got {v}");
        }
    }

    #[test]
    fn atr_gap_extends_true_range() {
        // Second bar gaps far above the first close; TR must use |H - prevC|.
        let mut rows = vec![(10.0, 10.5, 9.5, 10.0); 15];
        rows[1] = (20.0, 20.5, 19.5, 20.0);
        let bars = bars_from_ohlc(&rows);
        let out = atr(&bars, 14);
        let first = out.iter().copied().find(|v| f64::is_finite(*v)).unwrap();
        assert!(first > 1.0, "gap should inflate the ATR seed, got {first}");
    }

    #[test]
    fn atr_first_defined_index() {
        let bars = bars_from_ohlc(&[(10.0, 10.5, 9.5, 10.0); 20]);
        let out = atr(&bars, 14);
        assert!(out[14].is_finite());
        assert!(out[..14].iter().all(|v| v.is_nan()));
    }
}
