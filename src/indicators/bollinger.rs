// =============================================================================
// Bollinger Bands
// =============================================================================
//
// A middle band (SMA), an upper band (SMA + k*σ) and a lower band
// (SMA - k*σ), with σ the population standard deviation over the window.
// =============================================================================

use super::sma::sma;

/// Bollinger band series, aligned with the input closes.
#[derive(Debug, Clone)]
pub struct BollingerSeries {
    pub upper: Vec<f64>,
    pub middle: Vec<f64>,
    pub lower: Vec<f64>,
}

/// Compute Bollinger Bands for `closes` over `period` with multiplier `k`.
///
/// Output length equals input length; indices before `period - 1` are NaN in
/// all three bands.
pub fn bollinger(closes: &[f64], period: usize, k: f64) -> BollingerSeries {
    let middle = sma(closes, period);
    let mut upper = vec![f64::NAN; closes.len()];
    let mut lower = vec![f64::NAN; closes.len()];

    if period == 0 || closes.len() < period {
        return BollingerSeries { upper, middle, lower };
    }

    for i in (period - 1)..closes.len() {
        let mean = middle[i];
        if !mean.is_finite() {
            continue;
        }
        let window = &closes[i + 1 - period..=i];
        let variance =
            window.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / period as f64;
        let std_dev = variance.sqrt();
        if !std_dev.is_finite() {
            continue;
        }
        upper[i] = mean + k * std_dev;
        lower[i] = mean - k * std_dev;
    }

    BollingerSeries { upper, middle, lower }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bollinger_basic_ordering() {
        let closes: Vec<f64> = (1..=30).map(|x| x as f64).collect();
        let bb = bollinger(&closes, 20, 2.0);
        for i in 19..30 {
            assert!(bb.upper[i] > bb.middle[i]);
            assert!(bb.lower[i] < bb.middle[i]);
        }
    }

    #[test]
    fn bollinger_insufficient_data() {
        let bb = bollinger(&[1.0, 2.0, 3.0], 20, 2.0);
        assert!(bb.upper.iter().all(|v| v.is_nan()));
        assert!(bb.middle.iter().all(|v| v.is_nan()));
        assert!(bb.lower.iter().all(|v| v.is_nan()));
    }

    #[test]
    fn bollinger_flat_series_collapses() {
        let closes = vec![100.0; 25];
        let bb = bollinger(&closes, 20, 2.0);
        for i in 19..25 {
            assert!((bb.upper[i] - 100.0).abs() < 1e-10);
            assert!((bb.middle[i] - 100.0).abs() < 1e-10);
            assert!((bb.lower[i] - 100.0).abs() < 1e-10);
        }
    }

    #[test]
    fn bollinger_leading_nans() {
        let closes: Vec<f64> = (1..=25).map(|x| x as f64).collect();
        let bb = bollinger(&closes, 20, 2.0);
        assert!(bb.upper[18].is_nan());
        assert!(bb.upper[19].is_finite());
    }
}
