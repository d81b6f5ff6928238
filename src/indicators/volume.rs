// =============================================================================
// Volume statistics
// =============================================================================

use super::sma::sma;

/// Rolling average volume over `period` bars. Same NaN-prefix alignment as
/// every other indicator series.
pub fn volume_average(volumes: &[f64], period: usize) -> Vec<f64> {
    sma(volumes, period)
}

/// Ratio of the latest volume to its rolling average, when both are defined
/// and the average is non-zero.
pub fn volume_ratio(volumes: &[f64], period: usize) -> Option<f64> {
    let avg = *volume_average(volumes, period).last()?;
    let last = *volumes.last()?;
    if !avg.is_finite() || avg <= 0.0 || !last.is_finite() {
        return None;
    }
    Some(last / avg)
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn volume_average_matches_sma() {
        let vols = vec![10.0, 20.0, 30.0, 40.0];
        let out = volume_average(&vols, 2);
        assert!(out[0].is_nan());
        assert!((out[1] - 15.0).abs() < 1e-12);
        assert!((out[3] - 35.0).abs() < 1e-12);
    }

    #[test]
    fn volume_ratio_basic() {
        let vols = vec![10.0, 10.0, 10.0, 20.0];
        // Average over 4 = 12.5, last = 20 => ratio 1.6.
        let ratio = volume_ratio(&vols, 4).unwrap();
        assert!((ratio - 1.6).abs() < 1e-12);
    }

    #[test]
    fn volume_ratio_insufficient_data() {
        assert!(volume_ratio(&[10.0, 10.0], 4).is_none());
    }

    #[test]
    fn volume_ratio_zero_average() {
        assert!(volume_ratio(&[0.0, 0.0, 0.0, 0.0], 4).is_none());
    }
}
