// =============================================================================
// Simulated broker — deterministic synthetic bars
// =============================================================================
//
// Lets the engine run end-to-end with no credentials and no network. Each
// (instrument, interval) pair produces a reproducible random walk seeded from
// the instrument name, so repeated fetches over the same window return
// identical bars and scans stay idempotent.
// =============================================================================

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::time::Duration;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio_util::sync::CancellationToken;

use crate::bars::{Bar, BarSeries};
use crate::error::FetchError;
use crate::types::Interval;

use super::{BrokerClient, FetchWindow};

/// Synthetic bar source with a configurable artificial latency.
#[derive(Debug, Clone)]
pub struct SimBrokerClient {
    latency: Duration,
}

impl SimBrokerClient {
    pub fn new(latency: Duration) -> Self {
        Self { latency }
    }

    fn seed_for(instrument: &str, interval: Interval) -> u64 {
        let mut hasher = DefaultHasher::new();
        instrument.hash(&mut hasher);
        interval.to_string().hash(&mut hasher);
        hasher.finish()
    }

    /// Generate the walk for one (instrument, interval) window. Bars sit on
    /// the interval grid; the walk always starts from the same seeded price
    /// so any two overlapping windows agree on shared timestamps.
    fn generate(
        instrument: &str,
        interval: Interval,
        window: FetchWindow,
    ) -> Result<BarSeries, FetchError> {
        let mut rng = StdRng::seed_from_u64(Self::seed_for(instrument, interval));
        let base_price: f64 = rng.gen_range(50.0..2_500.0);
        let step_secs = interval.bar_duration().num_seconds();

        // Anchor the walk at a fixed origin so the series is a pure function
        // of the grid index, not of the requested window.
        let origin = 1_577_836_800_i64; // 2020-01-01T00:00:00Z
        let from_idx = (window.from.timestamp() - origin).div_euclid(step_secs).max(0);
        let to_idx = (window.to.timestamp() - origin).div_euclid(step_secs).max(0);

        let mut price = base_price;
        let mut bars = Vec::new();
        for idx in 0..to_idx {
            // One RNG draw per grid step keeps the walk window-independent.
            let drift: f64 = rng.gen_range(-0.01..0.0102);
            let open = price;
            let close = (price * (1.0 + drift)).max(1.0);
            let high = open.max(close) * (1.0 + rng.gen_range(0.0..0.004));
            let low = open.min(close) * (1.0 - rng.gen_range(0.0..0.004));
            let volume = rng.gen_range(10_000..500_000);
            price = close;

            if idx >= from_idx {
                let ts = chrono::DateTime::from_timestamp(origin + idx * step_secs, 0)
                    .ok_or_else(|| FetchError::Permanent("timestamp overflow".into()))?;
                // Half-open window: [from, to).
                if ts >= window.from && ts < window.to {
                    bars.push(Bar::new(ts, open, high, low, close, volume));
                }
            }
        }

        BarSeries::new(instrument, interval, bars)
            .map_err(|e| FetchError::Permanent(format!("generated invalid series: {e}")))
    }
}

impl Default for SimBrokerClient {
    fn default() -> Self {
        Self::new(Duration::from_millis(50))
    }
}

#[async_trait]
impl BrokerClient for SimBrokerClient {
    async fn fetch_historical(
        &self,
        instrument: &str,
        interval: Interval,
        window: FetchWindow,
        cancel: &CancellationToken,
    ) -> Result<BarSeries, FetchError> {
        tokio::select! {
            _ = cancel.cancelled() => return Err(FetchError::Cancelled),
            _ = tokio::time::sleep(self.latency) => {}
        }
        Self::generate(instrument, interval, window)
    }
}
