// =============================================================================
// Broker capability interface
// =============================================================================
//
// The scan engine only ever talks to a broker through this trait. Concrete
// implementations (signed REST, simulator, test mocks) are injected at
// wiring time; the core never names one.
// =============================================================================

pub mod rest;
pub mod sim;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use crate::bars::BarSeries;
use crate::error::FetchError;
use crate::types::Interval;

/// Half-open history window `[from, to)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchWindow {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

impl FetchWindow {
    pub fn new(from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        Self { from, to }
    }

    /// The window ending at `to` covering `bars` bars of `interval`.
    pub fn lookback(to: DateTime<Utc>, interval: Interval, bars: usize) -> Self {
        Self { from: to - interval.bar_duration() * bars as i32, to }
    }
}

/// Historical-data capability of a broker. This is the only broker call the
/// core makes; order placement lives outside the scan engine.
///
/// Implementations must return promptly once `cancel` fires and must classify
/// failures into the [`FetchError`] taxonomy — the fetcher's retry policy
/// keys off it.
#[async_trait]
pub trait BrokerClient: Send + Sync {
    async fn fetch_historical(
        &self,
        instrument: &str,
        interval: Interval,
        window: FetchWindow,
        cancel: &CancellationToken,
    ) -> Result<BarSeries, FetchError>;
}
