// =============================================================================
// Fetcher — bounded, retrying wrapper around the broker client
// =============================================================================
//
// Every broker call is capped at min(caller deadline, per-interval cap).
// RateLimited and Transient failures are retried with full-jitter
// exponential backoff (base 500 ms, cap 8 s, 3 attempts), always inside the
// caller's deadline; any broker-provided retry delay is honoured as a floor.
// Unauthorized, NotFound and Permanent return immediately.
//
// The fetcher holds no lock of any kind across the broker call.
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::bars::BarSeries;
use crate::broker::{BrokerClient, FetchWindow};
use crate::clock::Clock;
use crate::error::FetchError;
use crate::types::Interval;

/// Retry and timeout policy. Defaults match the engine's hard bounds.
#[derive(Debug, Clone)]
pub struct FetchPolicy {
    /// Per-call cap for intraday history.
    pub intraday_cap: Duration,
    /// Per-call cap for long (daily) history.
    pub history_cap: Duration,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
    pub max_attempts: u32,
}

impl Default for FetchPolicy {
    fn default() -> Self {
        Self {
            intraday_cap: Duration::from_secs(30),
            history_cap: Duration::from_secs(60),
            backoff_base: Duration::from_millis(500),
            backoff_cap: Duration::from_secs(8),
            max_attempts: 3,
        }
    }
}

impl FetchPolicy {
    fn call_cap(&self, interval: Interval) -> Duration {
        if interval.is_intraday() {
            self.intraday_cap
        } else {
            self.history_cap
        }
    }

    /// Full-jitter backoff delay for a 1-based attempt number, floored at
    /// any broker-provided delay.
    fn backoff_delay(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let exp = self
            .backoff_base
            .saturating_mul(1_u32 << (attempt - 1).min(16))
            .min(self.backoff_cap);
        let jittered = exp.mul_f64(rand::thread_rng().gen_range(0.0..=1.0));
        match retry_after {
            Some(floor) => jittered.max(floor),
            None => jittered,
        }
    }
}

/// Broker wrapper enforcing the engine's timeout and retry policy.
pub struct Fetcher {
    broker: Arc<dyn BrokerClient>,
    clock: Arc<dyn Clock>,
    policy: FetchPolicy,
}

impl Fetcher {
    pub fn new(broker: Arc<dyn BrokerClient>, clock: Arc<dyn Clock>, policy: FetchPolicy) -> Self {
        Self { broker, clock, policy }
    }

    /// Fetch bars for one instrument within `deadline`.
    ///
    /// The returned series is clamped to closed bars (`last timestamp <= now`).
    pub async fn fetch_bars(
        &self,
        instrument: &str,
        interval: Interval,
        window: FetchWindow,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> Result<BarSeries, FetchError> {
        let cap = self.policy.call_cap(interval);
        let mut last_err = FetchError::Timeout;

        for attempt in 1..=self.policy.max_attempts {
            if cancel.is_cancelled() {
                return Err(FetchError::Cancelled);
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(FetchError::Timeout);
            }
            let call_timeout = cap.min(deadline - now);

            let call = self.broker.fetch_historical(instrument, interval, window, cancel);
            let outcome = tokio::select! {
                _ = cancel.cancelled() => Err(FetchError::Cancelled),
                result = tokio::time::timeout(call_timeout, call) => {
                    result.unwrap_or(Err(FetchError::Timeout))
                }
            };

            match outcome {
                Ok(mut series) => {
                    series.truncate_after(self.clock.now());
                    debug!(instrument, %interval, bars = series.len(), attempt, "fetch succeeded");
                    return Ok(series);
                }
                Err(err) if err.is_retryable() && attempt < self.policy.max_attempts => {
                    let retry_after = match &err {
                        FetchError::RateLimited { retry_after } => *retry_after,
                        _ => None,
                    };
                    let delay = self.policy.backoff_delay(attempt, retry_after);
                    if Instant::now() + delay >= deadline {
                        warn!(
                            instrument,
                            %interval,
                            attempt,
                            error_kind = err.kind(),
                            "no deadline budget left for backoff"
                        );
                        return Err(FetchError::Timeout);
                    }
                    warn!(
                        instrument,
                        %interval,
                        attempt,
                        error_kind = err.kind(),
                        delay_ms = delay.as_millis() as u64,
                        "fetch failed, backing off"
                    );
                    last_err = err;
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(FetchError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(err) => return Err(err),
            }
        }

        Err(last_err)
    }
}
