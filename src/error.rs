// =============================================================================
// Error taxonomy
// =============================================================================
//
// Every external failure the engine can see is classified here. The fetcher
// retries Transient and RateLimited; Unauthorized pauses further fetches for
// a cooldown window at the scheduler; NotFound flags the instrument as
// unfetchable for the epoch; everything else is terminal for the call.
//
// `FetchError` is `Clone` so that a single in-flight fetch can hand the same
// outcome to every single-flight waiter.
// =============================================================================

use std::time::Duration;

use thiserror::Error;

/// Failure classification for a broker fetch.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    /// A deadline elapsed (per-call, per-symbol, or epoch).
    #[error("deadline elapsed")]
    Timeout,

    /// Credentials invalid or expired. Never retried here; the scheduler
    /// pauses further fetches for a cooldown window.
    #[error("broker rejected credentials")]
    Unauthorized,

    /// Broker asked us to slow down. Retried with backoff, honouring the
    /// provided delay when present.
    #[error("rate limited by broker")]
    RateLimited { retry_after: Option<Duration> },

    /// Network blip / 5xx. Retried with backoff.
    #[error("transient broker failure: {0}")]
    Transient(String),

    /// Instrument unknown or delisted. Logged, no retries.
    #[error("instrument not found")]
    NotFound,

    /// Anything non-recoverable (malformed response, client bug upstream).
    #[error("permanent broker failure: {0}")]
    Permanent(String),

    /// The caller's cancellation token fired mid-call.
    #[error("cancelled")]
    Cancelled,
}

impl FetchError {
    /// Whether the fetcher may retry this failure within the caller deadline.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::RateLimited { .. })
    }

    /// Stable label for structured logs and stats.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::Unauthorized => "unauthorized",
            Self::RateLimited { .. } => "rate_limited",
            Self::Transient(_) => "transient",
            Self::NotFound => "not_found",
            Self::Permanent(_) => "permanent",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Failure classification for the signal store.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("signal {0} not found")]
    NotFound(uuid::Uuid),

    #[error("persistence failed: {0}")]
    Backend(String),

    #[error("cancelled")]
    Cancelled,
}
