// =============================================================================
// REST broker adapter — HMAC-SHA256 signed requests
// =============================================================================
//
// SECURITY: The secret key is never logged or serialized. The API key rides
// in the X-API-KEY header; every request carries a millisecond timestamp and
// an HMAC-SHA256 signature over the query string so replays outside the
// broker's recv-window are rejected server-side.
//
// HTTP status codes are classified into the engine's error taxonomy here so
// the fetcher's retry policy stays transport-agnostic.
// =============================================================================

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use hmac::{Hmac, Mac};
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::StatusCode;
use sha2::Sha256;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::bars::{Bar, BarSeries};
use crate::error::FetchError;
use crate::types::Interval;

use super::{BrokerClient, FetchWindow};

type HmacSha256 = Hmac<Sha256>;

/// Broker REST client with HMAC-SHA256 request signing.
#[derive(Clone)]
pub struct RestBrokerClient {
    secret: String,
    base_url: String,
    client: reqwest::Client,
}

impl RestBrokerClient {
    /// Create a new client.
    ///
    /// # Arguments
    /// * `base_url` — broker API root, e.g. `https://api.broker.example`.
    /// * `api_key`  — sent as a header on every request.
    /// * `secret`   — used exclusively for HMAC signing.
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        secret: impl Into<String>,
    ) -> Self {
        let api_key = api_key.into();

        let mut default_headers = HeaderMap::new();
        if let Ok(val) = HeaderValue::from_str(&api_key) {
            default_headers.insert("X-API-KEY", val);
        }

        // The outer per-call timeout is enforced by the fetcher; this is a
        // backstop against a wedged connection.
        let client = reqwest::Client::builder()
            .default_headers(default_headers)
            .timeout(std::time::Duration::from_secs(90))
            .build()
            .expect("failed to build reqwest client");

        Self { secret: secret.into(), base_url: base_url.into(), client }
    }

    /// HMAC-SHA256 hex signature of `query`.
    fn sign(&self, query: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .expect("HMAC accepts any key size");
        mac.update(query.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    fn signed_query(&self, params: &str, now: DateTime<Utc>) -> String {
        let ts = now.timestamp_millis();
        let base = format!("{params}&timestamp={ts}");
        let sig = self.sign(&base);
        format!("{base}&signature={sig}")
    }

    /// Map an HTTP status into the fetch taxonomy.
    fn classify_status(status: StatusCode, body: &str) -> FetchError {
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => FetchError::Unauthorized,
            StatusCode::NOT_FOUND => FetchError::NotFound,
            StatusCode::TOO_MANY_REQUESTS => FetchError::RateLimited { retry_after: None },
            s if s.is_server_error() => {
                FetchError::Transient(format!("broker returned {s}: {body}"))
            }
            s => FetchError::Permanent(format!("broker returned {s}: {body}")),
        }
    }

    /// Parse a JSON value that may be either a string or a number into `f64`.
    fn parse_str_f64(val: &serde_json::Value) -> Result<f64, FetchError> {
        if let Some(s) = val.as_str() {
            s.parse::<f64>()
                .map_err(|_| FetchError::Permanent(format!("unparseable price '{s}'")))
        } else if let Some(n) = val.as_f64() {
            Ok(n)
        } else {
            Err(FetchError::Permanent(format!("expected string or number, got {val}")))
        }
    }

    /// Parse the broker's array-of-arrays candle payload.
    ///
    /// Array indices: [0] epoch seconds, [1] open, [2] high, [3] low,
    /// [4] close, [5] volume.
    fn parse_candles(
        instrument: &str,
        interval: Interval,
        body: &serde_json::Value,
    ) -> Result<BarSeries, FetchError> {
        let raw = body
            .get("candles")
            .and_then(|v| v.as_array())
            .ok_or_else(|| FetchError::Permanent("response missing 'candles' array".into()))?;

        let mut bars = Vec::with_capacity(raw.len());
        for entry in raw {
            let arr = entry
                .as_array()
                .ok_or_else(|| FetchError::Permanent("candle entry is not an array".into()))?;
            if arr.len() < 6 {
                warn!(len = arr.len(), "skipping malformed candle entry");
                continue;
            }

            let epoch = arr[0]
                .as_i64()
                .ok_or_else(|| FetchError::Permanent("candle timestamp not an integer".into()))?;
            let timestamp = Utc
                .timestamp_opt(epoch, 0)
                .single()
                .ok_or_else(|| FetchError::Permanent(format!("bad epoch {epoch}")))?;

            let open = Self::parse_str_f64(&arr[1])?;
            let high = Self::parse_str_f64(&arr[2])?;
            let low = Self::parse_str_f64(&arr[3])?;
            let close = Self::parse_str_f64(&arr[4])?;
            let volume = Self::parse_str_f64(&arr[5])? as u64;

            bars.push(Bar::new(timestamp, open, high, low, close, volume));
        }

        BarSeries::new(instrument, interval, bars)
            .map_err(|e| FetchError::Permanent(format!("invalid candle series: {e}")))
    }

    fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<std::time::Duration> {
        headers
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u64>().ok())
            .map(std::time::Duration::from_secs)
    }
}

#[async_trait]
impl BrokerClient for RestBrokerClient {
    async fn fetch_historical(
        &self,
        instrument: &str,
        interval: Interval,
        window: FetchWindow,
        cancel: &CancellationToken,
    ) -> Result<BarSeries, FetchError> {
        let params = format!(
            "instrument={instrument}&interval={interval}&from={}&to={}",
            window.from.timestamp(),
            window.to.timestamp()
        );
        let qs = self.signed_query(&params, Utc::now());
        let url = format!("{}/v1/history?{}", self.base_url, qs);

        debug!(instrument, %interval, "fetching historical candles");

        let send = self.client.get(&url).send();
        let resp = tokio::select! {
            _ = cancel.cancelled() => return Err(FetchError::Cancelled),
            resp = send => resp.map_err(|e| FetchError::Transient(format!("request failed: {e}")))?,
        };

        let status = resp.status();
        if !status.is_success() {
            let retry_after = Self::parse_retry_after(resp.headers());
            let body = resp.text().await.unwrap_or_default();
            let mut err = Self::classify_status(status, &body);
            if let FetchError::RateLimited { retry_after: slot } = &mut err {
                *slot = retry_after;
            }
            return Err(err);
        }

        let body: serde_json::Value = tokio::select! {
            _ = cancel.cancelled() => return Err(FetchError::Cancelled),
            body = resp.json() => {
                body.map_err(|e| FetchError::Transient(format!("failed to read body: {e}")))?
            }
        };

        let series = Self::parse_candles(instrument, interval, &body)?;
        debug!(instrument, %interval, bars = series.len(), "candles fetched");
        Ok(series)
    }
}

impl std::fmt::Debug for RestBrokerClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestBrokerClient")
            .field("secret", &"<redacted>")
            .field("base_url", &self.base_url)
            .finish()
    }
}
