// =============================================================================
// SymbolDataCache — time-bounded, single-flight cache of bars + indicators
// =============================================================================
//
// Keyed by (instrument, interval). Guarantees:
//
//   - Single-flight: concurrent callers for one key observe exactly one
//     underlying fetch and all receive its outcome (value or error).
//   - A waiter whose deadline expires gets `Timeout`, but the in-flight
//     fetch runs to completion and its result is still stored.
//   - Entries are fresh while `now < valid_until`; stale entries are treated
//     as absent on read (lazy eviction), with an explicit purge for sweeps.
//   - Bounded by entry count with LRU eviction of ready entries; in-flight
//     entries are pinned and never evicted.
//   - A published `SymbolData` is immutable; readers hold `Arc` snapshots.
//
// The map lock is a plain mutex held only for map surgery — never across a
// fetch or any await point.
// =============================================================================

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::bars::BarSeries;
use crate::clock::Clock;
use crate::error::FetchError;
use crate::indicators::IndicatorFrame;
use crate::types::Interval;

/// Cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SymbolKey {
    pub instrument: String,
    pub interval: Interval,
}

impl SymbolKey {
    pub fn new(instrument: impl Into<String>, interval: Interval) -> Self {
        Self { instrument: instrument.into(), interval }
    }
}

/// One cached unit of market data: the bar series plus the indicator frame
/// computed from it, stamped with its freshness window.
#[derive(Debug, Clone)]
pub struct SymbolData {
    pub instrument: String,
    pub interval: Interval,
    pub series: Arc<BarSeries>,
    pub indicators: Arc<IndicatorFrame>,
    pub fetched_at: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
}

/// How a `get_or_fetch` call was satisfied (feeds epoch stats).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataSource {
    /// Served from a fresh cached entry.
    CacheHit,
    /// This call ran the underlying fetch.
    Fetched,
    /// Joined a fetch another caller already had in flight.
    Joined,
}

#[derive(Clone)]
enum FlightOutcome {
    Pending,
    Done(Result<Arc<SymbolData>, FetchError>),
}

enum Slot {
    Ready { data: Arc<SymbolData>, last_used: u64 },
    InFlight { rx: watch::Receiver<FlightOutcome> },
}

struct Inner {
    map: HashMap<SymbolKey, Slot>,
    /// Monotonic LRU tick.
    tick: u64,
}

/// State shared between the cache handle and its detached fetch flights.
struct CacheShared {
    clock: Arc<dyn Clock>,
    capacity: usize,
    inner: Mutex<Inner>,
}

pub struct SymbolDataCache {
    shared: Arc<CacheShared>,
}

impl SymbolDataCache {
    pub fn new(clock: Arc<dyn Clock>, capacity: usize) -> Self {
        Self {
            shared: Arc::new(CacheShared {
                clock,
                capacity: capacity.max(1),
                inner: Mutex::new(Inner { map: HashMap::new(), tick: 0 }),
            }),
        }
    }

    /// Return a fresh entry for `key`, or run `fetch_fn` (exactly once across
    /// all concurrent callers) and store its result with a freshness window
    /// of `ttl`.
    ///
    /// Waiters time out at `deadline` with `FetchError::Timeout`; the fetch
    /// itself keeps running and still populates the cache on success.
    pub async fn get_or_fetch<F, Fut>(
        &self,
        key: SymbolKey,
        ttl: chrono::Duration,
        deadline: Instant,
        cancel: &CancellationToken,
        fetch_fn: F,
    ) -> Result<(Arc<SymbolData>, DataSource), FetchError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(Arc<BarSeries>, Arc<IndicatorFrame>), FetchError>>
            + Send
            + 'static,
    {
        let (rx, source) = {
            let mut inner = self.shared.inner.lock();

            let fresh = match inner.map.get(&key) {
                Some(Slot::Ready { data, .. }) if self.shared.clock.now() < data.valid_until => {
                    Some(data.clone())
                }
                _ => None,
            };
            if let Some(data) = fresh {
                inner.tick += 1;
                let tick = inner.tick;
                if let Some(Slot::Ready { last_used, .. }) = inner.map.get_mut(&key) {
                    *last_used = tick;
                }
                debug!(instrument = %key.instrument, interval = %key.interval, "cache hit");
                return Ok((data, DataSource::CacheHit));
            }

            let joined = match inner.map.get(&key) {
                Some(Slot::InFlight { rx }) => Some(rx.clone()),
                _ => None,
            };
            match joined {
                Some(rx) => (rx, DataSource::Joined),
                None => {
                    // Stale or absent: this caller leads a new fetch. The
                    // insert also displaces any stale Ready entry.
                    let (tx, rx) = watch::channel(FlightOutcome::Pending);
                    inner.map.insert(key.clone(), Slot::InFlight { rx: rx.clone() });
                    spawn_flight(self.shared.clone(), key.clone(), ttl, tx, fetch_fn());
                    (rx, DataSource::Fetched)
                }
            }
        };

        let waited = tokio::select! {
            _ = cancel.cancelled() => return Err(FetchError::Cancelled),
            outcome = tokio::time::timeout_at(deadline, await_outcome(rx)) => outcome,
        };
        match waited {
            Ok(result) => result.map(|data| (data, source)),
            Err(_elapsed) => Err(FetchError::Timeout),
        }
    }

    /// Remove a ready entry. A concurrent in-flight fetch is unaffected.
    pub fn invalidate(&self, key: &SymbolKey) {
        let mut inner = self.shared.inner.lock();
        if matches!(inner.map.get(key), Some(Slot::Ready { .. })) {
            inner.map.remove(key);
        }
    }

    /// Drop every ready entry whose freshness window has elapsed. Intended
    /// for the scheduler's periodic sweep; reads already treat stale entries
    /// as absent.
    pub fn purge_stale(&self) -> usize {
        let now = self.shared.clock.now();
        let mut inner = self.shared.inner.lock();
        let before = inner.map.len();
        inner.map.retain(|_, slot| match slot {
            Slot::Ready { data, .. } => now < data.valid_until,
            Slot::InFlight { .. } => true,
        });
        before - inner.map.len()
    }

    /// Number of entries currently held (ready + in-flight).
    pub fn len(&self) -> usize {
        self.shared.inner.lock().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Drive one underlying fetch to completion on its own task, so waiter
/// deadlines never abort it and its result is stored regardless.
fn spawn_flight<Fut>(
    shared: Arc<CacheShared>,
    key: SymbolKey,
    ttl: chrono::Duration,
    tx: watch::Sender<FlightOutcome>,
    fetch: Fut,
) where
    Fut: Future<Output = Result<(Arc<BarSeries>, Arc<IndicatorFrame>), FetchError>>
        + Send
        + 'static,
{
    tokio::spawn(async move {
        let result = fetch.await.map(|(series, indicators)| {
            let fetched_at = shared.clock.now();
            Arc::new(SymbolData {
                instrument: key.instrument.clone(),
                interval: key.interval,
                series,
                indicators,
                fetched_at,
                valid_until: fetched_at + ttl,
            })
        });

        {
            let mut inner = shared.inner.lock();
            match &result {
                Ok(data) => {
                    inner.tick += 1;
                    let tick = inner.tick;
                    inner
                        .map
                        .insert(key.clone(), Slot::Ready { data: data.clone(), last_used: tick });
                    shared.evict_over_capacity(&mut inner);
                }
                Err(err) => {
                    // Failed fetches leave no entry behind.
                    if matches!(inner.map.get(&key), Some(Slot::InFlight { .. })) {
                        inner.map.remove(&key);
                    }
                    warn!(
                        instrument = %key.instrument,
                        interval = %key.interval,
                        error_kind = err.kind(),
                        "fetch flight failed"
                    );
                }
            }
        }

        let _ = tx.send(FlightOutcome::Done(result));
    });
}

async fn await_outcome(
    mut rx: watch::Receiver<FlightOutcome>,
) -> Result<Arc<SymbolData>, FetchError> {
    match rx.wait_for(|s| !matches!(s, FlightOutcome::Pending)).await {
        Ok(guard) => match &*guard {
            FlightOutcome::Done(result) => result.clone(),
            FlightOutcome::Pending => unreachable!("wait_for only yields resolved flights"),
        },
        // The driving task died without resolving (panic); report it as
        // transient so callers may retry on the next scan.
        Err(_) => Err(FetchError::Transient("fetch flight aborted".into())),
    }
}

impl CacheShared {
    /// Evict least-recently-used ready entries until within capacity.
    /// In-flight entries are pinned, so the map may transiently exceed the
    /// bound when every entry is mid-fetch.
    fn evict_over_capacity(&self, inner: &mut Inner) {
        while inner.map.len() > self.capacity {
            let victim = inner
                .map
                .iter()
                .filter_map(|(k, slot)| match slot {
                    Slot::Ready { last_used, .. } => Some((k.clone(), *last_used)),
                    Slot::InFlight { .. } => None,
                })
                .min_by_key(|(_, last_used)| *last_used)
                .map(|(k, _)| k);
            match victim {
                Some(k) => {
                    debug!(instrument = %k.instrument, interval = %k.interval, "evicting LRU entry");
                    inner.map.remove(&k);
                }
                None => break,
            }
        }
    }
}
