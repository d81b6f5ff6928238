// =============================================================================
// Shared test harness: scripted broker, bar fixtures, engine wiring
// =============================================================================

// Each integration-test binary uses a different subset of this module.
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use argus::bars::{Bar, BarSeries};
use argus::broker::{BrokerClient, FetchWindow};
use argus::cache::SymbolDataCache;
use argus::clock::{Clock, SystemClock};
use argus::config::ScanConfig;
use argus::error::FetchError;
use argus::fetcher::Fetcher;
use argus::notify::LogNotifier;
use argus::pipeline::{PipelineConfig, SignalPipeline};
use argus::risk::BasicRiskPolicy;
use argus::scanner::{AuthCooldown, UnifiedScanner};
use argus::store::MemorySignalStore;
use argus::strategies::StrategyRegistry;
use argus::types::Interval;

// ---------------------------------------------------------------------------
// Scripted broker
// ---------------------------------------------------------------------------

/// Per-instrument behaviour: an artificial latency, an optional error script
/// consumed call-by-call, then fixed bars.
pub struct SymbolPlan {
    pub delay: Duration,
    pub script: Mutex<VecDeque<FetchError>>,
    pub bars: Vec<Bar>,
}

impl SymbolPlan {
    pub fn bars(bars: Vec<Bar>) -> Self {
        Self { delay: Duration::from_millis(10), script: Mutex::new(VecDeque::new()), bars }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Errors returned (in order) before the bars start succeeding.
    pub fn with_errors(self, errors: Vec<FetchError>) -> Self {
        *self.script.lock() = errors.into();
        self
    }
}

/// Broker mock that scripts behaviour per instrument and tracks both the
/// total call count and the peak number of concurrent calls.
#[derive(Default)]
pub struct MockBroker {
    plans: HashMap<String, SymbolPlan>,
    calls: AtomicU64,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl MockBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn plan(mut self, instrument: &str, plan: SymbolPlan) -> Self {
        self.plans.insert(instrument.to_string(), plan);
        self
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }
}

struct InFlightGuard<'a>(&'a MockBroker);

impl<'a> InFlightGuard<'a> {
    fn enter(broker: &'a MockBroker) -> Self {
        let current = broker.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        broker.peak_in_flight.fetch_max(current, Ordering::SeqCst);
        Self(broker)
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl BrokerClient for MockBroker {
    async fn fetch_historical(
        &self,
        instrument: &str,
        interval: Interval,
        _window: FetchWindow,
        cancel: &CancellationToken,
    ) -> Result<BarSeries, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let _guard = InFlightGuard::enter(self);

        let plan = self
            .plans
            .get(instrument)
            .ok_or_else(|| FetchError::NotFound)?;

        tokio::select! {
            _ = cancel.cancelled() => return Err(FetchError::Cancelled),
            _ = tokio::time::sleep(plan.delay) => {}
        }

        if let Some(err) = plan.script.lock().pop_front() {
            return Err(err);
        }

        BarSeries::new(instrument, interval, plan.bars.clone())
            .map_err(|e| FetchError::Permanent(e.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Bar fixtures
// ---------------------------------------------------------------------------

fn bar(i: usize, close: f64, volume: u64) -> Bar {
    let start = Utc.with_ymd_and_hms(2025, 6, 2, 4, 0, 0).unwrap();
    Bar::new(
        start + ChronoDuration::minutes(15 * i as i64),
        close,
        close + 0.5,
        close - 0.5,
        close,
        volume,
    )
}

/// Flat tape ending in one strong up bar: triggers the EMA-crossover BUY on
/// the final bar. `last_volume` tunes the candidate's confidence
/// (10_000 -> ~0.62, 40_000 -> ~0.87).
pub fn crossover_bars(last_volume: u64) -> Vec<Bar> {
    let mut bars: Vec<Bar> = (0..59).map(|i| bar(i, 100.0, 10_000)).collect();
    bars.push(bar(59, 110.0, last_volume));
    bars
}

/// Quiet tape that triggers no built-in strategy.
pub fn quiet_bars() -> Vec<Bar> {
    (0..60).map(|i| bar(i, 100.0, 10_000)).collect()
}

// ---------------------------------------------------------------------------
// Engine wiring
// ---------------------------------------------------------------------------

pub struct Harness {
    pub scanner: UnifiedScanner,
    pub store: Arc<MemorySignalStore>,
    pub broker: Arc<MockBroker>,
    pub cfg: Arc<ScanConfig>,
}

/// Wire a scanner around the scripted broker with the default registry.
pub fn harness(cfg: ScanConfig, broker: MockBroker) -> Harness {
    harness_with_registry(cfg, broker, StrategyRegistry::with_builtins())
}

pub fn harness_with_registry(
    cfg: ScanConfig,
    broker: MockBroker,
    registry: StrategyRegistry,
) -> Harness {
    let cfg = Arc::new(cfg);
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let broker = Arc::new(broker);
    let store = Arc::new(MemorySignalStore::new());

    let fetcher = Arc::new(Fetcher::new(broker.clone(), clock.clone(), cfg.fetch_policy()));
    let cache = Arc::new(SymbolDataCache::new(clock.clone(), cfg.cache_capacity));
    let pipeline = Arc::new(SignalPipeline::new(
        store.clone(),
        Arc::new(BasicRiskPolicy::new(1_000_000.0, 0.01, 0.0)),
        Arc::new(LogNotifier),
        clock.clone(),
        PipelineConfig {
            quiet_window: cfg.quiet_window(),
            signal_timeout: cfg.signal_timeout(),
            auto_trade: cfg.auto_trade,
            auto_threshold: cfg.auto_threshold,
        },
    ));
    let scanner = UnifiedScanner::new(
        cfg.clone(),
        clock,
        cache,
        fetcher,
        Arc::new(registry),
        pipeline,
        Arc::new(AuthCooldown::new(cfg.unauthorized_cooldown())),
    );

    Harness { scanner, store, broker, cfg }
}

/// A config whose day-trading and short-selling watchlists hold exactly the
/// given instruments (other categories emptied so scans stay focused).
pub fn intraday_config(instruments: &[&str]) -> ScanConfig {
    use argus::types::StrategyCategory::*;
    let mut cfg = ScanConfig::default();
    let list: Vec<String> = instruments.iter().map(|s| s.to_string()).collect();
    cfg.watchlists.clear();
    cfg.watchlists.insert(DayTrading, list.clone());
    cfg.watchlists.insert(ShortSelling, list);
    cfg
}
