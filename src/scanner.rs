// =============================================================================
// UnifiedScanner — one scan epoch, fanned out and bounded
// =============================================================================
//
// For an epoch: union the watchlists of its categories, then run one task
// per instrument under a bounded semaphore. Each task obtains SymbolData
// through the single-flight cache (one fetch per (instrument, interval) no
// matter how many categories want it), computes indicators exactly once
// inside the fetch flight, runs every registered strategy per category, and
// reports an outcome. The whole gather sits under the epoch deadline;
// stragglers are cooperatively cancelled and counted, never awaited forever.
//
// Surviving candidates are handed to the signal pipeline after the gather,
// and the merged stats go back to the scheduler.
// =============================================================================

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{mpsc, Semaphore};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::broker::FetchWindow;
use crate::cache::{DataSource, SymbolDataCache, SymbolKey};
use crate::clock::Clock;
use crate::config::ScanConfig;
use crate::error::FetchError;
use crate::fetcher::Fetcher;
use crate::indicators::IndicatorFrame;
use crate::pipeline::{PipelineOutcome, SignalPipeline};
use crate::strategies::StrategyRegistry;
use crate::types::{Candidate, Interval, StrategyCategory};

/// Extra bars fetched beyond the deepest strategy requirement so indicator
/// warm-up never starves a strategy after a data gap.
const HISTORY_MARGIN_BARS: usize = 20;

// ---------------------------------------------------------------------------
// Epoch types
// ---------------------------------------------------------------------------

/// One scheduled invocation of the unified scan.
#[derive(Debug, Clone)]
pub struct ScanEpoch {
    pub epoch_id: Uuid,
    pub trigger: String,
    pub triggered_at: DateTime<Utc>,
    pub categories: Vec<StrategyCategory>,
}

impl ScanEpoch {
    pub fn new(
        trigger: impl Into<String>,
        triggered_at: DateTime<Utc>,
        categories: Vec<StrategyCategory>,
    ) -> Self {
        Self { epoch_id: Uuid::new_v4(), trigger: trigger.into(), triggered_at, categories }
    }
}

/// Terminal counters for one epoch, written once when the epoch finishes.
#[derive(Debug, Clone, Default, Serialize)]
pub struct EpochStats {
    pub symbols: u64,
    pub fetched: u64,
    pub cache_hits: u64,
    pub candidates: u64,
    pub invalid_candidates: u64,
    pub dedup_suppressed: u64,
    pub risk_rejected: u64,
    pub persisted: u64,
    pub auto_approved: u64,
    pub notified: u64,
    pub persist_failed: u64,
    pub notify_failed: u64,
    pub failed: u64,
    pub timed_out: u64,
    pub cancelled: u64,
    pub duration_ms: u64,
}

impl EpochStats {
    fn absorb_pipeline(&mut self, outcome: PipelineOutcome) {
        self.dedup_suppressed += outcome.dedup_suppressed;
        self.risk_rejected += outcome.risk_rejected;
        self.invalid_candidates += outcome.invalid_candidates;
        self.persisted += outcome.persisted;
        self.auto_approved += outcome.auto_approved;
        self.notified += outcome.notified;
        self.persist_failed += outcome.persist_failed;
        self.notify_failed += outcome.notify_failed;
    }
}

/// Result of one per-symbol task.
#[derive(Debug, Default)]
struct SymbolOutcome {
    candidates: Vec<Candidate>,
    fetched: u64,
    cache_hits: u64,
    invalid_candidates: u64,
    failed: bool,
    timed_out: bool,
    cancelled: bool,
}

// ---------------------------------------------------------------------------
// Unauthorized cooldown
// ---------------------------------------------------------------------------

/// Once the broker rejects credentials, further fetches pause until the
/// cooldown elapses. `engage` reports whether this call opened the window,
/// so the caller emits exactly one observability event per window.
pub struct AuthCooldown {
    cooldown: chrono::Duration,
    until: Mutex<Option<DateTime<Utc>>>,
}

impl AuthCooldown {
    pub fn new(cooldown: chrono::Duration) -> Self {
        Self { cooldown, until: Mutex::new(None) }
    }

    pub fn active(&self, now: DateTime<Utc>) -> bool {
        (*self.until.lock()).map_or(false, |u| now < u)
    }

    /// Open (or extend) the pause window. Returns `true` only when a new
    /// window was opened.
    pub fn engage(&self, now: DateTime<Utc>) -> bool {
        let mut until = self.until.lock();
        let newly = (*until).map_or(true, |u| now >= u);
        if newly {
            *until = Some(now + self.cooldown);
        }
        newly
    }
}

// ---------------------------------------------------------------------------
// Scanner
// ---------------------------------------------------------------------------

pub struct UnifiedScanner {
    cfg: Arc<ScanConfig>,
    clock: Arc<dyn Clock>,
    cache: Arc<SymbolDataCache>,
    fetcher: Arc<Fetcher>,
    registry: Arc<StrategyRegistry>,
    pipeline: Arc<SignalPipeline>,
    auth_cooldown: Arc<AuthCooldown>,
}

impl UnifiedScanner {
    pub fn new(
        cfg: Arc<ScanConfig>,
        clock: Arc<dyn Clock>,
        cache: Arc<SymbolDataCache>,
        fetcher: Arc<Fetcher>,
        registry: Arc<StrategyRegistry>,
        pipeline: Arc<SignalPipeline>,
        auth_cooldown: Arc<AuthCooldown>,
    ) -> Self {
        Self { cfg, clock, cache, fetcher, registry, pipeline, auth_cooldown }
    }

    /// Run one epoch to completion (or its deadline) and return its stats.
    ///
    /// `shutdown` is the engine-wide token: cancelling it aborts the gather
    /// and the pipeline. The epoch deadline cancels only this epoch's tasks.
    pub async fn run(&self, epoch: &ScanEpoch, shutdown: &CancellationToken) -> EpochStats {
        let started = Instant::now();
        let epoch_deadline = started + self.cfg.epoch_timeout();
        let epoch_cancel = shutdown.child_token();

        let plan = self.build_plan(epoch);
        let mut stats = EpochStats { symbols: plan.len() as u64, ..EpochStats::default() };

        info!(
            epoch_id = %epoch.epoch_id,
            trigger = %epoch.trigger,
            categories = ?epoch.categories,
            symbols = plan.len(),
            "scan epoch started"
        );

        // --- Fan out, bounded by the parallelism ceiling --------------------
        let semaphore = Arc::new(Semaphore::new(self.cfg.parallelism));
        let (tx, mut rx) = mpsc::channel::<SymbolOutcome>(plan.len().max(1));

        let total = plan.len();
        for (instrument, intervals) in plan {
            let task_tx = tx.clone();
            let semaphore = semaphore.clone();
            let cancel = epoch_cancel.clone();
            let scanner = self.clone_refs();
            let epoch_id = epoch.epoch_id;

            tokio::spawn(async move {
                let outcome = tokio::select! {
                    _ = cancel.cancelled() => SymbolOutcome { cancelled: true, ..Default::default() },
                    permit = semaphore.acquire_owned() => {
                        let _permit = permit.expect("scan semaphore never closes");
                        scanner.scan_symbol(epoch_id, &instrument, intervals, epoch_deadline, &cancel).await
                    }
                };
                let _ = task_tx.send(outcome).await;
            });
        }
        drop(tx);

        // --- Gather under the epoch deadline ---------------------------------
        let mut received = 0usize;
        let mut all_candidates = Vec::new();
        loop {
            match tokio::time::timeout_at(epoch_deadline, rx.recv()).await {
                Ok(Some(outcome)) => {
                    received += 1;
                    self.merge_outcome(&mut stats, &mut all_candidates, outcome);
                }
                Ok(None) => break,
                Err(_elapsed) => {
                    warn!(
                        epoch_id = %epoch.epoch_id,
                        outstanding = total - received,
                        "epoch deadline reached; cancelling outstanding symbol tasks"
                    );
                    epoch_cancel.cancel();
                    // Brief drain so already-finished tasks still report.
                    while let Ok(Some(outcome)) =
                        tokio::time::timeout(std::time::Duration::from_millis(50), rx.recv()).await
                    {
                        received += 1;
                        self.merge_outcome(&mut stats, &mut all_candidates, outcome);
                    }
                    break;
                }
            }
        }
        stats.timed_out += (total - received) as u64;

        // --- Pipeline ---------------------------------------------------------
        stats.candidates = all_candidates.len() as u64;
        let pipeline_outcome =
            self.pipeline.process(epoch.epoch_id, all_candidates, shutdown).await;
        stats.absorb_pipeline(pipeline_outcome);

        stats.duration_ms = started.elapsed().as_millis() as u64;
        info!(
            epoch_id = %epoch.epoch_id,
            trigger = %epoch.trigger,
            symbols = stats.symbols,
            fetched = stats.fetched,
            cache_hits = stats.cache_hits,
            candidates = stats.candidates,
            persisted = stats.persisted,
            timed_out = stats.timed_out,
            failed = stats.failed,
            duration_ms = stats.duration_ms,
            "scan epoch finished"
        );
        stats
    }

    fn merge_outcome(
        &self,
        stats: &mut EpochStats,
        candidates: &mut Vec<Candidate>,
        outcome: SymbolOutcome,
    ) {
        stats.fetched += outcome.fetched;
        stats.cache_hits += outcome.cache_hits;
        stats.invalid_candidates += outcome.invalid_candidates;
        if outcome.failed {
            stats.failed += 1;
        }
        if outcome.timed_out {
            stats.timed_out += 1;
        }
        if outcome.cancelled {
            stats.cancelled += 1;
        }
        candidates.extend(outcome.candidates);
    }

    /// Union the watchlists of the epoch's categories, first-seen order,
    /// mapping each instrument to the intervals it needs and the categories
    /// wanting each interval.
    fn build_plan(&self, epoch: &ScanEpoch) -> Vec<(String, BTreeMap<Interval, Vec<StrategyCategory>>)> {
        let mut order: Vec<String> = Vec::new();
        let mut by_instrument: HashMap<String, BTreeMap<Interval, Vec<StrategyCategory>>> =
            HashMap::new();

        for &category in &epoch.categories {
            let interval = category.interval();
            for instrument in self.cfg.watchlist(category) {
                let entry = by_instrument.entry(instrument.clone()).or_insert_with(|| {
                    order.push(instrument.clone());
                    BTreeMap::new()
                });
                let cats = entry.entry(interval).or_default();
                if !cats.contains(&category) {
                    cats.push(category);
                }
            }
        }

        order
            .into_iter()
            .map(|instrument| {
                let intervals = by_instrument.remove(&instrument).unwrap_or_default();
                (instrument, intervals)
            })
            .collect()
    }

    /// One symbol task: fetch (through the cache) per required interval,
    /// then run every category's strategies on the shared snapshot.
    async fn scan_symbol(
        &self,
        epoch_id: Uuid,
        instrument: &str,
        intervals: BTreeMap<Interval, Vec<StrategyCategory>>,
        epoch_deadline: Instant,
        cancel: &CancellationToken,
    ) -> SymbolOutcome {
        let mut outcome = SymbolOutcome::default();
        let symbol_deadline =
            (Instant::now() + self.cfg.symbol_timeout()).min(epoch_deadline);

        for (interval, categories) in intervals {
            if cancel.is_cancelled() {
                outcome.cancelled = true;
                break;
            }
            if self.auth_cooldown.active(self.clock.now()) {
                outcome.failed = true;
                debug!(
                    %epoch_id,
                    instrument,
                    "fetches paused by unauthorized cooldown; skipping symbol"
                );
                break;
            }

            let bars_needed = categories
                .iter()
                .map(|c| self.registry.max_history(*c))
                .max()
                .unwrap_or(0)
                + HISTORY_MARGIN_BARS;
            let window = Self::history_window(self.clock.now(), interval, bars_needed);
            let key = SymbolKey::new(instrument, interval);

            // The flight gets its own full symbol budget: a waiter timing out
            // must not abort the fetch for everyone else.
            let flight_deadline = Instant::now() + self.cfg.symbol_timeout();
            let fetcher = self.fetcher.clone();
            let flight_cancel = cancel.clone();
            let flight_instrument = instrument.to_string();
            let fetch_fn = move || async move {
                let series = fetcher
                    .fetch_bars(&flight_instrument, interval, window, flight_deadline, &flight_cancel)
                    .await?;
                let series = Arc::new(series);
                let indicators = Arc::new(IndicatorFrame::compute(&series));
                Ok((series, indicators))
            };

            match self
                .cache
                .get_or_fetch(key, self.cfg.cache_ttl(interval), symbol_deadline, cancel, fetch_fn)
                .await
            {
                Ok((data, source)) => {
                    match source {
                        DataSource::Fetched => outcome.fetched += 1,
                        DataSource::CacheHit => outcome.cache_hits += 1,
                        DataSource::Joined => {}
                    }
                    let now = self.clock.now();
                    for category in categories {
                        let run = self.registry.run_category(
                            category,
                            &data.series,
                            &data.indicators,
                            &self.cfg.strategy_params,
                            now,
                        );
                        outcome.invalid_candidates += run.invalid_candidates;
                        outcome.candidates.extend(run.candidates);
                    }
                }
                Err(err) => {
                    self.record_fetch_error(epoch_id, instrument, interval, err, &mut outcome);
                }
            }
        }

        outcome
    }

    fn record_fetch_error(
        &self,
        epoch_id: Uuid,
        instrument: &str,
        interval: Interval,
        err: FetchError,
        outcome: &mut SymbolOutcome,
    ) {
        match &err {
            FetchError::Timeout => outcome.timed_out = true,
            FetchError::Cancelled => outcome.cancelled = true,
            FetchError::Unauthorized => {
                outcome.failed = true;
                if self.auth_cooldown.engage(self.clock.now()) {
                    warn!(
                        %epoch_id,
                        cooldown_secs = self.cfg.unauthorized_cooldown_secs,
                        "broker rejected credentials; pausing fetches"
                    );
                }
            }
            _ => outcome.failed = true,
        }
        warn!(
            %epoch_id,
            instrument,
            %interval,
            error_kind = err.kind(),
            "symbol fetch unsuccessful"
        );
    }

    /// Wall-clock window wide enough to contain `bars` closed bars despite
    /// sessions, nights and weekends.
    fn history_window(now: DateTime<Utc>, interval: Interval, bars: usize) -> FetchWindow {
        let bars = bars.max(1) as i32;
        let span = if interval.is_intraday() {
            interval.bar_duration() * bars * 5 + chrono::Duration::days(3)
        } else {
            interval.bar_duration() * bars * 2
        };
        FetchWindow::new(now - span, now)
    }

    fn clone_refs(&self) -> Self {
        Self {
            cfg: self.cfg.clone(),
            clock: self.clock.clone(),
            cache: self.cache.clone(),
            fetcher: self.fetcher.clone(),
            registry: self.registry.clone(),
            pipeline: self.pipeline.clone(),
            auth_cooldown: self.auth_cooldown.clone(),
        }
    }
}
