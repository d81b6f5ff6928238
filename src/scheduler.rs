// =============================================================================
// Scheduler — named triggers, epoch dispatch, sweeper, control surface
// =============================================================================
//
// Owns every moving part of the engine: the trigger loop computes each
// trigger's next fire in exchange time and dispatches scan epochs; an
// overlapping fire for a trigger whose previous epoch is still running is
// skipped and counted, never queued. A periodic sweeper expires overdue
// PENDING signals and purges stale cache entries.
//
// The control surface (`start`, `stop`, `trigger_now`, `stats`, `next_runs`)
// is the only API the surrounding layers may touch.
// =============================================================================

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::broker::BrokerClient;
use crate::cache::SymbolDataCache;
use crate::clock::{Clock, MarketCalendar};
use crate::config::{ScanConfig, TriggerConfig};
use crate::fetcher::Fetcher;
use crate::notify::Notifier;
use crate::pipeline::{PipelineConfig, SignalPipeline};
use crate::risk::RiskPolicy;
use crate::scanner::{AuthCooldown, EpochStats, ScanEpoch, UnifiedScanner};
use crate::store::SignalStore;
use crate::strategies::StrategyRegistry;

/// Cumulative engine counters plus the last finished epoch per trigger.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SchedulerStats {
    pub epochs_completed: u64,
    pub skipped_overlap: u64,
    pub signals_expired: u64,
    pub cache_entries_purged: u64,
    pub last_epochs: BTreeMap<String, EpochStats>,
}

/// Upcoming fire time for one trigger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NextRun {
    pub trigger: String,
    pub at: DateTime<Utc>,
}

struct Inner {
    cfg: Arc<ScanConfig>,
    clock: Arc<dyn Clock>,
    calendar: MarketCalendar,
    scanner: UnifiedScanner,
    store: Arc<dyn SignalStore>,
    cache: Arc<SymbolDataCache>,
    running: Mutex<HashSet<String>>,
    stats: Mutex<SchedulerStats>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
    started: AtomicBool,
}

/// The engine's root object. Construct one at startup, `start` it, and tear
/// it down with `stop`; tests build fresh instances with mock collaborators.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl Scheduler {
    /// Wire the engine from its injected collaborators. Fails fast on any
    /// configuration invariant violation.
    pub fn new(
        cfg: ScanConfig,
        clock: Arc<dyn Clock>,
        broker: Arc<dyn BrokerClient>,
        store: Arc<dyn SignalStore>,
        risk: Arc<dyn RiskPolicy>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self> {
        cfg.validate().context("invalid scan configuration")?;
        let calendar = cfg.calendar()?;
        let cfg = Arc::new(cfg);

        let fetcher = Arc::new(Fetcher::new(broker, clock.clone(), cfg.fetch_policy()));
        let cache = Arc::new(SymbolDataCache::new(clock.clone(), cfg.cache_capacity));
        let pipeline = Arc::new(SignalPipeline::new(
            store.clone(),
            risk,
            notifier,
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
            clock.clone(),
            cache.clone(),
            fetcher,
            Arc::new(StrategyRegistry::with_builtins()),
            pipeline,
            Arc::new(AuthCooldown::new(cfg.unauthorized_cooldown())),
        );

        Ok(Self {
            inner: Arc::new(Inner {
                cfg,
                clock,
                calendar,
                scanner,
                store,
                cache,
                running: Mutex::new(HashSet::new()),
                stats: Mutex::new(SchedulerStats::default()),
                shutdown: CancellationToken::new(),
                tracker: TaskTracker::new(),
                started: AtomicBool::new(false),
            }),
        })
    }

    /// Launch the trigger loop and the sweeper. Idempotent.
    pub fn start(&self) {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            warn!("scheduler already started");
            return;
        }

        for run in self.next_runs() {
            info!(trigger = %run.trigger, at = %run.at, "next fire scheduled");
        }

        let loop_inner = self.inner.clone();
        self.inner.tracker.spawn(async move {
            loop_inner.run_trigger_loop().await;
        });

        let sweep_inner = self.inner.clone();
        self.inner.tracker.spawn(async move {
            sweep_inner.run_sweeper().await;
        });

        info!(triggers = self.inner.cfg.triggers.len(), "scheduler started");
    }

    /// Signal shutdown and wait up to `grace` for in-flight work, then give
    /// up and let the process exit.
    pub async fn stop(&self, grace: Duration) {
        info!(grace_secs = grace.as_secs(), "scheduler stopping");
        self.inner.shutdown.cancel();
        self.inner.tracker.close();

        if tokio::time::timeout(grace, self.inner.tracker.wait()).await.is_err() {
            error!("in-flight epochs did not finish within the grace period; forcing exit");
        } else {
            info!("scheduler stopped cleanly");
        }
    }

    /// Fire one trigger immediately (outside its schedule). Fails when the
    /// trigger is unknown or its previous epoch is still running.
    pub fn trigger_now(&self, trigger_name: &str) -> Result<Uuid> {
        let trigger = self
            .inner
            .cfg
            .triggers
            .iter()
            .find(|t| t.name == trigger_name)
            .with_context(|| format!("unknown trigger '{trigger_name}'"))?
            .clone();

        match Inner::fire(&self.inner, &trigger) {
            Some(epoch_id) => Ok(epoch_id),
            None => bail!("trigger '{trigger_name}' already has an epoch in flight"),
        }
    }

    /// Snapshot of the cumulative counters.
    pub fn stats(&self) -> SchedulerStats {
        self.inner.stats.lock().clone()
    }

    /// Upcoming fire time per trigger, soonest first.
    pub fn next_runs(&self) -> Vec<NextRun> {
        let now = self.inner.clock.now();
        let mut runs: Vec<NextRun> = self
            .inner
            .cfg
            .triggers
            .iter()
            .map(|t| NextRun {
                trigger: t.name.clone(),
                at: t.spec.next_fire(now, &self.inner.calendar),
            })
            .collect();
        runs.sort_by_key(|r| r.at);
        runs
    }
}

impl Inner {
    /// The trigger loop: keep a next-fire cursor per trigger, sleep to the
    /// earliest, fire everything due, advance cursors.
    async fn run_trigger_loop(self: Arc<Self>) {
        let mut next_at: BTreeMap<String, DateTime<Utc>> = self
            .cfg
            .triggers
            .iter()
            .map(|t| (t.name.clone(), t.spec.next_fire(self.clock.now(), &self.calendar)))
            .collect();

        loop {
            let Some((_, &soonest)) = next_at.iter().min_by_key(|(_, at)| **at) else {
                return;
            };

            let wait = (soonest - self.clock.now()).to_std().unwrap_or(Duration::ZERO);
            tokio::select! {
                _ = self.shutdown.cancelled() => return,
                _ = tokio::time::sleep(wait) => {}
            }

            let now = self.clock.now();
            let due: Vec<String> = next_at
                .iter()
                .filter(|(_, at)| **at <= now)
                .map(|(name, _)| name.clone())
                .collect();

            for name in due {
                let Some(trigger) = self.cfg.triggers.iter().find(|t| t.name == name) else {
                    continue;
                };
                let _ = Inner::fire(&self, trigger);
                let fired_at = next_at[&name];
                next_at.insert(name, trigger.spec.next_fire(fired_at, &self.calendar));
            }
        }
    }

    /// Dispatch one epoch for `trigger` unless its previous epoch is still
    /// running, in which case the fire is skipped and counted.
    fn fire(inner: &Arc<Inner>, trigger: &TriggerConfig) -> Option<Uuid> {
        {
            let mut running = inner.running.lock();
            if !running.insert(trigger.name.clone()) {
                inner.stats.lock().skipped_overlap += 1;
                warn!(
                    trigger = %trigger.name,
                    "previous epoch still running; skipping this fire"
                );
                return None;
            }
        }

        let epoch =
            ScanEpoch::new(&trigger.name, inner.clock.now(), trigger.categories.clone());
        let epoch_id = epoch.epoch_id;
        let name = trigger.name.clone();
        let task_inner = inner.clone();

        inner.tracker.spawn(async move {
            let stats = task_inner.scanner.run(&epoch, &task_inner.shutdown).await;
            {
                let mut s = task_inner.stats.lock();
                s.epochs_completed += 1;
                s.last_epochs.insert(name.clone(), stats);
            }
            task_inner.running.lock().remove(&name);
        });

        Some(epoch_id)
    }

    /// Periodic sweep: expire overdue PENDING signals and purge stale cache
    /// entries.
    async fn run_sweeper(self: Arc<Self>) {
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => return,
                _ = tokio::time::sleep(self.cfg.sweep_interval()) => {}
            }

            match self.store.expire_overdue(self.clock.now(), &self.shutdown).await {
                Ok(expired) => {
                    if expired > 0 {
                        self.stats.lock().signals_expired += expired;
                    }
                }
                Err(e) => warn!(error = %e, "expiry sweep failed"),
            }

            let purged = self.cache.purge_stale();
            if purged > 0 {
                self.stats.lock().cache_entries_purged += purged as u64;
            }
        }
    }
}
