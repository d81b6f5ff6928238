// =============================================================================
// Scheduler scenarios: overlap skipping, graceful shutdown, expiry sweep
// =============================================================================

mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use argus::clock::SystemClock;
use argus::config::ScanConfig;
use argus::notify::LogNotifier;
use argus::risk::BasicRiskPolicy;
use argus::scheduler::Scheduler;
use argus::store::{MemorySignalStore, SignalStore};
use argus::types::{Candidate, Side, Signal, StrategyCategory};

use common::{intraday_config, quiet_bars, MockBroker, SymbolPlan};

fn scheduler_with(
    cfg: ScanConfig,
    broker: MockBroker,
) -> (Scheduler, Arc<MemorySignalStore>) {
    let store = Arc::new(MemorySignalStore::new());
    let scheduler = Scheduler::new(
        cfg,
        Arc::new(SystemClock),
        Arc::new(broker),
        store.clone(),
        Arc::new(BasicRiskPolicy::new(1_000_000.0, 0.01, 0.0)),
        Arc::new(LogNotifier),
    )
    .unwrap();
    (scheduler, store)
}

/// Poll until `done` or the (virtual) budget runs out.
async fn wait_until(mut done: impl FnMut() -> bool, budget: Duration) {
    let deadline = Instant::now() + budget;
    while !done() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
}

// ---------------------------------------------------------------------------
// Scenario E — no overlap on the same trigger
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn scenario_e_overlapping_fire_is_skipped_then_recovers() {
    // Each symbol takes 100s, so an epoch comfortably outlives the next fire.
    let broker = MockBroker::new().plan(
        "NSE:R",
        SymbolPlan::bars(quiet_bars()).with_delay(Duration::from_secs(100)),
    );
    let (scheduler, _store) = scheduler_with(intraday_config(&["NSE:R"]), broker);

    let first = scheduler.trigger_now("frequent").unwrap();

    // Second fire while the first epoch is still running: skipped, counted,
    // and no new epoch starts.
    let overlapped = scheduler.trigger_now("frequent");
    assert!(overlapped.is_err());
    assert_eq!(scheduler.stats().skipped_overlap, 1);

    // Once the first epoch finishes, the next fire starts normally.
    wait_until(|| scheduler.stats().epochs_completed >= 1, Duration::from_secs(600)).await;
    let third = scheduler.trigger_now("frequent").unwrap();
    assert_ne!(first, third);
    assert_eq!(scheduler.stats().skipped_overlap, 1);

    wait_until(|| scheduler.stats().epochs_completed >= 2, Duration::from_secs(600)).await;
    scheduler.stop(Duration::from_secs(30)).await;
}

#[tokio::test(start_paused = true)]
async fn different_triggers_may_run_concurrently() {
    let broker = MockBroker::new().plan(
        "NSE:R",
        SymbolPlan::bars(quiet_bars()).with_delay(Duration::from_secs(50)),
    );
    let mut cfg = intraday_config(&["NSE:R"]);
    // Give the short-term list a symbol so "regular" has work too.
    cfg.watchlists.insert(StrategyCategory::ShortTerm, vec!["NSE:R".to_string()]);
    let (scheduler, _store) = scheduler_with(cfg, broker);

    scheduler.trigger_now("frequent").unwrap();
    scheduler.trigger_now("regular").unwrap();
    assert_eq!(scheduler.stats().skipped_overlap, 0);

    wait_until(|| scheduler.stats().epochs_completed >= 2, Duration::from_secs(600)).await;
    scheduler.stop(Duration::from_secs(30)).await;
}

// ---------------------------------------------------------------------------
// Graceful shutdown
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn stop_cancels_in_flight_epochs_within_the_grace_period() {
    let broker = MockBroker::new().plan(
        "NSE:R",
        SymbolPlan::bars(quiet_bars()).with_delay(Duration::from_secs(10_000)),
    );
    let mut cfg = intraday_config(&["NSE:R"]);
    cfg.epoch_timeout_secs = 300;
    cfg.symbol_timeout_secs = 300;
    cfg.fetch_timeout_intraday_secs = 300;
    let (scheduler, _store) = scheduler_with(cfg, broker);

    scheduler.trigger_now("frequent").unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;

    // Cancellation must beat both the wedged broker call and the epoch
    // deadline.
    let started = Instant::now();
    scheduler.stop(Duration::from_secs(30)).await;
    let elapsed = started.elapsed();
    assert!(
        elapsed < Duration::from_secs(30),
        "shutdown took {elapsed:?}, in-flight work ignored the grace period"
    );
}

// ---------------------------------------------------------------------------
// Expiry sweeper
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn sweeper_expires_overdue_pending_signals() {
    let broker = MockBroker::new().plan("NSE:R", SymbolPlan::bars(quiet_bars()));
    let (scheduler, store) = scheduler_with(intraday_config(&["NSE:R"]), broker);

    // Seed a PENDING signal that expired a minute ago.
    let now = Utc::now();
    let candidate = Candidate {
        instrument: "NSE:R".to_string(),
        side: Side::Buy,
        entry: 100.0,
        stop: 98.0,
        target: 104.0,
        confidence: 0.7,
        strategy_name: "ema_crossover",
        category: StrategyCategory::DayTrading,
        produced_at: now,
    };
    let signal = Signal::from_candidate(
        &candidate,
        10.0,
        None,
        now - chrono::Duration::hours(2),
        now - chrono::Duration::minutes(1),
    );
    store.create(&signal, &CancellationToken::new()).await.unwrap();

    scheduler.start();
    wait_until(|| scheduler.stats().signals_expired >= 1, Duration::from_secs(300)).await;

    let stored = store.all();
    assert_eq!(stored.len(), 1);
    assert!(stored[0].status == argus::types::SignalStatus::Expired);

    scheduler.stop(Duration::from_secs(30)).await;
}
