// =============================================================================
// Signal-pipeline scenarios: dedup across epochs, auto-trade approval
// =============================================================================

mod common;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use argus::scanner::ScanEpoch;
use argus::types::{SignalStatus, StrategyCategory};

use common::{crossover_bars, harness, intraday_config, MockBroker, SymbolPlan};

fn day_trading_epoch() -> ScanEpoch {
    ScanEpoch::new("frequent", Utc::now(), vec![StrategyCategory::DayTrading])
}

// ---------------------------------------------------------------------------
// Scenario D — quiet window suppresses the repeat candidate
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn scenario_d_second_epoch_is_suppressed_by_the_quiet_window() {
    let broker = MockBroker::new().plan("NSE:R", SymbolPlan::bars(crossover_bars(10_000)));
    let h = harness(intraday_config(&["NSE:R"]), broker);

    let first = h.scanner.run(&day_trading_epoch(), &CancellationToken::new()).await;
    assert_eq!(first.candidates, 1);
    assert_eq!(first.persisted, 1);
    assert_eq!(first.dedup_suppressed, 0);
    assert_eq!(h.store.len(), 1);

    // Unchanged bars: the pure layer reproduces the identical candidate, and
    // the active PENDING signal suppresses it.
    let second = h.scanner.run(&day_trading_epoch(), &CancellationToken::new()).await;
    assert_eq!(second.candidates, 1);
    assert_eq!(second.persisted, 0);
    assert_eq!(second.dedup_suppressed, 1);
    assert_eq!(h.store.len(), 1);
}

// ---------------------------------------------------------------------------
// Scenario F — auto-trade approves only above the threshold
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn scenario_f_auto_trade_approves_high_confidence_only() {
    // NSE:R's breakout volume pushes its confidence past 0.8; NSE:T's stays
    // near 0.62.
    let broker = MockBroker::new()
        .plan("NSE:R", SymbolPlan::bars(crossover_bars(40_000)))
        .plan("NSE:T", SymbolPlan::bars(crossover_bars(10_000)));

    let mut cfg = intraday_config(&["NSE:R", "NSE:T"]);
    cfg.auto_trade = true;
    cfg.auto_threshold = 0.8;

    let h = harness(cfg, broker);
    let stats = h.scanner.run(&day_trading_epoch(), &CancellationToken::new()).await;

    assert_eq!(stats.persisted, 2);
    assert_eq!(stats.auto_approved, 1);

    let by_instrument: Vec<(String, SignalStatus)> =
        h.store.all().into_iter().map(|s| (s.instrument, s.status)).collect();
    assert!(by_instrument.contains(&("NSE:R".to_string(), SignalStatus::Approved)));
    assert!(by_instrument.contains(&("NSE:T".to_string(), SignalStatus::Pending)));
}

#[tokio::test(start_paused = true)]
async fn auto_trade_off_leaves_everything_pending() {
    let broker = MockBroker::new().plan("NSE:R", SymbolPlan::bars(crossover_bars(40_000)));
    let h = harness(intraday_config(&["NSE:R"]), broker);

    let stats = h.scanner.run(&day_trading_epoch(), &CancellationToken::new()).await;
    assert_eq!(stats.persisted, 1);
    assert_eq!(stats.auto_approved, 0);
    assert!(h.store.all().iter().all(|s| s.status == SignalStatus::Pending));
}

// ---------------------------------------------------------------------------
// Candidate plumbing
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn persisted_signal_carries_the_candidate_economics() {
    let broker = MockBroker::new().plan("NSE:R", SymbolPlan::bars(crossover_bars(10_000)));
    let h = harness(intraday_config(&["NSE:R"]), broker);

    h.scanner.run(&day_trading_epoch(), &CancellationToken::new()).await;

    let signals = h.store.all();
    assert_eq!(signals.len(), 1);
    let s = &signals[0];
    assert_eq!(s.instrument, "NSE:R");
    assert_eq!(s.strategy_name, "ema_crossover");
    assert_eq!(s.category, StrategyCategory::DayTrading);
    assert!(s.stop < s.entry && s.entry < s.target);
    assert!(s.quantity >= 1.0);
    assert!(s.expires_at > s.created_at);
    assert!(s.risk_notes.is_some());
}
