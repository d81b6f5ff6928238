// =============================================================================
// Signal pipeline — from candidate to persisted, announced signal
// =============================================================================
//
// Per candidate: dedup against active signals in the quiet window, consult
// the risk policy, persist as PENDING (optionally auto-approving above the
// confidence threshold), then announce per category — at most one
// notification per category per epoch, and only after persistence.
//
// Failure containment: a risk error is a rejection; a persistence error
// drops the signal (logged, counted, never notified); a notifier error is
// logged and counted while the signal stays persisted.
// =============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;

use futures_util::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::notify::Notifier;
use crate::risk::{RiskDecision, RiskPolicy};
use crate::store::SignalStore;
use crate::types::{Candidate, Signal, SignalStatus, StrategyCategory};

/// Pipeline knobs, extracted from the scan config at construction.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Active signals within this window suppress equivalent candidates.
    pub quiet_window: chrono::Duration,
    /// PENDING signals expire this long after creation.
    pub signal_timeout: chrono::Duration,
    /// Auto-approve signals at or above `auto_threshold`.
    pub auto_trade: bool,
    pub auto_threshold: f64,
}

/// Counters reported back into the epoch stats.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineOutcome {
    pub persisted: u64,
    pub auto_approved: u64,
    pub dedup_suppressed: u64,
    pub risk_rejected: u64,
    pub invalid_candidates: u64,
    pub persist_failed: u64,
    pub notified: u64,
    pub notify_failed: u64,
}

pub struct SignalPipeline {
    store: Arc<dyn SignalStore>,
    risk: Arc<dyn RiskPolicy>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    cfg: PipelineConfig,
}

impl SignalPipeline {
    pub fn new(
        store: Arc<dyn SignalStore>,
        risk: Arc<dyn RiskPolicy>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
        cfg: PipelineConfig,
    ) -> Self {
        Self { store, risk, notifier, clock, cfg }
    }

    /// Run the full pipeline for one epoch's candidates.
    pub async fn process(
        &self,
        epoch_id: Uuid,
        candidates: Vec<Candidate>,
        cancel: &CancellationToken,
    ) -> PipelineOutcome {
        let mut outcome = PipelineOutcome::default();
        let mut batches: BTreeMap<StrategyCategory, Vec<Signal>> = BTreeMap::new();

        for candidate in candidates {
            if cancel.is_cancelled() {
                break;
            }
            if let Some(signal) = self.admit(epoch_id, &candidate, cancel, &mut outcome).await {
                batches.entry(signal.category).or_default().push(signal);
            }
        }

        // Announce after persistence, grouped by category, once per category.
        // Batches are independent, so they go out concurrently.
        let sends = join_all(batches.iter().map(|(category, signals)| async move {
            (*category, signals.len(), self.notifier.notify(epoch_id, *category, signals).await)
        }))
        .await;
        for (category, count, result) in sends {
            match result {
                Ok(()) => outcome.notified += count as u64,
                Err(e) => {
                    outcome.notify_failed += 1;
                    warn!(
                        %epoch_id,
                        %category,
                        error = %e,
                        "notification failed; signals remain persisted"
                    );
                }
            }
        }

        outcome
    }

    /// Dedup, risk, persist and (maybe) auto-approve a single candidate.
    /// Returns the persisted signal when it survives.
    async fn admit(
        &self,
        epoch_id: Uuid,
        candidate: &Candidate,
        cancel: &CancellationToken,
        outcome: &mut PipelineOutcome,
    ) -> Option<Signal> {
        // The registry already validated; re-check so a custom registry can
        // never push a malformed signal into the store.
        if !candidate.is_valid() {
            outcome.invalid_candidates += 1;
            warn!(
                %epoch_id,
                instrument = %candidate.instrument,
                strategy = candidate.strategy_name,
                error_kind = "validation",
                "dropping invalid candidate"
            );
            return None;
        }

        let now = self.clock.now();

        // --- 1. Dedup against active signals in the quiet window ------------
        let since = now - self.cfg.quiet_window;
        match self
            .store
            .find_active(&candidate.instrument, candidate.side, candidate.strategy_name, since, cancel)
            .await
        {
            Ok(active) if !active.is_empty() => {
                outcome.dedup_suppressed += 1;
                debug!(
                    %epoch_id,
                    instrument = %candidate.instrument,
                    strategy = candidate.strategy_name,
                    "candidate suppressed by quiet window"
                );
                return None;
            }
            Ok(_) => {}
            Err(e) => {
                outcome.persist_failed += 1;
                error!(
                    %epoch_id,
                    instrument = %candidate.instrument,
                    strategy = candidate.strategy_name,
                    error_kind = "persistence",
                    error = %e,
                    "dedup lookup failed; dropping candidate"
                );
                return None;
            }
        }

        // --- 2. Risk evaluation ---------------------------------------------
        let (quantity, risk_notes) = match self.risk.evaluate(candidate, cancel).await {
            Ok(RiskDecision::Accept { quantity, notes }) => (quantity, notes),
            Ok(RiskDecision::Reject { reason }) => {
                outcome.risk_rejected += 1;
                info!(
                    %epoch_id,
                    instrument = %candidate.instrument,
                    strategy = candidate.strategy_name,
                    reason,
                    "candidate rejected by risk policy"
                );
                return None;
            }
            Err(e) => {
                // A risk engine that cannot answer is a rejection.
                outcome.risk_rejected += 1;
                warn!(
                    %epoch_id,
                    instrument = %candidate.instrument,
                    strategy = candidate.strategy_name,
                    error_kind = "risk",
                    error = %e,
                    "risk policy errored; treating as rejection"
                );
                return None;
            }
        };

        // --- 3. Persist as PENDING ------------------------------------------
        let mut signal = Signal::from_candidate(
            candidate,
            quantity,
            risk_notes,
            now,
            now + self.cfg.signal_timeout,
        );
        if let Err(e) = self.store.create(&signal, cancel).await {
            outcome.persist_failed += 1;
            error!(
                %epoch_id,
                instrument = %candidate.instrument,
                strategy = candidate.strategy_name,
                error_kind = "persistence",
                error = %e,
                "failed to persist signal"
            );
            return None;
        }
        outcome.persisted += 1;

        // --- 4. Auto-approval ------------------------------------------------
        if self.cfg.auto_trade && signal.confidence >= self.cfg.auto_threshold {
            match self
                .store
                .set_status(signal.id, SignalStatus::Pending, SignalStatus::Approved, cancel)
                .await
            {
                Ok(true) => {
                    signal.status = SignalStatus::Approved;
                    outcome.auto_approved += 1;
                    info!(
                        %epoch_id,
                        id = %signal.id,
                        instrument = %signal.instrument,
                        confidence = signal.confidence,
                        "signal auto-approved"
                    );
                }
                Ok(false) => {
                    // Raced with a human action; leave whatever won.
                    debug!(id = %signal.id, "auto-approval lost a status race");
                }
                Err(e) => {
                    warn!(
                        %epoch_id,
                        id = %signal.id,
                        error = %e,
                        "auto-approval failed; signal stays PENDING"
                    );
                }
            }
        }

        Some(signal)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::Clock;
    use crate::notify::Notifier;
    use crate::risk::RiskPolicy;
    use crate::store::MemorySignalStore;
    use crate::types::Side;
    use async_trait::async_trait;
    use chrono::{DateTime, TimeZone, Utc};
    use parking_lot::Mutex;

    struct FixedClock(DateTime<Utc>);

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.0
        }
    }

    /// Accepts everything with a fixed quantity.
    struct AcceptAll;

    #[async_trait]
    impl RiskPolicy for AcceptAll {
        async fn evaluate(
            &self,
            _candidate: &Candidate,
            _cancel: &CancellationToken,
        ) -> anyhow::Result<RiskDecision> {
            Ok(RiskDecision::Accept { quantity: 10.0, notes: None })
        }
    }

    /// Records each notify call.
    #[derive(Default)]
    struct RecordingNotifier {
        calls: Mutex<Vec<(StrategyCategory, Vec<Signal>)>>,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn notify(
            &self,
            _epoch_id: Uuid,
            category: StrategyCategory,
            signals: &[Signal],
        ) -> anyhow::Result<()> {
            self.calls.lock().push((category, signals.to_vec()));
            Ok(())
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 2, 10, 0, 0).unwrap()
    }

    fn candidate(instrument: &str, confidence: f64) -> Candidate {
        Candidate {
            instrument: instrument.to_string(),
            side: Side::Buy,
            entry: 100.0,
            stop: 98.0,
            target: 104.0,
            confidence,
            strategy_name: "ema_crossover",
            category: StrategyCategory::DayTrading,
            produced_at: t0(),
        }
    }

    fn pipeline(
        store: Arc<MemorySignalStore>,
        notifier: Arc<RecordingNotifier>,
        auto_trade: bool,
    ) -> SignalPipeline {
        SignalPipeline::new(
            store,
            Arc::new(AcceptAll),
            notifier,
            Arc::new(FixedClock(t0())),
            PipelineConfig {
                quiet_window: chrono::Duration::hours(6),
                signal_timeout: chrono::Duration::hours(1),
                auto_trade,
                auto_threshold: 0.8,
            },
        )
    }

    #[tokio::test]
    async fn persists_and_notifies_once_per_category() {
        let store = Arc::new(MemorySignalStore::new());
        let notifier = Arc::new(RecordingNotifier::default());
        let p = pipeline(store.clone(), notifier.clone(), false);

        let outcome = p
            .process(
                Uuid::new_v4(),
                vec![candidate("NSE:TCS", 0.7), candidate("NSE:INFY", 0.6)],
                &CancellationToken::new(),
            )
            .await;

        assert_eq!(outcome.persisted, 2);
        assert_eq!(outcome.notified, 2);
        assert_eq!(store.len(), 2);
        // Both signals share a category: exactly one notify call.
        let calls = notifier.calls.lock();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].1.len(), 2);
    }

    #[tokio::test]
    async fn quiet_window_suppresses_duplicate() {
        let store = Arc::new(MemorySignalStore::new());
        let notifier = Arc::new(RecordingNotifier::default());
        let p = pipeline(store.clone(), notifier, false);

        let first = p
            .process(Uuid::new_v4(), vec![candidate("NSE:TCS", 0.7)], &CancellationToken::new())
            .await;
        assert_eq!(first.persisted, 1);

        let second = p
            .process(Uuid::new_v4(), vec![candidate("NSE:TCS", 0.7)], &CancellationToken::new())
            .await;
        assert_eq!(second.persisted, 0);
        assert_eq!(second.dedup_suppressed, 1);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn auto_trade_approves_above_threshold_only() {
        let store = Arc::new(MemorySignalStore::new());
        let notifier = Arc::new(RecordingNotifier::default());
        let p = pipeline(store.clone(), notifier.clone(), true);

        let outcome = p
            .process(
                Uuid::new_v4(),
                vec![candidate("NSE:TCS", 0.9), candidate("NSE:INFY", 0.7)],
                &CancellationToken::new(),
            )
            .await;

        assert_eq!(outcome.persisted, 2);
        assert_eq!(outcome.auto_approved, 1);

        let statuses: Vec<_> = store.all().into_iter().map(|s| (s.instrument, s.status)).collect();
        assert!(statuses.contains(&("NSE:TCS".to_string(), SignalStatus::Approved)));
        assert!(statuses.contains(&("NSE:INFY".to_string(), SignalStatus::Pending)));

        // The notification payload carries the post-approval status.
        let calls = notifier.calls.lock();
        let notified: Vec<_> =
            calls[0].1.iter().map(|s| (s.instrument.clone(), s.status)).collect();
        assert!(notified.contains(&("NSE:TCS".to_string(), SignalStatus::Approved)));
    }

    #[tokio::test]
    async fn invalid_candidate_is_dropped() {
        let store = Arc::new(MemorySignalStore::new());
        let notifier = Arc::new(RecordingNotifier::default());
        let p = pipeline(store.clone(), notifier, false);

        let mut bad = candidate("NSE:TCS", 0.7);
        bad.stop = 101.0;
        let outcome =
            p.process(Uuid::new_v4(), vec![bad], &CancellationToken::new()).await;
        assert_eq!(outcome.invalid_candidates, 1);
        assert_eq!(outcome.persisted, 0);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn risk_rejection_skips_persistence() {
        struct RejectAll;

        #[async_trait]
        impl RiskPolicy for RejectAll {
            async fn evaluate(
                &self,
                _candidate: &Candidate,
                _cancel: &CancellationToken,
            ) -> anyhow::Result<RiskDecision> {
                Ok(RiskDecision::Reject { reason: "no capital".to_string() })
            }
        }

        let store = Arc::new(MemorySignalStore::new());
        let p = SignalPipeline::new(
            store.clone(),
            Arc::new(RejectAll),
            Arc::new(RecordingNotifier::default()),
            Arc::new(FixedClock(t0())),
            PipelineConfig {
                quiet_window: chrono::Duration::hours(6),
                signal_timeout: chrono::Duration::hours(1),
                auto_trade: false,
                auto_threshold: 0.8,
            },
        );

        let outcome = p
            .process(Uuid::new_v4(), vec![candidate("NSE:TCS", 0.7)], &CancellationToken::new())
            .await;
        assert_eq!(outcome.risk_rejected, 1);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn notifier_failure_keeps_signal_persisted() {
        struct FailingNotifier;

        #[async_trait]
        impl Notifier for FailingNotifier {
            async fn notify(
                &self,
                _epoch_id: Uuid,
                _category: StrategyCategory,
                _signals: &[Signal],
            ) -> anyhow::Result<()> {
                anyhow::bail!("webhook down")
            }
        }

        let store = Arc::new(MemorySignalStore::new());
        let p = SignalPipeline::new(
            store.clone(),
            Arc::new(AcceptAll),
            Arc::new(FailingNotifier),
            Arc::new(FixedClock(t0())),
            PipelineConfig {
                quiet_window: chrono::Duration::hours(6),
                signal_timeout: chrono::Duration::hours(1),
                auto_trade: false,
                auto_threshold: 0.8,
            },
        );

        let outcome = p
            .process(Uuid::new_v4(), vec![candidate("NSE:TCS", 0.7)], &CancellationToken::new())
            .await;
        assert_eq!(outcome.persisted, 1);
        assert_eq!(outcome.notify_failed, 1);
        assert_eq!(outcome.notified, 0);
        assert_eq!(store.len(), 1);
    }
}
