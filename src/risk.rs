// =============================================================================
// Risk policy — sizing and final veto before persistence
// =============================================================================
//
// The pipeline consults a `RiskPolicy` for every validated, deduplicated
// candidate. Acceptance yields the order quantity (and optional notes to
// persist alongside the signal); rejection drops the candidate. A policy
// error is treated as a rejection upstream — capital never moves on a risk
// engine that cannot answer.
// =============================================================================

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::types::Candidate;

/// Outcome of a risk evaluation.
#[derive(Debug, Clone, PartialEq)]
pub enum RiskDecision {
    Accept { quantity: f64, notes: Option<String> },
    Reject { reason: String },
}

/// Capability interface for the risk collaborator.
#[async_trait]
pub trait RiskPolicy: Send + Sync {
    async fn evaluate(
        &self,
        candidate: &Candidate,
        cancel: &CancellationToken,
    ) -> anyhow::Result<RiskDecision>;
}

// ---------------------------------------------------------------------------
// BasicRiskPolicy
// ---------------------------------------------------------------------------

/// Fixed-fraction position sizing with a confidence floor and a stop-width
/// sanity cap.
///
/// Quantity = (capital * risk_fraction) / per-share risk, floored to whole
/// shares.
pub struct BasicRiskPolicy {
    /// Deployable capital used for sizing.
    capital: f64,
    /// Fraction of capital risked per trade (e.g. 0.01 = 1 %).
    risk_fraction: f64,
    /// Candidates below this confidence are not worth capital.
    min_confidence: f64,
    /// Reject setups whose stop sits further than this fraction from entry.
    max_stop_distance_pct: f64,
}

impl BasicRiskPolicy {
    pub fn new(capital: f64, risk_fraction: f64, min_confidence: f64) -> Self {
        Self { capital, risk_fraction, min_confidence, max_stop_distance_pct: 0.05 }
    }
}

#[async_trait]
impl RiskPolicy for BasicRiskPolicy {
    async fn evaluate(
        &self,
        candidate: &Candidate,
        _cancel: &CancellationToken,
    ) -> anyhow::Result<RiskDecision> {
        if candidate.confidence < self.min_confidence {
            return Ok(RiskDecision::Reject {
                reason: format!(
                    "confidence {:.2} below floor {:.2}",
                    candidate.confidence, self.min_confidence
                ),
            });
        }

        let per_share_risk = (candidate.entry - candidate.stop).abs();
        if per_share_risk <= 0.0 || candidate.entry <= 0.0 {
            return Ok(RiskDecision::Reject { reason: "degenerate stop distance".to_string() });
        }

        let stop_distance_pct = per_share_risk / candidate.entry;
        if stop_distance_pct > self.max_stop_distance_pct {
            return Ok(RiskDecision::Reject {
                reason: format!(
                    "stop {:.1}% from entry exceeds {:.1}% cap",
                    stop_distance_pct * 100.0,
                    self.max_stop_distance_pct * 100.0
                ),
            });
        }

        let risk_budget = self.capital * self.risk_fraction;
        let quantity = (risk_budget / per_share_risk).floor();
        if quantity < 1.0 {
            return Ok(RiskDecision::Reject {
                reason: format!("risk budget {risk_budget:.2} buys no shares"),
            });
        }

        debug!(
            instrument = %candidate.instrument,
            strategy = candidate.strategy_name,
            quantity,
            "risk accepted"
        );

        Ok(RiskDecision::Accept {
            quantity,
            notes: Some(format!(
                "risk {:.2} @ {:.2}/share, stop {:.2}%",
                risk_budget,
                per_share_risk,
                stop_distance_pct * 100.0
            )),
        })
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Side, StrategyCategory};
    use chrono::Utc;

    fn candidate(confidence: f64, entry: f64, stop: f64) -> Candidate {
        Candidate {
            instrument: "NSE:TCS".to_string(),
            side: Side::Buy,
            entry,
            stop,
            target: entry + 2.0 * (entry - stop),
            confidence,
            strategy_name: "test",
            category: StrategyCategory::DayTrading,
            produced_at: Utc::now(),
        }
    }

    fn policy() -> BasicRiskPolicy {
        BasicRiskPolicy::new(1_000_000.0, 0.01, 0.4)
    }

    #[tokio::test]
    async fn sizes_by_risk_budget() {
        let decision = policy()
            .evaluate(&candidate(0.8, 100.0, 98.0), &CancellationToken::new())
            .await
            .unwrap();
        // Budget 10 000, per-share risk 2.0 => 5 000 shares.
        match decision {
            RiskDecision::Accept { quantity, notes } => {
                assert!((quantity - 5_000.0).abs() < 1e-9);
                assert!(notes.is_some());
            }
            other => panic!("expected accept, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn rejects_low_confidence() {
        let decision = policy()
            .evaluate(&candidate(0.2, 100.0, 98.0), &CancellationToken::new())
            .await
            .unwrap();
        assert!(matches!(decision, RiskDecision::Reject { .. }));
    }

    #[tokio::test]
    async fn rejects_wide_stop() {
        // Stop 10% away from entry exceeds the 5% cap.
        let decision = policy()
            .evaluate(&candidate(0.8, 100.0, 90.0), &CancellationToken::new())
            .await
            .unwrap();
        assert!(matches!(decision, RiskDecision::Reject { .. }));
    }

    #[tokio::test]
    async fn rejects_unaffordable_position() {
        let tiny = BasicRiskPolicy::new(10.0, 0.01, 0.0);
        let decision = tiny
            .evaluate(&candidate(0.8, 100.0, 98.0), &CancellationToken::new())
            .await
            .unwrap();
        assert!(matches!(decision, RiskDecision::Reject { .. }));
    }
}
