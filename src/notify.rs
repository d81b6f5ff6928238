// =============================================================================
// Notifier — human-facing signal announcements
// =============================================================================
//
// Best-effort by contract: a notification failure is logged and counted but
// never blocks or unwinds the pipeline — the signal is already persisted by
// the time anyone is told about it. The pipeline batches per category and
// calls `notify` at most once per category per epoch.
// =============================================================================

use async_trait::async_trait;
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::types::{Signal, StrategyCategory};

/// Capability interface for the notification collaborator.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(
        &self,
        epoch_id: Uuid,
        category: StrategyCategory,
        signals: &[Signal],
    ) -> anyhow::Result<()>;
}

/// Compact per-signal payload shared by the built-in notifiers.
#[derive(Debug, Serialize)]
struct SignalSummary<'a> {
    instrument: &'a str,
    side: String,
    strategy: &'a str,
    entry: f64,
    stop: f64,
    target: f64,
    confidence: f64,
    status: String,
}

impl<'a> SignalSummary<'a> {
    fn from_signal(signal: &'a Signal) -> Self {
        Self {
            instrument: &signal.instrument,
            side: signal.side.to_string(),
            strategy: &signal.strategy_name,
            entry: signal.entry,
            stop: signal.stop,
            target: signal.target,
            confidence: signal.confidence,
            status: signal.status.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// LogNotifier
// ---------------------------------------------------------------------------

/// Emits one structured log record per batch. The default sink for the demo
/// binary and a reasonable fallback when no webhook is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(
        &self,
        epoch_id: Uuid,
        category: StrategyCategory,
        signals: &[Signal],
    ) -> anyhow::Result<()> {
        let summaries: Vec<SignalSummary<'_>> =
            signals.iter().map(SignalSummary::from_signal).collect();
        info!(
            %epoch_id,
            %category,
            count = signals.len(),
            payload = %serde_json::to_string(&summaries)?,
            "scan signals"
        );
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// WebhookNotifier
// ---------------------------------------------------------------------------

/// POSTs the batch as JSON to a configured endpoint (chat-bot bridge,
/// dashboard, pager). Errors surface to the pipeline, which logs and counts
/// them without retrying.
pub struct WebhookNotifier {
    endpoint: String,
    client: reqwest::Client,
}

impl WebhookNotifier {
    pub fn new(endpoint: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .expect("failed to build reqwest client");
        Self { endpoint: endpoint.into(), client }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(
        &self,
        epoch_id: Uuid,
        category: StrategyCategory,
        signals: &[Signal],
    ) -> anyhow::Result<()> {
        let body = serde_json::json!({
            "epoch_id": epoch_id,
            "category": category,
            "signals": signals.iter().map(SignalSummary::from_signal).collect::<Vec<_>>(),
        });

        let resp = self.client.post(&self.endpoint).json(&body).send().await?;
        let status = resp.status();
        if !status.is_success() {
            anyhow::bail!("webhook returned {status}");
        }
        Ok(())
    }
}

impl std::fmt::Debug for WebhookNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookNotifier").field("endpoint", &self.endpoint).finish()
    }
}
