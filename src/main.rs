// =============================================================================
// Argus — Main Entry Point
// =============================================================================
//
// Wires the scan engine from its injected collaborators and runs it until
// ctrl-c. Without broker credentials the engine runs against the simulated
// broker, so a bare `cargo run` exercises the full scan -> signal -> notify
// path with synthetic data.
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use argus::broker::rest::RestBrokerClient;
use argus::broker::sim::SimBrokerClient;
use argus::broker::BrokerClient;
use argus::clock::SystemClock;
use argus::config::ScanConfig;
use argus::notify::{LogNotifier, Notifier, WebhookNotifier};
use argus::risk::BasicRiskPolicy;
use argus::scheduler::Scheduler;
use argus::store::MemorySignalStore;

const CONFIG_PATH: &str = "scan_config.json";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Argus scan engine starting up");

    let mut config = ScanConfig::load(CONFIG_PATH).unwrap_or_else(|e| {
        warn!(error = %e, "failed to load config, using defaults");
        ScanConfig::default()
    });

    // Override watchlists from env if provided (comma-separated symbols,
    // applied to every category).
    if let Ok(symbols) = std::env::var("ARGUS_SYMBOLS") {
        let list: Vec<String> = symbols
            .split(',')
            .map(|s| s.trim().to_uppercase())
            .filter(|s| !s.is_empty())
            .collect();
        if !list.is_empty() {
            for watchlist in config.watchlists.values_mut() {
                *watchlist = list.clone();
            }
            info!(symbols = ?list, "watchlists overridden from environment");
        }
    }

    // ── 2. Broker selection ──────────────────────────────────────────────
    let api_key = std::env::var("ARGUS_BROKER_API_KEY").unwrap_or_default();
    let api_secret = std::env::var("ARGUS_BROKER_API_SECRET").unwrap_or_default();
    let broker: Arc<dyn BrokerClient> = if api_key.is_empty() || api_secret.is_empty() {
        warn!("no broker credentials found; running against the simulated broker");
        Arc::new(SimBrokerClient::default())
    } else {
        let base_url = std::env::var("ARGUS_BROKER_URL")
            .unwrap_or_else(|_| "https://api.broker.example".to_string());
        info!(%base_url, "using REST broker");
        Arc::new(RestBrokerClient::new(base_url, api_key, api_secret))
    };

    // ── 3. Collaborators ─────────────────────────────────────────────────
    let store = Arc::new(MemorySignalStore::new());

    let capital: f64 = std::env::var("ARGUS_CAPITAL")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(1_000_000.0);
    let risk = Arc::new(BasicRiskPolicy::new(capital, 0.01, 0.3));

    let notifier: Arc<dyn Notifier> = match std::env::var("ARGUS_WEBHOOK_URL") {
        Ok(url) if !url.is_empty() => {
            info!(endpoint = %url, "webhook notifier configured");
            Arc::new(WebhookNotifier::new(url))
        }
        _ => Arc::new(LogNotifier),
    };

    // ── 4. Build & start the scheduler ───────────────────────────────────
    let grace = Duration::from_secs(config.shutdown_grace_secs);
    let scheduler = Scheduler::new(
        config,
        Arc::new(SystemClock),
        broker,
        store,
        risk,
        notifier,
    )?;
    scheduler.start();

    info!("all subsystems running; press ctrl-c to stop");

    // ── 5. Graceful shutdown ─────────────────────────────────────────────
    tokio::signal::ctrl_c().await?;
    warn!("shutdown signal received; stopping gracefully");

    scheduler.stop(grace).await;

    info!("Argus shut down complete");
    Ok(())
}
