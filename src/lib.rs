// =============================================================================
// Argus — unified market-scan scheduler
// =============================================================================
//
// Periodically fetches price history per instrument (once, shared across
// strategy categories), computes indicators once, runs every registered
// strategy, persists accepted candidates as lifecycle-managed signals and
// notifies per category — all under hard per-call, per-symbol and per-epoch
// deadlines so a degraded broker can never stall the loop.
//
// The scheduler consumes five injected capabilities: `BrokerClient`,
// `SignalStore`, `Notifier`, `RiskPolicy` and `Clock`. It never imports a
// concrete implementation; wiring happens in `main` (or a test harness).
// =============================================================================

pub mod bars;
pub mod broker;
pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod indicators;
pub mod notify;
pub mod pipeline;
pub mod risk;
pub mod scanner;
pub mod scheduler;
pub mod store;
pub mod strategies;
pub mod types;

pub use bars::{Bar, BarSeries};
pub use broker::{BrokerClient, FetchWindow};
pub use cache::{SymbolData, SymbolDataCache, SymbolKey};
pub use clock::{Clock, MarketCalendar, SystemClock, TriggerSpec};
pub use config::{ScanConfig, TriggerConfig};
pub use error::{FetchError, StoreError};
pub use notify::Notifier;
pub use risk::{RiskDecision, RiskPolicy};
pub use scanner::{EpochStats, ScanEpoch};
pub use scheduler::{NextRun, Scheduler, SchedulerStats};
pub use store::SignalStore;
pub use types::{Candidate, Interval, Side, Signal, SignalStatus, StrategyCategory};
