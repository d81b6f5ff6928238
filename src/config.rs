// =============================================================================
// Scan configuration — every engine knob with an atomic save
// =============================================================================
//
// Central configuration for the Argus scan engine. Persistence uses an
// atomic tmp + rename pattern to prevent corruption on crash. All fields
// carry serde defaults so adding new fields never breaks loading an older
// config file.
//
// `validate()` enforces the startup invariants; a violation is fatal and
// aborts before any trigger fires.
// =============================================================================

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::clock::{MarketCalendar, TriggerSpec};
use crate::fetcher::FetchPolicy;
use crate::strategies::StrategyParams;
use crate::types::{Interval, StrategyCategory};

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_parallelism() -> usize {
    5
}

fn default_epoch_timeout_secs() -> u64 {
    300
}

fn default_symbol_timeout_secs() -> u64 {
    60
}

fn default_fetch_timeout_intraday_secs() -> u64 {
    30
}

fn default_fetch_timeout_history_secs() -> u64 {
    60
}

fn default_cache_ttl_intraday_secs() -> u64 {
    30 * 60
}

fn default_cache_ttl_daily_secs() -> u64 {
    24 * 60 * 60
}

fn default_cache_capacity() -> usize {
    2_048
}

fn default_signal_timeout_secs() -> u64 {
    60 * 60
}

fn default_quiet_window_secs() -> u64 {
    6 * 60 * 60
}

fn default_auto_threshold() -> f64 {
    0.8
}

fn default_unauthorized_cooldown_secs() -> u64 {
    5 * 60
}

fn default_shutdown_grace_secs() -> u64 {
    30
}

fn default_sweep_interval_secs() -> u64 {
    60
}

fn default_timezone() -> String {
    "Asia/Kolkata".to_string()
}

fn default_session_open() -> NaiveTime {
    NaiveTime::from_hms_opt(9, 15, 0).unwrap()
}

fn default_session_close() -> NaiveTime {
    NaiveTime::from_hms_opt(15, 30, 0).unwrap()
}

fn default_triggers() -> Vec<TriggerConfig> {
    use StrategyCategory::*;
    vec![
        TriggerConfig {
            name: "frequent".to_string(),
            spec: TriggerSpec::Every { minutes: 5 },
            categories: vec![DayTrading, ShortSelling],
        },
        TriggerConfig {
            name: "regular".to_string(),
            spec: TriggerSpec::Every { minutes: 120 },
            categories: vec![ShortTerm],
        },
        TriggerConfig {
            name: "comprehensive".to_string(),
            spec: TriggerSpec::DailyAt {
                times: vec![
                    NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
                    NaiveTime::from_hms_opt(14, 0, 0).unwrap(),
                ],
            },
            categories: vec![DayTrading, ShortSelling, ShortTerm, LongTerm],
        },
        TriggerConfig {
            name: "daily".to_string(),
            spec: TriggerSpec::AfterClose { minutes: 30 },
            categories: vec![LongTerm],
        },
    ]
}

fn default_watchlists() -> BTreeMap<StrategyCategory, Vec<String>> {
    use StrategyCategory::*;
    let liquid = ["NSE:RELIANCE", "NSE:HDFCBANK", "NSE:ICICIBANK", "NSE:INFY", "NSE:TCS"];
    let broad = [
        "NSE:RELIANCE",
        "NSE:HDFCBANK",
        "NSE:ICICIBANK",
        "NSE:INFY",
        "NSE:TCS",
        "NSE:SBIN",
        "NSE:LT",
        "NSE:ITC",
    ];
    let mut map = BTreeMap::new();
    map.insert(DayTrading, liquid.iter().map(|s| s.to_string()).collect());
    map.insert(ShortSelling, liquid.iter().map(|s| s.to_string()).collect());
    map.insert(ShortTerm, broad.iter().map(|s| s.to_string()).collect());
    map.insert(LongTerm, broad.iter().map(|s| s.to_string()).collect());
    map
}

// =============================================================================
// TriggerConfig
// =============================================================================

/// One named schedule: when it fires and which categories it scans.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerConfig {
    pub name: String,
    pub spec: TriggerSpec,
    pub categories: Vec<StrategyCategory>,
}

// =============================================================================
// ScanConfig
// =============================================================================

/// Top-level configuration for the scan engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    // --- Concurrency & deadlines --------------------------------------------

    /// Max concurrent symbol tasks per epoch.
    #[serde(default = "default_parallelism")]
    pub parallelism: usize,

    /// Hard deadline for one scan epoch.
    #[serde(default = "default_epoch_timeout_secs")]
    pub epoch_timeout_secs: u64,

    /// Hard deadline for one symbol task (clamped to the epoch deadline).
    #[serde(default = "default_symbol_timeout_secs")]
    pub symbol_timeout_secs: u64,

    /// Broker RPC cap for intraday history.
    #[serde(default = "default_fetch_timeout_intraday_secs")]
    pub fetch_timeout_intraday_secs: u64,

    /// Broker RPC cap for long (daily) history.
    #[serde(default = "default_fetch_timeout_history_secs")]
    pub fetch_timeout_history_secs: u64,

    // --- Cache ---------------------------------------------------------------

    /// Freshness window for intraday symbol data.
    #[serde(default = "default_cache_ttl_intraday_secs")]
    pub cache_ttl_intraday_secs: u64,

    /// Freshness window for daily symbol data.
    #[serde(default = "default_cache_ttl_daily_secs")]
    pub cache_ttl_daily_secs: u64,

    /// Max cached (instrument, interval) entries.
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,

    // --- Signals -------------------------------------------------------------

    /// PENDING signals expire this long after creation.
    #[serde(default = "default_signal_timeout_secs")]
    pub signal_timeout_secs: u64,

    /// Window in which an active signal suppresses equivalent candidates.
    #[serde(default = "default_quiet_window_secs")]
    pub quiet_window_secs: u64,

    /// Auto-approve high-confidence signals.
    #[serde(default)]
    pub auto_trade: bool,

    /// Confidence required for auto-approval.
    #[serde(default = "default_auto_threshold")]
    pub auto_threshold: f64,

    // --- Operational ---------------------------------------------------------

    /// Fetch pause after the broker rejects credentials.
    #[serde(default = "default_unauthorized_cooldown_secs")]
    pub unauthorized_cooldown_secs: u64,

    /// How long `stop` waits for in-flight epochs before forcing exit.
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,

    /// Cadence of the expiry / stale-cache sweeper.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    // --- Exchange session ----------------------------------------------------

    /// Exchange civil timezone for trigger interpretation.
    #[serde(default = "default_timezone")]
    pub timezone: String,

    #[serde(default = "default_session_open")]
    pub session_open: NaiveTime,

    #[serde(default = "default_session_close")]
    pub session_close: NaiveTime,

    // --- Schedules & universe ------------------------------------------------

    #[serde(default = "default_triggers")]
    pub triggers: Vec<TriggerConfig>,

    /// Instruments scanned per category.
    #[serde(default = "default_watchlists")]
    pub watchlists: BTreeMap<StrategyCategory, Vec<String>>,

    /// Tunable strategy thresholds.
    #[serde(default)]
    pub strategy_params: StrategyParams,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            parallelism: default_parallelism(),
            epoch_timeout_secs: default_epoch_timeout_secs(),
            symbol_timeout_secs: default_symbol_timeout_secs(),
            fetch_timeout_intraday_secs: default_fetch_timeout_intraday_secs(),
            fetch_timeout_history_secs: default_fetch_timeout_history_secs(),
            cache_ttl_intraday_secs: default_cache_ttl_intraday_secs(),
            cache_ttl_daily_secs: default_cache_ttl_daily_secs(),
            cache_capacity: default_cache_capacity(),
            signal_timeout_secs: default_signal_timeout_secs(),
            quiet_window_secs: default_quiet_window_secs(),
            auto_trade: false,
            auto_threshold: default_auto_threshold(),
            unauthorized_cooldown_secs: default_unauthorized_cooldown_secs(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            timezone: default_timezone(),
            session_open: default_session_open(),
            session_close: default_session_close(),
            triggers: default_triggers(),
            watchlists: default_watchlists(),
            strategy_params: StrategyParams::default(),
        }
    }
}

impl ScanConfig {
    /// Load configuration from a JSON file at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read scan config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse scan config from {}", path.display()))?;

        info!(
            path = %path.display(),
            triggers = config.triggers.len(),
            parallelism = config.parallelism,
            "scan config loaded"
        );

        Ok(config)
    }

    /// Persist the current configuration to `path` using an atomic write
    /// (write to `.tmp`, then rename).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content = serde_json::to_string_pretty(self)
            .context("failed to serialise scan config to JSON")?;

        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "scan config saved (atomic)");
        Ok(())
    }

    /// Enforce startup invariants. Any violation here is fatal.
    pub fn validate(&self) -> Result<()> {
        if self.parallelism == 0 {
            bail!("parallelism must be at least 1");
        }
        if self.epoch_timeout_secs == 0 || self.symbol_timeout_secs == 0 {
            bail!("epoch and symbol timeouts must be non-zero");
        }
        if self.symbol_timeout_secs > self.epoch_timeout_secs {
            bail!(
                "symbol timeout ({}s) must not exceed the epoch timeout ({}s)",
                self.symbol_timeout_secs,
                self.epoch_timeout_secs
            );
        }
        if self.cache_capacity == 0 {
            bail!("cache capacity must be at least 1");
        }
        if !(0.0..=1.0).contains(&self.auto_threshold) {
            bail!("auto_threshold must lie in [0, 1], got {}", self.auto_threshold);
        }
        if self.session_open >= self.session_close {
            bail!("session_open must precede session_close");
        }
        self.timezone
            .parse::<chrono_tz::Tz>()
            .map_err(|e| anyhow::anyhow!("unknown timezone '{}': {e}", self.timezone))?;

        if self.triggers.is_empty() {
            bail!("at least one trigger must be configured");
        }
        let mut seen = std::collections::BTreeSet::new();
        for trigger in &self.triggers {
            if trigger.name.is_empty() {
                bail!("trigger names must be non-empty");
            }
            if !seen.insert(&trigger.name) {
                bail!("duplicate trigger name '{}'", trigger.name);
            }
            if trigger.categories.is_empty() {
                bail!("trigger '{}' scans no categories", trigger.name);
            }
            if let TriggerSpec::Every { minutes: 0 } = trigger.spec {
                bail!("trigger '{}' has a zero-minute cadence", trigger.name);
            }
            if let TriggerSpec::DailyAt { times } = &trigger.spec {
                if times.is_empty() {
                    bail!("trigger '{}' lists no fire times", trigger.name);
                }
            }
        }
        Ok(())
    }

    // --- Derived views -------------------------------------------------------

    pub fn calendar(&self) -> Result<MarketCalendar> {
        let tz = self
            .timezone
            .parse::<chrono_tz::Tz>()
            .map_err(|e| anyhow::anyhow!("unknown timezone '{}': {e}", self.timezone))?;
        Ok(MarketCalendar::new(tz, self.session_open, self.session_close))
    }

    pub fn epoch_timeout(&self) -> Duration {
        Duration::from_secs(self.epoch_timeout_secs)
    }

    pub fn symbol_timeout(&self) -> Duration {
        Duration::from_secs(self.symbol_timeout_secs.min(self.epoch_timeout_secs))
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }

    pub fn signal_timeout(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.signal_timeout_secs as i64)
    }

    pub fn quiet_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.quiet_window_secs as i64)
    }

    pub fn unauthorized_cooldown(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.unauthorized_cooldown_secs as i64)
    }

    /// Symbol-data freshness window for an interval.
    pub fn cache_ttl(&self, interval: Interval) -> chrono::Duration {
        let secs = if interval.is_intraday() {
            self.cache_ttl_intraday_secs
        } else {
            self.cache_ttl_daily_secs
        };
        chrono::Duration::seconds(secs as i64)
    }

    pub fn fetch_policy(&self) -> FetchPolicy {
        FetchPolicy {
            intraday_cap: Duration::from_secs(self.fetch_timeout_intraday_secs),
            history_cap: Duration::from_secs(self.fetch_timeout_history_secs),
            ..FetchPolicy::default()
        }
    }

    pub fn watchlist(&self, category: StrategyCategory) -> &[String] {
        self.watchlists.get(&category).map(Vec::as_slice).unwrap_or(&[])
    }
}
