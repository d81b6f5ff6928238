// =============================================================================
// Shared types used across the Argus scan engine
// =============================================================================
//
// Everything that crosses a component boundary lives here: trade side,
// strategy categories, bar intervals, strategy-emitted candidates and the
// persisted signal with its approval lifecycle.
// =============================================================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Side
// ---------------------------------------------------------------------------

/// Direction of a proposed trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buy => write!(f, "BUY"),
            Self::Sell => write!(f, "SELL"),
        }
    }
}

// ---------------------------------------------------------------------------
// Strategy categories
// ---------------------------------------------------------------------------

/// The four strategy families. Each category determines which watchlist and
/// bar interval apply when a scan runs it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StrategyCategory {
    DayTrading,
    ShortSelling,
    ShortTerm,
    LongTerm,
}

impl StrategyCategory {
    /// All categories, in a stable order.
    pub const ALL: [StrategyCategory; 4] = [
        Self::DayTrading,
        Self::ShortSelling,
        Self::ShortTerm,
        Self::LongTerm,
    ];

    /// The bar interval this category's strategies evaluate on.
    pub fn interval(&self) -> Interval {
        match self {
            Self::DayTrading | Self::ShortSelling => Interval::Min15,
            Self::ShortTerm => Interval::Hour1,
            Self::LongTerm => Interval::Day1,
        }
    }
}

impl std::fmt::Display for StrategyCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DayTrading => write!(f, "DAY_TRADING"),
            Self::ShortSelling => write!(f, "SHORT_SELLING"),
            Self::ShortTerm => write!(f, "SHORT_TERM"),
            Self::LongTerm => write!(f, "LONG_TERM"),
        }
    }
}

// ---------------------------------------------------------------------------
// Bar interval
// ---------------------------------------------------------------------------

/// Supported bar intervals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Interval {
    #[serde(rename = "15m")]
    Min15,
    #[serde(rename = "1h")]
    Hour1,
    #[serde(rename = "1d")]
    Day1,
}

impl Interval {
    /// Whether this interval is intraday (drives fetch-timeout and cache-TTL
    /// selection).
    pub fn is_intraday(&self) -> bool {
        !matches!(self, Self::Day1)
    }

    /// Duration of one bar.
    pub fn bar_duration(&self) -> chrono::Duration {
        match self {
            Self::Min15 => chrono::Duration::minutes(15),
            Self::Hour1 => chrono::Duration::hours(1),
            Self::Day1 => chrono::Duration::days(1),
        }
    }
}

impl std::fmt::Display for Interval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Min15 => write!(f, "15m"),
            Self::Hour1 => write!(f, "1h"),
            Self::Day1 => write!(f, "1d"),
        }
    }
}

// ---------------------------------------------------------------------------
// Candidate
// ---------------------------------------------------------------------------

/// A strategy-emitted trade proposal, before persistence.
#[derive(Debug, Clone, Serialize)]
pub struct Candidate {
    pub instrument: String,
    pub side: Side,
    pub entry: f64,
    pub stop: f64,
    pub target: f64,
    /// Monotone preference signal in [0, 1].
    pub confidence: f64,
    pub strategy_name: &'static str,
    pub category: StrategyCategory,
    pub produced_at: DateTime<Utc>,
}

impl Candidate {
    /// Check the side/entry/stop/target ordering invariant:
    /// BUY requires `stop < entry < target`, SELL requires
    /// `target < entry < stop`. Also rejects non-finite prices and a
    /// confidence outside [0, 1].
    pub fn is_valid(&self) -> bool {
        if !self.entry.is_finite() || !self.stop.is_finite() || !self.target.is_finite() {
            return false;
        }
        if !(0.0..=1.0).contains(&self.confidence) {
            return false;
        }
        match self.side {
            Side::Buy => self.stop < self.entry && self.entry < self.target,
            Side::Sell => self.target < self.entry && self.entry < self.stop,
        }
    }
}

// ---------------------------------------------------------------------------
// Signal lifecycle
// ---------------------------------------------------------------------------

/// Lifecycle state of a persisted signal.
///
/// Transition graph:
///   PENDING  -> APPROVED | REJECTED | EXPIRED
///   APPROVED -> EXECUTED | FAILED
/// REJECTED, EXPIRED, EXECUTED and FAILED are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalStatus {
    Pending,
    Approved,
    Rejected,
    Expired,
    Executed,
    Failed,
}

impl SignalStatus {
    /// Whether `self -> to` is a legal transition.
    pub fn can_transition_to(&self, to: SignalStatus) -> bool {
        use SignalStatus::*;
        matches!(
            (self, to),
            (Pending, Approved)
                | (Pending, Rejected)
                | (Pending, Expired)
                | (Approved, Executed)
                | (Approved, Failed)
        )
    }

    /// Terminal statuses accept no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Rejected | Self::Expired | Self::Executed | Self::Failed)
    }

    /// A signal still occupying the dedup quiet window.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Pending | Self::Approved)
    }
}

impl std::fmt::Display for SignalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "PENDING"),
            Self::Approved => write!(f, "APPROVED"),
            Self::Rejected => write!(f, "REJECTED"),
            Self::Expired => write!(f, "EXPIRED"),
            Self::Executed => write!(f, "EXECUTED"),
            Self::Failed => write!(f, "FAILED"),
        }
    }
}

/// Persisted form of an accepted candidate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub id: Uuid,
    pub instrument: String,
    pub side: Side,
    pub strategy_name: String,
    pub category: StrategyCategory,
    pub entry: f64,
    pub stop: f64,
    pub target: f64,
    pub confidence: f64,
    pub quantity: f64,
    pub status: SignalStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(default)]
    pub risk_notes: Option<String>,
}

impl Signal {
    /// Build a fresh PENDING signal from an accepted candidate.
    pub fn from_candidate(
        candidate: &Candidate,
        quantity: f64,
        risk_notes: Option<String>,
        created_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            instrument: candidate.instrument.clone(),
            side: candidate.side,
            strategy_name: candidate.strategy_name.to_string(),
            category: candidate.category,
            entry: candidate.entry,
            stop: candidate.stop,
            target: candidate.target,
            confidence: candidate.confidence,
            quantity,
            status: SignalStatus::Pending,
            created_at,
            expires_at,
            risk_notes,
        }
    }
}
