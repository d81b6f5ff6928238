// =============================================================================
// Signal store — persisted signals and their lifecycle
// =============================================================================
//
// The engine issues one logical insert per signal and mutates status only
// through compare-and-set, so every transition is serialized by the store
// and the state machine can never be bypassed. The in-memory implementation
// backs the demo binary and the test suite; a database-backed store slots in
// behind the same trait.
// =============================================================================

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::StoreError;
use crate::types::{Side, Signal, SignalStatus};

/// Capability interface for signal persistence.
#[async_trait]
pub trait SignalStore: Send + Sync {
    /// Insert a new signal; returns its id.
    async fn create(&self, signal: &Signal, cancel: &CancellationToken)
        -> Result<Uuid, StoreError>;

    /// Signals for (instrument, side, strategy) still active (PENDING or
    /// APPROVED) and created at or after `since`.
    async fn find_active(
        &self,
        instrument: &str,
        side: Side,
        strategy: &str,
        since: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<Vec<Signal>, StoreError>;

    /// Transition every PENDING signal whose expiry has passed to EXPIRED;
    /// returns how many moved.
    async fn expire_overdue(
        &self,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<u64, StoreError>;

    /// Compare-and-set status transition. Returns `true` when the signal was
    /// in `from` and the transition is legal; `false` otherwise (no change).
    async fn set_status(
        &self,
        id: Uuid,
        from: SignalStatus,
        to: SignalStatus,
        cancel: &CancellationToken,
    ) -> Result<bool, StoreError>;

    /// Fetch one signal by id.
    async fn get(&self, id: Uuid, cancel: &CancellationToken) -> Result<Signal, StoreError>;
}

// ---------------------------------------------------------------------------
// In-memory implementation
// ---------------------------------------------------------------------------

/// Map-backed store. All mutation happens under one write lock, which is the
/// transactionality the trait contract asks of a real database.
#[derive(Default)]
pub struct MemorySignalStore {
    rows: RwLock<HashMap<Uuid, Signal>>,
}

impl MemorySignalStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored signals (any status).
    pub fn len(&self) -> usize {
        self.rows.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of every stored signal, unordered.
    pub fn all(&self) -> Vec<Signal> {
        self.rows.read().values().cloned().collect()
    }
}

#[async_trait]
impl SignalStore for MemorySignalStore {
    async fn create(
        &self,
        signal: &Signal,
        cancel: &CancellationToken,
    ) -> Result<Uuid, StoreError> {
        if cancel.is_cancelled() {
            return Err(StoreError::Cancelled);
        }
        self.rows.write().insert(signal.id, signal.clone());
        debug!(id = %signal.id, instrument = %signal.instrument, "signal persisted");
        Ok(signal.id)
    }

    async fn find_active(
        &self,
        instrument: &str,
        side: Side,
        strategy: &str,
        since: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<Vec<Signal>, StoreError> {
        if cancel.is_cancelled() {
            return Err(StoreError::Cancelled);
        }
        Ok(self
            .rows
            .read()
            .values()
            .filter(|s| {
                s.status.is_active()
                    && s.instrument == instrument
                    && s.side == side
                    && s.strategy_name == strategy
                    && s.created_at >= since
            })
            .cloned()
            .collect())
    }

    async fn expire_overdue(
        &self,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<u64, StoreError> {
        if cancel.is_cancelled() {
            return Err(StoreError::Cancelled);
        }
        let mut rows = self.rows.write();
        let mut moved = 0;
        for signal in rows.values_mut() {
            if signal.status == SignalStatus::Pending && now >= signal.expires_at {
                signal.status = SignalStatus::Expired;
                moved += 1;
            }
        }
        if moved > 0 {
            info!(count = moved, "expired overdue signals");
        }
        Ok(moved)
    }

    async fn set_status(
        &self,
        id: Uuid,
        from: SignalStatus,
        to: SignalStatus,
        cancel: &CancellationToken,
    ) -> Result<bool, StoreError> {
        if cancel.is_cancelled() {
            return Err(StoreError::Cancelled);
        }
        if !from.can_transition_to(to) {
            warn!(%id, %from, %to, "refusing illegal status transition");
            return Ok(false);
        }
        let mut rows = self.rows.write();
        match rows.get_mut(&id) {
            Some(signal) if signal.status == from => {
                signal.status = to;
                debug!(%id, %from, %to, "signal status updated");
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(StoreError::NotFound(id)),
        }
    }

    async fn get(&self, id: Uuid, cancel: &CancellationToken) -> Result<Signal, StoreError> {
        if cancel.is_cancelled() {
            return Err(StoreError::Cancelled);
        }
        self.rows.read().get(&id).cloned().ok_or(StoreError::NotFound(id))
    }
}
