// src/services/vault.rs
//! Vault: moves component state to and from a [`SnapshotStore`].
//!
//! - Loads once at start. Missing snapshot = empty state; a corrupt one the
//!   store could not recover leaves the vault degraded.
//! - A degraded vault never saves, so the corrupt file stays on disk for inspection.
//! - `flush()` is cheap when nothing changed since the last save.

use std::sync::{Arc, Mutex};

use crate::services::history::ChatHistory;
use crate::services::ledger::BalanceLedger;
use crate::services::registry::CodeRegistry;
use crate::services::reward::RewardEngine;
use crate::services::store::{PersistenceError, Snapshot, SnapshotStore};
use crate::utils::clock::Clock;
use crate::utils::fence::CommitFence;
use crate::utils::revision::Revision;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Health {
    Healthy,
    Degraded(String),
}

pub struct Vault {
    store: Box<dyn SnapshotStore>,
    ledger: Arc<BalanceLedger>,
    registry: Arc<CodeRegistry>,
    rewards: Arc<RewardEngine>,
    history: Arc<ChatHistory>,
    clock: Arc<dyn Clock>,
    revision: Revision,
    fence: CommitFence,
    /// Revision captured by the last successful save. Also serializes flushes.
    saved: Mutex<u64>,
    health: Health,
}

impl Vault {
    #[allow(clippy::too_many_arguments)]
    pub fn open(
        store: Box<dyn SnapshotStore>,
        ledger: Arc<BalanceLedger>,
        registry: Arc<CodeRegistry>,
        rewards: Arc<RewardEngine>,
        history: Arc<ChatHistory>,
        clock: Arc<dyn Clock>,
        revision: Revision,
        fence: CommitFence,
    ) -> Self {
        let health = match store.load() {
            Ok(Some(snapshot)) => {
                tracing::info!(
                    store = %store.describe(),
                    identities = snapshot.balances.len(),
                    "snapshot loaded"
                );
                ledger.restore(snapshot.balances);
                registry.restore(snapshot.redemptions);
                rewards.restore(snapshot.scores);
                history.restore(snapshot.history);
                Health::Healthy
            }
            Ok(None) => {
                tracing::info!(store = %store.describe(), "no snapshot yet; starting empty");
                Health::Healthy
            }
            Err(e) => {
                tracing::error!(store = %store.describe(), error = %e, "balances unavailable");
                Health::Degraded(e.to_string())
            }
        };
        let saved = Mutex::new(revision.current());
        Self {
            store,
            ledger,
            registry,
            rewards,
            history,
            clock,
            revision,
            fence,
            saved,
            health,
        }
    }

    pub fn health(&self) -> &Health {
        &self.health
    }

    /// Consistent cut across all components: waits out in-flight gate commits.
    pub fn capture(&self) -> Snapshot {
        let _quiet = self.fence.quiesce();
        self.capture_unfenced()
    }

    fn capture_unfenced(&self) -> Snapshot {
        Snapshot {
            saved_at_ms: self.clock.now_ms(),
            balances: self.ledger.snapshot(),
            redemptions: self.registry.snapshot(),
            scores: self.rewards.snapshot(),
            history: self.history.snapshot(),
        }
    }

    /// Save if anything changed since the last save. Returns whether a save happened.
    pub fn flush(&self) -> Result<bool, PersistenceError> {
        if let Health::Degraded(reason) = &self.health {
            tracing::warn!(%reason, "vault degraded; snapshot not saved");
            return Ok(false);
        }
        let mut saved = self.saved.lock().unwrap_or_else(|p| p.into_inner());
        if self.revision.current() == *saved {
            return Ok(false);
        }
        // read the revision inside the cut so later commits stay dirty
        let (revision, snapshot) = {
            let _quiet = self.fence.quiesce();
            (self.revision.current(), self.capture_unfenced())
        };
        self.store.save(&snapshot)?;
        *saved = revision;
        tracing::debug!(revision, store = %self.store.describe(), "snapshot saved");
        Ok(true)
    }
}
