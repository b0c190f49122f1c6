// src/services/mod.rs

use std::sync::Arc;

pub mod gate;         // the only place that checks and spends
pub mod history;
pub mod ledger;       // per-identity balances
pub mod maintenance;  // background cleanup + periodic flush
pub mod provider;
pub mod registry;     // static code table + redemptions
pub mod reward;
pub mod store;        // snapshot backends
pub mod vault;

// Public API
pub use gate::{Activation, ChatError, ChatOutcome, Denied, ScoreOutcome, UsageGate};
pub use history::{ChatEntry, ChatHistory};
pub use ledger::{Balance, BalanceLedger, LedgerError};
pub use maintenance::{Maintenance, MaintenanceHandle, MaintenanceReport};
pub use provider::{ChatProvider, OpenAiProvider, ProviderError};
pub use registry::{CodeDefinition, CodeRegistry, RegistryError};
pub use reward::{RewardEngine, RewardOutcome, RewardRules, RewardTier, ScoreState};
pub use store::{JsonFileStore, MemoryStore, PersistenceError, Snapshot, SnapshotStore, SqliteStore};
pub use vault::{Health, Vault};

use crate::config::CoreConfig;
use crate::utils::clock::Clock;
use crate::utils::fence::CommitFence;
use crate::utils::logbook::Logbook;
use crate::utils::revision::Revision;

/// Every stateful component and the vault that persists them.
pub struct Services {
    pub ledger: Arc<BalanceLedger>,
    pub registry: Arc<CodeRegistry>,
    pub rewards: Arc<RewardEngine>,
    pub history: Arc<ChatHistory>,
    pub gate: UsageGate,
    pub vault: Vault,
    pub logbook: Logbook,
    pub clock: Arc<dyn Clock>,
}

impl Services {
    /// Build the components, load the snapshot into them and put the gate in
    /// degraded mode if the snapshot could not be recovered.
    pub fn assemble(
        config: &CoreConfig,
        store: Box<dyn SnapshotStore>,
        clock: Arc<dyn Clock>,
        logbook: Logbook,
    ) -> Self {
        let revision = Revision::new();
        let fence = CommitFence::new();
        let ledger = Arc::new(BalanceLedger::new(clock.clone(), revision.clone()));
        let registry = Arc::new(CodeRegistry::new(config.codes.clone(), revision.clone()));
        let rewards = Arc::new(RewardEngine::new(
            config.reward_rules(),
            clock.clone(),
            revision.clone(),
        ));
        let history = Arc::new(ChatHistory::new(
            config.maintenance.history_max_entries,
            revision.clone(),
        ));
        let vault = Vault::open(
            store,
            ledger.clone(),
            registry.clone(),
            rewards.clone(),
            history.clone(),
            clock.clone(),
            revision,
            fence.clone(),
        );
        let mut gate = UsageGate::new(
            ledger.clone(),
            registry.clone(),
            rewards.clone(),
            history.clone(),
            clock.clone(),
            fence,
        );
        if let Health::Degraded(reason) = vault.health() {
            gate.mark_unavailable(reason.clone());
        }
        Self {
            ledger,
            registry,
            rewards,
            history,
            gate,
            vault,
            logbook,
            clock,
        }
    }
}
