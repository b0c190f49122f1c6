// src/commands/api.rs
use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use crate::commands::init::ensure_initialized_once;
use crate::config::{CoreConfig, StorageBackend};
use crate::services::{
    Balance, ChatEntry, ChatError, ChatProvider, CodeDefinition, Denied, Health, JsonFileStore,
    Maintenance, MaintenanceHandle, MaintenanceReport, MemoryStore, OpenAiProvider, Services,
    SnapshotStore, SqliteStore,
};
use crate::services::reward::UnlockedTier;
use crate::types::Uses;
use crate::utils::clock::{Clock, SystemClock};
use crate::utils::logbook::Logbook;

#[derive(Debug, Clone, Serialize)]
pub struct AccessReport {
    pub identity: String,
    pub code: String,
    pub tier: String,
    pub uses_left: Uses,
    pub description: String,
    pub newly_redeemed: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatReport {
    pub response: String,
    pub uses_left: Uses,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tier: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub identity: String,
    pub uses_left: Uses,
    pub time_to_reset_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tier: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub cumulative_score: u64,
    pub unlocked_tiers: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScoreReport {
    pub identity: String,
    pub newly_unlocked: Vec<UnlockedTier>,
    pub combo_multiplier: f64,
    pub cumulative_score: u64,
    pub daily_cap_reached: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uses_left: Option<Uses>,
}

/// Entry point for a boundary layer (HTTP handlers, the admin CLI).
///
/// Every mutating command flushes the vault before returning; a failed save
/// is logged and never turns into a request failure.
pub struct Commands {
    services: Arc<Services>,
    provider: Option<Box<dyn ChatProvider>>,
    config: CoreConfig,
}

impl Commands {
    /// Initialize the chatpass root (or reuse it), open the configured store and
    /// the OpenAI provider. A missing API key leaves chat disabled, not the whole core.
    pub fn new() -> Result<Self> {
        let report = ensure_initialized_once()?;
        let config = report.config.clone();
        let provider: Option<Box<dyn ChatProvider>> =
            match OpenAiProvider::from_config(&config.provider) {
                Ok(p) => Some(Box::new(p)),
                Err(e) => {
                    tracing::warn!(error = %e, "chat provider not configured; chat disabled");
                    None
                }
            };
        Self::open(config, provider, Arc::new(SystemClock))
    }

    /// Open the store and logbook named by `config`.
    pub fn open(
        config: CoreConfig,
        provider: Option<Box<dyn ChatProvider>>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let store = open_store(&config)?;
        let logbook = if config.logbook.enabled {
            Logbook::open(config.logbook.path.clone())
        } else {
            Logbook::disabled()
        };
        Ok(Self::with_parts(config, store, provider, clock, logbook))
    }

    pub fn with_parts(
        config: CoreConfig,
        store: Box<dyn SnapshotStore>,
        provider: Option<Box<dyn ChatProvider>>,
        clock: Arc<dyn Clock>,
        logbook: Logbook,
    ) -> Self {
        let services = Arc::new(Services::assemble(&config, store, clock, logbook));
        Self {
            services,
            provider,
            config,
        }
    }

    pub fn services(&self) -> &Arc<Services> {
        &self.services
    }

    pub fn health(&self) -> &Health {
        self.services.vault.health()
    }

    pub fn codes(&self) -> Vec<CodeDefinition> {
        self.services.registry.definitions()
    }

    /// Redeem `code` for `identity` (idempotent for the code already backing
    /// its balance) without spending a use.
    pub fn verify_access(&self, identity: &str, code: &str) -> Result<AccessReport, Denied> {
        let s = &self.services;
        let activation = s.gate.activate(identity, code).inspect_err(|d| self.log_denied(identity, d))?;
        if activation.newly_redeemed {
            s.logbook.record(
                "code_redeemed",
                identity,
                json!({ "code": code, "tier": activation.definition.tier, "uses_left": activation.balance.remaining }),
            );
            self.flush_quietly();
        }
        Ok(AccessReport {
            identity: identity.to_string(),
            code: code.to_string(),
            tier: activation.definition.tier,
            uses_left: activation.balance.remaining,
            description: activation.definition.description,
            newly_redeemed: activation.newly_redeemed,
        })
    }

    /// Spend one use and relay `message` to the chat provider.
    pub fn chat(&self, identity: &str, code: Option<&str>, message: &str) -> Result<ChatReport, ChatError> {
        let s = &self.services;
        let Some(provider) = self.provider.as_deref() else {
            return Err(ChatError::NoProvider);
        };
        let result = s.gate.chat(identity, code, message, provider);
        let report = match result {
            Ok(outcome) => {
                s.logbook.record(
                    "use_consumed",
                    identity,
                    json!({ "uses_left": outcome.balance.remaining }),
                );
                Ok(ChatReport {
                    tier: self.tier_of(&outcome.balance),
                    response: outcome.response,
                    uses_left: outcome.balance.remaining,
                })
            }
            Err(ChatError::Denied(d)) => {
                self.log_denied(identity, &d);
                Err(ChatError::Denied(d))
            }
            Err(ChatError::Provider { error, balance }) => {
                s.logbook.record(
                    "chat_failed",
                    identity,
                    json!({ "error": error.to_string(), "uses_left": balance.remaining }),
                );
                Err(ChatError::Provider { error, balance })
            }
            Err(other) => Err(other),
        };
        self.flush_quietly();
        report
    }

    /// Balance view for `identity`; `None` if it never held a balance.
    pub fn check_status(&self, identity: &str) -> Option<StatusReport> {
        let s = &self.services;
        let balance = s.gate.balance(identity)?;
        let definition = balance
            .source_code
            .as_deref()
            .and_then(|c| s.registry.lookup(c).ok());
        let score = s.rewards.score_state(identity).unwrap_or_default();
        Some(StatusReport {
            identity: identity.to_string(),
            uses_left: balance.remaining,
            time_to_reset_ms: balance.time_to_reset_ms(s.clock.now_ms()),
            tier: definition.map(|d| d.tier.clone()),
            description: definition.map(|d| d.description.clone()),
            cumulative_score: score.cumulative_score,
            unlocked_tiers: score.unlocked_tiers.into_iter().collect(),
        })
    }

    /// Add a game score and grant whatever reward tiers it unlocks.
    pub fn submit_score(&self, identity: &str, score: u64) -> Result<ScoreReport, Denied> {
        let s = &self.services;
        let outcome = s.gate.submit_score(identity, score).inspect_err(|d| self.log_denied(identity, d))?;
        for tier in &outcome.reward.newly_unlocked {
            s.logbook.record(
                "tier_unlocked",
                identity,
                json!({ "tier": tier.label, "grant": tier.grant, "combo_multiplier": outcome.reward.combo_multiplier }),
            );
        }
        self.flush_quietly();
        Ok(ScoreReport {
            identity: identity.to_string(),
            newly_unlocked: outcome.reward.newly_unlocked,
            combo_multiplier: outcome.reward.combo_multiplier,
            cumulative_score: outcome.reward.cumulative_score,
            daily_cap_reached: outcome.reward.daily_cap_reached,
            uses_left: outcome.balance.map(|b| b.remaining),
        })
    }

    /// Newest last.
    pub fn history(&self, identity: &str, limit: usize) -> Vec<ChatEntry> {
        self.services.history.recent(identity, limit)
    }

    pub fn flush(&self) -> Result<bool> {
        self.services.vault.flush().context("saving snapshot")
    }

    pub fn run_maintenance(&self) -> MaintenanceReport {
        Maintenance::new(self.services.clone(), self.config.maintenance.clone()).run_once()
    }

    pub fn spawn_maintenance(&self) -> MaintenanceHandle {
        let interval = Duration::from_secs(self.config.maintenance.interval_secs.max(1));
        Maintenance::new(self.services.clone(), self.config.maintenance.clone()).spawn(interval)
    }

    fn tier_of(&self, balance: &Balance) -> Option<String> {
        balance
            .source_code
            .as_deref()
            .and_then(|c| self.services.registry.lookup(c).ok())
            .map(|d| d.tier.clone())
    }

    fn log_denied(&self, identity: &str, denied: &Denied) {
        tracing::warn!(identity, reason = denied.reason(), "access denied");
        self.services.logbook.record(
            "access_denied",
            identity,
            json!({ "reason": denied.reason(), "detail": denied.to_string() }),
        );
    }

    fn flush_quietly(&self) {
        if let Err(e) = self.services.vault.flush() {
            tracing::warn!(error = %e, "snapshot save failed; will retry on next flush");
        }
    }
}

fn open_store(config: &CoreConfig) -> Result<Box<dyn SnapshotStore>> {
    let storage = &config.storage;
    Ok(match storage.backend {
        StorageBackend::Json => Box::new(JsonFileStore::new(
            storage.snapshot_path.clone(),
            storage.backup_dir.clone(),
            storage.keep_backups,
        )),
        StorageBackend::Sqlite => Box::new(
            SqliteStore::open(storage.sqlite_path.clone(), storage.keep_backups)
                .with_context(|| format!("opening {}", storage.sqlite_path.display()))?,
        ),
        StorageBackend::Memory => Box::new(MemoryStore::new()),
    })
}
