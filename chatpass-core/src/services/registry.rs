// src/services/registry.rs
//! CodeRegistry: the static code table plus the record of who redeemed what.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use thiserror::Error;

use crate::types::{Grant, ResetPolicy, Uses};
use crate::utils::revision::Revision;

/// One redeemable access code, as written in `[[codes]]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeDefinition {
    pub code: String,
    pub grant: Uses,
    pub tier: String,
    #[serde(default)]
    pub cooldown_ms: Option<u64>,
    #[serde(default)]
    pub description: String,
}

impl CodeDefinition {
    /// The ledger grant this code issues. Finite codes with a cooldown
    /// refill back to their grant once the cooldown elapses.
    pub fn to_grant(&self) -> Grant {
        let reset = match (self.grant, self.cooldown_ms) {
            (Uses::Limited(nominal), Some(cooldown_ms)) => Some(ResetPolicy {
                nominal,
                cooldown_ms,
            }),
            _ => None,
        };
        Grant {
            amount: self.grant,
            source_code: Some(self.code.clone()),
            reset,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("unknown access code {0:?}")]
    NotFound(String),
    #[error("access code {0:?} already redeemed by this identity")]
    AlreadyRedeemed(String),
}

pub struct CodeRegistry {
    definitions: HashMap<String, CodeDefinition>,
    /// identity -> codes it has redeemed
    redemptions: DashMap<String, BTreeSet<String>>,
    revision: Revision,
}

impl CodeRegistry {
    pub fn new(definitions: Vec<CodeDefinition>, revision: Revision) -> Self {
        Self {
            definitions: definitions
                .into_iter()
                .map(|d| (d.code.clone(), d))
                .collect(),
            redemptions: DashMap::new(),
            revision,
        }
    }

    pub fn lookup(&self, code: &str) -> Result<&CodeDefinition, RegistryError> {
        self.definitions
            .get(code)
            .ok_or_else(|| RegistryError::NotFound(code.to_string()))
    }

    /// Record `(identity, code)` and hand back the definition so the caller
    /// can grant it. The pair is inserted under the identity's shard lock.
    pub fn redeem(&self, identity: &str, code: &str) -> Result<CodeDefinition, RegistryError> {
        let definition = self.lookup(code)?;
        let inserted = self
            .redemptions
            .entry(identity.to_string())
            .or_default()
            .insert(code.to_string());
        if !inserted {
            return Err(RegistryError::AlreadyRedeemed(code.to_string()));
        }
        self.revision.bump();
        tracing::info!(identity, code, tier = %definition.tier, "code redeemed");
        Ok(definition.clone())
    }

    pub fn has_redeemed(&self, identity: &str, code: &str) -> bool {
        self.redemptions
            .get(identity)
            .map(|set| set.contains(code))
            .unwrap_or(false)
    }

    /// Code table sorted by code string.
    pub fn definitions(&self) -> Vec<CodeDefinition> {
        let mut out: Vec<CodeDefinition> = self.definitions.values().cloned().collect();
        out.sort_by(|a, b| a.code.cmp(&b.code));
        out
    }

    pub fn identities(&self) -> Vec<String> {
        self.redemptions.iter().map(|e| e.key().clone()).collect()
    }

    pub fn purge(&self, identity: &str) -> bool {
        let removed = self.redemptions.remove(identity).is_some();
        if removed {
            self.revision.bump();
        }
        removed
    }

    pub fn snapshot(&self) -> BTreeMap<String, BTreeSet<String>> {
        self.redemptions
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }

    pub fn restore(&self, redemptions: BTreeMap<String, BTreeSet<String>>) {
        self.redemptions.clear();
        for (identity, codes) in redemptions {
            self.redemptions.insert(identity, codes);
        }
    }
}
