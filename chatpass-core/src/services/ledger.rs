// src/services/ledger.rs
//! BalanceLedger: per-identity remaining-use counters.
//!
//! - Each identity maps to one [`Balance`] inside a `DashMap`; every mutation
//!   runs while holding that entry's shard lock, so check-then-decrement is a
//!   single step.
//! - Cooldown resets are applied lazily, on the first read or write after
//!   the cooldown elapsed.
//! - The ledger never looks at codes or scores. Callers hand it a [`Grant`].

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

use crate::types::{Grant, ResetPolicy, Uses};
use crate::utils::clock::Clock;
use crate::utils::revision::Revision;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    pub remaining: Uses,
    #[serde(default)]
    pub last_reset_ms: Option<i64>,
    #[serde(default)]
    pub reset: Option<ResetPolicy>,
    /// Code whose grant created the current balance, if any.
    #[serde(default)]
    pub source_code: Option<String>,
    pub last_activity_ms: i64,
}

impl Balance {
    fn empty(now_ms: i64) -> Self {
        Self {
            remaining: Uses::Limited(0),
            last_reset_ms: None,
            reset: None,
            source_code: None,
            last_activity_ms: now_ms,
        }
    }

    pub fn cooldown_ms(&self) -> Option<u64> {
        self.reset.map(|r| r.cooldown_ms)
    }

    /// Milliseconds until the next cooldown refill; 0 without a cooldown.
    pub fn time_to_reset_ms(&self, now_ms: i64) -> u64 {
        match (self.reset, self.last_reset_ms) {
            (Some(policy), Some(last)) => {
                let elapsed = now_ms.saturating_sub(last).max(0) as u64;
                policy.cooldown_ms.saturating_sub(elapsed)
            }
            _ => 0,
        }
    }

    /// Refill to the nominal count once the cooldown has elapsed.
    /// Uses granted on top of the nominal count are kept.
    fn apply_pending_reset(&mut self, now_ms: i64) -> bool {
        let Some(policy) = self.reset else {
            return false;
        };
        let Uses::Limited(current) = self.remaining else {
            return false;
        };
        let last = self.last_reset_ms.unwrap_or(now_ms);
        let cooldown = i64::try_from(policy.cooldown_ms).unwrap_or(i64::MAX);
        if now_ms.saturating_sub(last) < cooldown {
            return false;
        }
        self.remaining = Uses::Limited(current.max(policy.nominal));
        self.last_reset_ms = Some(now_ms);
        true
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    #[error("insufficient balance: {remaining} uses left, {requested} requested")]
    InsufficientBalance { remaining: u64, requested: u64 },
}

pub struct BalanceLedger {
    balances: DashMap<String, Balance>,
    clock: Arc<dyn Clock>,
    revision: Revision,
}

impl BalanceLedger {
    pub fn new(clock: Arc<dyn Clock>, revision: Revision) -> Self {
        Self {
            balances: DashMap::new(),
            clock,
            revision,
        }
    }

    /// Current balance after any pending cooldown reset. `None` means the
    /// identity has never been granted anything.
    pub fn get_balance(&self, identity: &str) -> Option<Balance> {
        let now = self.clock.now_ms();
        let mut entry = self.balances.get_mut(identity)?;
        if entry.apply_pending_reset(now) {
            self.revision.bump();
            tracing::info!(identity, remaining = %entry.remaining, "cooldown reset applied");
        }
        Some(entry.clone())
    }

    /// Add uses to `identity`, creating the balance on first contact.
    ///
    /// A grant carrying a `source_code` makes that code the active one. Its
    /// refill policy, if it has one, replaces the current policy and restarts
    /// the cooldown; a code without a cooldown keeps the existing refill.
    /// Plain top-ups leave code and policy untouched.
    pub fn grant(&self, identity: &str, grant: Grant) -> Balance {
        let now = self.clock.now_ms();
        let mut entry = self
            .balances
            .entry(identity.to_string())
            .or_insert_with(|| Balance::empty(now));
        entry.apply_pending_reset(now);
        entry.remaining = entry.remaining.plus(grant.amount);
        if let Some(code) = grant.source_code {
            entry.source_code = Some(code);
            if grant.reset.is_some() {
                entry.reset = grant.reset;
                entry.last_reset_ms = Some(now);
            }
        }
        entry.last_activity_ms = now;
        self.revision.bump();
        entry.clone()
    }

    /// Spend `n` uses. Unlimited balances are never decremented.
    pub fn consume(&self, identity: &str, n: u64) -> Result<Balance, LedgerError> {
        let now = self.clock.now_ms();
        let Some(mut entry) = self.balances.get_mut(identity) else {
            return Err(LedgerError::InsufficientBalance {
                remaining: 0,
                requested: n,
            });
        };
        if entry.apply_pending_reset(now) {
            self.revision.bump();
        }
        match entry.remaining {
            Uses::Unlimited => {}
            Uses::Limited(r) if r >= n => entry.remaining = Uses::Limited(r - n),
            Uses::Limited(r) => {
                return Err(LedgerError::InsufficientBalance {
                    remaining: r,
                    requested: n,
                });
            }
        }
        entry.last_activity_ms = now;
        self.revision.bump();
        tracing::debug!(identity, remaining = %entry.remaining, "use consumed");
        Ok(entry.clone())
    }

    /// Time of the last grant or spend, without applying a pending reset.
    pub fn last_activity_ms(&self, identity: &str) -> Option<i64> {
        self.balances.get(identity).map(|b| b.last_activity_ms)
    }

    pub fn purge(&self, identity: &str) -> bool {
        let removed = self.balances.remove(identity).is_some();
        if removed {
            self.revision.bump();
        }
        removed
    }

    pub fn identities(&self) -> Vec<String> {
        self.balances.iter().map(|e| e.key().clone()).collect()
    }

    pub fn snapshot(&self) -> BTreeMap<String, Balance> {
        self.balances
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }

    pub fn restore(&self, balances: BTreeMap<String, Balance>) {
        self.balances.clear();
        for (identity, balance) in balances {
            self.balances.insert(identity, balance);
        }
    }
}
