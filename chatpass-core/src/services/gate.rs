// chatpass-core/src/services/gate.rs

use dashmap::DashMap;
use serde::Serialize;
use std::sync::{Arc, Mutex};
use thiserror::Error;

use crate::services::history::{ChatEntry, ChatHistory};
use crate::services::ledger::{Balance, BalanceLedger, LedgerError};
use crate::services::provider::{ChatProvider, ProviderError};
use crate::services::registry::{CodeDefinition, CodeRegistry, RegistryError};
use crate::services::reward::{RewardEngine, RewardOutcome};
use crate::types::{Grant, Uses};
use crate::utils::clock::Clock;
use crate::utils::fence::CommitFence;

/// Why a request was refused. Variants are listed in check order.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Denied {
    #[error("balances unavailable: {0}")]
    Unavailable(String),
    #[error("invalid access code {0:?}")]
    InvalidCode(String),
    #[error("access code {0:?} already redeemed")]
    AlreadyRedeemed(String),
    #[error("no uses left ({remaining} remaining)")]
    InsufficientBalance { remaining: u64 },
}

impl Denied {
    /// Stable snake_case label for logs and reports.
    pub fn reason(&self) -> &'static str {
        match self {
            Denied::Unavailable(_) => "unavailable",
            Denied::InvalidCode(_) => "invalid_code",
            Denied::AlreadyRedeemed(_) => "already_redeemed",
            Denied::InsufficientBalance { .. } => "insufficient_balance",
        }
    }
}

impl From<RegistryError> for Denied {
    fn from(e: RegistryError) -> Self {
        match e {
            RegistryError::NotFound(code) => Denied::InvalidCode(code),
            RegistryError::AlreadyRedeemed(code) => Denied::AlreadyRedeemed(code),
        }
    }
}

impl From<LedgerError> for Denied {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::InsufficientBalance { remaining, .. } => {
                Denied::InsufficientBalance { remaining }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChatError {
    #[error(transparent)]
    Denied(#[from] Denied),
    /// Nothing to send to; checked before any use is spent.
    #[error("no chat provider configured")]
    NoProvider,
    /// The use was already consumed when the provider failed; it is not refunded.
    #[error("chat provider failed after authorization: {error}")]
    Provider {
        error: ProviderError,
        balance: Balance,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct Activation {
    pub definition: CodeDefinition,
    pub balance: Balance,
    /// False when the code was already backing the identity's balance.
    pub newly_redeemed: bool,
}

#[derive(Debug, Clone)]
pub struct ChatOutcome {
    pub response: String,
    pub balance: Balance,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScoreOutcome {
    pub reward: RewardOutcome,
    pub balance: Option<Balance>,
}

/// One mutex per identity. Different identities never contend.
#[derive(Default)]
struct IdentityLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl IdentityLocks {
    fn with_lock<T>(&self, identity: &str, f: impl FnOnce() -> T) -> T {
        let lock = self
            .locks
            .entry(identity.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock.lock().unwrap_or_else(|p| p.into_inner());
        f()
    }

    /// Forget locks nobody is holding or waiting on.
    fn prune_idle(&self) -> usize {
        let before = self.locks.len();
        self.locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        before.saturating_sub(self.locks.len())
    }
}

/// The only place that both checks and spends a balance.
///
/// Every mutation runs under the identity's lock and inside the commit fence,
/// so a snapshot sees either all or none of it.
pub struct UsageGate {
    ledger: Arc<BalanceLedger>,
    registry: Arc<CodeRegistry>,
    rewards: Arc<RewardEngine>,
    history: Arc<ChatHistory>,
    clock: Arc<dyn Clock>,
    fence: CommitFence,
    locks: IdentityLocks,
    unavailable: Option<String>,
}

impl UsageGate {
    pub fn new(
        ledger: Arc<BalanceLedger>,
        registry: Arc<CodeRegistry>,
        rewards: Arc<RewardEngine>,
        history: Arc<ChatHistory>,
        clock: Arc<dyn Clock>,
        fence: CommitFence,
    ) -> Self {
        Self {
            ledger,
            registry,
            rewards,
            history,
            clock,
            fence,
            locks: IdentityLocks::default(),
            unavailable: None,
        }
    }

    /// Identity lock first, then the fence.
    fn commit<T>(&self, identity: &str, f: impl FnOnce() -> T) -> T {
        self.locks.with_lock(identity, || {
            let _open = self.fence.enter();
            f()
        })
    }

    /// Refuse every balance-touching request, e.g. after unrecoverable snapshot corruption.
    pub fn mark_unavailable(&mut self, reason: impl Into<String>) {
        self.unavailable = Some(reason.into());
    }

    pub fn is_available(&self) -> bool {
        self.unavailable.is_none()
    }

    fn ensure_available(&self) -> Result<(), Denied> {
        match &self.unavailable {
            Some(reason) => Err(Denied::Unavailable(reason.clone())),
            None => Ok(()),
        }
    }

    /// Redeem `code` for `identity` unless it already backs the identity's balance.
    /// Caller must hold the identity lock.
    fn activate_locked(&self, identity: &str, code: &str) -> Result<Activation, Denied> {
        let definition = self.registry.lookup(code)?.clone();
        if let Some(balance) = self.ledger.get_balance(identity) {
            if balance.source_code.as_deref() == Some(code) {
                return Ok(Activation {
                    definition,
                    balance,
                    newly_redeemed: false,
                });
            }
        }
        let definition = self.registry.redeem(identity, code)?;
        let balance = self.ledger.grant(identity, definition.to_grant());
        Ok(Activation {
            definition,
            balance,
            newly_redeemed: true,
        })
    }

    /// Redeem and grant `code` without spending anything.
    pub fn activate(&self, identity: &str, code: &str) -> Result<Activation, Denied> {
        self.commit(identity, || {
            self.ensure_available()?;
            self.activate_locked(identity, code)
        })
    }

    /// Resolve `code` if given, then spend one use. The returned balance is
    /// the one left after spending.
    pub fn authorize_and_consume(
        &self,
        identity: &str,
        code: Option<&str>,
    ) -> Result<Balance, Denied> {
        self.commit(identity, || {
            self.ensure_available()?;
            if let Some(code) = code {
                self.activate_locked(identity, code)?;
            }
            Ok(self.ledger.consume(identity, 1)?)
        })
    }

    /// Authorize, then call the provider outside the identity lock.
    /// A provider failure keeps the use spent. The exchange is recorded in
    /// the chat history under the lock again, unless the identity was purged
    /// in between.
    pub fn chat(
        &self,
        identity: &str,
        code: Option<&str>,
        message: &str,
        provider: &dyn ChatProvider,
    ) -> Result<ChatOutcome, ChatError> {
        let balance = self.authorize_and_consume(identity, code)?;
        match provider.send_chat(message) {
            Ok(response) => {
                self.commit(identity, || {
                    if self.ledger.last_activity_ms(identity).is_none() {
                        tracing::warn!(identity, "identity purged during chat; history not recorded");
                        return;
                    }
                    self.history.record(
                        identity,
                        ChatEntry {
                            at_ms: self.clock.now_ms(),
                            message: message.to_string(),
                            response: response.clone(),
                        },
                    );
                });
                Ok(ChatOutcome { response, balance })
            }
            Err(error) => {
                tracing::warn!(identity, error = %error, "chat provider failed; use stays consumed");
                Err(ChatError::Provider { error, balance })
            }
        }
    }

    /// Fold a score into the reward engine and grant whatever it unlocked.
    pub fn submit_score(&self, identity: &str, score: u64) -> Result<ScoreOutcome, Denied> {
        self.commit(identity, || {
            self.ensure_available()?;
            let reward = self.rewards.apply_score(identity, score);
            for tier in &reward.newly_unlocked {
                if tier.grant > 0 {
                    self.ledger
                        .grant(identity, Grant::uses(Uses::Limited(tier.grant)));
                }
            }
            Ok(ScoreOutcome {
                balance: self.ledger.get_balance(identity),
                reward,
            })
        })
    }

    /// Read-only balance view (applies a due cooldown reset).
    pub fn balance(&self, identity: &str) -> Option<Balance> {
        self.commit(identity, || self.ledger.get_balance(identity))
    }

    /// Remove every record of `identity` (balance, redemptions, score state,
    /// chat history) if none of them saw activity since `cutoff_ms`.
    /// Redemptions carry no timestamp and never keep an identity alive.
    pub fn purge_if_idle(&self, identity: &str, cutoff_ms: i64) -> bool {
        self.commit(identity, || {
            let latest = [
                self.ledger.last_activity_ms(identity),
                self.rewards.last_activity_ms(identity),
                self.history.last_activity_ms(identity),
            ]
            .into_iter()
            .flatten()
            .max();
            if latest.is_some_and(|t| t >= cutoff_ms) {
                return false;
            }
            let mut removed = self.ledger.purge(identity);
            removed |= self.registry.purge(identity);
            removed |= self.rewards.purge(identity);
            removed |= self.history.purge(identity);
            removed
        })
    }

    pub fn prune_idle_locks(&self) -> usize {
        self.locks.prune_idle()
    }
}
