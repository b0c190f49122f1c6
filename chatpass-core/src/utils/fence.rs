// src/utils/fence.rs
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Separates multi-component mutations from snapshot capture.
///
/// Gate operations that touch several components (redeem + grant, unlock +
/// grant, purge) run inside [`CommitFence::enter`]; the vault captures under
/// [`CommitFence::quiesce`], so a snapshot never holds half of one.
#[derive(Debug, Clone, Default)]
pub struct CommitFence(Arc<RwLock<()>>);

impl CommitFence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared; many identities commit at once.
    pub fn enter(&self) -> RwLockReadGuard<'_, ()> {
        self.0.read().unwrap_or_else(|p| p.into_inner())
    }

    /// Exclusive; waits for in-flight commits to finish.
    pub fn quiesce(&self) -> RwLockWriteGuard<'_, ()> {
        self.0.write().unwrap_or_else(|p| p.into_inner())
    }
}
