// src/utils/revision.rs
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic mutation counter shared by every component that owns persisted state.
///
/// The vault compares it against the revision of the last saved snapshot to
/// decide whether a flush has anything to write.
#[derive(Debug, Clone, Default)]
pub struct Revision(Arc<AtomicU64>);

impl Revision {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bump(&self) -> u64 {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn current(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }
}
