// src/services/history.rs
//! Bounded per-identity chat transcript, purged by age during maintenance.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::utils::revision::Revision;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatEntry {
    pub at_ms: i64,
    pub message: String,
    pub response: String,
}

pub struct ChatHistory {
    entries: DashMap<String, Vec<ChatEntry>>,
    max_entries: usize,
    revision: Revision,
}

impl ChatHistory {
    pub fn new(max_entries: usize, revision: Revision) -> Self {
        Self {
            entries: DashMap::new(),
            max_entries,
            revision,
        }
    }

    pub fn record(&self, identity: &str, entry: ChatEntry) {
        let mut list = self.entries.entry(identity.to_string()).or_default();
        list.push(entry);
        if list.len() > self.max_entries {
            let excess = list.len() - self.max_entries;
            list.drain(..excess);
        }
        self.revision.bump();
    }

    /// Newest last.
    pub fn recent(&self, identity: &str, limit: usize) -> Vec<ChatEntry> {
        self.entries
            .get(identity)
            .map(|list| {
                let skip = list.len().saturating_sub(limit);
                list[skip..].to_vec()
            })
            .unwrap_or_default()
    }

    pub fn last_activity_ms(&self, identity: &str) -> Option<i64> {
        self.entries
            .get(identity)
            .and_then(|list| list.iter().map(|e| e.at_ms).max())
    }

    /// Drop entries older than `cutoff_ms`; identities left empty are removed.
    /// Returns the number of entries dropped.
    pub fn purge_older_than(&self, cutoff_ms: i64) -> usize {
        let mut dropped = 0;
        let identities: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        for identity in identities {
            if let Some(mut list) = self.entries.get_mut(&identity) {
                let before = list.len();
                list.retain(|e| e.at_ms >= cutoff_ms);
                dropped += before - list.len();
            }
            self.entries.remove_if(&identity, |_, list| list.is_empty());
        }
        if dropped > 0 {
            self.revision.bump();
        }
        dropped
    }

    pub fn purge(&self, identity: &str) -> bool {
        let removed = self.entries.remove(identity).is_some();
        if removed {
            self.revision.bump();
        }
        removed
    }

    pub fn snapshot(&self) -> BTreeMap<String, Vec<ChatEntry>> {
        self.entries
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }

    pub fn restore(&self, entries: BTreeMap<String, Vec<ChatEntry>>) {
        self.entries.clear();
        for (identity, list) in entries {
            self.entries.insert(identity, list);
        }
    }
}
