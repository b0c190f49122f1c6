// src/utils/logbook.rs
use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use std::sync::Mutex;
use std::{fs, io::Write, path::PathBuf};
use uuid::Uuid;

#[derive(Serialize)]
struct LogLine<'a> {
    id: String,
    ts: String,
    event: &'a str,
    identity: &'a str,
    data: Value,
}

/// Append-only JSONL record of ledger events (redemptions, spends, unlocks, denials).
///
/// Never called while an identity lock is held.
pub struct Logbook {
    path: Option<PathBuf>,
    write: Mutex<()>,
}

impl Logbook {
    pub fn open(path: PathBuf) -> Self {
        Self {
            path: Some(path),
            write: Mutex::new(()),
        }
    }

    pub fn disabled() -> Self {
        Self {
            path: None,
            write: Mutex::new(()),
        }
    }

    pub fn emit(&self, event: &str, identity: &str, data: Value) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let line = LogLine {
            id: Uuid::new_v4().to_string(),
            ts: Utc::now().to_rfc3339(),
            event,
            identity,
            data,
        };
        let json = serde_json::to_string(&line)?;
        let _guard = self.write.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut f = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("open logbook {}", path.display()))?;
        writeln!(f, "{}", json)?;
        Ok(())
    }

    /// Like [`Logbook::emit`], but a failed write is only traced.
    pub fn record(&self, event: &str, identity: &str, data: Value) {
        if let Err(e) = self.emit(event, identity, data) {
            tracing::warn!(event, error = %e, "logbook write failed");
        }
    }
}
