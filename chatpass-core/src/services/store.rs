// src/services/store.rs
//! Snapshot persistence.
//!
//! - The core only ever talks to [`SnapshotStore`]: load once at start,
//!   save after batches of mutations.
//! - Every persisted snapshot carries a BLAKE3 checksum of its JSON body, so
//!   a truncated or hand-edited file is detected instead of half-loaded.
//! - [`JsonFileStore`] keeps timestamped backups; [`SqliteStore`] keeps the
//!   newest N rows. Both fall back to the newest copy that still verifies.

use chrono::{TimeZone, Utc};
use rusqlite::{Connection, params};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;

use crate::commands::init::write_atomic;
use crate::services::history::ChatEntry;
use crate::services::ledger::Balance;
use crate::services::reward::ScoreState;

const SNAPSHOT_FORMAT: u32 = 1;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub saved_at_ms: i64,
    #[serde(default)]
    pub balances: BTreeMap<String, Balance>,
    #[serde(default)]
    pub redemptions: BTreeMap<String, BTreeSet<String>>,
    #[serde(default)]
    pub scores: BTreeMap<String, ScoreState>,
    #[serde(default)]
    pub history: BTreeMap<String, Vec<ChatEntry>>,
}

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
    #[error("snapshot encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("no readable snapshot: {0}")]
    Corrupt(String),
}

fn io_err(context: String) -> impl FnOnce(std::io::Error) -> PersistenceError {
    move |source| PersistenceError::Io { context, source }
}

pub trait SnapshotStore: Send + Sync {
    /// `Ok(None)` when nothing was ever saved.
    fn load(&self) -> Result<Option<Snapshot>, PersistenceError>;
    fn save(&self, snapshot: &Snapshot) -> Result<(), PersistenceError>;
    fn describe(&self) -> String;
}

#[derive(Serialize, Deserialize)]
struct Envelope {
    format: u32,
    checksum: String,
    snapshot: Snapshot,
}

fn checksum(body: &str) -> String {
    blake3::hash(body.as_bytes()).to_hex().to_string()
}

fn seal(snapshot: &Snapshot) -> Result<String, PersistenceError> {
    let body = serde_json::to_string(snapshot)?;
    let envelope = Envelope {
        format: SNAPSHOT_FORMAT,
        checksum: checksum(&body),
        snapshot: snapshot.clone(),
    };
    Ok(serde_json::to_string_pretty(&envelope)?)
}

fn unseal(text: &str) -> Result<Snapshot, String> {
    let envelope: Envelope = serde_json::from_str(text).map_err(|e| e.to_string())?;
    if envelope.format != SNAPSHOT_FORMAT {
        return Err(format!("unsupported snapshot format {}", envelope.format));
    }
    let body = serde_json::to_string(&envelope.snapshot).map_err(|e| e.to_string())?;
    if checksum(&body) != envelope.checksum {
        return Err("checksum mismatch".to_string());
    }
    Ok(envelope.snapshot)
}

// -------------------------------------------------------------------------
// In-memory
// -------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryStore {
    latest: Mutex<Option<Snapshot>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SnapshotStore for MemoryStore {
    fn load(&self) -> Result<Option<Snapshot>, PersistenceError> {
        let guard = self.latest.lock().unwrap_or_else(|p| p.into_inner());
        Ok(guard.clone())
    }

    fn save(&self, snapshot: &Snapshot) -> Result<(), PersistenceError> {
        let mut guard = self.latest.lock().unwrap_or_else(|p| p.into_inner());
        *guard = Some(snapshot.clone());
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

// -------------------------------------------------------------------------
// JSON file + timestamped backups
// -------------------------------------------------------------------------

pub struct JsonFileStore {
    path: PathBuf,
    backup_dir: PathBuf,
    keep_backups: usize,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>, backup_dir: impl Into<PathBuf>, keep_backups: usize) -> Self {
        Self {
            path: path.into(),
            backup_dir: backup_dir.into(),
            keep_backups,
        }
    }

    /// Backup files, newest first. Names sort chronologically.
    pub fn backups(&self) -> Result<Vec<PathBuf>, PersistenceError> {
        if !self.backup_dir.exists() {
            return Ok(Vec::new());
        }
        let mut out: Vec<PathBuf> = fs::read_dir(&self.backup_dir)
            .map_err(io_err(format!("listing {}", self.backup_dir.display())))?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| n.starts_with("snapshot-") && n.ends_with(".json"))
                    .unwrap_or(false)
            })
            .collect();
        out.sort();
        out.reverse();
        Ok(out)
    }

    fn rotate_current(&self, saved_at_ms: i64) -> Result<(), PersistenceError> {
        if !self.path.exists() || self.keep_backups == 0 {
            return Ok(());
        }
        fs::create_dir_all(&self.backup_dir)
            .map_err(io_err(format!("creating {}", self.backup_dir.display())))?;
        let stamp = Utc
            .timestamp_millis_opt(saved_at_ms)
            .single()
            .unwrap_or_else(Utc::now)
            .format("%Y%m%dT%H%M%S%.3fZ");
        let target = self.backup_dir.join(format!("snapshot-{stamp}.json"));
        fs::copy(&self.path, &target).map_err(io_err(format!(
            "backing up {} -> {}",
            self.path.display(),
            target.display()
        )))?;
        for stale in self.backups()?.into_iter().skip(self.keep_backups) {
            if let Err(e) = fs::remove_file(&stale) {
                tracing::warn!(path = %stale.display(), error = %e, "failed to prune snapshot backup");
            }
        }
        Ok(())
    }

    fn read_verified(path: &Path) -> Result<Snapshot, String> {
        let text = fs::read_to_string(path).map_err(|e| e.to_string())?;
        unseal(&text)
    }
}

impl SnapshotStore for JsonFileStore {
    fn load(&self) -> Result<Option<Snapshot>, PersistenceError> {
        let backups = self.backups()?;
        if !self.path.exists() && backups.is_empty() {
            return Ok(None);
        }
        if self.path.exists() {
            match Self::read_verified(&self.path) {
                Ok(snapshot) => return Ok(Some(snapshot)),
                Err(reason) => tracing::warn!(
                    path = %self.path.display(),
                    %reason,
                    "snapshot unreadable, trying backups"
                ),
            }
        }
        for backup in &backups {
            match Self::read_verified(backup) {
                Ok(snapshot) => {
                    tracing::info!(path = %backup.display(), "recovered snapshot from backup");
                    return Ok(Some(snapshot));
                }
                Err(reason) => {
                    tracing::warn!(path = %backup.display(), %reason, "backup unreadable")
                }
            }
        }
        Err(PersistenceError::Corrupt(format!(
            "{} and {} backup(s) failed verification",
            self.path.display(),
            backups.len()
        )))
    }

    fn save(&self, snapshot: &Snapshot) -> Result<(), PersistenceError> {
        let text = seal(snapshot)?;
        self.rotate_current(snapshot.saved_at_ms)?;
        write_atomic(&self.path, text.as_bytes())
            .map_err(|e| PersistenceError::Corrupt(format!("writing {}: {e:#}", self.path.display())))?;
        Ok(())
    }

    fn describe(&self) -> String {
        format!("json:{}", self.path.display())
    }
}

// -------------------------------------------------------------------------
// SQLite
// -------------------------------------------------------------------------

pub struct SqliteStore {
    db_path: PathBuf,
    keep: usize,
}

impl SqliteStore {
    /// Open/create the database and ensure schema. `keep` is the number of
    /// snapshot rows retained (at least one).
    pub fn open(db_path: impl Into<PathBuf>, keep: usize) -> Result<Self, PersistenceError> {
        let store = Self {
            db_path: db_path.into(),
            keep: keep.max(1),
        };
        if let Some(parent) = store.db_path.parent() {
            fs::create_dir_all(parent).map_err(io_err(format!("creating {}", parent.display())))?;
        }
        store.conn()?.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;

            CREATE TABLE IF NOT EXISTS snapshots (
              id           INTEGER PRIMARY KEY AUTOINCREMENT,
              saved_at_ms  INTEGER NOT NULL,
              checksum     TEXT NOT NULL,
              body         TEXT NOT NULL
            );
            "#,
        )?;
        Ok(store)
    }

    fn conn(&self) -> Result<Connection, PersistenceError> {
        Ok(Connection::open(&self.db_path)?)
    }
}

impl SnapshotStore for SqliteStore {
    fn load(&self) -> Result<Option<Snapshot>, PersistenceError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT id, checksum, body FROM snapshots ORDER BY id DESC")?;
        let rows = stmt.query_map([], |r| {
            Ok((r.get::<_, i64>(0)?, r.get::<_, String>(1)?, r.get::<_, String>(2)?))
        })?;
        let mut seen = 0usize;
        for row in rows {
            let (id, sum, body) = row?;
            seen += 1;
            if checksum(&body) != sum {
                tracing::warn!(id, "snapshot row failed checksum");
                continue;
            }
            match serde_json::from_str::<Snapshot>(&body) {
                Ok(snapshot) => return Ok(Some(snapshot)),
                Err(e) => tracing::warn!(id, error = %e, "snapshot row unparsable"),
            }
        }
        if seen == 0 {
            return Ok(None);
        }
        Err(PersistenceError::Corrupt(format!(
            "{} snapshot row(s) in {} failed verification",
            seen,
            self.db_path.display()
        )))
    }

    fn save(&self, snapshot: &Snapshot) -> Result<(), PersistenceError> {
        let body = serde_json::to_string(snapshot)?;
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO snapshots (saved_at_ms, checksum, body) VALUES (?1, ?2, ?3)",
            params![snapshot.saved_at_ms, checksum(&body), body],
        )?;
        conn.execute(
            "DELETE FROM snapshots WHERE id NOT IN (SELECT id FROM snapshots ORDER BY id DESC LIMIT ?1)",
            params![self.keep as i64],
        )?;
        Ok(())
    }

    fn describe(&self) -> String {
        format!("sqlite:{}", self.db_path.display())
    }
}
