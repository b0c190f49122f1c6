// chatpass-core/src/commands/init.rs

use anyhow::{Context, Result};
use once_cell::sync::OnceCell;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::config::CoreConfig;

#[derive(Debug, Clone)]
pub struct InitReport {
    pub root: PathBuf,
    pub created: Vec<String>,
    pub existed: Vec<String>,
    pub config: CoreConfig,
}

// ---------- single global init gate ----------

static INIT: OnceCell<InitReport> = OnceCell::new();

/// Idempotent global initializer. Safe to call often.
/// Returns a &'static InitReport once initialization has completed.
pub fn ensure_initialized_once() -> Result<&'static InitReport> {
    INIT.get_or_try_init(|| ensure_initialized_at(&chatpass_root()))
}

/// Resolve the chatpass root. Allow override via CHATPASS_ROOT (tests/deployments).
pub fn chatpass_root() -> PathBuf {
    std::env::var_os("CHATPASS_ROOT")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(".chatpass"))
}

/// Create the root layout and default config under `root` (idempotent), then load the config.
pub fn ensure_initialized_at(root: &Path) -> Result<InitReport> {
    let mut created = Vec::new();
    let mut existed = Vec::new();

    ensure_dir(root, "", &mut created, &mut existed)?;
    ensure_dir(root, "state", &mut created, &mut existed)?;
    ensure_dir(root, "state/backups", &mut created, &mut existed)?;
    ensure_dir(root, "logbook", &mut created, &mut existed)?;

    ensure_file(
        root,
        "config.toml",
        Some(DEFAULT_CONFIG_TOML),
        &mut created,
        &mut existed,
    )?;

    let config = CoreConfig::load(root)?;
    Ok(InitReport {
        root: root.to_path_buf(),
        created,
        existed,
        config,
    })
}

fn ensure_dir(
    base: &Path,
    rel: &str,
    created: &mut Vec<String>,
    existed: &mut Vec<String>,
) -> Result<()> {
    let p = if rel.is_empty() { base.to_path_buf() } else { base.join(rel) };
    if p.exists() {
        existed.push(if rel.is_empty() { ".".to_string() } else { rel.to_string() });
        return Ok(());
    }
    fs::create_dir_all(&p).with_context(|| format!("create_dir_all({:?})", p))?;
    created.push(if rel.is_empty() { ".".to_string() } else { rel.to_string() });
    Ok(())
}

fn ensure_file(
    base: &Path,
    rel_file: &str,
    content_if_absent: Option<&str>,
    created: &mut Vec<String>,
    existed: &mut Vec<String>,
) -> Result<()> {
    let p = base.join(rel_file);
    if p.exists() {
        existed.push(rel_file.to_string());
        return Ok(());
    }
    write_atomic(&p, content_if_absent.unwrap_or("").as_bytes())?;
    created.push(rel_file.to_string());
    Ok(())
}

/// Write via a sibling temp file and rename, so readers never see a half-written file.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("create_dir_all({:?})", parent))?;
    }
    let tmp = path.with_extension("tmp");
    {
        let mut f = OpenOptions::new()
            .create(true)
            .truncate(true)
            .write(true)
            .open(&tmp)
            .with_context(|| format!("open temp file {:?}", tmp))?;
        f.write_all(bytes)?;
        f.sync_all()?;
    }
    fs::rename(&tmp, path).with_context(|| format!("rename {:?} -> {:?}", tmp, path))?;
    Ok(())
}

// ---------- defaults ----------

pub const DEFAULT_CONFIG_TOML: &str = r#"[system]
name = "chatpass"
version = "0.1.0"

[storage]
backend = "json"
snapshot_path = "state/snapshot.json"
sqlite_path = "state/snapshots.db"
backup_dir = "state/backups"
keep_backups = 5

[logbook]
enabled = true
path = "logbook/ledger.jsonl"

[[codes]]
code = "UNLIMITED123"
grant = "unlimited"
tier = "UNLIMITED"
description = "Unlimited uses, no cooldown"

[[codes]]
code = "PREMIUM50"
grant = 50
tier = "PREMIUM"
cooldown_ms = 3600000
description = "50 uses, resets every hour"

[[codes]]
code = "TURBO25"
grant = 25
tier = "TURBO"
cooldown_ms = 1800000
description = "25 uses, resets every 30 minutes"

[[codes]]
code = "TRIAL10"
grant = 10
tier = "TRIAL"
cooldown_ms = 3600000
description = "10 uses, resets every hour"

[[codes]]
code = "VIP100"
grant = 100
tier = "VIP"
cooldown_ms = 7200000
description = "100 uses, resets every 2 hours"

[[tiers]]
label = "BRONZE"
score_threshold = 100
grant = 10

[[tiers]]
label = "SILVER"
score_threshold = 250
grant = 25

[[tiers]]
label = "GOLD"
score_threshold = 500
grant = 50

[[tiers]]
label = "PLATINUM"
score_threshold = 1000
grant = 100

[rewards]
# max_daily_unlocks = 3

[[rewards.combo]]
streak = 10
multiplier = 3.0

[[rewards.combo]]
streak = 5
multiplier = 2.0

[[rewards.combo]]
streak = 3
multiplier = 1.5

[provider]
api_base = "https://api.openai.com/v1"
model = "gpt-4-0125-preview"
max_tokens = 4000
temperature = 0.7
timeout_secs = 60
api_key_env = "Apikey"

[maintenance]
interval_secs = 300
history_retention_hours = 24
history_max_entries = 50
# identity_retention_days = 90
"#;
