use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing;

use crate::services::registry::CodeDefinition;
use crate::services::reward::{ComboBracket, RewardRules, RewardTier};
use crate::types::Uses;

/// Cooldowns are compared against millisecond timestamps held in `i64`.
pub const MAX_COOLDOWN_MS: u64 = i64::MAX as u64;

#[derive(Debug, Clone, Deserialize)]
pub struct CoreConfig {
    #[serde(default)]
    pub system: SystemConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub logbook: LogbookConfig,
    #[serde(default = "CoreConfig::default_codes")]
    pub codes: Vec<CodeDefinition>,
    #[serde(default = "CoreConfig::default_tiers")]
    pub tiers: Vec<RewardTier>,
    #[serde(default)]
    pub rewards: RewardsConfig,
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub maintenance: MaintenanceConfig,
}

impl CoreConfig {
    pub fn load(root: &Path) -> Result<Self> {
        let path = root.join("config.toml");
        let mut cfg = if path.exists() {
            let text = fs::read_to_string(&path)
                .with_context(|| format!("reading config file {}", path.display()))?;
            Self::from_toml(&text).with_context(|| format!("parsing config file {}", path.display()))?
        } else {
            tracing::info!(
                "No config file found at {}. Using CoreConfig::default().",
                path.display()
            );
            CoreConfig::default()
        };
        cfg.resolve_paths(root);
        Ok(cfg)
    }

    /// Parse and validate without touching the filesystem.
    pub fn from_toml(text: &str) -> Result<Self> {
        let cfg = toml::from_str::<CoreConfig>(text)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for c in &self.codes {
            if c.code.trim().is_empty() {
                bail!("access code entries must have a non-empty code");
            }
            if !seen.insert(c.code.as_str()) {
                bail!("duplicate access code {:?}", c.code);
            }
            if c.grant == Uses::Limited(0) {
                bail!("access code {:?} grants zero uses", c.code);
            }
            if c.cooldown_ms == Some(0) {
                bail!("access code {:?} has a zero cooldown", c.code);
            }
            if c.cooldown_ms.is_some_and(|ms| ms > MAX_COOLDOWN_MS) {
                bail!("access code {:?} cooldown exceeds {} ms", c.code, MAX_COOLDOWN_MS);
            }
        }

        let mut labels = HashSet::new();
        let mut last_threshold: Option<u64> = None;
        for t in &self.tiers {
            if !labels.insert(t.label.as_str()) {
                bail!("duplicate reward tier {:?}", t.label);
            }
            if let Some(prev) = last_threshold {
                if t.score_threshold <= prev {
                    bail!(
                        "reward tier {:?} threshold {} must be greater than {}",
                        t.label,
                        t.score_threshold,
                        prev
                    );
                }
            }
            if t.grant == 0 {
                bail!("reward tier {:?} grants zero uses", t.label);
            }
            if t.cooldown_ms.is_some_and(|ms| ms > MAX_COOLDOWN_MS) {
                bail!("reward tier {:?} cooldown exceeds {} ms", t.label, MAX_COOLDOWN_MS);
            }
            last_threshold = Some(t.score_threshold);
        }

        for b in &self.rewards.combo {
            if !(b.multiplier.is_finite() && b.multiplier > 0.0) {
                bail!("combo multiplier for streak {} must be positive", b.streak);
            }
        }
        if self.maintenance.history_max_entries == 0 {
            bail!("maintenance.history_max_entries must be at least 1");
        }
        Ok(())
    }

    pub fn reward_rules(&self) -> RewardRules {
        RewardRules::new(
            self.tiers.clone(),
            self.rewards.combo.clone(),
            self.rewards.max_daily_unlocks,
        )
    }

    fn resolve_paths(&mut self, root: &Path) {
        self.storage.snapshot_path = absolutize(root, &self.storage.snapshot_path);
        self.storage.sqlite_path = absolutize(root, &self.storage.sqlite_path);
        self.storage.backup_dir = absolutize(root, &self.storage.backup_dir);
        self.logbook.path = absolutize(root, &self.logbook.path);
    }

    fn default_codes() -> Vec<CodeDefinition> {
        let code = |code: &str, grant: Uses, tier: &str, cooldown_ms: Option<u64>, description: &str| {
            CodeDefinition {
                code: code.to_string(),
                grant,
                tier: tier.to_string(),
                cooldown_ms,
                description: description.to_string(),
            }
        };
        vec![
            code("UNLIMITED123", Uses::Unlimited, "UNLIMITED", None, "Unlimited uses, no cooldown"),
            code("PREMIUM50", Uses::Limited(50), "PREMIUM", Some(3_600_000), "50 uses, resets every hour"),
            code("TURBO25", Uses::Limited(25), "TURBO", Some(1_800_000), "25 uses, resets every 30 minutes"),
            code("TRIAL10", Uses::Limited(10), "TRIAL", Some(3_600_000), "10 uses, resets every hour"),
            code("VIP100", Uses::Limited(100), "VIP", Some(7_200_000), "100 uses, resets every 2 hours"),
        ]
    }

    fn default_tiers() -> Vec<RewardTier> {
        let tier = |label: &str, score_threshold: u64, grant: u64| RewardTier {
            label: label.to_string(),
            score_threshold,
            grant,
            cooldown_ms: None,
        };
        vec![
            tier("BRONZE", 100, 10),
            tier("SILVER", 250, 25),
            tier("GOLD", 500, 50),
            tier("PLATINUM", 1000, 100),
        ]
    }
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            system: SystemConfig::default(),
            storage: StorageConfig::default(),
            logbook: LogbookConfig::default(),
            codes: Self::default_codes(),
            tiers: Self::default_tiers(),
            rewards: RewardsConfig::default(),
            provider: ProviderConfig::default(),
            maintenance: MaintenanceConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SystemConfig {
    #[serde(default = "SystemConfig::default_name")]
    pub name: String,
    #[serde(default = "SystemConfig::default_version")]
    pub version: String,
}

impl SystemConfig {
    fn default_name() -> String {
        "chatpass".to_string()
    }

    fn default_version() -> String {
        "0.1.0".to_string()
    }
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            name: Self::default_name(),
            version: Self::default_version(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    #[default]
    Json,
    Sqlite,
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,
    #[serde(default = "StorageConfig::default_snapshot_path")]
    pub snapshot_path: PathBuf,
    #[serde(default = "StorageConfig::default_sqlite_path")]
    pub sqlite_path: PathBuf,
    #[serde(default = "StorageConfig::default_backup_dir")]
    pub backup_dir: PathBuf,
    #[serde(default = "StorageConfig::default_keep_backups")]
    pub keep_backups: usize,
}

impl StorageConfig {
    fn default_snapshot_path() -> PathBuf {
        PathBuf::from("state/snapshot.json")
    }

    fn default_sqlite_path() -> PathBuf {
        PathBuf::from("state/snapshots.db")
    }

    fn default_backup_dir() -> PathBuf {
        PathBuf::from("state/backups")
    }

    fn default_keep_backups() -> usize {
        5
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            snapshot_path: Self::default_snapshot_path(),
            sqlite_path: Self::default_sqlite_path(),
            backup_dir: Self::default_backup_dir(),
            keep_backups: Self::default_keep_backups(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogbookConfig {
    #[serde(default = "LogbookConfig::default_enabled")]
    pub enabled: bool,
    #[serde(default = "LogbookConfig::default_path")]
    pub path: PathBuf,
}

impl LogbookConfig {
    fn default_enabled() -> bool {
        true
    }

    fn default_path() -> PathBuf {
        PathBuf::from("logbook/ledger.jsonl")
    }
}

impl Default for LogbookConfig {
    fn default() -> Self {
        Self {
            enabled: Self::default_enabled(),
            path: Self::default_path(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RewardsConfig {
    /// Tier unlocks allowed per identity per local day; unset means no cap.
    #[serde(default)]
    pub max_daily_unlocks: Option<u32>,
    #[serde(default = "RewardsConfig::default_combo")]
    pub combo: Vec<ComboBracket>,
}

impl RewardsConfig {
    fn default_combo() -> Vec<ComboBracket> {
        vec![
            ComboBracket { streak: 10, multiplier: 3.0 },
            ComboBracket { streak: 5, multiplier: 2.0 },
            ComboBracket { streak: 3, multiplier: 1.5 },
        ]
    }
}

impl Default for RewardsConfig {
    fn default() -> Self {
        Self {
            max_daily_unlocks: None,
            combo: Self::default_combo(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    #[serde(default = "ProviderConfig::default_api_base")]
    pub api_base: String,
    #[serde(default = "ProviderConfig::default_model")]
    pub model: String,
    #[serde(default = "ProviderConfig::default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "ProviderConfig::default_temperature")]
    pub temperature: f32,
    #[serde(default = "ProviderConfig::default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "ProviderConfig::default_api_key_env")]
    pub api_key_env: String,
}

impl ProviderConfig {
    fn default_api_base() -> String {
        "https://api.openai.com/v1".to_string()
    }
    fn default_model() -> String {
        "gpt-4-0125-preview".to_string()
    }
    fn default_max_tokens() -> u32 {
        4000
    }
    fn default_temperature() -> f32 {
        0.7
    }
    fn default_timeout_secs() -> u64 {
        60
    }
    fn default_api_key_env() -> String {
        "Apikey".to_string()
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_base: Self::default_api_base(),
            model: Self::default_model(),
            max_tokens: Self::default_max_tokens(),
            temperature: Self::default_temperature(),
            timeout_secs: Self::default_timeout_secs(),
            api_key_env: Self::default_api_key_env(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MaintenanceConfig {
    #[serde(default = "MaintenanceConfig::default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "MaintenanceConfig::default_history_retention_hours")]
    pub history_retention_hours: u64,
    #[serde(default = "MaintenanceConfig::default_history_max_entries")]
    pub history_max_entries: usize,
    /// Purge identities whose balance has been idle this long; unset keeps them forever.
    #[serde(default)]
    pub identity_retention_days: Option<u32>,
}

impl MaintenanceConfig {
    fn default_interval_secs() -> u64 {
        300
    }

    fn default_history_retention_hours() -> u64 {
        24
    }

    fn default_history_max_entries() -> usize {
        50
    }
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            interval_secs: Self::default_interval_secs(),
            history_retention_hours: Self::default_history_retention_hours(),
            history_max_entries: Self::default_history_max_entries(),
            identity_retention_days: None,
        }
    }
}

fn absolutize(root: &Path, value: &Path) -> PathBuf {
    if value.is_absolute() {
        value.to_path_buf()
    } else {
        root.join(value)
    }
}
