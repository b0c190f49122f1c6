use std::fs;

use tempfile::tempdir;

use chatpass_core::commands::init::{DEFAULT_CONFIG_TOML, ensure_initialized_at};
use chatpass_core::config::{CoreConfig, MAX_COOLDOWN_MS, StorageBackend};
use chatpass_core::services::CodeDefinition;
use chatpass_core::services::reward::RewardTier;
use chatpass_core::types::Uses;

#[test]
fn default_toml_matches_built_in_defaults() {
    let parsed = CoreConfig::from_toml(DEFAULT_CONFIG_TOML).unwrap();
    let built_in = CoreConfig::default();

    assert_eq!(parsed.codes, built_in.codes);
    assert_eq!(parsed.tiers, built_in.tiers);
    assert_eq!(parsed.rewards.combo, built_in.rewards.combo);
    assert_eq!(parsed.storage.backend, StorageBackend::Json);
    assert_eq!(parsed.provider.model, "gpt-4-0125-preview");
    assert_eq!(parsed.provider.max_tokens, 4000);
    assert_eq!(parsed.provider.api_key_env, "Apikey");
    assert_eq!(parsed.maintenance.history_retention_hours, 24);
    assert!(parsed.maintenance.identity_retention_days.is_none());
}

#[test]
fn empty_file_means_defaults() {
    let cfg = CoreConfig::from_toml("").unwrap();
    assert_eq!(cfg.codes.len(), 5);
    let unlimited = cfg.codes.iter().find(|c| c.code == "UNLIMITED123").unwrap();
    assert_eq!(unlimited.grant, Uses::Unlimited);
    assert_eq!(cfg.tiers.len(), 4);
    assert!(cfg.rewards.max_daily_unlocks.is_none());
}

#[test]
fn partial_sections_keep_other_defaults() {
    let cfg = CoreConfig::from_toml(
        r#"
        [storage]
        backend = "sqlite"

        [rewards]
        max_daily_unlocks = 2
        "#,
    )
    .unwrap();
    assert_eq!(cfg.storage.backend, StorageBackend::Sqlite);
    assert_eq!(cfg.storage.keep_backups, 5);
    assert_eq!(cfg.rewards.max_daily_unlocks, Some(2));
    assert_eq!(cfg.rewards.combo.len(), 3);
}

#[test]
fn invalid_configs_are_rejected() {
    let cases = [
        (
            "duplicate code",
            r#"
            [[codes]]
            code = "A"
            grant = 1
            tier = "T"
            [[codes]]
            code = "A"
            grant = 2
            tier = "T"
            "#,
        ),
        (
            "zero grant",
            r#"
            [[codes]]
            code = "A"
            grant = 0
            tier = "T"
            "#,
        ),
        (
            "zero cooldown",
            r#"
            [[codes]]
            code = "A"
            grant = 5
            tier = "T"
            cooldown_ms = 0
            "#,
        ),
        (
            "blank code",
            r#"
            [[codes]]
            code = "  "
            grant = 5
            tier = "T"
            "#,
        ),
        (
            "bad grant word",
            r#"
            [[codes]]
            code = "A"
            grant = "lots"
            tier = "T"
            "#,
        ),
        (
            "thresholds out of order",
            r#"
            [[tiers]]
            label = "HIGH"
            score_threshold = 500
            grant = 5
            [[tiers]]
            label = "LOW"
            score_threshold = 100
            grant = 5
            "#,
        ),
        (
            "duplicate tier",
            r#"
            [[tiers]]
            label = "X"
            score_threshold = 1
            grant = 5
            [[tiers]]
            label = "X"
            score_threshold = 2
            grant = 5
            "#,
        ),
        (
            "zero tier grant",
            r#"
            [[tiers]]
            label = "X"
            score_threshold = 1
            grant = 0
            "#,
        ),
        (
            "negative multiplier",
            r#"
            [[rewards.combo]]
            streak = 2
            multiplier = -1.0
            "#,
        ),
        (
            "no history room",
            r#"
            [maintenance]
            history_max_entries = 0
            "#,
        ),
    ];
    for (name, text) in cases {
        assert!(CoreConfig::from_toml(text).is_err(), "{name} should be rejected");
    }
}

#[test]
fn init_creates_layout_once() {
    let dir = tempdir().unwrap();
    let root = dir.path().join("root");

    let first = ensure_initialized_at(&root).unwrap();
    assert!(first.created.contains(&"config.toml".to_string()));
    assert!(first.created.contains(&"state/backups".to_string()));
    assert!(root.join("logbook").is_dir());
    assert_eq!(
        fs::read_to_string(root.join("config.toml")).unwrap(),
        DEFAULT_CONFIG_TOML
    );

    let second = ensure_initialized_at(&root).unwrap();
    assert!(second.created.is_empty());
    assert!(second.existed.contains(&"config.toml".to_string()));
}

#[test]
fn relative_paths_resolve_against_the_root() {
    let dir = tempdir().unwrap();
    let report = ensure_initialized_at(dir.path()).unwrap();
    let cfg = report.config;
    assert_eq!(cfg.storage.snapshot_path, dir.path().join("state/snapshot.json"));
    assert_eq!(cfg.storage.backup_dir, dir.path().join("state/backups"));
    assert_eq!(cfg.logbook.path, dir.path().join("logbook/ledger.jsonl"));
}

#[test]
fn edited_config_is_loaded() {
    let dir = tempdir().unwrap();
    fs::write(
        dir.path().join("config.toml"),
        r#"
        [[codes]]
        code = "ONLY"
        grant = 3
        tier = "SOLO"

        [storage]
        snapshot_path = "/var/tmp/chatpass-snapshot.json"
        "#,
    )
    .unwrap();
    let cfg = ensure_initialized_at(dir.path()).unwrap().config;
    assert_eq!(cfg.codes.len(), 1);
    assert_eq!(cfg.codes[0].grant, Uses::Limited(3));
    assert_eq!(
        cfg.storage.snapshot_path,
        std::path::PathBuf::from("/var/tmp/chatpass-snapshot.json")
    );
}

#[test]
fn cooldowns_beyond_timestamp_range_are_rejected() {
    let mut cfg = CoreConfig::default();
    cfg.codes.push(CodeDefinition {
        code: "FOREVER".to_string(),
        grant: Uses::Limited(1),
        tier: "X".to_string(),
        cooldown_ms: Some(MAX_COOLDOWN_MS + 1),
        description: String::new(),
    });
    assert!(cfg.validate().is_err());

    cfg.codes.last_mut().unwrap().cooldown_ms = Some(MAX_COOLDOWN_MS);
    assert!(cfg.validate().is_ok());

    cfg.tiers.push(RewardTier {
        label: "LEGEND".to_string(),
        score_threshold: 10_000,
        grant: 1,
        cooldown_ms: Some(u64::MAX),
    });
    assert!(cfg.validate().is_err());
}
