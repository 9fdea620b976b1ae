//! Integration tests for configuration loading and resolution
//!
//! Tests that manipulate REELCHECK_* environment variables are marked with
//! #[serial] so they run sequentially, not in parallel.

use reelcheck_common::config::{
    AdapterSettings, EngineConfig, FieldSignal, SourceTier, ENV_CHECKPOINT_DB, ENV_CONFIG_PATH,
    ENV_SOURCES_ENABLED, MASTER_SWITCH_KEY,
};
use serial_test::serial;
use std::env;
use std::path::PathBuf;
use tempfile::TempDir;

const SAMPLE: &str = r#"
[logging]
level = "debug"

[execution]
batch_size = 5
concurrency = 2

[consensus]
acceptance_threshold = 0.30

[flags]
source_fanforum = false

[[sources]]
id = "critics"
tier = 2
rateLimitPerMinute = 30
cacheDays = 3
featureFlagKey = "source_critics"

[sources.adapter]
kind = "http_json"
url_template = "https://ratings.example/{primaryId}?key={apiKey}"
api_key_env = "CRITICS_KEY"

[[sources.adapter.fields]]
pointer = "/score"
field = "critic_rating"
signal = { kind = "numeric", scale = 10.0 }

[[sources]]
id = "fanforum"
tier = 3
rate_limit_per_minute = 10
"#;

fn clear_env() {
    env::remove_var(ENV_CONFIG_PATH);
    env::remove_var(ENV_CHECKPOINT_DB);
    env::remove_var(ENV_SOURCES_ENABLED);
}

#[test]
fn test_parse_full_document() {
    let config = EngineConfig::from_toml_str(SAMPLE).unwrap();

    assert_eq!(config.logging.level, "debug");
    assert_eq!(config.execution.batch_size, 5);
    assert_eq!(config.execution.concurrency, 2);
    // Unspecified fields keep defaults
    assert_eq!(config.execution.retry_attempts, 3);
    assert!((config.consensus.acceptance_threshold - 0.30).abs() < 1e-9);
    assert!((config.consensus.high_confidence_threshold - 0.60).abs() < 1e-9);

    assert_eq!(config.sources.len(), 2);
    let critics = &config.sources[0];
    assert_eq!(critics.tier, SourceTier::Aggregator);
    assert_eq!(critics.cache_days, 3);
    assert!(critics.enabled);
    match critics.adapter.as_ref().unwrap() {
        AdapterSettings::HttpJson { fields, timeout_secs, .. } => {
            assert_eq!(*timeout_secs, 15);
            assert_eq!(fields[0].field, "critic_rating");
            assert_eq!(fields[0].signal, FieldSignal::Numeric { scale: 10.0 });
        }
        other => panic!("unexpected adapter settings: {:?}", other),
    }

    // snake_case aliases accepted
    let fanforum = &config.sources[1];
    assert_eq!(fanforum.rate_limit_per_minute, 10);
    assert_eq!(fanforum.cache_days, 7);
    assert_eq!(fanforum.feature_flag_key, "source_fanforum");
    assert_eq!(config.flags.get("source_fanforum"), Some(&false));
}

#[test]
fn test_invalid_tier_rejected() {
    let doc = r#"
[[sources]]
id = "x"
tier = 9
rateLimitPerMinute = 10
featureFlagKey = "source_x"
"#;
    assert!(EngineConfig::from_toml_str(doc).is_err());
}

#[test]
#[serial]
fn test_resolve_prefers_cli_argument() {
    clear_env();
    let dir = TempDir::new().unwrap();
    let cli_path = dir.path().join("cli.toml");
    let env_path = dir.path().join("env.toml");
    std::fs::write(&cli_path, "[logging]\nlevel = \"trace\"\n").unwrap();
    std::fs::write(&env_path, "[logging]\nlevel = \"warn\"\n").unwrap();

    env::set_var(ENV_CONFIG_PATH, &env_path);
    let config = EngineConfig::resolve(Some(&cli_path)).unwrap();
    assert_eq!(config.logging.level, "trace");

    let config = EngineConfig::resolve(None).unwrap();
    assert_eq!(config.logging.level, "warn");
    clear_env();
}

#[test]
#[serial]
fn test_resolve_missing_explicit_file_is_error() {
    clear_env();
    let dir = TempDir::new().unwrap();
    let missing = dir.path().join("nope.toml");
    assert!(EngineConfig::resolve(Some(&missing)).is_err());
}

#[test]
#[serial]
fn test_env_overrides() {
    clear_env();
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("c.toml");
    std::fs::write(&path, SAMPLE).unwrap();

    env::set_var(ENV_CHECKPOINT_DB, "/tmp/reelcheck-test.db");
    env::set_var(ENV_SOURCES_ENABLED, "0");
    let config = EngineConfig::resolve(Some(&path)).unwrap();
    assert_eq!(
        config.database_path(),
        PathBuf::from("/tmp/reelcheck-test.db")
    );
    assert_eq!(config.flags.get(MASTER_SWITCH_KEY), Some(&false));

    env::set_var(ENV_SOURCES_ENABLED, "maybe");
    assert!(EngineConfig::resolve(Some(&path)).is_err());
    clear_env();
}
