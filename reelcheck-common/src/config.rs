//! Configuration loading and resolution
//!
//! Config file resolution order:
//! 1. Command-line argument (highest priority)
//! 2. `REELCHECK_CONFIG` environment variable
//! 3. `<platform config dir>/reelcheck/config.toml`
//! 4. Compiled defaults (a missing file is not fatal)
//!
//! Environment overrides applied after the file is read:
//! - `REELCHECK_CHECKPOINT_DB` replaces `[checkpoint].database_path`
//! - `REELCHECK_SOURCES_ENABLED` (`0`/`1`) sets the master source switch

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable naming an explicit config file
pub const ENV_CONFIG_PATH: &str = "REELCHECK_CONFIG";
/// Environment variable overriding the checkpoint database path
pub const ENV_CHECKPOINT_DB: &str = "REELCHECK_CHECKPOINT_DB";
/// Environment variable overriding the master source switch
pub const ENV_SOURCES_ENABLED: &str = "REELCHECK_SOURCES_ENABLED";
/// Feature flag key of the master switch gating every comparison source
pub const MASTER_SWITCH_KEY: &str = "comparison_sources";

// ============================================================================
// Source configuration
// ============================================================================

/// Trust ranking of a source (Primary > Aggregator > Community > SignalOnly)
///
/// Serialized as its wire number 1-4.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum SourceTier {
    Primary,
    Aggregator,
    Community,
    SignalOnly,
}

impl SourceTier {
    /// Weight multiplier applied to this tier's results
    pub fn weight(self) -> f64 {
        match self {
            Self::Primary => 1.0,
            Self::Aggregator => 0.8,
            Self::Community => 0.6,
            Self::SignalOnly => 0.4,
        }
    }
}

impl TryFrom<u8> for SourceTier {
    type Error = String;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Primary),
            2 => Ok(Self::Aggregator),
            3 => Ok(Self::Community),
            4 => Ok(Self::SignalOnly),
            other => Err(format!("source tier must be 1-4, got {}", other)),
        }
    }
}

impl From<SourceTier> for u8 {
    fn from(tier: SourceTier) -> u8 {
        match tier {
            SourceTier::Primary => 1,
            SourceTier::Aggregator => 2,
            SourceTier::Community => 3,
            SourceTier::SignalOnly => 4,
        }
    }
}

/// Static description of one external source, read once at startup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceConfig {
    pub id: String,
    pub tier: SourceTier,
    #[serde(alias = "rate_limit_per_minute")]
    pub rate_limit_per_minute: u32,
    #[serde(alias = "cache_days", default = "default_cache_days")]
    pub cache_days: u32,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Per-source flag key (empty = `source_<id>`)
    #[serde(alias = "feature_flag_key", default)]
    pub feature_flag_key: String,
    /// How the adapter for this source is built (absent = registered in code)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adapter: Option<AdapterSettings>,
}

impl SourceConfig {
    pub fn new(id: impl Into<String>, tier: SourceTier, rate_limit_per_minute: u32) -> Self {
        let id = id.into();
        Self {
            feature_flag_key: format!("source_{}", id),
            id,
            tier,
            rate_limit_per_minute,
            cache_days: default_cache_days(),
            enabled: true,
            adapter: None,
        }
    }

    /// Minimum spacing between two requests to this source
    pub fn min_delay(&self) -> std::time::Duration {
        let rpm = u64::from(self.rate_limit_per_minute.max(1));
        std::time::Duration::from_millis(60_000 / rpm)
    }
}

/// Adapter construction settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AdapterSettings {
    /// Generic JSON-over-HTTP endpoint
    HttpJson {
        /// URL with `{primaryId}`, `{alternateId}`, `{title}`, `{year}` placeholders
        url_template: String,
        /// Environment variable holding an API key (substituted as `{apiKey}`)
        #[serde(default)]
        api_key_env: Option<String>,
        #[serde(default = "default_timeout_secs")]
        timeout_secs: u64,
        /// Requires a primary identifier in the query
        #[serde(default)]
        requires_primary_id: bool,
        fields: Vec<FieldMapping>,
    },
    /// Static JSON file of `entity key -> field -> signal`
    Fixture { path: PathBuf },
}

/// Maps one JSON pointer in a response to one typed signal field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldMapping {
    /// RFC 6901 pointer into the response body (e.g. `/ratings/critic`)
    pub pointer: String,
    /// Field name the signal is reported under
    pub field: String,
    pub signal: FieldSignal,
}

/// Signal construction rule for a mapped field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum FieldSignal {
    Numeric { scale: f64 },
    Boolean,
    Categorical {
        #[serde(default)]
        allowed: Vec<String>,
    },
    Bucket { levels: BTreeMap<String, f64> },
}

// ============================================================================
// Engine sections
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Execution controller knobs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionSettings {
    pub batch_size: usize,
    pub concurrency: usize,
    pub retry_attempts: u32,
    pub retry_delay_ms: u64,
    pub continue_on_error: bool,
}

impl Default for ExecutionSettings {
    fn default() -> Self {
        Self {
            batch_size: 10,
            concurrency: 3,
            retry_attempts: 3,
            retry_delay_ms: 1000,
            continue_on_error: true,
        }
    }
}

/// Consensus thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsensusSettings {
    pub acceptance_threshold: f64,
    pub high_confidence_threshold: f64,
    pub tie_epsilon: f64,
    pub min_signals: usize,
    /// Entities dated before this year get the era category vote
    pub category_era_cutoff: i32,
    /// Entities dated before this year default to the least restrictive level
    pub restriction_era_cutoff: i32,
}

impl Default for ConsensusSettings {
    fn default() -> Self {
        Self {
            acceptance_threshold: 0.35,
            high_confidence_threshold: 0.60,
            tie_epsilon: 0.05,
            min_signals: 1,
            category_era_cutoff: 1960,
            restriction_era_cutoff: 1980,
        }
    }
}

/// Anomaly detector thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnomalySettings {
    pub min_actor_age: i32,
    pub borderline_age_band: i32,
    pub slug_year_tolerance: i32,
    pub min_duration_minutes: i32,
    pub max_duration_minutes: i32,
    pub earliest_year: i32,
    pub max_rating: f64,
    pub array_overlap_threshold: f64,
    pub string_similarity_threshold: f64,
}

impl Default for AnomalySettings {
    fn default() -> Self {
        Self {
            min_actor_age: 16,
            borderline_age_band: 2,
            slug_year_tolerance: 2,
            min_duration_minutes: 40,
            max_duration_minutes: 300,
            earliest_year: 1888,
            max_rating: 10.0,
            array_overlap_threshold: 0.5,
            string_similarity_threshold: 0.6,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CheckpointSettings {
    /// SQLite file holding stage checkpoints (default: platform data dir)
    #[serde(default)]
    pub database_path: Option<PathBuf>,
}

/// Complete engine configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub execution: ExecutionSettings,
    #[serde(default)]
    pub consensus: ConsensusSettings,
    #[serde(default)]
    pub anomaly: AnomalySettings,
    #[serde(default)]
    pub checkpoint: CheckpointSettings,
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
    /// Initial feature-flag values (unset keys default to on)
    #[serde(default)]
    pub flags: BTreeMap<String, bool>,
}

impl EngineConfig {
    /// Parse and validate a TOML document
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let mut config: EngineConfig = toml::from_str(content)?;
        for source in &mut config.sources {
            if source.feature_flag_key.trim().is_empty() {
                source.feature_flag_key = format!("source_{}", source.id);
            }
        }
        config.validate()?;
        Ok(config)
    }

    /// Load from an explicit file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Read config {} failed: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    /// Resolve the config file by priority order, then apply env overrides
    ///
    /// An explicitly named file (CLI or env) must exist; the platform default
    /// may be absent, in which case compiled defaults are used.
    pub fn resolve(cli_arg: Option<&Path>) -> Result<Self> {
        let mut config = if let Some(path) = cli_arg {
            info!("Loading config from command line: {}", path.display());
            Self::load(path)?
        } else if let Ok(path) = std::env::var(ENV_CONFIG_PATH) {
            info!("Loading config from {}: {}", ENV_CONFIG_PATH, path);
            Self::load(Path::new(&path))?
        } else {
            match default_config_path() {
                Some(path) if path.exists() => {
                    info!("Loading config from {}", path.display());
                    Self::load(&path)?
                }
                _ => {
                    warn!("No config file found, using compiled defaults");
                    Self::default()
                }
            }
        };

        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Apply `REELCHECK_*` environment overrides
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(path) = std::env::var(ENV_CHECKPOINT_DB) {
            if !path.trim().is_empty() {
                self.checkpoint.database_path = Some(PathBuf::from(path));
            }
        }

        if let Ok(value) = std::env::var(ENV_SOURCES_ENABLED) {
            let enabled = match value.trim() {
                "1" | "true" | "on" => true,
                "0" | "false" | "off" => false,
                other => {
                    return Err(Error::Config(format!(
                        "{} must be 0 or 1, got '{}'",
                        ENV_SOURCES_ENABLED, other
                    )))
                }
            };
            self.flags.insert(MASTER_SWITCH_KEY.to_string(), enabled);
        }

        Ok(())
    }

    /// Validate cross-field constraints
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for source in &self.sources {
            if source.id.trim().is_empty() {
                return Err(Error::Config("Source id must not be empty".into()));
            }
            if !seen.insert(source.id.as_str()) {
                return Err(Error::Config(format!("Duplicate source id: {}", source.id)));
            }
            if source.rate_limit_per_minute == 0 {
                return Err(Error::Config(format!(
                    "Source {} must allow at least one request per minute",
                    source.id
                )));
            }
        }

        let c = &self.consensus;
        if c.acceptance_threshold > c.high_confidence_threshold {
            return Err(Error::Config(
                "consensus.acceptance_threshold must not exceed high_confidence_threshold".into(),
            ));
        }

        if self.execution.concurrency == 0 || self.execution.batch_size == 0 {
            return Err(Error::Config(
                "execution.concurrency and execution.batch_size must be at least 1".into(),
            ));
        }

        Ok(())
    }

    /// Checkpoint database path (configured or platform default)
    pub fn database_path(&self) -> PathBuf {
        self.checkpoint
            .database_path
            .clone()
            .unwrap_or_else(default_database_path)
    }
}

/// Platform config file location (`~/.config/reelcheck/config.toml` on Linux)
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("reelcheck").join("config.toml"))
}

/// Platform data location for the checkpoint database
pub fn default_database_path() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("reelcheck"))
        .unwrap_or_else(|| PathBuf::from("./reelcheck_data"))
        .join("checkpoints.db")
}

fn default_cache_days() -> u32 {
    7
}

fn default_true() -> bool {
    true
}

fn default_timeout_secs() -> u64 {
    15
}

fn default_log_level() -> String {
    "info".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_wire_values() {
        assert_eq!(SourceTier::try_from(1).unwrap(), SourceTier::Primary);
        assert_eq!(u8::from(SourceTier::SignalOnly), 4);
        assert!(SourceTier::try_from(5).is_err());
        assert!(SourceTier::Primary.weight() > SourceTier::Aggregator.weight());
        assert!(SourceTier::Community.weight() > SourceTier::SignalOnly.weight());
    }

    #[test]
    fn test_min_delay_from_rate_limit() {
        let source = SourceConfig::new("critics", SourceTier::Aggregator, 30);
        assert_eq!(source.min_delay(), std::time::Duration::from_secs(2));
        assert_eq!(source.feature_flag_key, "source_critics");
    }

    #[test]
    fn test_defaults_validate() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn test_duplicate_source_rejected() {
        let mut config = EngineConfig::default();
        config
            .sources
            .push(SourceConfig::new("a", SourceTier::Primary, 60));
        config
            .sources
            .push(SourceConfig::new("a", SourceTier::Community, 60));
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_zero_rate_limit_rejected() {
        let mut config = EngineConfig::default();
        config
            .sources
            .push(SourceConfig::new("a", SourceTier::Primary, 0));
        assert!(config.validate().is_err());
    }
}
