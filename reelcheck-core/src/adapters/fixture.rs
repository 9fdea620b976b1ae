//! Static signal table adapter
//!
//! Answers from a JSON document shaped as
//! `{ "<entity key>": { "<field>": <signal>, ... }, ... }`, using the signal
//! wire shape. Used for offline runs and tests.

use super::SourceAdapter;
use crate::types::{FetchError, MovieQuery, SignalMap};
use async_trait::async_trait;
use reelcheck_common::config::SourceConfig;
use reelcheck_common::{Error, Result};
use std::collections::HashMap;
use std::path::Path;

pub struct FixtureAdapter {
    config: SourceConfig,
    table: HashMap<String, SignalMap>,
    expected: usize,
}

impl FixtureAdapter {
    pub fn new(config: SourceConfig, table: HashMap<String, SignalMap>) -> Self {
        let expected = table.values().map(|s| s.len()).max().unwrap_or(1).max(1);
        Self {
            config,
            table,
            expected,
        }
    }

    pub fn from_json(config: SourceConfig, json: &str) -> Result<Self> {
        let table: HashMap<String, SignalMap> = serde_json::from_str(json)?;
        Ok(Self::new(config, table))
    }

    pub fn from_file(config: SourceConfig, path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!(
                "Read fixture {} for source {} failed: {}",
                path.display(),
                config.id,
                e
            ))
        })?;
        Self::from_json(config, &json)
    }

    /// Override the expected field count (defaults to the widest entry)
    pub fn with_expected_fields(mut self, expected: usize) -> Self {
        self.expected = expected.max(1);
        self
    }
}

#[async_trait]
impl SourceAdapter for FixtureAdapter {
    fn config(&self) -> &SourceConfig {
        &self.config
    }

    fn expected_fields(&self) -> usize {
        self.expected
    }

    fn can_handle(&self, query: &MovieQuery) -> bool {
        self.table.contains_key(&query.entity_key())
    }

    async fn fetch_signals(&self, query: &MovieQuery) -> std::result::Result<SignalMap, FetchError> {
        self.table
            .get(&query.entity_key())
            .cloned()
            .ok_or_else(|| FetchError::NotAvailable(query.entity_key()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reelcheck_common::config::SourceTier;

    const TABLE: &str = r#"{
        "tt0073707": {
            "critic_rating": { "type": "numeric", "value": 82.0, "rawValue": 8.2, "scale": 10.0 },
            "kids_fit": { "type": "boolean", "value": false }
        },
        "anand:1971": {
            "critic_rating": { "type": "numeric", "value": 88.0, "rawValue": 8.8, "scale": 10.0 }
        }
    }"#;

    fn fixture() -> FixtureAdapter {
        FixtureAdapter::from_json(SourceConfig::new("offline", SourceTier::Community, 60), TABLE).unwrap()
    }

    #[tokio::test]
    async fn test_lookup_by_entity_key() {
        let adapter = fixture();
        assert_eq!(adapter.expected_fields(), 2);

        let by_id = MovieQuery::new("Sholay", 1975).with_primary_id("tt0073707");
        assert!(adapter.can_handle(&by_id));
        assert_eq!(adapter.fetch_signals(&by_id).await.unwrap().len(), 2);

        let by_title = MovieQuery::new("Anand", 1971);
        assert!(adapter.can_handle(&by_title));
        assert!(adapter.fetch_signals(&by_title).await.is_ok());
    }

    #[tokio::test]
    async fn test_unknown_entity() {
        let adapter = fixture();
        let q = MovieQuery::new("Unknown", 2001);
        assert!(!adapter.can_handle(&q));
        assert!(matches!(
            adapter.fetch_signals(&q).await,
            Err(FetchError::NotAvailable(_))
        ));
    }

    #[test]
    fn test_invalid_json_rejected() {
        let config = SourceConfig::new("offline", SourceTier::Community, 60);
        assert!(FixtureAdapter::from_json(config, "{ not json").is_err());
    }
}
