//! Core Types for reelcheck
//!
//! Defines the data contracts shared by the validation layers:
//! - **Query**: what adapters are asked about (`MovieQuery`)
//! - **Row**: the stored entity fields consensus and anomaly checks read (`MovieRecord`)
//! - **Result**: one adapter's answer (`ComparisonResult`) and its failure taxonomy (`FetchError`)

use chrono::{DateTime, Utc};
use reelcheck_common::config::SourceTier;
use reelcheck_common::Signal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Field name → signal, ordered for stable output
pub type SignalMap = BTreeMap<String, Signal>;

// ============================================================================
// Query contract
// ============================================================================

/// Optional hints narrowing a query
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub genres: Option<Vec<String>>,
}

/// What adapters are asked about
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MovieQuery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alternate_id: Option<String>,
    pub title: String,
    pub year: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub director: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lead_actor: Option<String>,
    #[serde(default)]
    pub context: QueryContext,
}

impl MovieQuery {
    pub fn new(title: impl Into<String>, year: i32) -> Self {
        Self {
            primary_id: None,
            alternate_id: None,
            title: title.into(),
            year,
            director: None,
            lead_actor: None,
            context: QueryContext::default(),
        }
    }

    pub fn with_primary_id(mut self, id: impl Into<String>) -> Self {
        self.primary_id = Some(id.into());
        self
    }

    pub fn with_alternate_id(mut self, id: impl Into<String>) -> Self {
        self.alternate_id = Some(id.into());
        self
    }

    /// Cache/identity key: primary id, else alternate id, else `title:year`
    pub fn entity_key(&self) -> String {
        if let Some(id) = self.primary_id.as_deref().filter(|s| !s.trim().is_empty()) {
            return id.trim().to_string();
        }
        if let Some(id) = self.alternate_id.as_deref().filter(|s| !s.trim().is_empty()) {
            return id.trim().to_string();
        }
        let title = self
            .title
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase();
        format!("{}:{}", title, self.year)
    }
}

// ============================================================================
// Stored row
// ============================================================================

/// Intensity of a content flag
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Intensity {
    Mild,
    Moderate,
    Strong,
    Extreme,
}

/// Kind of content a flag describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    Violence,
    SexualContent,
    Language,
    SubstanceUse,
    Frightening,
}

/// Explicit content flag on an entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentFlag {
    pub kind: ContentKind,
    pub intensity: Intensity,
}

/// The stored fields of one movie entity that derivations read
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MovieRecord {
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub year: Option<i32>,
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    pub duration_minutes: Option<i32>,
    #[serde(default)]
    pub rating: Option<f64>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub genres: Vec<String>,
    #[serde(default)]
    pub mood_tags: Vec<String>,
    #[serde(default)]
    pub synopsis: Option<String>,
    #[serde(default)]
    pub content_warnings: Option<String>,
    #[serde(default)]
    pub director: Option<String>,
    #[serde(default)]
    pub lead_actor: Option<String>,
    /// Audience-fit flag: suitable for children
    #[serde(default)]
    pub kids_fit: bool,
    /// Explicit family-safe marker
    #[serde(default)]
    pub family_safe: bool,
    #[serde(default)]
    pub content_flags: Vec<ContentFlag>,
}

impl MovieRecord {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }
}

// ============================================================================
// Adapter results
// ============================================================================

/// Adapter-boundary failure taxonomy
///
/// Never crosses the adapter boundary as an error value: `adapters::fetch`
/// converts it into a failed `ComparisonResult`.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FetchError {
    /// Feature flag or master switch off
    #[error("Source disabled: {0}")]
    Disabled(String),

    /// Required credential not configured
    #[error("Missing credentials: {0}")]
    MissingCredentials(String),

    /// Network communication error
    #[error("Network error: {0}")]
    Network(String),

    /// Request timed out
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Non-2xx response
    #[error("HTTP status {0}")]
    Status(u16),

    /// Response could not be interpreted
    #[error("Parse error: {0}")]
    Parse(String),

    /// Source has no data for this query
    #[error("Not available: {0}")]
    NotAvailable(String),
}

impl FetchError {
    /// Configuration problems are not retried; transport problems are
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network(_) | Self::Timeout(_) => true,
            Self::Status(code) => *code == 429 || *code >= 500,
            Self::Disabled(_)
            | Self::MissingCredentials(_)
            | Self::Parse(_)
            | Self::NotAvailable(_) => false,
        }
    }
}

/// One adapter's answer for one query; never mutated after construction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComparisonResult {
    pub source_id: String,
    pub tier: SourceTier,
    pub success: bool,
    pub signals: SignalMap,
    /// How much was found (0.0-1.0)
    pub signal_strength: f64,
    /// Tier weight × signal strength
    pub confidence_weight: f64,
    pub fetched_at: DateTime<Utc>,
    pub from_cache: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Whether a retry could change the outcome
    #[serde(default)]
    pub retryable: bool,
}

impl ComparisonResult {
    /// Successful result; strength is `signals / expected_fields` capped at 1.0
    pub fn succeeded(
        source_id: impl Into<String>,
        tier: SourceTier,
        signals: SignalMap,
        expected_fields: usize,
    ) -> Self {
        let expected = expected_fields.max(1) as f64;
        let signal_strength = (signals.len() as f64 / expected).min(1.0);
        Self {
            source_id: source_id.into(),
            tier,
            success: true,
            signals,
            signal_strength,
            confidence_weight: tier.weight() * signal_strength,
            fetched_at: Utc::now(),
            from_cache: false,
            error: None,
            retryable: false,
        }
    }

    /// Structured failure result
    pub fn failed(source_id: impl Into<String>, tier: SourceTier, error: &FetchError) -> Self {
        Self {
            source_id: source_id.into(),
            tier,
            success: false,
            signals: SignalMap::new(),
            signal_strength: 0.0,
            confidence_weight: 0.0,
            fetched_at: Utc::now(),
            from_cache: false,
            error: Some(error.to_string()),
            retryable: error.is_retryable(),
        }
    }

    /// Copy flagged as served from cache
    pub fn as_cached(&self) -> Self {
        Self {
            from_cache: true,
            ..self.clone()
        }
    }
}
