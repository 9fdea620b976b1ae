//! Restriction level consensus
//!
//! Every rule proposes a level and the running proposal only moves up:
//! `safe_upgrade(current, proposed) = max(current, proposed)`. Evaluation order
//! therefore never changes the outcome.
//!
//! Rules, in evaluation order:
//! 1. Content flags: mild/moderate → U/A, strong → A, extreme → S
//!    (sexual content at moderate intensity → A)
//! 2. Warning keywords in synopsis / content-warning text
//! 3. Category membership (Horror, Crime, Thriller → U/A)
//! 4. Family-safe marker resets to U only when nothing above fired
//! 5. Era default (U) only when nothing above fired

use super::category::Category;
use super::{contains_phrase, words};
use crate::types::{ContentFlag, ContentKind, Intensity, MovieRecord};
use reelcheck_common::config::ConsensusSettings;
use reelcheck_common::{ConfidenceTier, RestrictionLevel};
use serde::{Deserialize, Serialize};
use tracing::debug;

const PARENTAL_KEYWORDS: [&str; 6] = ["violence", "blood", "smoking", "alcohol", "scary", "fight"];
const ADULT_KEYWORDS: [&str; 6] = [
    "gore",
    "nudity",
    "explicit",
    "graphic violence",
    "sexual",
    "drug abuse",
];

/// What raised the level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndicatorKind {
    ContentFlag,
    Keyword,
    Category,
}

/// One restricting indicator that fired
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestrictionIndicator {
    pub kind: IndicatorKind,
    pub level: RestrictionLevel,
    pub detail: String,
}

/// Derived restriction level
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestrictionResult {
    pub level: RestrictionLevel,
    pub confidence: ConfidenceTier,
    pub indicators: Vec<RestrictionIndicator>,
    pub reason: String,
    pub review_reason: Option<String>,
}

/// Level proposed by one content flag
pub fn flag_level(flag: &ContentFlag) -> RestrictionLevel {
    match (flag.kind, flag.intensity) {
        (_, Intensity::Extreme) => RestrictionLevel::Restricted,
        (_, Intensity::Strong) => RestrictionLevel::Adult,
        (ContentKind::SexualContent, Intensity::Moderate) => RestrictionLevel::Adult,
        (_, Intensity::Moderate) | (_, Intensity::Mild) => RestrictionLevel::ParentalGuidance,
    }
}

/// Level proposed by category membership, if any
pub fn category_level(category: Category) -> Option<RestrictionLevel> {
    match category {
        Category::Horror | Category::Crime | Category::Thriller => {
            Some(RestrictionLevel::ParentalGuidance)
        }
        Category::Action
        | Category::Drama
        | Category::Comedy
        | Category::Romance
        | Category::Family
        | Category::Fantasy
        | Category::Documentary => None,
    }
}

#[derive(Debug, Clone)]
pub struct RestrictionEngine {
    era_cutoff: i32,
}

impl Default for RestrictionEngine {
    fn default() -> Self {
        Self::new(&ConsensusSettings::default())
    }
}

impl RestrictionEngine {
    pub fn new(settings: &ConsensusSettings) -> Self {
        Self {
            era_cutoff: settings.restriction_era_cutoff,
        }
    }

    /// Indicators firing for this row
    ///
    /// `primary` is the classified category, if one was derived; the row's own
    /// genre tags are also consulted.
    pub fn indicators(&self, record: &MovieRecord, primary: Option<Category>) -> Vec<RestrictionIndicator> {
        let mut indicators = Vec::new();

        for flag in &record.content_flags {
            indicators.push(RestrictionIndicator {
                kind: IndicatorKind::ContentFlag,
                level: flag_level(flag),
                detail: format!("{:?} ({:?})", flag.kind, flag.intensity).to_lowercase(),
            });
        }

        let text: Vec<String> = [record.synopsis.as_deref(), record.content_warnings.as_deref()]
            .into_iter()
            .flatten()
            .flat_map(words)
            .collect();
        let keyword_lists = [
            (&ADULT_KEYWORDS[..], RestrictionLevel::Adult),
            (&PARENTAL_KEYWORDS[..], RestrictionLevel::ParentalGuidance),
        ];
        for (keywords, level) in keyword_lists {
            for keyword in keywords.iter().filter(|k| contains_phrase(&text, k)) {
                indicators.push(RestrictionIndicator {
                    kind: IndicatorKind::Keyword,
                    level,
                    detail: (*keyword).to_string(),
                });
            }
        }

        let mut categories: Vec<Category> = record
            .genres
            .iter()
            .filter_map(|g| Category::from_genre(g))
            .chain(primary)
            .collect();
        categories.sort();
        categories.dedup();
        for category in categories {
            if let Some(level) = category_level(category) {
                indicators.push(RestrictionIndicator {
                    kind: IndicatorKind::Category,
                    level,
                    detail: category.as_str().to_string(),
                });
            }
        }

        indicators
    }

    /// Derive the restriction level for a row
    pub fn derive(&self, record: &MovieRecord, primary: Option<Category>) -> RestrictionResult {
        let indicators = self.indicators(record, primary);

        if indicators.is_empty() {
            let result = if record.family_safe {
                RestrictionResult {
                    level: RestrictionLevel::Universal,
                    confidence: ConfidenceTier::Medium,
                    indicators,
                    reason: "family-safe".to_string(),
                    review_reason: None,
                }
            } else if record.year.is_some_and(|y| y < self.era_cutoff) {
                RestrictionResult {
                    level: RestrictionLevel::Universal,
                    confidence: ConfidenceTier::Medium,
                    indicators,
                    reason: "era default".to_string(),
                    review_reason: None,
                }
            } else {
                RestrictionResult {
                    level: RestrictionLevel::Universal,
                    confidence: ConfidenceTier::Low,
                    indicators,
                    reason: "no restriction indicators".to_string(),
                    review_reason: Some("no content information, verify restriction".to_string()),
                }
            };
            debug!(entity_id = %record.id, level = %result.level, reason = %result.reason, "Restriction derived");
            return result;
        }

        let level = indicators
            .iter()
            .fold(RestrictionLevel::Universal, |current, i| {
                RestrictionLevel::safe_upgrade(current, i.level)
            });
        let confidence = if indicators.iter().any(|i| i.kind == IndicatorKind::ContentFlag) {
            ConfidenceTier::High
        } else {
            ConfidenceTier::Medium
        };
        let decisive: Vec<&str> = indicators
            .iter()
            .filter(|i| i.level == level)
            .map(|i| i.detail.as_str())
            .collect();
        let mut reason = format!("raised to {} by {}", level, decisive.join(", "));
        if record.family_safe {
            reason.push_str("; family-safe marker ignored");
        }

        debug!(
            entity_id = %record.id,
            %level,
            %confidence,
            indicators = indicators.len(),
            "Restriction derived"
        );

        RestrictionResult {
            level,
            confidence,
            indicators,
            reason,
            review_reason: None,
        }
    }
}
