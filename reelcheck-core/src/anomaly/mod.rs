//! Anomaly Detector
//!
//! Pure, stateless plausibility and cross-field consistency checks. Each check
//! returns zero or one `AnomalyFlag`; flags are surfaced in reports and never
//! stored as entity state.
//!
//! # Checks
//! 1. **Age plausibility** - person birth year vs entity year
//! 2. **Slug/year consistency** - year encoded in the slug vs stored year (auto-fixable)
//! 3. **Numeric plausibility** - duration, year window, rating scale
//! 4. **Source conflict** - set overlap (arrays) or bigram similarity (strings)
//! 5. **Missing required** - title, year, genre, language
//!
//! `run_all_anomaly_checks` runs every applicable check; any HIGH or CRITICAL
//! flag means the entity needs review.

pub mod similarity;

use crate::types::MovieRecord;
use reelcheck_common::config::AnomalySettings;
use reelcheck_common::time::current_year;
use reelcheck_common::Severity;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AnomalyType {
    PersonBornAfterRelease,
    ActorTooYoung,
    ActorAgeBorderline,
    SlugYearMismatch,
    DurationImplausible,
    YearOutOfRange,
    RatingOutOfRange,
    SourceConflict,
    MissingRequiredField,
}

/// One finding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnomalyFlag {
    #[serde(rename = "type")]
    pub anomaly_type: AnomalyType,
    pub severity: Severity,
    pub field: String,
    pub message: String,
    pub suggested_action: String,
    pub auto_fixable: bool,
    /// Offending values, keyed by source or field
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub values: BTreeMap<String, Value>,
}

impl AnomalyFlag {
    fn new(
        anomaly_type: AnomalyType,
        severity: Severity,
        field: &str,
        message: String,
        suggested_action: impl Into<String>,
    ) -> Self {
        Self {
            anomaly_type,
            severity,
            field: field.to_string(),
            message,
            suggested_action: suggested_action.into(),
            auto_fixable: false,
            values: BTreeMap::new(),
        }
    }

    fn auto_fixable(mut self) -> Self {
        self.auto_fixable = true;
        self
    }

    fn with_value(mut self, key: impl Into<String>, value: Value) -> Self {
        self.values.insert(key.into(), value);
        self
    }
}

/// Person attached to an entity with a known birth year
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CastMember {
    pub name: String,
    pub birth_year: i32,
}

/// A field value as reported by one source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Text(String),
    List(Vec<String>),
}

impl FieldValue {
    fn to_json(&self) -> Value {
        match self {
            Self::Text(s) => json!(s),
            Self::List(items) => json!(items),
        }
    }
}

/// Two sources' values for the same field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldComparison {
    pub field: String,
    pub left_source: String,
    pub left: FieldValue,
    pub right_source: String,
    pub right: FieldValue,
}

/// Everything `run_all_anomaly_checks` may look at
#[derive(Debug, Clone, Default)]
pub struct AnomalyInput<'a> {
    pub cast: &'a [CastMember],
    pub comparisons: &'a [FieldComparison],
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnomalyReport {
    pub entity_id: String,
    pub flags: Vec<AnomalyFlag>,
    pub needs_review: bool,
}

impl AnomalyReport {
    pub fn highest_severity(&self) -> Option<Severity> {
        self.flags.iter().map(|f| f.severity).max()
    }
}

/// Threshold-carrying check set
#[derive(Debug, Clone)]
pub struct AnomalyDetector {
    settings: AnomalySettings,
    current_year: i32,
}

impl Default for AnomalyDetector {
    fn default() -> Self {
        Self::new(AnomalySettings::default())
    }
}

impl AnomalyDetector {
    pub fn new(settings: AnomalySettings) -> Self {
        Self {
            settings,
            current_year: current_year(),
        }
    }

    /// Pin the "current year" used by the year window check
    pub fn with_current_year(mut self, year: i32) -> Self {
        self.current_year = year;
        self
    }

    /// Age of a person at release
    pub fn check_person_age(&self, person: &CastMember, entity_year: i32) -> Option<AnomalyFlag> {
        let Some(age) = entity_year.checked_sub(person.birth_year) else {
            return Some(
                AnomalyFlag::new(
                    AnomalyType::YearOutOfRange,
                    Severity::High,
                    "cast",
                    format!(
                        "age of {} not computable from birth year {} and year {}",
                        person.name, person.birth_year, entity_year
                    ),
                    "Correct the birth year or the release year",
                )
                .with_value("birthYear", json!(person.birth_year))
                .with_value("year", json!(entity_year)),
            );
        };
        let min = self.settings.min_actor_age;
        let flag = if age < 0 {
            AnomalyFlag::new(
                AnomalyType::PersonBornAfterRelease,
                Severity::Critical,
                "cast",
                format!(
                    "{} born {} after release year {}",
                    person.name, person.birth_year, entity_year
                ),
                "Verify the person match; likely a different person with the same name",
            )
        } else if age < min {
            AnomalyFlag::new(
                AnomalyType::ActorTooYoung,
                Severity::High,
                "cast",
                format!("{} would have been {} in {}", person.name, age, entity_year),
                "Verify cast credit and release year",
            )
        } else if age <= min.saturating_add(self.settings.borderline_age_band) {
            AnomalyFlag::new(
                AnomalyType::ActorAgeBorderline,
                Severity::Low,
                "cast",
                format!("{} was {} in {}", person.name, age, entity_year),
                "No action needed unless the role is an adult lead",
            )
        } else {
            return None;
        };
        Some(
            flag.with_value("birthYear", json!(person.birth_year))
                .with_value("age", json!(age)),
        )
    }

    /// Year encoded in the slug vs the stored year
    pub fn check_slug_year(&self, slug: &str, year: i32) -> Option<AnomalyFlag> {
        let slug_year = slug_year(slug)?;
        let delta = slug_year.abs_diff(year);
        if delta == 0 {
            return None;
        }
        let severity = if delta <= self.settings.slug_year_tolerance.max(0) as u32 {
            Severity::Medium
        } else {
            Severity::High
        };
        Some(
            AnomalyFlag::new(
                AnomalyType::SlugYearMismatch,
                severity,
                "slug",
                format!("slug '{}' encodes {} but year is {}", slug, slug_year, year),
                format!("Regenerate slug with year {}", year),
            )
            .auto_fixable()
            .with_value("slugYear", json!(slug_year))
            .with_value("year", json!(year)),
        )
    }

    pub fn check_duration(&self, minutes: i32) -> Option<AnomalyFlag> {
        let (min, max) = (
            self.settings.min_duration_minutes,
            self.settings.max_duration_minutes,
        );
        let severity = if minutes <= 0 {
            Severity::High
        } else if minutes < min || minutes > max {
            Severity::Medium
        } else {
            return None;
        };
        Some(
            AnomalyFlag::new(
                AnomalyType::DurationImplausible,
                severity,
                "duration",
                format!("duration {} min outside {}..={}", minutes, min, max),
                "Check runtime against a primary source",
            )
            .with_value("duration", json!(minutes)),
        )
    }

    pub fn check_year(&self, year: i32) -> Option<AnomalyFlag> {
        let earliest = self.settings.earliest_year;
        if (earliest..=self.current_year).contains(&year) {
            return None;
        }
        Some(
            AnomalyFlag::new(
                AnomalyType::YearOutOfRange,
                Severity::High,
                "year",
                format!("year {} outside {}..={}", year, earliest, self.current_year),
                "Correct the release year",
            )
            .with_value("year", json!(year)),
        )
    }

    pub fn check_rating(&self, rating: f64) -> Option<AnomalyFlag> {
        let max = self.settings.max_rating;
        if rating.is_finite() && (0.0..=max).contains(&rating) {
            return None;
        }
        Some(
            AnomalyFlag::new(
                AnomalyType::RatingOutOfRange,
                Severity::High,
                "rating",
                format!("rating {} outside 0..={}", rating, max),
                "Check the rating scale of the source",
            )
            .with_value("rating", json!(rating)),
        )
    }

    /// Two sources disagreeing on one field
    pub fn check_source_conflict(&self, comparison: &FieldComparison) -> Option<AnomalyFlag> {
        let (similarity, threshold) = match (&comparison.left, &comparison.right) {
            (FieldValue::Text(a), FieldValue::Text(b)) => (
                similarity::text_similarity(a, b),
                self.settings.string_similarity_threshold,
            ),
            (left, right) => (
                similarity::set_overlap(&as_list(left), &as_list(right)),
                self.settings.array_overlap_threshold,
            ),
        };
        if similarity >= threshold {
            return None;
        }
        Some(
            AnomalyFlag::new(
                AnomalyType::SourceConflict,
                Severity::Medium,
                &comparison.field,
                format!(
                    "{} and {} disagree on {} (similarity {:.2})",
                    comparison.left_source, comparison.right_source, comparison.field, similarity
                ),
                "Compare both values manually",
            )
            .with_value(comparison.left_source.clone(), comparison.left.to_json())
            .with_value(comparison.right_source.clone(), comparison.right.to_json()),
        )
    }

    /// One HIGH flag per missing required field
    pub fn check_required_fields(&self, record: &MovieRecord) -> Vec<AnomalyFlag> {
        let blank = |s: &Option<String>| s.as_deref().map_or(true, |v| v.trim().is_empty());
        let mut missing = Vec::new();
        if blank(&record.title) {
            missing.push("title");
        }
        if record.year.is_none() {
            missing.push("year");
        }
        if record.genres.iter().all(|g| g.trim().is_empty()) {
            missing.push("genre");
        }
        if blank(&record.language) {
            missing.push("language");
        }

        missing
            .into_iter()
            .map(|field| {
                AnomalyFlag::new(
                    AnomalyType::MissingRequiredField,
                    Severity::High,
                    field,
                    format!("required field '{}' is empty", field),
                    format!("Fill '{}' before publishing", field),
                )
            })
            .collect()
    }

    /// Run every check the available data allows
    pub fn run_all_anomaly_checks(&self, record: &MovieRecord, input: &AnomalyInput<'_>) -> AnomalyReport {
        let mut flags = self.check_required_fields(record);

        if let Some(year) = record.year {
            flags.extend(self.check_year(year));
            if let Some(slug) = record.slug.as_deref() {
                flags.extend(self.check_slug_year(slug, year));
            }
            for person in input.cast {
                flags.extend(self.check_person_age(person, year));
            }
        }
        if let Some(duration) = record.duration_minutes {
            flags.extend(self.check_duration(duration));
        }
        if let Some(rating) = record.rating {
            flags.extend(self.check_rating(rating));
        }
        for comparison in input.comparisons {
            flags.extend(self.check_source_conflict(comparison));
        }

        let needs_review = flags.iter().any(|f| f.severity.requires_review());
        debug!(
            entity_id = %record.id,
            flags = flags.len(),
            needs_review,
            "Anomaly checks complete"
        );

        AnomalyReport {
            entity_id: record.id.clone(),
            flags,
            needs_review,
        }
    }
}

fn as_list(value: &FieldValue) -> Vec<String> {
    match value {
        FieldValue::Text(s) => vec![s.clone()],
        FieldValue::List(items) => items.clone(),
    }
}

/// Last 4-digit run in the slug that looks like a year
fn slug_year(slug: &str) -> Option<i32> {
    slug.split(|c: char| !c.is_ascii_digit())
        .filter(|part| part.len() == 4)
        .filter_map(|part| part.parse::<i32>().ok())
        .filter(|y| (1800..=2200).contains(y))
        .last()
}
