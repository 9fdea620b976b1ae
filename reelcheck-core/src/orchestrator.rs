//! Comparison Orchestrator
//!
//! Fans a query out to every applicable adapter through the execution
//! controller, then folds the results into one `AggregatedComparison`.
//!
//! # Aggregation rules
//! 1. **Conflicts** - rating/score fields are compared under one canonical
//!    `rating` key whatever each source calls them (a source reporting several
//!    is averaged); a normalized spread above 30 points across two or more
//!    sources is a conflict (`high` above 50)
//! 2. **Adjustment** - +0.10 with ≥2 agreeing successes (+0.15 with ≥3), minus
//!    0.15/0.08/0.03 per high/medium/low conflict, clamped to ±0.2
//! 3. **Alignment** - (successful − conflicting) / successful, 0 when none succeeded
//! 4. **Review** - any high conflict, two or more conflicts, or adjustment below −0.1
//!
//! The aggregation is an audit record; it is recomputed on every fetch and is
//! never the stored source of truth.

use crate::adapters::{fetch, AdapterRegistry, SourceAdapter};
use crate::context::SourceContext;
use crate::execution::{ExecutionConfig, ExecutionController};
use crate::types::{ComparisonResult, MovieQuery};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

/// Normalized spread above which two rating signals conflict
pub const CONFLICT_SPREAD: f64 = 30.0;
/// Spread above which a conflict is high severity
pub const HIGH_CONFLICT_SPREAD: f64 = 50.0;
/// Bound on the confidence adjustment
pub const MAX_ADJUSTMENT: f64 = 0.2;
/// Canonical field every rating/score signal is compared under
pub const RATING_FIELD: &str = "rating";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictSeverity {
    Low,
    Medium,
    High,
}

impl ConflictSeverity {
    fn penalty(self) -> f64 {
        match self {
            Self::High => 0.15,
            Self::Medium => 0.08,
            Self::Low => 0.03,
        }
    }
}

/// Disagreement between sources on one field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldConflict {
    pub field: String,
    /// Holders of the lowest and highest value
    pub sources: Vec<String>,
    pub severity: ConflictSeverity,
    pub spread: f64,
    /// Normalized value per reporting source
    pub values: BTreeMap<String, f64>,
}

/// All results for one entity folded into a reviewable verdict
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatedComparison {
    pub entity_key: String,
    pub results: Vec<ComparisonResult>,
    pub successful_sources: usize,
    pub conflicts: Vec<FieldConflict>,
    pub alignment_score: f64,
    pub confidence_adjustment: f64,
    pub needs_review: bool,
    pub aggregated_at: DateTime<Utc>,
}

impl AggregatedComparison {
    /// Successful result of one source, if any
    pub fn result_for(&self, source_id: &str) -> Option<&ComparisonResult> {
        self.results
            .iter()
            .find(|r| r.success && r.source_id == source_id)
    }
}

/// Comparison key for a source field (`imdb_rating`, `critic_score` → `rating`)
pub fn canonical_field(field: &str) -> Option<&'static str> {
    let field = field.to_ascii_lowercase();
    if field.contains("rating") || field.contains("score") {
        Some(RATING_FIELD)
    } else {
        None
    }
}

/// Rating/score conflicts across successful results
pub fn detect_conflicts(results: &[ComparisonResult]) -> Vec<FieldConflict> {
    // canonical field -> source -> (sum, count)
    let mut sums: BTreeMap<&str, BTreeMap<String, (f64, usize)>> = BTreeMap::new();
    for result in results.iter().filter(|r| r.success) {
        for (field, signal) in &result.signals {
            let (Some(key), Some(value)) = (canonical_field(field), signal.normalized()) else {
                continue;
            };
            let entry = sums
                .entry(key)
                .or_default()
                .entry(result.source_id.clone())
                .or_insert((0.0, 0));
            entry.0 += value;
            entry.1 += 1;
        }
    }
    let by_field = sums.into_iter().map(|(field, per_source)| {
        let values: BTreeMap<String, f64> = per_source
            .into_iter()
            .map(|(source, (sum, count))| (source, sum / count as f64))
            .collect();
        (field, values)
    });

    let mut conflicts = Vec::new();
    for (field, values) in by_field {
        if values.len() < 2 {
            continue;
        }
        let mut low: Option<(&String, f64)> = None;
        let mut high: Option<(&String, f64)> = None;
        for (source, value) in &values {
            if low.map_or(true, |(_, v)| *value < v) {
                low = Some((source, *value));
            }
            if high.map_or(true, |(_, v)| *value > v) {
                high = Some((source, *value));
            }
        }
        let (Some((low_source, low_value)), Some((high_source, high_value))) = (low, high) else {
            continue;
        };
        let spread = high_value - low_value;
        if spread <= CONFLICT_SPREAD {
            continue;
        }
        let severity = if spread > HIGH_CONFLICT_SPREAD {
            ConflictSeverity::High
        } else {
            ConflictSeverity::Medium
        };
        debug!(field, spread, ?severity, "Rating conflict");
        conflicts.push(FieldConflict {
            field: field.to_string(),
            sources: vec![low_source.clone(), high_source.clone()],
            severity,
            spread,
            values: values.clone(),
        });
    }
    conflicts
}

/// Bonus for agreement, penalty per conflict, clamped to ±0.2
pub fn confidence_adjustment(successful: usize, conflicts: &[FieldConflict]) -> f64 {
    let mut adjustment = 0.0;
    if conflicts.is_empty() {
        if successful >= 3 {
            adjustment += 0.15;
        } else if successful >= 2 {
            adjustment += 0.10;
        }
    }
    for conflict in conflicts {
        adjustment -= conflict.severity.penalty();
    }
    adjustment.clamp(-MAX_ADJUSTMENT, MAX_ADJUSTMENT)
}

/// Fold results for one entity; pure
pub fn aggregate(entity_key: impl Into<String>, mut results: Vec<ComparisonResult>) -> AggregatedComparison {
    results.sort_by(|a, b| a.source_id.cmp(&b.source_id));

    let successful = results.iter().filter(|r| r.success).count();
    let conflicts = detect_conflicts(&results);
    let conflicting: BTreeSet<&str> = conflicts
        .iter()
        .flat_map(|c| c.sources.iter().map(String::as_str))
        .collect();

    let alignment_score = if successful == 0 {
        0.0
    } else {
        (successful.saturating_sub(conflicting.len())) as f64 / successful as f64
    };
    let confidence_adjustment = confidence_adjustment(successful, &conflicts);
    let needs_review = conflicts.iter().any(|c| c.severity == ConflictSeverity::High)
        || conflicts.len() >= 2
        || confidence_adjustment < -0.1;

    AggregatedComparison {
        entity_key: entity_key.into(),
        results,
        successful_sources: successful,
        conflicts,
        alignment_score,
        confidence_adjustment,
        needs_review,
        aggregated_at: Utc::now(),
    }
}

/// Failed result worth another try, surfaced to the controller as an error
#[derive(Debug, Error)]
#[error("{}: {}", .0.source_id, .0.error.as_deref().unwrap_or("fetch failed"))]
struct RetryableFailure(ComparisonResult);

/// Fans queries out to applicable adapters
pub struct ComparisonOrchestrator {
    registry: AdapterRegistry,
    ctx: Arc<SourceContext>,
    execution: ExecutionConfig,
}

impl ComparisonOrchestrator {
    pub fn new(registry: AdapterRegistry, ctx: Arc<SourceContext>, execution: ExecutionConfig) -> Self {
        // Per-source spacing is enforced by the context's limiters
        let execution = execution.with_min_delay(std::time::Duration::ZERO);
        Self {
            registry,
            ctx,
            execution,
        }
    }

    pub fn context(&self) -> &Arc<SourceContext> {
        &self.ctx
    }

    /// Query every applicable adapter and aggregate the answers
    pub async fn compare(&self, query: &MovieQuery) -> AggregatedComparison {
        let entity_key = query.entity_key();
        let adapters = self.registry.applicable(query);
        debug!(entity = %entity_key, adapters = adapters.len(), "Comparing sources");

        let mut config = self.execution.clone();
        config.continue_on_error = true;
        let controller = ExecutionController::new(config);

        let ctx = &self.ctx;
        let outcome = controller
            .process_all(adapters, |adapter: Arc<dyn SourceAdapter>| async move {
                let result = fetch(adapter.as_ref(), ctx, query).await;
                if !result.success && result.retryable {
                    Err(RetryableFailure(result))
                } else {
                    Ok(result)
                }
            })
            .await;

        let mut results = outcome.succeeded;
        results.extend(outcome.failed.into_iter().map(|f| f.error.0));

        let aggregated = aggregate(entity_key, results);
        info!(
            entity = %aggregated.entity_key,
            sources = aggregated.results.len(),
            successful = aggregated.successful_sources,
            conflicts = aggregated.conflicts.len(),
            adjustment = aggregated.confidence_adjustment,
            needs_review = aggregated.needs_review,
            "Comparison aggregated"
        );
        aggregated
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::testing::ScriptedAdapter;
    use crate::types::{FetchError, SignalMap};
    use reelcheck_common::config::{SourceConfig, SourceTier};
    use reelcheck_common::Signal;
    use std::time::Duration;

    fn rated(source: &str, value: f64) -> ComparisonResult {
        let mut signals = SignalMap::new();
        signals.insert("audience_rating".into(), Signal::numeric(value, 100.0).unwrap());
        ComparisonResult::succeeded(source, SourceTier::Aggregator, signals, 1)
    }

    #[test]
    fn test_three_agreeing_sources() {
        let agg = aggregate("tt1", vec![rated("a", 70.0), rated("b", 75.0), rated("c", 80.0)]);
        assert!(agg.conflicts.is_empty());
        assert!((agg.confidence_adjustment - 0.15).abs() < 1e-9);
        assert_eq!(agg.alignment_score, 1.0);
        assert!(!agg.needs_review);
    }

    #[test]
    fn test_two_agreeing_sources() {
        let agg = aggregate("tt1", vec![rated("a", 70.0), rated("b", 72.0)]);
        assert!((agg.confidence_adjustment - 0.10).abs() < 1e-9);
    }

    #[test]
    fn test_medium_conflict() {
        let agg = aggregate("tt1", vec![rated("a", 40.0), rated("b", 80.0)]);
        assert_eq!(agg.conflicts.len(), 1);
        let conflict = &agg.conflicts[0];
        assert_eq!(conflict.severity, ConflictSeverity::Medium);
        assert_eq!(conflict.sources, vec!["a".to_string(), "b".to_string()]);
        assert!((agg.confidence_adjustment + 0.08).abs() < 1e-9);
        assert_eq!(agg.alignment_score, 0.0);
        assert!(!agg.needs_review);
    }

    #[test]
    fn test_high_conflict_forces_review() {
        let agg = aggregate("tt1", vec![rated("a", 20.0), rated("b", 90.0), rated("c", 85.0)]);
        assert_eq!(agg.conflicts[0].severity, ConflictSeverity::High);
        assert_eq!(agg.conflicts[0].sources, vec!["a".to_string(), "b".to_string()]);
        assert!((agg.confidence_adjustment + 0.15).abs() < 1e-9);
        assert!((agg.alignment_score - 1.0 / 3.0).abs() < 1e-9);
        assert!(agg.needs_review);
    }

    #[test]
    fn test_adjustment_clamped() {
        let conflict = FieldConflict {
            field: "x_rating".into(),
            sources: vec!["a".into(), "b".into()],
            severity: ConflictSeverity::High,
            spread: 60.0,
            values: BTreeMap::new(),
        };
        let adj = confidence_adjustment(2, &[conflict.clone(), conflict]);
        assert_eq!(adj, -MAX_ADJUSTMENT);
    }

    #[test]
    fn test_differently_named_ratings_compared() {
        let mut a = SignalMap::new();
        a.insert("imdb_rating".into(), Signal::numeric(8.5, 10.0).unwrap());
        let mut b = SignalMap::new();
        b.insert("critic_score".into(), Signal::numeric(30.0, 100.0).unwrap());
        let agg = aggregate(
            "tt1",
            vec![
                ComparisonResult::succeeded("a", SourceTier::Primary, a, 1),
                ComparisonResult::succeeded("b", SourceTier::Aggregator, b, 1),
            ],
        );

        assert_eq!(agg.conflicts.len(), 1);
        let conflict = &agg.conflicts[0];
        assert_eq!(conflict.field, RATING_FIELD);
        assert_eq!(conflict.severity, ConflictSeverity::High);
        assert_eq!(conflict.sources, vec!["b".to_string(), "a".to_string()]);
        assert!((conflict.spread - 55.0).abs() < 1e-9);
        assert!(agg.needs_review);
    }

    #[test]
    fn test_several_ratings_from_one_source_averaged() {
        let mut a = SignalMap::new();
        a.insert("critic_rating".into(), Signal::numeric(40.0, 100.0).unwrap());
        a.insert("audience_score".into(), Signal::numeric(80.0, 100.0).unwrap());
        let b = {
            let mut b = SignalMap::new();
            b.insert("rating".into(), Signal::numeric(65.0, 100.0).unwrap());
            b
        };
        let results = vec![
            ComparisonResult::succeeded("a", SourceTier::Primary, a, 2),
            ComparisonResult::succeeded("b", SourceTier::Primary, b, 1),
        ];
        // a averages to 60, within 30 of b
        assert!(detect_conflicts(&results).is_empty());
    }

    #[test]
    fn test_non_rating_fields_ignored() {
        let mut a = SignalMap::new();
        a.insert("runtime".into(), Signal::numeric(10.0, 100.0).unwrap());
        let mut b = SignalMap::new();
        b.insert("runtime".into(), Signal::numeric(90.0, 100.0).unwrap());
        let results = vec![
            ComparisonResult::succeeded("a", SourceTier::Primary, a, 1),
            ComparisonResult::succeeded("b", SourceTier::Primary, b, 1),
        ];
        assert!(detect_conflicts(&results).is_empty());
    }

    #[test]
    fn test_no_successes() {
        let failed = ComparisonResult::failed("a", SourceTier::Primary, &FetchError::Status(500));
        let agg = aggregate("tt1", vec![failed]);
        assert_eq!(agg.alignment_score, 0.0);
        assert_eq!(agg.confidence_adjustment, 0.0);
    }

    #[tokio::test]
    async fn test_compare_retries_transient_failures() {
        let mut signals = SignalMap::new();
        signals.insert("critic_rating".into(), Signal::numeric(7.0, 10.0).unwrap());

        let flaky = ScriptedAdapter::new(
            SourceConfig::new("flaky", SourceTier::Community, 60_000),
            Err(FetchError::Timeout("slow".into())),
        );
        flaky
            .responses
            .lock()
            .unwrap()
            .push(Ok(signals.clone()));
        let flaky = Arc::new(flaky);

        let steady = Arc::new(ScriptedAdapter::new(
            SourceConfig::new("steady", SourceTier::Primary, 60_000),
            Ok(signals),
        ));

        let mut registry = AdapterRegistry::new();
        registry.register(flaky.clone()).unwrap();
        registry.register(steady.clone()).unwrap();

        let mut execution = ExecutionConfig::default();
        execution.retry_delay = Duration::from_millis(1);
        let orchestrator = ComparisonOrchestrator::new(registry, Arc::new(SourceContext::default()), execution);

        let agg = orchestrator
            .compare(&MovieQuery::new("Sholay", 1975).with_primary_id("tt0073707"))
            .await;
        assert_eq!(agg.successful_sources, 2);
        assert_eq!(flaky.calls(), 2);
        assert!((agg.confidence_adjustment - 0.10).abs() < 1e-9);
        assert!(agg.result_for("steady").is_some());
    }

    #[tokio::test]
    async fn test_compare_keeps_permanent_failures() {
        let broken = Arc::new(ScriptedAdapter::new(
            SourceConfig::new("broken", SourceTier::Primary, 60_000),
            Err(FetchError::Parse("garbage".into())),
        ));
        let mut registry = AdapterRegistry::new();
        registry.register(broken.clone()).unwrap();

        let orchestrator = ComparisonOrchestrator::new(
            registry,
            Arc::new(SourceContext::default()),
            ExecutionConfig::default(),
        );
        let agg = orchestrator.compare(&MovieQuery::new("Anand", 1971)).await;
        assert_eq!(agg.results.len(), 1);
        assert!(!agg.results[0].success);
        assert_eq!(broken.calls(), 1);
    }
}
