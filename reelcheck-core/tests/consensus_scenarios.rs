//! End-to-end consensus scenarios over stored rows
//!
//! Category vote → restriction derivation → safe-write gate, plus anomaly
//! checks on the same rows.

use reelcheck_common::{ConfidenceTier, RestrictionLevel, Severity};
use reelcheck_core::anomaly::{AnomalyInput, CastMember};
use reelcheck_core::consensus::{tally, Thresholds, Vote};
use reelcheck_core::gate::MemoryClassificationStore;
use reelcheck_core::types::{ContentFlag, ContentKind, Intensity};
use reelcheck_core::{
    AnomalyDetector, AnomalyType, Category, CategoryEngine, ClassificationStore, GateIssue,
    MovieRecord, ProposedClassification, RestrictionEngine, SafeWriteGate, StoredClassification,
};

fn record(id: &str, year: i32) -> MovieRecord {
    MovieRecord {
        title: Some(format!("Title {}", id)),
        year: Some(year),
        language: Some("hi".into()),
        ..MovieRecord::new(id)
    }
}

#[test]
fn scenario_a_two_agreeing_signals_accepted_at_low_confidence() {
    let mut row = record("tt-a", 2012);
    row.genres = vec!["Action".into()];
    row.mood_tags = vec!["action-packed".into()];

    let result = CategoryEngine::default().classify(&row);

    assert_eq!(result.primary, Some(Category::Action));
    assert!((result.weight - 0.55).abs() < 1e-9);
    assert_eq!(result.confidence, ConfidenceTier::Low);
    assert!(!result.ambiguous);
    assert_eq!(result.contributors.len(), 2);
}

#[test]
fn scenario_b_pre_1980_without_indicators_uses_era_default() {
    let row = record("tt-b", 1975);

    let result = RestrictionEngine::default().derive(&row, None);

    assert_eq!(result.level, RestrictionLevel::Universal);
    assert_eq!(result.confidence, ConfidenceTier::Medium);
    assert_eq!(result.reason, "era default");
    assert!(result.indicators.is_empty());
}

#[test]
fn scenario_c_child_actor_flagged_high() {
    let row = record("tt-c", 1990);
    let cast = vec![CastMember {
        name: "Lead".into(),
        birth_year: 1984,
    }];

    let report = AnomalyDetector::default()
        .with_current_year(2026)
        .run_all_anomaly_checks(
            &row,
            &AnomalyInput {
                cast: &cast,
                ..AnomalyInput::default()
            },
        );

    let flag = report
        .flags
        .iter()
        .find(|f| f.anomaly_type == AnomalyType::ActorTooYoung)
        .expect("actor age flag");
    assert_eq!(flag.severity, Severity::High);
    assert_eq!(flag.values["age"], 6);
    assert!(report.needs_review);
}

#[test]
fn adding_agreeing_signal_never_lowers_confidence() {
    let engine = CategoryEngine::default();
    let mut row = record("tt-m", 2012);
    row.genres = vec!["Thriller".into()];
    let before = engine.classify(&row);

    row.mood_tags = vec!["suspenseful".into()];
    let after = engine.classify(&row);

    assert_eq!(before.primary, after.primary);
    assert!(after.weight >= before.weight);
    assert!(after.confidence >= before.confidence);

    row.synopsis = Some("A hostage situation spirals into a conspiracy".into());
    let third = engine.classify(&row);
    assert!(third.weight >= after.weight);
    assert_eq!(third.confidence, ConfidenceTier::High);
}

#[test]
fn tie_break_independent_of_vote_order() {
    let thresholds = Thresholds::default();
    let votes = vec![
        Vote::new("audience_fit", Category::Family, 0.15),
        Vote::new("talent_history", Category::Romance, 0.15),
        Vote::new("era_default", Category::Drama, 0.05),
    ];

    let mut winners = Vec::new();
    for rotation in 0..votes.len() {
        let mut shuffled = votes.clone();
        shuffled.rotate_left(rotation);
        let result = tally(&shuffled, &Category::PRIORITY, &thresholds);
        assert!(result.ambiguous);
        winners.push(result.winner.map(|w| w.candidate));
    }
    let mut reversed = votes.clone();
    reversed.reverse();
    winners.push(tally(&reversed, &Category::PRIORITY, &thresholds).winner.map(|w| w.candidate));

    assert!(winners.iter().all(|w| *w == Some(Category::Romance)));
}

#[test]
fn restriction_flows_through_gate_without_downgrade() {
    let engine = RestrictionEngine::default();
    let mut strong = record("tt-g", 2018);
    strong.content_flags = vec![ContentFlag {
        kind: ContentKind::Violence,
        intensity: Intensity::Strong,
    }];
    let mild = record("tt-g", 2018);

    let stored = StoredClassification {
        restriction: Some(engine.derive(&strong, None).level),
        restriction_confidence: Some(ConfidenceTier::High),
        ..StoredClassification::default()
    };
    let derived = engine.derive(&mild, None);
    assert_eq!(derived.level, RestrictionLevel::Universal);

    let verdict = reelcheck_core::validate_classification(
        &stored,
        &ProposedClassification {
            category: None,
            restriction: Some((derived.level, derived.confidence)),
        },
    );
    assert!(!verdict.valid);
    assert_eq!(
        verdict.issues,
        vec![GateIssue::RestrictionDowngrade {
            stored: RestrictionLevel::Adult,
            proposed: RestrictionLevel::Universal,
        }]
    );
}

#[tokio::test]
async fn gate_commit_writes_fresh_classification_then_refuses_low_overwrite() {
    let category_engine = CategoryEngine::default();
    let restriction_engine = RestrictionEngine::default();
    let gate = SafeWriteGate::new(MemoryClassificationStore::default());

    let mut row = record("tt-w", 2005);
    row.genres = vec!["Crime".into()];
    row.mood_tags = vec!["gritty".into()];
    row.synopsis = Some("A police heist goes wrong".into());

    let category = category_engine.classify(&row);
    let restriction = restriction_engine.derive(&row, category.primary);
    assert_eq!(category.primary, Some(Category::Crime));
    assert_eq!(category.confidence, ConfidenceTier::High);
    assert_eq!(restriction.level, RestrictionLevel::ParentalGuidance);

    let outcome = gate
        .commit("tt-w", &ProposedClassification::from_results(&category, &restriction))
        .await;
    assert!(outcome.written);

    let mut weaker = MovieRecord::new("tt-w");
    weaker.genres = vec!["Comedy".into()];
    let weak_category = category_engine.classify(&weaker);
    assert_eq!(weak_category.confidence, ConfidenceTier::Low);

    let outcome = gate
        .commit(
            "tt-w",
            &ProposedClassification {
                category: weak_category.primary.map(|c| (c, weak_category.confidence)),
                restriction: None,
            },
        )
        .await;
    assert!(!outcome.written);
    assert!(matches!(
        outcome.verdict.issues[0],
        GateIssue::LowConfidenceOverwrite {
            stored: Category::Crime,
            proposed: Category::Comedy,
        }
    ));

    let row = gate.store().current("tt-w").await.unwrap();
    assert_eq!(row.category, Some(Category::Crime));
    assert_eq!(row.restriction, Some(RestrictionLevel::ParentalGuidance));
}
