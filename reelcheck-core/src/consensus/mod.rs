//! Consensus / Classification Engine
//!
//! Derives attributes from weighted feature votes, independent of where the
//! underlying fields came from.
//!
//! # Weighted voting
//! 1. Every feature emits zero or one `Vote` (candidate + fixed weight)
//! 2. Votes are grouped per candidate; a candidate qualifies with at least
//!    `min_signals` independent votes
//! 3. Highest summed weight wins; candidates within `tie_epsilon` of the top are
//!    a tie, resolved by a fixed priority order and flagged ambiguous
//! 4. The winning weight maps to a confidence tier via two thresholds
//!
//! Adding an agreeing vote only ever adds weight, so confidence is monotonic.
//!
//! # Flows
//! - **category** - primary category from tags, moods, audience fit, talent, text, era
//! - **restriction** - ordinal restriction level, raise-only merging

pub mod category;
pub mod restriction;

pub use category::{Category, CategoryClassification, CategoryEngine, TalentHistory};
pub use restriction::{IndicatorKind, RestrictionEngine, RestrictionIndicator, RestrictionResult};

use reelcheck_common::config::ConsensusSettings;
use reelcheck_common::ConfidenceTier;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Lowercased alphanumeric words of `text`
pub(crate) fn words(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Whole-word match of a one- or multi-word `phrase` within `words`
pub(crate) fn contains_phrase(words: &[String], phrase: &str) -> bool {
    let needle = self::words(phrase);
    !needle.is_empty() && words.windows(needle.len()).any(|w| w == needle.as_slice())
}

/// One feature's vote for one candidate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vote<C> {
    pub feature: String,
    pub candidate: C,
    pub weight: f64,
}

impl<C> Vote<C> {
    pub fn new(feature: impl Into<String>, candidate: C, weight: f64) -> Self {
        Self {
            feature: feature.into(),
            candidate,
            weight,
        }
    }
}

/// Summed support for one candidate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateScore<C> {
    pub candidate: C,
    pub weight: f64,
    pub signals: usize,
}

/// Outcome of one weighted vote
#[derive(Debug, Clone, PartialEq)]
pub struct Tally<C> {
    pub winner: Option<CandidateScore<C>>,
    /// Other qualifying candidates, heaviest first
    pub runners_up: Vec<CandidateScore<C>>,
    pub ambiguous: bool,
}

/// Threshold set applied to a winning weight
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    pub acceptance: f64,
    pub high_confidence: f64,
    pub tie_epsilon: f64,
    pub min_signals: usize,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self::from(&ConsensusSettings::default())
    }
}

impl From<&ConsensusSettings> for Thresholds {
    fn from(settings: &ConsensusSettings) -> Self {
        Self {
            acceptance: settings.acceptance_threshold,
            high_confidence: settings.high_confidence_threshold,
            tie_epsilon: settings.tie_epsilon,
            min_signals: settings.min_signals.max(1),
        }
    }
}

impl Thresholds {
    /// Confidence tier for a winning weight, with a review reason when not high
    ///
    /// Values below the acceptance threshold are still accepted (low + review).
    pub fn grade(&self, weight: f64) -> (ConfidenceTier, Option<String>) {
        if weight >= self.high_confidence {
            (ConfidenceTier::High, None)
        } else if weight >= self.acceptance {
            (
                ConfidenceTier::Low,
                Some(format!(
                    "weight {:.2} below high-confidence threshold {:.2}, consider review",
                    weight, self.high_confidence
                )),
            )
        } else {
            (
                ConfidenceTier::Low,
                Some(format!(
                    "weight {:.2} below acceptance threshold {:.2}, review required",
                    weight, self.acceptance
                )),
            )
        }
    }
}

/// Weighted vote over `votes`
///
/// Grouping is keyed by candidate order, so the result does not depend on vote
/// arrival order. Ties resolve to the candidate listed first in `priority`;
/// candidates missing from `priority` rank after every listed one.
pub fn tally<C>(votes: &[Vote<C>], priority: &[C], thresholds: &Thresholds) -> Tally<C>
where
    C: Copy + Ord,
{
    let mut grouped: BTreeMap<C, (f64, usize)> = BTreeMap::new();
    for vote in votes.iter().filter(|v| v.weight > 0.0) {
        let entry = grouped.entry(vote.candidate).or_insert((0.0, 0));
        entry.0 += vote.weight;
        entry.1 += 1;
    }

    let mut qualifying: Vec<CandidateScore<C>> = grouped
        .into_iter()
        .filter(|(_, (_, signals))| *signals >= thresholds.min_signals)
        .map(|(candidate, (weight, signals))| CandidateScore {
            candidate,
            weight,
            signals,
        })
        .collect();

    if qualifying.is_empty() {
        return Tally {
            winner: None,
            runners_up: Vec::new(),
            ambiguous: false,
        };
    }

    let rank = |c: &C| priority.iter().position(|p| p == c).unwrap_or(usize::MAX);
    let top = qualifying
        .iter()
        .map(|s| s.weight)
        .fold(f64::NEG_INFINITY, f64::max);
    let is_tied = |s: &CandidateScore<C>| top - s.weight < thresholds.tie_epsilon;
    let tied = qualifying.iter().filter(|s| is_tied(s)).count();

    // Tied group first (priority order), then the rest by weight
    qualifying.sort_by(|a, b| match (is_tied(a), is_tied(b)) {
        (true, true) => rank(&a.candidate)
            .cmp(&rank(&b.candidate))
            .then(a.candidate.cmp(&b.candidate)),
        (true, false) => std::cmp::Ordering::Less,
        (false, true) => std::cmp::Ordering::Greater,
        (false, false) => b
            .weight
            .total_cmp(&a.weight)
            .then(rank(&a.candidate).cmp(&rank(&b.candidate))),
    });

    let mut ranked = qualifying.into_iter();
    let winner = ranked.next();
    Tally {
        winner,
        runners_up: ranked.collect(),
        ambiguous: tied > 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
    enum Pick {
        A,
        B,
        C,
    }

    const PRIORITY: [Pick; 3] = [Pick::B, Pick::A, Pick::C];

    #[test]
    fn test_heaviest_wins() {
        let votes = vec![
            Vote::new("f1", Pick::A, 0.35),
            Vote::new("f2", Pick::B, 0.20),
            Vote::new("f3", Pick::A, 0.10),
        ];
        let t = tally(&votes, &PRIORITY, &Thresholds::default());
        let winner = t.winner.unwrap();
        assert_eq!(winner.candidate, Pick::A);
        assert!((winner.weight - 0.45).abs() < 1e-9);
        assert_eq!(winner.signals, 2);
        assert!(!t.ambiguous);
        assert_eq!(t.runners_up.len(), 1);
    }

    #[test]
    fn test_tie_resolved_by_priority() {
        let votes = vec![Vote::new("f1", Pick::A, 0.20), Vote::new("f2", Pick::B, 0.18)];
        let forward = tally(&votes, &PRIORITY, &Thresholds::default());
        let reversed: Vec<_> = votes.iter().rev().cloned().collect();
        let backward = tally(&reversed, &PRIORITY, &Thresholds::default());

        assert_eq!(forward.winner.as_ref().unwrap().candidate, Pick::B);
        assert_eq!(backward.winner.as_ref().unwrap().candidate, Pick::B);
        assert!(forward.ambiguous);
        assert!(backward.ambiguous);
    }

    #[test]
    fn test_min_signals_filters() {
        let thresholds = Thresholds {
            min_signals: 2,
            ..Thresholds::default()
        };
        let votes = vec![
            Vote::new("f1", Pick::A, 0.35),
            Vote::new("f2", Pick::C, 0.10),
            Vote::new("f3", Pick::C, 0.05),
        ];
        let t = tally(&votes, &PRIORITY, &thresholds);
        assert_eq!(t.winner.unwrap().candidate, Pick::C);
    }

    #[test]
    fn test_no_votes() {
        let t = tally::<Pick>(&[], &PRIORITY, &Thresholds::default());
        assert!(t.winner.is_none());
        assert!(!t.ambiguous);
    }

    #[test]
    fn test_grade_thresholds() {
        let th = Thresholds::default();
        assert_eq!(th.grade(0.60).0, ConfidenceTier::High);
        let (tier, reason) = th.grade(0.55);
        assert_eq!(tier, ConfidenceTier::Low);
        assert!(reason.unwrap().contains("consider review"));
        let (tier, reason) = th.grade(0.20);
        assert_eq!(tier, ConfidenceTier::Low);
        assert!(reason.unwrap().contains("review required"));
    }

    #[test]
    fn test_phrase_matches_whole_words_only() {
        let text = words("The Fighter's competition: a true-story, real life!");
        assert!(!contains_phrase(&text, "fight"));
        assert!(!contains_phrase(&text, "pet"));
        assert!(contains_phrase(&text, "fighter"));
        assert!(contains_phrase(&text, "true story"));
        assert!(contains_phrase(&text, "real-life"));
        assert!(!contains_phrase(&text, ""));
    }

    #[test]
    fn test_agreeing_vote_never_lowers_weight() {
        let th = Thresholds::default();
        let mut votes = vec![Vote::new("f1", Pick::A, 0.35)];
        let before = tally(&votes, &PRIORITY, &th).winner.unwrap();
        votes.push(Vote::new("f2", Pick::A, 0.15));
        let after = tally(&votes, &PRIORITY, &th).winner.unwrap();
        assert!(after.weight >= before.weight);
        assert!(th.grade(after.weight).0 >= th.grade(before.weight).0);
    }
}
