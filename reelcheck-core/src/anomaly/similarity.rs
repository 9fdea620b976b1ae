//! Similarity measures for cross-source comparison

use std::collections::HashSet;

fn normalize(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

/// Jaccard overlap of two string sets (case/whitespace-insensitive)
///
/// Two empty sets are identical (1.0).
pub fn set_overlap(a: &[String], b: &[String]) -> f64 {
    let a: HashSet<String> = a.iter().map(|s| normalize(s)).filter(|s| !s.is_empty()).collect();
    let b: HashSet<String> = b.iter().map(|s| normalize(s)).filter(|s| !s.is_empty()).collect();
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let intersection = a.intersection(&b).count();
    let union = a.union(&b).count();
    intersection as f64 / union as f64
}

/// Bigram (Sørensen-Dice) similarity, case/whitespace-insensitive
pub fn text_similarity(a: &str, b: &str) -> f64 {
    strsim::sorensen_dice(&normalize(a), &normalize(b))
}
