//! Ordinal scales shared by the consensus engine, the anomaly detector and the
//! safe-write gate.
//!
//! Every scale derives `Ord` so "higher" and "lower" comparisons are plain
//! `>`/`<` on the enum. Declaration order is the ordinal order.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Confidence attached to a derived value (low < medium < high)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceTier {
    Low,
    Medium,
    High,
}

impl fmt::Display for ConfidenceTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        };
        f.write_str(s)
    }
}

/// Audience restriction level, least restrictive first
///
/// Wire labels follow certification style: `U`, `U/A`, `A`, `S`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RestrictionLevel {
    /// Unrestricted
    #[serde(rename = "U")]
    Universal,
    /// Parental guidance
    #[serde(rename = "U/A")]
    ParentalGuidance,
    /// Adults only
    #[serde(rename = "A")]
    Adult,
    /// Specialised audiences (strictest)
    #[serde(rename = "S")]
    Restricted,
}

impl RestrictionLevel {
    /// All levels in ordinal order
    pub const ALL: [RestrictionLevel; 4] = [
        Self::Universal,
        Self::ParentalGuidance,
        Self::Adult,
        Self::Restricted,
    ];

    /// Ordinal position (0 = least restrictive)
    pub fn order(self) -> u8 {
        self as u8
    }

    /// Wire label
    pub fn label(self) -> &'static str {
        match self {
            Self::Universal => "U",
            Self::ParentalGuidance => "U/A",
            Self::Adult => "A",
            Self::Restricted => "S",
        }
    }

    /// Raise-only merge: the result is never below `current`
    pub fn safe_upgrade(current: Self, proposed: Self) -> Self {
        current.max(proposed)
    }
}

impl fmt::Display for RestrictionLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for RestrictionLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "U" => Ok(Self::Universal),
            "U/A" | "UA" => Ok(Self::ParentalGuidance),
            "A" => Ok(Self::Adult),
            "S" => Ok(Self::Restricted),
            other => Err(Error::InvalidInput(format!(
                "Unknown restriction level: {}",
                other
            ))),
        }
    }
}

/// Anomaly severity (low < medium < high < critical)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// HIGH and CRITICAL findings force manual review
    pub fn requires_review(self) -> bool {
        self >= Severity::High
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
            Self::Critical => "CRITICAL",
        };
        f.write_str(s)
    }
}
