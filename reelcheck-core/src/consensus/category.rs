//! Primary category consensus
//!
//! | feature          | emits                                       | weight |
//! |------------------|---------------------------------------------|--------|
//! | `genres_array`   | first recognised explicit genre             | 0.35   |
//! | `mood_tag`       | first mood tag with a category mapping      | 0.20   |
//! | `audience_fit`   | Family when the kids-fit flag is set        | 0.15   |
//! | `talent_history` | director's usual category, else lead actor's| 0.15   |
//! | `keyword_text`   | category with most synopsis keyword hits    | 0.10   |
//! | `era_default`    | Drama for entities before the era cutoff    | 0.05   |

use super::{contains_phrase, tally, words, Thresholds, Vote};
use crate::types::MovieRecord;
use reelcheck_common::config::ConsensusSettings;
use reelcheck_common::ConfidenceTier;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use tracing::debug;

pub const GENRES_ARRAY_WEIGHT: f64 = 0.35;
pub const MOOD_TAG_WEIGHT: f64 = 0.20;
pub const AUDIENCE_FIT_WEIGHT: f64 = 0.15;
pub const TALENT_HISTORY_WEIGHT: f64 = 0.15;
pub const KEYWORD_TEXT_WEIGHT: f64 = 0.10;
pub const ERA_DEFAULT_WEIGHT: f64 = 0.05;

/// Candidate categories; `PRIORITY` is the tie-break order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Category {
    Action,
    Thriller,
    Drama,
    Comedy,
    Romance,
    Crime,
    Horror,
    Family,
    Fantasy,
    Documentary,
}

impl Category {
    pub const PRIORITY: [Category; 10] = [
        Self::Action,
        Self::Thriller,
        Self::Drama,
        Self::Comedy,
        Self::Romance,
        Self::Crime,
        Self::Horror,
        Self::Family,
        Self::Fantasy,
        Self::Documentary,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Action => "Action",
            Self::Thriller => "Thriller",
            Self::Drama => "Drama",
            Self::Comedy => "Comedy",
            Self::Romance => "Romance",
            Self::Crime => "Crime",
            Self::Horror => "Horror",
            Self::Family => "Family",
            Self::Fantasy => "Fantasy",
            Self::Documentary => "Documentary",
        }
    }

    /// Map an explicit genre tag
    pub fn from_genre(genre: &str) -> Option<Self> {
        let genre = genre.trim().to_lowercase();
        let category = match genre.as_str() {
            "action" | "adventure" | "martial arts" | "war" => Self::Action,
            "thriller" | "suspense" | "mystery" => Self::Thriller,
            "drama" | "biography" | "historical" | "period" => Self::Drama,
            "comedy" | "satire" | "parody" => Self::Comedy,
            "romance" | "romantic" | "musical" => Self::Romance,
            "crime" | "gangster" | "noir" => Self::Crime,
            "horror" | "supernatural" => Self::Horror,
            "family" | "kids" | "children" | "animation" => Self::Family,
            "fantasy" | "sci-fi" | "science fiction" | "mythology" => Self::Fantasy,
            "documentary" | "docu-drama" => Self::Documentary,
            _ => return None,
        };
        Some(category)
    }

    /// Map a mood tag
    pub fn from_mood(mood: &str) -> Option<Self> {
        let mood = mood.trim().to_lowercase();
        let category = match mood.as_str() {
            "action-packed" | "thrilling" | "adrenaline" | "high-octane" | "heroic" => Self::Action,
            "tense" | "suspenseful" | "edge-of-seat" | "twisty" => Self::Thriller,
            "emotional" | "intense" | "heartbreaking" | "serious" | "poignant" => Self::Drama,
            "funny" | "lighthearted" | "feel-good" | "quirky" | "witty" => Self::Comedy,
            "romantic" | "heartwarming" | "tender" => Self::Romance,
            "dark" | "gritty" | "violent" => Self::Crime,
            "scary" | "creepy" | "eerie" | "chilling" => Self::Horror,
            "wholesome" | "kid-friendly" => Self::Family,
            "magical" | "whimsical" | "epic" => Self::Fantasy,
            "informative" | "educational" => Self::Documentary,
            _ => return None,
        };
        Some(category)
    }

    fn keywords(self) -> &'static [&'static str] {
        match self {
            Self::Action => &["fight", "battle", "chase", "mission", "explosion", "revenge"],
            Self::Thriller => &["conspiracy", "suspect", "kidnap", "hostage", "secret", "twist"],
            Self::Drama => &["family", "struggle", "society", "tragedy", "journey", "sacrifice"],
            Self::Comedy => &["hilarious", "comic", "prank", "misadventure", "funny", "mix-up"],
            Self::Romance => &["love", "romance", "marriage", "wedding", "heart", "lovers"],
            Self::Crime => &["gangster", "police", "heist", "mafia", "smuggling", "murder"],
            Self::Horror => &["ghost", "haunted", "demon", "curse", "possessed", "spirit"],
            Self::Family => &["children", "kids", "school", "pet", "friendship", "festival"],
            Self::Fantasy => &["magic", "kingdom", "myth", "legend", "alien", "sorcerer"],
            Self::Documentary => &["documentary", "real-life", "archival", "interviews", "true story", "footage"],
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Historical category per director / lead actor (lowercased names)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TalentHistory {
    affinity: HashMap<String, Category>,
}

impl TalentHistory {
    pub fn insert(&mut self, name: &str, category: Category) {
        self.affinity.insert(name.trim().to_lowercase(), category);
    }

    pub fn lookup(&self, name: &str) -> Option<Category> {
        self.affinity.get(&name.trim().to_lowercase()).copied()
    }
}

/// Contribution of one feature to the winning decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contribution {
    pub feature: String,
    pub category: Category,
    pub weight: f64,
}

/// Derived primary category
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryClassification {
    pub primary: Option<Category>,
    pub confidence: ConfidenceTier,
    pub weight: f64,
    /// Other qualifying candidates, heaviest first
    pub secondary: Vec<(Category, f64)>,
    /// Votes backing `primary`
    pub contributors: Vec<Contribution>,
    pub ambiguous: bool,
    pub review_reason: Option<String>,
}

/// Category voting over a stored row
#[derive(Debug, Clone)]
pub struct CategoryEngine {
    thresholds: Thresholds,
    era_cutoff: i32,
    talent: TalentHistory,
}

impl Default for CategoryEngine {
    fn default() -> Self {
        Self::new(&ConsensusSettings::default())
    }
}

impl CategoryEngine {
    pub fn new(settings: &ConsensusSettings) -> Self {
        Self {
            thresholds: Thresholds::from(settings),
            era_cutoff: settings.category_era_cutoff,
            talent: TalentHistory::default(),
        }
    }

    pub fn with_talent_history(mut self, talent: TalentHistory) -> Self {
        self.talent = talent;
        self
    }

    /// Votes emitted by each feature for this row
    pub fn votes(&self, record: &MovieRecord) -> Vec<Vote<Category>> {
        let mut votes = Vec::new();

        if let Some(c) = record.genres.iter().find_map(|g| Category::from_genre(g)) {
            votes.push(Vote::new("genres_array", c, GENRES_ARRAY_WEIGHT));
        }
        if let Some(c) = record.mood_tags.iter().find_map(|m| Category::from_mood(m)) {
            votes.push(Vote::new("mood_tag", c, MOOD_TAG_WEIGHT));
        }
        if record.kids_fit {
            votes.push(Vote::new("audience_fit", Category::Family, AUDIENCE_FIT_WEIGHT));
        }
        let talent = record
            .director
            .as_deref()
            .and_then(|d| self.talent.lookup(d))
            .or_else(|| record.lead_actor.as_deref().and_then(|a| self.talent.lookup(a)));
        if let Some(c) = talent {
            votes.push(Vote::new("talent_history", c, TALENT_HISTORY_WEIGHT));
        }
        if let Some(c) = record.synopsis.as_deref().and_then(keyword_category) {
            votes.push(Vote::new("keyword_text", c, KEYWORD_TEXT_WEIGHT));
        }
        if record.year.is_some_and(|y| y < self.era_cutoff) {
            votes.push(Vote::new("era_default", Category::Drama, ERA_DEFAULT_WEIGHT));
        }

        votes
    }

    /// Classify a row; computed fresh on every call
    pub fn classify(&self, record: &MovieRecord) -> CategoryClassification {
        let votes = self.votes(record);
        let result = tally(&votes, &Category::PRIORITY, &self.thresholds);

        let Some(winner) = result.winner else {
            debug!(entity_id = %record.id, "No category signals");
            return CategoryClassification {
                primary: None,
                confidence: ConfidenceTier::Low,
                weight: 0.0,
                secondary: Vec::new(),
                contributors: Vec::new(),
                ambiguous: false,
                review_reason: Some("no category signals".to_string()),
            };
        };

        let (confidence, grade_reason) = self.thresholds.grade(winner.weight);
        let review_reason = if result.ambiguous {
            let tied: Vec<&str> = result
                .runners_up
                .iter()
                .filter(|s| winner.weight - s.weight < self.thresholds.tie_epsilon)
                .map(|s| s.candidate.as_str())
                .collect();
            Some(format!(
                "tie between {} and {}, resolved by priority",
                winner.candidate,
                tied.join(", ")
            ))
        } else {
            grade_reason
        };

        let contributors = votes
            .iter()
            .filter(|v| v.candidate == winner.candidate)
            .map(|v| Contribution {
                feature: v.feature.clone(),
                category: v.candidate,
                weight: v.weight,
            })
            .collect();

        debug!(
            entity_id = %record.id,
            category = %winner.candidate,
            weight = winner.weight,
            %confidence,
            ambiguous = result.ambiguous,
            "Category classified"
        );

        CategoryClassification {
            primary: Some(winner.candidate),
            confidence,
            weight: winner.weight,
            secondary: result
                .runners_up
                .iter()
                .map(|s| (s.candidate, s.weight))
                .collect(),
            contributors,
            ambiguous: result.ambiguous,
            review_reason,
        }
    }
}

/// Category with the most whole-word keyword hits; ties go to priority order
fn keyword_category(text: &str) -> Option<Category> {
    let text = words(text);
    let mut best: Option<(Category, usize)> = None;
    for category in Category::PRIORITY {
        let hits = category
            .keywords()
            .iter()
            .filter(|k| contains_phrase(&text, k))
            .count();
        if hits > 0 && best.map_or(true, |(_, h)| hits > h) {
            best = Some((category, hits));
        }
    }
    best.map(|(c, _)| c)
}
