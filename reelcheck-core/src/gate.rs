//! Safe-Write Gate
//!
//! The single place every derived classification passes through before it is
//! persisted. A persisted value may never move to a lower restriction or a
//! lower confidence state than what is already stored.
//!
//! Rejections are data (`GateIssue`), never errors: callers must check
//! `GateVerdict::valid`.
//!
//! `SafeWriteGate::commit` holds a per-entity lock across read, validate and
//! write, so concurrent commits for one entity are applied one at a time and
//! each is validated against the value the previous one left behind.

use crate::consensus::{Category, CategoryClassification, RestrictionResult};
use async_trait::async_trait;
use reelcheck_common::{ConfidenceTier, RestrictionLevel, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

/// Classification currently persisted for an entity
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredClassification {
    pub category: Option<Category>,
    pub category_confidence: Option<ConfidenceTier>,
    pub restriction: Option<RestrictionLevel>,
    pub restriction_confidence: Option<ConfidenceTier>,
}

/// Classification a pipeline stage wants to write (`None` = leave untouched)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposedClassification {
    pub category: Option<(Category, ConfidenceTier)>,
    pub restriction: Option<(RestrictionLevel, ConfidenceTier)>,
}

impl ProposedClassification {
    pub fn from_results(category: &CategoryClassification, restriction: &RestrictionResult) -> Self {
        Self {
            category: category.primary.map(|c| (c, category.confidence)),
            restriction: Some((restriction.level, restriction.confidence)),
        }
    }
}

/// Why a write was refused
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GateIssue {
    /// Low-confidence value would replace a different stored category
    LowConfidenceOverwrite { stored: Category, proposed: Category },
    /// Category confidence would drop below the stored confidence
    ConfidenceDowngrade {
        stored: ConfidenceTier,
        proposed: ConfidenceTier,
    },
    /// Restriction level would drop below the stored level
    RestrictionDowngrade {
        stored: RestrictionLevel,
        proposed: RestrictionLevel,
    },
    /// Same restriction level, lower confidence than stored
    RestrictionConfidenceDowngrade {
        level: RestrictionLevel,
        stored: ConfidenceTier,
        proposed: ConfidenceTier,
    },
}

impl fmt::Display for GateIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LowConfidenceOverwrite { stored, proposed } => write!(
                f,
                "refusing to overwrite category {} with low-confidence {}",
                stored, proposed
            ),
            Self::ConfidenceDowngrade { stored, proposed } => write!(
                f,
                "category confidence would drop from {} to {}",
                stored, proposed
            ),
            Self::RestrictionDowngrade { stored, proposed } => write!(
                f,
                "restriction would drop from {} to {}",
                stored, proposed
            ),
            Self::RestrictionConfidenceDowngrade {
                level,
                stored,
                proposed,
            } => write!(
                f,
                "restriction {} confidence would drop from {} to {}",
                level, stored, proposed
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateVerdict {
    pub valid: bool,
    pub issues: Vec<GateIssue>,
}

/// Pure never-downgrade check
pub fn validate_classification(
    stored: &StoredClassification,
    proposed: &ProposedClassification,
) -> GateVerdict {
    let mut issues = Vec::new();

    if let (Some(stored_category), Some((new_category, new_confidence))) =
        (stored.category, proposed.category)
    {
        if new_category != stored_category && new_confidence == ConfidenceTier::Low {
            issues.push(GateIssue::LowConfidenceOverwrite {
                stored: stored_category,
                proposed: new_category,
            });
        } else if let Some(stored_confidence) = stored.category_confidence {
            if new_confidence < stored_confidence {
                issues.push(GateIssue::ConfidenceDowngrade {
                    stored: stored_confidence,
                    proposed: new_confidence,
                });
            }
        }
    }

    if let (Some(stored_level), Some((new_level, new_confidence))) =
        (stored.restriction, proposed.restriction)
    {
        if new_level < stored_level {
            issues.push(GateIssue::RestrictionDowngrade {
                stored: stored_level,
                proposed: new_level,
            });
        } else if new_level == stored_level {
            if let Some(stored_confidence) = stored.restriction_confidence {
                if new_confidence < stored_confidence {
                    issues.push(GateIssue::RestrictionConfidenceDowngrade {
                        level: new_level,
                        stored: stored_confidence,
                        proposed: new_confidence,
                    });
                }
            }
        }
    }

    GateVerdict {
        valid: issues.is_empty(),
        issues,
    }
}

/// Storage collaborator the gate reads from and writes through
#[async_trait]
pub trait ClassificationStore: Send + Sync {
    async fn current(&self, entity_id: &str) -> Result<StoredClassification>;

    async fn write(&self, entity_id: &str, proposed: &ProposedClassification) -> Result<()>;
}

/// Result of a gated write
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitOutcome {
    pub verdict: GateVerdict,
    pub written: bool,
    /// Storage failure, if the write was attempted and failed
    pub error: Option<String>,
}

/// Gate in front of a `ClassificationStore`
pub struct SafeWriteGate<S: ClassificationStore> {
    store: S,
    entity_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl<S: ClassificationStore> SafeWriteGate<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            entity_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Validate against the stored value and write only when valid
    ///
    /// Never returns an error; storage failures are reported in the outcome.
    pub async fn commit(&self, entity_id: &str, proposed: &ProposedClassification) -> CommitOutcome {
        let lock = self.entity_lock(entity_id).await;
        let outcome = {
            let _guard = lock.lock().await;
            self.commit_locked(entity_id, proposed).await
        };
        self.release_entity_lock(entity_id, lock).await;
        outcome
    }

    async fn entity_lock(&self, entity_id: &str) -> Arc<Mutex<()>> {
        self.entity_locks
            .lock()
            .await
            .entry(entity_id.to_string())
            .or_default()
            .clone()
    }

    /// Drop the entity's lock entry once no other commit holds a handle
    async fn release_entity_lock(&self, entity_id: &str, lock: Arc<Mutex<()>>) {
        let mut locks = self.entity_locks.lock().await;
        // Map entry plus ours
        if Arc::strong_count(&lock) == 2 {
            locks.remove(entity_id);
        }
    }

    async fn commit_locked(&self, entity_id: &str, proposed: &ProposedClassification) -> CommitOutcome {
        let stored = match self.store.current(entity_id).await {
            Ok(stored) => stored,
            Err(e) => {
                warn!(entity_id, error = %e, "Could not read stored classification, write refused");
                return CommitOutcome {
                    verdict: GateVerdict {
                        valid: false,
                        issues: Vec::new(),
                    },
                    written: false,
                    error: Some(e.to_string()),
                };
            }
        };

        let verdict = validate_classification(&stored, proposed);
        if !verdict.valid {
            for issue in &verdict.issues {
                info!(entity_id, %issue, "Safe-write gate refused classification");
            }
            return CommitOutcome {
                verdict,
                written: false,
                error: None,
            };
        }

        match self.store.write(entity_id, proposed).await {
            Ok(()) => {
                debug!(entity_id, "Classification written");
                CommitOutcome {
                    verdict,
                    written: true,
                    error: None,
                }
            }
            Err(e) => {
                warn!(entity_id, error = %e, "Classification write failed");
                CommitOutcome {
                    verdict,
                    written: false,
                    error: Some(e.to_string()),
                }
            }
        }
    }
}

/// In-process store; fields left `None` in a proposal keep their stored value
#[derive(Debug, Default)]
pub struct MemoryClassificationStore {
    rows: RwLock<HashMap<String, StoredClassification>>,
}

impl MemoryClassificationStore {
    pub async fn seed(&self, entity_id: &str, stored: StoredClassification) {
        self.rows.write().await.insert(entity_id.to_string(), stored);
    }
}

#[async_trait]
impl ClassificationStore for MemoryClassificationStore {
    async fn current(&self, entity_id: &str) -> Result<StoredClassification> {
        Ok(self
            .rows
            .read()
            .await
            .get(entity_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn write(&self, entity_id: &str, proposed: &ProposedClassification) -> Result<()> {
        let mut rows = self.rows.write().await;
        let row = rows.entry(entity_id.to_string()).or_default();
        if let Some((category, confidence)) = proposed.category {
            row.category = Some(category);
            row.category_confidence = Some(confidence);
        }
        if let Some((level, confidence)) = proposed.restriction {
            row.restriction = Some(level);
            row.restriction_confidence = Some(confidence);
        }
        Ok(())
    }
}
