//! Checkpoint Manager
//!
//! Tracks, per entity, which pipeline stages have completed and drives
//! resumable reprocessing.
//!
//! # State machine
//!
//! ```text
//! discovery → validation → enrichment → media → tagging → review
//!           → orphan-resolution → normalize → dedupe → finalize
//! ```
//!
//! - The completed-stage set only grows; `mark_stage_complete` is idempotent
//! - Status and completeness score are pure functions of the set, never stored
//!   as independent state (derived fields in persisted rows are ignored on load)
//! - The in-memory map is authoritative for the running process; each mark is
//!   persisted best-effort after the map lock is released, a failed write is
//!   logged and not fatal
//! - Every newly completed stage bumps the checkpoint `version`; stores drop a
//!   snapshot older than the one they hold, so persist order does not matter
//!
//! # Stage handler contract
//!
//! A crash between an in-memory mark and its persisted write under-counts that
//! entity's most recent stage after restart, so every stage handler must be
//! safe to re-run.

pub mod sqlite;
pub mod store;

pub use sqlite::SqliteCheckpointStore;
pub use store::{CheckpointRecord, CheckpointStore, MemoryCheckpointStore};

use chrono::{DateTime, Utc};
use reelcheck_common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

// ============================================================================
// Stages and status
// ============================================================================

/// Pipeline stages in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    Discovery,
    Validation,
    Enrichment,
    Media,
    Tagging,
    Review,
    OrphanResolution,
    Normalize,
    Dedupe,
    Finalize,
}

impl Stage {
    pub const ALL: [Stage; 10] = [
        Self::Discovery,
        Self::Validation,
        Self::Enrichment,
        Self::Media,
        Self::Tagging,
        Self::Review,
        Self::OrphanResolution,
        Self::Normalize,
        Self::Dedupe,
        Self::Finalize,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Discovery => "discovery",
            Self::Validation => "validation",
            Self::Enrichment => "enrichment",
            Self::Media => "media",
            Self::Tagging => "tagging",
            Self::Review => "review",
            Self::OrphanResolution => "orphan-resolution",
            Self::Normalize => "normalize",
            Self::Dedupe => "dedupe",
            Self::Finalize => "finalize",
        }
    }

    /// Completeness reached once this stage is done
    pub fn score(self) -> f64 {
        match self {
            Self::Discovery => 0.10,
            Self::Validation => 0.20,
            Self::Enrichment => 0.40,
            Self::Media => 0.50,
            Self::Tagging => 0.60,
            Self::Review => 0.70,
            Self::OrphanResolution => 0.75,
            Self::Normalize => 0.80,
            Self::Dedupe => 0.90,
            Self::Finalize => 1.00,
        }
    }

    /// Immediately preceding stage (`None` for discovery)
    pub fn previous(self) -> Option<Stage> {
        let index = Self::ALL.iter().position(|s| *s == self)?;
        index.checked_sub(1).map(|i| Self::ALL[i])
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().to_ascii_lowercase().replace('_', "-");
        Self::ALL
            .into_iter()
            .find(|stage| stage.as_str() == wanted)
            .ok_or_else(|| Error::InvalidInput(format!("Unknown stage: {}", s)))
    }
}

/// Milestone derived from the completed-stage set
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckpointStatus {
    Raw,
    Partial,
    Enriched,
    Verified,
    /// Set by the external publishing step; never derived here
    Published,
}

impl CheckpointStatus {
    /// Highest milestone reached by `completed`
    pub fn derive(completed: &BTreeSet<Stage>) -> Self {
        if completed.contains(&Stage::Finalize) {
            Self::Verified
        } else if completed.contains(&Stage::Review) {
            Self::Enriched
        } else if completed.contains(&Stage::Enrichment) {
            Self::Partial
        } else {
            Self::Raw
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Raw => "raw",
            Self::Partial => "partial",
            Self::Enriched => "enriched",
            Self::Verified => "verified",
            Self::Published => "published",
        }
    }
}

impl fmt::Display for CheckpointStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Maximum per-stage score over the set (not the sum)
pub fn completeness_score(completed: &BTreeSet<Stage>) -> f64 {
    completed.iter().map(|s| s.score()).fold(0.0, f64::max)
}

// ============================================================================
// Checkpoint
// ============================================================================

/// Completed stages of one entity
#[derive(Debug, Clone, PartialEq)]
pub struct StageCheckpoint {
    pub entity_id: String,
    completed: BTreeSet<Stage>,
    last_stage: Option<Stage>,
    last_stage_at: Option<DateTime<Utc>>,
    version: i64,
}

impl StageCheckpoint {
    pub fn new(entity_id: impl Into<String>) -> Self {
        Self {
            entity_id: entity_id.into(),
            completed: BTreeSet::new(),
            last_stage: None,
            last_stage_at: None,
            version: 0,
        }
    }

    /// Rebuild from a persisted record; stored status/score are ignored
    pub fn from_record(record: &CheckpointRecord) -> Self {
        Self {
            entity_id: record.entity_id.clone(),
            completed: record.completed_stages.iter().copied().collect(),
            last_stage: record.last_stage,
            last_stage_at: record.last_stage_at,
            version: record.version,
        }
    }

    /// Add a stage; returns false when it was already present
    fn mark(&mut self, stage: Stage) -> bool {
        if !self.completed.insert(stage) {
            return false;
        }
        self.last_stage = Some(stage);
        self.last_stage_at = Some(Utc::now());
        self.version += 1;
        true
    }

    pub fn completed(&self) -> &BTreeSet<Stage> {
        &self.completed
    }

    pub fn has_completed(&self, stage: Stage) -> bool {
        self.completed.contains(&stage)
    }

    pub fn last_stage(&self) -> Option<Stage> {
        self.last_stage
    }

    pub fn last_stage_at(&self) -> Option<DateTime<Utc>> {
        self.last_stage_at
    }

    pub fn version(&self) -> i64 {
        self.version
    }

    pub fn status(&self) -> CheckpointStatus {
        CheckpointStatus::derive(&self.completed)
    }

    pub fn completeness_score(&self) -> f64 {
        completeness_score(&self.completed)
    }

    pub fn to_record(&self) -> CheckpointRecord {
        CheckpointRecord {
            entity_id: self.entity_id.clone(),
            status: self.status(),
            completed_stages: self.completed.iter().copied().collect(),
            last_stage: self.last_stage,
            last_stage_at: self.last_stage_at,
            completeness_score: self.completeness_score(),
            version: self.version,
        }
    }
}

// ============================================================================
// Manager
// ============================================================================

/// Single writer of per-entity checkpoints for this process
pub struct CheckpointManager {
    store: Arc<dyn CheckpointStore>,
    checkpoints: RwLock<HashMap<String, StageCheckpoint>>,
}

impl CheckpointManager {
    pub fn new(store: Arc<dyn CheckpointStore>) -> Self {
        Self {
            store,
            checkpoints: RwLock::new(HashMap::new()),
        }
    }

    /// Manager over a fresh in-memory store
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryCheckpointStore::default()))
    }

    /// Replace in-memory state with every persisted record
    pub async fn load(&self) -> Result<usize> {
        let records = self.store.load_all().await?;
        let mut checkpoints = self.checkpoints.write().await;
        checkpoints.clear();
        for record in &records {
            checkpoints.insert(record.entity_id.clone(), StageCheckpoint::from_record(record));
        }
        info!(entities = checkpoints.len(), "Checkpoints loaded");
        Ok(checkpoints.len())
    }

    /// Register an entity with no completed stages
    pub async fn track(&self, entity_id: &str) {
        let record = {
            let mut checkpoints = self.checkpoints.write().await;
            if checkpoints.contains_key(entity_id) {
                return;
            }
            let checkpoint = StageCheckpoint::new(entity_id);
            let record = checkpoint.to_record();
            checkpoints.insert(entity_id.to_string(), checkpoint);
            record
        };
        self.persist(&record).await;
    }

    /// Add `stage` to the entity's completed set and persist best-effort
    ///
    /// Re-marking a completed stage changes nothing and writes nothing.
    pub async fn mark_stage_complete(&self, entity_id: &str, stage: Stage) -> StageCheckpoint {
        let snapshot = {
            let mut checkpoints = self.checkpoints.write().await;
            let checkpoint = checkpoints
                .entry(entity_id.to_string())
                .or_insert_with(|| StageCheckpoint::new(entity_id));

            if !checkpoint.mark(stage) {
                debug!(entity_id, stage = %stage, "Stage already complete");
                return checkpoint.clone();
            }
            checkpoint.clone()
        };

        debug!(
            entity_id,
            stage = %stage,
            version = snapshot.version(),
            status = %snapshot.status(),
            score = snapshot.completeness_score(),
            "Stage complete"
        );
        self.persist(&snapshot.to_record()).await;
        snapshot
    }

    async fn persist(&self, record: &CheckpointRecord) {
        if let Err(e) = self.store.save(record).await {
            warn!(
                entity_id = %record.entity_id,
                error = %e,
                "Checkpoint persistence failed, in-memory state kept"
            );
        }
    }

    pub async fn get(&self, entity_id: &str) -> Option<StageCheckpoint> {
        self.checkpoints.read().await.get(entity_id).cloned()
    }

    /// Derived status (`raw` for untracked entities)
    pub async fn status(&self, entity_id: &str) -> CheckpointStatus {
        self.get(entity_id)
            .await
            .map_or(CheckpointStatus::Raw, |c| c.status())
    }

    /// Entities that completed the stage before `stage` but not `stage` itself
    ///
    /// For the first stage: tracked entities that have not completed it.
    /// Sorted for stable batching.
    pub async fn get_movies_to_resume_from(&self, stage: Stage) -> Vec<String> {
        let checkpoints = self.checkpoints.read().await;
        let mut ids: Vec<String> = checkpoints
            .values()
            .filter(|c| !c.has_completed(stage))
            .filter(|c| stage.previous().map_or(true, |prev| c.has_completed(prev)))
            .map(|c| c.entity_id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Entity count per derived status
    pub async fn status_summary(&self) -> BTreeMap<CheckpointStatus, usize> {
        let checkpoints = self.checkpoints.read().await;
        let mut summary = BTreeMap::new();
        for checkpoint in checkpoints.values() {
            *summary.entry(checkpoint.status()).or_insert(0) += 1;
        }
        summary
    }

    /// Entities that have not completed the final stage
    pub async fn incomplete_entities(&self) -> Vec<String> {
        let checkpoints = self.checkpoints.read().await;
        let mut ids: Vec<String> = checkpoints
            .values()
            .filter(|c| !c.has_completed(Stage::Finalize))
            .map(|c| c.entity_id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Number of entities that completed each stage, in pipeline order
    pub async fn pipeline_progress(&self) -> Vec<(Stage, usize)> {
        let checkpoints = self.checkpoints.read().await;
        Stage::ALL
            .iter()
            .map(|stage| {
                let done = checkpoints.values().filter(|c| c.has_completed(*stage)).count();
                (*stage, done)
            })
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.checkpoints.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.checkpoints.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::time::Duration;
    use tokio::sync::Notify;

    struct FailingStore;

    /// Holds every save until released
    #[derive(Default)]
    struct HeldStore {
        entered: Notify,
        release: Notify,
        inner: MemoryCheckpointStore,
    }

    #[async_trait]
    impl CheckpointStore for HeldStore {
        async fn save(&self, record: &CheckpointRecord) -> Result<()> {
            self.entered.notify_one();
            self.release.notified().await;
            self.inner.save(record).await
        }

        async fn load_all(&self) -> Result<Vec<CheckpointRecord>> {
            self.inner.load_all().await
        }
    }

    #[async_trait]
    impl CheckpointStore for FailingStore {
        async fn save(&self, _record: &CheckpointRecord) -> Result<()> {
            Err(Error::Internal("disk full".into()))
        }

        async fn load_all(&self) -> Result<Vec<CheckpointRecord>> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn test_stage_order_and_previous() {
        assert_eq!(Stage::Discovery.previous(), None);
        assert_eq!(Stage::Validation.previous(), Some(Stage::Discovery));
        assert_eq!(Stage::Finalize.previous(), Some(Stage::Dedupe));
        assert!(Stage::Media < Stage::Tagging);
    }

    #[test]
    fn test_stage_parse() {
        assert_eq!("orphan-resolution".parse::<Stage>().unwrap(), Stage::OrphanResolution);
        assert_eq!("ORPHAN_RESOLUTION".parse::<Stage>().unwrap(), Stage::OrphanResolution);
        assert!("publish".parse::<Stage>().is_err());
        assert_eq!(
            serde_json::to_string(&Stage::OrphanResolution).unwrap(),
            "\"orphan-resolution\""
        );
    }

    #[test]
    fn test_status_derivation() {
        let set = |stages: &[Stage]| stages.iter().copied().collect::<BTreeSet<_>>();
        assert_eq!(CheckpointStatus::derive(&set(&[])), CheckpointStatus::Raw);
        assert_eq!(
            CheckpointStatus::derive(&set(&[Stage::Discovery, Stage::Validation])),
            CheckpointStatus::Raw
        );
        assert_eq!(
            CheckpointStatus::derive(&set(&[Stage::Enrichment])),
            CheckpointStatus::Partial
        );
        assert_eq!(
            CheckpointStatus::derive(&set(&[Stage::Review])),
            CheckpointStatus::Enriched
        );
        assert_eq!(
            CheckpointStatus::derive(&set(&[Stage::Finalize])),
            CheckpointStatus::Verified
        );
    }

    #[test]
    fn test_score_is_max_not_sum() {
        let set: BTreeSet<_> = [Stage::Discovery, Stage::Validation, Stage::Enrichment]
            .into_iter()
            .collect();
        assert!((completeness_score(&set) - 0.40).abs() < 1e-9);
        assert_eq!(completeness_score(&BTreeSet::new()), 0.0);
    }

    #[tokio::test]
    async fn test_mark_is_idempotent() {
        let manager = CheckpointManager::in_memory();
        let once = manager.mark_stage_complete("m1", Stage::Discovery).await;
        let twice = manager.mark_stage_complete("m1", Stage::Discovery).await;
        assert_eq!(once, twice);
        assert_eq!(twice.completed().len(), 1);
    }

    #[tokio::test]
    async fn test_persistence_failure_not_fatal() {
        let manager = CheckpointManager::new(Arc::new(FailingStore));
        let checkpoint = manager.mark_stage_complete("m1", Stage::Enrichment).await;
        assert_eq!(checkpoint.status(), CheckpointStatus::Partial);
        assert_eq!(manager.status("m1").await, CheckpointStatus::Partial);
    }

    #[tokio::test]
    async fn test_resume_set() {
        let manager = CheckpointManager::in_memory();
        manager.mark_stage_complete("a", Stage::Discovery).await;
        manager.mark_stage_complete("b", Stage::Discovery).await;
        manager.mark_stage_complete("b", Stage::Validation).await;
        manager.mark_stage_complete("c", Stage::Validation).await;
        manager.track("d").await;

        assert_eq!(manager.get_movies_to_resume_from(Stage::Validation).await, vec!["a"]);
        assert_eq!(manager.get_movies_to_resume_from(Stage::Enrichment).await, vec!["b", "c"]);
        assert_eq!(manager.get_movies_to_resume_from(Stage::Discovery).await, vec!["c", "d"]);
    }

    #[tokio::test]
    async fn test_reporting() {
        let manager = CheckpointManager::in_memory();
        manager.mark_stage_complete("a", Stage::Enrichment).await;
        manager.mark_stage_complete("b", Stage::Finalize).await;
        manager.track("c").await;

        let summary = manager.status_summary().await;
        assert_eq!(summary[&CheckpointStatus::Partial], 1);
        assert_eq!(summary[&CheckpointStatus::Verified], 1);
        assert_eq!(summary[&CheckpointStatus::Raw], 1);

        assert_eq!(manager.incomplete_entities().await, vec!["a", "c"]);

        let progress = manager.pipeline_progress().await;
        assert_eq!(progress.len(), Stage::ALL.len());
        assert_eq!(progress[2], (Stage::Enrichment, 1));
        assert_eq!(progress[9], (Stage::Finalize, 1));
    }

    #[tokio::test]
    async fn test_load_recomputes_derived_fields() {
        let store = Arc::new(MemoryCheckpointStore::default());
        store
            .save(&CheckpointRecord {
                entity_id: "m1".into(),
                status: CheckpointStatus::Published,
                completed_stages: vec![Stage::Discovery, Stage::Validation, Stage::Enrichment],
                last_stage: Some(Stage::Enrichment),
                last_stage_at: None,
                completeness_score: 0.99,
                version: 3,
            })
            .await
            .unwrap();

        let manager = CheckpointManager::new(store);
        assert_eq!(manager.load().await.unwrap(), 1);
        let checkpoint = manager.get("m1").await.unwrap();
        assert_eq!(checkpoint.status(), CheckpointStatus::Partial);
        assert!((checkpoint.completeness_score() - 0.40).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_readers_not_blocked_by_persistence() {
        let store = Arc::new(HeldStore::default());
        let manager = Arc::new(CheckpointManager::new(store.clone()));

        let marking = tokio::spawn({
            let manager = manager.clone();
            async move { manager.mark_stage_complete("m1", Stage::Enrichment).await }
        });
        store.entered.notified().await;

        // The save is still pending; readers and other marks proceed
        let status = tokio::time::timeout(Duration::from_secs(1), manager.status("m1"))
            .await
            .expect("reader waited on persistence");
        assert_eq!(status, CheckpointStatus::Partial);
        let resume = tokio::time::timeout(
            Duration::from_secs(1),
            manager.get_movies_to_resume_from(Stage::Media),
        )
        .await
        .expect("resume query waited on persistence");
        assert_eq!(resume, vec!["m1"]);

        store.release.notify_one();
        let checkpoint = marking.await.unwrap();
        assert_eq!(checkpoint.version(), 1);
        assert_eq!(store.inner.get("m1").await.unwrap().version, 1);
    }

    #[tokio::test]
    async fn test_version_counts_new_stages_only() {
        let manager = CheckpointManager::in_memory();
        manager.mark_stage_complete("m1", Stage::Discovery).await;
        manager.mark_stage_complete("m1", Stage::Discovery).await;
        let checkpoint = manager.mark_stage_complete("m1", Stage::Validation).await;
        assert_eq!(checkpoint.version(), 2);
        assert_eq!(checkpoint.to_record().version, 2);
    }
}
