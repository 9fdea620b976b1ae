//! Checkpoint persistence seam

use super::{CheckpointStatus, Stage};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reelcheck_common::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tokio::sync::RwLock;

/// Persisted shape of one entity's checkpoint
///
/// `status` and `completenessScore` are written for external readers only;
/// loading recomputes both from `completedStages`. `version` grows with every
/// newly completed stage; stores never replace a record with a lower version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckpointRecord {
    pub entity_id: String,
    pub status: CheckpointStatus,
    pub completed_stages: Vec<Stage>,
    pub last_stage: Option<Stage>,
    pub last_stage_at: Option<DateTime<Utc>>,
    pub completeness_score: f64,
    #[serde(default)]
    pub version: i64,
}

/// Durable storage for checkpoint records (upsert by entity id)
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn save(&self, record: &CheckpointRecord) -> Result<()>;

    async fn load_all(&self) -> Result<Vec<CheckpointRecord>>;
}

/// Process-local store, used in tests and dry runs
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    records: RwLock<BTreeMap<String, CheckpointRecord>>,
}

impl MemoryCheckpointStore {
    pub async fn get(&self, entity_id: &str) -> Option<CheckpointRecord> {
        self.records.read().await.get(entity_id).cloned()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn save(&self, record: &CheckpointRecord) -> Result<()> {
        let mut records = self.records.write().await;
        match records.get(&record.entity_id) {
            Some(existing) if existing.version > record.version => {}
            _ => {
                records.insert(record.entity_id.clone(), record.clone());
            }
        }
        Ok(())
    }

    async fn load_all(&self) -> Result<Vec<CheckpointRecord>> {
        Ok(self.records.read().await.values().cloned().collect())
    }
}
