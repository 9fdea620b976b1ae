//! SQLite-backed checkpoint store
//!
//! One row per entity in `stage_checkpoints`, written with an upsert. The
//! completed-stage set is stored as a JSON array of stage names; unknown names
//! (from a newer pipeline) are skipped on load. The upsert only applies when the
//! incoming `version` is not older than the stored one.

use super::store::{CheckpointRecord, CheckpointStore};
use super::{CheckpointStatus, Stage};
use crate::utils::retry_on_lock;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reelcheck_common::Result;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};
use std::path::Path;
use tracing::{info, warn};

/// Maximum time spent retrying a locked write
const LOCK_WAIT_MS: u64 = 5000;

pub struct SqliteCheckpointStore {
    pool: SqlitePool,
}

impl SqliteCheckpointStore {
    /// Wrap an existing pool; the table must already exist
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (creating if needed) a database file and ensure the schema
    pub async fn open(db_path: &Path) -> Result<Self> {
        let newly_created = !db_path.exists();

        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect(&db_url)
            .await?;

        if newly_created {
            info!("Initialized new checkpoint database: {}", db_path.display());
        } else {
            info!("Opened existing checkpoint database: {}", db_path.display());
        }

        sqlx::query("PRAGMA journal_mode = WAL").execute(&pool).await?;
        sqlx::query("PRAGMA busy_timeout = 5000").execute(&pool).await?;

        create_checkpoints_table(&pool).await?;
        Ok(Self { pool })
    }

    /// Private in-memory database (single connection so the data survives)
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        create_checkpoints_table(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

async fn create_checkpoints_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS stage_checkpoints (
            entity_id TEXT PRIMARY KEY,
            status TEXT NOT NULL,
            completed_stages TEXT NOT NULL DEFAULT '[]',
            last_stage TEXT,
            last_stage_at TIMESTAMP,
            completeness_score REAL NOT NULL DEFAULT 0.0,
            version INTEGER NOT NULL DEFAULT 0,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_stage_checkpoints_status ON stage_checkpoints(status)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

fn parse_stages(entity_id: &str, raw: &str) -> Vec<Stage> {
    let names: Vec<String> = match serde_json::from_str(raw) {
        Ok(names) => names,
        Err(e) => {
            warn!(entity_id, error = %e, "Unreadable completed_stages, treating as empty");
            return Vec::new();
        }
    };
    names
        .iter()
        .filter_map(|name| match name.parse::<Stage>() {
            Ok(stage) => Some(stage),
            Err(_) => {
                warn!(entity_id, stage = %name, "Skipping unknown stage");
                None
            }
        })
        .collect()
}

#[async_trait]
impl CheckpointStore for SqliteCheckpointStore {
    async fn save(&self, record: &CheckpointRecord) -> Result<()> {
        let stages: Vec<&str> = record.completed_stages.iter().map(|s| s.as_str()).collect();
        let stages_json = serde_json::to_string(&stages)?;
        let status = record.status.as_str();
        let last_stage = record.last_stage.map(|s| s.as_str());

        retry_on_lock("save stage checkpoint", LOCK_WAIT_MS, || async {
            sqlx::query(
                r#"
                INSERT INTO stage_checkpoints (
                    entity_id, status, completed_stages, last_stage, last_stage_at,
                    completeness_score, version, updated_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, CURRENT_TIMESTAMP)
                ON CONFLICT(entity_id) DO UPDATE SET
                    status = excluded.status,
                    completed_stages = excluded.completed_stages,
                    last_stage = excluded.last_stage,
                    last_stage_at = excluded.last_stage_at,
                    completeness_score = excluded.completeness_score,
                    version = excluded.version,
                    updated_at = CURRENT_TIMESTAMP
                WHERE excluded.version >= stage_checkpoints.version
                "#,
            )
            .bind(&record.entity_id)
            .bind(status)
            .bind(&stages_json)
            .bind(last_stage)
            .bind(record.last_stage_at)
            .bind(record.completeness_score)
            .bind(record.version)
            .execute(&self.pool)
            .await?;
            Ok(())
        })
        .await
    }

    async fn load_all(&self) -> Result<Vec<CheckpointRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT entity_id, completed_stages, last_stage, last_stage_at, version
            FROM stage_checkpoints
            ORDER BY entity_id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let entity_id: String = row.try_get("entity_id")?;
            let raw_stages: String = row.try_get("completed_stages")?;
            let last_stage: Option<String> = row.try_get("last_stage")?;
            let last_stage_at: Option<DateTime<Utc>> = row.try_get("last_stage_at")?;
            let version: i64 = row.try_get("version")?;

            let completed_stages = parse_stages(&entity_id, &raw_stages);
            let set = completed_stages.iter().copied().collect();
            records.push(CheckpointRecord {
                status: CheckpointStatus::derive(&set),
                completeness_score: super::completeness_score(&set),
                last_stage: last_stage.and_then(|s| s.parse().ok()),
                last_stage_at,
                completed_stages,
                entity_id,
                version,
            });
        }
        Ok(records)
    }
}
