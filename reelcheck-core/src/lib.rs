//! # Reelcheck Core
//!
//! Multi-source consensus and validation engine for movie metadata.
//!
//! # Architecture
//!
//! ```text
//! MovieQuery ──► ComparisonOrchestrator ──► SourceAdapter × N (flags, cache, rate limit)
//!                       │
//!                       ▼
//!               AggregatedComparison (conflicts, alignment, confidence adjustment)
//!
//! MovieRecord ──► CategoryEngine / RestrictionEngine ──► SafeWriteGate ──► ClassificationStore
//!            └──► AnomalyDetector ──► AnomalyReport
//!
//! CheckpointManager ◄── external pipeline driver (resume set, mark stage complete)
//! ```
//!
//! - `execution`: bounded-concurrency batch runner with retries and cancellation
//! - `context`: feature flags, result cache and per-source rate limiters
//! - `adapters`: the source adapter contract plus HTTP/JSON and fixture adapters
//! - `orchestrator`: fan-out comparison and conflict aggregation
//! - `consensus`: weighted category vote and monotonic restriction derivation
//! - `gate`: never-downgrade write validation
//! - `anomaly`: rule-based consistency checks
//! - `checkpoint`: per-entity stage tracking with memory and SQLite stores

pub mod adapters;
pub mod anomaly;
pub mod checkpoint;
pub mod consensus;
pub mod context;
pub mod execution;
pub mod gate;
pub mod orchestrator;
pub mod types;
pub mod utils;

pub use adapters::{AdapterRegistry, FixtureAdapter, HttpJsonAdapter, SourceAdapter};
pub use anomaly::{AnomalyDetector, AnomalyFlag, AnomalyReport, AnomalyType};
pub use checkpoint::{
    CheckpointManager, CheckpointStatus, CheckpointStore, MemoryCheckpointStore, SqliteCheckpointStore,
    Stage, StageCheckpoint,
};
pub use consensus::{Category, CategoryClassification, CategoryEngine, RestrictionEngine, RestrictionResult};
pub use context::SourceContext;
pub use execution::{ExecutionConfig, ExecutionController, ExecutionOutcome};
pub use gate::{
    validate_classification, ClassificationStore, GateIssue, GateVerdict, ProposedClassification,
    SafeWriteGate, StoredClassification,
};
pub use orchestrator::{AggregatedComparison, ComparisonOrchestrator};
pub use types::{ComparisonResult, FetchError, MovieQuery, MovieRecord, SignalMap};
