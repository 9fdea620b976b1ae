//! reelcheck - checkpoint reporting and comparison driver
//!
//! Thin command-line front end over the core library. The production pipeline
//! driver lives elsewhere; this binary inspects and nudges checkpoint state and
//! runs one-off source comparisons.
//!
//! ```bash
//! reelcheck summary
//! reelcheck status tt0073707
//! reelcheck resume enrichment
//! reelcheck mark tt0073707 validation
//! reelcheck compare "Sholay" 1975 --primary-id tt0073707
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use reelcheck_common::config::EngineConfig;
use reelcheck_core::{
    AdapterRegistry, CheckpointManager, ComparisonOrchestrator, ExecutionConfig, MovieQuery,
    SourceContext, SqliteCheckpointStore, Stage,
};
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{reload, EnvFilter, Registry};

/// Command-line arguments for reelcheck
#[derive(Parser, Debug)]
#[command(name = "reelcheck")]
#[command(about = "Multi-source movie metadata consensus and checkpoint tool")]
#[command(version)]
struct Args {
    /// Configuration file (overrides REELCHECK_CONFIG and the platform default)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Entity count per checkpoint status and per stage
    Summary,
    /// Checkpoint of a single entity
    Status { entity_id: String },
    /// Entities ready to run the given stage
    Resume { stage: Stage },
    /// Record a completed stage for an entity
    Mark { entity_id: String, stage: Stage },
    /// Query every configured source and print the aggregated comparison
    Compare {
        title: String,
        year: i32,
        #[arg(long)]
        primary_id: Option<String>,
        #[arg(long)]
        alternate_id: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing; RUST_LOG wins over the configured level
    let env_filter = EnvFilter::try_from_default_env();
    let filter_from_env = env_filter.is_ok();
    let (filter, filter_handle) =
        reload::Layer::new(env_filter.unwrap_or_else(|_| EnvFilter::new("info")));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let config = EngineConfig::resolve(args.config.as_deref()).context("Failed to load configuration")?;
    if !filter_from_env {
        apply_log_level(&filter_handle, &config.logging.level)?;
    }

    info!("reelcheck {}", env!("CARGO_PKG_VERSION"));

    match args.command {
        Command::Summary => {
            let manager = open_checkpoints(&config).await?;
            println!("Entities: {}", manager.len().await);
            for (status, count) in manager.status_summary().await {
                println!("  {:<10} {}", status, count);
            }
            println!("Stages:");
            for (stage, count) in manager.pipeline_progress().await {
                println!("  {:<18} {}", stage, count);
            }
            println!("Incomplete: {}", manager.incomplete_entities().await.len());
        }
        Command::Status { entity_id } => {
            let manager = open_checkpoints(&config).await?;
            match manager.get(&entity_id).await {
                Some(checkpoint) => println!("{}", serde_json::to_string_pretty(&checkpoint.to_record())?),
                None => println!("{}: not tracked", entity_id),
            }
        }
        Command::Resume { stage } => {
            let manager = open_checkpoints(&config).await?;
            for entity_id in manager.get_movies_to_resume_from(stage).await {
                println!("{}", entity_id);
            }
        }
        Command::Mark { entity_id, stage } => {
            let manager = open_checkpoints(&config).await?;
            let checkpoint = manager.mark_stage_complete(&entity_id, stage).await;
            println!(
                "{}: {} ({:.2})",
                entity_id,
                checkpoint.status(),
                checkpoint.completeness_score()
            );
        }
        Command::Compare {
            title,
            year,
            primary_id,
            alternate_id,
        } => {
            let registry = AdapterRegistry::from_sources(&config.sources).context("Failed to build adapters")?;
            let ctx = Arc::new(SourceContext::from_config(&config));
            let orchestrator =
                ComparisonOrchestrator::new(registry, ctx, ExecutionConfig::from(&config.execution));

            let mut query = MovieQuery::new(title, year);
            query.primary_id = primary_id;
            query.alternate_id = alternate_id;

            let aggregated = orchestrator.compare(&query).await;
            println!("{}", serde_json::to_string_pretty(&aggregated)?);
        }
    }

    Ok(())
}

/// Open the SQLite checkpoint store and load every persisted record
async fn open_checkpoints(config: &EngineConfig) -> Result<CheckpointManager> {
    let db_path = config.database_path();
    info!("Checkpoint database: {}", db_path.display());
    let store = SqliteCheckpointStore::open(&db_path)
        .await
        .context("Failed to open checkpoint database")?;
    let manager = CheckpointManager::new(Arc::new(store));
    manager.load().await.context("Failed to load checkpoints")?;
    Ok(manager)
}

/// Replace the startup filter with the configured level
fn apply_log_level(handle: &reload::Handle<EnvFilter, Registry>, level: &str) -> Result<()> {
    handle
        .reload(EnvFilter::new(level))
        .context("Failed to apply configured log level")
}
