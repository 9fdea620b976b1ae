//! # Reelcheck Common Library
//!
//! Shared code for the reelcheck workspace:
//! - Error and result types
//! - Configuration loading (TOML + environment overrides)
//! - The closed `Signal` union produced by source adapters
//! - Ordinal scales (confidence tiers, restriction levels, severities)
//! - Time helpers

pub mod config;
pub mod error;
pub mod scales;
pub mod signal;
pub mod time;

pub use error::{Error, Result};
pub use scales::{ConfidenceTier, RestrictionLevel, Severity};
pub use signal::{Signal, SignalKind};
