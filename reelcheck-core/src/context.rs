//! Process-wide source context
//!
//! Holds the state every adapter shares: feature flags, the result cache and
//! the per-source rate limiters. The context is an explicit value passed to
//! `adapters::fetch`, so tests build isolated instances and `reset()` returns
//! one to its initial state.
//!
//! # Architecture
//!
//! ```text
//! SourceContext
//!   ├─ FeatureFlags         key → bool (unset keys default to on)
//!   ├─ ResultCache          (source id, entity key) → ComparisonResult + expiry
//!   └─ RateLimiterRegistry  source id → governor direct limiter (burst 1)
//! ```
//!
//! The cache and limiters are not shared across processes; two instances
//! querying the same source can exceed its aggregate rate limit.

use crate::types::ComparisonResult;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use reelcheck_common::config::{EngineConfig, SourceConfig, MASTER_SWITCH_KEY};
use std::collections::{BTreeMap, HashMap};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::debug;

/// Un-keyed governor limiter used per source
pub type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Build a limiter that admits one request per `min_delay`
///
/// Returns `None` for a zero delay (no spacing required).
pub fn spacing_limiter(min_delay: Duration) -> Option<DirectLimiter> {
    let quota = Quota::with_period(min_delay)?.allow_burst(NonZeroU32::MIN);
    Some(RateLimiter::direct(quota))
}

// ============================================================================
// Feature flags
// ============================================================================

/// String-keyed on/off store
#[derive(Debug, Default)]
pub struct FeatureFlags {
    flags: RwLock<BTreeMap<String, bool>>,
}

impl FeatureFlags {
    pub fn new(initial: BTreeMap<String, bool>) -> Self {
        Self {
            flags: RwLock::new(initial),
        }
    }

    /// Unset keys default to on
    pub async fn is_on(&self, key: &str) -> bool {
        self.flags.read().await.get(key).copied().unwrap_or(true)
    }

    pub async fn set(&self, key: impl Into<String>, value: bool) {
        self.flags.write().await.insert(key.into(), value);
    }

    /// Master switch gating every comparison source
    pub async fn master_on(&self) -> bool {
        self.is_on(MASTER_SWITCH_KEY).await
    }

    /// A source is enabled iff its config, the master switch and its own flag all say so
    pub async fn source_enabled(&self, source: &SourceConfig) -> bool {
        let flags = self.flags.read().await;
        let on = |key: &str| flags.get(key).copied().unwrap_or(true);
        source.enabled && on(MASTER_SWITCH_KEY) && on(&source.feature_flag_key)
    }

    pub async fn snapshot(&self) -> BTreeMap<String, bool> {
        self.flags.read().await.clone()
    }

    async fn replace(&self, values: BTreeMap<String, bool>) {
        *self.flags.write().await = values;
    }
}

// ============================================================================
// Result cache
// ============================================================================

struct CacheEntry {
    result: ComparisonResult,
    expires_at: Instant,
}

/// Successful results keyed by (source id, entity key)
#[derive(Default)]
pub struct ResultCache {
    entries: RwLock<HashMap<(String, String), CacheEntry>>,
}

impl ResultCache {
    /// Unexpired entry for the key, if any
    pub async fn get(&self, source_id: &str, entity_key: &str) -> Option<ComparisonResult> {
        let entries = self.entries.read().await;
        let entry = entries.get(&(source_id.to_string(), entity_key.to_string()))?;
        if Instant::now() >= entry.expires_at {
            return None;
        }
        Some(entry.result.clone())
    }

    /// Store a result for `ttl`; failed results are ignored
    pub async fn put(&self, entity_key: &str, result: &ComparisonResult, ttl: Duration) {
        if !result.success || ttl.is_zero() {
            return;
        }
        let entry = CacheEntry {
            result: result.clone(),
            expires_at: Instant::now() + ttl,
        };
        self.entries
            .write()
            .await
            .insert((result.source_id.clone(), entity_key.to_string()), entry);
    }

    /// Drop expired entries, returning how many were removed
    pub async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, e| e.expires_at > now);
        before - entries.len()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }
}

// ============================================================================
// Rate limiters
// ============================================================================

/// Lazily-built governor limiter per source id
#[derive(Default)]
pub struct RateLimiterRegistry {
    limiters: RwLock<HashMap<String, Arc<DirectLimiter>>>,
}

impl RateLimiterRegistry {
    /// Wait until `source_id` may issue its next request
    pub async fn until_ready(&self, source_id: &str, min_delay: Duration) {
        let Some(limiter) = self.limiter_for(source_id, min_delay).await else {
            return;
        };
        let start = Instant::now();
        limiter.until_ready().await;
        let waited = start.elapsed();
        if !waited.is_zero() {
            debug!(
                source = %source_id,
                waited_ms = waited.as_millis() as u64,
                "Rate limit wait"
            );
        }
    }

    async fn limiter_for(&self, source_id: &str, min_delay: Duration) -> Option<Arc<DirectLimiter>> {
        if let Some(existing) = self.limiters.read().await.get(source_id) {
            return Some(Arc::clone(existing));
        }
        let mut limiters = self.limiters.write().await;
        if let Some(existing) = limiters.get(source_id) {
            return Some(Arc::clone(existing));
        }
        let limiter = Arc::new(spacing_limiter(min_delay)?);
        limiters.insert(source_id.to_string(), Arc::clone(&limiter));
        Some(limiter)
    }

    pub async fn clear(&self) {
        self.limiters.write().await.clear();
    }
}

// ============================================================================
// Context
// ============================================================================

/// Injectable shared state for all adapters
pub struct SourceContext {
    pub flags: FeatureFlags,
    pub cache: ResultCache,
    pub limiters: RateLimiterRegistry,
    initial_flags: BTreeMap<String, bool>,
}

impl SourceContext {
    pub fn new(initial_flags: BTreeMap<String, bool>) -> Self {
        Self {
            flags: FeatureFlags::new(initial_flags.clone()),
            cache: ResultCache::default(),
            limiters: RateLimiterRegistry::default(),
            initial_flags,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.flags.clone())
    }

    /// Restore initial flags, empty the cache and drop limiter state
    pub async fn reset(&self) {
        self.flags.replace(self.initial_flags.clone()).await;
        self.cache.clear().await;
        self.limiters.clear().await;
        debug!("Source context reset");
    }
}

impl Default for SourceContext {
    fn default() -> Self {
        Self::new(BTreeMap::new())
    }
}
