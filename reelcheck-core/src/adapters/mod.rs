//! Source Adapters
//!
//! Each adapter wraps one external comparison source. Adapters only declare
//! what they can answer (`can_handle`) and how to turn a response into typed
//! signals (`fetch_signals`); the shared `fetch` wrapper owns the rest.
//!
//! # Fetch pipeline
//!
//! ```text
//! fetch(adapter, ctx, query)
//!   1. feature flag + master switch off → failed result (Disabled), never "tried"
//!   2. cache hit on (source id, entity key) → cached result, from_cache = true
//!   3. rate-limit wait → fetch_signals → cache success for cache_days
//!   4. any FetchError → structured failed ComparisonResult
//! ```
//!
//! # Adapters
//! 1. **http_json** - Generic JSON-over-HTTP endpoint with pointer field mappings
//! 2. **fixture** - Static signal table keyed by entity key (offline runs, tests)

pub mod fixture;
pub mod http_json;

pub use fixture::FixtureAdapter;
pub use http_json::HttpJsonAdapter;

use crate::context::SourceContext;
use crate::types::{ComparisonResult, FetchError, MovieQuery, SignalMap};
use async_trait::async_trait;
use reelcheck_common::config::{AdapterSettings, SourceConfig};
use reelcheck_common::{Error, Result};
use reelcheck_common::time::days;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// One external comparison source
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Static source description
    fn config(&self) -> &SourceConfig;

    /// Number of fields a complete answer carries (denominator of signal strength)
    fn expected_fields(&self) -> usize;

    /// Whether this source can answer the query at all
    fn can_handle(&self, query: &MovieQuery) -> bool;

    /// Query the source and convert its answer into typed signals
    async fn fetch_signals(&self, query: &MovieQuery) -> std::result::Result<SignalMap, FetchError>;

    fn source_id(&self) -> &str {
        &self.config().id
    }
}

/// Cached, rate-limited, flag-gated fetch for one adapter
///
/// Never returns an error: every failure is a failed `ComparisonResult`.
pub async fn fetch(
    adapter: &dyn SourceAdapter,
    ctx: &SourceContext,
    query: &MovieQuery,
) -> ComparisonResult {
    let config = adapter.config();
    let source_id = config.id.as_str();

    if !ctx.flags.source_enabled(config).await {
        debug!(source = %source_id, "Source disabled by feature flag");
        return ComparisonResult::failed(
            source_id,
            config.tier,
            &FetchError::Disabled(source_id.to_string()),
        );
    }

    let entity_key = query.entity_key();
    if let Some(cached) = ctx.cache.get(source_id, &entity_key).await {
        debug!(source = %source_id, entity = %entity_key, "Cache hit");
        return cached.as_cached();
    }

    ctx.limiters.until_ready(source_id, config.min_delay()).await;

    match adapter.fetch_signals(query).await {
        Ok(signals) => {
            let result = ComparisonResult::succeeded(
                source_id,
                config.tier,
                signals,
                adapter.expected_fields(),
            );
            debug!(
                source = %source_id,
                entity = %entity_key,
                signals = result.signals.len(),
                strength = result.signal_strength,
                "Fetched signals"
            );
            let ttl = days(config.cache_days).to_std().unwrap_or_default();
            ctx.cache.put(&entity_key, &result, ttl).await;
            result
        }
        Err(e) => {
            warn!(source = %source_id, entity = %entity_key, error = %e, "Source fetch failed");
            ComparisonResult::failed(source_id, config.tier, &e)
        }
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Adapters assembled once at start-up
#[derive(Default, Clone)]
pub struct AdapterRegistry {
    adapters: Vec<Arc<dyn SourceAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build every source that carries adapter settings
    ///
    /// Sources without `adapter` settings are expected to be registered in code.
    pub fn from_sources(sources: &[SourceConfig]) -> Result<Self> {
        let mut registry = Self::new();
        for source in sources {
            let Some(settings) = &source.adapter else {
                debug!(source = %source.id, "No adapter settings, skipping");
                continue;
            };
            let adapter: Arc<dyn SourceAdapter> = match settings {
                AdapterSettings::HttpJson { .. } => Arc::new(HttpJsonAdapter::new(source.clone())?),
                AdapterSettings::Fixture { path } => {
                    Arc::new(FixtureAdapter::from_file(source.clone(), path)?)
                }
            };
            registry.register(adapter)?;
        }
        info!(adapters = registry.len(), "Adapter registry assembled");
        Ok(registry)
    }

    pub fn register(&mut self, adapter: Arc<dyn SourceAdapter>) -> Result<()> {
        if self.get(adapter.source_id()).is_some() {
            return Err(Error::Config(format!(
                "Adapter already registered: {}",
                adapter.source_id()
            )));
        }
        self.adapters.push(adapter);
        Ok(())
    }

    pub fn get(&self, source_id: &str) -> Option<&Arc<dyn SourceAdapter>> {
        self.adapters.iter().find(|a| a.source_id() == source_id)
    }

    /// Adapters able to answer the query, in registration order
    pub fn applicable(&self, query: &MovieQuery) -> Vec<Arc<dyn SourceAdapter>> {
        self.adapters
            .iter()
            .filter(|a| a.can_handle(query))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted adapter shared by unit tests

    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    pub struct ScriptedAdapter {
        pub config: SourceConfig,
        pub expected: usize,
        pub handles: bool,
        /// Responses consumed in order; the last one repeats
        pub responses: Mutex<Vec<std::result::Result<SignalMap, FetchError>>>,
        pub calls: AtomicUsize,
    }

    impl ScriptedAdapter {
        pub fn new(config: SourceConfig, response: std::result::Result<SignalMap, FetchError>) -> Self {
            Self {
                config,
                expected: 1,
                handles: true,
                responses: Mutex::new(vec![response]),
                calls: AtomicUsize::new(0),
            }
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl SourceAdapter for ScriptedAdapter {
        fn config(&self) -> &SourceConfig {
            &self.config
        }

        fn expected_fields(&self) -> usize {
            self.expected
        }

        fn can_handle(&self, _query: &MovieQuery) -> bool {
            self.handles
        }

        async fn fetch_signals(&self, _query: &MovieQuery) -> std::result::Result<SignalMap, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut responses = self.responses.lock().unwrap();
            if responses.len() > 1 {
                responses.remove(0)
            } else {
                responses[0].clone()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::ScriptedAdapter;
    use super::*;
    use reelcheck_common::config::{SourceTier, MASTER_SWITCH_KEY};
    use reelcheck_common::Signal;

    fn rating_signals(value: f64) -> SignalMap {
        let mut signals = SignalMap::new();
        signals.insert("critic_rating".into(), Signal::numeric(value, 10.0).unwrap());
        signals
    }

    fn source(id: &str) -> SourceConfig {
        SourceConfig::new(id, SourceTier::Aggregator, 6000)
    }

    #[tokio::test]
    async fn test_success_is_cached() {
        let ctx = SourceContext::default();
        let adapter = ScriptedAdapter::new(source("critics"), Ok(rating_signals(8.0)));
        let query = MovieQuery::new("Sholay", 1975).with_primary_id("tt0073707");

        let first = fetch(&adapter, &ctx, &query).await;
        assert!(first.success);
        assert!(!first.from_cache);

        let second = fetch(&adapter, &ctx, &query).await;
        assert!(second.from_cache);
        assert_eq!(second.signals, first.signals);
        assert_eq!(adapter.calls(), 1);
    }

    #[tokio::test]
    async fn test_failure_not_cached() {
        let ctx = SourceContext::default();
        let adapter = ScriptedAdapter::new(source("critics"), Err(FetchError::Status(502)));
        let query = MovieQuery::new("Sholay", 1975);

        let result = fetch(&adapter, &ctx, &query).await;
        assert!(!result.success);
        assert!(result.retryable);
        fetch(&adapter, &ctx, &query).await;
        assert_eq!(adapter.calls(), 2);
    }

    #[tokio::test]
    async fn test_disabled_source_never_tried() {
        let ctx = SourceContext::default();
        ctx.flags.set(MASTER_SWITCH_KEY, false).await;
        let adapter = ScriptedAdapter::new(source("critics"), Ok(rating_signals(8.0)));

        let result = fetch(&adapter, &ctx, &MovieQuery::new("Sholay", 1975)).await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("disabled"));
        assert_eq!(adapter.calls(), 0);
    }

    #[test]
    fn test_registry_rejects_duplicates() {
        let mut registry = AdapterRegistry::new();
        registry
            .register(Arc::new(ScriptedAdapter::new(source("a"), Ok(SignalMap::new()))))
            .unwrap();
        let dup = registry.register(Arc::new(ScriptedAdapter::new(source("a"), Ok(SignalMap::new()))));
        assert!(dup.is_err());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_registry_filters_applicable() {
        let mut registry = AdapterRegistry::new();
        let mut picky = ScriptedAdapter::new(source("picky"), Ok(SignalMap::new()));
        picky.handles = false;
        registry.register(Arc::new(picky)).unwrap();
        registry
            .register(Arc::new(ScriptedAdapter::new(source("open"), Ok(SignalMap::new()))))
            .unwrap();

        let applicable = registry.applicable(&MovieQuery::new("x", 2000));
        assert_eq!(applicable.len(), 1);
        assert_eq!(applicable[0].source_id(), "open");
    }
}
