//! Composition root wiring the cache and every data source together.
//!
//! Construct one [`DataService`] at process start and pass references into
//! whatever consumes it (calculation tools, transport handlers). There is
//! no global instance; all sharing is explicit.

use std::sync::Arc;

use tracing::info;

use crate::cache::{CacheService, CacheStats, PersistenceService};
use crate::config::ProviderConfig;
use crate::sources::{
    AlphaVantageSource, BlsSource, CensusSource, DataSource, EiaSource, FredSource, ImfSource,
    NasdaqSource, WorldBankSource,
};

/// Owns the shared cache and the full set of provider adapters.
pub struct DataService {
    cache: Arc<CacheService>,
    sources: Vec<Arc<dyn DataSource>>,
}

impl DataService {
    /// Builds the service from the process environment: the default
    /// storage root, per-provider credentials and TTL overrides.
    pub fn from_env() -> Self {
        let persistence = PersistenceService::default_root().map(PersistenceService::new);
        if persistence.is_none() {
            info!("No cache directory available; running memory-only");
        }
        Self::with_cache(Arc::new(CacheService::new(persistence)))
    }

    /// Builds the full adapter set over an existing cache. Configuration
    /// still comes from the environment.
    pub fn with_cache(cache: Arc<CacheService>) -> Self {
        let sources: Vec<Arc<dyn DataSource>> = vec![
            Arc::new(BlsSource::new(cache.clone(), ProviderConfig::from_env("bls"))),
            Arc::new(CensusSource::new(
                cache.clone(),
                ProviderConfig::from_env("census"),
            )),
            Arc::new(FredSource::new(
                cache.clone(),
                ProviderConfig::from_env("fred"),
            )),
            Arc::new(WorldBankSource::new(
                cache.clone(),
                ProviderConfig::from_env("world_bank"),
            )),
            Arc::new(ImfSource::new(cache.clone(), ProviderConfig::from_env("imf"))),
            Arc::new(NasdaqSource::new(
                cache.clone(),
                ProviderConfig::from_env("nasdaq"),
            )),
            Arc::new(AlphaVantageSource::new(
                cache.clone(),
                ProviderConfig::from_env("alpha_vantage"),
            )),
            Arc::new(EiaSource::new(cache.clone(), ProviderConfig::from_env("eia"))),
        ];
        info!(
            total = sources.len(),
            available = sources.iter().filter(|s| s.is_available()).count(),
            "Data sources constructed"
        );
        Self { cache, sources }
    }

    /// All constructed sources, available or not.
    pub fn sources(&self) -> impl Iterator<Item = &dyn DataSource> {
        self.sources.iter().map(Arc::as_ref)
    }

    /// Sources that can currently serve real data.
    pub fn available_sources(&self) -> Vec<&dyn DataSource> {
        self.sources()
            .filter(|source| source.is_available())
            .collect()
    }

    /// Looks up a source by provider name.
    pub fn source(&self, provider: &str) -> Option<&dyn DataSource> {
        self.sources().find(|source| source.provider() == provider)
    }

    /// The shared cache.
    pub fn cache(&self) -> &Arc<CacheService> {
        &self.cache
    }

    /// Running counters of the shared cache.
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_constructs_all_eight_sources() {
        let service = DataService::with_cache(Arc::new(CacheService::in_memory()));
        assert_eq!(service.sources().count(), 8);
    }

    #[tokio::test]
    async fn test_source_lookup_by_name() {
        let service = DataService::with_cache(Arc::new(CacheService::in_memory()));
        assert!(service.source("fred").is_some());
        assert!(service.source("world_bank").is_some());
        assert!(service.source("nonesuch").is_none());
    }

    #[tokio::test]
    async fn test_keyless_sources_are_always_available() {
        let service = DataService::with_cache(Arc::new(CacheService::in_memory()));
        // BLS, Census, World Bank and IMF serve without credentials
        for provider in ["bls", "census", "world_bank", "imf"] {
            let source = service.source(provider).expect("Source should exist");
            assert!(source.is_available(), "{provider} should be available");
        }
    }

    #[tokio::test]
    async fn test_stats_are_shared_across_sources() {
        let service = DataService::with_cache(Arc::new(CacheService::in_memory()));
        service.cache().set("k", None, 60_000).await;

        let from_service = service.cache_stats();
        let from_source = service.source("imf").expect("exists").cache_status();
        assert_eq!(from_service.size, 1);
        assert_eq!(from_source.size, 1);
    }
}
