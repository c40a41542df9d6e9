//! Custom-domain resolution.
//!
//! Maps a customer-owned hostname to the slug of the workspace that claims
//! it, through a two-tier lookup:
//!
//! 1. Cache (`{prefix}{hostname}`). A hit returns immediately. A cache error
//!    is logged and the lookup continues to the store.
//! 2. Store. A hit is written back to the cache (best-effort, errors are
//!    logged and dropped) and returned.
//!
//! Store failures come back as `Err` so callers can tell a degraded lookup
//! from a genuine miss. Entries expire lazily after the TTL; `invalidate`
//! removes one immediately.

use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, warn};

use crate::backends::{CacheError, KeyValueCache, StoreError, WorkspaceStore};
use crate::config::DEFAULT_CUSTOM_DOMAIN_CACHE_PREFIX;
use crate::metrics;

/// Default lifetime of a cached custom-domain entry.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(3600);

#[derive(Debug, Error)]
pub enum ResolutionError {
    #[error("no workspace store configured")]
    NoStore,

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Where a resolved slug came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionSource {
    Cache,
    Store,
}

impl ResolutionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResolutionSource::Cache => "cache",
            ResolutionSource::Store => "store",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub slug: String,
    pub source: ResolutionSource,
}

pub struct CustomDomainResolver {
    cache: Option<Arc<dyn KeyValueCache>>,
    store: Option<Arc<dyn WorkspaceStore>>,
    key_prefix: String,
    ttl: Duration,
}

impl std::fmt::Debug for CustomDomainResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CustomDomainResolver")
            .field("cache", &self.cache.as_ref().map(|c| c.name()))
            .field("store", &self.store.as_ref().map(|s| s.name()))
            .field("key_prefix", &self.key_prefix)
            .field("ttl", &self.ttl)
            .finish()
    }
}

impl CustomDomainResolver {
    pub fn new(
        cache: Option<Arc<dyn KeyValueCache>>,
        store: Option<Arc<dyn WorkspaceStore>>,
    ) -> Self {
        Self {
            cache,
            store,
            key_prefix: DEFAULT_CUSTOM_DOMAIN_CACHE_PREFIX.to_string(),
            ttl: DEFAULT_CACHE_TTL,
        }
    }

    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn cache_name(&self) -> Option<&'static str> {
        self.cache.as_ref().map(|c| c.name())
    }

    pub fn store_name(&self) -> Option<&'static str> {
        self.store.as_ref().map(|s| s.name())
    }

    pub fn cache_key(&self, hostname: &str) -> String {
        format!("{}{hostname}", self.key_prefix)
    }

    /// Resolve `hostname` to a workspace slug.
    ///
    /// `Ok(None)` means no workspace claims the hostname.
    ///
    /// # Errors
    ///
    /// `ResolutionError::NoStore` when the cache missed and no store is
    /// configured; `ResolutionError::Store` when the store query failed.
    pub async fn resolve(&self, hostname: &str) -> Result<Option<Resolution>, ResolutionError> {
        let started = Instant::now();
        let result = self.lookup(hostname).await;
        metrics::record_resolve_duration(started.elapsed().as_secs_f64());

        let source = match &result {
            Ok(Some(resolution)) => resolution.source.as_str(),
            Ok(None) => "miss",
            Err(_) => "error",
        };
        metrics::record_custom_domain_lookup(source);
        result
    }

    async fn lookup(&self, hostname: &str) -> Result<Option<Resolution>, ResolutionError> {
        let key = self.cache_key(hostname);

        if let Some(cache) = &self.cache {
            match cache.get(&key).await {
                Ok(Some(slug)) => {
                    debug!(hostname, slug = %slug, "Custom domain resolved from cache");
                    return Ok(Some(Resolution {
                        slug,
                        source: ResolutionSource::Cache,
                    }));
                }
                Ok(None) => {}
                Err(e) => {
                    metrics::record_backend_error(cache.name(), "get");
                    warn!(hostname, backend = cache.name(), error = %e, "Cache lookup failed, querying store");
                }
            }
        }

        let Some(store) = &self.store else {
            return Err(ResolutionError::NoStore);
        };

        let slug = store.slug_for_custom_domain(hostname).await.map_err(|e| {
            metrics::record_backend_error(store.name(), "query");
            e
        })?;

        let Some(slug) = slug else {
            debug!(hostname, "No workspace claims custom domain");
            return Ok(None);
        };

        if let Some(cache) = &self.cache {
            if let Err(e) = cache.set(&key, &slug, self.ttl).await {
                metrics::record_backend_error(cache.name(), "set");
                warn!(hostname, backend = cache.name(), error = %e, "Failed to cache custom domain");
            }
        }

        debug!(hostname, slug = %slug, "Custom domain resolved from store");
        Ok(Some(Resolution {
            slug,
            source: ResolutionSource::Store,
        }))
    }

    /// Drop the cached entry for `hostname`, if a cache is configured.
    ///
    /// Returns whether a cache was asked to delete the entry.
    ///
    /// # Errors
    ///
    /// Returns the cache error if the delete failed.
    pub async fn invalidate(&self, hostname: &str) -> Result<bool, CacheError> {
        let Some(cache) = &self.cache else {
            return Ok(false);
        };
        cache.delete(&self.cache_key(hostname)).await.map_err(|e| {
            metrics::record_backend_error(cache.name(), "delete");
            e
        })?;
        debug!(hostname, "Invalidated cached custom domain");
        Ok(true)
    }
}
