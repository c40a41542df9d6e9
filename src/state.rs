//! Shared application state.
//!
//! Every external collaborator (cache, store, rate limiter, session
//! refresher) is built once at startup from `Config`, wrapped in `Arc`, and
//! injected here. Nothing in the crate holds a global client, so tests can
//! assemble the same state from in-process backends.
//!
//! # Structured Concurrency
//!
//! Background tasks are managed using `tokio_util::task::TaskTracker` and
//! `CancellationToken`. Call `shutdown()` to stop them before exit.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, trace, warn};

use crate::backends::{
    KeyValueCache, LocalRateLimiter, MemoryCache, MemoryStore, NoopSessionRefresher,
    RateLimitBackend, SessionRefresher, SupabaseSessionRefresher, SupabaseStore, UpstashCache,
    UpstashClient, UpstashSlidingWindow, WorkspaceStore,
};
use crate::config::{Config, StoreKeyKind};
use crate::models::BackendNames;
use crate::tenancy::{CustomDomainResolver, RootDomains, TenantRouter};

/// How often expired in-process entries are evicted.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// External collaborators of the routing core.
#[derive(Clone)]
pub struct Backends {
    pub cache: Option<Arc<dyn KeyValueCache>>,
    pub store: Option<Arc<dyn WorkspaceStore>>,
    pub rate_limiter: Option<Arc<dyn RateLimitBackend>>,
    pub sessions: Arc<dyn SessionRefresher>,
}

impl Backends {
    /// Select backend implementations from configuration.
    ///
    /// - Cache: Upstash when configured, otherwise in-process if
    ///   `CUSTOM_DOMAIN_LOCAL_CACHE` is set, otherwise none
    /// - Rate limiter: Upstash when configured, otherwise in-process if
    ///   `RATE_LIMIT_LOCAL_FALLBACK` is set, otherwise none
    /// - Store: Supabase when a URL and key are configured, otherwise the
    ///   static `STATIC_CUSTOM_DOMAINS` map, otherwise none
    /// - Sessions: Supabase when URL and anon key are configured
    ///
    /// # Errors
    ///
    /// Returns an error if an HTTP client cannot be built or the rate limit
    /// quota is invalid.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let upstash = match config.upstash_credentials() {
            Some((url, token)) => Some(
                UpstashClient::new(url, token).context("Failed to create Upstash client")?,
            ),
            None => None,
        };

        let cache: Option<Arc<dyn KeyValueCache>> = match &upstash {
            Some(client) => Some(Arc::new(UpstashCache::new(client.clone()))),
            None if config.custom_domain_local_cache => {
                info!("Upstash not configured, caching custom domains in-process");
                Some(Arc::new(MemoryCache::new()))
            }
            None => {
                info!("Upstash not configured, custom domain lookups are not cached");
                None
            }
        };

        let rate_limiter: Option<Arc<dyn RateLimitBackend>> = match &upstash {
            Some(client) => Some(Arc::new(
                UpstashSlidingWindow::new(
                    client.clone(),
                    config.rate_limit_prefix.as_str(),
                    config.rate_limit_requests,
                    config.rate_limit_window,
                )
                .context("Invalid rate limit configuration")?,
            )),
            None if config.rate_limit_local_fallback => {
                info!("Upstash not configured, enforcing rate limits in-process");
                Some(Arc::new(
                    LocalRateLimiter::new(config.rate_limit_requests, config.rate_limit_window)
                        .context("Invalid rate limit configuration")?,
                ))
            }
            None => {
                warn!("Upstash not configured, API rate limiting disabled");
                None
            }
        };

        let store: Option<Arc<dyn WorkspaceStore>> = match (
            config.supabase_url.as_deref(),
            config.store_key(),
        ) {
            (Some(url), Some((key, kind))) => {
                if kind == StoreKeyKind::Anonymous {
                    warn!(
                        "SUPABASE_SERVICE_ROLE_KEY not set, custom domain lookups use the anon key \
                         and only work if the workspaces table allows anonymous reads"
                    );
                }
                Some(Arc::new(
                    SupabaseStore::new(url, key, &config.workspaces_table)
                        .context("Failed to create Supabase store client")?,
                ))
            }
            _ if !config.static_custom_domains.is_empty() => {
                info!(
                    count = config.static_custom_domains.len(),
                    "Using static custom domain map"
                );
                Some(Arc::new(MemoryStore::new(
                    config.static_custom_domains.iter().cloned(),
                )))
            }
            _ => {
                warn!("No workspace store configured, custom domains will not resolve");
                None
            }
        };

        let sessions: Arc<dyn SessionRefresher> = match (
            config.supabase_url.as_deref(),
            config.supabase_anon_key.as_deref(),
            config.session_cookie_name(),
        ) {
            (Some(url), Some(anon_key), Some(cookie_name)) => Arc::new(
                SupabaseSessionRefresher::new(url, anon_key, cookie_name)
                    .context("Failed to create session refresher")?
                    .with_refresh_margin(config.session_refresh_margin)
                    .with_cookie_max_age(config.session_cookie_max_age)
                    .with_secure_cookies(config.session_cookie_secure),
            ),
            _ => {
                info!("Identity provider not configured, session refresh disabled");
                Arc::new(NoopSessionRefresher)
            }
        };

        Ok(Self {
            cache,
            store,
            rate_limiter,
            sessions,
        })
    }

    /// Active implementation per concern, for health output.
    pub fn names(&self) -> BackendNames {
        BackendNames {
            cache: self.cache.as_ref().map(|c| c.name()),
            store: self.store.as_ref().map(|s| s.name()),
            rate_limiter: self.rate_limiter.as_ref().map(|r| r.name()),
            sessions: self.sessions.name(),
        }
    }
}

/// Shared application state for the tower stack and handlers.
///
/// # Lifecycle
///
/// ```rust,ignore
/// let state = AppState::new(config, backends);
/// // ... serve ...
/// state.shutdown().await;
/// ```
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub backends: Backends,
    pub tenant_router: Arc<TenantRouter>,
    /// Timestamp when the application started
    pub started_at: Instant,
    task_tracker: TaskTracker,
    cancellation_token: CancellationToken,
}

impl AppState {
    /// Build state and spawn the background sweeper.
    ///
    /// Must be called inside a Tokio runtime.
    pub fn new(config: Config, backends: Backends) -> Self {
        let root_domains = RootDomains::new(&config.root_domains)
            .with_reserved_subdomains(&config.reserved_subdomains);
        let resolver = CustomDomainResolver::new(backends.cache.clone(), backends.store.clone())
            .with_key_prefix(config.custom_domain_cache_prefix.as_str())
            .with_ttl(config.custom_domain_cache_ttl);
        let tenant_router = Arc::new(TenantRouter::new(
            root_domains,
            config.api_prefix.as_str(),
            resolver,
        ));

        let state = Self {
            config: Arc::new(config),
            backends,
            tenant_router,
            started_at: Instant::now(),
            task_tracker: TaskTracker::new(),
            cancellation_token: CancellationToken::new(),
        };

        state.spawn_sweep_task(SWEEP_INTERVAL);
        state
    }

    /// Periodically evict expired cache entries and idle limiter keys.
    fn spawn_sweep_task(&self, every: Duration) {
        let cache = self.backends.cache.clone();
        let rate_limiter = self.backends.rate_limiter.clone();
        let cancel = self.cancellation_token.clone();

        self.task_tracker.spawn(async move {
            let mut ticker = interval(every);
            ticker.tick().await; // Skip the first immediate tick

            loop {
                tokio::select! {
                    biased;

                    _ = cancel.cancelled() => {
                        debug!("Sweep task received cancellation signal");
                        break;
                    }
                    _ = ticker.tick() => {
                        let cache_removed = match &cache {
                            Some(cache) => cache.sweep().await,
                            None => 0,
                        };
                        let limiter_removed = match &rate_limiter {
                            Some(limiter) => limiter.sweep().await,
                            None => 0,
                        };
                        trace!(cache_removed, limiter_removed, "Sweep completed");
                    }
                }
            }

            debug!("Sweep task shutting down");
        });
    }

    /// True once `shutdown()` has been called.
    pub fn is_shutting_down(&self) -> bool {
        self.cancellation_token.is_cancelled()
    }

    /// Stop background tasks and wait for them to finish.
    pub async fn shutdown(&self) {
        info!("Initiating graceful shutdown of background tasks");

        self.cancellation_token.cancel();
        self.task_tracker.close();
        self.task_tracker.wait().await;

        info!("All background tasks have completed");
    }

    /// Get the application uptime in seconds.
    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}
