//! Application configuration loaded from environment variables.
//!
//! # Configuration Hierarchy
//!
//! All configuration is loaded from environment variables with sensible defaults
//! for development. In production, configure via environment variables or a `.env` file.
//!
//! # Tenant Routing
//!
//! - `ROOT_DOMAINS`: Comma-separated domains whose first label is a workspace slug
//! - `RESERVED_SUBDOMAINS`: Labels under a root domain that are never workspaces
//! - `API_PREFIX`: Path namespace that is never rewritten (default: `/api`)
//!
//! # Backends
//!
//! - `UPSTASH_REDIS_REST_URL` + `UPSTASH_REDIS_REST_TOKEN`: Shared key-value backend
//!   for the custom domain cache and the sliding window rate limiter
//! - `SUPABASE_URL` + `SUPABASE_SERVICE_ROLE_KEY` (or `SUPABASE_ANON_KEY`): Workspace
//!   store and identity provider
//!
//! Every backend is optional. A missing backend disables the feature it powers
//! (rate limiting, caching, custom domain lookup, session refresh) instead of
//! failing startup. A half-configured backend (URL without token) is an error.

use std::env;
use std::time::Duration;

use crate::error::{AppError, AppResult};

/// Default root domains: production apex, localhost, and wildcard-DNS test domains.
pub const DEFAULT_ROOT_DOMAINS: &str = "openpolicyhq.com,localhost,lvh.me,localtest.me";

/// Default API namespace.
pub const DEFAULT_API_PREFIX: &str = "/api";

/// Default cache key namespace for custom domain lookups.
pub const DEFAULT_CUSTOM_DOMAIN_CACHE_PREFIX: &str = "custom_domain:";

/// Upper bound for `CUSTOM_DOMAIN_CACHE_TTL_SECS` (30 days).
pub const MAX_CUSTOM_DOMAIN_CACHE_TTL: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Which key the workspace store is queried with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKeyKind {
    /// Service role key, bypasses row level security.
    ServiceRole,
    /// Public anonymous key. Only works if the workspaces table allows
    /// anonymous reads of `custom_domain` and `slug`.
    Anonymous,
}

/// Application configuration loaded from environment variables.
///
/// # Example
///
/// ```rust,ignore
/// let config = Config::from_env()?;
/// println!("Server will listen on {}", config.server_addr());
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    // =========================================================================
    // Server Configuration
    // =========================================================================
    /// Server host address (default: "0.0.0.0")
    pub host: String,

    /// Server port (default: 3000)
    pub port: u16,

    // =========================================================================
    // Tenant Routing Configuration
    // =========================================================================
    /// Domains that enable subdomain-style workspace addressing (lowercased)
    pub root_domains: Vec<String>,

    /// Subdomains treated as the root domain itself (e.g. "www")
    pub reserved_subdomains: Vec<String>,

    /// API namespace prefix; paths under it are never rewritten
    pub api_prefix: String,

    // =========================================================================
    // Key-Value Backend (cache + rate limiter)
    // =========================================================================
    /// Upstash-compatible REST endpoint
    pub upstash_redis_rest_url: Option<String>,

    /// Bearer token for the REST endpoint
    pub upstash_redis_rest_token: Option<String>,

    /// Namespace tag prepended to custom domain cache keys
    pub custom_domain_cache_prefix: String,

    /// Lifetime of a cached custom domain -> slug mapping (default: 1 hour)
    pub custom_domain_cache_ttl: Duration,

    /// Cache custom domain lookups in-process when no remote cache is configured
    pub custom_domain_local_cache: bool,

    // =========================================================================
    // Rate Limiting Configuration
    // =========================================================================
    /// Requests allowed per window per client IP (default: 10)
    pub rate_limit_requests: u32,

    /// Sliding window length (default: 10 seconds)
    pub rate_limit_window: Duration,

    /// Key namespace for the remote limiter
    pub rate_limit_prefix: String,

    /// Enforce the window in-process when no remote backend is configured
    pub rate_limit_local_fallback: bool,

    // =========================================================================
    // Workspace Store + Identity Provider
    // =========================================================================
    /// Supabase project URL
    pub supabase_url: Option<String>,

    /// Privileged key for store lookups
    pub supabase_service_role_key: Option<String>,

    /// Public key; store fallback and session refresh key
    pub supabase_anon_key: Option<String>,

    /// Table holding workspaces (`slug`, `custom_domain` columns)
    pub workspaces_table: String,

    /// Static `host -> slug` mappings used when no store is configured
    pub static_custom_domains: Vec<(String, String)>,

    // =========================================================================
    // Session Configuration
    // =========================================================================
    /// Identity session cookie name (derived from the project ref when unset)
    pub session_cookie_name: Option<String>,

    /// Refresh the session when the access token expires within this margin
    pub session_refresh_margin: Duration,

    /// Max-Age written on refreshed session cookies (default: 400 days)
    pub session_cookie_max_age: Duration,

    /// Secure attribute on refreshed session cookies
    pub session_cookie_secure: bool,

    // =========================================================================
    // Security Configuration
    // =========================================================================
    /// Trusted proxy CIDR ranges. Used to flag forwarded IPs arriving
    /// without a trusted proxy in front. Empty trusts all sources.
    pub trusted_proxies: Vec<String>,

    /// Comma-separated list of allowed CORS origins ("*" allows all)
    pub cors_allowed_origins: Vec<String>,

    /// Maximum request body size in bytes (default: 2MB)
    pub max_request_body_size: usize,

    // =========================================================================
    // Observability Configuration
    // =========================================================================
    /// Log level (e.g., "info", "debug", "trace")
    pub log_level: String,

    /// Emit JSON log lines instead of human-readable text
    pub log_json: bool,

    /// Port for Prometheus metrics endpoint (default: 9090, 0 = disabled)
    pub metrics_port: u16,
}

impl Config {
    /// Load configuration from environment variables with sensible defaults.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ConfigError` if any value fails to parse or the
    /// resulting configuration is inconsistent.
    pub fn from_env() -> AppResult<Self> {
        // Load an .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let config = Self {
            // Server
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: Self::parse_env("PORT", 3000)?,

            // Tenant routing
            root_domains: parse_domain_list(
                &env::var("ROOT_DOMAINS").unwrap_or_else(|_| DEFAULT_ROOT_DOMAINS.to_string()),
            ),
            reserved_subdomains: parse_domain_list(
                &env::var("RESERVED_SUBDOMAINS").unwrap_or_default(),
            ),
            api_prefix: env::var("API_PREFIX").unwrap_or_else(|_| DEFAULT_API_PREFIX.to_string()),

            // Key-value backend
            upstash_redis_rest_url: Self::optional_env("UPSTASH_REDIS_REST_URL"),
            upstash_redis_rest_token: Self::optional_env("UPSTASH_REDIS_REST_TOKEN"),
            custom_domain_cache_prefix: env::var("CUSTOM_DOMAIN_CACHE_PREFIX")
                .unwrap_or_else(|_| DEFAULT_CUSTOM_DOMAIN_CACHE_PREFIX.to_string()),
            custom_domain_cache_ttl: Duration::from_secs(Self::parse_env(
                "CUSTOM_DOMAIN_CACHE_TTL_SECS",
                3600,
            )?),
            custom_domain_local_cache: Self::parse_env("CUSTOM_DOMAIN_LOCAL_CACHE", false)?,

            // Rate limiting
            rate_limit_requests: Self::parse_env("RATE_LIMIT_REQUESTS", 10)?,
            rate_limit_window: Duration::from_secs(Self::parse_env("RATE_LIMIT_WINDOW_SECS", 10)?),
            rate_limit_prefix: env::var("RATE_LIMIT_PREFIX")
                .unwrap_or_else(|_| "ratelimit".to_string()),
            rate_limit_local_fallback: Self::parse_env("RATE_LIMIT_LOCAL_FALLBACK", false)?,

            // Store + identity
            supabase_url: Self::optional_env("SUPABASE_URL")
                .map(|url| url.trim_end_matches('/').to_string()),
            supabase_service_role_key: Self::optional_env("SUPABASE_SERVICE_ROLE_KEY"),
            supabase_anon_key: Self::optional_env("SUPABASE_ANON_KEY"),
            workspaces_table: env::var("WORKSPACES_TABLE")
                .unwrap_or_else(|_| "workspaces".to_string()),
            static_custom_domains: parse_static_domains(
                &env::var("STATIC_CUSTOM_DOMAINS").unwrap_or_default(),
            )?,

            // Session
            session_cookie_name: Self::optional_env("SESSION_COOKIE_NAME"),
            session_refresh_margin: Duration::from_secs(Self::parse_env(
                "SESSION_REFRESH_MARGIN_SECS",
                90,
            )?),
            session_cookie_max_age: Duration::from_secs(Self::parse_env(
                "SESSION_COOKIE_MAX_AGE_SECS",
                400 * 24 * 60 * 60,
            )?),
            session_cookie_secure: Self::parse_env("SESSION_COOKIE_SECURE", true)?,

            // Security
            trusted_proxies: parse_list(&env::var("TRUSTED_PROXIES").unwrap_or_default()),
            cors_allowed_origins: parse_list(
                &env::var("CORS_ALLOWED_ORIGINS").unwrap_or_else(|_| "*".to_string()),
            ),
            max_request_body_size: Self::parse_env("MAX_REQUEST_BODY_SIZE", 2 * 1024 * 1024)?,

            // Observability
            log_level: env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            log_json: env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json")),
            metrics_port: Self::parse_env("METRICS_PORT", 9090)?,
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values for consistency and correctness.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ConfigError` if validation fails.
    pub fn validate(&self) -> AppResult<()> {
        if !self.api_prefix.starts_with('/') || self.api_prefix == "/" {
            return Err(AppError::ConfigError(format!(
                "API_PREFIX must start with '/' and name a namespace, got {:?}",
                self.api_prefix
            )));
        }

        if self.root_domains.is_empty() {
            return Err(AppError::ConfigError(
                "ROOT_DOMAINS must contain at least one domain".to_string(),
            ));
        }

        if self.rate_limit_requests == 0 {
            return Err(AppError::ConfigError(
                "RATE_LIMIT_REQUESTS must be greater than 0".to_string(),
            ));
        }

        if self.rate_limit_window.is_zero() {
            return Err(AppError::ConfigError(
                "RATE_LIMIT_WINDOW_SECS must be greater than 0".to_string(),
            ));
        }

        if self.custom_domain_cache_ttl.is_zero()
            || self.custom_domain_cache_ttl > MAX_CUSTOM_DOMAIN_CACHE_TTL
        {
            return Err(AppError::ConfigError(format!(
                "CUSTOM_DOMAIN_CACHE_TTL_SECS must be between 1 and {}",
                MAX_CUSTOM_DOMAIN_CACHE_TTL.as_secs()
            )));
        }

        if self.upstash_redis_rest_url.is_some() != self.upstash_redis_rest_token.is_some() {
            return Err(AppError::ConfigError(
                "UPSTASH_REDIS_REST_URL and UPSTASH_REDIS_REST_TOKEN must be set together"
                    .to_string(),
            ));
        }

        if self.max_request_body_size == 0 {
            return Err(AppError::ConfigError(
                "MAX_REQUEST_BODY_SIZE must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Get the full server address for binding.
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// REST URL and token of the shared key-value backend, when both are set.
    pub fn upstash_credentials(&self) -> Option<(&str, &str)> {
        match (&self.upstash_redis_rest_url, &self.upstash_redis_rest_token) {
            (Some(url), Some(token)) => Some((url.as_str(), token.as_str())),
            _ => None,
        }
    }

    /// Key used for workspace store lookups, preferring the service role key.
    ///
    /// Returns `None` if no Supabase URL or no key is configured.
    pub fn store_key(&self) -> Option<(&str, StoreKeyKind)> {
        self.supabase_url.as_ref()?;
        if let Some(key) = &self.supabase_service_role_key {
            return Some((key.as_str(), StoreKeyKind::ServiceRole));
        }
        self.supabase_anon_key
            .as_deref()
            .map(|key| (key, StoreKeyKind::Anonymous))
    }

    /// Resolve the session cookie name.
    ///
    /// Uses `SESSION_COOKIE_NAME` when set, otherwise derives
    /// `sb-<project-ref>-auth-token` from the first label of the Supabase host.
    pub fn session_cookie_name(&self) -> Option<String> {
        if let Some(name) = &self.session_cookie_name {
            return Some(name.clone());
        }
        let url = self.supabase_url.as_deref()?;
        let host = url
            .split_once("://")
            .map_or(url, |(_, rest)| rest)
            .split(['/', ':'])
            .next()?;
        let project_ref = host.split('.').next().filter(|r| !r.is_empty())?;
        Some(format!("sb-{project_ref}-auth-token"))
    }

    /// Check if Prometheus metrics export is enabled.
    pub fn metrics_enabled(&self) -> bool {
        self.metrics_port > 0
    }

    /// Get the metrics endpoint address.
    ///
    /// Returns `None` if metrics are disabled (port = 0).
    pub fn metrics_addr(&self) -> Option<std::net::SocketAddr> {
        if self.metrics_enabled() {
            Some(std::net::SocketAddr::from((
                [0, 0, 0, 0],
                self.metrics_port,
            )))
        } else {
            None
        }
    }

    /// Parse an environment variable into the specified type with a default value.
    fn parse_env<T>(name: &str, default: T) -> AppResult<T>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        match env::var(name) {
            Ok(val) => val
                .trim()
                .parse()
                .map_err(|e| AppError::ConfigError(format!("Invalid {name}: {e}"))),
            Err(_) => Ok(default),
        }
    }

    /// Read an optional variable, treating empty values as unset.
    fn optional_env(name: &str) -> Option<String> {
        env::var(name)
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }
}

/// Split a comma-separated list, trimming whitespace and dropping empties.
fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Like [`parse_list`], but lowercases and strips a trailing dot from each entry.
fn parse_domain_list(raw: &str) -> Vec<String> {
    parse_list(raw)
        .into_iter()
        .map(|d| d.trim_end_matches('.').to_ascii_lowercase())
        .filter(|d| !d.is_empty())
        .collect()
}

/// Parse `host=slug` pairs.
fn parse_static_domains(raw: &str) -> AppResult<Vec<(String, String)>> {
    parse_list(raw)
        .into_iter()
        .map(|entry| {
            let (host, slug) = entry
                .split_once('=')
                .map(|(h, s)| (h.trim(), s.trim()))
                .filter(|(h, s)| !h.is_empty() && !s.is_empty())
                .ok_or_else(|| {
                    AppError::ConfigError(format!(
                        "Invalid STATIC_CUSTOM_DOMAINS entry {entry:?}, expected host=slug"
                    ))
                })?;
            Ok((host.to_ascii_lowercase(), slug.to_string()))
        })
        .collect()
}

/// Default configuration for testing and development.
///
/// Production deployments should use `Config::from_env()` instead.
impl Default for Config {
    fn default() -> Self {
        Self {
            // Server
            host: "0.0.0.0".to_string(),
            port: 3000,
            // Tenant routing
            root_domains: parse_domain_list(DEFAULT_ROOT_DOMAINS),
            reserved_subdomains: vec![],
            api_prefix: DEFAULT_API_PREFIX.to_string(),
            // Key-value backend
            upstash_redis_rest_url: None,
            upstash_redis_rest_token: None,
            custom_domain_cache_prefix: DEFAULT_CUSTOM_DOMAIN_CACHE_PREFIX.to_string(),
            custom_domain_cache_ttl: Duration::from_secs(3600),
            custom_domain_local_cache: false,
            // Rate limiting
            rate_limit_requests: 10,
            rate_limit_window: Duration::from_secs(10),
            rate_limit_prefix: "ratelimit".to_string(),
            rate_limit_local_fallback: false,
            // Store + identity
            supabase_url: None,
            supabase_service_role_key: None,
            supabase_anon_key: None,
            workspaces_table: "workspaces".to_string(),
            static_custom_domains: vec![],
            // Session
            session_cookie_name: None,
            session_refresh_margin: Duration::from_secs(90),
            session_cookie_max_age: Duration::from_secs(400 * 24 * 60 * 60),
            session_cookie_secure: true,
            // Security
            trusted_proxies: vec![],
            cors_allowed_origins: vec!["*".to_string()],
            max_request_body_size: 2 * 1024 * 1024,
            // Observability
            log_level: "info".to_string(),
            log_json: false,
            metrics_port: 9090,
        }
    }
}
