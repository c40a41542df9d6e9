//! Rate Limiter Gate.
//!
//! Applies only to paths under the API namespace. Each request is counted
//! against a sliding window keyed by client IP; once the window is exhausted
//! the request is answered with 429 before any tenant routing runs.
//!
//! # Backends
//!
//! The gate is backend-agnostic (`RateLimitBackend`). With no backend
//! configured the gate is a no-op. That is a development fallback, not a
//! security guarantee.
//!
//! A backend error is logged and the request is let through; an outage of
//! the counter store must not take the API down with it.
//!
//! # Response Headers
//!
//! On rate limit exceeded (429):
//! - `Retry-After`: Seconds until the window resets (at least 1)
//! - `X-RateLimit-Limit`: Requests allowed per window
//! - `X-RateLimit-Remaining`: Always `0`
//! - `X-RateLimit-Reset`: Window reset as Unix milliseconds
//!
//! Allowed API responses carry the same `X-RateLimit-*` headers.
//!
//! # IP Spoofing Mitigation
//!
//! Keys come from `X-Forwarded-For`; see `middleware::ip`. When
//! `TRUSTED_PROXIES` is configured and the server is run with connect info,
//! forwarding headers are only honored if the TCP peer is one of those
//! proxies. Any other peer is keyed by its own address.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::Json;
use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{HeaderValue, Request, Response, StatusCode};
use axum::response::IntoResponse;
use tower::{Layer, Service};
use tracing::{debug, warn};

use super::ip::client_ip;
use crate::backends::{RateLimitBackend, RateLimitOutcome};
use crate::error::ErrorResponse;
use crate::metrics;
use crate::tenancy::rewrite::is_api_path;

// =============================================================================
// Trusted Proxy CIDR Matching
// =============================================================================

/// Parsed CIDR network range for trusted proxy validation.
#[derive(Debug, Clone)]
pub struct CidrRange {
    network: IpAddr,
    prefix_len: u8,
}

impl CidrRange {
    /// Parse a CIDR notation string (e.g., "10.0.0.0/8" or "::1/128").
    /// A bare address is a single-host range.
    pub fn parse(cidr: &str) -> Option<Self> {
        let (addr, prefix) = match cidr.trim().split_once('/') {
            Some((addr, prefix)) => (addr, Some(prefix)),
            None => (cidr.trim(), None),
        };

        let network: IpAddr = addr.parse().ok()?;
        let max_prefix = match network {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        };
        let prefix_len = match prefix {
            Some(p) => p.parse().ok().filter(|len| *len <= max_prefix)?,
            None => max_prefix,
        };

        Some(Self {
            network,
            prefix_len,
        })
    }

    pub fn contains(&self, ip: &IpAddr) -> bool {
        match (&self.network, ip) {
            (IpAddr::V4(net), IpAddr::V4(addr)) => {
                let mask = u32::MAX
                    .checked_shl(32 - u32::from(self.prefix_len))
                    .unwrap_or(0);
                (u32::from(*net) & mask) == (u32::from(*addr) & mask)
            }
            (IpAddr::V6(net), IpAddr::V6(addr)) => {
                let mask = u128::MAX
                    .checked_shl(128 - u32::from(self.prefix_len))
                    .unwrap_or(0);
                (u128::from(*net) & mask) == (u128::from(*addr) & mask)
            }
            _ => false,
        }
    }
}

/// CIDR ranges of the reverse proxies in front of the service.
#[derive(Debug, Clone, Default)]
pub struct TrustedProxyConfig {
    ranges: Vec<CidrRange>,
}

impl TrustedProxyConfig {
    /// Invalid CIDR strings are logged as warnings and skipped.
    pub fn new(cidrs: &[String]) -> Self {
        let ranges: Vec<CidrRange> = cidrs
            .iter()
            .filter_map(|cidr| {
                let parsed = CidrRange::parse(cidr);
                if parsed.is_none() {
                    warn!(cidr = %cidr, "Invalid CIDR range in TRUSTED_PROXIES, skipping");
                }
                parsed
            })
            .collect();

        if !ranges.is_empty() {
            debug!(count = ranges.len(), "Trusted proxy ranges configured");
        }

        Self { ranges }
    }

    pub fn is_enabled(&self) -> bool {
        !self.ranges.is_empty()
    }

    /// True if `ip` falls in a configured range, or if none are configured.
    pub fn is_trusted(&self, ip: &IpAddr) -> bool {
        self.ranges.is_empty() || self.ranges.iter().any(|range| range.contains(ip))
    }
}

// =============================================================================
// Layer
// =============================================================================

/// Rate limiting layer for the tower stack.
///
/// ```rust,ignore
/// let backend: Arc<dyn RateLimitBackend> = Arc::new(LocalRateLimiter::new(10, window)?);
/// let app = RateLimitLayer::new(Some(backend), "/api", &[]).layer(router);
/// ```
#[derive(Clone)]
pub struct RateLimitLayer {
    backend: Option<Arc<dyn RateLimitBackend>>,
    api_prefix: Arc<str>,
    trusted_proxies: Arc<TrustedProxyConfig>,
}

impl RateLimitLayer {
    pub fn new(
        backend: Option<Arc<dyn RateLimitBackend>>,
        api_prefix: &str,
        trusted_proxies: &[String],
    ) -> Self {
        Self {
            backend,
            api_prefix: Arc::from(api_prefix),
            trusted_proxies: Arc::new(TrustedProxyConfig::new(trusted_proxies)),
        }
    }

    /// A gate that lets every request through.
    pub fn disabled(api_prefix: &str) -> Self {
        Self::new(None, api_prefix, &[])
    }

    pub fn is_enabled(&self) -> bool {
        self.backend.is_some()
    }
}

impl<S> Layer<S> for RateLimitLayer {
    type Service = RateLimitService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RateLimitService {
            inner,
            backend: self.backend.clone(),
            api_prefix: self.api_prefix.clone(),
            trusted_proxies: self.trusted_proxies.clone(),
        }
    }
}

/// Rate limiting service wrapper.
#[derive(Clone)]
pub struct RateLimitService<S> {
    inner: S,
    backend: Option<Arc<dyn RateLimitBackend>>,
    api_prefix: Arc<str>,
    trusted_proxies: Arc<TrustedProxyConfig>,
}

fn set_limit_headers(response: &mut Response<Body>, outcome: &RateLimitOutcome) {
    let headers = response.headers_mut();
    headers.insert("x-ratelimit-limit", HeaderValue::from(outcome.limit));
    headers.insert("x-ratelimit-remaining", HeaderValue::from(outcome.remaining));
    headers.insert("x-ratelimit-reset", HeaderValue::from(outcome.reset_ms));
}

fn too_many_requests(outcome: &RateLimitOutcome) -> Response<Body> {
    let now_ms = u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or(0);
    let retry_after = outcome.reset_ms.saturating_sub(now_ms).div_ceil(1000).max(1);

    let mut response = (
        StatusCode::TOO_MANY_REQUESTS,
        [("Retry-After", retry_after.to_string())],
        Json(ErrorResponse::new(
            "rate_limited",
            "Rate limit exceeded. Please retry later.",
        )),
    )
        .into_response();
    set_limit_headers(&mut response, outcome);
    response
}

impl<S> Service<Request<Body>> for RateLimitService<S>
where
    S: Service<Request<Body>, Response = Response<Body>> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response<Body>;
    type Error = S::Error;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let mut inner = self.inner.clone();

        let backend = match &self.backend {
            Some(backend) if is_api_path(req.uri().path(), &self.api_prefix) => backend.clone(),
            _ => return Box::pin(async move { inner.call(req).await }),
        };

        let peer = req
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip());
        let client_ip = client_ip(req.headers(), peer, &self.trusted_proxies).into_owned();

        Box::pin(async move {
            match backend.check(&client_ip).await {
                Ok(outcome) if outcome.success => {
                    let mut response = inner.call(req).await?;
                    set_limit_headers(&mut response, &outcome);
                    Ok(response)
                }
                Ok(outcome) => {
                    metrics::record_rate_limit_rejection();
                    warn!(
                        client_ip = %client_ip,
                        path = %req.uri().path(),
                        backend = backend.name(),
                        "Rate limit exceeded for IP"
                    );
                    Ok(too_many_requests(&outcome))
                }
                Err(e) => {
                    metrics::record_backend_error(backend.name(), "check");
                    warn!(
                        client_ip = %client_ip,
                        backend = backend.name(),
                        error = %e,
                        "Rate limit check failed, allowing request"
                    );
                    inner.call(req).await
                }
            }
        })
    }
}
