//! HTTP middleware run before route dispatch.
//!
//! - **Rate Limiting**: sliding window per client IP on API paths
//! - **Tenant Routing**: session refresh, workspace resolution, internal
//!   rewrite and session cookie propagation
//! - **Trusted Proxy Validation**: CIDR-based proxy source logging
//!
//! # Architecture
//!
//! ```text
//! Request → Rate Limiter → Tenant Routing → Router (handlers) → Response
//!              ↓                ↓
//!          429 Too Many    500 on session refresh failure
//! ```
//!
//! Both layers wrap the axum `Router` from the outside: middleware added with
//! `Router::layer` runs after the route has been matched and could not
//! change where the request goes.

pub mod ip;
pub mod rate_limit;
pub mod tenant;

pub use ip::{FALLBACK_IP, client_ip};
pub use rate_limit::{RateLimitLayer, RateLimitService, TrustedProxyConfig};
pub use tenant::{TenantContext, TenantRoutingLayer, TenantRoutingService};
