//! Multi-tenant request routing.
//!
//! Given a request's host and path, works out which workspace it addresses
//! and where inside the application it should be dispatched:
//!
//! - `host` classifies the `Host` header against the root-domain set
//! - `resolver` maps customer-owned domains to workspace slugs
//! - `rewrite` turns a slug and path into the internal route
//! - `router` composes the three into one `RoutingDecision`
//! - `cookies` carries refreshed session cookies onto the final response

pub mod cookies;
pub mod host;
pub mod resolver;
pub mod rewrite;
pub mod router;

pub use cookies::{CookieError, CookiePriority, PropagationReport, SameSite, SessionCookie};
pub use host::{HostClassification, RootDomains};
pub use resolver::{CustomDomainResolver, Resolution, ResolutionError, ResolutionSource};
pub use rewrite::{KeepReason, RewritePlan};
pub use router::{PassReason, Rewrite, RoutingDecision, TenantRouter, WorkspaceSource};
