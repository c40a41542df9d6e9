//! Tenant routing: the single decision function every entry point calls.
//!
//! ```text
//! Host ──► classify ──┬─ Subdomain ─────────────┐
//!                     ├─ CustomDomain ─► resolve ┼─► validate slug ─► plan rewrite
//!                     └─ NoTenantSignal / Root ──┴─► pass through
//! ```
//!
//! API paths are short-circuited before resolution so they never cost a
//! cache or store round trip.

use crate::metrics;
use crate::validation::validate_slug;

use super::host::{HostClassification, RootDomains};
use super::resolver::{CustomDomainResolver, ResolutionSource};
use super::rewrite::{KeepReason, RewritePlan, is_api_path, plan_rewrite};

use tracing::{debug, warn};

/// How the workspace of a rewritten request was identified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkspaceSource {
    Subdomain,
    CustomDomainCache,
    CustomDomainStore,
}

impl WorkspaceSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkspaceSource::Subdomain => "subdomain",
            WorkspaceSource::CustomDomainCache => "custom_domain_cache",
            WorkspaceSource::CustomDomainStore => "custom_domain_store",
        }
    }
}

impl From<ResolutionSource> for WorkspaceSource {
    fn from(source: ResolutionSource) -> Self {
        match source {
            ResolutionSource::Cache => WorkspaceSource::CustomDomainCache,
            ResolutionSource::Store => WorkspaceSource::CustomDomainStore,
        }
    }
}

/// Why a request is passed through unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassReason {
    NoHost,
    NoTenantSignal,
    RootDomain,
    ApiNamespace,
    AlreadyPrefixed,
    /// No workspace claims the custom domain.
    Unresolved,
    /// The custom-domain lookup failed; treated like `Unresolved`.
    ResolutionFailed,
    /// The resolved slug is not safe to use as a path segment.
    InvalidSlug,
}

impl PassReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            PassReason::NoHost => "no_host",
            PassReason::NoTenantSignal => "no_tenant_signal",
            PassReason::RootDomain => "root_domain",
            PassReason::ApiNamespace => "api_namespace",
            PassReason::AlreadyPrefixed => "already_prefixed",
            PassReason::Unresolved => "unresolved",
            PassReason::ResolutionFailed => "resolution_failed",
            PassReason::InvalidSlug => "invalid_slug",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rewrite {
    pub workspace: String,
    /// New path and query.
    pub target: String,
    pub source: WorkspaceSource,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoutingDecision {
    PassThrough(PassReason),
    Rewrite(Rewrite),
}

impl RoutingDecision {
    pub fn outcome(&self) -> &'static str {
        match self {
            RoutingDecision::PassThrough(reason) => reason.as_str(),
            RoutingDecision::Rewrite(_) => "rewrite",
        }
    }
}

#[derive(Debug)]
pub struct TenantRouter {
    root_domains: RootDomains,
    api_prefix: String,
    resolver: CustomDomainResolver,
}

impl TenantRouter {
    pub fn new(
        root_domains: RootDomains,
        api_prefix: impl Into<String>,
        resolver: CustomDomainResolver,
    ) -> Self {
        Self {
            root_domains,
            api_prefix: api_prefix.into(),
            resolver,
        }
    }

    /// Decide where a request goes.
    ///
    /// * `host` - `Host` header (or URI authority), port included
    /// * `path` - request path
    /// * `query` - query string without `?`
    pub async fn route(
        &self,
        host: Option<&str>,
        path: &str,
        query: Option<&str>,
    ) -> RoutingDecision {
        let decision = self.decide(host, path, query).await;
        metrics::record_routing_decision(decision.outcome());
        debug!(host = host.unwrap_or(""), path, outcome = decision.outcome(), "Routing decision");
        decision
    }

    async fn decide(
        &self,
        host: Option<&str>,
        path: &str,
        query: Option<&str>,
    ) -> RoutingDecision {
        let Some(host) = host else {
            return RoutingDecision::PassThrough(PassReason::NoHost);
        };

        let (slug, source) = match self.root_domains.classify(host) {
            HostClassification::NoTenantSignal => {
                return RoutingDecision::PassThrough(PassReason::NoTenantSignal);
            }
            HostClassification::RootDomain { .. } => {
                return RoutingDecision::PassThrough(PassReason::RootDomain);
            }
            HostClassification::Subdomain { subdomain, .. } => {
                (subdomain, WorkspaceSource::Subdomain)
            }
            HostClassification::CustomDomain { hostname } => {
                if is_api_path(path, &self.api_prefix) {
                    return RoutingDecision::PassThrough(PassReason::ApiNamespace);
                }
                match self.resolver.resolve(&hostname).await {
                    Ok(Some(resolution)) => (resolution.slug, resolution.source.into()),
                    Ok(None) => return RoutingDecision::PassThrough(PassReason::Unresolved),
                    Err(e) => {
                        warn!(hostname = %hostname, error = %e, "Custom domain resolution failed");
                        return RoutingDecision::PassThrough(PassReason::ResolutionFailed);
                    }
                }
            }
        };

        if let Err(e) = validate_slug(&slug) {
            warn!(slug = %slug, error = %e, "Refusing to route to invalid workspace slug");
            return RoutingDecision::PassThrough(PassReason::InvalidSlug);
        }

        match plan_rewrite(Some(&slug), path, query, &self.api_prefix) {
            RewritePlan::Rewrite(target) => RoutingDecision::Rewrite(Rewrite {
                workspace: slug,
                target,
                source,
            }),
            RewritePlan::Keep(KeepReason::ApiNamespace) => {
                RoutingDecision::PassThrough(PassReason::ApiNamespace)
            }
            RewritePlan::Keep(KeepReason::AlreadyPrefixed) => {
                RoutingDecision::PassThrough(PassReason::AlreadyPrefixed)
            }
            // A slug was passed in, so this arm is never taken.
            RewritePlan::Keep(KeepReason::NoWorkspace) => {
                RoutingDecision::PassThrough(PassReason::Unresolved)
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::backends::{MemoryCache, MemoryStore};
    use std::sync::Arc;

    fn router_with(store: Arc<MemoryStore>) -> TenantRouter {
        TenantRouter::new(
            RootDomains::new(["openpolicyhq.com", "localhost"]).with_reserved_subdomains(["www"]),
            "/api",
            CustomDomainResolver::new(Some(Arc::new(MemoryCache::new())), Some(store)),
        )
    }

    fn router() -> TenantRouter {
        router_with(Arc::new(MemoryStore::new([
            ("docs.customer.com", "customer1"),
            ("bad.customer.com", "../admin"),
        ])))
    }

    fn rewrite(workspace: &str, target: &str, source: WorkspaceSource) -> RoutingDecision {
        RoutingDecision::Rewrite(Rewrite {
            workspace: workspace.to_string(),
            target: target.to_string(),
            source,
        })
    }

    #[tokio::test]
    async fn test_subdomain_rewrite() {
        assert_eq!(
            router().route(Some("acme.openpolicyhq.com"), "/privacy", None).await,
            rewrite("acme", "/acme/privacy", WorkspaceSource::Subdomain)
        );
    }

    #[tokio::test]
    async fn test_custom_domain_rewrite() {
        let router = router();
        assert_eq!(
            router.route(Some("docs.customer.com"), "/terms", Some("v=2")).await,
            rewrite("customer1", "/customer1/terms?v=2", WorkspaceSource::CustomDomainStore)
        );
        assert_eq!(
            router.route(Some("docs.customer.com"), "/terms", None).await,
            rewrite("customer1", "/customer1/terms", WorkspaceSource::CustomDomainCache)
        );
    }

    #[tokio::test]
    async fn test_pass_through_reasons() {
        let router = router();
        let cases = [
            (None, "/", PassReason::NoHost),
            (Some("localhost:3000"), "/", PassReason::NoTenantSignal),
            (Some("openpolicyhq.com"), "/pricing", PassReason::RootDomain),
            (Some("www.openpolicyhq.com"), "/pricing", PassReason::RootDomain),
            (Some("acme.openpolicyhq.com"), "/api/documents", PassReason::ApiNamespace),
            (Some("acme.openpolicyhq.com"), "/acme/privacy", PassReason::AlreadyPrefixed),
            (Some("unknown.example.org"), "/terms", PassReason::Unresolved),
            (Some("bad.customer.com"), "/terms", PassReason::InvalidSlug),
            (Some("ACME_CORP.localhost"), "/", PassReason::InvalidSlug),
        ];

        for (host, path, reason) in cases {
            assert_eq!(
                router.route(host, path, None).await,
                RoutingDecision::PassThrough(reason),
                "host {host:?} path {path}"
            );
        }
    }

    #[tokio::test]
    async fn test_api_paths_skip_custom_domain_lookup() {
        let store = Arc::new(MemoryStore::new([("docs.customer.com", "customer1")]));
        let router = router_with(store.clone());

        assert_eq!(
            router.route(Some("docs.customer.com"), "/api/health", None).await,
            RoutingDecision::PassThrough(PassReason::ApiNamespace)
        );
        assert_eq!(store.query_count(), 0);
    }

    #[tokio::test]
    async fn test_missing_store_degrades_to_pass_through() {
        let router = TenantRouter::new(
            RootDomains::new(["openpolicyhq.com"]),
            "/api",
            CustomDomainResolver::new(None, None),
        );
        assert_eq!(
            router.route(Some("docs.customer.com"), "/terms", None).await,
            RoutingDecision::PassThrough(PassReason::ResolutionFailed)
        );
    }
}
