use chrono::{DateTime, Utc};
use serde::Serialize;

/// Active backend implementation per concern.
///
/// `None` means the concern is disabled (for example no workspace store is
/// configured, so custom domains never resolve).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackendNames {
    pub cache: Option<&'static str>,
    pub store: Option<&'static str>,
    pub rate_limiter: Option<&'static str>,
    pub sessions: &'static str,
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// `healthy`, or `degraded` when custom domains cannot be resolved
    pub status: String,
    /// Service version
    pub version: String,
    /// Current timestamp
    pub timestamp: DateTime<Utc>,
    pub uptime_seconds: u64,
    pub backends: BackendNames,
}

/// Body served for a workspace page.
///
/// The router's page handlers answer with this document so operators can see
/// what a tenant request was rewritten to.
#[derive(Debug, Serialize)]
pub struct WorkspacePageResponse {
    /// Workspace slug the request was routed to
    pub workspace: String,
    /// Path inside the workspace, always starting with `/`
    pub path: String,
    /// URI the client requested before any rewrite
    pub original_uri: String,
    /// How the workspace was determined, `None` for direct `/{workspace}` hits
    pub source: Option<&'static str>,
}
