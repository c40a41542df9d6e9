//! Path rewriting.
//!
//! Maps a client-visible path onto the internal workspace route
//! `/{slug}{path}`. The rewrite is server-side only: the client URL never
//! changes, only the route the request is dispatched to.
//!
//! Applying the rewriter to its own output is a no-op, which keeps requests
//! that pass through the routing layer twice from turning into
//! `/{slug}/{slug}/...`.

/// Outcome of planning a rewrite.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RewritePlan {
    /// Leave the request alone.
    Keep(KeepReason),
    /// Dispatch the request to this path (and query).
    Rewrite(String),
}

/// Why a request is not rewritten.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeepReason {
    /// No workspace was resolved for the host.
    NoWorkspace,
    /// The path is under the API namespace.
    ApiNamespace,
    /// The path already targets the workspace route.
    AlreadyPrefixed,
}

impl KeepReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeepReason::NoWorkspace => "no_workspace",
            KeepReason::ApiNamespace => "api_namespace",
            KeepReason::AlreadyPrefixed => "already_prefixed",
        }
    }
}

/// Check whether `path` falls under the API namespace.
///
/// This is a plain prefix match: every path that begins with the prefix
/// bypasses rewriting.
pub fn is_api_path(path: &str, api_prefix: &str) -> bool {
    path.starts_with(api_prefix)
}

/// Check whether `path` already targets `/{slug}`, on a segment boundary.
pub fn is_workspace_path(path: &str, slug: &str) -> bool {
    path.strip_prefix('/')
        .and_then(|rest| rest.strip_prefix(slug))
        .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
}

/// Plan the rewrite for a request.
///
/// * `slug` - resolved workspace slug, if any
/// * `path` - original request path (starts with `/`)
/// * `query` - original query string without the leading `?`
/// * `api_prefix` - API namespace prefix (e.g. `/api`)
pub fn plan_rewrite(
    slug: Option<&str>,
    path: &str,
    query: Option<&str>,
    api_prefix: &str,
) -> RewritePlan {
    let Some(slug) = slug else {
        return RewritePlan::Keep(KeepReason::NoWorkspace);
    };

    if is_api_path(path, api_prefix) {
        return RewritePlan::Keep(KeepReason::ApiNamespace);
    }

    if is_workspace_path(path, slug) {
        return RewritePlan::Keep(KeepReason::AlreadyPrefixed);
    }

    RewritePlan::Rewrite(rewrite_target(slug, path, query))
}

/// Build `/{slug}{path}` plus the query string when present.
pub fn rewrite_target(slug: &str, path: &str, query: Option<&str>) -> String {
    let query_len = query.map_or(0, |q| q.len() + 1);
    let mut target = String::with_capacity(2 + slug.len() + path.len() + query_len);
    target.push('/');
    target.push_str(slug);
    if !path.starts_with('/') {
        target.push('/');
    }
    target.push_str(path);
    if let Some(query) = query.filter(|q| !q.is_empty()) {
        target.push('?');
        target.push_str(query);
    }
    target
}
