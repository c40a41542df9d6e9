//! Tenant routing middleware.
//!
//! Runs before route dispatch, so a rewritten URI is what the router matches
//! on. Per request:
//!
//! ```text
//! session refresh ─► Cookie header updated ─► TenantRouter::route
//!        │                                          │
//!        │                              Rewrite ─► URI replaced, OriginalUri
//!        │                                          │  + TenantContext attached
//!        ▼                                          ▼
//!   cookies ──────────────────────────────► inner service ─► Set-Cookie copied
//! ```
//!
//! The client never sees the rewrite: only the URI the inner service routes
//! on changes.

use std::sync::Arc;
use std::task::{Context, Poll};

use axum::body::Body;
use axum::extract::OriginalUri;
use axum::http::header::HOST;
use axum::http::uri::PathAndQuery;
use axum::http::{Request, Response, Uri};
use axum::response::IntoResponse;
use tower::{Layer, Service};
use tracing::{debug, warn};

use crate::backends::SessionRefresher;
use crate::error::AppError;
use crate::metrics;
use crate::tenancy::cookies::{apply_to_request, propagate_cookies};
use crate::tenancy::{RoutingDecision, TenantRouter, WorkspaceSource};

/// Workspace attached to a rewritten request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantContext {
    pub workspace: String,
    pub source: WorkspaceSource,
}

#[derive(Clone)]
pub struct TenantRoutingLayer {
    router: Arc<TenantRouter>,
    sessions: Arc<dyn SessionRefresher>,
}

impl TenantRoutingLayer {
    pub fn new(router: Arc<TenantRouter>, sessions: Arc<dyn SessionRefresher>) -> Self {
        Self { router, sessions }
    }
}

impl<S> Layer<S> for TenantRoutingLayer {
    type Service = TenantRoutingService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        TenantRoutingService {
            inner,
            router: self.router.clone(),
            sessions: self.sessions.clone(),
        }
    }
}

#[derive(Clone)]
pub struct TenantRoutingService<S> {
    inner: S,
    router: Arc<TenantRouter>,
    sessions: Arc<dyn SessionRefresher>,
}

/// Host the client addressed: the `Host` header, else the URI authority
/// (HTTP/2 `:authority`).
fn request_host<B>(req: &Request<B>) -> Option<String> {
    req.headers()
        .get(HOST)
        .and_then(|h| h.to_str().ok())
        .or_else(|| req.uri().authority().map(|a| a.as_str()))
        .map(str::to_string)
}

/// `uri` with its path and query replaced by `target`.
fn rewrite_uri(uri: &Uri, target: &str) -> Result<Uri, axum::http::Error> {
    let mut parts = uri.clone().into_parts();
    parts.path_and_query = Some(PathAndQuery::try_from(target)?);
    Ok(Uri::from_parts(parts)?)
}

impl<S> Service<Request<Body>> for TenantRoutingService<S>
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

    fn call(&mut self, mut req: Request<Body>) -> Self::Future {
        let mut inner = self.inner.clone();
        let router = self.router.clone();
        let sessions = self.sessions.clone();

        Box::pin(async move {
            let cookies = match sessions.refresh(req.headers()).await {
                Ok(cookies) => cookies,
                Err(e) => {
                    metrics::record_backend_error(sessions.name(), "refresh");
                    return Ok(AppError::SessionRefresh(e.to_string()).into_response());
                }
            };
            apply_to_request(req.headers_mut(), &cookies);

            let host = request_host(&req);
            let uri = req.uri().clone();
            let decision = router.route(host.as_deref(), uri.path(), uri.query()).await;

            if let RoutingDecision::Rewrite(rewrite) = decision {
                match rewrite_uri(&uri, &rewrite.target) {
                    Ok(uri) => {
                        debug!(
                            from = %req.uri(),
                            to = %uri,
                            workspace = %rewrite.workspace,
                            source = rewrite.source.as_str(),
                            "Rewriting request"
                        );
                        let original = std::mem::replace(req.uri_mut(), uri);
                        req.extensions_mut().insert(OriginalUri(original));
                        req.extensions_mut().insert(TenantContext {
                            workspace: rewrite.workspace,
                            source: rewrite.source,
                        });
                    }
                    Err(e) => {
                        warn!(
                            rewrite_target = %rewrite.target,
                            error = %e,
                            "Invalid rewrite target, passing through"
                        );
                    }
                }
            }

            let mut response = inner.call(req).await?;
            propagate_cookies(&cookies, response.headers_mut());
            Ok(response)
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_request_host_prefers_header() {
        let req = Request::builder()
            .uri("http://fallback.example.com/terms")
            .header(HOST, "docs.customer.com")
            .body(())
            .unwrap();
        assert_eq!(request_host(&req).as_deref(), Some("docs.customer.com"));
    }

    #[test]
    fn test_request_host_falls_back_to_authority() {
        let req = Request::builder()
            .uri("https://acme.openpolicyhq.com:8443/privacy")
            .body(())
            .unwrap();
        assert_eq!(request_host(&req).as_deref(), Some("acme.openpolicyhq.com:8443"));

        let bare = Request::builder().uri("/privacy").body(()).unwrap();
        assert_eq!(request_host(&bare), None);
    }

    #[test]
    fn test_rewrite_uri_keeps_authority() {
        let uri: Uri = "https://acme.openpolicyhq.com/privacy?x=1".parse().unwrap();
        let rewritten = rewrite_uri(&uri, "/acme/privacy?x=1").unwrap();
        assert_eq!(rewritten.to_string(), "https://acme.openpolicyhq.com/acme/privacy?x=1");

        let relative: Uri = "/privacy".parse().unwrap();
        assert_eq!(rewrite_uri(&relative, "/acme/privacy").unwrap(), "/acme/privacy");
    }
}
