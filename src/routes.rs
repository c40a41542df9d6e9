//! Application routing configuration with middleware stack.
//!
//! # Middleware Stack (outermost first)
//!
//! ```text
//! Request
//!    │
//!    ▼
//! ┌──────────────────┐
//! │  Rate Limiting   │ ← 429 if exceeded (API paths only)
//! └────────┬─────────┘
//!          │
//!          ▼
//! ┌──────────────────┐
//! │  Tenant Routing  │ ← session refresh, workspace rewrite, Set-Cookie
//! └────────┬─────────┘
//!          │
//!          ▼
//! ┌──────────────────┐
//! │   Request ID     │ ← Adds X-Request-Id header
//! └────────┬─────────┘
//!          │
//!          ▼
//! ┌──────────────────┐
//! │     Tracing      │ ← HTTP request/response logging
//! └────────┬─────────┘
//!          │
//!          ▼
//! ┌──────────────────┐
//! │      CORS        │ ← Cross-origin headers
//! └────────┬─────────┘
//!          │
//!          ▼
//!      Handler
//! ```
//!
//! The first two wrap the finished `Router` as plain tower services, so the
//! rewritten URI is what route matching sees.
//!
//! # Route Groups
//!
//! - `/health`, `/ready` - Health & monitoring
//! - `/{workspace}`, `/{workspace}/{*path}` - Workspace pages

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::get;
use tower::Layer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::handlers;
use crate::middleware::{RateLimitLayer, RateLimitService, TenantRoutingLayer, TenantRoutingService};
use crate::state::AppState;

/// The full service: tenant routing and rate limiting around the router.
pub type App = RateLimitService<TenantRoutingService<Router>>;

/// Build the downstream router: routes plus per-route middleware.
pub fn build_router(state: AppState) -> Router {
    let config = &state.config;

    let cors = build_cors_layer(&config.cors_allowed_origins);

    let mut router = Router::new()
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .route("/{workspace}", get(handlers::workspace_index))
        .route("/{workspace}/", get(handlers::workspace_index))
        .route("/{workspace}/{*path}", get(handlers::workspace_page))
        .fallback(handlers::not_found);

    // Applied bottom to top: the last layer added runs first
    info!(
        max_size_mb = config.max_request_body_size / (1024 * 1024),
        "Request body size limit configured"
    );
    router = router.layer(DefaultBodyLimit::max(config.max_request_body_size));
    router = router.layer(cors);
    router = router.layer(PropagateRequestIdLayer::x_request_id());
    router = router.layer(TraceLayer::new_for_http());
    router = router.layer(SetRequestIdLayer::x_request_id(MakeRequestUuid));

    router.with_state(state)
}

/// Build the service to serve: [`build_router`] wrapped in the tenant
/// routing and rate limit layers.
///
/// # Usage
///
/// ```rust,ignore
/// let app = build_app(state);
/// axum::serve(listener, axum::ServiceExt::<Request>::into_make_service(app)).await?;
/// ```
pub fn build_app(state: AppState) -> App {
    let config = state.config.clone();

    let tenant = TenantRoutingLayer::new(
        state.tenant_router.clone(),
        state.backends.sessions.clone(),
    );

    let rate_limit = RateLimitLayer::new(
        state.backends.rate_limiter.clone(),
        &config.api_prefix,
        &config.trusted_proxies,
    );
    if rate_limit.is_enabled() {
        info!(
            requests = config.rate_limit_requests,
            window_secs = config.rate_limit_window.as_secs(),
            trusted_proxies = config.trusted_proxies.len(),
            "Rate limiting enabled"
        );
    } else {
        info!("Rate limiting disabled (no rate limit backend)");
    }

    rate_limit.layer(tenant.layer(build_router(state)))
}

/// Build CORS layer from configuration.
///
/// # Security Note
///
/// Using `*` (any origin) is convenient for development but should be
/// avoided in production. Specify explicit origins instead.
fn build_cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let allow_any = allowed_origins.iter().any(|o| o == "*");

    if allow_any {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<_> = allowed_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();

        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    use crate::config::Config;
    use crate::state::Backends;

    fn state() -> AppState {
        let config = Config::default();
        let backends = Backends::from_config(&config).unwrap();
        AppState::new(config, backends)
    }

    #[test]
    fn test_build_cors_layer_specific() {
        let origins = vec![
            "https://example.com".to_string(),
            "not a header value\n".to_string(),
        ];
        let _layer = build_cors_layer(&origins);
    }

    #[tokio::test]
    async fn test_health_route_sets_request_id() {
        let response = build_router(state())
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key("x-request-id"));
    }

    #[tokio::test]
    async fn test_unknown_route_is_json_404() {
        for path in ["/", "/Not_A_Slug"] {
            let response = build_router(state())
                .oneshot(Request::get(path).body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::NOT_FOUND, "path {path}");
            assert_eq!(
                response.headers().get("content-type").unwrap(),
                "application/json"
            );
        }
    }

    #[tokio::test]
    async fn test_api_paths_are_not_workspace_pages() {
        for path in ["/api", "/api/foo", "/api/workspaces/acme"] {
            let response = build_router(state())
                .oneshot(Request::get(path).body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::NOT_FOUND, "path {path}");
        }
    }
}
