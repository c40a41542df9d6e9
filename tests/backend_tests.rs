//! HTTP backend tests against mock servers.
//!
//! Each test starts a `wiremock` server standing in for the Upstash REST API
//! or a Supabase project and checks the exact requests the backends send.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use axum::http::{HeaderMap, HeaderValue, header};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde_json::{Value, json};
use wiremock::matchers::{body_json, body_string_contains, header as header_eq, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use openpolicy_router::backends::{
    CacheError, KeyValueCache, RateLimitBackend, SessionError, SessionRefresher, StoreError,
    SupabaseSessionRefresher, SupabaseStore, UpstashCache, UpstashClient, UpstashError,
    UpstashSlidingWindow, WorkspaceStore,
};
use openpolicy_router::backends::limiter::SLIDING_WINDOW_SCRIPT;
use openpolicy_router::tenancy::{CustomDomainResolver, ResolutionSource};

fn upstash(server: &MockServer) -> UpstashClient {
    UpstashClient::new(server.uri(), "upstash-token").unwrap()
}

fn session_cookie_header(session: &Value) -> HeaderMap {
    let encoded = format!("base64-{}", URL_SAFE_NO_PAD.encode(session.to_string()));
    let mut headers = HeaderMap::new();
    headers.insert(
        header::COOKIE,
        HeaderValue::from_str(&format!("theme=dark; sb-abc-auth-token={encoded}")).unwrap(),
    );
    headers
}

fn decode_cookie(value: &str) -> Value {
    let encoded = value.strip_prefix("base64-").unwrap();
    serde_json::from_slice(&URL_SAFE_NO_PAD.decode(encoded).unwrap()).unwrap()
}

// =============================================================================
// Upstash cache
// =============================================================================

#[tokio::test]
async fn upstash_cache_get_sends_command_with_token() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/"))
        .and(header_eq("authorization", "Bearer upstash-token"))
        .and(body_json(json!(["GET", "custom_domain:docs.customer.com"])))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"result": "customer1"})))
        .expect(1)
        .mount(&server)
        .await;

    let cache = UpstashCache::new(upstash(&server));
    let value = cache.get("custom_domain:docs.customer.com").await.unwrap();
    assert_eq!(value.as_deref(), Some("customer1"));
}

#[tokio::test]
async fn upstash_cache_nil_is_a_miss() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"result": null})))
        .mount(&server)
        .await;

    let cache = UpstashCache::new(upstash(&server));
    assert_eq!(cache.get("custom_domain:nobody.example.com").await.unwrap(), None);
}

#[tokio::test]
async fn upstash_cache_set_uses_expiry() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_json(json!(["SET", "k", "customer1", "EX", 3600])))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"result": "OK"})))
        .expect(1)
        .mount(&server)
        .await;

    let cache = UpstashCache::new(upstash(&server));
    cache
        .set("k", "customer1", Duration::from_secs(3600))
        .await
        .unwrap();
}

#[tokio::test]
async fn upstash_auth_failure_is_reported() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(401).set_body_json(json!({"error": "WRONGPASS invalid token"})),
        )
        .mount(&server)
        .await;

    let cache = UpstashCache::new(upstash(&server));
    let err = cache.get("k").await.unwrap_err();
    match err {
        CacheError::Upstash(UpstashError::Status { status, message }) => {
            assert_eq!(status, 401);
            assert!(message.contains("WRONGPASS"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

// =============================================================================
// Upstash sliding window
// =============================================================================

#[tokio::test]
async fn upstash_limiter_allows_with_remaining() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_string_contains("EVAL"))
        .and(body_string_contains("ratelimit:203.0.113.7:"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"result": 9})))
        .expect(1)
        .mount(&server)
        .await;

    let limiter =
        UpstashSlidingWindow::new(upstash(&server), "ratelimit", 10, Duration::from_secs(10))
            .unwrap();
    let outcome = limiter.check("203.0.113.7").await.unwrap();

    assert!(outcome.success);
    assert_eq!(outcome.limit, 10);
    assert_eq!(outcome.remaining, 9);
    assert_eq!(outcome.reset_ms % 10_000, 0, "reset is a window boundary");
}

#[tokio::test]
async fn upstash_limiter_rejects_on_negative_result() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"result": -1})))
        .mount(&server)
        .await;

    let limiter =
        UpstashSlidingWindow::new(upstash(&server), "ratelimit", 10, Duration::from_secs(10))
            .unwrap();
    let outcome = limiter.check("203.0.113.7").await.unwrap();

    assert!(!outcome.success);
    assert_eq!(outcome.remaining, 0);
}

#[tokio::test]
async fn upstash_limiter_sends_exact_eval_across_window_boundary() {
    let eval = |current: &str, previous: &str, now: u64| {
        json!([
            "EVAL",
            SLIDING_WINDOW_SCRIPT,
            2,
            current,
            previous,
            10,
            now,
            10_000,
            1
        ])
    };

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_json(eval("ratelimit:ip:2", "ratelimit:ip:1", 29_999)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"result": 0})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(body_json(eval("ratelimit:ip:3", "ratelimit:ip:2", 30_000)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"result": -1})))
        .expect(1)
        .mount(&server)
        .await;

    let limiter =
        UpstashSlidingWindow::new(upstash(&server), "ratelimit", 10, Duration::from_secs(10))
            .unwrap();

    let last = limiter.check_at("ip", 29_999).await.unwrap();
    assert!(last.success);
    assert_eq!(last.remaining, 0);
    assert_eq!(last.reset_ms, 30_000);

    // The weighted previous window still fills the budget
    let rejected = limiter.check_at("ip", 30_000).await.unwrap();
    assert!(!rejected.success);
    assert_eq!(rejected.remaining, 0);
    assert_eq!(rejected.reset_ms, 40_000);
}

#[tokio::test]
async fn upstash_limiter_unreachable_is_an_error() {
    let server = MockServer::start().await;
    let client = upstash(&server);
    drop(server);

    let limiter =
        UpstashSlidingWindow::new(client, "ratelimit", 10, Duration::from_secs(10)).unwrap();
    assert!(limiter.check("203.0.113.7").await.is_err());
}

// =============================================================================
// Supabase store
// =============================================================================

#[tokio::test]
async fn supabase_store_queries_by_custom_domain() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/workspaces"))
        .and(query_param("select", "slug"))
        .and(query_param("custom_domain", "eq.docs.customer.com"))
        .and(header_eq("apikey", "service-key"))
        .and(header_eq("authorization", "Bearer service-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"slug": "customer1"}])))
        .expect(1)
        .mount(&server)
        .await;

    let store = SupabaseStore::new(&server.uri(), "service-key", "workspaces").unwrap();
    let slug = store.slug_for_custom_domain("docs.customer.com").await.unwrap();
    assert_eq!(slug.as_deref(), Some("customer1"));
}

#[tokio::test]
async fn supabase_store_no_rows_is_none() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    let store = SupabaseStore::new(&server.uri(), "service-key", "workspaces").unwrap();
    assert_eq!(store.slug_for_custom_domain("nobody.example.com").await.unwrap(), None);
}

#[tokio::test]
async fn supabase_store_duplicate_rows_are_ambiguous() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!([{"slug": "a"}, {"slug": "b"}])),
        )
        .mount(&server)
        .await;

    let store = SupabaseStore::new(&server.uri(), "service-key", "workspaces").unwrap();
    let err = store.slug_for_custom_domain("docs.customer.com").await.unwrap_err();
    assert!(matches!(err, StoreError::Ambiguous(_)));
}

#[tokio::test]
async fn supabase_store_http_error_is_typed() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503).set_body_string("upstream down"))
        .mount(&server)
        .await;

    let store = SupabaseStore::new(&server.uri(), "service-key", "workspaces").unwrap();
    let err = store.slug_for_custom_domain("docs.customer.com").await.unwrap_err();
    assert!(matches!(err, StoreError::Status { status: 503, .. }));
}

// =============================================================================
// Resolver over both HTTP backends
// =============================================================================

#[tokio::test]
async fn resolver_populates_remote_cache_after_store_hit() {
    let upstash_server = MockServer::start().await;
    let supabase_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(body_json(json!(["GET", "custom_domain:docs.customer.com"])))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"result": null})))
        .expect(1)
        .mount(&upstash_server)
        .await;
    Mock::given(method("POST"))
        .and(body_json(json!([
            "SET",
            "custom_domain:docs.customer.com",
            "customer1",
            "EX",
            3600
        ])))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"result": "OK"})))
        .expect(1)
        .mount(&upstash_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/workspaces"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"slug": "customer1"}])))
        .expect(1)
        .mount(&supabase_server)
        .await;

    let cache: Arc<dyn KeyValueCache> = Arc::new(UpstashCache::new(upstash(&upstash_server)));
    let store: Arc<dyn WorkspaceStore> =
        Arc::new(SupabaseStore::new(&supabase_server.uri(), "service-key", "workspaces").unwrap());
    let resolver = CustomDomainResolver::new(Some(cache), Some(store));

    let resolution = resolver.resolve("docs.customer.com").await.unwrap().unwrap();
    assert_eq!(resolution.slug, "customer1");
    assert_eq!(resolution.source, ResolutionSource::Store);
}

#[tokio::test]
async fn resolver_survives_cache_outage() {
    let upstash_server = MockServer::start().await;
    let supabase_server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&upstash_server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"slug": "customer1"}])))
        .mount(&supabase_server)
        .await;

    let cache: Arc<dyn KeyValueCache> = Arc::new(UpstashCache::new(upstash(&upstash_server)));
    let store: Arc<dyn WorkspaceStore> =
        Arc::new(SupabaseStore::new(&supabase_server.uri(), "service-key", "workspaces").unwrap());
    let resolver = CustomDomainResolver::new(Some(cache), Some(store));

    let resolution = resolver.resolve("docs.customer.com").await.unwrap().unwrap();
    assert_eq!(resolution.slug, "customer1");
}

// =============================================================================
// Supabase session refresh
// =============================================================================

fn expired_session() -> Value {
    json!({
        "access_token": "old-access",
        "refresh_token": "r1",
        "expires_at": 1_000,
    })
}

fn refresher(server: &MockServer) -> SupabaseSessionRefresher {
    SupabaseSessionRefresher::new(&server.uri(), "anon-key", "sb-abc-auth-token").unwrap()
}

#[tokio::test]
async fn expired_session_is_refreshed_into_new_cookie() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/v1/token"))
        .and(query_param("grant_type", "refresh_token"))
        .and(header_eq("apikey", "anon-key"))
        .and(body_json(json!({"refresh_token": "r1"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "new-access",
            "refresh_token": "r2",
            "token_type": "bearer",
            "expires_in": 3600,
        })))
        .expect(1)
        .mount(&server)
        .await;

    let cookies = refresher(&server)
        .refresh(&session_cookie_header(&expired_session()))
        .await
        .unwrap();

    assert_eq!(cookies.len(), 1);
    let cookie = &cookies[0];
    assert_eq!(cookie.name, "sb-abc-auth-token");
    assert_eq!(cookie.path.as_deref(), Some("/"));
    assert!(cookie.max_age.unwrap() > 0);

    let session = decode_cookie(&cookie.value);
    assert_eq!(session["access_token"], "new-access");
    assert_eq!(session["refresh_token"], "r2");
    let expires_at = session["expires_at"].as_i64().unwrap();
    assert!(expires_at > chrono::Utc::now().timestamp());
}

#[tokio::test]
async fn fresh_session_skips_identity_provider() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server)
        .await;

    let fresh = json!({
        "access_token": "a",
        "refresh_token": "r1",
        "expires_at": chrono::Utc::now().timestamp() + 3600,
    });
    let cookies = refresher(&server)
        .refresh(&session_cookie_header(&fresh))
        .await
        .unwrap();
    assert!(cookies.is_empty());
}

#[tokio::test]
async fn rejected_refresh_token_clears_session() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(400).set_body_json(json!({"error": "invalid_grant"})),
        )
        .mount(&server)
        .await;

    let cookies = refresher(&server)
        .refresh(&session_cookie_header(&expired_session()))
        .await
        .unwrap();

    assert_eq!(cookies.len(), 1);
    assert!(cookies[0].is_removal());
    assert_eq!(cookies[0].name, "sb-abc-auth-token");
}

#[tokio::test]
async fn identity_provider_outage_is_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
        .mount(&server)
        .await;

    let err = refresher(&server)
        .refresh(&session_cookie_header(&expired_session()))
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::Status { status: 502, .. }));
}

#[tokio::test]
async fn refresh_without_access_token_is_invalid() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"refresh_token": "r2"})))
        .mount(&server)
        .await;

    let err = refresher(&server)
        .refresh(&session_cookie_header(&expired_session()))
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::InvalidResponse(_)));
}
