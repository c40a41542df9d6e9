//! Identity session refresh.
//!
//! Runs before routing on every request. A refresher inspects the session
//! cookie, renews the session when its access token is about to expire, and
//! returns the cookies that must be set on the client. Those cookies are
//! forwarded on whatever response the routing layer produces.
//!
//! # Supabase cookie format
//!
//! The session is a JSON object stored in `sb-<project-ref>-auth-token`.
//! Values may carry a `base64-` prefix (base64url, no padding) and may be
//! split over `name.0`, `name.1`, ... when they exceed the browser's
//! per-cookie size limit.

use std::time::Duration;

use async_trait::async_trait;
use axum::http::HeaderMap;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use reqwest::Client;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{debug, info};

use crate::tenancy::cookies::{SameSite, SessionCookie, request_cookies};

/// Prefix marking a base64url-encoded session value.
pub const BASE64_PREFIX: &str = "base64-";

/// Largest value written into a single session cookie.
pub const MAX_CHUNK_SIZE: usize = 3180;

/// Upper bound on a token refresh call.
pub const REFRESH_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session refresh request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("identity provider returned HTTP {status}: {message}")]
    Status { status: u16, message: String },

    #[error("identity provider returned an unusable session: {0}")]
    InvalidResponse(String),
}

#[async_trait]
pub trait SessionRefresher: Send + Sync {
    fn name(&self) -> &'static str;

    /// Cookies to set on the response. Empty when the session needs nothing.
    ///
    /// # Errors
    ///
    /// Only when the identity provider itself is unreachable or failing. An
    /// absent, unreadable or rejected session is not an error.
    async fn refresh(&self, headers: &HeaderMap) -> Result<Vec<SessionCookie>, SessionError>;
}

/// Refresher used when no identity provider is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSessionRefresher;

#[async_trait]
impl SessionRefresher for NoopSessionRefresher {
    fn name(&self) -> &'static str {
        "none"
    }

    async fn refresh(&self, _headers: &HeaderMap) -> Result<Vec<SessionCookie>, SessionError> {
        Ok(Vec::new())
    }
}

// =============================================================================
// Cookie encoding
// =============================================================================

/// Session cookie pieces present on a request, in chunk order.
#[derive(Debug, Default, PartialEq, Eq)]
struct StoredCookies {
    /// Names of every cookie belonging to the session (whole or chunked).
    names: Vec<String>,
    /// Reassembled value.
    value: Option<String>,
}

fn is_chunk_of(name: &str, base: &str) -> bool {
    name.strip_prefix(base)
        .and_then(|rest| rest.strip_prefix('.'))
        .is_some_and(|idx| !idx.is_empty() && idx.bytes().all(|b| b.is_ascii_digit()))
}

fn read_session_cookies(pairs: &[(String, String)], base: &str) -> StoredCookies {
    let names = pairs
        .iter()
        .filter(|(name, _)| name == base || is_chunk_of(name, base))
        .map(|(name, _)| name.clone())
        .collect();

    let lookup = |name: &str| pairs.iter().find(|(n, _)| n == name).map(|(_, v)| v.as_str());

    let value = match lookup(base) {
        Some(whole) => Some(whole.to_string()),
        None => {
            let mut joined = String::new();
            let mut index = 0;
            while let Some(chunk) = lookup(&format!("{base}.{index}")) {
                joined.push_str(chunk);
                index += 1;
            }
            (index > 0).then_some(joined)
        }
    };

    StoredCookies { names, value }
}

fn decode_session(value: &str) -> Option<Value> {
    let json = match value.strip_prefix(BASE64_PREFIX) {
        Some(encoded) => {
            let bytes = URL_SAFE_NO_PAD.decode(encoded.trim_end_matches('=')).ok()?;
            String::from_utf8(bytes).ok()?
        }
        None => value.to_string(),
    };
    serde_json::from_str(&json).ok()
}

fn encode_session(session: &Value) -> String {
    format!("{BASE64_PREFIX}{}", URL_SAFE_NO_PAD.encode(session.to_string()))
}

/// Split `value` into cookie-sized pieces.
fn chunk_value(value: &str) -> Vec<String> {
    value
        .as_bytes()
        .chunks(MAX_CHUNK_SIZE)
        .map(|c| String::from_utf8_lossy(c).into_owned())
        .collect()
}

// =============================================================================
// Supabase
// =============================================================================

/// Refreshes Supabase Auth sessions through `POST /auth/v1/token`.
pub struct SupabaseSessionRefresher {
    client: Client,
    token_endpoint: String,
    anon_key: String,
    cookie_name: String,
    refresh_margin: Duration,
    template: SessionCookie,
}

impl std::fmt::Debug for SupabaseSessionRefresher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SupabaseSessionRefresher")
            .field("token_endpoint", &self.token_endpoint)
            .field("cookie_name", &self.cookie_name)
            .field("refresh_margin", &self.refresh_margin)
            .finish_non_exhaustive()
    }
}

impl SupabaseSessionRefresher {
    /// Session cookie attributes default to `Path=/; SameSite=Lax; Secure`
    /// with a 400 day lifetime. The cookie is readable by browser code, so it
    /// is not `HttpOnly`.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Transport` if the HTTP client cannot be built.
    pub fn new(
        base_url: &str,
        anon_key: impl Into<String>,
        cookie_name: impl Into<String>,
    ) -> Result<Self, SessionError> {
        let client = Client::builder().timeout(REFRESH_TIMEOUT).build()?;
        Ok(Self {
            client,
            token_endpoint: format!(
                "{}/auth/v1/token?grant_type=refresh_token",
                base_url.trim_end_matches('/')
            ),
            anon_key: anon_key.into(),
            cookie_name: cookie_name.into(),
            refresh_margin: Duration::from_secs(90),
            template: SessionCookie::new("", "")
                .with_path("/")
                .with_same_site(SameSite::Lax)
                .with_secure(true)
                .with_max_age(400 * 24 * 60 * 60),
        })
    }

    pub fn with_refresh_margin(mut self, margin: Duration) -> Self {
        self.refresh_margin = margin;
        self
    }

    pub fn with_cookie_max_age(mut self, max_age: Duration) -> Self {
        self.template.max_age = Some(i64::try_from(max_age.as_secs()).unwrap_or(i64::MAX));
        self
    }

    pub fn with_secure_cookies(mut self, secure: bool) -> Self {
        self.template.secure = secure;
        self
    }

    pub fn cookie_name(&self) -> &str {
        &self.cookie_name
    }

    fn needs_refresh(&self, session: &Value, now: i64) -> bool {
        let margin = i64::try_from(self.refresh_margin.as_secs()).unwrap_or(i64::MAX);
        match session.get("expires_at").and_then(Value::as_i64) {
            Some(expires_at) => expires_at.saturating_sub(now) <= margin,
            None => true,
        }
    }

    /// Cookies that store `session`, replacing every cookie in `existing`.
    fn write_cookies(&self, session: &Value, existing: &[String]) -> Vec<SessionCookie> {
        let chunks = chunk_value(&encode_session(session));
        let named: Vec<(String, String)> = if chunks.len() == 1 {
            chunks
                .into_iter()
                .map(|value| (self.cookie_name.clone(), value))
                .collect()
        } else {
            chunks
                .into_iter()
                .enumerate()
                .map(|(i, value)| (format!("{}.{i}", self.cookie_name), value))
                .collect()
        };

        let mut cookies: Vec<SessionCookie> = named
            .iter()
            .map(|(name, value)| SessionCookie {
                name: name.clone(),
                value: value.clone(),
                ..self.template.clone()
            })
            .collect();

        cookies.extend(
            existing
                .iter()
                .filter(|old| !named.iter().any(|(name, _)| name == *old))
                .map(|old| SessionCookie::removal(old.clone(), &self.template)),
        );
        cookies
    }

    fn clear_cookies(&self, existing: &[String]) -> Vec<SessionCookie> {
        existing
            .iter()
            .map(|name| SessionCookie::removal(name.clone(), &self.template))
            .collect()
    }
}

#[async_trait]
impl SessionRefresher for SupabaseSessionRefresher {
    fn name(&self) -> &'static str {
        "supabase"
    }

    async fn refresh(&self, headers: &HeaderMap) -> Result<Vec<SessionCookie>, SessionError> {
        let pairs = request_cookies(headers);
        let stored = read_session_cookies(&pairs, &self.cookie_name);
        let Some(raw) = stored.value else {
            return Ok(Vec::new());
        };

        let Some(session) = decode_session(&raw) else {
            debug!(cookie = %self.cookie_name, "Unreadable session cookie, leaving untouched");
            return Ok(Vec::new());
        };

        let now = chrono::Utc::now().timestamp();
        if !self.needs_refresh(&session, now) {
            return Ok(Vec::new());
        }

        let Some(refresh_token) = session.get("refresh_token").and_then(Value::as_str) else {
            debug!("Session has no refresh token, clearing session cookies");
            return Ok(self.clear_cookies(&stored.names));
        };

        let response = self
            .client
            .post(&self.token_endpoint)
            .header("apikey", &self.anon_key)
            .bearer_auth(&self.anon_key)
            .json(&json!({ "refresh_token": refresh_token }))
            .send()
            .await?;

        let status = response.status();
        if status.is_client_error() {
            info!(status = status.as_u16(), "Refresh token rejected, clearing session cookies");
            return Ok(self.clear_cookies(&stored.names));
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(SessionError::Status {
                status: status.as_u16(),
                message,
            });
        }

        let mut refreshed: Value = response.json().await?;
        if refreshed.get("access_token").and_then(Value::as_str).is_none() {
            return Err(SessionError::InvalidResponse(
                "missing access_token".to_string(),
            ));
        }
        let expires_in = refreshed.get("expires_in").and_then(Value::as_i64);
        if let (Some(session), Some(expires_in)) = (refreshed.as_object_mut(), expires_in) {
            session
                .entry("expires_at")
                .or_insert_with(|| json!(now + expires_in));
        }

        debug!(cookie = %self.cookie_name, "Session refreshed");
        Ok(self.write_cookies(&refreshed, &stored.names))
    }
}
