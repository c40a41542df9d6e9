//! Session cookie model and propagation.
//!
//! The session refresher hands back the cookies it wants set on the client.
//! Whatever path the routing layer takes (pass-through or rewrite), those
//! cookies are copied onto the final response with every attribute intact:
//! an attribute absent on the source stays absent on the response.
//!
//! `Priority` is not part of RFC 6265 and is unsupported by the common cookie
//! crates, which is why the attribute set is modelled here directly.

use std::fmt;

use axum::http::header::{COOKIE, SET_COOKIE};
use axum::http::{HeaderMap, HeaderValue};
use thiserror::Error;
use tracing::{debug, warn};

use crate::metrics;

/// `SameSite` cookie attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SameSite {
    Strict,
    Lax,
    None,
}

impl SameSite {
    fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "strict" => Some(SameSite::Strict),
            "lax" => Some(SameSite::Lax),
            "none" => Some(SameSite::None),
            _ => None,
        }
    }
}

impl fmt::Display for SameSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SameSite::Strict => "Strict",
            SameSite::Lax => "Lax",
            SameSite::None => "None",
        })
    }
}

/// `Priority` cookie attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CookiePriority {
    Low,
    Medium,
    High,
}

impl CookiePriority {
    fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "low" => Some(CookiePriority::Low),
            "medium" => Some(CookiePriority::Medium),
            "high" => Some(CookiePriority::High),
            _ => None,
        }
    }
}

impl fmt::Display for CookiePriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CookiePriority::Low => "Low",
            CookiePriority::Medium => "Medium",
            CookiePriority::High => "High",
        })
    }
}

/// Errors raised while serializing or parsing a cookie.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CookieError {
    #[error("invalid cookie name {0:?}")]
    InvalidName(String),

    #[error("invalid value for cookie {0:?}")]
    InvalidValue(String),

    #[error("invalid {attribute} attribute on cookie {name:?}")]
    InvalidAttribute { name: String, attribute: &'static str },

    #[error("malformed Set-Cookie header")]
    Malformed,
}

/// A cookie to set on the client, with every attribute the session layer uses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionCookie {
    pub name: String,
    pub value: String,
    pub max_age: Option<i64>,
    pub http_only: bool,
    pub priority: Option<CookiePriority>,
    pub path: Option<String>,
    pub domain: Option<String>,
    pub secure: bool,
    pub same_site: Option<SameSite>,
}

impl SessionCookie {
    /// A cookie with no attributes.
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            max_age: None,
            http_only: false,
            priority: None,
            path: None,
            domain: None,
            secure: false,
            same_site: None,
        }
    }

    /// A cookie that clears `name` on the client, keeping the scoping attributes
    /// of `template` so the browser matches the original cookie.
    pub fn removal(name: impl Into<String>, template: &SessionCookie) -> Self {
        Self {
            name: name.into(),
            value: String::new(),
            max_age: Some(0),
            ..template.clone()
        }
    }

    pub fn with_max_age(mut self, seconds: i64) -> Self {
        self.max_age = Some(seconds);
        self
    }

    pub fn with_http_only(mut self, http_only: bool) -> Self {
        self.http_only = http_only;
        self
    }

    pub fn with_priority(mut self, priority: CookiePriority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    pub fn with_secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    pub fn with_same_site(mut self, same_site: SameSite) -> Self {
        self.same_site = Some(same_site);
        self
    }

    /// True if this cookie deletes itself on the client.
    pub fn is_removal(&self) -> bool {
        self.max_age.is_some_and(|age| age <= 0)
    }

    /// Serialize into a `Set-Cookie` header value.
    ///
    /// # Errors
    ///
    /// Returns `CookieError` if the name, value, or an attribute contains
    /// characters not allowed in a `Set-Cookie` header.
    pub fn to_header_value(&self) -> Result<HeaderValue, CookieError> {
        if !is_valid_name(&self.name) {
            return Err(CookieError::InvalidName(self.name.clone()));
        }
        if !is_valid_value(&self.value) {
            return Err(CookieError::InvalidValue(self.name.clone()));
        }

        let mut header = format!("{}={}", self.name, self.value);

        if let Some(path) = &self.path {
            self.check_attribute(path, "Path")?;
            header.push_str("; Path=");
            header.push_str(path);
        }
        if let Some(domain) = &self.domain {
            self.check_attribute(domain, "Domain")?;
            header.push_str("; Domain=");
            header.push_str(domain);
        }
        if let Some(max_age) = self.max_age {
            header.push_str(&format!("; Max-Age={max_age}"));
        }
        if self.secure {
            header.push_str("; Secure");
        }
        if self.http_only {
            header.push_str("; HttpOnly");
        }
        if let Some(same_site) = self.same_site {
            header.push_str(&format!("; SameSite={same_site}"));
        }
        if let Some(priority) = self.priority {
            header.push_str(&format!("; Priority={priority}"));
        }

        HeaderValue::from_str(&header).map_err(|_| CookieError::InvalidValue(self.name.clone()))
    }

    fn check_attribute(&self, value: &str, attribute: &'static str) -> Result<(), CookieError> {
        if value.is_empty() || value.chars().any(|c| c == ';' || c.is_control()) {
            return Err(CookieError::InvalidAttribute {
                name: self.name.clone(),
                attribute,
            });
        }
        Ok(())
    }

    /// Parse a `Set-Cookie` header value.
    ///
    /// Unknown attributes (`Expires`, `Partitioned`, ...) are ignored; a known
    /// attribute with an unparseable value is an error.
    pub fn parse(header: &str) -> Result<Self, CookieError> {
        let mut parts = header.split(';');
        let (name, value) = parts
            .next()
            .and_then(|pair| pair.split_once('='))
            .ok_or(CookieError::Malformed)?;
        let name = name.trim();
        if !is_valid_name(name) {
            return Err(CookieError::InvalidName(name.to_string()));
        }

        let mut cookie = SessionCookie::new(name, value.trim());

        for attribute in parts {
            let (key, value) = match attribute.split_once('=') {
                Some((k, v)) => (k.trim(), Some(v.trim())),
                None => (attribute.trim(), None),
            };
            let invalid = |attribute| CookieError::InvalidAttribute {
                name: cookie.name.clone(),
                attribute,
            };

            match key.to_ascii_lowercase().as_str() {
                "max-age" => {
                    let age = value
                        .and_then(|v| v.parse().ok())
                        .ok_or_else(|| invalid("Max-Age"))?;
                    cookie.max_age = Some(age);
                }
                "path" => cookie.path = value.map(str::to_string),
                "domain" => cookie.domain = value.map(str::to_string),
                "secure" => cookie.secure = true,
                "httponly" => cookie.http_only = true,
                "samesite" => {
                    cookie.same_site =
                        Some(value.and_then(SameSite::parse).ok_or_else(|| invalid("SameSite"))?);
                }
                "priority" => {
                    cookie.priority = Some(
                        value
                            .and_then(CookiePriority::parse)
                            .ok_or_else(|| invalid("Priority"))?,
                    );
                }
                _ => {}
            }
        }

        Ok(cookie)
    }
}

/// RFC 6265 token characters.
fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name.bytes().all(|b| {
            b.is_ascii_graphic()
                && !matches!(
                    b,
                    b'(' | b')' | b'<' | b'>' | b'@' | b',' | b';' | b':' | b'\\' | b'"'
                        | b'/' | b'[' | b']' | b'?' | b'=' | b'{' | b'}'
                )
        })
}

/// RFC 6265 cookie-octets, optionally wrapped in double quotes.
fn is_valid_value(value: &str) -> bool {
    let inner = value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value);
    inner
        .bytes()
        .all(|b| b.is_ascii_graphic() && !matches!(b, b'"' | b',' | b';' | b'\\'))
}

/// Result of copying cookies onto a response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PropagationReport {
    pub copied: usize,
    pub failed: usize,
}

/// Append every cookie as a `Set-Cookie` header on `headers`.
///
/// A cookie that fails to serialize is logged and skipped; the remaining
/// cookies are still copied.
pub fn propagate_cookies(cookies: &[SessionCookie], headers: &mut HeaderMap) -> PropagationReport {
    let mut report = PropagationReport::default();

    for cookie in cookies {
        match cookie.to_header_value() {
            Ok(value) => {
                headers.append(SET_COOKIE, value);
                report.copied += 1;
            }
            Err(e) => {
                warn!(cookie = %cookie.name, error = %e, "Failed to copy session cookie onto response");
                report.failed += 1;
            }
        }
    }

    if report.copied > 0 || report.failed > 0 {
        metrics::record_cookies_propagated(report.copied as u64, report.failed as u64);
    }

    report
}

/// Read `name=value` pairs from every `Cookie` header on a request.
pub fn request_cookies(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| {
            let (name, value) = pair.split_once('=')?;
            let name = name.trim();
            (!name.is_empty()).then(|| (name.to_string(), value.trim().to_string()))
        })
        .collect()
}

/// Reflect freshly set cookies in the request's `Cookie` header so handlers
/// further down the same request see the refreshed session.
pub fn apply_to_request(headers: &mut HeaderMap, cookies: &[SessionCookie]) {
    if cookies.is_empty() {
        return;
    }

    let mut pairs: Vec<(String, String)> = request_cookies(headers)
        .into_iter()
        .filter(|(name, _)| !cookies.iter().any(|c| &c.name == name))
        .collect();
    pairs.extend(
        cookies
            .iter()
            .filter(|c| !c.is_removal())
            .map(|c| (c.name.clone(), c.value.clone())),
    );

    headers.remove(COOKIE);
    if pairs.is_empty() {
        return;
    }

    let joined = pairs
        .iter()
        .map(|(name, value)| format!("{name}={value}"))
        .collect::<Vec<_>>()
        .join("; ");

    match HeaderValue::from_str(&joined) {
        Ok(value) => {
            headers.insert(COOKIE, value);
            debug!(count = cookies.len(), "Applied refreshed cookies to request");
        }
        Err(e) => warn!(error = %e, "Refreshed cookies not applied to request"),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn full_cookie() -> SessionCookie {
        SessionCookie::new("sb-abc-auth-token", "base64-eyJhIjoxfQ")
            .with_max_age(3600)
            .with_http_only(true)
            .with_priority(CookiePriority::High)
            .with_path("/")
            .with_domain("openpolicyhq.com")
            .with_secure(true)
            .with_same_site(SameSite::Lax)
    }

    #[test]
    fn test_serialize_all_attributes() {
        let header = full_cookie().to_header_value().unwrap();
        assert_eq!(
            header.to_str().unwrap(),
            "sb-abc-auth-token=base64-eyJhIjoxfQ; Path=/; Domain=openpolicyhq.com; \
             Max-Age=3600; Secure; HttpOnly; SameSite=Lax; Priority=High"
        );
    }

    #[test]
    fn test_absent_attributes_stay_absent() {
        let header = SessionCookie::new("theme", "dark").to_header_value().unwrap();
        assert_eq!(header.to_str().unwrap(), "theme=dark");
    }

    #[test]
    fn test_parse_round_trips_attributes() {
        let cookie = full_cookie();
        let header = cookie.to_header_value().unwrap();
        let parsed = SessionCookie::parse(header.to_str().unwrap()).unwrap();
        assert_eq!(parsed, cookie);
    }

    #[test]
    fn test_parse_ignores_unknown_attributes() {
        let parsed =
            SessionCookie::parse("a=b; Expires=Wed, 21 Oct 2026 07:28:00 GMT; Partitioned").unwrap();
        assert_eq!(parsed, SessionCookie::new("a", "b"));
    }

    #[test]
    fn test_parse_rejects_bad_attributes() {
        assert!(matches!(
            SessionCookie::parse("a=b; Max-Age=soon"),
            Err(CookieError::InvalidAttribute { attribute: "Max-Age", .. })
        ));
        assert!(matches!(
            SessionCookie::parse("a=b; SameSite=Sometimes"),
            Err(CookieError::InvalidAttribute { attribute: "SameSite", .. })
        ));
        assert_eq!(SessionCookie::parse("no-equals-sign"), Err(CookieError::Malformed));
    }

    #[test]
    fn test_invalid_cookies_rejected() {
        assert!(matches!(
            SessionCookie::new("bad name", "v").to_header_value(),
            Err(CookieError::InvalidName(_))
        ));
        assert!(matches!(
            SessionCookie::new("n", "has;semicolon").to_header_value(),
            Err(CookieError::InvalidValue(_))
        ));
        assert!(matches!(
            SessionCookie::new("n", "v").with_path("/a;b").to_header_value(),
            Err(CookieError::InvalidAttribute { attribute: "Path", .. })
        ));
    }

    #[test]
    fn test_propagate_skips_failures_and_copies_rest() {
        let mut headers = HeaderMap::new();
        let cookies = vec![
            full_cookie(),
            SessionCookie::new("broken", "a b"),
            SessionCookie::new("theme", "dark"),
        ];

        let report = propagate_cookies(&cookies, &mut headers);

        assert_eq!(report, PropagationReport { copied: 2, failed: 1 });
        let values: Vec<_> = headers
            .get_all(SET_COOKIE)
            .iter()
            .map(|v| v.to_str().unwrap().to_string())
            .collect();
        assert_eq!(values.len(), 2);
        assert!(values[0].starts_with("sb-abc-auth-token="));
        assert_eq!(values[1], "theme=dark");
    }

    #[test]
    fn test_removal_keeps_scope() {
        let removal = SessionCookie::removal("sb-abc-auth-token.1", &full_cookie());
        assert_eq!(removal.value, "");
        assert_eq!(removal.max_age, Some(0));
        assert_eq!(removal.path.as_deref(), Some("/"));
        assert_eq!(removal.domain.as_deref(), Some("openpolicyhq.com"));
        assert!(removal.is_removal());
    }

    #[test]
    fn test_request_cookies_reads_all_headers() {
        let mut headers = HeaderMap::new();
        headers.append(COOKIE, HeaderValue::from_static("a=1; b=2"));
        headers.append(COOKIE, HeaderValue::from_static("c=3"));

        assert_eq!(
            request_cookies(&headers),
            vec![
                ("a".to_string(), "1".to_string()),
                ("b".to_string(), "2".to_string()),
                ("c".to_string(), "3".to_string()),
            ]
        );
    }

    #[test]
    fn test_apply_to_request_replaces_and_removes() {
        let mut headers = HeaderMap::new();
        headers.insert(
            COOKIE,
            HeaderValue::from_static("theme=dark; session=old; session.1=stale"),
        );

        let template = SessionCookie::new("session", "new").with_path("/");
        apply_to_request(
            &mut headers,
            &[template.clone(), SessionCookie::removal("session.1", &template)],
        );

        assert_eq!(
            headers.get(COOKIE).unwrap().to_str().unwrap(),
            "theme=dark; session=new"
        );
    }
}
