//! Host and workspace slug validation.
//!
//! The routing core builds internal paths out of values it reads from the
//! `Host` header, a cache, and the workspace store. Everything that ends up in
//! a rewrite target passes through here first.

use std::net::IpAddr;

use thiserror::Error;

// =============================================================================
// Validation Constants
// =============================================================================

/// Maximum length of a workspace slug (one DNS label).
pub const MAX_SLUG_LENGTH: usize = 63;

/// Maximum length of a hostname (RFC 1035).
pub const MAX_HOSTNAME_LENGTH: usize = 253;

/// Why a slug was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SlugError {
    #[error("slug is empty")]
    Empty,

    #[error("slug exceeds {MAX_SLUG_LENGTH} characters")]
    TooLong,

    #[error("slug contains invalid character {0:?}")]
    InvalidCharacter(char),

    #[error("slug cannot start or end with a hyphen")]
    EdgeHyphen,
}

/// Validate a workspace slug before it is used as a path segment.
///
/// Rules:
/// - 1 to 63 characters
/// - Lowercase ASCII letters, digits and hyphens only
/// - Cannot start or end with a hyphen
pub fn validate_slug(slug: &str) -> Result<(), SlugError> {
    if slug.is_empty() {
        return Err(SlugError::Empty);
    }

    if slug.len() > MAX_SLUG_LENGTH {
        return Err(SlugError::TooLong);
    }

    if let Some(c) = slug
        .chars()
        .find(|c| !(c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '-'))
    {
        return Err(SlugError::InvalidCharacter(c));
    }

    if slug.starts_with('-') || slug.ends_with('-') {
        return Err(SlugError::EdgeHyphen);
    }

    Ok(())
}

/// Strip a `:port` suffix from a `Host` header value.
///
/// Bracketed IPv6 literals keep their brackets (`[::1]:3000` -> `[::1]`).
/// A bare value with several colons is returned untouched.
pub fn strip_port(host: &str) -> &str {
    if host.starts_with('[') {
        return match host.find(']') {
            Some(end) => host.get(..=end).unwrap_or(host),
            None => host,
        };
    }

    match host.rsplit_once(':') {
        Some((name, port))
            if !name.contains(':') && port.chars().all(|c| c.is_ascii_digit()) =>
        {
            name
        }
        _ => host,
    }
}

/// Normalize a `Host` header value into a bare, lowercase hostname.
///
/// Strips the port and a trailing FQDN dot. Returns `None` for values that
/// cannot be a hostname (empty, too long, whitespace or control characters).
pub fn normalize_host(raw: &str) -> Option<String> {
    let host = strip_port(raw.trim()).trim_end_matches('.');

    if host.is_empty() || host.len() > MAX_HOSTNAME_LENGTH {
        return None;
    }

    if host
        .chars()
        .any(|c| c.is_whitespace() || c.is_control() || c == '/' || c == '@')
    {
        return None;
    }

    Some(host.to_ascii_lowercase())
}

/// Check whether a normalized host is an IP literal (v4, or bracketed v6).
pub fn is_ip_literal(host: &str) -> bool {
    let unbracketed = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host);
    unbracketed.parse::<IpAddr>().is_ok()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_slugs() {
        assert!(validate_slug("acme").is_ok());
        assert!(validate_slug("customer1").is_ok());
        assert!(validate_slug("acme-legal").is_ok());
        assert!(validate_slug("a").is_ok());
        assert!(validate_slug(&"a".repeat(MAX_SLUG_LENGTH)).is_ok());
    }

    #[test]
    fn test_invalid_slugs() {
        assert_eq!(validate_slug(""), Err(SlugError::Empty));
        assert_eq!(
            validate_slug(&"a".repeat(MAX_SLUG_LENGTH + 1)),
            Err(SlugError::TooLong)
        );
        assert_eq!(validate_slug("Acme"), Err(SlugError::InvalidCharacter('A')));
        assert_eq!(validate_slug("../etc"), Err(SlugError::InvalidCharacter('.')));
        assert_eq!(validate_slug("a/b"), Err(SlugError::InvalidCharacter('/')));
        assert_eq!(validate_slug("a?b"), Err(SlugError::InvalidCharacter('?')));
        assert_eq!(validate_slug("-acme"), Err(SlugError::EdgeHyphen));
        assert_eq!(validate_slug("acme-"), Err(SlugError::EdgeHyphen));
    }

    #[test]
    fn test_slug_error_messages() {
        assert_eq!(SlugError::Empty.to_string(), "slug is empty");
        assert_eq!(SlugError::TooLong.to_string(), "slug exceeds 63 characters");
        assert_eq!(
            SlugError::InvalidCharacter('/').to_string(),
            "slug contains invalid character '/'"
        );
    }

    #[test]
    fn test_strip_port() {
        assert_eq!(strip_port("acme.openpolicyhq.com:443"), "acme.openpolicyhq.com");
        assert_eq!(strip_port("localhost:3000"), "localhost");
        assert_eq!(strip_port("localhost"), "localhost");
        assert_eq!(strip_port("[::1]:3000"), "[::1]");
        assert_eq!(strip_port("[::1]"), "[::1]");
        assert_eq!(strip_port("::1"), "::1");
        assert_eq!(strip_port("host:notaport"), "host:notaport");
    }

    #[test]
    fn test_normalize_host() {
        assert_eq!(normalize_host("Docs.Customer.COM"), Some("docs.customer.com".to_string()));
        assert_eq!(normalize_host("acme.localhost:3000"), Some("acme.localhost".to_string()));
        assert_eq!(normalize_host("openpolicyhq.com."), Some("openpolicyhq.com".to_string()));
        assert_eq!(normalize_host(""), None);
        assert_eq!(normalize_host(":8080"), None);
        assert_eq!(normalize_host("evil.com/path"), None);
        assert_eq!(normalize_host("user@evil.com"), None);
        assert_eq!(normalize_host(&"a".repeat(MAX_HOSTNAME_LENGTH + 1)), None);
    }

    #[test]
    fn test_is_ip_literal() {
        assert!(is_ip_literal("10.0.0.5"));
        assert!(is_ip_literal("[::1]"));
        assert!(is_ip_literal("::1"));
        assert!(!is_ip_literal("docs.customer.com"));
        assert!(!is_ip_literal("10.0.0.5.nip.io"));
    }
}
