//! Client IP extraction for rate limiting.
//!
//! # Security Warning: IP Spoofing Risk
//!
//! **Without `TRUSTED_PROXIES`, these functions trust client-provided
//! headers.** A client talking to the service directly can put any address
//! in `X-Forwarded-For` and rotate it to dodge the per-IP limit. Either set
//! `TRUSTED_PROXIES` so headers are only read from known proxy peers, or
//! deploy behind a reverse proxy that overwrites (not appends to) the client
//! IP headers:
//!
//! ```nginx
//! proxy_set_header X-Real-IP $remote_addr;
//! proxy_set_header X-Forwarded-For $remote_addr;
//! ```
//!
//! ## The loopback fallback
//!
//! Requests carrying neither header are keyed as `127.0.0.1`, so they share
//! one rate-limit bucket. In production that bucket should stay empty; high
//! traffic on it means requests are bypassing the proxy.

use std::borrow::Cow;
use std::net::IpAddr;

use axum::http::HeaderMap;
use tracing::debug;

use super::rate_limit::TrustedProxyConfig;

/// Key used when no client IP header is present.
pub const FALLBACK_IP: &str = "127.0.0.1";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExtractedIp<'a> {
    /// First entry of `X-Forwarded-For`.
    FromXff(&'a str),
    FromRealIp(&'a str),
    NotFound,
}

fn extract_ip_from_headers(headers: &HeaderMap) -> ExtractedIp<'_> {
    // "client, proxy1, proxy2": the client is the first entry
    if let Some(forwarded) = headers.get("x-forwarded-for")
        && let Ok(value) = forwarded.to_str()
        && let Some(first_ip) = value.split(',').next().map(str::trim)
        && !first_ip.is_empty()
    {
        return ExtractedIp::FromXff(first_ip);
    }

    if let Some(real_ip) = headers.get("x-real-ip")
        && let Ok(value) = real_ip.to_str()
        && !value.trim().is_empty()
    {
        return ExtractedIp::FromRealIp(value.trim());
    }

    ExtractedIp::NotFound
}

/// Client IP for rate-limit keying.
///
/// Checks `X-Forwarded-For` (first entry), then `X-Real-IP`, then falls back
/// to [`FALLBACK_IP`]. Empty header values are skipped.
///
/// When trusted proxies are configured and the TCP `peer` is known but not
/// one of them, the headers are ignored and the peer address is the key.
pub fn client_ip(
    headers: &HeaderMap,
    peer: Option<IpAddr>,
    trusted_proxies: &TrustedProxyConfig,
) -> Cow<'static, str> {
    if let Some(peer) = peer
        && trusted_proxies.is_enabled()
        && !trusted_proxies.is_trusted(&peer)
    {
        debug!(peer = %peer, "Peer is not a trusted proxy, ignoring forwarding headers");
        return Cow::Owned(peer.to_string());
    }

    match extract_ip_from_headers(headers) {
        ExtractedIp::FromXff(ip) => {
            if trusted_proxies.is_enabled() {
                debug!(client_ip = %ip, "Client IP from X-Forwarded-For");
            }
            Cow::Owned(ip.to_string())
        }
        ExtractedIp::FromRealIp(ip) => {
            if trusted_proxies.is_enabled() {
                debug!(client_ip = %ip, "Client IP from X-Real-IP");
            }
            Cow::Owned(ip.to_string())
        }
        ExtractedIp::NotFound => {
            if trusted_proxies.is_enabled() {
                debug!("No proxy headers found - request may be bypassing reverse proxy");
            }
            Cow::Borrowed(FALLBACK_IP)
        }
    }
}
