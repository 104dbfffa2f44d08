//! Client IP resolution shared by authentication logging, rate limiting and
//! audit logging.
//!
//! # Security Warning: IP Spoofing Risk
//!
//! **These functions trust client-provided headers.** A client talking to
//! this service directly can put anything in `X-Forwarded-For`. Deploy behind
//! a reverse proxy that overwrites (not appends to) the client IP headers:
//!
//! ```nginx
//! proxy_set_header X-Real-IP $remote_addr;
//! proxy_set_header X-Forwarded-For $remote_addr;
//! ```
//!
//! Identity-keyed rate limiting (`KeyStrategy::IdentityOrIp`) is not affected
//! by spoofing once the caller is authenticated.
//!
//! ## The "unknown" Fallback
//!
//! Rate limiting needs a key even when no IP header is present, so all such
//! requests share [`UNKNOWN_IP`]. Logging uses [`client_ip`] instead, which
//! reports the IP as absent.

use std::borrow::Cow;

use axum::http::HeaderMap;

/// Fallback rate limit key component when no client IP can be determined.
pub const UNKNOWN_IP: &str = "unknown";

/// Where the client IP was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExtractedIp<'a> {
    /// First entry of X-Forwarded-For.
    FromXff(&'a str),
    FromRealIp(&'a str),
    NotFound,
}

#[inline]
fn extract_ip_from_headers(headers: &HeaderMap) -> ExtractedIp<'_> {
    // Format: "client, proxy1, proxy2" - we want the first (client) IP
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

/// Client IP from `X-Forwarded-For` (first hop), then `X-Real-IP`.
///
/// Returns `None` when neither header carries a value.
#[inline]
pub fn client_ip(headers: &HeaderMap) -> Option<&str> {
    match extract_ip_from_headers(headers) {
        ExtractedIp::FromXff(ip) | ExtractedIp::FromRealIp(ip) => Some(ip),
        ExtractedIp::NotFound => None,
    }
}

/// Client IP for use as a rate limit key, falling back to [`UNKNOWN_IP`].
///
/// Borrowed for the fallback, owned otherwise.
#[inline]
pub fn client_ip_or_unknown(headers: &HeaderMap) -> Cow<'static, str> {
    match client_ip(headers) {
        Some(ip) => Cow::Owned(ip.to_string()),
        None => Cow::Borrowed(UNKNOWN_IP),
    }
}
