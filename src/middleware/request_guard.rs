//! Structural request checks run before any budget is spent on a request.
//!
//! # Checks
//!
//! 1. No header from [`SUSPICIOUS_HEADERS`] (IP-spoofing vectors), unless the
//!    deployment has listed it as a trusted proxy header
//! 2. Method is `GET` or `POST`
//! 3. `POST` bodies declare `Content-Type: application/json`
//!
//! # Trusted Proxy Headers
//!
//! Some reverse proxies legitimately send `X-Forwarded-Host`. Rather than
//! dropping the deny-list for everyone, such deployments list the specific
//! headers in `TRUSTED_PROXY_HEADERS`.

use axum::http::{HeaderMap, Method, header};
use thiserror::Error;

/// Headers associated with IP-spoofing attempts.
pub const SUSPICIOUS_HEADERS: [&str; 4] = [
    "x-forwarded-host",
    "x-originating-ip",
    "x-remote-ip",
    "x-remote-addr",
];

/// Why a request was rejected structurally.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StructuralViolation {
    #[error("Suspicious header detected: {0}")]
    SuspiciousHeader(&'static str),

    #[error("Method {0} not allowed")]
    MethodNotAllowed(Method),

    #[error("Content-Type must be application/json")]
    InvalidContentType,
}

/// Structural request policy.
#[derive(Debug, Clone)]
pub struct RequestPolicy {
    denied_headers: Vec<&'static str>,
}

impl Default for RequestPolicy {
    fn default() -> Self {
        Self {
            denied_headers: SUSPICIOUS_HEADERS.to_vec(),
        }
    }
}

impl RequestPolicy {
    /// Policy with the given deny-listed headers re-allowed.
    ///
    /// Names not on the deny-list are ignored.
    pub fn with_trusted_proxy_headers(trusted: &[String]) -> Self {
        Self {
            denied_headers: SUSPICIOUS_HEADERS
                .into_iter()
                .filter(|h| !trusted.iter().any(|t| t.eq_ignore_ascii_case(h)))
                .collect(),
        }
    }

    pub fn denied_headers(&self) -> &[&'static str] {
        &self.denied_headers
    }

    /// Run the structural checks in order, stopping at the first violation.
    pub fn check(&self, method: &Method, headers: &HeaderMap) -> Result<(), StructuralViolation> {
        if let Some(name) = self
            .denied_headers
            .iter()
            .find(|name| headers.contains_key(**name))
        {
            return Err(StructuralViolation::SuspiciousHeader(*name));
        }

        if method != Method::GET && method != Method::POST {
            return Err(StructuralViolation::MethodNotAllowed(method.clone()));
        }

        if method == Method::POST {
            let is_json = headers
                .get(header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .is_some_and(|ct| ct.contains("application/json"));
            if !is_json {
                return Err(StructuralViolation::InvalidContentType);
            }
        }

        Ok(())
    }
}
