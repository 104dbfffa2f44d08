//! Hardening headers attached to every outgoing response.
//!
//! [`apply_security_headers`] is idempotent and only touches headers, so it
//! is applied both by the pipeline composers (to their own rejections) and
//! router-wide by [`SecurityHeadersLayer`]. A rejected request ends up
//! exactly as hardened as a successful one.

use std::task::{Context, Poll};

use axum::body::Body;
use axum::http::header::{self, HeaderName, HeaderValue};
use axum::http::{HeaderMap, Request, Response};
use tower::{Layer, Service};

use crate::config::Environment;

pub const CONTENT_SECURITY_POLICY: &str = concat!(
    "default-src 'self'; ",
    "script-src 'self'; ",
    "style-src 'self' 'unsafe-inline'; ",
    "img-src 'self' data:; ",
    "font-src 'self'"
);
pub const PERMISSIONS_POLICY: &str =
    "camera=(), microphone=(), geolocation=(), interest-cohort=()";
pub const STRICT_TRANSPORT_SECURITY: &str = "max-age=31536000; includeSubDomains; preload";

const PERMISSIONS_POLICY_HEADER: HeaderName = HeaderName::from_static("permissions-policy");

/// Headers sent in every environment.
const ALWAYS: [(HeaderName, &str); 6] = [
    (header::X_FRAME_OPTIONS, "DENY"),
    (header::X_CONTENT_TYPE_OPTIONS, "nosniff"),
    (header::X_XSS_PROTECTION, "1; mode=block"),
    (header::CONTENT_SECURITY_POLICY, CONTENT_SECURITY_POLICY),
    (header::REFERRER_POLICY, "strict-origin-when-cross-origin"),
    (PERMISSIONS_POLICY_HEADER, PERMISSIONS_POLICY),
];

/// Attach the hardening header set. HSTS is only sent in production.
pub fn apply_security_headers(headers: &mut HeaderMap, environment: Environment) {
    for (name, value) in ALWAYS {
        headers.insert(name, HeaderValue::from_static(value));
    }

    if environment.is_production() {
        headers.insert(
            header::STRICT_TRANSPORT_SECURITY,
            HeaderValue::from_static(STRICT_TRANSPORT_SECURITY),
        );
    }
}

/// Router-wide layer applying [`apply_security_headers`] to every response.
#[derive(Clone)]
pub struct SecurityHeadersLayer {
    environment: Environment,
}

impl SecurityHeadersLayer {
    pub fn new(environment: Environment) -> Self {
        Self { environment }
    }
}

impl<S> Layer<S> for SecurityHeadersLayer {
    type Service = SecurityHeadersService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        SecurityHeadersService {
            inner,
            environment: self.environment,
        }
    }
}

#[derive(Clone)]
pub struct SecurityHeadersService<S> {
    inner: S,
    environment: Environment,
}

impl<S> Service<Request<Body>> for SecurityHeadersService<S>
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

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let environment = self.environment;
        let mut inner = self.inner.clone();

        Box::pin(async move {
            let mut response = inner.call(req).await?;
            apply_security_headers(response.headers_mut(), environment);
            Ok(response)
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_headers_outside_production() {
        let mut headers = HeaderMap::new();
        apply_security_headers(&mut headers, Environment::Development);

        assert_eq!(headers["x-frame-options"], "DENY");
        assert_eq!(headers["x-content-type-options"], "nosniff");
        assert_eq!(headers["x-xss-protection"], "1; mode=block");
        assert_eq!(headers["content-security-policy"], CONTENT_SECURITY_POLICY);
        assert_eq!(headers["referrer-policy"], "strict-origin-when-cross-origin");
        assert_eq!(headers["permissions-policy"], PERMISSIONS_POLICY);
        assert!(headers.get("strict-transport-security").is_none());
    }

    #[test]
    fn test_hsts_only_in_production() {
        let mut headers = HeaderMap::new();
        apply_security_headers(&mut headers, Environment::Production);
        assert_eq!(
            headers["strict-transport-security"],
            "max-age=31536000; includeSubDomains; preload"
        );

        let mut staging = HeaderMap::new();
        apply_security_headers(&mut staging, Environment::Staging);
        assert!(staging.get("strict-transport-security").is_none());
    }

    #[test]
    fn test_application_is_idempotent() {
        let mut once = HeaderMap::new();
        apply_security_headers(&mut once, Environment::Production);

        let mut twice = once.clone();
        apply_security_headers(&mut twice, Environment::Production);

        assert_eq!(once, twice);
        assert_eq!(twice.get_all("x-frame-options").iter().count(), 1);
    }

    #[test]
    fn test_existing_headers_are_preserved() {
        let mut headers = HeaderMap::new();
        headers.insert("x-request-id", HeaderValue::from_static("abc"));

        apply_security_headers(&mut headers, Environment::Development);

        assert_eq!(headers["x-request-id"], "abc");
    }
}
