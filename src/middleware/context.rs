//! Per-request facts captured once at the edge of the pipeline.

use axum::http::{Method, Request, header};

use super::ip::client_ip;
use super::request_id::extract_or_generate_request_id;

/// Request metadata used by security event and audit logging.
///
/// Captured before the request is handed down the pipeline so that logging
/// after the handler runs does not need the request back.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: String,
    pub method: Method,
    /// Path only, e.g. `/api/dev/seed`
    pub endpoint: String,
    /// Path and query
    pub url: String,
    pub client_ip: Option<String>,
    pub user_agent: Option<String>,
}

impl RequestContext {
    pub fn from_request<B>(req: &Request<B>) -> Self {
        let headers = req.headers();

        Self {
            request_id: extract_or_generate_request_id(req),
            method: req.method().clone(),
            endpoint: req.uri().path().to_string(),
            url: req
                .uri()
                .path_and_query()
                .map(|pq| pq.as_str().to_string())
                .unwrap_or_else(|| req.uri().path().to_string()),
            client_ip: client_ip(headers).map(str::to_string),
            user_agent: headers
                .get(header::USER_AGENT)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string),
        }
    }

    /// Client IP for log fields; `"unknown"` when absent.
    pub fn client_ip_display(&self) -> &str {
        self.client_ip.as_deref().unwrap_or("unknown")
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::body::Body;

    #[test]
    fn test_context_captures_request_facts() {
        let req = Request::builder()
            .method(Method::POST)
            .uri("/api/dev/seed?dry_run=true")
            .header("x-request-id", "req-42")
            .header("x-forwarded-for", "203.0.113.7")
            .header("user-agent", "curl/8.0")
            .body(Body::empty())
            .unwrap();

        let ctx = RequestContext::from_request(&req);

        assert_eq!(ctx.request_id, "req-42");
        assert_eq!(ctx.method, Method::POST);
        assert_eq!(ctx.endpoint, "/api/dev/seed");
        assert_eq!(ctx.url, "/api/dev/seed?dry_run=true");
        assert_eq!(ctx.client_ip.as_deref(), Some("203.0.113.7"));
        assert_eq!(ctx.user_agent.as_deref(), Some("curl/8.0"));
    }

    #[test]
    fn test_context_generates_request_id_and_reports_unknown_ip() {
        let req = Request::builder().uri("/health").body(Body::empty()).unwrap();

        let ctx = RequestContext::from_request(&req);

        assert!(uuid::Uuid::parse_str(&ctx.request_id).is_ok());
        assert_eq!(ctx.client_ip, None);
        assert_eq!(ctx.client_ip_display(), "unknown");
    }
}
