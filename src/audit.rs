//! Security event and access logging.
//!
//! Two separate streams:
//!
//! - **Security events** (`target: "security"`): discrete, logged the moment
//!   they are detected, each tagged with a [`SecurityEvent`] type. Meant for
//!   security monitoring.
//! - **Audit entries** (`target: "audit"`): exactly one per request that
//!   went through the secure-dev pipeline, written after the response is
//!   built. `warn` for status >= 400, `info` otherwise.
//!
//! Route these targets separately with `RUST_LOG`, e.g.
//! `RUST_LOG=info,security=warn,audit=info`.

use std::fmt;
use std::time::Duration;

use axum::http::StatusCode;
use chrono::{SecondsFormat, Utc};
use tracing::{info, warn};

use crate::metrics;
use crate::middleware::context::RequestContext;

/// Security-relevant conditions detected by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SecurityEvent {
    SuspiciousHeader,
    InvalidMethod,
    InvalidContentType,
    InvalidJson,
    ValidationFailed,
    MissingToken,
    InvalidToken,
    InsufficientPermissions,
    AuthenticationError,
    DevModeAccess,
    ProductionAccessAttempt,
    RateLimitExceeded,
    InternalError,
}

impl SecurityEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            SecurityEvent::SuspiciousHeader => "SUSPICIOUS_HEADER",
            SecurityEvent::InvalidMethod => "INVALID_METHOD",
            SecurityEvent::InvalidContentType => "INVALID_CONTENT_TYPE",
            SecurityEvent::InvalidJson => "INVALID_JSON",
            SecurityEvent::ValidationFailed => "VALIDATION_FAILED",
            SecurityEvent::MissingToken => "MISSING_TOKEN",
            SecurityEvent::InvalidToken => "INVALID_TOKEN",
            SecurityEvent::InsufficientPermissions => "INSUFFICIENT_PERMISSIONS",
            SecurityEvent::AuthenticationError => "AUTHENTICATION_ERROR",
            SecurityEvent::DevModeAccess => "DEV_MODE_ACCESS",
            SecurityEvent::ProductionAccessAttempt => "PRODUCTION_ACCESS_ATTEMPT",
            SecurityEvent::RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
            SecurityEvent::InternalError => "INTERNAL_ERROR",
        }
    }
}

impl fmt::Display for SecurityEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Log one security event.
///
/// `detail` must describe the request, never echo a credential.
pub fn log_security_event(
    event: SecurityEvent,
    ctx: &RequestContext,
    user_id: Option<&str>,
    detail: &str,
) {
    warn!(
        target: "security",
        event = event.as_str(),
        request_id = %ctx.request_id,
        method = %ctx.method,
        endpoint = %ctx.endpoint,
        client_ip = %ctx.client_ip_display(),
        user_id = user_id.unwrap_or("anonymous"),
        detail,
        "Security event"
    );
    metrics::record_security_event(event.as_str());
}

/// The access log record for one completed request.
#[derive(Debug, Clone)]
pub struct AuditEntry<'a> {
    pub ctx: &'a RequestContext,
    pub status: StatusCode,
    pub user_id: Option<&'a str>,
    pub duration: Duration,
}

impl<'a> AuditEntry<'a> {
    pub fn new(
        ctx: &'a RequestContext,
        status: StatusCode,
        user_id: Option<&'a str>,
        duration: Duration,
    ) -> Self {
        Self {
            ctx,
            status,
            user_id,
            duration,
        }
    }

    /// Emit the entry and record the request duration metric.
    pub fn log(&self) {
        let ctx = self.ctx;
        let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        let duration_ms = self.duration.as_secs_f64() * 1000.0;
        let user_agent = ctx.user_agent.as_deref().unwrap_or("");

        if self.status.as_u16() >= 400 {
            warn!(
                target: "audit",
                request_id = %ctx.request_id,
                method = %ctx.method,
                url = %ctx.url,
                client_ip = %ctx.client_ip_display(),
                user_agent,
                user_id = self.user_id.unwrap_or("anonymous"),
                status = self.status.as_u16(),
                duration_ms,
                timestamp = %timestamp,
                "Request completed"
            );
        } else {
            info!(
                target: "audit",
                request_id = %ctx.request_id,
                method = %ctx.method,
                url = %ctx.url,
                client_ip = %ctx.client_ip_display(),
                user_agent,
                user_id = self.user_id.unwrap_or("anonymous"),
                status = self.status.as_u16(),
                duration_ms,
                timestamp = %timestamp,
                "Request completed"
            );
        }

        metrics::record_request_duration(
            &ctx.endpoint,
            ctx.method.as_str(),
            self.status.as_u16(),
            self.duration.as_secs_f64(),
        );
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;

    fn ctx() -> RequestContext {
        let req = Request::builder()
            .method("POST")
            .uri("/api/dev/seed")
            .header("x-real-ip", "198.51.100.4")
            .body(Body::empty())
            .unwrap();
        RequestContext::from_request(&req)
    }

    #[test]
    fn test_event_names_are_distinct() {
        let events = [
            SecurityEvent::SuspiciousHeader,
            SecurityEvent::InvalidMethod,
            SecurityEvent::InvalidContentType,
            SecurityEvent::InvalidJson,
            SecurityEvent::ValidationFailed,
            SecurityEvent::MissingToken,
            SecurityEvent::InvalidToken,
            SecurityEvent::InsufficientPermissions,
            SecurityEvent::AuthenticationError,
            SecurityEvent::DevModeAccess,
            SecurityEvent::ProductionAccessAttempt,
            SecurityEvent::RateLimitExceeded,
            SecurityEvent::InternalError,
        ];

        let names: std::collections::HashSet<_> = events.iter().map(|e| e.as_str()).collect();
        assert_eq!(names.len(), events.len());
        assert_ne!(
            SecurityEvent::InvalidJson.as_str(),
            SecurityEvent::ValidationFailed.as_str()
        );
    }

    #[test]
    fn test_display_matches_as_str() {
        assert_eq!(
            SecurityEvent::ProductionAccessAttempt.to_string(),
            "PRODUCTION_ACCESS_ATTEMPT"
        );
    }

    #[test]
    fn test_logging_does_not_panic_without_subscriber() {
        let ctx = ctx();
        log_security_event(SecurityEvent::SuspiciousHeader, &ctx, None, "x-remote-ip");
        AuditEntry::new(&ctx, StatusCode::BAD_REQUEST, None, Duration::from_millis(3)).log();
        AuditEntry::new(&ctx, StatusCode::OK, Some("user-1"), Duration::ZERO).log();
    }
}
