//! Fixed-window rate limiting.
//!
//! # Algorithm
//!
//! Each key owns one counter and one reset deadline. Every request in
//! `[window_start, window_start + window)` increments the same counter; the
//! first request at or after the deadline starts a new window with
//! `count = 1`. A request is rejected once the post-increment count exceeds
//! `max_requests`. Rejected requests still count.
//!
//! Counters live in a [`RateLimitStore`]. Expired entries are reset lazily on
//! the next hit, so the periodic sweep (see `AppState`) only bounds memory.
//!
//! # Keys
//!
//! | Strategy | Key |
//! |---|---|
//! | [`KeyStrategy::ClientIp`] | `rate_limit:<client-ip>` |
//! | [`KeyStrategy::IdentityOrIp`] | `rate_limit:user:<id>`, else the IP key |
//! | [`KeyStrategy::Custom`] | whatever the generator returns |
//!
//! # Failure Policy
//!
//! The limiter fails open. A key generator or store error is logged at
//! error level and the request is admitted without rate limit headers. A
//! limiter fault must not take the API down with it.
//!
//! # Response Headers
//!
//! Admitted: `X-RateLimit-Limit`, `X-RateLimit-Remaining`, `X-RateLimit-Reset`
//! (Unix seconds). Rejected (429): the same with `Remaining: 0`, plus
//! `Retry-After` in whole seconds, rounded up.

use std::fmt;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use axum::body::Body;
use axum::http::header::{self, HeaderName, HeaderValue};
use axum::http::{HeaderMap, Request, Response};
use axum::response::IntoResponse;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tower::{Layer, Service};
use tracing::{debug, error};

use super::context::RequestContext;
use super::ip::client_ip_or_unknown;
use crate::audit::{SecurityEvent, log_security_event};
use crate::auth::Identity;
use crate::error::AppError;
use crate::metrics;
use crate::rate_limit_store::{MemoryStore, RateLimitEntry, RateLimitStore, StoreError};

const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
const X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

/// Default window for privileged dev operations.
pub const DEV_OPS_WINDOW: Duration = Duration::from_secs(15 * 60);
/// Default request budget per window for privileged dev operations.
pub const DEV_OPS_MAX_REQUESTS: u32 = 5;

/// Why a rate limit check could not be performed.
#[derive(Debug, Error)]
pub enum RateLimitError {
    #[error("could not derive rate limit key: {0}")]
    KeyUnavailable(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Caller-supplied key function.
pub type KeyGenerator =
    Arc<dyn Fn(&Request<Body>) -> Result<String, RateLimitError> + Send + Sync>;

/// How a request maps to a rate limit key.
#[derive(Clone, Default)]
pub enum KeyStrategy {
    /// Client network address. Usable before authentication.
    #[default]
    ClientIp,
    /// Authenticated caller if an [`Identity`] is attached, else client IP.
    ///
    /// Keeps callers behind a shared NAT from starving each other.
    IdentityOrIp,
    Custom(KeyGenerator),
}

impl fmt::Debug for KeyStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyStrategy::ClientIp => f.write_str("ClientIp"),
            KeyStrategy::IdentityOrIp => f.write_str("IdentityOrIp"),
            KeyStrategy::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

impl KeyStrategy {
    pub fn resolve(&self, req: &Request<Body>) -> Result<String, RateLimitError> {
        match self {
            KeyStrategy::ClientIp => Ok(ip_key(req)),
            KeyStrategy::IdentityOrIp => Ok(match req.extensions().get::<Identity>() {
                Some(identity) => format!("rate_limit:user:{}", identity.id),
                None => ip_key(req),
            }),
            KeyStrategy::Custom(generate) => generate(req),
        }
    }
}

fn ip_key(req: &Request<Body>) -> String {
    format!("rate_limit:{}", client_ip_or_unknown(req.headers()))
}

/// Limiter configuration, built once per route registration.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub window: Duration,
    pub max_requests: u32,
    pub key: KeyStrategy,
}

impl RateLimitConfig {
    /// IP-keyed limit of `max_requests` per `window`.
    pub fn new(window: Duration, max_requests: u32) -> Self {
        Self {
            window,
            max_requests,
            key: KeyStrategy::ClientIp,
        }
    }

    /// 5 requests per 15 minutes, keyed by identity when known.
    pub fn dev_operations() -> Self {
        Self::new(DEV_OPS_WINDOW, DEV_OPS_MAX_REQUESTS).with_key(KeyStrategy::IdentityOrIp)
    }

    pub fn with_key(mut self, key: KeyStrategy) -> Self {
        self.key = key;
        self
    }

    fn window_ms(&self) -> i64 {
        i64::try_from(self.window.as_millis()).unwrap_or(i64::MAX)
    }
}

/// Counter state for one key after a check, with the derived header values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitSnapshot {
    pub key: String,
    pub count: u32,
    pub limit: u32,
    /// `max(0, limit - count)`
    pub remaining: u32,
    pub reset_at_ms: i64,
    /// Seconds until the window resets, rounded up.
    pub retry_after_secs: u64,
}

impl RateLimitSnapshot {
    fn new(key: String, entry: RateLimitEntry, limit: u32, now_ms: i64) -> Self {
        let until_reset = u64::try_from(entry.reset_time_ms.saturating_sub(now_ms)).unwrap_or(0);

        Self {
            key,
            count: entry.count,
            limit,
            remaining: limit.saturating_sub(entry.count),
            reset_at_ms: entry.reset_time_ms,
            retry_after_secs: until_reset.div_ceil(1000),
        }
    }

    /// Window reset as Unix seconds, rounded up.
    pub fn reset_at_secs(&self) -> i64 {
        self.reset_at_ms.saturating_add(999) / 1000
    }

    /// Window reset as an RFC 3339 timestamp, for logs.
    pub fn reset_at_rfc3339(&self) -> String {
        DateTime::<Utc>::from_timestamp_millis(self.reset_at_ms)
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| self.reset_at_ms.to_string())
    }

    /// Attach `X-RateLimit-{Limit,Remaining,Reset}`.
    pub fn apply_headers(&self, headers: &mut HeaderMap) {
        headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(self.limit));
        headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(self.remaining));
        headers.insert(X_RATELIMIT_RESET, HeaderValue::from(self.reset_at_secs()));
    }

    /// Attach the 429 header set: the limit headers plus `Retry-After`.
    pub fn apply_rejection_headers(&self, headers: &mut HeaderMap) {
        self.apply_headers(headers);
        headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(0u32));
        headers.insert(header::RETRY_AFTER, HeaderValue::from(self.retry_after_secs));
    }
}

/// Outcome of a rate limit check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateLimitDecision {
    Admitted(RateLimitSnapshot),
    Limited(RateLimitSnapshot),
    /// The check itself failed; the request is admitted without headers.
    FailedOpen,
}

impl RateLimitDecision {
    pub fn is_limited(&self) -> bool {
        matches!(self, RateLimitDecision::Limited(_))
    }
}

/// A named fixed-window limiter over a [`RateLimitStore`].
pub struct RateLimiter {
    name: String,
    config: RateLimitConfig,
    store: Arc<dyn RateLimitStore>,
}

impl fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimiter")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("tracked_keys", &self.store.len())
            .finish()
    }
}

impl RateLimiter {
    /// Limiter with a process-local [`MemoryStore`].
    pub fn new(name: impl Into<String>, config: RateLimitConfig) -> Self {
        Self::with_store(name, config, Arc::new(MemoryStore::new()))
    }

    pub fn with_store(
        name: impl Into<String>,
        config: RateLimitConfig,
        store: Arc<dyn RateLimitStore>,
    ) -> Self {
        Self {
            name: name.into(),
            config,
            store,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn RateLimitStore> {
        &self.store
    }

    /// Count `req` against its key at the current time.
    pub fn check(&self, req: &Request<Body>) -> RateLimitDecision {
        self.check_at(req, Utc::now().timestamp_millis())
    }

    /// Count `req` against its key at `now_ms`.
    pub fn check_at(&self, req: &Request<Body>, now_ms: i64) -> RateLimitDecision {
        match self.config.key.resolve(req) {
            Ok(key) => self.check_key(key, now_ms),
            Err(e) => self.fail_open(&e),
        }
    }

    /// Count one request against an already-resolved key.
    pub fn check_key(&self, key: String, now_ms: i64) -> RateLimitDecision {
        let entry = match self.store.hit(&key, now_ms, self.config.window_ms()) {
            Ok(entry) => entry,
            Err(e) => return self.fail_open(&RateLimitError::Store(e)),
        };

        let snapshot = RateLimitSnapshot::new(key, entry, self.config.max_requests, now_ms);

        if snapshot.count > self.config.max_requests {
            debug!(
                limiter = %self.name,
                key = %snapshot.key,
                count = snapshot.count,
                limit = snapshot.limit,
                reset_at = %snapshot.reset_at_rfc3339(),
                "Rate limit exceeded"
            );
            metrics::record_rate_limit_rejection(&self.name);
            RateLimitDecision::Limited(snapshot)
        } else {
            RateLimitDecision::Admitted(snapshot)
        }
    }

    fn fail_open(&self, err: &RateLimitError) -> RateLimitDecision {
        error!(limiter = %self.name, error = %err, "Rate limit check failed, admitting request");
        metrics::record_rate_limit_fail_open(&self.name);
        RateLimitDecision::FailedOpen
    }

    /// Drop entries whose window ended before `now_ms`. Returns how many were removed.
    pub fn sweep_expired(&self, now_ms: i64) -> usize {
        match self.store.sweep_expired(now_ms) {
            Ok(removed) => {
                let remaining = self.store.len();
                debug!(
                    limiter = %self.name,
                    removed,
                    remaining,
                    "Swept expired rate limit entries"
                );
                metrics::set_rate_limit_tracked_keys(&self.name, remaining);
                removed
            }
            Err(e) => {
                error!(limiter = %self.name, error = %e, "Rate limit sweep failed");
                0
            }
        }
    }
}

/// Applies a [`RateLimiter`] to every request reaching the wrapped service.
///
/// Place inside `AuthLayer` when using [`KeyStrategy::IdentityOrIp`], so the
/// identity is already attached.
///
/// ```rust,ignore
/// let limiter = Arc::new(RateLimiter::new("api", RateLimitConfig::new(window, 100)));
/// Router::new()
///     .route("/api/me", get(handler))
///     .route_layer(RateLimitLayer::new(limiter))
///     .route_layer(AuthLayer::new(security, AuthOptions::default()));
/// ```
#[derive(Clone)]
pub struct RateLimitLayer {
    limiter: Arc<RateLimiter>,
}

impl RateLimitLayer {
    pub fn new(limiter: Arc<RateLimiter>) -> Self {
        Self { limiter }
    }
}

impl<S> Layer<S> for RateLimitLayer {
    type Service = RateLimitService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RateLimitService {
            inner,
            limiter: self.limiter.clone(),
        }
    }
}

/// Rate limiting service wrapper.
#[derive(Clone)]
pub struct RateLimitService<S> {
    inner: S,
    limiter: Arc<RateLimiter>,
}

impl<S> Service<Request<Body>> for RateLimitService<S>
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
        // The check is synchronous and completes before the request moves on.
        let decision = self.limiter.check(&req);
        let mut inner = self.inner.clone();

        Box::pin(async move {
            match decision {
                RateLimitDecision::Limited(snapshot) => {
                    log_rate_limit_exceeded(&req, &snapshot);
                    Ok(AppError::RateLimited(snapshot).into_response())
                }
                RateLimitDecision::Admitted(snapshot) => {
                    let mut response = inner.call(req).await?;
                    snapshot.apply_headers(response.headers_mut());
                    Ok(response)
                }
                RateLimitDecision::FailedOpen => inner.call(req).await,
            }
        })
    }
}

/// Record a rejection as a `RATE_LIMIT_EXCEEDED` security event.
pub(crate) fn log_rate_limit_exceeded(req: &Request<Body>, snapshot: &RateLimitSnapshot) {
    let ctx = RequestContext::from_request(req);
    let user_id = req.extensions().get::<Identity>().map(|i| i.id.as_str());
    log_security_event(
        SecurityEvent::RateLimitExceeded,
        &ctx,
        user_id,
        &format!(
            "{} requests against limit {}, resets at {}",
            snapshot.count,
            snapshot.limit,
            snapshot.reset_at_rfc3339()
        ),
    );
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::auth::Role;
    use axum::http::StatusCode;
    use tower::ServiceExt;

    const WINDOW: Duration = Duration::from_secs(60);

    fn request_from(ip: &str) -> Request<Body> {
        Request::builder()
            .uri("/api/me")
            .header("x-forwarded-for", ip)
            .body(Body::empty())
            .unwrap()
    }

    fn limiter(max: u32) -> RateLimiter {
        RateLimiter::new("test", RateLimitConfig::new(WINDOW, max))
    }

    struct FailingStore;

    impl RateLimitStore for FailingStore {
        fn hit(&self, _: &str, _: i64, _: i64) -> Result<RateLimitEntry, StoreError> {
            Err(StoreError::Unavailable("connection refused".to_string()))
        }
        fn get(&self, _: &str) -> Result<Option<RateLimitEntry>, StoreError> {
            Err(StoreError::Unavailable("connection refused".to_string()))
        }
        fn remove(&self, _: &str) -> Result<(), StoreError> {
            Ok(())
        }
        fn sweep_expired(&self, _: i64) -> Result<usize, StoreError> {
            Err(StoreError::Unavailable("connection refused".to_string()))
        }
        fn len(&self) -> usize {
            0
        }
    }

    #[test]
    fn test_fixed_window_admits_max_then_rejects() {
        let limiter = limiter(5);
        let req = request_from("10.0.0.1");

        for i in 0..5 {
            let decision = limiter.check_at(&req, 1_000 + i);
            assert!(
                matches!(decision, RateLimitDecision::Admitted(_)),
                "request {i} should be admitted"
            );
        }

        match limiter.check_at(&req, 30_000) {
            RateLimitDecision::Limited(snapshot) => {
                assert_eq!(snapshot.count, 6);
                assert_eq!(snapshot.remaining, 0);
                assert_eq!(snapshot.reset_at_ms, 61_000);
                assert_eq!(snapshot.retry_after_secs, 31);
            }
            other => panic!("expected Limited, got {other:?}"),
        }
    }

    #[test]
    fn test_unbounded_window_keeps_limiting() {
        let config = RateLimitConfig::new(Duration::from_millis(u64::MAX), 1);
        let limiter = RateLimiter::new("unbounded", config);
        let req = request_from("10.0.0.1");
        let now = 1_700_000_000_000;

        assert!(!limiter.check_at(&req, now).is_limited());

        match limiter.check_at(&req, now + 1) {
            RateLimitDecision::Limited(snapshot) => {
                assert_eq!(snapshot.reset_at_ms, i64::MAX);
                assert_eq!(snapshot.reset_at_secs(), i64::MAX / 1000);
                assert!(snapshot.retry_after_secs > 0);
            }
            other => panic!("expected Limited, got {other:?}"),
        }
    }

    #[test]
    fn test_window_reset_admits_again_with_count_one() {
        let limiter = limiter(1);
        let req = request_from("10.0.0.1");

        assert!(!limiter.check_at(&req, 0).is_limited());
        assert!(limiter.check_at(&req, 10).is_limited());

        match limiter.check_at(&req, 60_000) {
            RateLimitDecision::Admitted(snapshot) => {
                assert_eq!(snapshot.count, 1);
                assert_eq!(snapshot.reset_at_ms, 120_000);
            }
            other => panic!("expected Admitted, got {other:?}"),
        }
    }

    #[test]
    fn test_remaining_counts_down() {
        let limiter = limiter(3);
        let req = request_from("10.0.0.1");

        let remaining: Vec<u32> = (0..3)
            .map(|_| match limiter.check_at(&req, 0) {
                RateLimitDecision::Admitted(s) => s.remaining,
                other => panic!("unexpected {other:?}"),
            })
            .collect();

        assert_eq!(remaining, vec![2, 1, 0]);
    }

    #[test]
    fn test_ip_keys_are_independent() {
        let limiter = limiter(1);

        assert!(!limiter.check_at(&request_from("10.0.0.1"), 0).is_limited());
        assert!(!limiter.check_at(&request_from("10.0.0.2"), 0).is_limited());
        assert!(limiter.check_at(&request_from("10.0.0.1"), 0).is_limited());
    }

    #[test]
    fn test_ip_key_format_and_unknown_fallback() {
        let strategy = KeyStrategy::ClientIp;

        assert_eq!(
            strategy.resolve(&request_from("192.0.2.5")).unwrap(),
            "rate_limit:192.0.2.5"
        );

        let anonymous = Request::builder().body(Body::empty()).unwrap();
        assert_eq!(strategy.resolve(&anonymous).unwrap(), "rate_limit:unknown");
    }

    #[test]
    fn test_identity_key_preferred_when_authenticated() {
        let strategy = KeyStrategy::IdentityOrIp;
        let mut req = request_from("192.0.2.5");

        assert_eq!(strategy.resolve(&req).unwrap(), "rate_limit:192.0.2.5");

        req.extensions_mut()
            .insert(Identity::new("user-7", "u7@example.org", Role::Manager));
        assert_eq!(strategy.resolve(&req).unwrap(), "rate_limit:user:user-7");
    }

    #[test]
    fn test_key_generator_error_fails_open() {
        let config = RateLimitConfig::new(WINDOW, 1).with_key(KeyStrategy::Custom(Arc::new(
            |_: &Request<Body>| -> Result<String, RateLimitError> {
                Err(RateLimitError::KeyUnavailable("no tenant".to_string()))
            },
        )));
        let limiter = RateLimiter::new("test", config);
        let req = request_from("10.0.0.1");

        for _ in 0..3 {
            assert_eq!(limiter.check_at(&req, 0), RateLimitDecision::FailedOpen);
        }
        assert!(limiter.store().is_empty());
    }

    #[test]
    fn test_store_error_fails_open() {
        let config = RateLimitConfig::new(WINDOW, 1);
        let limiter = RateLimiter::with_store("test", config, Arc::new(FailingStore));

        assert_eq!(
            limiter.check_at(&request_from("10.0.0.1"), 0),
            RateLimitDecision::FailedOpen
        );
        assert_eq!(limiter.sweep_expired(0), 0);
    }

    #[test]
    fn test_sweep_removes_expired_entries() {
        let limiter = limiter(5);
        limiter.check_at(&request_from("10.0.0.1"), 0);
        limiter.check_at(&request_from("10.0.0.2"), 50_000);

        assert_eq!(limiter.sweep_expired(60_000), 1);
        assert_eq!(limiter.store().len(), 1);
    }

    #[test]
    fn test_dev_operations_defaults() {
        let config = RateLimitConfig::dev_operations();

        assert_eq!(config.window, Duration::from_secs(900));
        assert_eq!(config.max_requests, 5);
        assert!(matches!(config.key, KeyStrategy::IdentityOrIp));
    }

    #[test]
    fn test_snapshot_headers() {
        let snapshot = RateLimitSnapshot {
            key: "rate_limit:10.0.0.1".to_string(),
            count: 6,
            limit: 5,
            remaining: 0,
            reset_at_ms: 1_700_000_000_500,
            retry_after_secs: 12,
        };

        let mut admitted = HeaderMap::new();
        snapshot.apply_headers(&mut admitted);
        assert_eq!(admitted["x-ratelimit-limit"], "5");
        assert_eq!(admitted["x-ratelimit-reset"], "1700000001");
        assert!(admitted.get("retry-after").is_none());

        let mut rejected = HeaderMap::new();
        snapshot.apply_rejection_headers(&mut rejected);
        assert_eq!(rejected["x-ratelimit-remaining"], "0");
        assert_eq!(rejected["retry-after"], "12");
    }

    #[tokio::test]
    async fn test_layer_rejects_with_429_and_headers() {
        let limiter = Arc::new(limiter(1));
        let service = RateLimitLayer::new(limiter).layer(tower::service_fn(
            |_req: Request<Body>| async {
                Ok::<_, std::convert::Infallible>(Response::new(Body::from("ok")))
            },
        ));

        let first = service
            .clone()
            .oneshot(request_from("10.0.0.1"))
            .await
            .unwrap();
        assert_eq!(first.status(), StatusCode::OK);
        assert_eq!(first.headers()["x-ratelimit-limit"], "1");
        assert_eq!(first.headers()["x-ratelimit-remaining"], "0");

        let second = service.oneshot(request_from("10.0.0.1")).await.unwrap();
        assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(second.headers()["x-ratelimit-remaining"], "0");
        assert!(second.headers().contains_key("retry-after"));

        let body = axum::body::to_bytes(second.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"], "Rate limit exceeded");
        assert!(json["retryAfter"].as_u64().unwrap() > 0);
    }
}
