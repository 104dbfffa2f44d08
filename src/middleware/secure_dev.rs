//! The hardened pipeline for privileged dev operations (`withSecureDev`).
//!
//! # Order
//!
//! ```text
//! AuthService (bearer or dev token, required role)
//!   └─ SecureDevService
//!        1. structural check           400 Invalid request
//!        2. rate limit (identity/IP)   429
//!        3. POST: read, parse, schema  413 / 400 Invalid JSON / 400 Validation failed
//!        4. role check                 403 Insufficient permissions
//!        5. production gate            403 Dev operations are disabled in production
//!        6. handler
//!        7. security + rate limit headers
//!        8. audit entry
//! ```
//!
//! Authentication runs first, so unauthenticated requests never spend the
//! dev-ops budget. A panic anywhere in steps 1 to 6 becomes a 500
//! `Internal server error`; every response, including that one, gets steps
//! 7 and 8.
//!
//! # Sanitized Bodies
//!
//! For `POST`, the handler never sees the raw body. After validation the
//! request body is replaced by an empty one and the schema's sanitized output
//! is stored as [`SanitizedBody`]. Read it with [`SanitizedJson`]:
//!
//! ```rust,ignore
//! async fn seed(
//!     Extension(identity): Extension<Identity>,
//!     SanitizedJson(body): SanitizedJson<SeedRequest>,
//! ) -> AppResult<impl IntoResponse> { ... }
//! ```

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;

use axum::body::Body;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::{Method, Request, Response, header};
use axum::response::IntoResponse;
use futures::FutureExt;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tower::{Layer, Service};
use tracing::{debug, error};

use super::auth::{AuthLayer, AuthOptions, AuthService};
use super::context::RequestContext;
use super::rate_limit::{
    RateLimitDecision, RateLimitSnapshot, RateLimiter, log_rate_limit_exceeded,
};
use super::request_guard::StructuralViolation;
use super::security_headers::apply_security_headers;
use crate::audit::{AuditEntry, SecurityEvent, log_security_event};
use crate::auth::{Identity, Role};
use crate::error::AppError;
use crate::state::SecurityContext;
use crate::utils::panic_message;
use crate::validation::{BodySchema, seed_request_schema};

/// The validated, sanitized JSON body of a secure-dev `POST`.
#[derive(Debug, Clone, PartialEq)]
pub struct SanitizedBody(pub Value);

/// Extractor deserializing [`SanitizedBody`] into `T`.
///
/// Rejects with 500 if the route is not behind [`SecureDevLayer`] or `T`
/// does not match the route's schema; both are wiring bugs, not client
/// errors.
#[derive(Debug, Clone)]
pub struct SanitizedJson<T>(pub T);

impl<T, S> FromRequestParts<S> for SanitizedJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let body = parts.extensions.get::<SanitizedBody>().ok_or_else(|| {
            AppError::Internal("no sanitized body; route is not behind SecureDevLayer".to_string())
        })?;

        serde_json::from_value(body.0.clone())
            .map(SanitizedJson)
            .map_err(|e| {
                AppError::Internal(format!("sanitized body does not match handler type: {e}"))
            })
    }
}

/// Options for [`SecureDevLayer`].
#[derive(Clone)]
pub struct SecureDevOptions {
    pub limiter: Arc<RateLimiter>,
    /// Defaults to [`Role::Administrator`].
    pub required_role: Role,
    /// Defaults to the seed request schema.
    pub schema: Arc<dyn BodySchema>,
}

impl SecureDevOptions {
    pub fn new(limiter: Arc<RateLimiter>) -> Self {
        Self {
            limiter,
            required_role: Role::Administrator,
            schema: Arc::new(seed_request_schema()),
        }
    }

    pub fn with_required_role(mut self, role: Role) -> Self {
        self.required_role = role;
        self
    }

    pub fn with_schema(mut self, schema: Arc<dyn BodySchema>) -> Self {
        self.schema = schema;
        self
    }
}

/// Wraps a route in authentication and the secure-dev pipeline.
///
/// ```rust,ignore
/// Router::new()
///     .route("/api/dev/seed", post(seed))
///     .route_layer(SecureDevLayer::new(security, SecureDevOptions::new(dev_ops_limiter)));
/// ```
#[derive(Clone)]
pub struct SecureDevLayer {
    security: Arc<SecurityContext>,
    options: SecureDevOptions,
}

impl SecureDevLayer {
    pub fn new(security: Arc<SecurityContext>, options: SecureDevOptions) -> Self {
        Self { security, options }
    }
}

impl<S> Layer<S> for SecureDevLayer {
    type Service = AuthService<SecureDevService<S>>;

    fn layer(&self, inner: S) -> Self::Service {
        let pipeline = SecureDevService {
            inner,
            security: self.security.clone(),
            options: self.options.clone(),
        };

        let auth = AuthOptions::require_role(self.options.required_role).with_dev_mode();
        AuthLayer::new(self.security.clone(), auth).layer(pipeline)
    }
}

/// Steps 1 to 8 of the secure-dev pipeline; always wrapped by [`AuthService`].
#[derive(Clone)]
pub struct SecureDevService<S> {
    inner: S,
    security: Arc<SecurityContext>,
    options: SecureDevOptions,
}

impl<S> Service<Request<Body>> for SecureDevService<S>
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
        let security = self.security.clone();
        let options = self.options.clone();
        let inner = self.inner.clone();

        Box::pin(async move {
            let started = Instant::now();
            let ctx = RequestContext::from_request(&req);
            let user_id = req.extensions().get::<Identity>().map(|i| i.id.clone());

            let outcome =
                AssertUnwindSafe(run_pipeline(&security, &options, &ctx, inner, req))
                    .catch_unwind()
                    .await;

            let mut response = match outcome {
                Ok(result) => result?,
                Err(panic) => {
                    let message = panic_message(panic.as_ref());
                    error!(
                        user_id = user_id.as_deref().unwrap_or("anonymous"),
                        endpoint = %ctx.endpoint,
                        panic = message,
                        "Panic in secure dev pipeline"
                    );
                    log_security_event(
                        SecurityEvent::InternalError,
                        &ctx,
                        user_id.as_deref(),
                        "unhandled panic in secure dev pipeline",
                    );
                    AppError::Internal(format!("panic in secure dev pipeline: {message}"))
                        .into_response()
                }
            };

            apply_security_headers(response.headers_mut(), security.environment);
            AuditEntry::new(&ctx, response.status(), user_id.as_deref(), started.elapsed()).log();

            Ok(response)
        })
    }
}

async fn run_pipeline<S>(
    security: &SecurityContext,
    options: &SecureDevOptions,
    ctx: &RequestContext,
    mut inner: S,
    req: Request<Body>,
) -> Result<Response<Body>, S::Error>
where
    S: Service<Request<Body>, Response = Response<Body>> + Send,
    S::Future: Send,
{
    let (req, snapshot) = match admit(security, options, ctx, req).await {
        Ok(admitted) => admitted,
        Err(e) => return Ok(e.into_response()),
    };

    let mut response = inner.call(req).await?;

    if let Some(snapshot) = snapshot {
        snapshot.apply_headers(response.headers_mut());
    }

    Ok(response)
}

/// Steps 1 to 5. Returns the request ready for the handler, with the
/// limiter snapshot for the response headers.
async fn admit(
    security: &SecurityContext,
    options: &SecureDevOptions,
    ctx: &RequestContext,
    req: Request<Body>,
) -> Result<(Request<Body>, Option<RateLimitSnapshot>), AppError> {
    let user_id = req.extensions().get::<Identity>().map(|i| i.id.clone());
    let user_id = user_id.as_deref();

    if let Err(violation) = security.request_policy.check(req.method(), req.headers()) {
        let event = match violation {
            StructuralViolation::SuspiciousHeader(_) => SecurityEvent::SuspiciousHeader,
            StructuralViolation::MethodNotAllowed(_) => SecurityEvent::InvalidMethod,
            StructuralViolation::InvalidContentType => SecurityEvent::InvalidContentType,
        };
        log_security_event(event, ctx, user_id, &violation.to_string());
        return Err(AppError::InvalidRequest(violation.to_string()));
    }

    let snapshot = match options.limiter.check(&req) {
        RateLimitDecision::Limited(snapshot) => {
            log_rate_limit_exceeded(&req, &snapshot);
            return Err(AppError::RateLimited(snapshot));
        }
        RateLimitDecision::Admitted(snapshot) => Some(snapshot),
        RateLimitDecision::FailedOpen => None,
    };

    let req = if req.method() == Method::POST {
        sanitize_body(security, options, ctx, user_id, req).await?
    } else {
        req
    };

    let identity = req
        .extensions()
        .get::<Identity>()
        .ok_or(AppError::AuthenticationRequired)?;
    if !identity.role.satisfies(options.required_role) {
        log_security_event(
            SecurityEvent::InsufficientPermissions,
            ctx,
            user_id,
            &format!(
                "role {} does not satisfy required role {}",
                identity.role, options.required_role
            ),
        );
        return Err(AppError::InsufficientPermissions);
    }

    if security.environment.is_production() {
        log_security_event(
            SecurityEvent::ProductionAccessAttempt,
            ctx,
            user_id,
            "dev operation attempted in production",
        );
        return Err(AppError::ProductionDisabled);
    }

    Ok((req, snapshot))
}

/// Read, parse and validate a `POST` body, swapping it for [`SanitizedBody`].
async fn sanitize_body(
    security: &SecurityContext,
    options: &SecureDevOptions,
    ctx: &RequestContext,
    user_id: Option<&str>,
    req: Request<Body>,
) -> Result<Request<Body>, AppError> {
    let limit = security.max_body_size;

    let declared_length = req
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok());
    if declared_length.is_some_and(|len| len > limit) {
        return Err(AppError::PayloadTooLarge(limit));
    }

    let (parts, body) = req.into_parts();
    let bytes = axum::body::to_bytes(body, limit).await.map_err(|e| {
        debug!(error = %e, "Failed to read request body");
        AppError::PayloadTooLarge(limit)
    })?;

    let value: Value = serde_json::from_slice(&bytes).map_err(|e| {
        log_security_event(SecurityEvent::InvalidJson, ctx, user_id, &e.to_string());
        AppError::InvalidJson
    })?;

    let result = options.schema.validate(&value);
    if !result.is_valid {
        let summary = result
            .errors
            .iter()
            .map(|e| format!("{}: {}", e.field, e.message))
            .collect::<Vec<_>>()
            .join("; ");
        log_security_event(
            SecurityEvent::ValidationFailed,
            ctx,
            user_id,
            &format!("{} rejected: {summary}", options.schema.name()),
        );
        return Err(AppError::ValidationFailed(result.errors));
    }

    let mut req = Request::from_parts(parts, Body::empty());
    req.headers_mut().remove(header::CONTENT_LENGTH);
    req.extensions_mut().insert(SanitizedBody(Value::Object(
        result.sanitized_data.unwrap_or_default(),
    )));

    Ok(req)
}
