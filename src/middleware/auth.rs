//! Bearer token authentication (`withAuth`).
//!
//! # Flow
//!
//! ```text
//! Start ─┬─ dev mode? ──────────────────────────────┐
//!        └─ Authorization: Bearer <token> ─ validate ┴─ role check ─ handler
//!             │ missing/malformed      │ invalid        │ mismatch
//!             ▼                        ▼                ▼
//!            401                      401              403
//! ```
//!
//! Validator failures, a validator exceeding its deadline, and panics in the
//! flow or the wrapped handler all become 500 `Authentication failed`.
//!
//! # Dev Mode
//!
//! The `x-dev-token` shortcut synthesizes [`Identity::dev_administrator`]
//! without calling the validator. It is taken only when all of these hold:
//!
//! 1. the route opted in with [`AuthOptions::allow_dev_mode`]
//! 2. the process runs in the development environment
//! 3. a dev token is configured
//! 4. the request's `x-dev-token` equals it (constant-time comparison)
//!
//! Otherwise the request goes through normal bearer authentication.
//!
//! # Usage
//!
//! ```rust,ignore
//! Router::new()
//!     .route("/api/me", get(me))
//!     .route_layer(AuthLayer::new(security, AuthOptions::default()));
//! ```
//!
//! The identity is attached to request extensions; read it with
//! `Extension<Identity>`.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::body::Body;
use axum::http::{HeaderMap, Request, Response, header};
use axum::response::IntoResponse;
use futures::FutureExt;
use subtle::ConstantTimeEq;
use tower::{Layer, Service};
use tracing::{error, info};

use super::context::RequestContext;
use super::security_headers::apply_security_headers;
use crate::audit::{SecurityEvent, log_security_event};
use crate::auth::{Identity, Role};
use crate::error::AppError;
use crate::metrics;
use crate::state::SecurityContext;
use crate::utils::panic_message;

/// Header carrying the dev-mode token.
pub const DEV_TOKEN_HEADER: &str = "x-dev-token";

const BEARER_PREFIX: &str = "Bearer ";

/// Per-route authentication options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AuthOptions {
    /// Exact role the caller must hold. `None` admits any authenticated caller.
    pub required_role: Option<Role>,
    /// Allow the `x-dev-token` shortcut on this route.
    pub allow_dev_mode: bool,
}

impl AuthOptions {
    pub fn require_role(role: Role) -> Self {
        Self {
            required_role: Some(role),
            allow_dev_mode: false,
        }
    }

    pub fn with_dev_mode(mut self) -> Self {
        self.allow_dev_mode = true;
        self
    }
}

/// The token after `Bearer `, if the header has exactly that form.
///
/// The prefix is case-sensitive and the token must be non-empty.
pub fn extract_bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix(BEARER_PREFIX)
        .filter(|token| !token.is_empty())
}

/// Decide who the caller is, or why they are refused.
///
/// Logs every rejection as a security event.
pub async fn authenticate(
    security: &SecurityContext,
    options: AuthOptions,
    ctx: &RequestContext,
    headers: &HeaderMap,
) -> Result<Identity, AppError> {
    if options.allow_dev_mode && dev_token_matches(security, headers) {
        let identity = Identity::dev_administrator();
        log_security_event(
            SecurityEvent::DevModeAccess,
            ctx,
            Some(&identity.id),
            "dev-mode token accepted",
        );
        return authorize(identity, options, ctx);
    }

    let Some(token) = extract_bearer_token(headers) else {
        log_security_event(
            SecurityEvent::MissingToken,
            ctx,
            None,
            "missing or malformed Authorization header",
        );
        metrics::record_auth_rejection("missing_token");
        return Err(AppError::AuthenticationRequired);
    };

    let validation = security.validator.validate(token);
    let verdict = tokio::time::timeout(security.validation_timeout, validation)
        .await
        .map_err(|_| {
            AppError::AuthenticationFailed(format!(
                "token validation exceeded {}ms",
                security.validation_timeout.as_millis()
            ))
        })
        .and_then(|result| result.map_err(|e| AppError::AuthenticationFailed(e.to_string())));

    let identity = match verdict {
        Ok(Some(identity)) => identity,
        Ok(None) => {
            log_security_event(SecurityEvent::InvalidToken, ctx, None, "token rejected");
            metrics::record_auth_rejection("invalid_token");
            return Err(AppError::InvalidToken);
        }
        Err(e) => {
            log_security_event(
                SecurityEvent::AuthenticationError,
                ctx,
                None,
                "token validation could not be completed",
            );
            metrics::record_auth_rejection("validator_error");
            return Err(e);
        }
    };

    authorize(identity, options, ctx)
}

fn dev_token_matches(security: &SecurityContext, headers: &HeaderMap) -> bool {
    if !security.environment.is_development() {
        return false;
    }

    let (Some(expected), Some(provided)) = (
        security.dev_token.as_ref(),
        headers.get(DEV_TOKEN_HEADER),
    ) else {
        return false;
    };

    provided.as_bytes().ct_eq(expected.expose().as_bytes()).into()
}

fn authorize(
    identity: Identity,
    options: AuthOptions,
    ctx: &RequestContext,
) -> Result<Identity, AppError> {
    if let Some(required) = options.required_role
        && !identity.role.satisfies(required)
    {
        log_security_event(
            SecurityEvent::InsufficientPermissions,
            ctx,
            Some(&identity.id),
            &format!(
                "role {} does not satisfy required role {}",
                identity.role, required
            ),
        );
        metrics::record_auth_rejection("insufficient_permissions");
        return Err(AppError::InsufficientPermissions);
    }

    Ok(identity)
}

/// Authentication layer. Wrap a route (or a composed pipeline) to require
/// a valid caller.
#[derive(Clone)]
pub struct AuthLayer {
    security: Arc<SecurityContext>,
    options: AuthOptions,
}

impl AuthLayer {
    pub fn new(security: Arc<SecurityContext>, options: AuthOptions) -> Self {
        Self { security, options }
    }
}

impl<S> Layer<S> for AuthLayer {
    type Service = AuthService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AuthService {
            inner,
            security: self.security.clone(),
            options: self.options,
        }
    }
}

/// Authentication service wrapper.
#[derive(Clone)]
pub struct AuthService<S> {
    inner: S,
    security: Arc<SecurityContext>,
    options: AuthOptions,
}

impl<S> Service<Request<Body>> for AuthService<S>
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
        let options = self.options;
        let inner = self.inner.clone();

        Box::pin(async move {
            let environment = security.environment;

            let outcome = AssertUnwindSafe(authenticate_and_call(security, options, inner, req))
                .catch_unwind()
                .await;

            let mut response = match outcome {
                Ok(result) => result?,
                Err(panic) => {
                    error!(
                        panic = panic_message(panic.as_ref()),
                        "Panic during authenticated request"
                    );
                    AppError::AuthenticationFailed(
                        "panic during authenticated request".to_string(),
                    )
                    .into_response()
                }
            };

            apply_security_headers(response.headers_mut(), environment);
            Ok(response)
        })
    }
}

async fn authenticate_and_call<S>(
    security: Arc<SecurityContext>,
    options: AuthOptions,
    mut inner: S,
    mut req: Request<Body>,
) -> Result<Response<Body>, S::Error>
where
    S: Service<Request<Body>, Response = Response<Body>> + Send,
    S::Future: Send,
{
    let ctx = RequestContext::from_request(&req);

    match authenticate(&security, options, &ctx, req.headers()).await {
        Ok(identity) => {
            info!(
                user_id = %identity.id,
                role = %identity.role,
                endpoint = %ctx.endpoint,
                "Authenticated request"
            );
            req.extensions_mut().insert(identity);
            inner.call(req).await
        }
        Err(e) => Ok(e.into_response()),
    }
}
