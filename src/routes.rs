//! Application routing configuration with middleware stack.
//!
//! # Router-wide Layers (outermost first)
//!
//! ```text
//! Request
//!    │
//!    ▼
//! ┌──────────────────┐
//! │ Security Headers │ ← Hardening headers on every response
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │   Request ID     │ ← Adds X-Request-Id header
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │     Tracing      │ ← HTTP request/response logging
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │      CORS        │ ← Cross-origin headers
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │   Body Limit     │ ← Upper bound for every route
//! └────────┬─────────┘
//!          ▼
//!    Route layers
//! ```
//!
//! # Route Groups
//!
//! - `/health` - Public, no authentication or rate limiting
//! - `/api/me` - Authenticated, general API rate limit (keyed per user)
//! - `/api/dev/*` - Secure dev pipeline: admin only, dev-ops rate limit,
//!   body validation, disabled in production

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::handlers;
use crate::middleware::{
    AuthLayer, AuthOptions, RateLimitLayer, RequestIdLayer, SecureDevLayer, SecureDevOptions,
    SecurityHeadersLayer,
};
use crate::state::AppState;

/// Build the application router with all routes and middleware configured.
///
/// Route layers run after routing, so only matched routes pay for
/// authentication and rate limiting. On `/api/me` the auth layer wraps the
/// limiter: unauthenticated requests are refused before they count, and
/// authenticated ones are counted per user.
pub fn build_router(state: AppState) -> Router {
    let config = &state.config;
    let cors = build_cors_layer(&config.cors_allowed_origins);

    // =========================================================================
    // Authenticated API
    // =========================================================================
    let mut api = Router::new().route("/api/me", get(handlers::current_user));

    if config.rate_limiting_enabled() {
        info!(
            window_ms = config.rate_limit_window.as_millis() as u64,
            max_requests = config.rate_limit_max_requests,
            "General API rate limiting enabled"
        );
        api = api.route_layer(RateLimitLayer::new(state.api_limiter.clone()));
    } else {
        info!("General API rate limiting disabled (RATE_LIMIT_MAX_REQUESTS=0)");
    }

    let api = api.route_layer(AuthLayer::new(
        state.security.clone(),
        AuthOptions::default(),
    ));

    // =========================================================================
    // Dev Operations
    // =========================================================================
    info!(
        window_ms = config.dev_ops_rate_limit_window.as_millis() as u64,
        max_requests = config.dev_ops_rate_limit_max_requests,
        environment = %config.environment,
        "Dev operation routes mounted"
    );
    let dev = Router::new()
        .route("/api/dev/seed", post(handlers::seed_facility))
        .route("/api/dev/status", get(handlers::dev_status))
        .route_layer(SecureDevLayer::new(
            state.security.clone(),
            SecureDevOptions::new(state.dev_ops_limiter.clone()),
        ));

    // =========================================================================
    // Assemble and apply router-wide layers (applied bottom to top)
    // =========================================================================
    let mut router = Router::new()
        .route("/health", get(handlers::health_check))
        .merge(api)
        .merge(dev);

    info!(
        max_size_bytes = config.max_request_body_size,
        "Request body size limit configured"
    );
    router = router.layer(DefaultBodyLimit::max(config.max_request_body_size));
    router = router.layer(cors);
    router = router.layer(TraceLayer::new_for_http());
    router = router.layer(RequestIdLayer::new());
    router = router.layer(SecurityHeadersLayer::new(config.environment));

    router.with_state(state)
}

/// Build CORS layer from configuration.
///
/// `["*"]` allows any origin. Convenient for development; production should
/// list explicit origins.
fn build_cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let allow_any = allowed_origins.iter().any(|o| o == "*");

    if allow_any {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<_> = allowed_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();

        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    }
}
