//! HTTP middleware for request security, rate limiting, and observability.
//!
//! - **Authentication**: bearer token validation with an optional
//!   development-only dev token, plus role checks
//! - **Rate Limiting**: fixed-window counters over a pluggable store
//! - **Request Guard**: structural checks on method and headers
//! - **Secure Dev**: the full pipeline for privileged dev operations
//! - **Security Headers**: hardening headers on every response
//! - **Request ID**: generation and propagation for tracing
//!
//! # Secure Dev Pipeline
//!
//! ```text
//! Request → Auth → Guard → Rate Limit → Body → Role → Env → Handler
//!            ↓       ↓         ↓          ↓      ↓      ↓
//!          401     400       429     400/413   403    403
//! ```
//!
//! Every response leaving [`AuthLayer`] or [`SecureDevLayer`] carries the
//! security headers, whether it came from the handler or from a rejection.

pub mod auth;
pub mod context;
pub mod ip;
pub mod rate_limit;
pub mod request_guard;
pub mod request_id;
pub mod secure_dev;
pub mod security_headers;

pub use auth::{AuthLayer, AuthOptions, DEV_TOKEN_HEADER, authenticate, extract_bearer_token};
pub use context::RequestContext;
pub use ip::{UNKNOWN_IP, client_ip, client_ip_or_unknown};
pub use rate_limit::{KeyStrategy, RateLimitConfig, RateLimitLayer, RateLimiter};
pub use request_guard::{RequestPolicy, StructuralViolation};
pub use request_id::RequestIdLayer;
pub use secure_dev::{SanitizedBody, SanitizedJson, SecureDevLayer, SecureDevOptions};
pub use security_headers::SecurityHeadersLayer;
