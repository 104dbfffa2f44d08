//! # MedOps Gateway
//!
//! The request security pipeline for the MedOps healthcare operations API,
//! built on Axum:
//!
//! - **Authentication**: bearer tokens checked by a pluggable
//!   [`TokenValidator`], plus a development-only dev token
//! - **Authorization**: role checks against the caller's [`Role`]
//! - **Rate Limiting**: fixed-window counters keyed per client IP or user
//! - **Input Validation**: structural request checks and per-route JSON
//!   schemas that return a sanitized body
//! - **Hardening**: security headers on every response, structured audit
//!   and security event logs
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Axum HTTP Server                       │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Router layers (Security Headers → Request ID → Trace)      │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Route layers (AuthLayer, RateLimitLayer, SecureDevLayer)   │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Handlers (health, profile, dev operations)                 │
//! ├─────────────────────────────────────────────────────────────┤
//! │  TokenValidator (Supabase JWT) · RateLimitStore (memory)    │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use medops_gateway::auth::JwtTokenValidator;
//! use medops_gateway::{AppState, Config, build_router};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     let secret = config.jwt_secret.clone().ok_or_else(|| anyhow::anyhow!("no secret"))?;
//!     let validator = Arc::new(JwtTokenValidator::new(&secret, None));
//!
//!     let state = AppState::new(config, validator);
//!     let app = build_router(state);
//!
//!     // Start the server...
//!     Ok(())
//! }
//! ```
//!
//! ## Protecting Your Own Routes
//!
//! ```rust,ignore
//! Router::new()
//!     .route("/api/reports", get(reports))
//!     .route_layer(AuthLayer::new(security, AuthOptions::require_role(Role::Staff)));
//! ```

pub mod audit;
pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod models;
pub mod rate_limit_store;
pub mod routes;
pub mod safety;
pub mod state;
pub mod utils;
pub mod validation;

// Re-exports for convenience
pub use auth::{Identity, Role, TokenValidator, TokenValidatorError};
pub use config::{Config, Environment};
pub use error::{AppError, AppResult};
pub use routes::build_router;
pub use safety::validate_environment_safety;
pub use state::{AppState, SecurityContext};
