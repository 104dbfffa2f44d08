//! Shared application state for Axum handlers and middleware.
//!
//! - **Security context**: everything the authentication and secure-dev
//!   layers need per request, built once from [`Config`]
//! - **Rate limiters**: the general API limiter and the stricter dev-ops
//!   limiter, each with its own counter store
//! - **Configuration**: runtime configuration access
//!
//! # Structured Concurrency
//!
//! The expired-entry sweep runs as a background task managed by
//! `tokio_util::task::TaskTracker` and a `CancellationToken`. Call
//! `shutdown()` to stop it before application exit.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info};

use crate::auth::TokenValidator;
use crate::config::{Config, Environment, SecretString};
use crate::middleware::rate_limit::{KeyStrategy, RateLimitConfig, RateLimiter};
use crate::middleware::request_guard::RequestPolicy;

/// Per-process facts the authentication and secure-dev layers consult on
/// every request.
pub struct SecurityContext {
    pub environment: Environment,
    /// Dev-mode bypass token. `None` makes the dev-mode path unreachable.
    pub dev_token: Option<SecretString>,
    pub validator: Arc<dyn TokenValidator>,
    /// Deadline for one call to `validator`.
    pub validation_timeout: Duration,
    pub request_policy: RequestPolicy,
    pub max_body_size: usize,
}

impl fmt::Debug for SecurityContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecurityContext")
            .field("environment", &self.environment)
            .field("dev_token", &self.dev_token)
            .field("validation_timeout", &self.validation_timeout)
            .field("request_policy", &self.request_policy)
            .field("max_body_size", &self.max_body_size)
            .finish_non_exhaustive()
    }
}

impl SecurityContext {
    /// Context with default limits for the given environment.
    pub fn new(environment: Environment, validator: Arc<dyn TokenValidator>) -> Self {
        let config = Config {
            environment,
            ..Config::default()
        };
        Self::from_config(&config, validator)
    }

    pub fn from_config(config: &Config, validator: Arc<dyn TokenValidator>) -> Self {
        Self {
            environment: config.environment,
            dev_token: config.dev_token.clone(),
            validator,
            validation_timeout: config.token_validation_timeout,
            request_policy: RequestPolicy::with_trusted_proxy_headers(
                &config.trusted_proxy_headers,
            ),
            max_body_size: config.max_request_body_size,
        }
    }

    pub fn with_dev_token(mut self, token: SecretString) -> Self {
        self.dev_token = Some(token);
        self
    }

    pub fn with_validation_timeout(mut self, timeout: Duration) -> Self {
        self.validation_timeout = timeout;
        self
    }
}

/// Shared application state for Axum handlers.
///
/// Cloned for each request handler; all internal data is behind `Arc`.
///
/// # Lifecycle
///
/// The sweep task is spawned when the state is created, so construction
/// must happen inside a Tokio runtime:
///
/// ```rust,ignore
/// let state = AppState::new(config, validator);
/// // ... serve ...
/// state.shutdown().await;
/// ```
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: Arc<Config>,
    pub security: Arc<SecurityContext>,
    /// Limiter for ordinary authenticated API routes
    pub api_limiter: Arc<RateLimiter>,
    /// Limiter for the secure-dev pipeline
    pub dev_ops_limiter: Arc<RateLimiter>,
    /// Timestamp when the application started
    pub started_at: Instant,
    /// Tracks spawned background tasks for graceful shutdown
    task_tracker: TaskTracker,
    /// Cancellation token for signaling background tasks to stop
    cancellation_token: CancellationToken,
}

impl AppState {
    /// Build state from configuration and a token validator, and spawn the
    /// rate limit sweep task.
    pub fn new(config: Config, validator: Arc<dyn TokenValidator>) -> Self {
        let security = Arc::new(SecurityContext::from_config(&config, validator));

        let api_limiter = Arc::new(RateLimiter::new(
            "api",
            RateLimitConfig::new(config.rate_limit_window, config.rate_limit_max_requests)
                .with_key(KeyStrategy::IdentityOrIp),
        ));
        let dev_ops_limiter = Arc::new(RateLimiter::new(
            "dev_ops",
            RateLimitConfig::new(
                config.dev_ops_rate_limit_window,
                config.dev_ops_rate_limit_max_requests,
            )
            .with_key(KeyStrategy::IdentityOrIp),
        ));

        let state = Self {
            config: Arc::new(config),
            security,
            api_limiter,
            dev_ops_limiter,
            started_at: Instant::now(),
            task_tracker: TaskTracker::new(),
            cancellation_token: CancellationToken::new(),
        };

        state.spawn_rate_limit_sweep_task();

        state
    }

    /// Spawn the periodic sweep of expired rate limit entries.
    ///
    /// Expiry is also enforced lazily on every hit; the sweep only keeps the
    /// key space from growing without bound.
    fn spawn_rate_limit_sweep_task(&self) {
        let limiters = [self.api_limiter.clone(), self.dev_ops_limiter.clone()];
        let period = self.config.rate_limit_sweep_interval;
        let cancel = self.cancellation_token.clone();

        self.task_tracker.spawn(async move {
            let mut ticker = interval(period);
            ticker.tick().await; // Skip the first immediate tick

            loop {
                tokio::select! {
                    biased;

                    _ = cancel.cancelled() => {
                        debug!("Rate limit sweep task received cancellation signal");
                        break;
                    }
                    _ = ticker.tick() => {
                        let now_ms = Utc::now().timestamp_millis();
                        for limiter in &limiters {
                            limiter.sweep_expired(now_ms);
                        }
                    }
                }
            }

            debug!("Rate limit sweep task shutting down");
        });
    }

    /// Gracefully shutdown all background tasks.
    pub async fn shutdown(&self) {
        info!("Initiating graceful shutdown of background tasks");

        self.cancellation_token.cancel();
        self.task_tracker.close();
        self.task_tracker.wait().await;

        info!("All background tasks have completed");
    }

    /// Get the application uptime in seconds.
    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::auth::{Identity, TokenValidatorError};
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;

    struct RejectAll;

    #[async_trait]
    impl TokenValidator for RejectAll {
        async fn validate(&self, _token: &str) -> Result<Option<Identity>, TokenValidatorError> {
            Ok(None)
        }
    }

    fn request() -> Request<Body> {
        Request::builder()
            .header("x-forwarded-for", "10.1.1.1")
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn test_limiters_follow_config() {
        let config = Config {
            dev_ops_rate_limit_max_requests: 2,
            ..Config::default()
        };
        let state = AppState::new(config, Arc::new(RejectAll));

        assert_eq!(state.dev_ops_limiter.name(), "dev_ops");
        assert_eq!(state.dev_ops_limiter.config().max_requests, 2);
        assert_eq!(state.api_limiter.config().max_requests, 100);

        state.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_task_removes_expired_entries() {
        let config = Config {
            rate_limit_window: Duration::from_millis(10),
            rate_limit_sweep_interval: Duration::from_secs(1),
            ..Config::default()
        };
        let state = AppState::new(config, Arc::new(RejectAll));

        // Window already over by the time the sweep runs.
        let past = Utc::now().timestamp_millis() - 60_000;
        state.api_limiter.check_at(&request(), past);
        assert_eq!(state.api_limiter.store().len(), 1);

        tokio::time::sleep(Duration::from_millis(1_100)).await;
        tokio::task::yield_now().await;

        assert!(state.api_limiter.store().is_empty());
        state.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_completes() {
        let state = AppState::new(Config::default(), Arc::new(RejectAll));
        tokio::time::timeout(Duration::from_secs(1), state.shutdown())
            .await
            .unwrap();
    }

    #[test]
    fn test_security_context_debug_redacts_dev_token() {
        let ctx = SecurityContext::new(Environment::Development, Arc::new(RejectAll))
            .with_dev_token(SecretString::new("super-secret-dev-token"));

        let debug = format!("{ctx:?}");
        assert!(!debug.contains("super-secret-dev-token"));
    }
}
