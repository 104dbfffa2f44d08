//! Application configuration loaded from environment variables.
//!
//! # Configuration Hierarchy
//!
//! All configuration is loaded from environment variables with sensible defaults
//! for development. In production, configure via environment variables or a `.env` file.
//!
//! # Security Configuration
//!
//! - `APP_ENV`: `development` (default), `staging` or `production`
//! - `DEV_MODE_TOKEN`: Token accepted in `x-dev-token` on dev-mode routes (development only)
//! - `SUPABASE_SERVICE_ROLE_KEY`: Service credential; only its presence is checked
//! - `SUPABASE_JWT_SECRET`: HS256 secret used to verify bearer tokens
//! - `TRUSTED_PROXY_HEADERS`: Deny-listed proxy headers to accept anyway
//!
//! # Rate Limiting
//!
//! - `RATE_LIMIT_WINDOW_MS` / `RATE_LIMIT_MAX_REQUESTS`: General API window (default: 60s / 100)
//! - `DEV_OPS_RATE_LIMIT_WINDOW_MS` / `DEV_OPS_RATE_LIMIT_MAX_REQUESTS`: Dev operations
//!   (default: 15min / 5)
//! - `RATE_LIMIT_SWEEP_INTERVAL_SECS`: Expired entry sweep interval (default: 300)

use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;
use tracing_subscriber::EnvFilter;

use crate::error::{AppError, AppResult};
use crate::middleware::request_guard::SUSPICIOUS_HEADERS;

/// Longest accepted rate limit window (7 days).
pub const MAX_RATE_LIMIT_WINDOW: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Runtime environment the process is deployed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Environment {
    #[default]
    Development,
    Staging,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Development => "development",
            Environment::Staging => "staging",
            Environment::Production => "production",
        }
    }

    pub fn is_development(&self) -> bool {
        matches!(self, Environment::Development)
    }

    pub fn is_staging(&self) -> bool {
        matches!(self, Environment::Staging)
    }

    pub fn is_production(&self) -> bool {
        matches!(self, Environment::Production)
    }
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" | "local" => Ok(Environment::Development),
            "staging" | "stage" => Ok(Environment::Staging),
            "production" | "prod" => Ok(Environment::Production),
            other => Err(format!(
                "unknown environment '{other}' (expected development, staging or production)"
            )),
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A configuration value that must never appear in logs.
///
/// `Debug` and `Display` both print a placeholder; call [`SecretString::expose`]
/// at the single place the raw value is needed.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretString(String);

impl SecretString {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretString([REDACTED])")
    }
}

impl fmt::Display for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

/// Output format for the tracing subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Application configuration loaded from environment variables.
///
/// # Example
///
/// ```rust,ignore
/// let config = Config::from_env()?;
/// println!("Server will listen on {}", config.server_addr());
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    // =========================================================================
    // Server Configuration
    // =========================================================================
    /// Server host address (default: "0.0.0.0")
    pub host: String,

    /// Server port (default: 3000)
    pub port: u16,

    /// Deployment environment (default: development)
    pub environment: Environment,

    // =========================================================================
    // Authentication Configuration
    // =========================================================================
    /// Token accepted via `x-dev-token` when dev mode is allowed and the
    /// environment is development
    pub dev_token: Option<SecretString>,

    /// Service credential for privileged backend calls. Existence-checked only.
    pub service_credential: Option<SecretString>,

    /// Secret used to verify HS256 bearer tokens
    pub jwt_secret: Option<SecretString>,

    /// Expected `aud` claim; audience is not checked when unset
    pub jwt_audience: Option<String>,

    /// Deadline for a single token validation call (default: 5 seconds)
    pub token_validation_timeout: Duration,

    // =========================================================================
    // Rate Limiting Configuration
    // =========================================================================
    /// Window length for the general API limiter (default: 60 seconds)
    pub rate_limit_window: Duration,

    /// Requests admitted per window by the general API limiter (default: 100)
    /// Set to 0 to disable general rate limiting
    pub rate_limit_max_requests: u32,

    /// Window length for dev operations (default: 15 minutes)
    pub dev_ops_rate_limit_window: Duration,

    /// Requests admitted per window for dev operations (default: 5)
    pub dev_ops_rate_limit_max_requests: u32,

    /// How often expired rate limit entries are swept (default: 5 minutes)
    pub rate_limit_sweep_interval: Duration,

    // =========================================================================
    // Request Limits
    // =========================================================================
    /// Maximum request body size in bytes (default: 1MB)
    pub max_request_body_size: usize,

    /// Proxy headers exempted from the suspicious-header deny-list.
    ///
    /// Only set this when a known reverse proxy legitimately sends one of
    /// `x-forwarded-host`, `x-originating-ip`, `x-remote-ip`, `x-remote-addr`.
    pub trusted_proxy_headers: Vec<String>,

    /// Comma-separated list of allowed CORS origins
    /// Use "*" to allow all origins (not recommended for production)
    pub cors_allowed_origins: Vec<String>,

    // =========================================================================
    // Observability Configuration
    // =========================================================================
    /// Tracing filter directive from `RUST_LOG` (default: "info")
    pub log_level: String,

    /// Log output format (default: text)
    pub log_format: LogFormat,

    /// Port for Prometheus metrics endpoint (default: 9090, 0 = disabled)
    pub metrics_port: u16,
}

impl Config {
    /// Load configuration from environment variables with sensible defaults.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ConfigError` if any configuration value is invalid
    /// (e.g., non-numeric PORT value, unknown APP_ENV).
    pub fn from_env() -> AppResult<Self> {
        // Load an .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let config = Self {
            // Server
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: Self::parse_env("PORT", 3000)?,
            environment: Self::parse_env("APP_ENV", Environment::Development)?,

            // Authentication
            dev_token: Self::secret_env("DEV_MODE_TOKEN"),
            service_credential: Self::secret_env("SUPABASE_SERVICE_ROLE_KEY"),
            jwt_secret: Self::secret_env("SUPABASE_JWT_SECRET"),
            jwt_audience: env::var("SUPABASE_JWT_AUDIENCE")
                .ok()
                .filter(|a| !a.is_empty()),
            token_validation_timeout: Duration::from_millis(Self::parse_env(
                "TOKEN_VALIDATION_TIMEOUT_MS",
                5000,
            )?),

            // Rate limiting
            rate_limit_window: Duration::from_millis(Self::parse_env(
                "RATE_LIMIT_WINDOW_MS",
                60_000,
            )?),
            rate_limit_max_requests: Self::parse_env("RATE_LIMIT_MAX_REQUESTS", 100)?,
            dev_ops_rate_limit_window: Duration::from_millis(Self::parse_env(
                "DEV_OPS_RATE_LIMIT_WINDOW_MS",
                15 * 60 * 1000,
            )?),
            dev_ops_rate_limit_max_requests: Self::parse_env("DEV_OPS_RATE_LIMIT_MAX_REQUESTS", 5)?,
            rate_limit_sweep_interval: Duration::from_secs(Self::parse_env(
                "RATE_LIMIT_SWEEP_INTERVAL_SECS",
                300,
            )?),

            // Request limits
            max_request_body_size: Self::parse_env("MAX_REQUEST_BODY_SIZE", 1024 * 1024)?,
            trusted_proxy_headers: Self::parse_list("TRUSTED_PROXY_HEADERS", "")
                .into_iter()
                .map(|h| h.to_ascii_lowercase())
                .collect(),
            cors_allowed_origins: Self::parse_list("CORS_ALLOWED_ORIGINS", "*"),

            // Observability
            log_level: env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            log_format: match env::var("LOG_FORMAT").as_deref() {
                Ok("json") => LogFormat::Json,
                _ => LogFormat::Text,
            },
            metrics_port: Self::parse_env("METRICS_PORT", 9090)?,
        };

        // Validate configuration before returning
        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values for consistency and correctness.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ConfigError` if validation fails.
    pub fn validate(&self) -> AppResult<()> {
        if self.rate_limit_window.is_zero() {
            return Err(AppError::ConfigError(
                "RATE_LIMIT_WINDOW_MS must be greater than 0".to_string(),
            ));
        }

        if self.dev_ops_rate_limit_window.is_zero() {
            return Err(AppError::ConfigError(
                "DEV_OPS_RATE_LIMIT_WINDOW_MS must be greater than 0".to_string(),
            ));
        }

        for (name, window) in [
            ("RATE_LIMIT_WINDOW_MS", self.rate_limit_window),
            ("DEV_OPS_RATE_LIMIT_WINDOW_MS", self.dev_ops_rate_limit_window),
        ] {
            if window > MAX_RATE_LIMIT_WINDOW {
                return Err(AppError::ConfigError(format!(
                    "{name} must not exceed {}ms",
                    MAX_RATE_LIMIT_WINDOW.as_millis()
                )));
            }
        }

        if self.dev_ops_rate_limit_max_requests == 0 {
            return Err(AppError::ConfigError(
                "DEV_OPS_RATE_LIMIT_MAX_REQUESTS must be greater than 0".to_string(),
            ));
        }

        if self.rate_limit_sweep_interval.is_zero() {
            return Err(AppError::ConfigError(
                "RATE_LIMIT_SWEEP_INTERVAL_SECS must be greater than 0".to_string(),
            ));
        }

        if self.token_validation_timeout.is_zero() {
            return Err(AppError::ConfigError(
                "TOKEN_VALIDATION_TIMEOUT_MS must be greater than 0".to_string(),
            ));
        }

        if self.max_request_body_size == 0 {
            return Err(AppError::ConfigError(
                "MAX_REQUEST_BODY_SIZE must be greater than 0".to_string(),
            ));
        }

        if let Some(unknown) = self
            .trusted_proxy_headers
            .iter()
            .find(|h| !SUSPICIOUS_HEADERS.contains(&h.as_str()))
        {
            return Err(AppError::ConfigError(format!(
                "TRUSTED_PROXY_HEADERS entry '{unknown}' is not a deny-listed header"
            )));
        }

        if let Err(e) = EnvFilter::try_new(&self.log_level) {
            return Err(AppError::ConfigError(format!(
                "RUST_LOG '{}' is not a valid filter: {e}",
                self.log_level
            )));
        }

        if self.environment.is_production() && self.dev_token.is_some() {
            warn!("DEV_MODE_TOKEN is set in production; it will never be accepted");
        }

        Ok(())
    }

    /// Get the full server address for binding.
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Check if the general API rate limiter is enabled.
    pub fn rate_limiting_enabled(&self) -> bool {
        self.rate_limit_max_requests > 0
    }

    /// Check if Prometheus metrics export is enabled.
    pub fn metrics_enabled(&self) -> bool {
        self.metrics_port > 0
    }

    /// Get the metrics endpoint address.
    ///
    /// Returns `None` if metrics are disabled (port = 0).
    pub fn metrics_addr(&self) -> Option<std::net::SocketAddr> {
        if self.metrics_enabled() {
            Some(std::net::SocketAddr::from((
                [0, 0, 0, 0],
                self.metrics_port,
            )))
        } else {
            None
        }
    }

    /// Parse an environment variable into the specified type with a default value.
    fn parse_env<T>(name: &str, default: T) -> AppResult<T>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        match env::var(name) {
            Ok(val) => val
                .parse()
                .map_err(|e| AppError::ConfigError(format!("Invalid {name}: {e}"))),
            Err(_) => Ok(default),
        }
    }

    /// Read a secret, treating an empty value as unset.
    fn secret_env(name: &str) -> Option<SecretString> {
        env::var(name)
            .ok()
            .filter(|v| !v.is_empty())
            .map(SecretString::new)
    }

    /// Parse a comma-separated list, dropping empty entries.
    fn parse_list(name: &str, default: &str) -> Vec<String> {
        env::var(name)
            .unwrap_or_else(|_| default.to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }
}

/// Default configuration for testing and development.
///
/// Production deployments should use `Config::from_env()` instead.
impl Default for Config {
    fn default() -> Self {
        Self {
            // Server
            host: "0.0.0.0".to_string(),
            port: 3000,
            environment: Environment::Development,
            // Authentication
            dev_token: None,
            service_credential: None,
            jwt_secret: None,
            jwt_audience: None,
            token_validation_timeout: Duration::from_secs(5),
            // Rate limiting
            rate_limit_window: Duration::from_secs(60),
            rate_limit_max_requests: 100,
            dev_ops_rate_limit_window: Duration::from_secs(15 * 60),
            dev_ops_rate_limit_max_requests: 5,
            rate_limit_sweep_interval: Duration::from_secs(300),
            // Request limits
            max_request_body_size: 1024 * 1024,
            trusted_proxy_headers: vec![],
            cors_allowed_origins: vec!["*".to_string()],
            // Observability
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            metrics_port: 9090,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_values() {
        let config = Config::default();

        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 3000);
        assert_eq!(config.environment, Environment::Development);
        assert_eq!(config.dev_ops_rate_limit_window, Duration::from_secs(900));
        assert_eq!(config.dev_ops_rate_limit_max_requests, 5);
        assert_eq!(config.rate_limit_sweep_interval, Duration::from_secs(300));
        assert!(config.dev_token.is_none());
    }

    #[test]
    fn test_server_addr_format() {
        let config = Config {
            host: "localhost".to_string(),
            port: 3000,
            ..Config::default()
        };

        assert_eq!(config.server_addr(), "localhost:3000");
    }

    #[test]
    fn test_environment_parsing() {
        assert_eq!(
            "production".parse::<Environment>().unwrap(),
            Environment::Production
        );
        assert_eq!("PROD".parse::<Environment>().unwrap(), Environment::Production);
        assert_eq!("staging".parse::<Environment>().unwrap(), Environment::Staging);
        assert_eq!(
            " development ".parse::<Environment>().unwrap(),
            Environment::Development
        );
        assert!("qa".parse::<Environment>().is_err());
    }

    #[test]
    fn test_secret_string_is_redacted() {
        let secret = SecretString::new("super-secret-token");

        assert_eq!(format!("{secret:?}"), "SecretString([REDACTED])");
        assert_eq!(secret.to_string(), "[REDACTED]");
        assert_eq!(secret.expose(), "super-secret-token");
    }

    #[test]
    fn test_config_debug_does_not_leak_secrets() {
        let config = Config {
            dev_token: Some(SecretString::new("dev-token-value")),
            jwt_secret: Some(SecretString::new("jwt-secret-value")),
            ..Config::default()
        };

        let rendered = format!("{config:?}");
        assert!(!rendered.contains("dev-token-value"));
        assert!(!rendered.contains("jwt-secret-value"));
    }

    #[test]
    fn test_rate_limiting_enabled() {
        let config = Config::default();
        assert!(config.rate_limiting_enabled());

        let config = Config {
            rate_limit_max_requests: 0,
            ..Config::default()
        };
        assert!(!config.rate_limiting_enabled());
    }

    #[test]
    fn test_validate_zero_dev_ops_limit() {
        let config = Config {
            dev_ops_rate_limit_max_requests: 0,
            ..Config::default()
        };

        let result = config.validate();
        assert!(result.is_err());
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("DEV_OPS_RATE_LIMIT_MAX_REQUESTS")
        );
    }

    #[test]
    fn test_validate_rejects_oversized_windows() {
        let general = Config {
            rate_limit_window: Duration::from_millis(u64::MAX),
            ..Config::default()
        };
        let err = general.validate().unwrap_err().to_string();
        assert!(err.contains("RATE_LIMIT_WINDOW_MS must not exceed"), "{err}");

        let dev_ops = Config {
            dev_ops_rate_limit_window: MAX_RATE_LIMIT_WINDOW + Duration::from_millis(1),
            ..Config::default()
        };
        let err = dev_ops.validate().unwrap_err().to_string();
        assert!(err.contains("DEV_OPS_RATE_LIMIT_WINDOW_MS"), "{err}");

        let at_bound = Config {
            rate_limit_window: MAX_RATE_LIMIT_WINDOW,
            dev_ops_rate_limit_window: MAX_RATE_LIMIT_WINDOW,
            ..Config::default()
        };
        assert!(at_bound.validate().is_ok());
    }

    #[test]
    fn test_validate_log_level_directive() {
        let valid = Config {
            log_level: "info,medops_gateway=debug".to_string(),
            ..Config::default()
        };
        assert!(valid.validate().is_ok());

        let invalid = Config {
            log_level: "medops_gateway=loud".to_string(),
            ..Config::default()
        };
        let err = invalid.validate().unwrap_err().to_string();
        assert!(err.contains("RUST_LOG"), "{err}");
    }

    #[test]
    fn test_validate_unknown_trusted_proxy_header() {
        let config = Config {
            trusted_proxy_headers: vec!["x-forwarded-for".to_string()],
            ..Config::default()
        };

        let result = config.validate();
        assert!(result.is_err());
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("TRUSTED_PROXY_HEADERS")
        );
    }

    #[test]
    fn test_validate_known_trusted_proxy_header() {
        let config = Config {
            trusted_proxy_headers: vec!["x-forwarded-host".to_string()],
            ..Config::default()
        };

        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_valid_config() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }
}
