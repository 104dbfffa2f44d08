use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use medops_gateway::auth::JwtTokenValidator;
use medops_gateway::config::LogFormat;
use medops_gateway::{AppState, Config, build_router, metrics, utils, validate_environment_safety};

#[tokio::main]
async fn main() -> ExitCode {
    // Configuration is loaded before logging so LOG_FORMAT can take effect;
    // a load failure is reported once the subscriber is up.
    let config = Config::from_env();
    match &config {
        Ok(config) => init_tracing(config.log_format, &config.log_level),
        Err(_) => init_tracing(LogFormat::default(), "info"),
    }

    info!(
        "Starting MedOps Gateway v{}",
        env!("CARGO_PKG_VERSION")
    );

    let config = match config {
        Ok(config) => config,
        Err(e) => {
            error!("Configuration error: {e}");
            return ExitCode::from(exitcode::CONFIG as u8);
        }
    };

    match run(config).await {
        Ok(()) => ExitCode::from(exitcode::OK as u8),
        Err(exit_code) => ExitCode::from(exit_code as u8),
    }
}

fn init_tracing(format: LogFormat, level: &str) {
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));

    match format {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .with_current_span(true)
            .init(),
        LogFormat::Text => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_thread_ids(true)
            .init(),
    }
}

/// Run the application, returning an exit code on error.
async fn run(config: Config) -> Result<(), exitcode::ExitCode> {
    info!(
        host = %config.host,
        port = %config.port,
        environment = %config.environment,
        dev_token_configured = config.dev_token.is_some(),
        service_credential_configured = config.service_credential.is_some(),
        "Configuration loaded"
    );

    match validate_environment_safety(&config) {
        Ok(()) => info!("Dev operations are available in this environment"),
        Err(reason) => warn!(%reason, "Dev operations will be refused"),
    }

    if let Some(metrics_addr) = config.metrics_addr() {
        metrics::try_init_metrics(metrics_addr);
    }

    let secret = config.jwt_secret.clone().ok_or_else(|| {
        error!("SUPABASE_JWT_SECRET must be set to verify bearer tokens");
        exitcode::CONFIG
    })?;
    let validator = Arc::new(JwtTokenValidator::new(
        &secret,
        config.jwt_audience.as_deref(),
    ));

    // Build application state and router
    let state = AppState::new(config.clone(), validator);
    let app = build_router(state.clone());

    // Start server
    let addr: SocketAddr = config.server_addr().parse().map_err(|e| {
        error!("Invalid server address: {e}");
        exitcode::CONFIG
    })?;
    let listener = TcpListener::bind(addr).await.map_err(|e| {
        error!("Failed to bind to {addr}: {e}");
        exitcode::UNAVAILABLE
    })?;

    info!("Server listening on http://{addr}");
    info!("API endpoints:");
    info!("  GET  /health           - Health check");
    info!("  GET  /api/me           - Current user");
    info!("  POST /api/dev/seed     - Seed facility data (admin, non-production)");
    info!("  GET  /api/dev/status   - Dev operation availability");

    axum::serve(listener, app)
        .with_graceful_shutdown(utils::shutdown_signal())
        .await
        .map_err(|e| {
            error!("Server error: {e}");
            exitcode::SOFTWARE
        })?;

    info!("HTTP server stopped, shutting down background tasks...");
    state.shutdown().await;

    info!("Server shutdown complete");
    Ok(())
}
