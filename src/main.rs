use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use kb_gate::config::LogFormat;
use kb_gate::store::CounterStore;
use kb_gate::{AppState, Config, RedisCounterStore, build_router, metrics};

#[tokio::main]
async fn main() -> ExitCode {
    // Configuration is loaded first so the log format can follow LOG_FORMAT;
    // a load failure is reported once logging is up.
    let config = Config::from_env();
    init_tracing(config.as_ref().map_or(LogFormat::Pretty, |c| c.log_format));

    info!(
        "Starting {} v{}",
        env!("CARGO_PKG_NAME"),
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

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true);

    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.init(),
    }
}

/// Run the application, returning an exit code on error.
async fn run(config: Config) -> Result<(), exitcode::ExitCode> {
    info!(
        host = %config.host,
        port = %config.port,
        environment = %config.app_env,
        sustained = config.rate_limit_requests,
        sustained_period_secs = config.rate_limit_period_secs,
        burst = config.rate_limit_burst,
        burst_period_secs = config.rate_limit_burst_period_secs,
        strict_validation = config.validation_strict_mode,
        "Configuration loaded"
    );

    if let Some(addr) = config.metrics_addr() {
        metrics::try_init_metrics(addr);
    }

    // A malformed URL is a configuration error. An unreachable server is not:
    // the limiter serves from memory until it comes back.
    let shared: Option<Arc<dyn CounterStore>> = if config.use_redis {
        let store = RedisCounterStore::open(
            &config.redis_url,
            config.rate_limit_key_prefix.clone(),
            config.store_timeout,
        )
        .await
        .map_err(|e| {
            error!("Invalid counter store configuration: {e}");
            exitcode::CONFIG
        })?;
        metrics::set_store_available(store.is_available());
        Some(Arc::new(store))
    } else {
        info!("Shared counter store disabled, using in-memory windows");
        None
    };

    let state = AppState::new(config.clone(), shared);
    let app = build_router(state.clone());

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
    info!("  GET  /                               - Service info");
    info!("  GET  /health                         - Health check");
    info!("  GET  /ready                          - Readiness check");
    info!("  POST /api/v1/knowledge               - Create knowledge item");
    info!("  GET  /api/v1/knowledge/{{item_id}}     - Get knowledge item");
    info!("  GET  /api/v1/categories/{{slug}}       - Get category");

    // Peer addresses feed the identity fallback when no proxy header is set
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
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

/// Wait for Ctrl+C or SIGTERM.
///
/// A handler that cannot be installed is logged and never fires; the other
/// one still can.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            warn!("Received Ctrl+C, initiating graceful shutdown...");
        }
        _ = terminate => {
            warn!("Received SIGTERM, initiating graceful shutdown...");
        }
    }
}
