//! # STT Bridge Backend - Main Application Entry Point
//!
//! An Actix-web server that sits between browser clients and a third-party
//! realtime speech-to-text service. Each `/ws` connection becomes one bridge
//! session: client audio goes up, transcripts come back down, and the vendor
//! credential never leaves the server.
//!
//! ## Application Architecture:
//! - **config**: Layered configuration (defaults, `config.toml`, environment)
//! - **state**: Shared metrics and configuration for handlers and sessions
//! - **bridge**: Protocol translation, session state machine, upstream socket task
//! - **websocket**: The per-connection session actor and the `/ws` upgrade handler
//! - **health**: Health and metrics endpoints
//! - **middleware**: Request logging and per-endpoint metrics
//! - **handlers**: Read-only configuration endpoint
//! - **error**: HTTP error responses and upstream connection errors

mod bridge;
mod config;
mod error;
mod handlers;
mod health;
mod middleware;
mod state;
mod websocket;

use actix_cors::Cors;
use actix_web::{middleware::Logger, web, App, HttpServer};
use anyhow::Result;
use config::AppConfig;
use state::AppState;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// How long in-flight connections (including open bridge sessions) get to
/// finish after a shutdown signal before the workers are stopped.
const SHUTDOWN_TIMEOUT_SECS: u64 = 10;

/// ## Startup order:
/// 1. `.env` is loaded so both `APP_*` settings and the vendor credential can
///    live there during development
/// 2. Tracing is initialized before anything can log
/// 3. Configuration is loaded and validated; a bad config aborts startup
/// 4. The server runs until it fails or a SIGINT/SIGTERM arrives
///
/// A missing credential is *not* a startup error. Sessions will be refused
/// individually and `/health` reports the service as degraded.
#[actix_web::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    init_tracing()?;

    let config = AppConfig::load()?;
    config.validate()?;

    info!("Starting stt-bridge-backend v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "Configuration loaded: {}:{} -> {} ({})",
        config.server.host, config.server.port, config.upstream.url, config.upstream.model_id
    );

    if !config::credential_configured() {
        warn!(
            "{} is not set; bridge sessions will be refused until it is",
            config::CREDENTIAL_ENV
        );
    }

    let app_state = AppState::new(config.clone());
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);

    info!("Starting HTTP server on {}", bind_addr);

    let server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(web::Data::new(app_state.clone()))
            // Registered last, runs first on the way in.
            .wrap(cors)
            .wrap(Logger::default())
            .wrap(middleware::MetricsMiddleware)
            .wrap(middleware::RequestLogging)
            .configure(routes)
    })
    .shutdown_timeout(SHUTDOWN_TIMEOUT_SECS)
    .disable_signals()
    .bind(&bind_addr)?
    .run();

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    tokio::select! {
        result = server_task => {
            match result {
                Ok(Err(e)) => error!("Server error: {}", e),
                Err(e) => error!("Server task error: {}", e),
                Ok(Ok(())) => {}
            }
        }
        _ = shutdown_signal() => {
            info!("Shutdown signal received, stopping server...");
            server_handle.stop(true).await;
        }
    }

    info!("Server stopped gracefully");
    Ok(())
}

/// Route table shared by the server and the end-to-end tests.
pub(crate) fn routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/ws", web::get().to(websocket::bridge_websocket))
        .service(
            web::scope("/api/v1")
                .route("/health", web::get().to(health::health_check))
                .route("/metrics", web::get().to(health::detailed_metrics))
                .route("/config", web::get().to(handlers::get_config)),
        )
        .route("/health", web::get().to(health::health_check));
}

/// `RUST_LOG` overrides the default filter, e.g. `RUST_LOG=stt_bridge_backend=trace`
/// to see every frame the bridge forwards.
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "stt_bridge_backend=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}

/// Resolves on the first SIGINT or SIGTERM.
///
/// If a handler can't be installed the server keeps running and only the other
/// signal (or Ctrl+C) can stop it.
#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let sigterm = signal(SignalKind::terminate());
    let sigint = signal(SignalKind::interrupt());

    match (sigterm, sigint) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => info!("Received SIGTERM"),
                _ = sigint.recv() => info!("Received SIGINT"),
            }
        }
        (Ok(mut sigterm), Err(e)) => {
            warn!("Failed to install SIGINT handler: {}", e);
            sigterm.recv().await;
            info!("Received SIGTERM");
        }
        (Err(e), _) => {
            warn!("Failed to install SIGTERM handler: {}", e);
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for Ctrl+C: {}", e);
                std::future::pending::<()>().await;
            }
            info!("Received SIGINT");
        }
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Received Ctrl+C");
}
