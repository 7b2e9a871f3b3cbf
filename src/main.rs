//! # Telephony Realtime Relay - Main Application Entry Point
//!
//! Bridges telephony media streams (μ-law over WebSocket) to a realtime voice
//! AI API (PCM16 over WebSocket). One actix-web server carries both the small
//! HTTP surface and the media stream upgrades.
//!
//! ## Application Architecture:
//! - **audio**: μ-law ⇄ PCM16 transcoding and base64 frame handling
//! - **protocol**: typed messages for both WebSocket protocols
//! - **relay**: gate, dispatcher, session state machine and both legs
//! - **config**: layered configuration (file + environment)
//! - **state**: shared configuration, dispatcher and metrics
//! - **health** / **handlers**: liveness, metrics and service info endpoints
//! - **middleware**: request logging and per-endpoint metrics
//! - **error**: HTTP errors and the relay error taxonomy
//!
//! ## Routing:
//! The HTTP endpoints are registered explicitly. Every other path falls
//! through to the relay dispatcher, so an upgrade to an unknown route is
//! answered by the gate (404) rather than by the router.

mod audio;
mod config;
mod error;
mod handlers;
mod health;
mod middleware;
mod protocol;
mod relay;
mod state;

use actix_cors::Cors;
use actix_web::{middleware::Logger, web, App, HttpServer};
use anyhow::{anyhow, Result};
use crate::config::AppConfig;
use crate::state::AppState;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Access log format. `%U` is the path without the query string, which
/// carries the shared secret on upgrade requests.
const ACCESS_LOG_FORMAT: &str = "%a %U %s %b %T";

#[actix_web::main]
async fn main() -> Result<()> {
    // It's fine if there's no .env file
    dotenv::dotenv().ok();

    init_tracing()?;

    let config = AppConfig::load()?;
    config.validate()?;

    // wss:// to the realtime API needs a process-wide crypto provider
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install the rustls crypto provider"))?;

    info!("Starting {} v{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
    info!("Configuration loaded: {}:{}", config.server.host, config.server.port);
    for persona in &config.personas {
        info!(route = %persona.route, voice = %persona.voice, "Media stream route registered");
    }
    if config.relay.api_key.is_empty() {
        warn!("No realtime API key configured; upstream connects will be rejected");
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
            .wrap(cors)
            .wrap(Logger::new(ACCESS_LOG_FORMAT))
            .wrap(middleware::MetricsMiddleware)
            .wrap(middleware::RequestLogging)
            .service(
                web::scope("/api/v1")
                    .route("/health", web::get().to(health::health_check))
                    .route("/metrics", web::get().to(health::detailed_metrics))
                    .route("/info", web::get().to(handlers::service_info)),
            )
            .route("/health", web::get().to(health::health_check))
            .route("/", web::get().to(handlers::service_info))
            .default_service(web::to(relay::relay_upgrade))
    })
    // Graceful shutdown is handled below, not by actix's own signal listener
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
        signal = wait_for_shutdown() => {
            match signal {
                Ok(name) => info!("Received {}, stopping server...", name),
                Err(e) => error!("Signal handling failed, stopping server: {}", e),
            }
            server_handle.stop(true).await;
        }
    }

    info!("Server stopped gracefully");
    Ok(())
}

/// Set up the tracing subscriber.
///
/// `RUST_LOG` controls what gets logged; without it the relay logs at debug
/// and actix at info.
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "telephony_realtime_relay=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init()?;

    Ok(())
}

/// Resolve once SIGTERM or SIGINT arrives, with the signal's name.
#[cfg(unix)]
async fn wait_for_shutdown() -> Result<&'static str> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    let name = tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    };
    Ok(name)
}

#[cfg(not(unix))]
async fn wait_for_shutdown() -> Result<&'static str> {
    tokio::signal::ctrl_c().await?;
    Ok("Ctrl+C")
}
