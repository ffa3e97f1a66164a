//! # Voice Job-Application Tracking Backend
//!
//! Actix-web server exposing one WebSocket endpoint for real-time voice
//! sessions plus a small REST surface for health and configuration.
//!
//! ## Application Architecture:
//! - **config**: layered configuration (TOML file + environment variables)
//! - **state**: shared application state and metrics
//! - **error**: error taxonomy and HTTP/wire mappings
//! - **websocket**: the per-connection session protocol handler
//! - **audio**: utterance fragment assembly
//! - **session**: session model and process-wide registry
//! - **agent**: agent profiles, tool dispatch, turn orchestration
//! - **pipeline**: boundary to the external speech/agent service
//! - **store**: the job-application state engine
//! - **health / handlers / middleware**: REST surface and telemetry

mod agent;
mod audio;
mod config;
mod error;
mod handlers;
mod health;
mod middleware;
mod pipeline;
mod session;
mod state;
mod store;
mod websocket;

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use anyhow::Result;
use config::AppConfig;
use pipeline::http::HttpPipeline;
use state::AppState;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Global shutdown signal, set by the signal handler task and polled by the
/// main task to stop the server gracefully.
static SHUTDOWN_SIGNAL: AtomicBool = AtomicBool::new(false);

#[actix_web::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    init_tracing()?;

    let config = AppConfig::load()?;
    config.validate()?;

    info!("Starting voice-jobs-backend v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration loaded: {}:{}", config.server.host, config.server.port);
    info!("Pipeline upstream: {}", config.pipeline.base_url);

    let pipeline = Arc::new(HttpPipeline::new(&config.pipeline));
    let app_state = AppState::new(config.clone(), pipeline);
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);

    setup_signal_handlers();

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
            .wrap(middleware::RequestTelemetry)
            // The voice session protocol
            .route("/ws", web::get().to(websocket::voice_websocket))
            // REST surface
            .route("/", web::get().to(health::root))
            .route("/health", web::get().to(health::health_check))
            .route("/status", web::get().to(health::server_status))
            .service(
                web::scope("/api/v1")
                    .route("/health", web::get().to(health::health_check))
                    .route("/metrics", web::get().to(health::detailed_metrics))
                    .route("/config", web::get().to(handlers::get_config))
                    .route("/config", web::put().to(handlers::update_config)),
            )
    })
    .bind(&bind_addr)?
    .run();

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    // Race the server against the shutdown signal.
    tokio::select! {
        result = server_task => {
            match result {
                Ok(server_result) => {
                    if let Err(e) = server_result {
                        error!("Server error: {}", e);
                    }
                }
                Err(e) => {
                    error!("Server task error: {}", e);
                }
            }
        }
        _ = wait_for_shutdown() => {
            info!("Shutdown signal received, stopping server...");
            server_handle.stop(true).await;
        }
    }

    info!("Server stopped gracefully");
    Ok(())
}

/// Initialize the tracing (logging) system.
///
/// `RUST_LOG` controls filtering; without it the default keeps this crate at
/// debug and the framework at info.
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "voice_jobs_backend=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}

/// Listen for SIGTERM/SIGINT and flip the shutdown flag.
fn setup_signal_handlers() {
    tokio::spawn(async {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler");
        let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())
            .expect("Failed to install SIGINT handler");

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }

        SHUTDOWN_SIGNAL.store(true, Ordering::SeqCst);
    });
}

/// Poll the shutdown flag without busy-waiting.
async fn wait_for_shutdown() {
    while !SHUTDOWN_SIGNAL.load(Ordering::SeqCst) {
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    }
}
