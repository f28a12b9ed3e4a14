//! # Voice Journal Backend
//!
//! HTTP service behind the journaling app's voice features. A client records
//! audio into a session (or uploads a file); the service encodes it as WAV,
//! transcribes it, and in therapist mode asks a chat model for a reply and
//! optionally speaks it back.
//!
//! ## Startup:
//! 1. Load `.env`, initialize tracing
//! 2. Load and validate configuration
//! 3. Build shared state (providers, pipeline, session manager)
//! 4. Start the session cleanup task and the HTTP server
//! 5. Stop gracefully on SIGINT/SIGTERM

mod audio;
mod config;
mod error;
mod handlers;
mod health;
mod middleware;
mod pipeline;
mod providers;
mod state;

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use anyhow::Result;
use crate::config::AppConfig;
use crate::state::AppState;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

static SHUTDOWN_SIGNAL: AtomicBool = AtomicBool::new(false);

#[actix_web::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_tracing()?;

    let config = AppConfig::load()?;
    config.validate()?;

    info!("Starting {} v{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
    info!("Configuration loaded: {}:{}", config.server.host, config.server.port);
    if config.providers.api_key.is_empty() {
        warn!("providers.api_key is empty; transcription and chat requests will be rejected");
    }
    if config.pipeline.synthesize_speech && config.providers.tts_api_key.is_empty() {
        warn!("providers.tts_api_key is empty; speech synthesis will fail");
    }

    let app_state = AppState::new(config.clone())?;
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let max_upload_bytes = config.performance.max_upload_bytes;

    setup_signal_handlers();
    spawn_session_cleanup(
        app_state.clone(),
        config.performance.cleanup_interval_secs,
        config.performance.session_max_age_secs,
    );

    info!("Starting HTTP server on {}", bind_addr);

    let server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(web::Data::new(app_state.clone()))
            // Raw PCM chunks and JSON sample buffers can exceed actix's defaults
            .app_data(web::PayloadConfig::new(max_upload_bytes))
            .app_data(web::JsonConfig::default().limit(max_upload_bytes))
            .wrap(middleware::MetricsMiddleware)
            .wrap(cors)
            .wrap(TracingLogger::default())
            .service(web::scope("/api/v1").configure(handlers::configure_routes))
            .route("/health", web::get().to(health::health_check))
    })
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
        _ = wait_for_shutdown() => {
            info!("Shutdown signal received, stopping server...");
            server_handle.stop(true).await;
        }
    }

    info!("Server stopped gracefully");
    Ok(())
}

fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "voice_journal_backend=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init()?;
    Ok(())
}

/// Periodically drop sessions that have been idle longer than `max_age_secs`.
fn spawn_session_cleanup(state: AppState, interval_secs: u64, max_age_secs: u64) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
        // The first tick completes immediately
        interval.tick().await;

        loop {
            interval.tick().await;
            if SHUTDOWN_SIGNAL.load(Ordering::SeqCst) {
                break;
            }

            let removed = state.sessions.cleanup_old_sessions(max_age_secs);
            if removed > 0 {
                info!(removed, remaining = state.sessions.active_session_count(), "Cleaned up idle sessions");
            }
        }
    });
}

fn setup_signal_handlers() {
    tokio::spawn(async {
        use tokio::signal::unix::{signal, SignalKind};

        let (mut sigterm, mut sigint) =
            match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                (Ok(term), Ok(int)) => (term, int),
                (Err(e), _) | (_, Err(e)) => {
                    error!("Failed to install signal handlers: {}", e);
                    return;
                }
            };

        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM"),
            _ = sigint.recv() => info!("Received SIGINT"),
        }

        SHUTDOWN_SIGNAL.store(true, Ordering::SeqCst);
    });
}

async fn wait_for_shutdown() {
    while !SHUTDOWN_SIGNAL.load(Ordering::SeqCst) {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}
