//! # HTTP Handlers
//!
//! Everything here is mounted under `/api/v1` by `configure_routes`.

pub mod config;
pub mod encode;
pub mod sessions;

pub use self::config::*;
pub use encode::*;
pub use sessions::*;

use crate::health;
use actix_web::web;

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health::health_check))
        .route("/metrics", web::get().to(health::detailed_metrics))
        .route("/config", web::get().to(get_config))
        .route("/config", web::put().to(update_config))
        .route("/encode", web::post().to(encode_wav))
        .service(
            web::scope("/sessions")
                .route("", web::post().to(create_session))
                .route("", web::get().to(list_sessions))
                .route("/{session_id}", web::get().to(get_session))
                .route("/{session_id}", web::delete().to(delete_session))
                .route("/{session_id}/recording/start", web::post().to(start_recording))
                .route("/{session_id}/recording/stop", web::post().to(stop_recording))
                .route("/{session_id}/recording/cancel", web::post().to(cancel_recording))
                .route("/{session_id}/recording.wav", web::get().to(get_recording))
                .route("/{session_id}/audio", web::post().to(add_audio))
                .route("/{session_id}/upload", web::post().to(upload_audio))
                .route("/{session_id}/cancel", web::post().to(cancel_run))
                .route("/{session_id}/reply/audio", web::get().to(get_reply_audio))
                .route("/{session_id}/reply/ack", web::post().to(acknowledge_reply)),
        );
}
