//! # Session REST API Handlers
//!
//! A session records (or receives) one utterance at a time and runs it through
//! the pipeline. Clients poll `GET /sessions/{id}` to follow the state.
//!
//! ## Endpoints:
//! - `POST /sessions`, `GET /sessions`, `GET|DELETE /sessions/{id}`
//! - `POST /sessions/{id}/recording/start|stop|cancel`
//! - `POST /sessions/{id}/audio`: raw 16-bit little-endian PCM chunk
//! - `POST /sessions/{id}/upload`: multipart file in field `audio`
//! - `POST /sessions/{id}/cancel`: cancel the in-flight run
//! - `GET /sessions/{id}/recording.wav`, `GET /sessions/{id}/reply/audio`
//! - `POST /sessions/{id}/reply/ack`: the client finished playing the reply

use crate::audio::{PipelineMode, TherapySession};
use crate::pipeline::PipelineInput;
use crate::providers::AudioUpload;
use crate::{error::AppError, state::AppState};
use actix_multipart::Multipart;
use actix_web::{web, HttpResponse};
use futures_util::StreamExt;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Default, Deserialize)]
pub struct CreateSessionRequest {
    pub session_id: Option<String>,
    pub mode: Option<PipelineMode>,
}

fn find_session(state: &AppState, session_id: &str) -> Result<Arc<TherapySession>, AppError> {
    state
        .sessions
        .get_session(session_id)
        .ok_or_else(|| AppError::NotFound(format!("Session '{}' not found", session_id)))
}

/// ## Endpoint: `POST /api/v1/sessions`
///
/// Body is optional: `{"session_id": "evening-entry", "mode": "journal"}`.
pub async fn create_session(
    state: web::Data<AppState>,
    body: Option<web::Json<CreateSessionRequest>>,
) -> Result<HttpResponse, AppError> {
    let request = body.map(|b| b.into_inner()).unwrap_or_default();
    let session = state
        .sessions
        .create_session(request.session_id, request.mode.unwrap_or_default())?;

    info!(session_id = %session.session_id, mode = session.mode.as_str(), "Session created");

    Ok(HttpResponse::Created().json(json!({
        "session_id": session.session_id,
        "mode": session.mode,
        "state": session.state().as_str(),
        "created_at": session.created_at.to_rfc3339()
    })))
}

pub async fn list_sessions(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let mut sessions: Vec<_> = state
        .sessions
        .get_active_session_ids()
        .iter()
        .filter_map(|id| state.sessions.get_session(id))
        .map(|session| session.snapshot())
        .collect();
    sessions.sort_by(|a, b| a.created_at.cmp(&b.created_at));

    Ok(HttpResponse::Ok().json(json!({
        "summary": state.sessions.get_sessions_summary(),
        "sessions": sessions
    })))
}

pub async fn get_session(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let session = find_session(&state, &path)?;
    Ok(HttpResponse::Ok().json(session.snapshot()))
}

/// Cancels any in-flight run before removing the session.
pub async fn delete_session(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let session_id = path.into_inner();
    if !state.sessions.remove_session(&session_id) {
        return Err(AppError::NotFound(format!("Session '{}' not found", session_id)));
    }

    info!(session_id = %session_id, "Session removed");
    Ok(HttpResponse::Ok().json(json!({
        "status": "deleted",
        "session_id": session_id
    })))
}

pub async fn start_recording(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let session = find_session(&state, &path)?;
    session.start_recording()?;
    debug!(session_id = %session.session_id, "Recording started");
    Ok(HttpResponse::Ok().json(session.snapshot()))
}

/// ## Endpoint: `POST /api/v1/sessions/{id}/audio`
///
/// Body is raw PCM in the configured format (`audio.channels`,
/// `audio.sample_rate`), 16-bit little-endian. Samples past the maximum
/// recording length are dropped and `capture_full` turns true.
pub async fn add_audio(
    state: web::Data<AppState>,
    path: web::Path<String>,
    body: web::Bytes,
) -> Result<HttpResponse, AppError> {
    let session = find_session(&state, &path)?;
    let accepted = session.add_audio(&body)?;

    Ok(HttpResponse::Ok().json(json!({
        "accepted_samples": accepted,
        "captured_seconds": session.captured_seconds(),
        "capture_full": session.capture_is_full()
    })))
}

/// ## Endpoint: `POST /api/v1/sessions/{id}/recording/stop`
///
/// Starts the pipeline and answers `202 Accepted`. A recording shorter than
/// two frames starts nothing and returns the session to idle.
pub async fn stop_recording(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let session = find_session(&state, &path)?;
    let synthesize_speech = state.get_config().pipeline.synthesize_speech;

    match session.finish_recording(synthesize_speech)? {
        Some((buffer, run)) => {
            info!(
                session_id = %session.session_id,
                run_id = run.run_id,
                seconds = buffer.duration_seconds(),
                "Recording finished, starting pipeline"
            );
            let run_id = run.run_id;
            state
                .pipeline()
                .spawn(session.clone(), run, PipelineInput::Recording(buffer));

            Ok(HttpResponse::Accepted().json(json!({
                "session_id": session.session_id,
                "run_id": run_id,
                "state": session.state().as_str()
            })))
        }
        None => Ok(HttpResponse::Ok().json(json!({
            "session_id": session.session_id,
            "state": session.state().as_str(),
            "message": "Nothing was recorded"
        }))),
    }
}

pub async fn cancel_recording(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let session = find_session(&state, &path)?;
    session.cancel_recording()?;
    Ok(HttpResponse::Ok().json(session.snapshot()))
}

/// ## Endpoint: `POST /api/v1/sessions/{id}/upload`
///
/// Multipart form with the audio file in field `audio` (e.g. an MP3). The file
/// goes to transcription unchanged.
pub async fn upload_audio(
    state: web::Data<AppState>,
    path: web::Path<String>,
    mut payload: Multipart,
) -> Result<HttpResponse, AppError> {
    let session = find_session(&state, &path)?;
    let config = state.get_config();
    let max_bytes = config.performance.max_upload_bytes;

    let mut upload: Option<AudioUpload> = None;

    while let Some(item) = payload.next().await {
        let mut field =
            item.map_err(|e| AppError::ValidationError(format!("Multipart error: {}", e)))?;

        let content_disposition = field
            .content_disposition()
            .ok_or_else(|| AppError::ValidationError("Missing content disposition".to_string()))?;
        if content_disposition.get_name() != Some("audio") {
            continue;
        }
        let filename = content_disposition
            .get_filename()
            .filter(|name| !name.is_empty())
            .unwrap_or("upload.wav")
            .to_string();
        let content_type = field.content_type().map(|mime| mime.essence_str().to_string());

        let mut bytes = Vec::new();
        while let Some(chunk) = field.next().await {
            let chunk =
                chunk.map_err(|e| AppError::ValidationError(format!("Chunk error: {}", e)))?;
            if bytes.len() + chunk.len() > max_bytes {
                return Err(AppError::ValidationError(format!(
                    "File too large (max: {} bytes)",
                    max_bytes
                )));
            }
            bytes.extend_from_slice(&chunk);
        }

        upload = Some(AudioUpload::from_file(filename, bytes, content_type));
    }

    let upload = upload
        .ok_or_else(|| AppError::ValidationError("No audio file provided".to_string()))?;
    if upload.bytes.is_empty() {
        return Err(AppError::ValidationError("Uploaded audio file is empty".to_string()));
    }

    let run = session.begin_upload(config.pipeline.synthesize_speech)?;
    info!(
        session_id = %session.session_id,
        run_id = run.run_id,
        filename = %upload.filename,
        bytes = upload.bytes.len(),
        "Audio uploaded, starting pipeline"
    );
    let run_id = run.run_id;
    state
        .pipeline()
        .spawn(session.clone(), run, PipelineInput::Upload(upload));

    Ok(HttpResponse::Accepted().json(json!({
        "session_id": session.session_id,
        "run_id": run_id,
        "state": session.state().as_str()
    })))
}

pub async fn cancel_run(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let session = find_session(&state, &path)?;
    let cancelled = session.cancel();
    if cancelled {
        info!(session_id = %session.session_id, "Pipeline run cancelled by client");
    }

    Ok(HttpResponse::Ok().json(json!({
        "cancelled": cancelled,
        "state": session.state().as_str()
    })))
}

pub async fn get_recording(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let session = find_session(&state, &path)?;
    let wav = session
        .recording()
        .ok_or_else(|| AppError::NotFound("No recording available".to_string()))?;

    Ok(HttpResponse::Ok()
        .content_type("audio/wav")
        .body(wav.into_bytes()))
}

pub async fn get_reply_audio(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let session = find_session(&state, &path)?;
    let speech = session
        .reply_audio()
        .ok_or_else(|| AppError::NotFound("No reply audio available".to_string()))?;

    Ok(HttpResponse::Ok()
        .content_type(speech.content_type)
        .body(speech.bytes))
}

pub async fn acknowledge_reply(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let session = find_session(&state, &path)?;
    session.acknowledge_playback()?;
    Ok(HttpResponse::Ok().json(session.snapshot()))
}
