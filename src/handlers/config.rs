//! # Configuration REST API Handlers
//!
//! - `GET /api/v1/config`: current configuration with API keys masked
//! - `PUT /api/v1/config`: partial update, validated before it is applied.
//!   Only models, prompts, the speech toggle and the request timeout can be
//!   changed; anything else is rejected with 400.
//!
//! ## Update Example:
//! ```json
//! { "pipeline": { "synthesize_speech": false } }
//! ```

use crate::{error::AppError, state::AppState};
use actix_web::{web, HttpResponse};
use serde_json::json;
use tracing::info;

pub async fn get_config(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let config = state.get_config();
    Ok(HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "config": config.redacted()
    })))
}

pub async fn update_config(
    state: web::Data<AppState>,
    body: web::Json<serde_json::Value>,
) -> Result<HttpResponse, AppError> {
    let json_str = serde_json::to_string(&body.into_inner())?;

    let mut updated = state.get_config();
    updated
        .update_from_json(&json_str)
        .map_err(|e| AppError::ValidationError(e.to_string()))?;

    state
        .update_config(updated.clone())
        .map_err(|e| AppError::ValidationError(e.to_string()))?;

    info!("Configuration updated");

    Ok(HttpResponse::Ok().json(json!({
        "status": "success",
        "message": "Configuration updated successfully",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "updated_config": updated.redacted()
    })))
}
