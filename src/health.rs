//! # Health Check and Metrics
//!
//! - `GET /health` and `GET /api/v1/health`: liveness plus a short status summary
//! - `GET /api/v1/metrics`: per-endpoint request statistics

use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde_json::json;

pub async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let config = state.get_config();
    let sessions = state.sessions.get_sessions_summary();

    HttpResponse::Ok().json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": state.get_uptime_seconds(),
        "service": {
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
            "host": config.server.host,
            "port": config.server.port
        },
        "metrics": {
            "total_requests": metrics.request_count,
            "total_errors": metrics.error_count,
            "error_rate": error_rate(metrics.request_count, metrics.error_count),
            "active_sessions": sessions.total_sessions
        },
        "memory": get_memory_info(),
        "providers": {
            "transcription": {
                "model": config.providers.transcription_model,
                "configured": !config.providers.api_key.is_empty()
            },
            "chat": {
                "model": config.providers.chat_model,
                "configured": !config.providers.api_key.is_empty()
            },
            "speech": {
                "model": config.providers.tts_model_id,
                "enabled": config.pipeline.synthesize_speech,
                "configured": !config.providers.tts_api_key.is_empty()
            }
        },
        "system": get_system_status(sessions.total_sessions, sessions.max_sessions)
    }))
}

pub async fn detailed_metrics(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let uptime_seconds = state.get_uptime_seconds();
    let sessions = state.sessions.get_sessions_summary();

    let mut endpoint_stats: Vec<_> = metrics
        .endpoint_metrics
        .iter()
        .map(|(endpoint, metric)| {
            json!({
                "endpoint": endpoint,
                "request_count": metric.request_count,
                "error_count": metric.error_count,
                "error_rate": metric.error_rate(),
                "average_duration_ms": metric.average_duration_ms(),
                "total_duration_ms": metric.total_duration_ms
            })
        })
        .collect();
    endpoint_stats.sort_by(|a, b| a["endpoint"].as_str().cmp(&b["endpoint"].as_str()));

    HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": uptime_seconds,
        "overall": {
            "total_requests": metrics.request_count,
            "total_errors": metrics.error_count,
            "error_rate": error_rate(metrics.request_count, metrics.error_count),
            "requests_per_second": if uptime_seconds > 0 {
                metrics.request_count as f64 / uptime_seconds as f64
            } else {
                0.0
            }
        },
        "sessions": sessions,
        "endpoints": endpoint_stats,
        "memory": get_memory_info()
    }))
}

fn error_rate(requests: u64, errors: u64) -> f64 {
    if requests > 0 {
        errors as f64 / requests as f64
    } else {
        0.0
    }
}

/// Resident and virtual memory of this process, read from `/proc` on Linux.
fn get_memory_info() -> serde_json::Value {
    #[cfg(target_os = "linux")]
    {
        let path = format!("/proc/{}/status", std::process::id());
        if let Ok(status) = std::fs::read_to_string(path) {
            let kb = |prefix: &str| {
                status
                    .lines()
                    .find(|line| line.starts_with(prefix))
                    .and_then(|line| line.split_whitespace().nth(1))
                    .and_then(|value| value.parse::<u64>().ok())
                    .unwrap_or(0)
            };
            return json!({
                "resident_memory_bytes": kb("VmRSS:") * 1024,
                "virtual_memory_bytes": kb("VmSize:") * 1024,
                "available": true
            });
        }
    }

    json!({
        "resident_memory_bytes": 0,
        "virtual_memory_bytes": 0,
        "available": false
    })
}

fn get_system_status(current_sessions: usize, max_sessions: usize) -> serde_json::Value {
    let session_usage = if max_sessions > 0 {
        current_sessions as f64 / max_sessions as f64
    } else {
        0.0
    };

    let status = if session_usage > 0.9 {
        "high_load"
    } else if session_usage > 0.7 {
        "moderate_load"
    } else {
        "normal"
    };

    json!({
        "status": status,
        "session_usage_percent": (session_usage * 100.0).round(),
        "max_sessions": max_sessions,
        "current_sessions": current_sessions,
        "load_warnings": if session_usage > 0.8 {
            vec!["High session usage - consider increasing max_concurrent_sessions"]
        } else {
            vec![]
        }
    })
}
