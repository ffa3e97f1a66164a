//! # Health and Status Endpoints
//!
//! REST surface for monitoring: service info at the root, a liveness probe,
//! a detailed status body, and per-endpoint request metrics.

use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde_json::json;
use std::process;

/// Root endpoint: basic service information and where the protocol lives.
pub async fn root(state: web::Data<AppState>) -> HttpResponse {
    let config = state.get_config();
    HttpResponse::Ok().json(json!({
        "message": "Voice job-application tracking server is running",
        "websocket": "/ws",
        "health": "/health",
        "version": env!("CARGO_PKG_VERSION"),
        "audio_format": {
            "sample_rate": config.audio.sample_rate,
            "bit_depth": config.audio.bit_depth,
            "channels": config.audio.channels,
            "encoding": "pcm16le/base64"
        }
    }))
}

/// Liveness probe.
pub async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();

    HttpResponse::Ok().json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": state.get_uptime_seconds(),
        "service": {
            "name": "voice-jobs-backend",
            "version": env!("CARGO_PKG_VERSION")
        },
        "metrics": {
            "total_requests": metrics.request_count,
            "total_errors": metrics.error_count,
            "active_sessions": state.registry().active_session_count(),
            "utterances_processed": metrics.utterances_processed
        }
    }))
}

/// Detailed server status: sessions, store size, pipeline target.
pub async fn server_status(state: web::Data<AppState>) -> HttpResponse {
    let config = state.get_config();
    let metrics = state.get_metrics_snapshot();
    let registry = state.registry();

    HttpResponse::Ok().json(json!({
        "status": "running",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": state.get_uptime_seconds(),
        "endpoints": {
            "websocket": "/ws",
            "health": "/health",
            "root": "/"
        },
        "sessions": {
            "active": registry.active_session_count(),
            "max_concurrent": config.session.max_concurrent_sessions,
            "ids": registry.active_session_ids()
        },
        "store": {
            "applications": state.store().application_count()
        },
        "pipeline": {
            "base_url": config.pipeline.base_url,
            "request_timeout_secs": config.pipeline.request_timeout_secs,
            "turns_failed": metrics.turns_failed
        },
        "memory": memory_info()
    }))
}

/// Per-endpoint request metrics.
pub async fn detailed_metrics(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let uptime_seconds = state.get_uptime_seconds();

    let mut endpoint_stats = Vec::new();
    for (endpoint, metric) in metrics.endpoint_metrics.iter() {
        endpoint_stats.push(json!({
            "endpoint": endpoint,
            "request_count": metric.request_count,
            "error_count": metric.error_count,
            "error_rate": metric.error_rate(),
            "average_duration_ms": metric.average_duration_ms(),
            "total_duration_ms": metric.total_duration_ms
        }));
    }

    HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": uptime_seconds,
        "overall": {
            "total_requests": metrics.request_count,
            "total_errors": metrics.error_count,
            "error_rate": if metrics.request_count > 0 {
                metrics.error_count as f64 / metrics.request_count as f64
            } else {
                0.0
            },
            "active_sessions": state.registry().active_session_count(),
            "utterances_processed": metrics.utterances_processed,
            "turns_failed": metrics.turns_failed,
            "requests_per_second": if uptime_seconds > 0 {
                metrics.request_count as f64 / uptime_seconds as f64
            } else {
                0.0
            }
        },
        "endpoints": endpoint_stats
    }))
}

/// Resident memory of this process, best-effort.
fn memory_info() -> serde_json::Value {
    let pid = process::id();

    #[cfg(target_os = "linux")]
    {
        if let Ok(status) = std::fs::read_to_string(format!("/proc/{}/status", pid)) {
            for line in status.lines() {
                if let Some(value) = line.strip_prefix("VmRSS:") {
                    let kb: u64 = value
                        .trim()
                        .trim_end_matches("kB")
                        .trim()
                        .parse()
                        .unwrap_or(0);
                    return json!({ "rss_kb": kb, "pid": pid });
                }
            }
        }
    }

    json!({ "rss_kb": serde_json::Value::Null, "pid": pid })
}
