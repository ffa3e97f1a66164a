//! Runtime configuration endpoints: read the effective config and apply
//! partial updates. The audio section is read-only — the transport format
//! is wire protocol, not tuning.

use crate::{error::AppError, state::AppState};
use actix_web::{web, HttpResponse};
use serde_json::json;

pub async fn get_config(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let config = state.get_config();

    Ok(HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "config": config_body(&config)
    })))
}

pub async fn update_config(
    state: web::Data<AppState>,
    body: web::Json<serde_json::Value>,
) -> Result<HttpResponse, AppError> {
    let json_str = serde_json::to_string(&body.into_inner())?;

    let mut current_config = state.get_config();
    current_config
        .update_from_json(&json_str)
        .map_err(|e| AppError::ValidationError(e.to_string()))?;

    state
        .update_config(current_config.clone())
        .map_err(AppError::ValidationError)?;

    Ok(HttpResponse::Ok().json(json!({
        "status": "success",
        "message": "Configuration updated successfully",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "updated_config": config_body(&current_config)
    })))
}

fn config_body(config: &crate::config::AppConfig) -> serde_json::Value {
    json!({
        "server": {
            "host": config.server.host,
            "port": config.server.port
        },
        "audio": {
            "sample_rate": config.audio.sample_rate,
            "channels": config.audio.channels,
            "bit_depth": config.audio.bit_depth,
            "max_utterance_bytes": config.audio.max_utterance_bytes
        },
        "pipeline": {
            "base_url": config.pipeline.base_url,
            "request_timeout_secs": config.pipeline.request_timeout_secs
        },
        "session": {
            "default_user_id": config.session.default_user_id,
            "max_concurrent_sessions": config.session.max_concurrent_sessions,
            "heartbeat_interval_secs": config.session.heartbeat_interval_secs,
            "client_timeout_secs": config.session.client_timeout_secs
        }
    })
}
