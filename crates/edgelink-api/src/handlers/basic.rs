//! Common endpoints: ping, version, config and metrics.

use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;
use axum::Json;

use edgelink_core::API_VERSION;

use super::ServerState;
use crate::models::{ApiResult, ConfigResponse, PingResponse, VersionResponse};

pub async fn ping_handler(State(state): State<ServerState>) -> Json<PingResponse> {
    Json(PingResponse {
        api_version: API_VERSION.to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        service_name: state.service.name().to_string(),
    })
}

pub async fn version_handler(State(state): State<ServerState>) -> Json<VersionResponse> {
    Json(VersionResponse {
        api_version: API_VERSION.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        sdk_version: edgelink_devices::VERSION.to_string(),
        service_name: state.service.name().to_string(),
    })
}

pub async fn config_handler(State(state): State<ServerState>) -> ApiResult<Json<ConfigResponse>> {
    Ok(Json(ConfigResponse {
        api_version: API_VERSION.to_string(),
        service_name: state.service.name().to_string(),
        config: serde_json::to_value(state.service.config())?,
    }))
}

/// Prometheus text exposition of the service registry.
pub async fn metrics_handler(State(state): State<ServerState>) -> ApiResult<impl IntoResponse> {
    let text = state.service.metrics().gather_text()?;
    Ok((
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        text,
    ))
}
