//! Discovery and profile-scan routes.

use std::collections::HashMap;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use tracing::info;

use edgelink_core::models::{BaseResponse, ProfileScanRequest};
use edgelink_core::API_VERSION;

use super::ServerState;
use crate::models::{ApiResult, DiscoveryResponse, ErrorResponse};

fn options(body: &Bytes) -> ApiResult<HashMap<String, serde_json::Value>> {
    if body.is_empty() {
        return Ok(HashMap::new());
    }
    Ok(serde_json::from_slice(body)?)
}

/// `POST /discovery`
pub async fn discovery_handler(
    State(state): State<ServerState>,
) -> ApiResult<(StatusCode, Json<DiscoveryResponse>)> {
    let request_id = state.service.discovery().discover()?;
    info!(request_id = %request_id, "Discovery requested");
    Ok((
        StatusCode::ACCEPTED,
        Json(DiscoveryResponse {
            api_version: API_VERSION.to_string(),
            status_code: StatusCode::ACCEPTED.as_u16(),
            request_id,
        }),
    ))
}

/// `DELETE /discovery`
pub async fn stop_discovery_handler(
    State(state): State<ServerState>,
    body: Bytes,
) -> ApiResult<Json<BaseResponse>> {
    state
        .service
        .discovery()
        .stop_discovery(None, &options(&body)?)
        .await?;
    Ok(Json(BaseResponse::new("", 200, "")))
}

/// `DELETE /discovery/request-id/:id`
pub async fn stop_discovery_by_id_handler(
    State(state): State<ServerState>,
    Path(request_id): Path<String>,
    body: Bytes,
) -> ApiResult<Json<BaseResponse>> {
    state
        .service
        .discovery()
        .stop_discovery(Some(&request_id), &options(&body)?)
        .await
        .map_err(|e| ErrorResponse::from(e).with_request_id(request_id.clone()))?;
    Ok(Json(BaseResponse::new(request_id, 200, "")))
}

/// `POST /profilescan` with a ProfileScanRequest body.
pub async fn profile_scan_handler(
    State(state): State<ServerState>,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<BaseResponse>)> {
    let request: ProfileScanRequest = serde_json::from_slice(&body)?;
    let request_id = request.request_id.clone();
    state
        .service
        .profile_scans()
        .profile_scan(request)
        .map_err(|e| ErrorResponse::from(e).with_request_id(request_id.clone()))?;
    Ok((
        StatusCode::ACCEPTED,
        Json(BaseResponse::new(request_id, StatusCode::ACCEPTED.as_u16(), "")),
    ))
}

/// `DELETE /profilescan/device/name/:name`
pub async fn stop_profile_scan_handler(
    State(state): State<ServerState>,
    Path(device): Path<String>,
    body: Bytes,
) -> ApiResult<Json<BaseResponse>> {
    state
        .service
        .profile_scans()
        .stop_profile_scan(&device, &options(&body)?)
        .await?;
    Ok(Json(BaseResponse::new("", 200, "")))
}
