//! Device command routes.

use std::collections::HashMap;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use tracing::{debug, error};

use edgelink_core::models::{BaseResponse, Event, EventResponse};
use edgelink_devices::CommandOptions;

use super::{correlation_id, ServerState};
use crate::models::ApiResult;

/// `GET /device/name/:name/:command`
pub async fn get_command_handler(
    State(state): State<ServerState>,
    Path((device, command)): Path<(String, String)>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let correlation_id = correlation_id(&headers);
    let options = CommandOptions::from_query(&query)?;
    debug!(correlation_id = %correlation_id, device = %device, source = %command, "GET command");

    let event = state
        .service
        .dispatcher()
        .get_command(&device, &command, &options.raw_query, options.regex)
        .await?;
    push_event(&state, &event, &options, &correlation_id).await;

    if !options.return_event {
        return Ok(StatusCode::OK.into_response());
    }
    Ok(Json(EventResponse::new(correlation_id, Some(event))).into_response())
}

/// `PUT /device/name/:name/:command` with a JSON object of resource values.
pub async fn set_command_handler(
    State(state): State<ServerState>,
    Path((device, command)): Path<(String, String)>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<BaseResponse>> {
    let correlation_id = correlation_id(&headers);
    let options = CommandOptions::from_query(&query)?;
    let params: HashMap<String, serde_json::Value> = if body.is_empty() {
        HashMap::new()
    } else {
        serde_json::from_slice(&body)?
    };
    debug!(correlation_id = %correlation_id, device = %device, source = %command, "PUT command");

    let event = state
        .service
        .dispatcher()
        .set_command(&device, &command, &options.raw_query, &params)
        .await?;
    if let Some(event) = &event {
        push_event(&state, event, &options, &correlation_id).await;
    }
    Ok(Json(BaseResponse::new(correlation_id, 200, "")))
}

async fn push_event(state: &ServerState, event: &Event, options: &CommandOptions, correlation_id: &str) {
    if !options.push_event {
        return;
    }
    if let Err(e) = state
        .service
        .publisher()
        .send_event(event.clone(), correlation_id)
        .await
    {
        error!(correlation_id = %correlation_id, error = %e, "Failed to push event");
    }
}
